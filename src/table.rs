//! Flat-file I/O for the raw, derived and playlist tables.
//!
//! Raw tables are read leniently: columns are found by alias, bad cells are
//! coerced to missing and counted. The final table is our own output and is
//! read strictly; anything unexpected is reported as a malformed table.

use anyhow::{anyhow, Context, Result};
use csv::StringRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::path::Path;

use crate::error::RecommendError;
use crate::models::{GenreId, PrepStats, ProcessedSong, RawGenreRow, RawSong};

// ============================================================================
// Column Names
// ============================================================================

pub const ARTIST_COLUMNS: &[&str] = &["artist_name", "artist"];
pub const TRACK_COLUMNS: &[&str] = &["track_name", "song_name", "name", "title"];
pub const YEAR_COLUMNS: &[&str] = &["release_date", "year", "release_year"];
pub const GENRE_LIST_COLUMNS: &[&str] = &["genres", "genre", "genre_list"];

pub const GENRE_HEADER: &[&str] = &["genre_id", "genre_name"];
pub const MAPPING_HEADER: &[&str] = &["artist_id", "genre_id"];
pub const PLAYLIST_HEADER: &[&str] = &["song_id", "song_name", "artist_name", "similarity_score"];

/// Fixed columns of the final table; every other column is a feature.
pub const FINAL_SONG_ID: &str = "song_id";
pub const FINAL_ARTIST_ID: &str = "artist_id";
pub const FINAL_SONG_NAME: &str = "song_name";
pub const FINAL_ARTIST_NAME: &str = "artist_name";
pub const FINAL_GENRE_IDS: &str = "genre_ids";
pub const FINAL_YEAR: &str = "year";
pub const FINAL_RESERVED: &[&str] = &[
    FINAL_SONG_ID,
    FINAL_ARTIST_ID,
    FINAL_SONG_NAME,
    FINAL_ARTIST_NAME,
    FINAL_GENRE_IDS,
    FINAL_YEAR,
];

/// Separator between genre ids inside the `genre_ids` cell.
pub const GENRE_ID_SEPARATOR: char = '|';

static LEADING_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{4})(?:\D|$)").unwrap());

// ============================================================================
// Header Lookup
// ============================================================================

/// Case-insensitive header lookup.
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    names: Vec<String>,
}

impl ColumnIndex {
    pub fn new(headers: &StringRecord) -> Self {
        Self {
            names: headers
                .iter()
                .map(|h| h.trim_start_matches('\u{feff}').trim().to_lowercase())
                .collect(),
        }
    }

    /// Position of the first alias present in the header.
    pub fn find(&self, aliases: &[&str]) -> Option<usize> {
        aliases.iter().find_map(|alias| {
            let alias = alias.to_lowercase();
            self.names.iter().position(|n| *n == alias)
        })
    }

    pub fn require(&self, aliases: &[&str], table: &Path) -> Result<usize> {
        self.find(aliases).ok_or_else(|| {
            anyhow!(
                "{} has no '{}' column",
                table.display(),
                aliases.join("' / '")
            )
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

// ============================================================================
// Cell Coercion
// ============================================================================

/// Parse a numeric cell; blank, non-numeric and non-finite values are `None`.
pub fn parse_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parse a release year from `1999`, `1999.0` or `1999-05-01`.
pub fn parse_year(cell: &str) -> Option<i32> {
    LEADING_YEAR
        .captures(cell.trim())
        .and_then(|caps| caps[1].parse().ok())
}

fn cell(record: &StringRecord, idx: usize) -> &str {
    record.get(idx).map(str::trim).unwrap_or("")
}

/// I/O errors abort the read; anything else only spoils the current row.
fn is_fatal(err: &csv::Error) -> bool {
    matches!(err.kind(), csv::ErrorKind::Io(_))
}

// ============================================================================
// Raw Tables
// ============================================================================

/// Read the raw song table.
///
/// Rows without an artist or track name are skipped. Feature cells that do
/// not parse become `None` and are filled later from genre aggregates.
pub fn read_song_table(
    path: &Path,
    feature_names: &[String],
    stats: &mut PrepStats,
) -> Result<Vec<RawSong>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open song table {}", path.display()))?;

    let columns = ColumnIndex::new(reader.headers()?);
    let artist_col = columns.require(ARTIST_COLUMNS, path)?;
    let track_col = columns.require(TRACK_COLUMNS, path)?;
    let year_col = columns.find(YEAR_COLUMNS);
    let feature_cols = feature_names
        .iter()
        .map(|name| columns.require(&[name.as_str()], path))
        .collect::<Result<Vec<_>>>()?;

    let mut songs = Vec::new();
    for record in reader.records() {
        stats.song_rows_read += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) if is_fatal(&e) => {
                return Err(e).with_context(|| format!("Failed reading {}", path.display()))
            }
            Err(_) => {
                stats.song_rows_skipped += 1;
                continue;
            }
        };

        let artist = cell(&record, artist_col);
        let track = cell(&record, track_col);
        if artist.is_empty() || track.is_empty() {
            stats.song_rows_skipped += 1;
            continue;
        }

        let features = feature_cols
            .iter()
            .map(|&idx| {
                let raw = cell(&record, idx);
                let value = parse_number(raw);
                if value.is_none() && !raw.is_empty() {
                    stats.malformed_feature_cells += 1;
                }
                value
            })
            .collect();

        let year = year_col.and_then(|idx| {
            let raw = cell(&record, idx);
            let year = parse_year(raw);
            if year.is_none() && !raw.is_empty() {
                stats.malformed_years += 1;
            }
            year
        });

        songs.push(RawSong {
            artist: artist.to_string(),
            track: track.to_string(),
            features,
            year,
        });
    }

    Ok(songs)
}

/// Read the raw genre table. Rows without an artist are skipped; an empty
/// genre list is kept and simply yields no genres.
pub fn read_genre_table(path: &Path, stats: &mut PrepStats) -> Result<Vec<RawGenreRow>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open genre table {}", path.display()))?;

    let columns = ColumnIndex::new(reader.headers()?);
    let artist_col = columns.require(ARTIST_COLUMNS, path)?;
    let genres_col = columns.require(GENRE_LIST_COLUMNS, path)?;

    let mut rows = Vec::new();
    for record in reader.records() {
        stats.genre_rows_read += 1;
        let record = match record {
            Ok(r) => r,
            Err(e) if is_fatal(&e) => {
                return Err(e).with_context(|| format!("Failed reading {}", path.display()))
            }
            Err(_) => {
                stats.genre_rows_skipped += 1;
                continue;
            }
        };

        let artist = cell(&record, artist_col);
        if artist.is_empty() {
            stats.genre_rows_skipped += 1;
            continue;
        }
        rows.push(RawGenreRow {
            artist: artist.to_string(),
            genres: cell(&record, genres_col).to_string(),
        });
    }

    Ok(rows)
}

// ============================================================================
// Writers
// ============================================================================

/// Write fixed-schema records under an explicit header, so the header is
/// present even when there are no rows. Existing files are truncated.
pub fn write_records<T: Serialize>(path: &Path, header: &[&str], records: &[T]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    writer.write_record(header)?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write the joined song table. Feature columns sit between the names and
/// the genre ids, in the order given.
pub fn write_final_table(path: &Path, feature_names: &[String], songs: &[ProcessedSong]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    let mut header: Vec<&str> = vec![FINAL_SONG_ID, FINAL_ARTIST_ID, FINAL_SONG_NAME, FINAL_ARTIST_NAME];
    header.extend(feature_names.iter().map(String::as_str));
    header.extend([FINAL_GENRE_IDS, FINAL_YEAR]);
    writer.write_record(&header)?;

    for song in songs {
        let mut row: Vec<String> = vec![
            song.song_id.to_string(),
            song.artist_id.to_string(),
            song.song_name.clone(),
            song.artist_name.clone(),
        ];
        row.extend(song.features.iter().map(f64::to_string));
        row.push(join_genre_ids(&song.genre_ids));
        row.push(song.year.map(|y| y.to_string()).unwrap_or_default());
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

pub fn join_genre_ids(ids: &[GenreId]) -> String {
    ids.iter()
        .map(GenreId::to_string)
        .collect::<Vec<_>>()
        .join(&GENRE_ID_SEPARATOR.to_string())
}

// ============================================================================
// Final Table
// ============================================================================

/// Read the joined song table strictly.
///
/// Returns the feature column names (header order) and the songs, each with
/// the line its record starts on. Any cell that does not parse fails the
/// whole read.
pub fn read_final_table(path: &Path) -> Result<(Vec<String>, Vec<(u64, ProcessedSong)>), RecommendError> {
    let unreadable = |source: csv::Error| RecommendError::Unreadable {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(unreadable)?;
    let headers = reader.headers().map_err(unreadable)?.clone();
    let columns = ColumnIndex::new(&headers);

    let fixed = |name: &str| {
        columns
            .find(&[name])
            .ok_or_else(|| RecommendError::malformed(1, format!("missing '{}' column", name)))
    };
    let song_id_col = fixed(FINAL_SONG_ID)?;
    let artist_id_col = fixed(FINAL_ARTIST_ID)?;
    let song_name_col = fixed(FINAL_SONG_NAME)?;
    let artist_name_col = fixed(FINAL_ARTIST_NAME)?;
    let genre_ids_col = fixed(FINAL_GENRE_IDS)?;
    let year_col = fixed(FINAL_YEAR)?;

    let (feature_cols, feature_names): (Vec<usize>, Vec<String>) = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| !FINAL_RESERVED.contains(&columns.names()[*idx].as_str()))
        .map(|(idx, name)| (idx, name.trim().to_string()))
        .unzip();

    let mut songs = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| {
            let line = e.position().map(|p| p.line()).unwrap_or(0);
            RecommendError::malformed(line, e.to_string())
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let parse_id = |idx: usize, what: &str| {
            cell(&record, idx)
                .parse::<u32>()
                .map_err(|_| RecommendError::malformed(line, format!("bad {} '{}'", what, cell(&record, idx))))
        };

        let features = feature_cols
            .iter()
            .zip(&feature_names)
            .map(|(&idx, name)| {
                parse_number(cell(&record, idx)).ok_or_else(|| {
                    RecommendError::malformed(line, format!("bad value '{}' in '{}'", cell(&record, idx), name))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;

        let genre_ids = cell(&record, genre_ids_col)
            .split(GENRE_ID_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<GenreId>()
                    .map_err(|_| RecommendError::malformed(line, format!("bad genre id '{}'", s)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let year_cell = cell(&record, year_col);
        let year = if year_cell.is_empty() {
            None
        } else {
            Some(
                year_cell
                    .parse::<i32>()
                    .map_err(|_| RecommendError::malformed(line, format!("bad year '{}'", year_cell)))?,
            )
        };

        songs.push((line, ProcessedSong {
            song_id: parse_id(song_id_col, FINAL_SONG_ID)?,
            artist_id: parse_id(artist_id_col, FINAL_ARTIST_ID)?,
            song_name: cell(&record, song_name_col).to_string(),
            artist_name: cell(&record, artist_name_col).to_string(),
            features,
            genre_ids,
            year,
        }));
    }

    Ok((feature_names, songs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 0.5 "), Some(0.5));
        assert_eq!(parse_number("-3"), Some(-3.0));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1999"), Some(1999));
        assert_eq!(parse_year("1999.0"), Some(1999));
        assert_eq!(parse_year("2001-05-01"), Some(2001));
        assert_eq!(parse_year("99"), None);
        assert_eq!(parse_year("12345"), None);
        assert_eq!(parse_year("unknown"), None);
    }

    #[test]
    fn test_column_index_aliases() {
        let headers = StringRecord::from(vec!["\u{feff}Artist_Name", " Track ", "energy"]);
        let columns = ColumnIndex::new(&headers);
        assert_eq!(columns.find(ARTIST_COLUMNS), Some(0));
        assert_eq!(columns.find(&["title", "track"]), Some(1));
        assert_eq!(columns.find(YEAR_COLUMNS), None);
        let err = columns.require(YEAR_COLUMNS, Path::new("songs.csv")).unwrap_err();
        assert!(err.to_string().contains("has no 'release_date'"));
    }

    #[test]
    fn test_read_song_table_coerces_bad_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.csv");
        fs::write(
            &path,
            "artist_name,track_name,release_date,energy,valence\n\
             A,One,1990,0.5,0.1\n\
             B,Two,soon,oops,0.2\n\
             ,Nameless,1990,0.1,0.1\n\
             C,Three,,,0.3\n",
        )
        .unwrap();

        let mut stats = PrepStats::default();
        let features = vec!["energy".to_string(), "valence".to_string()];
        let songs = read_song_table(&path, &features, &mut stats).unwrap();

        assert_eq!(songs.len(), 3);
        assert_eq!(stats.song_rows_read, 4);
        assert_eq!(stats.song_rows_skipped, 1);
        assert_eq!(stats.malformed_feature_cells, 1);
        assert_eq!(stats.malformed_years, 1);
        assert_eq!(songs[0].features, vec![Some(0.5), Some(0.1)]);
        assert_eq!(songs[1].features, vec![None, Some(0.2)]);
        assert_eq!(songs[1].year, None);
        assert_eq!(songs[2].features, vec![None, Some(0.3)]);
    }

    #[test]
    fn test_read_song_table_missing_feature_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("songs.csv");
        fs::write(&path, "artist_name,track_name\nA,One\n").unwrap();
        let mut stats = PrepStats::default();
        let err = read_song_table(&path, &["tempo".to_string()], &mut stats).unwrap_err();
        assert!(err.to_string().contains("'tempo'"));
    }

    #[test]
    fn test_read_missing_file_fails() {
        let mut stats = PrepStats::default();
        assert!(read_genre_table(Path::new("/nonexistent/genres.csv"), &mut stats).is_err());
        assert!(matches!(
            read_final_table(Path::new("/nonexistent/final.csv")),
            Err(RecommendError::Unreadable { .. })
        ));
    }

    #[test]
    fn test_final_table_written_and_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.csv");
        let songs = vec![
            ProcessedSong {
                song_id: 1,
                artist_id: 1,
                song_name: "One, Two".into(),
                artist_name: "A".into(),
                features: vec![0.25, -4.0],
                genre_ids: vec![1, 3],
                year: Some(1990),
            },
            ProcessedSong {
                song_id: 2,
                artist_id: 2,
                song_name: "Solo".into(),
                artist_name: "B".into(),
                features: vec![0.5, 1.0],
                genre_ids: vec![],
                year: None,
            },
        ];
        let names = vec!["energy".to_string(), "loudness".to_string()];
        write_final_table(&path, &names, &songs).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("song_id,artist_id,song_name,artist_name,energy,loudness,genre_ids,year\n"));
        assert!(text.contains("1,1,\"One, Two\",A,0.25,-4,1|3,1990\n"));
        assert!(text.contains("2,2,Solo,B,0.5,1,,\n"));

        let (read_names, read_rows) = read_final_table(&path).unwrap();
        assert_eq!(read_names, names);
        let lines: Vec<u64> = read_rows.iter().map(|(line, _)| *line).collect();
        assert_eq!(lines, vec![2, 3]);
        let read_songs: Vec<ProcessedSong> = read_rows.into_iter().map(|(_, song)| song).collect();
        assert_eq!(read_songs, songs);
    }

    #[test]
    fn test_final_table_rejects_bad_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("final.csv");
        fs::write(
            &path,
            "song_id,artist_id,song_name,artist_name,energy,genre_ids,year\n\
             1,1,One,A,0.5,1,1990\n\
             2,1,Two,A,loud,1,1991\n",
        )
        .unwrap();
        match read_final_table(&path) {
            Err(RecommendError::MalformedTable { line, reason }) => {
                assert_eq!(line, 3);
                assert!(reason.contains("energy"));
            }
            other => panic!("expected malformed table, got {:?}", other.map(|_| ())),
        }

        fs::write(&path, "song_id,song_name\n1,One\n").unwrap();
        assert!(matches!(
            read_final_table(&path),
            Err(RecommendError::MalformedTable { line: 1, .. })
        ));
    }

    #[test]
    fn test_write_records_keeps_header_when_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genres_with_ids.csv");
        let records: Vec<crate::models::GenreRecord> = Vec::new();
        write_records(&path, GENRE_HEADER, &records).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "genre_id,genre_name\n");
    }
}
