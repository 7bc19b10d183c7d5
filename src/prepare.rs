//! Preparation stage: raw song and genre tables → three derived tables.
//!
//! Phases:
//! 1. Read both raw tables
//! 2. Build the genre table (token → id, first-seen)
//! 3. Assign artist ids over the song table, then build the artist-genre mapping
//! 4. Collapse duplicate songs, assign song ids, join genres, fill feature gaps
//! 5. Write `genres_with_ids.csv`, `artist_genre_mapping.csv` and
//!    `final_processed_music_data.csv`
//!
//! Everything is recomputed from scratch on every run.

use anyhow::{bail, Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::genre::{build_artist_genre_mapping, build_genre_table, genre_records, ArtistGenreMap};
use crate::models::{GenreId, IdRegistry, FIRST_ID, PrepStats, ProcessedSong, RawSong};
use crate::normalize::identity_key;
use crate::progress::{create_spinner, finish_phase, format_duration};
use crate::safety::validate_output_path;
use crate::table::{
    read_genre_table, read_song_table, write_final_table, write_records, FINAL_RESERVED, GENRE_HEADER,
    MAPPING_HEADER,
};

pub const GENRES_FILE: &str = "genres_with_ids.csv";
pub const MAPPING_FILE: &str = "artist_genre_mapping.csv";
pub const FINAL_FILE: &str = "final_processed_music_data.csv";

/// Feature columns used when none are configured.
pub const DEFAULT_FEATURES: &[&str] = &[
    "danceability",
    "loudness",
    "acousticness",
    "instrumentalness",
    "valence",
    "energy",
];

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub songs_path: PathBuf,
    pub genres_path: PathBuf,
    pub out_dir: PathBuf,
    pub feature_names: Vec<String>,
}

impl PrepareConfig {
    pub fn new(songs_path: PathBuf, genres_path: PathBuf, out_dir: PathBuf) -> Self {
        Self {
            songs_path,
            genres_path,
            out_dir,
            feature_names: DEFAULT_FEATURES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn genres_output(&self) -> PathBuf {
        self.out_dir.join(GENRES_FILE)
    }

    pub fn mapping_output(&self) -> PathBuf {
        self.out_dir.join(MAPPING_FILE)
    }

    pub fn final_output(&self) -> PathBuf {
        self.out_dir.join(FINAL_FILE)
    }
}

// ============================================================================
// Genre Aggregates
// ============================================================================

/// Running (sum, count) per feature, per genre and over all songs.
/// Only cells that were present in the raw table contribute.
#[derive(Debug, Default)]
pub struct GenreAggregates {
    per_genre: FxHashMap<GenreId, Vec<(f64, usize)>>,
    global: Vec<(f64, usize)>,
}

impl GenreAggregates {
    pub fn collect<'a>(
        songs: impl Iterator<Item = (&'a [Option<f64>], &'a [GenreId])>,
        feature_count: usize,
    ) -> Self {
        let mut agg = Self {
            per_genre: FxHashMap::default(),
            global: vec![(0.0, 0); feature_count],
        };
        for (features, genres) in songs {
            for (idx, value) in features.iter().enumerate() {
                let Some(v) = value else { continue };
                agg.global[idx].0 += v;
                agg.global[idx].1 += 1;
                for genre in genres {
                    let slot = &mut agg
                        .per_genre
                        .entry(*genre)
                        .or_insert_with(|| vec![(0.0, 0); feature_count])[idx];
                    slot.0 += v;
                    slot.1 += 1;
                }
            }
        }
        agg
    }

    /// Mean of a feature within one genre.
    pub fn genre_mean(&self, genre: GenreId, feature: usize) -> Option<f64> {
        self.per_genre
            .get(&genre)
            .and_then(|sums| mean(sums[feature]))
    }

    /// Fill value for a missing cell: the average of the song's genre means,
    /// else the global mean, else 0.0.
    pub fn fill_value(&self, genres: &[GenreId], feature: usize) -> f64 {
        let means: Vec<f64> = genres
            .iter()
            .filter_map(|g| self.genre_mean(*g, feature))
            .collect();
        if !means.is_empty() {
            return means.iter().sum::<f64>() / means.len() as f64;
        }
        mean(self.global[feature]).unwrap_or(0.0)
    }
}

fn mean((sum, count): (f64, usize)) -> Option<f64> {
    (count > 0).then(|| sum / count as f64)
}

// ============================================================================
// Pipeline Steps
// ============================================================================

/// Register every song artist in first-seen order.
pub fn register_song_artists(songs: &[RawSong], artists: &mut IdRegistry) {
    for song in songs {
        artists.get_or_assign(&song.artist);
    }
}

/// Collapse repeated (track, artist) rows, assign song ids first-seen,
/// join genre ids and fill missing feature cells.
///
/// Artists must already be registered; unknown artists are registered here.
pub fn build_final_table(
    songs: Vec<RawSong>,
    artists: &mut IdRegistry,
    mapping: &ArtistGenreMap,
    feature_count: usize,
    stats: &mut PrepStats,
) -> Vec<ProcessedSong> {
    let mut seen: FxHashSet<(String, String)> = FxHashSet::default();
    let mut drafts: Vec<(RawSong, u32, Vec<GenreId>)> = Vec::with_capacity(songs.len());

    for song in songs {
        let key = (identity_key(&song.track), identity_key(&song.artist));
        if !seen.insert(key) {
            stats.duplicate_songs += 1;
            continue;
        }
        let (artist_id, _) = artists.get_or_assign(&song.artist);
        let genre_ids = mapping.genres_of(artist_id).to_vec();
        drafts.push((song, artist_id, genre_ids));
    }

    let aggregates = GenreAggregates::collect(
        drafts
            .iter()
            .map(|(s, _, g)| (s.features.as_slice(), g.as_slice())),
        feature_count,
    );

    drafts
        .into_iter()
        .enumerate()
        .map(|(idx, (song, artist_id, genre_ids))| {
            if genre_ids.is_empty() {
                stats.songs_without_genre += 1;
            }
            let features = (0..feature_count)
                .map(|f| match song.features.get(f).copied().flatten() {
                    Some(v) => v,
                    None => {
                        stats.filled_feature_cells += 1;
                        aggregates.fill_value(&genre_ids, f)
                    }
                })
                .collect();
            ProcessedSong {
                song_id: FIRST_ID + idx as u32,
                artist_id,
                song_name: song.track,
                artist_name: song.artist,
                features,
                genre_ids,
                year: song.year,
            }
        })
        .collect()
}

fn validate_feature_names(names: &[String]) -> Result<()> {
    if names.is_empty() {
        bail!("At least one feature column is required");
    }
    let mut seen = FxHashSet::default();
    for name in names {
        let lower = name.to_lowercase();
        if FINAL_RESERVED.contains(&lower.as_str()) {
            bail!("Feature column '{}' clashes with a fixed column of the final table", name);
        }
        if !seen.insert(lower) {
            bail!("Feature column '{}' is listed twice", name);
        }
    }
    Ok(())
}

fn validate_outputs(config: &PrepareConfig) -> Result<()> {
    let sources = [config.songs_path.as_path(), config.genres_path.as_path()];
    validate_output_path(&config.genres_output(), "genres_with_ids", &sources)?;
    validate_output_path(&config.mapping_output(), "artist_genre_mapping", &sources)?;
    validate_output_path(&config.final_output(), "final_processed", &sources)?;
    Ok(())
}

// ============================================================================
// Runner
// ============================================================================

/// Run the whole preparation stage. Nothing is written unless both input
/// tables were read successfully.
pub fn run(config: &PrepareConfig) -> Result<PrepStats> {
    let start = Instant::now();
    let mut stats = PrepStats::default();

    validate_feature_names(&config.feature_names)?;
    validate_outputs(config)?;

    let spinner = create_spinner("Phase 1: Reading raw tables");
    let raw_songs = read_song_table(&config.songs_path, &config.feature_names, &mut stats)?;
    let genre_rows = read_genre_table(&config.genres_path, &mut stats)?;
    finish_phase(
        &spinner,
        format!(
            "Phase 1: Read {} song rows ({} skipped), {} genre rows ({} skipped)",
            stats.song_rows_read, stats.song_rows_skipped, stats.genre_rows_read, stats.genre_rows_skipped
        ),
    );

    let spinner = create_spinner("Phase 2: Building genre tables");
    let genres = build_genre_table(&genre_rows);
    let mut artists = IdRegistry::new();
    register_song_artists(&raw_songs, &mut artists);
    let mapping = build_artist_genre_mapping(&genre_rows, &genres, &mut artists);
    finish_phase(
        &spinner,
        format!(
            "Phase 2: {} genres, {} artist-genre pairs",
            genres.len(),
            mapping.pair_count()
        ),
    );

    let spinner = create_spinner("Phase 3: Joining songs");
    let songs = build_final_table(
        raw_songs,
        &mut artists,
        &mapping,
        config.feature_names.len(),
        &mut stats,
    );
    finish_phase(
        &spinner,
        format!(
            "Phase 3: {} songs ({} duplicates collapsed, {} feature cells filled)",
            songs.len(),
            stats.duplicate_songs,
            stats.filled_feature_cells
        ),
    );

    let spinner = create_spinner("Phase 4: Writing output");
    write_outputs(config, &genres, &mapping, &songs)?;
    finish_phase(&spinner, format!("Phase 4: Wrote tables to {}", config.out_dir.display()));

    stats.songs = songs.len();
    stats.artists = artists.len();
    stats.genres = genres.len();
    stats.artist_genre_pairs = mapping.pair_count();
    stats.elapsed_seconds = start.elapsed().as_secs_f64();
    Ok(stats)
}

fn write_outputs(
    config: &PrepareConfig,
    genres: &IdRegistry,
    mapping: &ArtistGenreMap,
    songs: &[ProcessedSong],
) -> Result<()> {
    std::fs::create_dir_all(&config.out_dir)
        .with_context(|| format!("Failed to create output directory {}", config.out_dir.display()))?;
    write_records(&config.genres_output(), GENRE_HEADER, &genre_records(genres))?;
    write_records(&config.mapping_output(), MAPPING_HEADER, &mapping.records())?;
    write_final_table(&config.final_output(), &config.feature_names, songs)?;
    Ok(())
}

/// Human-readable run summary for stdout.
pub fn summary(stats: &PrepStats, out_dir: &Path) -> String {
    format!(
        "Preparation complete!\n  Songs: {} ({:.1}% of rows)\n  Artists: {}\n  Genres: {}\n  \
         Artist-genre pairs: {}\n  Songs without genre: {}\n  Output: {}\n  Elapsed: {}",
        stats.songs,
        stats.kept_rate(),
        stats.artists,
        stats.genres,
        stats.artist_genre_pairs,
        stats.songs_without_genre,
        out_dir.display(),
        format_duration(std::time::Duration::from_secs_f64(stats.elapsed_seconds)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RawGenreRow;
    use std::fs;

    fn raw(artist: &str, track: &str, features: Vec<Option<f64>>) -> RawSong {
        RawSong {
            artist: artist.to_string(),
            track: track.to_string(),
            features,
            year: Some(2000),
        }
    }

    #[test]
    fn test_fill_value_prefers_genre_mean() {
        let rows: Vec<(Vec<Option<f64>>, Vec<GenreId>)> = vec![
            (vec![Some(1.0)], vec![1]),
            (vec![Some(3.0)], vec![1]),
            (vec![Some(10.0)], vec![2]),
        ];
        let agg = GenreAggregates::collect(rows.iter().map(|(f, g)| (f.as_slice(), g.as_slice())), 1);
        assert_eq!(agg.genre_mean(1, 0), Some(2.0));
        assert_eq!(agg.fill_value(&[1], 0), 2.0);
        assert_eq!(agg.fill_value(&[1, 2], 0), 6.0);
        // No genre data → global mean
        assert!((agg.fill_value(&[], 0) - 14.0 / 3.0).abs() < 1e-12);
        assert!((agg.fill_value(&[7], 0) - 14.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_fill_value_without_any_data_is_zero() {
        let agg = GenreAggregates::collect(std::iter::empty(), 2);
        assert_eq!(agg.fill_value(&[1], 1), 0.0);
    }

    #[test]
    fn test_build_final_table_unique_ids_and_duplicates() {
        let genre_rows = vec![RawGenreRow {
            artist: "A".into(),
            genres: "pop".into(),
        }];
        let songs = vec![
            raw("A", "One", vec![Some(0.2)]),
            raw("B", "Two", vec![None]),
            raw("a ", "ONE", vec![Some(0.9)]),
            raw("A", "Three", vec![None]),
        ];
        let genres = build_genre_table(&genre_rows);
        let mut artists = IdRegistry::new();
        register_song_artists(&songs, &mut artists);
        let mapping = build_artist_genre_mapping(&genre_rows, &genres, &mut artists);
        let mut stats = PrepStats::default();
        let table = build_final_table(songs, &mut artists, &mapping, 1, &mut stats);

        let ids: Vec<_> = table.iter().map(|s| s.song_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(stats.duplicate_songs, 1);
        assert_eq!(table[0].song_name, "One");
        assert_eq!(table[0].genre_ids, vec![1]);
        assert_eq!(table[1].artist_id, 2);
        assert!(table[1].genre_ids.is_empty());
        assert_eq!(stats.songs_without_genre, 1);
        // "Three" is pop → pop mean over present cells is 0.2
        assert_eq!(table[2].features, vec![0.2]);
        // "Two" has no genre → global mean 0.2
        assert_eq!(table[1].features, vec![0.2]);
        assert_eq!(stats.filled_feature_cells, 2);
    }

    #[test]
    fn test_build_final_table_keeps_distinct_spellings() {
        let songs = vec![
            raw("A", "Rock & Roll", vec![Some(0.1)]),
            raw("A", "Rock and Roll", vec![Some(0.2)]),
            raw("A", "Résumé", vec![Some(0.3)]),
            raw("A", "Resume", vec![Some(0.4)]),
            raw("Beyoncé", "Halo", vec![Some(0.5)]),
            raw("Beyonce", "Halo", vec![Some(0.6)]),
            raw(" A", "rock  &  ROLL ", vec![Some(0.7)]),
        ];
        let mut artists = IdRegistry::new();
        register_song_artists(&songs, &mut artists);
        let mut stats = PrepStats::default();
        let table = build_final_table(songs, &mut artists, &ArtistGenreMap::default(), 1, &mut stats);

        let names: Vec<_> = table.iter().map(|s| s.song_name.as_str()).collect();
        assert_eq!(names, vec!["Rock & Roll", "Rock and Roll", "Résumé", "Resume", "Halo", "Halo"]);
        let ids: Vec<_> = table.iter().map(|s| s.song_id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(table[4].artist_id, 2);
        assert_eq!(table[5].artist_id, 3);
        assert_eq!(table[4].artist_name, "Beyoncé");
        assert_eq!(stats.duplicate_songs, 1);
        assert_eq!(artists.len(), 3);
    }

    #[test]
    fn test_validate_feature_names() {
        assert!(validate_feature_names(&["energy".into()]).is_ok());
        assert!(validate_feature_names(&[]).is_err());
        assert!(validate_feature_names(&["Year".into()]).is_err());
        assert!(validate_feature_names(&["energy".into(), "ENERGY".into()]).is_err());
    }

    fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
        let songs = dir.join("songs.csv");
        let genres = dir.join("genres.csv");
        fs::write(
            &songs,
            "artist_name,track_name,release_date,energy,valence\n\
             A,Alpha,1990,0.9,0.8\n\
             B,Beta,1991,0.1,bad\n\
             A,Gamma,1992,0.8,0.7\n\
             C,Delta,,0.5,0.5\n\
             A,Alpha,1990,0.9,0.8\n",
        )
        .unwrap();
        fs::write(
            &genres,
            "artist_name,genres\n\
             A,\"pop, pop rock\"\n\
             B,['rock']\n\
             D,jazz\n",
        )
        .unwrap();
        (songs, genres)
    }

    fn config(dir: &Path, out: &Path) -> PrepareConfig {
        let (songs, genres) = write_inputs(dir);
        let mut config = PrepareConfig::new(songs, genres, out.to_path_buf());
        config.feature_names = vec!["energy".into(), "valence".into()];
        config
    }

    #[test]
    fn test_run_writes_three_tables() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let config = config(dir.path(), &out);
        let stats = run(&config).unwrap();

        assert_eq!(stats.songs, 4);
        assert_eq!(stats.duplicate_songs, 1);
        assert_eq!(stats.genres, 4);
        assert_eq!(stats.artists, 4);
        assert_eq!(stats.artist_genre_pairs, 4);

        assert_eq!(
            fs::read_to_string(out.join(GENRES_FILE)).unwrap(),
            "genre_id,genre_name\n1,pop\n2,pop rock\n3,rock\n4,jazz\n"
        );
        // A=1, B=2, C=3 from songs; D=4 from the genre table only
        assert_eq!(
            fs::read_to_string(out.join(MAPPING_FILE)).unwrap(),
            "artist_id,genre_id\n1,1\n1,2\n2,3\n4,4\n"
        );
        let final_text = fs::read_to_string(out.join(FINAL_FILE)).unwrap();
        let lines: Vec<_> = final_text.lines().collect();
        assert_eq!(
            lines[0],
            "song_id,artist_id,song_name,artist_name,energy,valence,genre_ids,year"
        );
        assert_eq!(lines[1], "1,1,Alpha,A,0.9,0.8,1|2,1990");
        // Beta's valence falls back to the global mean of (0.8, 0.7, 0.5)
        assert!(lines[2].starts_with("2,2,Beta,B,0.1,0.66"));
        assert!(lines[2].ends_with(",3,1991"));
        assert_eq!(lines[4], "4,3,Delta,C,0.5,0.5,,");
        assert_eq!(lines.len(), 5);
    }

    #[test]
    fn test_run_keeps_raw_spellings_in_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let songs = dir.path().join("songs.csv");
        let genres = dir.path().join("genres.csv");
        fs::write(
            &songs,
            "artist_name,track_name,energy\n\
             A,Rock & Roll,0.1\n\
             A,Rock and Roll,0.2\n\
             A,Résumé,0.3\n\
             A,Resume,0.4\n",
        )
        .unwrap();
        fs::write(&genres, "artist_name,genres\nA,\"drum & bass, Música Popular, 流行\"\n").unwrap();
        let out = dir.path().join("out");
        let mut config = PrepareConfig::new(songs, genres, out.clone());
        config.feature_names = vec!["energy".into()];

        let stats = run(&config).unwrap();
        assert_eq!(stats.songs, 4);
        assert_eq!(stats.duplicate_songs, 0);
        assert_eq!(
            fs::read_to_string(out.join(GENRES_FILE)).unwrap(),
            "genre_id,genre_name\n1,drum & bass\n2,Música Popular\n3,流行\n"
        );
        let final_text = fs::read_to_string(out.join(FINAL_FILE)).unwrap();
        let names: Vec<_> = final_text
            .lines()
            .skip(1)
            .map(|line| line.split(',').nth(2).unwrap())
            .collect();
        assert_eq!(names, vec!["Rock & Roll", "Rock and Roll", "Résumé", "Resume"]);
    }

    #[test]
    fn test_run_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let out_a = dir.path().join("a");
        let out_b = dir.path().join("b");
        run(&config(dir.path(), &out_a)).unwrap();
        run(&config(dir.path(), &out_b)).unwrap();
        for file in [GENRES_FILE, MAPPING_FILE, FINAL_FILE] {
            assert_eq!(
                fs::read(out_a.join(file)).unwrap(),
                fs::read(out_b.join(file)).unwrap()
            );
        }
    }

    #[test]
    fn test_run_missing_input_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let config = PrepareConfig::new(dir.path().join("missing.csv"), dir.path().join("genres.csv"), out.clone());
        assert!(run(&config).is_err());
        assert!(!out.join(FINAL_FILE).exists());
    }

    #[test]
    fn test_run_refuses_to_overwrite_input() {
        let dir = tempfile::tempdir().unwrap();
        let (_, genres) = write_inputs(dir.path());
        let songs = dir.path().join(FINAL_FILE);
        fs::write(&songs, "artist_name,track_name,energy\nA,One,0.5\n").unwrap();
        let mut config = PrepareConfig::new(songs, genres, dir.path().to_path_buf());
        config.feature_names = vec!["energy".into()];
        let err = run(&config).unwrap_err();
        assert!(err.to_string().contains("cannot be the same as input"));
    }
}
