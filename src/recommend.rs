//! Recommendation stage: rank every track of the final table against a seed
//! track and write the best matches as a playlist file.
//!
//! Two strategies are supported:
//! - `Ranked`: one ranking against the seed, top N taken
//! - `Chained`: top `CHAIN_HOP_SIZE` picks per hop, each hop re-seeded from
//!   the last pick of the previous one
//!
//! The seed itself never appears in its playlist, and a song id appears at
//! most once.

use anyhow::{Context, Result};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};

use crate::error::RecommendError;
use crate::models::{ArtistId, PlaylistEntry, ProcessedSong, SongId};
use crate::normalize::sanitize_file_stem;
use crate::safety::validate_output_path;
use crate::scoring::{compare_ranked, SimilarityModel, Weights, DEFAULT_PLAYLIST_SIZE};
use crate::table::{read_final_table, write_records, PLAYLIST_HEADER};

/// Prefix of every generated playlist file name.
pub const PLAYLIST_PREFIX: &str = "generated_playlist_from_";

/// Picks taken per hop by the chained strategy.
pub const CHAIN_HOP_SIZE: usize = 3;

// ============================================================================
// Final Table
// ============================================================================

/// The joined song table, validated and indexed by song id.
#[derive(Debug, Clone)]
pub struct FinalTable {
    feature_names: Vec<String>,
    songs: Vec<ProcessedSong>,
    index: FxHashMap<SongId, usize>,
}

impl FinalTable {
    /// Build a table from in-memory songs, numbered as `write_final_table`
    /// would lay them out (header on line 1, one line per song).
    pub fn new(feature_names: Vec<String>, songs: Vec<ProcessedSong>) -> Result<Self, RecommendError> {
        let rows = songs
            .into_iter()
            .enumerate()
            .map(|(idx, song)| (idx as u64 + 2, song));
        Self::from_rows(feature_names, rows)
    }

    /// Build a table from `(line, song)` rows, rejecting empty input,
    /// duplicate song ids and rows whose feature count does not match the
    /// header. Errors name the line the offending row starts on.
    pub fn from_rows(
        feature_names: Vec<String>,
        rows: impl IntoIterator<Item = (u64, ProcessedSong)>,
    ) -> Result<Self, RecommendError> {
        let mut songs = Vec::new();
        let mut index = FxHashMap::default();
        for (line, song) in rows {
            if song.features.len() != feature_names.len() {
                return Err(RecommendError::malformed(
                    line,
                    format!(
                        "expected {} feature values, found {}",
                        feature_names.len(),
                        song.features.len()
                    ),
                ));
            }
            if index.insert(song.song_id, songs.len()).is_some() {
                return Err(RecommendError::malformed(
                    line,
                    format!("duplicate song_id {}", song.song_id),
                ));
            }
            songs.push(song);
        }
        if songs.is_empty() {
            return Err(RecommendError::EmptyTable);
        }
        Ok(Self {
            feature_names,
            songs,
            index,
        })
    }

    pub fn load(path: &Path) -> Result<Self, RecommendError> {
        let (feature_names, rows) = read_final_table(path)?;
        Self::from_rows(feature_names, rows)
    }

    pub fn songs(&self) -> &[ProcessedSong] {
        &self.songs
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn position(&self, song_id: SongId) -> Option<usize> {
        self.index.get(&song_id).copied()
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }

    /// Smallest and largest song id, for the interactive prompt.
    pub fn id_range(&self) -> (SongId, SongId) {
        let min = self.songs.iter().map(|s| s.song_id).min().unwrap_or(0);
        let max = self.songs.iter().map(|s| s.song_id).max().unwrap_or(0);
        (min, max)
    }
}

// ============================================================================
// Options
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum PlaylistStrategy {
    #[default]
    Ranked,
    Chained,
}

#[derive(Debug, Clone)]
pub struct PlaylistOptions {
    pub limit: usize,
    pub max_per_artist: Option<usize>,
    pub exclude_seed_artist: bool,
    pub strategy: PlaylistStrategy,
    pub weights: Weights,
}

impl Default for PlaylistOptions {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PLAYLIST_SIZE,
            max_per_artist: None,
            exclude_seed_artist: false,
            strategy: PlaylistStrategy::Ranked,
            weights: Weights::default(),
        }
    }
}

/// Per-artist admission rules applied while filling a playlist.
struct ArtistFilter {
    seed_artist: Option<ArtistId>,
    max_per_artist: Option<usize>,
    counts: FxHashMap<ArtistId, usize>,
}

impl ArtistFilter {
    fn new(seed: &ProcessedSong, options: &PlaylistOptions) -> Self {
        Self {
            seed_artist: options.exclude_seed_artist.then_some(seed.artist_id),
            max_per_artist: options.max_per_artist,
            counts: FxHashMap::default(),
        }
    }

    /// Admit a candidate and count it against its artist.
    fn admit(&mut self, song: &ProcessedSong) -> bool {
        if self.seed_artist == Some(song.artist_id) {
            return false;
        }
        let count = self.counts.entry(song.artist_id).or_insert(0);
        if self.max_per_artist.is_some_and(|max| *count >= max) {
            return false;
        }
        *count += 1;
        true
    }
}

// ============================================================================
// Ranking
// ============================================================================

/// Score every track not in `used` against the seed at `seed_idx`.
/// Returns `(table index, score)` in ranking order.
pub fn rank_candidates(
    table: &FinalTable,
    model: &SimilarityModel,
    seed_idx: usize,
    used: &FxHashSet<SongId>,
) -> Vec<(usize, f64)> {
    let songs = table.songs();
    let mut ranked: Vec<(usize, f64)> = songs
        .iter()
        .enumerate()
        .filter(|(idx, song)| *idx != seed_idx && !used.contains(&song.song_id))
        .map(|(idx, _)| (idx, model.score(songs, seed_idx, idx)))
        .collect();
    ranked.sort_by(|a, b| compare_ranked((songs[a.0].song_id, a.1), (songs[b.0].song_id, b.1)));
    ranked
}

fn entry(song: &ProcessedSong, score: f64) -> PlaylistEntry {
    PlaylistEntry {
        song_id: song.song_id,
        song_name: song.song_name.clone(),
        artist_name: song.artist_name.clone(),
        similarity_score: score,
    }
}

fn ranked_playlist(
    table: &FinalTable,
    model: &SimilarityModel,
    seed_idx: usize,
    options: &PlaylistOptions,
    filter: &mut ArtistFilter,
) -> Vec<PlaylistEntry> {
    let songs = table.songs();
    let used: FxHashSet<SongId> = [songs[seed_idx].song_id].into_iter().collect();
    rank_candidates(table, model, seed_idx, &used)
        .into_iter()
        .filter(|(idx, _)| filter.admit(&songs[*idx]))
        .take(options.limit)
        .map(|(idx, score)| entry(&songs[idx], score))
        .collect()
}

fn chained_playlist(
    table: &FinalTable,
    model: &SimilarityModel,
    seed_idx: usize,
    options: &PlaylistOptions,
    filter: &mut ArtistFilter,
) -> Vec<PlaylistEntry> {
    let songs = table.songs();
    let mut used: FxHashSet<SongId> = FxHashSet::default();
    used.insert(songs[seed_idx].song_id);

    let mut entries = Vec::new();
    let mut current = seed_idx;
    while entries.len() < options.limit {
        let room = CHAIN_HOP_SIZE.min(options.limit - entries.len());
        let picks: Vec<(usize, f64)> = rank_candidates(table, model, current, &used)
            .into_iter()
            .filter(|(idx, _)| filter.admit(&songs[*idx]))
            .take(room)
            .collect();

        let Some(&(last, _)) = picks.last() else {
            break;
        };
        for (idx, score) in picks {
            used.insert(songs[idx].song_id);
            entries.push(entry(&songs[idx], score));
        }
        current = last;
    }
    entries
}

// ============================================================================
// Playlist
// ============================================================================

#[derive(Debug, Clone)]
pub struct Playlist {
    pub seed: ProcessedSong,
    pub entries: Vec<PlaylistEntry>,
}

impl Playlist {
    /// `generated_playlist_from_<song name>.csv`, falling back to the track
    /// id when the name has no usable characters.
    pub fn file_name(&self) -> String {
        let stem = sanitize_file_stem(&self.seed.song_name);
        if stem.is_empty() {
            format!("{}track_{}.csv", PLAYLIST_PREFIX, self.seed.song_id)
        } else {
            format!("{}{}.csv", PLAYLIST_PREFIX, stem)
        }
    }
}

/// Build the playlist for `seed_id`. Fails if the seed is not in the table.
pub fn generate_playlist(
    table: &FinalTable,
    seed_id: SongId,
    options: &PlaylistOptions,
) -> Result<Playlist, RecommendError> {
    let seed_idx = table
        .position(seed_id)
        .ok_or(RecommendError::TrackNotFound(seed_id))?;
    let seed = &table.songs()[seed_idx];

    let model = SimilarityModel::new(table.songs(), table.feature_names().len(), options.weights);
    let mut filter = ArtistFilter::new(seed, options);
    let entries = match options.strategy {
        PlaylistStrategy::Ranked => ranked_playlist(table, &model, seed_idx, options, &mut filter),
        PlaylistStrategy::Chained => chained_playlist(table, &model, seed_idx, options, &mut filter),
    };

    Ok(Playlist {
        seed: seed.clone(),
        entries,
    })
}

/// Write a playlist into `out_dir`, refusing to overwrite any of `sources`.
pub fn write_playlist(playlist: &Playlist, out_dir: &Path, sources: &[&Path]) -> Result<PathBuf> {
    let path = out_dir.join(playlist.file_name());
    validate_output_path(&path, PLAYLIST_PREFIX, sources)?;
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {}", out_dir.display()))?;
    write_records(&path, PLAYLIST_HEADER, &playlist.entries)?;
    Ok(path)
}

/// Parse a track id typed by the user.
pub fn parse_track_id(input: &str) -> Result<SongId, RecommendError> {
    let trimmed = input.trim();
    match trimmed.parse::<SongId>() {
        Ok(id) if id > 0 => Ok(id),
        _ => Err(RecommendError::InvalidTrackId(trimmed.to_string())),
    }
}
