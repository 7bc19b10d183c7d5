//! Core data models for the playlist pipeline.
//!
//! This module contains the records read from the raw tables, the derived
//! records written by the preparation stage, the id registry used to hand
//! out stable identifiers and the preparation statistics.

use rustc_hash::FxHashMap;
use serde::{Serialize, Serializer};

use crate::normalize::identity_key;

// ============================================================================
// Type Aliases
// ============================================================================

pub type SongId = u32;
pub type ArtistId = u32;
pub type GenreId = u32;

/// First identifier handed out by every registry.
pub const FIRST_ID: u32 = 1;

// ============================================================================
// Id Registry
// ============================================================================

/// Assigns sequential identifiers to names in first-seen order.
///
/// Names are matched on their `identity_key`, so "Pop" and " pop " share an
/// id. The label kept for an id is the first spelling seen, trimmed. Ids are
/// dense: the n-th distinct key gets `FIRST_ID + n`.
#[derive(Debug, Clone)]
pub struct IdRegistry {
    ids: FxHashMap<String, u32>,
    labels: Vec<String>,
}

impl IdRegistry {
    pub fn new() -> Self {
        Self {
            ids: FxHashMap::default(),
            labels: Vec::new(),
        }
    }

    /// Return the id for `name`, assigning the next one if its key is new.
    /// The boolean is true when a new id was assigned.
    pub fn get_or_assign(&mut self, name: &str) -> (u32, bool) {
        let key = identity_key(name);
        if let Some(&id) = self.ids.get(&key) {
            return (id, false);
        }
        let id = FIRST_ID + self.labels.len() as u32;
        self.ids.insert(key, id);
        self.labels.push(name.trim().to_string());
        (id, true)
    }

    pub fn get(&self, name: &str) -> Option<u32> {
        self.ids.get(&identity_key(name)).copied()
    }

    /// Iterate `(id, label)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &str)> {
        self.labels
            .iter()
            .enumerate()
            .map(|(i, label)| (FIRST_ID + i as u32, label.as_str()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

impl Default for IdRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Raw Input Models
// ============================================================================

/// Song row from the raw song table, before identifiers are assigned.
/// Feature cells that were missing or malformed are `None`.
#[derive(Clone, Debug, PartialEq)]
pub struct RawSong {
    pub artist: String,
    pub track: String,
    pub features: Vec<Option<f64>>,
    pub year: Option<i32>,
}

/// Row from the raw genre table: one artist and its free-text genre list.
#[derive(Clone, Debug, PartialEq)]
pub struct RawGenreRow {
    pub artist: String,
    pub genres: String,
}

// ============================================================================
// Derived Tables
// ============================================================================

/// Row of `genres_with_ids.csv`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GenreRecord {
    pub genre_id: GenreId,
    pub genre_name: String,
}

/// Row of `artist_genre_mapping.csv`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ArtistGenreRecord {
    pub artist_id: ArtistId,
    pub genre_id: GenreId,
}

/// Row of `final_processed_music_data.csv`.
///
/// `features` is aligned with the feature column names of the table it
/// belongs to; every cell is filled during preparation.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedSong {
    pub song_id: SongId,
    pub artist_id: ArtistId,
    pub song_name: String,
    pub artist_name: String,
    pub features: Vec<f64>,
    pub genre_ids: Vec<GenreId>,
    pub year: Option<i32>,
}

// ============================================================================
// Output Models
// ============================================================================

/// Row of a generated playlist file.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlaylistEntry {
    pub song_id: SongId,
    pub song_name: String,
    pub artist_name: String,
    #[serde(serialize_with = "serialize_score")]
    pub similarity_score: f64,
}

/// Scores are written with a fixed precision so reruns are byte-identical.
pub fn format_score(score: f64) -> String {
    let formatted = format!("{:.6}", score);
    if formatted == "-0.000000" {
        "0.000000".to_string()
    } else {
        formatted
    }
}

fn serialize_score<S: Serializer>(score: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_score(*score))
}

// ============================================================================
// Statistics
// ============================================================================

/// Counters collected by one preparation run.
#[derive(Default, Debug, Clone, Serialize)]
pub struct PrepStats {
    // Input
    pub song_rows_read: usize,
    pub song_rows_skipped: usize,
    pub duplicate_songs: usize,
    pub genre_rows_read: usize,
    pub genre_rows_skipped: usize,

    // Cell coercion
    pub malformed_feature_cells: usize,
    pub filled_feature_cells: usize,
    pub malformed_years: usize,

    // Output
    pub songs: usize,
    pub artists: usize,
    pub genres: usize,
    pub artist_genre_pairs: usize,
    pub songs_without_genre: usize,

    pub elapsed_seconds: f64,
}

impl PrepStats {
    /// Share of raw song rows that made it into the final table, in percent.
    pub fn kept_rate(&self) -> f64 {
        if self.song_rows_read == 0 {
            0.0
        } else {
            100.0 * self.songs as f64 / self.song_rows_read as f64
        }
    }

    /// Write stats to a JSON file
    pub fn write_to_file(&self, path: &std::path::Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
