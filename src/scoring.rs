//! Similarity scoring between a seed track and candidate tracks.
//!
//! The score is a weighted sum of four criteria:
//! - Audio features: `1 / (1 + d)` where `d` is the Euclidean distance
//!   between z-score standardized feature vectors
//! - Genre overlap: shared genre count, penalized when set sizes differ
//! - Artist: fixed bonus when both tracks share the artist
//! - Release year: `1 / (1 + |Δyear|)`, zero when a year is missing
//!
//! Scores are seed-to-candidate; symmetry is not relied upon anywhere.

use serde::Deserialize;
use std::cmp::Ordering;

use crate::models::{ArtistId, GenreId, ProcessedSong, SongId};

// ============================================================================
// Weights
// ============================================================================

/// Playlist size when none is requested.
pub const DEFAULT_PLAYLIST_SIZE: usize = 100;

/// Bonus for a shared artist before weighting.
pub const SAME_ARTIST_BONUS: f64 = 0.5;

/// Penalty per genre present in the larger set but not shared.
pub const GENRE_MISMATCH_PENALTY: f64 = 0.5;

/// Weight of each criterion in the composite score.
/// Missing keys in a weights file keep their default.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Weights {
    pub feature: f64,
    pub genre: f64,
    pub artist: f64,
    pub time: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            feature: 5.0,
            genre: 6.0,
            artist: 3.0,
            time: 2.0,
        }
    }
}

impl Weights {
    pub fn from_json_file(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

// ============================================================================
// Feature Standardization
// ============================================================================

/// Per-column mean and population standard deviation.
#[derive(Debug, Clone)]
pub struct FeatureScaler {
    means: Vec<f64>,
    std_devs: Vec<f64>,
}

impl FeatureScaler {
    pub fn fit(songs: &[ProcessedSong], feature_count: usize) -> Self {
        let n = songs.len().max(1) as f64;
        let mut means = vec![0.0; feature_count];
        for song in songs {
            for (m, v) in means.iter_mut().zip(&song.features) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut std_devs = vec![0.0; feature_count];
        for song in songs {
            for ((s, v), m) in std_devs.iter_mut().zip(&song.features).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        std_devs.iter_mut().for_each(|s| *s = (*s / n).sqrt());

        Self { means, std_devs }
    }

    /// Z-scores of one feature vector. A constant column maps to 0.
    pub fn transform(&self, features: &[f64]) -> Vec<f64> {
        features
            .iter()
            .zip(self.means.iter().zip(&self.std_devs))
            .map(|(v, (m, s))| if *s > 0.0 { (v - m) / s } else { 0.0 })
            .collect()
    }
}

// ============================================================================
// Criteria
// ============================================================================

pub fn feature_similarity(a: &[f64], b: &[f64]) -> f64 {
    let distance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f64>()
        .sqrt();
    1.0 / (1.0 + distance)
}

/// Shared genre count; when the sets differ in size every genre of the
/// larger set that is not shared costs `GENRE_MISMATCH_PENALTY`.
pub fn genre_similarity(a: &[GenreId], b: &[GenreId]) -> f64 {
    let shared = a.iter().filter(|g| b.contains(g)).count();
    if a.len() == b.len() {
        shared as f64
    } else {
        let larger = a.len().max(b.len());
        shared as f64 - GENRE_MISMATCH_PENALTY * (larger - shared) as f64
    }
}

pub fn artist_similarity(a: ArtistId, b: ArtistId) -> f64 {
    if a == b {
        SAME_ARTIST_BONUS
    } else {
        0.0
    }
}

pub fn time_similarity(a: Option<i32>, b: Option<i32>) -> f64 {
    match (a, b) {
        (Some(x), Some(y)) => 1.0 / (1.0 + (x - y).abs() as f64),
        _ => 0.0,
    }
}

// ============================================================================
// Combined Scoring
// ============================================================================

/// Per-criterion similarities before weighting, and the weighted total.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityBreakdown {
    pub feature: f64,
    pub genre: f64,
    pub artist: f64,
    pub time: f64,
    pub composite: f64,
}

/// Scores any pair of tracks in a table. Feature vectors are standardized
/// once against the whole table.
#[derive(Debug, Clone)]
pub struct SimilarityModel {
    weights: Weights,
    scaled: Vec<Vec<f64>>,
}

impl SimilarityModel {
    pub fn new(songs: &[ProcessedSong], feature_count: usize, weights: Weights) -> Self {
        let scaler = FeatureScaler::fit(songs, feature_count);
        let scaled = songs.iter().map(|s| scaler.transform(&s.features)).collect();
        Self { weights, scaled }
    }

    /// Score candidate `cand` (index into the table) against seed `seed`.
    pub fn breakdown(&self, songs: &[ProcessedSong], seed: usize, cand: usize) -> SimilarityBreakdown {
        let (s, c) = (&songs[seed], &songs[cand]);
        let feature = feature_similarity(&self.scaled[seed], &self.scaled[cand]);
        let genre = genre_similarity(&s.genre_ids, &c.genre_ids);
        let artist = artist_similarity(s.artist_id, c.artist_id);
        let time = time_similarity(s.year, c.year);
        let w = &self.weights;
        SimilarityBreakdown {
            feature,
            genre,
            artist,
            time,
            composite: w.feature * feature + w.genre * genre + w.artist * artist + w.time * time,
        }
    }

    pub fn score(&self, songs: &[ProcessedSong], seed: usize, cand: usize) -> f64 {
        self.breakdown(songs, seed, cand).composite
    }
}

/// Ranking order: score descending, then song id ascending.
pub fn compare_ranked(a: (SongId, f64), b: (SongId, f64)) -> Ordering {
    b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn song(id: SongId, artist: ArtistId, features: Vec<f64>, genres: Vec<GenreId>, year: Option<i32>) -> ProcessedSong {
        ProcessedSong {
            song_id: id,
            artist_id: artist,
            song_name: format!("song {}", id),
            artist_name: format!("artist {}", artist),
            features,
            genre_ids: genres,
            year,
        }
    }

    #[test]
    fn test_genre_similarity() {
        assert_eq!(genre_similarity(&[1, 2], &[2, 1]), 2.0);
        assert_eq!(genre_similarity(&[1, 2], &[3, 4]), 0.0);
        // 1 shared, larger set has 3 → 1 - 0.5 * 2
        assert_eq!(genre_similarity(&[1], &[1, 2, 3]), 0.0);
        assert_eq!(genre_similarity(&[1, 2], &[1, 2, 3]), 1.5);
        assert_eq!(genre_similarity(&[], &[]), 0.0);
        assert_eq!(genre_similarity(&[], &[5]), -0.5);
    }

    #[test]
    fn test_time_and_artist_similarity() {
        assert_eq!(time_similarity(Some(2000), Some(2000)), 1.0);
        assert_eq!(time_similarity(Some(2000), Some(2003)), 0.25);
        assert_eq!(time_similarity(None, Some(2000)), 0.0);
        assert_eq!(artist_similarity(3, 3), SAME_ARTIST_BONUS);
        assert_eq!(artist_similarity(3, 4), 0.0);
    }

    #[test]
    fn test_feature_scaler_handles_constant_column() {
        let songs = vec![
            song(1, 1, vec![1.0, 7.0], vec![], None),
            song(2, 1, vec![3.0, 7.0], vec![], None),
        ];
        let scaler = FeatureScaler::fit(&songs, 2);
        assert_eq!(scaler.transform(&[1.0, 7.0]), vec![-1.0, 0.0]);
        assert_eq!(scaler.transform(&[3.0, 7.0]), vec![1.0, 0.0]);
    }

    #[test]
    fn test_feature_similarity_identical_is_one() {
        assert_eq!(feature_similarity(&[0.3, -1.0], &[0.3, -1.0]), 1.0);
        assert!((feature_similarity(&[0.0, 0.0], &[3.0, 4.0]) - 1.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_model_prefers_close_tracks() {
        let songs = vec![
            song(1, 1, vec![0.9, 0.8], vec![1], Some(2000)),
            song(2, 2, vec![0.85, 0.75], vec![1], Some(2001)),
            song(3, 3, vec![0.1, 0.2], vec![2], Some(1970)),
        ];
        let model = SimilarityModel::new(&songs, 2, Weights::default());
        let near = model.breakdown(&songs, 0, 1);
        let far = model.breakdown(&songs, 0, 2);
        assert!(near.composite > far.composite);
        assert_eq!(near.genre, 1.0);
        assert_eq!(far.genre, 0.0);
        assert_eq!(near.time, 0.5);
        assert_eq!(model.score(&songs, 0, 1), near.composite);
    }

    #[test]
    fn test_weights_partial_json() {
        let w: Weights = serde_json::from_str(r#"{"genre": 1.5}"#).unwrap();
        assert_eq!(w.genre, 1.5);
        assert_eq!(w.feature, Weights::default().feature);
    }

    #[test]
    fn test_compare_ranked_breaks_ties_by_id() {
        let mut ranked = vec![(5, 1.0), (2, 3.0), (3, 1.0), (1, 1.0)];
        ranked.sort_by(|a, b| compare_ranked(*a, *b));
        assert_eq!(ranked, vec![(2, 3.0), (1, 1.0), (3, 1.0), (5, 1.0)]);
    }
}
