//! Genre tokenization and the genre / artist-genre tables.
//!
//! The raw genre table carries one free-text genre list per artist. The list
//! is split into tokens, every distinct token gets an id (first-seen order
//! over the whole table) and each artist is mapped onto the ids of its tokens.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::models::{ArtistGenreRecord, ArtistId, GenreId, GenreRecord, IdRegistry, RawGenreRow};
use crate::normalize::identity_key;

/// Separators accepted between genres in a free-text list.
static GENRE_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[,;|]").unwrap());

/// List-literal decoration stripped from token edges: `['pop', "rock"]`.
const TOKEN_DECORATION: [char; 4] = ['[', ']', '\'', '"'];

/// Split a free-text genre field into trimmed, deduplicated tokens.
///
/// Accepts `pop, pop rock`, `pop; rock`, `pop | rock` and list literals such
/// as `['pop', 'pop rock']`. Tokens keep their raw spelling; two tokens with
/// the same `identity_key` count once, first appearance wins.
pub fn parse_genre_tokens(raw: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    let mut keys: Vec<String> = Vec::new();
    for piece in GENRE_SEPARATOR.split(raw) {
        let token = piece.trim_matches(|c: char| c.is_whitespace() || TOKEN_DECORATION.contains(&c));
        let key = identity_key(token);
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
            tokens.push(token.to_string());
        }
    }
    tokens
}

/// Assign ids to every distinct genre token in the table, first-seen order.
pub fn build_genre_table(rows: &[RawGenreRow]) -> IdRegistry {
    let mut genres = IdRegistry::new();
    for row in rows {
        for token in parse_genre_tokens(&row.genres) {
            genres.get_or_assign(&token);
        }
    }
    genres
}

/// Records for `genres_with_ids.csv`, in id order.
pub fn genre_records(genres: &IdRegistry) -> Vec<GenreRecord> {
    genres
        .iter()
        .map(|(genre_id, name)| GenreRecord {
            genre_id,
            genre_name: name.to_string(),
        })
        .collect()
}

/// Artist → genre ids, ordered by artist id.
#[derive(Debug, Clone, Default)]
pub struct ArtistGenreMap {
    by_artist: BTreeMap<ArtistId, Vec<GenreId>>,
}

impl ArtistGenreMap {
    /// Genre ids of an artist; empty when the artist has no genre data.
    pub fn genres_of(&self, artist_id: ArtistId) -> &[GenreId] {
        self.by_artist
            .get(&artist_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn insert(&mut self, artist_id: ArtistId, genre_id: GenreId) {
        let ids = self.by_artist.entry(artist_id).or_default();
        if !ids.contains(&genre_id) {
            ids.push(genre_id);
        }
    }

    /// One record per (artist, genre) pair, artist id ascending.
    pub fn records(&self) -> Vec<ArtistGenreRecord> {
        self.by_artist
            .iter()
            .flat_map(|(&artist_id, genres)| {
                genres
                    .iter()
                    .map(move |&genre_id| ArtistGenreRecord { artist_id, genre_id })
            })
            .collect()
    }

    pub fn pair_count(&self) -> usize {
        self.by_artist.values().map(Vec::len).sum()
    }
}

/// Re-scan the genre table and replace each artist's tokens with genre ids.
///
/// Artists already present in `artists` keep their id; artists seen only in
/// the genre table get the next free ids. An artist listed on several rows
/// gets the union of its genres.
pub fn build_artist_genre_mapping(
    rows: &[RawGenreRow],
    genres: &IdRegistry,
    artists: &mut IdRegistry,
) -> ArtistGenreMap {
    let mut map = ArtistGenreMap::default();
    for row in rows {
        let tokens = parse_genre_tokens(&row.genres);
        if identity_key(&row.artist).is_empty() || tokens.is_empty() {
            continue;
        }
        let (artist_id, _) = artists.get_or_assign(&row.artist);
        for token in tokens {
            // Every token was registered by build_genre_table over the same rows.
            if let Some(genre_id) = genres.get(&token) {
                map.insert(artist_id, genre_id);
            }
        }
    }
    map
}
