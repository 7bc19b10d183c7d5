//! Generate a playlist of tracks similar to a seed track.
//!
//! Usage: recommend <final_processed_music_data.csv> [--track-id N]
//!
//! Without --track-id the seed is read from stdin.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Instant;

use songsim_playlist::models::SongId;
use songsim_playlist::progress::{create_spinner, finish_phase, format_duration, set_log_only};
use songsim_playlist::recommend::{
    generate_playlist, parse_track_id, write_playlist, FinalTable, PlaylistOptions, PlaylistStrategy,
};
use songsim_playlist::scoring::{Weights, DEFAULT_PLAYLIST_SIZE};

#[derive(Parser)]
#[command(name = "recommend")]
#[command(about = "Rank tracks by similarity to a seed track and write a playlist")]
struct Args {
    /// Joined song table written by the prepare stage
    table: PathBuf,

    /// Seed track id; prompted for when omitted
    #[arg(long)]
    track_id: Option<SongId>,

    /// Directory the playlist file is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Number of tracks in the playlist
    #[arg(long, default_value_t = DEFAULT_PLAYLIST_SIZE)]
    limit: usize,

    /// Maximum number of tracks per artist
    #[arg(long)]
    max_per_artist: Option<usize>,

    /// Leave out tracks by the seed's own artist
    #[arg(long)]
    exclude_seed_artist: bool,

    #[arg(long, value_enum, default_value_t = PlaylistStrategy::Ranked)]
    strategy: PlaylistStrategy,

    /// JSON file overriding the criterion weights (feature, genre, artist, time)
    #[arg(long)]
    weights: Option<PathBuf>,

    /// Hide progress spinners and print plain phase lines instead
    #[arg(long)]
    log_only: bool,
}

fn prompt_track_id(table: &FinalTable) -> Result<SongId> {
    let (min, max) = table.id_range();
    print!("Enter the starting track ID (between {} and {}): ", min, max);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin()
        .lock()
        .read_line(&mut line)
        .context("Failed to read track id from stdin")?;
    Ok(parse_track_id(&line)?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);
    let start = Instant::now();

    let weights = match &args.weights {
        Some(path) => Weights::from_json_file(path)
            .with_context(|| format!("Failed to load weights from {:?}", path))?,
        None => Weights::default(),
    };

    let spinner = create_spinner("Loading final table");
    let table = FinalTable::load(&args.table)
        .with_context(|| format!("Cannot use {:?}", args.table))?;
    finish_phase(
        &spinner,
        format!(
            "Loaded {} tracks with {} features",
            table.len(),
            table.feature_names().len()
        ),
    );

    let seed_id = match args.track_id {
        Some(id) => id,
        None => prompt_track_id(&table)?,
    };

    let options = PlaylistOptions {
        limit: args.limit,
        max_per_artist: args.max_per_artist,
        exclude_seed_artist: args.exclude_seed_artist,
        strategy: args.strategy,
        weights,
    };

    let spinner = create_spinner("Scoring candidates");
    let playlist = generate_playlist(&table, seed_id, &options)?;
    finish_phase(&spinner, format!("Selected {} tracks", playlist.entries.len()));

    let path = write_playlist(&playlist, &args.out_dir, &[args.table.as_path()])?;

    println!("\n{:=<60}", "");
    println!(
        "Playlist generated from: [{}] {} - {}",
        playlist.seed.song_id, playlist.seed.artist_name, playlist.seed.song_name
    );
    println!("  Tracks: {}", playlist.entries.len());
    println!("  Output: {}", path.display());
    println!("  Elapsed: {}", format_duration(start.elapsed()));
    println!("{:=<60}", "");

    Ok(())
}
