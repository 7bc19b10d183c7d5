//! Preparation stage: build the genre, artist-genre and joined song tables.
//!
//! Usage: prepare <songs.csv> <genres.csv> [--out-dir DIR] [--features a,b,c]

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use songsim_playlist::prepare::{self, PrepareConfig};
use songsim_playlist::progress::set_log_only;

#[derive(Parser)]
#[command(name = "prepare")]
#[command(about = "Build genre, artist-genre and joined song tables from raw CSV data")]
struct Args {
    /// Raw song table (artist, track, numeric features, release year)
    songs: PathBuf,

    /// Raw genre table (artist, free-text genre list)
    genres: PathBuf,

    /// Directory the three derived tables are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Numeric feature columns to carry into the final table (comma-separated)
    #[arg(long, value_delimiter = ',')]
    features: Option<Vec<String>>,

    /// Write run statistics as JSON to this file
    #[arg(long)]
    stats: Option<PathBuf>,

    /// Hide progress spinners and print plain phase lines instead
    #[arg(long)]
    log_only: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    set_log_only(args.log_only);

    let mut config = PrepareConfig::new(args.songs, args.genres, args.out_dir);
    if let Some(features) = args.features {
        config.feature_names = features
            .into_iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
    }

    println!("Songs: {:?}", config.songs_path);
    println!("Genres: {:?}", config.genres_path);
    println!("Features: {}", config.feature_names.join(", "));

    let stats = prepare::run(&config)?;

    println!("\n{:=<60}", "");
    println!("{}", prepare::summary(&stats, &config.out_dir));
    println!("{:=<60}", "");

    if let Some(path) = args.stats {
        stats.write_to_file(&path)?;
        println!("Stats written to {:?}", path);
    }

    Ok(())
}
