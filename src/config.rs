//! Command-line arguments and the run settings resolved from them.

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::catalog::MAX_TRACKS_PER_ADD;
use crate::models::TOP40;
use crate::reconcile::{ReconcileOptions, DEFAULT_ADD_BATCH_SIZE, DEFAULT_WORKERS, MAX_WORKERS};
use crate::safety::validate_state_paths;

pub const DATA_DIR_NAME: &str = ".playlists";
pub const DATABASE_FILE: &str = "charts.sqlite3";
pub const CACHE_FILE: &str = "playlist-cache.json";

#[derive(Parser, Debug)]
#[command(name = "chart-playlists")]
#[command(about = "Keep yearly Spotify playlists in sync with the Dutch music charts")]
pub struct Args {
    /// Directory holding the chart database and the match cache
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    /// Hide progress bars, log periodic progress lines instead (for tail -f)
    #[arg(long, global = true)]
    pub log_only: bool,

    /// -v for debug, -vv for trace
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scrape chart weeks missing from the database
    Scrape,

    /// Bring the playlist of one year up to date
    Playlist {
        /// Chart year, defaults to the current year
        year: Option<u16>,

        /// Use the chart database as is
        #[arg(long)]
        skip_scrape: bool,

        #[arg(long, default_value_t = DEFAULT_WORKERS)]
        workers: usize,

        /// Track URIs per playlist add request
        #[arg(long, default_value_t = DEFAULT_ADD_BATCH_SIZE)]
        batch_size: usize,

        /// Write run statistics as JSON
        #[arg(long)]
        stats_json: Option<PathBuf>,

        #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
        access_token: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct PlaylistSettings {
    pub year: u16,
    pub skip_scrape: bool,
    pub options: ReconcileOptions,
    pub stats_json: Option<PathBuf>,
    pub access_token: String,
}

#[derive(Debug, Clone)]
pub enum Task {
    Scrape,
    Playlist(PlaylistSettings),
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database: PathBuf,
    pub cache: PathBuf,
    pub log_only: bool,
    pub log_level: log::LevelFilter,
    pub task: Task,
}

impl Settings {
    pub fn from_args(args: Args, today: NaiveDate) -> Result<Self> {
        let data_dir = match args.data_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Cannot determine the home directory, pass --data-dir")?
                .join(DATA_DIR_NAME),
        };
        let database = args.database.unwrap_or_else(|| data_dir.join(DATABASE_FILE));
        let cache = args.cache.unwrap_or_else(|| data_dir.join(CACHE_FILE));
        validate_state_paths(&cache, &database)?;

        let task = match args.command {
            Command::Scrape => Task::Scrape,
            Command::Playlist {
                year,
                skip_scrape,
                workers,
                batch_size,
                stats_json,
                access_token,
            } => {
                let current_year = today.year().clamp(0, u16::MAX as i32) as u16;
                let year = year.unwrap_or(current_year);
                if year < TOP40.year_started || year > current_year {
                    bail!(
                        "No charts for {}, pick a year from {} to {}",
                        year,
                        TOP40.year_started,
                        current_year
                    );
                }
                let access_token = match access_token {
                    Some(token) if !token.trim().is_empty() => token.trim().to_string(),
                    _ => bail!(
                        "A Spotify access token is required, \
                         pass --access-token or set SPOTIFY_ACCESS_TOKEN"
                    ),
                };
                Task::Playlist(PlaylistSettings {
                    year,
                    skip_scrape,
                    options: ReconcileOptions {
                        workers: workers.clamp(1, MAX_WORKERS),
                        batch_size: batch_size.clamp(1, MAX_TRACKS_PER_ADD),
                        ..ReconcileOptions::default()
                    },
                    stats_json,
                    access_token,
                })
            }
        };

        let log_level = match args.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        };

        Ok(Self {
            database,
            cache,
            log_only: args.log_only,
            log_level,
            task,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 8, 15).unwrap()
    }

    fn settings(argv: &[&str]) -> Result<Settings> {
        let mut full = vec!["chart-playlists", "--data-dir", "/data"];
        full.extend_from_slice(argv);
        Settings::from_args(Args::try_parse_from(full)?, today())
    }

    #[test]
    fn test_scrape_defaults() {
        let s = settings(&["scrape"]).unwrap();
        assert_eq!(s.database, PathBuf::from("/data/charts.sqlite3"));
        assert_eq!(s.cache, PathBuf::from("/data/playlist-cache.json"));
        assert_eq!(s.log_level, log::LevelFilter::Info);
        assert!(!s.log_only);
        assert!(matches!(s.task, Task::Scrape));
    }

    #[test]
    fn test_playlist_defaults_to_current_year() {
        let s = settings(&["playlist", "--access-token", "abc"]).unwrap();
        let Task::Playlist(p) = s.task else {
            panic!("expected playlist task");
        };
        assert_eq!(p.year, 2020);
        assert!(!p.skip_scrape);
        assert_eq!(p.options.workers, DEFAULT_WORKERS);
        assert_eq!(p.options.batch_size, DEFAULT_ADD_BATCH_SIZE);
        assert_eq!(p.access_token, "abc");
    }

    #[test]
    fn test_playlist_options_are_clamped() {
        let s = settings(&[
            "-vv",
            "playlist",
            "1999",
            "--skip-scrape",
            "--workers",
            "64",
            "--batch-size",
            "0",
            "--access-token",
            "abc",
        ])
        .unwrap();
        assert_eq!(s.log_level, log::LevelFilter::Trace);
        let Task::Playlist(p) = s.task else {
            panic!("expected playlist task");
        };
        assert_eq!(p.year, 1999);
        assert!(p.skip_scrape);
        assert_eq!(p.options.workers, MAX_WORKERS);
        assert_eq!(p.options.batch_size, 1);
    }

    #[test]
    fn test_year_out_of_range() {
        assert!(settings(&["playlist", "1950", "--access-token", "abc"]).is_err());
        assert!(settings(&["playlist", "2021", "--access-token", "abc"]).is_err());
    }

    #[test]
    fn test_blank_token_rejected() {
        let err = settings(&["playlist", "--access-token", "  "]).unwrap_err();
        assert!(err.to_string().contains("access token"));
    }

    #[test]
    fn test_cache_cannot_be_database() {
        let err = settings(&["--cache", "/data/charts.sqlite3", "scrape"]).unwrap_err();
        assert!(err.to_string().contains("cannot be the same"));
    }
}
