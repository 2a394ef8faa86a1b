use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::Parser;
use std::sync::Arc;
use std::time::Instant;

use chart_playlists::cache::MatchCache;
use chart_playlists::catalog::spotify::SpotifyCatalog;
use chart_playlists::config::{Args, PlaylistSettings, Settings, Task};
use chart_playlists::ingest::ChartIngestor;
use chart_playlists::models::{playlist_name_for_year, IngestStats};
use chart_playlists::normalize::Normalizer;
use chart_playlists::progress::{format_duration, set_log_only};
use chart_playlists::reconcile::PlaylistReconciler;
use chart_playlists::scrape::{HttpDocumentFetcher, Top40Scraper};
use chart_playlists::store::{ChartStore, SqliteChartStore};

fn init_logging(settings: &Settings) {
    let mut clog = colog::default_builder();
    clog.filter(None, settings.log_level);
    clog.init();
    set_log_only(settings.log_only);
}

fn run_ingest(store: &Arc<SqliteChartStore>, today: NaiveDate) -> Result<IngestStats> {
    let scraper = Top40Scraper::new();
    let fetcher = HttpDocumentFetcher::new();
    let stats = ChartIngestor::new(store.clone(), &scraper, &fetcher)
        .run(today)
        .context("Chart ingestion failed")?;
    stats.log_phase("ingest");
    if stats.weeks_failed > 0 {
        log::warn!("{} chart weeks failed, rerun to resume", stats.weeks_failed);
    }
    Ok(stats)
}

fn run_playlist(
    settings: &Settings,
    playlist: &PlaylistSettings,
    store: &Arc<SqliteChartStore>,
    today: NaiveDate,
) -> Result<()> {
    if playlist.skip_scrape {
        log::info!("Skipping chart ingestion");
    } else {
        run_ingest(store, today)?;
    }

    let songs = store.releases(playlist.year)?;
    if songs.is_empty() {
        log::warn!("No charted releases stored for {}, nothing to do", playlist.year);
        return Ok(());
    }
    log::info!("{} charted releases in {}", songs.len(), playlist.year);

    let cache = MatchCache::load(&settings.cache);
    let catalog = SpotifyCatalog::new(playlist.access_token.clone());
    let normalizer = Normalizer::default();
    let reconciler = PlaylistReconciler::new(&catalog, &cache, &normalizer, playlist.options);

    let outcome = reconciler.reconcile(&playlist_name_for_year(playlist.year), &songs);
    // Matches found before an abort are still worth keeping
    cache.flush()?;
    let stats = outcome?;

    stats.log_phase("reconcile");
    if let Some(path) = &playlist.stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
        log::info!("Stats written to {}", path.display());
    }

    println!("\n{:=<60}", "");
    println!("Playlist '{}' up to date", stats.playlist);
    println!("  Chart songs: {}", stats.chart_songs);
    println!("  Already present: {}", stats.already_present);
    println!("  Added: {}", stats.added);
    println!("  Unresolved: {} (resolve rate {:.1}%)", stats.unresolved, stats.resolve_rate());
    println!("{:=<60}", "");
    Ok(())
}

fn main() -> Result<()> {
    let today = Local::now().date_naive();
    let settings = Settings::from_args(Args::parse(), today)?;
    init_logging(&settings);

    let start = Instant::now();
    log::info!("Opening chart database: {}", settings.database.display());
    let store = Arc::new(SqliteChartStore::open(&settings.database)?);

    match &settings.task {
        Task::Scrape => {
            let stats = run_ingest(&store, today)?;
            println!(
                "Scraped {} chart weeks, {} entries written",
                stats.weeks_scraped, stats.entries_written
            );
        }
        Task::Playlist(playlist) => run_playlist(&settings, playlist, &store, today)?,
    }

    log::info!("Done in {}", format_duration(start.elapsed()));
    Ok(())
}
