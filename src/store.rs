//! Chart entry storage.
//!
//! SQLite-backed store for scraped chart entries plus a background writer
//! that batches upserts into transactions.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::FxHashSet;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::models::{ChartEntry, Song};

/// Entries buffered before the writer flushes
pub const FLUSH_SIZE: usize = 500;

/// Time after which buffered entries are flushed regardless of count
pub const FLUSH_INTERVAL: Duration = Duration::from_secs(2);

// ============================================================================
// Store Contract
// ============================================================================

pub trait ChartStore: Send + Sync {
    /// Create the schema when missing. Returns true when it was created.
    fn setup_store_if_needed(&self) -> Result<bool>;

    fn upsert(&self, entry: &ChartEntry) -> Result<()>;

    fn upsert_batch(&self, entries: &[ChartEntry]) -> Result<()> {
        for entry in entries {
            self.upsert(entry)?;
        }
        Ok(())
    }

    /// Songs that were new on any chart in `year`, each once, in order of
    /// first appearance (week, then position).
    fn releases(&self, year: u16) -> Result<Vec<Song>>;

    fn highest_year_stored(&self, chart_name: &str) -> Result<Option<u16>>;

    fn highest_week_stored(&self, chart_name: &str, year: u16) -> Result<Option<u8>>;
}

// ============================================================================
// SQLite Store
// ============================================================================

pub struct SqliteChartStore {
    conn: Mutex<Connection>,
}

const UPSERT_SQL: &str = "INSERT INTO chart_entries
        (chart_name, year, week_number, position, is_new_release, artist, title)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(chart_name, year, week_number, position) DO UPDATE SET
        is_new_release = excluded.is_new_release,
        artist = excluded.artist,
        title = excluded.title";

impl SqliteChartStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open chart database {}", path.display()))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert_entry(conn: &Connection, entry: &ChartEntry) -> Result<()> {
    let mut stmt = conn.prepare_cached(UPSERT_SQL)?;
    stmt.execute(params![
        entry.chart_name,
        entry.year,
        entry.week_number,
        entry.position,
        entry.is_new_release,
        entry.song.artist,
        entry.song.title,
    ])?;
    Ok(())
}

impl ChartStore for SqliteChartStore {
    fn setup_store_if_needed(&self) -> Result<bool> {
        let conn = self.conn();
        let exists: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'chart_entries'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Ok(false);
        }

        conn.execute_batch(
            "CREATE TABLE chart_entries (
                chart_name TEXT NOT NULL,
                year INTEGER NOT NULL,
                week_number INTEGER NOT NULL,
                position INTEGER NOT NULL,
                is_new_release INTEGER NOT NULL,
                artist TEXT NOT NULL,
                title TEXT NOT NULL,
                PRIMARY KEY (chart_name, year, week_number, position)
            );

            CREATE INDEX idx_chart_entries_releases ON chart_entries(year, is_new_release);",
        )
        .context("Failed to create chart_entries table")?;
        Ok(true)
    }

    fn upsert(&self, entry: &ChartEntry) -> Result<()> {
        insert_entry(&self.conn(), entry)
    }

    fn upsert_batch(&self, entries: &[ChartEntry]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for entry in entries {
            insert_entry(&tx, entry)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn releases(&self, year: u16) -> Result<Vec<Song>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT artist, title, MIN(week_number * 256 + position) AS first_seen
             FROM chart_entries
             WHERE year = ?1 AND is_new_release = 1
             GROUP BY artist, title
             ORDER BY first_seen, artist, title",
        )?;
        let mut rows = stmt.query([year])?;

        let mut songs = Vec::new();
        while let Some(row) = rows.next()? {
            songs.push(Song::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?));
        }
        Ok(songs)
    }

    fn highest_year_stored(&self, chart_name: &str) -> Result<Option<u16>> {
        let year: Option<u16> = self.conn().query_row(
            "SELECT MAX(year) FROM chart_entries WHERE chart_name = ?1",
            [chart_name],
            |row| row.get(0),
        )?;
        Ok(year)
    }

    fn highest_week_stored(&self, chart_name: &str, year: u16) -> Result<Option<u8>> {
        let week: Option<u8> = self.conn().query_row(
            "SELECT MAX(week_number) FROM chart_entries WHERE chart_name = ?1 AND year = ?2",
            params![chart_name, year],
            |row| row.get(0),
        )?;
        Ok(week)
    }
}

// ============================================================================
// Bulk Writer
// ============================================================================

/// One weekly edition of one chart.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChartWeek {
    pub chart_name: String,
    pub year: u16,
    pub week_number: u8,
}

impl ChartWeek {
    pub fn of(entry: &ChartEntry) -> Self {
        Self {
            chart_name: entry.chart_name.clone(),
            year: entry.year,
            week_number: entry.week_number,
        }
    }
}

/// What the writer managed to store over its lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: usize,
    /// Weeks with entries that were not stored
    pub failed_weeks: BTreeSet<ChartWeek>,
}

/// Buffers entries on a background thread and writes them in batches, when
/// the buffer is full or the last flush is long enough ago.
///
/// A failed batch does not stop the writer. Its weeks are reported as failed
/// and later entries of the same charts are dropped, so a chart's stored
/// high-water mark never moves past a week that was not written.
pub struct BulkChartWriter {
    sender: Option<Sender<ChartEntry>>,
    handle: Option<JoinHandle<WriteSummary>>,
}

impl BulkChartWriter {
    pub fn spawn(store: Arc<dyn ChartStore>) -> Self {
        Self::with_thresholds(store, FLUSH_SIZE, FLUSH_INTERVAL)
    }

    pub fn with_thresholds(
        store: Arc<dyn ChartStore>,
        flush_size: usize,
        flush_every: Duration,
    ) -> Self {
        let (sender, receiver) = unbounded();
        let handle = std::thread::spawn(move || {
            writer_loop(store.as_ref(), receiver, flush_size.max(1), flush_every)
        });
        Self {
            sender: Some(sender),
            handle: Some(handle),
        }
    }

    pub fn upsert(&self, entry: ChartEntry) -> Result<()> {
        match &self.sender {
            Some(sender) => sender
                .send(entry)
                .map_err(|_| anyhow!("Chart writer stopped unexpectedly")),
            None => Err(anyhow!("Chart writer is closed")),
        }
    }

    /// Flush what is buffered and stop the writer.
    pub fn close(mut self) -> Result<WriteSummary> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<WriteSummary> {
        drop(self.sender.take());
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| anyhow!("Chart writer thread panicked")),
            None => Ok(WriteSummary::default()),
        }
    }
}

impl Drop for BulkChartWriter {
    fn drop(&mut self) {
        match self.shutdown() {
            Ok(summary) if !summary.failed_weeks.is_empty() => {
                log::warn!("{} chart weeks were not stored", summary.failed_weeks.len());
            }
            Ok(_) => {}
            Err(e) => log::error!("Chart writer failed on close: {:#}", e),
        }
    }
}

fn writer_loop(
    store: &dyn ChartStore,
    rx: Receiver<ChartEntry>,
    flush_size: usize,
    flush_every: Duration,
) -> WriteSummary {
    let mut batch: Vec<ChartEntry> = Vec::with_capacity(flush_size);
    let mut summary = WriteSummary::default();
    let mut failed_charts: FxHashSet<String> = FxHashSet::default();
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(Duration::from_millis(200)) {
            Ok(entry) => {
                batch.push(entry);
                if batch.len() >= flush_size || last_flush.elapsed() >= flush_every {
                    flush_batch(store, &mut batch, &mut summary, &mut failed_charts);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() && last_flush.elapsed() >= flush_every {
                    flush_batch(store, &mut batch, &mut summary, &mut failed_charts);
                    last_flush = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if !batch.is_empty() {
                    flush_batch(store, &mut batch, &mut summary, &mut failed_charts);
                }
                break;
            }
        }
    }
    summary
}

fn flush_batch(
    store: &dyn ChartStore,
    batch: &mut Vec<ChartEntry>,
    summary: &mut WriteSummary,
    failed_charts: &mut FxHashSet<String>,
) {
    let (dropped, writable): (Vec<ChartEntry>, Vec<ChartEntry>) = batch
        .drain(..)
        .partition(|entry| failed_charts.contains(&entry.chart_name));
    summary.failed_weeks.extend(dropped.iter().map(ChartWeek::of));

    if writable.is_empty() {
        return;
    }
    match store.upsert_batch(&writable) {
        Ok(()) => {
            log::debug!("Flushed {} chart entries", writable.len());
            summary.written += writable.len();
        }
        Err(e) => {
            log::warn!("Failed to write {} chart entries: {:#}", writable.len(), e);
            for entry in &writable {
                failed_charts.insert(entry.chart_name.clone());
                summary.failed_weeks.insert(ChartWeek::of(entry));
            }
        }
    }
}
