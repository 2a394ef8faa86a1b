//! Chart ingestion: scrape every week the sync tracker reports as missing and
//! store the entries through the bulk writer.

use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;

use crate::models::{IngestStats, MusicChart};
use crate::progress::{Phase, PhaseProgress};
use crate::scrape::{ChartScraper, DocumentFetcher};
use crate::store::{BulkChartWriter, ChartStore};
use crate::sync::{ChartSyncTracker, ScrapeRange};

pub struct ChartIngestor<'a> {
    store: Arc<dyn ChartStore>,
    scraper: &'a dyn ChartScraper,
    fetcher: &'a dyn DocumentFetcher,
}

impl<'a> ChartIngestor<'a> {
    pub fn new(
        store: Arc<dyn ChartStore>,
        scraper: &'a dyn ChartScraper,
        fetcher: &'a dyn DocumentFetcher,
    ) -> Self {
        Self {
            store,
            scraper,
            fetcher,
        }
    }

    /// Bring the store up to date with all supported charts as of `today`.
    ///
    /// A week that fails to fetch or parse ends ingestion of that chart for
    /// this run, so nothing after it is stored and the next run starts there.
    /// Weeks the store fails to write are counted as failed; the run goes on.
    pub fn run(&self, today: NaiveDate) -> Result<IngestStats> {
        let start = Instant::now();
        let mut stats = IngestStats::default();

        if self.store.setup_store_if_needed()? {
            log::info!("New chart store created");
        }

        let tracker = ChartSyncTracker::new(self.store.as_ref());
        let mut plans: Vec<(MusicChart, Vec<ScrapeRange>)> = Vec::new();
        for chart in self.scraper.supported_charts() {
            if let Some(mark) = tracker.high_water_mark(chart)? {
                log::info!(
                    "Store contains {} up to {}, week {}",
                    chart.name,
                    mark.highest_year,
                    mark.highest_week.unwrap_or(0)
                );
            }
            let ranges = tracker.plan(chart, today)?;
            stats.weeks_planned += ranges.iter().map(ScrapeRange::len).sum::<usize>();
            plans.push((*chart, ranges));
        }
        log::info!("{} chart weeks to scrape", stats.weeks_planned);

        let progress = PhaseProgress::start(Phase::ScrapingCharts, stats.weeks_planned as u64);
        let writer = BulkChartWriter::spawn(self.store.clone());

        for (chart, ranges) in &plans {
            'chart: for range in ranges {
                for week in range.weeks() {
                    let outcome = self.ingest_week(chart, range.year, week, &writer);
                    progress.advance();
                    match outcome {
                        Ok(0) => stats.weeks_empty += 1,
                        Ok(_) => stats.weeks_scraped += 1,
                        Err(e) => {
                            log::warn!(
                                "Skipping the rest of {}: week {} of {} failed: {:#}",
                                chart.name,
                                week,
                                range.year,
                                e
                            );
                            stats.weeks_failed += 1;
                            break 'chart;
                        }
                    }
                }
            }
        }

        let summary = writer.close()?;
        stats.entries_written = summary.written;
        if !summary.failed_weeks.is_empty() {
            // those weeks were counted as scraped when their entries were queued
            let failed = summary.failed_weeks.len();
            stats.weeks_scraped = stats.weeks_scraped.saturating_sub(failed);
            stats.weeks_failed += failed;
            for week in &summary.failed_weeks {
                log::warn!(
                    "Week {} of {} {} was scraped but not stored, it will be retried next run",
                    week.week_number,
                    week.chart_name,
                    week.year
                );
            }
        }
        progress.finish(format!("Scraped {} chart weeks", stats.weeks_scraped));
        stats.elapsed_seconds = start.elapsed().as_secs_f64();
        Ok(stats)
    }

    /// Number of entries handed to the writer for one week.
    fn ingest_week(
        &self,
        chart: &MusicChart,
        year: u16,
        week: u8,
        writer: &BulkChartWriter,
    ) -> Result<usize> {
        let url = self
            .scraper
            .url_for(chart, year, week)
            .ok_or_else(|| anyhow!("{} is not supported by the scraper", chart.name))?;
        let Some(html) = self.fetcher.fetch(&url)? else {
            log::debug!("No edition at {}", url);
            return Ok(0);
        };

        let entries = self.scraper.scrape(chart, year, week, &html)?;
        let count = entries.len();
        for entry in entries {
            writer.upsert(entry)?;
        }
        log::debug!(
            "Writing week {} of {} {} to the store ({} songs)",
            week,
            chart.name,
            year,
            count
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChartEntry, Song, TIPPARADE, TOP40};
    use crate::scrape::tests::chart_page;
    use crate::scrape::Top40Scraper;
    use crate::store::SqliteChartStore;
    use rustc_hash::FxHashMap;
    use std::sync::Mutex;

    /// Serves canned pages; unknown URLs are "not found".
    #[derive(Default)]
    struct FakeFetcher {
        pages: FxHashMap<String, Result<String, String>>,
        requested: Mutex<Vec<String>>,
    }

    impl FakeFetcher {
        fn with_page(mut self, url: &str, html: String) -> Self {
            self.pages.insert(url.to_string(), Ok(html));
            self
        }

        fn with_failure(mut self, url: &str) -> Self {
            self.pages.insert(url.to_string(), Err("connection reset".to_string()));
            self
        }
    }

    impl DocumentFetcher for FakeFetcher {
        fn fetch(&self, url: &str) -> Result<Option<String>> {
            self.requested.lock().unwrap().push(url.to_string());
            match self.pages.get(url) {
                Some(Ok(html)) => Ok(Some(html.clone())),
                Some(Err(e)) => Err(anyhow!("{}", e)),
                None => Ok(None),
            }
        }
    }

    fn seeded_store() -> Arc<SqliteChartStore> {
        Arc::new(seeded())
    }

    fn seeded() -> SqliteChartStore {
        let store = SqliteChartStore::in_memory().unwrap();
        store.setup_store_if_needed().unwrap();
        for (chart, week) in [(&TOP40, 30u8), (&TIPPARADE, 33u8)] {
            store
                .upsert(&ChartEntry {
                    chart_name: chart.name.to_string(),
                    year: 2020,
                    week_number: week,
                    position: 1,
                    is_new_release: false,
                    song: Song::new("Seed", "Seed"),
                })
                .unwrap();
        }
        store
    }

    fn today() -> NaiveDate {
        // ISO week 33
        NaiveDate::from_ymd_opt(2020, 8, 15).unwrap()
    }

    #[test]
    fn test_scrapes_missing_weeks() {
        let store = seeded_store();
        let fetcher = FakeFetcher::default()
            .with_page(
                "https://www.top40.nl/top40/2020/week-31",
                chart_page(
                    "Top 40",
                    2020,
                    31,
                    &[
                        (1, "Dua Lipa", "Break My Heart", true),
                        (2, "Kris Kross Amsterdam", "Vluchtstrook", false),
                    ],
                ),
            )
            .with_page(
                "https://www.top40.nl/top40/2020/week-33",
                chart_page("Top 40", 2020, 33, &[(1, "Joel Corry", "Head & Heart", true)]),
            );
        let scraper = Top40Scraper::new();

        let ingestor = ChartIngestor::new(store.clone(), &scraper, &fetcher);
        let stats = ingestor.run(today()).unwrap();

        assert_eq!(stats.weeks_planned, 3);
        assert_eq!(stats.weeks_scraped, 2);
        assert_eq!(stats.weeks_empty, 1);
        assert_eq!(stats.weeks_failed, 0);
        assert_eq!(stats.entries_written, 3);
        assert_eq!(store.highest_week_stored("Top 40", 2020).unwrap(), Some(33));
        assert_eq!(
            store.releases(2020).unwrap(),
            vec![Song::new("Dua Lipa", "Break My Heart"), Song::new("Joel Corry", "Head & Heart")]
        );
    }

    #[test]
    fn test_failed_week_stops_chart() {
        let store = seeded_store();
        let fetcher = FakeFetcher::default()
            .with_failure("https://www.top40.nl/top40/2020/week-31")
            .with_page(
                "https://www.top40.nl/top40/2020/week-32",
                chart_page("Top 40", 2020, 32, &[(1, "A", "B", true)]),
            );
        let scraper = Top40Scraper::new();

        let ingestor = ChartIngestor::new(store.clone(), &scraper, &fetcher);
        let stats = ingestor.run(today()).unwrap();

        assert_eq!(stats.weeks_failed, 1);
        assert_eq!(stats.entries_written, 0);
        assert_eq!(
            *fetcher.requested.lock().unwrap(),
            vec!["https://www.top40.nl/top40/2020/week-31".to_string()]
        );
        assert_eq!(store.highest_week_stored("Top 40", 2020).unwrap(), Some(30));
    }

    /// Store whose batch writes always fail.
    struct FullDiskStore(SqliteChartStore);

    impl ChartStore for FullDiskStore {
        fn setup_store_if_needed(&self) -> Result<bool> {
            self.0.setup_store_if_needed()
        }

        fn upsert(&self, entry: &ChartEntry) -> Result<()> {
            self.0.upsert(entry)
        }

        fn upsert_batch(&self, _entries: &[ChartEntry]) -> Result<()> {
            Err(anyhow!("disk full"))
        }

        fn releases(&self, year: u16) -> Result<Vec<Song>> {
            self.0.releases(year)
        }

        fn highest_year_stored(&self, chart_name: &str) -> Result<Option<u16>> {
            self.0.highest_year_stored(chart_name)
        }

        fn highest_week_stored(&self, chart_name: &str, year: u16) -> Result<Option<u8>> {
            self.0.highest_week_stored(chart_name, year)
        }
    }

    #[test]
    fn test_unwritable_week_is_counted_failed() {
        let store = Arc::new(FullDiskStore(seeded()));
        let fetcher = FakeFetcher::default().with_page(
            "https://www.top40.nl/top40/2020/week-31",
            chart_page("Top 40", 2020, 31, &[(1, "Dua Lipa", "Break My Heart", true)]),
        );
        let scraper = Top40Scraper::new();

        let ingestor = ChartIngestor::new(store.clone(), &scraper, &fetcher);
        let stats = ingestor.run(today()).unwrap();

        assert_eq!(stats.weeks_planned, 3);
        assert_eq!(stats.weeks_scraped, 0);
        assert_eq!(stats.weeks_failed, 1);
        assert_eq!(stats.weeks_empty, 2);
        assert_eq!(stats.entries_written, 0);
        assert_eq!(store.highest_week_stored("Top 40", 2020).unwrap(), Some(30));
    }

    #[test]
    fn test_fresh_store_is_created() {
        let store = Arc::new(SqliteChartStore::in_memory().unwrap());
        // every week "not found": only the plan and the setup matter here
        let fetcher = FakeFetcher::default();
        let scraper = Top40Scraper::new();

        let ingestor = ChartIngestor::new(store.clone(), &scraper, &fetcher);
        let stats = ingestor.run(NaiveDate::from_ymd_opt(1967, 2, 1).unwrap()).unwrap();

        // Top 40 1965-1966 in full plus weeks 1-5 of 1967; Tipparade starts later
        assert_eq!(stats.weeks_planned, 53 + 53 + 5);
        assert_eq!(stats.weeks_empty, stats.weeks_planned);
        assert_eq!(store.highest_year_stored("Top 40").unwrap(), None);
    }
}
