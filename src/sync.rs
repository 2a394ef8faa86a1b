//! Chart sync tracking.
//!
//! Decides which chart weeks still need scraping. The high-water mark is
//! always derived from stored entries, so it only moves past weeks that
//! were actually written.

use anyhow::Result;
use chrono::{Datelike, NaiveDate};
use std::ops::RangeInclusive;

use crate::models::MusicChart;
use crate::store::ChartStore;

/// Weeks a chart year can have
pub const MAX_WEEK: u8 = 53;

/// Most recent (year, week) stored for a chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncHighWaterMark {
    pub highest_year: u16,
    /// `None` only if entries of that year vanished between the two lookups
    pub highest_week: Option<u8>,
}

impl SyncHighWaterMark {
    pub fn load(store: &dyn ChartStore, chart_name: &str) -> Result<Option<Self>> {
        let Some(highest_year) = store.highest_year_stored(chart_name)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            highest_year,
            highest_week: store.highest_week_stored(chart_name, highest_year)?,
        }))
    }
}

/// Consecutive weeks of one chart year to scrape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrapeRange {
    pub year: u16,
    pub first_week: u8,
    pub last_week: u8,
}

impl ScrapeRange {
    pub fn weeks(&self) -> RangeInclusive<u8> {
        self.first_week..=self.last_week
    }

    pub fn len(&self) -> usize {
        self.weeks().count()
    }

    pub fn is_empty(&self) -> bool {
        self.first_week > self.last_week
    }
}

/// Last week of the current year that can have been published.
///
/// Early January days that still belong to the previous ISO year give 0.
/// Late December days that already belong to week 1 of the next ISO year give 53.
pub fn current_week_number(today: NaiveDate) -> u8 {
    let iso = today.iso_week();
    if iso.year() == today.year() {
        iso.week() as u8
    } else if iso.year() < today.year() {
        0
    } else {
        MAX_WEEK
    }
}

/// Week ranges still to scrape for `chart`, oldest first.
pub fn plan_ranges(
    chart: &MusicChart,
    mark: Option<SyncHighWaterMark>,
    today: NaiveDate,
) -> Vec<ScrapeRange> {
    let current_year = today.year().clamp(0, u16::MAX as i32) as u16;
    let first_year = mark.map_or(chart.year_started, |m| m.highest_year);

    let mut ranges = Vec::new();
    for year in first_year..=current_year {
        let stored_week = mark
            .filter(|m| m.highest_year == year)
            .and_then(|m| m.highest_week);
        let first_week = match stored_week {
            Some(week) => week.saturating_add(1),
            None if year == chart.year_started => chart.week_started,
            None => 1,
        };
        let last_week = if year == current_year {
            current_week_number(today)
        } else {
            MAX_WEEK
        };

        let range = ScrapeRange {
            year,
            first_week,
            last_week,
        };
        if !range.is_empty() {
            ranges.push(range);
        }
    }
    ranges
}

pub struct ChartSyncTracker<'a> {
    store: &'a dyn ChartStore,
}

impl<'a> ChartSyncTracker<'a> {
    pub fn new(store: &'a dyn ChartStore) -> Self {
        Self { store }
    }

    pub fn high_water_mark(&self, chart: &MusicChart) -> Result<Option<SyncHighWaterMark>> {
        SyncHighWaterMark::load(self.store, chart.name)
    }

    pub fn plan(&self, chart: &MusicChart, today: NaiveDate) -> Result<Vec<ScrapeRange>> {
        Ok(plan_ranges(chart, self.high_water_mark(chart)?, today))
    }
}
