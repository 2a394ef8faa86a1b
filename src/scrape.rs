//! Chart page fetching and scraping.
//!
//! Pages are parsed by scanning known blocks (`div.listItem`) with small,
//! case-insensitive patterns, so harmless markup changes elsewhere in the
//! page do not break extraction.

use anyhow::{anyhow, bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use crate::models::{ChartEntry, MusicChart, Song, SUPPORTED_CHARTS};

pub const TOP40_BASE_URL: &str = "https://www.top40.nl";

const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:59.0) Gecko/20100101 Firefox/59.0";

// ============================================================================
// Fetching
// ============================================================================

pub trait DocumentFetcher: Send + Sync {
    /// Fetch a page. `Ok(None)` means the page does not exist (not published).
    fn fetch(&self, url: &str) -> Result<Option<String>>;
}

pub struct HttpDocumentFetcher {
    http_client: ureq::Agent,
}

impl HttpDocumentFetcher {
    pub fn new() -> Self {
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(5))
            .timeout_read(Duration::from_secs(15))
            .timeout_write(Duration::from_secs(15))
            .user_agent(USER_AGENT)
            .build();
        Self { http_client }
    }
}

impl Default for HttpDocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFetcher for HttpDocumentFetcher {
    fn fetch(&self, url: &str) -> Result<Option<String>> {
        match self.http_client.get(url).call() {
            Ok(response) => {
                let body = response
                    .into_string()
                    .with_context(|| format!("Failed to read {}", url))?;
                Ok(Some(body))
            }
            Err(ureq::Error::Status(404 | 410, _)) => Ok(None),
            Err(err) => Err(anyhow!("Request for {} failed: {}", url, err)),
        }
    }
}

// ============================================================================
// Scraping
// ============================================================================

pub trait ChartScraper: Send + Sync {
    fn supported_charts(&self) -> &[MusicChart];

    /// Location of one weekly edition, or `None` for an unsupported chart.
    fn url_for(&self, chart: &MusicChart, year: u16, week: u8) -> Option<String>;

    /// Entries of the edition in `html`. A page that turns out to hold
    /// another edition than the one requested yields no entries.
    fn scrape(&self, chart: &MusicChart, year: u16, week: u8, html: &str)
        -> Result<Vec<ChartEntry>>;
}

static PAGE_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").unwrap());
static TITLE_WEEK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)week (\d\d?),").unwrap());
static TITLE_YEAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})\s*$").unwrap());

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<div[^>]*class="[^"]*\blistItem\b[^"]*""#).unwrap());
static POSITION: Lazy<Regex> =
    Lazy::new(|| {
        Regex::new(r#"(?is)<div[^>]*class="[^"]*\bdot-icon\b[^"]*"[^>]*>(.*?)</div>"#).unwrap()
    });
static SONG_TITLE: Lazy<Regex> =
    Lazy::new(|| {
        Regex::new(r#"(?is)<h3[^>]*class="[^"]*\btitle\b[^"]*"[^>]*>(.*?)</h3>"#).unwrap()
    });
static ARTIST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?is)<p[^>]*class="[^"]*\bartist\b[^"]*"[^>]*>(.*?)</p>"#).unwrap());
static STAT_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<div[^>]*class="[^"]*\bstatcolumn\b[^"]*""#).unwrap());
static STRONG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)<strong[^>]*>(.*?)</strong>").unwrap());

static TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static NUMERIC_ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&#(x[0-9a-fA-F]+|\d+);").unwrap());

/// Scraper for the Dutch Top 40 and Tipparade pages on top40.nl.
pub struct Top40Scraper {
    base_url: String,
}

impl Top40Scraper {
    pub fn new() -> Self {
        Self {
            base_url: TOP40_BASE_URL.to_string(),
        }
    }
}

impl Default for Top40Scraper {
    fn default() -> Self {
        Self::new()
    }
}

impl ChartScraper for Top40Scraper {
    fn supported_charts(&self) -> &[MusicChart] {
        &SUPPORTED_CHARTS
    }

    fn url_for(&self, chart: &MusicChart, year: u16, week: u8) -> Option<String> {
        if !SUPPORTED_CHARTS.contains(chart) {
            return None;
        }
        Some(format!("{}/{}/{}/week-{}", self.base_url, chart.slug, year, week))
    }

    fn scrape(
        &self,
        chart: &MusicChart,
        year: u16,
        week: u8,
        html: &str,
    ) -> Result<Vec<ChartEntry>> {
        let (page_year, page_week) = edition_of(html)?;
        if (page_year, page_week) != (year, week) {
            log::debug!(
                "{} week {} of {} redirected to week {} of {}",
                chart.name,
                week,
                year,
                page_week,
                page_year
            );
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for block in list_item_blocks(html) {
            match parse_list_item(block) {
                Some(item) => entries.push(ChartEntry {
                    chart_name: chart.name.to_string(),
                    year,
                    week_number: week,
                    position: item.position,
                    is_new_release: item.is_new,
                    song: Song::new(item.artist, item.title),
                }),
                None => log::trace!("Skipping list item without a chart position"),
            }
        }

        log::info!("Scraped week {} of {} {} ({} songs)", week, chart.name, year, entries.len());
        for entry in &entries {
            log::trace!("{:?}", entry);
        }
        Ok(entries)
    }
}

/// (year, week) of the edition, read from the page title ("... week 12, 2020").
fn edition_of(html: &str) -> Result<(u16, u8)> {
    let title = PAGE_TITLE
        .captures(html)
        .map(|c| clean_text(&c[1]))
        .ok_or_else(|| anyhow!("Chart page has no title"))?;
    let week: u8 = match TITLE_WEEK.captures(&title) {
        Some(c) => c[1].parse()?,
        None => bail!("Week number of chart not found in title: {}", title),
    };
    let year: u16 = match TITLE_YEAR.captures(&title) {
        Some(c) => c[1].parse()?,
        None => bail!("Year of chart not found in title: {}", title),
    };
    Ok((year, week))
}

fn list_item_blocks(html: &str) -> Vec<&str> {
    let starts: Vec<usize> = LIST_ITEM.find_iter(html).map(|m| m.start()).collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(html.len());
            &html[start..end]
        })
        .collect()
}

struct ListItem {
    position: u8,
    title: String,
    artist: String,
    is_new: bool,
}

/// `None` for the header row and for unnumbered rows (advertisements).
fn parse_list_item(block: &str) -> Option<ListItem> {
    let position = clean_text(&POSITION.captures(block)?[1]);
    if position == "-" {
        return None;
    }
    let position: u8 = position.parse().ok()?;
    let title = clean_text(&SONG_TITLE.captures(block)?[1]);
    let artist = clean_text(&ARTIST.captures(block)?[1]);

    // second stat column holds the weeks in chart; 1 means new this week
    let stats = stat_values(block);
    let is_new = stats.get(1).map(String::as_str) == Some("1");

    Some(ListItem {
        position,
        title,
        artist,
        is_new,
    })
}

fn stat_values(block: &str) -> Vec<String> {
    let starts: Vec<usize> = STAT_COLUMN.find_iter(block).map(|m| m.start()).collect();
    let mut values = Vec::new();
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(block.len());
        values.extend(STRONG.captures_iter(&block[start..end]).map(|c| clean_text(&c[1])));
    }
    values
}

/// Strip tags, decode entities and collapse whitespace.
fn clean_text(fragment: &str) -> String {
    let text = TAG.replace_all(fragment, " ");
    let text = decode_entities(&text);
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn decode_entities(text: &str) -> String {
    let text = NUMERIC_ENTITY.replace_all(text, |c: &regex::Captures| {
        let code = &c[1];
        let value = match code.strip_prefix('x') {
            Some(hex) => u32::from_str_radix(hex, 16).ok(),
            None => code.parse::<u32>().ok(),
        };
        value
            .and_then(char::from_u32)
            .map(String::from)
            .unwrap_or_default()
    });
    text.replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{TIPPARADE, TOP40};

    /// A weekly page in the shape top40.nl serves.
    pub(crate) fn chart_page(
        chart: &str,
        year: u16,
        week: u8,
        rows: &[(u8, &str, &str, bool)],
    ) -> String {
        let mut html = format!(
            "<html><head><title>{} week {}, {}</title></head><body>\n\
             <ul class=\"hitlist\"><li class=\"active\"><h1>{}</h1></li></ul>\n\
             <div class=\"listItem header\"><div class=\"dot-icon\">Pos</div></div>\n",
            chart, week, year, chart
        );
        for (position, artist, title, is_new) in rows {
            html.push_str(&format!(
                "<div class=\"listItem\">\n\
                   <div class=\"dot-icon\">{}</div>\n\
                   <div class=\"song-details\"><h3 class=\"title\">{}</h3><p class=\"artist\">{}</p></div>\n\
                   <div class=\"statcolumn\"><strong>{}</strong><span>vorige week</span></div>\n\
                   <div class=\"statcolumn\"><strong>{}</strong><span>weken</span></div>\n\
                 </div>\n",
                position,
                title,
                artist,
                position + 1,
                if *is_new { 1 } else { 4 }
            ));
        }
        html.push_str("</body></html>");
        html
    }

    const FIXTURE: &str = r#"<html><head><title>Top 40 van week 12, 2020</title></head><body>
<div class="listItem header"><div class="dot-icon">Pos</div></div>
<div class="listItem"><div class="dot-icon">1</div>
  <div class="song-details"><h3 class="title">Blinding Lights</h3><p class="artist">The Weeknd</p></div>
  <div class="statcolumn"><strong>3</strong><span>vorige week</span></div>
  <div class="statcolumn"><strong>12</strong><span>weken</span></div>
</div>
<div class="listItem"><div class="dot-icon">2</div>
  <div class="song-details"><h3 class="title">Don&#39;t Start Now</h3><p class="artist">Dua Lipa</p></div>
  <div class="statcolumn"><strong>-</strong></div>
  <div class="statcolumn"><strong>1</strong></div>
</div>
<div class="listItem advert"><div class="dot-icon">-</div><p>Advertentie</p></div>
<div class="listItem"><div class="dot-icon">3</div>
  <div class="song-details"><h3 class="title">Roses &amp; Wine</h3>
  <p class="artist">Bl&#233;f <span>&amp;</span>  Friends</p></div>
</div>
</body></html>"#;

    #[test]
    fn test_url_for_chart_week() {
        let scraper = Top40Scraper::new();
        assert_eq!(
            scraper.url_for(&TOP40, 2020, 12).as_deref(),
            Some("https://www.top40.nl/top40/2020/week-12")
        );
        assert_eq!(
            scraper.url_for(&TIPPARADE, 1967, 28).as_deref(),
            Some("https://www.top40.nl/tipparade/1967/week-28")
        );
        let unknown = MusicChart {
            name: "Mega Top 50",
            slug: "mega",
            year_started: 1993,
            week_started: 1,
        };
        assert!(scraper.url_for(&unknown, 2000, 1).is_none());
    }

    #[test]
    fn test_scrape_fixture() {
        let entries = Top40Scraper::new().scrape(&TOP40, 2020, 12, FIXTURE).unwrap();
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].position, 1);
        assert_eq!(entries[0].song, Song::new("The Weeknd", "Blinding Lights"));
        assert!(!entries[0].is_new_release);

        assert_eq!(entries[1].song, Song::new("Dua Lipa", "Don't Start Now"));
        assert!(entries[1].is_new_release);

        // no stat columns
        assert_eq!(entries[2].position, 3);
        assert_eq!(entries[2].song, Song::new("Bléf & Friends", "Roses & Wine"));
        assert!(!entries[2].is_new_release);

        assert!(entries
            .iter()
            .all(|e| e.chart_name == "Top 40" && e.year == 2020 && e.week_number == 12));
    }

    #[test]
    fn test_other_edition_yields_nothing() {
        let entries = Top40Scraper::new().scrape(&TOP40, 2020, 13, FIXTURE).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_page_without_edition_is_an_error() {
        let result =
            Top40Scraper::new().scrape(&TOP40, 2020, 12, "<html><title>Oops</title></html>");
        assert!(result.is_err());
    }

    #[test]
    fn test_generated_page_round_trip() {
        let html = chart_page("Tipparade", 1967, 28, &[(1, "The Cats", "Sure He's A Cat", true)]);
        let entries = Top40Scraper::new().scrape(&TIPPARADE, 1967, 28, &html).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].chart_name, "Tipparade");
        assert!(entries[0].is_new_release);
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  <b>Guns N&#x27;</b>\n Roses&nbsp;"), "Guns N' Roses");
    }
}
