//! Event listing scraper for municipal event pages.
//!
//! Event pages are built with whatever CMS the city happens to run, so the
//! extractor tries an ordered list of structural selectors and keeps the
//! result of the first one that matches anything. If none match it falls
//! back to a generic heuristic that turns every descriptive link into an
//! event.
//!
//! # Strategies
//!
//! | Order | Selector | Typical source |
//! |-------|----------|----------------|
//! | 1 | `article.event` | semantic HTML themes |
//! | 2 | `.event-item` | generic CMS lists |
//! | 3 | `.veranstaltung` | German municipal portals |
//! | 4 | `li.event` | plain lists |
//! | 5 | `.tx-cal-event` | TYPO3 calendar extension |
//! | fallback | `a[href]` with text longer than 10 characters | anything |

use crate::api::{BackoffPolicy, FetchAsync, FetchError, RetryFetch, fetch_or_default};
use crate::models::EventRecord;
use crate::utils::{squash_whitespace, truncate_chars};
use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration as StdDuration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};
use url::Url;

const MAX_TITLE_CHARS: usize = 200;
const MAX_DESCRIPTION_CHARS: usize = 300;
/// Links with this many characters of text or fewer are navigation, not events.
const MIN_LINK_TEXT_CHARS: usize = 10;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

const ITEM_SELECTORS: [&str; 5] = [
    "article.event",
    ".event-item",
    ".veranstaltung",
    "li.event",
    ".tx-cal-event",
];

static ITEM_STRATEGIES: Lazy<Vec<(&'static str, Selector)>> = Lazy::new(|| {
    ITEM_SELECTORS
        .into_iter()
        .map(|css| (css, selector(css)))
        .collect()
});
static TITLE: Lazy<Selector> = Lazy::new(|| selector("h2, h3, h4, .title, .event-title"));
static TIME_WITH_ATTR: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static DATE: Lazy<Selector> = Lazy::new(|| selector("time, .date, .event-date"));
static LOCATION: Lazy<Selector> = Lazy::new(|| selector(".location, .ort, .venue"));
static DESCRIPTION: Lazy<Selector> = Lazy::new(|| selector("p, .description, .teaser"));
static LINK: Lazy<Selector> = Lazy::new(|| selector("a[href]"));

fn text_of(element: ElementRef<'_>) -> Option<String> {
    let text = squash_whitespace(&element.text().collect::<String>());
    if text.is_empty() { None } else { Some(text) }
}

fn first_text(item: ElementRef<'_>, sel: &Selector) -> Option<String> {
    item.select(sel).find_map(text_of)
}

fn resolve_link(base: &Url, href: Option<&str>) -> Option<String> {
    let href = href?;
    base.join(href.trim()).ok().map(|u| u.to_string())
}

fn event_from_item(item: ElementRef<'_>, source: &Url, retrieved_on: NaiveDate) -> EventRecord {
    let event_date = item
        .select(&TIME_WITH_ATTR)
        .filter_map(|t| t.value().attr("datetime"))
        .map(str::trim)
        .find(|d| !d.is_empty())
        .map(str::to_string)
        .or_else(|| first_text(item, &DATE));
    let href = item.select(&LINK).find_map(|a| a.value().attr("href"));

    EventRecord {
        retrieved_on,
        title: first_text(item, &TITLE).map(|t| truncate_chars(&t, MAX_TITLE_CHARS)),
        event_date,
        location: first_text(item, &LOCATION),
        description: first_text(item, &DESCRIPTION)
            .map(|d| truncate_chars(&d, MAX_DESCRIPTION_CHARS)),
        link: resolve_link(source, href),
        source: source.to_string(),
    }
}

fn events_from_links(document: &Html, source: &Url, retrieved_on: NaiveDate) -> Vec<EventRecord> {
    document
        .select(&LINK)
        .filter_map(|a| {
            let text = text_of(a)?;
            if text.chars().count() <= MIN_LINK_TEXT_CHARS {
                return None;
            }
            Some(EventRecord {
                retrieved_on,
                title: Some(truncate_chars(&text, MAX_TITLE_CHARS)),
                event_date: None,
                location: None,
                description: None,
                link: resolve_link(source, a.value().attr("href")),
                source: source.to_string(),
            })
        })
        .collect()
}

/// Extract event listings from an HTML page.
pub fn extract_events(html: &str, source: &Url, retrieved_on: NaiveDate) -> Vec<EventRecord> {
    let document = Html::parse_document(html);

    for (css, sel) in ITEM_STRATEGIES.iter() {
        let items: Vec<ElementRef<'_>> = document.select(sel).collect();
        if !items.is_empty() {
            debug!(strategy = %css, count = items.len(), "Event markup matched");
            return items
                .into_iter()
                .map(|item| event_from_item(item, source, retrieved_on))
                .collect();
        }
    }

    warn!(%source, "No known event markup found; falling back to raw links");
    events_from_links(&document, source, retrieved_on)
}

/// A single page download, without retry behaviour.
#[derive(Debug, Clone)]
pub struct PageClient {
    client: Client,
    url: Url,
}

impl PageClient {
    /// Wrap a shared `client` for downloads of `url`.
    ///
    /// # Arguments
    ///
    /// * `client` - Configured HTTP client; cloning it shares the connection pool
    /// * `url` - Event listing page
    pub fn new(client: Client, url: Url) -> Self {
        Self { client, url }
    }
}

impl FetchAsync for PageClient {
    type Response = String;

    async fn fetch(&self) -> Result<Self::Response, FetchError> {
        let resp = self.client.get(self.url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(resp.text().await?)
    }
}

/// Events gathered from all sources in one run.
#[derive(Debug, Default)]
pub struct EventsCollected {
    pub events: Vec<EventRecord>,
    /// Sources that were invalid or stayed unreachable.
    pub failed_sources: usize,
}

/// Scrape every source in order, pausing `politeness` between sources.
///
/// A source that cannot be fetched contributes nothing; it never fails the run.
#[instrument(level = "info", skip_all, fields(sources = sources.len()))]
pub async fn collect_events(
    client: &Client,
    sources: &[String],
    policy: BackoffPolicy,
    politeness: StdDuration,
    retrieved_on: NaiveDate,
) -> EventsCollected {
    let per_source: Vec<Option<Vec<EventRecord>>> = stream::iter(sources.iter().enumerate())
        .then(|(i, source)| async move {
            if i > 0 && !politeness.is_zero() {
                sleep(politeness).await;
            }
            let url = match Url::parse(source) {
                Ok(url) => url,
                Err(e) => {
                    warn!(%source, error = %e, "Skipping invalid event source URL");
                    return None;
                }
            };

            let page = PageClient::new(client.clone(), url.clone());
            let retry = RetryFetch::new(page, policy, source.as_str());
            let fetched = fetch_or_default(&retry).await;
            if fetched.degraded {
                return None;
            }

            let events = extract_events(&fetched.value, &url, retrieved_on);
            info!(%source, count = events.len(), "Scraped events");
            Some(events)
        })
        .collect()
        .await;

    let failed_sources = per_source.iter().filter(|r| r.is_none()).count();
    let events: Vec<EventRecord> = per_source.into_iter().flatten().flatten().collect();
    info!(count = events.len(), failed_sources, "Collected events");
    EventsCollected {
        events,
        failed_sources,
    }
}
