//! OpenStreetMap facility fetcher backed by the Overpass API.
//!
//! One combined query selects every element carrying any of the category tag
//! keys inside a named administrative area, so a run costs a single round trip.
//! Ways and relations are asked for with `out center` so that they carry a
//! representative point.
//!
//! # Failure signals
//!
//! | Signal | Classified as |
//! |--------|---------------|
//! | request timeout | [`FetchError::Timeout`] |
//! | HTTP 200 with a `remark` reporting a runtime error | [`FetchError::Timeout`] |
//! | non-2xx status | [`FetchError::Status`] |
//! | unparsable body / no `elements` array | [`FetchError::Malformed`] |

use crate::api::{BackoffPolicy, FetchAsync, FetchError, Fetched, RetryFetch, fetch_or_default};
use crate::models::RawRecord;
use crate::utils::truncate_for_log;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::Value;
use std::error::Error;
use std::time::Duration as StdDuration;
use tracing::{debug, info, instrument, warn};

/// Extra client-side slack on top of the server-side query budget.
const CLIENT_TIMEOUT_SLACK: StdDuration = StdDuration::from_secs(15);

/// Build the combined Overpass QL query for `tag_keys` inside `area_name`.
pub fn build_query(area_name: &str, tag_keys: &[&str], timeout_secs: u64) -> String {
    let area = area_name.replace('\\', "\\\\").replace('"', "\\\"");
    let mut query = format!("[out:json][timeout:{timeout_secs}];\n");
    query.push_str(&format!("area[\"name\"=\"{area}\"]->.a;\n(\n"));
    for key in tag_keys {
        query.push_str(&format!("  nwr(area.a)[\"{key}\"];\n"));
    }
    query.push_str(");\nout center tags;\n");
    query
}

fn malformed(e: serde_json::Error, body: &str) -> FetchError {
    FetchError::Malformed(format!("{e}; body: {}", truncate_for_log(body, 200)))
}

/// Decode an Overpass JSON response body into raw records.
///
/// # Errors
///
/// - [`FetchError::Timeout`] when the server reports that the query ran out of time
/// - [`FetchError::Malformed`] when the body is not JSON or lacks `elements`
pub fn parse_response(body: &str) -> Result<Vec<RawRecord>, FetchError> {
    let value: Value = serde_json::from_str(body).map_err(|e| malformed(e, body))?;

    if let Some(remark) = value.get("remark").and_then(Value::as_str) {
        let lowered = remark.to_lowercase();
        if lowered.contains("runtime error") || lowered.contains("timed out") {
            return Err(FetchError::Timeout(remark.to_string()));
        }
        debug!(%remark, "Overpass remark");
    }

    let elements = value
        .get("elements")
        .and_then(Value::as_array)
        .ok_or_else(|| FetchError::Malformed("no `elements` array".into()))?;

    Ok(elements.iter().map(RawRecord::from_value).collect())
}

/// A single Overpass request, without any retry behaviour.
#[derive(Debug, Clone)]
pub struct OverpassClient {
    client: Client,
    url: String,
    query: String,
}

impl OverpassClient {
    /// Build a client that POSTs `query` to `url`.
    ///
    /// # Arguments
    ///
    /// * `url` - Overpass interpreter endpoint
    /// * `user_agent` - Sent with every request
    /// * `query` - Complete Overpass QL text, see [`build_query`]
    /// * `timeout_secs` - Server-side budget; the client waits a little longer
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        url: &str,
        user_agent: &str,
        query: String,
        timeout_secs: u64,
    ) -> Result<Self, Box<dyn Error>> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(StdDuration::from_secs(timeout_secs) + CLIENT_TIMEOUT_SLACK)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            query,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl FetchAsync for OverpassClient {
    type Response = Vec<RawRecord>;

    #[instrument(level = "debug", skip_all, fields(url = %self.url))]
    async fn fetch(&self) -> Result<Self::Response, FetchError> {
        let body = format!("data={}", urlencoding::encode(&self.query));
        let resp = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let text = resp.text().await?;
        let records = parse_response(&text)?;
        debug!(
            count = records.len(),
            bytes = text.len(),
            "Decoded Overpass response"
        );
        Ok(records)
    }
}

/// Fetch all facility records, degrading to an empty list if the upstream
/// stays unavailable for the whole attempt budget.
#[instrument(level = "info", skip_all)]
pub async fn fetch_records(
    client: OverpassClient,
    policy: BackoffPolicy,
) -> Fetched<Vec<RawRecord>> {
    debug!(query = %client.query(), schedule = ?policy.schedule(), "Overpass query");
    let retry = RetryFetch::new(client, policy, "overpass");
    let fetched = fetch_or_default(&retry).await;

    if fetched.degraded {
        warn!(
            attempts = fetched.attempts,
            "Overpass fetch degraded to an empty result"
        );
    } else {
        info!(
            count = fetched.value.len(),
            attempts = fetched.attempts,
            "Fetched OSM elements"
        );
    }
    fetched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityId;

    const SAMPLE: &str = r#"{
      "version": 0.6,
      "generator": "Overpass API 0.7.62.1 084b4234",
      "osm3s": {
        "timestamp_osm_base": "2025-05-06T06:12:01Z",
        "timestamp_areas_base": "2025-05-06T05:45:12Z",
        "copyright": "The data included in this document is from www.openstreetmap.org."
      },
      "elements": [
        {
          "type": "node",
          "id": 20962297,
          "lat": 51.5549,
          "lon": 7.3119,
          "tags": { "shop": "bakery", "name": "Bäckerei Malzer" }
        },
        {
          "type": "way",
          "id": 4711,
          "center": { "lat": 51.56, "lon": 7.32 },
          "tags": { "leisure": "park" }
        },
        "garbage"
      ]
    }"#;

    #[test]
    fn test_build_query_is_combined() {
        let query = build_query("Castrop-Rauxel", &["shop", "amenity"], 60);
        assert!(query.starts_with("[out:json][timeout:60];"));
        assert!(query.contains(r#"area["name"="Castrop-Rauxel"]->.a;"#));
        assert!(query.contains(r#"nwr(area.a)["shop"];"#));
        assert!(query.contains(r#"nwr(area.a)["amenity"];"#));
        assert_eq!(query.matches("out center tags;").count(), 1);
    }

    #[test]
    fn test_build_query_escapes_area_name() {
        let query = build_query(r#"Foo "Bar""#, &["shop"], 30);
        assert!(query.contains(r#"area["name"="Foo \"Bar\""]"#));
    }

    #[test]
    fn test_parse_response_keeps_every_element() {
        let records = parse_response(SAMPLE).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].id, Some(EntityId::from(20962297u64)));
        assert_eq!(records[1].center.lat, Some(51.56));
        assert_eq!(records[2], RawRecord::default());
    }

    #[test]
    fn test_parse_response_remark_timeout() {
        let body = r#"{
          "elements": [],
          "remark": "runtime error: Query timed out in \"query\" at line 3 after 61 seconds."
        }"#;
        assert!(matches!(parse_response(body), Err(FetchError::Timeout(_))));
    }

    #[test]
    fn test_parse_response_malformed() {
        let bodies = [
            "<html>busy</html>",
            r#"{"version": 0.6}"#,
            r#"{"elements": [], "#,
        ];
        for body in bodies {
            let result = parse_response(body);
            assert!(matches!(result, Err(FetchError::Malformed(_))), "{body}");
        }
    }

    #[test]
    fn test_parse_response_benign_remark() {
        let body = r#"{ "elements": [], "remark": "area not fully loaded" }"#;
        assert_eq!(parse_response(body).unwrap(), vec![]);
    }
}
