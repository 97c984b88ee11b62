//! Provider wire format for channel feeds.
//!
//! The provider answers `GET /channels/{id}/feeds.json?api_key=..&results=N`
//! with a channel descriptor and up to `N` entries, newest first. Each entry
//! carries eight optional numbered fields; values arrive as strings or numbers
//! and may be missing or blank.

use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;
use serde_json::Value;
use tank_core::models::{ConnectionStatus, HistoryPoint, PumpState, Reading};
use tank_core::time_utils::{format_recency, TimezoneHandler};
use tank_core::{Result, TankError};
use tracing::debug;

// ── Requests ──────────────────────────────────────────────────────────────────

/// Path and query of one provider call, independent of the transport's base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
}

impl FeedRequest {
    /// The last `results` entries of `channel_id`.
    pub fn feeds(channel_id: &str, api_key: Option<&str>, results: u32) -> Self {
        let mut query = Vec::with_capacity(2);
        if let Some(key) = api_key {
            query.push(("api_key".to_string(), key.to_string()));
        }
        query.push(("results".to_string(), results.to_string()));
        Self {
            path: format!("/channels/{}/feeds.json", channel_id),
            query,
        }
    }

    /// The channel metadata document; used as a cheap reachability probe.
    pub fn channel_meta(channel_id: &str, api_key: Option<&str>) -> Self {
        let query = api_key
            .map(|key| vec![("api_key".to_string(), key.to_string())])
            .unwrap_or_default();
        Self {
            path: format!("/channels/{}.json", channel_id),
            query,
        }
    }

    /// Resolve against `base_url` into a full URL.
    pub fn url_for(&self, base_url: &str) -> Result<Url> {
        let joined = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        let mut url = Url::parse(&joined)
            .map_err(|e| TankError::Config(format!("invalid provider URL {}: {}", joined, e)))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(self.query.iter());
        }
        Ok(url)
    }
}

// ── Payload ───────────────────────────────────────────────────────────────────

/// One timestamped entry of a channel feed.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedEntry {
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub entry_id: Option<u64>,
    /// Level in percent.
    #[serde(default)]
    pub field1: Option<Value>,
    /// Temperature.
    #[serde(default)]
    pub field2: Option<Value>,
    /// Sensor-to-surface distance in cm.
    #[serde(default)]
    pub field3: Option<Value>,
    /// Capacity override in liters.
    #[serde(default)]
    pub field4: Option<Value>,
    /// Pump flag.
    #[serde(default)]
    pub field5: Option<Value>,
    /// Battery percent.
    #[serde(default)]
    pub field6: Option<Value>,
    /// Wifi signal.
    #[serde(default)]
    pub field7: Option<Value>,
    #[serde(default)]
    pub field8: Option<Value>,
}

/// A feeds document: channel descriptor plus entries.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelFeed {
    #[serde(default)]
    pub channel: Option<Value>,
    #[serde(default)]
    pub feeds: Vec<FeedEntry>,
}

impl ChannelFeed {
    /// Decode a provider body.
    pub fn from_value(body: Value) -> Result<Self> {
        Ok(serde_json::from_value(body)?)
    }

    /// The most recent entry by timestamp, falling back to provider order
    /// (newest first) when no timestamp parses.
    pub fn newest_entry(&self, tz: &TimezoneHandler) -> Option<&FeedEntry> {
        self.feeds
            .iter()
            .filter_map(|e| tz.parse_timestamp(&e.created_at).map(|ts| (ts, e)))
            .max_by_key(|(ts, _)| *ts)
            .map(|(_, e)| e)
            .or_else(|| self.feeds.first())
    }
}

/// Interpret an optional field as a finite number.
///
/// Accepts JSON numbers and numeric strings (surrounding whitespace
/// ignored). Blank strings, `null` and non-finite values yield `None`.
pub fn numeric_field(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

// ── Conversion ────────────────────────────────────────────────────────────────

/// Inputs that do not come from the entry itself.
#[derive(Debug, Clone, Copy)]
pub struct ReadingContext {
    pub default_capacity_liters: f64,
    pub timezone: TimezoneHandler,
    pub now: DateTime<Utc>,
    pub stale_after: chrono::Duration,
}

/// Build a [`Reading`] from a feed entry.
///
/// Fails with [`TankError::Validation`] when the level field is missing or
/// non-numeric, or when the timestamp cannot be parsed.
pub fn reading_from_entry(entry: &FeedEntry, ctx: &ReadingContext) -> Result<Reading> {
    let raw_level = numeric_field(entry.field1.as_ref()).ok_or_else(|| {
        TankError::Validation(format!(
            "entry {:?} has no numeric level (field1 = {:?})",
            entry.entry_id, entry.field1
        ))
    })?;
    let timestamp = ctx
        .timezone
        .parse_timestamp(&entry.created_at)
        .ok_or_else(|| TankError::TimestampParse(entry.created_at.clone()))?;

    let tank_capacity_liters = numeric_field(entry.field4.as_ref())
        .filter(|c| *c > 0.0)
        .unwrap_or(ctx.default_capacity_liters);

    Ok(Reading {
        timestamp,
        entry_id: entry.entry_id,
        level_percent: raw_level.clamp(0.0, 100.0),
        temperature: numeric_field(entry.field2.as_ref()),
        distance_cm: numeric_field(entry.field3.as_ref()),
        tank_capacity_liters,
        pump_status_raw: numeric_field(entry.field5.as_ref()),
        battery_percent: numeric_field(entry.field6.as_ref()),
        wifi_signal: numeric_field(entry.field7.as_ref()),
        last_updated: format_recency(timestamp, ctx.now),
        connection: ConnectionStatus::from_age(timestamp, ctx.now, ctx.stale_after),
        pump_state: PumpState::Off,
    })
}

/// Extract the chronological level series from a feed.
///
/// Entries with a missing/non-numeric level or an unparseable timestamp are
/// dropped; the number dropped is returned alongside the points.
pub fn history_points(feed: &ChannelFeed, tz: &TimezoneHandler) -> (Vec<HistoryPoint>, usize) {
    let mut dropped = 0usize;
    let mut points: Vec<HistoryPoint> = feed
        .feeds
        .iter()
        .filter_map(|entry| {
            let level = numeric_field(entry.field1.as_ref());
            let timestamp = tz.parse_timestamp(&entry.created_at);
            match (level, timestamp) {
                (Some(level), Some(timestamp)) => Some(HistoryPoint {
                    timestamp,
                    level_percent: level.clamp(0.0, 100.0),
                    temperature: numeric_field(entry.field2.as_ref()),
                }),
                _ => {
                    debug!(entry_id = ?entry.entry_id, "dropping history entry without usable level");
                    dropped += 1;
                    None
                }
            }
        })
        .collect();

    // Provider order is newest first.
    points.reverse();
    points.sort_by_key(|p| p.timestamp);
    (points, dropped)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx() -> ReadingContext {
        ReadingContext {
            default_capacity_liters: 1000.0,
            timezone: TimezoneHandler::new("UTC"),
            now: Utc.with_ymd_and_hms(2024, 6, 1, 12, 5, 0).unwrap(),
            stale_after: chrono::Duration::minutes(10),
        }
    }

    fn entry(value: Value) -> FeedEntry {
        serde_json::from_value(value).unwrap()
    }

    // ── FeedRequest ──────────────────────────────────────────────────────────

    #[test]
    fn test_feeds_request_url() {
        let req = FeedRequest::feeds("12345", Some("KEY"), 144);
        let url = req.url_for("https://api.example.test/").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.test/channels/12345/feeds.json?api_key=KEY&results=144"
        );
    }

    #[test]
    fn test_feeds_request_without_key() {
        let req = FeedRequest::feeds("7", None, 1);
        let url = req.url_for("https://api.example.test").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/channels/7/feeds.json?results=1");
    }

    #[test]
    fn test_channel_meta_url() {
        let req = FeedRequest::channel_meta("7", None);
        let url = req.url_for("https://api.example.test").unwrap();
        assert_eq!(url.as_str(), "https://api.example.test/channels/7.json");
    }

    #[test]
    fn test_url_for_rejects_garbage_base() {
        let req = FeedRequest::channel_meta("7", None);
        assert!(matches!(req.url_for("not a url"), Err(TankError::Config(_))));
    }

    // ── numeric_field ────────────────────────────────────────────────────────

    #[test]
    fn test_numeric_field_variants() {
        assert_eq!(numeric_field(Some(&json!("42.5"))), Some(42.5));
        assert_eq!(numeric_field(Some(&json!(" 7 "))), Some(7.0));
        assert_eq!(numeric_field(Some(&json!(13))), Some(13.0));
        assert_eq!(numeric_field(Some(&json!(""))), None);
        assert_eq!(numeric_field(Some(&json!("abc"))), None);
        assert_eq!(numeric_field(Some(&json!("NaN"))), None);
        assert_eq!(numeric_field(Some(&Value::Null)), None);
        assert_eq!(numeric_field(None), None);
    }

    // ── reading_from_entry ───────────────────────────────────────────────────

    #[test]
    fn test_reading_from_full_entry() {
        let e = entry(json!({
            "created_at": "2024-06-01T12:00:00Z",
            "entry_id": 901,
            "field1": "64.2",
            "field2": "27.1",
            "field3": "41",
            "field4": "2000",
            "field5": "1",
            "field6": "91",
            "field7": "-67",
        }));
        let r = reading_from_entry(&e, &ctx()).unwrap();
        assert_eq!(r.entry_id, Some(901));
        assert!((r.level_percent - 64.2).abs() < 1e-9);
        assert_eq!(r.temperature, Some(27.1));
        assert_eq!(r.distance_cm, Some(41.0));
        assert_eq!(r.tank_capacity_liters, 2000.0);
        assert_eq!(r.pump_status_raw, Some(1.0));
        assert_eq!(r.battery_percent, Some(91.0));
        assert_eq!(r.wifi_signal, Some(-67.0));
        assert_eq!(r.last_updated, "5 mins ago");
        assert_eq!(r.connection, ConnectionStatus::Connected);
    }

    #[test]
    fn test_reading_clamps_level() {
        let high = entry(json!({"created_at": "2024-06-01T12:00:00Z", "field1": "130"}));
        let low = entry(json!({"created_at": "2024-06-01T12:00:00Z", "field1": -12}));
        assert_eq!(reading_from_entry(&high, &ctx()).unwrap().level_percent, 100.0);
        assert_eq!(reading_from_entry(&low, &ctx()).unwrap().level_percent, 0.0);
    }

    #[test]
    fn test_reading_default_capacity_when_override_missing_or_zero() {
        let missing = entry(json!({"created_at": "2024-06-01T12:00:00Z", "field1": "50"}));
        let zero = entry(json!({"created_at": "2024-06-01T12:00:00Z", "field1": "50", "field4": "0"}));
        assert_eq!(reading_from_entry(&missing, &ctx()).unwrap().tank_capacity_liters, 1000.0);
        assert_eq!(reading_from_entry(&zero, &ctx()).unwrap().tank_capacity_liters, 1000.0);
    }

    #[test]
    fn test_reading_stale_timestamp_marks_disconnected() {
        let e = entry(json!({"created_at": "2024-06-01T11:00:00Z", "field1": "50"}));
        let r = reading_from_entry(&e, &ctx()).unwrap();
        assert_eq!(r.connection, ConnectionStatus::Disconnected);
        assert_eq!(r.last_updated, "1 hour ago");
    }

    #[test]
    fn test_reading_rejects_malformed_level() {
        let e = entry(json!({"created_at": "2024-06-01T12:00:00Z", "field1": "n/a"}));
        assert!(matches!(
            reading_from_entry(&e, &ctx()),
            Err(TankError::Validation(_))
        ));
    }

    #[test]
    fn test_reading_rejects_bad_timestamp() {
        let e = entry(json!({"created_at": "soon", "field1": "50"}));
        assert!(matches!(
            reading_from_entry(&e, &ctx()),
            Err(TankError::TimestampParse(_))
        ));
    }

    // ── ChannelFeed ──────────────────────────────────────────────────────────

    #[test]
    fn test_feed_tolerates_missing_sections() {
        let feed = ChannelFeed::from_value(json!({})).unwrap();
        assert!(feed.feeds.is_empty());
        assert!(feed.channel.is_none());
    }

    #[test]
    fn test_feed_rejects_wrong_shape() {
        assert!(ChannelFeed::from_value(json!({"feeds": "nope"})).is_err());
    }

    #[test]
    fn test_newest_entry_by_timestamp() {
        let feed = ChannelFeed::from_value(json!({
            "feeds": [
                {"created_at": "2024-06-01T11:00:00Z", "entry_id": 1, "field1": "10"},
                {"created_at": "2024-06-01T12:00:00Z", "entry_id": 2, "field1": "20"},
            ]
        }))
        .unwrap();
        let tz = TimezoneHandler::new("UTC");
        assert_eq!(feed.newest_entry(&tz).unwrap().entry_id, Some(2));
    }

    // ── history_points ───────────────────────────────────────────────────────

    #[test]
    fn test_history_points_chronological_and_filtered() {
        let feed = ChannelFeed::from_value(json!({
            "feeds": [
                {"created_at": "2024-06-01T12:20:00Z", "field1": "40", "field2": "25"},
                {"created_at": "2024-06-01T12:10:00Z", "field1": ""},
                {"created_at": "2024-06-01T12:00:00Z", "field1": "42"},
                {"created_at": "2024-06-01T11:50:00Z", "field1": "abc"},
                {"created_at": "2024-06-01T11:40:00Z", "field1": 44},
            ]
        }))
        .unwrap();
        let (points, dropped) = history_points(&feed, &TimezoneHandler::new("UTC"));

        assert_eq!(dropped, 2);
        let levels: Vec<f64> = points.iter().map(|p| p.level_percent).collect();
        assert_eq!(levels, vec![44.0, 42.0, 40.0]);
        assert!(points.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        assert_eq!(points[2].temperature, Some(25.0));
    }
}
