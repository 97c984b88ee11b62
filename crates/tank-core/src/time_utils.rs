use chrono::{DateTime, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

// ── System timezone detection ─────────────────────────────────────────────────

/// Detect the IANA timezone name of the running system.
///
/// Uses the `iana-time-zone` crate directly – no subprocess calls.
/// Falls back to `"UTC"` if detection fails.
pub fn get_system_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_string())
}

// ── TimezoneHandler ───────────────────────────────────────────────────────────

/// Parses provider timestamps and maps instants onto local calendar keys.
#[derive(Debug, Clone, Copy)]
pub struct TimezoneHandler {
    tz: Tz,
}

impl TimezoneHandler {
    /// Create a handler for the given IANA timezone name.
    ///
    /// `"auto"` resolves to the system timezone. Unrecognised names fall back
    /// to UTC with a warning.
    pub fn new(tz_name: &str) -> Self {
        let resolved = if tz_name == "auto" {
            get_system_timezone()
        } else {
            tz_name.to_string()
        };
        let tz = resolved.parse::<Tz>().unwrap_or_else(|_| {
            warn!(
                "TimezoneHandler: unrecognised timezone \"{}\", falling back to UTC",
                resolved
            );
            Tz::UTC
        });
        Self { tz }
    }

    /// Handler pinned to an already-parsed timezone.
    pub fn with_tz(tz: Tz) -> Self {
        Self { tz }
    }

    /// Parse an ISO 8601 / RFC 3339 timestamp string into a UTC [`DateTime`].
    ///
    /// Naive timestamps are interpreted in the handler's timezone. Returns
    /// `None` for empty strings or unrecognised formats.
    pub fn parse_timestamp(&self, s: &str) -> Option<DateTime<Utc>> {
        if s.is_empty() {
            return None;
        }

        let normalised = if let Some(stripped) = s.strip_suffix('Z') {
            format!("{}+00:00", stripped)
        } else {
            s.to_string()
        };

        if let Ok(dt) = DateTime::parse_from_rfc3339(&normalised) {
            return Some(dt.with_timezone(&Utc));
        }

        const FMTS: &[&str] = &[
            "%Y-%m-%dT%H:%M:%S%.f",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%d %H:%M:%S%.f",
            "%Y-%m-%d %H:%M:%S",
        ];
        for fmt in FMTS {
            if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, fmt) {
                use chrono::TimeZone as _;
                if let chrono::LocalResult::Single(dt) = self.tz.from_local_datetime(&naive) {
                    return Some(dt.with_timezone(&Utc));
                }
            }
        }

        warn!("TimezoneHandler: could not parse timestamp \"{}\"", s);
        None
    }

    /// Validate that `tz_name` is a recognised IANA timezone identifier.
    pub fn validate_timezone(tz_name: &str) -> bool {
        tz_name == "auto" || tz_name.parse::<Tz>().is_ok()
    }

    /// Local calendar date of `dt`.
    pub fn local_date(&self, dt: DateTime<Utc>) -> NaiveDate {
        dt.with_timezone(&self.tz).date_naive()
    }

    /// Local calendar date and hour-of-day (0–23) of `dt`.
    pub fn local_date_hour(&self, dt: DateTime<Utc>) -> (NaiveDate, usize) {
        let local = dt.with_timezone(&self.tz);
        (local.date_naive(), local.hour() as usize)
    }

    /// Expose the configured timezone.
    pub fn tz(&self) -> Tz {
        self.tz
    }
}

// ── Recency labels ────────────────────────────────────────────────────────────

/// Describe how long ago `timestamp` was, relative to `now`.
///
/// * under a minute (or in the future) → `"just now"`
/// * under an hour → `"1 min ago"`, `"N mins ago"`
/// * under a day → `"1 hour ago"`, `"N hours ago"`
/// * otherwise → `"1 day ago"`, `"N days ago"`
pub fn format_recency(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - timestamp).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }
    let (count, unit) = if secs < 3_600 {
        (secs / 60, "min")
    } else if secs < 86_400 {
        (secs / 3_600, "hour")
    } else {
        (secs / 86_400, "day")
    };
    if count == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", count, unit)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────
