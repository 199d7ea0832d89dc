//! Blocked-window arithmetic.
//!
//! A reservation blocks its table from `arrival - pre_hold` until
//! `arrival + dine_duration + post_buffer`. All instants are naive local
//! civil time encoded as [`Ms`].

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::engine::EngineError;
use crate::limits::*;
use crate::model::{MINUTE_MS, Ms, Span};

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIME_FORMATS: [&str; 2] = ["%H:%M:%S", "%H:%M"];

/// Buffer durations in minutes. Read once at startup and passed in explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pre_hold_minutes: u32,
    dine_duration_minutes: u32,
    post_buffer_minutes: u32,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            pre_hold_minutes: 60,
            dine_duration_minutes: 90,
            post_buffer_minutes: 10,
        }
    }
}

impl BufferConfig {
    pub fn new(
        pre_hold_minutes: u32,
        dine_duration_minutes: u32,
        post_buffer_minutes: u32,
    ) -> Result<Self, EngineError> {
        for (name, value) in [
            ("pre-hold", pre_hold_minutes),
            ("dine duration", dine_duration_minutes),
            ("post buffer", post_buffer_minutes),
        ] {
            if value == 0 {
                return Err(EngineError::InvalidInput(format!(
                    "{name} must be a positive number of minutes"
                )));
            }
            if value > MAX_BUFFER_MINUTES {
                return Err(EngineError::LimitExceeded("buffer duration too long"));
            }
        }
        Ok(Self {
            pre_hold_minutes,
            dine_duration_minutes,
            post_buffer_minutes,
        })
    }

    pub fn pre_hold_minutes(&self) -> u32 {
        self.pre_hold_minutes
    }

    pub fn dine_duration_minutes(&self) -> u32 {
        self.dine_duration_minutes
    }

    pub fn post_buffer_minutes(&self) -> u32 {
        self.post_buffer_minutes
    }

    /// Length of every window this config produces.
    pub fn total_ms(&self) -> Ms {
        (self.pre_hold_minutes as Ms + self.dine_duration_minutes as Ms + self.post_buffer_minutes as Ms)
            * MINUTE_MS
    }
}

/// Compute the blocked window for a reservation.
///
/// If `time` is given it wins and is combined with the calendar date of
/// `date`. Without `time`, a time-of-day carried by `date` is used as-is and a
/// plain date means midnight.
pub fn compute_window(date: &str, time: Option<&str>, buffers: &BufferConfig) -> Result<Span, EngineError> {
    let arrival = civil_ms(parse_arrival(date, time)?);
    let from = arrival - buffers.pre_hold_minutes as Ms * MINUTE_MS;
    let until = arrival
        + (buffers.dine_duration_minutes as Ms + buffers.post_buffer_minutes as Ms) * MINUTE_MS;
    if from < MIN_VALID_TIMESTAMP_MS || until > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(from, until))
}

/// Planned arrival, truncated to the minute.
pub fn parse_arrival(date: &str, time: Option<&str>) -> Result<NaiveDateTime, EngineError> {
    let (day, carried) = parse_date_value(date.trim())?;
    let tod = match time.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => parse_time(t)?,
        None => carried.unwrap_or(NaiveTime::MIN),
    };
    let tod = NaiveTime::from_hms_opt(tod.hour(), tod.minute(), 0).unwrap_or(NaiveTime::MIN);
    Ok(day.and_time(tod))
}

fn parse_date_value(s: &str) -> Result<(NaiveDate, Option<NaiveTime>), EngineError> {
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok((d, None));
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|dt| (dt.date(), Some(dt.time())))
        .ok_or_else(|| EngineError::InvalidInput(format!("invalid reservation date: {s:?}")))
}

fn parse_time(s: &str) -> Result<NaiveTime, EngineError> {
    TIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveTime::parse_from_str(s, fmt).ok())
        .ok_or_else(|| EngineError::InvalidInput(format!("invalid reservation time: {s:?}")))
}

pub fn civil_ms(dt: NaiveDateTime) -> Ms {
    dt.and_utc().timestamp_millis()
}

pub fn from_civil_ms(ms: Ms) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.naive_utc())
}

/// Wall-clock now, as local civil time.
pub fn now_ms() -> Ms {
    civil_ms(chrono::Local::now().naive_local())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> Ms {
        civil_ms(NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M").unwrap())
    }

    #[test]
    fn default_buffers_dinner_at_six() {
        let w = compute_window("2025-01-01", Some("18:00"), &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-01-01T17:00"));
        assert_eq!(w.end, at("2025-01-01T19:40"));
    }

    #[test]
    fn combined_datetime_used_as_is() {
        let w = compute_window("2025-01-01T18:00", None, &BufferConfig::default()).unwrap();
        assert_eq!(w, Span::new(at("2025-01-01T17:00"), at("2025-01-01T19:40")));

        let w = compute_window("2025-01-01 18:00:00.000", None, &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-01-01T17:00"));
    }

    #[test]
    fn separate_time_wins_over_carried_time() {
        let w = compute_window("2025-01-01T09:15", Some("18:00"), &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-01-01T17:00"));
    }

    #[test]
    fn seconds_are_truncated() {
        let w = compute_window("2025-01-01", Some("18:00:59"), &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-01-01T17:00"));
    }

    #[test]
    fn date_only_means_midnight() {
        let w = compute_window("2025-03-10", None, &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-03-09T23:00"));
        assert_eq!(w.end, at("2025-03-10T01:40"));
    }

    #[test]
    fn blank_time_treated_as_absent() {
        let w = compute_window("2025-03-10T12:00", Some("  "), &BufferConfig::default()).unwrap();
        assert_eq!(w.start, at("2025-03-10T11:00"));
    }

    #[test]
    fn window_length_matches_buffers() {
        let cases = [(1, 1, 1), (60, 90, 10), (15, 120, 30), (MAX_BUFFER_MINUTES, 1, MAX_BUFFER_MINUTES)];
        for (pre, dine, post) in cases {
            let cfg = BufferConfig::new(pre, dine, post).unwrap();
            let w = compute_window("2030-06-15", Some("12:30"), &cfg).unwrap();
            assert!(w.start < w.end);
            assert_eq!(w.duration_ms(), (pre + dine + post) as Ms * MINUTE_MS);
            assert_eq!(w.duration_ms(), cfg.total_ms());
        }
    }

    #[test]
    fn invalid_dates_rejected() {
        let cfg = BufferConfig::default();
        for bad in ["", "tomorrow", "2025-13-01", "2025-02-30", "01/02/2025", "2025-01-01T25:00"] {
            let err = compute_window(bad, Some("18:00"), &cfg).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn invalid_time_rejected() {
        let cfg = BufferConfig::default();
        for bad in ["6pm", "24:00", "18-00", "18:61"] {
            let err = compute_window("2025-01-01", Some(bad), &cfg).unwrap_err();
            assert!(matches!(err, EngineError::InvalidInput(_)), "{bad:?} -> {err:?}");
        }
    }

    #[test]
    fn buffer_config_validation() {
        assert!(matches!(BufferConfig::new(0, 90, 10), Err(EngineError::InvalidInput(_))));
        assert!(matches!(BufferConfig::new(60, 0, 10), Err(EngineError::InvalidInput(_))));
        assert!(matches!(
            BufferConfig::new(60, MAX_BUFFER_MINUTES + 1, 10),
            Err(EngineError::LimitExceeded(_))
        ));
        assert_eq!(BufferConfig::new(60, 90, 10).unwrap(), BufferConfig::default());
    }

    #[test]
    fn civil_roundtrip() {
        let ms = at("2025-07-04T20:30");
        let back = from_civil_ms(ms).unwrap();
        assert_eq!(back.to_string(), "2025-07-04 20:30:00");
    }
}
