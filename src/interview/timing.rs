//! Interview time window.
//!
//! The window is display-only: start and end are wall-clock `HH:MM` strings
//! handed to the turn model, which decides when to wrap up. Nothing on the
//! server enforces the end time.

use chrono::{DateTime, Duration, Local, TimeZone};
use serde::{Deserialize, Serialize};

const DISPLAY_FORMAT: &str = "%H:%M";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingWindow {
    pub start_time: String,
    pub end_time: String,
}

impl TimingWindow {
    /// Window opening at `start` and lasting `minutes`.
    pub fn starting_at<Tz>(start: DateTime<Tz>, minutes: u32) -> Self
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let end = start.clone() + Duration::minutes(i64::from(minutes));
        Self {
            start_time: display_time(&start),
            end_time: display_time(&end),
        }
    }

    /// Window opening now, in server local time.
    pub fn starting_now(minutes: u32) -> Self {
        Self::starting_at(Local::now(), minutes)
    }
}

pub fn display_time<Tz>(at: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    at.format(DISPLAY_FORMAT).to_string()
}

/// Current wall-clock time as shown to the turn model.
pub fn current_display_time() -> String {
    display_time(&Local::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_window_spans_duration() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 9, 55, 0).unwrap();
        let window = TimingWindow::starting_at(start, 10);
        assert_eq!(window.start_time, "09:55");
        assert_eq!(window.end_time, "10:05");
    }

    #[test]
    fn test_window_wraps_midnight() {
        let start = Utc.with_ymd_and_hms(2025, 3, 1, 23, 50, 0).unwrap();
        let window = TimingWindow::starting_at(start, 30);
        assert_eq!(window.end_time, "00:20");
    }

    #[test]
    fn test_window_serializes_camel_case() {
        let window = TimingWindow {
            start_time: "10:00".into(),
            end_time: "10:10".into(),
        };
        let json = serde_json::to_string(&window).unwrap();
        assert_eq!(json, r#"{"startTime":"10:00","endTime":"10:10"}"#);
    }
}
