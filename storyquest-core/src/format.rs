//! Formatting helpers shared across front ends.

use chrono::{DateTime, Utc};

/// Format a timestamp as relative time (e.g., "2m ago").
pub fn format_relative_time(ts: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(ts);

    if duration.num_seconds() < 0 {
        "just now".to_string()
    } else if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds())
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else if duration.num_days() < 7 {
        format!("{}d ago", duration.num_days())
    } else {
        ts.format("%b %d").to_string()
    }
}

/// Format a reading duration in whole seconds (e.g., "4m 05s").
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h {:02}m", hours, minutes)
    } else if minutes > 0 {
        format!("{}m {:02}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Format an optional duration, or "-" while a session is still running.
pub fn format_duration_opt(secs: Option<i64>) -> String {
    match secs {
        Some(secs) => format_duration(secs),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0s");
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(245), "4m 05s");
        assert_eq!(format_duration(3 * 3600 + 7 * 60 + 9), "3h 07m");
        assert_eq!(format_duration(-5), "0s");
        assert_eq!(format_duration_opt(None), "-");
    }

    #[test]
    fn test_format_relative_time() {
        let ts = Utc::now() - Duration::minutes(3);
        assert_eq!(format_relative_time(ts), "3m ago");
        assert_eq!(format_relative_time(Utc::now() + Duration::hours(1)), "just now");
    }
}
