//! Human-readable duration formatting for status text and logs

use std::time::Duration;

/// Format selection thresholds (seconds)
const SHORT_FORMAT_MAX: u64 = 100; // < 100s → X.Xs
const MEDIUM_FORMAT_MAX: u64 = 6000; // < 100m → M:SS
                                     // >= 100m → H:MM:SS

/// Format a duration for display.
///
/// - Short format (`X.Xs`): under 100 seconds
/// - Medium format (`M:SS`): 100 seconds to 100 minutes
/// - Long format (`H:MM:SS`): anything longer
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use catsw_common::human_time::format_duration;
///
/// assert_eq!(format_duration(Duration::from_millis(4_250)), "4.2s");
/// assert_eq!(format_duration(Duration::from_secs(330)), "5:30");
/// assert_eq!(format_duration(Duration::from_secs(7_261)), "2:01:01");
/// ```
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();

    if secs < SHORT_FORMAT_MAX {
        // Truncate rather than round so a countdown never shows more time than is left
        let tenths = duration.as_millis() / 100;
        format!("{}.{}s", tenths / 10, tenths % 10)
    } else if secs < MEDIUM_FORMAT_MAX {
        format!("{}:{:02}", secs / 60, secs % 60)
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        format!("{}:{:02}:{:02}", hours, mins, secs % 60)
    }
}

/// Format `Option<Duration>`; `None` renders as "-"
pub fn format_duration_opt(duration: Option<Duration>) -> String {
    match duration {
        Some(d) => format_duration(d),
        None => "-".to_string(),
    }
}
