//! Display helpers for the challan lookup response.

use chrono::{NaiveDate, NaiveTime};

/// Keep the first letter of each word: `Rahul Kumar` becomes `R*** K***`.
pub fn mask_name(name: Option<&str>) -> String {
    let masked: Vec<String> = name
        .unwrap_or_default()
        .split_whitespace()
        .filter_map(|part| part.chars().next())
        .map(|first| format!("{}***", first))
        .collect();

    if masked.is_empty() {
        "Unknown".to_string()
    } else {
        masked.join(" ")
    }
}

/// `12 Oct 2023`, or `N/A` when the date is unknown.
pub fn format_date(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format("%d %b %Y").to_string())
        .unwrap_or_else(|| "N/A".to_string())
}

/// `HH:MM`, or `00:00` when the time is unknown.
pub fn format_time(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M").to_string())
        .unwrap_or_else(|| "00:00".to_string())
}
