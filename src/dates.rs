use chrono::{Datelike, NaiveDate, Weekday};

/// Weekday labels as they appear on the printed supervision sheets,
/// Sunday first.
const WEEKDAY_NAMES: [&str; 7] = [
    "الأحد",
    "الإثنين",
    "الثلاثاء",
    "الأربعاء",
    "الخميس",
    "الجمعة",
    "السبت",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamDay {
    pub weekday: String,
    pub date: String,
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    WEEKDAY_NAMES[weekday.num_days_from_sunday() as usize]
}

pub fn parse_iso_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Renders a date the way the sheets print it, DD/MM/YYYY.
pub fn to_display_date(date: NaiveDate) -> String {
    format!("{:02}/{:02}/{}", date.day(), date.month(), date.year())
}

/// DD/MM/YYYY back to YYYY-MM-DD. Rejects impossible calendar dates.
#[allow(dead_code)]
pub fn to_iso_date(display: &str) -> Option<String> {
    let mut parts = display.trim().splitn(3, '/');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(date.format("%Y-%m-%d").to_string())
}

/// Enumerates the calendar days between two ISO dates, both ends included.
/// Missing or malformed input yields an empty list rather than an error;
/// the caller simply has no exam days to schedule.
pub fn exam_days(start: &str, end: &str) -> Vec<ExamDay> {
    let (Some(start), Some(end)) = (parse_iso_date(start), parse_iso_date(end)) else {
        return Vec::new();
    };

    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(ExamDay {
            weekday: weekday_name(current.weekday()).to_string(),
            date: to_display_date(current),
        });
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}
