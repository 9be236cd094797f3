use chrono::{Datelike, Months, NaiveDate, Utc};
use shared::AgeAtRecord;

pub fn parse_date(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()
}

/// Age on `today` of a child born on `birth`; zero before birth.
///
/// `days` counts from the most recent month-anniversary of the birth date,
/// clamped to the end of shorter months.
pub fn age_on(birth: NaiveDate, today: NaiveDate) -> AgeAtRecord {
    if today < birth {
        return AgeAtRecord::default();
    }

    let mut months = (today.year() - birth.year()) * 12 + today.month() as i32 - birth.month() as i32;
    if today.day() < birth.day() {
        months -= 1;
    }
    let months = months.max(0) as u32;

    let anniversary = birth.checked_add_months(Months::new(months)).unwrap_or(birth);
    let days = (today - anniversary).num_days().max(0) as u32;
    let total_days = (today - birth).num_days().max(0) as u32;

    AgeAtRecord { months, days, total_days }
}

/// Age right now; `None` when the birth date does not parse
pub fn age_today(birth_date: &str) -> Option<AgeAtRecord> {
    parse_date(birth_date).map(|birth| age_on(birth, Utc::now().date_naive()))
}
