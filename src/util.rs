use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;

/// Korean Standard Time, the community's local clock
pub(crate) fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).expect("+09:00 is a valid offset")
}

static SCHEDULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<year>\d{4})-(?P<month>\d{1,2})-(?P<day>\d{1,2})\s+)?(?P<hour>\d{1,2}):(?P<minute>\d{2})$")
        .expect("schedule regex is valid")
});

/// Parses a start time typed by a user in KST.
///
/// Accepts `HH:MM`, meaning the next time the clock shows that time (today or
/// tomorrow), or a full `YYYY-MM-DD HH:MM`. Returns `None` for anything else,
/// including dates that don't exist.
pub(crate) fn parse_kst_schedule(input: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let caps = SCHEDULE_RE.captures(input.trim())?;

    let hour: u32 = caps["hour"].parse().ok()?;
    let minute: u32 = caps["minute"].parse().ok()?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let now_kst = now.with_timezone(&kst());

    let date = match (caps.name("year"), caps.name("month"), caps.name("day")) {
        (Some(year), Some(month), Some(day)) => NaiveDate::from_ymd_opt(
            year.as_str().parse().ok()?,
            month.as_str().parse().ok()?,
            day.as_str().parse().ok()?,
        )?,
        _ => {
            let today = now_kst.date_naive();
            if time > now_kst.time() {
                today
            } else {
                today.succ_opt()?
            }
        }
    };

    kst()
        .from_local_datetime(&date.and_time(time))
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

pub(crate) fn format_kst(datetime: DateTime<Utc>) -> String {
    let local = datetime.with_timezone(&kst());
    let today = Utc::now().with_timezone(&kst());

    if local.year() == today.year() && local.ordinal() == today.ordinal() {
        local.format("%H:%M KST").to_string()
    } else {
        local.format("%Y-%m-%d %H:%M KST").to_string()
    }
}

/// Discord timestamp markup, rendered in each viewer's own timezone
pub(crate) fn discord_timestamp(datetime: DateTime<Utc>, style: char) -> String {
    format!("<t:{}:{}>", datetime.timestamp(), style)
}

pub(crate) fn minutes_until(datetime: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (datetime - now).num_minutes().max(0)
}

pub(crate) fn duration_from_minutes(minutes: u32) -> chrono::Duration {
    chrono::Duration::minutes(i64::from(minutes))
}
