use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};

/// This is the standard way of converting a date to a day key in stint.
/// Day keys name the per-day record batches and their files.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub fn parse_date_key(key: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(key, "%Y-%m-%d").ok()
}

/// Local-timezone calendar date of an epoch-millis timestamp. Records land in
/// the batch of the day their start time falls on, as the user saw it.
pub fn local_date_of_millis(ts: i64) -> NaiveDate {
    millis_to_local(ts).date_naive()
}

pub fn day_key_of_millis(ts: i64) -> String {
    date_key(local_date_of_millis(ts))
}

pub fn millis_to_local(ts: i64) -> DateTime<Local> {
    DateTime::<Utc>::from_timestamp_millis(ts)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        .with_timezone(&Local)
}

/// Minute of the local day in `0..1440`, used for overlap checks.
pub fn minute_of_day(ts: i64) -> u32 {
    let local = millis_to_local(ts).time();
    local.hour() * 60 + local.minute()
}

/// Whole seconds between two epoch-millis timestamps, floored.
pub fn duration_secs(start_millis: i64, end_millis: i64) -> i64 {
    (end_millis - start_millis).div_euclid(1000)
}

/// `HH:MM:SS`, all fields zero-padded.
pub fn format_clock(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

/// `Xh MMm` for totals.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    format!("{h}h {m:02}m")
}

/// `Xm SSs` for short stretches.
pub fn format_duration_short(seconds: i64) -> String {
    let seconds = seconds.max(0);
    let m = seconds / 60;
    let s = seconds % 60;
    format!("{m}m {s:02}s")
}

/// Parses a `HH:MM` wall time into a minute of day.
pub fn parse_wall_minutes(text: &str) -> Option<u32> {
    let (h, m) = text.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    if h > 23 || m > 59 {
        return None;
    }
    Some(h * 60 + m)
}

/// Epoch millis of `minute` minutes into `date` in the local timezone.
pub fn local_minutes_to_millis(date: NaiveDate, minute: u32) -> Option<i64> {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minute * 60, 0)?;
    let local = Local
        .from_local_datetime(&date.and_time(time))
        .earliest()?;
    Some(local.timestamp_millis())
}
