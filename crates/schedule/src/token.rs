//! The `@…` schedule token grammar and next-occurrence computation.
//!
//! Tokens are parsed from single words (without the leading `@`). Next
//! occurrences are computed in an arbitrary [`chrono::TimeZone`]; local
//! instants that fall into a DST gap advance to the next valid instant.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone,
    Weekday,
};

use crate::ScheduleError;

/// Candidate cap when searching for an instant that passes filter tokens.
const MAX_FILTER_ITERATIONS: u32 = 366;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativeDay {
    Today,
    Tomorrow,
    Yesterday,
}

/// Filter tokens constrain which firings of a schedule token are permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterToken {
    Weekdays,
    Weekends,
}

impl FilterToken {
    pub fn allows(&self, day: Weekday) -> bool {
        let weekend = matches!(day, Weekday::Sat | Weekday::Sun);
        match self {
            FilterToken::Weekdays => !weekend,
            FilterToken::Weekends => weekend,
        }
    }
}

/// One parsed schedule token.
#[derive(Debug, Clone, PartialEq)]
pub enum ScheduleToken {
    Relative(RelativeDay),
    Weekday(Weekday),
    Date(NaiveDate),
    Time(NaiveTime),
    Offset(Duration),
    Daily(NaiveTime),
    Weekly(Vec<Weekday>, Option<NaiveTime>),
    Monthly(u32, Option<NaiveTime>),
    /// Month, day-of-month.
    Yearly(u32, u32, Option<NaiveTime>),
    Filter(FilterToken),
}

impl ScheduleToken {
    /// Recurring tokens reschedule after each firing; the rest fire once.
    pub fn is_recurring(&self) -> bool {
        matches!(
            self,
            ScheduleToken::Daily(_)
                | ScheduleToken::Weekly(_, _)
                | ScheduleToken::Monthly(_, _)
                | ScheduleToken::Yearly(_, _, _)
        )
    }

    /// Next occurrence strictly governed by the token, given `now` in the
    /// scheduling timezone. `None` for filter tokens and unrepresentable
    /// dates.
    pub fn next_occurrence<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = now.timezone();
        let today = now.date_naive();
        let midnight = NaiveTime::from_hms_opt(0, 0, 0)?;

        match self {
            ScheduleToken::Relative(rel) => {
                let date = match rel {
                    RelativeDay::Today => today,
                    RelativeDay::Tomorrow => today.succ_opt()?,
                    RelativeDay::Yesterday => today.pred_opt()?,
                };
                Some(resolve_local(&tz, date.and_time(midnight)))
            }
            ScheduleToken::Weekday(wd) => {
                let gap = day_gap(today.weekday(), *wd);
                let date = today + Duration::days(gap);
                Some(resolve_local(&tz, date.and_time(midnight)))
            }
            ScheduleToken::Date(date) => Some(resolve_local(&tz, date.and_time(midnight))),
            ScheduleToken::Time(t) | ScheduleToken::Daily(t) => {
                let cand = resolve_local(&tz, today.and_time(*t));
                if cand > *now {
                    Some(cand)
                } else {
                    Some(resolve_local(&tz, today.succ_opt()?.and_time(*t)))
                }
            }
            ScheduleToken::Offset(dur) => Some(now.clone() + *dur),
            ScheduleToken::Weekly(days, time) => {
                let t = time.unwrap_or(midnight);
                let mut best: Option<DateTime<Tz>> = None;
                for wd in days {
                    let gap = day_gap(today.weekday(), *wd);
                    let date = today + Duration::days(gap);
                    let mut cand = resolve_local(&tz, date.and_time(t));
                    if cand <= *now {
                        // Today's scheduled time already passed.
                        cand = resolve_local(&tz, (date + Duration::days(7)).and_time(t));
                    }
                    best = match best {
                        Some(b) if b <= cand => Some(b),
                        _ => Some(cand),
                    };
                }
                best
            }
            ScheduleToken::Monthly(day, time) => {
                let t = time.unwrap_or(midnight);
                let mut year = today.year();
                let mut month = today.month();
                // Bounded walk; a valid day-of-month resolves within a year.
                for _ in 0..24 {
                    let dom = (*day).min(days_in_month(year, month)?);
                    let date = NaiveDate::from_ymd_opt(year, month, dom)?;
                    let cand = resolve_local(&tz, date.and_time(t));
                    if cand > *now {
                        return Some(cand);
                    }
                    if month == 12 {
                        year += 1;
                        month = 1;
                    } else {
                        month += 1;
                    }
                }
                None
            }
            ScheduleToken::Yearly(month, day, time) => {
                let t = time.unwrap_or(midnight);
                for year in today.year()..=today.year() + 1 {
                    let dom = (*day).min(days_in_month(year, *month)?);
                    let date = NaiveDate::from_ymd_opt(year, *month, dom)?;
                    let cand = resolve_local(&tz, date.and_time(t));
                    if cand > *now {
                        return Some(cand);
                    }
                }
                None
            }
            ScheduleToken::Filter(_) => None,
        }
    }
}

/// Next occurrence under filter-token constraints: candidates that land on
/// a rejected day are advanced one second past and retried, capped to avoid
/// pathological loops.
pub fn next_occurrence_filtered<Tz: TimeZone>(
    token: &ScheduleToken,
    filters: &[FilterToken],
    now: &DateTime<Tz>,
) -> Result<DateTime<Tz>, ScheduleError> {
    if matches!(token, ScheduleToken::Filter(_)) {
        return Err(ScheduleError::NoOccurrence);
    }
    let mut after = now.clone();
    for _ in 0..MAX_FILTER_ITERATIONS {
        let cand = token
            .next_occurrence(&after)
            .ok_or_else(|| ScheduleError::Parse("token has no computable occurrence".into()))?;
        if filters.iter().all(|f| f.allows(cand.weekday())) {
            return Ok(cand);
        }
        after = cand + Duration::seconds(1);
    }
    Err(ScheduleError::FilterExhausted(MAX_FILTER_ITERATIONS))
}

/// Parse one token word (without the leading `@`). First match wins:
/// relative → weekday → ISO date → time → offset → daily → weekly →
/// monthly → yearly → filter.
pub fn parse_token(word: &str) -> Result<ScheduleToken, ScheduleError> {
    let lower = word.to_lowercase();

    match lower.as_str() {
        "today" => return Ok(ScheduleToken::Relative(RelativeDay::Today)),
        "tomorrow" => return Ok(ScheduleToken::Relative(RelativeDay::Tomorrow)),
        "yesterday" => return Ok(ScheduleToken::Relative(RelativeDay::Yesterday)),
        "weekdays" => return Ok(ScheduleToken::Filter(FilterToken::Weekdays)),
        "weekends" => return Ok(ScheduleToken::Filter(FilterToken::Weekends)),
        _ => {}
    }

    if let Some(wd) = parse_weekday(&lower) {
        return Ok(ScheduleToken::Weekday(wd));
    }
    if let Ok(date) = NaiveDate::parse_from_str(&lower, "%Y-%m-%d") {
        return Ok(ScheduleToken::Date(date));
    }
    if let Some(t) = parse_time(&lower) {
        return Ok(ScheduleToken::Time(t));
    }
    if let Some(dur) = parse_offset(&lower) {
        return Ok(ScheduleToken::Offset(dur));
    }
    if let Some(body) = lower.strip_prefix("daily:") {
        let t = parse_time(body)
            .ok_or_else(|| ScheduleError::Parse(format!("invalid time in daily token: {word}")))?;
        return Ok(ScheduleToken::Daily(t));
    }
    if let Some(body) = lower.strip_prefix("weekly:") {
        return parse_weekly(body, word);
    }
    if let Some(body) = lower.strip_prefix("monthly:") {
        return parse_monthly(body, word);
    }
    if let Some(body) = lower.strip_prefix("yearly:") {
        return parse_yearly(body, word);
    }

    Err(ScheduleError::Parse(format!("unrecognized schedule token: @{word}")))
}

fn parse_weekday(s: &str) -> Option<Weekday> {
    match s {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

/// `9am`, `9:30pm`, `14:00`. Bare numbers without am/pm are not times.
fn parse_time(s: &str) -> Option<NaiveTime> {
    let (body, meridiem) = if let Some(b) = s.strip_suffix("am") {
        (b, Some(false))
    } else if let Some(b) = s.strip_suffix("pm") {
        (b, Some(true))
    } else {
        (s, None)
    };

    let (hour_str, min_str) = match body.split_once(':') {
        Some((h, m)) => (h, Some(m)),
        None => (body, None),
    };
    if hour_str.is_empty() || !hour_str.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = match min_str {
        Some(m) => {
            if m.len() != 2 || !m.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            m.parse().ok()?
        }
        None => 0,
    };

    match meridiem {
        Some(is_pm) => {
            if !(1..=12).contains(&hour) || minute > 59 {
                return None;
            }
            let h24 = match (hour, is_pm) {
                (12, false) => 0,
                (12, true) => 12,
                (h, true) => h + 12,
                (h, false) => h,
            };
            NaiveTime::from_hms_opt(h24, minute, 0)
        }
        None => {
            // 24-hour form requires the minutes.
            min_str?;
            if hour > 23 || minute > 59 {
                return None;
            }
            NaiveTime::from_hms_opt(hour, minute, 0)
        }
    }
}

/// `in:<n><unit>` with units h/hour(s), m/min(s)/minute(s), d/day(s), w/week(s).
fn parse_offset(s: &str) -> Option<Duration> {
    let body = s.strip_prefix("in:")?;
    let digits_end = body.find(|c: char| !c.is_ascii_digit())?;
    if digits_end == 0 {
        return None;
    }
    let n: i64 = body[..digits_end].parse().ok()?;
    match &body[digits_end..] {
        "h" | "hour" | "hours" => Some(Duration::hours(n)),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(Duration::minutes(n)),
        "d" | "day" | "days" => Some(Duration::days(n)),
        "w" | "week" | "weeks" => Some(Duration::weeks(n)),
        _ => None,
    }
}

/// `weekly:<days>[:<time>]`. A `:` is a time separator only if what
/// follows parses as a time; candidates are tried rightmost-first so that
/// `sat:14:30` still finds its 24-hour time.
fn parse_weekly(body: &str, word: &str) -> Result<ScheduleToken, ScheduleError> {
    let mut days_part = body;
    let mut time = None;
    for (pos, _) in body.char_indices().rev().filter(|(_, c)| *c == ':') {
        if let Some(t) = parse_time(&body[pos + 1..]) {
            days_part = &body[..pos];
            time = Some(t);
            break;
        }
    }

    let mut days = Vec::new();
    for part in days_part.split(',') {
        let part = part.trim();
        let wd = parse_weekday(part).ok_or_else(|| {
            ScheduleError::Parse(format!("invalid weekday '{part}' in token: @{word}"))
        })?;
        if !days.contains(&wd) {
            days.push(wd);
        }
    }
    if days.is_empty() {
        return Err(ScheduleError::Parse(format!("no weekdays in token: @{word}")));
    }
    Ok(ScheduleToken::Weekly(days, time))
}

/// `monthly:<day>[:<time>]` with optional st/nd/rd/th suffix, day 1–31.
fn parse_monthly(body: &str, word: &str) -> Result<ScheduleToken, ScheduleError> {
    let (day_part, time) = match body.split_once(':') {
        Some((d, rest)) => {
            let t = parse_time(rest).ok_or_else(|| {
                ScheduleError::Parse(format!("invalid time in monthly token: @{word}"))
            })?;
            (d, Some(t))
        }
        None => (body, None),
    };

    let digits = day_part
        .strip_suffix("st")
        .or_else(|| day_part.strip_suffix("nd"))
        .or_else(|| day_part.strip_suffix("rd"))
        .or_else(|| day_part.strip_suffix("th"))
        .unwrap_or(day_part);
    let day: u32 = digits
        .parse()
        .map_err(|_| ScheduleError::Parse(format!("invalid day in monthly token: @{word}")))?;
    if !(1..=31).contains(&day) {
        return Err(ScheduleError::Parse(format!(
            "day of month out of range in token: @{word}"
        )));
    }
    Ok(ScheduleToken::Monthly(day, time))
}

/// `yearly:<mon>-<day>[:<time>]` with month as name, 3-letter abbreviation,
/// or 1–12.
fn parse_yearly(body: &str, word: &str) -> Result<ScheduleToken, ScheduleError> {
    let (date_part, time) = match body.split_once(':') {
        Some((d, rest)) => {
            let t = parse_time(rest).ok_or_else(|| {
                ScheduleError::Parse(format!("invalid time in yearly token: @{word}"))
            })?;
            (d, Some(t))
        }
        None => (body, None),
    };

    let (mon_part, day_part) = date_part.split_once('-').ok_or_else(|| {
        ScheduleError::Parse(format!("expected <month>-<day> in yearly token: @{word}"))
    })?;
    let month = parse_month(mon_part).ok_or_else(|| {
        ScheduleError::Parse(format!("invalid month '{mon_part}' in token: @{word}"))
    })?;
    let day: u32 = day_part
        .parse()
        .map_err(|_| ScheduleError::Parse(format!("invalid day in yearly token: @{word}")))?;
    if !(1..=31).contains(&day) {
        return Err(ScheduleError::Parse(format!(
            "day of month out of range in token: @{word}"
        )));
    }
    Ok(ScheduleToken::Yearly(month, day, time))
}

fn parse_month(s: &str) -> Option<u32> {
    if let Ok(n) = s.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    let months = [
        "january", "february", "march", "april", "may", "june", "july", "august", "september",
        "october", "november", "december",
    ];
    for (i, full) in months.iter().enumerate() {
        if s == *full || (s.len() == 3 && full.starts_with(s)) {
            return Some(i as u32 + 1);
        }
    }
    None
}

/// Days until the next occurrence of `target`, counting today as zero.
fn day_gap(from: Weekday, target: Weekday) -> i64 {
    (target.num_days_from_monday() as i64 - from.num_days_from_monday() as i64).rem_euclid(7)
}

fn days_in_month(year: i32, month: u32) -> Option<u32> {
    let (ny, nm) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    Some(NaiveDate::from_ymd_opt(ny, nm, 1)?.pred_opt()?.day())
}

/// Map a naive local datetime into the timezone, advancing minute by minute
/// out of DST gaps. Ambiguous instants take the earlier offset.
fn resolve_local<Tz: TimeZone>(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    let mut n = naive;
    for _ in 0..240 {
        match tz.from_local_datetime(&n) {
            LocalResult::Single(dt) => return dt,
            LocalResult::Ambiguous(earlier, _) => return earlier,
            LocalResult::None => n += Duration::minutes(1),
        }
    }
    // Gaps longer than four hours do not occur in real timezones.
    tz.from_utc_datetime(&naive)
}
