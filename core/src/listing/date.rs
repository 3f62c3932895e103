/*
 * date.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Filedist, an automatic file-distribution system.
 *
 * Filedist is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Filedist is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Filedist.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Date column parsing. Every accepted form reports the smallest unit it resolves.

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::error::{Error, Result};
use crate::protocol::http::parse_http_date;

/// Resolution of a listing date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DatePrecision {
    #[default]
    None,
    Day,
    Minute,
    Second,
}

impl DatePrecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatePrecision::None => "none",
            DatePrecision::Day => "day",
            DatePrecision::Minute => "minute",
            DatePrecision::Second => "second",
        }
    }
}

const SECOND_FORMATS: &[&str] = &[
    "%d-%b-%Y %H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%d %b %Y %H:%M:%S",
    "%b %d %Y %H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
];

const MINUTE_FORMATS: &[&str] = &[
    "%d-%b-%Y %H:%M",
    "%Y-%m-%d %H:%M",
    "%d %b %Y %H:%M",
    "%b %d %Y %H:%M",
    "%Y/%m/%d %H:%M",
    "%d-%b-%y %H:%M",
];

const DAY_FORMATS: &[&str] = &["%d-%b-%Y", "%Y-%m-%d", "%b %d %Y", "%d %b %Y", "%Y/%m/%d"];

/// Parse a listing date into UTC unix seconds and its resolution. `now` places year-less
/// `Mon DD HH:MM` dates in the last twelve months.
pub fn parse_date(text: &str, now: i64) -> Result<(i64, DatePrecision)> {
    let t = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if t.contains('T') {
        if let Ok(dt) = DateTime::parse_from_rfc3339(&t) {
            return Ok((dt.timestamp(), DatePrecision::Second));
        }
    }
    for fmt in SECOND_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&t, fmt) {
            return Ok((dt.and_utc().timestamp(), DatePrecision::Second));
        }
    }
    for fmt in MINUTE_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&t, fmt) {
            return Ok((dt.and_utc().timestamp(), DatePrecision::Minute));
        }
    }
    for fmt in DAY_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(&t, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Ok((dt.and_utc().timestamp(), DatePrecision::Day));
            }
        }
    }
    if let Some(ts) = year_less(&t, now) {
        return Ok((ts, DatePrecision::Minute));
    }
    if let Some(ts) = parse_http_date(&t) {
        return Ok((ts, DatePrecision::Second));
    }
    Err(Error::BadDate(t))
}

/// `Jan 01 12:00` as printed by ls for recent files.
fn year_less(t: &str, now: i64) -> Option<i64> {
    let now = Utc.timestamp_opt(now, 0).single()?;
    let with_year = format!("{} {}", t, now.year());
    let dt = NaiveDateTime::parse_from_str(&with_year, "%b %d %H:%M %Y").ok()?;
    let ts = dt.and_utc().timestamp();
    if ts > now.timestamp() + 86_400 {
        let prev = format!("{} {}", t, now.year() - 1);
        return NaiveDateTime::parse_from_str(&prev, "%b %d %H:%M %Y")
            .ok()
            .map(|d| d.and_utc().timestamp());
    }
    Some(ts)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_600_000_000; // 2020-09-13

    #[test]
    fn precision_of_each_form() {
        assert_eq!(parse_date("Jan 01 1970", NOW).unwrap(), (0, DatePrecision::Day));
        assert_eq!(parse_date("01-Jan-1970 00:00", NOW).unwrap(), (0, DatePrecision::Minute));
        assert_eq!(parse_date("1970-01-01T00:00:00Z", NOW).unwrap(), (0, DatePrecision::Second));
    }

    #[test]
    fn common_listing_forms() {
        assert_eq!(
            parse_date("01-Jan-2020 12:00", NOW).unwrap(),
            (1_577_880_000, DatePrecision::Minute)
        );
        assert_eq!(
            parse_date("2020-01-01  12:00:30", NOW).unwrap(),
            (1_577_880_030, DatePrecision::Second)
        );
        assert_eq!(
            parse_date("2020-01-01T12:00:00.000Z", NOW).unwrap(),
            (1_577_880_000, DatePrecision::Second)
        );
        assert_eq!(parse_date("2020-01-01", NOW).unwrap().1, DatePrecision::Day);
        assert_eq!(
            parse_date("Wed, 01 Jan 2020 12:00:00 GMT", NOW).unwrap(),
            (1_577_880_000, DatePrecision::Second)
        );
    }

    #[test]
    fn year_less_dates_stay_in_the_past() {
        let (ts, p) = parse_date("Sep 01 10:00", NOW).unwrap();
        assert_eq!(p, DatePrecision::Minute);
        assert!(ts < NOW && NOW - ts < 31 * 86_400);
        let (ts, _) = parse_date("Dec 24 18:00", NOW).unwrap();
        assert!(ts < NOW);
    }

    #[test]
    fn garbage_is_bad_date() {
        assert!(matches!(parse_date("yesterday-ish", NOW), Err(Error::BadDate(_))));
    }
}
