// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Date and time text codecs. The stored form is ISO basic (`YYYYMMDD` and
//! `YYYYMMDDTHHMMSS`); the readers also accept the legacy
//! `dd/mm/[yy]yy [hh:mm[:ss]]` form written by old generations of the
//! library, with a deprecation warning.

use crate::ValueError;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::warn;

pub fn format_date(d: &NaiveDate) -> String {
    d.format("%Y%m%d").to_string()
}

pub fn format_time(t: &NaiveDateTime) -> String {
    t.format("%Y%m%dT%H%M%S").to_string()
}

pub fn parse_date(s: &str) -> Result<NaiveDate, ValueError> {
    let s = s.trim();
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Ok(d);
    }
    // ISO extended is accepted and rewritten in basic form on save
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d);
    }
    if let Some((d, rest)) = parse_legacy(s)? {
        if !rest.trim().is_empty() {
            return Err(ValueError::BadDate(
                s.to_string(),
                "trailing characters after date".to_string(),
            ));
        }
        warn!("deprecated date format '{s}', will be written back in ISO form");
        return Ok(d);
    }
    Err(ValueError::BadDate(
        s.to_string(),
        "expected YYYYMMDD or dd/mm/yyyy".to_string(),
    ))
}

pub fn parse_time(s: &str) -> Result<NaiveDateTime, ValueError> {
    let s = s.trim();
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y%m%dT%H%M%S") {
        return Ok(t);
    }
    if let Ok(t) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(t);
    }
    // a bare date is midnight of that day
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y%m%d") {
        return Ok(d.and_time(NaiveTime::default()));
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(d.and_time(NaiveTime::default()));
    }
    if let Some((d, rest)) = parse_legacy(s).map_err(date_as_time_err)? {
        warn!("deprecated time format '{s}', will be written back in ISO form");
        let rest = rest.trim();
        if rest.is_empty() {
            return Ok(d.and_time(NaiveTime::default()));
        }
        let t = parse_legacy_hms(rest)
            .ok_or_else(|| ValueError::BadTime(s.to_string(), "bad hh:mm[:ss]".to_string()))?;
        return Ok(d.and_time(t));
    }
    Err(ValueError::BadTime(
        s.to_string(),
        "expected YYYYMMDDTHHMMSS or dd/mm/yyyy hh:mm[:ss]".to_string(),
    ))
}

fn date_as_time_err(e: ValueError) -> ValueError {
    match e {
        ValueError::BadDate(s, why) => ValueError::BadTime(s, why),
        other => other,
    }
}

/// `dd/mm/[yy]yy`, returning the remainder of the input after the year.
/// Returns `Ok(None)` when the input does not look legacy at all (no `/`),
/// so the caller can produce its own diagnostic.
fn parse_legacy(s: &str) -> Result<Option<(NaiveDate, &str)>, ValueError> {
    if !s.contains('/') {
        return Ok(None);
    }
    let bad = |why: &str| ValueError::BadDate(s.to_string(), why.to_string());

    let (day, s1) = lead_number(s).ok_or_else(|| bad("failed to find the day"))?;
    let s1 = s1.strip_prefix('/').ok_or_else(|| bad("failed to find the day"))?;
    if day == 0 || day > 31 {
        return Err(bad("bad day"));
    }
    let (month, s2) = lead_number(s1).ok_or_else(|| bad("failed to find the month"))?;
    let s2 = s2
        .strip_prefix('/')
        .ok_or_else(|| bad("failed to find the month"))?;
    if month == 0 || month > 12 {
        return Err(bad("bad month"));
    }
    let (year, rest) = lead_number(s2).ok_or_else(|| bad("failed to find the year"))?;

    // two-digit year windowing as the old reader did it
    let year = if year < 70 {
        year + 2000
    } else if year < 100 {
        year + 1900
    } else {
        year
    };

    let d = NaiveDate::from_ymd_opt(year as i32, month, day)
        .ok_or_else(|| bad("no such calendar day"))?;
    Ok(Some((d, rest)))
}

fn parse_legacy_hms(s: &str) -> Option<NaiveTime> {
    let (hour, s) = lead_number(s)?;
    let s = s.strip_prefix(':')?;
    let (min, s) = lead_number(s)?;
    let sec = match s.strip_prefix(':') {
        Some(s) => lead_number(s)?.0,
        None if s.is_empty() => 0,
        None => return None,
    };
    NaiveTime::from_hms_opt(hour, min, sec)
}

fn lead_number(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let n = s[..end].parse().ok()?;
    Some((n, &s[end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_basic_round_trip() {
        let d = parse_date("20240131").unwrap();
        assert_eq!(format_date(&d), "20240131");

        let t = parse_time("20240131T101502").unwrap();
        assert_eq!(format_time(&t), "20240131T101502");
    }

    #[test]
    fn legacy_date_forms() {
        assert_eq!(parse_date("31/1/2024").unwrap(), parse_date("20240131").unwrap());
        // two-digit year windowing
        assert_eq!(parse_date("1/2/99").unwrap(), parse_date("19990201").unwrap());
        assert_eq!(parse_date("1/2/05").unwrap(), parse_date("20050201").unwrap());
    }

    #[test]
    fn legacy_time_forms() {
        let t = parse_time("31/1/2024 10:15:02").unwrap();
        assert_eq!(format_time(&t), "20240131T101502");
        // seconds are optional
        let t = parse_time("31/1/2024 10:15").unwrap();
        assert_eq!(format_time(&t), "20240131T101500");
        // so is the whole time-of-day
        let t = parse_time("31/1/2024").unwrap();
        assert_eq!(format_time(&t), "20240131T000000");
    }

    #[test]
    fn bad_forms_are_rejected() {
        assert!(parse_date("32/1/2024").is_err());
        assert!(parse_date("1/13/2024").is_err());
        assert!(parse_date("20241331").is_err());
        assert!(parse_time("31/1/2024 25:00").is_err());
        assert!(parse_date("garbage").is_err());
    }
}
