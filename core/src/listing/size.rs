/*
 * size.rs
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

//! Size column parsing: bare byte counts are exact, a unit letter makes the value approximate.

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedSize {
    pub bytes: u64,
    /// A whole byte count with no unit (`2048`, `1.0`).
    pub authoritative: bool,
    /// A K/M/G/T/P/E multiplier was applied.
    pub unit_applied: bool,
}

fn multiplier(unit: char) -> Option<u32> {
    Some(match unit.to_ascii_uppercase() {
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        'P' => 5,
        'E' => 6,
        _ => return None,
    })
}

/// Parse `2048`, `1.5K`, `3 MB`, `12KiB`. `-` and empty mean no size.
pub fn parse_size(text: &str) -> Result<Option<ParsedSize>> {
    let t = text.trim();
    if t.is_empty() || t == "-" {
        return Ok(None);
    }
    let bad = || Error::BadSize(t.to_string());
    let num_end = t
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(t.len());
    let (number, suffix) = t.split_at(num_end);
    let number = number.replace(',', "");
    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number.as_str(), ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return Err(bad());
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad());
    }
    let suffix = suffix.trim();
    let mut chars = suffix.chars();
    let (power, rest) = match chars.next() {
        None => (0, ""),
        Some(c) => match multiplier(c) {
            Some(p) => (p, chars.as_str()),
            None => (0, suffix),
        },
    };
    let rest = rest.trim_start_matches(['i', 'I']);
    if !matches!(rest, "" | "B" | "b" | "bytes" | "Bytes" | "byte") {
        return Err(bad());
    }
    let mult: u128 = 1u128 << (10 * power);
    let int: u128 = if int_part.is_empty() {
        0
    } else {
        int_part.parse::<u128>().map_err(|_| bad())?
    };
    let frac_digits = &frac_part[..frac_part.len().min(18)];
    let (frac, scale) = if frac_digits.is_empty() {
        (0u128, 1u128)
    } else {
        (
            frac_digits.parse::<u128>().map_err(|_| bad())?,
            10u128.pow(frac_digits.len() as u32),
        )
    };
    let total = int
        .checked_mul(mult)
        .and_then(|v| v.checked_add(frac * mult / scale))
        .ok_or_else(bad)?;
    let bytes = u64::try_from(total).map_err(|_| bad())?;
    Ok(Some(ParsedSize {
        bytes,
        authoritative: power == 0 && frac_part.bytes().all(|b| b == b'0'),
        unit_applied: power > 0,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(s: &str) -> ParsedSize {
        parse_size(s).unwrap().unwrap()
    }

    #[test]
    fn bare_number_is_exact() {
        let s = size("2048");
        assert_eq!(s.bytes, 2048);
        assert!(s.authoritative);
        assert!(!s.unit_applied);
        assert_eq!(size("1,234,567 bytes").bytes, 1234567);
    }

    #[test]
    fn whole_decimal_without_unit_is_exact() {
        let s = size("1.0");
        assert_eq!(s.bytes, 1);
        assert!(s.authoritative);
        assert!(size("2048.00 bytes").authoritative);
        let half = size("1.5");
        assert_eq!(half.bytes, 1);
        assert!(!half.authoritative);
        assert!(!size("1.0K").authoritative);
    }

    #[test]
    fn units_are_powers_of_1024() {
        let s = size("1.5K");
        assert_eq!(s.bytes, 1536);
        assert!(!s.authoritative);
        assert!(s.unit_applied);
        assert_eq!(size("1024K").bytes, size("1M").bytes);
        assert_eq!(size("2 G").bytes, 2 << 30);
        assert_eq!(size("1T").bytes, 1 << 40);
        assert_eq!(size("1P").bytes, 1 << 50);
        assert_eq!(size("1E").bytes, 1 << 60);
        assert_eq!(size("3 MB").bytes, 3 << 20);
        assert_eq!(size("12KiB").bytes, 12 << 10);
        assert_eq!(size("0.5k").bytes, 512);
    }

    #[test]
    fn dash_means_unknown() {
        assert_eq!(parse_size(" - ").unwrap(), None);
        assert_eq!(parse_size("").unwrap(), None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(parse_size("abc"), Err(Error::BadSize(_))));
        assert!(matches!(parse_size("12Q"), Err(Error::BadSize(_))));
        assert!(matches!(parse_size("16E"), Err(Error::BadSize(_))));
    }
}
