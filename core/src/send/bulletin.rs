/*
 * bulletin.rs
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

//! WMO bulletin framing for `file_name_is_header` sends.
//!
//! A framed bulletin is
//! `LLLLLLLLtt` `SOH CR CR LF` `[nnn CR CR LF]` `<header> CR CR LF` `<data>` `CR CR LF ETX`
//! where `LLLLLLLL` is the decimal length of everything after the 10-byte prefix and `tt`
//! the type indicator.

use crate::error::{Error, Result};

const SOH: u8 = 0x01;
pub const TRAILER: [u8; 4] = *b"\r\r\n\x03";
pub const PREFIX_LEN: usize = 10;
const MAX_MESSAGE_LEN: u64 = 99_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulletinType {
    Binary,
    Alphanumeric,
}

impl BulletinType {
    pub fn code(self) -> &'static str {
        match self {
            BulletinType::Binary => "BI",
            BulletinType::Alphanumeric => "AN",
        }
    }

    /// Guess from the first bytes of the payload.
    pub fn sniff(data: &[u8]) -> BulletinType {
        if data.starts_with(b"GRIB") || data.starts_with(b"BUFR") {
            return BulletinType::Binary;
        }
        let text = data
            .iter()
            .all(|&b| b == b'\r' || b == b'\n' || b == b'\t' || (0x20..0x7f).contains(&b));
        if text {
            BulletinType::Alphanumeric
        } else {
            BulletinType::Binary
        }
    }
}

/// Abbreviated heading from a file name: `SMAA01_EDZW_011200.txt` gives
/// `SMAA01 EDZW 011200`. Empty names give None.
pub fn header_from_name(name: &str) -> Option<String> {
    let stem = name.split('.').next().unwrap_or(name);
    let words: Vec<&str> = stem.split(['_', '-', ' ']).filter(|w| !w.is_empty()).collect();
    (!words.is_empty()).then(|| words.join(" "))
}

/// Everything written before and after the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Framing {
    pub prefix: Vec<u8>,
    pub trailer: [u8; 4],
}

impl Framing {
    pub fn new(header: &str, counter: Option<u32>, data_len: u64, kind: BulletinType) -> Result<Framing> {
        let mut head = vec![SOH, b'\r', b'\r', b'\n'];
        if let Some(n) = counter {
            head.extend_from_slice(format!("{:03}\r\r\n", n % 1000).as_bytes());
        }
        head.extend_from_slice(header.as_bytes());
        head.extend_from_slice(b"\r\r\n");
        let message = head.len() as u64 + data_len + TRAILER.len() as u64;
        if message > MAX_MESSAGE_LEN {
            return Err(Error::FieldOverflow {
                field: "bulletin length",
                limit: MAX_MESSAGE_LEN as usize,
            });
        }
        let mut prefix = format!("{:08}{}", message, kind.code()).into_bytes();
        prefix.extend_from_slice(&head);
        Ok(Framing {
            prefix,
            trailer: TRAILER,
        })
    }

    /// Bytes on the wire for a payload of `data_len` bytes.
    pub fn total_len(&self, data_len: u64) -> u64 {
        self.prefix.len() as u64 + data_len + self.trailer.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_from_names() {
        assert_eq!(header_from_name("SMAA01_EDZW_011200.txt").as_deref(), Some("SMAA01 EDZW 011200"));
        assert_eq!(header_from_name("FTEU50-LFPW-061100").as_deref(), Some("FTEU50 LFPW 061100"));
        assert_eq!(header_from_name(".bin"), None);
    }

    #[test]
    fn framed_layout() {
        let f = Framing::new("SMAA01 EDZW 011200", Some(7), 5, BulletinType::Alphanumeric).unwrap();
        let mut wire = f.prefix.clone();
        wire.extend_from_slice(b"hello");
        wire.extend_from_slice(&f.trailer);
        let expected_tail: &[u8] = b"\x01\r\r\n007\r\r\nSMAA01 EDZW 011200\r\r\nhello\r\r\n\x03";
        assert_eq!(&wire[..PREFIX_LEN], format!("{:08}AN", expected_tail.len()).as_bytes());
        assert_eq!(&wire[PREFIX_LEN..], expected_tail);
        assert_eq!(f.total_len(5), wire.len() as u64);
    }

    #[test]
    fn no_counter_line_without_counter() {
        let f = Framing::new("X", None, 0, BulletinType::Binary).unwrap();
        assert_eq!(&f.prefix[PREFIX_LEN..], b"\x01\r\r\nX\r\r\n");
        assert_eq!(&f.prefix[8..10], b"BI");
    }

    #[test]
    fn sniffing() {
        assert_eq!(BulletinType::sniff(b"GRIB\x00\x01"), BulletinType::Binary);
        assert_eq!(BulletinType::sniff(b"TTAA 01\r\n"), BulletinType::Alphanumeric);
        assert_eq!(BulletinType::sniff(&[0xff, 0x00]), BulletinType::Binary);
    }

    #[test]
    fn oversized_message() {
        assert!(matches!(
            Framing::new("X", None, MAX_MESSAGE_LEN, BulletinType::Binary),
            Err(Error::FieldOverflow { field: "bulletin length", .. })
        ));
    }
}
