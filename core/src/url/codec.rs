/*
 * codec.rs
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

//! Percent-encoding for request paths and query values. Only the unreserved set
//! `[A-Za-z0-9-_.~]` passes through; `path_encode` also keeps `/`.

use percent_encoding::{percent_decode, percent_encode, AsciiSet, NON_ALPHANUMERIC};

/// Everything but the unreserved set.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// As COMPONENT, keeping the path separator.
const PATH: &AsciiSet = &COMPONENT.remove(b'/');

/// Percent-encode every byte outside the unreserved set (upper-case hex).
pub fn encode(src: &[u8]) -> String {
    percent_encode(src, COMPONENT).to_string()
}

/// Like `encode` but leaves `/` untouched, for request paths.
pub fn path_encode(src: &[u8]) -> String {
    percent_encode(src, PATH).to_string()
}

/// Invert `encode`/`path_encode`; `+` decodes to a space.
pub fn decode(src: &str) -> Vec<u8> {
    let plus_fixed: Vec<u8> = src
        .bytes()
        .map(|b| if b == b'+' { b' ' } else { b })
        .collect();
    percent_decode(&plus_fixed).collect()
}

/// Percent-decode only (`+` stays `+`); used for href values in listings.
pub fn decode_href(src: &str) -> String {
    percent_decode(src.as_bytes()).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unreserved_passes_through() {
        let s = b"Az09-_.~";
        assert_eq!(encode(s), "Az09-_.~");
        assert_eq!(decode(&encode(s)), s.to_vec());
    }

    #[test]
    fn path_encode_keeps_slash() {
        assert_eq!(path_encode(b"dir/a b+c"), "dir/a%20b%2Bc");
        assert_eq!(encode(b"dir/a"), "dir%2Fa");
    }

    #[test]
    fn decode_plus_is_space_and_hex_case_insensitive() {
        assert_eq!(decode("a+b%2f%2F"), b"a b//".to_vec());
        assert_eq!(decode_href("a+b%20c"), "a+b c");
    }

    #[test]
    fn arbitrary_bytes_round_trip() {
        let raw: Vec<u8> = (0u8..=255).collect();
        assert_eq!(decode(&encode(&raw)), raw);
        assert_eq!(decode(&path_encode(&raw)), raw);
    }
}
