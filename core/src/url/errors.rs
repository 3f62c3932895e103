/*
 * errors.rs
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

//! URL evaluation defects as a bit mask. Parsing continues past a defect so that one pass
//! reports every problem; a mask of 3 or less is still usable.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UrlErrors(pub u32);

impl UrlErrors {
    pub const NONE: UrlErrors = UrlErrors(0);
    /// A `%t`, `%T`, `%h` or `%e` substitution fired; the path is not cache-stable.
    pub const TARGET_DIR_CAN_CHANGE: UrlErrors = UrlErrors(1 << 0);
    /// A fingerprint was given but no password; only the host key is known.
    pub const ONLY_FINGERPRINT_KNOWN: UrlErrors = UrlErrors(1 << 1);
    pub const UNKNOWN_SCHEME: UrlErrors = UrlErrors(1 << 2);
    pub const USER_TOO_LONG: UrlErrors = UrlErrors(1 << 3);
    pub const PASSWORD_TOO_LONG: UrlErrors = UrlErrors(1 << 4);
    pub const HOSTNAME_TOO_LONG: UrlErrors = UrlErrors(1 << 5);
    pub const PORT_TOO_LONG: UrlErrors = UrlErrors(1 << 6);
    pub const NO_PORT: UrlErrors = UrlErrors(1 << 7);
    pub const SERVER_TOO_LONG: UrlErrors = UrlErrors(1 << 8);
    pub const REGION_TOO_LONG: UrlErrors = UrlErrors(1 << 9);
    pub const RECIPIENT_TOO_LONG: UrlErrors = UrlErrors(1 << 10);
    pub const UNKNOWN_SMTP_AUTH: UrlErrors = UrlErrors(1 << 11);
    pub const INVALID_FINGERPRINT: UrlErrors = UrlErrors(1 << 12);
    pub const UNKNOWN_KEY_TYPE: UrlErrors = UrlErrors(1 << 13);
    pub const UNKNOWN_TRANSFER_TYPE: UrlErrors = UrlErrors(1 << 14);
    pub const PROTOCOL_VERSION_TOO_LONG: UrlErrors = UrlErrors(1 << 15);
    pub const NO_PROTOCOL_VERSION: UrlErrors = UrlErrors(1 << 16);
    pub const TIME_MODIFIER_TOO_LONG: UrlErrors = UrlErrors(1 << 17);
    pub const NO_TIME_MODIFIER: UrlErrors = UrlErrors(1 << 18);
    pub const EXEC_CMD_TOO_LONG: UrlErrors = UrlErrors(1 << 19);
    pub const EXEC_NOT_TERMINATED: UrlErrors = UrlErrors(1 << 20);
    pub const EXEC_FAILED: UrlErrors = UrlErrors(1 << 21);
    pub const EXEC_EMPTY_RETURN: UrlErrors = UrlErrors(1 << 22);
    pub const PARAMETER_MISSING: UrlErrors = UrlErrors(1 << 23);
    pub const UNKNOWN_VALUE: UrlErrors = UrlErrors(1 << 24);
    pub const BUFFER_TOO_SHORT: UrlErrors = UrlErrors(1 << 25);
    pub const NOT_A_URL: UrlErrors = UrlErrors(1 << 26);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn contains(self, other: UrlErrors) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: UrlErrors) {
        self.0 |= other.0;
    }

    /// True when the URL may be acted upon (only informational bits set).
    pub fn is_usable(self) -> bool {
        self.0 <= 3
    }

    /// Each set bit as a human phrase, joined with ", ".
    pub fn text(self) -> String {
        error_text(self)
    }
}

impl std::ops::BitOr for UrlErrors {
    type Output = UrlErrors;

    fn bitor(self, rhs: UrlErrors) -> UrlErrors {
        UrlErrors(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for UrlErrors {
    fn bitor_assign(&mut self, rhs: UrlErrors) {
        self.0 |= rhs.0;
    }
}

const PHRASES: &[(UrlErrors, &str)] = &[
    (UrlErrors::TARGET_DIR_CAN_CHANGE, "target directory can change"),
    (UrlErrors::ONLY_FINGERPRINT_KNOWN, "only fingerprint of host key known"),
    (UrlErrors::UNKNOWN_SCHEME, "unknown or unsupported scheme"),
    (UrlErrors::USER_TOO_LONG, "user name too long"),
    (UrlErrors::PASSWORD_TOO_LONG, "password too long"),
    (UrlErrors::HOSTNAME_TOO_LONG, "hostname too long"),
    (UrlErrors::PORT_TOO_LONG, "port too long or out of range"),
    (UrlErrors::NO_PORT, "no port number after `:`"),
    (UrlErrors::SERVER_TOO_LONG, "server name too long"),
    (UrlErrors::REGION_TOO_LONG, "region name too long"),
    (UrlErrors::RECIPIENT_TOO_LONG, "path/recipient too long"),
    (UrlErrors::UNKNOWN_SMTP_AUTH, "unknown SMTP AUTH method"),
    (UrlErrors::INVALID_FINGERPRINT, "invalid fingerprint"),
    (UrlErrors::UNKNOWN_KEY_TYPE, "unknown key type"),
    (UrlErrors::UNKNOWN_TRANSFER_TYPE, "unknown transfer type"),
    (UrlErrors::PROTOCOL_VERSION_TOO_LONG, "protocol version too long"),
    (UrlErrors::NO_PROTOCOL_VERSION, "no protocol version given"),
    (UrlErrors::TIME_MODIFIER_TOO_LONG, "time modifier too long"),
    (UrlErrors::NO_TIME_MODIFIER, "no time modifier given"),
    (UrlErrors::EXEC_CMD_TOO_LONG, "exec command too long"),
    (UrlErrors::EXEC_NOT_TERMINATED, "exec command not terminated with `"),
    (UrlErrors::EXEC_FAILED, "exec command failed"),
    (UrlErrors::EXEC_EMPTY_RETURN, "exec command returned nothing"),
    (UrlErrors::PARAMETER_MISSING, "parameter value missing"),
    (UrlErrors::UNKNOWN_VALUE, "unknown parameter or value"),
    (UrlErrors::BUFFER_TOO_SHORT, "buffer too short"),
    (UrlErrors::NOT_A_URL, "not a URL"),
];

/// Render each set bit of `mask` as a phrase.
pub fn error_text(mask: UrlErrors) -> String {
    let mut out = String::new();
    for (bit, phrase) in PHRASES {
        if mask.contains(*bit) {
            if !out.is_empty() {
                out.push_str(", ");
            }
            out.push_str(phrase);
        }
    }
    out
}

impl fmt::Display for UrlErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "no error")
        } else {
            write!(f, "{}", error_text(*self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn informational_bits_stay_usable() {
        assert!(UrlErrors::NONE.is_usable());
        assert!((UrlErrors::TARGET_DIR_CAN_CHANGE | UrlErrors::ONLY_FINGERPRINT_KNOWN).is_usable());
        assert!(!UrlErrors::UNKNOWN_SCHEME.is_usable());
    }

    #[test]
    fn text_lists_every_bit() {
        let t = error_text(UrlErrors::NO_PORT | UrlErrors::USER_TOO_LONG);
        assert_eq!(t, "user name too long, no port number after `:`");
        assert_eq!(UrlErrors::NONE.to_string(), "no error");
    }
}
