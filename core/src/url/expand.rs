/*
 * expand.rs
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

//! Path expansion: `%t<X>` time tokens, `%T<op><n><unit>` time modifier, `%h` local host,
//! `` %e`cmd` `` command output, plus `%HH`, `\x` and `+` decoding.

use chrono::{DateTime, Local, TimeZone, Utc};

use super::errors::UrlErrors;

/// Digits allowed in a `%T` modifier value.
const MAX_INT_LENGTH: usize = 10;

/// Clock and limits used while expanding one path.
pub(crate) struct Expander {
    pub now: i64,
    pub utc: bool,
    pub max_exec_len: usize,
    /// Pending modifier applied to subsequent `%t` tokens.
    time_mod: Option<(u8, i64)>,
}

impl Expander {
    pub fn new(now: i64, utc: bool, max_exec_len: usize) -> Self {
        Self {
            now,
            utc,
            max_exec_len,
            time_mod: None,
        }
    }

    /// Decode and expand `raw`. `plus_is_space` applies to host and path contexts.
    pub fn expand(&mut self, raw: &[u8], plus_is_space: bool, errors: &mut UrlErrors) -> Vec<u8> {
        let mut out = Vec::with_capacity(raw.len());
        let mut i = 0;
        while i < raw.len() {
            let b = raw[i];
            match b {
                b'\\' if i + 1 < raw.len() => {
                    out.push(raw[i + 1]);
                    i += 2;
                }
                b'+' if plus_is_space => {
                    out.push(b' ');
                    i += 1;
                }
                b'%' => {
                    i = self.percent(raw, i, &mut out, errors);
                }
                _ => {
                    out.push(b);
                    i += 1;
                }
            }
        }
        out
    }

    /// Handle one `%` sequence starting at `i`; returns the index after it.
    fn percent(&mut self, raw: &[u8], i: usize, out: &mut Vec<u8>, errors: &mut UrlErrors) -> usize {
        let next = raw.get(i + 1).copied();
        match next {
            Some(b't') => {
                let Some(&code) = raw.get(i + 2) else {
                    out.extend_from_slice(b"%t");
                    errors.insert(UrlErrors::UNKNOWN_VALUE);
                    return i + 2;
                };
                match self.format_time(code) {
                    Some(s) => {
                        out.extend_from_slice(s.as_bytes());
                        errors.insert(UrlErrors::TARGET_DIR_CAN_CHANGE);
                    }
                    None => {
                        out.extend_from_slice(&raw[i..i + 3]);
                        errors.insert(UrlErrors::UNKNOWN_VALUE);
                    }
                }
                i + 3
            }
            Some(b'T') => self.time_modifier(raw, i + 2, errors),
            Some(b'h') => {
                out.extend_from_slice(local_hostname().as_bytes());
                errors.insert(UrlErrors::TARGET_DIR_CAN_CHANGE);
                i + 2
            }
            Some(b'e') if raw.get(i + 2) == Some(&b'`') => self.exec(raw, i + 3, out, errors),
            Some(h1) if h1.is_ascii_hexdigit() && raw.get(i + 2).is_some_and(|c| c.is_ascii_hexdigit()) => {
                out.push(hex_val(h1) << 4 | hex_val(raw[i + 2]));
                i + 3
            }
            _ => {
                out.push(b'%');
                i + 1
            }
        }
    }

    fn time_modifier(&mut self, raw: &[u8], start: usize, errors: &mut UrlErrors) -> usize {
        let op = match raw.get(start) {
            Some(&c) if matches!(c, b'+' | b'-' | b'*' | b'/' | b'%') => c,
            _ => {
                errors.insert(UrlErrors::NO_TIME_MODIFIER);
                return start;
            }
        };
        let mut j = start + 1;
        while j < raw.len() && raw[j].is_ascii_digit() {
            j += 1;
        }
        let digits = &raw[start + 1..j];
        if digits.is_empty() {
            errors.insert(UrlErrors::NO_TIME_MODIFIER);
            return j;
        }
        if digits.len() > MAX_INT_LENGTH {
            errors.insert(UrlErrors::TIME_MODIFIER_TOO_LONG);
            return j;
        }
        let mut value: i64 = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        match raw.get(j) {
            Some(b'S') => j += 1,
            Some(b'M') => {
                value *= 60;
                j += 1;
            }
            Some(b'H') => {
                value *= 3600;
                j += 1;
            }
            Some(b'd') => {
                value *= 86400;
                j += 1;
            }
            _ => {}
        }
        self.time_mod = Some((op, value));
        errors.insert(UrlErrors::TARGET_DIR_CAN_CHANGE);
        j
    }

    fn effective_time(&self) -> i64 {
        match self.time_mod {
            None => self.now,
            Some((op, v)) => match op {
                b'+' => self.now + v,
                b'-' => self.now - v,
                b'*' => self.now.saturating_mul(v),
                b'/' if v != 0 => self.now / v,
                b'%' if v != 0 => self.now % v,
                _ => self.now,
            },
        }
    }

    fn format_time(&self, code: u8) -> Option<String> {
        let spec = match code {
            b'a' => "%a",
            b'A' => "%A",
            b'b' => "%b",
            b'B' => "%B",
            b'd' => "%d",
            b'H' => "%H",
            b'i' => "%-d",
            b'j' => "%j",
            b'J' => "%-j",
            b'm' => "%m",
            b'M' => "%M",
            b'o' => "%-m",
            b'R' => "%V",
            b'S' => "%S",
            b'U' => "%U",
            b'w' => "%w",
            b'W' => "%W",
            b'y' => "%y",
            b'Y' => "%Y",
            _ => return None,
        };
        let t = self.effective_time();
        if self.utc {
            let dt: DateTime<Utc> = Utc.timestamp_opt(t, 0).single()?;
            Some(dt.format(spec).to_string())
        } else {
            let dt: DateTime<Local> = Local.timestamp_opt(t, 0).single()?;
            Some(dt.format(spec).to_string())
        }
    }

    fn exec(&mut self, raw: &[u8], start: usize, out: &mut Vec<u8>, errors: &mut UrlErrors) -> usize {
        let mut j = start;
        while j < raw.len() && raw[j] != b'`' {
            if raw[j] == b'\\' {
                j += 1;
            }
            j += 1;
        }
        if j >= raw.len() {
            errors.insert(UrlErrors::EXEC_NOT_TERMINATED);
            return raw.len();
        }
        let cmd = &raw[start..j];
        if cmd.len() > self.max_exec_len {
            errors.insert(UrlErrors::EXEC_CMD_TOO_LONG);
            return j + 1;
        }
        let cmd = String::from_utf8_lossy(cmd).replace("\\`", "`");
        errors.insert(UrlErrors::TARGET_DIR_CAN_CHANGE);
        match std::process::Command::new("sh").arg("-c").arg(&cmd).output() {
            Ok(o) if o.status.success() => {
                let mut s = o.stdout;
                while s.last().is_some_and(|c| *c == b'\n' || *c == b'\r') {
                    s.pop();
                }
                if s.is_empty() {
                    errors.insert(UrlErrors::EXEC_EMPTY_RETURN);
                } else {
                    out.extend_from_slice(&s);
                }
            }
            Ok(o) => {
                tracing::warn!(command = %cmd, status = ?o.status, "URL exec command failed");
                errors.insert(UrlErrors::EXEC_FAILED);
            }
            Err(e) => {
                tracing::warn!(command = %cmd, error = %e, "URL exec command could not start");
                errors.insert(UrlErrors::EXEC_FAILED);
            }
        }
        j + 1
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

/// Local host name for `%h`; falls back to `$HOSTNAME`.
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        let mut buf = [0u8; 256];
        // SAFETY: buf is writable for its full length and gethostname NUL-terminates on success.
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc == 0 {
            let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
            if len > 0 {
                return String::from_utf8_lossy(&buf[..len]).into_owned();
            }
        }
    }
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(raw: &str, now: i64) -> (String, UrlErrors) {
        let mut e = UrlErrors::NONE;
        let mut x = Expander::new(now, true, 1024);
        let out = x.expand(raw.as_bytes(), true, &mut e);
        (String::from_utf8(out).unwrap(), e)
    }

    // 2021-03-04 05:06:07 UTC
    const T: i64 = 1_614_834_367;

    #[test]
    fn time_tokens_expand() {
        let (s, e) = run("data/%tY/%tm/%td_%tH%tM%tS", T);
        assert_eq!(s, "data/2021/03/04_050607");
        assert!(e.contains(UrlErrors::TARGET_DIR_CAN_CHANGE));
        assert!(e.is_usable());
    }

    #[test]
    fn modifier_shifts_following_tokens() {
        let (s, _) = run("%T-1d%tY%tm%td", T);
        assert_eq!(s, "20210303");
        let (s, _) = run("%T+2H%tH", T);
        assert_eq!(s, "07");
    }

    #[test]
    fn missing_modifier_value() {
        let (_, e) = run("%T-d", T);
        assert!(e.contains(UrlErrors::NO_TIME_MODIFIER));
        let (_, e) = run("%T+12345678901S", T);
        assert!(e.contains(UrlErrors::TIME_MODIFIER_TOO_LONG));
    }

    #[test]
    fn hex_escape_and_plus() {
        let (s, e) = run("a%20b+c\\+d%zz", T);
        assert_eq!(s, "a b c+d%zz");
        assert!(e.is_empty());
    }

    #[test]
    fn host_token_marks_change() {
        let (s, e) = run("in/%h", T);
        assert!(s.starts_with("in/") && s.len() > 3);
        assert!(e.contains(UrlErrors::TARGET_DIR_CAN_CHANGE));
    }

    #[cfg(unix)]
    #[test]
    fn exec_token() {
        let (s, e) = run("x/%e`echo abc`/y", T);
        assert_eq!(s, "x/abc/y");
        assert!(e.contains(UrlErrors::TARGET_DIR_CAN_CHANGE));
        let (_, e) = run("x/%e`echo abc", T);
        assert!(e.contains(UrlErrors::EXEC_NOT_TERMINATED));
        let (_, e) = run("%e`true`", T);
        assert!(e.contains(UrlErrors::EXEC_EMPTY_RETURN));
        let (_, e) = run("%e`exit 3`", T);
        assert!(e.contains(UrlErrors::EXEC_FAILED));
    }
}
