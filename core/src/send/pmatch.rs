/*
 * pmatch.rs
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

//! Wildcard matching for rename rules: `*` matches any run, `?` one character, a leading `!`
//! negates the whole filter.

use crate::config::RenameRule;

/// Match `pattern` against `text[at..]`, pushing what each `*` and `?` matched onto `out`.
fn captures<'t>(pattern: &[char], text: &'t str, at: usize, out: &mut Vec<&'t str>) -> bool {
    let Some((&p, rest)) = pattern.split_first() else {
        return at == text.len();
    };
    let tail = &text[at..];
    match p {
        '*' => {
            let mut ends: Vec<usize> = tail.char_indices().map(|(i, _)| at + i).collect();
            ends.push(text.len());
            for end in ends {
                let mark = out.len();
                out.push(&text[at..end]);
                if captures(rest, text, end, out) {
                    return true;
                }
                out.truncate(mark);
            }
            false
        }
        '?' => match tail.chars().next() {
            Some(c) => {
                let end = at + c.len_utf8();
                let mark = out.len();
                out.push(&text[at..end]);
                if captures(rest, text, end, out) {
                    return true;
                }
                out.truncate(mark);
                false
            }
            None => false,
        },
        c => tail.starts_with(c) && captures(rest, text, at + c.len_utf8(), out),
    }
}

fn wildcard<'t>(pattern: &str, text: &'t str) -> Option<Vec<&'t str>> {
    let p: Vec<char> = pattern.chars().collect();
    let mut out = Vec::new();
    captures(&p, text, 0, &mut out).then_some(out)
}

/// True when `text` matches `pattern` (negated by a leading `!`).
pub fn pmatch(pattern: &str, text: &str) -> bool {
    match pattern.strip_prefix('!') {
        Some(p) => wildcard(p, text).is_none(),
        None => wildcard(pattern, text).is_some(),
    }
}

/// Remote name for `name` under the first matching rule. Each `*` and `?` of `rename_to`
/// takes the text its counterpart matched in the filter.
pub fn rename(rules: &[RenameRule], name: &str) -> Option<String> {
    for rule in rules {
        let parts = match rule.filter.strip_prefix('!') {
            Some(p) => match wildcard(p, name) {
                Some(_) => continue,
                None => Vec::new(),
            },
            None => match wildcard(&rule.filter, name) {
                Some(parts) => parts,
                None => continue,
            },
        };
        let mut parts = parts.into_iter();
        let mut out = String::new();
        for c in rule.rename_to.chars() {
            match c {
                '*' | '?' => out.push_str(parts.next().unwrap_or("")),
                c => out.push(c),
            }
        }
        return Some(out);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(filter: &str, to: &str) -> RenameRule {
        RenameRule {
            filter: filter.into(),
            rename_to: to.into(),
        }
    }

    #[test]
    fn matching() {
        assert!(pmatch("*.grib", "a.grib"));
        assert!(pmatch("obs_??.txt", "obs_12.txt"));
        assert!(!pmatch("obs_??.txt", "obs_1.txt"));
        assert!(pmatch("*", ""));
        assert!(pmatch("a*b*c", "aXXbYYc"));
        assert!(!pmatch("a*b*c", "aXXbYY"));
        assert!(pmatch("!*.tmp", "data.bin"));
        assert!(!pmatch("!*.tmp", "data.tmp"));
    }

    #[test]
    fn renaming() {
        let rules = [rule("*.tmp", "skip"), rule("SM*_??.txt", "surface/*-?.?.dat")];
        assert_eq!(rename(&rules, "x.tmp").as_deref(), Some("skip"));
        assert_eq!(rename(&rules, "SMAA_01.txt").as_deref(), Some("surface/AA-0.1.dat"));
        assert_eq!(rename(&rules, "other"), None);
    }

    #[test]
    fn negated_rule_renames_literally() {
        let rules = [rule("!*.bin", "text/*")];
        assert_eq!(rename(&rules, "a.txt").as_deref(), Some("text/"));
        assert_eq!(rename(&rules, "a.bin"), None);
    }
}
