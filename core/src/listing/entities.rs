/*
 * entities.rs
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

//! SGML entity decoding and tag stripping for captured listing text.

/// Accented letters by accent name: pairs of (base, composed).
const ACCENTS: &[(&str, &str)] = &[
    ("grave", "aàeèiìoòuùAÀEÈIÌOÒUÙ"),
    ("acute", "aáeéiíoóuúyýAÁEÉIÍOÓUÚYÝ"),
    ("circ", "aâeêiîoôuûAÂEÊIÎOÔUÛ"),
    ("tilde", "aãnñoõAÃNÑOÕ"),
    ("uml", "aäeëiïoöuüyÿAÄEËIÏOÖUÜ"),
    ("cedil", "cçCÇ"),
    ("ring", "aåAÅ"),
];

fn named(name: &str) -> Option<char> {
    let c = match name {
        "amp" => '&',
        "lt" => '<',
        "gt" => '>',
        "quot" => '"',
        "apos" => '\'',
        "nbsp" => ' ',
        "deg" => '°',
        "szlig" => 'ß',
        "grave" => '`',
        "acute" => '´',
        "circ" => '^',
        "tilde" => '~',
        "cedil" => '¸',
        "uml" => '¨',
        _ => {
            let mut chars = name.chars();
            let base = chars.next()?;
            let accent = chars.as_str();
            let (_, table) = ACCENTS.iter().find(|(a, _)| *a == accent)?;
            let letters: Vec<char> = table.chars().collect();
            return letters
                .chunks(2)
                .find(|pair| pair[0] == base)
                .and_then(|pair| pair.get(1).copied());
        }
    };
    Some(c)
}

fn numeric(body: &str) -> Option<char> {
    let code = match body.strip_prefix(['x', 'X']) {
        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
        None => body.parse::<u32>().ok()?,
    };
    char::from_u32(code)
}

/// Decode `&name;`, `&#NN;` and `&#xHH;`. Unknown short `&...;` runs are dropped; a lone
/// `&` stays.
pub fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let end = after
            .char_indices()
            .take(10)
            .find(|(_, c)| *c == ';' || !(c.is_ascii_alphanumeric() || *c == '#'))
            .filter(|(_, c)| *c == ';')
            .map(|(i, _)| i);
        match end {
            Some(end) if end > 0 => {
                let body = &after[..end];
                let decoded = match body.strip_prefix('#') {
                    Some(num) => numeric(num),
                    None => named(body),
                };
                if let Some(c) = decoded {
                    out.push(c);
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('&');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Text content of an HTML fragment: tags removed, entities decoded, whitespace runs of one
/// line kept (columns are separated by runs of spaces).
pub fn strip_tags(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut in_tag = false;
    for c in s.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    decode_entities(&out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_and_numeric() {
        assert_eq!(decode_entities("M&uuml;ller &amp; S&ouml;hne"), "Müller & Söhne");
        assert_eq!(decode_entities("Stra&szlig;e 5&deg;"), "Straße 5°");
        assert_eq!(decode_entities("&Auml;&#65;&#x42;"), "ÄAB");
        assert_eq!(decode_entities("caf&eacute; &lt;x&gt;"), "café <x>");
    }

    #[test]
    fn unknown_runs_and_lone_ampersand() {
        assert_eq!(decode_entities("a&bogus;b"), "ab");
        assert_eq!(decode_entities("a & b"), "a & b");
        assert_eq!(decode_entities("x&y"), "x&y");
    }

    #[test]
    fn tags_become_separators() {
        assert_eq!(strip_tags("<td>a&amp;b</td><td>1K</td>").split_whitespace().collect::<Vec<_>>(), ["a&b", "1K"]);
    }
}
