//! Minimal G-code word reader
//!
//! Only what the streamer needs: comment stripping, the leading command code
//! and axis words. No semantic validation is attempted.

use crate::data::CommandedPosition;

/// Remove a trailing `;` comment and surrounding whitespace
pub fn strip_comment(line: &str) -> &str {
    match line.find(';') {
        Some(idx) => line[..idx].trim(),
        None => line.trim(),
    }
}

/// The leading command word, upper-cased, with leading zeros dropped
///
/// `"g01 X1"` yields `Some("G1")`, `"M105"` yields `Some("M105")`.
/// A leading `N<seq>` word is skipped.
pub fn command_code(line: &str) -> Option<String> {
    let stripped = strip_comment(line);
    let mut words = stripped.split_whitespace();
    let mut word = words.next()?;
    if word.starts_with(['N', 'n']) && word[1..].chars().all(|c| c.is_ascii_digit()) {
        word = words.next()?;
    }

    let letter = word.chars().next()?.to_ascii_uppercase();
    if !matches!(letter, 'G' | 'M' | 'T') {
        return None;
    }

    let digits = &word[1..];
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    if int_part.is_empty() || !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let number: u32 = int_part.parse().ok()?;

    Some(match frac_part {
        Some(f) => format!("{}{}.{}", letter, number, f),
        None => format!("{}{}", letter, number),
    })
}

/// Value of a single-letter word such as `F1500`, if present and numeric
pub fn word_value(line: &str, letter: char) -> Option<f64> {
    let letter = letter.to_ascii_uppercase();
    for part in strip_comment(line).split_whitespace() {
        if part.len() < 2 {
            continue;
        }
        let Some(first) = part.chars().next() else {
            continue;
        };
        if first.to_ascii_uppercase() == letter {
            if let Ok(val) = part[first.len_utf8()..].parse::<f64>() {
                return Some(val);
            }
        }
    }
    None
}

/// X/Y/Z words of a line; axes that are not mentioned are `None`
pub fn axis_words(line: &str) -> CommandedPosition {
    let mut pos = CommandedPosition::default();
    for part in strip_comment(line).split_whitespace() {
        if part.len() < 2 {
            continue;
        }
        let Some(first) = part.chars().next() else {
            continue;
        };
        let value = part[first.len_utf8()..].parse::<f64>().ok();
        match first.to_ascii_uppercase() {
            'X' => pos.x = value.or(pos.x),
            'Y' => pos.y = value.or(pos.y),
            'Z' => pos.z = value.or(pos.z),
            _ => {}
        }
    }
    pos
}
