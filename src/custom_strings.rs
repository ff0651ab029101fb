// /src/custom_strings.rs
use core::fmt::Write;

use heapless::{String, Vec};

/// Returns the substring before `delimiter`, or the whole input when the
/// delimiter is absent.
pub fn extract_before_delimiter<'a>(input: &'a str, delimiter: char) -> &'a str {
    input.split_once(delimiter).map_or(input, |(prefix, _)| prefix)
}

/// Case-insensitive ASCII substring search.
pub fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    let needle = needle.as_bytes();
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    haystack
        .as_bytes()
        .windows(needle.len())
        .any(|window| window.eq_ignore_ascii_case(needle))
}

/// `+` followed by at least two digits.
///
/// ```
/// assert!(gate800c::custom_strings::is_phone_number("+32444661122"));
/// assert!(!gate800c::custom_strings::is_phone_number("0444661122"));
/// ```
pub fn is_phone_number(value: &str) -> bool {
    match value.strip_prefix('+') {
        Some(digits) => digits.len() >= 2 && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// Free text accepted in parameters: digits, letters and `! # + space - .`
pub fn is_valid_text(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '+' | ' ' | '-' | '.'))
}

/// Copies `input` into a bounded string, upper-casing ASCII letters.
/// Returns `None` when `input` does not fit.
pub fn to_upper<const N: usize>(input: &str) -> Option<String<N>> {
    let mut out = String::new();
    for c in input.chars() {
        out.push(c.to_ascii_uppercase()).ok()?;
    }
    Some(out)
}

/// Copies `input` into a bounded string. Returns `None` when it does not fit.
pub fn bounded<const N: usize>(input: &str) -> Option<String<N>> {
    let mut out = String::new();
    out.push_str(input).ok()?;
    Some(out)
}

/// Packs `lines` into as few messages of at most `N` bytes as possible,
/// joining lines with CRLF. A single line longer than `N` is truncated.
pub fn pack_lines<'a, const N: usize, const M: usize>(
    lines: impl IntoIterator<Item = &'a str>,
) -> Vec<String<N>, M> {
    let mut messages: Vec<String<N>, M> = Vec::new();
    let mut current: String<N> = String::new();

    for line in lines {
        let needed = if current.is_empty() { line.len() } else { current.len() + 2 + line.len() };
        if needed > N && !current.is_empty() {
            if messages.push(core::mem::take(&mut current)).is_err() {
                return messages;
            }
        }
        if !current.is_empty() {
            let _ = current.push_str("\r\n");
        }
        if current.push_str(line).is_err() {
            for c in line.chars() {
                if current.push(c).is_err() {
                    break;
                }
            }
        }
    }

    if !current.is_empty() {
        let _ = messages.push(current);
    }
    messages
}

/// Formats into a bounded string, truncating on overflow.
pub fn format_bounded<const N: usize>(args: core::fmt::Arguments<'_>) -> String<N> {
    let mut out = Truncating(String::new());
    let _ = out.write_fmt(args);
    out.0
}

struct Truncating<const N: usize>(String<N>);

impl<const N: usize> Write for Truncating<N> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_field() {
        assert_eq!(extract_before_delimiter("out1,now", ','), "out1");
        assert_eq!(extract_before_delimiter("open gate", ','), "open gate");
    }

    #[test]
    fn substring_search_ignores_case() {
        assert!(contains_ignore_case("please OuT1 now", "out1"));
        assert!(!contains_ignore_case("out", "out1"));
        assert!(!contains_ignore_case("anything", ""));
    }

    #[test]
    fn phone_numbers_need_plus_and_digits() {
        assert!(is_phone_number("+32444661122"));
        assert!(!is_phone_number("+3"));
        assert!(!is_phone_number("+32 444"));
        assert!(!is_phone_number("32444661122"));
    }

    #[test]
    fn text_charset() {
        assert!(is_valid_text("Gate open! #2 +x-y."));
        assert!(!is_valid_text("semi;colon"));
        assert!(!is_valid_text("under_score"));
    }

    #[test]
    fn packs_lines_into_messages() {
        let lines = ["aaaa", "bbbb", "cccc"];
        let packed: Vec<String<10>, 4> = pack_lines(lines);
        assert_eq!(packed.len(), 2);
        assert_eq!(packed[0].as_str(), "aaaa\r\nbbbb");
        assert_eq!(packed[1].as_str(), "cccc");
    }

    #[test]
    fn format_truncates() {
        let s: String<5> = format_bounded(format_args!("{}-{}", "abc", "def"));
        assert_eq!(s.as_str(), "abc-d");
    }
}
