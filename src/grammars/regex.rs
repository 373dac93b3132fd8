use std::fmt;
use std::sync::{Arc, OnceLock};

use onig::{Region, RegexOptions, SearchOptions, Syntax};

use crate::error::{Error, TintaResult};

/// Escapes regular expression metacharacters in captured text before it is
/// spliced into an end pattern.
pub fn escape_regex(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' | '|' | '.' | '*' | '+' | '?' | '^' | '$' | '-' | ':' | '~' | '#' | '&'
            | '(' | ')' | '[' | ']' | '{' | '}' | '<' | '>' | '\'' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Whether a pattern source contains `\1`..`\9` style backreferences.
///
/// Doubled backslashes are literal; `\\1` is an escaped backslash followed by
/// a plain `1`.
pub fn has_backreferences(source: &str) -> bool {
    let mut chars = source.chars();
    while let Some(c) = chars.next() {
        if c == '\\'
            && let Some(next) = chars.next()
            && next.is_ascii_digit()
        {
            return true;
        }
    }
    false
}

/// Produces the concrete end pattern of an open region by replacing each
/// `\N` with the regex-escaped text that group `N` of the begin match
/// captured.
///
/// Groups that did not participate contribute nothing; every other escape
/// sequence passes through untouched.
pub fn substitute_backreferences(
    end_source: &str,
    begin_line: &str,
    begin_captures: &[Option<(usize, usize)>],
) -> String {
    let mut out = String::with_capacity(end_source.len());
    let mut chars = end_source.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push_str("\\\\"),
            Some(d) if d.is_ascii_digit() => {
                let group = (d as u8 - b'0') as usize;
                if let Some(&Some((start, end))) = begin_captures.get(group) {
                    out.push_str(&escape_regex(&begin_line[start..end]));
                }
            }
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// A successful match at a line position, with byte offsets for every
/// numbered group. Index 0 is the whole match; groups that did not
/// participate are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<(usize, usize)>>,
}

/// An Oniguruma pattern that compiles lazily on first use.
///
/// Patterns are compiled with `SINGLELINE` so `^` means start-of-haystack and
/// `$` means end-of-haystack (or just before its final newline). Lines are
/// matched one at a time with their trailing newline attached, which makes
/// these exactly the line anchors TextMate grammars expect.
pub struct Regex {
    pattern: String,
    compiled: OnceLock<Result<Arc<onig::Regex>, String>>,
}

impl Clone for Regex {
    fn clone(&self) -> Self {
        // Fresh lazy state; the pattern is what identifies the regex
        Regex::new(self.pattern.clone())
    }
}

impl fmt::Debug for Regex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Regex({:?})", self.pattern)
    }
}

impl Regex {
    pub fn new(pattern: String) -> Self {
        Self {
            pattern,
            compiled: OnceLock::new(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn compiled(&self) -> TintaResult<&Arc<onig::Regex>> {
        self.compiled
            .get_or_init(|| {
                onig::Regex::with_options(
                    &self.pattern,
                    RegexOptions::REGEX_OPTION_SINGLELINE,
                    Syntax::default(),
                )
                .map(Arc::new)
                .map_err(|e| e.to_string())
            })
            .as_ref()
            .map_err(|message| Error::RegexCompile {
                pattern: self.pattern.clone(),
                message: message.clone(),
            })
    }

    /// Checks that the pattern compiles, without keeping the result around.
    /// Used at grammar load time so broken patterns fail the whole load.
    pub fn validate(&self) -> TintaResult<()> {
        self.compiled().map(|_| ())
    }

    /// Anchored match: succeeds only if the pattern matches starting exactly
    /// at `pos`. Oniguruma has no native "anchor at offset" flag, so a match
    /// that starts later is rejected.
    pub fn find_at(&self, line: &str, pos: usize) -> TintaResult<Option<RegexMatch>> {
        Ok(self.search(line, pos)?.filter(|m| m.start == pos))
    }

    /// Unanchored search for the first match starting at or after `pos`.
    pub fn search_from(&self, line: &str, pos: usize) -> TintaResult<Option<RegexMatch>> {
        self.search(line, pos)
    }

    fn search(&self, line: &str, pos: usize) -> TintaResult<Option<RegexMatch>> {
        let re = self.compiled()?;
        let mut region = Region::new();
        let found = re.search_with_options(
            line,
            pos,
            line.len(),
            SearchOptions::SEARCH_OPTION_NONE,
            Some(&mut region),
        );
        if found.is_none() {
            return Ok(None);
        }
        let Some((start, end)) = region.pos(0) else {
            return Ok(None);
        };
        let captures = (0..region.len()).map(|i| region.pos(i)).collect();
        Ok(Some(RegexMatch {
            start,
            end,
            captures,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_covers_metacharacters() {
        assert_eq!(escape_regex("a.b"), "a\\.b");
        assert_eq!(escape_regex("x(y)*"), "x\\(y\\)\\*");
        assert_eq!(escape_regex("plain"), "plain");
    }

    #[test]
    fn backreference_detection() {
        assert!(has_backreferences("\\1"));
        assert!(has_backreferences("end-\\3-marker"));
        assert!(!has_backreferences("\\\\1"));
        assert!(!has_backreferences("\\n\\w+"));
        assert!(!has_backreferences("plain"));
    }

    #[test]
    fn substitution_escapes_captured_text() {
        // begin line "a.b" with group 1 covering all of it
        let caps = vec![Some((0, 3)), Some((0, 3))];
        assert_eq!(substitute_backreferences("\\1", "a.b", &caps), "a\\.b");
    }

    #[test]
    fn substitution_preserves_escaped_backslashes() {
        let caps = vec![Some((0, 3)), Some((0, 3))];
        assert_eq!(substitute_backreferences("\\\\1", "abc", &caps), "\\\\1");
    }

    #[test]
    fn substitution_drops_missing_groups() {
        let caps = vec![Some((0, 3))];
        assert_eq!(substitute_backreferences("x\\7y", "abc", &caps), "xy");
        let caps = vec![Some((0, 3)), None];
        assert_eq!(substitute_backreferences("x\\1y", "abc", &caps), "xy");
    }

    #[test]
    fn substitution_passes_other_escapes_through() {
        let caps = vec![Some((0, 3)), Some((1, 2))];
        assert_eq!(substitute_backreferences("\\w+\\1", "abc", &caps), "\\w+b");
    }

    #[test]
    fn find_at_is_anchored() {
        let re = Regex::new("bar".to_string());
        assert!(re.find_at("foo bar\n", 0).unwrap().is_none());
        let m = re.find_at("foo bar\n", 4).unwrap().unwrap();
        assert_eq!((m.start, m.end), (4, 7));
    }

    #[test]
    fn search_from_is_not_anchored() {
        let re = Regex::new("bar".to_string());
        let m = re.search_from("foo bar\n", 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (4, 7));
    }

    #[test]
    fn dollar_matches_before_trailing_newline_only() {
        let re = Regex::new("foo$".to_string());
        let m = re.find_at("foo\n", 0).unwrap().unwrap();
        assert_eq!((m.start, m.end), (0, 3));
        // An internal newline is not an end-of-line for `$`
        assert!(re.find_at("foo\nbar\n", 0).unwrap().is_none());
    }

    #[test]
    fn caret_matches_line_start_only() {
        let re = Regex::new("^a".to_string());
        assert!(re.find_at("ba\n", 1).unwrap().is_none());
        assert!(Regex::new("^b".to_string()).find_at("ba\n", 0).unwrap().is_some());
    }

    #[test]
    fn capture_offsets_report_participation() {
        let re = Regex::new("(a)(x)?(b)".to_string());
        let m = re.find_at("ab\n", 0).unwrap().unwrap();
        assert_eq!(m.captures[0], Some((0, 2)));
        assert_eq!(m.captures[1], Some((0, 1)));
        assert_eq!(m.captures[2], None);
        assert_eq!(m.captures[3], Some((1, 2)));
    }

    #[test]
    fn invalid_pattern_reports_compile_error() {
        let re = Regex::new("(".to_string());
        let err = re.validate().unwrap_err();
        assert!(matches!(err, Error::RegexCompile { .. }));
    }
}
