use regex::bytes::Regex;

use crate::error::Result;

/// Something to look for in the shell's output.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Exact text, matched byte for byte.
    Literal(String),
    /// A regular expression over the raw output bytes.
    Regex(Regex),
}

/// Where a pattern matched, relative to the text searched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Found {
    pub start: usize,
    pub end: usize,
    pub captures: Vec<Option<String>>,
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern::Literal(text.into())
    }

    /// Compile `source` as a regex.
    pub fn regex(source: &str) -> Result<Self> {
        Ok(Pattern::Regex(Regex::new(source)?))
    }

    /// Human-readable form used in failure reports.
    pub fn describe(&self) -> String {
        match self {
            Pattern::Literal(text) => format!("literal {text:?}"),
            Pattern::Regex(re) => format!("pattern /{}/", re.as_str()),
        }
    }

    /// Leftmost non-empty occurrence in `haystack`.
    ///
    /// Zero-length matches are skipped: a match must consume output, or
    /// every later expectation would succeed at the same offset. An empty
    /// literal therefore never matches.
    pub(crate) fn find(&self, haystack: &[u8]) -> Option<Found> {
        match self {
            Pattern::Literal(text) => {
                let needle = text.as_bytes();
                if needle.is_empty() {
                    return None;
                }
                let start = haystack.windows(needle.len()).position(|w| w == needle)?;
                Some(Found {
                    start,
                    end: start + needle.len(),
                    captures: Vec::new(),
                })
            }
            Pattern::Regex(re) => {
                let caps = re
                    .captures_iter(haystack)
                    .find(|caps| caps.get(0).is_some_and(|m| !m.is_empty()))?;
                let whole = caps.get(0)?;
                let captures = (1..caps.len())
                    .map(|i| {
                        caps.get(i)
                            .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
                    })
                    .collect();
                Some(Found {
                    start: whole.start(),
                    end: whole.end(),
                    captures,
                })
            }
        }
    }
}

impl From<&str> for Pattern {
    fn from(text: &str) -> Self {
        Pattern::literal(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_find() {
        let p = Pattern::literal("exit\r\n");
        let found = p.find(b"cush> exit\r\n").unwrap();
        assert_eq!((found.start, found.end), (6, 12));
        assert!(p.find(b"cush> exi").is_none());
    }

    #[test]
    fn test_literal_is_not_a_regex() {
        let p = Pattern::literal("[1]");
        assert!(p.find(b"job 1").is_none());
        assert!(p.find(b"[1] 123").is_some());
    }

    #[test]
    fn test_empty_literal_never_matches() {
        assert!(Pattern::literal("").find(b"abc").is_none());
    }

    #[test]
    fn test_zero_length_regex_hits_are_skipped() {
        let p = Pattern::regex("x*").unwrap();
        let found = p.find(b"abxxc").unwrap();
        assert_eq!((found.start, found.end), (2, 4));
        assert!(p.find(b"abc").is_none());

        let p = Pattern::regex("(foo)?").unwrap();
        let found = p.find(b"a foo").unwrap();
        assert_eq!((found.start, found.end), (2, 5));
        assert_eq!(found.captures, vec![Some("foo".to_string())]);
    }

    #[test]
    fn test_regex_captures() {
        let p = Pattern::regex(r"\[(\d+)\] (\d+)(x)?").unwrap();
        let found = p.find(b"junk [2] 4711\r\n").unwrap();
        assert_eq!(found.start, 5);
        assert_eq!(
            found.captures,
            vec![Some("2".to_string()), Some("4711".to_string()), None]
        );
    }

    #[test]
    fn test_invalid_regex() {
        assert!(Pattern::regex("(unclosed").is_err());
    }

    #[test]
    fn test_describe() {
        assert_eq!(Pattern::literal("cush> ").describe(), "literal \"cush> \"");
        assert_eq!(Pattern::regex("a+").unwrap().describe(), "pattern /a+/");
    }
}
