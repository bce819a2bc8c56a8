//! Decision gate tokens.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Whether a request must run live or may be served from cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionToken {
    /// Always execute the full stage graph
    #[default]
    Live,

    /// May be served from cache
    Cache,
}

impl DecisionToken {
    /// Parse gate output. Trailing whitespace is ignored; anything other
    /// than `LIVE` or `CACHE` yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim_end() {
            "LIVE" => Some(Self::Live),
            "CACHE" => Some(Self::Cache),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "LIVE",
            Self::Cache => "CACHE",
        }
    }
}

impl fmt::Display for DecisionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_strips_trailing_newline() {
        assert_eq!(DecisionToken::parse("CACHE\n"), Some(DecisionToken::Cache));
        assert_eq!(DecisionToken::parse("LIVE \r\n"), Some(DecisionToken::Live));
    }

    #[test]
    fn test_parse_rejects_other_tokens() {
        assert_eq!(DecisionToken::parse("cache"), None);
        assert_eq!(DecisionToken::parse("MAYBE"), None);
        assert_eq!(DecisionToken::parse(""), None);
    }

    #[test]
    fn test_default_is_live() {
        assert_eq!(DecisionToken::default(), DecisionToken::Live);
    }
}
