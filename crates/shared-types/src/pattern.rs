//! # Glob Patterns
//!
//! Shell-style matching over validated IDs, shared by the auto-accept policy
//! and job targeting.
//!
//! | Token | Matches |
//! |-------|---------|
//! | `*` | any run of characters, including none |
//! | `?` | exactly one character |
//! | `[abc]`, `[a-z]` | one character from the set |
//! | `[!a-z]`, `[^a-z]` | one character not in the set |
//! | `\x` | the literal `x` |

use thiserror::Error;

/// Why a glob pattern could not be compiled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PatternError {
    /// A `[` without its closing `]`.
    #[error("unclosed character class in pattern")]
    UnclosedClass,
    /// The pattern ends with a lone `\`.
    #[error("dangling escape at end of pattern")]
    TrailingEscape,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Star,
    Any,
    Literal(char),
    Class { negated: bool, ranges: Vec<(char, char)> },
}

impl Token {
    fn matches(&self, c: char) -> bool {
        match self {
            Token::Star => true,
            Token::Any => true,
            Token::Literal(l) => *l == c,
            Token::Class { negated, ranges } => {
                let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
                hit != *negated
            }
        }
    }
}

/// A compiled glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    tokens: Vec<Token>,
}

impl GlobPattern {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// See [`PatternError`].
    pub fn new(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut chars = pattern.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '*' => {
                    if tokens.last() != Some(&Token::Star) {
                        tokens.push(Token::Star);
                    }
                }
                '?' => tokens.push(Token::Any),
                '\\' => {
                    let escaped = chars.next().ok_or(PatternError::TrailingEscape)?;
                    tokens.push(Token::Literal(escaped));
                }
                '[' => {
                    let negated = matches!(chars.peek(), Some('!' | '^'));
                    if negated {
                        chars.next();
                    }
                    let mut ranges = Vec::new();
                    let mut first = true;
                    loop {
                        let c = chars.next().ok_or(PatternError::UnclosedClass)?;
                        if c == ']' && !first {
                            break;
                        }
                        first = false;
                        if chars.peek() == Some(&'-') {
                            chars.next();
                            match chars.peek() {
                                Some(']') | None => {
                                    // Trailing '-' is literal.
                                    ranges.push((c, c));
                                    ranges.push(('-', '-'));
                                }
                                Some(&hi) => {
                                    chars.next();
                                    ranges.push((c, hi));
                                }
                            }
                        } else {
                            ranges.push((c, c));
                        }
                    }
                    tokens.push(Token::Class { negated, ranges });
                }
                other => tokens.push(Token::Literal(other)),
            }
        }
        Ok(Self { tokens })
    }

    /// Whether the whole of `text` matches.
    #[must_use]
    pub fn is_match(&self, text: &str) -> bool {
        let text: Vec<char> = text.chars().collect();
        let (mut p, mut t) = (0, 0);
        let mut backtrack: Option<(usize, usize)> = None;

        while t < text.len() {
            if let Some(token) = self.tokens.get(p) {
                if *token == Token::Star {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                if token.matches(text[t]) {
                    p += 1;
                    t += 1;
                    continue;
                }
            }
            match backtrack {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    backtrack = Some((star_p, star_t + 1));
                }
                None => return false,
            }
        }

        self.tokens[p..].iter().all(|token| *token == Token::Star)
    }
}

/// One-shot convenience over [`GlobPattern`].
///
/// # Errors
///
/// See [`PatternError`].
pub fn glob_match(pattern: &str, text: &str) -> Result<bool, PatternError> {
    Ok(GlobPattern::new(pattern)?.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(pattern: &str, text: &str) -> bool {
        glob_match(pattern, text).unwrap()
    }

    #[test]
    fn test_literals_and_wildcards() {
        assert!(m("web01", "web01"));
        assert!(!m("web01", "web010"));
        assert!(m("web*", "web01"));
        assert!(m("web*", "web"));
        assert!(m("*", ""));
        assert!(m("*.example.com", "db1.example.com"));
        assert!(!m("*.example.com", "example.com"));
        assert!(m("web?1", "web01"));
        assert!(!m("web?1", "web1"));
        assert!(m("w*b*1", "web-db-01"));
    }

    #[test]
    fn test_classes() {
        assert!(m("web[0-9][0-9]", "web42"));
        assert!(!m("web[0-9]", "webx"));
        assert!(m("web[!0-9]", "webx"));
        assert!(m("web[^0-9]", "webx"));
        assert!(m("db[ab]", "dbb"));
        assert!(m("x[a-]", "x-"));
        assert!(m("x[]]", "x]"));
    }

    #[test]
    fn test_escape() {
        assert!(m(r"web\*", "web*"));
        assert!(!m(r"web\*", "web01"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(GlobPattern::new("web[0-9"), Err(PatternError::UnclosedClass));
        assert_eq!(GlobPattern::new("web\\"), Err(PatternError::TrailingEscape));
    }

    #[test]
    fn test_star_backtracking_is_linear_enough() {
        let text = "a".repeat(200);
        assert!(!m("*a*a*a*a*b", &text));
    }
}
