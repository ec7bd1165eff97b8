//! Line matching against literal-prefix or anchored regex patterns

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};

/// An ordered set of patterns plus how to apply them
///
/// Patterns are tried in order and the first hit wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternSpec {
    patterns: Vec<String>,
    regex: bool,
    ignore_case: bool,
}

impl PatternSpec {
    /// Literal prefix patterns, case sensitive
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            regex: false,
            ignore_case: false,
        }
    }

    /// Treat the patterns as regular expressions anchored at line start
    pub fn regex(mut self, regex: bool) -> Self {
        self.regex = regex;
        self
    }

    /// Match without regard to case
    pub fn ignore_case(mut self, ignore_case: bool) -> Self {
        self.ignore_case = ignore_case;
        self
    }

    /// The pattern strings
    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Whether the patterns are regular expressions
    pub fn is_regex(&self) -> bool {
        self.regex
    }

    /// Whether matching ignores case
    pub fn is_ignore_case(&self) -> bool {
        self.ignore_case
    }

    /// Returns true if there are no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl From<&str> for PatternSpec {
    fn from(pattern: &str) -> Self {
        PatternSpec::new([pattern])
    }
}

impl From<String> for PatternSpec {
    fn from(pattern: String) -> Self {
        PatternSpec::new([pattern])
    }
}

impl From<Vec<String>> for PatternSpec {
    fn from(patterns: Vec<String>) -> Self {
        PatternSpec::new(patterns)
    }
}

impl From<&[&str]> for PatternSpec {
    fn from(patterns: &[&str]) -> Self {
        PatternSpec::new(patterns.iter().copied())
    }
}

impl<const N: usize> From<[&str; N]> for PatternSpec {
    fn from(patterns: [&str; N]) -> Self {
        PatternSpec::new(patterns)
    }
}

/// Details of a successful match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Index of the pattern that matched
    pub index: usize,
    /// The matched text
    pub text: String,
    /// Capture groups 1..n; always empty for literal patterns
    pub groups: Vec<Option<String>>,
}

/// Outcome of testing one line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// A pattern matched
    Matched(PatternMatch),
    /// No pattern matched
    NoMatch,
}

impl MatchResult {
    /// Returns true for [`MatchResult::Matched`]
    pub fn is_match(&self) -> bool {
        matches!(self, MatchResult::Matched(_))
    }

    /// The match details, if any
    pub fn into_match(self) -> Option<PatternMatch> {
        match self {
            MatchResult::Matched(m) => Some(m),
            MatchResult::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Compiled {
    Literal { prefixes: Vec<String>, ignore_case: bool },
    Regex(Vec<Regex>),
}

/// A compiled [`PatternSpec`]
#[derive(Debug, Clone)]
pub struct Matcher {
    compiled: Compiled,
}

impl Matcher {
    /// Compile a pattern set; fails on an invalid regular expression
    pub fn new(spec: &PatternSpec) -> Result<Self> {
        let compiled = if spec.regex {
            let regexes = spec
                .patterns
                .iter()
                .map(|pattern| {
                    RegexBuilder::new(&format!("^(?:{pattern})"))
                        .case_insensitive(spec.ignore_case)
                        .build()
                        .map_err(|source| Error::InvalidPattern {
                            pattern: pattern.clone(),
                            source,
                        })
                })
                .collect::<Result<Vec<_>>>()?;
            Compiled::Regex(regexes)
        } else {
            let prefixes = spec
                .patterns
                .iter()
                .map(|p| if spec.ignore_case { p.to_lowercase() } else { p.clone() })
                .collect();
            Compiled::Literal {
                prefixes,
                ignore_case: spec.ignore_case,
            }
        };
        Ok(Self { compiled })
    }

    /// Test one line
    ///
    /// Literal patterns are compared against the trimmed line; regexes see
    /// the line as is.
    pub fn matches(&self, line: &str) -> MatchResult {
        match &self.compiled {
            Compiled::Literal {
                prefixes,
                ignore_case,
            } => {
                let trimmed = line.trim();
                let folded;
                let haystack = if *ignore_case {
                    folded = trimmed.to_lowercase();
                    folded.as_str()
                } else {
                    trimmed
                };
                for (index, prefix) in prefixes.iter().enumerate() {
                    if haystack.starts_with(prefix.as_str()) {
                        let text = if *ignore_case {
                            trimmed.chars().take(prefix.chars().count()).collect()
                        } else {
                            prefix.clone()
                        };
                        return MatchResult::Matched(PatternMatch {
                            index,
                            text,
                            groups: Vec::new(),
                        });
                    }
                }
                MatchResult::NoMatch
            }
            Compiled::Regex(regexes) => {
                for (index, regex) in regexes.iter().enumerate() {
                    if let Some(caps) = regex.captures(line) {
                        let text = caps.get(0).map(|m| m.as_str().to_string()).unwrap_or_default();
                        let groups = caps
                            .iter()
                            .skip(1)
                            .map(|g| g.map(|m| m.as_str().to_string()))
                            .collect();
                        return MatchResult::Matched(PatternMatch {
                            index,
                            text,
                            groups,
                        });
                    }
                }
                MatchResult::NoMatch
            }
        }
    }

    /// Shorthand for `matches(line).is_match()`
    pub fn is_match(&self, line: &str) -> bool {
        self.matches(line).is_match()
    }
}

/// One-off match of `line` against `spec`
pub fn starts_with(line: &str, spec: &PatternSpec) -> Result<MatchResult> {
    Ok(Matcher::new(spec)?.matches(line))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_prefix_after_trim() {
        let spec = PatternSpec::new(["END"]);
        assert!(starts_with("  END of data\n", &spec).unwrap().is_match());
        assert!(!starts_with("the END", &spec).unwrap().is_match());
    }

    #[test]
    fn test_first_pattern_wins() {
        let matcher = Matcher::new(&PatternSpec::new(["err", "error"])).unwrap();
        let m = matcher.matches("error: boom").into_match().unwrap();
        assert_eq!(m.index, 0);
        assert_eq!(m.text, "err");
    }

    #[test]
    fn test_literal_is_case_sensitive_by_default() {
        let matcher = Matcher::new(&PatternSpec::new(["Ready"])).unwrap();
        assert!(!matcher.is_match("READY"));

        let matcher = Matcher::new(&PatternSpec::new(["Ready"]).ignore_case(true)).unwrap();
        let m = matcher.matches("READY now").into_match().unwrap();
        assert_eq!(m.text, "READY");
    }

    #[test]
    fn test_regex_is_anchored_at_start() {
        let matcher = Matcher::new(&PatternSpec::new([r"\d+"]).regex(true)).unwrap();
        assert!(matcher.is_match("42 apples"));
        assert!(!matcher.is_match("apples 42"));
    }

    #[test]
    fn test_regex_alternation_stays_anchored() {
        let matcher = Matcher::new(&PatternSpec::new(["foo|bar"]).regex(true)).unwrap();
        assert!(matcher.is_match("bar baz"));
        assert!(!matcher.is_match("baz bar"));
    }

    #[test]
    fn test_regex_captures() {
        let spec = PatternSpec::new([r"nope", r"(\w+)=(\d+)?"]).regex(true);
        let m = starts_with("key= tail", &spec).unwrap().into_match().unwrap();
        assert_eq!(m.index, 1);
        assert_eq!(m.text, "key=");
        assert_eq!(m.groups, vec![Some("key".to_string()), None]);
    }

    #[test]
    fn test_regex_ignore_case() {
        let spec = PatternSpec::new(["done"]).regex(true).ignore_case(true);
        assert!(starts_with("DONE.", &spec).unwrap().is_match());
        let spec = PatternSpec::new(["done"]).regex(true);
        assert_eq!(starts_with("DONE.", &spec).unwrap(), MatchResult::NoMatch);
    }

    #[test]
    fn test_invalid_regex_is_usage_error() {
        let err = Matcher::new(&PatternSpec::new(["(unclosed"]).regex(true)).unwrap_err();
        assert!(matches!(err, Error::InvalidPattern { ref pattern, .. } if pattern == "(unclosed"));
        assert!(err.is_usage());
    }

    #[test]
    fn test_empty_spec_never_matches() {
        let matcher = Matcher::new(&PatternSpec::new(Vec::<String>::new())).unwrap();
        assert!(!matcher.is_match("anything"));
    }
}
