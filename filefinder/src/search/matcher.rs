use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::path::Path;
use tracing::debug;

use crate::errors::{FinderError, FinderResult};

const REGEX_PREFIX: &str = "re:";
const PLAIN_INSENSITIVE_PREFIX: &str = "plain:i:";
const PLAIN_PREFIX: &str = "plain:";

/// Compiled regexes by source text, shared across scans
static REGEX_CACHE: Lazy<DashMap<String, Regex>> = Lazy::new(DashMap::new);

/// One compiled pattern. Immutable once built.
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Matches when the expression finds a match anywhere in the line
    Regex(Regex),
    /// Case-sensitive substring
    Plain(String),
    /// Case-insensitive substring, stored lower-cased
    PlainInsensitive(String),
}

impl Pattern {
    /// Parses one pattern-file line (already trimmed, not blank or comment).
    fn parse(line: &str) -> Result<Self, regex::Error> {
        if let Some(expr) = line.strip_prefix(REGEX_PREFIX) {
            return cached_regex(expr).map(Pattern::Regex);
        }
        if let Some(text) = line.strip_prefix(PLAIN_INSENSITIVE_PREFIX) {
            let mut folded = String::with_capacity(text.len());
            fold_case(text, &mut folded);
            return Ok(Pattern::PlainInsensitive(folded));
        }
        let text = line.strip_prefix(PLAIN_PREFIX).unwrap_or(line);
        Ok(Pattern::Plain(text.to_string()))
    }

    /// Tests a line. Lower-cases the line on the fly for insensitive
    /// patterns; use [`PatternSet::first_match`] on hot paths.
    pub fn is_match(&self, line: &str) -> bool {
        match self {
            Pattern::PlainInsensitive(_) => {
                let mut folded = String::with_capacity(line.len());
                fold_case(line, &mut folded);
                self.is_match_folded(line, &folded)
            }
            _ => self.is_match_folded(line, ""),
        }
    }

    /// `folded` must hold the lower-cased `line` whenever `self` is
    /// case-insensitive; other variants ignore it.
    fn is_match_folded(&self, line: &str, folded: &str) -> bool {
        match self {
            Pattern::Regex(re) => re.is_match(line),
            Pattern::Plain(text) => line.contains(text.as_str()),
            Pattern::PlainInsensitive(text) => folded.contains(text.as_str()),
        }
    }

    /// Text used in logs and per-pattern output file names
    pub fn describe(&self) -> String {
        match self {
            Pattern::Regex(re) => re.as_str().to_string(),
            Pattern::Plain(text) => text.clone(),
            Pattern::PlainInsensitive(text) => format!("{PLAIN_INSENSITIVE_PREFIX}{text}"),
        }
    }

    pub fn is_case_insensitive(&self) -> bool {
        matches!(self, Pattern::PlainInsensitive(_))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Ordered, read-only pattern list shared by all workers.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<Pattern>,
    has_insensitive: bool,
}

impl PatternSet {
    /// Compiles pattern-file lines.
    ///
    /// Lines are trimmed; blank lines and `#` comments are skipped.
    /// `re:` compiles a regex, `plain:i:` a case-insensitive substring, an
    /// optional `plain:` prefix is stripped and anything else is a
    /// case-sensitive substring. One invalid regex fails the whole set.
    pub fn compile<I>(lines: I) -> FinderResult<Self>
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for (idx, raw) in lines.into_iter().enumerate() {
            let line = raw.as_ref().trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let pattern = Pattern::parse(line).map_err(|source| FinderError::InvalidRegex {
                line: idx + 1,
                pattern: line.to_string(),
                source,
            })?;
            patterns.push(pattern);
        }
        let has_insensitive = patterns.iter().any(Pattern::is_case_insensitive);
        Ok(Self {
            patterns,
            has_insensitive,
        })
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern needs the lower-cased line
    pub fn has_insensitive(&self) -> bool {
        self.has_insensitive
    }

    /// Returns the first pattern matching `line`, in list order.
    ///
    /// `folded` is scratch space for the lower-cased line. It is only
    /// written when the set has a case-insensitive pattern, so callers can
    /// reuse one buffer for every line of a file.
    pub fn first_match(&self, line: &str, folded: &mut String) -> Option<&Pattern> {
        if self.has_insensitive {
            folded.clear();
            fold_case(line, folded);
        }
        let folded = folded.as_str();
        self.patterns
            .iter()
            .find(|p| p.is_match_folded(line, folded))
    }
}

/// Reads and compiles a pattern file.
pub fn load_patterns(path: &Path) -> FinderResult<PatternSet> {
    let content = std::fs::read_to_string(path).map_err(|source| FinderError::PatternFile {
        path: path.to_path_buf(),
        source,
    })?;
    let set = PatternSet::compile(content.lines())?;
    debug!(
        count = set.len(),
        insensitive = set.has_insensitive(),
        file = %path.display(),
        "Loaded patterns"
    );
    Ok(set)
}

fn cached_regex(expr: &str) -> Result<Regex, regex::Error> {
    if let Some(re) = REGEX_CACHE.get(expr) {
        return Ok(re.clone());
    }
    let re = Regex::new(expr)?;
    REGEX_CACHE.insert(expr.to_string(), re.clone());
    Ok(re)
}

/// Appends the lower-cased `s` to `out`
fn fold_case(s: &str, out: &mut String) {
    out.extend(s.chars().flat_map(char::to_lowercase));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_compile_kinds_in_order() {
        let set = PatternSet::compile([
            "# comment",
            "",
            "foo",
            "  re:bar\\d+  ",
            "plain:i:HeLLo",
            "plain:literal.*",
        ])
        .unwrap();

        assert_eq!(set.len(), 4);
        assert!(set.has_insensitive());
        let p = set.patterns();
        assert!(matches!(&p[0], Pattern::Plain(s) if s == "foo"));
        assert!(matches!(&p[1], Pattern::Regex(_)));
        assert!(matches!(&p[2], Pattern::PlainInsensitive(s) if s == "hello"));
        assert!(matches!(&p[3], Pattern::Plain(s) if s == "literal.*"));
    }

    #[test]
    fn test_no_insensitive_flag() {
        let set = PatternSet::compile(["foo", "re:x+"]).unwrap();
        assert!(!set.has_insensitive());
    }

    #[test]
    fn test_invalid_regex_fails_whole_set() {
        let err = PatternSet::compile(["foo", "# note", "re:(unclosed"]).unwrap_err();
        match err {
            FinderError::InvalidRegex { line, pattern, .. } => {
                assert_eq!(line, 3);
                assert_eq!(pattern, "re:(unclosed");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_describe() {
        let set = PatternSet::compile(["re:^user=\\w+$", "plain:i:Token", "secret"]).unwrap();
        let descs: Vec<String> = set.patterns().iter().map(Pattern::describe).collect();
        assert_eq!(descs, vec!["^user=\\w+$", "plain:i:token", "secret"]);
    }

    #[test]
    fn test_matching() {
        let set = PatternSet::compile(["foo", "re:bar\\d+", "plain:i:ERROR"]).unwrap();
        let mut folded = String::new();

        let hit = set.first_match("a foo b", &mut folded).unwrap();
        assert_eq!(hit.describe(), "foo");
        assert_eq!(set.first_match("bar12", &mut folded).unwrap().describe(), "bar\\d+");
        assert_eq!(
            set.first_match("Fatal Error here", &mut folded).unwrap().describe(),
            "plain:i:error"
        );
        assert!(set.first_match("FOO bar", &mut folded).is_none());
    }

    #[test]
    fn test_first_pattern_wins() {
        let set = PatternSet::compile(["re:fo+", "foo"]).unwrap();
        let mut folded = String::new();
        assert_eq!(set.first_match("foo", &mut folded).unwrap().describe(), "fo+");
    }

    #[test]
    fn test_case_sensitive_ignores_folded_line() {
        // A case-sensitive literal must not match through the folded copy.
        let set = PatternSet::compile(["abc", "plain:i:zzz"]).unwrap();
        let mut folded = String::new();
        assert!(set.first_match("ABC", &mut folded).is_none());
        assert_eq!(folded, "abc");
    }

    #[test]
    fn test_standalone_is_match() {
        let p = Pattern::parse("plain:i:World").unwrap();
        assert!(p.is_match("HELLO WORLD"));
        assert!(!Pattern::parse("World").unwrap().is_match("HELLO WORLD"));
    }

    #[test]
    fn test_load_patterns_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "foo\n\n# skip\nre:bar\\d+").unwrap();
        let set = load_patterns(file.path()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_load_missing_pattern_file() {
        let err = load_patterns(Path::new("/definitely/not/here.txt")).unwrap_err();
        assert!(matches!(err, FinderError::PatternFile { .. }));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_regex_cache_reuse() {
        let a = cached_regex("cache-me-[0-9]+").unwrap();
        let b = cached_regex("cache-me-[0-9]+").unwrap();
        assert_eq!(a.as_str(), b.as_str());
        assert!(REGEX_CACHE.contains_key("cache-me-[0-9]+"));
    }
}
