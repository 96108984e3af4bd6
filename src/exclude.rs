//! Exclusion rules read from a plain-text list, one rule per line:
//!
//! - `*.ext`     excludes files whose path ends with `.ext`
//! - `Name/`     excludes any directory whose path contains `Name` (and everything below it)
//! - `file.name` excludes any file whose path contains `file.name`
//!
//! Rules are matched against the path of a candidate below the input root.

use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::path::{normalize, SEPARATOR};

/// A single exclusion rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Substring match anywhere in a file path.
    File(String),
    /// Exact suffix match on a file path.
    Extension(String),
    /// Substring match anywhere in a directory path.
    Directory(String),
}

impl Rule {
    /// Classifies one line of an exclusions list. Returns `None` for lines
    /// that carry no pattern.
    pub fn classify(line: &str) -> Option<Rule> {
        let line = normalize(line);
        let rule = if let Some(ext) = line.strip_prefix('*') {
            Rule::Extension(ext.to_string())
        } else if let Some(dir) = line.strip_suffix(SEPARATOR) {
            Rule::Directory(dir.to_string())
        } else {
            Rule::File(line)
        };
        // CR from CRLF files is removed after classification.
        let rule = match rule {
            Rule::File(s) => Rule::File(strip_cr(s)),
            Rule::Extension(s) => Rule::Extension(strip_cr(s)),
            Rule::Directory(s) => Rule::Directory(strip_cr(s)),
        };
        if rule.pattern().is_empty() {
            None
        } else {
            Some(rule)
        }
    }

    pub fn pattern(&self) -> &str {
        match self {
            Rule::File(s) | Rule::Extension(s) | Rule::Directory(s) => s,
        }
    }

    /// Whether this rule removes `candidate`.
    pub fn matches(&self, candidate: &str) -> bool {
        match self {
            Rule::File(s) | Rule::Directory(s) => candidate.contains(s.as_str()),
            Rule::Extension(s) => candidate.ends_with(s.as_str()),
        }
    }

    fn applies_to_files(&self) -> bool {
        !matches!(self, Rule::Directory(_))
    }
}

fn strip_cr(mut s: String) -> String {
    while s.ends_with('\r') {
        s.pop();
    }
    s
}

/// Removes every candidate matched by `rule`.
pub fn apply<T: AsRef<str>>(candidates: Vec<T>, rule: &Rule) -> Vec<T> {
    candidates
        .into_iter()
        .filter(|c| {
            let hit = rule.matches(c.as_ref());
            if hit {
                debug!(candidate = c.as_ref(), rule = ?rule, "excluded");
            }
            !hit
        })
        .collect()
}

/// The full set of rules loaded for one compile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionRules {
    rules: Vec<Rule>,
}

impl ExclusionRules {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Parses newline-delimited exclusions text.
    pub fn parse(text: &str) -> Self {
        let rules = text.split('\n').filter_map(Rule::classify).collect();
        Self { rules }
    }

    /// Loads the exclusions list at `path`.
    ///
    /// A list that cannot be opened is not an error: a warning is logged and
    /// compilation proceeds without exclusions.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match fs::read(path) {
            Ok(bytes) => {
                let rules = Self::parse(&String::from_utf8_lossy(&bytes));
                info!(path = %path.display(), count = rules.len(), "Found exclusion list");
                for rule in &rules.rules {
                    debug!(?rule, "Adding exclusion");
                }
                rules
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to open exclusions list, ignoring and continuing");
                Self::default()
            }
        }
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Applies file and extension rules to file candidates.
    pub fn filter_files<T: AsRef<str>>(&self, candidates: Vec<T>) -> Vec<T> {
        self.rules
            .iter()
            .filter(|r| r.applies_to_files())
            .fold(candidates, |acc, rule| apply(acc, rule))
    }

    /// Applies directory rules to directory candidates.
    pub fn filter_dirs<T: AsRef<str>>(&self, candidates: Vec<T>) -> Vec<T> {
        self.rules
            .iter()
            .filter(|r| !r.applies_to_files())
            .fold(candidates, |acc, rule| apply(acc, rule))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn classifies_each_kind() {
        let rules = ExclusionRules::parse("*.txt\nThumbs.db\nTestDirectory/\n");
        assert_eq!(
            rules.rules(),
            &[
                Rule::Extension(".txt".into()),
                Rule::File("Thumbs.db".into()),
                Rule::Directory("TestDirectory".into()),
            ]
        );
    }

    #[test]
    fn strips_carriage_returns_and_skips_blank_lines() {
        let rules = ExclusionRules::parse("*.log\r\n\r\nnotes.md\r\n\n*\n");
        assert_eq!(
            rules.rules(),
            &[Rule::Extension(".log".into()), Rule::File("notes.md".into())]
        );
    }

    #[test]
    fn backslash_terminated_line_is_a_directory_rule() {
        assert_eq!(Rule::classify("build\\"), Some(Rule::Directory("build".into())));
    }

    #[test]
    fn extension_rule_needs_a_true_suffix() {
        let rule = Rule::Extension(".txt".into());
        assert!(rule.matches("docs/notes.txt"));
        assert!(rule.matches("a.txt.txt"));
        assert!(!rule.matches("docs/notes.txtx"));
        assert!(!rule.matches("docs.txt/readme"));
    }

    #[test]
    fn file_rule_is_a_substring_match() {
        let rules = ExclusionRules::parse("Thumbs.db");
        let kept = rules.filter_files(vec!["a/Thumbs.db", "b/Thumbs.dbx", "c/keep.png"]);
        assert_eq!(kept, vec!["c/keep.png"]);
    }

    #[test]
    fn directory_rules_only_touch_directories() {
        let rules = ExclusionRules::parse("cache/\n");
        assert_eq!(rules.filter_files(vec!["cache_notes.txt"]), vec!["cache_notes.txt"]);
        assert_eq!(rules.filter_dirs(vec!["cache", "src/cache", "src"]), vec!["src"]);
    }

    #[test]
    fn rule_order_does_not_change_the_result() {
        let candidates = vec!["a.txt", "b.bin", "tmp/c.bin", "notes.txtx", "tmp.txt"];
        let a = Rule::Extension(".txt".into());
        let b = Rule::File("tmp".into());
        let ab = apply(apply(candidates.clone(), &a), &b);
        let ba = apply(apply(candidates, &b), &a);
        assert_eq!(ab, ba);
        assert_eq!(ab, vec!["b.bin", "notes.txtx"]);
    }

    #[test]
    fn missing_list_degrades_to_no_rules() {
        let rules = ExclusionRules::load(Some(Path::new("/definitely/not/here/exclusions.txt")));
        assert!(rules.is_empty());
    }

    #[test]
    fn loads_rules_from_file() {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(b"*.tmp\r\nbuild/\r\n").unwrap();
        let rules = ExclusionRules::load(Some(f.path()));
        assert_eq!(rules.len(), 2);
        assert_eq!(rules.rules()[0], Rule::Extension(".tmp".into()));
        // CRLF directory lines end in CR, so they classify as file rules.
        assert_eq!(rules.rules()[1], Rule::File("build/".into()));
    }
}
