//! Root-anchored double-star globs compiled to regular expressions.
//!
//! Supported syntax:
//!
//! - `*` matches any run of characters other than `/`
//! - `?` matches a single character other than `/`
//! - `**` as a whole path component matches zero or more directories
//! - `[abc]`, `[a-z]` and the negated `[!abc]` character classes
//! - `{a,b}` alternation (may nest)
//! - `\` escapes the next character

use regex::Regex;

use crate::error::PolicyError;

/// A compiled glob selector.
#[derive(Debug, Clone)]
pub struct Selector {
    regex: Regex,
}

impl Selector {
    /// Compile a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::InvalidSelector`] for unterminated classes,
    /// alternations, or a trailing escape.
    pub fn compile(pattern: &str) -> Result<Self, PolicyError> {
        let source = translate(pattern).map_err(|reason| invalid(pattern, reason))?;
        let regex = Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))?;
        Ok(Self { regex })
    }

    /// Whether the whole `path` matches the pattern.
    pub fn is_match(&self, path: &str) -> bool {
        self.regex.is_match(path)
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> PolicyError {
    PolicyError::InvalidSelector {
        pattern: pattern.to_owned(),
        reason: reason.into(),
    }
}

fn translate(pattern: &str) -> Result<String, String> {
    let components = split_components(pattern);
    let last = components.len() - 1;
    let mut out = String::from("^");

    for (i, component) in components.iter().enumerate() {
        if *component == "**" {
            if i < last {
                out.push_str("(?:[^/]+/)*");
            } else if out.ends_with('/') {
                // `a/**` also matches `a` itself.
                out.pop();
                out.push_str("(?:/.*)?");
            } else {
                out.push_str(".*");
            }
            continue;
        }

        translate_fragment(component, &mut out)?;
        if i < last {
            out.push('/');
        }
    }

    out.push('$');
    Ok(out)
}

/// Split on `/` outside of classes and alternations.
fn split_components(pattern: &str) -> Vec<&str> {
    let mut components = Vec::new();
    let mut start = 0;
    let mut depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.char_indices();

    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '{' if !in_class => depth += 1,
            '}' if !in_class && depth > 0 => depth -= 1,
            '/' if !in_class && depth == 0 => {
                components.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    components.push(&pattern[start..]);
    components
}

fn translate_fragment(fragment: &str, out: &mut String) -> Result<(), String> {
    let chars: Vec<char> = fragment.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str("[^/]*"),
            '?' => out.push_str("[^/]"),
            '\\' => {
                i += 1;
                let escaped = chars.get(i).ok_or("trailing escape")?;
                push_literal(*escaped, out);
            }
            '[' => i = translate_class(&chars, i, out)?,
            '{' => i = translate_alternation(&chars, i, out)?,
            c => push_literal(c, out),
        }
        i += 1;
    }

    Ok(())
}

/// Translate a class starting at `open`, returning the index of its `]`.
fn translate_class(chars: &[char], open: usize, out: &mut String) -> Result<usize, String> {
    let mut i = open + 1;
    let negated = matches!(chars.get(i).copied(), Some('!' | '^'));
    if negated {
        i += 1;
    }

    let mut body = String::new();
    while let Some(&c) = chars.get(i) {
        match c {
            ']' => {
                if body.is_empty() {
                    return Err("empty character class".to_owned());
                }
                out.push_str(if negated { "[^/" } else { "[" });
                out.push_str(&body);
                out.push(']');
                return Ok(i);
            }
            '\\' => {
                i += 1;
                let escaped = chars.get(i).ok_or("trailing escape")?;
                push_class_literal(*escaped, &mut body);
            }
            '-' => body.push('-'),
            c => push_class_literal(c, &mut body),
        }
        i += 1;
    }

    Err("unterminated character class".to_owned())
}

/// Translate an alternation starting at `open`, returning the index of its `}`.
fn translate_alternation(chars: &[char], open: usize, out: &mut String) -> Result<usize, String> {
    let mut depth = 0usize;
    let mut alternatives = Vec::new();
    let mut start = open + 1;
    let mut i = open;

    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => depth += 1,
            ',' if depth == 1 => {
                alternatives.push(&chars[start..i]);
                start = i + 1;
            }
            '}' => {
                depth -= 1;
                if depth == 0 {
                    alternatives.push(&chars[start..i]);
                    out.push_str("(?:");
                    for (n, alternative) in alternatives.iter().enumerate() {
                        if n > 0 {
                            out.push('|');
                        }
                        let alternative: String = alternative.iter().collect();
                        translate_fragment(&alternative, out)?;
                    }
                    out.push(')');
                    return Ok(i);
                }
            }
            _ => {}
        }
        i += 1;
    }

    Err("unterminated alternation".to_owned())
}

fn push_literal(c: char, out: &mut String) {
    let mut buf = [0u8; 4];
    out.push_str(&regex::escape(c.encode_utf8(&mut buf)));
}

fn push_class_literal(c: char, body: &mut String) {
    if matches!(c, '\\' | '[' | ']' | '^' | '-' | '&' | '~') {
        body.push('\\');
    }
    body.push(c);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(pattern: &str, path: &str) -> bool {
        Selector::compile(pattern).unwrap().is_match(path)
    }

    #[test]
    fn single_star_stays_within_component() {
        assert!(matches("logs/*.txt", "logs/a.txt"));
        assert!(!matches("logs/*.txt", "logs/deep/a.txt"));
        assert!(!matches("*.txt", "a/b.txt"));
    }

    #[test]
    fn double_star_spans_directories() {
        let pattern = "artifacts/projects/**/test-results/**/*";
        assert!(matches(pattern, "artifacts/projects/p1/test-results/a.txt"));
        assert!(matches(pattern, "artifacts/projects/p1/test-results/x/y/a.txt"));
        assert!(!matches(pattern, "artifacts/projects/p1/other/a.txt"));
    }

    #[test]
    fn double_star_matches_zero_directories() {
        assert!(matches("a/**/b", "a/b"));
        assert!(matches("a/**/b", "a/x/y/b"));
        assert!(!matches("a/**/b", "a/xb"));
    }

    #[test]
    fn trailing_double_star_matches_everything_below() {
        assert!(matches("a/**", "a"));
        assert!(matches("a/**", "a/b/c"));
        assert!(!matches("a/**", "ab"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(matches("file?.log", "file1.log"));
        assert!(!matches("file?.log", "file/.log"));
        assert!(matches("file[0-9].log", "file7.log"));
        assert!(!matches("file[0-9].log", "filex.log"));
        assert!(matches("file[!0-9].log", "filex.log"));
        assert!(!matches("file[!0-9].log", "file7.log"));
    }

    #[test]
    fn alternation() {
        assert!(matches("{foo,bar}.log", "foo.log"));
        assert!(matches("{foo,bar}.log", "bar.log"));
        assert!(!matches("{foo,bar}.log", "baz.log"));
        assert!(matches("out/{a,b/c}/x", "out/b/c/x"));
        assert!(matches("{a,{b,c}d}", "cd"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        assert!(matches("a.b", "a.b"));
        assert!(!matches("a.b", "aXb"));
        assert!(matches("a+(b)", "a+(b)"));
        assert!(matches(r"lit\*", "lit*"));
        assert!(!matches(r"lit\*", "literal"));
    }

    #[test]
    fn malformed_patterns_are_rejected() {
        for pattern in ["[abc", "{a,b", "trailing\\", "[]"] {
            let err = Selector::compile(pattern).unwrap_err();
            assert!(
                matches!(err, PolicyError::InvalidSelector { .. }),
                "{pattern} should be invalid"
            );
        }
    }
}
