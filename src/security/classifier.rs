//! Read-only statement classifier.
//!
//! A syntactic allowlist, not a parser: the leading keyword must be one of
//! SELECT, SHOW, DESCRIBE, DESC or EXPLAIN (opening parentheses may precede it), and
//! nothing but whitespace may follow a top-level `;`. A SELECT that calls a mutating
//! stored function still passes.

use crate::error::{SecurityError, SecurityResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Leading keywords that may reach the database.
static ALLOWED_KEYWORDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["SELECT", "SHOW", "DESCRIBE", "DESC", "EXPLAIN"].into_iter().collect());

/// Keywords that take a statement operand and run it under ANALYZE.
static EXPLAIN_KEYWORDS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| ["DESCRIBE", "DESC", "EXPLAIN"].into_iter().collect());

/// Regex for normalizing whitespace in log previews.
static WHITESPACE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid regex: whitespace pattern"));

const ALLOWED_LIST: &str = "SELECT, SHOW, DESCRIBE, DESC and EXPLAIN";

/// Number of leading words kept from the first statement.
const KEPT_WORDS: usize = 6;

/// Outcome of classifying one piece of SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementVerdict {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Upper-cased leading keyword, when one was found.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
}

impl StatementVerdict {
    fn allow(keyword: String) -> Self {
        Self {
            allowed: true,
            reason: None,
            keyword: Some(keyword),
        }
    }

    fn deny(reason: impl Into<String>, keyword: Option<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            keyword,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanIssue {
    UnterminatedQuote(char),
    UnterminatedComment,
    ExecutableComment,
    ChainedStatement,
}

impl ScanIssue {
    fn reason(self) -> String {
        match self {
            Self::UnterminatedQuote('`') => "Unterminated quoted identifier".into(),
            Self::UnterminatedQuote(_) => "Unterminated string literal".into(),
            Self::UnterminatedComment => "Unterminated block comment".into(),
            Self::ExecutableComment => {
                "Executable comments (/*! ... */) are not allowed".into()
            }
            Self::ChainedStatement => {
                "Multiple statements are not allowed: only whitespace may follow ';'".into()
            }
        }
    }
}

/// Lexical summary of the first statement.
#[derive(Debug, Default)]
struct Scan<'a> {
    /// First word, only when nothing but `(` precedes it.
    leading: Option<&'a str>,
    /// Set by the first token other than `(`.
    past_leading: bool,
    /// First few top-level words of the statement.
    words: Vec<&'a str>,
    /// Byte offset of the first top-level `;`.
    terminator: Option<usize>,
    /// Whether any token (not whitespace or comment) was seen.
    has_tokens: bool,
}

fn scan(sql: &str) -> Result<Scan<'_>, ScanIssue> {
    let bytes = sql.as_bytes();
    let mut out = Scan::default();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];

        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }

        if out.terminator.is_some() {
            return Err(ScanIssue::ChainedStatement);
        }

        // `#` comment, or `-- ` comment (the dashes must be followed by whitespace)
        if b == b'#'
            || (b == b'-'
                && bytes.get(i + 1) == Some(&b'-')
                && bytes.get(i + 2).is_none_or(|c| c.is_ascii_whitespace() || c.is_ascii_control()))
        {
            i = bytes[i..]
                .iter()
                .position(|&c| c == b'\n')
                .map_or(bytes.len(), |p| i + p + 1);
            continue;
        }

        if b == b'/' && bytes.get(i + 1) == Some(&b'*') {
            let body = &bytes[i + 2..];
            if body.first() == Some(&b'!') || body.starts_with(b"M!") {
                return Err(ScanIssue::ExecutableComment);
            }
            let end = body
                .windows(2)
                .position(|w| w == b"*/")
                .ok_or(ScanIssue::UnterminatedComment)?;
            i += 2 + end + 2;
            continue;
        }

        match b {
            b';' => {
                out.terminator = Some(i);
                i += 1;
            }
            b'\'' | b'"' | b'`' => {
                out.has_tokens = true;
                out.past_leading = true;
                i = skip_quoted(bytes, i)?;
            }
            b'(' => {
                out.has_tokens = true;
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == b'_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'$')
                {
                    i += 1;
                }
                let word = &sql[start..i];
                if !out.past_leading {
                    out.leading = Some(word);
                }
                if out.words.len() < KEPT_WORDS {
                    out.words.push(word);
                }
                out.has_tokens = true;
                out.past_leading = true;
            }
            _ => {
                out.has_tokens = true;
                out.past_leading = true;
                i += sql[i..].chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    Ok(out)
}

/// Returns the offset just past the closing quote that matches `bytes[start]`.
fn skip_quoted(bytes: &[u8], start: usize) -> Result<usize, ScanIssue> {
    let quote = bytes[start];
    let backslash_escapes = quote != b'`';
    let mut i = start + 1;

    while i < bytes.len() {
        let c = bytes[i];
        if backslash_escapes && c == b'\\' {
            i += 2;
            continue;
        }
        if c == quote {
            // A doubled quote is an escaped quote character.
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Ok(i + 1);
        }
        i += 1;
    }

    Err(ScanIssue::UnterminatedQuote(quote as char))
}

/// Checks that an EXPLAIN-style statement does not execute a non-SELECT target.
fn explain_analyze_target_allowed(words: &[&str]) -> bool {
    let Some(second) = words.get(1) else {
        return true;
    };
    if !second.eq_ignore_ascii_case("ANALYZE") {
        return true;
    }

    let mut rest = words[2..].iter();
    while let Some(word) = rest.next() {
        if word.eq_ignore_ascii_case("FORMAT") {
            rest.next();
            continue;
        }
        return word.eq_ignore_ascii_case("SELECT");
    }
    false
}

/// Statement classifier gating `execute_sql`.
#[derive(Debug, Clone)]
pub struct StatementClassifier {
    max_query_length: usize,
}

impl Default for StatementClassifier {
    fn default() -> Self {
        Self {
            max_query_length: 10_000,
        }
    }
}

impl StatementClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_query_length(mut self, length: usize) -> Self {
        self.max_query_length = length;
        self
    }

    /// Decide ALLOW or DENY for `sql`. Pure function of the text.
    pub fn classify(&self, sql: &str) -> StatementVerdict {
        self.analyze(sql).0
    }

    /// Classifies `sql` and returns the single statement to run, with the trailing
    /// terminator and whitespace removed.
    pub fn prepare<'a>(&self, sql: &'a str) -> SecurityResult<&'a str> {
        let (verdict, terminator) = self.analyze(sql);
        if !verdict.allowed {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "Statement not allowed".into());
            warn!(reason = %reason, "Statement denied");
            return Err(SecurityError::StatementDenied(reason));
        }

        let statement = match terminator {
            Some(end) => &sql[..end],
            None => sql,
        };
        debug!(statement = %preview(statement, 100), "Statement allowed");
        Ok(statement.trim())
    }

    fn analyze(&self, sql: &str) -> (StatementVerdict, Option<usize>) {
        if sql.len() > self.max_query_length {
            return (
                StatementVerdict::deny(
                    format!(
                        "Statement exceeds maximum length of {} characters",
                        self.max_query_length
                    ),
                    None,
                ),
                None,
            );
        }

        let scan = match scan(sql) {
            Ok(scan) => scan,
            Err(issue) => return (StatementVerdict::deny(issue.reason(), None), None),
        };

        if !scan.has_tokens {
            return (StatementVerdict::deny("Empty statement", None), None);
        }

        let Some(leading) = scan.leading else {
            return (
                StatementVerdict::deny(
                    format!(
                        "Could not determine statement kind; only {} statements are allowed",
                        ALLOWED_LIST
                    ),
                    None,
                ),
                None,
            );
        };

        let keyword = leading.to_ascii_uppercase();
        if !ALLOWED_KEYWORDS.contains(keyword.as_str()) {
            let reason = format!(
                "{} statements are not allowed; only {} statements are allowed",
                keyword, ALLOWED_LIST
            );
            return (StatementVerdict::deny(reason, Some(keyword)), None);
        }

        if EXPLAIN_KEYWORDS.contains(keyword.as_str()) && !explain_analyze_target_allowed(&scan.words)
        {
            let reason = format!(
                "{} ANALYZE executes its target statement; only SELECT targets are allowed",
                keyword
            );
            return (StatementVerdict::deny(reason, Some(keyword)), None);
        }

        (StatementVerdict::allow(keyword), scan.terminator)
    }
}

/// Whitespace-normalized, truncated copy of `sql` for log lines.
pub fn preview(sql: &str, max_chars: usize) -> String {
    let normalized = WHITESPACE_REGEX.replace_all(sql.trim(), " ");
    if normalized.chars().count() <= max_chars {
        return normalized.into_owned();
    }
    let mut cut: String = normalized.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}
