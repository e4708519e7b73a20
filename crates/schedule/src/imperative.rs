//! Extraction of imperative lines (`Notify …`, `Run action:…`) from page
//! text.
//!
//! The scanner skips fenced code blocks, inline code spans (tracked
//! statefully across lines), and backslash-escaped `@` words. Parse
//! problems become warnings, never failures; good lines are never blocked
//! by bad ones.

use indexmap::IndexMap;

use crate::token::{parse_token, FilterToken, ScheduleToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImperativeKind {
    Notify,
    RunAction,
}

/// One parsed imperative line.
#[derive(Debug, Clone)]
pub struct Imperative {
    pub kind: ImperativeKind,
    /// Primary schedule token; at most one per imperative.
    pub token: Option<ScheduleToken>,
    /// Raw token text (without `@`), kept for persistence.
    pub token_raw: Option<String>,
    pub filters: Vec<FilterToken>,
    /// Declared action name (`Run action:` only).
    pub action_name: Option<String>,
    /// `--flag value` pairs (`Run action:` only). A flag without a value
    /// reads as "true".
    pub args: IndexMap<String, String>,
    pub message: String,
    /// 1-based source line number.
    pub line_no: usize,
    /// The trimmed source line.
    pub raw: String,
}

#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub line_no: usize,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct ExtractResult {
    pub imperatives: Vec<Imperative>,
    pub warnings: Vec<ParseWarning>,
}

/// Scan page text for imperative lines.
pub fn extract(text: &str) -> ExtractResult {
    let lines: Vec<&str> = text.lines().collect();
    let mut result = ExtractResult::default();
    let mut in_fence = false;
    let mut in_inline = false;
    let mut consumed = vec![false; lines.len()];

    for i in 0..lines.len() {
        let line = lines[i];
        let trimmed = line.trim();

        if trimmed.starts_with("```") {
            in_fence = !in_fence;
            in_inline = false;
            continue;
        }
        if in_fence {
            continue;
        }

        let started_inside_inline = in_inline;
        if count_backticks(line) % 2 == 1 {
            in_inline = !in_inline;
        }
        if started_inside_inline || consumed[i] {
            continue;
        }

        let mut imp = match parse_line(trimmed, i + 1, &mut result.warnings) {
            Some(imp) => imp,
            None => continue,
        };

        // Optional blockquote message: blank lines, then contiguous `> …`
        // lines. Consumed so they are never re-parsed as imperatives.
        let mut j = i + 1;
        while j < lines.len() && lines[j].trim().is_empty() {
            j += 1;
        }
        let mut quote_lines: Vec<String> = Vec::new();
        while j < lines.len() {
            match lines[j].trim_start().strip_prefix('>') {
                Some(q) => {
                    quote_lines.push(q.strip_prefix(' ').unwrap_or(q).to_string());
                    consumed[j] = true;
                    j += 1;
                }
                None => break,
            }
        }
        if !quote_lines.is_empty() {
            let quoted = quote_lines.join("\n");
            imp.message = if imp.message.is_empty() {
                quoted
            } else {
                format!("{}\n{}", imp.message, quoted)
            };
        }

        result.imperatives.push(imp);
    }

    result
}

/// Parse one trimmed line as an imperative, or `None` if it is prose.
///
/// Also used by the runner to rebind handlers from persisted lines.
pub fn parse_line(
    trimmed: &str,
    line_no: usize,
    warnings: &mut Vec<ParseWarning>,
) -> Option<Imperative> {
    let (kind, rest) = if let Some(r) = trimmed.strip_prefix("Notify ") {
        (ImperativeKind::Notify, r)
    } else if let Some(r) = trimmed.strip_prefix("Run action:") {
        (ImperativeKind::RunAction, r)
    } else {
        return None;
    };

    let mut imp = Imperative {
        kind,
        token: None,
        token_raw: None,
        filters: Vec::new(),
        action_name: None,
        args: IndexMap::new(),
        message: String::new(),
        line_no,
        raw: trimmed.to_string(),
    };

    let body = match kind {
        ImperativeKind::Notify => rest,
        ImperativeKind::RunAction => {
            let mut parts = rest.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or("").trim();
            if name.is_empty() {
                warnings.push(ParseWarning {
                    line_no,
                    message: "Run action: missing action name".to_string(),
                });
                return None;
            }
            imp.action_name = Some(name.to_string());
            parts.next().unwrap_or("")
        }
    };

    let mut message_words: Vec<String> = Vec::new();
    let mut in_code = false;
    let mut words = body.split_whitespace().peekable();

    while let Some(word) = words.next() {
        let word_in_code = in_code || word.starts_with('`');
        if word.matches('`').count() % 2 == 1 {
            in_code = !in_code;
        }
        if word_in_code {
            message_words.push(word.to_string());
            continue;
        }

        // `\@…` is an escaped token: plain text, backslash dropped.
        if let Some(escaped) = word.strip_prefix("\\@") {
            message_words.push(format!("@{escaped}"));
            continue;
        }

        if let Some(tok_str) = word.strip_prefix('@') {
            if tok_str.is_empty() {
                message_words.push(word.to_string());
                continue;
            }
            match parse_token(tok_str) {
                Ok(ScheduleToken::Filter(f)) => {
                    if !imp.filters.contains(&f) {
                        imp.filters.push(f);
                    }
                }
                Ok(tok) => {
                    if imp.token.is_none() {
                        imp.token = Some(tok);
                        imp.token_raw = Some(tok_str.to_string());
                    } else {
                        warnings.push(ParseWarning {
                            line_no,
                            message: format!("surplus schedule token '@{tok_str}' kept as text"),
                        });
                        message_words.push(word.to_string());
                    }
                }
                Err(e) => {
                    warnings.push(ParseWarning {
                        line_no,
                        message: e.to_string(),
                    });
                    message_words.push(word.to_string());
                }
            }
            continue;
        }

        if kind == ImperativeKind::RunAction && word.starts_with("--") && word.len() > 2 {
            let key = word.trim_start_matches('-').to_string();
            let value = match words.peek() {
                Some(next) if !next.starts_with("--") => {
                    words.next().map(|w| w.to_string()).unwrap_or_default()
                }
                _ => "true".to_string(),
            };
            imp.args.insert(key, value);
            continue;
        }

        message_words.push(word.to_string());
    }

    imp.message = message_words.join(" ");
    Some(imp)
}

fn count_backticks(line: &str) -> usize {
    let mut count = 0;
    let mut prev_backslash = false;
    for c in line.chars() {
        if c == '`' && !prev_backslash {
            count += 1;
        }
        prev_backslash = c == '\\';
    }
    count
}
