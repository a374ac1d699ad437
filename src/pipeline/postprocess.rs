//! Post-processing: deterministic cleanup of OCR'd Markdown.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted vision models leave artefacts that the prompt cannot
//! reliably suppress:
//!
//! - Wrapping a page in ` ```markdown ... ``` ` fences
//! - Windows-style `\r\n` line endings and trailing blanks
//! - Zero-width spaces and BOMs copied from the PDF text layer
//! - Extra `| --- |` separator rows in the body of long tables
//! - Page headers and footers transcribed on every page, so a 20-page
//!   tariff sheet repeats the bank's legal notice 20 times
//!
//! The first item is applied to each page as it is stored
//! ([`clean_page`]). The rest run once over the assembled document
//! ([`clean_document`]), and only for documents without page errors: the
//! warning marker and error comments of an incomplete document stay exactly
//! as written so the next run can find them.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

/// Maximum occurrences of the same non-blank line kept in one document.
pub const MAX_LINE_REPEATS: usize = 2;

/// Clean one page reply before it is checkpointed.
pub fn clean_page(input: &str) -> String {
    strip_markdown_fences(input).trim().to_string()
}

/// Clean an assembled, error-free document.
///
/// Rules (applied in order):
/// 1. Normalise line endings (CRLF → LF)
/// 2. Strip invisible Unicode (zero-width spaces, BOM, soft hyphens)
/// 3. Trim trailing whitespace per line
/// 4. Remove spurious mid-table separator rows
/// 5. Drop repeated boilerplate lines ([`dedup_repeated_lines`])
/// 6. Collapse 3+ consecutive blank lines down to 2
/// 7. Ensure the file ends with exactly one newline
pub fn clean_document(input: &str) -> String {
    let s = normalise_line_endings(input);
    let s = remove_invisible_chars(&s);
    let s = trim_trailing_whitespace(&s);
    let s = remove_mid_table_separators(&s);
    let s = dedup_repeated_lines(&s, MAX_LINE_REPEATS);
    let s = collapse_blank_lines(&s);
    ensure_final_newline(&s)
}

// ── Page rule: strip outer markdown fences ───────────────────────────────

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\n(.*)\n```\s*$").unwrap());

fn strip_markdown_fences(input: &str) -> String {
    if let Some(caps) = RE_OUTER_FENCES.captures(input.trim()) {
        caps[1].to_string()
    } else {
        input.to_string()
    }
}

// ── Rule 1: Normalise line endings ───────────────────────────────────────

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

// ── Rule 2: Remove invisible Unicode characters ──────────────────────────

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

// ── Rule 3: Trim trailing whitespace per line ────────────────────────────

fn trim_trailing_whitespace(input: &str) -> String {
    input
        .lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 4: Remove spurious mid-table separator rows ─────────────────────
//
// GFM only allows a separator in position 2 of a table block. Pages that
// continue a table from the previous page often restart it with a new
// separator, which renders as a broken table once pages are concatenated.

fn remove_mid_table_separators(input: &str) -> String {
    let mut result: Vec<&str> = Vec::new();
    let mut table_line_count = 0usize;

    for line in input.lines() {
        if is_table_row(line) {
            table_line_count += 1;
            if is_separator_row(line) && table_line_count != 2 {
                continue;
            }
        } else {
            table_line_count = 0;
        }
        result.push(line);
    }

    result.join("\n")
}

fn is_table_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|') && trimmed.ends_with('|') && trimmed.len() > 2
}

fn is_separator_row(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.starts_with('|')
        && trimmed
            .chars()
            .all(|c| c == '|' || c == '-' || c == ':' || c == ' ')
}

// ── Rule 5: Drop repeated boilerplate lines ──────────────────────────────

/// Keep at most `max_repeats` occurrences of each non-blank line.
///
/// Lines are compared trimmed and lower-cased; the kept occurrences are
/// emitted verbatim. Blank lines are never dropped.
pub fn dedup_repeated_lines(input: &str, max_repeats: usize) -> String {
    let mut seen: HashMap<String, usize> = HashMap::new();
    input
        .lines()
        .filter(|line| {
            let key = line.trim().to_lowercase();
            if key.is_empty() {
                return true;
            }
            let count = seen.entry(key).or_insert(0);
            *count += 1;
            *count <= max_repeats
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Rule 6: Collapse excessive blank lines ───────────────────────────────

static RE_BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{4,}").unwrap());

fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_LINES.replace_all(input, "\n\n\n").to_string()
}

// ── Rule 7: Ensure file ends with single newline ─────────────────────────

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim_end();
    if trimmed.is_empty() {
        String::from("\n")
    } else {
        format!("{}\n", trimmed)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────
