// src/core/sql.rs

//! SQL write classification (C1): decide, from a raw SQL string, whether
//! executing it would mutate database state. Total and pure — never fails,
//! never looks past the leading keyword in statement position.

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "CREATE", "DROP", "ALTER", "TRUNCATE", "VACUUM",
    "REINDEX", "ANALYZE", "ATTACH", "DETACH", "SAVEPOINT", "RELEASE", "ROLLBACK",
];

/// Skips leading whitespace and leading SQL comments (`--` line comments,
/// non-nesting `/* */` block comments), repeating until neither is present.
fn skip_ignorable_prefix(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start();
        if let Some(after_dashes) = trimmed.strip_prefix("--") {
            let end = after_dashes.find('\n').map(|i| i + 1).unwrap_or(after_dashes.len());
            rest = &after_dashes[end..];
            continue;
        }
        if let Some(after_open) = trimmed.strip_prefix("/*") {
            let end = after_open.find("*/").map(|i| i + 2).unwrap_or(after_open.len());
            rest = &after_open[end..];
            continue;
        }
        return trimmed;
    }
}

/// Returns the leading run of identifier characters, uppercased, plus the
/// byte offset in `sql` immediately after it.
fn leading_keyword(sql: &str) -> (String, usize) {
    let end = sql
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(sql.len());
    (sql[..end].to_ascii_uppercase(), end)
}

/// Scans forward from `start`, tracking parenthesis depth and quoted
/// regions, and returns the byte index of the matching top-level `)` for the
/// `(` assumed to sit at `start`. Returns `s.len()` if no match is found
/// (malformed input degrades gracefully rather than panicking).
fn find_matching_paren(s: &str, start: usize) -> usize {
    let bytes = s.as_bytes();
    debug_assert_eq!(bytes[start], b'(');
    let mut depth = 0i32;
    let mut i = start;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                // A doubled quote char is an escaped literal quote, not a close.
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    bytes.len()
}

/// Splits `sql` into top-level statements on `;`, skipping separators that
/// fall inside parentheses, quoted literals, or comments.
fn split_top_level_statements(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut statements = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut stmt_start = 0usize;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => {
                quote = Some(b);
                i += 1;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let nl = sql[i..].find('\n').map(|o| i + o + 1).unwrap_or(bytes.len());
                i = nl;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                let end = sql[i + 2..]
                    .find("*/")
                    .map(|o| i + 2 + o + 2)
                    .unwrap_or(bytes.len());
                i = end;
            }
            b'(' => {
                depth += 1;
                i += 1;
            }
            b')' => {
                depth -= 1;
                i += 1;
            }
            b';' if depth <= 0 => {
                statements.push(&sql[stmt_start..i]);
                stmt_start = i + 1;
                i += 1;
            }
            _ => i += 1,
        }
    }
    if stmt_start < bytes.len() {
        statements.push(&sql[stmt_start..]);
    }
    statements
}

/// Strips one or more leading `WITH [RECURSIVE] name [(cols)] AS (...)`
/// common-table-expression definitions and returns the residual statement
/// text, or `None` if `sql` does not start with `WITH` in statement
/// position.
fn strip_cte_prefix(sql: &str) -> Option<&str> {
    let (keyword, after_with) = leading_keyword(sql);
    if keyword != "WITH" {
        return None;
    }
    let mut rest = sql[after_with..].trim_start();
    if let Some(stripped) = rest.strip_prefix("RECURSIVE") {
        if stripped
            .chars()
            .next()
            .map(|c| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(true)
        {
            rest = stripped.trim_start();
        }
    }

    loop {
        // CTE alias identifier.
        let ident_end = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(rest.len());
        if ident_end == 0 {
            return Some(rest);
        }
        rest = rest[ident_end..].trim_start();

        // Optional column list.
        if rest.starts_with('(') {
            let close = find_matching_paren(rest, 0);
            if close >= rest.len() {
                return Some(rest);
            }
            rest = rest[close + 1..].trim_start();
        }

        // AS keyword.
        let (kw, kw_end) = leading_keyword(rest);
        if kw != "AS" {
            return Some(rest);
        }
        rest = rest[kw_end..].trim_start();

        // The CTE body, parenthesized.
        if !rest.starts_with('(') {
            return Some(rest);
        }
        let close = find_matching_paren(rest, 0);
        if close >= rest.len() {
            return Some(&rest[rest.len()..]);
        }
        rest = rest[close + 1..].trim_start();

        if let Some(after_comma) = rest.strip_prefix(',') {
            rest = after_comma.trim_start();
            continue;
        }
        return Some(rest);
    }
}

/// `PRAGMA` is a write iff its tail contains a raw `=` assignment outside
/// parentheses and quoted literals — `PRAGMA journal_mode` and
/// `PRAGMA table_info(users)` are reads, `PRAGMA user_version = 1` is a
/// write.
fn pragma_is_assignment(tail: &str) -> bool {
    let bytes = tail.as_bytes();
    let mut depth = 0i32;
    let mut quote: Option<u8> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                if bytes.get(i + 1) == Some(&q) {
                    i += 2;
                    continue;
                }
                quote = None;
            }
            i += 1;
            continue;
        }
        match b {
            b'\'' | b'"' => quote = Some(b),
            b'(' => depth += 1,
            b')' => depth -= 1,
            b'=' if depth <= 0 => return true,
            _ => {}
        }
        i += 1;
    }
    false
}

/// Decides whether executing `sql` would mutate database state.
pub fn is_write(sql: &str) -> bool {
    let stripped = skip_ignorable_prefix(sql);
    if stripped.is_empty() {
        return false;
    }

    if let Some(residual) = strip_cte_prefix(stripped) {
        return is_write(residual);
    }

    let (keyword, end) = leading_keyword(stripped);
    if keyword.is_empty() {
        return false;
    }

    if keyword == "PRAGMA" {
        return pragma_is_assignment(&stripped[end..]);
    }

    WRITE_KEYWORDS.contains(&keyword.as_str())
}

/// Per-statement classification of one statement within a script.
#[derive(Debug, Clone)]
pub struct StatementClassification {
    pub sql: String,
    pub is_write: bool,
}

/// The result of classifying every top-level statement in a multi-statement
/// script (§4.1 "Script classification").
#[derive(Debug, Clone)]
pub struct ScriptClassification {
    pub statements: Vec<StatementClassification>,
    pub any_write: bool,
}

/// Splits `script` into top-level statements and classifies each one; a
/// script is a write as a whole iff any statement in it is.
pub fn classify_script(script: &str) -> ScriptClassification {
    let statements: Vec<StatementClassification> = split_top_level_statements(script)
        .into_iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| StatementClassification {
            sql: s.to_string(),
            is_write: is_write(s),
        })
        .collect();
    let any_write = statements.iter().any(|s| s.is_write);
    ScriptClassification {
        statements,
        any_write,
    }
}
