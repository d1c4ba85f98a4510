//! Safety gate for caller-supplied WHERE clauses.
//!
//! Callers are trusted to pre-escape values, but a clause must stay a
//! filter expression: no statement separators, no comments, no statement
//! keywords. Violations surface as `ErrUnsafeQuery`.

use hubd_core::{HubError, HubResult};

/// Statement-level keywords that must never appear in a filter clause.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "create", "alter", "truncate", "grant",
    "revoke", "union", "intersect", "except", "copy", "execute", "call", "do", "merge", "into",
    "returning", "vacuum", "analyze", "comment", "set", "reset", "listen", "notify",
];

/// Validate a raw WHERE clause (without the `WHERE` keyword). Empty input
/// is allowed and means "no filter".
pub fn check_where_clause(clause: &str) -> HubResult<()> {
    let clause = clause.trim();
    if clause.is_empty() {
        return Ok(());
    }
    let stripped = strip_string_literals(clause)?;
    if stripped.contains(';') {
        return Err(HubError::UnsafeQuery(
            "statement separator ';' not allowed".into(),
        ));
    }
    if stripped.contains("--") || stripped.contains("/*") {
        return Err(HubError::UnsafeQuery("comments not allowed".into()));
    }
    for token in word_tokens(&stripped) {
        if FORBIDDEN_KEYWORDS.contains(&token.as_str()) {
            return Err(HubError::UnsafeQuery(format!(
                "keyword {token:?} not allowed in a filter"
            )));
        }
    }
    Ok(())
}

/// Replace single-quoted literals (with `''` escaping) by placeholders so
/// keyword scanning cannot be fooled by quoted text. Unterminated quotes
/// are themselves a violation.
fn strip_string_literals(clause: &str) -> HubResult<String> {
    let mut out = String::with_capacity(clause.len());
    let mut chars = clause.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            out.push(c);
            continue;
        }
        loop {
            match chars.next() {
                Some('\'') => {
                    if chars.peek() == Some(&'\'') {
                        chars.next();
                        continue;
                    }
                    break;
                }
                Some(_) => continue,
                None => {
                    return Err(HubError::UnsafeQuery("unterminated string literal".into()))
                }
            }
        }
        out.push_str("''");
    }
    Ok(out)
}

fn word_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            current.push(c.to_ascii_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::check_where_clause;

    #[test]
    fn plain_filters_pass() {
        assert!(check_where_clause("").is_ok());
        assert!(check_where_clause("amount > 100 AND region = 'EU'").is_ok());
        assert!(check_where_clause("id IN (1, 2, 3) OR name LIKE 'a%'").is_ok());
        assert!(check_where_clause("ts IS NOT NULL").is_ok());
    }

    #[test]
    fn separator_rejected() {
        assert!(check_where_clause("1=1; DROP TABLE orders").is_err());
    }

    #[test]
    fn statement_keywords_rejected() {
        assert!(check_where_clause("id IN (SELECT id FROM secrets)").is_err());
        assert!(check_where_clause("1=1 UNION ALL 2=2").is_err());
        assert!(check_where_clause("x = 1 returning *").is_err());
    }

    #[test]
    fn keywords_inside_strings_are_fine() {
        assert!(check_where_clause("note = 'please select carefully'").is_ok());
        assert!(check_where_clause("note = 'it''s; fine'").is_ok());
    }

    #[test]
    fn comments_rejected() {
        assert!(check_where_clause("1=1 -- hidden").is_err());
        assert!(check_where_clause("1=1 /* hidden */").is_err());
    }

    #[test]
    fn unterminated_literal_rejected() {
        assert!(check_where_clause("name = 'oops").is_err());
    }
}
