/// Pattern gate for schema and table identifiers: `^[a-z_][a-z0-9_]*$`.
///
/// Every `name_en` that becomes a physical schema or table name passes
/// through here before any DDL is issued.
pub fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::valid_identifier;

    #[test]
    fn accepts_snake_case() {
        assert!(valid_identifier("orders"));
        assert!(valid_identifier("_staging"));
        assert!(valid_identifier("ops_2024"));
    }

    #[test]
    fn rejects_everything_else() {
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("Orders"));
        assert!(!valid_identifier("1st"));
        assert!(!valid_identifier("a-b"));
        assert!(!valid_identifier("a b"));
        assert!(!valid_identifier("ops;drop"));
        assert!(!valid_identifier("tab\u{e9}"));
    }
}
