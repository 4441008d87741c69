/// Wraps `value` in single quotes so a POSIX shell treats it as one literal word.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Shell text standing in for the prompt: the expression that expands to the
/// decoded prompt when one is given, otherwise the quoted prompt itself.
pub fn prompt_value(prompt: &str, expression: Option<&str>) -> String {
    match expression {
        Some(expression) if !expression.trim().is_empty() => expression.to_string(),
        _ => quote(prompt),
    }
}

/// Appends `<flag> '<value>'` when both are present and non-empty.
pub(crate) fn push_flag(parts: &mut Vec<String>, flag: Option<&str>, value: Option<&str>) {
    let flag = flag.map(str::trim).filter(|flag| !flag.is_empty());
    let value = value.filter(|value| !value.trim().is_empty());
    if let (Some(flag), Some(value)) = (flag, value) {
        parts.push(flag.to_string());
        parts.push(quote(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), r"'it'\''s'");
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn prompt_value_prefers_expression() {
        assert_eq!(prompt_value("hi", Some("\"$PROMPT\"")), "\"$PROMPT\"");
        assert_eq!(prompt_value("hi", None), "'hi'");
        assert_eq!(prompt_value("hi", Some("  ")), "'hi'");
    }

    #[test]
    fn push_flag_requires_both_parts() {
        let mut parts = Vec::new();
        push_flag(&mut parts, Some("--model"), None);
        push_flag(&mut parts, None, Some("gpt"));
        push_flag(&mut parts, Some("--model"), Some(""));
        assert!(parts.is_empty());
        push_flag(&mut parts, Some("--model"), Some("gpt"));
        assert_eq!(parts, vec!["--model".to_string(), "'gpt'".to_string()]);
    }
}
