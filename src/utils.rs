/// Unicode space separators and tab. Newlines are not whitespace here.
pub fn is_whitespace(ch: char) -> bool {
    matches!(
        ch,
        '\u{09}' | '\u{20}' | '\u{A0}' | '\u{1680}' | '\u{202F}' | '\u{205F}' | '\u{3000}'
    ) || ('\u{2000}'..='\u{200A}').contains(&ch)
}

/// Newline characters. The lexer folds CRLF into one break.
pub fn is_newline(ch: char) -> bool {
    matches!(
        ch,
        '\u{0A}' | '\u{0C}' | '\u{0D}' | '\u{85}' | '\u{2028}' | '\u{2029}'
    )
}

/// Characters that end a node. End of input is handled by the lexer itself.
pub fn is_break(ch: char) -> bool {
    is_newline(ch) || ch == ';'
}

/// If `text` is `r` followed only by `#`s, returns the number of `#`s.
pub fn raw_string_prefix(text: &str) -> Option<usize> {
    let hashes = text.strip_prefix('r')?;
    hashes.bytes().all(|b| b == b'#').then_some(hashes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_character_classes() {
        assert!(is_whitespace(' '));
        assert!(is_whitespace('\t'));
        assert!(is_whitespace('\u{2003}'));
        assert!(!is_whitespace('\n'));
        assert!(is_break('\n'));
        assert!(is_break(';'));
        assert!(is_break('\u{2028}'));
        assert!(!is_break('a'));
    }

    #[test]
    fn test_raw_string_prefix() {
        assert_eq!(raw_string_prefix("r"), Some(0));
        assert_eq!(raw_string_prefix("r###"), Some(3));
        assert_eq!(raw_string_prefix("r#a"), None);
        assert_eq!(raw_string_prefix("abr"), None);
        assert_eq!(raw_string_prefix(""), None);
    }
}
