//! Decoding of text lexemes into typed values.

use crate::error::{LexicalError, Span};
use crate::lexer::{Lexeme, LexemeKind};
use crate::tokenizer::TokenKind;
use std::iter::Peekable;
use std::str::Chars;

/// Where a text lexeme sits in its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    NodeName,
    PropertyKey,
    Value,
}

/// Bare text is an identifier in name and key positions and a keyword or
/// number anywhere else. Quoted and raw strings are always strings.
pub fn decode(lexeme: Lexeme, role: Role) -> Result<TokenKind, LexicalError> {
    let span = lexeme.span;
    match lexeme.kind {
        LexemeKind::Quoted(text) => Ok(TokenKind::String(unescape(&text, span)?)),
        LexemeKind::Raw(text) => Ok(TokenKind::String(text)),
        LexemeKind::Bare(text) => match role {
            Role::NodeName | Role::PropertyKey => Ok(TokenKind::Identifier(text)),
            Role::Value => decode_bare_value(&text, span),
        },
        other => Err(LexicalError::unexpected(format!("{other:?}"), span)),
    }
}

fn decode_bare_value(text: &str, span: Span) -> Result<TokenKind, LexicalError> {
    match text {
        "true" => Ok(TokenKind::Bool(true)),
        "false" => Ok(TokenKind::Bool(false)),
        "null" => Ok(TokenKind::Null),
        _ => parse_number(text, span).map(TokenKind::Number),
    }
}

/// Parses a KDL number: an optional sign, then either a `0x`, `0b` or `0o`
/// prefixed integer or a decimal with optional fraction and exponent. `_` is
/// accepted anywhere among the digits. Values too large for an `f64` are
/// malformed.
pub fn parse_number(text: &str, span: Span) -> Result<f64, LexicalError> {
    let (negative, body) = if let Some(rest) = text.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = text.strip_prefix('+') {
        (false, rest)
    } else {
        (false, text)
    };

    if !body.starts_with(|c: char| c.is_ascii_digit()) {
        let found = text.chars().next().map(String::from).unwrap_or_default();
        return Err(LexicalError::unexpected(found, span));
    }

    let magnitude = match radix_prefix(body) {
        Some((radix, digits)) => parse_radix(digits, radix),
        None => parse_decimal(body),
    }
    .filter(|magnitude| magnitude.is_finite())
    .ok_or_else(|| LexicalError::malformed_number(text, span))?;

    Ok(if negative { -magnitude } else { magnitude })
}

fn radix_prefix(body: &str) -> Option<(u32, &str)> {
    let rest = body.strip_prefix('0')?;
    match rest.as_bytes().first()? {
        b'x' => Some((16, &rest[1..])),
        b'o' => Some((8, &rest[1..])),
        b'b' => Some((2, &rest[1..])),
        _ => None,
    }
}

fn parse_radix(digits: &str, radix: u32) -> Option<f64> {
    let mut value = 0f64;
    let mut seen = false;
    for ch in digits.chars() {
        if ch == '_' {
            continue;
        }
        let digit = ch.to_digit(radix)?;
        value = value * f64::from(radix) + f64::from(digit);
        seen = true;
    }
    seen.then_some(value)
}

fn parse_decimal(body: &str) -> Option<f64> {
    let mut cleaned = String::with_capacity(body.len());
    let mut chars = body.chars().peekable();

    if take_digits(&mut chars, &mut cleaned) == 0 {
        return None;
    }
    if chars.next_if_eq(&'.').is_some() {
        cleaned.push('.');
        if take_digits(&mut chars, &mut cleaned) == 0 {
            return None;
        }
    }
    if chars.next_if(|c| matches!(c, 'e' | 'E')).is_some() {
        cleaned.push('e');
        if let Some(sign) = chars.next_if(|c| matches!(c, '+' | '-')) {
            cleaned.push(sign);
        }
        if take_digits(&mut chars, &mut cleaned) == 0 {
            return None;
        }
    }
    if chars.next().is_some() {
        return None;
    }
    cleaned.parse().ok()
}

/// Copies decimal digits into `out`, skipping `_`. Returns the digit count.
fn take_digits(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> usize {
    let mut count = 0;
    while let Some(ch) = chars.next_if(|c| c.is_ascii_digit() || *c == '_') {
        if ch != '_' {
            out.push(ch);
            count += 1;
        }
    }
    count
}

/// Resolves the escape sequences of a quoted string.
pub fn unescape(raw: &str, span: Span) -> Result<String, LexicalError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        let Some(escape) = chars.next() else {
            return Err(LexicalError::malformed_escape("\\", span));
        };
        let decoded = match escape {
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            '\\' => '\\',
            '/' => '/',
            '"' => '"',
            'b' => '\u{08}',
            'f' => '\u{0C}',
            'u' => unicode_escape(&mut chars, span)?,
            other => return Err(LexicalError::malformed_escape(format!("\\{other}"), span)),
        };
        out.push(decoded);
    }
    Ok(out)
}

/// `\u{XXXX}` or a bare run of up to six hex digits.
fn unicode_escape(chars: &mut Peekable<Chars<'_>>, span: Span) -> Result<char, LexicalError> {
    let braced = chars.next_if_eq(&'{').is_some();
    let mut digits = String::with_capacity(6);
    while digits.len() < 6 {
        match chars.next_if(char::is_ascii_hexdigit) {
            Some(digit) => digits.push(digit),
            None => break,
        }
    }
    if braced && chars.next_if_eq(&'}').is_none() {
        return Err(LexicalError::malformed_escape(format!("\\u{{{digits}"), span));
    }
    u32::from_str_radix(&digits, 16)
        .ok()
        .and_then(char::from_u32)
        .ok_or_else(|| LexicalError::malformed_escape(format!("\\u{digits}"), span))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Position;

    fn span() -> Span {
        Span::at(Position::start())
    }

    fn number(text: &str) -> f64 {
        parse_number(text, span()).unwrap()
    }

    #[test]
    fn test_decimal_numbers() {
        assert_eq!(number("0"), 0.0);
        assert_eq!(number("42"), 42.0);
        assert_eq!(number("-3.5"), -3.5);
        assert_eq!(number("+7"), 7.0);
        assert_eq!(number("1_000.5e2"), 100050.0);
        assert_eq!(number("1.5E-1"), 0.15);
        assert_eq!(number("2e3"), 2000.0);
    }

    #[test]
    fn test_radix_numbers() {
        assert_eq!(number("0x1A"), 26.0);
        assert_eq!(number("0xff_ff"), 65535.0);
        assert_eq!(number("0b101"), 5.0);
        assert_eq!(number("0o17"), 15.0);
        assert_eq!(number("-0x10"), -16.0);
    }

    #[test]
    fn test_malformed_numbers() {
        for text in ["1x", "0x", "0b102", "1.", "1.5e", "1..2", "0o8"] {
            let err = parse_number(text, span()).unwrap_err();
            assert!(
                matches!(err, LexicalError::MalformedNumber { .. }),
                "{text:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_out_of_range_numbers() {
        let huge_hex = format!("0x{}", "f".repeat(300));
        for text in ["1e400", "-1e400", huge_hex.as_str()] {
            let err = parse_number(text, span()).unwrap_err();
            assert!(
                matches!(err, LexicalError::MalformedNumber { .. }),
                "{text:?} gave {err:?}"
            );
        }
        assert!(number("-0.0").is_sign_negative());
        assert_eq!(number("1e308"), 1e308);
    }

    #[test]
    fn test_non_numeric_values_are_unexpected() {
        for text in ["abc", "-", "_1", ".5"] {
            let err = parse_number(text, span()).unwrap_err();
            assert!(
                matches!(err, LexicalError::UnexpectedCharacter { .. }),
                "{text:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_keywords() {
        let decode_value = |text: &str| {
            decode(
                Lexeme {
                    kind: LexemeKind::Bare(text.to_string()),
                    span: span(),
                },
                Role::Value,
            )
            .unwrap()
        };
        assert_eq!(decode_value("true"), TokenKind::Bool(true));
        assert_eq!(decode_value("false"), TokenKind::Bool(false));
        assert_eq!(decode_value("null"), TokenKind::Null);
    }

    #[test]
    fn test_bare_names_stay_identifiers() {
        let kind = decode(
            Lexeme {
                kind: LexemeKind::Bare("true".to_string()),
                span: span(),
            },
            Role::NodeName,
        )
        .unwrap();
        assert_eq!(kind, TokenKind::Identifier("true".to_string()));
    }

    #[test]
    fn test_simple_escapes() {
        assert_eq!(
            unescape(r#"a\nb\tc\\d\"e\/f\bg\fh\r"#, span()).unwrap(),
            "a\nb\tc\\d\"e/f\u{8}g\u{c}h\r"
        );
    }

    #[test]
    fn test_unicode_escapes() {
        assert_eq!(unescape(r"\u{1F600}", span()).unwrap(), "\u{1F600}");
        assert_eq!(unescape(r"\u00e9!", span()).unwrap(), "\u{e9}!");
        assert_eq!(unescape(r"\u{41}BC", span()).unwrap(), "ABC");
    }

    #[test]
    fn test_malformed_escapes() {
        for raw in [r"\q", r"\u{zz}", r"\u{41", r"\u{D800}", "\\"] {
            let err = unescape(raw, span()).unwrap_err();
            assert!(
                matches!(err, LexicalError::MalformedEscape { .. }),
                "{raw:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_raw_strings_are_verbatim() {
        let kind = decode(
            Lexeme {
                kind: LexemeKind::Raw(r"C:\path\n".to_string()),
                span: span(),
            },
            Role::Value,
        )
        .unwrap();
        assert_eq!(kind, TokenKind::String(r"C:\path\n".to_string()));
    }
}
