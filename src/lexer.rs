use crate::error::{CapacityError, KdlError, LexicalError, Position, Span};
use crate::utils::{is_break, is_newline, is_whitespace, raw_string_prefix};
use log::trace;
use std::collections::VecDeque;

/// The lexing states. Only `Character`, `String` and `RawString` carry data;
/// leaving `Character` for any other state ends the token in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LexState {
    Whitespace,
    Character,
    Break,
    BreakEscape,
    Assignment,
    ChildBegin,
    ChildEnd,
    ElisionComment,
    String,
    RawString,
    BlockComment,
    LineComment,
    Annotation,
}

impl LexState {
    pub fn carries_data(self) -> bool {
        matches!(
            self,
            LexState::Character | LexState::String | LexState::RawString
        )
    }
}

/// A unit produced by the lexer, before any typing.
#[derive(Debug, Clone, PartialEq)]
pub enum LexemeKind {
    /// Unquoted text: identifiers, numbers and keywords.
    Bare(String),
    /// Contents of a quoted string, escapes still encoded.
    Quoted(String),
    /// Contents of a raw string.
    Raw(String),
    /// The name inside `( )`.
    Annotation(String),
    Assignment,
    ChildBegin,
    ChildEnd,
    /// Newline, `;` or end of input.
    Break,
    /// A `\` outside of strings.
    BreakEscape,
    /// The `/-` marker.
    Elision,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Lexeme {
    pub kind: LexemeKind,
    pub span: Span,
}

/// Character-level state machine. Scalar values go in through
/// [`push`](Lexer::push), lexemes come out through [`pop`](Lexer::pop).
#[derive(Debug)]
pub struct Lexer {
    state: LexState,
    previous: LexState,
    buffer: String,
    buffer_limit: usize,
    skipping: bool,
    last_char: Option<char>,
    comment_depth: usize,
    raw_hashes: usize,
    raw_closing: Option<usize>,
    escaped: bool,
    slash: Option<Position>,
    token_start: Position,
    position: Position,
    output: VecDeque<Lexeme>,
}

impl Lexer {
    pub fn new(buffer_limit: usize) -> Self {
        Lexer {
            state: LexState::Whitespace,
            previous: LexState::Whitespace,
            buffer: String::new(),
            buffer_limit,
            skipping: false,
            last_char: None,
            comment_depth: 0,
            raw_hashes: 0,
            raw_closing: None,
            escaped: false,
            slash: None,
            token_start: Position::start(),
            position: Position::start(),
            output: VecDeque::with_capacity(4),
        }
    }

    pub fn state(&self) -> LexState {
        self.state
    }

    pub fn previous_state(&self) -> LexState {
        self.previous
    }

    /// Position of the next scalar value.
    pub fn position(&self) -> Position {
        self.position
    }

    pub fn pop(&mut self) -> Option<Lexeme> {
        self.output.pop_front()
    }

    pub fn push(&mut self, ch: char) -> Result<(), KdlError> {
        let at = self.position;
        self.position.advance(ch);

        // CRLF is a single break
        if ch == '\n' && self.last_char == Some('\r') && self.state == LexState::Break {
            self.last_char = Some(ch);
            return Ok(());
        }

        let paired = match self.state {
            LexState::String => {
                self.string_char(ch)?;
                false
            }
            LexState::RawString => {
                self.raw_string_char(ch)?;
                false
            }
            LexState::BlockComment => self.block_comment_char(ch, at),
            LexState::LineComment => {
                if is_newline(ch) {
                    self.transition(LexState::Break, at.offset);
                    self.emit(LexemeKind::Break, Span::new(at, self.position.offset));
                }
                false
            }
            LexState::Annotation => {
                self.annotation_char(ch)?;
                false
            }
            _ => self.detect(ch, at)?,
        };

        // a consumed two-character sequence must not pair with the next char
        self.last_char = if paired { None } else { Some(ch) };
        Ok(())
    }

    /// Handles end of input, which acts as a final break.
    pub fn finish(&mut self) -> Result<(), KdlError> {
        let at = self.position;
        let construct = match self.state {
            LexState::String => Some("string"),
            LexState::RawString => Some("raw string"),
            LexState::BlockComment => Some("block comment"),
            LexState::Annotation => Some("type annotation"),
            _ => None,
        };
        if let Some(construct) = construct {
            return Err(
                LexicalError::unterminated(construct, Span::new(self.token_start, at.offset))
                    .into(),
            );
        }

        if self.slash.take().is_some() {
            self.append('/')?;
        }
        self.transition(LexState::Break, at.offset);
        self.emit(LexemeKind::Break, Span::at(at));
        Ok(())
    }

    /// Drops whatever has been accumulated for the current token and
    /// suppresses the rest of it. The construct itself is still lexed to its
    /// end so that the state machine stays in step with the input.
    pub fn skip_token(&mut self) {
        if self.state.carries_data() || self.state == LexState::Annotation {
            self.buffer.clear();
            self.skipping = true;
        }
    }

    /// Classification for every state that is not inside a string, comment
    /// or annotation. Returns whether a two-character sequence was consumed.
    fn detect(&mut self, ch: char, at: Position) -> Result<bool, KdlError> {
        if let Some(slash_at) = self.slash.take() {
            match ch {
                '*' => {
                    self.transition(LexState::BlockComment, slash_at.offset);
                    self.token_start = slash_at;
                    self.comment_depth = 1;
                    return Ok(true);
                }
                '/' => {
                    self.transition(LexState::LineComment, slash_at.offset);
                    return Ok(true);
                }
                '-' if self.buffer.is_empty() => {
                    self.transition(LexState::ElisionComment, slash_at.offset);
                    self.emit(LexemeKind::Elision, Span::new(slash_at, self.position.offset));
                    return Ok(true);
                }
                _ => self.append('/')?,
            }
        }

        if is_whitespace(ch) {
            self.transition(LexState::Whitespace, at.offset);
        } else if is_break(ch) {
            self.structural(LexState::Break, LexemeKind::Break, at);
        } else {
            match ch {
                '{' => self.structural(LexState::ChildBegin, LexemeKind::ChildBegin, at),
                '}' => self.structural(LexState::ChildEnd, LexemeKind::ChildEnd, at),
                '=' => self.structural(LexState::Assignment, LexemeKind::Assignment, at),
                '\\' => self.structural(LexState::BreakEscape, LexemeKind::BreakEscape, at),
                '(' => {
                    self.transition(LexState::Annotation, at.offset);
                    self.begin_text(at);
                }
                '"' => self.open_string(at),
                '/' => {
                    self.begin_bare(at);
                    self.slash = Some(at);
                }
                _ => {
                    self.begin_bare(at);
                    self.append(ch)?;
                }
            }
        }
        Ok(false)
    }

    fn open_string(&mut self, at: Position) {
        if self.state == LexState::Character {
            if let Some(hashes) = raw_string_prefix(&self.buffer) {
                // the `r#..` prefix becomes the start of the raw string token
                self.buffer.clear();
                self.raw_hashes = hashes;
                self.raw_closing = None;
                self.previous = self.state;
                self.state = LexState::RawString;
                return;
            }
        }
        self.transition(LexState::String, at.offset);
        self.begin_text(at);
        self.escaped = false;
    }

    fn string_char(&mut self, ch: char) -> Result<(), KdlError> {
        if self.escaped {
            self.escaped = false;
            self.append(ch)
        } else if ch == '\\' {
            self.escaped = true;
            self.append(ch)
        } else if ch == '"' {
            self.close_text(LexemeKind::Quoted);
            Ok(())
        } else {
            self.append(ch)
        }
    }

    fn raw_string_char(&mut self, ch: char) -> Result<(), KdlError> {
        match self.raw_closing {
            None if ch == '"' => {
                if self.raw_hashes == 0 {
                    self.close_text(LexemeKind::Raw);
                } else {
                    self.raw_closing = Some(0);
                }
                Ok(())
            }
            None => self.append(ch),
            Some(seen) if ch == '#' => {
                if seen + 1 == self.raw_hashes {
                    self.raw_closing = None;
                    self.close_text(LexemeKind::Raw);
                } else {
                    self.raw_closing = Some(seen + 1);
                }
                Ok(())
            }
            Some(seen) => {
                // not the delimiter after all: it was content
                self.raw_closing = None;
                self.append('"')?;
                for _ in 0..seen {
                    self.append('#')?;
                }
                self.raw_string_char(ch)
            }
        }
    }

    fn block_comment_char(&mut self, ch: char, at: Position) -> bool {
        match (self.last_char, ch) {
            (Some('/'), '*') => {
                self.comment_depth += 1;
                true
            }
            (Some('*'), '/') => {
                self.comment_depth -= 1;
                if self.comment_depth == 0 {
                    self.transition(LexState::Whitespace, at.offset);
                }
                true
            }
            _ => false,
        }
    }

    fn annotation_char(&mut self, ch: char) -> Result<(), KdlError> {
        if ch == ')' {
            self.close_text(LexemeKind::Annotation);
            Ok(())
        } else {
            self.append(ch)
        }
    }

    fn structural(&mut self, state: LexState, kind: LexemeKind, at: Position) {
        self.transition(state, at.offset);
        self.emit(kind, Span::new(at, self.position.offset));
    }

    /// Moves to `next`, ending a bare token at `end_offset` if one is open.
    fn transition(&mut self, next: LexState, end_offset: usize) {
        if self.state == LexState::Character && next != LexState::Character {
            if let Some(text) = self.take_buffer() {
                self.emit(LexemeKind::Bare(text), Span::new(self.token_start, end_offset));
            }
        }
        if next != self.state {
            trace!("lexer {:?} -> {:?}", self.state, next);
        }
        self.previous = self.state;
        self.state = next;
    }

    fn begin_bare(&mut self, at: Position) {
        if self.state != LexState::Character {
            self.transition(LexState::Character, at.offset);
            self.begin_text(at);
        }
    }

    fn begin_text(&mut self, at: Position) {
        self.buffer.clear();
        self.skipping = false;
        self.token_start = at;
    }

    /// Ends a quoted construct; whatever follows is classified afresh.
    fn close_text(&mut self, kind: fn(String) -> LexemeKind) {
        if let Some(text) = self.take_buffer() {
            self.emit(kind(text), Span::new(self.token_start, self.position.offset));
        }
        self.transition(LexState::Whitespace, self.position.offset);
    }

    fn take_buffer(&mut self) -> Option<String> {
        if std::mem::take(&mut self.skipping) {
            self.buffer.clear();
            return None;
        }
        if self.state == LexState::Character && self.buffer.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }

    fn append(&mut self, ch: char) -> Result<(), KdlError> {
        if self.skipping {
            return Ok(());
        }
        if self.buffer.len() + ch.len_utf8() > self.buffer_limit {
            return Err(CapacityError::TokenTooLong {
                limit: self.buffer_limit,
                position: self.token_start,
                span: Span::new(self.token_start, self.position.offset).source_span(),
            }
            .into());
        }
        self.buffer.push(ch);
        Ok(())
    }

    fn emit(&mut self, kind: LexemeKind, span: Span) {
        self.output.push_back(Lexeme { kind, span });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(input: &str) -> Result<Vec<Lexeme>, KdlError> {
        let mut lexer = Lexer::new(4096);
        let mut lexemes = Vec::new();
        for ch in input.chars() {
            lexer.push(ch)?;
            while let Some(lexeme) = lexer.pop() {
                lexemes.push(lexeme);
            }
        }
        lexer.finish()?;
        while let Some(lexeme) = lexer.pop() {
            lexemes.push(lexeme);
        }
        Ok(lexemes)
    }

    fn assert_lexemes(input: &str, expected: Vec<LexemeKind>) {
        let kinds: Vec<LexemeKind> = lex_all(input)
            .unwrap()
            .into_iter()
            .map(|l| l.kind)
            .collect();
        assert_eq!(kinds, expected, "input: {input:?}");
    }

    fn bare(s: &str) -> LexemeKind {
        LexemeKind::Bare(s.to_string())
    }

    #[test]
    fn test_words_and_breaks() {
        assert_lexemes(
            "node arg; other\n",
            vec![
                bare("node"),
                bare("arg"),
                LexemeKind::Break,
                bare("other"),
                LexemeKind::Break,
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_adjacent_constructs_without_spaces() {
        assert_lexemes(
            r#"node "str"(Type)123"#,
            vec![
                bare("node"),
                LexemeKind::Quoted("str".to_string()),
                LexemeKind::Annotation("Type".to_string()),
                bare("123"),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_raw_prefix_must_be_the_whole_token() {
        assert_lexemes(
            r#"abr"x""#,
            vec![
                bare("abr"),
                LexemeKind::Quoted("x".to_string()),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_structural_characters() {
        assert_lexemes(
            "a key=1{b}",
            vec![
                bare("a"),
                bare("key"),
                LexemeKind::Assignment,
                bare("1"),
                LexemeKind::ChildBegin,
                bare("b"),
                LexemeKind::ChildEnd,
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_escaped_quote_stays_in_string() {
        assert_lexemes(
            r#""a\"b" c"#,
            vec![
                LexemeKind::Quoted(r#"a\"b"#.to_string()),
                bare("c"),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_raw_strings() {
        assert_lexemes(
            r###"r"plain\n" r#"has "quotes""# r##"x"#y"##"###,
            vec![
                LexemeKind::Raw(r"plain\n".to_string()),
                LexemeKind::Raw(r#"has "quotes""#.to_string()),
                LexemeKind::Raw(r##"x"#y"##.to_string()),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_nested_block_comments() {
        assert_lexemes(
            "a /* one /* two */ still */ b",
            vec![bare("a"), bare("b"), LexemeKind::Break],
        );
        assert_lexemes("/*/ open */x", vec![bare("x"), LexemeKind::Break]);
        assert_lexemes("a/*c*/b", vec![bare("a"), bare("b"), LexemeKind::Break]);
    }

    #[test]
    fn test_line_comment_ends_at_newline() {
        assert_lexemes(
            "a // comment { \"\nb",
            vec![
                bare("a"),
                LexemeKind::Break,
                bare("b"),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_elision_marker() {
        assert_lexemes(
            "/-node 1",
            vec![
                LexemeKind::Elision,
                bare("node"),
                bare("1"),
                LexemeKind::Break,
            ],
        );
        // only at the start of a token
        assert_lexemes("a/-b", vec![bare("a/-b"), LexemeKind::Break]);
        assert_lexemes("a/", vec![bare("a/"), LexemeKind::Break]);
    }

    #[test]
    fn test_break_escape() {
        assert_lexemes(
            "a \\\n b",
            vec![
                bare("a"),
                LexemeKind::BreakEscape,
                LexemeKind::Break,
                bare("b"),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_crlf_is_one_break() {
        assert_lexemes(
            "a\r\nb // note\r\n\r\nc",
            vec![
                bare("a"),
                LexemeKind::Break,
                bare("b"),
                LexemeKind::Break,
                LexemeKind::Break,
                bare("c"),
                LexemeKind::Break,
            ],
        );
        assert_lexemes(
            "a \\\r\n b",
            vec![
                bare("a"),
                LexemeKind::BreakEscape,
                LexemeKind::Break,
                bare("b"),
                LexemeKind::Break,
            ],
        );
    }

    #[test]
    fn test_spans() {
        let lexemes = lex_all("ab\n  \"cd\"").unwrap();
        assert_eq!(lexemes[0].span.start.offset, 0);
        assert_eq!(lexemes[0].span.len, 2);
        let string = &lexemes[2];
        assert_eq!(string.kind, LexemeKind::Quoted("cd".to_string()));
        assert_eq!(string.span.start.offset, 5);
        assert_eq!(string.span.start.line, 2);
        assert_eq!(string.span.start.column, 3);
        assert_eq!(string.span.len, 4);
    }

    #[test]
    fn test_unterminated_constructs() {
        for input in ["\"open", "r#\"open\"", "/* open", "(open"] {
            let err = lex_all(input).unwrap_err();
            assert!(
                matches!(err, KdlError::Lexical(LexicalError::Unterminated { .. })),
                "input {input:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_token_buffer_limit() {
        let mut lexer = Lexer::new(4);
        for ch in "abcd".chars() {
            lexer.push(ch).unwrap();
        }
        let err = lexer.push('e').unwrap_err();
        assert!(matches!(
            err,
            KdlError::Capacity(CapacityError::TokenTooLong { limit: 4, .. })
        ));
    }

    #[test]
    fn test_skipped_token_is_not_emitted() {
        let mut lexer = Lexer::new(4);
        for ch in "abcd".chars() {
            lexer.push(ch).unwrap();
        }
        assert!(lexer.push('e').is_err());
        lexer.skip_token();
        for ch in "fg h".chars() {
            lexer.push(ch).unwrap();
        }
        lexer.finish().unwrap();
        let kinds: Vec<LexemeKind> = std::iter::from_fn(|| lexer.pop()).map(|l| l.kind).collect();
        assert_eq!(kinds, vec![bare("h"), LexemeKind::Break]);
    }

    #[test]
    fn test_states_are_tracked() {
        let mut lexer = Lexer::new(16);
        lexer.push('a').unwrap();
        assert_eq!(lexer.state(), LexState::Character);
        lexer.push('"').unwrap();
        assert_eq!(lexer.state(), LexState::String);
        assert_eq!(lexer.previous_state(), LexState::Character);
        assert!(lexer.state().carries_data());
    }
}
