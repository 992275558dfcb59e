use miette::{Diagnostic, SourceSpan};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A location in the input stream.
///
/// `offset` counts bytes from the start of the stream; `line` and `column`
/// are 1-based and count scalar values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn start() -> Self {
        Position {
            offset: 0,
            line: 1,
            column: 1,
        }
    }

    /// Moves past `ch`.
    pub fn advance(&mut self, ch: char) {
        self.offset += ch.len_utf8();
        if matches!(ch, '\n' | '\u{0C}' | '\u{85}' | '\u{2028}' | '\u{2029}') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
    }
}

impl Default for Position {
    fn default() -> Self {
        Position::start()
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A run of input starting at `start` and spanning `len` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: Position,
    pub len: usize,
}

impl Span {
    pub fn new(start: Position, end_offset: usize) -> Self {
        Span {
            start,
            len: end_offset.saturating_sub(start.offset),
        }
    }

    pub fn at(start: Position) -> Self {
        Span { start, len: 0 }
    }

    pub fn end(&self) -> usize {
        self.start.offset + self.len
    }

    pub fn source_span(&self) -> SourceSpan {
        (self.start.offset, self.len).into()
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum KdlError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Lexical(#[from] LexicalError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Capacity(#[from] CapacityError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Structural(#[from] StructuralError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Handle(#[from] StaleHandle),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Io(#[from] IoError),
}

impl KdlError {
    /// Where in the input the error was raised, if it is tied to a position.
    pub fn position(&self) -> Option<Position> {
        match self {
            KdlError::Lexical(err) => Some(err.position()),
            KdlError::Capacity(err) => err.position(),
            KdlError::Structural(err) => err.position(),
            KdlError::Handle(_) | KdlError::Io(_) => None,
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum LexicalError {
    #[error("unexpected character `{found}` at {position}")]
    #[diagnostic(
        code(lexer::unexpected_character),
        help("Values must be quoted strings, raw strings, numbers, `true`, `false` or `null`.")
    )]
    UnexpectedCharacter {
        found: String,
        position: Position,
        #[label("this cannot start a value")]
        span: SourceSpan,
    },

    #[error("malformed number `{text}` at {position}")]
    #[diagnostic(
        code(lexer::malformed_number),
        help("Numbers may use a 0x, 0b or 0o prefix, `_` separators, a fraction and an exponent.")
    )]
    MalformedNumber {
        text: String,
        position: Position,
        #[label("not a valid number")]
        span: SourceSpan,
    },

    #[error("malformed escape sequence `{sequence}` at {position}")]
    #[diagnostic(
        code(lexer::malformed_escape),
        help("Supported escapes: \\n \\r \\t \\\\ \\/ \\\" \\b \\f and \\u{{hex}}.")
    )]
    MalformedEscape {
        sequence: String,
        position: Position,
        #[label("in this string")]
        span: SourceSpan,
    },

    #[error("decoded value {value:#x} at {position} is not a Unicode scalar value")]
    #[diagnostic(
        code(lexer::invalid_scalar),
        help("The input is not valid UTF-8 at this point.")
    )]
    InvalidScalarValue {
        value: u32,
        position: Position,
        #[label("invalid encoding")]
        span: SourceSpan,
    },

    #[error("input ended in the middle of a UTF-8 sequence at {position}")]
    #[diagnostic(
        code(lexer::truncated_sequence),
        help("The last bytes of the input are an incomplete multi-byte character.")
    )]
    TruncatedSequence {
        position: Position,
        #[label("incomplete character")]
        span: SourceSpan,
    },

    #[error("unterminated {construct} starting at {position}")]
    #[diagnostic(
        code(lexer::unterminated),
        help("The input ended before this construct was closed.")
    )]
    Unterminated {
        construct: &'static str,
        position: Position,
        #[label("opened here")]
        span: SourceSpan,
    },

    #[error("`=` at {position} does not directly follow a property key")]
    #[diagnostic(
        code(lexer::detached_assignment),
        help("Write properties as `key=value` with no whitespace around `=`.")
    )]
    DetachedAssignment {
        position: Position,
        #[label("expected a key right before this")]
        span: SourceSpan,
    },
}

impl LexicalError {
    pub fn position(&self) -> Position {
        match self {
            LexicalError::UnexpectedCharacter { position, .. }
            | LexicalError::MalformedNumber { position, .. }
            | LexicalError::MalformedEscape { position, .. }
            | LexicalError::InvalidScalarValue { position, .. }
            | LexicalError::TruncatedSequence { position, .. }
            | LexicalError::Unterminated { position, .. }
            | LexicalError::DetachedAssignment { position, .. } => *position,
        }
    }

    pub(crate) fn unexpected(found: impl Into<String>, span: Span) -> Self {
        LexicalError::UnexpectedCharacter {
            found: found.into(),
            position: span.start,
            span: span.source_span(),
        }
    }

    pub(crate) fn malformed_number(text: &str, span: Span) -> Self {
        LexicalError::MalformedNumber {
            text: text.to_string(),
            position: span.start,
            span: span.source_span(),
        }
    }

    pub(crate) fn malformed_escape(sequence: impl Into<String>, span: Span) -> Self {
        LexicalError::MalformedEscape {
            sequence: sequence.into(),
            position: span.start,
            span: span.source_span(),
        }
    }

    pub(crate) fn unterminated(construct: &'static str, span: Span) -> Self {
        LexicalError::Unterminated {
            construct,
            position: span.start,
            span: span.source_span(),
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CapacityError {
    #[error("requested {requested} bytes from the {table} table, whose blocks hold {block_size}")]
    #[diagnostic(
        code(arena::block_too_small),
        help("Raise `data_block_size` in the document configuration.")
    )]
    BlockTooSmall {
        table: &'static str,
        requested: usize,
        block_size: usize,
    },

    #[error("the {table} table has no free blocks left (capacity {num_blocks})")]
    #[diagnostic(
        code(arena::exhausted),
        help("Raise `node_blocks` or `data_blocks` in the document configuration.")
    )]
    Exhausted {
        table: &'static str,
        num_blocks: usize,
    },

    #[error("token at {position} is longer than the {limit} byte token buffer")]
    #[diagnostic(
        code(lexer::token_too_long),
        help("Raise `token_buffer_size` in the document configuration.")
    )]
    TokenTooLong {
        limit: usize,
        position: Position,
        #[label("this token")]
        span: SourceSpan,
    },

    #[error("children nested deeper than {limit} levels at {position}")]
    #[diagnostic(
        code(parser::nesting_too_deep),
        help("Raise `max_depth` in the document configuration.")
    )]
    NestingTooDeep {
        limit: usize,
        position: Position,
        #[label("this block")]
        span: SourceSpan,
    },
}

impl CapacityError {
    pub fn position(&self) -> Option<Position> {
        match self {
            CapacityError::TokenTooLong { position, .. }
            | CapacityError::NestingTooDeep { position, .. } => Some(*position),
            CapacityError::BlockTooSmall { .. } | CapacityError::Exhausted { .. } => None,
        }
    }
}

#[derive(Error, Debug, Diagnostic, Clone)]
pub enum StructuralError {
    #[error("`}}` at {position} has no matching `{{`")]
    #[diagnostic(
        code(parser::unmatched_child_end),
        help("There are more closing braces than opening ones.")
    )]
    UnmatchedChildEnd {
        position: Position,
        #[label("nothing to close here")]
        span: SourceSpan,
    },

    #[error("children block at {position} does not belong to a node")]
    #[diagnostic(
        code(parser::orphan_children),
        help("A `{{` must follow a node name on the same line.")
    )]
    OrphanChildren {
        position: Position,
        #[label("no node to attach this to")]
        span: SourceSpan,
    },

    #[error("property `{key}` at {position} has no value")]
    #[diagnostic(
        code(parser::missing_property_value),
        help("Write the value directly after `=`.")
    )]
    MissingPropertyValue {
        key: String,
        position: Position,
        #[label("this property")]
        span: SourceSpan,
    },

    #[error("value at {position} does not belong to a node")]
    #[diagnostic(
        code(parser::value_outside_node),
        help("Arguments and properties must follow a node name.")
    )]
    ValueOutsideNode {
        position: Position,
        #[label("no node here")]
        span: SourceSpan,
    },

    #[error("input ended with {depth} children block(s) still open")]
    #[diagnostic(
        code(parser::unclosed_children),
        help("Add the missing `}}`.")
    )]
    UnclosedChildren { depth: usize },
}

impl StructuralError {
    pub fn position(&self) -> Option<Position> {
        match self {
            StructuralError::UnmatchedChildEnd { position, .. }
            | StructuralError::OrphanChildren { position, .. }
            | StructuralError::MissingPropertyValue { position, .. }
            | StructuralError::ValueOutsideNode { position, .. } => Some(*position),
            StructuralError::UnclosedChildren { .. } => None,
        }
    }
}

/// A handle whose generation no longer matches its slot.
#[derive(Error, Debug, Diagnostic, Clone, Copy, PartialEq, Eq)]
#[error("stale handle (index {index}, generation {generation})")]
#[diagnostic(
    code(arena::stale_handle),
    help("The block was freed after this handle was issued.")
)]
pub struct StaleHandle {
    pub index: u32,
    pub generation: u32,
}

#[derive(Error, Debug, Diagnostic, Clone)]
#[error("failed to read {origin}")]
#[diagnostic(code(io::read_failed))]
pub struct IoError {
    pub origin: String,
    #[source]
    pub source: Arc<std::io::Error>,
}

impl IoError {
    pub(crate) fn new(origin: impl Into<String>, source: std::io::Error) -> Self {
        IoError {
            origin: origin.into(),
            source: Arc::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_tracks_lines_and_columns() {
        let mut pos = Position::start();
        for ch in "ab\ncé".chars() {
            pos.advance(ch);
        }
        assert_eq!(pos.line, 2);
        assert_eq!(pos.column, 3);
        assert_eq!(pos.offset, 6);
    }

    #[test]
    fn test_error_exposes_position() {
        let mut pos = Position::start();
        pos.advance('x');
        let err: KdlError = LexicalError::unexpected("@", Span::new(pos, 2)).into();
        assert_eq!(err.position(), Some(pos));
        assert!(err.to_string().contains("1:2"));
    }
}
