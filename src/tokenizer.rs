//! Typed tokens out of a byte stream.
//!
//! The tokenizer owns the UTF-8 decoder and the lexer. It keeps one text
//! lexeme of lookahead to tell property keys from values, tracks where in a
//! node it is through a [`ParseContext`], and drops everything covered by a
//! `/-` elision.

use crate::error::{KdlError, LexicalError, Span, StructuralError};
use crate::lexer::{Lexeme, LexemeKind, Lexer};
use crate::literal::{self, Role};
use crate::utf8::Utf8Decoder;
use log::{debug, trace};
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    String(String),
    Number(f64),
    Bool(bool),
    Null,
    ChildBegin,
    ChildEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub is_node_name: bool,
    pub is_property_key: bool,
    pub span: Span,
}

impl Token {
    fn structural(kind: TokenKind, span: Span) -> Self {
        Token {
            kind,
            is_node_name: false,
            is_property_key: false,
            span,
        }
    }
}

/// What the next text token will be taken as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Awaiting {
    NodeName,
    /// An argument or a property key.
    Attribute,
    PropertyValue,
}

/// What a `/-` is currently suppressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Elision {
    None,
    /// A whole node; `depth` counts the children blocks opened inside it.
    Node { depth: usize },
    /// A children block; `depth` counts its own braces.
    Children { depth: usize },
    /// A single argument, or the key of a property.
    Value,
    /// The value of an elided property.
    PropertyValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseContext {
    pub awaiting: Awaiting,
    pub elision: Elision,
    /// A `\` has escaped the next break.
    pub continued: bool,
}

impl Default for ParseContext {
    fn default() -> Self {
        ParseContext {
            awaiting: Awaiting::NodeName,
            elision: Elision::None,
            continued: false,
        }
    }
}

#[derive(Debug)]
pub struct Tokenizer {
    decoder: Utf8Decoder,
    lexer: Lexer,
    context: ParseContext,
    held: Option<Lexeme>,
    replay: Option<Lexeme>,
    assignment_taken: bool,
    open_key: Option<(String, Span)>,
    ready: VecDeque<Token>,
    finished: bool,
}

impl Tokenizer {
    pub fn new(token_buffer_size: usize) -> Self {
        Tokenizer {
            decoder: Utf8Decoder::new(),
            lexer: Lexer::new(token_buffer_size),
            context: ParseContext::default(),
            held: None,
            replay: None,
            assignment_taken: false,
            open_key: None,
            ready: VecDeque::with_capacity(2),
            finished: false,
        }
    }

    /// Supplies the next window of input bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.decoder.feed(bytes);
    }

    pub fn context(&self) -> ParseContext {
        self.context
    }

    /// Whether a node has been named and not yet ended by a break or brace.
    pub fn in_node(&self) -> bool {
        self.context.awaiting != Awaiting::NodeName
    }

    /// Returns the next token, or `None` once the current window is used up.
    ///
    /// After an error the tokenizer can be resumed by calling this again; the
    /// lexeme that raised the error is processed again first.
    pub fn next_token(&mut self) -> Result<Option<Token>, KdlError> {
        loop {
            if let Some(token) = self.ready.pop_front() {
                trace!("token {:?} at {}", token.kind, token.span.start);
                return Ok(Some(token));
            }
            if let Some(lexeme) = self.replay.take() {
                self.process(lexeme)?;
                continue;
            }
            if let Some(lexeme) = self.lexer.pop() {
                self.process(lexeme)?;
                continue;
            }
            let Some(scalar) = self.decoder.next_scalar() else {
                return Ok(None);
            };
            let Some(ch) = char::from_u32(scalar) else {
                let at = self.lexer.position();
                return Err(LexicalError::InvalidScalarValue {
                    value: scalar,
                    position: at,
                    span: Span::at(at).source_span(),
                }
                .into());
            };
            self.lexer.push(ch)?;
        }
    }

    /// Signals end of input. Tokens it releases are picked up by further
    /// calls to [`next_token`](Tokenizer::next_token).
    pub fn finish(&mut self) -> Result<(), KdlError> {
        if std::mem::replace(&mut self.finished, true) {
            return Ok(());
        }
        if self.decoder.has_partial() {
            self.decoder.reset();
            let at = self.lexer.position();
            return Err(LexicalError::TruncatedSequence {
                position: at,
                span: Span::at(at).source_span(),
            }
            .into());
        }
        self.lexer.finish()
    }

    /// Suppresses the rest of the node under construction. `depth` is the
    /// number of its children blocks already opened.
    pub fn abandon_node(&mut self, depth: usize) {
        debug!("abandoning node at depth {depth}");
        self.held = None;
        self.ready.clear();
        self.open_key = None;
        self.assignment_taken = false;
        self.context.awaiting = Awaiting::Attribute;
        self.context.elision = Elision::Node { depth };
        self.context.continued = false;
        self.lexer.skip_token();
    }

    /// Suppresses only the token in progress.
    pub fn abandon_token(&mut self) {
        self.lexer.skip_token();
    }

    fn process(&mut self, lexeme: Lexeme) -> Result<(), KdlError> {
        trace!("lexeme {:?} at {}", lexeme.kind, lexeme.span.start);

        if let Some(held) = self.held.take() {
            let is_key = lexeme.kind == LexemeKind::Assignment
                && lexeme.span.start.offset == held.span.end();
            // the lexeme takes effect only after the held one's token is out
            self.replay = Some(lexeme);
            self.assignment_taken = self.resolve_text(held, is_key)?;
            return Ok(());
        }
        let assignment_taken = std::mem::take(&mut self.assignment_taken);

        match lexeme.kind {
            LexemeKind::Bare(_) | LexemeKind::Quoted(_) | LexemeKind::Raw(_) => {
                self.held = Some(lexeme);
            }
            LexemeKind::Annotation(name) => {
                debug!("discarding type annotation ({name}) at {}", lexeme.span.start);
            }
            LexemeKind::Assignment => {
                let eliding = matches!(
                    self.context.elision,
                    Elision::Node { .. } | Elision::Children { .. }
                );
                if !assignment_taken && !eliding {
                    return Err(LexicalError::DetachedAssignment {
                        position: lexeme.span.start,
                        span: lexeme.span.source_span(),
                    }
                    .into());
                }
            }
            LexemeKind::ChildBegin => self.child_begin(lexeme.span)?,
            LexemeKind::ChildEnd => self.child_end(lexeme.span)?,
            LexemeKind::Break => self.node_break(lexeme.span)?,
            LexemeKind::BreakEscape => self.context.continued = true,
            LexemeKind::Elision => self.elide(lexeme.span),
        }
        Ok(())
    }

    /// Turns a held text lexeme into a token. Returns whether it consumed the
    /// `=` that follows it.
    fn resolve_text(&mut self, held: Lexeme, is_key: bool) -> Result<bool, KdlError> {
        match self.context.elision {
            Elision::Node { .. } | Elision::Children { .. } => {
                trace!("elided {:?}", held.kind);
                return Ok(is_key);
            }
            Elision::Value => {
                debug!(
                    "elided {} at {}",
                    if is_key { "property" } else { "argument" },
                    held.span.start
                );
                self.context.elision = if is_key {
                    Elision::PropertyValue
                } else {
                    Elision::None
                };
                return Ok(is_key);
            }
            Elision::PropertyValue => {
                self.context.elision = Elision::None;
                return Ok(false);
            }
            Elision::None => {}
        }

        let (role, taken) = match self.context.awaiting {
            Awaiting::NodeName => {
                self.context.awaiting = Awaiting::Attribute;
                (Role::NodeName, false)
            }
            Awaiting::Attribute if is_key => {
                self.context.awaiting = Awaiting::PropertyValue;
                (Role::PropertyKey, true)
            }
            Awaiting::Attribute => (Role::Value, false),
            Awaiting::PropertyValue => {
                self.context.awaiting = Awaiting::Attribute;
                self.open_key = None;
                (Role::Value, false)
            }
        };

        let span = held.span;
        let kind = literal::decode(held, role)?;
        if role == Role::PropertyKey {
            if let TokenKind::Identifier(name) | TokenKind::String(name) = &kind {
                self.open_key = Some((name.clone(), span));
            }
        }
        self.ready.push_back(Token {
            kind,
            is_node_name: role == Role::NodeName,
            is_property_key: role == Role::PropertyKey,
            span,
        });
        Ok(taken)
    }

    fn child_begin(&mut self, span: Span) -> Result<(), KdlError> {
        match self.context.elision {
            Elision::Node { depth } => {
                self.context.elision = Elision::Node { depth: depth + 1 };
                return Ok(());
            }
            Elision::Children { depth } => {
                self.context.elision = Elision::Children { depth: depth + 1 };
                return Ok(());
            }
            Elision::Value => {
                debug!("elided children block at {}", span.start);
                self.context.elision = Elision::Children { depth: 1 };
                return Ok(());
            }
            Elision::PropertyValue => {
                self.context.elision = Elision::None;
                return Err(LexicalError::unexpected("{", span).into());
            }
            Elision::None => {}
        }

        match self.context.awaiting {
            Awaiting::NodeName => {
                // skip the block so that parsing can go on after it
                self.context.elision = Elision::Children { depth: 1 };
                Err(StructuralError::OrphanChildren {
                    position: span.start,
                    span: span.source_span(),
                }
                .into())
            }
            Awaiting::PropertyValue => Err(self.missing_value(LexemeKind::ChildBegin, span)),
            Awaiting::Attribute => {
                self.context.awaiting = Awaiting::NodeName;
                self.ready
                    .push_back(Token::structural(TokenKind::ChildBegin, span));
                Ok(())
            }
        }
    }

    fn child_end(&mut self, span: Span) -> Result<(), KdlError> {
        match self.context.elision {
            Elision::Node { depth } if depth > 0 => {
                self.context.elision = Elision::Node { depth: depth - 1 };
                return Ok(());
            }
            Elision::Children { depth } => {
                self.context.elision = if depth > 1 {
                    Elision::Children { depth: depth - 1 }
                } else {
                    Elision::None
                };
                return Ok(());
            }
            // an elided child ends with its parent's block
            Elision::Node { .. } | Elision::Value | Elision::PropertyValue => {
                self.context.elision = Elision::None;
            }
            Elision::None => {}
        }

        if self.context.awaiting == Awaiting::PropertyValue {
            return Err(self.missing_value(LexemeKind::ChildEnd, span));
        }
        self.context.awaiting = Awaiting::NodeName;
        self.context.continued = false;
        self.ready
            .push_back(Token::structural(TokenKind::ChildEnd, span));
        Ok(())
    }

    fn node_break(&mut self, span: Span) -> Result<(), KdlError> {
        if self.context.continued {
            trace!("escaped break at {}", span.start);
            self.context.continued = false;
            return Ok(());
        }

        match self.context.elision {
            Elision::Node { depth: 0 } => {
                debug!("elided node ends at {}", span.start);
                self.context.elision = Elision::None;
            }
            Elision::Node { .. } | Elision::Children { .. } => return Ok(()),
            Elision::Value | Elision::PropertyValue => self.context.elision = Elision::None,
            Elision::None => {
                if self.context.awaiting == Awaiting::PropertyValue {
                    return Err(self.missing_value(LexemeKind::Break, span));
                }
            }
        }
        self.context.awaiting = Awaiting::NodeName;
        Ok(())
    }

    fn elide(&mut self, span: Span) {
        if self.context.elision != Elision::None {
            return;
        }
        self.context.elision = if self.context.awaiting == Awaiting::NodeName {
            debug!("eliding node at {}", span.start);
            Elision::Node { depth: 0 }
        } else {
            Elision::Value
        };
    }

    /// The key is dropped and `kind` is replayed as if it had come without
    /// the key.
    fn missing_value(&mut self, kind: LexemeKind, span: Span) -> KdlError {
        self.context.awaiting = Awaiting::Attribute;
        self.replay = Some(Lexeme { kind, span });
        let (key, key_span) = self.open_key.take().unwrap_or_else(|| (String::new(), span));
        StructuralError::MissingPropertyValue {
            key,
            position: key_span.start,
            span: key_span.source_span(),
        }
        .into()
    }
}
