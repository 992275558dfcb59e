use crate::ast::{NodeHandle, Value};
use crate::document::{Document, DocumentBuffers};
use crate::error::{CapacityError, KdlError, LexicalError, Span, StructuralError};
use crate::tokenizer::{Token, TokenKind, Tokenizer};
use log::{debug, trace};

/// A property key waiting for its value.
#[derive(Debug)]
struct PendingKey {
    name: String,
    bare: bool,
    span: Span,
}

/// Builds a [`Document`] from a stream of tokens.
///
/// Input arrives in windows through [`feed`](Parser::feed); each window is
/// processed completely before `feed` returns. When a call fails, the parser
/// can either be abandoned or, after [`recover`](Parser::recover), continued
/// with [`resume`](Parser::resume).
#[derive(Debug)]
pub struct Parser<'a> {
    document: Document<'a>,
    tokenizer: Tokenizer,
    parents: Vec<NodeHandle>,
    current: Option<NodeHandle>,
    pending_key: Option<PendingKey>,
    max_depth: usize,
    rejected_block: bool,
}

impl<'a> Parser<'a> {
    pub fn new(buffers: &'a mut DocumentBuffers) -> Result<Self, KdlError> {
        let token_buffer_size = buffers.config().token_buffer_size;
        let max_depth = buffers.config().max_depth;
        let document = Document::new(buffers)?;
        Ok(Parser {
            document,
            tokenizer: Tokenizer::new(token_buffer_size),
            parents: Vec::new(),
            current: None,
            pending_key: None,
            max_depth,
            rejected_block: false,
        })
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<(), KdlError> {
        self.tokenizer.feed(bytes);
        self.resume()
    }

    /// Processes whatever is left of the current window.
    pub fn resume(&mut self) -> Result<(), KdlError> {
        while let Some(token) = self.tokenizer.next_token()? {
            self.apply(token)?;
        }
        Ok(())
    }

    /// Ends the input. Fails if children blocks are still open.
    pub fn finish(&mut self) -> Result<(), KdlError> {
        self.tokenizer.finish()?;
        self.resume()?;
        if let Some(key) = self.pending_key.take() {
            return Err(missing_value(key));
        }
        if !self.parents.is_empty() {
            return Err(StructuralError::UnclosedChildren {
                depth: self.parents.len(),
            }
            .into());
        }
        Ok(())
    }

    pub fn document(&self) -> &Document<'a> {
        &self.document
    }

    pub fn into_document(self) -> Document<'a> {
        self.document
    }

    /// Open children blocks.
    pub fn depth(&self) -> usize {
        self.parents.len()
    }

    /// Applies one token to the document.
    pub fn apply(&mut self, token: Token) -> Result<(), KdlError> {
        trace!("apply {:?} at {}", token.kind, token.span.start);
        if token.is_node_name {
            return self.open_node(token);
        }
        if token.is_property_key {
            let (name, bare) = name_of(token.kind, token.span)?;
            self.pending_key = Some(PendingKey {
                name,
                bare,
                span: token.span,
            });
            return Ok(());
        }
        match token.kind {
            TokenKind::ChildBegin => self.open_children(token.span),
            TokenKind::ChildEnd => self.close_children(token.span),
            TokenKind::Identifier(name) => Err(LexicalError::unexpected(name, token.span).into()),
            kind => self.add_value(kind, token.span),
        }
    }

    /// Discards the node under construction after a failed call, so that
    /// parsing can go on with the next node. Returns whether a node was
    /// discarded.
    pub fn recover(&mut self) -> Result<bool, KdlError> {
        self.pending_key = None;
        let depth = if std::mem::take(&mut self.rejected_block) {
            1
        } else if self.tokenizer.in_node() {
            0
        } else {
            self.tokenizer.abandon_token();
            return Ok(false);
        };

        self.tokenizer.abandon_node(depth);
        let Some(node) = self.current.take() else {
            return Ok(false);
        };
        self.document.remove_node(node)?;
        debug!("discarded {node:?} after an error");
        Ok(true)
    }

    fn open_node(&mut self, token: Token) -> Result<(), KdlError> {
        self.current = None;
        if let Some(key) = self.pending_key.take() {
            return Err(missing_value(key));
        }
        let (name, bare) = name_of(token.kind, token.span)?;
        let node = self.document.create_node(&name, bare)?;
        if let Err(err) = self.document.attach(self.parents.last().copied(), node) {
            self.document.remove_node(node)?;
            return Err(err);
        }
        debug!("node `{name}` at depth {}", self.parents.len());
        self.current = Some(node);
        Ok(())
    }

    fn open_children(&mut self, span: Span) -> Result<(), KdlError> {
        if let Some(key) = self.pending_key.take() {
            return Err(missing_value(key));
        }
        let Some(node) = self.current else {
            return Err(StructuralError::OrphanChildren {
                position: span.start,
                span: span.source_span(),
            }
            .into());
        };
        if self.parents.len() >= self.max_depth {
            self.rejected_block = true;
            return Err(CapacityError::NestingTooDeep {
                limit: self.max_depth,
                position: span.start,
                span: span.source_span(),
            }
            .into());
        }
        self.current = None;
        self.parents.push(node);
        Ok(())
    }

    fn close_children(&mut self, span: Span) -> Result<(), KdlError> {
        if let Some(key) = self.pending_key.take() {
            return Err(missing_value(key));
        }
        self.current = None;
        match self.parents.pop() {
            Some(parent) => {
                trace!("closed children of {parent:?}");
                Ok(())
            }
            None => Err(StructuralError::UnmatchedChildEnd {
                position: span.start,
                span: span.source_span(),
            }
            .into()),
        }
    }

    fn add_value(&mut self, kind: TokenKind, span: Span) -> Result<(), KdlError> {
        let Some(node) = self.current else {
            return Err(StructuralError::ValueOutsideNode {
                position: span.start,
                span: span.source_span(),
            }
            .into());
        };
        let value = match kind {
            TokenKind::String(text) => Value::String(self.document.store_text(&text)?),
            TokenKind::Number(number) => Value::Number(number),
            TokenKind::Bool(flag) => Value::Bool(flag),
            TokenKind::Null => Value::Null,
            other => return Err(LexicalError::unexpected(format!("{other:?}"), span).into()),
        };
        match self.pending_key.take() {
            Some(key) => self.document.add_property(node, &key.name, key.bare, value),
            None => self.document.add_argument(node, value),
        }
    }
}

fn name_of(kind: TokenKind, span: Span) -> Result<(String, bool), KdlError> {
    match kind {
        TokenKind::Identifier(name) => Ok((name, true)),
        TokenKind::String(name) => Ok((name, false)),
        other => Err(LexicalError::unexpected(format!("{other:?}"), span).into()),
    }
}

fn missing_value(key: PendingKey) -> KdlError {
    StructuralError::MissingPropertyValue {
        key: key.name,
        position: key.span.start,
        span: key.span.source_span(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DocumentConfig;
    use crate::document::ValueRef;
    use miette::{NamedSource, Report};

    fn parse_ok<'a>(source: &str, buffers: &'a mut DocumentBuffers) -> Document<'a> {
        let mut parser = Parser::new(buffers).unwrap();
        let result = parser.feed(source.as_bytes()).and_then(|_| parser.finish());
        if let Err(err) = result {
            let report = Report::new(err)
                .with_source_code(NamedSource::new("test.kdl", source.to_string()));
            panic!("failed to parse: {report:?}");
        }
        parser.into_document()
    }

    fn parse_err(source: &str) -> KdlError {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser
            .feed(source.as_bytes())
            .and_then(|_| parser.finish())
            .expect_err("expected a parse error")
    }

    #[test]
    fn test_single_node_with_argument() {
        let mut buffers = DocumentBuffers::default();
        let doc = parse_ok(r#"title "Hi""#, &mut buffers);
        let nodes: Vec<_> = doc.nodes().collect();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].name(), "title");
        assert_eq!(nodes[0].arg(0), Some(ValueRef::String("Hi")));
    }

    #[test]
    fn test_property_and_child() {
        let mut buffers = DocumentBuffers::default();
        let doc = parse_ok("node prop=1 { child }", &mut buffers);
        let node = doc.nodes().next().unwrap();
        assert_eq!(node.name(), "node");
        assert_eq!(node.prop("prop"), Some(ValueRef::Number(1.0)));
        let children: Vec<&str> = node.children().map(|c| c.name()).collect();
        assert_eq!(children, vec!["child"]);
    }

    #[test]
    fn test_comment_only_line() {
        let mut buffers = DocumentBuffers::default();
        let doc = parse_ok("// comment\nnode", &mut buffers);
        let names: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(names, vec!["node"]);
    }

    #[test]
    fn test_elided_node_is_absent() {
        let mut buffers = DocumentBuffers::default();
        let doc = parse_ok("/- node1\nnode2", &mut buffers);
        let names: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(names, vec!["node2"]);
        assert_eq!(doc.node_count(), 1);
    }

    #[test]
    fn test_number_formats() {
        let mut buffers = DocumentBuffers::default();
        let doc = parse_ok("num 0x1A 0b101 0o17 1_000.5e2", &mut buffers);
        let args: Vec<f64> = doc
            .nodes()
            .next()
            .unwrap()
            .args()
            .filter_map(|v| v.as_f64())
            .collect();
        assert_eq!(args, vec![26.0, 5.0, 15.0, 100050.0]);
    }

    #[test]
    fn test_deep_nesting_and_siblings() {
        let mut buffers = DocumentBuffers::default();
        let source = "a {\n  b {\n    c 1\n  }\n  d\n}\ne";
        let doc = parse_ok(source, &mut buffers);
        let roots: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(roots, vec!["a", "e"]);
        let a = doc.nodes().next().unwrap();
        let kids: Vec<&str> = a.children().map(|n| n.name()).collect();
        assert_eq!(kids, vec!["b", "d"]);
        let c = a.children().next().unwrap().children().next().unwrap();
        assert_eq!(c.arg(0), Some(ValueRef::Number(1.0)));
    }

    #[test]
    fn test_value_without_node() {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        let token = Token {
            kind: TokenKind::Number(1.0),
            is_node_name: false,
            is_property_key: false,
            span: Span::default(),
        };
        let err = parser.apply(token).unwrap_err();
        assert!(matches!(
            err,
            KdlError::Structural(StructuralError::ValueOutsideNode { .. })
        ));
    }

    #[test]
    fn test_byte_at_a_time_feeding() {
        let source = "node \"caf\u{e9}\" k=r#\"x\"# {\n  child 0x10 // note\n}\n";
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        for byte in source.as_bytes() {
            parser.feed(std::slice::from_ref(byte)).unwrap();
        }
        parser.finish().unwrap();
        let doc = parser.into_document();
        let node = doc.nodes().next().unwrap();
        assert_eq!(node.arg(0), Some(ValueRef::String("caf\u{e9}")));
        assert_eq!(node.prop("k"), Some(ValueRef::String("x")));
        let child = node.children().next().unwrap();
        assert_eq!(child.arg(0), Some(ValueRef::Number(16.0)));
    }

    #[test]
    fn test_depth_tracks_open_blocks() {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser.feed(b"a {\n  b {\n").unwrap();
        assert_eq!(parser.depth(), 2);
        assert_eq!(parser.document().node_count(), 2);
        parser.feed(b"  }\n}\n").unwrap();
        assert_eq!(parser.depth(), 0);
        parser.finish().unwrap();
        assert_eq!(parser.document().roots().len(), 1);
    }

    #[test]
    fn test_unclosed_children() {
        let err = parse_err("a {\n b {\n");
        assert!(matches!(
            err,
            KdlError::Structural(StructuralError::UnclosedChildren { depth: 2 })
        ));
    }

    #[test]
    fn test_unmatched_child_end() {
        let err = parse_err("a\n}");
        assert!(matches!(
            err,
            KdlError::Structural(StructuralError::UnmatchedChildEnd { .. })
        ));
    }

    #[test]
    fn test_nesting_limit() {
        let config = DocumentConfig {
            max_depth: 2,
            ..DocumentConfig::default()
        };
        let mut buffers = DocumentBuffers::new(config);
        let mut parser = Parser::new(&mut buffers).unwrap();
        let err = parser.feed(b"a { b { c { d } } }").unwrap_err();
        assert!(matches!(
            err,
            KdlError::Capacity(CapacityError::NestingTooDeep { limit: 2, .. })
        ));
    }

    #[test]
    fn test_recover_discards_only_the_bad_node() {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser.feed(b"good 1\nbad 2 1x { inner }\nalso_good\n").unwrap_err();
        assert!(parser.recover().unwrap());
        parser.resume().unwrap();
        parser.finish().unwrap();
        let doc = parser.into_document();
        let names: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(names, vec!["good", "also_good"]);
        assert_eq!(doc.node_count(), 2);
    }

    #[test]
    fn test_recover_from_missing_property_value() {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser.feed(b"p {\n  a key=\n  b\n}\n").unwrap_err();
        assert!(parser.recover().unwrap());
        parser.resume().unwrap();
        parser.finish().unwrap();
        let doc = parser.into_document();
        let p = doc.nodes().next().unwrap();
        let kids: Vec<&str> = p.children().map(|n| n.name()).collect();
        assert_eq!(kids, vec!["b"]);
    }

    #[test]
    fn test_recover_from_too_deep_block() {
        let config = DocumentConfig {
            max_depth: 1,
            ..DocumentConfig::default()
        };
        let mut buffers = DocumentBuffers::new(config);
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser.feed(b"a {\n  b { c }\n  d\n}\ne\n").unwrap_err();
        assert!(parser.recover().unwrap());
        parser.resume().unwrap();
        parser.finish().unwrap();
        let doc = parser.into_document();
        let a = doc.nodes().next().unwrap();
        let kids: Vec<&str> = a.children().map(|n| n.name()).collect();
        assert_eq!(kids, vec!["d"]);
        let roots: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(roots, vec!["a", "e"]);
    }

    #[test]
    fn test_recover_skips_orphan_block() {
        let mut buffers = DocumentBuffers::default();
        let mut parser = Parser::new(&mut buffers).unwrap();
        parser.feed(b"a\n{ x }\nb\n").unwrap_err();
        assert!(!parser.recover().unwrap());
        parser.resume().unwrap();
        parser.finish().unwrap();
        let doc = parser.into_document();
        let names: Vec<&str> = doc.nodes().map(|n| n.name()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
