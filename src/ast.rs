//! Arena-resident document records.
//!
//! Nothing here owns another record: strings, sequences and child nodes are
//! all reached through handles into the document's two tables.

use crate::arena::{Footprint, Handle};
use std::mem::size_of;

pub type NodeHandle = Handle<Node>;
pub type DataHandle = Handle<Payload>;

/// A node or property name, remembering whether it was written bare or quoted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Identifier {
    pub text: DataHandle,
    pub bare: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    String(DataHandle),
    Number(f64),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prop {
    pub key: Identifier,
    pub value: Value,
}

/// Sequences are allocated on first use.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: Identifier,
    pub args: Option<DataHandle>,
    pub props: Option<DataHandle>,
    pub children: Option<DataHandle>,
}

impl Node {
    pub fn new(id: Identifier) -> Self {
        Node {
            id,
            args: None,
            props: None,
            children: None,
        }
    }
}

impl Footprint for Node {
    fn footprint(&self) -> usize {
        size_of::<Node>()
    }
}

/// Variable-size contents of a data block.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Values(Vec<Value>),
    Props(Vec<Prop>),
    Nodes(Vec<NodeHandle>),
}

impl Payload {
    /// Footprint after appending one more element, for sequence payloads.
    pub fn footprint_after_push(&self) -> usize {
        match self {
            Payload::Text(text) => text.len() + 1,
            Payload::Values(values) => (values.len() + 1) * size_of::<Value>(),
            Payload::Props(props) => (props.len() + 1) * size_of::<Prop>(),
            Payload::Nodes(nodes) => (nodes.len() + 1) * size_of::<NodeHandle>(),
        }
    }
}

impl Footprint for Payload {
    fn footprint(&self) -> usize {
        match self {
            // includes a terminator byte
            Payload::Text(text) => text.len() + 1,
            Payload::Values(values) => values.len() * size_of::<Value>(),
            Payload::Props(props) => props.len() * size_of::<Prop>(),
            Payload::Nodes(nodes) => nodes.len() * size_of::<NodeHandle>(),
        }
    }
}
