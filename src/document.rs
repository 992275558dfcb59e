//! A parsed document living in caller-owned blocks.
//!
//! [`DocumentBuffers`] is the memory; a [`Document`] borrows it for as long as
//! the document is alive. All records are reached through handles, and the
//! read side hands out [`NodeRef`] / [`ValueRef`] views that borrow strings
//! straight out of the data table.

use crate::arena::{Block, HandleTable};
use crate::ast::{DataHandle, Identifier, Node, NodeHandle, Payload, Prop, Value};
use crate::config::DocumentConfig;
use crate::error::{CapacityError, KdlError};
use log::debug;
use std::fmt;
use std::mem::size_of;

#[derive(Debug)]
pub struct DocumentBuffers {
    config: DocumentConfig,
    nodes: Vec<Block<Node>>,
    data: Vec<Block<Payload>>,
}

impl DocumentBuffers {
    pub fn new(config: DocumentConfig) -> Self {
        DocumentBuffers {
            nodes: Block::pool(config.node_blocks),
            data: Block::pool(config.data_blocks),
            config,
        }
    }

    pub fn config(&self) -> &DocumentConfig {
        &self.config
    }
}

impl Default for DocumentBuffers {
    fn default() -> Self {
        DocumentBuffers::new(DocumentConfig::default())
    }
}

#[derive(Debug)]
pub struct Document<'a> {
    nodes: HandleTable<'a, Node>,
    data: HandleTable<'a, Payload>,
    roots: DataHandle,
}

#[derive(Debug, Clone, Copy)]
enum Sequence {
    Args,
    Props,
    Children,
}

impl Sequence {
    fn of(self, node: &Node) -> Option<DataHandle> {
        match self {
            Sequence::Args => node.args,
            Sequence::Props => node.props,
            Sequence::Children => node.children,
        }
    }

    fn slot(self, node: &mut Node) -> &mut Option<DataHandle> {
        match self {
            Sequence::Args => &mut node.args,
            Sequence::Props => &mut node.props,
            Sequence::Children => &mut node.children,
        }
    }
}

enum Element {
    Value(Value),
    Prop(Prop),
    Child(NodeHandle),
}

impl Element {
    fn sequence(&self) -> Sequence {
        match self {
            Element::Value(_) => Sequence::Args,
            Element::Prop(_) => Sequence::Props,
            Element::Child(_) => Sequence::Children,
        }
    }

    fn into_payload(self) -> Payload {
        match self {
            Element::Value(value) => Payload::Values(vec![value]),
            Element::Prop(prop) => Payload::Props(vec![prop]),
            Element::Child(child) => Payload::Nodes(vec![child]),
        }
    }
}

impl<'a> Document<'a> {
    pub fn new(buffers: &'a mut DocumentBuffers) -> Result<Self, KdlError> {
        let data_block_size = buffers.config.data_block_size;
        let nodes = HandleTable::new("node", &mut buffers.nodes[..], size_of::<Node>());
        let mut data = HandleTable::new("data", &mut buffers.data[..], data_block_size);
        let roots = data.alloc(Payload::Nodes(Vec::new()))?;
        Ok(Document { nodes, data, roots })
    }

    /// Handles of the top-level nodes, in document order.
    pub fn roots(&self) -> &[NodeHandle] {
        self.node_list(Some(self.roots))
    }

    /// Top-level nodes, in document order.
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
        self.roots().iter().filter_map(move |&handle| self.node(handle))
    }

    pub fn node(&self, handle: NodeHandle) -> Option<NodeRef<'_>> {
        self.nodes.get(handle).map(|node| NodeRef {
            document: self,
            handle,
            node,
        })
    }

    pub fn text(&self, handle: DataHandle) -> Option<&str> {
        match self.data.get(handle) {
            Some(Payload::Text(text)) => Some(text.as_str()),
            _ => None,
        }
    }

    pub fn resolve(&self, value: Value) -> ValueRef<'_> {
        match value {
            Value::String(handle) => ValueRef::String(self.text(handle).unwrap_or_default()),
            Value::Number(number) => ValueRef::Number(number),
            Value::Bool(flag) => ValueRef::Bool(flag),
            Value::Null => ValueRef::Null,
        }
    }

    /// Live nodes at any depth.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Data blocks in use, including the root list.
    pub fn data_count(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots().is_empty()
    }

    /// Detaches `handle` from its parent and frees it with its whole
    /// subtree. Every handle into the subtree becomes stale.
    pub fn remove_node(&mut self, handle: NodeHandle) -> Result<(), KdlError> {
        if !self.nodes.contains(handle) {
            return Err(handle.stale().into());
        }
        self.detach(handle);

        let mut pending = vec![handle];
        let mut removed = 0usize;
        while let Some(next) = pending.pop() {
            let node = self.nodes.free(next)?;
            self.data.free(node.id.text)?;
            if let Some(args) = node.args {
                if let Payload::Values(values) = self.data.free(args)? {
                    values.into_iter().for_each(|value| self.release_value(value));
                }
            }
            if let Some(props) = node.props {
                if let Payload::Props(props) = self.data.free(props)? {
                    for prop in props {
                        self.release(prop.key.text);
                        self.release_value(prop.value);
                    }
                }
            }
            if let Some(children) = node.children {
                if let Payload::Nodes(children) = self.data.free(children)? {
                    pending.extend(children);
                }
            }
            removed += 1;
        }
        debug!("removed {removed} node(s) under {handle:?}");
        Ok(())
    }

    /// Drops every node. Outstanding handles all become stale.
    pub fn clear(&mut self) -> Result<(), KdlError> {
        self.nodes.clear();
        self.data.clear();
        self.roots = self.data.alloc(Payload::Nodes(Vec::new()))?;
        Ok(())
    }

    pub(crate) fn create_node(&mut self, name: &str, bare: bool) -> Result<NodeHandle, KdlError> {
        let text = self.store_text(name)?;
        match self.nodes.alloc(Node::new(Identifier { text, bare })) {
            Ok(handle) => Ok(handle),
            Err(err) => {
                self.release(text);
                Err(err.into())
            }
        }
    }

    /// Appends `child` to `parent`, or to the top level when there is none.
    pub(crate) fn attach(
        &mut self,
        parent: Option<NodeHandle>,
        child: NodeHandle,
    ) -> Result<(), KdlError> {
        match parent {
            Some(parent) => self.append(parent, Element::Child(child)),
            None => self.push_onto(self.roots, Element::Child(child)),
        }
    }

    pub(crate) fn store_text(&mut self, text: &str) -> Result<DataHandle, KdlError> {
        Ok(self.data.alloc(Payload::Text(text.to_string()))?)
    }

    /// On failure the value's string, if any, is freed.
    pub(crate) fn add_argument(&mut self, node: NodeHandle, value: Value) -> Result<(), KdlError> {
        self.append(node, Element::Value(value)).inspect_err(|_| {
            self.release_value(value);
        })
    }

    /// On failure the key and the value's string are freed.
    pub(crate) fn add_property(
        &mut self,
        node: NodeHandle,
        key: &str,
        bare: bool,
        value: Value,
    ) -> Result<(), KdlError> {
        let text = match self.store_text(key) {
            Ok(text) => text,
            Err(err) => {
                self.release_value(value);
                return Err(err);
            }
        };
        let prop = Prop {
            key: Identifier { text, bare },
            value,
        };
        self.append(node, Element::Prop(prop)).inspect_err(|_| {
            self.release(text);
            self.release_value(value);
        })
    }

    fn append(&mut self, owner: NodeHandle, element: Element) -> Result<(), KdlError> {
        let sequence = element.sequence();
        let node = self.nodes.get(owner).ok_or_else(|| owner.stale())?;
        if let Some(existing) = sequence.of(node) {
            return self.push_onto(existing, element);
        }

        let handle = self.data.alloc(element.into_payload())?;
        match self.nodes.get_mut(owner) {
            Some(node) => {
                *sequence.slot(node) = Some(handle);
                Ok(())
            }
            None => {
                self.release(handle);
                Err(owner.stale().into())
            }
        }
    }

    fn push_onto(&mut self, handle: DataHandle, element: Element) -> Result<(), KdlError> {
        let table = self.data.name();
        let block_size = self.data.block_size();
        let payload = self.data.get_mut(handle).ok_or_else(|| handle.stale())?;
        let requested = payload.footprint_after_push();
        if requested > block_size {
            return Err(CapacityError::BlockTooSmall {
                table,
                requested,
                block_size,
            }
            .into());
        }
        match (payload, element) {
            (Payload::Values(values), Element::Value(value)) => values.push(value),
            (Payload::Props(props), Element::Prop(prop)) => props.push(prop),
            (Payload::Nodes(nodes), Element::Child(child)) => nodes.push(child),
            _ => return Err(handle.stale().into()),
        }
        Ok(())
    }

    fn detach(&mut self, handle: NodeHandle) {
        let owner = self.data.iter().find_map(|(list, payload)| match payload {
            Payload::Nodes(nodes) if nodes.contains(&handle) => Some(list),
            _ => None,
        });
        if let Some(Payload::Nodes(nodes)) = owner.and_then(|list| self.data.get_mut(list)) {
            nodes.retain(|&node| node != handle);
        }
    }

    fn release(&mut self, handle: DataHandle) {
        if self.data.free(handle).is_err() {
            debug!("{handle:?} was already released");
        }
    }

    fn release_value(&mut self, value: Value) {
        if let Value::String(handle) = value {
            self.release(handle);
        }
    }

    fn values(&self, handle: Option<DataHandle>) -> &[Value] {
        match handle.and_then(|h| self.data.get(h)) {
            Some(Payload::Values(values)) => values.as_slice(),
            _ => &[],
        }
    }

    fn props(&self, handle: Option<DataHandle>) -> &[Prop] {
        match handle.and_then(|h| self.data.get(h)) {
            Some(Payload::Props(props)) => props.as_slice(),
            _ => &[],
        }
    }

    fn node_list(&self, handle: Option<DataHandle>) -> &[NodeHandle] {
        match handle.and_then(|h| self.data.get(h)) {
            Some(Payload::Nodes(nodes)) => nodes.as_slice(),
            _ => &[],
        }
    }
}

/// A borrowed view of one node.
#[derive(Clone, Copy)]
pub struct NodeRef<'d> {
    document: &'d Document<'d>,
    handle: NodeHandle,
    node: &'d Node,
}

impl<'d> NodeRef<'d> {
    pub fn handle(&self) -> NodeHandle {
        self.handle
    }

    pub fn name(&self) -> &'d str {
        self.document.text(self.node.id.text).unwrap_or_default()
    }

    /// Whether the name was written without quotes.
    pub fn is_bare(&self) -> bool {
        self.node.id.bare
    }

    pub fn args(&self) -> impl Iterator<Item = ValueRef<'d>> + 'd {
        let document = self.document;
        document
            .values(self.node.args)
            .iter()
            .map(move |&value| document.resolve(value))
    }

    pub fn arg(&self, index: usize) -> Option<ValueRef<'d>> {
        self.args().nth(index)
    }

    /// Properties in the order they were written, duplicates included.
    pub fn props(&self) -> impl Iterator<Item = PropRef<'d>> + 'd {
        let document = self.document;
        document.props(self.node.props).iter().map(move |prop| PropRef {
            key: document.text(prop.key.text).unwrap_or_default(),
            bare: prop.key.bare,
            value: document.resolve(prop.value),
        })
    }

    /// The value of `key`; when a key repeats, the last one wins.
    pub fn prop(&self, key: &str) -> Option<ValueRef<'d>> {
        self.props()
            .filter(|prop| prop.key == key)
            .last()
            .map(|prop| prop.value)
    }

    pub fn children(&self) -> impl Iterator<Item = NodeRef<'d>> + 'd {
        let document = self.document;
        document
            .node_list(self.node.children)
            .iter()
            .filter_map(move |&child| document.node(child))
    }
}

impl fmt::Debug for NodeRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("handle", &self.handle)
            .field("name", &self.name())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropRef<'d> {
    pub key: &'d str,
    pub bare: bool,
    pub value: ValueRef<'d>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValueRef<'d> {
    String(&'d str),
    Number(f64),
    Bool(bool),
    Null,
}

impl<'d> ValueRef<'d> {
    pub fn as_str(&self) -> Option<&'d str> {
        match self {
            ValueRef::String(text) => Some(*text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ValueRef::Number(number) => Some(*number),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ValueRef::Bool(flag) => Some(*flag),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ValueRef::Null)
    }
}
