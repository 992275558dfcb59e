use crate::document::{Document, NodeRef, ValueRef};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use std::fmt::{self, Write};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}

impl From<ValueRef<'_>> for Scalar {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::String(text) => Scalar::String(text.to_string()),
            ValueRef::Number(number) => Scalar::Number(number),
            ValueRef::Bool(flag) => Scalar::Boolean(flag),
            ValueRef::Null => Scalar::Null,
        }
    }
}

/// Properties in source order. Serializes as a map; a repeated key is
/// written once, with its last value.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties(pub Vec<(String, Scalar)>);

impl Properties {
    pub fn get(&self, key: &str) -> Option<&Scalar> {
        self.0.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Properties {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        for (index, (key, value)) in self.0.iter().enumerate() {
            let shadowed = self.0[index + 1..].iter().any(|(later, _)| later == key);
            if !shadowed {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// An owned copy of a node and its subtree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeValue {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Scalar>,
    #[serde(skip_serializing_if = "Properties::is_empty")]
    pub props: Properties,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<NodeValue>,
}

pub(crate) fn to_value(document: &Document<'_>) -> Vec<NodeValue> {
    document.nodes().map(node_value).collect()
}

fn node_value(node: NodeRef<'_>) -> NodeValue {
    NodeValue {
        name: node.name().to_string(),
        args: node.args().map(Scalar::from).collect(),
        props: Properties(
            node.props()
                .map(|prop| (prop.key.to_string(), Scalar::from(prop.value)))
                .collect(),
        ),
        children: node.children().map(node_value).collect(),
    }
}

/// Renders the document as KDL text that parses back to the same nodes.
impl fmt::Display for Document<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for node in self.nodes() {
            write_node(f, node, 0)?;
        }
        Ok(())
    }
}

fn write_node(f: &mut fmt::Formatter<'_>, node: NodeRef<'_>, level: usize) -> fmt::Result {
    let indent = level * 4;
    write!(f, "{:indent$}", "")?;
    write_identifier(f, node.name(), node.is_bare())?;
    for arg in node.args() {
        f.write_char(' ')?;
        write_value(f, arg)?;
    }
    for prop in node.props() {
        f.write_char(' ')?;
        write_identifier(f, prop.key, prop.bare)?;
        f.write_char('=')?;
        write_value(f, prop.value)?;
    }
    let mut children = node.children().peekable();
    if children.peek().is_some() {
        f.write_str(" {\n")?;
        for child in children {
            write_node(f, child, level + 1)?;
        }
        write!(f, "{:indent$}}}", "")?;
    }
    f.write_char('\n')
}

fn write_identifier(f: &mut fmt::Formatter<'_>, name: &str, bare: bool) -> fmt::Result {
    if bare && !name.is_empty() {
        f.write_str(name)
    } else {
        write_string(f, name)
    }
}

fn write_value(f: &mut fmt::Formatter<'_>, value: ValueRef<'_>) -> fmt::Result {
    match value {
        ValueRef::String(text) => write_string(f, text),
        ValueRef::Number(number) if number == 0.0 && number.is_sign_negative() => {
            f.write_str("-0.0")
        }
        ValueRef::Number(number) if number.fract() == 0.0 && number.abs() < 1e15 => {
            write!(f, "{}", number as i64)
        }
        ValueRef::Number(number) => write!(f, "{number}"),
        ValueRef::Bool(flag) => write!(f, "{flag}"),
        ValueRef::Null => f.write_str("null"),
    }
}

fn write_string(f: &mut fmt::Formatter<'_>, text: &str) -> fmt::Result {
    f.write_char('"')?;
    for ch in text.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\r' => f.write_str("\\r")?,
            '\t' => f.write_str("\\t")?,
            '\u{08}' => f.write_str("\\b")?,
            '\u{0C}' => f.write_str("\\f")?,
            c if c.is_control() => write!(f, "\\u{{{:x}}}", c as u32)?,
            c => f.write_char(c)?,
        }
    }
    f.write_char('"')
}
