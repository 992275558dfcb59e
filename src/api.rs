use crate::document::{Document, DocumentBuffers};
use crate::error::{IoError, KdlError};
use crate::parser::Parser;
use crate::serialization::{to_value, NodeValue};
use log::info;
use miette::{NamedSource, Report};
use serde::{Serialize, Serializer};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

/// Parses a complete document held in memory.
///
/// # Errors
/// Returns the first lexical, structural or capacity error encountered.
pub fn parse<'a>(source: &str, buffers: &'a mut DocumentBuffers) -> Result<Document<'a>, KdlError> {
    let mut parser = Parser::new(buffers)?;
    parser.feed(source.as_bytes())?;
    parser.finish()?;
    Ok(parser.into_document())
}

/// Parses a document from `reader`, in chunks of the configured
/// `read_chunk_size`.
///
/// # Errors
/// Returns a parse error, or an I/O error if reading fails.
pub fn parse_reader<'a, R: Read>(
    reader: R,
    buffers: &'a mut DocumentBuffers,
) -> Result<Document<'a>, KdlError> {
    parse_stream(reader, "reader", buffers)
}

/// Opens and parses the file at `path`.
///
/// # Errors
/// Returns an I/O error if the file cannot be opened or read, or a parse
/// error.
pub fn load_file<'a>(
    path: impl AsRef<Path>,
    buffers: &'a mut DocumentBuffers,
) -> Result<Document<'a>, KdlError> {
    let path = path.as_ref();
    let origin = path.display().to_string();
    let file = File::open(path).map_err(|err| IoError::new(origin.as_str(), err))?;
    parse_stream(file, &origin, buffers)
}

/// Attaches `source` to `error` so that it renders with labelled snippets.
#[must_use]
pub fn report(error: KdlError, name: &str, source: &str) -> Report {
    Report::new(error).with_source_code(NamedSource::new(name, source.to_string()))
}

fn parse_stream<'a, R: Read>(
    mut reader: R,
    origin: &str,
    buffers: &'a mut DocumentBuffers,
) -> Result<Document<'a>, KdlError> {
    let chunk_size = buffers.config().read_chunk_size.max(1);
    let mut parser = Parser::new(buffers)?;
    let mut chunk = vec![0u8; chunk_size];
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(IoError::new(origin, err).into()),
        };
        parser.feed(&chunk[..read])?;
    }
    parser.finish()?;

    let document = parser.into_document();
    info!(
        "loaded {} top-level node(s), {} in total, from {origin}",
        document.roots().len(),
        document.node_count()
    );
    Ok(document)
}

impl Serialize for Document<'_> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl Document<'_> {
    /// Copies the document out of its buffers into owned values.
    #[must_use]
    pub fn to_value(&self) -> Vec<NodeValue> {
        to_value(self)
    }

    /// Serializes the document into a pretty-printed JSON string.
    ///
    /// # Errors
    /// Returns a `serde_json::Error` if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self)
    }

    /// Serializes the document into a YAML string.
    ///
    /// # Errors
    /// Returns a `serde_yaml::Error` if serialization fails.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self)
    }
}
