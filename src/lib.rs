pub mod api;
pub mod arena;
pub mod ast;
pub mod config;
pub mod document;
pub mod error;
pub mod lexer;
pub mod literal;
pub mod parser;
pub mod tokenizer;
pub mod utf8;
pub mod utils;
mod serialization;

pub use api::{load_file, parse, parse_reader, report};
pub use config::DocumentConfig;
pub use document::{Document, DocumentBuffers, NodeRef, PropRef, ValueRef};
pub use error::KdlError;
pub use parser::Parser;
pub use serialization::{NodeValue, Properties, Scalar};
