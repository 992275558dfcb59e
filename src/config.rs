use serde::{Deserialize, Serialize};

/// Sizes of the caller-owned memory a document is built in.
///
/// Every field has a default, so a configuration file only needs to name the
/// values it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    /// Blocks in the node table; one per node.
    pub node_blocks: usize,
    /// Blocks in the data table, which holds strings and sequences.
    pub data_blocks: usize,
    /// Bytes a single data block can hold.
    pub data_block_size: usize,
    /// Longest token the lexer will accumulate, in bytes.
    pub token_buffer_size: usize,
    /// Deepest nesting of children blocks.
    pub max_depth: usize,
    /// Bytes read per call when parsing from a reader.
    pub read_chunk_size: usize,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        DocumentConfig {
            node_blocks: 1024,
            data_blocks: 8192,
            data_block_size: 4096,
            token_buffer_size: 4096,
            max_depth: 256,
            read_chunk_size: 4096,
        }
    }
}

impl DocumentConfig {
    pub fn from_yaml_str(source: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(source)
    }

    pub fn from_json_str(source: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(source)
    }
}
