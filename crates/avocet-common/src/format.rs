//! Version-dependent format descriptors for Jet-family database files.

use serde::{Deserialize, Serialize};

/// Supported on-disk format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormatVersion {
    /// 2 KB page format (Jet 3.x era files).
    V3,
    /// 4 KB page format (Jet 4.x era files).
    V4,
}

impl std::fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatVersion::V3 => write!(f, "V3"),
            FormatVersion::V4 => write!(f, "V4"),
        }
    }
}

/// Immutable table of version-dependent numeric limits and offsets.
///
/// One instance exists per format version; all fields are consumed
/// read-only by the storage engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JetFormat {
    /// Format version this descriptor belongs to.
    pub version: FormatVersion,
    /// Size of one storage page in bytes.
    pub page_size: usize,
    /// Byte offset of the entry-length mask within an index page.
    pub offset_index_entry_mask: usize,
    /// Size of the entry-length mask in bytes.
    pub size_index_entry_mask: usize,
    /// Maximum length of a table name.
    pub max_table_name_length: usize,
    /// Maximum length of an index name.
    pub max_index_name_length: usize,
    /// Maximum length of a column name.
    pub max_column_name_length: usize,
    /// Maximum number of columns in one table.
    pub max_columns_per_table: usize,
    /// Maximum number of indexes on one table.
    pub max_indexes_per_table: usize,
}

impl JetFormat {
    /// Descriptor for the 2 KB page format.
    pub const V3: JetFormat = JetFormat {
        version: FormatVersion::V3,
        page_size: 2048,
        offset_index_entry_mask: 22,
        size_index_entry_mask: 226,
        max_table_name_length: 64,
        max_index_name_length: 64,
        max_column_name_length: 64,
        max_columns_per_table: 255,
        max_indexes_per_table: 32,
    };

    /// Descriptor for the 4 KB page format.
    pub const V4: JetFormat = JetFormat {
        version: FormatVersion::V4,
        page_size: 4096,
        offset_index_entry_mask: 27,
        size_index_entry_mask: 453,
        max_table_name_length: 64,
        max_index_name_length: 64,
        max_column_name_length: 64,
        max_columns_per_table: 255,
        max_indexes_per_table: 32,
    };

    /// Returns the descriptor for a format version.
    pub fn for_version(version: FormatVersion) -> JetFormat {
        match version {
            FormatVersion::V3 => JetFormat::V3,
            FormatVersion::V4 => JetFormat::V4,
        }
    }
}
