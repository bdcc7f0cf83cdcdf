//! Database handle and table catalog.

use crate::channel::{ChannelConfig, FilePageChannel, PageChannel};
use crate::column::ColumnDescriptor;
use crate::index::IndexDescriptor;
use crate::table::TableCreator;
use avocet_common::{AvocetError, JetFormat, Result};
use std::path::Path;
use std::sync::Arc;

/// Catalog entry type for a user table.
pub const TYPE_TABLE: u8 = 1;

/// Checks a proposed identifier against the database naming rules.
pub fn validate_identifier_name(name: &str, max_length: usize, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(AvocetError::InvalidTableDefinition(format!(
            "{} name cannot be blank",
            what
        )));
    }
    if name.len() > max_length {
        return Err(AvocetError::InvalidTableDefinition(format!(
            "{} name is longer than the maximum of {} characters",
            what, max_length
        )));
    }
    Ok(())
}

/// One registered object in the database catalog.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Object name.
    pub name: String,
    /// Page number of the object's table-definition page.
    pub tdef_page_number: u32,
    /// Object type (see [`TYPE_TABLE`]).
    pub entry_type: u8,
}

/// A single-file database: the paged storage channel plus the catalog of
/// tables created in it.
///
/// Single-writer: all mutation goes through `&mut self`.
pub struct Database {
    format: JetFormat,
    channel: Arc<dyn PageChannel>,
    catalog: Vec<CatalogEntry>,
}

impl Database {
    /// Opens (or creates) a database file at `path`.
    pub fn open(path: impl AsRef<Path>, format: JetFormat) -> Result<Self> {
        let config = ChannelConfig {
            path: path.as_ref().to_path_buf(),
            fsync_enabled: true,
        };
        let channel = FilePageChannel::new(config, format)?;
        Ok(Self::with_channel(Arc::new(channel), format))
    }

    /// Creates a database over an existing channel.
    pub fn with_channel(channel: Arc<dyn PageChannel>, format: JetFormat) -> Self {
        Self {
            format,
            channel,
            catalog: Vec::new(),
        }
    }

    /// The format descriptor of this database.
    pub fn format(&self) -> &JetFormat {
        &self.format
    }

    /// The paged storage channel of this database.
    pub fn channel(&self) -> &Arc<dyn PageChannel> {
        &self.channel
    }

    /// Creates a new table and returns its table-definition page number.
    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        indexes: Vec<IndexDescriptor>,
    ) -> Result<u32> {
        TableCreator::new(self, name, columns, indexes).create_table()
    }

    /// Registers a new table in the catalog.
    pub fn add_new_table(
        &mut self,
        name: &str,
        tdef_page_number: u32,
        entry_type: u8,
    ) -> Result<()> {
        if self
            .catalog
            .iter()
            .any(|entry| entry.name.eq_ignore_ascii_case(name))
        {
            return Err(AvocetError::TableAlreadyExists(name.to_string()));
        }
        self.catalog.push(CatalogEntry {
            name: name.to_string(),
            tdef_page_number,
            entry_type,
        });
        Ok(())
    }

    /// Names of the registered tables, in registration order.
    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.catalog.iter().map(|entry| entry.name.as_str())
    }

    /// Looks up a table's definition page, case-insensitively.
    pub fn table_definition_page(&self, name: &str) -> Option<u32> {
        self.catalog
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.tdef_page_number)
    }
}
