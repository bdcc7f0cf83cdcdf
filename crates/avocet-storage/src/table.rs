//! Table creation orchestration.

use crate::catalog::{validate_identifier_name, Database, TYPE_TABLE};
use crate::channel::{PageChannel, WriteEpoch, INVALID_PAGE_NUMBER};
use crate::column::{Column, ColumnDescriptor};
use crate::index::IndexDescriptor;
use crate::tdef;
use avocet_common::{AvocetError, DataType, JetFormat, Result};
use std::collections::HashSet;
use std::sync::Arc;

/// Per-index bookkeeping maintained during table creation.
#[derive(Debug, Clone, Copy)]
pub struct IndexState {
    index_number: u32,
    index_data_number: u32,
    umap_row_number: u8,
    umap_page_number: u32,
    root_page_number: u32,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            index_number: 0,
            index_data_number: 0,
            umap_row_number: 0,
            umap_page_number: INVALID_PAGE_NUMBER,
            root_page_number: INVALID_PAGE_NUMBER,
        }
    }
}

impl IndexState {
    /// Logical, zero-based index number.
    pub fn index_number(&self) -> u32 {
        self.index_number
    }

    pub fn set_index_number(&mut self, index_number: u32) {
        self.index_number = index_number;
    }

    /// Physical, zero-based index-data number. Equal to the logical
    /// number while foreign-key indexes are unsupported.
    pub fn index_data_number(&self) -> u32 {
        self.index_data_number
    }

    pub fn set_index_data_number(&mut self, index_data_number: u32) {
        self.index_data_number = index_data_number;
    }

    pub fn umap_row_number(&self) -> u8 {
        self.umap_row_number
    }

    pub fn set_umap_row_number(&mut self, umap_row_number: u8) {
        self.umap_row_number = umap_row_number;
    }

    pub fn umap_page_number(&self) -> u32 {
        self.umap_page_number
    }

    pub fn set_umap_page_number(&mut self, umap_page_number: u32) {
        self.umap_page_number = umap_page_number;
    }

    pub fn root_page_number(&self) -> u32 {
        self.root_page_number
    }

    pub fn set_root_page_number(&mut self, root_page_number: u32) {
        self.root_page_number = root_page_number;
    }
}

/// Per-column bookkeeping for long-value columns.
#[derive(Debug, Clone, Copy)]
pub struct ColumnState {
    umap_owned_row_number: u8,
    umap_free_row_number: u8,
    umap_page_number: u32,
}

impl Default for ColumnState {
    fn default() -> Self {
        Self {
            umap_owned_row_number: 0,
            umap_free_row_number: 0,
            umap_page_number: INVALID_PAGE_NUMBER,
        }
    }
}

impl ColumnState {
    pub fn umap_owned_row_number(&self) -> u8 {
        self.umap_owned_row_number
    }

    pub fn set_umap_owned_row_number(&mut self, row: u8) {
        self.umap_owned_row_number = row;
    }

    pub fn umap_free_row_number(&self) -> u8 {
        self.umap_free_row_number
    }

    pub fn set_umap_free_row_number(&mut self, row: u8) {
        self.umap_free_row_number = row;
    }

    pub fn umap_page_number(&self) -> u32 {
        self.umap_page_number
    }

    pub fn set_umap_page_number(&mut self, page_number: u32) {
        self.umap_page_number = page_number;
    }
}

/// Maintains state while creating one table.
///
/// A creator lives across a single `create_table` call and its enclosing
/// write epoch, then is consumed.
pub struct TableCreator<'a> {
    database: &'a mut Database,
    name: String,
    column_descriptors: Vec<ColumnDescriptor>,
    index_descriptors: Vec<IndexDescriptor>,
    /// Runtime columns with assigned numbers, built after validation.
    columns: Vec<Arc<Column>>,
    /// One state per index descriptor, in order.
    index_states: Vec<IndexState>,
    /// One state per long-value column, in order.
    column_states: Vec<ColumnState>,
    /// Positions of the long-value columns within `columns`.
    long_value_columns: Vec<usize>,
    tdef_page_number: u32,
    umap_page_number: u32,
    index_count: u32,
    logical_index_count: u32,
}

impl<'a> TableCreator<'a> {
    /// Creates a new creator for the given table proposal.
    pub fn new(
        database: &'a mut Database,
        name: &str,
        columns: Vec<ColumnDescriptor>,
        indexes: Vec<IndexDescriptor>,
    ) -> Self {
        Self {
            database,
            name: name.to_string(),
            column_descriptors: columns,
            index_descriptors: indexes,
            columns: Vec::new(),
            index_states: Vec::new(),
            column_states: Vec::new(),
            long_value_columns: Vec::new(),
            tdef_page_number: INVALID_PAGE_NUMBER,
            umap_page_number: INVALID_PAGE_NUMBER,
            index_count: 0,
            logical_index_count: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tdef_page_number(&self) -> u32 {
        self.tdef_page_number
    }

    pub fn umap_page_number(&self) -> u32 {
        self.umap_page_number
    }

    /// Runtime columns with assigned numbers (empty before creation runs).
    pub fn columns(&self) -> &[Arc<Column>] {
        &self.columns
    }

    pub fn index_descriptors(&self) -> &[IndexDescriptor] {
        &self.index_descriptors
    }

    pub fn index_states(&self) -> &[IndexState] {
        &self.index_states
    }

    pub fn index_states_mut(&mut self) -> &mut [IndexState] {
        &mut self.index_states
    }

    pub fn column_states(&self) -> &[ColumnState] {
        &self.column_states
    }

    pub fn column_states_mut(&mut self) -> &mut [ColumnState] {
        &mut self.column_states
    }

    /// Positions of the long-value columns within the column list.
    pub fn long_value_columns(&self) -> &[usize] {
        &self.long_value_columns
    }

    /// Physical index-data count.
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Logical index count.
    pub fn logical_index_count(&self) -> u32 {
        self.logical_index_count
    }

    pub(crate) fn format(&self) -> &JetFormat {
        self.database.format()
    }

    pub(crate) fn channel(&self) -> &Arc<dyn PageChannel> {
        self.database.channel()
    }

    /// Number of variable-length columns that are not long values.
    pub fn count_non_long_variable_length(&self) -> u16 {
        self.column_descriptors
            .iter()
            .filter(|c| c.data_type.is_variable_length() && !c.data_type.is_long_value())
            .count() as u16
    }

    /// Looks up a runtime column by name, case-insensitively.
    pub(crate) fn find_column(&self, name: &str) -> Result<Arc<Column>> {
        self.columns
            .iter()
            .find(|c| c.name().eq_ignore_ascii_case(name))
            .cloned()
            .ok_or_else(|| {
                AvocetError::InvalidTableDefinition(format!("unknown column: {}", name))
            })
    }

    /// Creates the table in the database.
    pub fn create_table(mut self) -> Result<u32> {
        self.validate()?;

        // assign column numbers and collect long-value bookkeeping
        self.columns = self
            .column_descriptors
            .iter()
            .enumerate()
            .map(|(number, desc)| {
                Arc::new(Column::new(
                    &desc.name,
                    desc.data_type,
                    number as u16,
                    desc.auto_number,
                ))
            })
            .collect();
        for (position, column) in self.columns.iter().enumerate() {
            if column.is_long_value() {
                self.long_value_columns.push(position);
                self.column_states.push(ColumnState::default());
            }
        }

        // index numbers: the logical and physical counters advance
        // together until foreign-key indexes are supported
        for _ in &self.index_descriptors {
            let mut state = IndexState::default();
            state.set_index_number(self.logical_index_count);
            self.logical_index_count += 1;
            state.set_index_data_number(self.index_count);
            self.index_count += 1;
            self.index_states.push(state);
        }

        let channel = Arc::clone(self.database.channel());
        let epoch = WriteEpoch::begin(channel.as_ref());

        let result = (|| -> Result<u32> {
            self.tdef_page_number = channel.reserve_page_number()?;
            self.umap_page_number = channel.reserve_page_number()?;

            tdef::write_usage_map_page(channel.as_ref(), self.umap_page_number)?;
            tdef::write_table_definition(&mut self)?;

            self.database
                .add_new_table(&self.name, self.tdef_page_number, TYPE_TABLE)?;
            Ok(self.tdef_page_number)
        })();

        match result {
            Ok(page_number) => {
                epoch.finish()?;
                Ok(page_number)
            }
            // the epoch guard closes the bracket on drop
            Err(e) => Err(e),
        }
    }

    /// Validates the new table information before anything is reserved.
    fn validate(&self) -> Result<()> {
        let format = *self.database.format();

        validate_identifier_name(&self.name, format.max_table_name_length, "table")?;

        if self.column_descriptors.is_empty() {
            return Err(AvocetError::InvalidTableDefinition(
                "cannot create table with no columns".to_string(),
            ));
        }
        if self.column_descriptors.len() > format.max_columns_per_table {
            return Err(AvocetError::InvalidTableDefinition(format!(
                "cannot create table with more than {} columns",
                format.max_columns_per_table
            )));
        }

        let mut column_names = HashSet::new();
        for desc in &self.column_descriptors {
            validate_identifier_name(&desc.name, format.max_column_name_length, "column")?;
            if !column_names.insert(desc.name.to_uppercase()) {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "duplicate column name: {}",
                    desc.name
                )));
            }
        }

        let mut auto_types: HashSet<DataType> = HashSet::new();
        for desc in self.column_descriptors.iter().filter(|c| c.auto_number) {
            if !desc.data_type.may_be_auto_number() {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "column {} of type {} cannot be auto-number",
                    desc.name, desc.data_type
                )));
            }
            if !auto_types.insert(desc.data_type) {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "found multiple auto-number columns of type {}",
                    desc.data_type
                )));
            }
        }

        if !self.index_descriptors.is_empty() {
            if self.index_descriptors.len() > format.max_indexes_per_table {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "cannot create table with more than {} indexes",
                    format.max_indexes_per_table
                )));
            }

            let mut index_names = HashSet::new();
            let mut found_primary = false;
            for index in &self.index_descriptors {
                index.validate(&column_names, &format)?;
                if !index_names.insert(index.name.to_uppercase()) {
                    return Err(AvocetError::InvalidTableDefinition(format!(
                        "duplicate index name: {}",
                        index.name
                    )));
                }
                if index.primary_key {
                    if found_primary {
                        return Err(AvocetError::InvalidTableDefinition(format!(
                            "found second primary key index: {}",
                            index.name
                        )));
                    }
                    found_primary = true;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Database;
    use crate::channel::{ChannelConfig, FilePageChannel};
    use bytes::BytesMut;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::tempdir;

    fn file_database() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = ChannelConfig {
            path: dir.path().join("tables.adb"),
            fsync_enabled: false,
        };
        let channel = Arc::new(FilePageChannel::new(config, JetFormat::V4).unwrap());
        (Database::with_channel(channel, JetFormat::V4), dir)
    }

    fn simple_columns() -> Vec<ColumnDescriptor> {
        vec![
            ColumnDescriptor::new("ID", DataType::Long).auto_number(),
            ColumnDescriptor::new("NAME", DataType::Text),
            ColumnDescriptor::new("SCORE", DataType::Int),
            ColumnDescriptor::new("NOTES", DataType::Memo),
        ]
    }

    /// Channel double that counts epoch calls and fails every page write.
    struct FailingChannel {
        starts: AtomicU32,
        finishes: AtomicU32,
        reserved: AtomicU32,
    }

    impl FailingChannel {
        fn new() -> Self {
            Self {
                starts: AtomicU32::new(0),
                finishes: AtomicU32::new(0),
                reserved: AtomicU32::new(0),
            }
        }
    }

    impl PageChannel for FailingChannel {
        fn page_size(&self) -> usize {
            4096
        }

        fn read_page(&self, buf: &mut [u8], _page_number: u32) -> Result<()> {
            buf.fill(0);
            Ok(())
        }

        fn write_page(&self, _buf: &[u8], _page_number: u32) -> Result<()> {
            Err(AvocetError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )))
        }

        fn reserve_page_number(&self) -> Result<u32> {
            Ok(self.reserved.fetch_add(1, Ordering::SeqCst))
        }

        fn start_write(&self) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn finish_write(&self) -> Result<()> {
            self.finishes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_create_table_registers_catalog_entry() {
        let (mut db, _dir) = file_database();
        let tdef_page = db
            .create_table("people", simple_columns(), Vec::new())
            .unwrap();
        assert_eq!(tdef_page, 0);
        assert_eq!(db.table_definition_page("people"), Some(0));
        assert_eq!(db.table_definition_page("PEOPLE"), Some(0));
    }

    #[test]
    fn test_create_table_writes_pages() {
        let (mut db, _dir) = file_database();
        let indexes = vec![
            IndexDescriptor::new("PrimaryKey")
                .primary_key()
                .with_column("ID", true),
            IndexDescriptor::new("NameIdx").with_column("NAME", true),
        ];
        let tdef_page = db
            .create_table("people", simple_columns(), indexes)
            .unwrap();

        let channel = Arc::clone(db.channel());
        let mut page = BytesMut::zeroed(4096);
        channel.read_page(&mut page, tdef_page).unwrap();
        assert_eq!(page[0], 0x02);
        assert_eq!(page[1], 0x01);

        // usage-map page follows the tdef page
        channel.read_page(&mut page, 1).unwrap();
        assert_eq!(page[0], 0x05);

        // two index root pages were written
        channel.read_page(&mut page, 2).unwrap();
        assert_eq!(page[0], 0x04);
        channel.read_page(&mut page, 3).unwrap();
        assert_eq!(page[0], 0x04);
    }

    #[test]
    fn test_empty_column_list_rejected() {
        let (mut db, _dir) = file_database();
        let result = db.create_table("empty", Vec::new(), Vec::new());
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("no columns")
        ));
    }

    #[test]
    fn test_too_many_columns_rejected() {
        let (mut db, _dir) = file_database();
        let columns: Vec<_> = (0..256)
            .map(|i| ColumnDescriptor::new(&format!("C{}", i), DataType::Int))
            .collect();
        let result = db.create_table("wide", columns, Vec::new());
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("more than 255")
        ));
    }

    #[test]
    fn test_duplicate_column_name_rejected() {
        let (mut db, _dir) = file_database();
        let columns = vec![
            ColumnDescriptor::new("ID", DataType::Long),
            ColumnDescriptor::new("id", DataType::Int),
        ];
        let result = db.create_table("dup", columns, Vec::new());
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("duplicate column")
        ));
    }

    #[test]
    fn test_blank_and_overlong_names_rejected() {
        let (mut db, _dir) = file_database();
        assert!(db
            .create_table("  ", simple_columns(), Vec::new())
            .is_err());
        assert!(db
            .create_table(&"t".repeat(65), simple_columns(), Vec::new())
            .is_err());
    }

    #[test]
    fn test_duplicate_index_name_rejected_case_insensitively() {
        let (mut db, _dir) = file_database();
        let indexes = vec![
            IndexDescriptor::new("idx").with_column("ID", true),
            IndexDescriptor::new("IDX").with_column("NAME", true),
        ];
        let result = db.create_table("people", simple_columns(), indexes);
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("duplicate index name")
        ));
    }

    #[test]
    fn test_second_primary_key_rejected() {
        let (mut db, _dir) = file_database();
        let indexes = vec![
            IndexDescriptor::new("pk1").primary_key().with_column("ID", true),
            IndexDescriptor::new("pk2").primary_key().with_column("NAME", true),
        ];
        let result = db.create_table("people", simple_columns(), indexes);
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("second primary key")
        ));
    }

    #[test]
    fn test_too_many_indexes_rejected() {
        let (mut db, _dir) = file_database();
        let indexes: Vec<_> = (0..33)
            .map(|i| IndexDescriptor::new(&format!("idx{}", i)).with_column("ID", true))
            .collect();
        let result = db.create_table("people", simple_columns(), indexes);
        assert!(matches!(
            result,
            Err(AvocetError::InvalidTableDefinition(ref msg)) if msg.contains("more than 32")
        ));
    }

    #[test]
    fn test_auto_number_validation() {
        let (mut db, _dir) = file_database();

        // an Int column cannot be auto-number
        let columns = vec![ColumnDescriptor::new("ID", DataType::Int).auto_number()];
        assert!(db.create_table("t1", columns, Vec::new()).is_err());

        // two auto-number columns of the same type are rejected
        let columns = vec![
            ColumnDescriptor::new("A", DataType::Long).auto_number(),
            ColumnDescriptor::new("B", DataType::Long).auto_number(),
        ];
        assert!(db.create_table("t2", columns, Vec::new()).is_err());

        // differing auto-number types may coexist
        let columns = vec![
            ColumnDescriptor::new("A", DataType::Long).auto_number(),
            ColumnDescriptor::new("B", DataType::Guid).auto_number(),
        ];
        assert!(db.create_table("t3", columns, Vec::new()).is_ok());
    }

    #[test]
    fn test_validation_failure_reserves_no_pages() {
        let channel = Arc::new(FailingChannel::new());
        let mut db = Database::with_channel(
            Arc::clone(&channel) as Arc<dyn PageChannel>,
            JetFormat::V4,
        );

        let indexes = vec![
            IndexDescriptor::new("idx").with_column("ID", true),
            IndexDescriptor::new("IDX").with_column("ID", true),
        ];
        let columns = vec![ColumnDescriptor::new("ID", DataType::Long)];
        assert!(db.create_table("people", columns, indexes).is_err());

        assert_eq!(channel.reserved.load(Ordering::SeqCst), 0);
        assert_eq!(channel.starts.load(Ordering::SeqCst), 0);
        assert_eq!(channel.finishes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_storage_failure_still_finishes_epoch() {
        let channel = Arc::new(FailingChannel::new());
        let mut db = Database::with_channel(
            Arc::clone(&channel) as Arc<dyn PageChannel>,
            JetFormat::V4,
        );

        let columns = vec![ColumnDescriptor::new("ID", DataType::Long)];
        let result = db.create_table("people", columns, Vec::new());
        assert!(matches!(result, Err(AvocetError::Io(_))));

        assert_eq!(channel.starts.load(Ordering::SeqCst), 1);
        assert_eq!(channel.finishes.load(Ordering::SeqCst), 1);
        // the failure happened after page reservation
        assert!(channel.reserved.load(Ordering::SeqCst) >= 2);
        // nothing was registered in the catalog
        assert_eq!(db.table_definition_page("people"), None);
    }

    #[test]
    fn test_count_non_long_variable_length() {
        let (mut db, _dir) = file_database();
        let creator = TableCreator::new(&mut db, "people", simple_columns(), Vec::new());
        // NAME is variable but not long value; NOTES is long value
        assert_eq!(creator.count_non_long_variable_length(), 1);
    }

    #[test]
    fn test_long_value_columns_get_states() {
        let (mut db, _dir) = file_database();
        db.create_table("people", simple_columns(), Vec::new())
            .unwrap();
        // verified indirectly: creation succeeds with a Memo column and
        // the definition page accounts for it
        let channel = Arc::clone(db.channel());
        let mut page = BytesMut::zeroed(4096);
        channel.read_page(&mut page, 0).unwrap();
        // column count 4 at offset 12
        assert_eq!(u16::from_le_bytes([page[12], page[13]]), 4);
        // one non-long variable-length column at offset 14
        assert_eq!(u16::from_le_bytes([page[14], page[15]]), 1);
    }
}
