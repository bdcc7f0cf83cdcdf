//! On-disk secondary indexes.
//!
//! An index owns the sorted entries of a single index page and knows how
//! to parse them from, and serialize them back to, the page's entry-length
//! mask layout.

pub mod codec;
mod entry;

pub use entry::{Entry, EntryColumn, FixedEntryColumn, TextEntryColumn};

use crate::catalog::validate_identifier_name;
use crate::channel::{PageChannel, INVALID_PAGE_NUMBER};
use crate::column::Column;
use avocet_common::{AvocetError, JetFormat, Result, Value};
use bytes::{Buf, BufMut, BytesMut};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

/// Maximum number of key columns in one index.
pub const MAX_INDEX_COLUMNS: usize = 10;

/// Sentinel column number marking an unused key-column slot.
pub const COLUMN_UNUSED: u16 = 0xFFFF;

/// Order byte for an ascending key column.
pub const ORDER_ASCENDING: u8 = 1;

/// Order byte for a descending key column.
pub const ORDER_DESCENDING: u8 = 0;

/// Page type byte of an index page.
const PAGE_TYPE_INDEX: u8 = 0x04;

/// A key column of an index: the column plus its order byte.
#[derive(Debug, Clone)]
pub struct IndexColumn {
    /// The indexed column (non-owning view of the table's definition).
    pub column: Arc<Column>,
    /// Order byte (1 ascending, 0 descending).
    pub order: u8,
}

/// A proposed index, as supplied to the table creator.
#[derive(Debug, Clone)]
pub struct IndexKeyColumn {
    /// Name of the indexed column.
    pub name: String,
    /// Whether the column sorts ascending.
    pub ascending: bool,
}

/// Descriptor for an index to create.
#[derive(Debug, Clone)]
pub struct IndexDescriptor {
    /// Index name.
    pub name: String,
    /// Whether this index is the table's primary key.
    pub primary_key: bool,
    /// Ordered key columns.
    pub columns: Vec<IndexKeyColumn>,
}

impl IndexDescriptor {
    /// Creates a descriptor with no columns.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            primary_key: false,
            columns: Vec::new(),
        }
    }

    /// Marks this index as the primary key.
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Appends a key column.
    pub fn with_column(mut self, name: &str, ascending: bool) -> Self {
        self.columns.push(IndexKeyColumn {
            name: name.to_string(),
            ascending,
        });
        self
    }

    /// Validates this descriptor against the table's column names (given
    /// uppercased) and the format limits.
    pub fn validate(&self, column_names: &HashSet<String>, format: &JetFormat) -> Result<()> {
        validate_identifier_name(&self.name, format.max_index_name_length, "index")?;
        if self.columns.is_empty() {
            return Err(AvocetError::InvalidTableDefinition(format!(
                "index {} has no columns",
                self.name
            )));
        }
        if self.columns.len() > MAX_INDEX_COLUMNS {
            return Err(AvocetError::InvalidTableDefinition(format!(
                "index {} references more than {} columns",
                self.name, MAX_INDEX_COLUMNS
            )));
        }
        let mut seen = HashSet::new();
        for key in &self.columns {
            let upper = key.name.to_uppercase();
            if !column_names.contains(&upper) {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "index {} references unknown column {}",
                    self.name, key.name
                )));
            }
            if !seen.insert(upper) {
                return Err(AvocetError::InvalidTableDefinition(format!(
                    "index {} repeats column {}",
                    self.name, key.name
                )));
            }
        }
        Ok(())
    }
}

/// A table index backed by one index page.
pub struct Index {
    /// Page number of the index data.
    page_number: u32,
    parent_page_number: u32,
    /// Number of rows in the index.
    row_count: u32,
    format: JetFormat,
    channel: Arc<dyn PageChannel>,
    /// Key columns in declaration order.
    columns: Vec<IndexColumn>,
    /// Entries kept totally ordered by the entry comparator.
    entries: Vec<Entry>,
    /// Zero-based index number.
    index_number: u32,
    name: String,
    primary_key: bool,
}

impl Index {
    /// Creates an index attached to its parent table-definition page.
    pub fn new(parent_page_number: u32, channel: Arc<dyn PageChannel>, format: JetFormat) -> Self {
        Self {
            page_number: INVALID_PAGE_NUMBER,
            parent_page_number,
            row_count: 0,
            format,
            channel,
            columns: Vec::new(),
            entries: Vec::new(),
            index_number: 0,
            name: String::new(),
            primary_key: false,
        }
    }

    pub fn page_number(&self) -> u32 {
        self.page_number
    }

    pub fn set_page_number(&mut self, page_number: u32) {
        self.page_number = page_number;
    }

    pub fn parent_page_number(&self) -> u32 {
        self.parent_page_number
    }

    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    pub fn set_row_count(&mut self, row_count: u32) {
        self.row_count = row_count;
    }

    pub fn index_number(&self) -> u32 {
        self.index_number
    }

    pub fn set_index_number(&mut self, index_number: u32) {
        self.index_number = index_number;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn set_primary_key(&mut self, primary_key: bool) {
        self.primary_key = primary_key;
    }

    /// The key columns of this index (read-only view).
    pub fn columns(&self) -> &[IndexColumn] {
        &self.columns
    }

    /// The entries of this index, in sorted order (read-only view).
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Appends a key column. The column must be indexable and the index
    /// must not exceed [`MAX_INDEX_COLUMNS`].
    pub fn push_column(&mut self, column: Arc<Column>, order: u8) -> Result<()> {
        codec::check_index_column(&column)?;
        if self.columns.len() >= MAX_INDEX_COLUMNS {
            return Err(AvocetError::FormatViolation(format!(
                "index uses more than {} columns",
                MAX_INDEX_COLUMNS
            )));
        }
        self.columns.push(IndexColumn { column, order });
        Ok(())
    }

    /// Reads this index from its table-definition area, then parses its
    /// index page through the channel.
    ///
    /// The cursor must sit at the start of the ten key-column slots;
    /// `available_columns` is the table's column list ordered by column
    /// number.
    pub fn read(&mut self, tdef: &mut &[u8], available_columns: &[Arc<Column>]) -> Result<()> {
        if tdef.remaining() < MAX_INDEX_COLUMNS * 3 + 18 {
            return Err(AvocetError::FormatViolation(
                "truncated index metadata".to_string(),
            ));
        }
        for _ in 0..MAX_INDEX_COLUMNS {
            let column_number = tdef.get_u16_le();
            let order = tdef.get_u8();
            if column_number != COLUMN_UNUSED {
                let column = available_columns.get(column_number as usize).ok_or_else(|| {
                    AvocetError::FormatViolation(format!(
                        "index slot references column {}",
                        column_number
                    ))
                })?;
                self.columns.push(IndexColumn {
                    column: Arc::clone(column),
                    order,
                });
            }
        }
        tdef.advance(4); // unknown
        self.page_number = tdef.get_u32_le();
        tdef.advance(10);

        let mut page = self.channel.create_page_buffer();
        self.channel.read_page(&mut page, self.page_number)?;

        let mask_start = self.format.offset_index_entry_mask;
        let mask_end = mask_start + self.format.size_index_entry_mask;
        if page.len() < mask_end {
            return Err(AvocetError::FormatViolation(
                "index page smaller than its entry mask".to_string(),
            ));
        }

        let mask = &page[mask_start..mask_end];
        let mut entry_data: &[u8] = &page[mask_end..];
        let mut last_start = 0usize;
        let mut next_entry_index = 0usize;
        for (i, mask_byte) in mask.iter().enumerate() {
            for j in 0..8 {
                if mask_byte & (1 << j) != 0 {
                    let length = i * 8 + j - last_start;
                    let entry = Entry::from_buf(&mut entry_data, &self.columns, next_entry_index)?;
                    next_entry_index += 1;
                    self.insert_entry(entry)?;
                    last_start += length;
                }
            }
        }
        self.row_count = self.entries.len() as u32;
        Ok(())
    }

    /// Serializes this index to a full page buffer.
    pub fn write(&self) -> Result<BytesMut> {
        let mut buf = BytesMut::with_capacity(self.format.page_size);
        buf.put_u8(PAGE_TYPE_INDEX);
        buf.put_u8(0x01); // unknown
        buf.put_u16_le(0); // free space, patched below
        buf.put_u32_le(self.parent_page_number);
        buf.put_u32_le(0); // prev page
        buf.put_u32_le(0); // next page
        buf.put_u32_le(0); // leaf page
        buf.put_u32_le(0); // unknown
        buf.put_u8(0);
        buf.put_u8(0);
        buf.put_u8(0);
        if buf.len() > self.format.offset_index_entry_mask {
            return Err(AvocetError::FormatViolation(format!(
                "index page header does not fit before the entry mask of format {}",
                self.format.version
            )));
        }
        buf.resize(self.format.offset_index_entry_mask, 0);

        let mut mask = vec![0u8; self.format.size_index_entry_mask];
        let mut total_size = 0usize;
        for entry in &self.entries {
            total_size += entry.size();
            let idx = total_size / 8;
            if idx >= mask.len() {
                return Err(AvocetError::PageFull);
            }
            mask[idx] |= 1 << (total_size % 8);
        }
        buf.put_slice(&mask);

        for entry in &self.entries {
            entry.write(&mut buf)?;
        }
        if buf.len() > self.format.page_size {
            return Err(AvocetError::PageFull);
        }

        let free_space = (self.format.page_size - buf.len()) as u16;
        buf[2..4].copy_from_slice(&free_space.to_le_bytes());
        buf.resize(self.format.page_size, 0);
        Ok(buf)
    }

    /// Adds a row to this index. `values` is indexed by column number.
    pub fn add_row(&mut self, values: &[Option<Value>], page_number: u32, row_number: u8) -> Result<()> {
        let entry = Entry::from_values(values, page_number, row_number, &self.columns)?;
        if self.insert_entry(entry)? {
            self.row_count += 1;
        }
        Ok(())
    }

    /// Serializes this index and writes it back to its page.
    pub fn update(&self) -> Result<()> {
        if self.page_number == INVALID_PAGE_NUMBER {
            return Err(AvocetError::FormatViolation(
                "index page number not assigned".to_string(),
            ));
        }
        let buf = self.write()?;
        self.channel.write_page(&buf, self.page_number)
    }

    /// Ordered insert; an entry equal to an existing one is dropped.
    fn insert_entry(&mut self, entry: Entry) -> Result<bool> {
        let mut lo = 0;
        let mut hi = self.entries.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            match entry.try_cmp(&self.entries[mid])? {
                Ordering::Less => hi = mid,
                Ordering::Greater => lo = mid + 1,
                Ordering::Equal => return Ok(false),
            }
        }
        self.entries.insert(lo, entry);
        Ok(true)
    }
}
