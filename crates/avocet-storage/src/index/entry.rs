//! Index entries and their per-column coded values.

use super::codec;
use super::IndexColumn;
use crate::column::Column;
use avocet_common::{AvocetError, Result, Value};
use bytes::{Buf, BufMut, BytesMut};
use std::cmp::Ordering;
use std::sync::Arc;

/// Presence flag emitted before every non-null entry column value.
const VALUE_PRESENT: u8 = 0x7F;

/// Terminator byte ending a coded text value.
const TEXT_TERMINATOR: u8 = 1;

/// One entry in an index: a row pointer plus the coded key-column values.
///
/// Entries are immutable once built. The `page` field is stored on the
/// wire as a 3-byte big-endian integer followed by the row byte.
#[derive(Debug, Clone)]
pub struct Entry {
    page: u32,
    row: u8,
    columns: Vec<EntryColumn>,
}

impl Entry {
    /// Builds an entry from row values, taking one value per key column
    /// in the index's column order. `values` is indexed by column number.
    pub fn from_values(
        values: &[Option<Value>],
        page: u32,
        row: u8,
        key_columns: &[IndexColumn],
    ) -> Result<Entry> {
        let mut columns = Vec::with_capacity(key_columns.len());
        for key in key_columns {
            let value = values
                .get(key.column.column_number() as usize)
                .cloned()
                .flatten();
            columns.push(EntryColumn::from_value(Arc::clone(&key.column), value)?);
        }
        Ok(Entry { page, row, columns })
    }

    /// Reads an entry from a buffer: one coded value per key column, then
    /// the 3-byte page and the row byte. `entry_index` records the
    /// position of this entry on its page.
    pub fn from_buf(
        buf: &mut &[u8],
        key_columns: &[IndexColumn],
        entry_index: usize,
    ) -> Result<Entry> {
        let mut columns = Vec::with_capacity(key_columns.len());
        for key in key_columns {
            columns.push(EntryColumn::from_buf(
                Arc::clone(&key.column),
                buf,
                entry_index,
            )?);
        }
        if buf.remaining() < 4 {
            return Err(AvocetError::FormatViolation(
                "truncated index entry row pointer".to_string(),
            ));
        }
        let page =
            ((buf.get_u8() as u32) << 16) | ((buf.get_u8() as u32) << 8) | (buf.get_u8() as u32);
        let row = buf.get_u8();
        Ok(Entry { page, row, columns })
    }

    /// Page number the row lives on.
    pub fn page(&self) -> u32 {
        self.page
    }

    /// Row number within the page.
    pub fn row(&self) -> u8 {
        self.row
    }

    /// The coded key-column values.
    pub fn columns(&self) -> &[EntryColumn] {
        &self.columns
    }

    /// Byte size this entry accounts for in the entry-length mask.
    pub fn size(&self) -> usize {
        5 + self.columns.iter().map(EntryColumn::size).sum::<usize>()
    }

    /// Writes this entry into a buffer.
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        for column in &self.columns {
            column.write(buf)?;
        }
        buf.put_u8((self.page >> 16) as u8);
        buf.put_u8((self.page >> 8) as u8);
        buf.put_u8(self.page as u8);
        buf.put_u8(self.row);
        Ok(())
    }

    /// Compares two entries: lexicographically over their entry columns,
    /// then by `(page, row)`. Fails when the entries have different
    /// column arities.
    pub fn try_cmp(&self, other: &Entry) -> Result<Ordering> {
        if self.columns.len() != other.columns.len() {
            return Err(AvocetError::IncompatibleEntryShape {
                left: self.columns.len(),
                right: other.columns.len(),
            });
        }
        for (mine, theirs) in self.columns.iter().zip(&other.columns) {
            match mine.try_cmp(theirs)? {
                Ordering::Equal => continue,
                unequal => return Ok(unequal),
            }
        }
        Ok(self
            .page
            .cmp(&other.page)
            .then(self.row.cmp(&other.row)))
    }
}

/// A single coded column value within an entry.
#[derive(Debug, Clone)]
pub enum EntryColumn {
    Fixed(FixedEntryColumn),
    Text(TextEntryColumn),
}

impl EntryColumn {
    /// Builds the coded form of a new row value, dispatching on the
    /// column type.
    pub fn from_value(column: Arc<Column>, value: Option<Value>) -> Result<EntryColumn> {
        codec::check_index_column(&column)?;
        if column.is_textual() {
            let text = match value {
                None => None,
                Some(Value::Text(s)) => Some(s),
                Some(other) => {
                    return Err(AvocetError::TypeMismatch {
                        expected: column.data_type().to_string(),
                        actual: other.type_name().to_string(),
                    })
                }
            };
            Ok(EntryColumn::Text(TextEntryColumn::from_value(column, text)))
        } else {
            if let Some(v) = &value {
                if !v.matches_type(column.data_type()) {
                    return Err(AvocetError::TypeMismatch {
                        expected: column.data_type().to_string(),
                        actual: v.type_name().to_string(),
                    });
                }
            }
            Ok(EntryColumn::Fixed(FixedEntryColumn { column, value }))
        }
    }

    /// Reads the coded form from a buffer.
    pub fn from_buf(column: Arc<Column>, buf: &mut &[u8], entry_index: usize) -> Result<EntryColumn> {
        codec::check_index_column(&column)?;
        if column.is_textual() {
            Ok(EntryColumn::Text(TextEntryColumn::from_buf(
                column,
                buf,
                entry_index,
            )?))
        } else {
            Ok(EntryColumn::Fixed(FixedEntryColumn::from_buf(column, buf)?))
        }
    }

    /// Byte size this value accounts for in the entry-length mask; zero
    /// iff the value is absent.
    pub fn size(&self) -> usize {
        match self {
            EntryColumn::Fixed(c) => c.size(),
            EntryColumn::Text(c) => c.size(),
        }
    }

    /// Writes the coded form into a buffer. Absent values write nothing.
    pub fn write(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            EntryColumn::Fixed(c) => c.write(buf),
            EntryColumn::Text(c) => c.write(buf),
        }
    }

    /// Compares two coded values of the same kind.
    pub fn try_cmp(&self, other: &EntryColumn) -> Result<Ordering> {
        match (self, other) {
            (EntryColumn::Fixed(a), EntryColumn::Fixed(b)) => Ok(a.cmp(b)),
            (EntryColumn::Text(a), EntryColumn::Text(b)) => Ok(a.cmp(b)),
            _ => Err(AvocetError::FormatViolation(
                "cannot compare fixed and textual entry columns".to_string(),
            )),
        }
    }
}

/// Coded form of a fixed-size column value.
#[derive(Debug, Clone)]
pub struct FixedEntryColumn {
    column: Arc<Column>,
    value: Option<Value>,
}

impl FixedEntryColumn {
    fn from_buf(column: Arc<Column>, buf: &mut &[u8]) -> Result<FixedEntryColumn> {
        if buf.remaining() < 1 {
            return Err(AvocetError::FormatViolation(
                "truncated fixed entry column".to_string(),
            ));
        }
        let flag = buf.get_u8();
        let value = if flag != 0 {
            let size = column
                .fixed_size()
                .ok_or(AvocetError::UnsupportedIndexColumnType(column.data_type()))?;
            if buf.remaining() < size {
                return Err(AvocetError::FormatViolation(
                    "truncated fixed entry column value".to_string(),
                ));
            }
            let value = codec::read_fixed_value(column.data_type(), &buf[..size])?;
            buf.advance(size);
            Some(codec::apply_integer_bias(column.data_type(), value))
        } else {
            None
        };
        Ok(FixedEntryColumn { column, value })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let Some(value) = &self.value else {
            return Ok(());
        };
        buf.put_u8(VALUE_PRESENT);
        let wire = codec::remove_integer_bias(self.column.data_type(), value.clone());
        codec::write_fixed_value(self.column.data_type(), &wire, buf)
    }

    fn non_null_size(&self) -> usize {
        self.column.fixed_size().unwrap_or(0)
    }

    fn size(&self) -> usize {
        if self.value.is_none() {
            0
        } else {
            self.non_null_size()
        }
    }

    fn cmp(&self, other: &FixedEntryColumn) -> Ordering {
        // absent sorts before any present value
        match (&self.value, &other.value) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }

    /// The stored comparable value, if present.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// The column this value belongs to.
    pub fn column(&self) -> &Column {
        &self.column
    }
}

/// Coded form of a textual column value.
#[derive(Debug, Clone)]
pub struct TextEntryColumn {
    column: Arc<Column>,
    /// The index form of the value (uppercased, '.' removed).
    value: Option<String>,
    /// Undocumented trailing bytes, preserved bit-exactly on rewrite.
    extra_bytes: Option<Vec<u8>>,
    /// Position of this value on its page when read from disk.
    orig_index: Option<usize>,
    /// Cached actual form; regenerated from the index form when absent.
    actual: Option<String>,
}

impl TextEntryColumn {
    fn from_value(column: Arc<Column>, raw: Option<String>) -> TextEntryColumn {
        match raw {
            None => TextEntryColumn {
                column,
                value: None,
                extra_bytes: None,
                orig_index: None,
                actual: None,
            },
            Some(s) => {
                let actual = codec::actual_text_form(&s);
                let value = codec::index_text_form(&s);
                TextEntryColumn {
                    column,
                    value: Some(value),
                    extra_bytes: None,
                    orig_index: None,
                    actual: Some(actual),
                }
            }
        }
    }

    fn from_buf(column: Arc<Column>, buf: &mut &[u8], entry_index: usize) -> Result<TextEntryColumn> {
        if buf.remaining() < 1 {
            return Err(AvocetError::FormatViolation(
                "truncated text entry column".to_string(),
            ));
        }
        let flag = buf.get_u8();
        if flag == 0 {
            return Ok(TextEntryColumn {
                column,
                value: None,
                extra_bytes: None,
                orig_index: Some(entry_index),
                actual: None,
            });
        }

        let mut value = String::new();
        loop {
            if buf.remaining() == 0 {
                return Err(AvocetError::FormatViolation(
                    "unterminated text entry value".to_string(),
                ));
            }
            let mut b = buf.get_u8();
            if b == TEXT_TERMINATOR {
                break;
            }
            if b == codec::CODE_PREFIX {
                if buf.remaining() == 0 {
                    return Err(AvocetError::FormatViolation(
                        "dangling code prefix in text entry value".to_string(),
                    ));
                }
                b = buf.get_u8();
            }
            // unknown codes are dropped, matching the legacy reader
            if let Some(c) = codec::char_for_code(b) {
                value.push(c);
            }
        }

        if buf.remaining() == 0 {
            return Err(AvocetError::FormatViolation(
                "missing text entry trailer".to_string(),
            ));
        }
        let end_byte = buf.get_u8();
        let extra_bytes = if end_byte != 0 {
            let mut extra = vec![end_byte];
            loop {
                if buf.remaining() == 0 {
                    return Err(AvocetError::FormatViolation(
                        "unterminated text entry extra bytes".to_string(),
                    ));
                }
                let b = buf.get_u8();
                if b == 0 {
                    break;
                }
                extra.push(b);
            }
            Some(extra)
        } else {
            None
        };

        Ok(TextEntryColumn {
            column,
            value: Some(value),
            extra_bytes,
            orig_index: Some(entry_index),
            actual: None,
        })
    }

    fn write(&self, buf: &mut BytesMut) -> Result<()> {
        let Some(value) = &self.value else {
            return Ok(());
        };
        buf.put_u8(VALUE_PRESENT);
        for c in value.chars() {
            let code = codec::code_for_char(c).ok_or(AvocetError::UnmappedIndexCharacter(c))?;
            if codec::is_prefixed_code(code) {
                buf.put_u8(codec::CODE_PREFIX);
            }
            buf.put_u8(code);
            // the lone "_" string carries an extra trailing 3 on the wire
            if value == "_" {
                buf.put_u8(3);
            }
        }
        buf.put_u8(TEXT_TERMINATOR);
        if let Some(extra) = &self.extra_bytes {
            buf.put_slice(extra);
        }
        buf.put_u8(0);
        Ok(())
    }

    fn non_null_size(&self) -> usize {
        let Some(value) = &self.value else {
            return 0;
        };
        let mut size = 3 + value.chars().count();
        size += value
            .chars()
            .filter(|c| matches!(c, '^' | '_' | '{' | '|' | '}' | '~'))
            .count();
        if let Some(extra) = &self.extra_bytes {
            size += extra.len();
        }
        size
    }

    fn size(&self) -> usize {
        if self.value.is_none() {
            0
        } else {
            self.non_null_size()
        }
    }

    /// The actual (uppercased) form, falling back to the index form for
    /// values read from disk or whose cache was dropped.
    pub fn actual_value(&self) -> Option<&str> {
        self.actual.as_deref().or(self.value.as_deref())
    }

    fn cmp(&self, other: &TextEntryColumn) -> Ordering {
        // values read from the same page keep their on-disk order
        if let (Some(a), Some(b)) = (self.orig_index, other.orig_index) {
            return a.cmp(&b);
        }
        // new values order by their index form, matching the coded
        // byte order the host computes ('.'-stripped, uppercased)
        match (self.value.as_deref(), other.value.as_deref()) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        }
    }

    /// The index form of the value, if present.
    pub fn index_value(&self) -> Option<&str> {
        self.value.as_deref()
    }

    /// Trailing bytes preserved verbatim from the source page.
    pub fn extra_bytes(&self) -> Option<&[u8]> {
        self.extra_bytes.as_deref()
    }

    /// On-disk position of this value, if read from a page.
    pub fn orig_index(&self) -> Option<usize> {
        self.orig_index
    }

    /// The column this value belongs to.
    pub fn column(&self) -> &Column {
        &self.column
    }
}
