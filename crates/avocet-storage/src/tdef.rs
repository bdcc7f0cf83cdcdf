//! Table-definition page assembly.

use crate::channel::PageChannel;
use crate::index::{Index, COLUMN_UNUSED, MAX_INDEX_COLUMNS, ORDER_ASCENDING, ORDER_DESCENDING};
use crate::table::TableCreator;
use avocet_common::{AvocetError, Result};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;

/// Page type byte of a table-definition page.
pub(crate) const PAGE_TYPE_TDEF: u8 = 0x02;

/// Page type byte of a usage-map page.
pub(crate) const PAGE_TYPE_USAGE_MAP: u8 = 0x05;

const COLUMN_FLAG_VARIABLE: u8 = 0x01;
const COLUMN_FLAG_AUTO_NUMBER: u8 = 0x02;
const COLUMN_FLAG_LONG_VALUE: u8 = 0x04;

const INDEX_FLAG_PRIMARY_KEY: u8 = 0x01;

/// Writes a blank usage-map page.
pub(crate) fn write_usage_map_page(channel: &dyn PageChannel, page_number: u32) -> Result<()> {
    let mut buf = channel.create_page_buffer();
    buf[0] = PAGE_TYPE_USAGE_MAP;
    buf[1] = 0x01;
    channel.write_page(&buf, page_number)
}

/// Writes the table-definition page for a table being created, together
/// with the empty root page of every index.
///
/// The per-index area (ten key-column slots through the ten trailing
/// bytes) is laid out exactly as `Index::read` consumes it.
pub(crate) fn write_table_definition(creator: &mut TableCreator<'_>) -> Result<()> {
    let format = *creator.format();
    let channel = Arc::clone(creator.channel());
    let tdef_page = creator.tdef_page_number();
    let umap_page = creator.umap_page_number();

    // index root pages and usage-map rows
    let index_count = creator.index_descriptors().len();
    for i in 0..index_count {
        let root = channel.reserve_page_number()?;
        let state = &mut creator.index_states_mut()[i];
        state.set_root_page_number(root);
        state.set_umap_page_number(umap_page);
        state.set_umap_row_number(i as u8);
    }

    // long-value column rows follow the index rows
    let mut next_umap_row = index_count as u8;
    for state in creator.column_states_mut() {
        state.set_umap_page_number(umap_page);
        state.set_umap_owned_row_number(next_umap_row);
        state.set_umap_free_row_number(next_umap_row + 1);
        next_umap_row += 2;
    }

    // build each runtime index and write its empty page
    let mut indexes = Vec::with_capacity(index_count);
    for i in 0..index_count {
        let descriptor = creator.index_descriptors()[i].clone();
        let state = creator.index_states()[i];
        let mut index = Index::new(tdef_page, Arc::clone(&channel), format);
        index.set_index_number(state.index_number());
        index.set_name(&descriptor.name);
        index.set_primary_key(descriptor.primary_key);
        for key in &descriptor.columns {
            let column = creator.find_column(&key.name)?;
            let order = if key.ascending {
                ORDER_ASCENDING
            } else {
                ORDER_DESCENDING
            };
            index.push_column(column, order)?;
        }
        index.set_page_number(state.root_page_number());
        index.update()?;
        indexes.push(index);
    }

    // assemble the definition page
    let mut buf = BytesMut::with_capacity(format.page_size);
    buf.put_u8(PAGE_TYPE_TDEF);
    buf.put_u8(0x01);
    buf.put_u16_le(0); // free space, patched below
    buf.put_u32_le(0); // next tdef page
    buf.put_u32_le(umap_page);
    buf.put_u16_le(creator.columns().len() as u16);
    buf.put_u16_le(creator.count_non_long_variable_length());
    buf.put_u16_le(creator.index_count() as u16);
    buf.put_u16_le(creator.logical_index_count() as u16);

    for column in creator.columns() {
        buf.put_u16_le(column.column_number());
        buf.put_u8(column.data_type() as u8);
        let mut flags = 0u8;
        if column.is_variable_length() {
            flags |= COLUMN_FLAG_VARIABLE;
        }
        if column.is_auto_number() {
            flags |= COLUMN_FLAG_AUTO_NUMBER;
        }
        if column.is_long_value() {
            flags |= COLUMN_FLAG_LONG_VALUE;
        }
        buf.put_u8(flags);
        buf.put_u16_le(column.fixed_size().unwrap_or(0) as u16);
        put_name(&mut buf, column.name())?;
    }

    for (i, index) in indexes.iter().enumerate() {
        for slot in 0..MAX_INDEX_COLUMNS {
            match index.columns().get(slot) {
                Some(key) => {
                    buf.put_u16_le(key.column.column_number());
                    buf.put_u8(key.order);
                }
                None => {
                    buf.put_u16_le(COLUMN_UNUSED);
                    buf.put_u8(0);
                }
            }
        }
        let state = creator.index_states()[i];
        buf.put_u32_le(0); // unknown
        buf.put_u32_le(state.root_page_number());
        buf.put_u32_le(state.umap_page_number());
        buf.put_u8(state.umap_row_number());
        buf.put_u8(if index.is_primary_key() {
            INDEX_FLAG_PRIMARY_KEY
        } else {
            0
        });
        buf.put_slice(&[0u8; 4]);
        put_name(&mut buf, index.name())?;
    }

    put_name(&mut buf, creator.name())?;

    // usage-map rows owned by the long-value columns
    for (slot, position) in creator.long_value_columns().iter().enumerate() {
        let column = &creator.columns()[*position];
        let state = creator.column_states()[slot];
        buf.put_u16_le(column.column_number());
        buf.put_u8(state.umap_owned_row_number());
        buf.put_u8(state.umap_free_row_number());
    }

    if buf.len() > format.page_size {
        return Err(AvocetError::FormatViolation(
            "table definition exceeds one page".to_string(),
        ));
    }
    let free_space = (format.page_size - buf.len()) as u16;
    buf[2..4].copy_from_slice(&free_space.to_le_bytes());
    buf.resize(format.page_size, 0);
    channel.write_page(&buf, tdef_page)
}

fn put_name(buf: &mut BytesMut, name: &str) -> Result<()> {
    let bytes = name.as_bytes();
    if bytes.len() > u8::MAX as usize {
        return Err(AvocetError::FormatViolation(format!(
            "name too long: {}",
            name
        )));
    }
    buf.put_u8(bytes.len() as u8);
    buf.put_slice(bytes);
    Ok(())
}
