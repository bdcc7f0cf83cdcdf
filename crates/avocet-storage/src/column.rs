//! Column definitions.

use avocet_common::DataType;

/// A column of a table, as the index engine and table creator see it.
///
/// Column numbers are zero-based and assigned by the table creator in
/// declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    data_type: DataType,
    column_number: u16,
    auto_number: bool,
}

impl Column {
    /// Creates a column definition.
    pub fn new(name: &str, data_type: DataType, column_number: u16, auto_number: bool) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            column_number,
            auto_number,
        }
    }

    /// Column name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column data type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Zero-based column number.
    pub fn column_number(&self) -> u16 {
        self.column_number
    }

    /// Returns true if this column is an auto-number column.
    pub fn is_auto_number(&self) -> bool {
        self.auto_number
    }

    /// Fixed byte size of values, or None for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        self.data_type.fixed_size()
    }

    /// Returns true if values of this column have no fixed size.
    pub fn is_variable_length(&self) -> bool {
        self.data_type.is_variable_length()
    }

    /// Returns true if values are stored out-of-row on long-value pages.
    pub fn is_long_value(&self) -> bool {
        self.data_type.is_long_value()
    }

    /// Returns true if this column holds character data.
    pub fn is_textual(&self) -> bool {
        self.data_type.is_textual()
    }
}

/// A proposed column, as supplied to the table creator.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    /// Column name.
    pub name: String,
    /// Column data type.
    pub data_type: DataType,
    /// Whether the column is an auto-number column.
    pub auto_number: bool,
}

impl ColumnDescriptor {
    /// Creates a descriptor for a regular column.
    pub fn new(name: &str, data_type: DataType) -> Self {
        Self {
            name: name.to_string(),
            data_type,
            auto_number: false,
        }
    }

    /// Marks this column as an auto-number column.
    pub fn auto_number(mut self) -> Self {
        self.auto_number = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_accessors() {
        let col = Column::new("NAME", DataType::Text, 3, false);
        assert_eq!(col.name(), "NAME");
        assert_eq!(col.data_type(), DataType::Text);
        assert_eq!(col.column_number(), 3);
        assert!(!col.is_auto_number());
        assert!(col.is_variable_length());
        assert!(col.is_textual());
        assert!(!col.is_long_value());
        assert_eq!(col.fixed_size(), None);
    }

    #[test]
    fn test_fixed_column() {
        let col = Column::new("ID", DataType::Long, 0, true);
        assert!(col.is_auto_number());
        assert!(!col.is_variable_length());
        assert_eq!(col.fixed_size(), Some(8));
    }

    #[test]
    fn test_long_value_column() {
        let col = Column::new("NOTES", DataType::Memo, 1, false);
        assert!(col.is_long_value());
        assert!(col.is_textual());
    }

    #[test]
    fn test_descriptor_builder() {
        let desc = ColumnDescriptor::new("ID", DataType::Long).auto_number();
        assert_eq!(desc.name, "ID");
        assert_eq!(desc.data_type, DataType::Long);
        assert!(desc.auto_number);

        let plain = ColumnDescriptor::new("SCORE", DataType::Int);
        assert!(!plain.auto_number);
    }
}
