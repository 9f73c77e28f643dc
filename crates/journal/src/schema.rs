//! Column layout of a journal.
//!
//! The first column is always the designated timestamp. Each column owns one
//! data file per partition; symbol columns additionally own a posting index in
//! every partition and a dictionary file at the journal root.
//!
//! File indexes inside a partition are the column indexes, followed by one
//! index file per symbol column in column order.

use crate::error::{JournalError, Result};
use crate::Timestamp;

/// Physical type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Designated timestamp (i64 nanoseconds).
    Timestamp,
    /// 64-bit signed integer.
    Long,
    /// 64-bit float.
    Double,
    /// Dictionary-encoded string.
    Symbol,
}

impl ColumnKind {
    /// Width of one cell in the column's data file.
    pub fn width(self) -> u64 {
        match self {
            Self::Symbol => 4,
            Self::Timestamp | Self::Long | Self::Double => 8,
        }
    }
}

/// One column of the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    /// Column name, also the stem of its files.
    pub name: String,
    /// Physical type.
    pub kind: ColumnKind,
}

/// A single cell value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Timestamp in nanoseconds.
    Timestamp(Timestamp),
    /// Signed integer.
    Long(i64),
    /// Float.
    Double(f64),
    /// String stored through the dictionary.
    Symbol(String),
}

impl Value {
    fn kind(&self) -> ColumnKind {
        match self {
            Self::Timestamp(_) => ColumnKind::Timestamp,
            Self::Long(_) => ColumnKind::Long,
            Self::Double(_) => ColumnKind::Double,
            Self::Symbol(_) => ColumnKind::Symbol,
        }
    }
}

/// Column layout shared by writers and readers of one journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalMetadata {
    columns: Vec<ColumnMeta>,
    symbol_columns: Vec<usize>,
}

impl JournalMetadata {
    /// Starts a layout whose first column is the timestamp `timestamp_column`.
    pub fn builder(timestamp_column: impl Into<String>) -> JournalMetadataBuilder {
        JournalMetadataBuilder {
            columns: vec![ColumnMeta {
                name: timestamp_column.into(),
                kind: ColumnKind::Timestamp,
            }],
        }
    }

    /// Returns all columns.
    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    /// Returns the index of a column by name.
    pub fn column_index(&self, name: &str) -> Result<usize> {
        self.columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| JournalError::UnknownColumn(name.to_string()))
    }

    /// Returns the column indexes of symbol columns in order.
    pub fn symbol_columns(&self) -> &[usize] {
        &self.symbol_columns
    }

    /// Returns the dictionary ordinal of a symbol column.
    pub fn symbol_ordinal(&self, column: usize) -> Option<usize> {
        self.symbol_columns.iter().position(|&c| c == column)
    }

    /// Returns the file index of a symbol column's posting index.
    pub fn index_file(&self, column: usize) -> Option<usize> {
        self.symbol_ordinal(column)
            .map(|ordinal| self.columns.len() + ordinal)
    }

    /// Number of files in each partition.
    pub fn file_count(&self) -> usize {
        self.columns.len() + self.symbol_columns.len()
    }

    /// Checks a row against the layout and returns its timestamp.
    pub fn validate_row(&self, values: &[Value]) -> Result<Timestamp> {
        if values.len() != self.columns.len() {
            return Err(JournalError::SchemaMismatch(format!(
                "row has {} values, journal has {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        for (value, column) in values.iter().zip(&self.columns) {
            if value.kind() != column.kind {
                return Err(JournalError::SchemaMismatch(format!(
                    "column {} expects {:?}, got {:?}",
                    column.name,
                    column.kind,
                    value.kind()
                )));
            }
        }
        match values[0] {
            Value::Timestamp(ts) => Ok(ts),
            _ => Err(JournalError::SchemaMismatch(
                "first value must be the timestamp".to_string(),
            )),
        }
    }
}

/// Builder for [`JournalMetadata`].
#[derive(Debug, Clone)]
pub struct JournalMetadataBuilder {
    columns: Vec<ColumnMeta>,
}

impl JournalMetadataBuilder {
    fn column(mut self, name: impl Into<String>, kind: ColumnKind) -> Self {
        self.columns.push(ColumnMeta {
            name: name.into(),
            kind,
        });
        self
    }

    /// Adds a long column.
    pub fn long(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnKind::Long)
    }

    /// Adds a double column.
    pub fn double(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnKind::Double)
    }

    /// Adds a symbol column.
    pub fn symbol(self, name: impl Into<String>) -> Self {
        self.column(name, ColumnKind::Symbol)
    }

    /// Finishes the layout.
    ///
    /// # Errors
    ///
    /// Returns an error if column names repeat or are not usable as file names.
    pub fn build(self) -> Result<JournalMetadata> {
        for (i, column) in self.columns.iter().enumerate() {
            let valid_name = !column.name.is_empty()
                && column
                    .name
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'_');
            if !valid_name {
                return Err(JournalError::SchemaMismatch(format!(
                    "invalid column name {:?}",
                    column.name
                )));
            }
            if self.columns[..i].iter().any(|c| c.name == column.name) {
                return Err(JournalError::SchemaMismatch(format!(
                    "duplicate column {}",
                    column.name
                )));
            }
        }
        let symbol_columns = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.kind == ColumnKind::Symbol)
            .map(|(i, _)| i)
            .collect();
        Ok(JournalMetadata {
            columns: self.columns,
            symbol_columns,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotes() -> JournalMetadata {
        JournalMetadata::builder("ts")
            .symbol("sym")
            .double("bid")
            .long("size")
            .symbol("venue")
            .build()
            .unwrap()
    }

    #[test]
    fn test_file_layout() {
        let meta = quotes();
        assert_eq!(meta.columns().len(), 5);
        assert_eq!(meta.symbol_columns(), &[1, 4]);
        assert_eq!(meta.file_count(), 7);
        assert_eq!(meta.index_file(1), Some(5));
        assert_eq!(meta.index_file(4), Some(6));
        assert_eq!(meta.index_file(2), None);
        assert_eq!(meta.column_index("bid").unwrap(), 2);
        assert!(matches!(
            meta.column_index("ask"),
            Err(JournalError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_validate_row() {
        let meta = quotes();
        let row = vec![
            Value::Timestamp(5),
            Value::Symbol("AAPL".into()),
            Value::Double(1.5),
            Value::Long(100),
            Value::Symbol("XNAS".into()),
        ];
        assert_eq!(meta.validate_row(&row).unwrap(), 5);
        assert!(meta.validate_row(&row[..4]).is_err());

        let mut wrong = row.clone();
        wrong[2] = Value::Long(1);
        assert!(matches!(
            meta.validate_row(&wrong),
            Err(JournalError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn test_builder_rejects_bad_names() {
        assert!(JournalMetadata::builder("ts").long("ts").build().is_err());
        assert!(JournalMetadata::builder("ts").long("a/b").build().is_err());
        assert!(JournalMetadata::builder("").build().is_err());
    }
}
