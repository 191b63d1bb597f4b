//! Core data model: table schemas and the values returned by warehouse queries.
//!
//! Raw and clean tables are described by a [`Schema`] (a list of typed [`Field`]s). Query
//! results come back as [`Row`]s of [`Value`]s in projection order.

use std::fmt;

/// Logical data type for a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// UTF-8 string.
    Utf8,
    /// Calendar date, stored as `YYYY-MM-DD` text.
    Date,
}

impl DataType {
    /// Column type used in warehouse DDL.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Int64 => "INTEGER",
            Self::Float64 => "REAL",
            // TEXT affinity keeps ISO dates comparable as strings.
            Self::Utf8 | Self::Date => "TEXT",
        }
    }
}

/// A single named, typed field in a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Field/column name.
    pub name: String,
    /// Field data type.
    pub data_type: DataType,
    /// Whether the column accepts NULL.
    pub nullable: bool,
}

impl Field {
    /// Create a new nullable field.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    /// Mark the field as NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// A list of fields describing the shape of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    /// Ordered list of fields.
    pub fields: Vec<Field>,
}

impl Schema {
    /// Create a new schema from fields.
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    /// Staged transaction rows: every field is untyped text.
    pub fn raw_financial() -> Self {
        Self::new(
            FINANCIAL_COLUMNS
                .iter()
                .map(|name| Field::new(*name, DataType::Utf8))
                .collect(),
        )
    }

    /// Typed transaction rows produced by the transform.
    pub fn clean_financial() -> Self {
        Self::new(vec![
            Field::new("transaction_id", DataType::Utf8),
            Field::new("customer_name", DataType::Utf8),
            Field::new("account_type", DataType::Utf8),
            Field::new("transaction_amount", DataType::Float64),
            Field::new("currency", DataType::Utf8),
            Field::new("transaction_date", DataType::Date),
        ])
    }

    /// Iterate field names in order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Returns the index of a field by name, if present.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Render an idempotent `CREATE TABLE` statement for this schema.
    pub fn create_table_sql(&self, table: &str) -> String {
        let columns = self
            .fields
            .iter()
            .map(|f| {
                let null = if f.nullable { "" } else { " NOT NULL" };
                format!("    {} {}{}", f.name, f.data_type.sql_type(), null)
            })
            .collect::<Vec<_>>()
            .join(",\n");
        format!("CREATE TABLE IF NOT EXISTS {table} (\n{columns}\n)")
    }
}

/// Column names shared by the staged file, the raw table and the clean table.
pub const FINANCIAL_COLUMNS: [&str; 6] = [
    "transaction_id",
    "customer_name",
    "account_type",
    "transaction_amount",
    "currency",
    "transaction_date",
];

/// A single value returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// SQL NULL.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// UTF-8 string.
    Utf8(String),
    /// Opaque bytes.
    Bytes(Vec<u8>),
}

impl Value {
    /// Interpret the value as a non-negative row count.
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Int64(n) => u64::try_from(*n).ok(),
            _ => None,
        }
    }

    /// Borrow the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Utf8(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Int64(n) => write!(f, "{n}"),
            Self::Float64(v) => write!(f, "{v}"),
            Self::Utf8(s) => write!(f, "'{s}'"),
            Self::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for Value {
    fn from(v: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match v {
            ValueRef::Null => Self::Null,
            ValueRef::Integer(n) => Self::Int64(n),
            ValueRef::Real(f) => Self::Float64(f),
            ValueRef::Text(t) => Self::Utf8(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Self::Bytes(b.to_vec()),
        }
    }
}

/// One result row, values in projection order.
pub type Row = Vec<Value>;
