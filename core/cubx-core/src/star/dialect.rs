//! SQL dialect abstraction.
//!
//! Predicate rendering depends entirely on this collaborator for identifier
//! quoting, literal quoting and capability checks. Real dialects are provided
//! by the SQL layer above this crate; `AnsiDialect` is the portable default
//! used in tests.

use crate::value::{CellValue, Datatype};

/// Capability and quoting surface of one target database.
pub trait Dialect: Send + Sync {
    /// Quote an identifier for this database.
    fn quote_identifier(&self, name: &str) -> String;

    /// Render a value as a SQL literal of the given column datatype.
    fn quote_value(&self, value: &CellValue, datatype: Datatype) -> String;

    fn allows_count_distinct(&self) -> bool {
        true
    }

    fn allows_multiple_count_distinct(&self) -> bool {
        true
    }

    /// Whether `(a, b) IN ((1, 2), (3, 4))` is valid syntax here.
    fn supports_multi_value_in(&self) -> bool {
        true
    }

    fn max_column_name_length(&self) -> usize {
        30
    }

    fn database_product(&self) -> &str;
}

/// Portable ANSI SQL dialect.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnsiDialect;

impl Dialect for AnsiDialect {
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn quote_value(&self, value: &CellValue, _datatype: Datatype) -> String {
        match value {
            CellValue::Null => "NULL".to_string(),
            CellValue::Int(v) => v.to_string(),
            CellValue::Real(v) => v.to_string(),
            CellValue::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            CellValue::Str(v) => format!("'{}'", v.replace('\'', "''")),
        }
    }

    fn database_product(&self) -> &str {
        "ANSI"
    }
}
