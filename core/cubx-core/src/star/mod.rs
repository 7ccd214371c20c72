//! Physical star-schema model consumed by the cache.
//!
//! The schema loader and the SQL generation layer live above this crate; the
//! cache only needs column ordinals (for bitkeys), the join route from each
//! column's table back to the fact table, and measure descriptions. `Star` is
//! the fact context every cache key is scoped to.

pub mod dialect;
pub mod request;

use crate::bitkey::BitKey;
use crate::error::{CubxError, CubxResult};
use crate::value::{CellValue, Datatype};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// A physical table participating in a star.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarTable {
    pub name: String,
    pub alias: String,
}

impl StarTable {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        StarTable {
            name: name.into(),
            alias: alias.into(),
        }
    }
}

/// A physical column with a schema-wide ordinal position.
///
/// The ordinal is the column's bit position in every `BitKey`; it must be
/// unique within one star.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StarColumn {
    pub ordinal: usize,
    pub name: String,
    pub table_alias: String,
    /// SQL expression rendering this column, e.g. `store.region`.
    pub expression: String,
    pub datatype: Datatype,
}

impl StarColumn {
    pub fn new(
        ordinal: usize,
        name: impl Into<String>,
        table_alias: impl Into<String>,
        datatype: Datatype,
    ) -> Self {
        let name = name.into();
        let table_alias = table_alias.into();
        let expression = format!("{}.{}", table_alias, name);
        StarColumn {
            ordinal,
            name,
            table_alias,
            expression,
            datatype,
        }
    }
}

impl fmt::Display for StarColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Join path from a column's table back to the fact table (the "router").
///
/// Stored as the sequence of table aliases hopped through, nearest first. An
/// empty path means the column lives on the fact table itself. Two predicate
/// columns over the same physical column but different routes are distinct.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JoinPath(pub Vec<String>);

impl JoinPath {
    pub fn direct() -> Self {
        JoinPath::default()
    }

    pub fn through<I: IntoIterator<Item = S>, S: Into<String>>(hops: I) -> Self {
        JoinPath(hops.into_iter().map(Into::into).collect())
    }
}

/// Fact-table context: identifies one star within one schema.
///
/// Stars compare by logical identity (schema name, schema checksum, fact
/// table alias) so that independently constructed references to the same
/// star produce equal cache keys.
#[derive(Debug, Clone)]
pub struct Star {
    pub schema_name: String,
    pub schema_checksum: String,
    pub fact_table: StarTable,
    columns: Vec<Arc<StarColumn>>,
}

impl Star {
    pub fn new(
        schema_name: impl Into<String>,
        schema_checksum: impl Into<String>,
        fact_table: StarTable,
    ) -> Self {
        Star {
            schema_name: schema_name.into(),
            schema_checksum: schema_checksum.into(),
            fact_table,
            columns: Vec::new(),
        }
    }

    /// Register a column. Ordinals must be unique within the star.
    pub fn add_column(&mut self, column: StarColumn) -> Arc<StarColumn> {
        assert!(
            self.columns.iter().all(|c| c.ordinal != column.ordinal),
            "duplicate column ordinal {}",
            column.ordinal
        );
        let column = Arc::new(column);
        self.columns.push(Arc::clone(&column));
        column
    }

    pub fn column(&self, ordinal: usize) -> Option<&Arc<StarColumn>> {
        self.columns.iter().find(|c| c.ordinal == ordinal)
    }

    pub fn columns(&self) -> &[Arc<StarColumn>] {
        &self.columns
    }

    /// Columns selected by a bitkey, in ascending ordinal order.
    pub fn columns_for(&self, key: &BitKey) -> Vec<Arc<StarColumn>> {
        let mut selected: Vec<Arc<StarColumn>> = self
            .columns
            .iter()
            .filter(|c| key.get(c.ordinal))
            .cloned()
            .collect();
        selected.sort_by_key(|c| c.ordinal);
        selected
    }
}

impl PartialEq for Star {
    fn eq(&self, other: &Self) -> bool {
        self.schema_name == other.schema_name
            && self.schema_checksum == other.schema_checksum
            && self.fact_table.alias == other.fact_table.alias
    }
}

impl Eq for Star {}

/// Aggregation function attached to a measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Aggregator {
    Sum,
    Count,
    Min,
    Max,
    DistinctCount,
}

impl Aggregator {
    /// Fold a group of already-aggregated cell values into one rolled-up
    /// value. `Count` rolls up by summation; `DistinctCount` cannot be rolled
    /// up from partial results at all and refuses.
    pub fn rollup_fold(&self, values: &[CellValue]) -> CubxResult<CellValue> {
        if values.is_empty() {
            return Ok(CellValue::Null);
        }
        match self {
            Aggregator::Sum | Aggregator::Count => fold_sum(values),
            Aggregator::Min => Ok(values.iter().min().cloned().unwrap_or(CellValue::Null)),
            Aggregator::Max => Ok(values.iter().max().cloned().unwrap_or(CellValue::Null)),
            Aggregator::DistinctCount => Err(CubxError::Unsupported(
                "distinct-count measures cannot be rolled up from cached segments".to_string(),
            )),
        }
    }
}

fn fold_sum(values: &[CellValue]) -> CubxResult<CellValue> {
    let mut int_sum: i64 = 0;
    let mut real_sum: f64 = 0.0;
    let mut saw_real = false;
    for value in values {
        match value {
            CellValue::Null => {}
            CellValue::Int(v) => int_sum += v,
            CellValue::Real(v) => {
                saw_real = true;
                real_sum += v;
            }
            other => {
                return Err(CubxError::DatatypeMismatch {
                    expected: "Int or Real".to_string(),
                    actual: format!("{:?}", other.datatype()),
                });
            }
        }
    }
    if saw_real {
        Ok(CellValue::Real(real_sum + int_sum as f64))
    } else {
        Ok(CellValue::Int(int_sum))
    }
}

/// A measure of one cube: what gets aggregated into cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measure {
    pub name: String,
    pub cube: String,
    /// SQL expression of the measure column, e.g. `sales.amount`.
    pub expression: String,
    pub aggregator: Aggregator,
    pub datatype: Datatype,
}

impl Measure {
    pub fn new(
        name: impl Into<String>,
        cube: impl Into<String>,
        expression: impl Into<String>,
        aggregator: Aggregator,
        datatype: Datatype,
    ) -> Self {
        Measure {
            name: name.into(),
            cube: cube.into(),
            expression: expression.into(),
            aggregator,
            datatype,
        }
    }
}

impl PartialEq for Measure {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.cube == other.cube
    }
}

impl Eq for Measure {}

/// Per-column distinct-value statistics, approximate or exact.
///
/// Supplied by the surrounding system; used to predict segment cell counts
/// before any SQL runs.
pub trait ColumnStatistics {
    fn cardinality(&self, column: &StarColumn) -> Option<u64>;
}
