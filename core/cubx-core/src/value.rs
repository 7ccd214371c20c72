//! Cell and axis value representation.
//!
//! `CellValue` is the single value type flowing through predicates, axis
//! value sets and cell storage. It carries a total order (reals compare via
//! `total_cmp`) so values can live in sorted axis sets and `BTreeSet`-backed
//! header descriptors.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Storage datatype of a star column or measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Datatype {
    Int,
    Real,
    Str,
    Bool,
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Datatype::Int => "Int",
            Datatype::Real => "Real",
            Datatype::Str => "Str",
            Datatype::Bool => "Bool",
        };
        f.write_str(s)
    }
}

/// A single cell or axis value.
///
/// `Null` is the SQL-null sentinel: it sorts before every other value and
/// compares equal only to itself. Two `Real` values are equal iff their bit
/// patterns are (so `-0.0 != 0.0` and NaN equals itself), which keeps `Eq`,
/// `Ord` and `Hash` mutually consistent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Int(i64),
    Real(f64),
    Str(String),
    Bool(bool),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// The datatype of this value; `None` for the null sentinel.
    pub fn datatype(&self) -> Option<Datatype> {
        match self {
            CellValue::Null => None,
            CellValue::Int(_) => Some(Datatype::Int),
            CellValue::Real(_) => Some(Datatype::Real),
            CellValue::Str(_) => Some(Datatype::Str),
            CellValue::Bool(_) => Some(Datatype::Bool),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Bool(_) => 1,
            CellValue::Int(_) => 2,
            CellValue::Real(_) => 3,
            CellValue::Str(_) => 4,
        }
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => true,
            (CellValue::Int(a), CellValue::Int(b)) => a == b,
            (CellValue::Real(a), CellValue::Real(b)) => a.to_bits() == b.to_bits(),
            (CellValue::Str(a), CellValue::Str(b)) => a == b,
            (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::Real(a), CellValue::Real(b)) => a.total_cmp(b),
            (CellValue::Str(a), CellValue::Str(b)) => a.cmp(b),
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u8(self.type_rank());
        match self {
            CellValue::Null => {}
            CellValue::Int(v) => v.hash(state),
            CellValue::Real(v) => v.to_bits().hash(state),
            CellValue::Str(v) => v.hash(state),
            CellValue::Bool(v) => v.hash(state),
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Int(v) => write!(f, "{}", v),
            CellValue::Real(v) => write!(f, "{}", v),
            CellValue::Str(v) => write!(f, "{}", v),
            CellValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for CellValue {
    fn from(v: i64) -> Self {
        CellValue::Int(v)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Real(v)
    }
}

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::Str(v.to_string())
    }
}

impl From<String> for CellValue {
    fn from(v: String) -> Self {
        CellValue::Str(v)
    }
}

impl From<bool> for CellValue {
    fn from(v: bool) -> Self {
        CellValue::Bool(v)
    }
}
