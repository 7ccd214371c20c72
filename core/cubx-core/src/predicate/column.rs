//! Single-column predicates.
//!
//! A `StarColumnPredicate` constrains exactly one physical column. These are
//! the per-axis constraints of a segment and the children of list predicates;
//! multi-column logic lives in [`crate::predicate::StarPredicate`].

use crate::star::{JoinPath, StarColumn};
use crate::value::CellValue;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A physical column paired with its join route to the fact table.
///
/// Equality is column ordinal plus route: the same column reached through two
/// different join paths is two distinct predicate columns. Ordering by
/// ordinal is the canonical comparator that keeps combined predicate output
/// deterministic.
#[derive(Debug, Clone)]
pub struct PredicateColumn {
    pub column: Arc<StarColumn>,
    pub path: JoinPath,
}

impl PredicateColumn {
    pub fn new(column: Arc<StarColumn>, path: JoinPath) -> Self {
        PredicateColumn { column, path }
    }

    /// Column on the fact table itself (empty join route).
    pub fn direct(column: Arc<StarColumn>) -> Self {
        PredicateColumn::new(column, JoinPath::direct())
    }

    pub fn ordinal(&self) -> usize {
        self.column.ordinal
    }
}

impl PartialEq for PredicateColumn {
    fn eq(&self, other: &Self) -> bool {
        self.column.ordinal == other.column.ordinal && self.path == other.path
    }
}

impl Eq for PredicateColumn {}

impl Hash for PredicateColumn {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column.ordinal.hash(state);
        self.path.hash(state);
    }
}

impl PartialOrd for PredicateColumn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PredicateColumn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.column
            .ordinal
            .cmp(&other.column.ordinal)
            .then_with(|| self.path.cmp(&other.path))
    }
}

impl fmt::Display for PredicateColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.column.expression)
    }
}

/// One end of a range constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Bound {
    pub value: CellValue,
    pub inclusive: bool,
}

impl Bound {
    pub fn inclusive(value: impl Into<CellValue>) -> Self {
        Bound {
            value: value.into(),
            inclusive: true,
        }
    }

    pub fn exclusive(value: impl Into<CellValue>) -> Self {
        Bound {
            value: value.into(),
            inclusive: false,
        }
    }
}

/// The constraint applied to one column.
///
/// `Value(Null)` means IS NULL. `List` values are kept sorted and unique so
/// that two lists built in different orders are equal and render identical
/// SQL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnConstraint {
    Value(CellValue),
    Range {
        lower: Option<Bound>,
        upper: Option<Bound>,
    },
    List(Vec<CellValue>),
}

/// A predicate over exactly one column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StarColumnPredicate {
    pub column: PredicateColumn,
    pub constraint: ColumnConstraint,
}

impl StarColumnPredicate {
    pub fn value(column: PredicateColumn, value: impl Into<CellValue>) -> Self {
        StarColumnPredicate {
            column,
            constraint: ColumnConstraint::Value(value.into()),
        }
    }

    pub fn range(column: PredicateColumn, lower: Option<Bound>, upper: Option<Bound>) -> Self {
        assert!(
            lower.is_some() || upper.is_some(),
            "range predicate requires at least one bound"
        );
        StarColumnPredicate {
            column,
            constraint: ColumnConstraint::Range { lower, upper },
        }
    }

    /// Build a list (IN) predicate. Panics on an empty value list: a
    /// zero-child list is a construction bug, not a runtime condition.
    pub fn list<I: IntoIterator<Item = CellValue>>(column: PredicateColumn, values: I) -> Self {
        let mut values: Vec<CellValue> = values.into_iter().collect();
        assert!(
            !values.is_empty(),
            "list predicate requires at least one value"
        );
        values.sort();
        values.dedup();
        StarColumnPredicate {
            column,
            constraint: ColumnConstraint::List(values),
        }
    }

    pub fn ordinal(&self) -> usize {
        self.column.ordinal()
    }

    /// Whether `cell` satisfies this constraint. Null matches only an
    /// explicit null constraint; it never falls inside a range.
    pub fn evaluate_cell(&self, cell: &CellValue) -> bool {
        match &self.constraint {
            ColumnConstraint::Value(v) => v == cell,
            ColumnConstraint::List(values) => values.binary_search(cell).is_ok(),
            ColumnConstraint::Range { lower, upper } => {
                if cell.is_null() {
                    return false;
                }
                if let Some(b) = lower {
                    let ord = cell.cmp(&b.value);
                    if ord == Ordering::Less || (ord == Ordering::Equal && !b.inclusive) {
                        return false;
                    }
                }
                if let Some(b) = upper {
                    let ord = cell.cmp(&b.value);
                    if ord == Ordering::Greater || (ord == Ordering::Equal && !b.inclusive) {
                        return false;
                    }
                }
                true
            }
        }
    }

    /// Constraint-level equality, the comparison aggregation keys use: same
    /// column (ordinal and route) constrained the same way.
    pub fn equal_constraint(&self, other: &Self) -> bool {
        self.column == other.column && self.constraint == other.constraint
    }

    /// The sorted values of a list or single-value constraint, if this
    /// predicate is an exact value enumeration.
    pub fn value_enumeration(&self) -> Option<Vec<CellValue>> {
        match &self.constraint {
            ColumnConstraint::Value(v) => Some(vec![v.clone()]),
            ColumnConstraint::List(values) => Some(values.clone()),
            ColumnConstraint::Range { .. } => None,
        }
    }

    /// Merge another same-column value enumeration into this one (OR).
    /// Returns `None` when either side is not an enumeration or the columns
    /// differ.
    pub fn merge_or(&self, other: &Self) -> Option<Self> {
        if self.column != other.column {
            return None;
        }
        let mut values = self.value_enumeration()?;
        values.extend(other.value_enumeration()?);
        Some(StarColumnPredicate::list(self.column.clone(), values))
    }

    /// Remove the values matched by `other` (set subtraction on value
    /// enumerations). Returns `None` when subtraction cannot be computed
    /// locally, `Some(None)` when nothing is left.
    #[allow(clippy::option_option)]
    pub fn subtract(&self, other: &Self) -> Option<Option<Self>> {
        if self.column != other.column {
            return None;
        }
        let mine = self.value_enumeration()?;
        let theirs = other.value_enumeration()?;
        let remaining: Vec<CellValue> = mine.into_iter().filter(|v| !theirs.contains(v)).collect();
        if remaining.is_empty() {
            Some(None)
        } else {
            Some(Some(StarColumnPredicate::list(
                self.column.clone(),
                remaining,
            )))
        }
    }
}

impl fmt::Display for StarColumnPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            ColumnConstraint::Value(v) => write!(f, "{} = {}", self.column, v),
            ColumnConstraint::List(values) => {
                write!(f, "{} in (", self.column)?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, ")")
            }
            ColumnConstraint::Range { lower, upper } => {
                write!(f, "{} in ", self.column)?;
                match lower {
                    Some(b) if b.inclusive => write!(f, "[{}", b.value)?,
                    Some(b) => write!(f, "({}", b.value)?,
                    None => write!(f, "(-inf")?,
                }
                write!(f, ", ")?;
                match upper {
                    Some(b) if b.inclusive => write!(f, "{}]", b.value),
                    Some(b) => write!(f, "{})", b.value),
                    None => write!(f, "+inf)"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Datatype;

    fn col(ordinal: usize, name: &str) -> PredicateColumn {
        PredicateColumn::direct(Arc::new(StarColumn::new(
            ordinal,
            name,
            "store",
            Datatype::Str,
        )))
    }

    #[test]
    fn test_value_predicate_evaluate() {
        let p = StarColumnPredicate::value(col(0, "region"), "CA");
        assert!(p.evaluate_cell(&CellValue::from("CA")));
        assert!(!p.evaluate_cell(&CellValue::from("OR")));
        assert!(!p.evaluate_cell(&CellValue::Null));
    }

    #[test]
    fn test_null_value_predicate() {
        let p = StarColumnPredicate::value(col(0, "region"), CellValue::Null);
        assert!(p.evaluate_cell(&CellValue::Null));
        assert!(!p.evaluate_cell(&CellValue::from("CA")));
    }

    #[test]
    fn test_list_evaluate_and_order_independence() {
        let a = StarColumnPredicate::list(
            col(0, "region"),
            vec![CellValue::from("OR"), CellValue::from("CA")],
        );
        let b = StarColumnPredicate::list(
            col(0, "region"),
            vec![CellValue::from("CA"), CellValue::from("OR")],
        );
        assert_eq!(a, b);
        assert!(a.evaluate_cell(&CellValue::from("CA")));
        assert!(!a.evaluate_cell(&CellValue::from("WA")));
    }

    #[test]
    #[should_panic(expected = "at least one value")]
    fn test_empty_list_panics() {
        StarColumnPredicate::list(col(0, "region"), vec![]);
    }

    #[test]
    fn test_range_bounds() {
        let p = StarColumnPredicate::range(
            col(1, "qty"),
            Some(Bound::inclusive(10i64)),
            Some(Bound::exclusive(20i64)),
        );
        assert!(p.evaluate_cell(&CellValue::Int(10)));
        assert!(p.evaluate_cell(&CellValue::Int(19)));
        assert!(!p.evaluate_cell(&CellValue::Int(20)));
        assert!(!p.evaluate_cell(&CellValue::Int(9)));
        assert!(!p.evaluate_cell(&CellValue::Null));
    }

    #[test]
    fn test_merge_or_same_column() {
        let a = StarColumnPredicate::value(col(0, "region"), "CA");
        let b = StarColumnPredicate::value(col(0, "region"), "OR");
        let merged = a.merge_or(&b).unwrap();
        assert!(merged.evaluate_cell(&CellValue::from("CA")));
        assert!(merged.evaluate_cell(&CellValue::from("OR")));
    }

    #[test]
    fn test_merge_or_different_column_fails() {
        let a = StarColumnPredicate::value(col(0, "region"), "CA");
        let b = StarColumnPredicate::value(col(1, "quarter"), "Q1");
        assert!(a.merge_or(&b).is_none());
    }

    #[test]
    fn test_subtract() {
        let a = StarColumnPredicate::list(
            col(0, "region"),
            vec![CellValue::from("CA"), CellValue::from("OR")],
        );
        let b = StarColumnPredicate::value(col(0, "region"), "CA");
        let remaining = a.subtract(&b).unwrap().unwrap();
        assert!(!remaining.evaluate_cell(&CellValue::from("CA")));
        assert!(remaining.evaluate_cell(&CellValue::from("OR")));

        let nothing = remaining.subtract(&remaining).unwrap();
        assert!(nothing.is_none());
    }

    #[test]
    fn test_column_ordering_by_ordinal() {
        let mut cols = vec![col(3, "c"), col(0, "a"), col(1, "b")];
        cols.sort();
        assert_eq!(cols[0].ordinal(), 0);
        assert_eq!(cols[2].ordinal(), 3);
    }

    #[test]
    fn test_router_distinguishes_columns() {
        let column = Arc::new(StarColumn::new(0, "region", "store", Datatype::Str));
        let direct = PredicateColumn::direct(Arc::clone(&column));
        let routed = PredicateColumn::new(column, JoinPath::through(["warehouse"]));
        assert_ne!(direct, routed);
    }
}
