//! Composable boolean predicates over star columns.
//!
//! `StarPredicate` is a closed sum over the predicate shapes the cache needs:
//! literals, single-column constraints, conjunction, disjunction, set
//! subtraction and lexicographic tuple intervals. The combinators perform
//! local simplification — OR-ing two value predicates on the same column
//! merges their value lists instead of nesting — which keeps cache keys and
//! rendered SQL stable for equivalent inputs.

use crate::bitkey::BitKey;
use crate::predicate::column::{PredicateColumn, StarColumnPredicate};
use crate::value::CellValue;
use ahash::AHashMap;
use std::cmp::Ordering;
use std::fmt;

/// Column values of one candidate row, keyed by column ordinal.
///
/// A missing column never satisfies a constraint on it; SQL nulls must be
/// present explicitly as [`CellValue::Null`].
#[derive(Debug, Clone, Default)]
pub struct RowValues(AHashMap<usize, CellValue>);

impl RowValues {
    pub fn new() -> Self {
        RowValues::default()
    }

    pub fn with(mut self, ordinal: usize, value: impl Into<CellValue>) -> Self {
        self.set(ordinal, value);
        self
    }

    pub fn set(&mut self, ordinal: usize, value: impl Into<CellValue>) {
        self.0.insert(ordinal, value.into());
    }

    pub fn get(&self, ordinal: usize) -> Option<&CellValue> {
        self.0.get(&ordinal)
    }
}

/// Lexicographic bound over a column-tuple prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleBound {
    pub values: Vec<CellValue>,
    pub inclusive: bool,
}

/// One lexicographic interval; `None` means unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TupleInterval {
    pub lower: Option<TupleBound>,
    pub upper: Option<TupleBound>,
}

/// Tuple-interval predicate over an ordered column prefix, used for member
/// ranges that span the key columns of several levels.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberTuplePredicate {
    pub columns: Vec<PredicateColumn>,
    pub intervals: Vec<TupleInterval>,
}

impl MemberTuplePredicate {
    pub fn new(columns: Vec<PredicateColumn>, intervals: Vec<TupleInterval>) -> Self {
        assert!(!columns.is_empty(), "tuple predicate requires columns");
        assert!(!intervals.is_empty(), "tuple predicate requires intervals");
        for interval in &intervals {
            for bound in interval.lower.iter().chain(interval.upper.iter()) {
                assert!(
                    bound.values.len() <= columns.len(),
                    "tuple bound longer than column list"
                );
                assert!(!bound.values.is_empty(), "empty tuple bound");
            }
        }
        MemberTuplePredicate { columns, intervals }
    }

    fn contains(&self, tuple: &[CellValue]) -> bool {
        self.intervals.iter().any(|interval| {
            let above_lower = match &interval.lower {
                None => true,
                Some(bound) => match cmp_prefix(tuple, &bound.values) {
                    Ordering::Greater => true,
                    Ordering::Equal => bound.inclusive,
                    Ordering::Less => false,
                },
            };
            let below_upper = match &interval.upper {
                None => true,
                Some(bound) => match cmp_prefix(tuple, &bound.values) {
                    Ordering::Less => true,
                    Ordering::Equal => bound.inclusive,
                    Ordering::Greater => false,
                },
            };
            above_lower && below_upper
        })
    }
}

/// Compare a full tuple against a (possibly shorter) bound prefix. Equality
/// over the bound's length counts as `Equal`: the bound pins a subtree, not a
/// single point.
fn cmp_prefix(tuple: &[CellValue], bound: &[CellValue]) -> Ordering {
    for (t, b) in tuple.iter().zip(bound.iter()) {
        match t.cmp(b) {
            Ordering::Equal => continue,
            ord => return ord,
        }
    }
    Ordering::Equal
}

/// A boolean predicate over the columns of one star.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StarPredicate {
    Literal(bool),
    Column(StarColumnPredicate),
    And(Vec<StarPredicate>),
    Or(Vec<StarPredicate>),
    Minus {
        plus: Box<StarPredicate>,
        minus: Box<StarPredicate>,
    },
    MemberTuple(MemberTuplePredicate),
}

impl StarPredicate {
    pub const TRUE: StarPredicate = StarPredicate::Literal(true);
    pub const FALSE: StarPredicate = StarPredicate::Literal(false);

    pub fn value(column: PredicateColumn, value: impl Into<CellValue>) -> Self {
        StarPredicate::Column(StarColumnPredicate::value(column, value))
    }

    pub fn list<I: IntoIterator<Item = CellValue>>(column: PredicateColumn, values: I) -> Self {
        StarPredicate::Column(StarColumnPredicate::list(column, values))
    }

    /// Whether the row satisfies this predicate. Conjunction requires every
    /// child to hold.
    pub fn evaluate(&self, row: &RowValues) -> bool {
        match self {
            StarPredicate::Literal(b) => *b,
            StarPredicate::Column(p) => match row.get(p.ordinal()) {
                Some(cell) => p.evaluate_cell(cell),
                None => false,
            },
            StarPredicate::And(children) => children.iter().all(|c| c.evaluate(row)),
            StarPredicate::Or(children) => children.iter().any(|c| c.evaluate(row)),
            StarPredicate::Minus { plus, minus } => plus.evaluate(row) && !minus.evaluate(row),
            StarPredicate::MemberTuple(p) => {
                let mut tuple = Vec::with_capacity(p.columns.len());
                for column in &p.columns {
                    match row.get(column.ordinal()) {
                        Some(cell) => tuple.push(cell.clone()),
                        None => return false,
                    }
                }
                p.contains(&tuple)
            }
        }
    }

    /// The set of column ordinals this predicate constrains.
    pub fn constrained_bitkey(&self) -> BitKey {
        let mut key = BitKey::empty();
        self.collect_bitkey(&mut key);
        key
    }

    fn collect_bitkey(&self, key: &mut BitKey) {
        match self {
            StarPredicate::Literal(_) => {}
            StarPredicate::Column(p) => key.set(p.ordinal()),
            StarPredicate::And(children) | StarPredicate::Or(children) => {
                for child in children {
                    child.collect_bitkey(key);
                }
            }
            StarPredicate::Minus { plus, minus } => {
                plus.collect_bitkey(key);
                minus.collect_bitkey(key);
            }
            StarPredicate::MemberTuple(p) => {
                for column in &p.columns {
                    key.set(column.ordinal());
                }
            }
        }
    }

    /// Constrained columns, sorted by ordinal and deduplicated. The sort is
    /// what keeps multi-column output (SQL IN lists, cache keys) identical
    /// across invocations of the same query shape.
    pub fn column_list(&self) -> Vec<PredicateColumn> {
        let mut columns = Vec::new();
        self.collect_columns(&mut columns);
        columns.sort();
        columns.dedup();
        columns
    }

    fn collect_columns(&self, out: &mut Vec<PredicateColumn>) {
        match self {
            StarPredicate::Literal(_) => {}
            StarPredicate::Column(p) => out.push(p.column.clone()),
            StarPredicate::And(children) | StarPredicate::Or(children) => {
                for child in children {
                    child.collect_columns(out);
                }
            }
            StarPredicate::Minus { plus, minus } => {
                plus.collect_columns(out);
                minus.collect_columns(out);
            }
            StarPredicate::MemberTuple(p) => out.extend(p.columns.iter().cloned()),
        }
    }

    /// Conjunction with local simplification: literals short-circuit and
    /// nested conjunctions flatten.
    pub fn and(self, other: StarPredicate) -> StarPredicate {
        match (self, other) {
            (StarPredicate::Literal(false), _) | (_, StarPredicate::Literal(false)) => {
                StarPredicate::FALSE
            }
            (StarPredicate::Literal(true), p) | (p, StarPredicate::Literal(true)) => p,
            (StarPredicate::And(mut a), StarPredicate::And(b)) => {
                a.extend(b);
                StarPredicate::And(a)
            }
            (StarPredicate::And(mut a), p) => {
                a.push(p);
                StarPredicate::And(a)
            }
            (p, StarPredicate::And(mut b)) => {
                b.insert(0, p);
                StarPredicate::And(b)
            }
            (a, b) => StarPredicate::And(vec![a, b]),
        }
    }

    /// Disjunction with local simplification: two value enumerations on the
    /// same column merge into one list; nested disjunctions flatten;
    /// heterogeneous operands wrap.
    pub fn or(self, other: StarPredicate) -> StarPredicate {
        match (self, other) {
            (StarPredicate::Literal(true), _) | (_, StarPredicate::Literal(true)) => {
                StarPredicate::TRUE
            }
            (StarPredicate::Literal(false), p) | (p, StarPredicate::Literal(false)) => p,
            (StarPredicate::Column(a), StarPredicate::Column(b)) => match a.merge_or(&b) {
                Some(merged) => StarPredicate::Column(merged),
                None => StarPredicate::Or(vec![StarPredicate::Column(a), StarPredicate::Column(b)]),
            },
            (StarPredicate::Or(mut a), StarPredicate::Or(b)) => {
                a.extend(b);
                StarPredicate::Or(a)
            }
            (StarPredicate::Or(mut a), p) => {
                // try to merge into an existing same-column child first
                if let StarPredicate::Column(ref cp) = p {
                    for child in a.iter_mut() {
                        if let StarPredicate::Column(existing) = child {
                            if let Some(merged) = existing.merge_or(cp) {
                                *existing = merged;
                                return StarPredicate::Or(a);
                            }
                        }
                    }
                }
                a.push(p);
                StarPredicate::Or(a)
            }
            (p, StarPredicate::Or(mut b)) => {
                b.insert(0, p);
                StarPredicate::Or(b)
            }
            (a, b) => StarPredicate::Or(vec![a, b]),
        }
    }

    /// Set subtraction. A value enumeration minus a same-column enumeration
    /// filters locally; everything else wraps in a `Minus` node (target
    /// dialects are not assumed to have a usable NOT operator, so the wrapper
    /// survives to SQL generation).
    pub fn minus(self, other: StarPredicate) -> StarPredicate {
        match (self, other) {
            (p, StarPredicate::Literal(false)) => p,
            (_, StarPredicate::Literal(true)) => StarPredicate::FALSE,
            (StarPredicate::Literal(false), _) => StarPredicate::FALSE,
            (StarPredicate::Column(a), StarPredicate::Column(b)) => match a.subtract(&b) {
                Some(Some(remaining)) => StarPredicate::Column(remaining),
                Some(None) => StarPredicate::FALSE,
                None => StarPredicate::Minus {
                    plus: Box::new(StarPredicate::Column(a)),
                    minus: Box::new(StarPredicate::Column(b)),
                },
            },
            (plus, minus) => StarPredicate::Minus {
                plus: Box::new(plus),
                minus: Box::new(minus),
            },
        }
    }

    /// Whether two predicates impose the same constraint. This is the
    /// comparison aggregation keys use; it is structural and deliberately
    /// cheaper than semantic equivalence.
    pub fn equal_constraint(&self, other: &StarPredicate) -> bool {
        match (self, other) {
            (StarPredicate::Literal(a), StarPredicate::Literal(b)) => a == b,
            (StarPredicate::Column(a), StarPredicate::Column(b)) => a.equal_constraint(b),
            (StarPredicate::And(a), StarPredicate::And(b))
            | (StarPredicate::Or(a), StarPredicate::Or(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .zip(b.iter())
                        .all(|(x, y)| x.equal_constraint(y))
            }
            (
                StarPredicate::Minus { plus: ap, minus: am },
                StarPredicate::Minus { plus: bp, minus: bm },
            ) => ap.equal_constraint(bp) && am.equal_constraint(bm),
            (StarPredicate::MemberTuple(a), StarPredicate::MemberTuple(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for StarPredicate {
    /// Canonical textual form, used as the compound-predicate descriptor in
    /// segment headers. Deterministic for equal constraints.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StarPredicate::Literal(b) => write!(f, "{}", b),
            StarPredicate::Column(p) => write!(f, "{}", p),
            StarPredicate::And(children) => {
                write!(f, "and(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            StarPredicate::Or(children) => {
                write!(f, "or(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", child)?;
                }
                write!(f, ")")
            }
            StarPredicate::Minus { plus, minus } => write!(f, "minus({}, {})", plus, minus),
            StarPredicate::MemberTuple(p) => {
                write!(f, "tuple(")?;
                for (i, column) in p.columns.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", column)?;
                }
                write!(f, "; {} intervals)", p.intervals.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::star::StarColumn;
    use crate::value::Datatype;
    use std::sync::Arc;

    fn col(ordinal: usize, name: &str) -> PredicateColumn {
        PredicateColumn::direct(Arc::new(StarColumn::new(
            ordinal,
            name,
            "store",
            Datatype::Str,
        )))
    }

    #[test]
    fn test_and_requires_all_children() {
        let p = StarPredicate::value(col(0, "region"), "CA")
            .and(StarPredicate::value(col(1, "quarter"), "Q1"));
        let both = RowValues::new().with(0, "CA").with(1, "Q1");
        let one = RowValues::new().with(0, "CA").with(1, "Q2");
        assert!(p.evaluate(&both));
        assert!(!p.evaluate(&one));
    }

    #[test]
    fn test_or_any_child() {
        let p = StarPredicate::value(col(0, "region"), "CA")
            .or(StarPredicate::value(col(1, "quarter"), "Q1"));
        assert!(p.evaluate(&RowValues::new().with(0, "NV").with(1, "Q1")));
        assert!(!p.evaluate(&RowValues::new().with(0, "NV").with(1, "Q3")));
    }

    #[test]
    fn test_or_merges_same_column_values() {
        let p = StarPredicate::value(col(0, "region"), "CA")
            .or(StarPredicate::value(col(0, "region"), "OR"));
        // merged to one list predicate, not a nested Or
        match &p {
            StarPredicate::Column(cp) => {
                assert_eq!(cp.value_enumeration().unwrap().len(), 2);
            }
            other => panic!("expected merged column predicate, got {:?}", other),
        }
    }

    #[test]
    fn test_or_merges_into_existing_disjunction() {
        let base = StarPredicate::value(col(0, "region"), "CA")
            .or(StarPredicate::value(col(1, "quarter"), "Q1"));
        let p = base.or(StarPredicate::value(col(0, "region"), "OR"));
        match &p {
            StarPredicate::Or(children) => {
                assert_eq!(children.len(), 2);
            }
            other => panic!("expected Or, got {:?}", other),
        }
        assert!(p.evaluate(&RowValues::new().with(0, "OR").with(1, "Q4")));
    }

    #[test]
    fn test_literal_short_circuits() {
        let x = StarPredicate::value(col(0, "region"), "CA");
        assert_eq!(x.clone().and(StarPredicate::TRUE), x);
        assert_eq!(x.clone().and(StarPredicate::FALSE), StarPredicate::FALSE);
        assert_eq!(x.clone().or(StarPredicate::FALSE), x);
        assert_eq!(x.clone().or(StarPredicate::TRUE), StarPredicate::TRUE);
    }

    #[test]
    fn test_minus_filters_lists() {
        let list = StarPredicate::list(
            col(0, "region"),
            vec![CellValue::from("CA"), CellValue::from("OR")],
        );
        let p = list.minus(StarPredicate::value(col(0, "region"), "CA"));
        assert!(!p.evaluate(&RowValues::new().with(0, "CA")));
        assert!(p.evaluate(&RowValues::new().with(0, "OR")));
    }

    #[test]
    fn test_minus_wraps_true() {
        let p = StarPredicate::TRUE.minus(StarPredicate::value(col(0, "region"), "CA"));
        match &p {
            StarPredicate::Minus { .. } => {}
            other => panic!("expected Minus wrapper, got {:?}", other),
        }
        assert!(!p.evaluate(&RowValues::new().with(0, "CA")));
        assert!(p.evaluate(&RowValues::new().with(0, "OR")));
    }

    #[test]
    fn test_bitkey_and_column_list() {
        let p = StarPredicate::value(col(3, "c"), "x")
            .and(StarPredicate::value(col(1, "a"), "y"))
            .and(StarPredicate::value(col(3, "c"), "z"));
        assert_eq!(p.constrained_bitkey(), BitKey::of([1, 3]));
        let columns = p.column_list();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0].ordinal(), 1);
        assert_eq!(columns[1].ordinal(), 3);
    }

    #[test]
    fn test_member_tuple_interval() {
        let p = StarPredicate::MemberTuple(MemberTuplePredicate::new(
            vec![col(0, "year"), col(1, "quarter")],
            vec![TupleInterval {
                lower: Some(TupleBound {
                    values: vec![CellValue::from("2005"), CellValue::from("Q2")],
                    inclusive: true,
                }),
                upper: Some(TupleBound {
                    values: vec![CellValue::from("2006")],
                    inclusive: true,
                }),
            }],
        ));
        assert!(p.evaluate(&RowValues::new().with(0, "2005").with(1, "Q3")));
        assert!(p.evaluate(&RowValues::new().with(0, "2006").with(1, "Q1")));
        assert!(!p.evaluate(&RowValues::new().with(0, "2005").with(1, "Q1")));
        assert!(!p.evaluate(&RowValues::new().with(0, "2007").with(1, "Q1")));
        // missing column never matches
        assert!(!p.evaluate(&RowValues::new().with(0, "2005")));
    }

    #[test]
    fn test_equal_constraint_ignores_identity() {
        let a = StarPredicate::value(col(0, "region"), "CA")
            .and(StarPredicate::value(col(1, "quarter"), "Q1"));
        let b = StarPredicate::value(col(0, "region"), "CA")
            .and(StarPredicate::value(col(1, "quarter"), "Q1"));
        assert!(a.equal_constraint(&b));
        let c = StarPredicate::value(col(0, "region"), "WA")
            .and(StarPredicate::value(col(1, "quarter"), "Q1"));
        assert!(!a.equal_constraint(&c));
    }
}
