//! SQL rendering of predicates.
//!
//! Anything `to_sql` selects must also be accepted by `evaluate`, and vice
//! versa, over the same input domain. Null handling is part of that contract:
//! a value enumeration containing the null sentinel renders as
//! `(col IN (...) OR col IS NULL)`, and an all-null enumeration renders as
//! `col IS NULL` — SQL's three-valued logic drops null rows from a plain IN.

use crate::predicate::column::{Bound, ColumnConstraint, PredicateColumn, StarColumnPredicate};
use crate::predicate::star::{MemberTuplePredicate, StarPredicate, TupleBound};
use crate::star::dialect::Dialect;
use crate::value::CellValue;

impl StarPredicate {
    /// Render this predicate for the given dialect.
    pub fn to_sql(&self, dialect: &dyn Dialect) -> String {
        match self {
            StarPredicate::Literal(true) => "(1 = 1)".to_string(),
            StarPredicate::Literal(false) => "(1 = 0)".to_string(),
            StarPredicate::Column(p) => p.to_sql(dialect),
            StarPredicate::And(children) => {
                let parts: Vec<String> = children.iter().map(|c| c.to_sql(dialect)).collect();
                format!("({})", parts.join(" AND "))
            }
            StarPredicate::Or(children) => or_to_sql(children, dialect),
            StarPredicate::Minus { plus, minus } => format!(
                "({} AND NOT ({}))",
                plus.to_sql(dialect),
                minus.to_sql(dialect)
            ),
            StarPredicate::MemberTuple(p) => tuple_to_sql(p, dialect),
        }
    }
}

impl StarColumnPredicate {
    pub fn to_sql(&self, dialect: &dyn Dialect) -> String {
        let expr = &self.column.column.expression;
        let datatype = self.column.column.datatype;
        match &self.constraint {
            ColumnConstraint::Value(CellValue::Null) => format!("{} IS NULL", expr),
            ColumnConstraint::Value(v) => {
                format!("{} = {}", expr, dialect.quote_value(v, datatype))
            }
            ColumnConstraint::List(values) => {
                let non_null: Vec<&CellValue> = values.iter().filter(|v| !v.is_null()).collect();
                let has_null = non_null.len() != values.len();
                match (non_null.len(), has_null) {
                    (0, _) => format!("{} IS NULL", expr),
                    (1, false) => {
                        format!("{} = {}", expr, dialect.quote_value(non_null[0], datatype))
                    }
                    (_, false) => in_list(expr, &non_null, datatype, dialect),
                    (1, true) => format!(
                        "({} = {} OR {} IS NULL)",
                        expr,
                        dialect.quote_value(non_null[0], datatype),
                        expr
                    ),
                    (_, true) => format!(
                        "({} OR {} IS NULL)",
                        in_list(expr, &non_null, datatype, dialect),
                        expr
                    ),
                }
            }
            ColumnConstraint::Range { lower, upper } => {
                let mut parts = Vec::with_capacity(2);
                if let Some(Bound { value, inclusive }) = lower {
                    let op = if *inclusive { ">=" } else { ">" };
                    parts.push(format!(
                        "{} {} {}",
                        expr,
                        op,
                        dialect.quote_value(value, datatype)
                    ));
                }
                if let Some(Bound { value, inclusive }) = upper {
                    let op = if *inclusive { "<=" } else { "<" };
                    parts.push(format!(
                        "{} {} {}",
                        expr,
                        op,
                        dialect.quote_value(value, datatype)
                    ));
                }
                if parts.len() == 1 {
                    parts.pop().unwrap()
                } else {
                    format!("({})", parts.join(" AND "))
                }
            }
        }
    }
}

fn in_list(
    expr: &str,
    values: &[&CellValue],
    datatype: crate::value::Datatype,
    dialect: &dyn Dialect,
) -> String {
    let rendered: Vec<String> = values
        .iter()
        .map(|v| dialect.quote_value(v, datatype))
        .collect();
    format!("{} IN ({})", expr, rendered.join(", "))
}

/// Render a disjunction, grouping AND-of-values children over identical
/// column sets into one multi-column IN list when the dialect allows it.
///
/// Children containing the null sentinel are excluded from the grouping and
/// rendered separately — nulls cannot appear in SQL IN lists.
fn or_to_sql(children: &[StarPredicate], dialect: &dyn Dialect) -> String {
    let mut grouped: Vec<(Vec<PredicateColumn>, Vec<Vec<CellValue>>)> = Vec::new();
    let mut rest: Vec<&StarPredicate> = Vec::new();

    if dialect.supports_multi_value_in() {
        for child in children {
            match as_value_conjunction(child) {
                Some((columns, values)) if columns.len() > 1 => {
                    match grouped.iter_mut().find(|(cols, _)| *cols == columns) {
                        Some((_, rows)) => rows.push(values),
                        None => grouped.push((columns, vec![values])),
                    }
                }
                _ => rest.push(child),
            }
        }
    } else {
        rest.extend(children.iter());
    }

    let mut parts: Vec<String> = Vec::new();
    for (columns, rows) in grouped {
        if rows.len() == 1 {
            // a single tuple gains nothing from IN syntax
            let row = &rows[0];
            let conjuncts: Vec<String> = columns
                .iter()
                .zip(row.iter())
                .map(|(c, v)| {
                    format!(
                        "{} = {}",
                        c.column.expression,
                        dialect.quote_value(v, c.column.datatype)
                    )
                })
                .collect();
            parts.push(format!("({})", conjuncts.join(" AND ")));
            continue;
        }
        let column_exprs: Vec<&str> = columns
            .iter()
            .map(|c| c.column.expression.as_str())
            .collect();
        let tuples: Vec<String> = rows
            .iter()
            .map(|row| {
                let rendered: Vec<String> = columns
                    .iter()
                    .zip(row.iter())
                    .map(|(c, v)| dialect.quote_value(v, c.column.datatype))
                    .collect();
                format!("({})", rendered.join(", "))
            })
            .collect();
        parts.push(format!(
            "({}) IN ({})",
            column_exprs.join(", "),
            tuples.join(", ")
        ));
    }
    for child in rest {
        parts.push(child.to_sql(dialect));
    }
    if parts.len() == 1 {
        parts.pop().unwrap()
    } else {
        format!("({})", parts.join(" OR "))
    }
}

/// Recognize `a = v1 AND b = v2 AND ...` over distinct columns with no null
/// values, returning the columns (ordinal order) and their values.
fn as_value_conjunction(pred: &StarPredicate) -> Option<(Vec<PredicateColumn>, Vec<CellValue>)> {
    let children = match pred {
        StarPredicate::And(children) => children,
        _ => return None,
    };
    let mut pairs: Vec<(PredicateColumn, CellValue)> = Vec::with_capacity(children.len());
    for child in children {
        match child {
            StarPredicate::Column(StarColumnPredicate {
                column,
                constraint: ColumnConstraint::Value(value),
            }) if !value.is_null() => pairs.push((column.clone(), value.clone())),
            _ => return None,
        }
    }
    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    if pairs.windows(2).any(|w| w[0].0 == w[1].0) {
        return None;
    }
    Some(pairs.into_iter().unzip())
}

/// Expand a tuple interval into nested comparisons:
/// lower bound `(v1, v2)` exclusive becomes
/// `(a > v1 OR (a = v1 AND b > v2))`.
fn tuple_to_sql(pred: &MemberTuplePredicate, dialect: &dyn Dialect) -> String {
    let mut interval_parts: Vec<String> = Vec::with_capacity(pred.intervals.len());
    for interval in &pred.intervals {
        let mut sides: Vec<String> = Vec::with_capacity(2);
        if let Some(bound) = &interval.lower {
            sides.push(tuple_bound_sql(&pred.columns, bound, true, dialect));
        }
        if let Some(bound) = &interval.upper {
            sides.push(tuple_bound_sql(&pred.columns, bound, false, dialect));
        }
        match sides.len() {
            0 => interval_parts.push("(1 = 1)".to_string()),
            1 => interval_parts.push(sides.pop().unwrap()),
            _ => interval_parts.push(format!("({})", sides.join(" AND "))),
        }
    }
    if interval_parts.len() == 1 {
        interval_parts.pop().unwrap()
    } else {
        format!("({})", interval_parts.join(" OR "))
    }
}

fn tuple_bound_sql(
    columns: &[PredicateColumn],
    bound: &TupleBound,
    is_lower: bool,
    dialect: &dyn Dialect,
) -> String {
    let strict = if is_lower { ">" } else { "<" };
    let last_op = match (is_lower, bound.inclusive) {
        (true, true) => ">=",
        (true, false) => ">",
        (false, true) => "<=",
        (false, false) => "<",
    };
    let n = bound.values.len();
    let mut alternatives: Vec<String> = Vec::with_capacity(n);
    for depth in 0..n {
        let mut conjuncts: Vec<String> = Vec::with_capacity(depth + 1);
        for (i, value) in bound.values.iter().take(depth + 1).enumerate() {
            let column = &columns[i];
            let op = if i < depth {
                "="
            } else if depth == n - 1 {
                last_op
            } else {
                strict
            };
            conjuncts.push(format!(
                "{} {} {}",
                column.column.expression,
                op,
                dialect.quote_value(value, column.column.datatype)
            ));
        }
        if conjuncts.len() == 1 {
            alternatives.push(conjuncts.pop().unwrap());
        } else {
            alternatives.push(format!("({})", conjuncts.join(" AND ")));
        }
    }
    if alternatives.len() == 1 {
        alternatives.pop().unwrap()
    } else {
        format!("({})", alternatives.join(" OR "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::star::{RowValues, TupleInterval};
    use crate::star::dialect::AnsiDialect;
    use crate::star::StarColumn;
    use crate::value::Datatype;
    use std::sync::Arc;

    fn col(ordinal: usize, name: &str, datatype: Datatype) -> PredicateColumn {
        PredicateColumn::direct(Arc::new(StarColumn::new(ordinal, name, "t", datatype)))
    }

    #[test]
    fn test_value_sql() {
        let p = StarPredicate::value(col(0, "region", Datatype::Str), "CA");
        assert_eq!(p.to_sql(&AnsiDialect), "t.region = 'CA'");
    }

    #[test]
    fn test_list_sql_and_evaluate_agree() {
        let p = StarPredicate::list(
            col(0, "qty", Datatype::Int),
            vec![CellValue::Int(1), CellValue::Int(2), CellValue::Int(3)],
        );
        assert_eq!(p.to_sql(&AnsiDialect), "t.qty IN (1, 2, 3)");
        assert!(p.evaluate(&RowValues::new().with(0, 2i64)));
        assert!(!p.evaluate(&RowValues::new().with(0, 4i64)));
    }

    #[test]
    fn test_list_with_null_renders_is_null_branch() {
        let p = StarPredicate::list(
            col(0, "qty", Datatype::Int),
            vec![CellValue::Int(1), CellValue::Null],
        );
        assert_eq!(p.to_sql(&AnsiDialect), "(t.qty = 1 OR t.qty IS NULL)");
        assert!(p.evaluate(&RowValues::new().with(0, CellValue::Null)));

        let many = StarPredicate::list(
            col(0, "qty", Datatype::Int),
            vec![CellValue::Int(1), CellValue::Int(2), CellValue::Null],
        );
        assert_eq!(many.to_sql(&AnsiDialect), "(t.qty IN (1, 2) OR t.qty IS NULL)");
    }

    #[test]
    fn test_only_null_renders_is_null() {
        let p = StarPredicate::list(col(0, "qty", Datatype::Int), vec![CellValue::Null]);
        assert_eq!(p.to_sql(&AnsiDialect), "t.qty IS NULL");
    }

    #[test]
    fn test_range_sql() {
        let p = StarPredicate::Column(StarColumnPredicate::range(
            col(0, "qty", Datatype::Int),
            Some(Bound::inclusive(10i64)),
            Some(Bound::exclusive(20i64)),
        ));
        assert_eq!(p.to_sql(&AnsiDialect), "(t.qty >= 10 AND t.qty < 20)");
    }

    #[test]
    fn test_minus_sql() {
        let p = StarPredicate::TRUE.minus(StarPredicate::value(col(0, "region", Datatype::Str), "CA"));
        assert_eq!(p.to_sql(&AnsiDialect), "((1 = 1) AND NOT (t.region = 'CA'))");
    }

    #[test]
    fn test_or_of_ands_groups_into_multi_value_in() {
        let a = col(0, "region", Datatype::Str);
        let q = col(1, "quarter", Datatype::Str);
        let p = StarPredicate::value(a.clone(), "CA")
            .and(StarPredicate::value(q.clone(), "Q1"))
            .or(StarPredicate::value(a.clone(), "OR").and(StarPredicate::value(q.clone(), "Q2")));
        assert_eq!(
            p.to_sql(&AnsiDialect),
            "(t.region, t.quarter) IN (('CA', 'Q1'), ('OR', 'Q2'))"
        );
    }

    #[test]
    fn test_null_conjunction_excluded_from_in_grouping() {
        let a = col(0, "region", Datatype::Str);
        let q = col(1, "quarter", Datatype::Str);
        let p = StarPredicate::value(a.clone(), "CA")
            .and(StarPredicate::value(q.clone(), "Q1"))
            .or(StarPredicate::value(a.clone(), "OR").and(StarPredicate::value(q.clone(), "Q2")))
            .or(StarPredicate::value(a.clone(), CellValue::Null)
                .and(StarPredicate::value(q.clone(), "Q3")));
        let sql = p.to_sql(&AnsiDialect);
        assert!(sql.contains("(t.region, t.quarter) IN (('CA', 'Q1'), ('OR', 'Q2'))"));
        assert!(sql.contains("t.region IS NULL"));
        assert!(sql.contains("t.quarter = 'Q3'"));
    }

    #[test]
    fn test_tuple_bound_expansion() {
        let p = StarPredicate::MemberTuple(MemberTuplePredicate::new(
            vec![col(0, "year", Datatype::Int), col(1, "quarter", Datatype::Str)],
            vec![TupleInterval {
                lower: Some(TupleBound {
                    values: vec![CellValue::Int(2005), CellValue::from("Q2")],
                    inclusive: false,
                }),
                upper: None,
            }],
        ));
        assert_eq!(
            p.to_sql(&AnsiDialect),
            "(t.year > 2005 OR (t.year = 2005 AND t.quarter > 'Q2'))"
        );
    }
}
