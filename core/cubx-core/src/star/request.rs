//! Cell requests.
//!
//! The evaluator above this crate turns each cell it needs into a
//! `CellRequest`: which columns are constrained and how, plus any compound
//! predicates spanning columns outside the request's own axes. Requests are
//! the only input to aggregation-key construction.

use crate::bitkey::BitKey;
use crate::predicate::{StarColumnPredicate, StarPredicate};
use crate::star::{Measure, Star};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One cell's constraints, as produced by the query evaluator.
///
/// Column predicates are keyed by ordinal and compound predicates by their
/// constrained-column bitkey; both maps are ordered so that iteration — and
/// everything derived from it, cache keys included — is deterministic.
#[derive(Debug, Clone)]
pub struct CellRequest {
    star: Arc<Star>,
    measure: Measure,
    constrained_columns: BitKey,
    column_predicates: BTreeMap<usize, StarColumnPredicate>,
    compound_predicates: BTreeMap<BitKey, StarPredicate>,
}

impl CellRequest {
    pub fn new(star: Arc<Star>, measure: Measure) -> Self {
        CellRequest {
            star,
            measure,
            constrained_columns: BitKey::empty(),
            column_predicates: BTreeMap::new(),
            compound_predicates: BTreeMap::new(),
        }
    }

    /// Constrain one axis column. A second constraint on the same ordinal
    /// replaces the first.
    pub fn constrain(&mut self, predicate: StarColumnPredicate) {
        self.constrained_columns.set(predicate.ordinal());
        self.column_predicates.insert(predicate.ordinal(), predicate);
    }

    /// Attach a compound predicate (a constraint spanning columns orthogonal
    /// to the request's own axes), keyed by its bitkey.
    pub fn add_compound(&mut self, predicate: StarPredicate) {
        self.compound_predicates
            .insert(predicate.constrained_bitkey(), predicate);
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    pub fn constrained_columns(&self) -> &BitKey {
        &self.constrained_columns
    }

    /// Axis predicates in ascending ordinal order.
    pub fn column_predicates(&self) -> impl Iterator<Item = &StarColumnPredicate> {
        self.column_predicates.values()
    }

    pub fn column_predicate(&self, ordinal: usize) -> Option<&StarColumnPredicate> {
        self.column_predicates.get(&ordinal)
    }

    /// Compound predicates in ascending bitkey order.
    pub fn compound_predicates(&self) -> impl Iterator<Item = &StarPredicate> {
        self.compound_predicates.values()
    }
}
