//! Aggregation keys — the cache's partition identity.
//!
//! An `AggregationKey` names one cache partition: a fact context, the set of
//! constrained columns, and the compound predicates in force. Many keys are
//! constructed per query and compared against every cached segment list, so
//! the hash is memoized on first access and the compound list is pre-sorted
//! by bitkey at construction — the same constraints always produce the same
//! key, byte for byte, in any process.

use crate::bitkey::BitKey;
use crate::predicate::StarPredicate;
use crate::star::request::CellRequest;
use crate::star::Star;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// Identity of one aggregation-cache partition.
#[derive(Debug, Clone)]
pub struct AggregationKey {
    star: Arc<Star>,
    constrained_columns: BitKey,
    compound_predicates: Vec<StarPredicate>,
    hash: OnceLock<u64>,
}

impl AggregationKey {
    /// Build a key. The compound list is sorted by each predicate's own
    /// bitkey so equal constraint sets compare equal regardless of the order
    /// the evaluator discovered them in.
    pub fn new(
        star: Arc<Star>,
        constrained_columns: BitKey,
        mut compound_predicates: Vec<StarPredicate>,
    ) -> Self {
        compound_predicates.sort_by_cached_key(|p| p.constrained_bitkey());
        AggregationKey {
            star,
            constrained_columns,
            compound_predicates,
            hash: OnceLock::new(),
        }
    }

    /// Derive the key for a cell request.
    pub fn from_request(request: &CellRequest) -> Self {
        AggregationKey::new(
            Arc::clone(request.star()),
            request.constrained_columns().clone(),
            request.compound_predicates().cloned().collect(),
        )
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn constrained_columns(&self) -> &BitKey {
        &self.constrained_columns
    }

    pub fn compound_predicates(&self) -> &[StarPredicate] {
        &self.compound_predicates
    }

    /// The memoized hash. Computed once on first access with a fixed-key
    /// hasher; equal keys (under `equal_constraint`) always agree.
    pub fn memoized_hash(&self) -> u64 {
        *self.hash.get_or_init(|| {
            let mut hasher = DefaultHasher::new();
            self.star.schema_name.hash(&mut hasher);
            self.star.schema_checksum.hash(&mut hasher);
            self.star.fact_table.alias.hash(&mut hasher);
            self.constrained_columns.hash(&mut hasher);
            for predicate in &self.compound_predicates {
                predicate.hash(&mut hasher);
            }
            hasher.finish()
        })
    }
}

impl PartialEq for AggregationKey {
    fn eq(&self, other: &Self) -> bool {
        self.star == other.star
            && self.constrained_columns == other.constrained_columns
            && self.compound_predicates.len() == other.compound_predicates.len()
            && self
                .compound_predicates
                .iter()
                .zip(other.compound_predicates.iter())
                .all(|(a, b)| a.equal_constraint(b))
    }
}

impl Eq for AggregationKey {}

impl Hash for AggregationKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.memoized_hash());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::PredicateColumn;
    use crate::star::{StarColumn, StarTable};
    use crate::value::Datatype;

    fn test_star() -> Arc<Star> {
        let mut star = Star::new("Sales", "abc123", StarTable::new("sales_fact", "sales"));
        star.add_column(StarColumn::new(0, "region", "store", Datatype::Str));
        star.add_column(StarColumn::new(1, "quarter", "time", Datatype::Str));
        star.add_column(StarColumn::new(2, "gender", "customer", Datatype::Str));
        Arc::new(star)
    }

    fn pred(star: &Arc<Star>, ordinal: usize, value: &str) -> StarPredicate {
        StarPredicate::value(
            PredicateColumn::direct(Arc::clone(star.column(ordinal).unwrap())),
            value,
        )
    }

    #[test]
    fn test_equal_keys_regardless_of_compound_order() {
        let star = test_star();
        let a = AggregationKey::new(
            Arc::clone(&star),
            BitKey::of([0]),
            vec![pred(&star, 1, "Q1"), pred(&star, 2, "M")],
        );
        let b = AggregationKey::new(
            Arc::clone(&star),
            BitKey::of([0]),
            vec![pred(&star, 2, "M"), pred(&star, 1, "Q1")],
        );
        assert_eq!(a, b);
        assert_eq!(a.memoized_hash(), b.memoized_hash());
    }

    #[test]
    fn test_unequal_on_different_bitkey() {
        let star = test_star();
        let a = AggregationKey::new(Arc::clone(&star), BitKey::of([0]), vec![]);
        let b = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_memoized_and_stable() {
        let star = test_star();
        let key = AggregationKey::new(
            Arc::clone(&star),
            BitKey::of([0, 1]),
            vec![pred(&star, 2, "F")],
        );
        let first = key.memoized_hash();
        assert_eq!(first, key.memoized_hash());
        // a structurally identical key computed independently agrees
        let again = AggregationKey::new(
            Arc::clone(&star),
            BitKey::of([0, 1]),
            vec![pred(&star, 2, "F")],
        );
        assert_eq!(first, again.memoized_hash());
    }

    #[test]
    fn test_from_request() {
        use crate::predicate::StarColumnPredicate;
        let star = test_star();
        let mut request = CellRequest::new(
            Arc::clone(&star),
            crate::star::Measure::new(
                "Unit Sales",
                "Sales",
                "sales.units",
                crate::star::Aggregator::Sum,
                crate::value::Datatype::Int,
            ),
        );
        request.constrain(StarColumnPredicate::value(
            crate::predicate::PredicateColumn::direct(Arc::clone(star.column(0).unwrap())),
            "CA",
        ));
        request.add_compound(pred(&star, 2, "M"));
        request.add_compound(pred(&star, 1, "Q1"));
        let key = AggregationKey::from_request(&request);
        assert_eq!(*key.constrained_columns(), BitKey::of([0]));
        // compound list comes out sorted by bitkey
        assert_eq!(
            key.compound_predicates()
                .iter()
                .map(|p| p.constrained_bitkey())
                .collect::<Vec<_>>(),
            vec![BitKey::of([1]), BitKey::of([2])]
        );
    }

    #[test]
    fn test_usable_as_map_key() {
        use std::collections::HashMap;
        let star = test_star();
        let mut map: HashMap<AggregationKey, u32> = HashMap::new();
        map.insert(
            AggregationKey::new(Arc::clone(&star), BitKey::of([0]), vec![]),
            7,
        );
        let probe = AggregationKey::new(Arc::clone(&star), BitKey::of([0]), vec![]);
        assert_eq!(map.get(&probe), Some(&7));
    }
}
