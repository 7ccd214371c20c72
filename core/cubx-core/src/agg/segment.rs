//! Segments and their serializable identity.
//!
//! A `Segment` describes one cached hyper-rectangle of cell values: which
//! columns span it, how each axis is constrained, which measure it holds and
//! which compound predicates were in force when it was loaded. Its
//! `SegmentHeader` is derived purely from those immutable fields, so two
//! logically identical segments built in different processes produce equal
//! headers — that is what lets an external cache store match them up.

use crate::agg::key::AggregationKey;
use crate::bitkey::BitKey;
use crate::error::CubxResult;
use crate::predicate::{PredicateColumn, StarColumnPredicate, StarPredicate};
use crate::star::{Measure, Star};
use crate::value::CellValue;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// One constrained column in a header: the column's SQL expression, its
/// ordinal, and the exact value list it was constrained to — `None` when the
/// axis was unconstrained (wildcard) or the exact predicate was lost in a
/// rollup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstrainedColumn {
    pub expression: String,
    pub ordinal: usize,
    pub values: Option<BTreeSet<CellValue>>,
}

impl ConstrainedColumn {
    pub fn wildcard(expression: impl Into<String>, ordinal: usize) -> Self {
        ConstrainedColumn {
            expression: expression.into(),
            ordinal,
            values: None,
        }
    }

    pub fn with_values<I: IntoIterator<Item = CellValue>>(
        expression: impl Into<String>,
        ordinal: usize,
        values: I,
    ) -> Self {
        ConstrainedColumn {
            expression: expression.into(),
            ordinal,
            values: Some(values.into_iter().collect()),
        }
    }
}

/// A sub-rectangle of a segment's coordinate space that must be treated as
/// absent, punched by a cache flush.
///
/// The segment's physical data still holds the flushed values; only this
/// record keeps them from being served. It is never merged away or
/// "simplified" into the axis predicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExcludedRegion {
    /// Per-column excluded values. A coordinate is excluded when every
    /// column listed here matches it.
    pub columns: Vec<ConstrainedColumn>,
    /// Number of cells the flush claimed, for diagnostics.
    pub cell_count: u64,
}

impl ExcludedRegion {
    pub fn new(columns: Vec<ConstrainedColumn>, cell_count: u64) -> Self {
        assert!(!columns.is_empty(), "excluded region requires columns");
        ExcludedRegion {
            columns,
            cell_count,
        }
    }

    /// Whether the coordinate given as `(ordinal, value)` pairs falls inside
    /// this region. Columns of the region absent from the coordinate make
    /// the region inapplicable.
    pub fn contains(&self, coordinates: &[(usize, &CellValue)]) -> bool {
        self.columns.iter().all(|column| {
            match coordinates.iter().find(|(ordinal, _)| *ordinal == column.ordinal) {
                None => false,
                Some((_, value)) => match &column.values {
                    None => true,
                    Some(values) => values.contains(value),
                },
            }
        })
    }
}

/// Serializable identity of a segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentHeader {
    pub schema_name: String,
    pub schema_checksum: String,
    pub cube_name: String,
    pub measure_name: String,
    pub fact_table: String,
    pub constrained_columns_bitkey: BitKey,
    pub constrained_columns: Vec<ConstrainedColumn>,
    /// Canonical textual form of each compound predicate, sorted by bitkey.
    pub compound_predicates: Vec<String>,
    pub excluded_regions: Vec<ExcludedRegion>,
    #[serde(skip)]
    digest: OnceLock<String>,
}

impl SegmentHeader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        schema_name: impl Into<String>,
        schema_checksum: impl Into<String>,
        cube_name: impl Into<String>,
        measure_name: impl Into<String>,
        fact_table: impl Into<String>,
        constrained_columns_bitkey: BitKey,
        constrained_columns: Vec<ConstrainedColumn>,
        compound_predicates: Vec<String>,
        excluded_regions: Vec<ExcludedRegion>,
    ) -> Self {
        SegmentHeader {
            schema_name: schema_name.into(),
            schema_checksum: schema_checksum.into(),
            cube_name: cube_name.into(),
            measure_name: measure_name.into(),
            fact_table: fact_table.into(),
            constrained_columns_bitkey,
            constrained_columns,
            compound_predicates,
            excluded_regions,
            digest: OnceLock::new(),
        }
    }

    /// Stable content digest, usable as an external cache address. Computed
    /// lazily once per header instance.
    pub fn digest(&self) -> &str {
        self.digest.get_or_init(|| {
            let mut hasher = Sha256::new();
            hasher.update(self.schema_name.as_bytes());
            hasher.update(self.schema_checksum.as_bytes());
            hasher.update(self.cube_name.as_bytes());
            hasher.update(self.measure_name.as_bytes());
            hasher.update(self.fact_table.as_bytes());
            hasher.update(self.constrained_columns_bitkey.to_string().as_bytes());
            for column in &self.constrained_columns {
                hasher.update(column.expression.as_bytes());
                match &column.values {
                    None => hasher.update(b"*"),
                    Some(values) => {
                        for value in values {
                            hasher.update(value.to_string().as_bytes());
                            hasher.update(b"\x1f");
                        }
                    }
                }
            }
            for predicate in &self.compound_predicates {
                hasher.update(predicate.as_bytes());
            }
            for region in &self.excluded_regions {
                for column in &region.columns {
                    hasher.update(column.expression.as_bytes());
                }
            }
            let digest = hasher.finalize();
            let mut out = String::with_capacity(64);
            for byte in digest {
                out.push_str(&format!("{:02x}", byte));
            }
            out
        })
    }

    /// Whether a segment carrying this header can serve a request described
    /// by `other`. Identity fields must match and the constrained-column
    /// bitkeys must be **equal** — no finer value-list containment reasoning
    /// is attempted; callers that need exactness compare headers fully.
    pub fn is_subset_of(&self, other: &SegmentHeader) -> bool {
        self.schema_name == other.schema_name
            && self.schema_checksum == other.schema_checksum
            && self.fact_table == other.fact_table
            && self.measure_name == other.measure_name
            && self.cube_name == other.cube_name
            && self.constrained_columns_bitkey == other.constrained_columns_bitkey
    }

    pub fn constrained_column(&self, ordinal: usize) -> Option<&ConstrainedColumn> {
        self.constrained_columns
            .iter()
            .find(|c| c.ordinal == ordinal)
    }

    /// Serialize for an external cache store.
    pub fn to_bytes(&self) -> CubxResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> CubxResult<SegmentHeader> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl PartialEq for SegmentHeader {
    fn eq(&self, other: &Self) -> bool {
        self.schema_name == other.schema_name
            && self.schema_checksum == other.schema_checksum
            && self.cube_name == other.cube_name
            && self.measure_name == other.measure_name
            && self.fact_table == other.fact_table
            && self.constrained_columns_bitkey == other.constrained_columns_bitkey
            && self.constrained_columns == other.constrained_columns
            && self.compound_predicates == other.compound_predicates
            && self.excluded_regions == other.excluded_regions
    }
}

impl Eq for SegmentHeader {}

impl Hash for SegmentHeader {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema_name.hash(state);
        self.schema_checksum.hash(state);
        self.cube_name.hash(state);
        self.measure_name.hash(state);
        self.fact_table.hash(state);
        self.constrained_columns_bitkey.hash(state);
        self.constrained_columns.hash(state);
        self.compound_predicates.hash(state);
        self.excluded_regions.hash(state);
    }
}

impl fmt::Display for SegmentHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}/{} over {}",
            self.schema_name, self.cube_name, self.measure_name, self.constrained_columns_bitkey
        )
    }
}

/// The logical description of one cached hyper-rectangle of cells.
#[derive(Debug, Clone)]
pub struct Segment {
    id: u64,
    star: Arc<Star>,
    constrained_columns: BitKey,
    columns: Vec<PredicateColumn>,
    /// One predicate per column, same order as `columns`; `None` is an
    /// unconstrained (wildcard) axis.
    predicates: Vec<Option<StarColumnPredicate>>,
    measure: Measure,
    compound_predicates: Vec<StarPredicate>,
    excluded_regions: Vec<ExcludedRegion>,
    header: SegmentHeader,
    /// Memoized hash over the aggregation-key-relevant fields, computed at
    /// construction; `matches` compares it before anything else.
    key_hash: u64,
}

impl Segment {
    pub fn new(
        id: u64,
        star: Arc<Star>,
        columns: Vec<PredicateColumn>,
        predicates: Vec<Option<StarColumnPredicate>>,
        measure: Measure,
        compound_predicates: Vec<StarPredicate>,
    ) -> Self {
        assert_eq!(
            predicates.len(),
            columns.len(),
            "one predicate slot per segment column"
        );
        for (column, predicate) in columns.iter().zip(predicates.iter()) {
            if let Some(p) = predicate {
                assert_eq!(
                    p.column, *column,
                    "predicate constrains a column other than its axis"
                );
            }
        }
        let mut compound_predicates = compound_predicates;
        compound_predicates.sort_by_cached_key(|p| p.constrained_bitkey());
        let constrained_columns: BitKey = columns.iter().map(|c| c.ordinal()).collect();
        let header = Self::build_header(
            &star,
            &constrained_columns,
            &columns,
            &predicates,
            &measure,
            &compound_predicates,
            &[],
        );
        let key_hash = Self::compute_key_hash(&star, &constrained_columns, &compound_predicates);
        Segment {
            id,
            star,
            constrained_columns,
            columns,
            predicates,
            measure,
            compound_predicates,
            excluded_regions: Vec::new(),
            header,
            key_hash,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_header(
        star: &Star,
        bitkey: &BitKey,
        columns: &[PredicateColumn],
        predicates: &[Option<StarColumnPredicate>],
        measure: &Measure,
        compound_predicates: &[StarPredicate],
        excluded_regions: &[ExcludedRegion],
    ) -> SegmentHeader {
        let constrained: Vec<ConstrainedColumn> = columns
            .iter()
            .zip(predicates.iter())
            .map(|(column, predicate)| match predicate {
                None => {
                    ConstrainedColumn::wildcard(&column.column.expression, column.ordinal())
                }
                Some(p) => match p.value_enumeration() {
                    Some(values) => ConstrainedColumn::with_values(
                        &column.column.expression,
                        column.ordinal(),
                        values,
                    ),
                    // ranges carry no exact value list; the header reports
                    // the axis as open and the body's value set governs
                    None => ConstrainedColumn::wildcard(
                        &column.column.expression,
                        column.ordinal(),
                    ),
                },
            })
            .collect();
        SegmentHeader::new(
            &star.schema_name,
            &star.schema_checksum,
            &measure.cube,
            &measure.name,
            &star.fact_table.alias,
            bitkey.clone(),
            constrained,
            compound_predicates.iter().map(|p| p.to_string()).collect(),
            excluded_regions.to_vec(),
        )
    }

    fn compute_key_hash(star: &Star, bitkey: &BitKey, compound: &[StarPredicate]) -> u64 {
        let mut hasher = DefaultHasher::new();
        star.schema_name.hash(&mut hasher);
        star.schema_checksum.hash(&mut hasher);
        star.fact_table.alias.hash(&mut hasher);
        bitkey.hash(&mut hasher);
        for predicate in compound {
            predicate.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Whether this segment answers requests for the given key and measure.
    ///
    /// The memoized hash comparison runs first; the full structural check
    /// only happens on a hash match. Keys are probed against every segment
    /// in a cache bucket, so the cheap rejection is what keeps probing flat.
    pub fn matches(&self, key: &AggregationKey, measure: &Measure) -> bool {
        if self.key_hash != key.memoized_hash() {
            return false;
        }
        *self.star == **key.star()
            && self.constrained_columns == *key.constrained_columns()
            && self.compound_predicates.len() == key.compound_predicates().len()
            && self
                .compound_predicates
                .iter()
                .zip(key.compound_predicates().iter())
                .all(|(a, b)| a.equal_constraint(b))
            && self.measure == *measure
    }

    /// Whether the coordinate given as `(ordinal, value)` pairs falls in any
    /// excluded region. Checked before any physically present value is
    /// served; the list is expected to stay short, so a linear scan is fine.
    pub fn is_excluded(&self, coordinates: &[(usize, &CellValue)]) -> bool {
        self.excluded_regions
            .iter()
            .any(|region| region.contains(coordinates))
    }

    /// Copy-on-write flush: a new segment with one more excluded region and
    /// a header that reflects it. The original stays untouched for readers
    /// already holding it.
    pub fn with_excluded_region(&self, region: ExcludedRegion) -> Segment {
        let mut excluded_regions = self.excluded_regions.clone();
        excluded_regions.push(region);
        let header = Self::build_header(
            &self.star,
            &self.constrained_columns,
            &self.columns,
            &self.predicates,
            &self.measure,
            &self.compound_predicates,
            &excluded_regions,
        );
        Segment {
            id: self.id,
            star: Arc::clone(&self.star),
            constrained_columns: self.constrained_columns.clone(),
            columns: self.columns.clone(),
            predicates: self.predicates.clone(),
            measure: self.measure.clone(),
            compound_predicates: self.compound_predicates.clone(),
            excluded_regions,
            header,
            key_hash: self.key_hash,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn star(&self) -> &Arc<Star> {
        &self.star
    }

    pub fn constrained_columns(&self) -> &BitKey {
        &self.constrained_columns
    }

    pub fn columns(&self) -> &[PredicateColumn] {
        &self.columns
    }

    pub fn predicates(&self) -> &[Option<StarColumnPredicate>] {
        &self.predicates
    }

    pub fn measure(&self) -> &Measure {
        &self.measure
    }

    pub fn compound_predicates(&self) -> &[StarPredicate] {
        &self.compound_predicates
    }

    pub fn excluded_regions(&self) -> &[ExcludedRegion] {
        &self.excluded_regions
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment #{} {}", self.id, self.header)
    }
}
