//! Building, converting and rolling up segments.
//!
//! `SegmentBuilder` turns SQL result rows into bodies, reconstitutes
//! segments from externally cached headers, and — the hard part — combines
//! several same-shape segments into one of lower dimensionality so cached
//! data can answer coarser requests without another trip to the database.

use crate::agg::body::{SegmentAxis, SegmentBody};
use crate::agg::cell::CellKey;
use crate::agg::dataset::{use_sparse, SegmentDataset, MAX_DENSE_CELLS};
use crate::agg::segment::{ConstrainedColumn, Segment, SegmentHeader};
use crate::bitkey::BitKey;
use crate::error::{CubxError, CubxResult};
use crate::predicate::{PredicateColumn, StarColumnPredicate, StarPredicate};
use crate::star::{Aggregator, ColumnStatistics, Measure, Star};
use crate::value::{CellValue, Datatype};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Stateless converter between rows, bodies, headers and segments.
pub struct SegmentBuilder;

impl SegmentBuilder {
    /// Build a body from result rows. Each row carries one value per axis
    /// column (in ascending ordinal order) plus the measure value. The
    /// distinct observed values become the axis value sets; a null axis
    /// value raises that axis's null flag. Storage is chosen from the
    /// resulting cardinalities and density.
    pub fn body_from_rows(
        rows: &[(Vec<CellValue>, CellValue)],
        axis_count: usize,
        datatype: Datatype,
    ) -> CubxResult<SegmentBody> {
        let mut value_sets: Vec<BTreeSet<CellValue>> = vec![BTreeSet::new(); axis_count];
        let mut null_flags = vec![false; axis_count];
        for (coordinates, _) in rows {
            if coordinates.len() != axis_count {
                return Err(CubxError::ShapeMismatch(format!(
                    "row has {} coordinates, segment has {} axes",
                    coordinates.len(),
                    axis_count
                )));
            }
            for (axis, value) in coordinates.iter().enumerate() {
                if value.is_null() {
                    null_flags[axis] = true;
                } else {
                    value_sets[axis].insert(value.clone());
                }
            }
        }
        let axes: Vec<SegmentAxis> = value_sets
            .into_iter()
            .zip(null_flags.iter())
            .map(|(values, &has_null)| SegmentAxis::new(values, has_null))
            .collect();
        let sizes: Vec<usize> = axes.iter().map(|a| a.size()).collect();
        let mut data = SegmentDataset::for_load(datatype, &sizes, rows.len() as u64)?;
        for (coordinates, value) in rows {
            let mut cell = Vec::with_capacity(axis_count);
            for (axis, v) in axes.iter().zip(coordinates.iter()) {
                // every value was observed above, so the ordinal exists
                cell.push(axis.ordinal_of(v).expect("observed value on axis"));
            }
            data.put(&CellKey::new(cell), value.clone())?;
        }
        Ok(SegmentBody::new(axes, data))
    }

    /// Reconstitute a segment from an externally cached header. The caller
    /// supplies the live star and measure objects the header's names refer
    /// to, plus the compound predicates in force (headers carry only their
    /// canonical text).
    pub fn segment_from_header(
        id: u64,
        star: Arc<Star>,
        measure: Measure,
        header: &SegmentHeader,
        compound_predicates: Vec<StarPredicate>,
    ) -> CubxResult<Segment> {
        let mut columns = Vec::with_capacity(header.constrained_columns.len());
        let mut predicates = Vec::with_capacity(header.constrained_columns.len());
        for constrained in &header.constrained_columns {
            let column = star.column(constrained.ordinal).ok_or_else(|| {
                CubxError::ShapeMismatch(format!(
                    "header column ordinal {} unknown to star {}",
                    constrained.ordinal, star.schema_name
                ))
            })?;
            let column = PredicateColumn::direct(Arc::clone(column));
            predicates.push(match &constrained.values {
                None => None,
                Some(values) => Some(StarColumnPredicate::list(
                    column.clone(),
                    values.iter().cloned(),
                )),
            });
            columns.push(column);
        }
        Ok(Segment::new(
            id,
            star,
            columns,
            predicates,
            measure,
            compound_predicates,
        ))
    }

    /// Predicted addressable cell count for a request shape, from column
    /// statistics. `None` when any constrained column has no cardinality
    /// estimate.
    pub fn estimate_cell_count(
        star: &Star,
        constrained_columns: &BitKey,
        statistics: &dyn ColumnStatistics,
    ) -> Option<u64> {
        let mut total: u64 = 1;
        for ordinal in constrained_columns.iter() {
            let column = star.column(ordinal)?;
            total = total.checked_mul(statistics.cardinality(column)?)?;
        }
        Some(total)
    }

    /// Combine segments of identical constrained-column shape into one
    /// segment over `keep` (a strict subset of the source bitkey), applying
    /// `aggregator` to the values projected onto each surviving cell.
    ///
    /// Kept axes take the union of the source value sets — a value present
    /// in any source must survive. When one source constrained an axis and
    /// another left it open, the exact predicate is lost: the output header
    /// reports the observed values instead. Cells contributed twice by
    /// overlapping sources are deduplicated by their full source coordinate
    /// before aggregation.
    pub fn rollup(
        sources: &[(SegmentHeader, SegmentBody)],
        keep: &BitKey,
        aggregator: Aggregator,
        datatype: Datatype,
    ) -> CubxResult<(SegmentHeader, SegmentBody)> {
        if sources.is_empty() {
            return Err(CubxError::ShapeMismatch("rollup of zero segments".into()));
        }
        if aggregator == Aggregator::DistinctCount {
            return Err(CubxError::Unsupported(
                "distinct-count measures cannot be rolled up from cached segments".into(),
            ));
        }
        let source_bitkey = &sources[0].0.constrained_columns_bitkey;
        for (header, _) in sources {
            if header.constrained_columns_bitkey != *source_bitkey {
                return Err(CubxError::ShapeMismatch(format!(
                    "source bitkey {} differs from {}",
                    header.constrained_columns_bitkey, source_bitkey
                )));
            }
            if header.compound_predicates != sources[0].0.compound_predicates {
                return Err(CubxError::ShapeMismatch(
                    "sources disagree on compound predicates".into(),
                ));
            }
        }
        if !source_bitkey.is_superset_of(keep) || keep == source_bitkey {
            return Err(CubxError::ShapeMismatch(format!(
                "rollup target {} is not a strict subset of {}",
                keep, source_bitkey
            )));
        }

        let kept_ordinals: Vec<usize> = keep.iter().collect();
        let mut merged_axes = Vec::with_capacity(kept_ordinals.len());
        let mut header_columns = Vec::with_capacity(kept_ordinals.len());
        for &ordinal in &kept_ordinals {
            merged_axes.push(Self::merge_axis(sources, ordinal)?);
            header_columns.push(Self::merge_header_column(sources, ordinal)?);
        }

        let total: u64 = merged_axes
            .iter()
            .try_fold(1u64, |acc, axis: &SegmentAxis| {
                acc.checked_mul(axis.size() as u64)
            })
            .unwrap_or(u64::MAX);
        if total > MAX_DENSE_CELLS {
            return Err(CubxError::LimitExceeded {
                cells: total,
                max: MAX_DENSE_CELLS,
            });
        }

        // target cell -> (full source coordinate -> contributed value);
        // the inner map is the physical-overlap deduplicator
        let mut groups: HashMap<CellKey, HashMap<Vec<CellValue>, CellValue>> = HashMap::new();
        for (header, body) in sources {
            let source_ordinals: Vec<usize> = header
                .constrained_columns
                .iter()
                .map(|c| c.ordinal)
                .collect();
            for (cell_key, value) in body.cell_values() {
                let values = body.key_to_values(&cell_key)?;
                let labeled: Vec<(usize, &CellValue)> = source_ordinals
                    .iter()
                    .copied()
                    .zip(values.iter())
                    .collect();
                if header
                    .excluded_regions
                    .iter()
                    .any(|region| region.contains(&labeled))
                {
                    continue;
                }
                let mut target = Vec::with_capacity(kept_ordinals.len());
                let mut in_range = true;
                for (axis, &ordinal) in merged_axes.iter().zip(kept_ordinals.iter()) {
                    let value = labeled
                        .iter()
                        .find(|(o, _)| *o == ordinal)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            CubxError::ShapeMismatch(format!(
                                "source segment lacks column ordinal {}",
                                ordinal
                            ))
                        })?;
                    match axis.ordinal_of(value) {
                        Some(o) => target.push(o),
                        None => {
                            // outside the merged range: no target cell
                            // exists for this source cell
                            in_range = false;
                            break;
                        }
                    }
                }
                if !in_range {
                    continue;
                }
                // dedup key: the full coordinate in ordinal order, dropped
                // axes included — the same fact rows land on the same key
                let mut full: Vec<(usize, CellValue)> = source_ordinals
                    .iter()
                    .copied()
                    .zip(values.iter().cloned())
                    .collect();
                full.sort_by_key(|(o, _)| *o);
                let dedup_key: Vec<CellValue> = full.into_iter().map(|(_, v)| v).collect();
                groups
                    .entry(CellKey::new(target))
                    .or_default()
                    .entry(dedup_key)
                    .or_insert(value);
            }
        }

        let sizes: Vec<usize> = merged_axes.iter().map(|a| a.size()).collect();
        let mut data = if use_sparse(total, groups.len() as u64) {
            SegmentDataset::sparse()
        } else {
            match datatype {
                Datatype::Int => SegmentDataset::dense_int(&sizes),
                Datatype::Real => SegmentDataset::dense_real(&sizes),
                Datatype::Str | Datatype::Bool => SegmentDataset::dense_object(&sizes),
            }
        };
        for (cell, contributions) in groups {
            let values: Vec<CellValue> = contributions.into_values().collect();
            data.put(&cell, aggregator.rollup_fold(&values)?)?;
        }

        let first = &sources[0].0;
        let header = SegmentHeader::new(
            &first.schema_name,
            &first.schema_checksum,
            &first.cube_name,
            &first.measure_name,
            &first.fact_table,
            keep.clone(),
            header_columns,
            first.compound_predicates.clone(),
            Vec::new(),
        );
        debug!(
            target: "cubx::agg",
            sources = sources.len(),
            kept = kept_ordinals.len(),
            cells = data.cell_count(),
            "rollup complete"
        );
        Ok((header, SegmentBody::new(merged_axes, data)))
    }

    /// Union of the observed value sets for one kept axis across sources,
    /// with the lost-predicate flag when sources disagree about the axis
    /// being constrained at all.
    fn merge_axis(
        sources: &[(SegmentHeader, SegmentBody)],
        ordinal: usize,
    ) -> CubxResult<SegmentAxis> {
        let mut values: BTreeSet<CellValue> = BTreeSet::new();
        let mut has_null = false;
        let mut saw_wildcard = false;
        let mut saw_constrained = false;
        for (header, body) in sources {
            let axis_index = Self::axis_index(header, ordinal)?;
            let axis = &body.axes()[axis_index];
            values.extend(axis.values().iter().cloned());
            has_null |= axis.has_null();
            match header.constrained_column(ordinal).and_then(|c| c.values.as_ref()) {
                None => saw_wildcard = true,
                Some(_) => saw_constrained = true,
            }
        }
        let axis = SegmentAxis::new(values, has_null);
        if saw_wildcard && saw_constrained {
            Ok(axis.with_lost_predicate())
        } else {
            Ok(axis)
        }
    }

    /// Header descriptor for one kept axis: the union of declared value
    /// lists, the observed values when the exact predicate was lost, or a
    /// wildcard when every source was unconstrained.
    fn merge_header_column(
        sources: &[(SegmentHeader, SegmentBody)],
        ordinal: usize,
    ) -> CubxResult<ConstrainedColumn> {
        let expression = sources[0]
            .0
            .constrained_column(ordinal)
            .map(|c| c.expression.clone())
            .ok_or_else(|| {
                CubxError::ShapeMismatch(format!("no header column for ordinal {}", ordinal))
            })?;
        let mut declared: BTreeSet<CellValue> = BTreeSet::new();
        let mut observed: BTreeSet<CellValue> = BTreeSet::new();
        let mut saw_wildcard = false;
        let mut saw_constrained = false;
        for (header, body) in sources {
            let axis_index = Self::axis_index(header, ordinal)?;
            observed.extend(body.axes()[axis_index].values().iter().cloned());
            match header.constrained_column(ordinal).and_then(|c| c.values.as_ref()) {
                None => saw_wildcard = true,
                Some(values) => {
                    saw_constrained = true;
                    declared.extend(values.iter().cloned());
                }
            }
        }
        Ok(match (saw_wildcard, saw_constrained) {
            (true, false) => ConstrainedColumn::wildcard(expression, ordinal),
            (false, true) => ConstrainedColumn::with_values(expression, ordinal, declared),
            // mixed: the exact constraint is lost; report what was observed
            _ => ConstrainedColumn::with_values(expression, ordinal, observed),
        })
    }

    fn axis_index(header: &SegmentHeader, ordinal: usize) -> CubxResult<usize> {
        header
            .constrained_columns
            .iter()
            .position(|c| c.ordinal == ordinal)
            .ok_or_else(|| {
                CubxError::ShapeMismatch(format!(
                    "ordinal {} not among segment columns",
                    ordinal
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::segment::ExcludedRegion;
    use crate::star::{StarColumn, StarTable};

    fn test_star() -> Arc<Star> {
        let mut star = Star::new("Sales", "abc123", StarTable::new("sales_fact", "sales"));
        star.add_column(StarColumn::new(0, "region", "store", Datatype::Str));
        star.add_column(StarColumn::new(1, "quarter", "time", Datatype::Str));
        Arc::new(star)
    }

    fn measure() -> Measure {
        Measure::new("Unit Sales", "Sales", "sales.units", Aggregator::Sum, Datatype::Int)
    }

    fn region_quarter_segment(
        star: &Arc<Star>,
        id: u64,
        regions: &[&str],
    ) -> (SegmentHeader, SegmentBody) {
        let region = PredicateColumn::direct(Arc::clone(star.column(0).unwrap()));
        let quarter = PredicateColumn::direct(Arc::clone(star.column(1).unwrap()));
        let region_pred = StarColumnPredicate::list(
            region.clone(),
            regions.iter().map(|r| CellValue::from(*r)),
        );
        let segment = Segment::new(
            id,
            Arc::clone(star),
            vec![region, quarter],
            vec![Some(region_pred), None],
            measure(),
            vec![],
        );
        let mut rows = Vec::new();
        for r in regions {
            for q in ["Q1", "Q2"] {
                rows.push((
                    vec![CellValue::from(*r), CellValue::from(q)],
                    CellValue::Int(10),
                ));
            }
        }
        let body = SegmentBuilder::body_from_rows(&rows, 2, Datatype::Int).unwrap();
        (segment.header().clone(), body)
    }

    #[test]
    fn test_body_from_rows_axes_and_values() {
        let rows = vec![
            (vec![CellValue::from("CA"), CellValue::from("Q1")], CellValue::Int(5)),
            (vec![CellValue::from("OR"), CellValue::Null], CellValue::Int(7)),
        ];
        let body = SegmentBuilder::body_from_rows(&rows, 2, Datatype::Int).unwrap();
        assert_eq!(body.axes()[0].values().len(), 2);
        assert!(body.axes()[1].has_null());
        assert_eq!(
            body.get_by_values(&[CellValue::from("OR"), CellValue::Null])
                .unwrap(),
            Some(CellValue::Int(7))
        );
    }

    #[test]
    fn test_rollup_sums_across_dropped_axis() {
        let star = test_star();
        let a = region_quarter_segment(&star, 1, &["CA", "OR"]);
        let b = region_quarter_segment(&star, 2, &["WA"]);
        // drop Region (ordinal 0), keep Quarter (ordinal 1)
        let (header, body) =
            SegmentBuilder::rollup(&[a, b], &BitKey::of([1]), Aggregator::Sum, Datatype::Int)
                .unwrap();
        assert_eq!(header.constrained_columns_bitkey, BitKey::of([1]));
        assert_eq!(body.axes().len(), 1);
        assert_eq!(body.axes()[0].values().len(), 2);
        // CA + OR + WA each contribute 10 per quarter
        assert_eq!(
            body.get_by_values(&[CellValue::from("Q1")]).unwrap(),
            Some(CellValue::Int(30))
        );
        assert_eq!(
            body.get_by_values(&[CellValue::from("Q2")]).unwrap(),
            Some(CellValue::Int(30))
        );
    }

    #[test]
    fn test_rollup_dedupes_overlapping_sources() {
        let star = test_star();
        let a = region_quarter_segment(&star, 1, &["CA", "OR"]);
        // overlapping segment: CA appears in both sources
        let b = region_quarter_segment(&star, 2, &["CA", "WA"]);
        let (_, body) =
            SegmentBuilder::rollup(&[a, b], &BitKey::of([1]), Aggregator::Sum, Datatype::Int)
                .unwrap();
        // CA must count once: CA + OR + WA = 30, not 40
        assert_eq!(
            body.get_by_values(&[CellValue::from("Q1")]).unwrap(),
            Some(CellValue::Int(30))
        );
    }

    #[test]
    fn test_rollup_kept_axis_value_union() {
        let star = test_star();
        let a = region_quarter_segment(&star, 1, &["CA"]);
        let b = region_quarter_segment(&star, 2, &["WA"]);
        // keep Region, drop Quarter: region axis is the union {CA, WA}
        let (header, body) =
            SegmentBuilder::rollup(&[a, b], &BitKey::of([0]), Aggregator::Sum, Datatype::Int)
                .unwrap();
        assert_eq!(
            body.axis_value_sets()[0],
            [CellValue::from("CA"), CellValue::from("WA")]
                .into_iter()
                .collect()
        );
        let column = header.constrained_column(0).unwrap();
        assert_eq!(column.values.as_ref().unwrap().len(), 2);
        assert_eq!(
            body.get_by_values(&[CellValue::from("CA")]).unwrap(),
            Some(CellValue::Int(20))
        );
    }

    #[test]
    fn test_rollup_lost_predicate_on_mixed_wildcard() {
        let star = test_star();
        let region = PredicateColumn::direct(Arc::clone(star.column(0).unwrap()));
        let quarter = PredicateColumn::direct(Arc::clone(star.column(1).unwrap()));
        // one source constrains Region, the other leaves it open
        let constrained = region_quarter_segment(&star, 1, &["CA"]);
        let open_segment = Segment::new(
            2,
            Arc::clone(&star),
            vec![region, quarter],
            vec![None, None],
            measure(),
            vec![],
        );
        let open_rows = vec![(
            vec![CellValue::from("WA"), CellValue::from("Q1")],
            CellValue::Int(10),
        )];
        let open_body = SegmentBuilder::body_from_rows(&open_rows, 2, Datatype::Int).unwrap();
        let (header, body) = SegmentBuilder::rollup(
            &[constrained, (open_segment.header().clone(), open_body)],
            &BitKey::of([0]),
            Aggregator::Sum,
            Datatype::Int,
        )
        .unwrap();
        assert!(body.axes()[0].lost_predicate());
        // header reports observed values, not a reused predicate
        let column = header.constrained_column(0).unwrap();
        assert_eq!(
            column.values.as_ref().unwrap().iter().cloned().collect::<Vec<_>>(),
            vec![CellValue::from("CA"), CellValue::from("WA")]
        );
    }

    #[test]
    fn test_rollup_skips_excluded_source_cells() {
        let star = test_star();
        let (_, body) = region_quarter_segment(&star, 1, &["CA", "OR"]);
        let region = PredicateColumn::direct(Arc::clone(star.column(0).unwrap()));
        let quarter = PredicateColumn::direct(Arc::clone(star.column(1).unwrap()));
        let region_pred = StarColumnPredicate::list(
            region.clone(),
            vec![CellValue::from("CA"), CellValue::from("OR")],
        );
        let flushed = Segment::new(
            1,
            Arc::clone(&star),
            vec![region, quarter],
            vec![Some(region_pred), None],
            measure(),
            vec![],
        )
        .with_excluded_region(ExcludedRegion::new(
            vec![ConstrainedColumn::with_values(
                "store.region",
                0,
                vec![CellValue::from("CA")],
            )],
            2,
        ));
        let (_, rolled) = SegmentBuilder::rollup(
            &[(flushed.header().clone(), body)],
            &BitKey::of([1]),
            Aggregator::Sum,
            Datatype::Int,
        )
        .unwrap();
        // only OR survives: 10 per quarter, the flushed CA cells are gone
        assert_eq!(
            rolled.get_by_values(&[CellValue::from("Q1")]).unwrap(),
            Some(CellValue::Int(10))
        );
    }

    #[test]
    fn test_rollup_rejects_equal_bitkey() {
        let star = test_star();
        let a = region_quarter_segment(&star, 1, &["CA"]);
        let err = SegmentBuilder::rollup(
            &[a],
            &BitKey::of([0, 1]),
            Aggregator::Sum,
            Datatype::Int,
        )
        .unwrap_err();
        assert!(matches!(err, CubxError::ShapeMismatch(_)));
    }

    #[test]
    fn test_rollup_rejects_distinct_count() {
        let star = test_star();
        let a = region_quarter_segment(&star, 1, &["CA"]);
        let err = SegmentBuilder::rollup(
            &[a],
            &BitKey::of([1]),
            Aggregator::DistinctCount,
            Datatype::Int,
        )
        .unwrap_err();
        assert!(matches!(err, CubxError::Unsupported(_)));
    }

    #[test]
    fn test_segment_from_header_roundtrip() {
        let star = test_star();
        let (header, _) = region_quarter_segment(&star, 1, &["CA", "OR"]);
        let rebuilt =
            SegmentBuilder::segment_from_header(9, Arc::clone(&star), measure(), &header, vec![])
                .unwrap();
        assert_eq!(*rebuilt.header(), header);
    }

    #[test]
    fn test_estimate_cell_count() {
        struct FixedStats;
        impl ColumnStatistics for FixedStats {
            fn cardinality(&self, column: &StarColumn) -> Option<u64> {
                match column.ordinal {
                    0 => Some(50),
                    1 => Some(4),
                    _ => None,
                }
            }
        }
        let star = test_star();
        assert_eq!(
            SegmentBuilder::estimate_cell_count(&star, &BitKey::of([0, 1]), &FixedStats),
            Some(200)
        );
        assert_eq!(
            SegmentBuilder::estimate_cell_count(&star, &BitKey::of([0, 5]), &FixedStats),
            None
        );
    }
}
