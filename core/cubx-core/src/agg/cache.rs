//! The shared aggregation cache.
//!
//! Query threads probe concurrently; population for any given key is
//! single-flighted so identical concurrent requests execute the backing SQL
//! once. Published segments are immutable — flushes replace them wholesale —
//! and a failed or cancelled population leaves no entry behind, so the next
//! request simply retries.

use crate::agg::body::SegmentBody;
use crate::agg::key::AggregationKey;
use crate::agg::segment::{ExcludedRegion, Segment};
use crate::error::{CubxError, CubxResult};
use crate::star::Measure;
use crate::value::CellValue;
use ahash::AHashMap;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A published segment with its value storage.
#[derive(Debug, Clone)]
pub struct CachedSegment {
    pub segment: Arc<Segment>,
    pub body: Arc<SegmentBody>,
}

impl CachedSegment {
    /// Read one cell by axis values. Excluded regions are consulted before
    /// the body: a flushed coordinate reads as absent even though the
    /// physical array still holds its old value.
    pub fn cell_value(&self, values: &[CellValue]) -> CubxResult<Option<CellValue>> {
        let coordinates: Vec<(usize, &CellValue)> = self
            .segment
            .columns()
            .iter()
            .map(|c| c.ordinal())
            .zip(values.iter())
            .collect();
        if self.segment.is_excluded(&coordinates) {
            return Ok(None);
        }
        self.body.get_by_values(values)
    }
}

enum FlightState {
    Pending,
    Done(CachedSegment),
    Failed(String),
}

struct Flight {
    state: Mutex<FlightState>,
    cv: Condvar,
}

impl Flight {
    fn new() -> Self {
        Flight {
            state: Mutex::new(FlightState::Pending),
            cv: Condvar::new(),
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_ratio: f64,
}

/// Concurrent segment index keyed by aggregation key.
///
/// Multiple segments may share one key when they differ by excluded regions
/// or value-set exactness while agreeing on star, bitkey and compound
/// predicates.
pub struct AggregationCache {
    segments: DashMap<AggregationKey, Vec<CachedSegment>>,
    inflight: Mutex<AHashMap<AggregationKey, Arc<Flight>>>,
    next_segment_id: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
}

impl AggregationCache {
    pub fn new() -> Self {
        AggregationCache {
            segments: DashMap::new(),
            inflight: Mutex::new(AHashMap::new()),
            next_segment_id: AtomicU64::new(1),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
        }
    }

    /// Next id for a segment owned by this cache. Ids are per-cache, not
    /// global, so independent caches in one process never collide in logs.
    pub fn next_segment_id(&self) -> u64 {
        self.next_segment_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Look up a segment answering `key` for `measure`.
    pub fn probe(&self, key: &AggregationKey, measure: &Measure) -> Option<CachedSegment> {
        let found = self.segments.get(key).and_then(|entry| {
            entry
                .iter()
                .find(|cached| cached.segment.matches(key, measure))
                .cloned()
        });
        match &found {
            Some(cached) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cubx::cache", segment = %cached.segment, "cache hit");
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                debug!(target: "cubx::cache", key = %key.constrained_columns(), "cache miss");
            }
        }
        found
    }

    /// Register a pre-built segment (a rollup result, or one restored from
    /// an external store) under its key.
    pub fn publish(&self, key: AggregationKey, segment: Segment, body: SegmentBody) -> CachedSegment {
        let cached = CachedSegment {
            segment: Arc::new(segment),
            body: Arc::new(body),
        };
        self.segments.entry(key).or_default().push(cached.clone());
        cached
    }

    /// Probe, and on a miss populate via `loader`, which receives a fresh
    /// segment id and typically renders predicates to SQL and executes it.
    ///
    /// At most one loader runs per key; concurrent callers for the same key
    /// block and receive the published segment. If the loader fails (or the
    /// execution layer cancels it), waiters get [`CubxError::PopulationFailed`]
    /// and the in-flight slot is cleared so a later request can retry.
    pub fn load_or_populate<F>(
        &self,
        key: &AggregationKey,
        measure: &Measure,
        loader: F,
    ) -> CubxResult<CachedSegment>
    where
        F: FnOnce(u64) -> CubxResult<(Segment, SegmentBody)>,
    {
        if let Some(cached) = self.probe(key, measure) {
            return Ok(cached);
        }
        let (flight, is_owner) = {
            let mut inflight = self.inflight.lock();
            match inflight.get(key) {
                Some(flight) => (Arc::clone(flight), false),
                None => {
                    let flight = Arc::new(Flight::new());
                    inflight.insert(key.clone(), Arc::clone(&flight));
                    (flight, true)
                }
            }
        };

        if !is_owner {
            let mut state = flight.state.lock();
            while matches!(*state, FlightState::Pending) {
                flight.cv.wait(&mut state);
            }
            return match &*state {
                FlightState::Done(cached) => Ok(cached.clone()),
                FlightState::Failed(message) => Err(CubxError::PopulationFailed(message.clone())),
                FlightState::Pending => unreachable!(),
            };
        }

        // owner path: run the loader, publish or clear, wake the waiters.
        // The guard marks the flight failed even if the loader panics, so a
        // poisoned population can never wedge the key.
        let mut guard = FlightGuard {
            cache: self,
            key,
            flight: &flight,
            finished: false,
        };
        let id = self.next_segment_id();
        let result = loader(id);
        match result {
            Ok((segment, body)) => {
                let cached = self.publish(key.clone(), segment, body);
                guard.finish(FlightState::Done(cached.clone()));
                info!(target: "cubx::cache", segment = %cached.segment, "segment populated");
                Ok(cached)
            }
            Err(err) => {
                guard.finish(FlightState::Failed(err.to_string()));
                Err(err)
            }
        }
    }

    /// Punch an excluded region into every segment it intersects. Segments
    /// are immutable, so each affected one is replaced by a copy carrying
    /// the region; readers holding the old `Arc` keep a consistent view.
    /// Returns the number of segments flushed.
    pub fn flush(&self, region: &ExcludedRegion) -> usize {
        let mut flushed = 0;
        for mut entry in self.segments.iter_mut() {
            for cached in entry.value_mut().iter_mut() {
                let applies = region
                    .columns
                    .iter()
                    .all(|column| cached.segment.constrained_columns().get(column.ordinal));
                if applies {
                    cached.segment = Arc::new(cached.segment.with_excluded_region(region.clone()));
                    flushed += 1;
                }
            }
        }
        info!(target: "cubx::cache", segments = flushed, "flush applied");
        flushed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hit_count.load(Ordering::Relaxed);
        let misses = self.miss_count.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Total number of cached segments across all keys.
    pub fn segment_count(&self) -> usize {
        self.segments.iter().map(|entry| entry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn clear(&self) {
        self.segments.clear();
        self.hit_count.store(0, Ordering::Relaxed);
        self.miss_count.store(0, Ordering::Relaxed);
    }
}

impl Default for AggregationCache {
    fn default() -> Self {
        AggregationCache::new()
    }
}

struct FlightGuard<'a> {
    cache: &'a AggregationCache,
    key: &'a AggregationKey,
    flight: &'a Arc<Flight>,
    finished: bool,
}

impl FlightGuard<'_> {
    fn finish(&mut self, outcome: FlightState) {
        *self.flight.state.lock() = outcome;
        self.cache.inflight.lock().remove(self.key);
        self.flight.cv.notify_all();
        self.finished = true;
    }
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.finish(FlightState::Failed("population aborted".to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agg::builder::SegmentBuilder;
    use crate::bitkey::BitKey;
    use crate::predicate::{PredicateColumn, StarColumnPredicate};
    use crate::star::{Aggregator, Star, StarColumn, StarTable};
    use crate::value::Datatype;
    use std::sync::atomic::AtomicUsize;

    fn test_star() -> Arc<Star> {
        let mut star = Star::new("Sales", "abc123", StarTable::new("sales_fact", "sales"));
        star.add_column(StarColumn::new(0, "region", "store", Datatype::Str));
        star.add_column(StarColumn::new(1, "quarter", "time", Datatype::Str));
        Arc::new(star)
    }

    fn measure() -> Measure {
        Measure::new("Unit Sales", "Sales", "sales.units", Aggregator::Sum, Datatype::Int)
    }

    fn load(star: &Arc<Star>, id: u64) -> (Segment, SegmentBody) {
        let region = PredicateColumn::direct(Arc::clone(star.column(0).unwrap()));
        let quarter = PredicateColumn::direct(Arc::clone(star.column(1).unwrap()));
        let region_pred = StarColumnPredicate::list(
            region.clone(),
            vec![CellValue::from("CA"), CellValue::from("OR")],
        );
        let segment = Segment::new(
            id,
            Arc::clone(star),
            vec![region, quarter],
            vec![Some(region_pred), None],
            measure(),
            vec![],
        );
        let rows = vec![
            (vec![CellValue::from("CA"), CellValue::from("Q1")], CellValue::Int(10)),
            (vec![CellValue::from("OR"), CellValue::from("Q1")], CellValue::Int(20)),
        ];
        let body = SegmentBuilder::body_from_rows(&rows, 2, Datatype::Int).unwrap();
        (segment, body)
    }

    #[test]
    fn test_populate_then_hit() {
        let star = test_star();
        let cache = AggregationCache::new();
        let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        let cached = cache
            .load_or_populate(&key, &measure(), |id| Ok(load(&star, id)))
            .unwrap();
        assert_eq!(
            cached
                .cell_value(&[CellValue::from("CA"), CellValue::from("Q1")])
                .unwrap(),
            Some(CellValue::Int(10))
        );
        assert!(cache.probe(&key, &measure()).is_some());
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        // the initial load_or_populate probed and missed
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_single_flight_runs_loader_once() {
        let star = test_star();
        let cache = Arc::new(AggregationCache::new());
        let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        let runs = Arc::new(AtomicUsize::new(0));

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let cache = Arc::clone(&cache);
                let key = key.clone();
                let star = Arc::clone(&star);
                let runs = Arc::clone(&runs);
                scope.spawn(move || {
                    let cached = cache
                        .load_or_populate(&key, &measure(), |id| {
                            runs.fetch_add(1, Ordering::SeqCst);
                            // keep the flight open long enough for the
                            // other threads to pile up behind it
                            std::thread::sleep(std::time::Duration::from_millis(20));
                            Ok(load(&star, id))
                        })
                        .unwrap();
                    assert!(cached
                        .cell_value(&[CellValue::from("OR"), CellValue::from("Q1")])
                        .unwrap()
                        .is_some());
                });
            }
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cache.segment_count(), 1);
    }

    #[test]
    fn test_failed_population_allows_retry() {
        let star = test_star();
        let cache = AggregationCache::new();
        let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        let err = cache
            .load_or_populate(&key, &measure(), |_| {
                Err(CubxError::PopulationFailed("sql cancelled".to_string()))
            })
            .unwrap_err();
        assert!(matches!(err, CubxError::PopulationFailed(_)));
        assert!(cache.is_empty());
        // no stuck in-flight entry: the retry succeeds
        let cached = cache
            .load_or_populate(&key, &measure(), |id| Ok(load(&star, id)))
            .unwrap();
        assert_eq!(cached.segment.id(), 2);
    }

    #[test]
    fn test_flush_masks_cells_without_touching_data() {
        use crate::agg::segment::ConstrainedColumn;
        let star = test_star();
        let cache = AggregationCache::new();
        let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        cache
            .load_or_populate(&key, &measure(), |id| Ok(load(&star, id)))
            .unwrap();
        let flushed = cache.flush(&ExcludedRegion::new(
            vec![ConstrainedColumn::with_values(
                "store.region",
                0,
                vec![CellValue::from("CA")],
            )],
            2,
        ));
        assert_eq!(flushed, 1);
        let cached = cache.probe(&key, &measure()).unwrap();
        // flushed coordinate reads absent; the sibling survives
        assert_eq!(
            cached
                .cell_value(&[CellValue::from("CA"), CellValue::from("Q1")])
                .unwrap(),
            None
        );
        assert_eq!(
            cached
                .cell_value(&[CellValue::from("OR"), CellValue::from("Q1")])
                .unwrap(),
            Some(CellValue::Int(20))
        );
        // the physical body still holds the number
        assert_eq!(
            cached
                .body
                .get_by_values(&[CellValue::from("CA"), CellValue::from("Q1")])
                .unwrap(),
            Some(CellValue::Int(10))
        );
    }

    #[test]
    fn test_publish_registers_segment() {
        let star = test_star();
        let cache = AggregationCache::new();
        let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0, 1]), vec![]);
        let (segment, body) = load(&star, cache.next_segment_id());
        cache.publish(key.clone(), segment, body);
        assert!(cache.probe(&key, &measure()).is_some());
    }
}
