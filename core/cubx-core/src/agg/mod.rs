//! The segment/aggregation cache.
//!
//! A cell request becomes an [`key::AggregationKey`]; the
//! [`cache::AggregationCache`] is probed; on a miss the predicates are
//! rendered to SQL by the layer above and the result rows become a
//! [`body::SegmentBody`] via [`builder::SegmentBuilder`]. Cached segments can
//! be rolled up to lower dimensionality to serve related requests, and cache
//! flushes punch excluded regions instead of rewriting value arrays.

pub mod body;
pub mod builder;
pub mod cache;
pub mod cell;
pub mod dataset;
pub mod key;
pub mod segment;

pub use body::{SegmentAxis, SegmentBody};
pub use builder::SegmentBuilder;
pub use cache::{AggregationCache, CacheStats, CachedSegment};
pub use cell::CellKey;
pub use dataset::{use_sparse, SegmentDataset};
pub use key::AggregationKey;
pub use segment::{ConstrainedColumn, ExcludedRegion, Segment, SegmentHeader};
