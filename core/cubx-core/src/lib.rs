//! # CUBX — OLAP Cell Cache and Access Control Engine
//!
//! CUBX is the cell-caching core of an OLAP analytical query system: it
//! stores multidimensional cell values in segments keyed by compound
//! predicates, reconstitutes and combines them to answer related requests,
//! and computes the role-based access rights that decide which members and
//! cells a caller may see.
//!
//! ## Quick start
//!
//! ```rust
//! use cubx_core::agg::{AggregationCache, AggregationKey, Segment, SegmentBuilder};
//! use cubx_core::predicate::{PredicateColumn, StarColumnPredicate};
//! use cubx_core::star::{Aggregator, Measure, Star, StarColumn, StarTable};
//! use cubx_core::value::{CellValue, Datatype};
//! use cubx_core::bitkey::BitKey;
//! use std::sync::Arc;
//!
//! # fn main() -> cubx_core::CubxResult<()> {
//! let mut star = Star::new("Sales", "v1", StarTable::new("sales_fact", "sales"));
//! let region = star.add_column(StarColumn::new(0, "region", "store", Datatype::Str));
//! let star = Arc::new(star);
//! let measure = Measure::new("Units", "Sales", "sales.units", Aggregator::Sum, Datatype::Int);
//!
//! let cache = AggregationCache::new();
//! let key = AggregationKey::new(Arc::clone(&star), BitKey::of([0]), vec![]);
//! let cached = cache.load_or_populate(&key, &measure, |id| {
//!     // the SQL layer would run the rendered predicates here
//!     let column = PredicateColumn::direct(Arc::clone(&region));
//!     let pred = StarColumnPredicate::list(column.clone(), vec![CellValue::from("CA")]);
//!     let segment = Segment::new(id, Arc::clone(&star), vec![column], vec![Some(pred)],
//!         measure.clone(), vec![]);
//!     let rows = vec![(vec![CellValue::from("CA")], CellValue::Int(10))];
//!     let body = SegmentBuilder::body_from_rows(&rows, 1, Datatype::Int)?;
//!     Ok((segment, body))
//! })?;
//! assert_eq!(cached.cell_value(&[CellValue::from("CA")])?, Some(CellValue::Int(10)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! A cell request flows through:
//!
//! ```text
//! CellRequest → AggregationKey → cache probe
//!            → (miss) predicates → SQL (external) → rows → SegmentBody
//!            → rollup to serve coarser shapes
//!            → Role filtering before values reach the caller
//! ```
//!
//! ## Module structure
//!
//! - [`bitkey`] — ordered column-ordinal sets ([`bitkey::BitKey`])
//! - [`value`] — cell/axis values ([`value::CellValue`])
//! - [`star`] — physical star model, dialects, cell requests
//! - [`predicate`] — the predicate algebra and its SQL rendering
//! - [`agg`] — segments, datasets, rollup, the aggregation cache
//! - [`role`] — role-based access control

pub mod agg;
pub mod bitkey;
pub mod error;
pub mod predicate;
pub mod role;
pub mod star;
pub mod value;

// Logging utilities
pub mod logging;

// Re-export commonly used types
pub use agg::{AggregationCache, AggregationKey, Segment, SegmentBody, SegmentHeader};
pub use bitkey::BitKey;
pub use error::{CubxError, CubxResult};
pub use role::{Access, Role, RoleImpl, UnionRole};
pub use value::CellValue;
