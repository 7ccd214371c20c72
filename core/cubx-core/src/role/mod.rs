//! Role-based access control.
//!
//! A role computes effective access for schema, cube, dimension, hierarchy,
//! level and member, with inheritance from broader scopes, member-level
//! overrides inside custom hierarchies, and a one-way mutable→immutable
//! lifecycle. [`grant::RoleImpl`] is the grant store; [`union::UnionRole`]
//! combines roles most-permissively.

pub mod grant;
pub mod hierarchy;
pub mod model;
pub mod union;

pub use grant::RoleImpl;
pub use hierarchy::HierarchyAccess;
pub use model::{Cube, Dimension, Hierarchy, Level, Member, OlapSchema};
pub use union::UnionRole;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Effective access to one element. Variants are declared least to most
/// permissive, so `max` over the derived order is "most permissive wins".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Access {
    /// No access.
    None,
    /// Partial access, defined by finer-grained grants.
    Custom,
    /// Access to all dimensions of a cube (schema-level grant only).
    AllDimensions,
    /// Full access.
    All,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Access::None => "none",
            Access::Custom => "custom",
            Access::AllDimensions => "all_dimensions",
            Access::All => "all",
        };
        f.write_str(s)
    }
}

/// How cells above a partially visible hierarchy roll up. Declared least to
/// most permissive for union combination.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum RollupPolicy {
    /// Totals ignore inaccessible members entirely.
    Hidden,
    /// Totals cover accessible members only.
    Partial,
    /// Totals cover all members, visible or not.
    Full,
}

/// Any element access control can be asked about.
#[derive(Debug, Clone)]
pub enum Element {
    Schema(Arc<OlapSchema>),
    Cube(Arc<Cube>),
    Dimension(Arc<Dimension>),
    Hierarchy(Arc<Hierarchy>),
    Level(Level),
    Member(Arc<Member>),
}

/// The access-control surface consumed by the evaluator and schema readers.
pub trait Role: Send + Sync {
    fn access_for_schema(&self, schema: &OlapSchema) -> Access;
    fn access_for_cube(&self, cube: &Cube) -> Access;
    fn access_for_dimension(&self, dimension: &Dimension) -> Access;
    fn access_for_hierarchy(&self, hierarchy: &Arc<Hierarchy>) -> Access;
    fn access_for_level(&self, level: &Level) -> Access;
    fn access_for_member(&self, member: &Member) -> Access;

    /// Detailed access for one hierarchy (depth bounds, rollup policy,
    /// member resolution).
    fn hierarchy_access(&self, hierarchy: &Arc<Hierarchy>) -> Arc<dyn HierarchyAccess>;

    /// Whether the element is visible at all.
    fn can_access(&self, element: &Element) -> bool {
        let access = match element {
            Element::Schema(s) => self.access_for_schema(s),
            Element::Cube(c) => self.access_for_cube(c),
            Element::Dimension(d) => self.access_for_dimension(d),
            Element::Hierarchy(h) => self.access_for_hierarchy(h),
            Element::Level(l) => self.access_for_level(l),
            Element::Member(m) => self.access_for_member(m),
        };
        access != Access::None
    }
}
