//! Union roles.
//!
//! A union role combines constituent roles by taking the most permissive
//! access at every granularity. Member resolution in a wide union walks
//! every constituent, so unions of many roles wrap their hierarchy access in
//! a bounded LRU cache keyed by member unique name.

use crate::role::hierarchy::HierarchyAccess;
use crate::role::model::{Cube, Dimension, Hierarchy, Level, Member, OlapSchema};
use crate::role::{Access, Role, RollupPolicy};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Number of constituent roles at which member-access caching kicks in.
const CACHING_ROLE_COUNT: usize = 5;

/// Capacity of the per-hierarchy member-access cache.
const MEMBER_CACHE_CAPACITY: usize = 1_024;

/// The most permissive combination of several roles.
pub struct UnionRole {
    roles: Vec<Arc<dyn Role>>,
}

impl UnionRole {
    pub fn new(roles: Vec<Arc<dyn Role>>) -> Self {
        assert!(!roles.is_empty(), "union of zero roles");
        UnionRole { roles }
    }

    fn max_over<F: Fn(&dyn Role) -> Access>(&self, f: F) -> Access {
        self.roles
            .iter()
            .map(|role| f(role.as_ref()))
            .max()
            .unwrap_or(Access::None)
    }
}

impl Role for UnionRole {
    fn access_for_schema(&self, schema: &OlapSchema) -> Access {
        self.max_over(|role| role.access_for_schema(schema))
    }

    fn access_for_cube(&self, cube: &Cube) -> Access {
        self.max_over(|role| role.access_for_cube(cube))
    }

    fn access_for_dimension(&self, dimension: &Dimension) -> Access {
        self.max_over(|role| role.access_for_dimension(dimension))
    }

    fn access_for_hierarchy(&self, hierarchy: &Arc<Hierarchy>) -> Access {
        self.max_over(|role| role.access_for_hierarchy(hierarchy))
    }

    fn access_for_level(&self, level: &Level) -> Access {
        self.max_over(|role| role.access_for_level(level))
    }

    fn access_for_member(&self, member: &Member) -> Access {
        self.hierarchy_access(member.hierarchy())
            .access_for_member(member)
    }

    fn hierarchy_access(&self, hierarchy: &Arc<Hierarchy>) -> Arc<dyn HierarchyAccess> {
        let union = Arc::new(UnionHierarchyAccess {
            delegates: self
                .roles
                .iter()
                .map(|role| role.hierarchy_access(hierarchy))
                .collect(),
        });
        if self.roles.len() >= CACHING_ROLE_COUNT {
            Arc::new(CachingHierarchyAccess::new(union))
        } else {
            union
        }
    }
}

/// Most-permissive combination of per-hierarchy access objects.
struct UnionHierarchyAccess {
    delegates: Vec<Arc<dyn HierarchyAccess>>,
}

impl HierarchyAccess for UnionHierarchyAccess {
    fn access(&self) -> Access {
        self.delegates
            .iter()
            .map(|d| d.access())
            .max()
            .unwrap_or(Access::None)
    }

    fn access_for_member(&self, member: &Member) -> Access {
        self.delegates
            .iter()
            .map(|d| d.access_for_member(member))
            .max()
            .unwrap_or(Access::None)
    }

    fn top_depth(&self) -> usize {
        self.delegates
            .iter()
            .map(|d| d.top_depth())
            .min()
            .unwrap_or(0)
    }

    fn bottom_depth(&self) -> usize {
        self.delegates
            .iter()
            .map(|d| d.bottom_depth())
            .max()
            .unwrap_or(0)
    }

    fn rollup_policy(&self) -> RollupPolicy {
        self.delegates
            .iter()
            .map(|d| d.rollup_policy())
            .max()
            .unwrap_or(RollupPolicy::Full)
    }
}

/// Decorator memoizing member access in a bounded LRU cache. An explicit
/// cache with a fixed capacity, not a GC-dependent weak map: eviction is
/// deterministic and the memory bound holds under any load.
pub struct CachingHierarchyAccess {
    inner: Arc<dyn HierarchyAccess>,
    members: Mutex<LruCache<String, Access>>,
}

impl CachingHierarchyAccess {
    pub fn new(inner: Arc<dyn HierarchyAccess>) -> Self {
        CachingHierarchyAccess {
            inner,
            members: Mutex::new(LruCache::new(
                NonZeroUsize::new(MEMBER_CACHE_CAPACITY).expect("capacity must be > 0"),
            )),
        }
    }
}

impl HierarchyAccess for CachingHierarchyAccess {
    fn access(&self) -> Access {
        self.inner.access()
    }

    fn access_for_member(&self, member: &Member) -> Access {
        let mut cache = self.members.lock();
        if let Some(access) = cache.get(&member.unique_name) {
            return *access;
        }
        drop(cache);
        let access = self.inner.access_for_member(member);
        self.members.lock().put(member.unique_name.clone(), access);
        access
    }

    fn top_depth(&self) -> usize {
        self.inner.top_depth()
    }

    fn bottom_depth(&self) -> usize {
        self.inner.bottom_depth()
    }

    fn rollup_policy(&self) -> RollupPolicy {
        self.inner.rollup_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::RoleImpl;

    struct Model {
        schema: Arc<OlapSchema>,
        cube: Arc<Cube>,
        dimension: Arc<Dimension>,
        hierarchy: Arc<Hierarchy>,
    }

    fn model() -> Model {
        let schema = OlapSchema::new("FoodMart");
        let cube = Cube::new(Arc::clone(&schema), "Sales", ["Store"]);
        let dimension = Dimension::new(Arc::clone(&cube), "Store");
        let hierarchy = Hierarchy::new(
            Arc::clone(&dimension),
            "Store",
            ["Country", "State", "City"],
        );
        Model {
            schema,
            cube,
            dimension,
            hierarchy,
        }
    }

    fn denying_role(m: &Model) -> Arc<dyn Role> {
        let mut role = RoleImpl::new();
        role.grant_schema(&m.schema, Access::None);
        role.make_immutable();
        Arc::new(role)
    }

    fn granting_role(m: &Model) -> Arc<dyn Role> {
        let mut role = RoleImpl::new();
        role.grant_schema(&m.schema, Access::All);
        role.make_immutable();
        Arc::new(role)
    }

    #[test]
    fn test_union_takes_most_permissive() {
        let m = model();
        let union = UnionRole::new(vec![denying_role(&m), granting_role(&m)]);
        assert_eq!(union.access_for_schema(&m.schema), Access::All);
        assert_eq!(union.access_for_cube(&m.cube), Access::All);
        assert_eq!(union.access_for_dimension(&m.dimension), Access::All);
    }

    #[test]
    fn test_union_member_resolution() {
        let m = model();
        let usa = Member::root(&m.hierarchy, "USA");
        let ca = Member::child(&usa, "CA");

        let mut custom = RoleImpl::new();
        custom.grant_hierarchy(&m.hierarchy, Access::Custom, None, None, RollupPolicy::Full);
        custom.grant_member(&ca, Access::All);
        custom.make_immutable();

        let union = UnionRole::new(vec![denying_role(&m), Arc::new(custom)]);
        assert_eq!(union.access_for_member(&ca), Access::All);
        assert_eq!(union.access_for_member(&usa), Access::Custom);
    }

    #[test]
    fn test_wide_union_caches_member_access() {
        let m = model();
        let usa = Member::root(&m.hierarchy, "USA");
        let mut roles: Vec<Arc<dyn Role>> = Vec::new();
        for _ in 0..4 {
            roles.push(denying_role(&m));
        }
        roles.push(granting_role(&m));
        let union = UnionRole::new(roles);
        let access = union.hierarchy_access(&m.hierarchy);
        // two resolutions, second served from the cache, same answer
        assert_eq!(access.access_for_member(&usa), Access::All);
        assert_eq!(access.access_for_member(&usa), Access::All);
    }

    #[test]
    fn test_union_depth_bounds_widen() {
        let m = model();
        let state = m.hierarchy.level(1);
        let mut narrow = RoleImpl::new();
        narrow.grant_hierarchy(
            &m.hierarchy,
            Access::Custom,
            Some(&state),
            Some(&state),
            RollupPolicy::Hidden,
        );
        narrow.make_immutable();
        let union = UnionRole::new(vec![Arc::new(narrow), granting_role(&m)]);
        let access = union.hierarchy_access(&m.hierarchy);
        assert_eq!(access.top_depth(), 0);
        assert_eq!(access.bottom_depth(), 2);
        assert_eq!(access.rollup_policy(), RollupPolicy::Full);
    }
}
