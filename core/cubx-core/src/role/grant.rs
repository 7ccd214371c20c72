//! The mutable grant store and its precedence chains.
//!
//! A `RoleImpl` collects grants at four granularities — schema, cube,
//! dimension, hierarchy (with member overrides inside custom hierarchies) —
//! and resolves effective access by a fixed chain: explicit grant at the
//! level asked about, then inheritance from the next broader scope, then
//! denial. Roles are mutable until [`RoleImpl::make_immutable`]; after that
//! every grant call panics and only cloning yields a mutable role again.

use crate::role::hierarchy::{DerivedHierarchyAccess, HierarchyAccess, HierarchyGrant};
use crate::role::model::{Cube, Dimension, Hierarchy, Level, Member, OlapSchema};
use crate::role::{Access, Role, RollupPolicy};
use ahash::AHashMap;
use std::sync::Arc;

/// A role built from explicit grants.
#[derive(Debug, Clone, Default)]
pub struct RoleImpl {
    schema_grants: AHashMap<String, Access>,
    cube_grants: AHashMap<String, Access>,
    dimension_grants: AHashMap<String, Access>,
    hierarchy_grants: AHashMap<String, HierarchyGrant>,
    immutable: bool,
}

impl RoleImpl {
    pub fn new() -> Self {
        RoleImpl::default()
    }

    fn assert_mutable(&self) {
        assert!(
            !self.immutable,
            "role is immutable; use make_mutable_clone to modify"
        );
    }

    /// Freeze the role. One-way: all grant methods panic afterwards, reads
    /// keep working on the frozen state.
    pub fn make_immutable(&mut self) {
        self.immutable = true;
    }

    pub fn is_immutable(&self) -> bool {
        self.immutable
    }

    /// The only way to get a mutable role from a frozen one.
    pub fn make_mutable_clone(&self) -> RoleImpl {
        let mut clone = self.clone();
        clone.immutable = false;
        clone
    }

    /// Grant access to a schema. Valid accesses: `All`, `AllDimensions`,
    /// `None`.
    pub fn grant_schema(&mut self, schema: &OlapSchema, access: Access) {
        self.assert_mutable();
        assert!(
            matches!(access, Access::All | Access::AllDimensions | Access::None),
            "invalid schema access {access}"
        );
        self.schema_grants.insert(schema.name.clone(), access);
    }

    /// Grant access to a cube. Valid accesses: `All`, `None`.
    pub fn grant_cube(&mut self, cube: &Cube, access: Access) {
        self.assert_mutable();
        assert!(
            matches!(access, Access::All | Access::None),
            "invalid cube access {access}"
        );
        self.cube_grants.insert(cube.name.clone(), access);
    }

    /// Grant access to a dimension. Valid accesses: `All`, `Custom`, `None`.
    pub fn grant_dimension(&mut self, dimension: &Dimension, access: Access) {
        self.assert_mutable();
        assert!(
            matches!(access, Access::All | Access::Custom | Access::None),
            "invalid dimension access {access}"
        );
        self.dimension_grants
            .insert(dimension.unique_name(), access);
    }

    /// Grant access to a hierarchy, optionally restricted to the depth range
    /// `[top_level, bottom_level]`. Level bounds are only meaningful for
    /// `Custom` access; supplying them with any other access is a
    /// programmer error.
    pub fn grant_hierarchy(
        &mut self,
        hierarchy: &Arc<Hierarchy>,
        access: Access,
        top_level: Option<&Level>,
        bottom_level: Option<&Level>,
        rollup_policy: RollupPolicy,
    ) {
        self.assert_mutable();
        assert!(
            matches!(access, Access::All | Access::Custom | Access::None),
            "invalid hierarchy access {access}"
        );
        assert!(
            access == Access::Custom || (top_level.is_none() && bottom_level.is_none()),
            "level bounds require custom access"
        );
        let top_depth = top_level.map_or(0, |l| l.depth);
        let bottom_depth = bottom_level.map_or(hierarchy.bottom_depth(), |l| l.depth);
        self.hierarchy_grants.insert(
            hierarchy.unique_name(),
            HierarchyGrant::new(
                Arc::clone(hierarchy),
                access,
                top_depth,
                bottom_depth,
                rollup_policy,
            ),
        );
    }

    /// Grant or deny one member. The owning hierarchy must already carry an
    /// explicit grant; member grants are only meaningful under `Custom`
    /// access, so a permissive member grant upgrades a `None` hierarchy to
    /// `Custom` and any other non-custom hierarchy grant is a programmer
    /// error. Later grants supersede earlier grants on their descendants —
    /// except explicit denials, which survive until re-granted directly.
    pub fn grant_member(&mut self, member: &Arc<Member>, access: Access) {
        self.assert_mutable();
        assert!(
            matches!(access, Access::All | Access::None),
            "invalid member access {access}"
        );
        let hierarchy_name = member.hierarchy().unique_name();
        let grant = self
            .hierarchy_grants
            .get_mut(&hierarchy_name)
            .expect("member grant requires an explicit hierarchy grant");
        match grant.access() {
            Access::Custom => {}
            Access::None if access == Access::All => {
                // a permissive member grant re-opens a denied hierarchy as
                // partial access
                grant.set_access(Access::Custom);
            }
            other => panic!("member grant requires a custom hierarchy, found {other}"),
        }
        grant.apply_member_grant(member, access);
    }

    fn schema_access(&self, schema: &OlapSchema) -> Access {
        match self.schema_grants.get(&schema.name) {
            Some(access) => *access,
            // a role with no grants at all is the unrestricted default;
            // any explicit grant anywhere makes silence a denial
            None if self.is_vacuous() => Access::All,
            None => Access::None,
        }
    }

    fn is_vacuous(&self) -> bool {
        self.schema_grants.is_empty()
            && self.cube_grants.is_empty()
            && self.dimension_grants.is_empty()
            && self.hierarchy_grants.is_empty()
    }

    /// Whether any hierarchy of `dimension` has at least one accessible
    /// member; decides if a custom dimension grant means anything.
    fn dimension_has_accessible_member(&self, dimension: &Dimension) -> bool {
        let mut saw_hierarchy = false;
        for grant in self.hierarchy_grants.values() {
            if grant.hierarchy().dimension.unique_name() == dimension.unique_name() {
                saw_hierarchy = true;
                if grant.any_member_accessible() {
                    return true;
                }
            }
        }
        // custom access with no hierarchy grants at all constrains nothing
        !saw_hierarchy
    }
}

impl Role for RoleImpl {
    fn access_for_schema(&self, schema: &OlapSchema) -> Access {
        self.schema_access(schema)
    }

    fn access_for_cube(&self, cube: &Cube) -> Access {
        if let Some(access) = self.cube_grants.get(&cube.name) {
            return *access;
        }
        match self.schema_access(&cube.schema) {
            Access::All => Access::All,
            _ => Access::None,
        }
    }

    fn access_for_dimension(&self, dimension: &Dimension) -> Access {
        if let Some(access) = self.dimension_grants.get(&dimension.unique_name()) {
            return match access {
                Access::Custom if !self.dimension_has_accessible_member(dimension) => {
                    Access::None
                }
                other => *other,
            };
        }
        // cube inheritance: a cube-level grant covers the dimensions it uses
        if dimension.cube.uses_dimension(dimension) {
            if let Some(access) = self.cube_grants.get(&dimension.cube.name) {
                if !matches!(access, Access::None | Access::Custom) {
                    return *access;
                }
            }
        }
        match self.schema_access(&dimension.cube.schema) {
            Access::All => Access::All,
            Access::AllDimensions => {
                if self.access_for_cube(&dimension.cube) != Access::None {
                    Access::All
                } else {
                    Access::None
                }
            }
            _ => Access::None,
        }
    }

    fn access_for_hierarchy(&self, hierarchy: &Arc<Hierarchy>) -> Access {
        if let Some(grant) = self.hierarchy_grants.get(&hierarchy.unique_name()) {
            return grant.access();
        }
        // custom dimension access does not by itself open its hierarchies
        match self.access_for_dimension(&hierarchy.dimension) {
            Access::All => Access::All,
            _ => Access::None,
        }
    }

    fn access_for_level(&self, level: &Level) -> Access {
        if let Some(grant) = self.hierarchy_grants.get(&level.hierarchy.unique_name()) {
            if grant.access() == Access::Custom
                && level.depth >= grant.top_depth()
                && level.depth <= grant.bottom_depth()
            {
                return grant.access();
            }
        }
        self.access_for_dimension(&level.hierarchy.dimension)
    }

    fn access_for_member(&self, member: &Member) -> Access {
        if member.calculated {
            return Access::All;
        }
        if let Some(grant) = self.hierarchy_grants.get(&member.hierarchy().unique_name()) {
            return grant.access_for_member(member);
        }
        self.access_for_level(&member.level)
    }

    fn hierarchy_access(&self, hierarchy: &Arc<Hierarchy>) -> Arc<dyn HierarchyAccess> {
        match self.hierarchy_grants.get(&hierarchy.unique_name()) {
            Some(grant) => Arc::new(grant.clone()),
            None => Arc::new(DerivedHierarchyAccess::new(
                self.access_for_hierarchy(hierarchy),
                hierarchy,
            )),
        }
    }
}
