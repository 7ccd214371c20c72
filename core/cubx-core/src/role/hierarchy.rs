//! Per-hierarchy access resolution.
//!
//! `HierarchyGrant` is the stored grant for one hierarchy: its access level,
//! optional top/bottom level restriction, rollup policy, and the per-member
//! override map that gives a `Custom` hierarchy its shape. Member resolution
//! walks the override map, then the ancestor chain, then falls back to the
//! hierarchy's own access.

use crate::role::model::{Hierarchy, Member};
use crate::role::{Access, RollupPolicy};
use ahash::AHashMap;
use std::sync::Arc;

/// Detailed access for one hierarchy.
pub trait HierarchyAccess: Send + Sync {
    /// The hierarchy-level access.
    fn access(&self) -> Access;

    /// Effective access for one member of the hierarchy.
    fn access_for_member(&self, member: &Member) -> Access;

    /// Shallowest visible level depth.
    fn top_depth(&self) -> usize;

    /// Deepest visible level depth.
    fn bottom_depth(&self) -> usize;

    fn rollup_policy(&self) -> RollupPolicy;
}

/// One member-level override inside a custom hierarchy.
#[derive(Debug, Clone)]
pub struct MemberGrant {
    pub member: Arc<Member>,
    pub access: Access,
}

/// The stored grant for one hierarchy.
#[derive(Debug, Clone)]
pub struct HierarchyGrant {
    hierarchy: Arc<Hierarchy>,
    access: Access,
    top_depth: usize,
    bottom_depth: usize,
    rollup_policy: RollupPolicy,
    member_grants: AHashMap<String, MemberGrant>,
}

impl HierarchyGrant {
    pub fn new(
        hierarchy: Arc<Hierarchy>,
        access: Access,
        top_depth: usize,
        bottom_depth: usize,
        rollup_policy: RollupPolicy,
    ) -> Self {
        assert!(
            top_depth <= bottom_depth && bottom_depth < hierarchy.level_count(),
            "level bounds outside hierarchy depth range"
        );
        HierarchyGrant {
            hierarchy,
            access,
            top_depth,
            bottom_depth,
            rollup_policy,
            member_grants: AHashMap::new(),
        }
    }

    pub fn hierarchy(&self) -> &Arc<Hierarchy> {
        &self.hierarchy
    }

    pub fn member_grants(&self) -> impl Iterator<Item = &MemberGrant> {
        self.member_grants.values()
    }

    pub fn has_member_grants(&self) -> bool {
        !self.member_grants.is_empty()
    }

    /// Whether any member of the hierarchy is visible under this grant.
    pub fn any_member_accessible(&self) -> bool {
        match self.access {
            Access::None => false,
            Access::Custom => {
                self.member_grants.is_empty()
                    || self
                        .member_grants
                        .values()
                        .any(|g| g.access != Access::None)
            }
            _ => true,
        }
    }

    pub(crate) fn set_access(&mut self, access: Access) {
        self.access = access;
    }

    fn in_depth_bounds(&self, depth: usize) -> bool {
        depth >= self.top_depth && depth <= self.bottom_depth
    }

    /// Apply one member grant with the ordering semantics the grant API
    /// promises: strip superseded descendant grants first, record the grant,
    /// then upgrade inaccessible ancestors to `Custom` so the granted
    /// member's neighborhood stays navigable. Explicit denials on
    /// descendants survive a later broader grant; only a direct re-grant
    /// lifts them.
    pub(crate) fn apply_member_grant(&mut self, member: &Arc<Member>, access: Access) {
        for name in strip_descendant_grants(member, &self.member_grants) {
            self.member_grants.remove(&name);
        }
        self.member_grants.insert(
            member.unique_name.clone(),
            MemberGrant {
                member: Arc::clone(member),
                access,
            },
        );
        for ancestor in ancestor_upgrades(member, &self.member_grants, self.top_depth) {
            self.member_grants.insert(
                ancestor.unique_name.clone(),
                MemberGrant {
                    member: ancestor,
                    access: Access::Custom,
                },
            );
        }
    }
}

/// Descendant grants superseded by a new grant on `member`: every grant on a
/// strict descendant, except explicit denials, which outlive a broader
/// ancestor grant until re-granted directly.
pub(crate) fn strip_descendant_grants(
    member: &Member,
    grants: &AHashMap<String, MemberGrant>,
) -> Vec<String> {
    grants
        .values()
        .filter(|g| g.access != Access::None && g.member.is_descendant_of(member))
        .map(|g| g.member.unique_name.clone())
        .collect()
}

/// Ancestors of `member` that must be upgraded to `Custom` for the member to
/// stay reachable: any ancestor within the level bounds whose current grant
/// is absent or an explicit denial.
pub(crate) fn ancestor_upgrades(
    member: &Member,
    grants: &AHashMap<String, MemberGrant>,
    top_depth: usize,
) -> Vec<Arc<Member>> {
    let mut upgrades = Vec::new();
    let mut current = member.parent.clone();
    while let Some(ancestor) = current {
        if ancestor.depth() >= top_depth {
            let needs_upgrade = match grants.get(&ancestor.unique_name) {
                None => true,
                Some(g) => g.access == Access::None,
            };
            if needs_upgrade {
                upgrades.push(Arc::clone(&ancestor));
            }
        }
        current = ancestor.parent.clone();
    }
    upgrades
}

impl HierarchyAccess for HierarchyGrant {
    fn access(&self) -> Access {
        self.access
    }

    fn access_for_member(&self, member: &Member) -> Access {
        if member.calculated {
            return Access::All;
        }
        if !self.in_depth_bounds(member.depth()) {
            return Access::None;
        }
        if let Some(grant) = self.member_grants.get(&member.unique_name) {
            return grant.access;
        }
        let mut current = member.parent.as_deref();
        while let Some(ancestor) = current {
            if let Some(grant) = self.member_grants.get(&ancestor.unique_name) {
                // a permissive ancestor grant flows down; custom or denied
                // ancestors hide everything below that was not re-granted
                return match grant.access {
                    Access::All => Access::All,
                    _ => Access::None,
                };
            }
            current = ancestor.parent.as_deref();
        }
        if self.member_grants.is_empty() {
            self.access
        } else {
            Access::None
        }
    }

    fn top_depth(&self) -> usize {
        self.top_depth
    }

    fn bottom_depth(&self) -> usize {
        self.bottom_depth
    }

    fn rollup_policy(&self) -> RollupPolicy {
        self.rollup_policy
    }
}

/// Access for a hierarchy without an explicit grant: a uniform level derived
/// from the owning dimension, no member overrides, full depth range.
#[derive(Debug, Clone)]
pub struct DerivedHierarchyAccess {
    access: Access,
    bottom_depth: usize,
}

impl DerivedHierarchyAccess {
    pub fn new(access: Access, hierarchy: &Hierarchy) -> Self {
        DerivedHierarchyAccess {
            access,
            bottom_depth: hierarchy.bottom_depth(),
        }
    }
}

impl HierarchyAccess for DerivedHierarchyAccess {
    fn access(&self) -> Access {
        self.access
    }

    fn access_for_member(&self, member: &Member) -> Access {
        if member.calculated {
            return Access::All;
        }
        self.access
    }

    fn top_depth(&self) -> usize {
        0
    }

    fn bottom_depth(&self) -> usize {
        self.bottom_depth
    }

    fn rollup_policy(&self) -> RollupPolicy {
        RollupPolicy::Full
    }
}
