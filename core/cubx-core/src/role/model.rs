//! Minimal OLAP element model for access control.
//!
//! The full cube model lives in the schema layer above this crate; access
//! control only needs identity (unique names), containment (cube →
//! dimension → hierarchy → level) and parent navigation between members.
//! Ownership flows strictly downward — a member holds its level, the level
//! its hierarchy, and so on — so the graph is acyclic and `Arc`-shareable.

use std::fmt;
use std::sync::Arc;

/// A schema: the outermost grant scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OlapSchema {
    pub name: String,
}

impl OlapSchema {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(OlapSchema { name: name.into() })
    }
}

/// A cube within a schema, listing the dimensions it uses by name.
#[derive(Debug, Clone)]
pub struct Cube {
    pub name: String,
    pub schema: Arc<OlapSchema>,
    pub dimension_names: Vec<String>,
}

impl Cube {
    pub fn new<I, S>(schema: Arc<OlapSchema>, name: impl Into<String>, dimensions: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Cube {
            name: name.into(),
            schema,
            dimension_names: dimensions.into_iter().map(Into::into).collect(),
        })
    }

    pub fn uses_dimension(&self, dimension: &Dimension) -> bool {
        self.dimension_names.iter().any(|d| *d == dimension.name)
    }
}

/// A dimension of one cube.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub cube: Arc<Cube>,
}

impl Dimension {
    pub fn new(cube: Arc<Cube>, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Dimension {
            name: name.into(),
            cube,
        })
    }

    pub fn unique_name(&self) -> String {
        format!("[{}].[{}]", self.cube.name, self.name)
    }
}

/// A hierarchy with its level names in depth order (depth 0 first).
#[derive(Debug, Clone)]
pub struct Hierarchy {
    pub name: String,
    pub dimension: Arc<Dimension>,
    pub level_names: Vec<String>,
}

impl Hierarchy {
    pub fn new<I, S>(dimension: Arc<Dimension>, name: impl Into<String>, levels: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let level_names: Vec<String> = levels.into_iter().map(Into::into).collect();
        assert!(!level_names.is_empty(), "hierarchy requires at least one level");
        Arc::new(Hierarchy {
            name: name.into(),
            dimension,
            level_names,
        })
    }

    pub fn unique_name(&self) -> String {
        format!("{}.[{}]", self.dimension.unique_name(), self.name)
    }

    pub fn level_count(&self) -> usize {
        self.level_names.len()
    }

    /// The level at `depth`. Panics when out of range; the schema layer only
    /// hands out depths it defined.
    pub fn level(self: &Arc<Self>, depth: usize) -> Level {
        assert!(depth < self.level_names.len(), "level depth out of range");
        Level {
            hierarchy: Arc::clone(self),
            depth,
        }
    }

    pub fn bottom_depth(&self) -> usize {
        self.level_names.len() - 1
    }
}

/// A level: a hierarchy plus a depth.
#[derive(Debug, Clone)]
pub struct Level {
    pub hierarchy: Arc<Hierarchy>,
    pub depth: usize,
}

impl Level {
    pub fn name(&self) -> &str {
        &self.hierarchy.level_names[self.depth]
    }

    pub fn unique_name(&self) -> String {
        format!("{}.[{}]", self.hierarchy.unique_name(), self.name())
    }
}

impl PartialEq for Level {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth
            && self.hierarchy.unique_name() == other.hierarchy.unique_name()
    }
}

impl Eq for Level {}

/// A member of a hierarchy level.
#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub unique_name: String,
    pub level: Level,
    pub parent: Option<Arc<Member>>,
    pub calculated: bool,
}

impl Member {
    /// A root member (depth 0, no parent).
    pub fn root(hierarchy: &Arc<Hierarchy>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Member {
            unique_name: format!("{}.[{}]", hierarchy.unique_name(), name),
            name,
            level: hierarchy.level(0),
            parent: None,
            calculated: false,
        })
    }

    /// A child of `parent`, one level deeper.
    pub fn child(parent: &Arc<Member>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Member {
            unique_name: format!("{}.[{}]", parent.unique_name, name),
            name,
            level: parent.level.hierarchy.level(parent.level.depth + 1),
            parent: Some(Arc::clone(parent)),
            calculated: false,
        })
    }

    /// A calculated member defined in the query, always visible.
    pub fn calculated(hierarchy: &Arc<Hierarchy>, name: impl Into<String>) -> Arc<Self> {
        let name = name.into();
        Arc::new(Member {
            unique_name: format!("{}.[{}]", hierarchy.unique_name(), name),
            name,
            level: hierarchy.level(0),
            parent: None,
            calculated: true,
        })
    }

    pub fn hierarchy(&self) -> &Arc<Hierarchy> {
        &self.level.hierarchy
    }

    pub fn depth(&self) -> usize {
        self.level.depth
    }

    /// Walk up the parent chain looking for `ancestor`.
    pub fn is_descendant_of(&self, ancestor: &Member) -> bool {
        let mut current = self.parent.as_deref();
        while let Some(member) = current {
            if member.unique_name == ancestor.unique_name {
                return true;
            }
            current = member.parent.as_deref();
        }
        false
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.unique_name == other.unique_name
    }
}

impl Eq for Member {}

impl fmt::Display for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.unique_name)
    }
}
