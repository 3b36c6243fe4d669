// ============================================================================
// spark-keyval - Factory Paths
// Where named state cells live inside a constructed subgraph
// ============================================================================
//
// A model's create() builds the same units in the same order every time it
// runs. While probing a model we record, for every writable state field, the
// position of its store in the probe region's link list (descending through
// child regions). At spawn time the instance region is handed the same map
// plus the caller's values, and each store picks up its override as it is
// created. Stores built deep inside helper factories get seeded without the
// helper exposing them as parameters.
// ============================================================================

use std::collections::BTreeMap;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::core::types::UnitId;
use crate::primitives::region::{Region, RegionLink};

// =============================================================================
// PATH MAP
// =============================================================================

/// One slot of a factory path map.
#[derive(Debug, Clone, PartialEq)]
pub enum PathEntry {
    /// The unit at this index is the store behind this state field.
    Field(String),
    /// The child region at this index contains further fields.
    Nested(Rc<FactoryPathMap>),
}

/// Link index -> state field (or nested map), for one region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactoryPathMap {
    entries: BTreeMap<usize, PathEntry>,
}

impl FactoryPathMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, idx: usize) -> Option<&PathEntry> {
        self.entries.get(&idx)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of fields reachable from this map, nested maps included.
    pub fn field_count(&self) -> usize {
        self.entries
            .values()
            .map(|entry| match entry {
                PathEntry::Field(_) => 1,
                PathEntry::Nested(map) => map.field_count(),
            })
            .sum()
    }

    /// Path of link indices leading to `field`, if recorded.
    pub fn path_of(&self, field: &str) -> Option<Vec<usize>> {
        for (idx, entry) in &self.entries {
            match entry {
                PathEntry::Field(name) if name == field => return Some(vec![*idx]),
                PathEntry::Field(_) => {}
                PathEntry::Nested(map) => {
                    if let Some(mut rest) = map.path_of(field) {
                        rest.insert(0, *idx);
                        return Some(rest);
                    }
                }
            }
        }
        None
    }

    /// Insert `field` at `path`, creating nested maps on the way.
    fn insert(&mut self, path: &[usize], field: &str) {
        let Some((&first, rest)) = path.split_first() else {
            return;
        };
        if rest.is_empty() {
            self.entries.insert(first, PathEntry::Field(field.to_owned()));
            return;
        }
        let entry = self
            .entries
            .entry(first)
            .or_insert_with(|| PathEntry::Nested(Rc::new(FactoryPathMap::new())));
        if let PathEntry::Nested(map) = entry {
            Rc::make_mut(map).insert(rest, field);
        }
    }
}

// =============================================================================
// COLLECTION
// =============================================================================

/// Record the position of every `(field, unit)` pair inside `region`.
///
/// Units that were not created inside `region` (stores captured from outside
/// the model, for example) are left out; the spawner writes those after
/// create() instead.
pub fn collect_factory_paths(region: &Region, fields: &[(String, UnitId)]) -> FactoryPathMap {
    let mut map = FactoryPathMap::new();
    for (field, id) in fields {
        if let Some(path) = find_unit(region, *id) {
            map.insert(&path, field);
        }
    }
    map
}

/// Depth-first search for `target` through the region's link tree.
fn find_unit(region: &Region, target: UnitId) -> Option<Vec<usize>> {
    let links = region.links();

    let direct = links
        .iter()
        .position(|link| matches!(link, RegionLink::Unit(id) if *id == target));
    if let Some(idx) = direct {
        return Some(vec![idx]);
    }

    for (idx, link) in links.iter().enumerate() {
        if let RegionLink::Region(child) = link {
            let Some(child) = Region::from_link(child) else {
                continue;
            };
            if let Some(mut rest) = find_unit(&child, target) {
                rest.insert(0, idx);
                return Some(rest);
            }
        }
    }
    None
}

// =============================================================================
// SEED HOOKS
// =============================================================================

/// Initial values to install while an instance region is being populated.
#[derive(Clone)]
pub(crate) struct SeedHooks {
    paths: Rc<FactoryPathMap>,
    values: Rc<IndexMap<String, Value>>,
}

impl SeedHooks {
    pub(crate) fn new(paths: Rc<FactoryPathMap>, values: IndexMap<String, Value>) -> Self {
        Self {
            paths,
            values: Rc::new(values),
        }
    }

    /// Value for the unit created at link index `idx`.
    pub(crate) fn for_unit(&self, idx: usize) -> Option<Value> {
        match self.paths.get(idx)? {
            PathEntry::Field(name) => self.values.get(name).cloned(),
            PathEntry::Nested(_) => None,
        }
    }

    /// Hooks for the child region created at link index `idx`.
    pub(crate) fn for_region(&self, idx: usize) -> Option<SeedHooks> {
        match self.paths.get(idx)? {
            PathEntry::Nested(map) => Some(SeedHooks {
                paths: map.clone(),
                values: self.values.clone(),
            }),
            PathEntry::Field(_) => None,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
