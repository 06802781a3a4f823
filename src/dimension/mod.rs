//! # Dimensions
//!
//! A dimension is an ordered set of members with a weighted parent/child
//! hierarchy. Members with children are *aggregated*; members without
//! are *base* (leaves) and can store facts.
//!
//! ## Snapshot publishing
//!
//! All lookup structures of a dimension live in an immutable
//! [`DimensionTables`] snapshot published through `ArcSwap`. Readers
//! load the current snapshot once and never block a committing writer;
//! structural edits go through [`edit::DimensionEdit`], which stages
//! changes against a draft and commits them as a single atomic swap,
//! bumping the dimension's structure version.
//!
//! ## Leaf expansion
//!
//! For every member the snapshot can produce its *leaf expansion*: the
//! transitive set of base descendants with the aggregate weight obtained
//! by multiplying edge weights along each path. A leaf reachable by two
//! paths (diamond) contributes the sum of both path weights. Expansions
//! are memoized per snapshot and therefore invalidated wholesale by any
//! structural commit.

pub mod edit;
pub mod member;

pub use edit::DimensionEdit;
pub use member::{AttributeDef, AttributeValue, Member, Subset};

use crate::address::MemberId;
use crate::error::{EngineError, EngineResult};
use arc_swap::ArcSwap;
use member::fold_name;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Immutable lookup tables for one dimension structure version.
pub struct DimensionTables {
    pub(crate) members: HashMap<MemberId, Member>,
    /// Display order (insertion order of member ids)
    pub(crate) order: Vec<MemberId>,
    /// Folded member names and aliases -> id (one shared namespace)
    pub(crate) by_name: HashMap<String, MemberId>,
    /// Parent -> ordered children with edge weights
    pub(crate) children: HashMap<MemberId, Vec<(MemberId, f64)>>,
    /// Child -> parents
    pub(crate) parents: HashMap<MemberId, Vec<MemberId>>,
    /// Members without a parent, in display order
    pub(crate) roots: Vec<MemberId>,
    /// Folded subset name -> subset
    pub(crate) subsets: HashMap<String, Subset>,
    /// Folded attribute name -> definition
    pub(crate) attributes: HashMap<String, AttributeDef>,
    /// For indexed attributes: folded attr name -> value key -> members
    pub(crate) attribute_index: HashMap<String, HashMap<String, Vec<MemberId>>>,
    /// Next id to assign; ids are never reused within a dimension
    pub(crate) next_id: MemberId,
    /// Memoized leaf expansions, computed lazily on first use
    expansions: RwLock<HashMap<MemberId, Arc<Vec<(MemberId, f64)>>>>,
}

impl DimensionTables {
    pub(crate) fn empty() -> Self {
        DimensionTables {
            members: HashMap::new(),
            order: Vec::new(),
            by_name: HashMap::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
            roots: Vec::new(),
            subsets: HashMap::new(),
            attributes: HashMap::new(),
            attribute_index: HashMap::new(),
            next_id: 0,
            expansions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a member (or alias) by name, case-insensitively.
    pub fn member_id(&self, name: &str) -> Option<MemberId> {
        self.by_name.get(&fold_name(name)).copied()
    }

    pub fn member(&self, id: MemberId) -> Option<&Member> {
        self.members.get(&id)
    }

    pub fn member_name(&self, id: MemberId) -> Option<&str> {
        self.members.get(&id).map(|m| m.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.member_id(name).is_some()
    }

    /// A base member has no children.
    pub fn is_base(&self, id: MemberId) -> bool {
        self.children.get(&id).is_none_or(|c| c.is_empty())
    }

    pub fn children_of(&self, id: MemberId) -> &[(MemberId, f64)] {
        self.children.get(&id).map_or(&[], |c| c.as_slice())
    }

    pub fn parents_of(&self, id: MemberId) -> &[MemberId] {
        self.parents.get(&id).map_or(&[], |p| p.as_slice())
    }

    pub fn roots(&self) -> &[MemberId] {
        &self.roots
    }

    /// The dimension's "top", used as address default: its unique root.
    pub fn unique_root(&self) -> Option<MemberId> {
        match self.roots.as_slice() {
            [root] => Some(*root),
            _ => None,
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Members in display order.
    pub fn ordered_members(&self) -> impl Iterator<Item = &Member> {
        self.order.iter().filter_map(|id| self.members.get(id))
    }

    /// Base member ids in display order.
    pub fn base_member_ids(&self) -> Vec<MemberId> {
        self.order
            .iter()
            .copied()
            .filter(|id| self.is_base(*id))
            .collect()
    }

    pub fn subset(&self, name: &str) -> Option<&Subset> {
        self.subsets.get(&fold_name(name))
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.get(&fold_name(name))
    }

    /// Members whose attribute `attr` equals `value`. Uses the
    /// per-attribute index when the attribute is indexed, otherwise a
    /// scan in display order.
    pub fn members_by_attribute(&self, attr: &str, value: &AttributeValue) -> Vec<MemberId> {
        let key = fold_name(attr);
        if let Some(index) = self.attribute_index.get(&key) {
            return index.get(&value.index_key()).cloned().unwrap_or_default();
        }
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.members
                    .get(id)
                    .and_then(|m| m.attributes.get(&key))
                    .is_some_and(|v| v.index_key() == value.index_key())
            })
            .collect()
    }

    /// Memoized leaf expansion: `[(base_id, aggregate_weight)]`, sorted
    /// ascending by `base_id`. A base member expands to itself with
    /// weight `+1.0`. Duplicate leaves from diamond hierarchies sum
    /// their path weights.
    pub fn leaf_expansion(&self, id: MemberId) -> Arc<Vec<(MemberId, f64)>> {
        if let Some(cached) = self.expansions.read().get(&id) {
            return Arc::clone(cached);
        }
        let expansion = Arc::new(self.compute_expansion(id));
        self.expansions
            .write()
            .entry(id)
            .or_insert_with(|| Arc::clone(&expansion));
        expansion
    }

    fn compute_expansion(&self, id: MemberId) -> Vec<(MemberId, f64)> {
        let mut acc: BTreeMap<MemberId, f64> = BTreeMap::new();
        let mut stack: Vec<(MemberId, f64)> = vec![(id, 1.0)];
        while let Some((member, weight)) = stack.pop() {
            let kids = self.children_of(member);
            if kids.is_empty() {
                *acc.entry(member).or_insert(0.0) += weight;
            } else {
                for (child, edge_weight) in kids {
                    stack.push((*child, weight * edge_weight));
                }
            }
        }
        acc.into_iter().collect()
    }
}

/// A named dimension handle. Cheap to share; all state lives in the
/// published snapshot.
pub struct Dimension {
    name: String,
    tables: ArcSwap<DimensionTables>,
    structure_version: AtomicU64,
    editing: AtomicBool,
}

impl Dimension {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Dimension {
            name: name.into(),
            tables: ArcSwap::from_pointee(DimensionTables::empty()),
            structure_version: AtomicU64::new(1),
            editing: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Monotonic counter bumped on every committed structural edit.
    pub fn structure_version(&self) -> u64 {
        self.structure_version.load(Ordering::Acquire)
    }

    /// The current immutable snapshot. Reads taken from one snapshot are
    /// consistent even while an edit session commits.
    pub fn snapshot(&self) -> Arc<DimensionTables> {
        self.tables.load_full()
    }

    /// Atomically publish new tables and bump the structure version.
    pub(crate) fn install(&self, tables: DimensionTables) {
        self.tables.store(Arc::new(tables));
        self.structure_version.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn try_begin_edit(&self) -> bool {
        self.editing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn end_edit(&self) {
        self.editing.store(false, Ordering::Release);
    }

    // ------------------------------------------------------------------
    // Name-based read conveniences
    // ------------------------------------------------------------------

    pub fn member_id(&self, name: &str) -> Option<MemberId> {
        self.snapshot().member_id(name)
    }

    pub fn contains_member(&self, name: &str) -> bool {
        self.snapshot().contains(name)
    }

    pub fn member_count(&self) -> usize {
        self.snapshot().member_count()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.snapshot()
            .ordered_members()
            .map(|m| m.name.clone())
            .collect()
    }

    pub fn is_base(&self, name: &str) -> EngineResult<bool> {
        let tables = self.snapshot();
        let id = tables
            .member_id(name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        Ok(tables.is_base(id))
    }

    pub fn children(&self, name: &str) -> EngineResult<Vec<String>> {
        let tables = self.snapshot();
        let id = tables
            .member_id(name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        Ok(tables
            .children_of(id)
            .iter()
            .filter_map(|(c, _)| tables.member_name(*c).map(str::to_string))
            .collect())
    }

    pub fn parents(&self, name: &str) -> EngineResult<Vec<String>> {
        let tables = self.snapshot();
        let id = tables
            .member_id(name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        Ok(tables
            .parents_of(id)
            .iter()
            .filter_map(|p| tables.member_name(*p).map(str::to_string))
            .collect())
    }

    /// Base members reachable from `name`, in ascending id order.
    pub fn leaves(&self, name: &str) -> EngineResult<Vec<String>> {
        let tables = self.snapshot();
        let id = tables
            .member_id(name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        Ok(tables
            .leaf_expansion(id)
            .iter()
            .filter_map(|(b, _)| tables.member_name(*b).map(str::to_string))
            .collect())
    }

    pub fn root_names(&self) -> Vec<String> {
        let tables = self.snapshot();
        tables
            .roots()
            .iter()
            .filter_map(|r| tables.member_name(*r).map(str::to_string))
            .collect()
    }

    pub fn attribute_value(&self, member: &str, attr: &str) -> EngineResult<Option<AttributeValue>> {
        let tables = self.snapshot();
        let id = tables
            .member_id(member)
            .ok_or_else(|| EngineError::UnknownMember(member.to_string()))?;
        Ok(tables
            .member(id)
            .and_then(|m| m.attributes.get(&fold_name(attr)).cloned()))
    }

    pub fn subset_members(&self, name: &str) -> EngineResult<Vec<String>> {
        let tables = self.snapshot();
        let subset = tables
            .subset(name)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;
        Ok(subset
            .members
            .iter()
            .filter_map(|id| tables.member_name(*id).map(str::to_string))
            .collect())
    }
}

impl std::fmt::Debug for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dimension")
            .field("name", &self.name)
            .field("members", &self.member_count())
            .field("structure_version", &self.structure_version())
            .finish()
    }
}
