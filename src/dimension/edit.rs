//! Staged structural edits.
//!
//! `Clean -> Editing -> (Commit | Rollback) -> Clean`: an edit session
//! stages every change against a [`DimensionDraft`] cloned from the
//! current snapshot. Reads during the session keep seeing the pre-edit
//! snapshot; commit builds fresh tables, swaps them in atomically and
//! cascades fact deletions for removed base members. A failed commit
//! discards the draft without side effect.

use super::member::{fold_name, AttributeDef, AttributeValue, Member, Subset};
use super::{Dimension, DimensionTables};
use crate::address::MemberId;
use crate::database::DatabaseInner;
use crate::error::{EngineError, EngineResult};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Mutable working copy of a dimension's structure.
///
/// Used by edit sessions and by snapshot restore; all validation happens
/// here so a built [`DimensionTables`] is structurally sound by
/// construction.
pub struct DimensionDraft {
    dim_name: String,
    members: HashMap<MemberId, Member>,
    order: Vec<MemberId>,
    by_name: HashMap<String, MemberId>,
    children: HashMap<MemberId, Vec<(MemberId, f64)>>,
    parents: HashMap<MemberId, Vec<MemberId>>,
    subsets: HashMap<String, Subset>,
    attributes: HashMap<String, AttributeDef>,
    next_id: MemberId,
}

impl DimensionDraft {
    pub fn empty(dim_name: impl Into<String>) -> Self {
        DimensionDraft {
            dim_name: dim_name.into(),
            members: HashMap::new(),
            order: Vec::new(),
            by_name: HashMap::new(),
            children: HashMap::new(),
            parents: HashMap::new(),
            subsets: HashMap::new(),
            attributes: HashMap::new(),
            next_id: 0,
        }
    }

    pub(crate) fn from_tables(dim_name: &str, tables: &DimensionTables) -> Self {
        DimensionDraft {
            dim_name: dim_name.to_string(),
            members: tables.members.clone(),
            order: tables.order.clone(),
            by_name: tables.by_name.clone(),
            children: tables.children.clone(),
            parents: tables.parents.clone(),
            subsets: tables.subsets.clone(),
            attributes: tables.attributes.clone(),
            next_id: tables.next_id,
        }
    }

    /// Rebuild a draft from persisted image parts. Edges are trusted to
    /// be acyclic (they came from a committed structure).
    pub(crate) fn from_image(
        dim_name: &str,
        members: Vec<Member>,
        order: Vec<MemberId>,
        edges: &[(MemberId, MemberId, f64)],
        subsets: Vec<Subset>,
        attributes: Vec<AttributeDef>,
        next_id: MemberId,
    ) -> Self {
        let mut by_name = HashMap::new();
        let mut member_map = HashMap::new();
        for member in members {
            by_name.insert(fold_name(&member.name), member.id);
            for alias in &member.aliases {
                by_name.insert(fold_name(alias), member.id);
            }
            member_map.insert(member.id, member);
        }
        let mut children: HashMap<MemberId, Vec<(MemberId, f64)>> = HashMap::new();
        let mut parents: HashMap<MemberId, Vec<MemberId>> = HashMap::new();
        for (parent, child, weight) in edges {
            children.entry(*parent).or_default().push((*child, *weight));
            parents.entry(*child).or_default().push(*parent);
        }
        DimensionDraft {
            dim_name: dim_name.to_string(),
            members: member_map,
            order,
            by_name,
            children,
            parents,
            subsets: subsets
                .into_iter()
                .map(|s| (fold_name(&s.name), s))
                .collect(),
            attributes: attributes
                .into_iter()
                .map(|a| (fold_name(&a.name), a))
                .collect(),
            next_id,
        }
    }

    fn resolve(&self, name: &str) -> EngineResult<MemberId> {
        self.by_name
            .get(&fold_name(name))
            .copied()
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))
    }

    fn check_free_name(&self, name: &str) -> EngineResult<()> {
        if self.by_name.contains_key(&fold_name(name)) {
            return Err(EngineError::DuplicateName {
                dimension: self.dim_name.clone(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// True when `ancestor` is reachable downward from `start`, i.e. an
    /// edge `ancestor -> start` would close a cycle.
    fn reaches(&self, start: MemberId, ancestor: MemberId) -> bool {
        if start == ancestor {
            return true;
        }
        let mut stack = vec![start];
        let mut seen = HashSet::new();
        while let Some(m) = stack.pop() {
            if !seen.insert(m) {
                continue;
            }
            if let Some(kids) = self.children.get(&m) {
                for (child, _) in kids {
                    if *child == ancestor {
                        return true;
                    }
                    stack.push(*child);
                }
            }
        }
        false
    }

    /// Insert a member, optionally as a child of `parent` with the given
    /// edge weight.
    pub fn add_member(
        &mut self,
        name: &str,
        parent: Option<&str>,
        weight: f64,
    ) -> EngineResult<MemberId> {
        self.check_free_name(name)?;
        let parent_id = parent.map(|p| self.resolve(p)).transpose()?;

        let id = self.next_id;
        self.next_id += 1;
        self.members.insert(id, Member::new(id, name));
        self.order.push(id);
        self.by_name.insert(fold_name(name), id);

        if let Some(pid) = parent_id {
            self.children.entry(pid).or_default().push((id, weight));
            self.parents.entry(id).or_default().push(pid);
        }
        Ok(id)
    }

    /// Add a parent -> child edge between existing members.
    pub fn add_child_edge(&mut self, parent: &str, child: &str, weight: f64) -> EngineResult<()> {
        let pid = self.resolve(parent)?;
        let cid = self.resolve(child)?;
        if self.reaches(cid, pid) {
            return Err(EngineError::CycleDetected {
                dimension: self.dim_name.clone(),
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }
        let kids = self.children.entry(pid).or_default();
        if kids.iter().any(|(c, _)| *c == cid) {
            return Err(EngineError::TypeError(format!(
                "'{child}' is already a child of '{parent}'"
            )));
        }
        kids.push((cid, weight));
        self.parents.entry(cid).or_default().push(pid);
        Ok(())
    }

    /// Remove a member and all its edges. Children that lose their last
    /// parent become roots.
    pub fn remove_member(&mut self, name: &str) -> EngineResult<MemberId> {
        let id = self.resolve(name)?;
        let member = self
            .members
            .remove(&id)
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))?;

        self.by_name.remove(&fold_name(&member.name));
        for alias in &member.aliases {
            self.by_name.remove(&fold_name(alias));
        }
        self.order.retain(|m| *m != id);

        // detach from parents
        if let Some(parents) = self.parents.remove(&id) {
            for pid in parents {
                if let Some(kids) = self.children.get_mut(&pid) {
                    kids.retain(|(c, _)| *c != id);
                }
            }
        }
        // detach own children
        if let Some(kids) = self.children.remove(&id) {
            for (cid, _) in kids {
                if let Some(parents) = self.parents.get_mut(&cid) {
                    parents.retain(|p| *p != id);
                    if parents.is_empty() {
                        self.parents.remove(&cid);
                    }
                }
            }
        }
        // drop from subsets
        for subset in self.subsets.values_mut() {
            subset.members.retain(|m| *m != id);
        }
        Ok(id)
    }

    /// Rename a member. Aliases are preserved; the old primary name is
    /// not kept as an alias.
    pub fn rename(&mut self, old: &str, new: &str) -> EngineResult<()> {
        let id = self.resolve(old)?;
        let old_folded = fold_name(old);
        let new_folded = fold_name(new);
        if old_folded != new_folded {
            self.check_free_name(new)?;
        }
        let member = self
            .members
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownMember(old.to_string()))?;
        // `old` may have been an alias; only the primary name changes
        let primary_folded = fold_name(&member.name);
        member.name = new.to_string();
        self.by_name.remove(&primary_folded);
        self.by_name.insert(new_folded, id);
        Ok(())
    }

    pub fn add_alias(&mut self, member: &str, alias: &str) -> EngineResult<()> {
        let id = self.resolve(member)?;
        self.check_free_name(alias)?;
        self.by_name.insert(fold_name(alias), id);
        if let Some(m) = self.members.get_mut(&id) {
            m.aliases.insert(alias.to_string());
        }
        Ok(())
    }

    pub fn remove_alias(&mut self, alias: &str) -> EngineResult<()> {
        let id = self.resolve(alias)?;
        let folded = fold_name(alias);
        let member = self
            .members
            .get_mut(&id)
            .ok_or_else(|| EngineError::UnknownMember(alias.to_string()))?;
        if fold_name(&member.name) == folded {
            return Err(EngineError::TypeError(format!(
                "'{alias}' is the primary name of the member, not an alias"
            )));
        }
        member.aliases.retain(|a| fold_name(a) != folded);
        self.by_name.remove(&folded);
        Ok(())
    }

    pub fn set_weight(&mut self, parent: &str, child: &str, weight: f64) -> EngineResult<()> {
        let pid = self.resolve(parent)?;
        let cid = self.resolve(child)?;
        let kids = self
            .children
            .get_mut(&pid)
            .ok_or_else(|| EngineError::TypeError(format!("'{parent}' has no children")))?;
        for (c, w) in kids.iter_mut() {
            if *c == cid {
                *w = weight;
                return Ok(());
            }
        }
        Err(EngineError::TypeError(format!(
            "'{child}' is not a child of '{parent}'"
        )))
    }

    pub fn define_attribute(&mut self, name: &str, indexed: bool) -> EngineResult<()> {
        let folded = fold_name(name);
        if self.attributes.contains_key(&folded) {
            return Err(EngineError::DuplicateName {
                dimension: self.dim_name.clone(),
                name: name.to_string(),
            });
        }
        self.attributes.insert(
            folded,
            AttributeDef {
                name: name.to_string(),
                indexed,
            },
        );
        Ok(())
    }

    pub fn set_attribute(
        &mut self,
        member: &str,
        attr: &str,
        value: AttributeValue,
    ) -> EngineResult<()> {
        let folded = fold_name(attr);
        if !self.attributes.contains_key(&folded) {
            return Err(EngineError::TypeError(format!(
                "attribute '{attr}' is not defined in dimension '{}'",
                self.dim_name
            )));
        }
        let id = self.resolve(member)?;
        if let Some(m) = self.members.get_mut(&id) {
            m.attributes.insert(folded, value);
        }
        Ok(())
    }

    pub fn set_format(&mut self, member: &str, format: Option<String>) -> EngineResult<()> {
        let id = self.resolve(member)?;
        if let Some(m) = self.members.get_mut(&id) {
            m.format = format;
        }
        Ok(())
    }

    pub fn define_subset(&mut self, name: &str, members: &[&str]) -> EngineResult<()> {
        let folded = fold_name(name);
        if self.subsets.contains_key(&folded) {
            return Err(EngineError::DuplicateName {
                dimension: self.dim_name.clone(),
                name: name.to_string(),
            });
        }
        let ids = members
            .iter()
            .map(|m| self.resolve(m))
            .collect::<EngineResult<Vec<_>>>()?;
        self.subsets.insert(
            folded,
            Subset {
                name: name.to_string(),
                members: ids,
            },
        );
        Ok(())
    }

    pub fn drop_subset(&mut self, name: &str) -> EngineResult<()> {
        self.subsets
            .remove(&fold_name(name))
            .map(|_| ())
            .ok_or_else(|| EngineError::UnknownMember(name.to_string()))
    }

    /// Build immutable tables. Roots and attribute indexes are derived
    /// here; expansions start empty and fill lazily on first use.
    pub fn build(self) -> DimensionTables {
        let roots: Vec<MemberId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.parents.get(id).is_none_or(Vec::is_empty))
            .collect();

        let mut attribute_index: HashMap<String, HashMap<String, Vec<MemberId>>> = HashMap::new();
        for (attr_key, def) in &self.attributes {
            if !def.indexed {
                continue;
            }
            let entry = attribute_index.entry(attr_key.clone()).or_default();
            for id in &self.order {
                if let Some(value) = self.members.get(id).and_then(|m| m.attributes.get(attr_key)) {
                    entry.entry(value.index_key()).or_default().push(*id);
                }
            }
        }

        DimensionTables {
            members: self.members,
            order: self.order,
            by_name: self.by_name,
            children: self.children,
            parents: self.parents,
            roots,
            subsets: self.subsets,
            attributes: self.attributes,
            attribute_index,
            next_id: self.next_id,
            expansions: RwLock::new(HashMap::new()),
        }
    }
}

/// An open edit session on a dimension.
///
/// Obtained from [`crate::Database::edit_dimension`]. At most one
/// session per dimension is open at a time; dropping the session without
/// committing rolls it back.
pub struct DimensionEdit {
    db: Arc<DatabaseInner>,
    dim: Arc<Dimension>,
    draft: DimensionDraft,
    removed: Vec<MemberId>,
}

impl std::fmt::Debug for DimensionEdit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DimensionEdit")
            .field("dim_name", &self.draft.dim_name)
            .finish_non_exhaustive()
    }
}

impl DimensionEdit {
    pub(crate) fn new(db: Arc<DatabaseInner>, dim: Arc<Dimension>) -> Self {
        let draft = DimensionDraft::from_tables(dim.name(), &dim.snapshot());
        DimensionEdit {
            db,
            dim,
            draft,
            removed: Vec::new(),
        }
    }

    pub fn add_member(
        &mut self,
        name: &str,
        parent: Option<&str>,
        weight: f64,
    ) -> EngineResult<&mut Self> {
        self.draft.add_member(name, parent, weight)?;
        Ok(self)
    }

    pub fn add_child_edge(
        &mut self,
        parent: &str,
        child: &str,
        weight: f64,
    ) -> EngineResult<&mut Self> {
        self.draft.add_child_edge(parent, child, weight)?;
        Ok(self)
    }

    pub fn remove_member(&mut self, name: &str) -> EngineResult<&mut Self> {
        let id = self.draft.remove_member(name)?;
        self.removed.push(id);
        Ok(self)
    }

    pub fn rename(&mut self, old: &str, new: &str) -> EngineResult<&mut Self> {
        self.draft.rename(old, new)?;
        Ok(self)
    }

    pub fn add_alias(&mut self, member: &str, alias: &str) -> EngineResult<&mut Self> {
        self.draft.add_alias(member, alias)?;
        Ok(self)
    }

    pub fn remove_alias(&mut self, alias: &str) -> EngineResult<&mut Self> {
        self.draft.remove_alias(alias)?;
        Ok(self)
    }

    pub fn set_weight(&mut self, parent: &str, child: &str, weight: f64) -> EngineResult<&mut Self> {
        self.draft.set_weight(parent, child, weight)?;
        Ok(self)
    }

    pub fn define_attribute(&mut self, name: &str, indexed: bool) -> EngineResult<&mut Self> {
        self.draft.define_attribute(name, indexed)?;
        Ok(self)
    }

    pub fn set_attribute(
        &mut self,
        member: &str,
        attr: &str,
        value: AttributeValue,
    ) -> EngineResult<&mut Self> {
        self.draft.set_attribute(member, attr, value)?;
        Ok(self)
    }

    pub fn set_format(&mut self, member: &str, format: Option<String>) -> EngineResult<&mut Self> {
        self.draft.set_format(member, format)?;
        Ok(self)
    }

    pub fn define_subset(&mut self, name: &str, members: &[&str]) -> EngineResult<&mut Self> {
        self.draft.define_subset(name, members)?;
        Ok(self)
    }

    pub fn drop_subset(&mut self, name: &str) -> EngineResult<&mut Self> {
        self.draft.drop_subset(name)?;
        Ok(self)
    }

    /// Build the staged tables and publish them as a single atomic swap.
    ///
    /// Stored facts whose base member was removed are cascade-deleted
    /// from every referencing cube; each cascade is reported through the
    /// error sink as an `InUse` record. On any failure the dimension is
    /// left untouched.
    pub fn commit(mut self) -> EngineResult<()> {
        let draft = std::mem::replace(&mut self.draft, DimensionDraft::empty(self.dim.name()));
        let tables = draft.build();
        let removed = std::mem::take(&mut self.removed);
        self.db.commit_dimension(&self.dim, tables, removed)
    }

    /// Discard the staged changes.
    pub fn rollback(self) {}
}

impl Drop for DimensionEdit {
    fn drop(&mut self) {
        self.dim.end_edit();
    }
}
