//! # Persistence Hook
//!
//! The core prescribes *what* is persisted, not *how*: a pluggable
//! [`PersistHook`] receives fact writes and structure changes as
//! journal batches and can save/load whole-database snapshot images.
//! [`FileJournal`] is the file-backed reference implementation
//! (JSON-lines journal with crc32-checksummed entries plus a binary
//! snapshot).
//!
//! ## Recovery
//!
//! On open:
//! 1. Load the snapshot image (if any)
//! 2. Replay the journal (operations since the snapshot)
//!
//! Rules are code and are never persisted; collaborators re-register
//! them after open.

pub mod journal;

pub use journal::FileJournal;

use crate::address::{BaseAddress, MemberId};
use crate::dimension::edit::DimensionDraft;
use crate::dimension::member::{AttributeDef, Member, Subset};
use crate::dimension::{Dimension, DimensionTables};
use crate::error::EngineResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Database-level metadata carried by a snapshot image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseMetadata {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub engine_version: String,
}

/// Logical image of one dimension's structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionImage {
    pub name: String,
    pub members: Vec<Member>,
    /// Display order of member ids
    pub order: Vec<MemberId>,
    /// (parent, child, weight) edges
    pub edges: Vec<(MemberId, MemberId, f64)>,
    pub subsets: Vec<Subset>,
    pub attributes: Vec<AttributeDef>,
    pub next_id: MemberId,
}

/// Logical image of one cube: dimension order plus stored facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CubeImage {
    pub name: String,
    pub dimensions: Vec<String>,
    pub facts: Vec<(Vec<MemberId>, f64)>,
}

/// Full logical image of a database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseImage {
    pub metadata: DatabaseMetadata,
    pub dimensions: Vec<DimensionImage>,
    pub cubes: Vec<CubeImage>,
}

/// A structural change, journaled so replay can reproduce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum StructureChange {
    DimensionAdded {
        name: String,
    },
    DimensionRemoved {
        name: String,
    },
    /// A committed edit session: the full post-commit structure plus
    /// the removed member ids, so replay performs the same cascade.
    DimensionCommitted {
        image: DimensionImage,
        removed_members: Vec<MemberId>,
    },
    CubeAdded {
        name: String,
        dimensions: Vec<String>,
    },
    CubeRemoved {
        name: String,
    },
}

/// One journaled operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum JournalOp {
    FactWrite {
        cube: String,
        coords: Vec<MemberId>,
        value: f64,
    },
    Structure(StructureChange),
}

/// Pluggable persistence backend invoked by the core.
pub trait PersistHook: Send + Sync {
    /// Open a logical batch; appends until `commit_batch` belong to it.
    fn begin_batch(&self) -> EngineResult<()>;

    /// Record a fact write (value `0.0` records a removal).
    fn append_fact_write(&self, cube: &str, addr: &BaseAddress, value: f64) -> EngineResult<()>;

    /// Record a structural change.
    fn append_structure_change(&self, change: &StructureChange) -> EngineResult<()>;

    /// Durably commit the open batch.
    fn commit_batch(&self) -> EngineResult<()>;

    /// Replace the snapshot with `image` and truncate the journal.
    fn save_snapshot(&self, image: &DatabaseImage) -> EngineResult<()>;

    /// The last saved snapshot, if any.
    fn load_snapshot(&self) -> EngineResult<Option<DatabaseImage>>;

    /// Operations journaled since the last snapshot, in commit order.
    fn replay_journal(&self) -> EngineResult<Vec<JournalOp>>;
}

/// Capture a dimension's current structure as an image. Edges follow
/// display order for deterministic output.
pub(crate) fn image_dimension(dim: &Dimension) -> DimensionImage {
    let tables = dim.snapshot();
    let mut members = Vec::with_capacity(tables.member_count());
    let mut edges = Vec::new();
    for member in tables.ordered_members() {
        members.push(member.clone());
        for (child, weight) in tables.children_of(member.id) {
            edges.push((member.id, *child, *weight));
        }
    }
    let mut subsets: Vec<Subset> = tables.subsets.values().cloned().collect();
    subsets.sort_by(|a, b| a.name.cmp(&b.name));
    let mut attributes: Vec<AttributeDef> = tables.attributes.values().cloned().collect();
    attributes.sort_by(|a, b| a.name.cmp(&b.name));

    DimensionImage {
        name: dim.name().to_string(),
        members,
        order: tables.order.clone(),
        edges,
        subsets,
        attributes,
        next_id: tables.next_id,
    }
}

/// Rebuild dimension tables from an image.
pub(crate) fn restore_dimension_tables(image: &DimensionImage) -> DimensionTables {
    DimensionDraft::from_image(
        &image.name,
        image.members.clone(),
        image.order.clone(),
        &image.edges,
        image.subsets.clone(),
        image.attributes.clone(),
        image.next_id,
    )
    .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_image_roundtrip() {
        let mut draft = DimensionDraft::empty("regions");
        draft.add_member("Total", None, 1.0).expect("add");
        draft.add_member("North", Some("Total"), 1.0).expect("add");
        draft.add_member("South", Some("Total"), -1.0).expect("add");
        draft.add_alias("North", "N").expect("alias");
        draft.define_attribute("color", true).expect("attr");
        draft
            .set_attribute("North", "color", "blue".into())
            .expect("set");
        draft.define_subset("Cold", &["North"]).expect("subset");

        let dim = Dimension::new("regions");
        dim.install(draft.build());

        let image = image_dimension(&dim);
        let restored = restore_dimension_tables(&image);

        assert_eq!(restored.member_count(), 3);
        assert_eq!(restored.member_id("N"), restored.member_id("North"));
        let total = restored.member_id("Total").expect("total");
        let south = restored.member_id("South").expect("south");
        let weights: Vec<_> = restored.children_of(total).to_vec();
        assert!(weights.contains(&(south, -1.0)));
        assert!(restored.subset("Cold").is_some());
        let north = restored.member_id("North").expect("north");
        assert_eq!(
            restored.members_by_attribute("color", &"Blue".into()),
            vec![north]
        );
    }

    #[test]
    fn test_journal_op_json_shape() {
        let op = JournalOp::FactWrite {
            cube: "sales".into(),
            coords: vec![1, 2, 3],
            value: 400.0,
        };
        let json = serde_json::to_string(&op).expect("json");
        assert!(json.contains("\"op\":\"fact_write\""));
        let back: JournalOp = serde_json::from_str(&json).expect("parse");
        assert!(matches!(back, JournalOp::FactWrite { value, .. } if value == 400.0));
    }
}
