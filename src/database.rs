//! # Database Facade
//!
//! A [`Database`] is the single owning handle over all subordinate
//! resources: dimensions, cubes, the error sink and the persistence
//! hook. There is no ambient registry; dropping the last handle drops
//! the engine state.
//!
//! ## Concurrency model
//!
//! Single-writer / multi-reader. Reads never take the database write
//! lock; every mutation (cell writes, area batches, rule changes,
//! structural edits) serializes on it. Dimension edit sessions are
//! snapshot-isolated: reads during an open session see the pre-commit
//! structure, and commit is one atomic swap.
//!
//! ## Example
//!
//! ```rust,ignore
//! let db = Database::new("tesla");
//! db.add_dimension("years")?;
//! let mut edit = db.edit_dimension("years")?;
//! edit.add_member("2021", None, 1.0)?;
//! edit.add_member("2022", None, 1.0)?;
//! edit.commit()?;
//! let sales = db.add_cube("sales", &["years"])?;
//! ```

use crate::address::{BaseAddress, MemberId};
use crate::config::Config;
use crate::cube::Cube;
use crate::dimension::edit::DimensionEdit;
use crate::dimension::member::fold_name;
use crate::dimension::{Dimension, DimensionTables};
use crate::error::{
    default_error_sink, EngineError, EngineResult, ErrorRecord, ErrorSink,
};
use crate::persist::{
    image_dimension, restore_dimension_tables, CubeImage, DatabaseImage, DatabaseMetadata,
    FileJournal, JournalOp, PersistHook, StructureChange,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Shared engine services handed to every cube.
pub(crate) struct EngineHooks {
    pub config: Config,
    pub sink: RwLock<ErrorSink>,
    pub persist: Option<Arc<dyn PersistHook>>,
    /// The per-database write lock; all mutations serialize on it.
    pub write_lock: Mutex<()>,
}

impl EngineHooks {
    pub fn emit(&self, record: ErrorRecord) {
        let sink = self.sink.read().clone();
        (*sink)(&record);
    }
}

pub(crate) struct DatabaseInner {
    name: String,
    created_at: DateTime<Utc>,
    dimensions: RwLock<Vec<Arc<Dimension>>>,
    cubes: RwLock<Vec<Arc<Cube>>>,
    hooks: Arc<EngineHooks>,
}

/// Owning database handle. Clones share the same underlying state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// In-memory database with default configuration and no
    /// persistence.
    pub fn new(name: impl Into<String>) -> Self {
        Database::build(name.into(), Config::default(), None)
            .expect("in-memory database construction cannot fail")
    }

    /// Database with explicit configuration. When persistence is
    /// enabled the file journal under
    /// `{data_dir}/{name}` is loaded and replayed.
    pub fn with_config(name: impl Into<String>, config: Config) -> EngineResult<Self> {
        let name = name.into();
        let persist: Option<Arc<dyn PersistHook>> = if config.persistence.enabled {
            let dir = config.persistence.data_dir.join(&name);
            Some(Arc::new(FileJournal::new(
                dir,
                config.persistence.immediate_sync,
            )?))
        } else {
            None
        };
        Database::build(name, config, persist)
    }

    /// Database on a caller-supplied persistence backend.
    pub fn open(
        name: impl Into<String>,
        config: Config,
        persist: Arc<dyn PersistHook>,
    ) -> EngineResult<Self> {
        Database::build(name.into(), config, Some(persist))
    }

    fn build(
        name: String,
        config: Config,
        persist: Option<Arc<dyn PersistHook>>,
    ) -> EngineResult<Self> {
        let hooks = Arc::new(EngineHooks {
            config,
            sink: RwLock::new(default_error_sink()),
            persist,
            write_lock: Mutex::new(()),
        });
        let db = Database {
            inner: Arc::new(DatabaseInner {
                name: name.clone(),
                created_at: Utc::now(),
                dimensions: RwLock::new(Vec::new()),
                cubes: RwLock::new(Vec::new()),
                hooks,
            }),
        };
        db.recover()?;
        tracing::info!(database = %name, "database opened");
        Ok(db)
    }

    /// Load the snapshot and replay the journal from the configured
    /// backend.
    fn recover(&self) -> EngineResult<()> {
        let Some(persist) = self.inner.hooks.persist.clone() else {
            return Ok(());
        };
        if let Some(image) = persist.load_snapshot()? {
            self.inner.restore_image(image)?;
        }
        let ops = persist.replay_journal()?;
        if !ops.is_empty() {
            tracing::info!(count = ops.len(), "replaying journal");
            self.inner.apply_journal(ops)?;
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.inner.created_at
    }

    /// Replace the error sink receiving structured error records.
    pub fn set_error_sink(&self, sink: ErrorSink) {
        *self.inner.hooks.sink.write() = sink;
    }

    // ------------------------------------------------------------------
    // Dimensions
    // ------------------------------------------------------------------

    /// Register a new, empty dimension. Members are added through an
    /// edit session.
    pub fn add_dimension(&self, name: &str) -> EngineResult<Arc<Dimension>> {
        let _write_guard = self.inner.hooks.write_lock.lock();
        let dim = self.inner.insert_dimension(name)?;
        self.inner.journal_structure(&StructureChange::DimensionAdded {
            name: name.to_string(),
        })?;
        Ok(dim)
    }

    pub fn dimension(&self, name: &str) -> EngineResult<Arc<Dimension>> {
        self.inner.find_dimension(name)
    }

    /// Drop a dimension. Forbidden while any cube references it.
    pub fn remove_dimension(&self, name: &str) -> EngineResult<()> {
        let _write_guard = self.inner.hooks.write_lock.lock();
        self.inner.drop_dimension(name)?;
        self.inner.journal_structure(&StructureChange::DimensionRemoved {
            name: name.to_string(),
        })?;
        Ok(())
    }

    pub fn list_dimensions(&self) -> Vec<String> {
        self.inner
            .dimensions
            .read()
            .iter()
            .map(|d| d.name().to_string())
            .collect()
    }

    /// Open an edit session on a dimension. At most one session per
    /// dimension is open at a time.
    pub fn edit_dimension(&self, name: &str) -> EngineResult<DimensionEdit> {
        let dim = self.inner.find_dimension(name)?;
        if !dim.try_begin_edit() {
            return Err(EngineError::EditInProgress(name.to_string()));
        }
        Ok(DimensionEdit::new(Arc::clone(&self.inner), dim))
    }

    // ------------------------------------------------------------------
    // Cubes
    // ------------------------------------------------------------------

    /// Create a cube over previously registered dimensions, in the
    /// given order (the order is part of the cube's identity).
    pub fn add_cube(&self, name: &str, dimensions: &[&str]) -> EngineResult<Arc<Cube>> {
        let _write_guard = self.inner.hooks.write_lock.lock();
        let cube = self.inner.insert_cube(name, dimensions)?;
        self.inner.journal_structure(&StructureChange::CubeAdded {
            name: name.to_string(),
            dimensions: dimensions.iter().map(|d| (*d).to_string()).collect(),
        })?;
        Ok(cube)
    }

    pub fn cube(&self, name: &str) -> EngineResult<Arc<Cube>> {
        self.inner.find_cube(name)
    }

    pub fn remove_cube(&self, name: &str) -> EngineResult<()> {
        let _write_guard = self.inner.hooks.write_lock.lock();
        self.inner.drop_cube(name)?;
        self.inner.journal_structure(&StructureChange::CubeRemoved {
            name: name.to_string(),
        })?;
        Ok(())
    }

    pub fn list_cubes(&self) -> Vec<String> {
        self.inner
            .cubes
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Capture the database as a logical image. Rules are code and are
    /// not part of the image.
    pub fn image(&self) -> DatabaseImage {
        let dimensions = self
            .inner
            .dimensions
            .read()
            .iter()
            .map(|d| image_dimension(d))
            .collect();
        let cubes = self
            .inner
            .cubes
            .read()
            .iter()
            .map(|c| CubeImage {
                name: c.name().to_string(),
                dimensions: c.dimension_names(),
                facts: c
                    .export_facts()
                    .into_iter()
                    .map(|(addr, value)| (addr.coords().to_vec(), value))
                    .collect(),
            })
            .collect();
        DatabaseImage {
            metadata: DatabaseMetadata {
                name: self.inner.name.clone(),
                created_at: self.inner.created_at,
                engine_version: env!("CARGO_PKG_VERSION").to_string(),
            },
            dimensions,
            cubes,
        }
    }

    /// Save a snapshot through the persistence backend and truncate
    /// the journal.
    pub fn save(&self) -> EngineResult<()> {
        let Some(persist) = self.inner.hooks.persist.clone() else {
            return Err(EngineError::Persist(
                "no persistence backend configured".to_string(),
            ));
        };
        let _write_guard = self.inner.hooks.write_lock.lock();
        persist.save_snapshot(&self.image())
    }

    /// Flush a final snapshot if a backend is configured.
    pub fn close(self) -> EngineResult<()> {
        if self.inner.hooks.persist.is_some() {
            self.save()?;
        }
        tracing::info!(database = %self.inner.name, "database closed");
        Ok(())
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.inner.name)
            .field("dimensions", &self.list_dimensions())
            .field("cubes", &self.list_cubes())
            .finish()
    }
}

impl DatabaseInner {
    fn find_dimension(&self, name: &str) -> EngineResult<Arc<Dimension>> {
        let folded = fold_name(name);
        self.dimensions
            .read()
            .iter()
            .find(|d| fold_name(d.name()) == folded)
            .cloned()
            .ok_or_else(|| EngineError::DimensionNotFound(name.to_string()))
    }

    fn find_cube(&self, name: &str) -> EngineResult<Arc<Cube>> {
        let folded = fold_name(name);
        self.cubes
            .read()
            .iter()
            .find(|c| fold_name(c.name()) == folded)
            .cloned()
            .ok_or_else(|| EngineError::CubeNotFound(name.to_string()))
    }

    /// Insert without journaling; used by the public API and by replay.
    fn insert_dimension(&self, name: &str) -> EngineResult<Arc<Dimension>> {
        if self.find_dimension(name).is_ok() {
            return Err(EngineError::DimensionExists(name.to_string()));
        }
        let dim = Arc::new(Dimension::new(name));
        self.dimensions.write().push(Arc::clone(&dim));
        tracing::info!(dimension = name, "dimension added");
        Ok(dim)
    }

    fn drop_dimension(&self, name: &str) -> EngineResult<()> {
        let dim = self.find_dimension(name)?;
        for cube in self.cubes.read().iter() {
            if cube.references(&dim) {
                return Err(EngineError::DimensionInUse {
                    dimension: name.to_string(),
                    cube: cube.name().to_string(),
                });
            }
        }
        self.dimensions
            .write()
            .retain(|d| !Arc::ptr_eq(d, &dim));
        tracing::info!(dimension = name, "dimension removed");
        Ok(())
    }

    fn insert_cube(&self, name: &str, dimensions: &[&str]) -> EngineResult<Arc<Cube>> {
        if self.find_cube(name).is_ok() {
            return Err(EngineError::CubeExists(name.to_string()));
        }
        let dims = dimensions
            .iter()
            .map(|d| self.find_dimension(d))
            .collect::<EngineResult<Vec<_>>>()?;
        let cube = Arc::new(Cube::new(name, dims, Arc::clone(&self.hooks))?);
        self.cubes.write().push(Arc::clone(&cube));
        tracing::info!(cube = name, "cube added");
        Ok(cube)
    }

    fn drop_cube(&self, name: &str) -> EngineResult<()> {
        let cube = self.find_cube(name)?;
        self.cubes.write().retain(|c| !Arc::ptr_eq(c, &cube));
        tracing::info!(cube = name, "cube removed");
        Ok(())
    }

    fn journal_structure(&self, change: &StructureChange) -> EngineResult<()> {
        if let Some(persist) = &self.hooks.persist {
            persist.begin_batch()?;
            persist.append_structure_change(change)?;
            persist.commit_batch()?;
        }
        Ok(())
    }

    /// Commit an edit session: swap the tables in, cascade deletes for
    /// removed base members, journal the committed structure.
    pub(crate) fn commit_dimension(
        &self,
        dim: &Arc<Dimension>,
        tables: DimensionTables,
        removed: Vec<MemberId>,
    ) -> EngineResult<()> {
        let _write_guard = self.hooks.write_lock.lock();
        dim.install(tables);
        tracing::info!(
            dimension = dim.name(),
            version = dim.structure_version(),
            "dimension committed"
        );
        self.cascade_removed(dim, &removed);
        self.journal_structure(&StructureChange::DimensionCommitted {
            image: image_dimension(dim),
            removed_members: removed,
        })
    }

    fn cascade_removed(&self, dim: &Arc<Dimension>, removed: &[MemberId]) {
        if removed.is_empty() {
            return;
        }
        for cube in self.cubes.read().iter() {
            // the same dimension may occur at several positions
            for (pos, cube_dim) in cube.dimension_handles().iter().enumerate() {
                if !Arc::ptr_eq(cube_dim, dim) {
                    continue;
                }
                let deleted = cube.cascade_removed(pos, removed);
                if deleted > 0 {
                    let err = EngineError::InUse {
                        member: format!("{removed:?}"),
                        cube: cube.name().to_string(),
                        facts_removed: deleted,
                    };
                    self.hooks.emit(
                        ErrorRecord::new(err.kind(), err.to_string())
                            .with_cube(cube.name()),
                    );
                }
            }
        }
    }

    /// Rebuild state from a snapshot image. Only called on an empty,
    /// freshly constructed database.
    fn restore_image(&self, image: DatabaseImage) -> EngineResult<()> {
        for dim_image in &image.dimensions {
            let dim = self.insert_dimension(&dim_image.name)?;
            dim.install(restore_dimension_tables(dim_image));
        }
        for cube_image in &image.cubes {
            let dim_names: Vec<&str> =
                cube_image.dimensions.iter().map(String::as_str).collect();
            let cube = self.insert_cube(&cube_image.name, &dim_names)?;
            cube.import_facts(
                cube_image
                    .facts
                    .iter()
                    .map(|(coords, value)| (BaseAddress::new(coords.clone()), *value))
                    .collect(),
            );
        }
        Ok(())
    }

    /// Re-apply journaled operations after a snapshot load.
    fn apply_journal(&self, ops: Vec<JournalOp>) -> EngineResult<()> {
        for op in ops {
            match op {
                JournalOp::FactWrite { cube, coords, value } => {
                    let cube = self.find_cube(&cube)?;
                    cube.import_facts(vec![(BaseAddress::new(coords), value)]);
                }
                JournalOp::Structure(StructureChange::DimensionAdded { name }) => {
                    self.insert_dimension(&name)?;
                }
                JournalOp::Structure(StructureChange::DimensionRemoved { name }) => {
                    self.drop_dimension(&name)?;
                }
                JournalOp::Structure(StructureChange::DimensionCommitted {
                    image,
                    removed_members,
                }) => {
                    let dim = self.find_dimension(&image.name)?;
                    dim.install(restore_dimension_tables(&image));
                    self.cascade_removed(&dim, &removed_members);
                }
                JournalOp::Structure(StructureChange::CubeAdded { name, dimensions }) => {
                    let dim_names: Vec<&str> =
                        dimensions.iter().map(String::as_str).collect();
                    self.insert_cube(&name, &dim_names)?;
                }
                JournalOp::Structure(StructureChange::CubeRemoved { name }) => {
                    self.drop_cube(&name)?;
                }
            }
        }
        Ok(())
    }
}
