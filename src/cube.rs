//! # Cubes
//!
//! A cube binds an ordered tuple of dimensions (the order is part of
//! its identity) to a sparse fact store, an ordered rule list and a
//! result cache. All cell access goes through the cube facade:
//! indexed read/write by member names or pre-built addresses, area
//! access by partial address, rule registration and command dispatch.
//!
//! ## Example
//!
//! ```rust,ignore
//! let sales = db.add_cube("sales", &["datatypes", "years", "regions"])?;
//! sales.write(&["Plan", "2021", "North"], 400.0)?;
//! let total = sales.read(&["Plan", "2021", "Total"])?;
//! ```

use crate::address::{BaseAddress, GeneralAddress};
use crate::area::Area;
use crate::cache::{ResultCache, VersionStamp};
use crate::cell::CellCursor;
use crate::database::EngineHooks;
use crate::dimension::Dimension;
use crate::error::{EngineError, EngineResult, ErrorRecord};
use crate::eval::{evaluate, EvalState};
use crate::facts::FactStore;
use crate::resolver::{display_general, Resolver};
use crate::rules::{RuleDef, RuleId, RuleRegistry, RuleScope};
use crate::value::{CellValue, RuleResult};
use parking_lot::{RwLock, RwLockReadGuard};
use std::cell::RefCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Cube access counters, readable as a [`CubeStats`] snapshot.
#[derive(Default)]
pub(crate) struct Counters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    writes: AtomicU64,
}

impl Counters {
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time cube statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubeStats {
    pub stored_facts: usize,
    pub size_estimate_bytes: usize,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub writes: u64,
}

/// A multi-dimensional cube over shared dimensions.
pub struct Cube {
    name: String,
    dims: Vec<Arc<Dimension>>,
    facts: RwLock<FactStore>,
    rules: RwLock<RuleRegistry>,
    cache: ResultCache,
    data_version: AtomicU64,
    rules_version: AtomicU64,
    counters: Counters,
    hooks: Arc<EngineHooks>,
}

impl Cube {
    pub(crate) fn new(
        name: impl Into<String>,
        dims: Vec<Arc<Dimension>>,
        hooks: Arc<EngineHooks>,
    ) -> EngineResult<Self> {
        let name = name.into();
        if dims.is_empty() {
            return Err(EngineError::EmptyCube(name));
        }
        let max = hooks.config.limits.max_dimensions;
        if dims.len() > max {
            return Err(EngineError::TooManyDimensions {
                cube: name,
                got: dims.len(),
                max,
            });
        }
        let arity = dims.len();
        Ok(Cube {
            name,
            dims,
            facts: RwLock::new(FactStore::new(arity)),
            rules: RwLock::new(RuleRegistry::new()),
            cache: ResultCache::new(hooks.config.cache.capacity),
            data_version: AtomicU64::new(1),
            rules_version: AtomicU64::new(1),
            counters: Counters::default(),
            hooks,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dimension names in cube order.
    pub fn dimension_names(&self) -> Vec<String> {
        self.dims.iter().map(|d| d.name().to_string()).collect()
    }

    pub(crate) fn dimension_handles(&self) -> &[Arc<Dimension>] {
        &self.dims
    }

    pub(crate) fn references(&self, dim: &Arc<Dimension>) -> bool {
        self.dims.iter().any(|d| Arc::ptr_eq(d, dim))
    }

    // ------------------------------------------------------------------
    // Versioning
    // ------------------------------------------------------------------

    pub(crate) fn version_stamp(&self) -> VersionStamp {
        VersionStamp {
            data: self.data_version.load(Ordering::Acquire),
            rules: self.rules_version.load(Ordering::Acquire),
            structure: self.dims.iter().map(|d| d.structure_version()).collect(),
        }
    }

    pub(crate) fn bump_data_version(&self) {
        self.data_version.fetch_add(1, Ordering::AcqRel);
    }

    // ------------------------------------------------------------------
    // Component access for the evaluation engine
    // ------------------------------------------------------------------

    pub(crate) fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub(crate) fn cache_enabled(&self) -> bool {
        self.hooks.config.cache.enabled
    }

    pub(crate) fn stats(&self) -> &Counters {
        &self.counters
    }

    pub(crate) fn facts_read(&self) -> RwLockReadGuard<'_, FactStore> {
        self.facts.read()
    }

    pub(crate) fn rules_read(&self) -> RwLockReadGuard<'_, RuleRegistry> {
        self.rules.read()
    }

    pub(crate) fn report_rule_error(&self, addr: &GeneralAddress, message: &str) {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        self.hooks.emit(
            ErrorRecord::new("RuleError", message)
                .with_cube(&self.name)
                .with_address(display_general(&snapshots, addr)),
        );
    }

    pub(crate) fn report_recursion(&self, addr: &GeneralAddress) {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        self.hooks.emit(
            ErrorRecord::new("RuleRecursion", "evaluation re-entered an in-flight address")
                .with_cube(&self.name)
                .with_address(display_general(&snapshots, addr)),
        );
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Resolve an address without evaluating it.
    pub fn resolve(&self, tokens: &[&str]) -> EngineResult<GeneralAddress> {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        Resolver::new(&self.dims, &snapshots).resolve_cell(tokens)
    }

    /// Evaluate a cell address given as member-name tokens.
    pub fn read(&self, tokens: &[&str]) -> EngineResult<CellValue> {
        let state = RefCell::new(EvalState::new(self));
        let addr = {
            let snapshots = state.borrow().snapshots.clone();
            Resolver::new(&self.dims, &snapshots).resolve_cell(tokens)?
        };
        Ok(evaluate(self, &addr, &state))
    }

    /// Evaluate a pre-built general address.
    pub fn read_addr(&self, addr: &GeneralAddress) -> EngineResult<CellValue> {
        self.check_addr(addr)?;
        let state = RefCell::new(EvalState::new(self));
        Ok(evaluate(self, addr, &state))
    }

    fn check_addr(&self, addr: &GeneralAddress) -> EngineResult<()> {
        if addr.arity() != self.dims.len() {
            return Err(EngineError::TypeError(format!(
                "address arity {} does not match cube arity {}",
                addr.arity(),
                self.dims.len()
            )));
        }
        for (dim, id) in addr.coords().iter().enumerate() {
            if self.dims[dim].snapshot().member(*id).is_none() {
                return Err(EngineError::UnknownMember(format!(
                    "id {id} in dimension '{}'",
                    self.dims[dim].name()
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Write a base cell given as member-name tokens. Writing `0.0`
    /// removes the fact; writes to aggregated members are rejected.
    pub fn write(&self, tokens: &[&str], value: f64) -> EngineResult<()> {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        let addr = Resolver::new(&self.dims, &snapshots).resolve_cell(tokens)?;
        let base = self.require_base(&addr)?;
        let _write_guard = self.hooks.write_lock.lock();
        self.write_base_locked(&base, value)
    }

    /// Write through a pre-built base address.
    pub fn write_addr(&self, addr: &BaseAddress, value: f64) -> EngineResult<()> {
        let general = GeneralAddress::from(addr);
        self.check_addr(&general)?;
        let base = self.require_base(&general)?;
        let _write_guard = self.hooks.write_lock.lock();
        self.write_base_locked(&base, value)
    }

    fn require_base(&self, addr: &GeneralAddress) -> EngineResult<BaseAddress> {
        for (dim, id) in addr.coords().iter().enumerate() {
            let tables = self.dims[dim].snapshot();
            if !tables.is_base(*id) {
                let name = tables.member_name(*id).unwrap_or("?").to_string();
                return Err(EngineError::NotBaseAddress(name));
            }
        }
        Ok(addr.to_base())
    }

    /// Single-cell write with the database write lock already held.
    /// On-entry rules run first and may rewrite, drop or reject the
    /// value; the journal batch wraps the final mutation.
    pub(crate) fn write_base_locked(&self, addr: &BaseAddress, value: f64) -> EngineResult<()> {
        let value = self.apply_on_entry(addr, value)?;
        self.facts.write().write(addr, value);
        self.bump_data_version();
        self.counters.record_write();
        if let Some(persist) = &self.hooks.persist {
            persist.begin_batch()?;
            persist.append_fact_write(&self.name, addr, value)?;
            persist.commit_batch()?;
        }
        Ok(())
    }

    /// Apply a batch of base writes as one logical operation: the data
    /// version is bumped once and the journal gets a single batch.
    pub(crate) fn write_batch_locked(
        &self,
        writes: &[(BaseAddress, f64)],
    ) -> EngineResult<usize> {
        let mut resolved = Vec::with_capacity(writes.len());
        for (addr, value) in writes {
            resolved.push((addr.clone(), self.apply_on_entry(addr, *value)?));
        }
        {
            let mut facts = self.facts.write();
            for (addr, value) in &resolved {
                facts.write(addr, *value);
            }
        }
        self.bump_data_version();
        self.counters.record_write();
        if let Some(persist) = &self.hooks.persist {
            persist.begin_batch()?;
            for (addr, value) in &resolved {
                persist.append_fact_write(&self.name, addr, *value)?;
            }
            persist.commit_batch()?;
        }
        Ok(resolved.len())
    }

    /// Run the first matching on-entry rule for a write. `Continue`
    /// accepts the value, `Value` rewrites it, `None` turns the write
    /// into a removal, `Error` rejects the write.
    fn apply_on_entry(&self, addr: &BaseAddress, value: f64) -> EngineResult<f64> {
        let general = GeneralAddress::from(addr);
        let matched = self
            .rules
            .read()
            .first_match(&general, &[RuleScope::OnEntry]);
        let Some(rule) = matched else {
            return Ok(value);
        };
        let state = RefCell::new(EvalState::new(self));
        let cursor = CellCursor::new(self, general.clone(), &state);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (rule.body)(&cursor)
        }))
        .unwrap_or_else(|_| {
            RuleResult::Error(format!("on-entry rule '{}' panicked", rule.name()))
        });
        match outcome {
            RuleResult::Continue => Ok(value),
            RuleResult::Value(v) => Ok(v),
            RuleResult::None => Ok(0.0),
            RuleResult::Error(msg) => {
                self.report_rule_error(&general, &msg);
                Err(EngineError::RuleError(msg))
            }
        }
    }

    /// Cascade for a dimension edit that removed base members: drop
    /// every stored fact referencing them. Returns the removed count.
    pub(crate) fn cascade_removed(&self, dim_pos: usize, removed: &[u32]) -> usize {
        let deleted = self.facts.write().cascade_remove(dim_pos, removed);
        if deleted > 0 {
            self.bump_data_version();
        }
        deleted
    }

    // ------------------------------------------------------------------
    // Areas
    // ------------------------------------------------------------------

    /// Resolve an area from partial address tokens.
    pub fn area(&self, tokens: &[&str]) -> EngineResult<Area<'_>> {
        Area::new(self, tokens)
    }

    pub(crate) fn hooks(&self) -> &Arc<EngineHooks> {
        &self.hooks
    }

    // ------------------------------------------------------------------
    // Rules
    // ------------------------------------------------------------------

    /// Register a rule; its trigger tokens are resolved against the
    /// current dimension structures. Registration invalidates cached
    /// results by bumping the rules version.
    pub fn add_rule(&self, def: RuleDef) -> EngineResult<RuleId> {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        let trigger_tokens: Vec<&str> = def.trigger.iter().map(String::as_str).collect();
        let trigger =
            Resolver::new(&self.dims, &snapshots).resolve_trigger(&trigger_tokens)?;

        let _write_guard = self.hooks.write_lock.lock();
        let rule = self.rules.write().register(def, trigger);
        self.rules_version.fetch_add(1, Ordering::AcqRel);
        tracing::info!(cube = %self.name, rule = rule.name(), scope = %rule.scope(), "rule registered");
        Ok(rule.id())
    }

    /// Remove a rule by id, invalidating cached results that may have
    /// depended on it.
    pub fn remove_rule(&self, id: RuleId) -> EngineResult<()> {
        let _write_guard = self.hooks.write_lock.lock();
        let removed = self.rules.write().unregister(id);
        match removed {
            Some(rule) => {
                self.rules_version.fetch_add(1, Ordering::AcqRel);
                tracing::info!(cube = %self.name, rule = rule.name(), "rule removed");
                Ok(())
            }
            None => Err(EngineError::TypeError(format!(
                "rule id {id} is not registered on cube '{}'",
                self.name
            ))),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().len()
    }

    /// Human-readable listing of registered rules.
    pub fn describe_rules(&self) -> String {
        self.rules.read().describe()
    }

    /// Dispatch a command rule by keyword at the given address. The
    /// first command rule carrying the keyword whose trigger admits the
    /// address runs; its value (if any) is returned.
    pub fn execute_command(&self, keyword: &str, tokens: &[&str]) -> EngineResult<CellValue> {
        let state = RefCell::new(EvalState::new(self));
        let addr = {
            let snapshots = state.borrow().snapshots.clone();
            Resolver::new(&self.dims, &snapshots).resolve_cell(tokens)?
        };
        let matched = self.rules.read().first_command(keyword, &addr);
        let Some(rule) = matched else {
            return Err(EngineError::TypeError(format!(
                "no command rule for keyword '{keyword}' at this address"
            )));
        };
        let cursor = CellCursor::new(self, addr.clone(), &state);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            (rule.body)(&cursor)
        }))
        .unwrap_or_else(|_| {
            RuleResult::Error(format!("command rule '{}' panicked", rule.name()))
        });
        match outcome {
            RuleResult::Value(v) => Ok(CellValue::Value(v)),
            RuleResult::None | RuleResult::Continue => Ok(CellValue::None),
            RuleResult::Error(msg) => {
                self.report_rule_error(&addr, &msg);
                Err(EngineError::RuleError(msg))
            }
        }
    }

    // ------------------------------------------------------------------
    // Statistics & enumeration
    // ------------------------------------------------------------------

    /// Number of stored (non-zero) base facts.
    pub fn fact_count(&self) -> usize {
        self.facts.read().count()
    }

    /// Rough in-memory footprint of the fact store.
    pub fn size_estimate(&self) -> usize {
        self.facts.read().size_estimate()
    }

    pub fn cube_stats(&self) -> CubeStats {
        let facts = self.facts.read();
        CubeStats {
            stored_facts: facts.count(),
            size_estimate_bytes: facts.size_estimate(),
            cache_entries: self.cache.len(),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
        }
    }

    /// Stored facts with display names, sorted by address.
    pub fn fact_entries(&self) -> Vec<(Vec<String>, f64)> {
        let snapshots: Vec<_> = self.dims.iter().map(|d| d.snapshot()).collect();
        self.facts
            .read()
            .all_facts()
            .into_iter()
            .map(|(addr, value)| {
                let names = addr
                    .coords()
                    .iter()
                    .enumerate()
                    .map(|(dim, id)| {
                        snapshots[dim]
                            .member_name(*id)
                            .unwrap_or("?")
                            .to_string()
                    })
                    .collect();
                (names, value)
            })
            .collect()
    }

    /// Stored facts in packed form, for snapshot imaging.
    pub(crate) fn export_facts(&self) -> Vec<(BaseAddress, f64)> {
        self.facts.read().all_facts()
    }

    /// Bulk-load facts without on-entry rules or journaling; used by
    /// snapshot restore and journal replay.
    pub(crate) fn import_facts(&self, facts: Vec<(BaseAddress, f64)>) {
        let mut store = self.facts.write();
        for (addr, value) in facts {
            store.write(&addr, value);
        }
        drop(store);
        self.bump_data_version();
    }
}

impl std::fmt::Debug for Cube {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cube")
            .field("name", &self.name)
            .field("dimensions", &self.dimension_names())
            .field("facts", &self.fact_count())
            .field("rules", &self.rule_count())
            .finish()
    }
}
