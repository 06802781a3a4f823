//! # Area Operations
//!
//! An area is the Cartesian product of per-dimension selectors. Bulk
//! operations (write, clear, scale, copy, enumerate) run as one logical
//! batch: on-entry rules apply per cell, the data version is bumped
//! once at batch end, and the journal receives a single batch.
//!
//! `set_value(v, expand_all=false)` overwrites only *existing* stored
//! facts inside the area; `expand_all=true` enumerates the full product
//! of leaf expansions and re-creates every base cell, including cells
//! previously removed by a zero write or a cascade. Full expansion is
//! guarded by the configured `max_area_cells` limit.

use crate::address::{BaseAddress, Coordinate, MemberId, ResolvedAddress};
use crate::cube::Cube;
use crate::dimension::DimensionTables;
use crate::error::{EngineError, EngineResult};
use crate::facts::AreaMask;
use crate::resolver::Resolver;
use std::collections::BTreeSet;
use std::sync::Arc;

/// A resolved area of one cube.
pub struct Area<'c> {
    cube: &'c Cube,
    resolved: ResolvedAddress,
    snapshots: Vec<Arc<DimensionTables>>,
}

impl<'c> Area<'c> {
    pub(crate) fn new(cube: &'c Cube, tokens: &[&str]) -> EngineResult<Self> {
        let snapshots: Vec<_> = cube
            .dimension_handles()
            .iter()
            .map(|d| d.snapshot())
            .collect();
        let resolved =
            Resolver::new(cube.dimension_handles(), &snapshots).resolve_area(tokens)?;
        Ok(Area {
            cube,
            resolved,
            snapshots,
        })
    }

    /// Base member ids per dimension: the union of the leaf expansions
    /// of every selected member, ascending.
    fn base_lists(&self) -> Vec<Vec<MemberId>> {
        self.resolved
            .coords()
            .iter()
            .enumerate()
            .map(|(dim, coord)| {
                let mut bases = BTreeSet::new();
                for member in coord.members() {
                    for (base, _) in self.snapshots[dim].leaf_expansion(*member).iter() {
                        bases.insert(*base);
                    }
                }
                bases.into_iter().collect()
            })
            .collect()
    }

    fn mask(&self) -> AreaMask {
        self.base_lists()
            .into_iter()
            .map(|list| Some(list.into_iter().collect()))
            .collect()
    }

    /// Stored facts inside the area, sorted by address.
    fn stored(&self) -> Vec<(BaseAddress, f64)> {
        self.cube.facts_read().iter_area(&self.mask())
    }

    /// Number of stored facts inside the area.
    pub fn fact_count(&self) -> usize {
        self.stored().len()
    }

    /// Stored facts with display names, sorted by address.
    pub fn cells(&self) -> Vec<(Vec<String>, f64)> {
        self.stored()
            .into_iter()
            .map(|(addr, value)| {
                let names = addr
                    .coords()
                    .iter()
                    .enumerate()
                    .map(|(dim, id)| {
                        self.snapshots[dim]
                            .member_name(*id)
                            .unwrap_or("?")
                            .to_string()
                    })
                    .collect();
                (names, value)
            })
            .collect()
    }

    /// Write `value` across the area. With `expand_all` every base cell
    /// in the full expansion is written; otherwise only existing stored
    /// facts are overwritten. Returns the number of cells written.
    pub fn set_value(&self, value: f64, expand_all: bool) -> EngineResult<usize> {
        let _write_guard = self.cube.hooks().write_lock.lock();
        let writes: Vec<(BaseAddress, f64)> = if expand_all {
            self.full_expansion()?
                .into_iter()
                .map(|addr| (addr, value))
                .collect()
        } else {
            self.stored()
                .into_iter()
                .map(|(addr, _)| (addr, value))
                .collect()
        };
        self.cube.write_batch_locked(&writes)
    }

    /// Remove every stored fact inside the area.
    pub fn clear(&self) -> EngineResult<usize> {
        let _write_guard = self.cube.hooks().write_lock.lock();
        let writes: Vec<(BaseAddress, f64)> = self
            .stored()
            .into_iter()
            .map(|(addr, _)| (addr, 0.0))
            .collect();
        self.cube.write_batch_locked(&writes)
    }

    /// Multiply every stored fact inside the area by `factor`.
    pub fn scale(&self, factor: f64) -> EngineResult<usize> {
        let _write_guard = self.cube.hooks().write_lock.lock();
        let writes: Vec<(BaseAddress, f64)> = self
            .stored()
            .into_iter()
            .map(|(addr, value)| (addr, value * factor))
            .collect();
        self.cube.write_batch_locked(&writes)
    }

    /// Copy the area's stored facts to a shifted target: `target`
    /// names single base members for the dimensions being replaced
    /// (e.g. copy `2021` facts onto `2022`). Returns the number of
    /// cells written.
    pub fn copy_to(&self, target: &[&str]) -> EngineResult<usize> {
        let coords = Resolver::new(self.cube.dimension_handles(), &self.snapshots)
            .resolve_trigger(target)?;

        let mut replacements: Vec<(usize, MemberId)> = Vec::new();
        for (dim, coord) in coords.iter().enumerate() {
            match coord {
                None => {}
                Some(Coordinate::One(id)) => {
                    if !self.snapshots[dim].is_base(*id) {
                        let name = self.snapshots[dim].member_name(*id).unwrap_or("?");
                        return Err(EngineError::NotBaseAddress(name.to_string()));
                    }
                    replacements.push((dim, *id));
                }
                Some(Coordinate::Many(_)) => {
                    return Err(EngineError::TypeError(
                        "copy target must name single members".to_string(),
                    ))
                }
            }
        }
        if replacements.is_empty() {
            return Err(EngineError::TypeError(
                "copy target names no dimension of the cube".to_string(),
            ));
        }

        let _write_guard = self.cube.hooks().write_lock.lock();
        let writes: Vec<(BaseAddress, f64)> = self
            .stored()
            .into_iter()
            .map(|(addr, value)| {
                let mut shifted = addr;
                for (dim, id) in &replacements {
                    shifted = shifted.with_coord(*dim, *id);
                }
                (shifted, value)
            })
            .collect();
        self.cube.write_batch_locked(&writes)
    }

    /// Move the area's stored facts to a shifted target: copy, then
    /// clear the source cells. Returns the number of cells written at
    /// the target.
    pub fn shift_to(&self, target: &[&str]) -> EngineResult<usize> {
        let moved = self.copy_to(target)?;
        self.clear()?;
        Ok(moved)
    }

    /// The full Cartesian product of per-dimension base lists, guarded
    /// by the configured area limit.
    fn full_expansion(&self) -> EngineResult<Vec<BaseAddress>> {
        let lists = self.base_lists();
        let limit = self.cube.hooks().config.limits.max_area_cells;
        let mut cells: u64 = 1;
        for list in &lists {
            cells = cells
                .checked_mul(list.len() as u64)
                .ok_or(EngineError::AreaTooLarge { cells: u64::MAX, limit })?;
        }
        if cells > limit {
            return Err(EngineError::AreaTooLarge { cells, limit });
        }
        if lists.iter().any(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(cells as usize);
        let mut idx = vec![0usize; lists.len()];
        loop {
            out.push(BaseAddress::new(
                idx.iter()
                    .zip(&lists)
                    .map(|(i, list)| list[*i])
                    .collect(),
            ));
            let mut dim = lists.len();
            loop {
                if dim == 0 {
                    return Ok(out);
                }
                dim -= 1;
                idx[dim] += 1;
                if idx[dim] < lists[dim].len() {
                    break;
                }
                idx[dim] = 0;
            }
        }
    }
}
