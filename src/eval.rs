//! # Evaluation Engine
//!
//! Pure read path for cell addresses. Control flow:
//!
//! ```text
//! evaluate(addr)
//!     |-- recursion guard (address already on the stack -> #REC)
//!     |-- result cache lookup (stamped with data/rules/structure versions)
//!     |-- rules: first trigger+scope match for the phase
//!     |     Value    -> final value
//!     |     None     -> no-value marker
//!     |     Error    -> #ERR (contained, logged, never cached)
//!     |     Continue -> fall through
//!     |-- base address     -> stored fact (absent reads as 0.0)
//!     `-- aggregated       -> weighted walk over stored facts,
//!                             re-entering evaluate() per leaf when
//!                             base-level rules exist
//! ```
//!
//! The walk multiplies each stored fact by the product of its
//! per-dimension expansion weights and sums in ascending packed-address
//! order, which makes results deterministic across runs. The whole
//! evaluation works against the dimension snapshots captured when the
//! read started, so a structural commit landing mid-read is invisible
//! to it.

use crate::address::{GeneralAddress, MemberId};
use crate::cache::VersionStamp;
use crate::cell::CellCursor;
use crate::cube::Cube;
use crate::facts::AreaMask;
use crate::dimension::DimensionTables;
use crate::rules::{Rule, RuleScope};
use crate::value::{CellError, CellValue, RuleResult};
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Per-read evaluation context. Created once at the outermost read;
/// shared by every nested evaluation the read triggers (rule re-entry,
/// per-leaf walks, cursor shifts).
pub(crate) struct EvalState {
    /// Version stamp captured before the snapshots, so a value computed
    /// from older snapshots can never be published under a newer stamp.
    pub stamp: VersionStamp,
    /// One consistent dimension snapshot per cube dimension.
    pub snapshots: Vec<Arc<DimensionTables>>,
    /// Addresses currently being evaluated on this read's stack.
    pub stack: Vec<GeneralAddress>,
    /// Bumped whenever a volatile rule runs; windows that saw a bump
    /// are not published to the cache.
    pub volatile_ops: u64,
    /// Bumped whenever a contained error occurs; same publication rule.
    pub error_ops: u64,
}

impl EvalState {
    pub fn new(cube: &Cube) -> Self {
        let stamp = cube.version_stamp();
        let snapshots = cube
            .dimension_handles()
            .iter()
            .map(|d| d.snapshot())
            .collect();
        EvalState {
            stamp,
            snapshots,
            stack: Vec::new(),
            volatile_ops: 0,
            error_ops: 0,
        }
    }
}

/// Evaluate one address within an in-flight read.
pub(crate) fn evaluate(
    cube: &Cube,
    addr: &GeneralAddress,
    state_cell: &RefCell<EvalState>,
) -> CellValue {
    if state_cell.borrow().stack.contains(addr) {
        state_cell.borrow_mut().error_ops += 1;
        cube.report_recursion(addr);
        return CellValue::Error(CellError::Recursion);
    }

    let stamp = state_cell.borrow().stamp.clone();
    if let Some(hit) = cube.cache().lookup(addr, &stamp) {
        cube.stats().record_cache_hit();
        return hit;
    }
    cube.stats().record_cache_miss();

    let (volatile_before, error_before) = {
        let state = state_cell.borrow();
        (state.volatile_ops, state.error_ops)
    };

    state_cell.borrow_mut().stack.push(addr.clone());
    let result = evaluate_uncached(cube, addr, state_cell);
    state_cell.borrow_mut().stack.pop();

    let clean = {
        let state = state_cell.borrow();
        state.volatile_ops == volatile_before && state.error_ops == error_before
    };
    if clean && !result.is_error() && cube.cache_enabled() {
        cube.cache().publish(addr.clone(), result, stamp);
    }
    result
}

fn evaluate_uncached(
    cube: &Cube,
    addr: &GeneralAddress,
    state_cell: &RefCell<EvalState>,
) -> CellValue {
    let is_base = {
        let state = state_cell.borrow();
        addr.coords()
            .iter()
            .enumerate()
            .all(|(dim, id)| state.snapshots[dim].is_base(*id))
    };

    // rule phase: base-leaf evaluation admits base-level rules, an
    // aggregated target admits aggregation-level rules
    let scopes: &[RuleScope] = if is_base {
        &[RuleScope::AllLevels, RuleScope::BaseLevel]
    } else {
        &[RuleScope::AllLevels, RuleScope::AggregationLevel]
    };
    let matched = cube.rules_read().first_match(addr, scopes);
    if let Some(rule) = matched {
        match invoke_rule(cube, &rule, addr, state_cell) {
            RuleOutcome::Value(v) => return CellValue::Value(v),
            RuleOutcome::None => return CellValue::None,
            RuleOutcome::Error => return CellValue::Error(CellError::Rule),
            RuleOutcome::Recursion => return CellValue::Error(CellError::Recursion),
            RuleOutcome::Continue => {}
        }
    }

    if is_base {
        let stored = cube.facts_read().read(&addr.to_base());
        return CellValue::Value(stored);
    }
    aggregate(cube, addr, state_cell)
}

enum RuleOutcome {
    Value(f64),
    None,
    Continue,
    Error,
    /// The rule surfaced a recursion marker it read; keep it a `#REC`.
    Recursion,
}

/// Invoke a rule body with a cursor bound to `addr`. Panics inside the
/// callable are caught and contained exactly like an explicit
/// `RuleResult::Error`.
fn invoke_rule(
    cube: &Cube,
    rule: &Arc<Rule>,
    addr: &GeneralAddress,
    state_cell: &RefCell<EvalState>,
) -> RuleOutcome {
    if rule.volatile {
        state_cell.borrow_mut().volatile_ops += 1;
    }
    tracing::debug!(rule = rule.name(), address = %addr, "invoking rule");

    let cursor = CellCursor::new(cube, addr.clone(), state_cell);
    let outcome = catch_unwind(AssertUnwindSafe(|| (rule.body)(&cursor)));
    match outcome {
        Ok(RuleResult::Value(v)) => RuleOutcome::Value(v),
        Ok(RuleResult::None) => RuleOutcome::None,
        Ok(RuleResult::Continue) => RuleOutcome::Continue,
        Ok(RuleResult::Error(msg)) => {
            state_cell.borrow_mut().error_ops += 1;
            if msg == CellError::Recursion.marker() {
                // already reported when the guard fired
                return RuleOutcome::Recursion;
            }
            cube.report_rule_error(addr, &format!("rule '{}': {msg}", rule.name()));
            RuleOutcome::Error
        }
        Err(panic) => {
            let msg = panic_message(&*panic);
            state_cell.borrow_mut().error_ops += 1;
            cube.report_rule_error(addr, &format!("rule '{}' panicked: {msg}", rule.name()));
            RuleOutcome::Error
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Weighted sum over the Cartesian product of the per-coordinate leaf
/// expansions, visiting only stored facts.
fn aggregate(
    cube: &Cube,
    addr: &GeneralAddress,
    state_cell: &RefCell<EvalState>,
) -> CellValue {
    let arity = addr.arity();
    let mut weights: Vec<HashMap<MemberId, f64>> = Vec::with_capacity(arity);
    let mut mask: AreaMask = Vec::with_capacity(arity);
    {
        let state = state_cell.borrow();
        for dim in 0..arity {
            let expansion = state.snapshots[dim].leaf_expansion(addr.coord(dim));
            mask.push(Some(expansion.iter().map(|(base, _)| *base).collect()));
            weights.push(expansion.iter().copied().collect());
        }
    }

    // collect under a short read lock; rules run with no lock held
    let facts = cube.facts_read().iter_area(&mask);
    let walk_rules = !cube.rules_read().no_read_rules();

    let mut sum = 0.0;
    for (base, stored) in facts {
        let leaf = if walk_rules {
            let leaf_addr = GeneralAddress::from(&base);
            match evaluate(cube, &leaf_addr, state_cell) {
                CellValue::Value(v) => v,
                // a rule producing "no value" contributes nothing
                CellValue::None => continue,
                // contained leaf failures poison the aggregate
                CellValue::Error(e) => return CellValue::Error(e),
            }
        } else {
            stored
        };
        let mut weight = 1.0;
        for (dim, map) in weights.iter().enumerate() {
            weight *= map.get(&base.coord(dim)).copied().unwrap_or(0.0);
        }
        sum += weight * leaf;
    }
    CellValue::Value(sum)
}
