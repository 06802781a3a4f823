//! # Cell Cursor
//!
//! The transient evaluation handle passed to rule callables. A cursor
//! is bound to (cube, address, evaluation context); shifting a
//! coordinate produces a *new* cursor, and reading or doing arithmetic
//! on a cursor forces evaluation through the engine, recursion guard
//! and cache included.
//!
//! ## Example
//!
//! ```rust,ignore
//! // inside a rule body, with `c: &CellCursor`
//! let plan = c.get("Plan");            // shift "datatypes" to Plan and read
//! if plan.is_truthy() {
//!     (c.get("Delta") / plan).into()   // RuleResult::Value
//! } else {
//!     RuleResult::None
//! }
//! ```

use crate::address::GeneralAddress;
use crate::cube::Cube;
use crate::dimension::member::fold_name;
use crate::error::{EngineError, EngineResult};
use crate::eval::{evaluate, EvalState};
use crate::value::{CellError, CellValue};
use std::cell::RefCell;
use std::ops::{Add, Div, Mul, Sub};

/// Evaluation handle bound to one address.
pub struct CellCursor<'a> {
    cube: &'a Cube,
    addr: GeneralAddress,
    state: &'a RefCell<EvalState>,
}

impl<'a> CellCursor<'a> {
    pub(crate) fn new(
        cube: &'a Cube,
        addr: GeneralAddress,
        state: &'a RefCell<EvalState>,
    ) -> Self {
        CellCursor { cube, addr, state }
    }

    /// Evaluate the bound address.
    pub fn value(&self) -> CellValue {
        evaluate(self.cube, &self.addr, self.state)
    }

    /// New cursor with one coordinate shifted to `member`. The
    /// dimension is found by unique member-name search (or named
    /// explicitly as `"dimension:member"`); an ambiguous or unknown
    /// name fails.
    pub fn shift(&self, member: &str) -> EngineResult<CellCursor<'a>> {
        let (dim, id) = self.locate(member)?;
        Ok(CellCursor {
            cube: self.cube,
            addr: self.addr.with_coord(dim, id),
            state: self.state,
        })
    }

    /// Shift and evaluate in one step. Resolution failures are
    /// contained: they are reported through the error sink and read as
    /// the `#ERR` marker, so rule bodies stay straight-line.
    pub fn get(&self, member: &str) -> CellValue {
        match self.shift(member) {
            Ok(cursor) => cursor.value(),
            Err(err) => {
                self.state.borrow_mut().error_ops += 1;
                self.cube.report_rule_error(&self.addr, &err.to_string());
                CellValue::Error(CellError::Rule)
            }
        }
    }

    /// Display name of the current coordinate in `dimension`.
    pub fn member_name(&self, dimension: &str) -> Option<String> {
        let folded = fold_name(dimension);
        let state = self.state.borrow();
        let dim = self
            .cube
            .dimension_handles()
            .iter()
            .position(|d| fold_name(d.name()) == folded)?;
        state.snapshots[dim]
            .member_name(self.addr.coord(dim))
            .map(str::to_string)
    }

    fn locate(&self, member: &str) -> EngineResult<(usize, u32)> {
        let state = self.state.borrow();
        let dims = self.cube.dimension_handles();

        // qualified form first
        if let Some((head, rest)) = member.split_once(':') {
            let folded = fold_name(head);
            if let Some(dim) = dims.iter().position(|d| fold_name(d.name()) == folded) {
                let id = state.snapshots[dim]
                    .member_id(rest.trim())
                    .ok_or_else(|| EngineError::UnknownMember(rest.trim().to_string()))?;
                return Ok((dim, id));
            }
        }

        let mut hit: Option<(usize, u32)> = None;
        for (dim, tables) in state.snapshots.iter().enumerate() {
            if let Some(id) = tables.member_id(member) {
                if let Some((first, _)) = hit {
                    return Err(EngineError::AmbiguousMember {
                        name: member.to_string(),
                        first: dims[first].name().to_string(),
                        second: dims[dim].name().to_string(),
                    });
                }
                hit = Some((dim, id));
            }
        }
        hit.ok_or_else(|| EngineError::UnknownMember(member.to_string()))
    }
}

// Arithmetic on cursors forces evaluation and yields plain cell values.

impl<'a, 'c> Add for &'c CellCursor<'a> {
    type Output = CellValue;
    fn add(self, rhs: Self) -> CellValue {
        self.value() + rhs.value()
    }
}

impl<'a, 'c> Sub for &'c CellCursor<'a> {
    type Output = CellValue;
    fn sub(self, rhs: Self) -> CellValue {
        self.value() - rhs.value()
    }
}

impl<'a, 'c> Mul for &'c CellCursor<'a> {
    type Output = CellValue;
    fn mul(self, rhs: Self) -> CellValue {
        self.value() * rhs.value()
    }
}

impl<'a, 'c> Div for &'c CellCursor<'a> {
    type Output = CellValue;
    fn div(self, rhs: Self) -> CellValue {
        self.value() / rhs.value()
    }
}

impl<'a, 'c> Add<f64> for &'c CellCursor<'a> {
    type Output = CellValue;
    fn add(self, rhs: f64) -> CellValue {
        self.value() + rhs
    }
}

impl<'a, 'c> Sub<f64> for &'c CellCursor<'a> {
    type Output = CellValue;
    fn sub(self, rhs: f64) -> CellValue {
        self.value() - rhs
    }
}

impl<'a, 'c> Mul<f64> for &'c CellCursor<'a> {
    type Output = CellValue;
    fn mul(self, rhs: f64) -> CellValue {
        self.value() * rhs
    }
}

impl<'a, 'c> Div<f64> for &'c CellCursor<'a> {
    type Output = CellValue;
    fn div(self, rhs: f64) -> CellValue {
        self.value() / rhs
    }
}
