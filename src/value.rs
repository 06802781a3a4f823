//! # Cell Value Types
//!
//! Core value types for cell evaluation: a cell read produces either a
//! numeric value, the explicit "no value" marker, or a contained error
//! marker (`#ERR` / `#REC`). Rule callables return a [`RuleResult`], the
//! explicit variant form of the rule ABI.
//!
//! ## Usage
//!
//! ```rust
//! use cuboid::value::{CellValue, RuleResult};
//!
//! let a = CellValue::Value(150.0);
//! let b = CellValue::Value(100.0);
//! assert_eq!(a - b, CellValue::Value(50.0));
//!
//! // The no-value marker is the identity for addition
//! assert_eq!(a + CellValue::None, CellValue::Value(150.0));
//!
//! // Rules classify their outcome explicitly
//! let r = RuleResult::Value(0.5);
//! assert!(matches!(r, RuleResult::Value(_)));
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// Contained per-cell evaluation failures. These never abort a surrounding
/// read or area operation; they surface as display markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CellError {
    /// A rule callable failed (returned an error or panicked). Displays as `#ERR`.
    Rule,
    /// Evaluation re-entered an address already on the evaluation stack.
    /// Displays as `#REC`.
    Recursion,
}

impl CellError {
    /// The display marker for this error kind.
    pub fn marker(self) -> &'static str {
        match self {
            CellError::Rule => "#ERR",
            CellError::Recursion => "#REC",
        }
    }
}

/// The result of evaluating a cell address.
///
/// `None` is an explicit "no value" marker distinct from `Value(0.0)`:
/// a stored zero does not exist (the store is sparse) and a missing fact
/// reads as zero, but a rule may deliberately produce "no value", which
/// aggregation skips.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CellValue {
    /// A numeric cell value.
    Value(f64),
    /// The explicit "no value" marker.
    None,
    /// A contained evaluation error marker.
    Error(CellError),
}

impl CellValue {
    pub const ZERO: CellValue = CellValue::Value(0.0);

    pub fn is_none(&self) -> bool {
        matches!(self, CellValue::None)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CellValue::Error(_))
    }

    pub fn is_value(&self) -> bool {
        matches!(self, CellValue::Value(_))
    }

    /// Numeric view. The no-value marker coerces to `0.0`, as do error
    /// markers; callers that must distinguish check the variant first.
    pub fn as_f64(&self) -> f64 {
        match self {
            CellValue::Value(v) => *v,
            CellValue::None | CellValue::Error(_) => 0.0,
        }
    }

    /// Truthiness used by rule bodies: a present, non-zero numeric value.
    pub fn is_truthy(&self) -> bool {
        matches!(self, CellValue::Value(v) if *v != 0.0)
    }
}

impl From<f64> for CellValue {
    fn from(v: f64) -> Self {
        CellValue::Value(v)
    }
}

impl PartialEq<f64> for CellValue {
    fn eq(&self, other: &f64) -> bool {
        matches!(self, CellValue::Value(v) if v == other)
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Value(v) => write!(f, "{v}"),
            CellValue::None => Ok(()),
            CellValue::Error(e) => write!(f, "{}", e.marker()),
        }
    }
}

/// Errors dominate, otherwise the no-value marker coerces to `0.0` and
/// arithmetic is plain IEEE-754 double precision.
fn combine(lhs: CellValue, rhs: CellValue, op: impl Fn(f64, f64) -> f64) -> CellValue {
    match (lhs, rhs) {
        (CellValue::Error(e), _) | (_, CellValue::Error(e)) => CellValue::Error(e),
        (a, b) => CellValue::Value(op(a.as_f64(), b.as_f64())),
    }
}

impl Add for CellValue {
    type Output = CellValue;
    fn add(self, rhs: CellValue) -> CellValue {
        combine(self, rhs, |a, b| a + b)
    }
}

impl Sub for CellValue {
    type Output = CellValue;
    fn sub(self, rhs: CellValue) -> CellValue {
        combine(self, rhs, |a, b| a - b)
    }
}

impl Mul for CellValue {
    type Output = CellValue;
    fn mul(self, rhs: CellValue) -> CellValue {
        combine(self, rhs, |a, b| a * b)
    }
}

impl Div for CellValue {
    type Output = CellValue;
    fn div(self, rhs: CellValue) -> CellValue {
        combine(self, rhs, |a, b| a / b)
    }
}

impl Neg for CellValue {
    type Output = CellValue;
    fn neg(self) -> CellValue {
        match self {
            CellValue::Value(v) => CellValue::Value(-v),
            other => other,
        }
    }
}

impl Add<f64> for CellValue {
    type Output = CellValue;
    fn add(self, rhs: f64) -> CellValue {
        self + CellValue::Value(rhs)
    }
}

impl Sub<f64> for CellValue {
    type Output = CellValue;
    fn sub(self, rhs: f64) -> CellValue {
        self - CellValue::Value(rhs)
    }
}

impl Mul<f64> for CellValue {
    type Output = CellValue;
    fn mul(self, rhs: f64) -> CellValue {
        self * CellValue::Value(rhs)
    }
}

impl Div<f64> for CellValue {
    type Output = CellValue;
    fn div(self, rhs: f64) -> CellValue {
        self / CellValue::Value(rhs)
    }
}

/// Classified return of a rule callable.
///
/// The engine integrates the variants into evaluation:
/// - `Value(v)` is the final value for the current phase
/// - `None` makes the result the no-value marker
/// - `Continue` means "proceed as if no rule matched"
/// - `Error(msg)` is logged through the error sink and the cell is
///   marked `#ERR`
#[derive(Debug, Clone, PartialEq)]
pub enum RuleResult {
    Value(f64),
    None,
    Continue,
    Error(String),
}

impl From<f64> for RuleResult {
    fn from(v: f64) -> Self {
        RuleResult::Value(v)
    }
}

impl From<CellValue> for RuleResult {
    fn from(v: CellValue) -> Self {
        match v {
            CellValue::Value(x) => RuleResult::Value(x),
            CellValue::None => RuleResult::None,
            CellValue::Error(e) => RuleResult::Error(e.marker().to_string()),
        }
    }
}
