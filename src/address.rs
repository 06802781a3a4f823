//! # Addresses
//!
//! A cube's address space is the Cartesian product of its dimensions'
//! member spaces. A [`BaseAddress`] holds one base member id per
//! dimension and is the key of the sparse fact store. A
//! [`GeneralAddress`] permits aggregated members and is the unit of cell
//! evaluation (and the result cache key). A [`ResolvedAddress`] is the
//! resolver's output: per dimension either a single member or a set of
//! members (subset, wildcard, attribute filter or explicit list), the
//! latter defining an area.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Small stable integer id for a member, unique within its dimension.
pub type MemberId = u32;

/// Packed tuple of base member ids, one per cube dimension.
///
/// Ordering is lexicographic over the packed coordinates, which gives
/// aggregation its deterministic summation order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BaseAddress(Box<[MemberId]>);

impl BaseAddress {
    pub fn new(coords: Vec<MemberId>) -> Self {
        BaseAddress(coords.into_boxed_slice())
    }

    pub fn coords(&self) -> &[MemberId] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn coord(&self, dim: usize) -> MemberId {
        self.0[dim]
    }

    /// Copy with one coordinate replaced.
    pub fn with_coord(&self, dim: usize, member: MemberId) -> Self {
        let mut coords = self.0.to_vec();
        coords[dim] = member;
        BaseAddress::new(coords)
    }
}

impl fmt::Display for BaseAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// Tuple of member ids, one per cube dimension, permitting aggregated
/// members. Used as evaluation target and result cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneralAddress(Box<[MemberId]>);

impl GeneralAddress {
    pub fn new(coords: Vec<MemberId>) -> Self {
        GeneralAddress(coords.into_boxed_slice())
    }

    pub fn coords(&self) -> &[MemberId] {
        &self.0
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn coord(&self, dim: usize) -> MemberId {
        self.0[dim]
    }

    /// Copy with one coordinate replaced (cell cursor coordinate shift).
    pub fn with_coord(&self, dim: usize, member: MemberId) -> Self {
        let mut coords = self.0.to_vec();
        coords[dim] = member;
        GeneralAddress::new(coords)
    }

    /// Reinterpret as a base address. Valid only when every coordinate
    /// is a base member; the resolver and cube write path check that.
    pub fn to_base(&self) -> BaseAddress {
        BaseAddress::new(self.0.to_vec())
    }
}

impl From<&BaseAddress> for GeneralAddress {
    fn from(addr: &BaseAddress) -> Self {
        GeneralAddress::new(addr.coords().to_vec())
    }
}

impl fmt::Display for GeneralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, c) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{c}")?;
        }
        write!(f, ")")
    }
}

/// One resolved coordinate: a single member id or an ordered set of
/// member ids (deduplicated, dimension order preserved).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Coordinate {
    One(MemberId),
    Many(Vec<MemberId>),
}

impl Coordinate {
    pub fn is_single(&self) -> bool {
        matches!(self, Coordinate::One(_))
    }

    /// The members this coordinate selects, in order.
    pub fn members(&self) -> &[MemberId] {
        match self {
            Coordinate::One(id) => std::slice::from_ref(id),
            Coordinate::Many(ids) => ids,
        }
    }
}

/// Resolver output: one [`Coordinate`] per cube dimension, in cube order.
///
/// All-single addresses are read/evaluate targets; set-bearing addresses
/// define an area used for bulk operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    coords: Vec<Coordinate>,
}

impl ResolvedAddress {
    pub fn new(coords: Vec<Coordinate>) -> Self {
        ResolvedAddress { coords }
    }

    pub fn coords(&self) -> &[Coordinate] {
        &self.coords
    }

    pub fn arity(&self) -> usize {
        self.coords.len()
    }

    /// Collapse to a general address when every coordinate is single.
    pub fn as_general(&self) -> Option<GeneralAddress> {
        let mut coords = Vec::with_capacity(self.coords.len());
        for c in &self.coords {
            match c {
                Coordinate::One(id) => coords.push(*id),
                Coordinate::Many(_) => return None,
            }
        }
        Some(GeneralAddress::new(coords))
    }

    pub fn is_area(&self) -> bool {
        self.coords.iter().any(|c| !c.is_single())
    }
}
