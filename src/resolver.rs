//! # Address & Area Resolver
//!
//! Translates user-facing addresses into canonical member ids. An
//! address is a list of string tokens: plain member names (resolved by
//! unique name search across the cube's dimensions), qualified
//! `"dimension:member"` forms (order-independent), or a mixture.
//! Set selectors produce areas:
//!
//! - `"dim:subset"` — a named subset (member names win over subset
//!   names on collision)
//! - `"dim:attr:value"` — attribute filter
//! - `"Model *"` / `"Model ?"` — wildcard glob against member names
//! - `"a, b, c"` — explicit list
//!
//! Dimensions omitted entirely default to their unique root; a bare
//! `"*"` token in a full-arity positional address is equivalent to
//! omitting that dimension in a cell read, and selects every member in
//! an area context.

use crate::address::{Coordinate, GeneralAddress, MemberId, ResolvedAddress};
use crate::dimension::member::fold_name;
use crate::dimension::{AttributeValue, Dimension, DimensionTables};
use crate::error::{EngineError, EngineResult};
use regex::Regex;
use std::sync::Arc;

/// Per-dimension trigger pattern: `None` admits any member.
pub(crate) type TriggerCoordinates = Vec<Option<Coordinate>>;

/// Resolves addresses against one consistent set of dimension
/// snapshots, so a resolution never mixes structure versions.
pub struct Resolver<'a> {
    dims: &'a [Arc<Dimension>],
    snapshots: &'a [Arc<DimensionTables>],
}

/// What a resolution pass is producing; areas admit set selectors,
/// cells treat bare `*` as "dimension omitted".
#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Cell,
    Area,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(dims: &'a [Arc<Dimension>], snapshots: &'a [Arc<DimensionTables>]) -> Self {
        debug_assert_eq!(dims.len(), snapshots.len());
        Resolver { dims, snapshots }
    }

    fn arity(&self) -> usize {
        self.dims.len()
    }

    /// Resolve to a single evaluation target. Every coordinate must end
    /// up a single member; omitted dimensions default to their unique
    /// root.
    pub fn resolve_cell(&self, tokens: &[&str]) -> EngineResult<GeneralAddress> {
        let coords = self.resolve_tokens(tokens, Mode::Cell)?;
        let mut out = Vec::with_capacity(self.arity());
        for (dim, coord) in coords.into_iter().enumerate() {
            match coord {
                Some(Coordinate::One(id)) => out.push(id),
                Some(Coordinate::Many(_)) => {
                    return Err(EngineError::TypeError(format!(
                        "a set selector is not a cell address (dimension '{}')",
                        self.dims[dim].name()
                    )))
                }
                None => out.push(self.default_root(dim)?),
            }
        }
        Ok(GeneralAddress::new(out))
    }

    /// Resolve to an address that may carry set selectors (an area).
    pub fn resolve_area(&self, tokens: &[&str]) -> EngineResult<ResolvedAddress> {
        let coords = self.resolve_tokens(tokens, Mode::Area)?;
        let mut out = Vec::with_capacity(self.arity());
        for (dim, coord) in coords.into_iter().enumerate() {
            match coord {
                Some(c) => out.push(c),
                None => out.push(Coordinate::One(self.default_root(dim)?)),
            }
        }
        Ok(ResolvedAddress::new(out))
    }

    /// Resolve a rule trigger: omitted dimensions admit any member.
    pub(crate) fn resolve_trigger(&self, tokens: &[&str]) -> EngineResult<TriggerCoordinates> {
        self.resolve_tokens(tokens, Mode::Area)
    }

    fn default_root(&self, dim: usize) -> EngineResult<MemberId> {
        self.snapshots[dim]
            .unique_root()
            .ok_or_else(|| EngineError::UnderdefinedAddress(self.dims[dim].name().to_string()))
    }

    /// Core token pass: qualified tokens claim their dimension first,
    /// then unqualified tokens are resolved by unique name search.
    fn resolve_tokens(&self, tokens: &[&str], mode: Mode) -> EngineResult<TriggerCoordinates> {
        let mut coords: TriggerCoordinates = vec![None; self.arity()];
        let positional = tokens.len() == self.arity();

        // pass 1: qualified tokens
        let mut unqualified: Vec<(usize, &str)> = Vec::new();
        for (pos, token) in tokens.iter().enumerate() {
            let token = token.trim();
            match self.split_qualifier(token) {
                Some((dim, rest)) => {
                    self.claim(&mut coords, dim, self.resolve_in_dimension(dim, rest, mode)?)?;
                }
                None => unqualified.push((pos, token)),
            }
        }

        // pass 2: unqualified tokens
        for (pos, token) in unqualified {
            if token == "*" && mode == Mode::Cell {
                // equivalent to omitting the dimension
                continue;
            }
            if is_selector(token) {
                // set selectors need a dimension: take the positional
                // slot when the token list is full-arity, otherwise
                // search for the unique dimension with a match
                let dim = if positional && coords[pos].is_none() {
                    pos
                } else {
                    self.find_selector_dimension(token)?
                };
                self.claim(&mut coords, dim, self.resolve_in_dimension(dim, token, mode)?)?;
            } else {
                let (dim, id) = self.find_member(token)?;
                self.claim(&mut coords, dim, Coordinate::One(id))?;
            }
        }

        Ok(coords)
    }

    fn claim(
        &self,
        coords: &mut TriggerCoordinates,
        dim: usize,
        coord: Coordinate,
    ) -> EngineResult<()> {
        if coords[dim].is_some() {
            return Err(EngineError::TypeError(format!(
                "two coordinates for dimension '{}'",
                self.dims[dim].name()
            )));
        }
        coords[dim] = Some(coord);
        Ok(())
    }

    /// `"dim:rest"` when the first segment names a cube dimension.
    fn split_qualifier<'t>(&self, token: &'t str) -> Option<(usize, &'t str)> {
        let (head, rest) = token.split_once(':')?;
        let folded = fold_name(head);
        self.dims
            .iter()
            .position(|d| fold_name(d.name()) == folded)
            .map(|dim| (dim, rest.trim()))
    }

    /// Unique name search for a plain member name across all dimensions.
    fn find_member(&self, name: &str) -> EngineResult<(usize, MemberId)> {
        let mut hit: Option<(usize, MemberId)> = None;
        for (dim, tables) in self.snapshots.iter().enumerate() {
            if let Some(id) = tables.member_id(name) {
                if let Some((first, _)) = hit {
                    return Err(EngineError::AmbiguousMember {
                        name: name.to_string(),
                        first: self.dims[first].name().to_string(),
                        second: self.dims[dim].name().to_string(),
                    });
                }
                hit = Some((dim, id));
            }
        }
        if let Some(found) = hit {
            return Ok(found);
        }
        // fall back to subset names
        let mut subset_hit: Option<usize> = None;
        for (dim, tables) in self.snapshots.iter().enumerate() {
            if tables.subset(name).is_some() {
                if let Some(first) = subset_hit {
                    return Err(EngineError::AmbiguousMember {
                        name: name.to_string(),
                        first: self.dims[first].name().to_string(),
                        second: self.dims[dim].name().to_string(),
                    });
                }
                subset_hit = Some(dim);
            }
        }
        if let Some(dim) = subset_hit {
            let subset = self.snapshots[dim].subset(name).expect("subset hit");
            return Err(EngineError::TypeError(format!(
                "'{}' is a subset of dimension '{}', not a member; subsets select areas",
                subset.name,
                self.dims[dim].name()
            )));
        }
        Err(EngineError::UnknownMember(name.to_string()))
    }

    /// The unique dimension in which a set selector matches anything.
    fn find_selector_dimension(&self, token: &str) -> EngineResult<usize> {
        let mut hit: Option<usize> = None;
        for dim in 0..self.arity() {
            let matches = self
                .resolve_in_dimension(dim, token, Mode::Area)
                .map(|c| !c.members().is_empty())
                .unwrap_or(false);
            if matches {
                if let Some(first) = hit {
                    return Err(EngineError::AmbiguousMember {
                        name: token.to_string(),
                        first: self.dims[first].name().to_string(),
                        second: self.dims[dim].name().to_string(),
                    });
                }
                hit = Some(dim);
            }
        }
        hit.ok_or_else(|| EngineError::UnknownMember(token.to_string()))
    }

    /// Resolve a token (already stripped of its qualifier) inside one
    /// dimension.
    fn resolve_in_dimension(
        &self,
        dim: usize,
        token: &str,
        mode: Mode,
    ) -> EngineResult<Coordinate> {
        let tables = &self.snapshots[dim];
        let token = token.trim();

        // attribute filter: attr:value
        if let Some((attr, value)) = token.split_once(':') {
            let attr = attr.trim();
            if tables.attribute(attr).is_some() {
                let value = parse_attribute_value(value.trim());
                return Ok(Coordinate::Many(tables.members_by_attribute(attr, &value)));
            }
            // not an attribute - fall through and fail as a member name
        }

        // explicit list: a, b, c
        if token.contains(',') {
            let mut ids = Vec::new();
            for part in token.split(',') {
                let part = part.trim();
                let id = tables
                    .member_id(part)
                    .ok_or_else(|| EngineError::UnknownMember(part.to_string()))?;
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
            return Ok(Coordinate::Many(ids));
        }

        // wildcard glob
        if token.contains('*') || token.contains('?') {
            if token == "*" && mode == Mode::Cell {
                // qualified "*" in a cell read: the dimension's top
                return self.default_root(dim).map(Coordinate::One);
            }
            let pattern = glob_to_regex(token)?;
            let ids: Vec<MemberId> = tables
                .ordered_members()
                .filter(|m| pattern.is_match(&fold_name(&m.name)))
                .map(|m| m.id)
                .collect();
            return Ok(Coordinate::Many(ids));
        }

        // plain member, then subset
        if let Some(id) = tables.member_id(token) {
            return Ok(Coordinate::One(id));
        }
        if let Some(subset) = tables.subset(token) {
            if mode == Mode::Cell {
                return Err(EngineError::TypeError(format!(
                    "'{}' is a subset, not a member; subsets select areas",
                    subset.name
                )));
            }
            return Ok(Coordinate::Many(subset.members.clone()));
        }
        Err(EngineError::UnknownMember(token.to_string()))
    }
}

/// Parse an attribute filter value: number, then flag, then text.
fn parse_attribute_value(raw: &str) -> AttributeValue {
    if let Ok(n) = raw.parse::<f64>() {
        return AttributeValue::Number(n);
    }
    match fold_name(raw).as_str() {
        "true" => AttributeValue::Flag(true),
        "false" => AttributeValue::Flag(false),
        _ => AttributeValue::Text(raw.to_string()),
    }
}

/// Translate a `*`/`?` glob into an anchored regex over folded names.
fn glob_to_regex(glob: &str) -> EngineResult<Regex> {
    let mut pattern = String::from("^");
    for ch in fold_name(glob).chars() {
        match ch {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
        .map_err(|e| EngineError::TypeError(format!("invalid wildcard '{glob}': {e}")))
}

/// Whether a token needs set-selector treatment.
fn is_selector(token: &str) -> bool {
    token.contains('*') || token.contains('?') || token.contains(',')
}

/// Display form of a general address: member names in cube order.
pub(crate) fn display_general(
    snapshots: &[Arc<DimensionTables>],
    addr: &GeneralAddress,
) -> String {
    addr.coords()
        .iter()
        .enumerate()
        .map(|(dim, id)| {
            snapshots
                .get(dim)
                .and_then(|t| t.member_name(*id))
                .unwrap_or("?")
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(", ")
}
