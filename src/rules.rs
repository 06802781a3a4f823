//! # Rules Engine
//!
//! Manages user-supplied computations that participate in cell
//! evaluation. Rules form an ordered list per cube; on evaluation the
//! first rule whose trigger and scope admit the current address is
//! invoked with a [`crate::cell::CellCursor`] bound to that address.
//!
//! ## Example
//!
//! ```rust,ignore
//! use cuboid::rules::{RuleDef, RuleScope};
//! use cuboid::value::RuleResult;
//!
//! cube.add_rule(RuleDef::new("delta pct", &["datatypes:DeltaPct"], |c| {
//!     let plan = c.get("Plan");
//!     if plan.is_truthy() {
//!         (c.get("Delta") / plan).into()
//!     } else {
//!         RuleResult::None
//!     }
//! }))?;
//! ```

use crate::address::{Coordinate, GeneralAddress};
use crate::cell::CellCursor;
use crate::dimension::member::fold_name;
use crate::resolver::TriggerCoordinates;
use crate::value::RuleResult;
use std::fmt;
use std::sync::Arc;

/// Identifier handed out on registration, used to unregister.
pub type RuleId = u64;

/// A rule body. Receives a cursor bound to the evaluated address and
/// classifies its outcome explicitly.
pub type RuleFn = Arc<dyn Fn(&CellCursor<'_>) -> RuleResult + Send + Sync>;

/// When a rule is eligible to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RuleScope {
    /// Eligible at top-level evaluation and on each visited base leaf.
    #[default]
    AllLevels,
    /// Eligible only on base-leaf evaluation.
    BaseLevel,
    /// Eligible only when the target address contains at least one
    /// aggregated coordinate.
    AggregationLevel,
    /// Invoked by the write path, never during read evaluation.
    OnEntry,
    /// Invoked only by explicit command, never during read evaluation.
    Command,
}

impl fmt::Display for RuleScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuleScope::AllLevels => "all-levels",
            RuleScope::BaseLevel => "base-level",
            RuleScope::AggregationLevel => "aggregation-level",
            RuleScope::OnEntry => "on-entry",
            RuleScope::Command => "command",
        };
        write!(f, "{s}")
    }
}

/// Rule definition as supplied by the caller; the trigger is still in
/// token form and is resolved against the cube on registration.
pub struct RuleDef {
    pub name: String,
    pub trigger: Vec<String>,
    pub scope: RuleScope,
    pub keywords: Vec<String>,
    pub volatile: bool,
    pub body: RuleFn,
}

impl RuleDef {
    pub fn new<F>(name: impl Into<String>, trigger: &[&str], body: F) -> Self
    where
        F: Fn(&CellCursor<'_>) -> RuleResult + Send + Sync + 'static,
    {
        RuleDef {
            name: name.into(),
            trigger: trigger.iter().map(|t| (*t).to_string()).collect(),
            scope: RuleScope::AllLevels,
            keywords: Vec::new(),
            volatile: false,
            body: Arc::new(body),
        }
    }

    pub fn scope(mut self, scope: RuleScope) -> Self {
        self.scope = scope;
        self
    }

    /// Keywords that dispatch this rule through
    /// [`crate::Cube::execute_command`]. Implies nothing about scope;
    /// set [`RuleScope::Command`] as well.
    pub fn keywords(mut self, keywords: &[&str]) -> Self {
        self.keywords = keywords.iter().map(|k| fold_name(k)).collect();
        self
    }

    /// Disable caching of any address whose evaluation invoked this rule.
    pub fn volatile(mut self) -> Self {
        self.volatile = true;
        self
    }
}

/// A registered rule with its resolved trigger.
pub struct Rule {
    pub(crate) id: RuleId,
    pub(crate) name: String,
    pub(crate) trigger: TriggerCoordinates,
    pub(crate) trigger_display: Vec<String>,
    pub(crate) scope: RuleScope,
    pub(crate) keywords: Vec<String>,
    pub(crate) volatile: bool,
    pub(crate) body: RuleFn,
}

impl Rule {
    /// A trigger is a conjunction of per-dimension selectors; every
    /// specified selector must contain the address's coordinate.
    pub(crate) fn matches(&self, addr: &GeneralAddress) -> bool {
        self.trigger
            .iter()
            .enumerate()
            .all(|(dim, selector)| match selector {
                None => true,
                Some(Coordinate::One(id)) => addr.coord(dim) == *id,
                Some(Coordinate::Many(ids)) => ids.contains(&addr.coord(dim)),
            })
    }

    pub fn id(&self) -> RuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn scope(&self) -> RuleScope {
        self.scope
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("trigger", &self.trigger_display)
            .field("scope", &self.scope)
            .field("volatile", &self.volatile)
            .finish()
    }
}

/// Ordered rule list for one cube.
pub(crate) struct RuleRegistry {
    rules: Vec<Arc<Rule>>,
    next_id: RuleId,
}

impl RuleRegistry {
    pub fn new() -> Self {
        RuleRegistry {
            rules: Vec::new(),
            next_id: 1,
        }
    }

    pub fn register(
        &mut self,
        def: RuleDef,
        trigger: TriggerCoordinates,
    ) -> Arc<Rule> {
        let id = self.next_id;
        self.next_id += 1;
        let rule = Arc::new(Rule {
            id,
            name: def.name,
            trigger,
            trigger_display: def.trigger,
            scope: def.scope,
            keywords: def.keywords,
            volatile: def.volatile,
            body: def.body,
        });
        self.rules.push(Arc::clone(&rule));
        rule
    }

    pub fn unregister(&mut self, id: RuleId) -> Option<Arc<Rule>> {
        let pos = self.rules.iter().position(|r| r.id == id)?;
        Some(self.rules.remove(pos))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// True when no rule could ever fire during read evaluation; lets
    /// aggregation skip the per-leaf rule check entirely.
    pub fn no_read_rules(&self) -> bool {
        self.rules
            .iter()
            .all(|r| matches!(r.scope, RuleScope::OnEntry | RuleScope::Command))
    }

    /// First rule, in registration order, whose scope is one of
    /// `scopes` and whose trigger admits `addr`.
    pub fn first_match(&self, addr: &GeneralAddress, scopes: &[RuleScope]) -> Option<Arc<Rule>> {
        self.rules
            .iter()
            .find(|r| scopes.contains(&r.scope) && r.matches(addr))
            .map(Arc::clone)
    }

    /// First command rule carrying `keyword` whose trigger admits `addr`.
    pub fn first_command(&self, keyword: &str, addr: &GeneralAddress) -> Option<Arc<Rule>> {
        let folded = fold_name(keyword);
        self.rules
            .iter()
            .find(|r| {
                r.scope == RuleScope::Command && r.keywords.contains(&folded) && r.matches(addr)
            })
            .map(Arc::clone)
    }

    /// Human-readable listing of the registered rules.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for (i, rule) in self.rules.iter().enumerate() {
            out.push_str(&format!(
                "{}. [{}] {} on ({}){}\n",
                i + 1,
                rule.scope,
                rule.name,
                rule.trigger_display.join(", "),
                if rule.volatile { " [volatile]" } else { "" },
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dummy_def(name: &str) -> RuleDef {
        RuleDef::new(name, &["Plan"], |_| RuleResult::Continue)
    }

    fn any_trigger(arity: usize) -> TriggerCoordinates {
        vec![None; arity]
    }

    #[test]
    fn test_registration_order_is_match_order() {
        let mut registry = RuleRegistry::new();
        let first = registry.register(dummy_def("first"), any_trigger(2));
        let _second = registry.register(dummy_def("second"), any_trigger(2));

        let addr = GeneralAddress::new(vec![0, 0]);
        let hit = registry
            .first_match(&addr, &[RuleScope::AllLevels])
            .expect("match");
        assert_eq!(hit.id, first.id);
    }

    #[test]
    fn test_trigger_conjunction() {
        let rule = Rule {
            id: 1,
            name: "r".into(),
            trigger: vec![Some(Coordinate::One(3)), None, Some(Coordinate::Many(vec![5, 6]))],
            trigger_display: vec![],
            scope: RuleScope::AllLevels,
            keywords: vec![],
            volatile: false,
            body: Arc::new(|_| RuleResult::Continue),
        };
        assert!(rule.matches(&GeneralAddress::new(vec![3, 9, 5])));
        assert!(rule.matches(&GeneralAddress::new(vec![3, 0, 6])));
        assert!(!rule.matches(&GeneralAddress::new(vec![4, 9, 5])));
        assert!(!rule.matches(&GeneralAddress::new(vec![3, 9, 7])));
    }

    #[test]
    fn test_unregister() {
        let mut registry = RuleRegistry::new();
        let rule = registry.register(dummy_def("r"), any_trigger(1));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(rule.id).is_some());
        assert!(registry.is_empty());
        assert!(registry.unregister(rule.id).is_none());
    }

    #[test]
    fn test_no_read_rules_detection() {
        let mut registry = RuleRegistry::new();
        assert!(registry.no_read_rules());
        registry.register(
            dummy_def("write hook").scope(RuleScope::OnEntry),
            any_trigger(1),
        );
        assert!(registry.no_read_rules());
        registry.register(dummy_def("read rule"), any_trigger(1));
        assert!(!registry.no_read_rules());
    }

    #[test]
    fn test_command_dispatch_by_keyword() {
        let mut registry = RuleRegistry::new();
        registry.register(
            dummy_def("cmd")
                .scope(RuleScope::Command)
                .keywords(&["Recalc"]),
            any_trigger(1),
        );
        let addr = GeneralAddress::new(vec![0]);
        assert!(registry.first_command("recalc", &addr).is_some());
        assert!(registry.first_command("other", &addr).is_none());
        // command rules never fire in read evaluation scopes
        assert!(registry
            .first_match(&addr, &[RuleScope::AllLevels, RuleScope::BaseLevel])
            .is_none());
    }
}
