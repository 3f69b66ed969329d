//! Bounded generic-code instantiation.
//!
//! Checkers that expand templates call into a [`TemplateExpansionGuard`]
//! instead of recursing natively. Instantiations live in an arena indexed by
//! name; a chain that grows deeper than the bound is cut and reported once.

use crate::types::{Finding, Location, Severity};

use std::collections::HashMap;

/// Default maximum instantiation depth.
pub const DEFAULT_TEMPLATE_RECURSION: usize = 100;

/// Identifier of the finding emitted when the bound is hit.
pub const TEMPLATE_RECURSION_ID: &str = "templateRecursion";

/// Index of an instantiation record in the guard's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstantiationId(usize);

#[derive(Debug, Clone)]
struct Instantiation {
    name: String,
    depth: usize,
}

/// Outcome of asking the guard to instantiate a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// New instantiation; its body should be expanded.
    Proceed(InstantiationId),
    /// Already instantiated in this pass; nothing more to expand.
    Known(InstantiationId),
    /// The chain exceeded the bound and was cut.
    Stopped,
}

/// Tracks instantiation depth for one analysis pass.
///
/// Create a fresh guard per (unit, configuration); nothing carries over.
#[derive(Debug)]
pub struct TemplateExpansionGuard {
    bound: usize,
    arena: Vec<Instantiation>,
    by_name: HashMap<String, InstantiationId>,
    finding: Option<Finding>,
}

impl Default for TemplateExpansionGuard {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE_RECURSION)
    }
}

impl TemplateExpansionGuard {
    /// Creates a guard with the given depth bound.
    #[must_use]
    pub fn new(bound: usize) -> Self {
        Self {
            bound,
            arena: Vec::new(),
            by_name: HashMap::new(),
            finding: None,
        }
    }

    /// Records an instantiation of `name` requested by `parent`.
    ///
    /// Returns [`Expansion::Stopped`] when the instantiation would exceed the
    /// depth bound. The first time that happens in a pass an information
    /// finding naming the deepest instantiation is recorded.
    pub fn instantiate(
        &mut self,
        name: &str,
        parent: Option<InstantiationId>,
        location: &Location,
    ) -> Expansion {
        if let Some(&id) = self.by_name.get(name) {
            return Expansion::Known(id);
        }

        let depth = parent.map_or(1, |p| self.arena[p.0].depth + 1);
        if depth > self.bound {
            if self.finding.is_none() {
                let deepest = parent.map_or(name, |p| self.arena[p.0].name.as_str());
                self.finding = Some(
                    Finding::new(
                        TEMPLATE_RECURSION_ID,
                        Severity::Information,
                        location.clone(),
                        format!(
                            "max template recursion ({}) reached for template '{deepest}'. You might want to limit template recursion.",
                            self.bound
                        ),
                    )
                    .with_symbol(deepest),
                );
            }
            return Expansion::Stopped;
        }

        let id = InstantiationId(self.arena.len());
        self.arena.push(Instantiation {
            name: name.to_string(),
            depth,
        });
        self.by_name.insert(name.to_string(), id);
        Expansion::Proceed(id)
    }

    /// Expands `root` and everything it instantiates, depth-first, without
    /// native recursion.
    ///
    /// `children` returns the names (and locations) a given instantiation
    /// requests.
    pub fn expand<F>(&mut self, root: &str, location: &Location, mut children: F)
    where
        F: FnMut(&str) -> Vec<(String, Location)>,
    {
        let mut stack = vec![(root.to_string(), None, location.clone())];

        while let Some((name, parent, at)) = stack.pop() {
            if let Expansion::Proceed(id) = self.instantiate(&name, parent, &at) {
                let mut requested = children(&name);
                requested.reverse();
                stack.extend(requested.into_iter().map(|(n, l)| (n, Some(id), l)));
            }
        }
    }

    /// Deepest instantiation recorded so far.
    #[must_use]
    pub fn max_depth(&self) -> usize {
        self.arena.iter().map(|i| i.depth).max().unwrap_or(0)
    }

    /// Whether the bound was hit in this pass.
    #[must_use]
    pub fn is_tripped(&self) -> bool {
        self.finding.is_some()
    }

    /// Takes the recursion finding, if any.
    pub fn take_findings(&mut self) -> Vec<Finding> {
        self.finding.take().into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(line: usize) -> Location {
        Location::new("src/t.cpp", line, 1)
    }

    /// `A<n>` instantiates `A<n+1>` forever.
    fn unbounded_chain(name: &str) -> Vec<(String, Location)> {
        let n: usize = name
            .trim_start_matches("A<")
            .trim_end_matches('>')
            .parse()
            .unwrap_or(0);
        vec![(format!("A<{}>", n + 1), at(3))]
    }

    #[test]
    fn test_unbounded_chain_is_cut_once() {
        let mut guard = TemplateExpansionGuard::new(10);
        guard.expand("A<1>", &at(1), unbounded_chain);

        assert!(guard.is_tripped());
        assert_eq!(guard.max_depth(), 10);
        let findings = guard.take_findings();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].id, TEMPLATE_RECURSION_ID);
        assert_eq!(findings[0].severity, Severity::Information);
        assert_eq!(findings[0].symbol.as_deref(), Some("A<10>"));
        assert!(findings[0].message.contains("(10)"));
        assert!(guard.take_findings().is_empty());
    }

    #[test]
    fn test_other_chains_continue_after_cut() {
        let mut guard = TemplateExpansionGuard::new(3);
        guard.expand("A<1>", &at(1), unbounded_chain);
        guard.expand("B", &at(5), |name| match name {
            "B" => vec![("C".to_string(), at(6))],
            _ => vec![],
        });

        assert!(matches!(
            guard.instantiate("D", None, &at(9)),
            Expansion::Proceed(_)
        ));
        assert!(matches!(
            guard.instantiate("C", None, &at(9)),
            Expansion::Known(_)
        ));
        assert_eq!(guard.take_findings().len(), 1);
    }

    #[test]
    fn test_finite_recursion_within_bound() {
        let mut guard = TemplateExpansionGuard::default();
        guard.expand("Fact<5>", &at(1), |name| {
            let n: usize = name[5..name.len() - 1].parse().unwrap_or(0);
            if n == 0 {
                vec![]
            } else {
                vec![(format!("Fact<{}>", n - 1), at(2))]
            }
        });
        assert!(!guard.is_tripped());
        assert_eq!(guard.max_depth(), 6);
    }
}
