//! Bookkeeping of primitive-leaf links.
//!
//! An input leaf has at most one source; an output leaf may drive any
//! number of inputs. Multiplicity between node pairs is tracked on the
//! node graph, not here.

use crate::property::PropertyId;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Default)]
pub struct LinkRegistry {
    /// input leaf -> driving output leaf
    incoming: BTreeMap<PropertyId, PropertyId>,
    /// output leaf -> driven input leaves
    outgoing: BTreeMap<PropertyId, BTreeSet<PropertyId>>,
}

impl LinkRegistry {
    /// Registers `output -> input`. Fails when the input already has a
    /// source.
    pub fn link(&mut self, output: PropertyId, input: PropertyId) -> bool {
        if self.incoming.contains_key(&input) {
            return false;
        }
        self.incoming.insert(input, output);
        self.outgoing.entry(output).or_default().insert(input);
        true
    }

    /// Removes exactly the link `output -> input`; fails when that link
    /// does not exist.
    pub fn unlink(&mut self, output: PropertyId, input: PropertyId) -> bool {
        if self.incoming.get(&input) != Some(&output) {
            return false;
        }
        self.incoming.remove(&input);
        if let Some(targets) = self.outgoing.get_mut(&output) {
            targets.remove(&input);
            if targets.is_empty() {
                self.outgoing.remove(&output);
            }
        }
        true
    }

    pub fn source_of(&self, input: PropertyId) -> Option<PropertyId> {
        self.incoming.get(&input).copied()
    }

    pub fn targets_of(&self, output: PropertyId) -> impl Iterator<Item = PropertyId> + '_ {
        self.outgoing
            .get(&output)
            .into_iter()
            .flat_map(|targets| targets.iter().copied())
    }

    pub fn has_targets(&self, output: PropertyId) -> bool {
        self.outgoing.contains_key(&output)
    }

    /// All links, ordered by (source, target).
    pub fn links(&self) -> impl Iterator<Item = (PropertyId, PropertyId)> + '_ {
        self.outgoing
            .iter()
            .flat_map(|(&output, targets)| targets.iter().map(move |&input| (output, input)))
    }

    pub fn len(&self) -> usize {
        self.incoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.incoming.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_and_lookup() {
        let mut registry = LinkRegistry::default();
        let out = PropertyId(1);
        let in_a = PropertyId(2);
        let in_b = PropertyId(3);
        assert!(registry.link(out, in_a));
        assert!(registry.link(out, in_b));
        assert_eq!(registry.source_of(in_a), Some(out));
        let targets: Vec<_> = registry.targets_of(out).collect();
        assert_eq!(targets, vec![in_a, in_b]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn second_source_for_same_input_is_rejected() {
        let mut registry = LinkRegistry::default();
        assert!(registry.link(PropertyId(1), PropertyId(2)));
        assert!(!registry.link(PropertyId(3), PropertyId(2)));
        assert_eq!(registry.source_of(PropertyId(2)), Some(PropertyId(1)));
    }

    #[test]
    fn unlink_restores_empty_state() {
        let mut registry = LinkRegistry::default();
        let (out, input) = (PropertyId(1), PropertyId(2));
        registry.link(out, input);
        // Wrong pair does nothing.
        assert!(!registry.unlink(PropertyId(9), input));
        assert!(registry.unlink(out, input));
        assert!(!registry.unlink(out, input));
        assert_eq!(registry.source_of(input), None);
        assert_eq!(registry.targets_of(out).count(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn links_iterates_all_pairs() {
        let mut registry = LinkRegistry::default();
        registry.link(PropertyId(5), PropertyId(1));
        registry.link(PropertyId(4), PropertyId(2));
        let links: Vec<_> = registry.links().collect();
        assert_eq!(
            links,
            vec![
                (PropertyId(4), PropertyId(2)),
                (PropertyId(5), PropertyId(1)),
            ]
        );
    }
}
