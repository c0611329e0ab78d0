use std::collections::{BTreeMap, HashSet};

use crate::models::{
    BrokenLink, Identifier, IdentifierKind, Link, RawRelation, Relation, UnresolvedEndpoint,
};

/// A graph node: the identifier plus indices into the link list
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub identifier: Identifier,
    pub outgoing: Vec<usize>,
    pub incoming: Vec<usize>,
}

/// Directed traceability graph keyed by identifier id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceGraph {
    nodes: BTreeMap<String, Node>,
    links: Vec<Link>,
    broken_links: Vec<BrokenLink>,
}

impl TraceGraph {
    /// Builds the graph from parsed identifiers and raw relations.
    ///
    /// Relations are resolved in input order. Only exact `(from, to, relation)`
    /// repeats are merged; a relation with an unknown endpoint becomes a
    /// `BrokenLink` instead of failing the build.
    pub fn build(identifiers: &[Identifier], relations: &[RawRelation]) -> Self {
        let mut graph = TraceGraph::default();

        for identifier in identifiers {
            graph
                .nodes
                .entry(identifier.id.clone())
                .or_insert_with(|| Node {
                    identifier: identifier.clone(),
                    outgoing: Vec::new(),
                    incoming: Vec::new(),
                });
        }

        let mut seen: HashSet<(&str, &str, Relation)> = HashSet::new();
        for raw in relations {
            if !seen.insert((raw.from.as_str(), raw.to.as_str(), raw.relation)) {
                continue;
            }
            graph.add_relation(raw);
        }

        graph
    }

    fn add_relation(&mut self, raw: &RawRelation) {
        let has_from = self.nodes.contains_key(&raw.from);
        let has_to = self.nodes.contains_key(&raw.to);

        let unresolved = match (has_from, has_to) {
            (true, true) => None,
            (false, true) => Some(UnresolvedEndpoint::From),
            (true, false) => Some(UnresolvedEndpoint::To),
            (false, false) => Some(UnresolvedEndpoint::Both),
        };

        if let Some(unresolved) = unresolved {
            self.broken_links.push(BrokenLink {
                from: raw.from.clone(),
                to: raw.to.clone(),
                relation: raw.relation,
                location: raw.location.clone(),
                unresolved,
            });
            return;
        }

        let index = self.links.len();
        self.links.push(Link {
            from: raw.from.clone(),
            to: raw.to.clone(),
            relation: raw.relation,
            location: raw.location.clone(),
        });
        if let Some(node) = self.nodes.get_mut(&raw.from) {
            node.outgoing.push(index);
        }
        if let Some(node) = self.nodes.get_mut(&raw.to) {
            node.incoming.push(index);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn kind_of(&self, id: &str) -> Option<IdentifierKind> {
        self.nodes.get(id).map(|n| n.identifier.kind)
    }

    /// All nodes in ascending id order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes of one kind in ascending id order
    pub fn nodes_of_kind(&self, kind: IdentifierKind) -> impl Iterator<Item = &Node> {
        self.nodes
            .values()
            .filter(move |n| n.identifier.kind == kind)
    }

    pub fn links(&self) -> &[Link] {
        &self.links
    }

    pub fn broken_links(&self) -> &[BrokenLink] {
        &self.broken_links
    }

    /// Links leaving `id`, in insertion order
    pub fn outgoing(&self, id: &str) -> impl Iterator<Item = &Link> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(move |n| n.outgoing.iter().map(move |&i| &self.links[i]))
    }

    /// Links arriving at `id`, in insertion order
    pub fn incoming(&self, id: &str) -> impl Iterator<Item = &Link> {
        self.nodes
            .get(id)
            .into_iter()
            .flat_map(move |n| n.incoming.iter().map(move |&i| &self.links[i]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceLocation;

    fn ident(id: &str, kind: IdentifierKind) -> Identifier {
        Identifier::new(id, kind, SourceLocation::new("doc.md", 1))
    }

    fn raw(from: &str, relation: Relation, to: &str, line: usize) -> RawRelation {
        RawRelation {
            from: from.to_string(),
            relation,
            to: to.to_string(),
            location: SourceLocation::new("doc.md", line),
        }
    }

    #[test]
    fn test_build_resolves_links_both_directions() {
        let graph = TraceGraph::build(
            &[
                ident("StR-001", IdentifierKind::StakeholderRequirement),
                ident("REQ-F-001", IdentifierKind::SystemRequirement),
            ],
            &[raw("REQ-F-001", Relation::TracesTo, "StR-001", 2)],
        );

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.links().len(), 1);
        assert!(graph.broken_links().is_empty());
        assert_eq!(graph.outgoing("REQ-F-001").count(), 1);
        assert_eq!(graph.incoming("StR-001").next().map(|l| l.from.as_str()), Some("REQ-F-001"));
        assert_eq!(graph.incoming("REQ-F-001").count(), 0);
        assert_eq!(graph.outgoing("missing").count(), 0);
    }

    #[test]
    fn test_dangling_reference_is_a_broken_link() {
        let graph = TraceGraph::build(
            &[ident("DES-001", IdentifierKind::DesignElement)],
            &[
                raw("DES-001", Relation::Implements, "REQ-F-999", 3),
                raw("CODE-404", Relation::Implements, "DES-001", 4),
                raw("CODE-404", Relation::Implements, "REQ-F-999", 5),
            ],
        );

        assert!(graph.links().is_empty());
        let unresolved: Vec<UnresolvedEndpoint> =
            graph.broken_links().iter().map(|b| b.unresolved).collect();
        assert_eq!(
            unresolved,
            vec![
                UnresolvedEndpoint::To,
                UnresolvedEndpoint::From,
                UnresolvedEndpoint::Both
            ]
        );
        assert_eq!(graph.broken_links()[0].to, "REQ-F-999");
    }

    #[test]
    fn test_only_exact_triples_are_merged() {
        let graph = TraceGraph::build(
            &[
                ident("DES-001", IdentifierKind::DesignElement),
                ident("CODE-001", IdentifierKind::CodeUnit),
            ],
            &[
                raw("CODE-001", Relation::Implements, "DES-001", 1),
                raw("CODE-001", Relation::Implements, "DES-001", 9),
                raw("CODE-001", Relation::TracesTo, "DES-001", 10),
                raw("DES-001", Relation::Implements, "CODE-001", 11),
            ],
        );

        let edges: Vec<(&str, Relation, usize)> = graph
            .links()
            .iter()
            .map(|l| (l.from.as_str(), l.relation, l.location.line))
            .collect();
        assert_eq!(
            edges,
            vec![
                ("CODE-001", Relation::Implements, 1),
                ("CODE-001", Relation::TracesTo, 10),
                ("DES-001", Relation::Implements, 11),
            ]
        );
    }

    #[test]
    fn test_nodes_of_kind_sorted_by_id() {
        let graph = TraceGraph::build(
            &[
                ident("TEST-002", IdentifierKind::TestCase),
                ident("CODE-001", IdentifierKind::CodeUnit),
                ident("TEST-001", IdentifierKind::TestCase),
            ],
            &[],
        );
        let tests: Vec<&str> = graph
            .nodes_of_kind(IdentifierKind::TestCase)
            .map(|n| n.identifier.id.as_str())
            .collect();
        assert_eq!(tests, vec!["TEST-001", "TEST-002"]);
        assert_eq!(graph.kind_of("CODE-001"), Some(IdentifierKind::CodeUnit));
        assert!(!graph.is_empty());
        assert!(TraceGraph::build(&[], &[]).is_empty());
    }
}
