//! Coverage analysis along the canonical traceability chain
//!
//! A link between nodes in different chain stages is a chain edge, oriented
//! upstream to downstream whatever direction it was declared in: a system
//! requirement saying `Traces to: StR-001` covers the stakeholder requirement
//! just as `StR-001 realizes REQ-F-001` would.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::config::{check_threshold, ChainStageConfig, ConfigError};
use crate::graph::TraceGraph;
use crate::models::{
    BrokenLink, IdentifierKind, ParseWarning, Relation, Severity, SourceLocation,
};

/// One compiled chain stage
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    /// Primary kind first, then the kinds sharing the stage
    pub kinds: Vec<IdentifierKind>,
    /// Relations accepted toward the next stage; empty accepts any
    pub relations: Vec<Relation>,
    pub min_coverage: Option<f64>,
}

impl Stage {
    pub fn primary(&self) -> IdentifierKind {
        self.kinds[0]
    }
}

/// Ordered chain of stages, upstream first
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    stages: Vec<Stage>,
}

impl Chain {
    /// Compiles and validates the configured stages
    pub fn new(stages: &[ChainStageConfig]) -> Result<Self, ConfigError> {
        if stages.len() < 2 {
            return Err(ConfigError::InvalidChain(
                "at least two stages are required".to_string(),
            ));
        }

        let mut seen = BTreeSet::new();
        let mut compiled = Vec::new();
        for stage in stages {
            let mut kinds = vec![stage.kind];
            kinds.extend(stage.also.iter().copied());
            for kind in &kinds {
                if !seen.insert(*kind) {
                    return Err(ConfigError::InvalidChain(format!(
                        "{} appears in more than one stage",
                        kind
                    )));
                }
            }
            if let Some(value) = stage.min_coverage {
                check_threshold(&format!("{} min_coverage", stage.kind), value)?;
            }
            compiled.push(Stage {
                kinds,
                relations: stage.relations.clone(),
                min_coverage: stage.min_coverage,
            });
        }

        Ok(Self { stages: compiled })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Stage index of a kind, if it takes part in the chain
    pub fn stage_of(&self, kind: IdentifierKind) -> Option<usize> {
        self.stages.iter().position(|s| s.kinds.contains(&kind))
    }

    fn accepts(&self, stage: usize, relation: Relation) -> bool {
        let relations = &self.stages[stage].relations;
        relations.is_empty() || relations.contains(&relation)
    }

    fn last_stage(&self) -> usize {
        self.stages.len() - 1
    }
}

/// Forward coverage between two adjacent stages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LinkCoverage {
    pub from: IdentifierKind,
    pub to: IdentifierKind,
    pub covered: usize,
    pub total: usize,
    /// 100 when vacuous
    pub percentage: f64,
    pub no_nodes_of_kind: bool,
}

impl LinkCoverage {
    pub fn label(&self) -> String {
        format!("{}→{}", self.from, self.to)
    }
}

/// Backward coverage of one kind from the previous stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindCoverage {
    pub kind: IdentifierKind,
    pub upstream: IdentifierKind,
    pub covered: usize,
    pub total: usize,
    pub percentage: f64,
    pub no_nodes_of_kind: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KindTotal {
    pub kind: IdentifierKind,
    pub total: usize,
}

/// A node with no incoming chain edge from the previous stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Orphan {
    pub id: String,
    pub kind: IdentifierKind,
    pub severity: Severity,
    pub expected_upstream: IdentifierKind,
    pub location: SourceLocation,
}

/// A chain head whose forward walk never reaches the final stage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BrokenChain {
    pub id: String,
    pub kind: IdentifierKind,
    pub furthest_kind: IdentifierKind,
    pub location: SourceLocation,
}

/// Chain neighbours of one node
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TraceRow {
    pub id: String,
    pub kind: IdentifierKind,
    pub upstream: Vec<String>,
    pub downstream: Vec<String>,
}

/// Everything the report renderers need
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CoverageResult {
    pub files_scanned: usize,
    pub identifier_count: usize,
    pub link_count: usize,
    /// `None` when every stage pair is vacuous
    pub overall_percentage: Option<f64>,
    pub overall_covered: usize,
    pub overall_total: usize,
    pub kind_totals: Vec<KindTotal>,
    pub link_type_coverage: Vec<LinkCoverage>,
    pub backward_coverage: Vec<KindCoverage>,
    pub orphans: Vec<Orphan>,
    pub broken_chains: Vec<BrokenChain>,
    pub broken_links: Vec<BrokenLink>,
    pub warnings: Vec<ParseWarning>,
    pub trace_matrix: Vec<TraceRow>,
}

impl CoverageResult {
    pub fn total_of(&self, kind: IdentifierKind) -> usize {
        self.kind_totals
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.total)
            .unwrap_or(0)
    }

    /// Forward coverage entry for an adjacent stage pair
    pub fn link_coverage(&self, from: IdentifierKind, to: IdentifierKind) -> Option<&LinkCoverage> {
        self.link_type_coverage
            .iter()
            .find(|c| c.from == from && c.to == to)
    }

    pub fn backward_coverage_of(&self, kind: IdentifierKind) -> Option<&KindCoverage> {
        self.backward_coverage.iter().find(|c| c.kind == kind)
    }

    pub fn orphan_ids(&self) -> Vec<&str> {
        self.orphans.iter().map(|o| o.id.as_str()).collect()
    }

    pub fn broken_chain_ids(&self) -> Vec<&str> {
        self.broken_chains.iter().map(|b| b.id.as_str()).collect()
    }
}

/// Chain edges, keyed both ways
struct ChainEdges<'g> {
    down: BTreeMap<&'g str, BTreeSet<&'g str>>,
    up: BTreeMap<&'g str, BTreeSet<&'g str>>,
}

impl<'g> ChainEdges<'g> {
    fn collect(graph: &'g TraceGraph, chain: &Chain) -> Self {
        let mut edges = ChainEdges {
            down: BTreeMap::new(),
            up: BTreeMap::new(),
        };

        for link in graph.links() {
            let (Some(from_kind), Some(to_kind)) = (graph.kind_of(&link.from), graph.kind_of(&link.to))
            else {
                continue;
            };
            let (Some(from_stage), Some(to_stage)) =
                (chain.stage_of(from_kind), chain.stage_of(to_kind))
            else {
                continue;
            };
            if from_stage == to_stage {
                continue;
            }

            let (upstream, downstream, upstream_stage) = if from_stage < to_stage {
                (link.from.as_str(), link.to.as_str(), from_stage)
            } else {
                (link.to.as_str(), link.from.as_str(), to_stage)
            };
            if !chain.accepts(upstream_stage, link.relation) {
                continue;
            }

            edges.down.entry(upstream).or_default().insert(downstream);
            edges.up.entry(downstream).or_default().insert(upstream);
        }

        edges
    }

    fn downstream(&self, id: &str) -> impl Iterator<Item = &'g str> + '_ {
        self.down.get(id).into_iter().flatten().copied()
    }

    fn upstream(&self, id: &str) -> impl Iterator<Item = &'g str> + '_ {
        self.up.get(id).into_iter().flatten().copied()
    }
}

fn percent(covered: usize, total: usize) -> f64 {
    if total == 0 {
        100.0
    } else {
        covered as f64 * 100.0 / total as f64
    }
}

/// Computes coverage, orphans, broken chains and the trace matrix.
///
/// An empty graph yields an all-vacuous result.
pub fn analyze(graph: &TraceGraph, chain: &Chain) -> CoverageResult {
    let edges = ChainEdges::collect(graph, chain);
    let stage_of_id = |id: &str| graph.kind_of(id).and_then(|k| chain.stage_of(k));
    let last = chain.last_stage();

    let mut result = CoverageResult {
        identifier_count: graph.len(),
        link_count: graph.links().len(),
        broken_links: graph.broken_links().to_vec(),
        kind_totals: IdentifierKind::all()
            .iter()
            .map(|kind| KindTotal {
                kind: *kind,
                total: graph.nodes_of_kind(*kind).count(),
            })
            .collect(),
        ..CoverageResult::default()
    };

    // Forward coverage per adjacent stage pair
    for (index, stage) in chain.stages().iter().enumerate().take(last) {
        let next = &chain.stages()[index + 1];
        let mut covered = 0;
        let mut total = 0;
        for node in graph.nodes() {
            if !stage.kinds.contains(&node.identifier.kind) {
                continue;
            }
            total += 1;
            if edges
                .downstream(&node.identifier.id)
                .any(|d| stage_of_id(d) == Some(index + 1))
            {
                covered += 1;
            }
        }
        let coverage = LinkCoverage {
            from: stage.primary(),
            to: next.primary(),
            covered,
            total,
            percentage: percent(covered, total),
            no_nodes_of_kind: total == 0,
        };
        debug!(
            "{}: {}/{} ({:.1}%)",
            coverage.label(),
            covered,
            total,
            coverage.percentage
        );
        result.overall_covered += covered;
        result.overall_total += total;
        result.link_type_coverage.push(coverage);
    }

    if result.overall_total > 0 {
        result.overall_percentage = Some(percent(result.overall_covered, result.overall_total));
    }

    // Backward coverage per kind; the uncovered nodes are the orphans
    for (index, stage) in chain.stages().iter().enumerate().skip(1) {
        let previous = chain.stages()[index - 1].primary();
        for kind in &stage.kinds {
            let mut covered = 0;
            let mut total = 0;
            for node in graph.nodes_of_kind(*kind) {
                total += 1;
                let id = node.identifier.id.as_str();
                if edges.upstream(id).any(|u| stage_of_id(u) == Some(index - 1)) {
                    covered += 1;
                } else {
                    result.orphans.push(Orphan {
                        id: id.to_string(),
                        kind: *kind,
                        severity: kind.orphan_severity(),
                        expected_upstream: previous,
                        location: node.identifier.source_location.clone(),
                    });
                }
            }
            result.backward_coverage.push(KindCoverage {
                kind: *kind,
                upstream: previous,
                covered,
                total,
                percentage: percent(covered, total),
                no_nodes_of_kind: total == 0,
            });
        }
    }
    result
        .orphans
        .sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.id.cmp(&b.id)));

    // Broken chains: walk forward from every chain head
    let mut broken: Vec<(usize, BrokenChain)> = Vec::new();
    for node in graph.nodes() {
        let id = node.identifier.id.as_str();
        let Some(stage) = stage_of_id(id) else {
            continue;
        };
        if stage == last || (stage > 0 && edges.upstream(id).next().is_some()) {
            continue;
        }

        let mut furthest = (stage, node.identifier.kind);
        let mut reaches_end = false;
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        visited.insert(id);
        queue.push_back(id);

        while let Some(current) = queue.pop_front() {
            for next in edges.downstream(current) {
                if !visited.insert(next) {
                    continue;
                }
                let (Some(next_stage), Some(next_kind)) = (stage_of_id(next), graph.kind_of(next))
                else {
                    continue;
                };
                if next_stage == last {
                    reaches_end = true;
                }
                if next_stage > furthest.0 || (next_stage == furthest.0 && next_kind < furthest.1) {
                    furthest = (next_stage, next_kind);
                }
                queue.push_back(next);
            }
            if reaches_end {
                break;
            }
        }

        if !reaches_end {
            broken.push((
                stage,
                BrokenChain {
                    id: id.to_string(),
                    kind: node.identifier.kind,
                    furthest_kind: furthest.1,
                    location: node.identifier.source_location.clone(),
                },
            ));
        }
    }
    broken.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    result.broken_chains = broken.into_iter().map(|(_, b)| b).collect();

    // Trace matrix, stage order then id
    let mut rows: Vec<(usize, TraceRow)> = graph
        .nodes()
        .filter_map(|node| {
            let id = node.identifier.id.as_str();
            let stage = stage_of_id(id)?;
            Some((
                stage,
                TraceRow {
                    id: id.to_string(),
                    kind: node.identifier.kind,
                    upstream: edges.upstream(id).map(str::to_string).collect(),
                    downstream: edges.downstream(id).map(str::to_string).collect(),
                },
            ))
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
    result.trace_matrix = rows.into_iter().map(|(_, row)| row).collect();

    result
}
