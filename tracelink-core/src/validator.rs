use log::info;
use std::fmt;

use crate::config::{check_threshold, ConfigError, TraceConfig};
use crate::corpus::SourceFile;
use crate::coverage::{analyze, Chain, CoverageResult};
use crate::graph::TraceGraph;
use crate::parser::{parse_corpus, Matchers};

/// A coverage threshold that was not met
#[derive(Debug, Clone, PartialEq)]
pub struct GateFailure {
    /// `overall` or the gated metric's label
    pub name: String,
    pub actual: f64,
    pub threshold: f64,
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} coverage {:.1}% is below {:.1}%",
            self.name, self.actual, self.threshold
        )
    }
}

/// Parser, graph and analyzer wired together for one configuration
#[derive(Debug)]
pub struct Validator {
    config: TraceConfig,
    matchers: Matchers,
    chain: Chain,
}

impl Validator {
    /// Compiles every pattern and the chain up front so bad configuration
    /// fails before any file is read.
    pub fn new(config: TraceConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let matchers = Matchers::new(&config)?;
        let chain = Chain::new(&config.chain)?;
        Ok(Self {
            config,
            matchers,
            chain,
        })
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// Runs one analysis over an in-memory corpus
    pub fn validate(&self, files: &[SourceFile]) -> CoverageResult {
        let parsed = parse_corpus(files, &self.matchers);
        let graph = TraceGraph::build(&parsed.identifiers, &parsed.relations);

        let mut result = analyze(&graph, &self.chain);
        result.files_scanned = files.len();
        result.warnings = parsed.warnings;
        result.warnings.sort_by(|a, b| a.location().cmp(b.location()));

        info!(
            "Analyzed {} files: {} identifiers, {} links, {} orphans, {} broken chains, {} broken links",
            result.files_scanned,
            result.identifier_count,
            result.link_count,
            result.orphans.len(),
            result.broken_chains.len(),
            result.broken_links.len()
        );

        result
    }

    /// Checks the overall threshold and per-stage `min_coverage` gates.
    ///
    /// `fail_under` overrides the configured overall threshold. A stage gate
    /// applies to coverage from that stage to the next; on the final stage it
    /// applies to backward coverage into the stage. Vacuous metrics pass.
    pub fn gates(
        &self,
        result: &CoverageResult,
        fail_under: Option<f64>,
    ) -> Result<Vec<GateFailure>, ConfigError> {
        let mut failures = Vec::new();

        if let Some(threshold) = fail_under.or(self.config.fail_under) {
            check_threshold("fail_under", threshold)?;
            if let Some(actual) = result.overall_percentage {
                if actual < threshold {
                    failures.push(GateFailure {
                        name: "overall".to_string(),
                        actual,
                        threshold,
                    });
                }
            }
        }

        let stages = self.chain.stages();
        for (index, stage) in stages.iter().enumerate() {
            let Some(threshold) = stage.min_coverage else {
                continue;
            };

            let (name, covered, total) = if index + 1 < stages.len() {
                let next = stages[index + 1].primary();
                match result.link_coverage(stage.primary(), next) {
                    Some(c) => (c.label(), c.covered, c.total),
                    None => continue,
                }
            } else {
                let (covered, total) = result
                    .backward_coverage
                    .iter()
                    .filter(|c| stage.kinds.contains(&c.kind))
                    .fold((0, 0), |(covered, total), c| (covered + c.covered, total + c.total));
                (format!("{} backward", stage.primary()), covered, total)
            };

            if total == 0 {
                continue;
            }
            let actual = covered as f64 * 100.0 / total as f64;
            if actual < threshold {
                failures.push(GateFailure {
                    name,
                    actual,
                    threshold,
                });
            }
        }

        Ok(failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::IdentifierKind;

    fn corpus() -> Vec<SourceFile> {
        vec![
            SourceFile::new(
                "docs/stakeholder.md",
                "## StR-001 Operators can audit changes\n\n## StR-002 Reports are reproducible\n",
            ),
            SourceFile::new(
                "docs/system.md",
                "### REQ-F-001 Audit log\n**Traces to**: StR-001\n\n### REQ-F-002 Orphaned\n",
            ),
            SourceFile::new(
                "docs/design.md",
                "# DES-001 Append-only log\nRealizes: REQ-F-001\nAlso implements REQ-F-999\n",
            ),
            SourceFile::new(
                "src/audit.rs",
                "// CODE-001 @implements DES-001\n// @tested-by TEST-001\n",
            ),
            SourceFile::new("tests/audit.rs", "// TEST-001 audit log round trip\n"),
        ]
    }

    #[test]
    fn test_validate_end_to_end() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        let result = validator.validate(&corpus());

        assert_eq!(result.files_scanned, 5);
        assert_eq!(result.total_of(IdentifierKind::StakeholderRequirement), 2);
        assert_eq!(result.total_of(IdentifierKind::SystemRequirement), 2);
        assert_eq!(result.broken_links.len(), 1);
        assert_eq!(result.total_of(IdentifierKind::TestCase), 1);

        let first = result
            .link_coverage(
                IdentifierKind::StakeholderRequirement,
                IdentifierKind::SystemRequirement,
            )
            .unwrap();
        assert_eq!((first.covered, first.total), (1, 2));
        assert!(result.orphan_ids().contains(&"REQ-F-002"));
        assert!(result.broken_chain_ids().contains(&"StR-002"));
        assert!(!result.broken_chain_ids().contains(&"StR-001"));
    }

    #[test]
    fn test_stakeholder_traced_only_to_requirement() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        let result = validator.validate(&[
            SourceFile::new("stakeholder.md", "StR-001\n"),
            SourceFile::new("system.md", "REQ-F-001 @traces StR-001\n"),
        ]);

        let first = &result.link_type_coverage[0];
        assert_eq!((first.covered, first.total, first.percentage), (1, 1, 100.0));
        assert!(result.orphans.is_empty());
        assert_eq!(result.broken_chain_ids(), vec!["StR-001"]);
        assert_eq!(
            result.broken_chains[0].furthest_kind,
            IdentifierKind::SystemRequirement
        );
    }

    #[test]
    fn test_front_matter_links_design_to_requirement() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        let result = validator.validate(&[
            SourceFile::new("req.md", "## REQ-F-001\n"),
            SourceFile::new(
                "adr.md",
                "---\ntraceability:\n  requirements:\n    - REQ-F-001\n---\n# DES-001\n",
            ),
        ]);

        assert_eq!(result.link_count, 1);
        let design = result
            .link_coverage(IdentifierKind::SystemRequirement, IdentifierKind::DesignElement)
            .unwrap();
        assert_eq!((design.covered, design.total), (1, 1));
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_is_idempotent() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        assert_eq!(validator.validate(&corpus()), validator.validate(&corpus()));
    }

    #[test]
    fn test_empty_corpus_is_vacuous() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        let result = validator.validate(&[]);
        assert_eq!(result.files_scanned, 0);
        assert_eq!(result.overall_percentage, None);
        assert!(validator.gates(&result, Some(100.0)).unwrap().is_empty());
    }

    #[test]
    fn test_overall_gate() {
        let validator = Validator::new(TraceConfig::default()).unwrap();
        let result = CoverageResult {
            overall_percentage: Some(78.0),
            ..CoverageResult::default()
        };

        let failures = validator.gates(&result, Some(90.0)).unwrap();
        assert_eq!(
            failures,
            vec![GateFailure {
                name: "overall".to_string(),
                actual: 78.0,
                threshold: 90.0,
            }]
        );
        assert_eq!(failures[0].to_string(), "overall coverage 78.0% is below 90.0%");
        assert!(validator.gates(&result, Some(78.0)).unwrap().is_empty());
        assert!(validator.gates(&result, None).unwrap().is_empty());
        assert!(validator.gates(&result, Some(120.0)).is_err());
    }

    #[test]
    fn test_configured_threshold_and_stage_gates() {
        let mut config = TraceConfig::default();
        config.fail_under = Some(95.0);
        config.chain[0].min_coverage = Some(60.0);
        config.chain[4].min_coverage = Some(100.0);
        let validator = Validator::new(config).unwrap();

        let result = validator.validate(&corpus());
        let names: Vec<String> = validator
            .gates(&result, None)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "overall".to_string(),
                "StakeholderRequirement→SystemRequirement".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_configuration_is_rejected() {
        let mut config = TraceConfig::default();
        config.identifiers[0].pattern = "StR-(".to_string();
        assert!(matches!(
            Validator::new(config),
            Err(ConfigError::InvalidPattern { .. })
        ));

        let mut config = TraceConfig::default();
        config.fail_under = Some(-1.0);
        assert!(matches!(
            Validator::new(config),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }
}
