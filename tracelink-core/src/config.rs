//! Matcher and chain configuration
//!
//! The annotation syntax varies between projects (`@implements REQ-F-001`,
//! `Traces to: StR-003`, `**Traces to**: ...`, `// trace:REQ-F-001`), so every
//! pattern the parser uses comes from a YAML document rather than code.
//! Sections missing from the document fall back to the built-in defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::models::{IdentifierKind, Relation};

/// File names looked up in the scan root, in order
pub const CONFIG_FILE_NAMES: &[&str] = &[".traceability.yaml", ".traceability.yml"];

/// Errors raised while validating or compiling a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {what} pattern '{pattern}': {source}")]
    InvalidPattern {
        what: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid exclude glob '{pattern}': {source}")]
    InvalidGlob {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("no identifier rule defined for {0}")]
    MissingKindRule(IdentifierKind),

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("invalid threshold {value} for {name}: must be between 0 and 100")]
    InvalidThreshold { name: String, value: f64 },
}

/// How identifiers of one kind are recognized
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KindRule {
    pub kind: IdentifierKind,
    /// Literal prefix; tokens starting with it that match no pattern are reported as malformed
    pub prefix: String,
    /// Regular expression for a complete identifier (word boundaries are added)
    pub pattern: String,
    /// Keywords that force the token right after them to this kind (e.g. `@code`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub declare: Vec<String>,
}

/// Keywords announcing a relation from the subject to the identifiers that follow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelationRule {
    pub relation: Relation,
    /// Case-insensitive regular expressions
    pub keywords: Vec<String>,
}

/// One stage of the canonical traceability chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainStageConfig {
    /// Primary kind, used for labels
    pub kind: IdentifierKind,
    /// Additional kinds that sit at the same stage
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub also: Vec<IdentifierKind>,
    /// Relations accepted toward the next stage; empty accepts any
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relations: Vec<Relation>,
    /// Minimum forward coverage (percent) from this stage to the next
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_coverage: Option<f64>,
}

impl ChainStageConfig {
    pub fn new(kind: IdentifierKind) -> Self {
        Self {
            kind,
            also: Vec::new(),
            relations: Vec::new(),
            min_coverage: None,
        }
    }
}

/// One list under the front matter section and the relation its items declare
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontMatterField {
    pub key: String,
    pub relation: Relation,
}

/// Traceability lists in a leading `---` YAML block, e.g.
/// `traceability: { requirements: [REQ-F-001] }`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FrontMatterConfig {
    /// Top-level key holding the lists
    pub section: String,
    pub fields: Vec<FrontMatterField>,
}

impl Default for FrontMatterConfig {
    fn default() -> Self {
        let field = |key: &str| FrontMatterField {
            key: key.to_string(),
            relation: Relation::TracesTo,
        };
        Self {
            section: "traceability".to_string(),
            fields: vec![field("requirements"), field("stakeholderRequirements")],
        }
    }
}

/// Which files are read from the scan root
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScanOptions {
    /// Glob patterns matched against paths relative to the root
    pub exclude: Vec<String>,
    /// Directory names skipped anywhere in the tree
    pub exclude_dirs: Vec<String>,
    /// Larger files are skipped
    pub max_file_bytes: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            exclude: vec![
                ".traceability.yaml".to_string(),
                ".traceability.yml".to_string(),
                "**/*.lock".to_string(),
            ],
            exclude_dirs: vec![
                ".git".to_string(),
                ".hg".to_string(),
                ".svn".to_string(),
                "target".to_string(),
                "node_modules".to_string(),
            ],
            max_file_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Complete validator configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TraceConfig {
    pub identifiers: Vec<KindRule>,
    pub relations: Vec<RelationRule>,
    pub chain: Vec<ChainStageConfig>,
    /// Identifier-like tokens matching any of these are skipped silently (template placeholders)
    pub placeholders: Vec<String>,
    pub front_matter: FrontMatterConfig,
    pub scan: ScanOptions,
    /// Minimum overall coverage (percent); the CLI flag takes precedence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_under: Option<f64>,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            identifiers: default_identifier_rules(),
            relations: default_relation_rules(),
            chain: default_chain(),
            placeholders: vec!["X{2,}".to_string(), "-0+$".to_string()],
            front_matter: FrontMatterConfig::default(),
            scan: ScanOptions::default(),
            fail_under: None,
        }
    }
}

impl TraceConfig {
    /// Loads a configuration document from the provided path
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        Self::from_yaml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))
    }

    /// Parses a configuration document; an empty document yields the defaults
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: TraceConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Serializes the configuration back to YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Finds the configuration for a scan root.
    ///
    /// Lookup order: explicit path, root config file, user config directory, defaults.
    /// Returns the config and the file it came from.
    pub fn discover(root: &Path, explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        Self::discover_in(root, explicit, get_config_dir().as_deref())
    }

    pub(crate) fn discover_in(
        root: &Path,
        explicit: Option<&Path>,
        user_dir: Option<&Path>,
    ) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            if !path.is_file() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }

        for name in CONFIG_FILE_NAMES {
            let candidate = root.join(name);
            if candidate.is_file() {
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }

        if let Some(dir) = user_dir {
            let candidate = dir.join("config.yaml");
            if candidate.is_file() {
                return Ok((Self::load(&candidate)?, Some(candidate)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Checks thresholds; patterns are checked when they are compiled
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(value) = self.fail_under {
            check_threshold("fail_under", value)?;
        }
        for stage in &self.chain {
            if let Some(value) = stage.min_coverage {
                check_threshold(&format!("{} min_coverage", stage.kind), value)?;
            }
        }
        Ok(())
    }
}

/// Rejects percentages outside 0..=100
pub fn check_threshold(name: &str, value: f64) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&value) || value.is_nan() {
        return Err(ConfigError::InvalidThreshold {
            name: name.to_string(),
            value,
        });
    }
    Ok(())
}

/// Gets the user-level configuration directory
pub fn get_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("tracelink"))
}

fn default_identifier_rules() -> Vec<KindRule> {
    let rule = |kind: IdentifierKind, pattern: &str, declare: &[&str]| KindRule {
        kind,
        prefix: kind.default_prefix().to_string(),
        pattern: pattern.to_string(),
        declare: declare.iter().map(|d| d.to_string()).collect(),
    };

    vec![
        rule(
            IdentifierKind::StakeholderRequirement,
            r"StR-(?:[A-Z]+-)*\d{3,}",
            &[r"@str\b", r"@stakeholder\b"],
        ),
        // REQ-F-001, REQ-NF-002, REQ-AUTH-F-003
        rule(
            IdentifierKind::SystemRequirement,
            r"REQ-(?:[A-Z]+-)*\d{3,}",
            &[r"@req\b", r"@requirement\b"],
        ),
        rule(
            IdentifierKind::DesignElement,
            r"DES-(?:[A-Z]+-)*\d{3,}",
            &[r"@design\b"],
        ),
        rule(
            IdentifierKind::ArchitectureComponent,
            r"ARC-(?:[A-Z]+-)*\d{3,}",
            &[r"@component\b"],
        ),
        rule(
            IdentifierKind::CodeUnit,
            r"CODE-(?:[A-Z]+-)*\d{3,}",
            &[r"@code\b"],
        ),
        rule(
            IdentifierKind::TestCase,
            r"TEST-(?:[A-Z0-9]+-)*\d+",
            &[r"@test\b"],
        ),
    ]
}

fn default_relation_rules() -> Vec<RelationRule> {
    let rule = |relation: Relation, keywords: &[&str]| RelationRule {
        relation,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    };

    vec![
        rule(
            Relation::TracesTo,
            &[
                r"@traces?(?:[-_]?to)?\b",
                r"\btraces?[ \t]+to\b",
                r"\btraces?[-_]to\b",
                r"\btrace:",
            ],
        ),
        rule(Relation::Implements, &[r"@implements?\b", r"\bimplements\b"]),
        rule(
            Relation::TestedBy,
            &[
                r"@tested[-_]?by\b",
                r"\btested[ \t]+by\b",
                r"\btested-by\b",
                r"\bverified[ \t]+by\b",
                r"@verifies\b",
                r"\bverifies\b",
            ],
        ),
        rule(
            Relation::Realizes,
            &[r"@realizes\b", r"\brealizes\b", r"@satisfies\b", r"\bsatisfies\b"],
        ),
    ]
}

fn default_chain() -> Vec<ChainStageConfig> {
    let mut design = ChainStageConfig::new(IdentifierKind::DesignElement);
    design.also.push(IdentifierKind::ArchitectureComponent);

    vec![
        ChainStageConfig::new(IdentifierKind::StakeholderRequirement),
        ChainStageConfig::new(IdentifierKind::SystemRequirement),
        design,
        ChainStageConfig::new(IdentifierKind::CodeUnit),
        ChainStageConfig::new(IdentifierKind::TestCase),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_covers_every_kind() {
        let config = TraceConfig::default();
        for kind in IdentifierKind::all() {
            assert!(
                config.identifiers.iter().any(|r| r.kind == *kind),
                "missing rule for {}",
                kind
            );
        }
        assert_eq!(config.chain.len(), 5);
        assert_eq!(config.chain[2].also, vec![IdentifierKind::ArchitectureComponent]);
    }

    #[test]
    fn test_partial_document_keeps_other_defaults() -> Result<()> {
        let yaml = r#"
fail_under: 75
chain:
  - kind: SystemRequirement
  - kind: TestCase
    min_coverage: 50
"#;
        let config = TraceConfig::from_yaml(yaml)?;
        assert_eq!(config.fail_under, Some(75.0));
        assert_eq!(config.chain.len(), 2);
        assert_eq!(config.chain[1].min_coverage, Some(50.0));
        assert_eq!(config.identifiers, TraceConfig::default().identifiers);
        assert_eq!(config.scan, ScanOptions::default());
        Ok(())
    }

    #[test]
    fn test_partial_identifier_list_replaces_defaults() -> Result<()> {
        let yaml = r#"
identifiers:
  - kind: StakeholderRequirement
    prefix: StR-
    pattern: "StR-\\d{3}"
"#;
        let config = TraceConfig::from_yaml(yaml)?;
        assert_eq!(config.identifiers.len(), 1);
        assert!(matches!(
            crate::parser::Matchers::new(&config),
            Err(ConfigError::MissingKindRule(IdentifierKind::SystemRequirement))
        ));
        Ok(())
    }

    #[test]
    fn test_front_matter_defaults_and_override() -> Result<()> {
        let config = TraceConfig::default();
        assert_eq!(config.front_matter.section, "traceability");
        let keys: Vec<&str> = config.front_matter.fields.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["requirements", "stakeholderRequirements"]);

        let yaml = "front_matter:\n  fields:\n    - key: tests\n      relation: TestedBy\n";
        let config = TraceConfig::from_yaml(yaml)?;
        assert_eq!(config.front_matter.section, "traceability");
        assert_eq!(
            config.front_matter.fields,
            vec![FrontMatterField {
                key: "tests".to_string(),
                relation: Relation::TestedBy,
            }]
        );
        Ok(())
    }

    #[test]
    fn test_empty_document_is_default() -> Result<()> {
        assert_eq!(TraceConfig::from_yaml("  \n")?, TraceConfig::default());
        Ok(())
    }

    #[test]
    fn test_yaml_round_trip_of_defaults() -> Result<()> {
        let config = TraceConfig::default();
        let yaml = config.to_yaml()?;
        assert_eq!(TraceConfig::from_yaml(&yaml)?, config);
        Ok(())
    }

    #[test]
    fn test_validate_rejects_out_of_range_thresholds() {
        let mut config = TraceConfig::default();
        config.fail_under = Some(120.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidThreshold { .. })
        ));

        let mut config = TraceConfig::default();
        config.chain[1].min_coverage = Some(-1.0);
        assert!(config.validate().is_err());

        assert!(TraceConfig::default().validate().is_ok());
    }

    #[test]
    fn test_discover_prefers_explicit_then_root_then_user() -> Result<()> {
        let root = tempdir()?;
        let user = tempdir()?;

        // Nothing present: defaults
        let (config, source) = TraceConfig::discover_in(root.path(), None, Some(user.path()))?;
        assert_eq!(config, TraceConfig::default());
        assert!(source.is_none());

        // User-level config
        fs::write(user.path().join("config.yaml"), "fail_under: 10\n")?;
        let (config, source) = TraceConfig::discover_in(root.path(), None, Some(user.path()))?;
        assert_eq!(config.fail_under, Some(10.0));
        assert_eq!(source, Some(user.path().join("config.yaml")));

        // Root config wins over user config
        fs::write(root.path().join(".traceability.yml"), "fail_under: 20\n")?;
        let (config, _) = TraceConfig::discover_in(root.path(), None, Some(user.path()))?;
        assert_eq!(config.fail_under, Some(20.0));

        // Explicit path wins over everything
        let explicit = root.path().join("custom.yaml");
        fs::write(&explicit, "fail_under: 30\n")?;
        let (config, source) =
            TraceConfig::discover_in(root.path(), Some(&explicit), Some(user.path()))?;
        assert_eq!(config.fail_under, Some(30.0));
        assert_eq!(source, Some(explicit));

        Ok(())
    }

    #[test]
    fn test_discover_missing_explicit_config_is_an_error() {
        let root = tempdir().unwrap();
        let missing = root.path().join("nope.yaml");
        assert!(TraceConfig::discover_in(root.path(), Some(&missing), None).is_err());
    }

    #[test]
    fn test_load_reports_parse_errors_with_path() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "chain: [not, a, stage")?;
        let err = TraceConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.yaml"));
        Ok(())
    }
}
