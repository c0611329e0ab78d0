use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of artifact an identifier names
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentifierKind {
    StakeholderRequirement,
    SystemRequirement,
    DesignElement,
    ArchitectureComponent,
    CodeUnit,
    TestCase,
}

impl IdentifierKind {
    /// All kinds, in declaration order
    pub fn all() -> &'static [IdentifierKind] {
        &[
            IdentifierKind::StakeholderRequirement,
            IdentifierKind::SystemRequirement,
            IdentifierKind::DesignElement,
            IdentifierKind::ArchitectureComponent,
            IdentifierKind::CodeUnit,
            IdentifierKind::TestCase,
        ]
    }

    /// Conventional identifier prefix for this kind
    pub fn default_prefix(&self) -> &'static str {
        match self {
            IdentifierKind::StakeholderRequirement => "StR-",
            IdentifierKind::SystemRequirement => "REQ-",
            IdentifierKind::DesignElement => "DES-",
            IdentifierKind::ArchitectureComponent => "ARC-",
            IdentifierKind::CodeUnit => "CODE-",
            IdentifierKind::TestCase => "TEST-",
        }
    }

    /// Severity assigned when a node of this kind is orphaned
    pub fn orphan_severity(&self) -> Severity {
        match self {
            IdentifierKind::CodeUnit | IdentifierKind::TestCase => Severity::High,
            _ => Severity::Medium,
        }
    }
}

impl fmt::Display for IdentifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierKind::StakeholderRequirement => write!(f, "StakeholderRequirement"),
            IdentifierKind::SystemRequirement => write!(f, "SystemRequirement"),
            IdentifierKind::DesignElement => write!(f, "DesignElement"),
            IdentifierKind::ArchitectureComponent => write!(f, "ArchitectureComponent"),
            IdentifierKind::CodeUnit => write!(f, "CodeUnit"),
            IdentifierKind::TestCase => write!(f, "TestCase"),
        }
    }
}

impl FromStr for IdentifierKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "stakeholderrequirement" | "str" | "stakeholder" => {
                Ok(IdentifierKind::StakeholderRequirement)
            }
            "systemrequirement" | "req" | "requirement" => Ok(IdentifierKind::SystemRequirement),
            "designelement" | "des" | "design" => Ok(IdentifierKind::DesignElement),
            "architecturecomponent" | "arc" | "component" => {
                Ok(IdentifierKind::ArchitectureComponent)
            }
            "codeunit" | "code" => Ok(IdentifierKind::CodeUnit),
            "testcase" | "test" => Ok(IdentifierKind::TestCase),
            _ => Err(format!("Invalid identifier kind: {}", s)),
        }
    }
}

/// A declared relationship between two identifiers
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Relation {
    TracesTo,
    Implements,
    TestedBy,
    Realizes,
}

impl Relation {
    pub fn all() -> &'static [Relation] {
        &[
            Relation::TracesTo,
            Relation::Implements,
            Relation::TestedBy,
            Relation::Realizes,
        ]
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Relation::TracesTo => write!(f, "traces-to"),
            Relation::Implements => write!(f, "implements"),
            Relation::TestedBy => write!(f, "tested-by"),
            Relation::Realizes => write!(f, "realizes"),
        }
    }
}

impl FromStr for Relation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "traces-to" | "traces_to" | "tracesto" | "traces" => Ok(Relation::TracesTo),
            "implements" => Ok(Relation::Implements),
            "tested-by" | "tested_by" | "testedby" => Ok(Relation::TestedBy),
            "realizes" => Ok(Relation::Realizes),
            _ => Err(format!("Invalid relation: {}", s)),
        }
    }
}

/// Orphan severity. `High` sorts first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::High => write!(f, "high"),
            Severity::Medium => write!(f, "medium"),
        }
    }
}

/// Where an identifier or annotation was found
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceLocation {
    /// Path relative to the scan root, `/`-separated
    pub path: String,
    /// 1-based line number
    pub line: usize,
}

impl SourceLocation {
    pub fn new(path: impl Into<String>, line: usize) -> Self {
        Self {
            path: path.into(),
            line,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

/// A typed node of the traceability graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identifier {
    /// Canonical identifier (e.g., "REQ-F-001")
    pub id: String,
    pub kind: IdentifierKind,
    /// First place the identifier was declared
    pub source_location: SourceLocation,
}

impl Identifier {
    pub fn new(id: impl Into<String>, kind: IdentifierKind, source_location: SourceLocation) -> Self {
        Self {
            id: id.into(),
            kind,
            source_location,
        }
    }
}

/// An unresolved relation as found in the text
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RawRelation {
    pub from: String,
    pub relation: Relation,
    pub to: String,
    pub location: SourceLocation,
}

/// A resolved, directed edge between two known identifiers.
///
/// Endpoints are ids only; the graph owns the identifiers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub from: String,
    pub to: String,
    pub relation: Relation,
    pub location: SourceLocation,
}

/// Which end of a broken link failed to resolve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UnresolvedEndpoint {
    From,
    To,
    Both,
}

impl fmt::Display for UnresolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnresolvedEndpoint::From => write!(f, "source"),
            UnresolvedEndpoint::To => write!(f, "target"),
            UnresolvedEndpoint::Both => write!(f, "source and target"),
        }
    }
}

/// A relation referencing an identifier that was never declared
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BrokenLink {
    pub from: String,
    pub to: String,
    pub relation: Relation,
    pub location: SourceLocation,
    pub unresolved: UnresolvedEndpoint,
}

/// Non-fatal problems found while parsing annotations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, thiserror::Error)]
#[serde(tag = "type")]
pub enum ParseWarning {
    #[error("{id} declared as {conflicting_kind} at {location}, but first declared as {first_kind} at {first_location}")]
    #[serde(rename_all = "camelCase")]
    ConflictingIdentifierKind {
        id: String,
        first_kind: IdentifierKind,
        first_location: SourceLocation,
        conflicting_kind: IdentifierKind,
        location: SourceLocation,
    },

    #[error("malformed identifier '{token}' at {location} ignored")]
    #[serde(rename_all = "camelCase")]
    MalformedIdentifier {
        token: String,
        location: SourceLocation,
    },

    #[error("'{relation}' annotation at {location} has no subject identifier")]
    #[serde(rename_all = "camelCase")]
    MissingRelationSubject {
        relation: Relation,
        location: SourceLocation,
    },
}

impl ParseWarning {
    pub fn location(&self) -> &SourceLocation {
        match self {
            ParseWarning::ConflictingIdentifierKind { location, .. } => location,
            ParseWarning::MalformedIdentifier { location, .. } => location,
            ParseWarning::MissingRelationSubject { location, .. } => location,
        }
    }

    /// Short category name used in reports
    pub fn category(&self) -> &'static str {
        match self {
            ParseWarning::ConflictingIdentifierKind { .. } => "ConflictingIdentifierKind",
            ParseWarning::MalformedIdentifier { .. } => "MalformedIdentifier",
            ParseWarning::MissingRelationSubject { .. } => "MissingRelationSubject",
        }
    }
}
