pub mod models;
pub mod config;
pub mod corpus;
pub mod parser;
pub mod graph;
pub mod coverage;
pub mod report;
pub mod validator;

// Re-export commonly used types
pub use models::{
    BrokenLink, Identifier, IdentifierKind, Link, ParseWarning, RawRelation, Relation,
    Severity, SourceLocation, UnresolvedEndpoint,
};
pub use config::{get_config_dir, ConfigError, TraceConfig};
pub use corpus::{collect_files, ScanError, SourceFile};
pub use graph::TraceGraph;
pub use coverage::{analyze, BrokenChain, Chain, CoverageResult, LinkCoverage, Orphan};
pub use report::{render_json, render_markdown, render_text};
pub use validator::{GateFailure, Validator};
