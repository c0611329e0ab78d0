//! Report renderers
//!
//! Each renderer is a pure function of `CoverageResult`. Every section is
//! always emitted, with an explicit count, so reports diff cleanly between runs.

use anyhow::Result;

use crate::coverage::CoverageResult;

const NONE_LINE: &str = "  none\n";

/// Formats a percentage, or `N/A` for a vacuous metric
pub fn format_percentage(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.1}%", v),
        None => "N/A".to_string(),
    }
}

fn heading(output: &mut String, title: &str) {
    output.push_str(&format!("{}\n{}\n", title, "-".repeat(title.chars().count())));
}

/// Plain-text scorecard
pub fn render_text(result: &CoverageResult) -> String {
    let mut output = String::new();

    output.push_str("Traceability Report\n");
    output.push_str(&format!("{}\n\n", "=".repeat(19)));
    output.push_str(&format!("Files scanned:     {}\n", result.files_scanned));
    output.push_str(&format!("Identifiers:       {}\n", result.identifier_count));
    output.push_str(&format!("Links:             {}\n", result.link_count));
    output.push_str(&format!(
        "Overall coverage:  {} ({}/{})\n\n",
        format_percentage(result.overall_percentage),
        result.overall_covered,
        result.overall_total
    ));

    heading(&mut output, "Identifiers by kind");
    for total in &result.kind_totals {
        output.push_str(&format!("  {:<28}{:>6}\n", total.kind.to_string(), total.total));
    }
    output.push('\n');

    heading(&mut output, "Forward coverage");
    for coverage in &result.link_type_coverage {
        let pct = if coverage.no_nodes_of_kind {
            format!("{} (no nodes of kind)", format_percentage(None))
        } else {
            format_percentage(Some(coverage.percentage))
        };
        output.push_str(&format!(
            "  {:<44}{:>5}/{:<5} {}\n",
            coverage.label(),
            coverage.covered,
            coverage.total,
            pct
        ));
    }
    output.push('\n');

    heading(&mut output, "Backward coverage");
    for coverage in &result.backward_coverage {
        let label = format!("{}←{}", coverage.kind, coverage.upstream);
        let pct = if coverage.no_nodes_of_kind {
            format!("{} (no nodes of kind)", format_percentage(None))
        } else {
            format_percentage(Some(coverage.percentage))
        };
        output.push_str(&format!(
            "  {:<44}{:>5}/{:<5} {}\n",
            label, coverage.covered, coverage.total, pct
        ));
    }
    output.push('\n');

    heading(&mut output, &format!("Orphans ({} found)", result.orphans.len()));
    if result.orphans.is_empty() {
        output.push_str(NONE_LINE);
    }
    for orphan in &result.orphans {
        output.push_str(&format!(
            "  [{}] {} ({}) at {}: no upstream {}\n",
            orphan.severity, orphan.id, orphan.kind, orphan.location, orphan.expected_upstream
        ));
    }
    output.push('\n');

    heading(
        &mut output,
        &format!("Broken chains ({} found)", result.broken_chains.len()),
    );
    if result.broken_chains.is_empty() {
        output.push_str(NONE_LINE);
    }
    for chain in &result.broken_chains {
        output.push_str(&format!(
            "  {} ({}) at {}: furthest kind reached {}\n",
            chain.id, chain.kind, chain.location, chain.furthest_kind
        ));
    }
    output.push('\n');

    heading(
        &mut output,
        &format!("Broken links ({} found)", result.broken_links.len()),
    );
    if result.broken_links.is_empty() {
        output.push_str(NONE_LINE);
    }
    for link in &result.broken_links {
        output.push_str(&format!(
            "  {} {} {} at {}: unresolved {}\n",
            link.from, link.relation, link.to, link.location, link.unresolved
        ));
    }
    output.push('\n');

    heading(&mut output, &format!("Warnings ({} found)", result.warnings.len()));
    if result.warnings.is_empty() {
        output.push_str(NONE_LINE);
    }
    for warning in &result.warnings {
        output.push_str(&format!("  [{}] {}\n", warning.category(), warning));
    }

    output
}

/// Pretty JSON with camelCase field names
pub fn render_json(result: &CoverageResult) -> Result<String> {
    let mut json = serde_json::to_string_pretty(result)?;
    json.push('\n');
    Ok(json)
}

/// Markdown traceability matrix
pub fn render_markdown(result: &CoverageResult) -> String {
    let mut output = String::new();

    output.push_str("# Traceability Matrix\n\n");

    output.push_str("## Summary\n\n");
    output.push_str("| Metric | Value |\n|---|---|\n");
    output.push_str(&format!("| Files scanned | {} |\n", result.files_scanned));
    output.push_str(&format!("| Identifiers | {} |\n", result.identifier_count));
    output.push_str(&format!("| Links | {} |\n", result.link_count));
    output.push_str(&format!(
        "| Overall coverage | {} ({}/{}) |\n",
        format_percentage(result.overall_percentage),
        result.overall_covered,
        result.overall_total
    ));
    for total in &result.kind_totals {
        output.push_str(&format!("| {} | {} |\n", total.kind, total.total));
    }
    output.push('\n');

    output.push_str("## Coverage\n\n");
    output.push_str("| Link | Covered | Total | Coverage |\n|---|---|---|---|\n");
    for coverage in &result.link_type_coverage {
        let pct = if coverage.no_nodes_of_kind {
            format_percentage(None)
        } else {
            format_percentage(Some(coverage.percentage))
        };
        output.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            coverage.label(),
            coverage.covered,
            coverage.total,
            pct
        ));
    }
    output.push('\n');

    output.push_str("| Kind | Upstream | Covered | Total | Coverage |\n|---|---|---|---|---|\n");
    for coverage in &result.backward_coverage {
        let pct = if coverage.no_nodes_of_kind {
            format_percentage(None)
        } else {
            format_percentage(Some(coverage.percentage))
        };
        output.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            coverage.kind, coverage.upstream, coverage.covered, coverage.total, pct
        ));
    }
    output.push('\n');

    output.push_str("## Trace Matrix\n\n");
    if result.trace_matrix.is_empty() {
        output.push_str("_None._\n\n");
    } else {
        output.push_str("| ID | Kind | Upstream | Downstream |\n|---|---|---|---|\n");
        for row in &result.trace_matrix {
            output.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                row.id,
                row.kind,
                join_or_dash(&row.upstream),
                join_or_dash(&row.downstream)
            ));
        }
        output.push('\n');
    }

    output.push_str(&format!("## Orphans ({} found)\n\n", result.orphans.len()));
    if result.orphans.is_empty() {
        output.push_str("_None._\n");
    }
    for orphan in &result.orphans {
        output.push_str(&format!(
            "- **{}** `{}` ({}), `{}`: no upstream {}\n",
            orphan.severity, orphan.id, orphan.kind, orphan.location, orphan.expected_upstream
        ));
    }
    output.push('\n');

    output.push_str(&format!(
        "## Broken Chains ({} found)\n\n",
        result.broken_chains.len()
    ));
    if result.broken_chains.is_empty() {
        output.push_str("_None._\n");
    }
    for chain in &result.broken_chains {
        output.push_str(&format!(
            "- `{}` ({}), `{}`: furthest kind reached {}\n",
            chain.id, chain.kind, chain.location, chain.furthest_kind
        ));
    }
    output.push('\n');

    output.push_str(&format!(
        "## Broken Links ({} found)\n\n",
        result.broken_links.len()
    ));
    if result.broken_links.is_empty() {
        output.push_str("_None._\n");
    }
    for link in &result.broken_links {
        output.push_str(&format!(
            "- `{}` {} `{}`, `{}`: unresolved {}\n",
            link.from, link.relation, link.to, link.location, link.unresolved
        ));
    }
    output.push('\n');

    output.push_str(&format!("## Warnings ({} found)\n\n", result.warnings.len()));
    if result.warnings.is_empty() {
        output.push_str("_None._\n");
    }
    for warning in &result.warnings {
        output.push_str(&format!("- {}: {}\n", warning.category(), warning));
    }

    output
}

fn join_or_dash(ids: &[String]) -> String {
    if ids.is_empty() {
        "-".to_string()
    } else {
        ids.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceConfig;
    use crate::coverage::{analyze, Chain};
    use crate::graph::TraceGraph;
    use crate::models::{
        Identifier, IdentifierKind, ParseWarning, RawRelation, Relation, SourceLocation,
    };

    fn sample_result() -> CoverageResult {
        let loc = |line| SourceLocation::new("docs/req.md", line);
        let identifiers = vec![
            Identifier::new("StR-001", IdentifierKind::StakeholderRequirement, loc(1)),
            Identifier::new("REQ-F-001", IdentifierKind::SystemRequirement, loc(2)),
            Identifier::new("CODE-007", IdentifierKind::CodeUnit, loc(3)),
        ];
        let relations = vec![
            RawRelation {
                from: "REQ-F-001".to_string(),
                relation: Relation::TracesTo,
                to: "StR-001".to_string(),
                location: loc(2),
            },
            RawRelation {
                from: "DES-001".to_string(),
                relation: Relation::Implements,
                to: "REQ-F-999".to_string(),
                location: loc(4),
            },
        ];
        let chain = Chain::new(&TraceConfig::default().chain).unwrap();
        let mut result = analyze(&TraceGraph::build(&identifiers, &relations), &chain);
        result.files_scanned = 1;
        result.warnings.push(ParseWarning::MalformedIdentifier {
            token: "REQ-F-".to_string(),
            location: loc(5),
        });
        result
    }

    #[test]
    fn test_text_report_lists_every_section() {
        let text = render_text(&sample_result());

        assert!(text.contains("Overall coverage:  33.3% (1/3)"));
        assert!(text.contains("StakeholderRequirement→SystemRequirement"));
        assert!(text.contains("Orphans (1 found)"));
        assert!(text.contains("[high] CODE-007 (CodeUnit) at docs/req.md:3: no upstream DesignElement"));
        assert!(text.contains("Broken chains (2 found)"));
        assert!(text.contains("Broken links (1 found)"));
        assert!(text.contains("DES-001 implements REQ-F-999 at docs/req.md:4: unresolved source and target"));
        assert!(text.contains("[MalformedIdentifier] malformed identifier 'REQ-F-' at docs/req.md:5 ignored"));
        assert!(text.contains("  ArchitectureComponent"));
    }

    #[test]
    fn test_empty_result_reports_zero_counts_and_na() {
        let chain = Chain::new(&TraceConfig::default().chain).unwrap();
        let result = analyze(&TraceGraph::default(), &chain);
        let text = render_text(&result);

        assert!(text.contains("Overall coverage:  N/A (0/0)"));
        assert!(text.contains("Orphans (0 found)\n-----------------\n  none"));
        assert!(text.contains("Broken chains (0 found)"));
        assert!(text.contains("Broken links (0 found)"));
        assert!(text.contains("Warnings (0 found)"));
        assert!(text.contains("N/A (no nodes of kind)"));
        for kind in IdentifierKind::all() {
            assert!(text.contains(&kind.to_string()));
        }

        let markdown = render_markdown(&result);
        assert!(markdown.contains("| Overall coverage | N/A (0/0) |"));
        assert!(markdown.contains("## Orphans (0 found)\n\n_None._"));
    }

    #[test]
    fn test_json_uses_camel_case_fields() -> Result<()> {
        let json = render_json(&sample_result())?;
        let value: serde_json::Value = serde_json::from_str(&json)?;

        assert!(value["overallPercentage"].is_f64());
        assert_eq!(value["linkTypeCoverage"][0]["percentage"], serde_json::json!(100.0));
        assert_eq!(value["linkTypeCoverage"][2]["noNodesOfKind"], true);
        assert_eq!(value["orphans"][0]["id"], "CODE-007");
        assert_eq!(value["orphans"][0]["severity"], "high");
        assert_eq!(value["brokenChains"][0]["furthestKind"], "SystemRequirement");
        assert_eq!(value["brokenLinks"][0]["unresolved"], "both");
        assert_eq!(value["warnings"][0]["type"], "MalformedIdentifier");

        let back: CoverageResult = serde_json::from_str(&json)?;
        assert_eq!(back.orphans, sample_result().orphans);
        assert_eq!(back.warnings, sample_result().warnings);
        Ok(())
    }

    #[test]
    fn test_markdown_matrix_rows() {
        let markdown = render_markdown(&sample_result());
        assert!(markdown.contains("| StR-001 | StakeholderRequirement | - | REQ-F-001 |"));
        assert!(markdown.contains("| REQ-F-001 | SystemRequirement | StR-001 | - |"));
        assert!(markdown.contains("- **high** `CODE-007` (CodeUnit), `docs/req.md:3`: no upstream DesignElement"));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let result = sample_result();
        assert_eq!(render_text(&result), render_text(&result));
        assert_eq!(render_markdown(&result), render_markdown(&result));
    }
}
