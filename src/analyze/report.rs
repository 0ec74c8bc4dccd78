//! Plain-text analysis report

use crate::analyze::probe::{Analysis, Dependency};
use std::fmt::Write;

fn label(analysis: &Analysis, position: usize) -> String {
    let c = &analysis.commits[position];
    format!("{} {}", c.short_hash(), c.subject)
}

fn section(out: &mut String, analysis: &Analysis, title: &str, positions: &[usize], with_deps: bool) {
    let _ = writeln!(out, "{title} ({}):", positions.len());
    if positions.is_empty() {
        let _ = writeln!(out, "  (none)");
    }
    for &p in positions {
        let _ = writeln!(out, "  - {}", label(analysis, p));
        if with_deps
            && let Dependency::Dependent { on, .. } = &analysis.commits[p].dependency
        {
            let names: Vec<String> = on
                .iter()
                .filter_map(|id| analysis.commits.iter().position(|c| &c.commit_id == id))
                .map(|i| label(analysis, i))
                .collect();
            let _ = writeln!(out, "    Depends on: {}", names.join(", "));
        }
    }
    out.push('\n');
}

fn tree(out: &mut String, analysis: &Analysis, forest: &crate::analyze::Forest, node: usize, depth: usize) {
    let members: Vec<String> = forest.nodes[node]
        .members
        .iter()
        .map(|&m| label(analysis, m))
        .collect();
    let indent = "  ".repeat(depth + 2);
    let marker = if depth == 0 { "" } else { "└─ " };
    let _ = writeln!(out, "{indent}{marker}{}", members.join(" + "));
    for child in forest.children(node) {
        tree(out, analysis, forest, child, depth + 1);
    }
}

/// Render the analysis the way `spr analyze` prints it
pub fn render_report(analysis: &Analysis) -> String {
    let mut out = String::new();
    let independent = analysis.independent();
    let dependent = analysis.dependent();
    let orphaned = analysis.orphaned();

    section(&mut out, analysis, "✅ Independent commits", &independent, false);
    section(&mut out, analysis, "❌ Dependent commits", &dependent, true);
    section(&mut out, analysis, "⚠️  Orphaned commits", &orphaned, true);

    let _ = writeln!(out, "📊 Summary:");
    let _ = writeln!(out, "  Total commits: {}", analysis.commits.len());
    let _ = writeln!(out, "  Independent: {}", independent.len());
    let _ = writeln!(out, "  Dependent: {}", dependent.len());
    let _ = writeln!(out, "  Orphaned: {}", orphaned.len());
    out.push('\n');

    if !independent.is_empty() {
        let _ = writeln!(
            out,
            "💡 You can use 'spr breakup' to create independent PRs for the {} independent commit(s)",
            independent.len()
        );
        out.push('\n');
    }

    let _ = writeln!(out, "🎯 Alternative Stacking Scenarios");
    out.push('\n');

    let sccs = analysis.graph.sccs();
    let _ = writeln!(out, "📊 Scenario 1: Strongly Connected Components");
    let _ = writeln!(out, "  {} component(s):", sccs.len());
    for (i, scc) in sccs.iter().enumerate() {
        let members: Vec<String> = scc.iter().map(|&m| label(analysis, m)).collect();
        let _ = writeln!(out, "  Component {}: {}", i + 1, members.join(", "));
    }
    out.push('\n');

    let forest = analysis.graph.forest();
    let roots: Vec<usize> = forest.roots().collect();
    let (trees, singles): (Vec<usize>, Vec<usize>) = roots
        .into_iter()
        .partition(|&r| forest.children(r).next().is_some());
    let _ = writeln!(out, "🌳 Scenario 2: Best-Effort Single-Parent Trees");
    let _ = writeln!(
        out,
        "  {} tree(s), {} orphan(s)",
        trees.len(),
        singles.len()
    );
    for (i, &root) in trees.iter().enumerate() {
        let _ = writeln!(out, "  Tree {}:", i + 1);
        tree(&mut out, analysis, &forest, root, 0);
    }
    for (i, &root) in singles.iter().enumerate() {
        let members: Vec<String> = forest.nodes[root]
            .members
            .iter()
            .map(|&m| label(analysis, m))
            .collect();
        let _ = writeln!(out, "  Orphan {}: {}", i + 1, members.join(" + "));
    }

    out
}
