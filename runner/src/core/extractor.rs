//! Exercise case extraction from Rust source text.
//!
//! Order and documentation come from the syntax tree of the source file, never
//! from the compiled artifact: a top-level function becomes a case when it is
//! `pub`, takes no parameters, returns nothing and is not generic, `async`,
//! `unsafe`, `extern` or a test. Its attached outer doc comment becomes the
//! lesson text shown next to a failure.

use std::sync::LazyLock;

use ast_grep_core::Node;
use ast_grep_language::{LanguageExt, SupportLang};
use regex::Regex;

use crate::core::types::ExerciseCase;

static CFG_ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^#\[\s*cfg\s*\((.*)\)\s*\]$").expect("cfg attribute regex")
});

/// Extract candidate cases in declaration order.
///
/// Assumes the source already compiled; syntax the parser cannot place in a
/// `function_item` is skipped rather than reported.
pub fn extract_cases(source: &str) -> Vec<ExerciseCase> {
    let root = SupportLang::Rust.ast_grep(source);
    let mut cases = Vec::new();
    for node in root.root().children() {
        if node.kind().as_ref() != "function_item" || !is_case_candidate(&node) {
            continue;
        }
        let Some(name) = node.field("name").map(|n| n.text().to_string()) else {
            continue;
        };
        cases.push(ExerciseCase {
            name,
            order: cases.len(),
            line: node.start_pos().line() + 1,
            documentation: extract_documentation(&node),
            cfg: cfg_predicates(&node),
        });
    }
    cases
}

fn is_case_candidate<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    has_exact_pub(node)
        && !has_disqualifying_modifier(node)
        && node.field("type_parameters").is_none()
        && returns_unit(node)
        && has_no_parameters(node)
        && !is_test_function(node)
}

/// `pub` only; `pub(crate)` and friends are not reachable from the harness.
fn has_exact_pub<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    node.children()
        .any(|child| child.kind().as_ref() == "visibility_modifier" && child.text() == "pub")
}

fn has_disqualifying_modifier<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    node.children()
        .filter(|child| child.kind().as_ref() == "function_modifiers")
        .any(|modifiers| {
            modifiers
                .text()
                .split_whitespace()
                .any(|token| matches!(token, "async" | "unsafe") || token.starts_with("extern"))
        })
}

fn returns_unit<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    match node.field("return_type") {
        None => true,
        Some(ret) => {
            let text = ret.text();
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            compact == "()"
        }
    }
}

fn has_no_parameters<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    let Some(params) = node.field("parameters") else {
        return false;
    };
    !params.children().any(|child| {
        matches!(
            child.kind().as_ref(),
            "parameter" | "self_parameter" | "variadic_parameter"
        )
    })
}

fn is_test_function<D: ast_grep_core::Doc>(node: &Node<D>) -> bool {
    preceding_attributes(node).iter().any(|attr| {
        let compact: String = attr.chars().filter(|c| !c.is_whitespace()).collect();
        compact == "#[test]" || compact.starts_with("#[cfg(test")
    })
}

/// Inner predicates of the `#[cfg(...)]` attributes on a function, in source order.
fn cfg_predicates<D: ast_grep_core::Doc>(node: &Node<D>) -> Vec<String> {
    let mut predicates: Vec<String> = preceding_attributes(node)
        .iter()
        .filter_map(|attr| CFG_ATTRIBUTE.captures(attr))
        .filter_map(|caps| caps.get(1))
        .map(|inner| inner.as_str().trim().to_string())
        .collect();
    predicates.reverse();
    predicates
}

fn preceding_attributes<D: ast_grep_core::Doc>(node: &Node<D>) -> Vec<String> {
    let mut attrs = Vec::new();
    let mut current = node.prev();
    while let Some(sibling) = current {
        match sibling.kind().as_ref() {
            "attribute_item" => attrs.push(sibling.text().to_string()),
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        current = sibling.prev();
    }
    attrs
}

/// Collect the outer doc comment directly above a function.
///
/// Walks previous siblings, skipping attributes and plain comments, until an
/// item or other syntax. `///` lines and `/** */` blocks are both accepted.
fn extract_documentation<D: ast_grep_core::Doc>(node: &Node<D>) -> String {
    let mut blocks: Vec<Vec<String>> = Vec::new();
    let mut current = node.prev();
    while let Some(sibling) = current {
        let kind = sibling.kind();
        let text = sibling.text();
        match kind.as_ref() {
            "attribute_item" => {}
            "line_comment" if is_outer_line_doc(&text) => {
                blocks.push(vec![strip_line_doc(&text)]);
            }
            "block_comment" if is_outer_block_doc(&text) => {
                blocks.push(strip_block_doc(&text));
            }
            "line_comment" | "block_comment" => {}
            _ => break,
        }
        current = sibling.prev();
    }
    blocks.reverse();
    let lines: Vec<String> = blocks.into_iter().flatten().collect();
    trim_blank_edges(lines).join("\n")
}

fn is_outer_line_doc(text: &str) -> bool {
    text.starts_with("///") && !text.starts_with("////")
}

fn is_outer_block_doc(text: &str) -> bool {
    text.starts_with("/**") && !text.starts_with("/***") && text != "/**/"
}

fn strip_line_doc(text: &str) -> String {
    let body = text.trim_end_matches(['\n', '\r']);
    let body = &body[3..];
    body.strip_prefix(' ').unwrap_or(body).trim_end().to_string()
}

fn strip_block_doc(text: &str) -> Vec<String> {
    let inner = text
        .strip_prefix("/**")
        .and_then(|rest| rest.strip_suffix("*/"))
        .unwrap_or(text);
    inner
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let trimmed = match trimmed.strip_prefix('*') {
                Some(rest) => rest.strip_prefix(' ').unwrap_or(rest),
                None => trimmed,
            };
            trimmed.trim_end().to_string()
        })
        .collect()
}

fn trim_blank_edges(lines: Vec<String>) -> Vec<String> {
    let start = lines.iter().position(|l| !l.is_empty());
    let end = lines.iter().rposition(|l| !l.is_empty());
    match (start, end) {
        (Some(start), Some(end)) => lines[start..=end].to_vec(),
        _ => Vec::new(),
    }
}
