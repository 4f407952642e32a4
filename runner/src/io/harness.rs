//! Dispatch harness source generation.
//!
//! The harness is a tiny binary linked against one compiled exercise module. It
//! lists the cases it can dispatch (`--list`) or runs a single case, writing a
//! JSON panic report when the case panics.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{ExerciseCase, SourceModule};

const HARNESS_TEMPLATE: &str = include_str!("templates/harness.rs.j2");

/// Render the harness source for `module` dispatching `cases` in order.
pub fn render_harness(module: &SourceModule, cases: &[ExerciseCase]) -> Result<String> {
    let mut env = Environment::new();
    env.add_template("harness", HARNESS_TEMPLATE)
        .context("load harness template")?;
    let names: Vec<&str> = cases.iter().map(|case| case.name.as_str()).collect();
    let rendered = env
        .get_template("harness")?
        .render(context! {
            module_name => module.name(),
            crate_name => module.crate_name(),
            cases => names,
        })
        .with_context(|| format!("render harness for {}", module.name()))?;
    Ok(rendered)
}

/// Crate name of the harness binary for `module`.
pub fn harness_crate_name(module: &SourceModule) -> String {
    format!("run_{}", module.crate_name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ModuleRole;
    use std::path::PathBuf;

    fn module() -> SourceModule {
        SourceModule {
            path: PathBuf::from("/work/koans/intro/basics.rs"),
            relative: "intro/basics.rs".to_string(),
            segments: vec!["intro".to_string(), "basics".to_string()],
            role: ModuleRole::Exercise,
        }
    }

    fn case(name: &str, order: usize) -> ExerciseCase {
        ExerciseCase {
            name: name.to_string(),
            order,
            line: order + 1,
            documentation: String::new(),
            cfg: Vec::new(),
        }
    }

    #[test]
    fn harness_lists_and_dispatches_cases_in_order() {
        let source = render_harness(&module(), &[case("e2", 0), case("e1", 1)]).expect("render");
        assert!(source.contains("for intro::basics."));
        assert!(source.contains("const CASES: &[&str] = &[\n    \"e2\",\n    \"e1\",\n];"));
        assert!(source.contains("\"e2\" => koan_intro_basics::e2(),"));
        assert!(source.contains("\"e1\" => koan_intro_basics::e1(),"));
        let first = source.find("\"e2\" =>").expect("e2 arm");
        let second = source.find("\"e1\" =>").expect("e1 arm");
        assert!(first < second);
    }

    #[test]
    fn harness_records_panics_with_backtrace() {
        let source = render_harness(&module(), &[case("e1", 0)]).expect("render");
        assert!(source.contains("Backtrace::force_capture()"));
        assert!(source.contains("panic::set_hook"));
        assert!(source.contains("\"--list\""));
    }

    #[test]
    fn harness_crate_name_is_distinct_from_module_crate() {
        assert_eq!(harness_crate_name(&module()), "run_koan_intro_basics");
    }
}
