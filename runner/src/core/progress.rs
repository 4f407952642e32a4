//! In-memory record of completed modules and cases.
//!
//! Progress lives only as long as the process: restarting the runner starts the
//! curriculum over.

use std::collections::BTreeSet;

/// Completed module names and `module::case` ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressState {
    modules: BTreeSet<String>,
    cases: BTreeSet<String>,
}

impl ProgressState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_module_complete(&self, module: &str) -> bool {
        self.modules.contains(module)
    }

    pub fn is_case_complete(&self, case_id: &str) -> bool {
        self.cases.contains(case_id)
    }

    /// Returns true if the module was not already recorded.
    pub fn mark_module_complete(&mut self, module: &str) -> bool {
        self.modules.insert(module.to_string())
    }

    /// Returns true if the case was not already recorded.
    pub fn mark_case_complete(&mut self, case_id: &str) -> bool {
        self.cases.insert(case_id.to_string())
    }

    /// True if every named module has been recorded as complete.
    pub fn all_complete<'a, I>(&self, modules: I) -> bool
    where
        I: IntoIterator<Item = &'a str>,
    {
        modules.into_iter().all(|module| self.is_module_complete(module))
    }

    pub fn completed_modules(&self) -> usize {
        self.modules.len()
    }

    pub fn completed_cases(&self) -> usize {
        self.cases.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_are_monotonic() {
        let mut progress = ProgressState::new();
        assert!(!progress.is_case_complete("intro::basics::e1"));
        assert!(progress.mark_case_complete("intro::basics::e1"));
        assert!(!progress.mark_case_complete("intro::basics::e1"));
        assert!(progress.is_case_complete("intro::basics::e1"));
        assert_eq!(progress.completed_cases(), 1);
    }

    #[test]
    fn all_complete_requires_every_module() {
        let mut progress = ProgressState::new();
        progress.mark_module_complete("intro::basics");
        assert!(progress.all_complete(["intro::basics"]));
        assert!(!progress.all_complete(["intro::basics", "decl::locals"]));
        assert!(progress.all_complete(std::iter::empty()));
    }

    #[test]
    fn module_and_case_sets_are_independent() {
        let mut progress = ProgressState::new();
        progress.mark_case_complete("intro::basics");
        assert!(!progress.is_module_complete("intro::basics"));
        assert_eq!(progress.completed_modules(), 0);
    }
}
