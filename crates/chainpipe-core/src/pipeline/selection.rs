//! Which tasks actually execute for a height.

use std::collections::BTreeSet;

use super::stage::StageName;

/// Why a task was left out of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Dry runs never persist.
    DryRun,
    /// The active index versions do not include the task.
    NotInVersion,
    /// An explicit target filter excludes the task.
    NotTargeted,
}

/// Narrows the tasks run for a height. `None` filters allow everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskSelection {
    pub dry_run: bool,
    pub version_tasks: Option<BTreeSet<String>>,
    pub target_tasks: Option<BTreeSet<String>>,
}

impl TaskSelection {
    /// Run every task.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self, dry: bool) -> Self {
        self.dry_run = dry;
        self
    }

    pub fn with_version_tasks(mut self, tasks: BTreeSet<String>) -> Self {
        self.version_tasks = Some(tasks);
        self
    }

    pub fn with_target_tasks(mut self, tasks: BTreeSet<String>) -> Self {
        self.target_tasks = Some(tasks);
        self
    }

    pub fn skip_reason(&self, stage: StageName, task: &str) -> Option<SkipReason> {
        if self.dry_run && stage == StageName::Persist {
            return Some(SkipReason::DryRun);
        }
        if let Some(tasks) = &self.version_tasks {
            if !tasks.contains(task) {
                return Some(SkipReason::NotInVersion);
            }
        }
        if let Some(tasks) = &self.target_tasks {
            if !tasks.contains(task) {
                return Some(SkipReason::NotTargeted);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn default_selection_runs_everything() {
        let sel = TaskSelection::all();
        assert_eq!(sel.skip_reason(StageName::Persist, "BlockSeqPersistor"), None);
    }

    #[test]
    fn dry_run_skips_only_persist_stage() {
        let sel = TaskSelection::all().dry_run(true);
        assert_eq!(
            sel.skip_reason(StageName::Persist, "BlockSeqPersistor"),
            Some(SkipReason::DryRun)
        );
        assert_eq!(sel.skip_reason(StageName::Sequence, "BlockSeqCreator"), None);
    }

    #[test]
    fn version_filter_checked_before_targets() {
        let sel = TaskSelection::all()
            .with_version_tasks(set(&["A", "B"]))
            .with_target_tasks(set(&["B"]));
        assert_eq!(sel.skip_reason(StageName::Fetch, "C"), Some(SkipReason::NotInVersion));
        assert_eq!(sel.skip_reason(StageName::Fetch, "A"), Some(SkipReason::NotTargeted));
        assert_eq!(sel.skip_reason(StageName::Fetch, "B"), None);
    }
}
