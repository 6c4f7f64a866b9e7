//! Stages: named groups of tasks run sequentially or concurrently.
//!
//! A stage is a synchronization barrier: it returns only after every selected
//! task returned, and a concurrent stage applies its tasks' patches only when
//! all of them succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::StreamExt;

use super::retry::{RetryPolicy, RetryingTask, TransientPredicate};
use super::selection::TaskSelection;
use super::task::{Patch, RunContext, Task};
use crate::error::IndexerError;

/// Stage names in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    Setup,
    Fetch,
    Parse,
    Sync,
    Sequence,
    Aggregate,
    Analyze,
    Persist,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Setup => "setup",
            Self::Fetch => "fetch",
            Self::Parse => "parse",
            Self::Sync => "sync",
            Self::Sequence => "sequence",
            Self::Aggregate => "aggregate",
            Self::Analyze => "analyze",
            Self::Persist => "persist",
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub enum StageTasks<P> {
    /// Tasks run in list order, each seeing the previous task's writes.
    Sequential(Vec<Arc<dyn Task<P>>>),
    /// Tasks run independently; write sets must be disjoint.
    Concurrent(Vec<Arc<dyn Task<P>>>),
}

pub struct Stage<P> {
    name: StageName,
    tasks: StageTasks<P>,
}

impl<P: Send + Sync + 'static> Stage<P> {
    pub fn sequential(name: StageName, tasks: Vec<Arc<dyn Task<P>>>) -> Self {
        Self {
            name,
            tasks: StageTasks::Sequential(tasks),
        }
    }

    /// Build a concurrent stage, rejecting tasks whose declared write sets overlap.
    pub fn concurrent(name: StageName, tasks: Vec<Arc<dyn Task<P>>>) -> Result<Self, IndexerError> {
        let mut owners: HashMap<&'static str, &'static str> = HashMap::new();
        for task in &tasks {
            for field in task.writes().iter().copied() {
                if let Some(other) = owners.insert(field, task.name()) {
                    return Err(IndexerError::Config(format!(
                        "stage {name}: tasks {other} and {} both write '{field}'",
                        task.name()
                    )));
                }
            }
        }
        Ok(Self {
            name,
            tasks: StageTasks::Concurrent(tasks),
        })
    }

    pub fn name(&self) -> StageName {
        self.name
    }

    pub fn is_concurrent(&self) -> bool {
        matches!(self.tasks, StageTasks::Concurrent(_))
    }

    fn task_list(&self) -> &[Arc<dyn Task<P>>] {
        match &self.tasks {
            StageTasks::Sequential(t) | StageTasks::Concurrent(t) => t,
        }
    }

    pub fn task_names(&self) -> Vec<&'static str> {
        self.task_list().iter().map(|t| t.name()).collect()
    }

    /// Wrap every task with the retry policy.
    pub(crate) fn with_retry(self, policy: &RetryPolicy, is_transient: TransientPredicate) -> Self {
        let wrap = |tasks: Vec<Arc<dyn Task<P>>>| -> Vec<Arc<dyn Task<P>>> {
            tasks
                .into_iter()
                .map(|t| {
                    Arc::new(RetryingTask::new(t, policy.clone(), is_transient)) as Arc<dyn Task<P>>
                })
                .collect()
        };
        let tasks = match self.tasks {
            StageTasks::Sequential(t) => StageTasks::Sequential(wrap(t)),
            StageTasks::Concurrent(t) => StageTasks::Concurrent(wrap(t)),
        };
        Self {
            name: self.name,
            tasks,
        }
    }

    /// Tasks surviving the selection, decided before anything is dispatched.
    fn selected<'a>(&'a self, ctx: &RunContext, selection: &TaskSelection) -> Vec<&'a Arc<dyn Task<P>>> {
        self.task_list()
            .iter()
            .filter(|task| match selection.skip_reason(self.name, task.name()) {
                Some(reason) => {
                    tracing::trace!(
                        stage = %self.name,
                        task = task.name(),
                        height = ctx.height(),
                        ?reason,
                        "task skipped"
                    );
                    false
                }
                None => true,
            })
            .collect()
    }

    /// Run the stage over `payload`. Returns the number of tasks executed.
    pub async fn run(
        &self,
        ctx: &RunContext,
        payload: &mut P,
        selection: &TaskSelection,
        concurrency: usize,
    ) -> Result<usize, IndexerError> {
        let tasks = self.selected(ctx, selection);
        if tasks.is_empty() {
            return Ok(0);
        }
        match &self.tasks {
            StageTasks::Sequential(_) => {
                for task in &tasks {
                    ctx.check()?;
                    let patch = task.run(ctx, &*payload).await?;
                    patch.apply(payload);
                }
            }
            StageTasks::Concurrent(_) => {
                let patches = self
                    .run_concurrent(ctx, &*payload, &tasks, concurrency.max(1))
                    .await?;
                for patch in patches {
                    patch.apply(payload);
                }
            }
        }
        Ok(tasks.len())
    }

    /// Run tasks in parallel against a shared view; the first error wins, the
    /// remaining in-flight tasks finish and their results are dropped. Queued
    /// tasks that have not started yet never start once a task failed.
    async fn run_concurrent(
        &self,
        ctx: &RunContext,
        view: &P,
        tasks: &[&Arc<dyn Task<P>>],
        concurrency: usize,
    ) -> Result<Vec<Patch<P>>, IndexerError> {
        let mut slots: Vec<Option<Patch<P>>> = tasks.iter().map(|_| None).collect();
        let mut first_err: Option<IndexerError> = None;
        let failed = AtomicBool::new(false);
        let failed = &failed;

        let mut results = futures::stream::iter(tasks.iter().enumerate().map(|(i, task)| async move {
            if failed.load(Ordering::SeqCst) {
                return (i, task.name(), None);
            }
            let result = task.run(ctx, view).await;
            if result.is_err() {
                failed.store(true, Ordering::SeqCst);
            }
            (i, task.name(), Some(result))
        }))
        .buffer_unordered(concurrency);

        while let Some((i, name, result)) = results.next().await {
            match result {
                None => {
                    tracing::debug!(stage = %self.name, task = name, "task not started, stage already failed");
                }
                Some(Ok(patch)) => slots[i] = Some(patch),
                Some(Err(e)) if first_err.is_none() => {
                    tracing::error!(
                        stage = %self.name,
                        task = name,
                        height = ctx.height(),
                        error = %e,
                        "task failed, failing stage"
                    );
                    first_err = Some(e);
                }
                Some(Err(e)) => {
                    tracing::debug!(stage = %self.name, task = name, error = %e, "additional task failure discarded");
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(slots.into_iter().flatten().collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct Doc {
        a: Vec<String>,
        b: Vec<String>,
    }

    struct Writer {
        name: &'static str,
        field: &'static [&'static str],
        fail: bool,
    }

    #[async_trait]
    impl Task<Doc> for Writer {
        fn name(&self) -> &'static str {
            self.name
        }

        fn writes(&self) -> &'static [&'static str] {
            self.field
        }

        async fn run(&self, _ctx: &RunContext, doc: &Doc) -> Result<Patch<Doc>, IndexerError> {
            if self.fail {
                return Err(IndexerError::Other(format!("{} broke", self.name)));
            }
            // Sequential tasks see the writes of earlier tasks.
            let seen = doc.a.len() + doc.b.len();
            let name = self.name.to_string();
            let field = self.field[0];
            Ok(Patch::new(move |d: &mut Doc| {
                let entry = format!("{name}@{seen}");
                if field == "a" {
                    d.a.push(entry)
                } else {
                    d.b.push(entry)
                }
            }))
        }
    }

    fn writer(name: &'static str, field: &'static [&'static str], fail: bool) -> Arc<dyn Task<Doc>> {
        Arc::new(Writer { name, field, fail })
    }

    fn ctx() -> RunContext {
        RunContext::new(1, CancellationToken::new())
    }

    #[tokio::test]
    async fn sequential_tasks_observe_prior_writes() {
        let stage = Stage::sequential(
            StageName::Parse,
            vec![writer("first", &["a"], false), writer("second", &["a"], false)],
        );
        let mut doc = Doc::default();
        let ran = stage.run(&ctx(), &mut doc, &TaskSelection::all(), 4).await.unwrap();
        assert_eq!(ran, 2);
        assert_eq!(doc.a, vec!["first@0", "second@1"]);
    }

    #[tokio::test]
    async fn concurrent_tasks_share_one_view() {
        let stage = Stage::concurrent(
            StageName::Sequence,
            vec![writer("x", &["a"], false), writer("y", &["b"], false)],
        )
        .unwrap();
        let mut doc = Doc::default();
        stage.run(&ctx(), &mut doc, &TaskSelection::all(), 4).await.unwrap();
        assert_eq!(doc.a, vec!["x@0"]);
        assert_eq!(doc.b, vec!["y@0"]);
    }

    #[tokio::test]
    async fn concurrent_failure_discards_all_patches() {
        let stage = Stage::concurrent(
            StageName::Sequence,
            vec![writer("ok", &["a"], false), writer("bad", &["b"], true)],
        )
        .unwrap();
        let mut doc = Doc::default();
        let err = stage.run(&ctx(), &mut doc, &TaskSelection::all(), 4).await.unwrap_err();
        assert!(err.to_string().contains("bad broke"));
        assert!(doc.a.is_empty());
        assert!(doc.b.is_empty());
    }

    struct Counted {
        name: &'static str,
        field: &'static [&'static str],
        fail: bool,
        started: Arc<std::sync::atomic::AtomicU32>,
    }

    #[async_trait]
    impl Task<Doc> for Counted {
        fn name(&self) -> &'static str {
            self.name
        }

        fn writes(&self) -> &'static [&'static str] {
            self.field
        }

        async fn run(&self, _ctx: &RunContext, _doc: &Doc) -> Result<Patch<Doc>, IndexerError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(IndexerError::Other("boom".into()));
            }
            Ok(Patch::new(|_: &mut Doc| {}))
        }
    }

    #[tokio::test]
    async fn queued_tasks_do_not_start_after_failure() {
        let started = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let task = |name: &'static str, field: &'static [&'static str], fail: bool| -> Arc<dyn Task<Doc>> {
            Arc::new(Counted {
                name,
                field,
                fail,
                started: started.clone(),
            })
        };
        let stage = Stage::concurrent(
            StageName::Persist,
            vec![
                task("bad", &["a"], true),
                task("late1", &["b"], false),
                task("late2", &["c"], false),
            ],
        )
        .unwrap();
        let mut doc = Doc::default();
        let err = stage.run(&ctx(), &mut doc, &TaskSelection::all(), 1).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert_eq!(started.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn overlapping_write_sets_rejected() {
        let result = Stage::concurrent(
            StageName::Aggregate,
            vec![writer("x", &["a"], false), writer("y", &["a"], false)],
        );
        assert!(matches!(result, Err(IndexerError::Config(_))));
    }

    #[tokio::test]
    async fn dry_run_skips_persist_tasks() {
        let stage = Stage::sequential(StageName::Persist, vec![writer("p", &["a"], false)]);
        let mut doc = Doc::default();
        let ran = stage
            .run(&ctx(), &mut doc, &TaskSelection::all().dry_run(true), 1)
            .await
            .unwrap();
        assert_eq!(ran, 0);
        assert!(doc.a.is_empty());
    }
}
