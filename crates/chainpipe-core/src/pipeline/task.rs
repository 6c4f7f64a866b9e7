//! The unit of work: a named task over a typed payload.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::types::Height;

/// Run-scoped context handed to every task invocation.
#[derive(Debug, Clone)]
pub struct RunContext {
    height: Height,
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new(height: Height, cancel: CancellationToken) -> Self {
        Self { height, cancel }
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// `Err(Cancelled)` once the run token has been cancelled.
    pub fn check(&self) -> Result<(), IndexerError> {
        if self.cancel.is_cancelled() {
            Err(IndexerError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the run is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A deferred write to the payload, produced by a task and applied by its stage.
///
/// Tasks only see a shared view of the payload while they run; their writes
/// land when the stage applies the returned patch, so tasks of a concurrent
/// stage never race on payload fields.
pub struct Patch<P>(Option<Box<dyn FnOnce(&mut P) + Send>>);

impl<P> Patch<P> {
    /// A patch that writes nothing (persistors, validators).
    pub fn none() -> Self {
        Self(None)
    }

    pub fn new(write: impl FnOnce(&mut P) + Send + 'static) -> Self {
        Self(Some(Box::new(write)))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    pub fn apply(self, payload: &mut P) {
        if let Some(write) = self.0 {
            write(payload);
        }
    }
}

impl<P> std::fmt::Debug for Patch<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_some() { "Patch(write)" } else { "Patch(none)" })
    }
}

/// A named, idempotent-per-invocation unit of work.
#[async_trait]
pub trait Task<P: Send + Sync>: Send + Sync {
    fn name(&self) -> &'static str;

    /// Payload fields this task's patch writes. Tasks sharing a concurrent
    /// stage must declare disjoint sets.
    fn writes(&self) -> &'static [&'static str] {
        &[]
    }

    async fn run(&self, ctx: &RunContext, payload: &P) -> Result<Patch<P>, IndexerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_applies_write() {
        let mut v = vec![1];
        Patch::new(|p: &mut Vec<i32>| p.push(2)).apply(&mut v);
        Patch::<Vec<i32>>::none().apply(&mut v);
        assert_eq!(v, vec![1, 2]);
    }

    #[test]
    fn context_reports_cancellation() {
        let token = CancellationToken::new();
        let ctx = RunContext::new(7, token.clone());
        assert!(ctx.check().is_ok());
        token.cancel();
        assert!(ctx.is_cancelled());
        assert!(matches!(ctx.check(), Err(IndexerError::Cancelled)));
    }
}
