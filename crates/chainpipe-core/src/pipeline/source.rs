//! Height sources and payload sinks.

use async_trait::async_trait;

use super::task::RunContext;
use crate::error::IndexerError;
use crate::types::Height;

/// Bounded iterator over the heights a run processes, in non-decreasing order.
pub trait Source: Send {
    /// Advance to the next height; `None` when exhausted or failed.
    fn next_height(&mut self) -> Option<Height>;

    /// Height most recently yielded.
    fn current(&self) -> Option<Height>;

    fn start_height(&self) -> Height;

    fn end_height(&self) -> Height;

    /// Number of heights this source covers.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Terminal error that stopped iteration early, if any.
    fn err(&self) -> Option<&IndexerError>;
}

/// Contiguous `[start, end]` iteration; the building block of concrete sources.
#[derive(Debug, Clone)]
pub struct HeightRange {
    start: Height,
    end: Height,
    current: Option<Height>,
}

impl HeightRange {
    /// Fails with `NothingToProcess` when `start > end`.
    pub fn new(start: Height, end: Height) -> Result<Self, IndexerError> {
        if start > end {
            return Err(IndexerError::NothingToProcess(format!(
                "start height {start} is past end height {end}"
            )));
        }
        Ok(Self {
            start,
            end,
            current: None,
        })
    }
}

impl Source for HeightRange {
    fn next_height(&mut self) -> Option<Height> {
        let next = match self.current {
            None => self.start,
            Some(h) if h < self.end => h + 1,
            Some(_) => return None,
        };
        self.current = Some(next);
        Some(next)
    }

    fn current(&self) -> Option<Height> {
        self.current
    }

    fn start_height(&self) -> Height {
        self.start
    }

    fn end_height(&self) -> Height {
        self.end
    }

    fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    fn err(&self) -> Option<&IndexerError> {
        None
    }
}

/// Terminal consumer of a fully processed payload.
#[async_trait]
pub trait Sink<P: Send>: Send {
    async fn consume(&mut self, ctx: &RunContext, payload: P) -> Result<(), IndexerError>;

    /// Heights committed so far.
    fn success_count(&self) -> u64;
}
