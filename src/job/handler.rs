//! Probe handlers
//!
//! A handler decides whether an index holds something. Returning `Ok(())`
//! accepts the index; [`ProbeError::Skip`] rejects it; [`ProbeError::Stop`]
//! aborts the owning job; [`ProbeError::Failed`] is logged and counted as a
//! rejection. Handlers are shared by every job of a fetcher and run on the
//! job threads, so they must be `Send + Sync`.

use std::fmt;
use std::sync::Arc;

use crate::error::ProbeError;

/// Decides whether an index is present
pub trait ProbeHandler: Send + Sync {
    fn probe(&self, index: i64) -> Result<(), ProbeError>;
}

impl<F> ProbeHandler for F
where
    F: Fn(i64) -> Result<(), ProbeError> + Send + Sync,
{
    fn probe(&self, index: i64) -> Result<(), ProbeError> {
        self(index)
    }
}

/// Ordered set of handlers; cloning shares the same handler objects
#[derive(Clone, Default)]
pub struct Handlers {
    handlers: Vec<Arc<dyn ProbeHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<H>(&mut self, handler: H)
    where
        H: ProbeHandler + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn push_shared(&mut self, handler: Arc<dyn ProbeHandler>) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run every handler once, in order; the first non-accept result wins
    ///
    /// With no handlers registered every index is accepted.
    pub fn dispatch(&self, index: i64) -> Result<(), ProbeError> {
        for handler in &self.handlers {
            handler.probe(index)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers").field("count", &self.handlers.len()).finish()
    }
}
