//! Middleware pipeline.
//!
//! Payloads pass through an ordered list of success stages before they are
//! delivered. When a stage fails, the remaining success stages are skipped and
//! the error stages run instead.
//!
//! Two rules are easy to miss:
//!
//! - An error returned by an error stage is logged and ignored; the next
//!   error stage still runs.
//! - With no error stages registered, a failure is dropped and the payload
//!   is delivered as it entered the pipeline.

use crate::connection::Connection;
use crate::error::MiddlewareError;
use evsock_protocol::Payload;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

/// Result of a single stage.
pub type StageResult = Result<(), MiddlewareError>;

/// A success stage. May rewrite the payload in place.
pub trait Middleware: Send + Sync {
    fn call(&self, connection: &Connection, payload: &mut Payload) -> StageResult;
}

impl<F> Middleware for F
where
    F: Fn(&Connection, &mut Payload) -> StageResult + Send + Sync,
{
    fn call(&self, connection: &Connection, payload: &mut Payload) -> StageResult {
        self(connection, payload)
    }
}

/// An error-recovery stage.
pub trait ErrorMiddleware: Send + Sync {
    fn call(
        &self,
        error: &MiddlewareError,
        connection: &Connection,
        payload: &mut Payload,
    ) -> StageResult;
}

impl<F> ErrorMiddleware for F
where
    F: Fn(&MiddlewareError, &Connection, &mut Payload) -> StageResult + Send + Sync,
{
    fn call(
        &self,
        error: &MiddlewareError,
        connection: &Connection,
        payload: &mut Payload,
    ) -> StageResult {
        self(error, connection, payload)
    }
}

/// A payload that failed the success stages and went through error recovery.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFailure {
    /// Error raised by the failing success stage.
    pub error: MiddlewareError,
    /// Payload after the error stages ran.
    pub payload: Payload,
}

/// Ordered success and error stage lists.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Vec<Arc<dyn Middleware>>,
    error_stages: Vec<Arc<dyn ErrorMiddleware>>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a success stage.
    pub fn push(&mut self, stage: impl Middleware + 'static) {
        self.stages.push(Arc::new(stage));
    }

    /// Append an error stage.
    pub fn push_error(&mut self, stage: impl ErrorMiddleware + 'static) {
        self.error_stages.push(Arc::new(stage));
    }

    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn error_stage_count(&self) -> usize {
        self.error_stages.len()
    }

    /// Run `payload` through the pipeline for `connection`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineFailure`] when a success stage fails and at least
    /// one error stage is registered.
    pub fn run(
        &self,
        connection: &Connection,
        mut payload: Payload,
    ) -> Result<Payload, PipelineFailure> {
        if self.stages.is_empty() {
            return Ok(payload);
        }

        let original = self.error_stages.is_empty().then(|| payload.clone());

        let error = match self.run_stages(connection, &mut payload) {
            Ok(()) => return Ok(payload),
            Err(error) => error,
        };

        let Some(original) = original else {
            for stage in &self.error_stages {
                if let Err(e) = stage.call(&error, connection, &mut payload) {
                    debug!(connection = %connection.id(), error = %e, "Error stage failed, continuing");
                }
            }
            return Err(PipelineFailure { error, payload });
        };

        debug!(
            connection = %connection.id(),
            error = %error,
            "Middleware failed with no error stages, delivering original payload"
        );
        Ok(original)
    }

    fn run_stages(&self, connection: &Connection, payload: &mut Payload) -> StageResult {
        for (index, stage) in self.stages.iter().enumerate() {
            if let Err(e) = stage.call(connection, payload) {
                trace!(connection = %connection.id(), stage = index, error = %e, "Stage failed");
                return Err(e);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stages.len())
            .field("error_stages", &self.error_stages.len())
            .finish()
    }
}
