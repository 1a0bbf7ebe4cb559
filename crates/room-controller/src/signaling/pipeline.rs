//! Ordered middleware pipeline.
//!
//! A [`Pipeline`] holds an ordered set of middlewares sharing one mutable
//! dispatch context. Middlewares that do not recognize a message leave the
//! context untouched and pass it on; a middleware that does recognize it
//! mutates state, records a response, and marks the context handled.
//!
//! The chain is deliberately never short-circuited by `handled`: trailing
//! middlewares (metrics, logging, cross-cutting checks) must observe every
//! message even after an earlier middleware produced a response. Do not
//! "optimize" this into an early return.

use crate::errors::RcError;
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};

/// One element of a pipeline.
///
/// A middleware receives the context and the remainder of the chain; it must
/// call `next.run(ctx)` to continue. All state mutation a middleware performs
/// (broadcasting to peers, mutating room state) must complete before it calls
/// `next`, so cross-middleware ordering stays deterministic.
///
/// Returning an error aborts the chain immediately; the error propagates to
/// the dispatching caller, which rejects the request or drops the
/// notification. There is no partial continuation.
#[async_trait]
pub trait Middleware<C: Send>: Send + Sync {
    async fn handle(&self, ctx: &mut C, next: Next<'_, C>) -> Result<(), RcError>;
}

/// The not-yet-run remainder of a pipeline.
pub struct Next<'a, C> {
    rest: &'a [Arc<dyn Middleware<C>>],
}

impl<C: Send> Next<'_, C> {
    /// Run the rest of the chain to completion.
    ///
    /// # Errors
    ///
    /// Propagates the first middleware error; no later middleware runs.
    pub async fn run(self, ctx: &mut C) -> Result<(), RcError> {
        if let Some((first, rest)) = self.rest.split_first() {
            first.handle(ctx, Next { rest }).await
        } else {
            Ok(())
        }
    }
}

/// An ordered, dynamically extensible chain of middlewares.
pub struct Pipeline<C> {
    middlewares: RwLock<Vec<Arc<dyn Middleware<C>>>>,
}

impl<C: Send> Pipeline<C> {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self {
            middlewares: RwLock::new(Vec::new()),
        }
    }

    /// Append a middleware; it runs after everything registered before it.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware<C>>) {
        self.middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(middleware);
    }

    /// Remove a previously registered middleware (pointer identity).
    ///
    /// Removing a middleware that was never registered is a no-op.
    pub fn remove_middleware(&self, middleware: &Arc<dyn Middleware<C>>) {
        self.middlewares
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|registered| !Arc::ptr_eq(registered, middleware));
    }

    /// Number of registered middlewares.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no middlewares are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every middleware in registration order against `ctx`.
    ///
    /// The chain always runs to completion; `handled` never short-circuits
    /// it. After a non-erroring execution the caller decides what an
    /// unhandled context means (reject the request, drop the notification).
    ///
    /// Middlewares registered while an execution is in flight join the next
    /// execution, not the current one.
    ///
    /// # Errors
    ///
    /// Propagates the first middleware error; execution aborts immediately.
    pub async fn execute(&self, ctx: &mut C) -> Result<(), RcError> {
        let chain: Vec<Arc<dyn Middleware<C>>> = self
            .middlewares
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        Next { rest: &chain }.run(ctx).await
    }
}

impl<C: Send> Default for Pipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}
