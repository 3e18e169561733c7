//! Per-call state threaded through node and replica-set operations.
//!
//! A logical call chain (one request from the caller's point of view) owns a
//! [`CallContext`] and passes it by `&mut` to every operation. Independent
//! call chains never share one, so their pipelines and guards cannot
//! interfere.

use crate::error::ClientError;
use docwire_protocol::{Operation, Reply};
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;

/// A boxed, sendable future borrowing from `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs on the reply of a flushed operation (`None` for operations the
/// server does not answer). Its result becomes the operation's result.
pub type ReplyCallback =
    Box<dyn FnOnce(Option<Reply>) -> Result<Option<Reply>, ClientError> + Send>;

/// An operation waiting for its pipeline to flush.
pub struct QueuedOperation {
    pub operation: Operation,
    pub callback: Option<ReplyCallback>,
}

impl fmt::Debug for QueuedOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedOperation")
            .field("operation", &self.operation)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Call-scoped flags and the pipeline queue.
#[derive(Debug, Default)]
pub struct CallContext {
    pub(crate) pipeline_depth: usize,
    pub(crate) queue: Vec<QueuedOperation>,
    pub(crate) ensure_primary: bool,
    pub(crate) ensure_connected: bool,
}

impl CallContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether operations are currently being queued.
    pub fn in_pipeline(&self) -> bool {
        self.pipeline_depth > 0
    }

    /// Returns whether a refresh must fail if the node lost its primary role.
    pub fn is_ensuring_primary(&self) -> bool {
        self.ensure_primary
    }

    /// Returns whether the caller already runs inside the reconnect wrapper.
    pub fn is_ensuring_connected(&self) -> bool {
        self.ensure_connected
    }

    /// Number of operations waiting for the outermost pipeline to end.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

/// A temporary change to a [`CallContext`], undone on drop.
///
/// The scope lives inside the future that made the change, so the context is
/// restored even when that future is dropped before completing.
pub(crate) struct ContextScope<'c> {
    ctx: &'c mut CallContext,
    kind: ScopeKind,
}

enum ScopeKind {
    Pipeline,
    EnsurePrimary { previous: bool },
    EnsureConnected,
}

impl<'c> ContextScope<'c> {
    /// Opens one pipeline level.
    pub(crate) fn pipeline(ctx: &'c mut CallContext) -> Self {
        ctx.pipeline_depth += 1;
        Self {
            ctx,
            kind: ScopeKind::Pipeline,
        }
    }

    pub(crate) fn ensure_primary(ctx: &'c mut CallContext) -> Self {
        let previous = std::mem::replace(&mut ctx.ensure_primary, true);
        Self {
            ctx,
            kind: ScopeKind::EnsurePrimary { previous },
        }
    }

    pub(crate) fn ensure_connected(ctx: &'c mut CallContext) -> Self {
        ctx.ensure_connected = true;
        Self {
            ctx,
            kind: ScopeKind::EnsureConnected,
        }
    }

    /// Returns whether this is the only open pipeline level.
    pub(crate) fn is_outermost_pipeline(&self) -> bool {
        self.ctx.pipeline_depth == 1
    }
}

impl Deref for ContextScope<'_> {
    type Target = CallContext;

    fn deref(&self) -> &CallContext {
        self.ctx
    }
}

impl DerefMut for ContextScope<'_> {
    fn deref_mut(&mut self) -> &mut CallContext {
        self.ctx
    }
}

impl Drop for ContextScope<'_> {
    fn drop(&mut self) {
        match self.kind {
            ScopeKind::Pipeline => {
                self.ctx.pipeline_depth -= 1;
                // Whatever the outermost level did not take is never sent.
                if self.ctx.pipeline_depth == 0 && !self.ctx.queue.is_empty() {
                    tracing::debug!(
                        "Dropping {} operations queued by an unfinished pipeline",
                        self.ctx.queue.len()
                    );
                    self.ctx.queue.clear();
                }
            }
            ScopeKind::EnsurePrimary { previous } => self.ctx.ensure_primary = previous,
            ScopeKind::EnsureConnected => self.ctx.ensure_connected = false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docwire_bson::doc;

    #[test]
    fn test_new_context_is_idle() {
        let ctx = CallContext::new();
        assert!(!ctx.in_pipeline());
        assert!(!ctx.is_ensuring_primary());
        assert!(!ctx.is_ensuring_connected());
        assert_eq!(ctx.queued(), 0);
    }

    fn queued_ping() -> QueuedOperation {
        QueuedOperation {
            operation: Operation::command("admin", doc! { "ping" => 1 }),
            callback: None,
        }
    }

    #[test]
    fn test_pipeline_scope_restores_depth() {
        let mut ctx = CallContext::new();
        {
            let mut outer = ContextScope::pipeline(&mut ctx);
            assert!(outer.is_outermost_pipeline());
            {
                let inner = ContextScope::pipeline(&mut outer);
                assert!(!inner.is_outermost_pipeline());
                assert!(inner.in_pipeline());
            }
            assert!(outer.is_outermost_pipeline());
        }
        assert!(!ctx.in_pipeline());
    }

    #[test]
    fn test_dropped_pipeline_scope_discards_queue() {
        let mut ctx = CallContext::new();
        {
            let mut outer = ContextScope::pipeline(&mut ctx);
            outer.queue.push(queued_ping());
            {
                let mut inner = ContextScope::pipeline(&mut outer);
                inner.queue.push(queued_ping());
            }
            // An inner level closing leaves the queue to the outer one.
            assert_eq!(outer.queued(), 2);
        }
        assert_eq!(ctx.queued(), 0);
        assert!(!ctx.in_pipeline());
    }

    #[test]
    fn test_guard_scopes_restore_flags() {
        let mut ctx = CallContext::new();
        {
            let mut primary = ContextScope::ensure_primary(&mut ctx);
            assert!(primary.is_ensuring_primary());
            {
                let nested = ContextScope::ensure_primary(&mut primary);
                assert!(nested.is_ensuring_primary());
            }
            assert!(primary.is_ensuring_primary());

            let connected = ContextScope::ensure_connected(&mut primary);
            assert!(connected.is_ensuring_connected());
        }
        assert!(!ctx.is_ensuring_primary());
        assert!(!ctx.is_ensuring_connected());
    }

    #[test]
    fn test_queued_operation_debug() {
        let queued = QueuedOperation {
            operation: Operation::command("admin", doc! { "ping" => 1 }),
            callback: Some(Box::new(|reply: Option<Reply>| Ok(reply))),
        };
        let rendered = format!("{queued:?}");
        assert!(rendered.contains("callback: true"));
    }
}
