//! Ordered registry of deferred cleanup and read-back actions.
//!
//! A [`Scope`] collects zero-argument actions and runs them exactly once, in
//! registration order, when it is closed. Statement-scopes live for a single
//! statement call; the connection-scope lives for the whole transaction and
//! owns resources (large-object handles) that must survive per-statement
//! cleanup.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;

use crate::error::SqlTransactError;

type Action = Box<dyn FnOnce() -> Result<(), SqlTransactError>>;

struct ScopeInner {
    actions: Vec<Action>,
    closed: bool,
}

/// Ordered registry of deferred actions, run once on close.
///
/// `Scope` is a cheap cloneable handle; clones share the same registry, which
/// lets a long-lived owner (the connection) and short-lived collaborators
/// (row streams, parameter binds) register against the same lifetime.
#[derive(Clone)]
pub struct Scope {
    inner: Rc<RefCell<ScopeInner>>,
}

impl Scope {
    /// Fresh, open scope with no registered actions.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(ScopeInner {
                actions: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Append an action to run when this scope closes.
    ///
    /// If the scope has already closed, the action runs immediately: dropping
    /// a cleanup on the floor is worse than running it late.
    pub fn defer(&self, action: impl FnOnce() -> Result<(), SqlTransactError> + 'static) {
        {
            let mut inner = self.inner.borrow_mut();
            if !inner.closed {
                inner.actions.push(Box::new(action));
                return;
            }
        }
        // Borrow released: the action itself may touch this scope.
        warn!("action deferred on a closed scope; running it immediately");
        if let Err(e) = action() {
            warn!(error = %e, "late-deferred action failed");
        }
    }

    /// Hand a resource to this scope and get back a shared cell that stays
    /// usable until the scope closes.
    ///
    /// The closer runs when the scope closes, unless the resource was taken
    /// out of the cell first.
    pub fn manage<R: 'static>(
        &self,
        resource: R,
        closer: impl FnOnce(&mut R) -> Result<(), SqlTransactError> + 'static,
    ) -> Rc<RefCell<Option<R>>> {
        let cell = Rc::new(RefCell::new(Some(resource)));
        let registered = Rc::clone(&cell);
        self.defer(move || {
            if let Some(mut r) = registered.borrow_mut().take() {
                closer(&mut r)?;
            }
            Ok(())
        });
        cell
    }

    /// Run every registered action exactly once, in registration order.
    ///
    /// A failing action never prevents later actions from running; the first
    /// failure is reported after all actions have fired. Calling `close`
    /// again is a no-op.
    pub fn close(&self) -> Result<(), SqlTransactError> {
        let actions = {
            let mut inner = self.inner.borrow_mut();
            if inner.closed {
                return Ok(());
            }
            inner.closed = true;
            std::mem::take(&mut inner.actions)
        };

        let mut first_failure = None;
        for action in actions {
            if let Err(e) = action() {
                if first_failure.is_none() {
                    first_failure = Some(e);
                } else {
                    warn!(error = %e, "additional scope action failed during close");
                }
            }
        }
        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Whether `close` has already run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Scope")
            .field("pending_actions", &inner.actions.len())
            .field("closed", &inner.closed)
            .finish()
    }
}
