//! Deferred command stream into the context thread.
//!
//! Only the context thread may call the driver. Other threads describe the
//! work as closures and push them through a [`CommandSender`]; the context
//! runs them in submission order at [`RhiContext::execute_pending`].

use std::sync::mpsc::Sender;

use crate::context::RhiContext;
use crate::error::{RhiError, RhiResult};

/// Work executed on the context thread with full access to the context.
pub type Command = Box<dyn FnOnce(&mut RhiContext) + Send>;

/// Producer handle of a context's command queue.
///
/// Clone one per producer thread. Commands from a single sender run in the
/// order they were enqueued.
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<Command>,
}

impl CommandSender {
    pub(crate) fn new(sender: Sender<Command>) -> Self {
        Self { sender }
    }

    /// Queue a closure for the context thread.
    ///
    /// Fails with [`RhiError::ContextLost`] once the context has been dropped.
    pub fn enqueue<F>(&self, command: F) -> RhiResult<()>
    where
        F: FnOnce(&mut RhiContext) + Send + 'static,
    {
        self.sender
            .send(Box::new(command))
            .map_err(|_| RhiError::ContextLost)
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender").finish_non_exhaustive()
    }
}
