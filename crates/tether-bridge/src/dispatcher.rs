//! Command dispatch: mapping an inbound command id to a handler.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tether_transport::BoxFuture;

/// Boxed error returned by command handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a command produced no output.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown command {0}")]
    UnknownCommand(u32),
    #[error("handler failed")]
    Handler(#[source] BoxError),
}

impl DispatchError {
    /// Handler failure carrying a plain message.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into().into())
    }
}

/// Runs the business logic behind each command.
///
/// Implementations must be safe to call concurrently; every inbound request
/// is dispatched on its own task.
pub trait CommandDispatcher: Send + Sync + 'static {
    fn dispatch(&self, cmd: u32, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, DispatchError>>;
}

/// A single command handler.
pub trait CommandHandler: Send + Sync + 'static {
    fn handle(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, DispatchError>>;
}

impl<F, Fut> CommandHandler for F
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, DispatchError>> + Send + 'static,
{
    fn handle(&self, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, DispatchError>> {
        Box::pin((self)(payload))
    }
}

/// Table-driven [`CommandDispatcher`].
#[derive(Clone, Default)]
pub struct CommandRouter {
    handlers: HashMap<u32, Arc<dyn CommandHandler>>,
}

impl CommandRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, cmd: u32, handler: impl CommandHandler) -> Self {
        self.add(cmd, handler);
        self
    }

    pub fn add(&mut self, cmd: u32, handler: impl CommandHandler) {
        self.handlers.insert(cmd, Arc::new(handler));
    }

    pub fn has(&self, cmd: u32) -> bool {
        self.handlers.contains_key(&cmd)
    }
}

impl CommandDispatcher for CommandRouter {
    fn dispatch(&self, cmd: u32, payload: Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, DispatchError>> {
        match self.handlers.get(&cmd) {
            Some(handler) => handler.handle(payload),
            None => Box::pin(async move { Err(DispatchError::UnknownCommand(cmd)) }),
        }
    }
}

impl fmt::Debug for CommandRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cmds: Vec<_> = self.handlers.keys().collect();
        cmds.sort();
        f.debug_struct("CommandRouter").field("commands", &cmds).finish()
    }
}
