//! Command dispatch.
//!
//! A fully received TEXT payload is tokenized and routed to the handler
//! registered for its verb. A handler either answers with a TEXT reply or
//! switches the connection into file mode:
//!
//! - `list`: newline-separated names in the data root
//! - `get <name>`: stream the file back as a BINARY message
//! - `put <name>`: store the next inbound BINARY message as `<name>`

pub mod handlers;
pub mod store;

pub use handlers::{GetHandler, ListHandler, PutHandler};
pub use store::{DirectoryLister, FileStore, FsLister, FsStore};

use crate::protocol::command::{self, Request};
use crate::runtime::Channel;
use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Reply to an unrecognized verb.
pub const UNKNOWN_COMMAND: &str = "unknown command";

/// A file opened by `put`, waiting for the BINARY message that fills it.
#[derive(Debug)]
pub struct PendingUpload {
    pub name: String,
    pub file: File,
}

/// Outcome of handling one command.
#[derive(Debug)]
pub enum Reply {
    /// Nothing to send.
    None,
    /// TEXT reply.
    Text(String),
    /// Queue a channel for transmission (a file turns into a BINARY message).
    Send(Channel),
    /// Route the next inbound BINARY message into a file.
    Receive(PendingUpload),
}

/// Handles a single verb.
pub trait CommandHandler: Send + Sync {
    fn handle(&self, request: &Request<'_>) -> Reply;
}

/// Verb-keyed handler registry.
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<String, Box<dyn CommandHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher with `list`, `get` and `put` serving files under `root`.
    /// `set` is accepted as another name for `put`.
    pub fn with_defaults(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let store: Arc<dyn FileStore> = Arc::new(FsStore::new(root.clone()));

        let mut dispatcher = Self::new();
        dispatcher.register("list", ListHandler::new(root, Arc::new(FsLister)));
        dispatcher.register("get", GetHandler::new(Arc::clone(&store)));
        dispatcher.register("put", PutHandler::new(Arc::clone(&store)));
        dispatcher.register("set", PutHandler::new(store));
        dispatcher
    }

    /// Install a handler, replacing any previous one for the verb.
    pub fn register(&mut self, verb: &str, handler: impl CommandHandler + 'static) {
        self.handlers
            .insert(verb.to_ascii_lowercase(), Box::new(handler));
    }

    pub fn dispatch(&self, text: &str) -> Reply {
        let Some(request) = command::parse(text) else {
            return Reply::None;
        };
        trace!(verb = %request.verb, args = request.args.len(), "Dispatching command");

        match self.handlers.get(&request.verb) {
            Some(handler) => handler.handle(&request),
            None => Reply::Text(UNKNOWN_COMMAND.to_string()),
        }
    }
}
