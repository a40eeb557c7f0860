//! Built-in command handlers.

use super::{CommandHandler, DirectoryLister, FileStore, PendingUpload, Reply};
use crate::protocol::Request;
use crate::runtime::Channel;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

pub const INVALID_ARGS: &str = "invalid command args";
pub const INVALID_NAME: &str = "invalid file name";
pub const FILE_NOT_EXISTS: &str = "file not exists";
pub const IO_ERROR: &str = "I/O error";

/// `list`
pub struct ListHandler {
    root: PathBuf,
    lister: Arc<dyn DirectoryLister>,
}

impl ListHandler {
    pub fn new(root: PathBuf, lister: Arc<dyn DirectoryLister>) -> Self {
        Self { root, lister }
    }
}

impl CommandHandler for ListHandler {
    fn handle(&self, _request: &Request<'_>) -> Reply {
        match self.lister.list(&self.root) {
            Ok(listing) => Reply::Text(listing),
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Listing failed");
                Reply::Text(IO_ERROR.to_string())
            }
        }
    }
}

/// `get <name>`
pub struct GetHandler {
    store: Arc<dyn FileStore>,
}

impl GetHandler {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }
}

impl CommandHandler for GetHandler {
    fn handle(&self, request: &Request<'_>) -> Reply {
        let Some(name) = request.arg(0) else {
            return Reply::Text(INVALID_ARGS.to_string());
        };

        match self.store.open_for_read(name) {
            Ok(file) => {
                debug!(name, "Sending file");
                Reply::Send(Channel::file(file))
            }
            Err(e) => Reply::Text(error_reply(name, &e).to_string()),
        }
    }
}

/// `put <name>`
pub struct PutHandler {
    store: Arc<dyn FileStore>,
}

impl PutHandler {
    pub fn new(store: Arc<dyn FileStore>) -> Self {
        Self { store }
    }
}

impl CommandHandler for PutHandler {
    fn handle(&self, request: &Request<'_>) -> Reply {
        let Some(name) = request.arg(0) else {
            return Reply::Text(INVALID_ARGS.to_string());
        };

        match self.store.open_for_write(name) {
            Ok(file) => {
                debug!(name, "Awaiting upload");
                Reply::Receive(PendingUpload {
                    name: name.to_string(),
                    file,
                })
            }
            Err(e) => Reply::Text(error_reply(name, &e).to_string()),
        }
    }
}

fn error_reply(name: &str, e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::InvalidInput => INVALID_NAME,
        io::ErrorKind::NotFound => FILE_NOT_EXISTS,
        _ => {
            warn!(name, error = %e, "File access failed");
            IO_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{Dispatcher, FsLister, FsStore};
    use crate::protocol::MessageType;
    use crate::testutil::TempDir;
    use std::fs;
    use std::io::Read;

    fn text(reply: Reply) -> String {
        match reply {
            Reply::Text(text) => text,
            other => panic!("expected text reply, got {:?}", other),
        }
    }

    #[test]
    fn test_list_handler() {
        let dir = TempDir::new("handler-list");
        fs::write(dir.path().join("one"), b"1").unwrap();
        fs::write(dir.path().join("two"), b"2").unwrap();

        let handler = ListHandler::new(dir.path().to_path_buf(), Arc::new(FsLister));
        let request = crate::protocol::command::parse("list").unwrap();
        assert_eq!(text(handler.handle(&request)), "one\ntwo");
    }

    #[test]
    fn test_list_missing_root() {
        let handler = ListHandler::new(PathBuf::from("/definitely/not/here"), Arc::new(FsLister));
        let request = crate::protocol::command::parse("list").unwrap();
        assert_eq!(text(handler.handle(&request)), IO_ERROR);
    }

    #[test]
    fn test_get_existing_file() {
        let dir = TempDir::new("handler-get");
        fs::write(dir.path().join("report.bin"), b"\x00\x01\x02").unwrap();
        let dispatcher = Dispatcher::with_defaults(dir.path());

        match dispatcher.dispatch("get report.bin") {
            Reply::Send(mut channel) => {
                assert_eq!(channel.kind(), MessageType::Binary);
                assert_eq!(channel.size().unwrap(), 3);
                let mut contents = Vec::new();
                channel.read_to_end(&mut contents).unwrap();
                assert_eq!(contents, b"\x00\x01\x02");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_get_errors() {
        let dir = TempDir::new("handler-get-errors");
        let dispatcher = Dispatcher::with_defaults(dir.path());

        assert_eq!(text(dispatcher.dispatch("get")), INVALID_ARGS);
        assert_eq!(text(dispatcher.dispatch("get nope.bin")), FILE_NOT_EXISTS);
        assert_eq!(text(dispatcher.dispatch("get ../secret")), INVALID_NAME);
    }

    #[test]
    fn test_put_arms_upload() {
        let dir = TempDir::new("handler-put");
        let store = Arc::new(FsStore::new(dir.path()));
        let handler = PutHandler::new(store);

        let request = crate::protocol::command::parse("put new.bin").unwrap();
        match handler.handle(&request) {
            Reply::Receive(upload) => assert_eq!(upload.name, "new.bin"),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(dir.path().join("new.bin").exists());

        let request = crate::protocol::command::parse("put").unwrap();
        assert_eq!(text(handler.handle(&request)), INVALID_ARGS);
    }
}
