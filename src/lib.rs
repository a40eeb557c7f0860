//! fileferry: a reactor-based file transfer server
//!
//! Clients exchange length-prefixed TEXT and BINARY messages over TCP:
//! - `list` returns the names in the data root
//! - `get <name>` streams a file back
//! - `put <name>` stores the next BINARY message as a file
//!
//! One reactor thread multiplexes every socket, a bounded worker pool does
//! the blocking I/O, and a reaper closes idle connections.

pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod runtime;

pub use config::Config;
pub use runtime::Server;

#[cfg(test)]
pub(crate) mod testutil {
    use std::net::{SocketAddr, TcpListener, TcpStream};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT: AtomicUsize = AtomicUsize::new(0);

    /// Directory under the system temp dir, removed on drop.
    pub struct TempDir {
        path: PathBuf,
    }

    impl TempDir {
        pub fn new(label: &str) -> Self {
            let path = std::env::temp_dir().join(format!(
                "fileferry-{}-{}-{}",
                label,
                std::process::id(),
                NEXT.fetch_add(1, Ordering::Relaxed)
            ));
            std::fs::create_dir_all(&path).unwrap();
            Self { path }
        }

        pub fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDir {
        fn drop(&mut self) {
            let _ = std::fs::remove_dir_all(&self.path);
        }
    }

    /// A connected pair: non-blocking server side, blocking client side.
    pub fn socket_pair() -> (mio::net::TcpStream, SocketAddr, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, peer) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (mio::net::TcpStream::from_std(server), peer, client)
    }
}
