use fileferry::client::Client;
use fileferry::{Config, Server};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

static NEXT: AtomicUsize = AtomicUsize::new(0);

pub const GREETING: &str = "fileferry ready";

/// Directory under the system temp dir, removed on drop.
pub struct TempDir {
    path: PathBuf,
}

impl TempDir {
    pub fn new(label: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "fileferry-it-{}-{}-{}",
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

pub fn config(root: &Path) -> Config {
    let mut config = Config::new("127.0.0.1", 0, 8, Duration::from_secs(60));
    config.root = root.to_path_buf();
    config.greeting = Some(GREETING.to_string());
    config
}

pub fn start(config: &Config) -> SocketAddr {
    Server::spawn(config).expect("server should start")
}

/// Connect and consume the greeting.
pub fn connect(addr: SocketAddr) -> Client {
    let mut client = Client::connect(addr).unwrap();
    client.set_timeout(Some(Duration::from_secs(10))).unwrap();
    let greeting = client.recv().unwrap();
    assert_eq!(greeting.as_text(), Some(GREETING));
    client
}

/// Deterministic non-trivial file contents.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
