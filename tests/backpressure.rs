//! Kept in its own test binary: it counts this process's open file
//! descriptors, which tests running in parallel would disturb.

mod common;

use common::{config, connect, pattern, start, TempDir};
use fileferry::runtime::connection::MAX_QUEUED_REPLIES;
use std::fs;
use std::thread;
use std::time::Duration;

fn open_fds() -> Option<usize> {
    fs::read_dir("/proc/self/fd").ok().map(|dir| dir.count())
}

#[test]
fn test_non_reading_client_cannot_pin_open_files() {
    const REQUESTS: usize = 200;

    let root = TempDir::new("backlog");
    let body = pattern(256 * 1024);
    fs::write(root.path().join("big.bin"), &body).unwrap();
    let addr = start(&config(root.path()));
    let mut client = connect(addr);

    let Some(before) = open_fds() else {
        return;
    };
    for _ in 0..REQUESTS {
        client.send_text("get big.bin").unwrap();
    }
    thread::sleep(Duration::from_millis(500));

    let after = open_fds().unwrap();
    assert!(
        after <= before + MAX_QUEUED_REPLIES + 2,
        "server holds {} extra fds for one client that does not read",
        after.saturating_sub(before)
    );

    // Once the client reads, every request is answered.
    for _ in 0..REQUESTS {
        let reply = client.recv().unwrap();
        assert_eq!(reply.payload.len(), body.len());
    }
    assert_eq!(client.list().unwrap(), vec!["big.bin".to_string()]);
}
