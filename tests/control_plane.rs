//! End-to-end control plane tests: a real node behind framed sockets.

use std::collections::BTreeMap;
use std::os::unix::net::UnixStream;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use stokehold::auth::AllowAll;
use stokehold::config::Config;
use stokehold::context::Context;
use stokehold::daemon::server::{handle_client, run_state_loop, Node, SignalFlags};
use stokehold::engine::BasicEngineFactory;
use stokehold::logging::TracingSink;
use stokehold::protocol::{FrameReader, FrameWriter};
use stokehold::storage::{MemoryStorage, Storage, StorageError};

/// Cloneable view of one memory backend, so tests can mutate the catalog
/// behind the node's back.
#[derive(Clone, Debug)]
struct SharedStorage(Arc<MemoryStorage>);

impl Storage for SharedStorage {
    fn get(&self, collection: &str, key: &str) -> Result<Value, StorageError> {
        self.0.get(collection, key)
    }

    fn put(&self, collection: &str, key: &str, value: &Value) -> Result<(), StorageError> {
        self.0.put(collection, key, value)
    }

    fn remove(&self, collection: &str, key: &str) -> Result<(), StorageError> {
        self.0.remove(collection, key)
    }

    fn all(&self, collection: &str) -> Result<BTreeMap<String, Value>, StorageError> {
        self.0.all(collection)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    node: Node,
    storage: SharedStorage,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::default();
    config.paths.runtime = dir.path().to_path_buf();
    config.network.hostname = "itest".into();

    let context =
        Arc::new(Context::with_logger(config, Arc::new(TracingSink::new())).expect("context"));
    let storage = SharedStorage(Arc::new(MemoryStorage::new()));
    let node = Node::new(
        context,
        Box::new(storage.clone()),
        Box::new(BasicEngineFactory),
        Box::new(AllowAll),
    );
    Fixture {
        _dir: dir,
        node,
        storage,
    }
}

#[test]
fn startup_recovery_and_reload_converge_on_storage() {
    let mut fx = fixture();
    fx.storage.put("apps", "a", &json!({"slave": "py"})).unwrap();
    fx.storage.put("apps", "b", &json!({"slave": "js"})).unwrap();

    fx.node.recover().expect("startup recovery");
    let info = fx.node.info();
    let apps = info["apps"].as_object().unwrap();
    assert_eq!(apps.len(), 2);
    assert_eq!(apps["a"]["state"], "running");
    assert_eq!(apps["b"]["state"], "running");

    // External change: c appears, a disappears. The reload path converges.
    fx.storage.put("apps", "c", &json!({})).unwrap();
    fx.storage.remove("apps", "a").unwrap();
    fx.node.reload();

    let info = fx.node.info();
    let apps = info["apps"].as_object().unwrap();
    let names: Vec<&str> = apps.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["b", "c"]);
}

#[test]
fn create_then_delete_is_a_noop_on_storage() {
    let mut fx = fixture();

    let reply = fx.node.handle_control(
        br#"{"version":2,"action":"create","apps":{"echo":{"slave":"py"}}}"#,
        None,
    );
    assert_eq!(reply["echo"]["state"], "running");
    assert_eq!(fx.storage.all("apps").unwrap().len(), 1);

    let reply = fx
        .node
        .handle_control(br#"{"version":2,"action":"delete","apps":["echo"]}"#, None);
    assert_eq!(reply["echo"]["state"], "stopped");
    assert!(fx.storage.all("apps").unwrap().is_empty());
    assert_eq!(fx.node.info()["apps"], json!({}));
}

#[test]
fn framed_socket_roundtrip() {
    let fx = fixture();

    let (req_tx, req_rx) = crossbeam::channel::unbounded();
    let flags = SignalFlags::default();
    let loop_flags = flags.clone();
    let state = std::thread::spawn(move || run_state_loop(fx.node, req_rx, None, loop_flags));

    let (client, server) = UnixStream::pair().expect("socket pair");
    let handler = std::thread::spawn(move || handle_client(server, req_tx));

    let mut writer = FrameWriter::new(client.try_clone().expect("clone stream"));
    let mut reader = FrameReader::new(client);

    // One reply frame per request, on the same socket.
    writer
        .write_frame(br#"{"version":2,"username":"","action":"info"}"#)
        .expect("send info");
    let reply: Value =
        serde_json::from_slice(&reader.read_frame().unwrap().expect("reply frame")).unwrap();
    assert_eq!(reply["apps"], json!({}));
    assert!(reply["route"].as_str().unwrap().starts_with("itest/"));
    assert!(reply["uptime"].as_u64().is_some());

    // Version 3 requests carry a signature frame; a missing username is
    // refused before the authenticator runs.
    writer
        .write_frame(br#"{"version":3,"action":"create","apps":{"echo":{}}}"#)
        .expect("send create");
    writer.write_frame(b"detached-signature").expect("send signature");
    let reply: Value =
        serde_json::from_slice(&reader.read_frame().unwrap().expect("reply frame")).unwrap();
    assert_eq!(reply["error"], "username expected");

    drop(writer);
    drop(reader);
    handler.join().expect("handler exits on disconnect");

    flags.shutdown.store(true, Ordering::Relaxed);
    state.join().expect("state loop exits");
}

#[test]
fn state_loop_drains_queued_requests_before_idling() {
    let fx = fixture();

    let (req_tx, req_rx) = crossbeam::channel::unbounded();
    let flags = SignalFlags::default();
    let loop_flags = flags.clone();
    let state = std::thread::spawn(move || run_state_loop(fx.node, req_rx, None, loop_flags));

    let mut pending = Vec::new();
    for i in 0..8 {
        let (respond_tx, respond_rx) = crossbeam::channel::bounded(1);
        let body = format!(
            r#"{{"version":2,"action":"create","apps":{{"app-{i}":{{}}}}}}"#
        );
        req_tx
            .send(stokehold::daemon::ControlRequest {
                payload: body.clone().into_bytes(),
                root: serde_json::from_str(&body).map_err(|e| e.to_string()),
                signature: None,
                respond: respond_tx,
            })
            .unwrap();
        pending.push(respond_rx);
    }

    for (i, respond_rx) in pending.into_iter().enumerate() {
        let reply = respond_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("reply");
        assert_eq!(reply[format!("app-{i}")]["state"], "running");
    }

    flags.shutdown.store(true, Ordering::Relaxed);
    state.join().expect("state loop exits");
}
