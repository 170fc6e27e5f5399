//! Control server: the node's request/reply plane.
//!
//! Socket handler threads frame and unframe; the state loop is THE
//! serialization point, owning the catalog and the announcer deadline.

use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, Sender};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::auth::Authenticator;
use crate::context::Context;
use crate::daemon::announce::Announcer;
use crate::daemon::catalog::Catalog;
use crate::daemon::counters;
use crate::engine::EngineFactory;
use crate::error::ConfigError;
use crate::protocol::{FrameReader, FrameWriter};
use crate::storage::Storage;

/// Supported control protocol versions.
const VERSION_MIN: u64 = 2;
const VERSION_MAX: u64 = 3;

/// Guard tick against edge-triggered starvation; also drives signal flags
/// and the announcer deadline.
pub const PUMP_INTERVAL: Duration = Duration::from_millis(200);

/// One framed control request, relayed from a socket handler thread.
pub struct ControlRequest {
    /// Raw first frame, exactly as it will be fed to the authenticator.
    pub payload: Vec<u8>,
    /// Parse outcome from the handler thread; errors become error replies.
    pub root: Result<Value, String>,
    /// Second frame, present iff the request declared version 3.
    pub signature: Option<Vec<u8>>,
    pub respond: Sender<Value>,
}

#[derive(Clone)]
pub struct SignalFlags {
    pub shutdown: Arc<AtomicBool>,
    pub reload: Arc<AtomicBool>,
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self {
            shutdown: Arc::new(AtomicBool::new(false)),
            reload: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// The control-plane half of the node: catalog plus request dispatch.
pub struct Node {
    context: Arc<Context>,
    catalog: Catalog,
    auth: Box<dyn Authenticator>,
    route: String,
    birthstamp: Instant,
}

impl Node {
    pub fn new(
        context: Arc<Context>,
        storage: Box<dyn Storage>,
        factory: Box<dyn EngineFactory>,
        auth: Box<dyn Authenticator>,
    ) -> Self {
        let route = format!(
            "{}/{}",
            context.config.network.hostname,
            Uuid::new_v4().simple()
        );
        Self {
            context,
            catalog: Catalog::new(storage, factory),
            auth,
            route,
            birthstamp: Instant::now(),
        }
    }

    /// Opaque identifier of this node on the worker transport.
    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// Reconcile engines with the app records in storage. Failures here are
    /// fatal at startup; the reload path wraps this with its own policy.
    pub fn recover(&mut self) -> crate::Result<()> {
        let Self {
            context, catalog, ..
        } = self;
        catalog.recover(context)
    }

    /// SIGHUP path: reconcile, log and carry on whatever happens.
    pub fn reload(&mut self) {
        tracing::info!("reloading the apps");
        if let Err(err) = self.recover() {
            tracing::error!("unable to reload the apps - {err}");
        }
    }

    /// Orderly shutdown: stop every engine and drop the catalog state.
    pub fn shutdown(&mut self) {
        if !self.catalog.is_empty() {
            tracing::info!("stopping the apps");
        }
        self.catalog.stop_all();
    }

    /// Handle one control request; the reply is always a JSON object.
    pub fn handle_request(
        &mut self,
        payload: &[u8],
        root: Result<Value, String>,
        signature: Option<&[u8]>,
    ) -> Value {
        let root = match root {
            Ok(root) => root,
            Err(parse_error) => return json!({"error": parse_error}),
        };
        match self.try_handle(payload, &root, signature) {
            Ok(reply) => reply,
            Err(err) => json!({"error": err.to_string()}),
        }
    }

    /// Parse + authenticate convenience over [`Node::handle_request`].
    pub fn handle_control(&mut self, payload: &[u8], signature: Option<&[u8]>) -> Value {
        let root = serde_json::from_slice(payload).map_err(|e| e.to_string());
        self.handle_request(payload, root, signature)
    }

    fn try_handle(
        &mut self,
        payload: &[u8],
        root: &Value,
        signature: Option<&[u8]>,
    ) -> crate::Result<Value> {
        let object = root.as_object().ok_or(ConfigError::RootNotObject)?;

        let version = object
            .get("version")
            .and_then(Value::as_u64)
            .unwrap_or_default();
        let username = object
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if !(VERSION_MIN..=VERSION_MAX).contains(&version) {
            return Err(ConfigError::UnsupportedVersion.into());
        }

        if version == VERSION_MAX {
            if username.is_empty() {
                return Err(crate::auth::AuthError::UsernameExpected.into());
            }
            self.auth
                .verify(payload, signature.unwrap_or_default(), username)?;
        }

        match object.get("action").and_then(Value::as_str).unwrap_or_default() {
            "create" => self.create(object.get("apps")),
            "delete" => self.delete(object.get("apps")),
            "info" => Ok(self.info()),
            _ => Err(ConfigError::UnsupportedAction.into()),
        }
    }

    /// Start every app in the request, collecting per-app failures instead
    /// of aborting siblings.
    fn create(&mut self, apps: Option<&Value>) -> crate::Result<Value> {
        let apps = apps
            .and_then(Value::as_object)
            .filter(|map| !map.is_empty())
            .cloned()
            .ok_or(ConfigError::NoApps)?;

        let context = self.context.clone();
        let mut result = Map::new();
        for (name, manifest) in &apps {
            let outcome = if manifest.is_object() {
                self.catalog.create_engine(&context, name, manifest, false)
            } else {
                Err(ConfigError::ManifestExpected.into())
            };
            result.insert(name.clone(), per_app(outcome));
        }
        Ok(Value::Object(result))
    }

    fn delete(&mut self, apps: Option<&Value>) -> crate::Result<Value> {
        let apps = apps
            .and_then(Value::as_array)
            .filter(|list| !list.is_empty())
            .cloned()
            .ok_or(ConfigError::NoApps)?;

        let mut result = Map::new();
        for app in &apps {
            let name = app.as_str().unwrap_or_default();
            result.insert(name.to_string(), per_app(self.catalog.delete_engine(name)));
        }
        Ok(Value::Object(result))
    }

    /// Snapshot of the node: route, per-app info, counters, uptime.
    pub fn info(&self) -> Value {
        let counters = counters::snapshot();
        json!({
            "route": self.route,
            "apps": Value::Object(self.catalog.info_map()),
            "jobs": {
                "pending": counters.jobs_pending,
                "processed": counters.jobs_processed,
            },
            "loggers": counters.loggers_alive,
            "uptime": self.birthstamp.elapsed().as_secs(),
        })
    }
}

fn per_app(outcome: crate::Result<Value>) -> Value {
    match outcome {
        Ok(info) => info,
        Err(err) => json!({"error": err.to_string()}),
    }
}

/// Run the state loop until shutdown.
///
/// All catalog mutations, reloads and announcements happen here, one frame
/// at a time; returning to `select!` is the loop's only suspension point.
pub fn run_state_loop(
    mut node: Node,
    req_rx: Receiver<ControlRequest>,
    mut announcer: Option<Announcer>,
    flags: SignalFlags,
) {
    loop {
        let tick = crossbeam::channel::after(PUMP_INTERVAL);
        crossbeam::select! {
            recv(req_rx) -> msg => match msg {
                Ok(request) => {
                    let reply = node.handle_request(
                        &request.payload,
                        request.root,
                        request.signature.as_deref(),
                    );
                    // A gone client is a dropped reply, not a failure.
                    let _ = request.respond.send(reply);
                }
                Err(_) => {
                    // Acceptor went away: tear down in place.
                    node.shutdown();
                    return;
                }
            },
            recv(tick) -> _ => {}
        }

        if flags.shutdown.load(Ordering::Relaxed) {
            node.shutdown();
            return;
        }
        if flags.reload.swap(false, Ordering::Relaxed) {
            node.reload();
        }
        if let Some(announcer) = announcer.as_mut() {
            if announcer.due() {
                let info = node.info();
                announcer.fire(node.route().as_bytes(), &info);
            }
        }
    }
}

/// Handle one control connection: frames in, JSON reply frames out.
pub fn handle_client(stream: UnixStream, req_tx: Sender<ControlRequest>) {
    let reader = match stream.try_clone() {
        Ok(reader) => reader,
        Err(err) => {
            tracing::error!("failed to clone control stream: {err}");
            return;
        }
    };
    let mut frames = FrameReader::new(reader);
    let mut writer = FrameWriter::new(stream);

    loop {
        let payload = match frames.read_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                tracing::debug!("control stream error: {err}");
                break;
            }
        };

        let root: Result<Value, String> =
            serde_json::from_slice(&payload).map_err(|e| e.to_string());

        // Version 3 requests carry a detached signature as a second frame.
        let signature = match &root {
            Ok(value) if value.get("version").and_then(Value::as_u64) == Some(3) => {
                match frames.read_frame() {
                    Ok(frame) => frame,
                    Err(err) => {
                        tracing::debug!("control stream error: {err}");
                        break;
                    }
                }
            }
            _ => None,
        };

        let (respond_tx, respond_rx) = crossbeam::channel::bounded(1);
        if req_tx
            .send(ControlRequest {
                payload,
                root,
                signature,
                respond: respond_tx,
            })
            .is_err()
        {
            break; // State loop is gone.
        }

        let reply = match respond_rx.recv() {
            Ok(reply) => reply,
            Err(_) => break,
        };

        let bytes = serde_json::to_vec(&reply).unwrap_or_else(|_| b"{}".to_vec());
        if writer.write_frame(&bytes).is_err() {
            break; // Client disconnected; the reply is dropped.
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AllowAll, AuthError};
    use crate::config::Config;
    use crate::engine::BasicEngineFactory;
    use crate::logging::NullSink;
    use crate::storage::MemoryStorage;

    struct DenyAll;

    impl Authenticator for DenyAll {
        fn verify(
            &self,
            _message: &[u8],
            _signature: &[u8],
            _username: &str,
        ) -> Result<(), AuthError> {
            Err(AuthError::Verification("bad signature".into()))
        }
    }

    fn test_node_with_auth(auth: Box<dyn Authenticator>) -> (tempfile::TempDir, Node) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.paths.runtime = dir.path().to_path_buf();
        config.network.hostname = "node-under-test".into();
        let context =
            Arc::new(Context::with_logger(config, Arc::new(NullSink)).expect("context"));
        let node = Node::new(
            context,
            Box::new(MemoryStorage::new()),
            Box::new(BasicEngineFactory),
            auth,
        );
        (dir, node)
    }

    fn test_node() -> (tempfile::TempDir, Node) {
        test_node_with_auth(Box::new(AllowAll))
    }

    fn request(node: &mut Node, body: &str) -> Value {
        node.handle_control(body.as_bytes(), None)
    }

    #[test]
    fn info_on_an_empty_node() {
        let (_dir, mut node) = test_node();
        let reply = request(&mut node, r#"{"version":2,"username":"","action":"info"}"#);

        assert_eq!(reply["apps"], json!({}));
        assert!(reply["uptime"].as_u64().is_some());
        let route = reply["route"].as_str().unwrap();
        assert!(route.starts_with("node-under-test/"));
    }

    #[test]
    fn create_is_visible_in_info_and_not_idempotent() {
        let (_dir, mut node) = test_node();

        let reply = request(
            &mut node,
            r#"{"version":2,"action":"create","apps":{"echo":{"slave":"py"}}}"#,
        );
        assert_eq!(reply["echo"]["state"], "running");

        let info = request(&mut node, r#"{"version":2,"action":"info"}"#);
        assert!(info["apps"].get("echo").is_some());

        let again = request(
            &mut node,
            r#"{"version":2,"action":"create","apps":{"echo":{"slave":"py"}}}"#,
        );
        assert_eq!(
            again["echo"]["error"],
            "the specified app is already active"
        );
    }

    #[test]
    fn create_isolates_per_app_failures() {
        let (_dir, mut node) = test_node();
        let reply = request(
            &mut node,
            r#"{"version":2,"action":"create","apps":{"good":{"slave":"py"},"bad":"nope"}}"#,
        );
        assert_eq!(reply["good"]["state"], "running");
        assert_eq!(reply["bad"]["error"], "app manifest is expected");
    }

    #[test]
    fn delete_requires_a_non_empty_array() {
        let (_dir, mut node) = test_node();
        let reply = request(&mut node, r#"{"version":2,"action":"delete","apps":[]}"#);
        assert_eq!(reply["error"], "no apps have been specified");

        let reply = request(&mut node, r#"{"version":2,"action":"delete","apps":["x"]}"#);
        assert_eq!(reply["x"]["error"], "the specified app is not active");
    }

    #[test]
    fn malformed_json_and_non_object_roots_are_error_replies() {
        let (_dir, mut node) = test_node();

        let reply = node.handle_control(b"{not json", None);
        assert!(reply["error"].as_str().unwrap().contains("key must be a string"));

        let reply = node.handle_control(b"[1,2,3]", None);
        assert_eq!(reply["error"], "json root must be an object");
    }

    #[test]
    fn version_gate() {
        let (_dir, mut node) = test_node();
        for body in [
            r#"{"action":"info"}"#,
            r#"{"version":1,"action":"info"}"#,
            r#"{"version":4,"action":"info"}"#,
        ] {
            let reply = request(&mut node, body);
            assert_eq!(reply["error"], "unsupported protocol version");
        }
    }

    #[test]
    fn version_three_requires_a_username() {
        let (_dir, mut node) = test_node();
        let reply = node.handle_control(
            br#"{"version":3,"action":"create","apps":{"echo":{}}}"#,
            Some(b"sig"),
        );
        assert_eq!(reply["error"], "username expected");

        let info = request(&mut node, r#"{"version":2,"action":"info"}"#);
        assert_eq!(info["apps"], json!({}), "no state change happened");
    }

    #[test]
    fn version_three_surfaces_verification_failures() {
        let (_dir, mut node) = test_node_with_auth(Box::new(DenyAll));
        let reply = node.handle_control(
            br#"{"version":3,"username":"alice","action":"info"}"#,
            Some(b"sig"),
        );
        assert!(reply["error"]
            .as_str()
            .unwrap()
            .contains("authorization failed"));

        // Version 2 requests bypass the authenticator entirely.
        let reply = request(&mut node, r#"{"version":2,"action":"info"}"#);
        assert!(reply.get("error").is_none());
    }

    #[test]
    fn unknown_actions_are_rejected() {
        let (_dir, mut node) = test_node();
        let reply = request(&mut node, r#"{"version":2,"action":"restart"}"#);
        assert_eq!(reply["error"], "unsupported action");
    }

    #[test]
    fn reload_swallows_catalog_errors() {
        let (_dir, mut node) = test_node();
        // Nothing in storage, nothing active: reload is a no-op and must
        // not panic or alter state.
        node.reload();
        assert!(request(&mut node, r#"{"version":2,"action":"info"}"#)["apps"]
            .as_object()
            .unwrap()
            .is_empty());
    }

    #[test]
    fn state_loop_replies_over_the_channel_and_shuts_down() {
        let (_dir, node) = test_node();
        let (req_tx, req_rx) = crossbeam::channel::unbounded::<ControlRequest>();
        let flags = SignalFlags::default();

        let loop_flags = flags.clone();
        let handle = std::thread::spawn(move || run_state_loop(node, req_rx, None, loop_flags));

        let (respond_tx, respond_rx) = crossbeam::channel::bounded(1);
        req_tx
            .send(ControlRequest {
                payload: br#"{"version":2,"action":"info"}"#.to_vec(),
                root: Ok(serde_json::json!({"version": 2, "action": "info"})),
                signature: None,
                respond: respond_tx,
            })
            .unwrap();

        let reply = respond_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("state loop replied");
        assert!(reply.get("route").is_some());

        flags.shutdown.store(true, Ordering::Relaxed);
        handle.join().expect("state loop exited");
    }
}
