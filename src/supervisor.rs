//! Connection-lifecycle state machine (§4.F): detects device presence,
//! performs the `deviceId` handshake, selects a manifest, and recovers from
//! cable removal or device reset without a process restart.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::manifest::{Manifest, DEVICE_ID_TAG};
use crate::transport::Transactor;
use crate::wire::frame::build_command;
use crate::wire::types::{decode_return, WireType, WireValue};

/// How often `Disconnected` polls the serial path for existence (§4.F).
const PRESENCE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Dwell time after opening the port, before the first transaction, to
/// absorb the device's reset-on-DTR boot (§4.F).
const POST_OPEN_DWELL: Duration = Duration::from_secs(3);
/// Deadline for the handshake transaction itself.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// The process-wide connection state (§3). Exactly one value exists; the
/// supervisor is its sole writer.
#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Initializing,
    Ready {
        device_id: String,
        manifest: Arc<Manifest>,
    },
    Error(String),
}

impl ConnectionState {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Initializing => "Initializing",
            ConnectionState::Ready { .. } => "Ready",
            ConnectionState::Error(_) => "Error",
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready { .. })
    }

    pub fn device_id(&self) -> Option<&str> {
        match self {
            ConnectionState::Ready { device_id, .. } => Some(device_id),
            _ => None,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ConnectionState::Disconnected => "no device detected on the serial line".to_string(),
            ConnectionState::Connecting => "opening the serial port".to_string(),
            ConnectionState::Connected => "port open, waiting for the device to finish booting"
                .to_string(),
            ConnectionState::Initializing => "performing the device identification handshake"
                .to_string(),
            ConnectionState::Ready { device_id, .. } => format!("ready, connected to {device_id}"),
            ConnectionState::Error(msg) => msg.clone(),
        }
    }
}

/// Shared, read-mostly cell holding the current [`ConnectionState`].
/// The supervisor is the only writer; every other component takes a
/// snapshot through [`StateHandle::snapshot`] without ever blocking it.
#[derive(Clone)]
pub struct StateHandle(Arc<RwLock<ConnectionState>>);

impl StateHandle {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(ConnectionState::Disconnected)))
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.0.read().clone()
    }

    fn set(&self, state: ConnectionState) {
        let mut guard = self.0.write();
        let (from, to) = (guard.name(), state.name());
        if from != to {
            info!(from, to, "connection state transition");
        }
        *guard = state;
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handle combining the readable [`ConnectionState`] with the
/// currently-installed [`Transactor`], if any. The dispatcher (§4.G) holds a
/// clone of this to admit or reject tool calls and to route `transact`
/// calls through whatever transactor is live; the supervisor holds another
/// clone to drive both.
#[derive(Clone)]
pub struct ConnectionHandle {
    state: StateHandle,
    transactor: Arc<tokio::sync::RwLock<Option<Arc<Transactor>>>>,
}

impl ConnectionHandle {
    pub fn new() -> Self {
        Self {
            state: StateHandle::new(),
            transactor: Arc::new(tokio::sync::RwLock::new(None)),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.state.snapshot()
    }

    /// Runs `command_payload` through the live transactor, rejecting the
    /// call with `NotReady` if none is installed, and reporting the
    /// connection lost on `IoError`/`Timeout` (§4.F recovery policy).
    pub async fn transact(
        &self,
        command_payload: &[u8],
        deadline: Duration,
    ) -> Result<Vec<u8>, crate::error::TransactError> {
        let transactor = self.transactor.read().await.clone().ok_or_else(|| {
            crate::error::TransactError::NotReady(self.state.snapshot().message())
        })?;

        match transactor.transact(command_payload, deadline).await {
            Err(e @ (crate::error::TransactError::Io(_) | crate::error::TransactError::Timeout)) => {
                warn!(error = %e, "transport error during transaction, dropping connection");
                self.report_connection_lost(format!("lost connection: {e}")).await;
                Err(e)
            }
            other => other,
        }
    }

    async fn report_connection_lost(&self, reason: String) {
        *self.transactor.write().await = None;
        self.state.set(ConnectionState::Error(reason));
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.set(state);
    }

    pub(crate) async fn install_transactor(&self, transactor: Arc<Transactor>) {
        *self.transactor.write().await = Some(transactor);
    }
}

impl Default for ConnectionHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the connection lifecycle state machine until the process shuts
/// down. Intended to run as its own task; it never returns on its own.
pub struct Supervisor {
    config: Arc<AppConfig>,
    conn: ConnectionHandle,
}

impl Supervisor {
    pub fn new(config: Arc<AppConfig>, conn: ConnectionHandle) -> Self {
        Self { config, conn }
    }

    /// Runs the state machine until `shutdown` resolves.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = self.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        match self.conn.snapshot() {
            ConnectionState::Disconnected => self.try_connect().await,
            ConnectionState::Error(_) => {
                // No bounded retry (§4.F): the very next tick re-attempts.
                self.conn.set_state(ConnectionState::Disconnected);
            }
            ConnectionState::Ready { .. } => {
                // Idle while connected; a transport error during an actual
                // transaction calls report_connection_lost() directly
                // rather than waiting for the next poll.
                tokio::time::sleep(PRESENCE_POLL_INTERVAL).await;
            }
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Initializing => {
                // try_connect() runs these synchronously to completion; if
                // we observe one of these states on a fresh tick, a prior
                // attempt is stuck. Give it a moment before recording it as
                // an error.
                tokio::time::sleep(PRESENCE_POLL_INTERVAL).await;
                self.conn
                    .set_state(ConnectionState::Error("connection attempt stalled".into()));
            }
        }
    }

    async fn try_connect(&self) {
        if !self.config.line.exists() {
            debug!(path = %self.config.line.display(), "serial device not present");
            tokio::time::sleep(PRESENCE_POLL_INTERVAL).await;
            return;
        }

        self.conn.set_state(ConnectionState::Connecting);
        let io = match crate::transport::open_serial(&self.config.line, self.config.baud) {
            Ok(io) => io,
            Err(e) => {
                warn!(error = %e, "failed to open serial port");
                self.conn
                    .set_state(ConnectionState::Error(format!("failed to open serial port: {e}")));
                return;
            }
        };
        let transactor = Arc::new(Transactor::new(io));

        self.conn.set_state(ConnectionState::Connected);
        tokio::time::sleep(POST_OPEN_DWELL).await;

        self.conn.set_state(ConnectionState::Initializing);
        match Self::handshake(&transactor).await {
            Ok(device_id) => match self.load_manifest(&device_id) {
                Ok(manifest) => {
                    self.conn.install_transactor(transactor).await;
                    self.conn.set_state(ConnectionState::Ready {
                        device_id,
                        manifest: Arc::new(manifest),
                    });
                }
                Err(e) => {
                    warn!(error = %e, %device_id, "manifest selection failed");
                    self.conn.set_state(ConnectionState::Error(format!(
                        "no usable manifest for device {device_id:?}: {e}"
                    )));
                }
            },
            Err(e) => {
                warn!(error = %e, "device identification handshake failed");
                self.conn
                    .set_state(ConnectionState::Error(format!("handshake failed: {e}")));
            }
        }
    }

    async fn handshake(transactor: &Transactor) -> Result<String, crate::error::TransactError> {
        let command = build_command(DEVICE_ID_TAG, &[]);
        let command = &command[..command.len() - 1];
        let payload = transactor.transact(command, HANDSHAKE_TIMEOUT).await?;
        let value = decode_return(Some(WireType::CStr), &payload)?;
        match value {
            WireValue::CStr(id) => Ok(id),
            _ => unreachable!("decode_return(Some(CStr), _) always yields WireValue::CStr"),
        }
    }

    fn load_manifest(&self, device_id: &str) -> Result<Manifest, crate::error::ManifestError> {
        let path: PathBuf = self.config.manifest_dir.join(format!("{device_id}.json"));
        Manifest::load(&path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_manifest() -> Manifest {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut f,
            br#"{"name":"t","description":"","version":"1","functions":[
                {"tag":0,"name":"deviceId","desc":"","return":"CStr","params":[]}
            ]}"#,
        )
        .unwrap();
        Manifest::load(f.path()).unwrap()
    }

    #[test]
    fn state_name_and_message_are_consistent() {
        let s = ConnectionState::Disconnected;
        assert_eq!(s.name(), "Disconnected");
        assert!(!s.is_ready());

        let ready = ConnectionState::Ready {
            device_id: "test-robot".into(),
            manifest: Arc::new(minimal_manifest()),
        };
        assert!(ready.is_ready());
        assert_eq!(ready.device_id(), Some("test-robot"));
    }

    #[tokio::test]
    async fn state_handle_reflects_latest_write() {
        let handle = StateHandle::new();
        assert_eq!(handle.snapshot().name(), "Disconnected");
        handle.set(ConnectionState::Connecting);
        assert_eq!(handle.snapshot().name(), "Connecting");
    }
}
