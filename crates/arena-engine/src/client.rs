//! The client network engine.
//!
//! A [`ClientEngine`] owns one TCP connection to the server. The
//! connection lives on an isolated worker thread; the caller only sees
//! the state register and two mailboxes:
//!
//! ```text
//!  caller ── send ──▶ outbound ──▶ writer ──▶ socket
//!  caller ◀─ receive ─ inbound ◀── reader ◀── socket
//! ```
//!
//! State machine:
//!
//! ```text
//! Idle ─connect─▶ Connecting ─established─▶ Running
//!  ▲                  │                        │
//!  │                  └──────timeout───┐   disconnect
//!  │                                   ▼       ▼
//!  └───────────── closed ───────── Disconnecting
//!
//! Running ─connection lost─▶ Idle
//! any ─stop─▶ Exiting (terminal)
//! ```

use std::fmt;
use std::time::Duration;

use arena_ipc::{
    EngineState, Mailbox, MailboxFull, StateRegister, Worker, WorkerExit,
};
use arena_tick::TickScheduler;
use arena_transport::{Connection, TcpConnection, TransportError};
use tracing::{debug, info, trace, warn};

use crate::{ClientConfig, EngineError};

/// State of a [`ClientEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientState {
    Idle,
    Connecting,
    Running,
    Disconnecting,
    Exiting,
}

impl ClientState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Running => "running",
            Self::Disconnecting => "disconnecting",
            Self::Exiting => "exiting",
        }
    }
}

impl fmt::Display for ClientState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineState for ClientState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Exiting)
    }
}

/// Everything the caller and the worker share.
#[derive(Clone)]
struct ClientShared {
    state: StateRegister<ClientState>,
    outbound: Mailbox<Vec<u8>>,
    inbound: Mailbox<Vec<u8>>,
}

impl ClientShared {
    fn new(config: &ClientConfig) -> Self {
        Self {
            state: StateRegister::new(ClientState::Idle),
            outbound: Mailbox::new(config.outbound_capacity),
            inbound: Mailbox::new(config.inbound_capacity),
        }
    }
}

/// Client side of the arena connection.
///
/// Every method is synchronous and safe to call from the game loop:
/// nothing blocks longer than the timeout or patience it is given.
pub struct ClientEngine {
    config: ClientConfig,
    shared: ClientShared,
    worker: Option<Worker>,
}

impl fmt::Debug for ClientEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientEngine")
            .field("server_addr", &self.config.server_addr)
            .field("state", &self.state())
            .finish()
    }
}

impl ClientEngine {
    /// Creates an engine. Nothing runs until [`start`](Self::start).
    pub fn new(config: ClientConfig) -> Self {
        let shared = ClientShared::new(&config);
        Self {
            config,
            shared,
            worker: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Spawns the networking worker. The engine starts out `Idle`.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.worker.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        // A stopped engine sits in the terminal state; start over.
        let shared = ClientShared::new(&self.config);
        let worker = {
            let config = self.config.clone();
            let shared = shared.clone();
            Worker::spawn_async("arena-client", self.config.shutdown.abort_grace, move || {
                run_client(config, shared)
            })
            .map_err(EngineError::Spawn)?
        };

        self.shared = shared;
        self.worker = Some(worker);
        info!(addr = %self.config.server_addr, "client engine started");
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        match self.worker {
            Some(_) => Ok(()),
            None => Err(EngineError::NotStarted),
        }
    }

    /// Requests a connection and waits up to `timeout` for it.
    ///
    /// On timeout the attempt is abandoned (the engine moves to
    /// `Disconnecting` and then back to `Idle`) and
    /// [`EngineError::ConnectTimeout`] is returned.
    pub fn connect(&self, timeout: Duration) -> Result<(), EngineError> {
        self.ensure_started()?;
        let state = &self.shared.state;

        // A previous disconnect may still be winding down.
        let current = state
            .wait_until(|s| s != ClientState::Disconnecting, timeout)
            .unwrap_or(ClientState::Disconnecting);
        match current {
            ClientState::Running => return Ok(()),
            ClientState::Idle => {
                state.compare_and_set(ClientState::Idle, ClientState::Connecting);
            }
            ClientState::Connecting => {}
            other => {
                return Err(EngineError::InvalidTransition {
                    from: other.as_str(),
                    to: ClientState::Connecting.as_str(),
                });
            }
        }

        let reached = state.wait_until(
            |s| matches!(s, ClientState::Running | ClientState::Exiting),
            timeout,
        );
        match reached {
            Some(ClientState::Running) => Ok(()),
            Some(other) => Err(EngineError::InvalidTransition {
                from: other.as_str(),
                to: ClientState::Running.as_str(),
            }),
            None => {
                if state.compare_and_set(ClientState::Connecting, ClientState::Disconnecting) {
                    debug!(addr = %self.config.server_addr, "connect timed out, abandoning");
                    Err(EngineError::ConnectTimeout(timeout))
                } else if state.get() == ClientState::Running {
                    // Connected right at the deadline.
                    Ok(())
                } else {
                    Err(EngineError::ConnectTimeout(timeout))
                }
            }
        }
    }

    /// Requests a disconnect without waiting for it.
    pub fn disconnect(&self) -> Result<(), EngineError> {
        self.ensure_started()?;
        let state = &self.shared.state;
        if state.compare_and_set(ClientState::Running, ClientState::Disconnecting)
            || state.compare_and_set(ClientState::Connecting, ClientState::Disconnecting)
        {
            debug!("disconnect requested");
        }
        Ok(())
    }

    /// Queues `payload` for the server, waiting up to `patience` for room.
    pub fn send(&self, payload: Vec<u8>, patience: Duration) -> Result<(), EngineError> {
        self.ensure_started()?;
        self.shared
            .outbound
            .write(payload, patience)
            .map_err(|_| EngineError::MailboxFull)
    }

    /// Takes the next frame from the server, waiting up to `patience`.
    pub fn receive(&self, patience: Duration) -> Option<Vec<u8>> {
        self.worker.as_ref()?;
        self.shared.inbound.read(patience)
    }

    /// Drops every frame received but not yet taken. Returns how many.
    pub fn discard_received(&self) -> usize {
        self.shared.inbound.drain().len()
    }

    pub fn state(&self) -> ClientState {
        self.shared.state.get()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ClientState::Running
    }

    /// Waits up to `timeout` for the engine to reach a state matching `pred`.
    pub fn wait_for_state(
        &self,
        pred: impl FnMut(ClientState) -> bool,
        timeout: Duration,
    ) -> Option<ClientState> {
        self.shared.state.wait_until(pred, timeout)
    }

    /// Moves to `Exiting` and joins the worker.
    ///
    /// Returns [`WorkerExit::Graceful`] if there was nothing to stop.
    pub fn stop(&mut self) -> WorkerExit {
        let Some(worker) = self.worker.take() else {
            return WorkerExit::Graceful;
        };
        self.shared.state.set(ClientState::Exiting);
        let exit = worker.join(self.config.shutdown);
        info!(?exit, "client engine stopped");
        exit
    }
}

impl Drop for ClientEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Worker side
// ---------------------------------------------------------------------------

async fn run_client(config: ClientConfig, shared: ClientShared) {
    let mut ticks = TickScheduler::new(config.tick_config());
    debug!("client worker running");

    loop {
        match shared.state.get() {
            ClientState::Exiting => break,
            ClientState::Idle => {
                ticks.wait_for_tick().await;
            }
            ClientState::Disconnecting => {
                // No connection is open outside `run_connection`.
                shared
                    .state
                    .compare_and_set(ClientState::Disconnecting, ClientState::Idle);
            }
            ClientState::Connecting => {
                connect_once(&config, &shared, &mut ticks).await;
            }
            ClientState::Running => {
                // Running is only entered with a live connection in hand.
                warn!("running without a connection, resetting");
                shared
                    .state
                    .compare_and_set(ClientState::Running, ClientState::Idle);
            }
        }
    }

    debug!("client worker exiting");
}

/// Ticks until the state is no longer `state`.
async fn left_state(
    shared: &ClientShared,
    ticks: &mut TickScheduler,
    state: ClientState,
) {
    while shared.state.get() == state {
        ticks.wait_for_tick().await;
    }
}

/// One connect attempt. On success, serves the connection until it ends.
async fn connect_once(config: &ClientConfig, shared: &ClientShared, ticks: &mut TickScheduler) {
    let addr = config.server_addr.as_str();
    let attempt = tokio::time::timeout(
        config.connect_attempt_timeout,
        TcpConnection::connect(addr),
    );

    let result = tokio::select! {
        result = attempt => result,
        () = left_state(shared, ticks, ClientState::Connecting) => return,
    };

    match result {
        Ok(Ok(conn)) => {
            // Nothing from an earlier connection may leak into this one.
            shared.inbound.drain();
            shared.outbound.drain();
            if shared
                .state
                .compare_and_set(ClientState::Connecting, ClientState::Running)
            {
                info!(id = %conn.id(), addr, "connected");
                run_connection(config, shared, ticks, conn).await;
            } else {
                let _ = conn.close().await;
            }
        }
        Ok(Err(e)) => {
            debug!(addr, error = %e, "connect attempt failed");
            backoff(config, shared, ticks).await;
        }
        Err(_) => {
            debug!(addr, "connect attempt timed out");
        }
    }
}

/// Waits out the reconnect delay, cutting it short if the state moves.
async fn backoff(config: &ClientConfig, shared: &ClientShared, ticks: &mut TickScheduler) {
    let _ = tokio::time::timeout(
        config.reconnect_delay,
        left_state(shared, ticks, ClientState::Connecting),
    )
    .await;
}

async fn run_connection(
    config: &ClientConfig,
    shared: &ClientShared,
    ticks: &mut TickScheduler,
    conn: TcpConnection,
) {
    let patience = ticks.tick_duration();
    let ended = tokio::select! {
        r = read_inbound(&conn, shared, patience) => r,
        r = write_outbound(&conn, shared, ticks) => r,
    };

    match shared.state.get() {
        ClientState::Running => {
            match &ended {
                Ok(()) => info!(addr = %config.server_addr, "server closed the connection"),
                Err(e) if e.is_connection_lost() => {
                    info!(addr = %config.server_addr, error = %e, "connection lost")
                }
                Err(e) => warn!(addr = %config.server_addr, error = %e, "connection failed"),
            }
            shared
                .state
                .compare_and_set(ClientState::Running, ClientState::Idle);
        }
        ClientState::Disconnecting => {
            let _ = conn.close().await;
            shared
                .state
                .compare_and_set(ClientState::Disconnecting, ClientState::Idle);
            info!(addr = %config.server_addr, "disconnected");
        }
        _ => {
            let _ = conn.close().await;
        }
    }
}

/// Publishes every frame from the server to the inbound mailbox.
///
/// Returns `Ok(())` when the server closes the stream.
async fn read_inbound(
    conn: &TcpConnection,
    shared: &ClientShared,
    patience: Duration,
) -> Result<(), TransportError> {
    while let Some(frame) = conn.recv().await? {
        trace!(len = frame.len(), "frame received");
        if let Err(MailboxFull(frame)) = shared.inbound.write_async(frame, patience).await {
            if shared.inbound.push_latest(frame).is_some() {
                debug!("inbound mailbox full, dropped oldest frame");
            }
        }
    }
    Ok(())
}

/// Sends queued frames once per tick while the engine is `Running`.
async fn write_outbound(
    conn: &TcpConnection,
    shared: &ClientShared,
    ticks: &mut TickScheduler,
) -> Result<(), TransportError> {
    loop {
        ticks.wait_for_tick().await;
        if shared.state.get() != ClientState::Running {
            return Ok(());
        }
        while let Some(payload) = shared.outbound.try_read() {
            conn.send(&payload).await?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_exiting_is_terminal() {
        for s in [
            ClientState::Idle,
            ClientState::Connecting,
            ClientState::Running,
            ClientState::Disconnecting,
        ] {
            assert!(!s.is_terminal(), "{s}");
        }
        assert!(ClientState::Exiting.is_terminal());
    }

    #[test]
    fn test_unstarted_engine() {
        let engine = ClientEngine::new(ClientConfig::default());
        assert_eq!(engine.state(), ClientState::Idle);
        assert!(matches!(
            engine.connect(Duration::from_millis(10)),
            Err(EngineError::NotStarted)
        ));
        assert!(matches!(
            engine.send(vec![1], Duration::ZERO),
            Err(EngineError::NotStarted)
        ));
        assert_eq!(engine.receive(Duration::ZERO), None);
    }

    #[test]
    fn test_discard_received_empties_inbound() {
        let engine = ClientEngine::new(ClientConfig::default());
        assert_eq!(engine.discard_received(), 0);

        engine.shared.inbound.push_latest(b"stale".to_vec());
        assert_eq!(engine.discard_received(), 1);
        assert_eq!(engine.shared.inbound.try_read(), None);
    }

    #[test]
    fn test_start_twice_fails() {
        let mut engine = ClientEngine::new(ClientConfig::default());
        engine.start().unwrap();
        assert!(matches!(engine.start(), Err(EngineError::AlreadyStarted)));
        assert_eq!(engine.stop(), WorkerExit::Graceful);
        assert_eq!(engine.state(), ClientState::Exiting);
    }

    #[test]
    fn test_stop_then_start_resets_state() {
        let mut engine = ClientEngine::new(ClientConfig::default());
        engine.start().unwrap();
        engine.stop();
        engine.start().unwrap();
        assert_eq!(engine.state(), ClientState::Idle);
    }

    #[test]
    fn test_stop_without_start_is_graceful() {
        let mut engine = ClientEngine::new(ClientConfig::default());
        assert_eq!(engine.stop(), WorkerExit::Graceful);
    }
}
