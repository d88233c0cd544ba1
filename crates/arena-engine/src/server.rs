//! The server network engine.
//!
//! A [`ServerEngine`] runs two workers:
//!
//! - the **network worker**, a single-threaded runtime that accepts
//!   connections, reads their frames, delivers replies and fans out
//!   broadcasts;
//! - the **request worker**, a plain thread that runs the application's
//!   [`RequestHandler`], which is allowed to block.
//!
//! They talk only through mailboxes. Where an inbound frame goes depends
//! on the server state (see [`Route`]): in the lobby it becomes a request
//! that gets exactly one reply, during play it overwrites the sender's
//! latest player data and gets none.
//!
//! ```text
//! Idle ─start_lobby─▶ Lobby ─start_playing─▶ Playing
//!                       ▲                       │
//!                       └──────start_lobby──────┘
//! any ─stop─▶ Exiting (terminal)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use arena_ipc::{
    EngineState, Mailbox, MailboxFull, Roster, RosterView, StateRegister, Worker,
    WorkerExit,
};
use arena_tick::{TickConfig, TickScheduler};
use arena_transport::{
    Connection, ConnectionId, TcpConnection, TcpTransport, Transport, TransportError,
};
use futures_util::future::join_all;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::{EngineError, ServerConfig};

/// State of a [`ServerEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerState {
    Idle,
    Lobby,
    Playing,
    Exiting,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Lobby => "lobby",
            Self::Playing => "playing",
            Self::Exiting => "exiting",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineState for ServerState {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Exiting)
    }
}

/// Where an inbound frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Queue for the request handler; the reply goes back to the sender.
    Request,
    /// Overwrite the sender's latest player data. No reply.
    PlayerData,
    /// Drop it.
    Discard,
}

impl Route {
    pub fn for_state(state: ServerState) -> Self {
        match state {
            ServerState::Lobby => Self::Request,
            ServerState::Playing => Self::PlayerData,
            ServerState::Idle | ServerState::Exiting => Self::Discard,
        }
    }
}

/// What a [`RequestHandler`] knows about the request it is handling.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The connection that sent the request.
    pub client: ConnectionId,
    /// Connections alive right now.
    pub connected: RosterView<ConnectionId>,
}

/// Application logic answering lobby requests.
///
/// Called on the request worker thread, one request at a time. Every
/// request gets exactly one reply. A panic is logged and the request
/// goes unanswered; the server keeps running.
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, ctx: &RequestContext, request: &[u8]) -> Vec<u8>;
}

impl<F> RequestHandler for F
where
    F: Fn(&RequestContext, &[u8]) -> Vec<u8> + Send + Sync + 'static,
{
    fn handle(&self, ctx: &RequestContext, request: &[u8]) -> Vec<u8> {
        self(ctx, request)
    }
}

/// A lobby request waiting for the handler.
struct Request {
    client: ConnectionId,
    payload: Vec<u8>,
    reply: Mailbox<Vec<u8>>,
}

/// Everything the caller and the workers share for one run.
#[derive(Clone)]
struct ServerShared {
    state: StateRegister<ServerState>,
    roster: Roster<ConnectionId>,
    /// Latest player data per connection, written during play.
    client_data: Arc<RwLock<HashMap<ConnectionId, Mailbox<Vec<u8>>>>>,
    /// Connections taking part in the current game.
    players: Arc<Mutex<Vec<ConnectionId>>>,
    requests: Mailbox<Request>,
    broadcast: Mailbox<Vec<u8>>,
}

impl ServerShared {
    fn new(roster: Roster<ConnectionId>, config: &ServerConfig) -> Self {
        Self {
            state: StateRegister::new(ServerState::Idle),
            roster,
            client_data: Arc::default(),
            players: Arc::default(),
            requests: Mailbox::new(config.request_queue_capacity),
            broadcast: Mailbox::single(),
        }
    }

    fn players(&self) -> Vec<ConnectionId> {
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_players(&self, players: Vec<ConnectionId>) {
        *self.players.lock().unwrap_or_else(PoisonError::into_inner) = players;
    }

    fn add_client_data(&self, id: ConnectionId, mailbox: Mailbox<Vec<u8>>) {
        self.client_data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, mailbox);
    }

    fn remove_client_data(&self, id: &ConnectionId) {
        self.client_data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn client_data(&self, id: &ConnectionId) -> Option<Mailbox<Vec<u8>>> {
        self.client_data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}

struct Running {
    network: Worker,
    requests: Worker,
    local_addr: SocketAddr,
}

/// Server side of the arena.
///
/// The connection roster outlives a single run: handles from
/// [`roster`](Self::roster) stay valid across `stop` and `start`, and the
/// roster is emptied when the server starts.
pub struct ServerEngine<H: RequestHandler> {
    config: ServerConfig,
    handler: Arc<H>,
    roster: Roster<ConnectionId>,
    shared: ServerShared,
    running: Option<Running>,
}

impl<H: RequestHandler> fmt::Debug for ServerEngine<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerEngine")
            .field("bind_addr", &self.config.bind_addr)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl<H: RequestHandler> ServerEngine<H> {
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let roster = Roster::new();
        let shared = ServerShared::new(roster.clone(), &config);
        Self {
            config,
            handler: Arc::new(handler),
            roster,
            shared,
            running: None,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The application handler answering lobby requests.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Binds the listener and spawns both workers. The server starts
    /// out `Idle`; open the lobby with [`start_lobby`](Self::start_lobby).
    ///
    /// Returns the bound address.
    pub fn start(&mut self) -> Result<SocketAddr, EngineError> {
        if self.running.is_some() {
            return Err(EngineError::AlreadyStarted);
        }

        self.roster.clear();
        let shared = ServerShared::new(self.roster.clone(), &self.config);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let network = {
            let config = self.config.clone();
            let shared = shared.clone();
            Worker::spawn_async("arena-server-net", self.config.shutdown.abort_grace, move || {
                run_network(config, shared, ready_tx)
            })
            .map_err(EngineError::Spawn)?
        };

        let local_addr = match ready_rx.recv_timeout(self.config.startup_timeout) {
            Ok(Ok(addr)) => addr,
            Ok(Err(e)) => {
                shared.state.set(ServerState::Exiting);
                network.join(self.config.shutdown);
                return Err(EngineError::Transport(e));
            }
            Err(_) => {
                shared.state.set(ServerState::Exiting);
                network.join(self.config.shutdown);
                return Err(EngineError::Startup(format!(
                    "listener not ready within {:?}",
                    self.config.startup_timeout
                )));
            }
        };

        let requests = {
            let handler = Arc::clone(&self.handler);
            let shared = shared.clone();
            let config = self.config.clone();
            Worker::spawn_blocking("arena-server-requests", move || {
                serve_requests(handler.as_ref(), &shared, &config)
            })
        };
        let requests = match requests {
            Ok(worker) => worker,
            Err(e) => {
                shared.state.set(ServerState::Exiting);
                network.join(self.config.shutdown);
                return Err(EngineError::Spawn(e));
            }
        };

        self.shared = shared;
        self.running = Some(Running {
            network,
            requests,
            local_addr,
        });
        info!(addr = %local_addr, "server engine started");
        Ok(local_addr)
    }

    fn ensure_started(&self) -> Result<(), EngineError> {
        match self.running {
            Some(_) => Ok(()),
            None => Err(EngineError::NotStarted),
        }
    }

    fn invalid(&self, to: ServerState) -> EngineError {
        EngineError::InvalidTransition {
            from: self.state().as_str(),
            to: to.as_str(),
        }
    }

    /// Opens the lobby, from `Idle` or after a game (`Playing`).
    pub fn start_lobby(&self) -> Result<(), EngineError> {
        self.ensure_started()?;
        let state = &self.shared.state;
        match state.get() {
            ServerState::Lobby => return Ok(()),
            from @ (ServerState::Idle | ServerState::Playing) => {
                if !state.compare_and_set(from, ServerState::Lobby) {
                    return Err(self.invalid(ServerState::Lobby));
                }
            }
            ServerState::Exiting => return Err(self.invalid(ServerState::Lobby)),
        }
        self.shared.set_players(Vec::new());
        info!("lobby open");
        Ok(())
    }

    /// Closes the lobby and starts the game with everyone connected now.
    ///
    /// Connections that arrive later are not players of this game.
    pub fn start_playing(&self) -> Result<(), EngineError> {
        self.ensure_started()?;
        if self.shared.state.get() != ServerState::Lobby {
            return Err(self.invalid(ServerState::Playing));
        }
        let players = self.roster.snapshot();
        let count = players.len();
        self.shared.set_players(players);
        if !self
            .shared
            .state
            .compare_and_set(ServerState::Lobby, ServerState::Playing)
        {
            return Err(self.invalid(ServerState::Playing));
        }
        info!(players = count, "game started");
        Ok(())
    }

    /// Queues `payload` for every connected client.
    pub fn broadcast(&self, payload: Vec<u8>, patience: Duration) -> Result<(), EngineError> {
        self.ensure_started()?;
        self.shared
            .broadcast
            .write(payload, patience)
            .map_err(|_| EngineError::MailboxFull)
    }

    /// Takes the latest unread data of every player, without waiting.
    ///
    /// Players that sent nothing since the last call, or have since
    /// disconnected, are left out.
    pub fn gather_player_data(&self) -> Vec<(ConnectionId, Vec<u8>)> {
        self.shared
            .players()
            .into_iter()
            .filter_map(|id| {
                let data = self.shared.client_data(&id)?.try_read()?;
                Some((id, data))
            })
            .collect()
    }

    /// The players of the current game. Empty outside `Playing`.
    pub fn players(&self) -> Vec<ConnectionId> {
        self.shared.players()
    }

    /// Connections alive right now, in connect order.
    pub fn connected_players(&self) -> Vec<ConnectionId> {
        self.roster.snapshot()
    }

    /// A read-only handle to the live connection roster.
    pub fn roster(&self) -> RosterView<ConnectionId> {
        self.roster.view()
    }

    pub fn state(&self) -> ServerState {
        self.shared.state.get()
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    /// Moves to `Exiting`, joins both workers and empties the roster.
    ///
    /// Returns the worse of the two exits, or [`WorkerExit::Graceful`] if
    /// the server was not running.
    pub fn stop(&mut self) -> WorkerExit {
        let Some(running) = self.running.take() else {
            return WorkerExit::Graceful;
        };
        self.shared.state.set(ServerState::Exiting);
        let network = running.network.join(self.config.shutdown);
        let requests = running.requests.join(self.config.shutdown);
        let exit = network.max(requests);
        // A forced exit skips per-connection cleanup.
        self.roster.clear();
        info!(?network, ?requests, "server engine stopped");
        exit
    }
}

impl<H: RequestHandler> Drop for ServerEngine<H> {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Request worker
// ---------------------------------------------------------------------------

fn serve_requests<H: RequestHandler>(handler: &H, shared: &ServerShared, config: &ServerConfig) {
    debug!("request worker running");
    while shared.state.get() != ServerState::Exiting {
        let Some(request) = shared.requests.read(config.handler_poll) else {
            continue;
        };
        let ctx = RequestContext {
            client: request.client,
            connected: shared.roster.view(),
        };
        let reply = match catch_unwind(AssertUnwindSafe(|| handler.handle(&ctx, &request.payload))) {
            Ok(reply) => reply,
            Err(_) => {
                error!(client = %request.client, "request handler panicked");
                continue;
            }
        };
        deliver_reply(shared, config, request.client, &request.reply, reply);
    }
    debug!("request worker exiting");
}

/// Retries the reply until it lands, the client leaves, or the server exits.
fn deliver_reply(
    shared: &ServerShared,
    config: &ServerConfig,
    client: ConnectionId,
    mailbox: &Mailbox<Vec<u8>>,
    reply: Vec<u8>,
) {
    let mut reply = reply;
    loop {
        match mailbox.write(reply, config.response_patience) {
            Ok(()) => return,
            Err(MailboxFull(back)) => {
                if !shared.roster.contains(&client) {
                    debug!(%client, "client gone, dropping reply");
                    return;
                }
                if shared.state.get() == ServerState::Exiting {
                    return;
                }
                trace!(%client, "response mailbox full, retrying");
                reply = back;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Network worker
// ---------------------------------------------------------------------------

/// A connection as the broadcast task sees it.
struct Peer {
    conn: Arc<TcpConnection>,
    /// Ends the connection's task when the peer falls behind.
    evict: Arc<Notify>,
}

/// Tells the broadcast task who to fan out to.
enum Membership {
    Joined(ConnectionId, Peer),
    Left(ConnectionId),
}

type ReadySender = std::sync::mpsc::Sender<Result<SocketAddr, TransportError>>;

async fn run_network(config: ServerConfig, shared: ServerShared, ready: ReadySender) {
    let transport = match TcpTransport::bind(&config.bind_addr).await {
        Ok(t) => t,
        Err(e) => {
            error!(addr = %config.bind_addr, error = %e, "failed to bind");
            let _ = ready.send(Err(e));
            return;
        }
    };
    let taken = shared.roster.clone();
    let mut transport = transport.with_id_filter(move |id| taken.contains(id));

    match transport.local_addr() {
        Ok(addr) => {
            let _ = ready.send(Ok(addr));
        }
        Err(e) => {
            let _ = ready.send(Err(TransportError::Bind(e)));
            return;
        }
    }

    let tick = config.tick_config();
    let (members_tx, members_rx) = mpsc::unbounded_channel();
    let mut tasks = JoinSet::new();
    tasks.spawn_local(fan_out_broadcasts(
        shared.clone(),
        members_rx,
        tick,
        config.send_timeout,
    ));

    let mut ticks = TickScheduler::new(tick);
    loop {
        tokio::select! {
            accepted = transport.accept() => match accepted {
                Ok(conn) => {
                    let conn = Arc::new(conn);
                    let id = conn.id();
                    let client_data = Mailbox::single();
                    shared.roster.insert(id);
                    shared.add_client_data(id, client_data.clone());
                    let evict = Arc::new(Notify::new());
                    let peer = Peer {
                        conn: Arc::clone(&conn),
                        evict: Arc::clone(&evict),
                    };
                    let _ = members_tx.send(Membership::Joined(id, peer));
                    info!(%id, peer = %conn.peer_addr(), "client connected");
                    tasks.spawn_local(serve_connection(
                        conn,
                        evict,
                        shared.clone(),
                        client_data,
                        members_tx.clone(),
                        config.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "accept failed"),
            },
            _ = ticks.wait_for_tick() => {
                if shared.state.get() == ServerState::Exiting {
                    break;
                }
                while let Some(done) = tasks.try_join_next() {
                    if let Err(e) = done {
                        if e.is_panic() {
                            error!(error = %e, "network task panicked");
                        }
                    }
                }
            }
        }
    }

    drop(transport);
    // Every task watches the state and ends within a tick.
    while tasks.join_next().await.is_some() {}
    info!("server network worker stopped");
}

async fn serve_connection(
    conn: Arc<TcpConnection>,
    evict: Arc<Notify>,
    shared: ServerShared,
    client_data: Mailbox<Vec<u8>>,
    members: mpsc::UnboundedSender<Membership>,
    config: ServerConfig,
) {
    let id = conn.id();
    let responses = Mailbox::single();
    let tick = config.tick_config().tick_duration();

    let ended = tokio::select! {
        r = read_frames(&conn, &shared, &client_data, &responses, &config) => Some(r),
        r = deliver_responses(&conn, &shared, &responses, tick) => Some(r),
        () = evict.notified() => None,
    };

    shared.roster.remove(&id);
    shared.remove_client_data(&id);
    let _ = members.send(Membership::Left(id));
    let _ = conn.close().await;

    match ended {
        _ if shared.state.get() == ServerState::Exiting => debug!(%id, "connection closed on shutdown"),
        None => warn!(%id, "client fell behind on broadcasts, disconnected"),
        Some(Ok(())) => info!(%id, "client disconnected"),
        Some(Err(e)) if e.is_connection_lost() => info!(%id, error = %e, "client connection lost"),
        Some(Err(e)) => warn!(%id, error = %e, "client connection failed"),
    }
}

/// Routes every frame from the client by the current server state.
async fn read_frames(
    conn: &TcpConnection,
    shared: &ServerShared,
    client_data: &Mailbox<Vec<u8>>,
    responses: &Mailbox<Vec<u8>>,
    config: &ServerConfig,
) -> Result<(), TransportError> {
    let id = conn.id();
    while let Some(frame) = conn.recv().await? {
        match Route::for_state(shared.state.get()) {
            Route::Request => {
                let request = Request {
                    client: id,
                    payload: frame,
                    reply: responses.clone(),
                };
                if shared
                    .requests
                    .write_async(request, config.response_patience)
                    .await
                    .is_err()
                {
                    warn!(%id, "request queue full, dropping request");
                }
            }
            Route::PlayerData => {
                if client_data.push_latest(frame).is_some() {
                    trace!(%id, "overwrote unread player data");
                }
            }
            Route::Discard => debug!(%id, len = frame.len(), "discarding frame"),
        }
    }
    Ok(())
}

/// Sends handler replies back to the client until the server exits.
async fn deliver_responses(
    conn: &TcpConnection,
    shared: &ServerShared,
    responses: &Mailbox<Vec<u8>>,
    tick: Duration,
) -> Result<(), TransportError> {
    while shared.state.get() != ServerState::Exiting {
        if let Some(reply) = responses.read_async(tick).await {
            conn.send(&reply).await?;
        }
    }
    Ok(())
}

/// Sends every broadcast frame to all connected peers.
///
/// A peer that does not take a frame within `send_timeout` is evicted: a
/// half-written frame leaves its stream unusable, and a peer that stopped
/// reading must not hold up the others.
async fn fan_out_broadcasts(
    shared: ServerShared,
    mut members: mpsc::UnboundedReceiver<Membership>,
    tick: TickConfig,
    send_timeout: Duration,
) {
    let mut ticks = TickScheduler::new(tick);
    let mut peers: HashMap<ConnectionId, Peer> = HashMap::new();

    loop {
        tokio::select! {
            Some(event) = members.recv() => match event {
                Membership::Joined(id, peer) => {
                    peers.insert(id, peer);
                }
                Membership::Left(id) => {
                    peers.remove(&id);
                }
            },
            info = ticks.wait_for_tick() => {
                if shared.state.get() == ServerState::Exiting {
                    break;
                }
                for frame in shared.broadcast.drain() {
                    let frame = frame.as_slice();
                    let sends = peers.iter().map(|(id, peer)| async move {
                        (*id, tokio::time::timeout(send_timeout, peer.conn.send(frame)).await)
                    });
                    let results = join_all(sends).await;
                    for (id, result) in results {
                        match result {
                            Ok(Ok(())) => {}
                            Ok(Err(e)) => debug!(%id, error = %e, "broadcast send failed"),
                            Err(_) => {
                                warn!(%id, timeout = ?send_timeout, "broadcast send timed out, evicting");
                                if let Some(peer) = peers.remove(&id) {
                                    peer.evict.notify_one();
                                }
                            }
                        }
                    }
                    trace!(tick = info.tick, peers = peers.len(), "broadcast sent");
                }
            }
        }
    }
}
