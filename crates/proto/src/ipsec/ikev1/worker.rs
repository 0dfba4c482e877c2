//! Serialized async worker around [`QuickModeEngine`]
//!
//! Every protocol event (received datagram, timer expiry, local request) is
//! queued on one `mpsc` channel and processed by a single task, so no two
//! handlers ever run concurrently. Timer tasks only push events.
//!
//! # Example
//!
//! ```rust,no_run
//! use isakmp_proto::ipsec::config::EngineConfig;
//! use isakmp_proto::ipsec::ikev1::policy::MemoryPolicyStore;
//! use isakmp_proto::ipsec::ikev1::worker;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let policy = Arc::new(MemoryPolicyStore::new());
//!     let (handle, addr) =
//!         worker::bind(EngineConfig::default(), policy, "0.0.0.0:500".parse()?).await?;
//!     println!("IKE listening on {}", addr);
//!     // Phase 1 hands established SAs over with `handle.add_sa(..)`
//!     # drop(handle);
//!     Ok(())
//! }
//! ```

use super::constants::{ProtocolId, MAX_ISAKMP_MESSAGE_SIZE};
use super::engine::{Outcome, QuickModeEngine};
use super::ike_sa::IkeSaParams;
use super::message::Cookies;
use super::policy::PolicyStore;
use super::quick::Phase2Request;
use super::timer::{Scheduler, TimerKey};
use super::transport::Transport;
use crate::ipsec::config::EngineConfig;
use crate::ipsec::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Event processed by the worker
#[derive(Debug)]
pub enum Command {
    /// Datagram received from the network
    Datagram(Vec<u8>),
    /// Timer expired
    Timer(TimerKey),
    /// Register an IKE SA
    AddSa(IkeSaParams),
    /// Remove an IKE SA
    RemoveSa(Cookies),
    /// Start Quick Mode
    Initiate {
        /// IKE SA to run under
        cookies: Cookies,
        /// SAs to negotiate
        request: Phase2Request,
        /// Receives the message ID, or why the exchange could not start
        started: oneshot::Sender<Result<u32>>,
        /// Receives the final outcome
        done: oneshot::Sender<Outcome>,
    },
    /// Ask the peer to delete SAs
    Delete {
        /// IKE SA to send on
        cookies: Cookies,
        /// Protocol of the SAs
        protocol: ProtocolId,
        /// SPIs to delete
        spis: Vec<Vec<u8>>,
        /// Receives the send result
        reply: oneshot::Sender<Result<()>>,
    },
    /// Stop the worker
    Shutdown,
}

/// Cloneable sender side of a worker
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl WorkerHandle {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| Error::InvalidState("Worker stopped".into()))
    }

    /// Queue a received datagram
    pub fn deliver(&self, datagram: Vec<u8>) -> Result<()> {
        self.send(Command::Datagram(datagram))
    }

    /// Register an IKE SA produced by Phase 1
    pub fn add_sa(&self, params: IkeSaParams) -> Result<()> {
        self.send(Command::AddSa(params))
    }

    /// Remove an IKE SA
    pub fn remove_sa(&self, cookies: Cookies) -> Result<()> {
        self.send(Command::RemoveSa(cookies))
    }

    /// Start Quick Mode
    ///
    /// Returns the message ID and a receiver resolved when the exchange
    /// completes, fails or times out.
    pub async fn initiate(
        &self,
        cookies: Cookies,
        request: Phase2Request,
    ) -> Result<(u32, oneshot::Receiver<Outcome>)> {
        let (started_tx, started_rx) = oneshot::channel();
        let (done_tx, done_rx) = oneshot::channel();
        self.send(Command::Initiate {
            cookies,
            request,
            started: started_tx,
            done: done_tx,
        })?;
        let msg_id = started_rx
            .await
            .map_err(|_| Error::InvalidState("Worker stopped".into()))??;
        Ok((msg_id, done_rx))
    }

    /// Start Quick Mode and wait for its outcome
    pub async fn initiate_and_wait(
        &self,
        cookies: Cookies,
        request: Phase2Request,
    ) -> Result<Outcome> {
        let (_, done) = self.initiate(cookies, request).await?;
        done.await
            .map_err(|_| Error::InvalidState("Worker stopped".into()))
    }

    /// Ask the peer to delete SAs
    pub async fn send_delete(
        &self,
        cookies: Cookies,
        protocol: ProtocolId,
        spis: Vec<Vec<u8>>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Delete {
            cookies,
            protocol,
            spis,
            reply,
        })?;
        rx.await
            .map_err(|_| Error::InvalidState("Worker stopped".into()))?
    }

    /// Stop the worker once queued events are processed
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }
}

/// Create the command channel of a worker
pub fn channel() -> (WorkerHandle, mpsc::UnboundedReceiver<Command>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WorkerHandle { tx }, rx)
}

type TimerTasks = Arc<Mutex<HashMap<TimerKey, (u64, JoinHandle<()>)>>>;

/// Scheduler backed by `tokio::time::sleep` tasks
///
/// Expired timers are pushed to the worker as [`Command::Timer`].
#[derive(Debug)]
pub struct TokioScheduler {
    worker: WorkerHandle,
    runtime: tokio::runtime::Handle,
    tasks: TimerTasks,
    generation: AtomicU64,
}

impl TokioScheduler {
    /// Scheduler feeding `worker`, spawning on the current runtime
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(worker: WorkerHandle) -> Self {
        TokioScheduler {
            worker,
            runtime: tokio::runtime::Handle::current(),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
        }
    }

    /// Number of pending timers
    pub fn pending(&self) -> usize {
        lock(&self.tasks).len()
    }
}

fn lock(tasks: &TimerTasks) -> MutexGuard<'_, HashMap<TimerKey, (u64, JoinHandle<()>)>> {
    tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, key: TimerKey, delay: Duration) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let worker = self.worker.clone();
        let tasks = Arc::clone(&self.tasks);
        // Held across the spawn so a zero delay cannot fire before insertion
        let mut pending = lock(&self.tasks);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut tasks = lock(&tasks);
                if tasks.get(&key).map(|(g, _)| *g) == Some(generation) {
                    tasks.remove(&key);
                }
            }
            if worker.send(Command::Timer(key)).is_err() {
                debug!("Timer fired after worker stopped");
            }
        });
        if let Some((_, old)) = pending.insert(key, (generation, task)) {
            old.abort();
        }
    }

    fn cancel(&self, key: &TimerKey) {
        if let Some((_, task)) = lock(&self.tasks).remove(key) {
            task.abort();
        }
    }
}

/// Datagrams that may wait for the socket before sends are refused
pub const SEND_QUEUE_DEPTH: usize = 64;

/// Transport over a shared UDP socket
///
/// The engine never awaits, so datagrams are queued to a sender task that
/// waits at most `send_timeout` for socket buffer space per datagram. A full
/// queue is reported as `SendTimeout` and left to the retransmission timer.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    queue: mpsc::Sender<(SocketAddr, Vec<u8>)>,
}

impl UdpTransport {
    /// Start a sender task for `socket` on the current runtime
    pub fn new(socket: Arc<UdpSocket>, send_timeout: Duration) -> Self {
        let (queue, outbound) = mpsc::channel(SEND_QUEUE_DEPTH);
        tokio::spawn(send_loop(socket, outbound, send_timeout));
        UdpTransport { queue }
    }
}

impl Transport for UdpTransport {
    fn send(&self, peer: SocketAddr, datagram: &[u8]) -> Result<()> {
        match self.queue.try_send((peer, datagram.to_vec())) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::SendTimeout),
            Err(TrySendError::Closed(_)) => Err(Error::Io("UDP sender stopped".into())),
        }
    }
}

async fn send_loop(
    socket: Arc<UdpSocket>,
    mut outbound: mpsc::Receiver<(SocketAddr, Vec<u8>)>,
    send_timeout: Duration,
) {
    while let Some((peer, datagram)) = outbound.recv().await {
        match timeout(send_timeout, socket.send_to(&datagram, peer)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(peer = %peer, error = %e, "UDP send failed"),
            Err(_) => warn!(peer = %peer, len = datagram.len(), "UDP send timed out"),
        }
    }
    debug!("UDP sender stopped");
}

/// Single task owning the engine
pub struct Worker {
    engine: QuickModeEngine,
    commands: mpsc::UnboundedReceiver<Command>,
    waiters: HashMap<(Cookies, u32), oneshot::Sender<Outcome>>,
}

impl Worker {
    /// Worker processing `commands` with `engine`
    pub fn new(engine: QuickModeEngine, commands: mpsc::UnboundedReceiver<Command>) -> Self {
        Worker {
            engine,
            commands,
            waiters: HashMap::new(),
        }
    }

    /// Run on the current runtime
    pub fn spawn(self) -> JoinHandle<QuickModeEngine> {
        tokio::spawn(self.run())
    }

    /// Process events until shutdown or until every handle is dropped
    ///
    /// Returns the engine for inspection.
    pub async fn run(mut self) -> QuickModeEngine {
        while let Some(command) = self.commands.recv().await {
            if matches!(command, Command::Shutdown) {
                break;
            }
            self.dispatch(command);
            self.engine.drain_deferred();
            self.resolve_waiters();
        }
        debug!("Worker stopped");
        self.engine
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::Datagram(datagram) => {
                if let Err(e) = self.engine.handle_incoming(&datagram) {
                    debug!(error = %e, "Datagram rejected");
                }
            }
            Command::Timer(key) => {
                if let Err(e) = self.engine.handle_timer(key) {
                    debug!(error = %e, event = ?key.event, "Timer handling failed");
                }
            }
            Command::AddSa(params) => self.engine.add_sa(params),
            Command::RemoveSa(cookies) => {
                self.engine.remove_sa(&cookies);
            }
            Command::Initiate {
                cookies,
                request,
                started,
                done,
            } => match self.engine.initiate_quick_mode(&cookies, &request) {
                Ok(msg_id) => {
                    self.waiters.insert((cookies, msg_id), done);
                    let _ = started.send(Ok(msg_id));
                }
                Err(e) => {
                    let _ = started.send(Err(e));
                }
            },
            Command::Delete {
                cookies,
                protocol,
                spis,
                reply,
            } => {
                let _ = reply.send(self.engine.send_delete(&cookies, protocol, spis));
            }
            Command::Shutdown => {}
        }
    }

    fn resolve_waiters(&mut self) {
        for outcome in self.engine.take_outcomes() {
            if let Some(waiter) = self.waiters.remove(&(outcome.cookies(), outcome.msg_id())) {
                let _ = waiter.send(outcome);
            }
        }
        // Exchanges whose IKE SA went away never report
        let engine = &self.engine;
        self.waiters.retain(|(cookies, _), _| engine.sa(cookies).is_some());
    }
}

/// Bind a UDP socket and start a worker with a receive loop on it
///
/// Returns the worker handle and the bound address.
pub async fn bind(
    config: EngineConfig,
    policy: Arc<dyn PolicyStore>,
    addr: SocketAddr,
) -> Result<(WorkerHandle, SocketAddr)> {
    let socket = Arc::new(UdpSocket::bind(addr).await?);
    let local_addr = socket.local_addr()?;

    let (handle, commands) = channel();
    let scheduler = Arc::new(TokioScheduler::new(handle.clone()));
    let transport = Arc::new(UdpTransport::new(
        Arc::clone(&socket),
        config.send_timeout,
    ));
    let engine = QuickModeEngine::new(config, policy, transport, scheduler)?;
    Worker::new(engine, commands).spawn();
    spawn_receiver(socket, handle.clone());

    info!(addr = %local_addr, "IKE worker started");
    Ok((handle, local_addr))
}

/// Forward datagrams from `socket` to the worker until it stops
pub fn spawn_receiver(socket: Arc<UdpSocket>, worker: WorkerHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_ISAKMP_MESSAGE_SIZE as usize];
        loop {
            match socket.recv_from(&mut buf).await {
                Ok((len, peer)) => {
                    debug!(peer = %peer, len, "Datagram received");
                    if worker.deliver(buf[..len].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "UDP receive failed");
                    break;
                }
            }
        }
    })
}
