//! Device session
//!
//! Drives one connection from handshake to steady-state polling:
//!
//! 1. send sync, wait for the echo (5 s)
//! 2. request the map, collect fragments until transfer-complete (30 s)
//! 3. persist the map and send it back to the device, fragment by fragment
//! 4. poll live data every 100 ms until cancelled
//!
//! Two activities share the session: the inbound path turns transport
//! bytes into frames and feeds [`SessionCore`], and the control path sends
//! commands and waits on state changes. The core sits behind one mutex, so
//! each frame's reaction is atomic and the published map is never a table
//! in the middle of reassembly.

mod machine;
mod publisher;

pub use machine::{LinkStats, SessionCore, SessionState};
pub use publisher::{Publisher, SessionEvent};

use futures::{SinkExt, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::map::{chunk_map, IgnitionMap, MapStore};
use crate::protocol::{Command, Frame, FrameSynchronizer, Packet, ProtocolError, Transport};
use crate::telemetry::TelemetrySample;

/// Zero-length intervals are raised to this
const MIN_TICK: Duration = Duration::from_millis(1);

/// Errors that end a session or reject a request
#[derive(Error, Debug)]
pub enum SessionError {
    /// Device never echoed the sync request
    #[error("No sync response within {0:?}")]
    SyncTimeout(Duration),

    /// Map request started but no transfer-complete arrived
    #[error("Map transfer did not complete within {0:?}")]
    MapTimeout(Duration),

    /// Request needs a state the session is not in
    #[error("Session not ready (state: {0:?})")]
    NotReady(SessionState),

    /// Device side hung up
    #[error("Transport closed")]
    TransportClosed,

    /// Framing or I/O failure
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Timing and persistence settings for a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for the sync echo
    pub sync_timeout: Duration,
    /// How long to wait for a full map transfer
    pub map_timeout: Duration,
    /// Interval between "still waiting" log lines during the map transfer
    pub wait_log_interval: Duration,
    /// Interval between live data requests
    pub poll_interval: Duration,
    /// Pause after each outbound map fragment
    pub fragment_delay: Duration,
    /// Log every n-th data request
    pub poll_log_every: u64,
    /// Events buffered per subscriber
    pub event_capacity: usize,
    /// JSON file the map is saved to and re-read from before upload
    pub map_path: Option<PathBuf>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sync_timeout: Duration::from_secs(5),
            map_timeout: Duration::from_secs(30),
            wait_log_interval: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            fragment_delay: Duration::from_millis(50),
            poll_log_every: 10,
            event_capacity: 64,
            map_path: None,
        }
    }
}

/// State shared by the inbound path, the control path and handles
struct Shared {
    core: Mutex<SessionCore>,
    state_tx: watch::Sender<SessionState>,
    publisher: Publisher,
    shutdown_tx: watch::Sender<bool>,
}

impl Shared {
    /// Run `f` on the core and publish its events while still holding the lock
    ///
    /// The state mirror is updated under the lock so that it can never go
    /// back to an older state than the core holds.
    async fn apply<F>(&self, f: F)
    where
        F: FnOnce(&mut SessionCore) -> Vec<SessionEvent>,
    {
        let mut core = self.core.lock().await;
        for event in f(&mut core) {
            if let SessionEvent::StateChanged(state) = event {
                self.state_tx.send_replace(state);
            }
            self.publisher.publish(event);
        }
    }

    /// Wait until the session reaches `target`, or give up at `timeout`
    async fn wait_for_state(
        &self,
        target: SessionState,
        timeout: Duration,
        log_every: Duration,
    ) -> bool {
        let started = Instant::now();
        let mut rx = self.state_tx.subscribe();
        let reached = time::timeout_at(started + timeout, async move {
            rx.wait_for(|s| *s == target).await.is_ok()
        });
        tokio::pin!(reached);

        let log_every = log_every.max(MIN_TICK);
        let mut ticker = time::interval_at(started + log_every, log_every);
        loop {
            tokio::select! {
                res = &mut reached => return res.unwrap_or(false),
                _ = ticker.tick() => {
                    let rows = self.core.lock().await.transfer_rows_started();
                    info!(
                        "Still waiting for {:?}... {:.1} seconds ({} map rows started)",
                        target,
                        started.elapsed().as_secs_f32(),
                        rows
                    );
                }
            }
        }
    }
}

/// Cheap clonable view of a running session
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Current state
    pub fn state(&self) -> SessionState {
        *self.shared.state_tx.borrow()
    }

    /// Receiver that follows state changes
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribe to telemetry, map and state events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.publisher.subscribe()
    }

    /// Last telemetry sample
    pub async fn telemetry(&self) -> Option<TelemetrySample> {
        self.shared.core.lock().await.telemetry()
    }

    /// Last completed map
    pub async fn map(&self) -> IgnitionMap {
        self.shared.core.lock().await.map().clone()
    }

    /// Frame counters
    pub async fn stats(&self) -> LinkStats {
        self.shared.core.lock().await.stats()
    }

    /// Re-publish the held map; only honored in `ReadyForData`
    ///
    /// The device is not asked for the map again.
    pub async fn request_map_refresh(&self) -> Result<(), SessionError> {
        let core = self.shared.core.lock().await;
        match core.map_for_refresh() {
            Some(map) => {
                info!("Map refresh requested");
                self.shared
                    .publisher
                    .publish(SessionEvent::MapUpdated(Box::new(map)));
                Ok(())
            }
            None => Err(SessionError::NotReady(core.state())),
        }
    }

    /// Ask the session to stop; `run` returns `Ok(())`
    pub fn shutdown(&self) {
        self.shared.shutdown_tx.send_replace(true);
    }
}

/// One device session over a transport
pub struct Session<T> {
    transport: T,
    config: SessionConfig,
    shared: Arc<Shared>,
}

impl<T: Transport> Session<T> {
    /// Create a session with an all-zero held map
    pub fn new(transport: T, config: SessionConfig) -> Self {
        Self::with_map(transport, config, IgnitionMap::default())
    }

    /// Create a session holding `map` until the device sends its own
    pub fn with_map(transport: T, config: SessionConfig, map: IgnitionMap) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            core: Mutex::new(SessionCore::new(map)),
            state_tx,
            publisher: Publisher::new(config.event_capacity),
            shutdown_tx,
        });

        Self {
            transport,
            config,
            shared,
        }
    }

    /// Handle for observers and control requests
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Run the session until it fails or is shut down
    ///
    /// Polling never ends on its own, so this only returns `Ok(())` after
    /// [`SessionHandle::shutdown`]. Timeouts and transport loss come back as
    /// errors; the caller decides whether to reconnect.
    pub async fn run(self) -> Result<(), SessionError> {
        let Session {
            transport,
            config,
            shared,
        } = self;

        let (reader, writer) = tokio::io::split(transport);
        let mut shutdown_rx = shared.shutdown_tx.subscribe();

        let result = tokio::select! {
            err = inbound(reader, &shared) => Err(err),
            res = control(writer, &shared, &config) => res,
            _ = async { shutdown_rx.wait_for(|stop| *stop).await.is_ok() } => {
                info!("Session shutdown requested");
                Ok(())
            }
        };

        if let Err(e) = &result {
            error!("Session aborted: {}", e);
        }
        shared.apply(SessionCore::abort).await;
        result
    }
}

/// Inbound path: frames in arrival order, one reaction at a time
async fn inbound<R>(reader: R, shared: &Shared) -> SessionError
where
    R: AsyncRead + Unpin,
{
    let mut frames = FramedRead::new(reader, FrameSynchronizer::new());

    while let Some(item) = frames.next().await {
        let frame = match item {
            Ok(frame) => frame,
            Err(e) => return e.into(),
        };
        let packet = Packet::from_frame(&frame);
        debug!(
            "Received command {:#04x}, response {:#04x}",
            packet.command, packet.response_code
        );

        let sync = frames.decoder().stats();
        shared
            .apply(|core| {
                core.record_rx(sync);
                core.handle_packet(&packet)
            })
            .await;
    }

    SessionError::TransportClosed
}

/// Outbound half of the transport
struct Link<W> {
    frames: FramedWrite<W, FrameSynchronizer>,
}

impl<W: AsyncWrite + Unpin> Link<W> {
    async fn send(&mut self, frame: Frame, shared: &Shared) -> Result<(), SessionError> {
        let code = frame.command_code();
        self.frames.send(frame).await?;
        shared.core.lock().await.record_tx();
        debug!("Sent command {:#04x}", code);
        Ok(())
    }
}

/// Control path: handshake, map exchange, then polling forever
async fn control<W>(
    writer: W,
    shared: &Shared,
    config: &SessionConfig,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut link = Link {
        frames: FramedWrite::new(writer, FrameSynchronizer::new()),
    };
    let store = config.map_path.clone().map(MapStore::new);

    info!("Step 1: synchronization");
    shared.apply(SessionCore::connect).await;
    link.send(Frame::command(Command::Sync), shared).await?;
    if !shared
        .wait_for_state(
            SessionState::SyncComplete,
            config.sync_timeout,
            config.wait_log_interval,
        )
        .await
    {
        return Err(SessionError::SyncTimeout(config.sync_timeout));
    }

    info!("Step 2: request ignition map");
    shared.apply(SessionCore::begin_map_request).await;
    link.send(Frame::command(Command::GetIgnitionMap), shared)
        .await?;
    if !shared
        .wait_for_state(
            SessionState::ReadyForData,
            config.map_timeout,
            config.wait_log_interval,
        )
        .await
    {
        return Err(SessionError::MapTimeout(config.map_timeout));
    }

    let received = shared.core.lock().await.map().clone();
    if let Some(outbound) = outbound_map(store, received).await {
        info!("Step 3: send ignition map back to the device");
        transmit_map(&mut link, &outbound, shared, config.fragment_delay).await?;
    }

    info!("Step 4: start data polling");
    let mut ticker = time::interval(config.poll_interval.max(MIN_TICK));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut requests: u64 = 0;
    loop {
        ticker.tick().await;
        link.send(Frame::command(Command::GetData), shared).await?;
        requests += 1;
        if config.poll_log_every > 0 && requests % config.poll_log_every == 0 {
            info!("Data polling: {} requests sent", requests);
        }
    }
}

/// Persist the received map and pick the table to upload
///
/// With a store the upload is whatever the file holds after saving, so an
/// unreadable file skips the upload instead of sending a bad table.
async fn outbound_map(store: Option<MapStore>, received: IgnitionMap) -> Option<IgnitionMap> {
    let Some(store) = store else {
        return Some(received);
    };

    let task = tokio::task::spawn_blocking(move || {
        match store.save(&received) {
            Ok(()) => info!("Ignition map saved to {}", store.path().display()),
            Err(e) => warn!("Failed to save ignition map to {}: {}", store.path().display(), e),
        }
        store.load().map_err(|e| (store.path().to_path_buf(), e))
    });

    match task.await {
        Ok(Ok(map)) => Some(map),
        Ok(Err((path, e))) => {
            warn!(
                "Failed to load {}: {}; skipping map upload",
                path.display(),
                e
            );
            None
        }
        Err(e) => {
            warn!("Map persistence task failed: {}; skipping map upload", e);
            None
        }
    }
}

/// Send every fragment with pacing, then the transfer-complete command
async fn transmit_map<W>(
    link: &mut Link<W>,
    map: &IgnitionMap,
    shared: &Shared,
    delay: Duration,
) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let mut sent = 0usize;
    for fragment in chunk_map(map) {
        link.send(fragment.to_packet().to_frame()?, shared).await?;
        sent += 1;
        time::sleep(delay).await;
    }

    link.send(Frame::command(Command::MapTransferComplete), shared)
        .await?;
    info!("Ignition map sent ({} fragments)", sent);
    Ok(())
}
