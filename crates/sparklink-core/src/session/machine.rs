//! Session state machine
//!
//! Pure reaction logic: the async driver feeds it decoded packets and
//! control steps, and it answers with the events to publish. It owns the
//! held map, the transfer in progress and the last telemetry sample.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::publisher::SessionEvent;
use crate::map::{IgnitionMap, MapReassembler};
use crate::protocol::{Command, Packet, SyncStats};
use crate::telemetry::TelemetrySample;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No transport, or the last session aborted
    Disconnected,
    /// Sync request sent, waiting for the echo
    WaitSync,
    /// Device answered the sync request
    SyncComplete,
    /// Map requested; fragments are being received
    MapRequested,
    /// Map received; map upload and telemetry polling run here
    ReadyForData,
}

/// Frame counters for one session
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Frames written to the device
    pub tx_frames: u64,
    /// Valid frames read from the device
    pub rx_frames: u64,
    /// Synchronizer counters
    pub sync: SyncStats,
}

/// Session state plus everything it guards
#[derive(Debug)]
pub struct SessionCore {
    state: SessionState,
    map: IgnitionMap,
    transfer: Option<MapReassembler>,
    telemetry: Option<TelemetrySample>,
    stats: LinkStats,
}

impl Default for SessionCore {
    fn default() -> Self {
        Self::new(IgnitionMap::default())
    }
}

impl SessionCore {
    /// Create a disconnected session holding `map`
    pub fn new(map: IgnitionMap) -> Self {
        Self {
            state: SessionState::Disconnected,
            map,
            transfer: None,
            telemetry: None,
            stats: LinkStats::default(),
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Last completed map
    pub fn map(&self) -> &IgnitionMap {
        &self.map
    }

    /// Last decoded telemetry sample
    pub fn telemetry(&self) -> Option<TelemetrySample> {
        self.telemetry
    }

    /// Frame counters
    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    /// Whether a map transfer is in progress
    pub fn transfer_active(&self) -> bool {
        self.transfer.is_some()
    }

    /// Rows that have received data in the current transfer
    pub fn transfer_rows_started(&self) -> usize {
        self.transfer.as_ref().map_or(0, MapReassembler::rows_started)
    }

    fn set_state(&mut self, state: SessionState, events: &mut Vec<SessionEvent>) {
        if self.state != state {
            debug!("Session state {:?} -> {:?}", self.state, state);
            self.state = state;
            events.push(SessionEvent::StateChanged(state));
        }
    }

    /// Transport is up: reset and wait for sync
    pub fn connect(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.transfer = None;
        self.stats = LinkStats::default();
        self.set_state(SessionState::WaitSync, &mut events);
        events
    }

    /// Open a map transfer seeded from the held map
    pub fn begin_map_request(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        self.transfer = Some(MapReassembler::new(self.map.clone()));
        self.set_state(SessionState::MapRequested, &mut events);
        events
    }

    /// Drop any transfer in progress and fall back to `Disconnected`
    pub fn abort(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        if self.transfer.take().is_some() {
            info!("Discarding incomplete map transfer");
        }
        self.set_state(SessionState::Disconnected, &mut events);
        events
    }

    /// Count a frame written by the control path
    pub fn record_tx(&mut self) {
        self.stats.tx_frames += 1;
    }

    /// Count a frame read by the inbound path
    pub fn record_rx(&mut self, sync: SyncStats) {
        self.stats.rx_frames += 1;
        self.stats.sync = sync;
    }

    /// React to one decoded packet
    pub fn handle_packet(&mut self, packet: &Packet) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        let Some(command) = packet.known_command() else {
            warn!("Unknown command received: {:#04x}", packet.command);
            return events;
        };

        match (command, self.state) {
            (Command::Sync, SessionState::WaitSync) => {
                info!("Sync response received");
                self.set_state(SessionState::SyncComplete, &mut events);
            }
            (Command::GetData, _) => {
                match TelemetrySample::decode(packet.effective_payload()) {
                    Ok(sample) => {
                        debug!(
                            "Live data: rpm={} spark={} delay={}us throttle={} voltage={}",
                            sample.rpm,
                            sample.spark_angle,
                            sample.delay_us,
                            sample.throttle,
                            sample.voltage
                        );
                        self.telemetry = Some(sample);
                        events.push(SessionEvent::TelemetryUpdated(sample));
                    }
                    Err(e) => warn!("Discarding live data frame: {}", e),
                }
            }
            (Command::MapDataPacket, SessionState::MapRequested) => {
                if let Some(transfer) = self.transfer.as_mut() {
                    if let Err(e) = transfer.apply_fragment(packet.effective_payload()) {
                        warn!("Discarding map fragment: {}", e);
                    }
                }
            }
            (Command::MapTransferComplete, SessionState::MapRequested) => {
                if let Some(transfer) = self.transfer.take() {
                    info!(
                        "Map transfer completed ({} rows received)",
                        transfer.rows_started()
                    );
                    self.map = transfer.finish();
                }
                self.set_state(SessionState::ReadyForData, &mut events);
                events.push(SessionEvent::MapUpdated(Box::new(self.map.clone())));
            }
            (command, state) => {
                debug!("Ignoring {:?} in state {:?}", command, state);
            }
        }

        events
    }

    /// Held map for a dashboard refresh; only served once the map is complete
    pub fn map_for_refresh(&self) -> Option<IgnitionMap> {
        (self.state == SessionState::ReadyForData).then(|| self.map.clone())
    }
}
