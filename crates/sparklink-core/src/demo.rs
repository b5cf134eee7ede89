//! Demo Mode - simulated ignition unit for testing
//!
//! Answers the wire protocol like the real device so the host and the
//! dashboard can run without hardware. Simulates an engine idling at
//! ~850 RPM with random throttle blips.

use futures::{SinkExt, StreamExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::map::{chunk_map, IgnitionMap, MapReassembler, MAP_SIZE};
use crate::protocol::{Command, Frame, FrameSynchronizer, Packet, ProtocolError, Transport};
use crate::telemetry::TelemetrySample;

const IDLE_RPM: f64 = 850.0;
const MAX_RPM: f64 = 6400.0;
const RAMP_UP_MS: u64 = 300;
const HOLD_MS: u64 = 200;
const RAMP_DOWN_MS: u64 = 800;

/// Crank angle at which the trigger fires, degrees before top dead centre
const TRIGGER_BTDC: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum BlipState {
    /// Engine idling normally
    Idle,
    /// Throttle opening, RPM rising
    RampUp { start_ms: u64 },
    /// At peak RPM, holding
    Hold { start_ms: u64 },
    /// Throttle closing, RPM falling
    RampDown { start_ms: u64 },
}

/// Engine model behind the simulated device
#[derive(Debug)]
struct Engine {
    /// Time of the first update (ms)
    start_ms: Option<u64>,
    /// Last update time (ms)
    last_update_ms: u64,
    /// Time of next throttle blip (ms from start)
    next_blip_at_ms: u64,
    blip_state: BlipState,
    /// Current RPM (smoothed)
    current_rpm: f64,
    /// Target RPM for current blip
    blip_target_rpm: f64,
}

impl Engine {
    fn new(rng: &mut StdRng) -> Self {
        Self {
            start_ms: None,
            last_update_ms: 0,
            next_blip_at_ms: rng.gen_range(8000..15000),
            blip_state: BlipState::Idle,
            current_rpm: IDLE_RPM,
            blip_target_rpm: IDLE_RPM,
        }
    }

    /// Advance to `elapsed_ms`; returns (rpm, throttle %, battery volts)
    fn update(&mut self, elapsed_ms: u64, rng: &mut StdRng) -> (f64, f64, f64) {
        let start = *self.start_ms.get_or_insert(elapsed_ms);
        let sim_time = elapsed_ms.saturating_sub(start);
        let delta_ms = elapsed_ms.saturating_sub(self.last_update_ms.max(start));
        self.last_update_ms = elapsed_ms;

        self.update_blip_state(sim_time, rng);

        // RPM/sec
        let target_rpm = self.target_rpm(sim_time);
        let rpm_rate = if target_rpm > self.current_rpm {
            8000.0
        } else {
            3000.0
        };
        let max_change = rpm_rate * (delta_ms as f64 / 1000.0);
        self.current_rpm += (target_rpm - self.current_rpm).clamp(-max_change, max_change);

        let t = sim_time as f64 / 1000.0;
        let idle_wobble = if self.blip_state == BlipState::Idle {
            20.0 * (t * 2.5).sin() + 10.0 * (t * 7.3).sin()
        } else {
            0.0
        };
        let rpm = (self.current_rpm + idle_wobble).clamp(0.0, MAX_RPM);

        let progress = (self.current_rpm - IDLE_RPM) / (self.blip_target_rpm - IDLE_RPM).max(1.0);
        let throttle = match self.blip_state {
            BlipState::Idle => 1.5 + 1.0 * (t * 0.3).sin().abs(),
            BlipState::RampUp { .. } => 2.0 + progress * 45.0,
            BlipState::Hold { .. } => 45.0 + 5.0 * (t * 3.0).sin(),
            BlipState::RampDown { .. } => 2.0 + progress * 40.0,
        };

        let battery = 13.8 + 0.2 * (t * 0.5).sin();

        (rpm, throttle.clamp(0.0, 100.0), battery)
    }

    fn update_blip_state(&mut self, sim_time: u64, rng: &mut StdRng) {
        match self.blip_state {
            BlipState::Idle => {
                if sim_time >= self.next_blip_at_ms {
                    self.blip_target_rpm = rng.gen_range(2000.0..4000.0);
                    self.blip_state = BlipState::RampUp { start_ms: sim_time };
                }
            }
            BlipState::RampUp { start_ms } => {
                if sim_time >= start_ms + RAMP_UP_MS {
                    self.blip_state = BlipState::Hold { start_ms: sim_time };
                }
            }
            BlipState::Hold { start_ms } => {
                if sim_time >= start_ms + HOLD_MS {
                    self.blip_state = BlipState::RampDown { start_ms: sim_time };
                }
            }
            BlipState::RampDown { start_ms } => {
                if sim_time >= start_ms + RAMP_DOWN_MS {
                    self.blip_state = BlipState::Idle;
                    self.next_blip_at_ms = sim_time + rng.gen_range(8000..15000);
                }
            }
        }
    }

    fn target_rpm(&self, sim_time: u64) -> f64 {
        match self.blip_state {
            BlipState::Idle => IDLE_RPM,
            BlipState::RampUp { start_ms } => {
                let ramp_ms = sim_time.saturating_sub(start_ms) as f64;
                let progress = (ramp_ms / RAMP_UP_MS as f64).min(1.0);
                IDLE_RPM + (self.blip_target_rpm - IDLE_RPM) * progress
            }
            BlipState::Hold { .. } => self.blip_target_rpm,
            BlipState::RampDown { start_ms } => {
                let ramp_ms = sim_time.saturating_sub(start_ms) as f64;
                let progress = (ramp_ms / RAMP_DOWN_MS as f64).min(1.0);
                self.blip_target_rpm + (IDLE_RPM - self.blip_target_rpm) * progress
            }
        }
    }
}

/// Plausible advance table: more advance with RPM, less with load
pub fn demo_map() -> IgnitionMap {
    IgnitionMap::from_fn(|row, col| {
        let rpm_part = 8.0 + col as f32 * 0.9;
        let load_part = row as f32 * 0.35;
        (rpm_part - load_part).clamp(5.0, 38.0)
    })
}

/// Simulated ignition unit
#[derive(Debug)]
pub struct DemoDevice {
    map: IgnitionMap,
    /// Upload from the host in progress
    upload: Option<MapReassembler>,
    /// Last map the host finished uploading
    received: Option<IgnitionMap>,
    engine: Engine,
    rng: StdRng,
}

impl Default for DemoDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoDevice {
    /// Create a device with the demo map and a random seed
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a device whose telemetry is reproducible
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(mut rng: StdRng) -> Self {
        Self {
            map: demo_map(),
            upload: None,
            received: None,
            engine: Engine::new(&mut rng),
            rng,
        }
    }

    /// Replace the map the device hands out
    pub fn with_map(mut self, map: IgnitionMap) -> Self {
        self.map = map;
        self
    }

    /// Map the device hands out on request
    pub fn map(&self) -> &IgnitionMap {
        &self.map
    }

    /// Last map uploaded by the host
    pub fn received_map(&self) -> Option<&IgnitionMap> {
        self.received.as_ref()
    }

    /// Sample at `elapsed_ms` since the device started
    pub fn sample(&mut self, elapsed_ms: u64) -> TelemetrySample {
        let (rpm, throttle, voltage) = self.engine.update(elapsed_ms, &mut self.rng);

        let col = ((rpm / MAX_RPM) * (MAP_SIZE - 1) as f64).round() as usize;
        let row = ((throttle / 100.0) * (MAP_SIZE - 1) as f64).round() as usize;
        let spark = self.map.get(row, col).unwrap_or(10.0) as f64;

        // Time from trigger to spark at this speed
        let us_per_degree = 1_000_000.0 / (rpm.max(1.0) * 6.0);
        let delay_us = ((TRIGGER_BTDC - spark).max(0.0) * us_per_degree) as u32;

        TelemetrySample {
            rpm: rpm.round() as u16,
            spark_angle: spark as f32,
            delay_us,
            throttle: throttle as f32,
            voltage: voltage as f32,
            timestamp: chrono::Utc::now(),
        }
    }

    /// Frames the device sends back for one inbound packet
    pub fn respond(&mut self, packet: &Packet, elapsed_ms: u64) -> Result<Vec<Frame>, ProtocolError> {
        let Some(command) = packet.known_command() else {
            warn!("Demo device: unknown command {:#04x}", packet.command);
            return Ok(Vec::new());
        };

        let replies = match command {
            Command::Sync => vec![Frame::command(Command::Sync)],
            Command::GetData => {
                let sample = self.sample(elapsed_ms);
                vec![Frame::encode(Command::GetData.code(), &sample.encode())?]
            }
            Command::GetIgnitionMap => {
                let mut frames = chunk_map(&self.map)
                    .map(|f| Packet::new(Command::MapDataPacket, f.to_payload()).to_frame())
                    .collect::<Result<Vec<_>, _>>()?;
                frames.push(Frame::command(Command::MapTransferComplete));
                frames
            }
            Command::SendMapData => {
                let seed = self.map.clone();
                let upload = self.upload.get_or_insert_with(|| MapReassembler::new(seed));
                if let Err(e) = upload.apply_fragment(packet.effective_payload()) {
                    warn!("Demo device: bad map fragment: {}", e);
                }
                Vec::new()
            }
            Command::MapTransferComplete => {
                if let Some(upload) = self.upload.take() {
                    info!(
                        "Demo device: map upload finished ({} rows)",
                        upload.rows_complete()
                    );
                    self.received = Some(upload.finish());
                }
                Vec::new()
            }
            Command::MapDataPacket => {
                debug!("Demo device: ignoring MapDataPacket from host");
                Vec::new()
            }
        };

        Ok(replies)
    }

    /// Serve the protocol over `transport` until the host hangs up
    pub async fn serve<T: Transport>(&mut self, transport: T) -> Result<(), ProtocolError> {
        let started = Instant::now();
        let mut framed = Framed::new(transport, FrameSynchronizer::new());
        info!("Demo device online");

        while let Some(frame) = framed.next().await {
            let packet = Packet::from_frame(&frame?);
            let elapsed_ms = started.elapsed().as_millis() as u64;
            for reply in self.respond(&packet, elapsed_ms)? {
                framed.feed(reply).await?;
            }
            framed.flush().await?;
        }

        info!("Demo device: host disconnected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::fragments_per_map;

    #[test]
    fn test_sync_is_echoed() {
        let mut device = DemoDevice::with_seed(1);
        let replies = device
            .respond(&Packet::new(Command::Sync, vec![]), 0)
            .unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].known_command(), Some(Command::Sync));
    }

    #[test]
    fn test_map_request_streams_whole_map() {
        let mut device = DemoDevice::with_seed(1);
        let replies = device
            .respond(&Packet::new(Command::GetIgnitionMap, vec![]), 0)
            .unwrap();
        assert_eq!(replies.len(), fragments_per_map() + 1);
        assert!(replies[..fragments_per_map()]
            .iter()
            .all(|f| f.known_command() == Some(Command::MapDataPacket)));
        assert_eq!(
            replies.last().and_then(Frame::known_command),
            Some(Command::MapTransferComplete)
        );

        let mut assembled = MapReassembler::new(IgnitionMap::default());
        for frame in &replies[..fragments_per_map()] {
            assembled.apply_fragment(frame.payload()).unwrap();
        }
        assert_eq!(&assembled.finish(), device.map());
    }

    #[test]
    fn test_upload_is_absorbed() {
        let mut device = DemoDevice::with_seed(1);
        let uploaded = IgnitionMap::from_fn(|row, col| (row + col) as f32 / 4.0);

        for fragment in chunk_map(&uploaded) {
            assert!(device.respond(&fragment.to_packet(), 0).unwrap().is_empty());
        }
        assert!(device.received_map().is_none());

        device
            .respond(&Packet::new(Command::MapTransferComplete, vec![]), 0)
            .unwrap();
        assert_eq!(device.received_map(), Some(&uploaded));
    }

    #[test]
    fn test_live_data_decodes() {
        let mut device = DemoDevice::with_seed(7);
        let replies = device
            .respond(&Packet::new(Command::GetData, vec![]), 500)
            .unwrap();
        let sample = TelemetrySample::decode(Packet::from_frame(&replies[0]).effective_payload())
            .unwrap();
        assert!(sample.rpm > 700 && sample.rpm < 1000);
        assert!(sample.voltage > 13.0 && sample.voltage < 14.5);
    }

    #[test]
    fn test_idle_rpm_range() {
        let mut device = DemoDevice::with_seed(42);

        // First blip is at least 8 s away
        for ms in (0..3000).step_by(100) {
            let sample = device.sample(ms);
            assert!(
                sample.rpm > 700 && sample.rpm < 1000,
                "RPM {} out of idle range",
                sample.rpm
            );
            assert!(sample.throttle < 5.0);
        }
    }

    #[test]
    fn test_blip_raises_rpm() {
        let mut device = DemoDevice::with_seed(3);
        let peak = (0..20_000u64)
            .step_by(50)
            .map(|ms| device.sample(ms).rpm)
            .max()
            .unwrap();
        assert!(peak > 1500, "no throttle blip within 20 s (peak {})", peak);
    }

    #[test]
    fn test_sample_tolerates_time_going_backwards() {
        let mut device = DemoDevice::with_seed(3);
        // Run into the first blip, then ask for earlier points in time
        let in_blip = (0..20_000u64)
            .step_by(50)
            .find(|&ms| device.sample(ms).rpm > 1500)
            .unwrap();
        for ms in [in_blip - 50, in_blip - 200, 0] {
            let sample = device.sample(ms);
            assert!(sample.rpm > 0);
        }
    }
}
