//! # SparkLink Core Library
//!
//! Host-side engine for talking to a SparkLink ignition unit.

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - 64-byte frame encoding with CRC-16 and stream resynchronization
//! - Ignition map transfer in row fragments, both directions
//! - Live telemetry decoding
//! - A session driver: sync, map exchange, then live data polling
//! - A simulated device for running without hardware
//!
//! ## Example
//!
//! ```rust,ignore
//! use sparklink_core::protocol::open_port;
//! use sparklink_core::session::{Session, SessionConfig, SessionEvent};
//!
//! let port = open_port("/dev/ttyUSB0", None)?;
//! let session = Session::new(port, SessionConfig::default());
//! let mut events = session.handle().subscribe();
//!
//! tokio::spawn(session.run());
//! while let Ok(event) = events.recv().await {
//!     if let SessionEvent::TelemetryUpdated(sample) = event {
//!         println!("RPM: {}", sample.rpm);
//!     }
//! }
//! ```

pub mod demo;
pub mod map;
pub mod protocol;
pub mod session;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::demo::DemoDevice;
    pub use crate::map::{IgnitionMap, MapStore};
    pub use crate::protocol::{Command, Frame, FrameSynchronizer, Packet, ProtocolError};
    pub use crate::session::{
        Session, SessionConfig, SessionError, SessionEvent, SessionHandle, SessionState,
    };
    pub use crate::telemetry::TelemetrySample;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
