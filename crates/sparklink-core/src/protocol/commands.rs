//! Protocol commands
//!
//! Defines the command codes understood by the ignition unit.

use serde::{Deserialize, Serialize};

/// Protocol commands for device communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Sync request; the device answers with the same code
    Sync,

    /// Request one live telemetry sample
    GetData,

    /// Ask the device to stream its ignition map
    GetIgnitionMap,

    /// One fragment of a map row, device to host
    MapDataPacket,

    /// End of a map transfer, in either direction
    MapTransferComplete,

    /// One fragment of a map row, host to device
    SendMapData,
}

impl Command {
    /// All known commands
    pub const ALL: [Command; 6] = [
        Command::Sync,
        Command::GetData,
        Command::GetIgnitionMap,
        Command::MapDataPacket,
        Command::MapTransferComplete,
        Command::SendMapData,
    ];

    /// Get the wire code for this command
    pub fn code(&self) -> u8 {
        match self {
            Command::Sync => 0x3A,
            Command::GetData => 0x3B,
            Command::GetIgnitionMap => 0x3C,
            Command::MapDataPacket => 0x3D,
            Command::MapTransferComplete => 0x3E,
            Command::SendMapData => 0x3F,
        }
    }

    /// Look up a command by wire code
    pub fn from_code(code: u8) -> Option<Command> {
        Self::ALL.iter().copied().find(|cmd| cmd.code() == code)
    }
}

impl From<Command> for u8 {
    fn from(cmd: Command) -> Self {
        cmd.code()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_unique() {
        for (i, a) in Command::ALL.iter().enumerate() {
            for b in &Command::ALL[i + 1..] {
                assert_ne!(a.code(), b.code(), "{:?} and {:?} share a code", a, b);
            }
        }
    }

    #[test]
    fn test_from_code() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_code(cmd.code()), Some(cmd));
        }
        assert_eq!(Command::from_code(0x00), None);
        assert_eq!(Command::from_code(0x40), None);
    }
}
