use std::fmt;

// ---------------------------------------------------------------------------
// Inbound command type
// ---------------------------------------------------------------------------

/// A remote command received on the command topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    PowerOn,
    PowerOff,
    Unrecognized(Vec<u8>),
}

impl Command {
    /// Parse a command payload. Only the exact ASCII bytes `ON` / `OFF` are
    /// recognised.
    pub(crate) fn parse(payload: &[u8]) -> Self {
        match payload {
            b"ON" => Self::PowerOn,
            b"OFF" => Self::PowerOff,
            other => Self::Unrecognized(other.to_vec()),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => write!(f, "ON"),
            Self::PowerOff => write!(f, "OFF"),
            Self::Unrecognized(raw) => write!(f, "unrecognized '{}'", String::from_utf8_lossy(raw)),
        }
    }
}

// ---------------------------------------------------------------------------
// Topic / payload helpers
// ---------------------------------------------------------------------------

/// Parse a message delivered on `topic`. Anything that did not arrive on the
/// command topic is never acted on.
pub(crate) fn parse_command(command_topic: &str, topic: &str, payload: &[u8]) -> Command {
    if topic != command_topic {
        return Command::Unrecognized(payload.to_vec());
    }
    Command::parse(payload)
}

// ===========================================================================
// Tests
// ===========================================================================
