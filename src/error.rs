// raprs - Error Types
// Errors raised by each protocol layer, the link and the configuration

use std::io;

/// KISS deframing failures. The offending frame is discarded and the
/// deframer resynchronizes at the next FEND.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KissError {
    #[error("KISS frame sync lost: {0}")]
    FrameSync(String),
}

/// AX.25 encode/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Ax25Error {
    /// Fewer bytes than the address field plus control and PID require.
    #[error("short AX.25 frame: {len} bytes")]
    ShortFrame { len: usize },

    /// A callsign, SSID or address-field layout that cannot be represented.
    #[error("invalid AX.25 address \"{value}\": {reason}")]
    InvalidAddress { value: String, reason: String },

    /// Anything other than a UI frame with no layer 3 protocol.
    #[error("unsupported AX.25 frame type: control 0x{control:02x}, PID 0x{pid:02x}")]
    UnsupportedFrameType { control: u8, pid: u8 },
}

impl Ax25Error {
    pub(crate) fn invalid(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Ax25Error::InvalidAddress {
            value: value.into(),
            reason: reason.into(),
        }
    }
}

/// APRS payload grammar failures. Never fatal: `aprs::parse` turns these
/// into a `Raw` packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AprsError {
    #[error("malformed position: {0}")]
    MalformedPosition(String),
}

/// Errors returned to the owner of a `LinkController`.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error(transparent)]
    Ax25(#[from] Ax25Error),

    #[error("nothing to repeat: no {0} has been sent yet")]
    NothingToRepeat(&'static str),
}

/// Configuration loading, validation and saving failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read { path: String, source: io::Error },

    #[error("failed to write config file '{path}': {source}")]
    Write { path: String, source: io::Error },

    #[error("invalid config value for '{key}': {reason}")]
    Invalid { key: String, reason: String },

    #[error(transparent)]
    Address(#[from] Ax25Error),
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_invalid_address() {
        let err = Ax25Error::invalid("TOOLONGCALL", "callsign longer than 6 characters");
        assert_eq!(
            err.to_string(),
            "invalid AX.25 address \"TOOLONGCALL\": callsign longer than 6 characters"
        );
    }

    #[test]
    fn error_display_unsupported_frame() {
        let err = Ax25Error::UnsupportedFrameType { control: 0x2f, pid: 0xf0 };
        assert_eq!(
            err.to_string(),
            "unsupported AX.25 frame type: control 0x2f, PID 0xf0"
        );
    }

    #[test]
    fn error_display_nothing_to_repeat() {
        let err = LinkError::NothingToRepeat("message");
        assert_eq!(err.to_string(), "nothing to repeat: no message has been sent yet");
    }
}
