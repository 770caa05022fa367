//! Multiplexer error types
//!
//! Every failure except control-channel and plugin registration is handled
//! where it happens: logged at the severity below, no state mutated, and an
//! OK status returned to the transport.
//!
//! | Variant | Level |
//! |---|---|
//! | `FeatureDisabled`, `DuplicateDevice`, `UnknownDevice`, `DataOnControlChannel`, `InvalidPayload`, `ChannelNotReady`, `ChannelWrite`, `NotInitialized` | warn |
//! | `SlotsExhausted`, `ChannelRegistration`, `Slot`, `ControlRegistration`, `PluginRegistration` | error |
//! | `UnknownMessageType` | debug |
//! | `MalformedMessage` | trace |

use crate::slots::{SlotError, SlotIndex};
use crate::transport::ResultCode;
use protocol::ProtocolError;
use thiserror::Error;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Error)]
pub enum MuxError {
    /// USB redirection is switched off for this session
    #[error("USB redirection is not enabled for this connection")]
    FeatureDisabled,

    /// Connect for a device that already has a slot
    #[error("Device {device_id} already has channel at slot {slot}")]
    DuplicateDevice { device_id: String, slot: SlotIndex },

    /// Connect while every slot is taken
    #[error("No free slots for device {device_id} (capacity {capacity})")]
    SlotsExhausted { device_id: String, capacity: usize },

    /// Transport refused the device channel listener
    #[error("Failed to create device channel {channel_name}: {code}")]
    ChannelRegistration {
        channel_name: String,
        code: ResultCode,
    },

    /// Disconnect or data for a device without a slot
    #[error("Device {device_id} not found")]
    UnknownDevice { device_id: String },

    /// Control frame without a message type byte
    #[error("Malformed control message: no message type byte")]
    MalformedMessage,

    /// Control frame with an unrecognized message type byte
    #[error("Unknown control message type: {0:#04x}")]
    UnknownMessageType(u8),

    /// Device data sent on the control channel instead of the device channel
    #[error("Data message for device {device_id} received on control channel - should use device channel")]
    DataOnControlChannel { device_id: String },

    /// Payload that does not match the schema of its message type
    #[error("Invalid control payload: {0}")]
    InvalidPayload(ProtocolError),

    /// Device known but its channel is not open
    #[error("Device {device_id} has no open channel at slot {slot}")]
    ChannelNotReady { device_id: String, slot: SlotIndex },

    /// Transport refused a write to a device channel
    #[error("Write to device channel of {device_id} failed: {code}")]
    ChannelWrite { device_id: String, code: ResultCode },

    /// Event arrived before the plugin was loaded and initialized
    #[error("USB plugin is not initialized")]
    NotInitialized,

    /// Slot table refused a mutation
    #[error("Slot table error: {0}")]
    Slot(#[from] SlotError),

    /// Control channel listener could not be registered (fatal)
    #[error("Failed to create USB control channel: {0}")]
    ControlRegistration(ResultCode),

    /// Plugin could not be registered with the transport (fatal)
    #[error("Failed to register USB plugin: {0}")]
    PluginRegistration(ResultCode),
}

impl From<ProtocolError> for MuxError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Empty => MuxError::MalformedMessage,
            ProtocolError::UnknownMessageType(byte) => MuxError::UnknownMessageType(byte),
            other => MuxError::InvalidPayload(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, MuxError>;

impl MuxError {
    /// Whether the error aborts plugin startup
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MuxError::ControlRegistration(_) | MuxError::PluginRegistration(_)
        )
    }

    /// Status reported across the transport boundary
    ///
    /// Fatal errors surface the transport's own code; everything else was
    /// handled locally and reports OK.
    pub fn result_code(&self) -> ResultCode {
        match self {
            MuxError::ControlRegistration(code) | MuxError::PluginRegistration(code) => *code,
            _ => ResultCode::OK,
        }
    }

    /// Log the error at the severity its kind calls for
    pub fn log(&self) {
        match self {
            MuxError::MalformedMessage => trace!("{}", self),
            MuxError::UnknownMessageType(_) => debug!("{}", self),
            MuxError::SlotsExhausted { .. }
            | MuxError::ChannelRegistration { .. }
            | MuxError::Slot(_)
            | MuxError::ControlRegistration(_)
            | MuxError::PluginRegistration(_) => error!("{}", self),
            _ => warn!("{}", self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_mapping() {
        assert!(matches!(
            MuxError::from(ProtocolError::Empty),
            MuxError::MalformedMessage
        ));
        assert!(matches!(
            MuxError::from(ProtocolError::UnknownMessageType(0x09)),
            MuxError::UnknownMessageType(0x09)
        ));
        assert!(matches!(
            MuxError::from(ProtocolError::InvalidDeviceId { len: 0, max: 127 }),
            MuxError::InvalidPayload(_)
        ));
    }

    #[test]
    fn test_only_registration_is_fatal() {
        let handled = [
            MuxError::FeatureDisabled,
            MuxError::UnknownDevice {
                device_id: "x".to_string(),
            },
            MuxError::SlotsExhausted {
                device_id: "x".to_string(),
                capacity: 16,
            },
            MuxError::ChannelRegistration {
                channel_name: "URBDRC_00".to_string(),
                code: ResultCode::NO_MEMORY,
            },
            MuxError::MalformedMessage,
        ];
        for err in handled {
            assert!(!err.is_fatal(), "{}", err);
            assert_eq!(err.result_code(), ResultCode::OK);
        }

        let fatal = MuxError::ControlRegistration(ResultCode::ALREADY_OPEN);
        assert!(fatal.is_fatal());
        assert_eq!(fatal.result_code(), ResultCode::ALREADY_OPEN);
    }

    #[test]
    fn test_display_names_the_device() {
        let err = MuxError::DuplicateDevice {
            device_id: "webusb-1".to_string(),
            slot: SlotIndex(3),
        };
        assert_eq!(
            err.to_string(),
            "Device webusb-1 already has channel at slot 3"
        );
    }
}
