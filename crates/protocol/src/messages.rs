//! Control channel message definitions
//!
//! Each control frame is one message type byte followed by a
//! type-specific payload:
//! - 0x01 device connect (payload: [`DeviceDescriptor`])
//! - 0x02 device disconnect (payload: [`DeviceRef`])
//! - 0x03 device data (payload: [`DeviceTransfer`]), which belongs on the
//!   device's own channel and is refused when seen on the control channel

use crate::error::ProtocolError;
use crate::types::{DeviceDescriptor, DeviceRef, DeviceTransfer};

/// Message type byte of a control frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    DeviceConnect = 0x01,
    DeviceDisconnect = 0x02,
    DeviceData = 0x03,
}

impl MessageType {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x01 => Ok(MessageType::DeviceConnect),
            0x02 => Ok(MessageType::DeviceDisconnect),
            0x03 => Ok(MessageType::DeviceData),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// A decoded control channel message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Request a dedicated channel for a newly attached device
    Connect(DeviceDescriptor),

    /// Tear down the channel of a detached device
    Disconnect(DeviceRef),

    /// Device traffic sent on the wrong channel
    Data(DeviceTransfer),
}

impl ControlMessage {
    /// Message type byte this message is framed with
    pub fn message_type(&self) -> MessageType {
        match self {
            ControlMessage::Connect(_) => MessageType::DeviceConnect,
            ControlMessage::Disconnect(_) => MessageType::DeviceDisconnect,
            ControlMessage::Data(_) => MessageType::DeviceData,
        }
    }

    /// Identifier of the device the message refers to
    pub fn device_id(&self) -> &str {
        match self {
            ControlMessage::Connect(desc) => &desc.device_id,
            ControlMessage::Disconnect(dev) => &dev.device_id,
            ControlMessage::Data(transfer) => &transfer.device_id,
        }
    }

    pub fn disconnect(device_id: impl Into<String>) -> Self {
        ControlMessage::Disconnect(DeviceRef {
            device_id: device_id.into(),
        })
    }
}
