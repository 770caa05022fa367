//! Control frame and device transfer serialization
//!
//! # Control Frame Format
//!
//! ```text
//! [Type: u8][Payload (postcard serialized, schema chosen by type)]
//! ```
//!
//! A frame with no type byte is [`ProtocolError::Empty`]. Unknown type bytes
//! are reported as [`ProtocolError::UnknownMessageType`] before the payload
//! is looked at, so callers can log and skip them.
//!
//! # Device Channel Format
//!
//! Data written to a device's own channel is a bare postcard
//! [`DeviceTransfer`] with no type byte.

use crate::error::Result;
use crate::messages::{ControlMessage, MessageType};
use crate::types::{DeviceDescriptor, DeviceRef, DeviceTransfer, validate_device_id};
use crate::ProtocolError;
use bytes::{BufMut, Bytes, BytesMut};

/// Encode a control message into a type-prefixed frame
///
/// # Example
/// ```
/// use protocol::{ControlMessage, encode_control};
///
/// let frame = encode_control(&ControlMessage::disconnect("dev-1")).unwrap();
/// assert_eq!(frame[0], 0x02);
/// ```
pub fn encode_control(message: &ControlMessage) -> Result<Bytes> {
    validate_device_id(message.device_id())?;

    let payload = match message {
        ControlMessage::Connect(desc) => postcard::to_allocvec(desc)?,
        ControlMessage::Disconnect(dev) => postcard::to_allocvec(dev)?,
        ControlMessage::Data(transfer) => postcard::to_allocvec(transfer)?,
    };

    let mut frame = BytesMut::with_capacity(1 + payload.len());
    frame.put_u8(message.message_type().as_byte());
    frame.extend_from_slice(&payload);
    Ok(frame.freeze())
}

/// Decode a type-prefixed control frame
///
/// # Example
/// ```
/// use protocol::{ControlMessage, DeviceDescriptor, decode_control, encode_control};
///
/// let msg = ControlMessage::Connect(DeviceDescriptor::new("dev-1", 0x1234, 0x5678));
/// let frame = encode_control(&msg).unwrap();
/// assert_eq!(decode_control(&frame).unwrap(), msg);
/// ```
pub fn decode_control(frame: &[u8]) -> Result<ControlMessage> {
    let (&type_byte, payload) = frame.split_first().ok_or(ProtocolError::Empty)?;

    let message = match MessageType::try_from(type_byte)? {
        MessageType::DeviceConnect => {
            ControlMessage::Connect(postcard::from_bytes::<DeviceDescriptor>(payload)?)
        }
        MessageType::DeviceDisconnect => {
            ControlMessage::Disconnect(postcard::from_bytes::<DeviceRef>(payload)?)
        }
        MessageType::DeviceData => {
            ControlMessage::Data(postcard::from_bytes::<DeviceTransfer>(payload)?)
        }
    };

    validate_device_id(message.device_id())?;
    Ok(message)
}

/// Peek at the message type of a frame without decoding its payload
pub fn peek_message_type(frame: &[u8]) -> Result<MessageType> {
    let type_byte = *frame.first().ok_or(ProtocolError::Empty)?;
    MessageType::try_from(type_byte)
}

/// Encode a transfer for a device channel
pub fn encode_transfer(transfer: &DeviceTransfer) -> Result<Bytes> {
    validate_device_id(&transfer.device_id)?;
    Ok(Bytes::from(postcard::to_allocvec(transfer)?))
}

/// Decode a transfer read from a device channel
pub fn decode_transfer(bytes: &[u8]) -> Result<DeviceTransfer> {
    let transfer: DeviceTransfer = postcard::from_bytes(bytes)?;
    validate_device_id(&transfer.device_id)?;
    Ok(transfer)
}
