//! Wire protocol for the USB device-channel multiplexer
//!
//! This crate defines the frames exchanged on the control channel, the
//! framing of traffic written to per-device channels, and the naming scheme
//! for those channels. It performs no I/O.
//!
//! # Example
//!
//! ```
//! use protocol::{ControlMessage, DeviceDescriptor, decode_control, encode_control};
//!
//! let msg = ControlMessage::Connect(DeviceDescriptor::new("webusb-1", 0x0781, 0x5581));
//!
//! // Type byte first, postcard payload after
//! let frame = encode_control(&msg).unwrap();
//! assert_eq!(frame[0], 0x01);
//!
//! let decoded = decode_control(&frame).unwrap();
//! assert_eq!(decoded.device_id(), "webusb-1");
//! ```

pub mod codec;
pub mod error;
pub mod messages;
pub mod naming;
pub mod types;

pub use codec::{decode_control, decode_transfer, encode_control, encode_transfer, peek_message_type};
pub use error::{ProtocolError, Result};
pub use messages::{ControlMessage, MessageType};
pub use naming::{
    CONTROL_CHANNEL_NAME, DEFAULT_MAX_DEVICES, DEVICE_CHANNEL_PREFIX, MAX_SLOT_CAPACITY,
    PLUGIN_NAME, device_channel_name, parse_device_channel_name,
};
pub use types::{
    DeviceDescriptor, DeviceRef, DeviceTransfer, MAX_DEVICE_ID_LEN, TransferKind,
    validate_device_id,
};
