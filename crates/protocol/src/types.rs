//! USB device and transfer type definitions
//!
//! These are the payload structures carried by control-channel frames and
//! device-channel transfers. Only identity and descriptor metadata is
//! modelled here; USB request blocks stay opaque bytes.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest device identifier accepted on the wire, in bytes
pub const MAX_DEVICE_ID_LEN: usize = 127;

/// Check that a device identifier is non-empty and within the wire limit
pub fn validate_device_id(device_id: &str) -> Result<()> {
    let len = device_id.len();
    if len == 0 || len > MAX_DEVICE_ID_LEN {
        return Err(ProtocolError::InvalidDeviceId {
            len,
            max: MAX_DEVICE_ID_LEN,
        });
    }
    Ok(())
}

/// Descriptor of a device being redirected (payload of a connect frame)
///
/// The `device_id` is assigned by the event source (e.g. a WebUSB client)
/// and is the key every later disconnect or transfer refers to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Externally supplied unique identifier
    pub device_id: String,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Human-readable product name
    pub name: String,
    /// Serial number string (empty if unknown)
    pub serial_number: String,
    /// USB device class
    pub class: u8,
    /// USB device subclass
    pub subclass: u8,
    /// USB device protocol
    pub protocol: u8,
    /// Interface description as reported by the event source
    pub interface_data: String,
}

impl DeviceDescriptor {
    /// Minimal descriptor carrying only an identifier and VID/PID
    pub fn new(device_id: impl Into<String>, vendor_id: u16, product_id: u16) -> Self {
        Self {
            device_id: device_id.into(),
            vendor_id,
            product_id,
            name: String::new(),
            serial_number: String::new(),
            class: 0,
            subclass: 0,
            protocol: 0,
            interface_data: String::new(),
        }
    }
}

/// Reference to a device by identifier (payload of a disconnect frame)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRef {
    pub device_id: String,
}

/// USB transfer types as named by the inbound event source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Interrupt,
    Bulk,
    Isochronous,
}

impl TransferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferKind::Control => "control",
            TransferKind::Interrupt => "interrupt",
            TransferKind::Bulk => "bulk",
            TransferKind::Isochronous => "isochronous",
        }
    }
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferKind {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "control" => Ok(TransferKind::Control),
            "interrupt" => Ok(TransferKind::Interrupt),
            "bulk" => Ok(TransferKind::Bulk),
            "isochronous" | "iso" => Ok(TransferKind::Isochronous),
            _ => Err(ProtocolError::UnknownTransferType(s.to_string())),
        }
    }
}

/// A chunk of device traffic addressed to one endpoint
///
/// Used both as the 0x03 control payload (which the control handler always
/// refuses) and as the framing written to a device's own channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTransfer {
    /// Device the data belongs to
    pub device_id: String,
    /// Endpoint number (direction bit included)
    pub endpoint: u8,
    /// Transfer type
    pub transfer_type: TransferKind,
    /// Raw transfer bytes, never interpreted here
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}
