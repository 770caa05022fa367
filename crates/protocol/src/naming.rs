//! Channel and plugin naming
//!
//! Device channel names are derived only from the slot index, never from the
//! device id, so every name a session hands out is unique and predictable.

/// Name of the per-session control channel
pub const CONTROL_CHANNEL_NAME: &str = "URBDRC";

/// Prefix of every per-device channel name
pub const DEVICE_CHANNEL_PREFIX: &str = "URBDRC_";

/// Name under which the multiplexer registers with the transport
pub const PLUGIN_NAME: &str = "usbmux";

/// Default number of device slots per session
pub const DEFAULT_MAX_DEVICES: usize = 16;

/// Upper bound on slots so that indices always render as two digits
pub const MAX_SLOT_CAPACITY: usize = 100;

/// Derive the device channel name for a slot index
///
/// # Example
/// ```
/// use protocol::device_channel_name;
///
/// assert_eq!(device_channel_name(3), "URBDRC_03");
/// ```
pub fn device_channel_name(slot_index: usize) -> String {
    format!("{}{:02}", DEVICE_CHANNEL_PREFIX, slot_index)
}

/// Recover the slot index from a device channel name
pub fn parse_device_channel_name(name: &str) -> Option<usize> {
    let digits = name.strip_prefix(DEVICE_CHANNEL_PREFIX)?;
    if digits.len() != 2 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
