//! Transport capability interfaces
//!
//! The dynamic-channel transport (the remote-desktop session stack) is an
//! external collaborator. It sees the multiplexer only through these traits,
//! and the multiplexer sees the transport only through them in turn:
//!
//! ```text
//! transport ──register_plugin──> DvcPlugin::initialize(ChannelManager)
//!     ChannelManager::create_listener(name, ListenerCallback) -> ListenerRegistration
//!     ListenerCallback::on_new_channel_connection(VirtualChannel) -> ChannelCallback
//!     ChannelCallback::on_data_received / on_close
//! ```
//!
//! Every callback returns a [`ResultCode`]; nothing else crosses the
//! boundary. Releasing a listener is dropping its [`ListenerRegistration`].

use crate::slots::SlotIndex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Status code exchanged with the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResultCode(pub u32);

impl ResultCode {
    pub const OK: ResultCode = ResultCode(0);
    pub const ALREADY_CONNECTED: ResultCode = ResultCode(3);
    pub const NOT_CONNECTED: ResultCode = ResultCode(5);
    pub const BAD_CHANNEL: ResultCode = ResultCode(6);
    pub const NOT_FOUND: ResultCode = ResultCode(8);
    pub const NO_MEMORY: ResultCode = ResultCode(12);
    pub const ALREADY_OPEN: ResultCode = ResultCode(14);
    pub const NOT_INITIALIZED: ResultCode = ResultCode(15);
    pub const INITIALIZATION_ERROR: ResultCode = ResultCode(20);

    pub fn is_ok(self) -> bool {
        self == Self::OK
    }

    /// Convert into a `Result`, keeping the code as the error
    pub fn into_result(self) -> Result<(), ResultCode> {
        if self.is_ok() { Ok(()) } else { Err(self) }
    }

    fn name(self) -> Option<&'static str> {
        match self {
            Self::OK => Some("OK"),
            Self::ALREADY_CONNECTED => Some("ALREADY_CONNECTED"),
            Self::NOT_CONNECTED => Some("NOT_CONNECTED"),
            Self::BAD_CHANNEL => Some("BAD_CHANNEL"),
            Self::NOT_FOUND => Some("NOT_FOUND"),
            Self::NO_MEMORY => Some("NO_MEMORY"),
            Self::ALREADY_OPEN => Some("ALREADY_OPEN"),
            Self::NOT_INITIALIZED => Some("NOT_INITIALIZED"),
            Self::INITIALIZATION_ERROR => Some("INITIALIZATION_ERROR"),
            _ => None,
        }
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} ({})", name, self.0),
            None => write!(f, "{:#010x}", self.0),
        }
    }
}

/// A live channel owned by the transport
pub trait VirtualChannel: Send + Sync {
    /// Name the channel was negotiated under
    fn name(&self) -> &str;

    /// Send bytes to the remote end
    fn write(&self, data: &[u8]) -> ResultCode;

    /// Ask the transport to tear the channel down
    ///
    /// The transport delivers [`ChannelCallback::on_close`] in response.
    /// Callers must not hold locks the close callback needs.
    fn close(&self) -> ResultCode;
}

/// Per-channel event handler handed to the transport on accept
pub trait ChannelCallback: Send + Sync {
    fn on_data_received(&self, data: &[u8]) -> ResultCode;

    fn on_close(&self) -> ResultCode;
}

/// Handler for connection attempts on a registered listener
pub trait ListenerCallback: Send + Sync {
    /// Accept (`Ok`) or reject (`Err`) a channel the remote side opened
    fn on_new_channel_connection(
        &self,
        channel: Arc<dyn VirtualChannel>,
    ) -> Result<Arc<dyn ChannelCallback>, ResultCode>;
}

/// Proof that a listener is registered; dropping it unregisters
pub trait ListenerRegistration: Send + Sync {
    fn channel_name(&self) -> &str;
}

/// The transport's listener-registration interface
pub trait ChannelManager: Send + Sync {
    /// Register a listener for channels named `name`
    ///
    /// Implementations must not invoke `callback` before returning.
    fn create_listener(
        &self,
        name: &str,
        flags: u32,
        callback: Arc<dyn ListenerCallback>,
    ) -> Result<Box<dyn ListenerRegistration>, ResultCode>;
}

/// Lifecycle hooks of a dynamic-channel plugin
pub trait DvcPlugin: Send + Sync {
    /// Called once the transport's channel manager is available
    fn initialize(&self, manager: Arc<dyn ChannelManager>) -> ResultCode;

    /// Called when the transport shuts the plugin down
    fn terminated(&self) -> ResultCode;
}

/// The transport's plugin registration entry point
pub trait PluginRegistry {
    fn register_plugin(&self, name: &str, plugin: Arc<dyn DvcPlugin>) -> ResultCode;
}

/// Destination for traffic received on device channels
///
/// USB request-block handling lives behind this trait; the multiplexer only
/// attributes each chunk to its slot and device.
pub trait DeviceDataSink: Send + Sync {
    fn device_data(&self, slot: SlotIndex, device_id: &str, data: &[u8]);
}

/// Sink that only logs what it receives
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DeviceDataSink for TracingSink {
    fn device_data(&self, slot: SlotIndex, device_id: &str, data: &[u8]) {
        debug!(
            "Data received on device channel {} (device: {}, {} bytes)",
            slot,
            device_id,
            data.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_display() {
        assert_eq!(ResultCode::OK.to_string(), "OK (0)");
        assert_eq!(ResultCode::BAD_CHANNEL.to_string(), "BAD_CHANNEL (6)");
        assert_eq!(ResultCode(0xdead).to_string(), "0x0000dead");
    }

    #[test]
    fn test_into_result() {
        assert!(ResultCode::OK.into_result().is_ok());
        assert_eq!(
            ResultCode::NO_MEMORY.into_result(),
            Err(ResultCode::NO_MEMORY)
        );
    }
}
