//! USB device channel multiplexer
//!
//! Multiplexes redirected USB devices over a dynamic-channel transport. One
//! control channel negotiates devices; each connected device then gets its
//! own channel, named after the slot it occupies in a fixed-capacity table.
//!
//! # Architecture
//!
//! - [`slots`]: the slot table (lowest-free-index allocation, generations)
//! - [`device_channel`]: per-device listener and channel callbacks
//! - [`control`]: control frame handling (connect, disconnect)
//! - [`plugin`]: session context and plugin lifecycle
//! - [`bridge`]: gated entry points for externally reported USB events
//! - [`transport`]: the capability traits the transport implements
//! - [`loopback`]: an in-memory transport
//!
//! # Example
//!
//! ```
//! use mux::{LoopbackTransport, SessionSettings, UsbSession};
//! use protocol::DeviceDescriptor;
//!
//! let transport = LoopbackTransport::new();
//! let session = UsbSession::new(SessionSettings::enabled(2));
//!
//! session.load(&transport).unwrap();
//! assert!(transport.initialize_plugins().is_ok());
//!
//! session.on_connect(DeviceDescriptor::new("devA", 0x1234, 0x5678)).unwrap();
//! assert!(transport.is_listening("URBDRC_00"));
//! ```

pub mod bridge;
pub mod control;
pub mod device_channel;
pub mod error;
pub mod loopback;
pub mod plugin;
pub mod slots;
pub mod transport;

pub use control::ControlOutcome;
pub use error::{MuxError, Result};
pub use loopback::{LoopbackChannel, LoopbackTransport};
pub use plugin::{SessionSettings, UsbPlugin, UsbSession};
pub use slots::{SlotIndex, SlotSnapshot, SlotState, SlotTable};
pub use transport::{
    ChannelCallback, ChannelManager, DeviceDataSink, DvcPlugin, ListenerCallback,
    ListenerRegistration, PluginRegistry, ResultCode, TracingSink, VirtualChannel,
};
