//! Control channel protocol handler
//!
//! The control channel carries connect and disconnect requests. Each frame
//! is decoded with [`protocol::decode_control`] and dispatched:
//!
//! | Type | Action |
//! |---|---|
//! | 0x01 connect | reject duplicates, allocate the lowest free slot, create the device channel |
//! | 0x02 disconnect | remove the device and close its channel |
//! | 0x03 data | refused, data belongs on the device channel |
//! | other | ignored |
//!
//! Nothing here fails the channel: errors are logged and the transport is
//! told OK.

use crate::device_channel::{
    complete_device_removal, create_device_channel, remove_device_channel,
};
use crate::error::{MuxError, Result};
use crate::plugin::{SessionShared, UsbSession};
use crate::slots::SlotIndex;
use crate::transport::{ChannelCallback, ListenerCallback, ResultCode, VirtualChannel};
use protocol::{ControlMessage, DeviceDescriptor, decode_control};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// What a successfully handled control message did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// A device channel was created and is waiting for the remote side
    Connected {
        slot: SlotIndex,
        channel_name: String,
    },
    /// A device was removed; an open channel frees its slot once closed
    Disconnected { slot: SlotIndex },
}

pub(crate) fn handle_control_frame(
    session: &Arc<SessionShared>,
    frame: &[u8],
) -> Result<ControlOutcome> {
    match decode_control(frame)? {
        ControlMessage::Connect(descriptor) => connect_device(session, &descriptor),
        ControlMessage::Disconnect(device) => disconnect_device(session, &device.device_id),
        ControlMessage::Data(transfer) => Err(MuxError::DataOnControlChannel {
            device_id: transfer.device_id,
        }),
    }
}

fn connect_device(
    session: &Arc<SessionShared>,
    descriptor: &DeviceDescriptor,
) -> Result<ControlOutcome> {
    let device_id = descriptor.device_id.as_str();
    debug!(
        "Device connect: {} ({:04x}:{:04x} {})",
        device_id, descriptor.vendor_id, descriptor.product_id, descriptor.name
    );

    let mut state = session.lock_state();
    let manager = state.manager.clone().ok_or(MuxError::NotInitialized)?;

    if let Some(slot) = state.slots.find_slot_by_device_id(device_id) {
        return Err(MuxError::DuplicateDevice {
            device_id: device_id.to_string(),
            slot,
        });
    }

    let slot = state
        .slots
        .find_free_slot()
        .ok_or_else(|| MuxError::SlotsExhausted {
            device_id: device_id.to_string(),
            capacity: state.slots.capacity(),
        })?;

    let slot = create_device_channel(&mut state, session, manager.as_ref(), device_id, slot)?;
    Ok(ControlOutcome::Connected {
        slot,
        channel_name: slot.channel_name(),
    })
}

fn disconnect_device(session: &Arc<SessionShared>, device_id: &str) -> Result<ControlOutcome> {
    debug!("Device disconnect: {}", device_id);

    let released = {
        let mut state = session.lock_state();
        let slot = state
            .slots
            .find_slot_by_device_id(device_id)
            .ok_or_else(|| MuxError::UnknownDevice {
                device_id: device_id.to_string(),
            })?;
        remove_device_channel(&mut state, slot)
    };

    let Some(released) = released else {
        // Lookup and release share the lock, so the slot cannot vanish in between
        return Err(MuxError::UnknownDevice {
            device_id: device_id.to_string(),
        });
    };

    // The close callback frees the slot
    if let Some(channel) = released.channel {
        let code = channel.close();
        if !code.is_ok() {
            debug!("Closing {} returned {}", channel.name(), code);
            complete_device_removal(session, released.index, released.generation);
        }
    }

    Ok(ControlOutcome::Disconnected {
        slot: released.index,
    })
}

impl UsbSession {
    /// Handle one control channel frame
    ///
    /// This is what the control channel's data callback runs; it is public so
    /// in-process event sources can drive the same path.
    pub fn handle_control_message(&self, frame: &[u8]) -> Result<ControlOutcome> {
        handle_control_frame(&self.shared, frame)
    }
}

/// Accepts the remote side opening the control channel
pub(crate) struct ControlListener {
    session: Weak<SessionShared>,
}

impl ControlListener {
    pub(crate) fn new(session: Weak<SessionShared>) -> Self {
        Self { session }
    }
}

impl ListenerCallback for ControlListener {
    fn on_new_channel_connection(
        &self,
        channel: Arc<dyn VirtualChannel>,
    ) -> std::result::Result<Arc<dyn ChannelCallback>, ResultCode> {
        let Some(session) = self.session.upgrade() else {
            return Err(ResultCode::BAD_CHANNEL);
        };

        let mut state = session.lock_state();
        if state.control_channel.is_some() {
            warn!("Control channel already open, rejecting second connection");
            return Err(ResultCode::ALREADY_OPEN);
        }

        state.control_generation = state.control_generation.wrapping_add(1);
        state.control_channel = Some(channel);
        debug!("USB control channel connected");

        Ok(Arc::new(ControlChannelCallback {
            session: self.session.clone(),
            generation: state.control_generation,
        }))
    }
}

/// Receives control frames
pub(crate) struct ControlChannelCallback {
    session: Weak<SessionShared>,
    generation: u64,
}

impl ChannelCallback for ControlChannelCallback {
    fn on_data_received(&self, data: &[u8]) -> ResultCode {
        let Some(session) = self.session.upgrade() else {
            return ResultCode::OK;
        };

        match handle_control_frame(&session, data) {
            Ok(outcome) => {
                debug!("Control message handled: {:?}", outcome);
                ResultCode::OK
            }
            Err(e) => {
                e.log();
                e.result_code()
            }
        }
    }

    fn on_close(&self) -> ResultCode {
        let Some(session) = self.session.upgrade() else {
            return ResultCode::OK;
        };

        let mut state = session.lock_state();
        if state.control_generation == self.generation && state.control_channel.take().is_some() {
            debug!("USB control channel closed");
        }
        ResultCode::OK
    }
}
