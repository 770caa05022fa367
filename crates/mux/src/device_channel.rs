//! Per-device channels
//!
//! Each connected device gets its own dynamic channel named after its slot.
//! Creating one registers a listener with the transport and reserves the
//! slot; the remote side then opens the channel and [`DeviceListener`]
//! attaches it. Callbacks capture `(slot, generation)` and do nothing once
//! the slot has been released or handed to another device.
//!
//! Removing a device whose channel is open leaves the slot Closing until the
//! transport's close callback arrives; that callback frees it.

use crate::error::{MuxError, Result};
use crate::plugin::{SessionShared, SessionState};
use crate::slots::{ReleasedSlot, SlotError, SlotIndex};
use crate::transport::{
    ChannelCallback, ChannelManager, ListenerCallback, ListenerRegistration, ResultCode,
    VirtualChannel,
};
use protocol::parse_device_channel_name;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

pub(crate) type ReleasedDevice =
    ReleasedSlot<Box<dyn ListenerRegistration>, Arc<dyn VirtualChannel>>;

/// Register a listener for `slot` and reserve it for `device_id`
///
/// Must be called with the session lock held, `slot` taken from
/// `find_free_slot` in the same critical section. On failure the slot stays
/// free.
pub(crate) fn create_device_channel(
    state: &mut SessionState,
    session: &Arc<SessionShared>,
    manager: &dyn ChannelManager,
    device_id: &str,
    slot: SlotIndex,
) -> Result<SlotIndex> {
    let channel_name = slot.channel_name();
    let generation = state
        .slots
        .generation(slot)
        .ok_or(SlotError::OutOfRange(slot))?;

    let listener = Arc::new(DeviceListener {
        session: Arc::downgrade(session),
        slot,
        generation,
    });

    let registration = manager
        .create_listener(&channel_name, 0, listener)
        .map_err(|code| MuxError::ChannelRegistration {
            channel_name: channel_name.clone(),
            code,
        })?;

    // A failed reserve drops the registration, which unregisters it
    state
        .slots
        .reserve(slot, device_id.to_string(), registration)?;

    info!(
        "Created channel {} for device {} (slot {})",
        channel_name, device_id, slot
    );
    Ok(slot)
}

/// Remove the device holding `slot`, returning what it owned
///
/// The listener registration is dropped here, under the lock. A live
/// channel is handed back so the caller can close it after unlocking; the
/// slot then stays Closing until the close callback frees it. Removing a
/// free or already removed slot is a no-op.
pub(crate) fn remove_device_channel(
    state: &mut SessionState,
    slot: SlotIndex,
) -> Option<ReleasedDevice> {
    let Some(mut released) = state.slots.remove(slot) else {
        debug!("Slot {} already free or closing", slot);
        return None;
    };

    info!(
        "Removing channel for device {} (slot {})",
        released.device_id, slot
    );
    drop(released.listener.take());
    Some(released)
}

/// Free `slot` without waiting for any channel close
///
/// Used when the transport itself is going away.
pub(crate) fn release_device_channel(
    state: &mut SessionState,
    slot: SlotIndex,
) -> Option<ReleasedDevice> {
    let mut released = state.slots.release(slot)?;
    debug!(
        "Released channel for device {} (slot {})",
        released.device_id, slot
    );
    drop(released.listener.take());
    Some(released)
}

/// Free a removed slot whose close the transport will not confirm
pub(crate) fn complete_device_removal(session: &SessionShared, slot: SlotIndex, generation: u64) {
    if session
        .lock_state()
        .slots
        .complete_removal(slot, generation)
        .is_some()
    {
        debug!("Slot {} freed without a close callback", slot);
    }
}

/// Accepts the remote side opening a device channel
pub(crate) struct DeviceListener {
    session: Weak<SessionShared>,
    slot: SlotIndex,
    generation: u64,
}

impl ListenerCallback for DeviceListener {
    fn on_new_channel_connection(
        &self,
        channel: Arc<dyn VirtualChannel>,
    ) -> std::result::Result<Arc<dyn ChannelCallback>, ResultCode> {
        let Some(session) = self.session.upgrade() else {
            return Err(ResultCode::BAD_CHANNEL);
        };

        if parse_device_channel_name(channel.name()) != Some(self.slot.0) {
            warn!(
                "Rejecting channel {} on the listener for {}",
                channel.name(),
                self.slot.channel_name()
            );
            return Err(ResultCode::BAD_CHANNEL);
        }

        let mut state = session.lock_state();
        let device_id = state
            .slots
            .get(self.slot)
            .and_then(|s| s.device_id())
            .map(str::to_string);

        match state
            .slots
            .attach_channel(self.slot, self.generation, channel)
        {
            Ok(()) => {
                debug!(
                    "Device channel {} connected (device: {})",
                    self.slot.channel_name(),
                    device_id.as_deref().unwrap_or("?")
                );
                Ok(Arc::new(DeviceChannelCallback {
                    session: self.session.clone(),
                    slot: self.slot,
                    generation: self.generation,
                }))
            }
            Err(_channel) => {
                warn!(
                    "Rejecting connection on {}: slot {} is not waiting for a channel",
                    self.slot.channel_name(),
                    self.slot
                );
                Err(ResultCode::BAD_CHANNEL)
            }
        }
    }
}

/// Receives traffic and close events for one device channel
pub(crate) struct DeviceChannelCallback {
    session: Weak<SessionShared>,
    slot: SlotIndex,
    generation: u64,
}

impl ChannelCallback for DeviceChannelCallback {
    fn on_data_received(&self, data: &[u8]) -> ResultCode {
        let Some(session) = self.session.upgrade() else {
            return ResultCode::OK;
        };

        let device_id = {
            let state = session.lock_state();
            state
                .slots
                .active_channel(self.slot, self.generation)
                .map(|(_, device_id)| device_id.to_string())
        };

        match device_id {
            Some(device_id) => session.sink.device_data(self.slot, &device_id, data),
            None => debug!(
                "Dropping {} bytes on stale device channel {}",
                data.len(),
                self.slot.channel_name()
            ),
        }
        ResultCode::OK
    }

    fn on_close(&self) -> ResultCode {
        let Some(session) = self.session.upgrade() else {
            return ResultCode::OK;
        };

        let mut state = session.lock_state();
        if let Some(freed) = state.slots.complete_removal(self.slot, self.generation) {
            debug!(
                "Device channel {} closed, slot {} free (device: {})",
                self.slot.channel_name(),
                self.slot,
                freed.device_id
            );
        } else if state
            .slots
            .detach_channel(self.slot, self.generation)
            .is_some()
        {
            debug!("Device channel {} closed", self.slot.channel_name());
        }
        ResultCode::OK
    }
}
