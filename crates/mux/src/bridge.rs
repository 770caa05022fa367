//! Inbound event bridge
//!
//! Entry points for USB events that originate outside the transport, such
//! as a browser reporting an attached device. Connect and disconnect are
//! encoded as control frames and run through the control handler; data is
//! written straight to the device's channel.
//!
//! Every entry point is gated by [`SessionSettings::usb_enabled`]. A
//! disabled session answers [`MuxError::FeatureDisabled`] and changes
//! nothing.
//!
//! [`SessionSettings::usb_enabled`]: crate::plugin::SessionSettings::usb_enabled

use crate::control::{ControlOutcome, handle_control_frame};
use crate::error::{MuxError, Result};
use crate::plugin::UsbSession;
use protocol::{
    ControlMessage, DeviceDescriptor, DeviceTransfer, TransferKind, encode_control,
    encode_transfer,
};
use tracing::{debug, warn};

impl UsbSession {
    fn check_enabled(&self, event: &str, device_id: &str) -> Result<()> {
        if self.shared.settings.usb_enabled {
            Ok(())
        } else {
            warn!(
                "USB {} for {} ignored: redirection is not enabled for this connection",
                event, device_id
            );
            Err(MuxError::FeatureDisabled)
        }
    }

    /// A device was attached on the remote side
    pub fn on_connect(&self, descriptor: DeviceDescriptor) -> Result<ControlOutcome> {
        self.check_enabled("connect", &descriptor.device_id)?;
        debug!(
            "USB connect: {} ({:04x}:{:04x})",
            descriptor.device_id, descriptor.vendor_id, descriptor.product_id
        );

        encode_control(&ControlMessage::Connect(descriptor))
            .map_err(MuxError::from)
            .and_then(|frame| handle_control_frame(&self.shared, &frame))
            .inspect_err(MuxError::log)
    }

    /// Data from the remote side for a connected device
    ///
    /// Returns the number of bytes written to the device channel.
    pub fn on_data(
        &self,
        device_id: &str,
        endpoint: u8,
        data: &[u8],
        transfer_type: TransferKind,
    ) -> Result<usize> {
        self.check_enabled("data", device_id)?;
        self.forward_data(device_id, endpoint, data, transfer_type)
            .inspect_err(MuxError::log)
    }

    fn forward_data(
        &self,
        device_id: &str,
        endpoint: u8,
        data: &[u8],
        transfer_type: TransferKind,
    ) -> Result<usize> {
        debug!(
            "USB data: {} endpoint {:#04x} ({}, {} bytes)",
            device_id,
            endpoint,
            transfer_type,
            data.len()
        );

        let channel = {
            let state = self.shared.lock_state();
            let slot = state
                .slots
                .find_slot_by_device_id(device_id)
                .ok_or_else(|| MuxError::UnknownDevice {
                    device_id: device_id.to_string(),
                })?;
            state
                .slots
                .current_channel(slot)
                .cloned()
                .ok_or_else(|| MuxError::ChannelNotReady {
                    device_id: device_id.to_string(),
                    slot,
                })?
        };

        let frame = encode_transfer(&DeviceTransfer {
            device_id: device_id.to_string(),
            endpoint,
            transfer_type,
            data: data.to_vec(),
        })?;

        channel
            .write(&frame)
            .into_result()
            .map_err(|code| MuxError::ChannelWrite {
                device_id: device_id.to_string(),
                code,
            })?;
        Ok(frame.len())
    }

    /// A device was detached on the remote side
    pub fn on_disconnect(&self, device_id: &str) -> Result<ControlOutcome> {
        self.check_enabled("disconnect", device_id)?;
        debug!("USB disconnect: {}", device_id);

        encode_control(&ControlMessage::disconnect(device_id))
            .map_err(MuxError::from)
            .and_then(|frame| handle_control_frame(&self.shared, &frame))
            .inspect_err(MuxError::log)
    }
}
