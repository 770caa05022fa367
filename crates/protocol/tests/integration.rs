//! Protocol Integration Tests
//!
//! Covers the control frame layout as seen by a peer:
//! - Frame layout (type byte, payload schema per type)
//! - Error classification for malformed and unknown frames
//! - Device transfer framing for device channels
//! - Channel naming
//!
//! Run with: `cargo test -p protocol`

use protocol::{
    CONTROL_CHANNEL_NAME, ControlMessage, DEFAULT_MAX_DEVICES, DeviceDescriptor, DeviceRef,
    DeviceTransfer, MAX_DEVICE_ID_LEN, MessageType, ProtocolError, TransferKind, decode_control,
    decode_transfer, device_channel_name, encode_control, encode_transfer, peek_message_type,
};

// ============================================================================
// Test Utilities
// ============================================================================

fn create_descriptor(id: &str) -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: id.to_string(),
        vendor_id: 0x0781,
        product_id: 0x5581,
        name: format!("Test Product {}", id),
        serial_number: format!("SN-{}", id),
        class: 0x08,
        subclass: 0x06,
        protocol: 0x50,
        interface_data: String::new(),
    }
}

// ============================================================================
// Frame Layout
// ============================================================================

mod frame_layout {
    use super::*;

    #[test]
    fn test_payload_is_postcard_after_type_byte() {
        let desc = create_descriptor("dev-1");
        let frame = encode_control(&ControlMessage::Connect(desc.clone())).unwrap();

        assert_eq!(frame[0], MessageType::DeviceConnect.as_byte());
        let payload: DeviceDescriptor = postcard::from_bytes(&frame[1..]).unwrap();
        assert_eq!(payload, desc);
    }

    #[test]
    fn test_peer_built_disconnect_frame_decodes() {
        // A peer that only knows the schema, not this crate's encoder
        let mut frame = vec![0x02];
        frame.extend(
            postcard::to_allocvec(&DeviceRef {
                device_id: "dev-9".to_string(),
            })
            .unwrap(),
        );

        let msg = decode_control(&frame).unwrap();
        assert_eq!(msg, ControlMessage::disconnect("dev-9"));
    }

    #[test]
    fn test_type_byte_peek_does_not_need_payload() {
        assert_eq!(
            peek_message_type(&[0x03]).unwrap(),
            MessageType::DeviceData
        );
        assert!(matches!(
            peek_message_type(&[0x10, 0x00]),
            Err(ProtocolError::UnknownMessageType(0x10))
        ));
    }

    #[test]
    fn test_max_length_device_id_accepted() {
        let id = "d".repeat(MAX_DEVICE_ID_LEN);
        let frame = encode_control(&ControlMessage::disconnect(id.clone())).unwrap();
        assert_eq!(decode_control(&frame).unwrap().device_id(), id);
    }
}

// ============================================================================
// Error Classification
// ============================================================================

mod error_classification {
    use super::*;

    #[test]
    fn test_zero_length_is_empty() {
        assert!(matches!(decode_control(&[]), Err(ProtocolError::Empty)));
    }

    #[test]
    fn test_every_unknown_type_byte() {
        for byte in (0u8..=255).filter(|b| !(0x01..=0x03).contains(b)) {
            assert!(
                matches!(
                    decode_control(&[byte]),
                    Err(ProtocolError::UnknownMessageType(b)) if b == byte
                ),
                "type byte {:#04x} should be unknown",
                byte
            );
        }
    }

    #[test]
    fn test_truncated_payload_is_payload_error() {
        let frame = encode_control(&ControlMessage::Connect(create_descriptor("dev-2"))).unwrap();
        let truncated = &frame[..frame.len() - 3];
        assert!(matches!(
            decode_control(truncated),
            Err(ProtocolError::Payload(_))
        ));
    }

    #[test]
    fn test_empty_device_id_rejected() {
        let mut frame = vec![0x01];
        frame.extend(postcard::to_allocvec(&DeviceDescriptor::new("", 1, 2)).unwrap());
        assert!(matches!(
            decode_control(&frame),
            Err(ProtocolError::InvalidDeviceId { len: 0, .. })
        ));
    }
}

// ============================================================================
// Device Transfers
// ============================================================================

mod device_transfers {
    use super::*;

    #[test]
    fn test_large_transfer() {
        let transfer = DeviceTransfer {
            device_id: "dev-3".to_string(),
            endpoint: 0x81,
            transfer_type: TransferKind::Bulk,
            data: (0..65536u32).map(|i| (i % 251) as u8).collect(),
        };
        let bytes = encode_transfer(&transfer).unwrap();
        let decoded = decode_transfer(&bytes).unwrap();
        assert_eq!(decoded.data.len(), 65536);
        assert_eq!(decoded.data[250], 250);
        assert_eq!(decoded.data[251], 0);
    }

    #[test]
    fn test_transfer_garbage_rejected() {
        assert!(decode_transfer(&[0xff, 0xff, 0xff]).is_err());
    }
}

// ============================================================================
// Naming
// ============================================================================

mod naming {
    use super::*;

    #[test]
    fn test_default_capacity_names() {
        assert_eq!(DEFAULT_MAX_DEVICES, 16);
        assert_eq!(device_channel_name(7), "URBDRC_07");
        assert_eq!(device_channel_name(DEFAULT_MAX_DEVICES - 1), "URBDRC_15");
    }

    #[test]
    fn test_device_names_extend_control_name() {
        assert!(device_channel_name(0).starts_with(CONTROL_CHANNEL_NAME));
        assert_ne!(device_channel_name(0), CONTROL_CHANNEL_NAME);
    }
}
