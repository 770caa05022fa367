//! Test utilities for the USB channel multiplexer
//!
//! Provides descriptor and transfer fixtures shared by the test suites of
//! every crate in the workspace.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_descriptor;
//!
//! let device = create_mock_descriptor("webusb-1", 0x1234, 0x5678);
//! assert_eq!(device.vendor_id, 0x1234);
//! ```

use protocol::{DeviceDescriptor, DeviceTransfer, TransferKind};

/// Create a mock DeviceDescriptor for testing
///
/// # Arguments
/// * `device_id` - Identifier the event source would assign
/// * `vendor_id` - USB Vendor ID
/// * `product_id` - USB Product ID
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor;
///
/// let device = create_mock_descriptor("dev-1", 0x1234, 0x5678);
/// assert_eq!(device.device_id, "dev-1");
/// assert_eq!(device.product_id, 0x5678);
/// ```
pub fn create_mock_descriptor(device_id: &str, vendor_id: u16, product_id: u16) -> DeviceDescriptor {
    DeviceDescriptor {
        device_id: device_id.to_string(),
        vendor_id,
        product_id,
        name: format!("Test Product {}", device_id),
        serial_number: format!("SN-{}", device_id),
        class: 0x00,
        subclass: 0x00,
        protocol: 0x00,
        interface_data: String::new(),
    }
}

/// Create a mock DeviceDescriptor with specific USB class
pub fn create_mock_descriptor_with_class(
    device_id: &str,
    vendor_id: u16,
    product_id: u16,
    class: u8,
    subclass: u8,
    protocol: u8,
) -> DeviceDescriptor {
    DeviceDescriptor {
        class,
        subclass,
        protocol,
        interface_data: format!(
            "[{{\"number\":0,\"class\":{},\"subclass\":{},\"protocol\":{}}}]",
            class, subclass, protocol
        ),
        ..create_mock_descriptor(device_id, vendor_id, product_id)
    }
}

/// Create a mock mass storage device descriptor
pub fn create_mock_mass_storage_device(device_id: &str) -> DeviceDescriptor {
    create_mock_descriptor_with_class(device_id, 0x0781, 0x5581, 0x08, 0x06, 0x50)
}

/// Create a mock HID device descriptor (keyboard/mouse)
pub fn create_mock_hid_device(device_id: &str) -> DeviceDescriptor {
    create_mock_descriptor_with_class(device_id, 0x046d, 0xc52b, 0x03, 0x00, 0x00)
}

/// Create `count` descriptors with ids `dev-0`, `dev-1`, ...
///
/// # Example
/// ```
/// use common::test_utils::create_mock_descriptor_list;
///
/// let devices = create_mock_descriptor_list(5);
/// assert_eq!(devices.len(), 5);
/// assert_eq!(devices[4].device_id, "dev-4");
/// ```
pub fn create_mock_descriptor_list(count: usize) -> Vec<DeviceDescriptor> {
    (0..count)
        .map(|i| {
            create_mock_descriptor(
                &format!("dev-{}", i),
                0x1000 + (i as u16),
                0x2000 + (i as u16),
            )
        })
        .collect()
}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}

/// Create a mock bulk transfer addressed to `device_id`
pub fn create_mock_transfer(device_id: &str, endpoint: u8, size: usize) -> DeviceTransfer {
    DeviceTransfer {
        device_id: device_id.to_string(),
        endpoint,
        transfer_type: TransferKind::Bulk,
        data: create_mock_bulk_data(size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_descriptor() {
        let device = create_mock_descriptor("dev-42", 0x1234, 0x5678);

        assert_eq!(device.device_id, "dev-42");
        assert_eq!(device.vendor_id, 0x1234);
        assert_eq!(device.product_id, 0x5678);
        assert!(!device.name.is_empty());
        assert!(!device.serial_number.is_empty());
    }

    #[test]
    fn test_create_mock_descriptor_list_unique_ids() {
        let devices = create_mock_descriptor_list(10);
        assert_eq!(devices.len(), 10);

        let unique: std::collections::HashSet<_> =
            devices.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(unique.len(), 10);
    }

    #[test]
    fn test_create_mock_mass_storage_device() {
        let device = create_mock_mass_storage_device("disk");

        assert_eq!(device.class, 0x08); // Mass Storage
        assert_eq!(device.subclass, 0x06); // SCSI
        assert_eq!(device.protocol, 0x50); // Bulk-Only
        assert!(device.interface_data.contains("\"class\":8"));
    }

    #[test]
    fn test_create_mock_hid_device() {
        let device = create_mock_hid_device("mouse");
        assert_eq!(device.class, 0x03); // HID
    }

    #[test]
    fn test_create_mock_bulk_data() {
        let data = create_mock_bulk_data(1024);

        assert_eq!(data.len(), 1024);
        assert_eq!(data[0], 0);
        assert_eq!(data[255], 255);
        assert_eq!(data[256], 0); // Wraps around
    }
}
