use crate::error::{GoError, Result};
use nusb::DeviceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Where a matching device sits on the bus, as returned by [`discover`].
///
/// The list is owned by the caller; nothing is cached between calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceLocation {
    /// "bus:address", e.g. "001:007"
    pub location: String,
    pub bus_number: u8,
    pub device_address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

impl DeviceLocation {
    pub fn new(bus_number: u8, device_address: u8, vendor_id: u16, product_id: u16) -> Self {
        Self {
            location: format_location(bus_number, device_address),
            bus_number,
            device_address,
            vendor_id,
            product_id,
            product: None,
        }
    }

    fn from_info(info: &DeviceInfo) -> Self {
        Self {
            product: info.product_string().map(str::to_string),
            ..Self::new(info.bus_number(), info.device_address(), info.vendor_id(), info.product_id())
        }
    }
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{:04x}:{:04x}] {}",
            self.location,
            self.vendor_id,
            self.product_id,
            self.product.as_deref().unwrap_or("<unknown>")
        )
    }
}

fn format_location(bus: u8, address: u8) -> String {
    format!("{:03}:{:03}", bus, address)
}

/// List every attached device with the given vendor and product id.
pub fn discover(vendor_id: u16, product_id: u16) -> Result<Vec<DeviceLocation>> {
    let found: Vec<DeviceLocation> = nusb::list_devices()?
        .filter(|d| d.vendor_id() == vendor_id && d.product_id() == product_id)
        .map(|d| DeviceLocation::from_info(&d))
        .collect();

    info!(
        vendor_id = format_args!("{:04x}", vendor_id),
        product_id = format_args!("{:04x}", product_id),
        count = found.len(),
        "Device scan complete"
    );
    Ok(found)
}

/// Re-resolve a location to the live USB device it names.
pub(crate) fn find_device(location: &DeviceLocation) -> Result<DeviceInfo> {
    let info = nusb::list_devices()?
        .find(|d| {
            d.bus_number() == location.bus_number
                && d.device_address() == location.device_address
                && d.vendor_id() == location.vendor_id
                && d.product_id() == location.product_id
        })
        .ok_or_else(|| GoError::DeviceNotFound(location.location.clone()))?;
    debug!(location = %location.location, "Resolved device");
    Ok(info)
}
