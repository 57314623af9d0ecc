pub mod cancel;
pub mod command;
pub mod config;
pub mod constants;
pub mod dds;
pub mod device;
pub mod discovery;
pub mod error;
pub mod flash;
pub mod lifecycle;
pub mod measurement;
pub mod packet;
pub mod receiver;
pub mod ring;
pub mod session;
pub mod sim;
pub mod transport;
pub mod variant;

// Re-export the main types for easy access
pub use cancel::CancelFlag;
pub use config::{DeviceConfig, SessionConfig, UsbConfig};
pub use dds::SensorDdsRecord;
pub use device::GoDevice;
pub use discovery::{DeviceLocation, discover};
pub use error::{GoError, Result};
pub use session::Session;
pub use variant::{DeviceVariant, GoLink, GoTemp, ProbeType};
