// Protocol constants for the Go! (Skip) device family

use std::time::Duration;

/// Size of every packet exchanged with the device (one HID report)
pub const PACKET_SIZE: usize = 8;

/// Maximum parameter bytes carried by a command packet (packet minus command id)
pub const MAX_CMD_PARAM_BYTES: usize = PACKET_SIZE - 1;

/// Maximum payload bytes carried by a command response packet
pub const MAX_RESPONSE_PAYLOAD_BYTES: usize = 6;

/// Default ring capacity for both packet queues
pub const DEFAULT_RING_CAPACITY: usize = 2000;

/// Default timeout for a command/response exchange
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Recommended timeout for reading sensor DDS memory
pub const READ_DDS_TIMEOUT: Duration = Duration::from_millis(2000);

/// Recommended timeout for writing sensor DDS memory
pub const WRITE_DDS_TIMEOUT: Duration = Duration::from_millis(4000);

/// Receiver loop poll interval
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Interval between command response queue checks
pub const DEFAULT_RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Consecutive short reads reported before the receiver goes quiet
pub const DEFAULT_SHORT_READ_LOG_LIMIT: u32 = 5;

/// Pause after a short or failed read
pub const DEFAULT_SHORT_READ_BACKOFF: Duration = Duration::from_millis(1);

/// Largest local NVM write chunk (one command id per length)
pub const MAX_LOCAL_NVM_WRITE_CHUNK: usize = 6;

/// Largest remote NVM write chunk (one command id per length)
pub const MAX_REMOTE_NVM_WRITE_CHUNK: usize = 5;

/// Largest NVM read chunk (bounded by the response payload)
pub const MAX_NVM_READ_CHUNK: usize = MAX_RESPONSE_PAYLOAD_BYTES;

/// Capacity of each diagnostic packet ring
pub const DIAGNOSTIC_RING_CAPACITY: usize = 1000;

/// Vernier USB vendor id
pub const VERNIER_VENDOR_ID: u16 = 0x08F7;

/// Go! Link (Skip) product id
pub const GO_LINK_PRODUCT_ID: u16 = 0x0003;

/// Go! Temp product id
pub const GO_TEMP_PRODUCT_ID: u16 = 0x0002;

/// Host IO status bit set when the last exchange timed out
pub const HOST_IO_STATUS_TIMED_OUT: u32 = 1;
