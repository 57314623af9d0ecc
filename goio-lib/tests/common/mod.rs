//! Common test utilities and shared imports

// Allow unused imports and dead code since this is a shared module
// used across multiple test files - not all items are used in every test file
#[allow(unused_imports)]
pub use goio_lib::command::{CmdStatus, SkipCommand};
#[allow(unused_imports)]
pub use goio_lib::constants::PACKET_SIZE;
#[allow(unused_imports)]
pub use goio_lib::packet::{Packet, WireFormat};
#[allow(unused_imports)]
pub use goio_lib::sim::SimulatedGoLink;
#[allow(unused_imports)]
pub use goio_lib::{CancelFlag, DeviceConfig, GoDevice, GoError, GoLink, GoTemp, Session, SessionConfig};
#[allow(unused_imports)]
pub use std::sync::Arc;
#[allow(unused_imports)]
pub use std::time::{Duration, Instant};

/// Timeout used for exchanges the simulator always answers
#[allow(dead_code)]
pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Route library logs to the test harness output when RUST_LOG is set
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Open a Go! Link protocol engine on a fresh simulator
#[allow(dead_code)]
pub fn open_go_link() -> (SimulatedGoLink, GoDevice<GoLink>) {
    init_tracing();
    let sim = SimulatedGoLink::new();
    let transport = sim.transport().expect("simulator should be free");
    let device = GoDevice::<GoLink>::with_transport(transport, DeviceConfig::default()).expect("open failed");
    (sim, device)
}

/// Open a bare session on a fresh simulator
#[allow(dead_code)]
pub fn open_session(config: SessionConfig) -> (SimulatedGoLink, Session) {
    init_tracing();
    let sim = SimulatedGoLink::new();
    let transport = sim.transport().expect("simulator should be free");
    let session = Session::open(transport, config).expect("open failed");
    (sim, session)
}

/// Poll until `cond` holds or `limit` elapses
#[allow(dead_code)]
pub fn wait_until(limit: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    cond()
}
