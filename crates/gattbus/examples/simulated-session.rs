//! Connect to the built-in simulator, power it on and watch a few polls.
//!
//! Run: `cargo run -p gattbus --example simulated-session`

use std::sync::Arc;
use std::time::Duration;

use gattbus::link::DeviceHandle;
use gattbus::session::{NullSink, SessionConfig, SessionController, SimulatedDevice};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let device = SimulatedDevice::new();
    let session = SessionController::with_sink(
        Arc::new(device.factory()),
        SessionConfig::default(),
        Arc::new(NullSink),
    )?;

    session
        .connect(DeviceHandle::new("SIM:00:00:00:00:01").with_name("simulator"))
        .await?;
    println!("phase: {}", session.phase());

    let outcome = session.set_power(true).await?;
    println!("power on: applied {:?}", outcome.applied);

    for _ in 0..4 {
        tokio::time::sleep(Duration::from_millis(600)).await;
        if let Some(status) = session.snapshot() {
            println!(
                "{:?}: {:.1} V, level {} ({}%), {} rpm",
                status.run_state, status.voltage, status.level, status.run_percent, status.rpm
            );
        }
    }

    session.disconnect().await;
    println!("phase: {}", session.phase());
    Ok(())
}
