//! Desktop monitoring example with a simulated sensor.
//!
//! Runs one handler over a [`MockBus`] fed with a slow temperature ramp,
//! samples it at 10 Hz on a [`ThreadTimer`], and logs every reading and
//! threshold crossing.
//!
//! # Usage
//!
//! ```sh
//! RUST_LOG=debug cargo run --example desktop_monitor
//! ```

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use periph_handlers::hal::{MockBus, MockSensor, ThreadTimer};
use periph_handlers::{HandlerConfig, SensorHandler, ThresholdKind};
use tracing_subscriber::EnvFilter;

const RATE_HZ: u32 = 10;
const RUN_FOR: Duration = Duration::from_secs(3);

fn main() -> anyhow::Result<()> {
    // log records are bridged into tracing by the subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("=================================");
    println!("  periph-handlers Desktop Monitor");
    println!("=================================");
    println!();

    // Ramp from 15 to 45 degrees and back, one step per sample
    let bus = MockBus::new();
    let ramp: Vec<f32> = (0..30)
        .chain((0..30).rev())
        .map(|step| 15.0 + step as f32)
        .collect();
    bus.queue_values(&ramp);

    let config = HandlerConfig::default()
        .with_device_name("demo_ntc")
        .with_description("Simulated coolant temperature")
        .with_sampling(4, 0)
        .with_filtering(true, 0.5);

    let handler = Arc::new(SensorHandler::<MockSensor, _, _>::new(
        config,
        bus.provider(),
        ThreadTimer::new(),
    ));

    handler.initialize()?;
    handler.self_test()?;
    let info = handler.info()?;
    println!(
        "Device: {} {} ({:.0}..{:.0}, resolution {})",
        info.manufacturer, info.model, info.min_value, info.max_value, info.resolution
    );

    handler.set_thresholds(20.0, 35.0)?;
    handler.enable_threshold_monitoring(|value, kind| match kind {
        ThresholdKind::Low => log::warn!("below low threshold: {:.2}", value),
        ThresholdKind::High => log::warn!("above high threshold: {:.2}", value),
    })?;

    let samples = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&samples);
    handler.start_continuous_monitoring(RATE_HZ, move |reading| {
        counter.fetch_add(1, Ordering::Relaxed);
        if reading.valid {
            log::info!("{:>8} us  {:6.2}", reading.timestamp_us, reading.value);
        } else if let Some(err) = reading.error {
            log::error!("sample failed: {}", err);
        }
    })?;

    std::thread::sleep(RUN_FOR);
    handler.stop_continuous_monitoring()?;

    let stats = handler.statistics();
    let diag = handler.diagnostics();
    println!();
    println!("Samples delivered:    {}", samples.load(Ordering::Relaxed));
    println!(
        "Operations:           {} ok / {} failed",
        stats.successful_operations, stats.failed_operations
    );
    println!("Threshold violations: {}", stats.threshold_violations);
    if let Some((min, max)) = stats.value_range() {
        println!(
            "Values:               {:.2} .. {:.2} (avg {:.2})",
            min, max, stats.average_value
        );
    }
    println!(
        "Op time:              avg {} us, max {} us",
        stats.average_operation_time_us, stats.max_operation_time_us
    );
    println!("Healthy:              {}", diag.healthy);

    handler.deinitialize()?;
    Ok(())
}
