use clap::Parser;
use gauge_logger::config::{Config, ConfigLoader};
use gauge_logger::port::list_ports;
use gauge_logger::study::tick_threshold;
use gauge_logger::{
    logging, DeviceManager, ExponentialBackoff, GaugeDevice, GaugeDriver, GaugeEmulator,
    SharedDevice, StudySession,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "gauge-logger",
    version,
    about = "Poll serial vacuum gauges and record their readings to CSV."
)]
struct Args {
    /// Serial port of a gauge. Repeat for several gauges.
    #[arg(short, long = "port", value_name = "PORT")]
    ports: Vec<String>,

    /// Number of emulated gauges to add.
    #[arg(long, value_name = "N", default_value_t = 0)]
    emulate: usize,

    /// Configuration file (default: standard resolution).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Poll interval in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Spacing of recorded rows per device in milliseconds.
    #[arg(long)]
    log_interval_ms: Option<u64>,

    /// Directory for study CSV files.
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Study title.
    #[arg(long, default_value = "Gauge study")]
    title: String,

    /// Use the configured baud rate instead of scanning.
    #[arg(long)]
    no_auto_baud: bool,

    /// Fixed baud rate; implies --no-auto-baud.
    #[arg(long)]
    baud: Option<u32>,

    /// Echo readings as JSON lines instead of text.
    #[arg(long)]
    json: bool,

    /// List available serial ports and exit.
    #[arg(long)]
    list_ports: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(ms) = self.interval_ms {
            config.polling.interval_ms = ms;
        }
        if let Some(ms) = self.log_interval_ms {
            config.recording.log_interval_ms = ms;
        }
        if let Some(dir) = &self.log_dir {
            config.recording.log_directory = dir.clone();
        }
        if let Some(baud) = self.baud {
            config.serial.baud_rate = baud;
            config.serial.auto_baud = false;
        }
        if self.no_auto_baud {
            config.serial.auto_baud = false;
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    }
    .into_config();
    args.apply(&mut config);
    config.validate()?;
    logging::init(&config.logging)?;

    if args.list_ports {
        for port in list_ports()? {
            println!("{port}");
        }
        return Ok(());
    }
    if args.ports.is_empty() && args.emulate == 0 {
        return Err("no devices given; use --port or --emulate".into());
    }

    let devices = build_devices(&args, &config)?;
    let manager = Arc::new(DeviceManager::new(config.polling.interval()));
    let mut reconnects = JoinSet::new();

    for device in devices.values() {
        match device.connect().await {
            Ok(()) => {
                manager.add_device(Arc::clone(device));
            }
            Err(e) => {
                error!(device = %device.device_id(), error = %e, "initial connect failed");
                if config.reconnect.enabled {
                    reconnects.spawn(reconnect(
                        Arc::clone(&manager),
                        Arc::clone(device),
                        config.reconnect.backoff(),
                    ));
                }
            }
        }
    }

    let threshold = tick_threshold(config.recording.log_interval(), config.polling.interval());
    let session = Arc::new(
        StudySession::new(&args.title, devices.keys().cloned(), threshold)
            .with_flush_every(config.recording.flush_every),
    );
    session.start(&config.recording.log_directory)?;
    manager.add_sink(session.clone());
    if let Some(path) = session.csv_file_path() {
        info!(path = %path.display(), threshold, "recording");
    }

    let echo = tokio::spawn(echo_readings(manager.subscribe_readings(), args.json));
    let mut lost = manager.subscribe_connection_lost();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = lost.recv() => match event {
                Ok(event) => {
                    if !config.reconnect.enabled {
                        continue;
                    }
                    if let Some(device) = devices.get(&event.device_id) {
                        reconnects.spawn(reconnect(
                            Arc::clone(&manager),
                            Arc::clone(device),
                            config.reconnect.backoff(),
                        ));
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "missed connection-lost events");
                }
                Err(RecvError::Closed) => break,
            },
            Some(_) = reconnects.join_next(), if !reconnects.is_empty() => {}
        }
    }

    reconnects.abort_all();
    if let Err(e) = session.stop() {
        error!(error = %e, "closing study file failed");
    }
    manager.shutdown().await;
    for device in devices.values() {
        device.disconnect().await;
    }
    echo.abort();

    let status = session.status();
    info!(
        samples = status.recorded_samples,
        write_failures = status.write_failures,
        "study finished"
    );
    Ok(())
}

fn build_devices(
    args: &Args,
    config: &Config,
) -> Result<HashMap<String, SharedDevice>, Box<dyn std::error::Error>> {
    let settings = config.serial.driver_settings()?;
    let mut devices: HashMap<String, SharedDevice> = HashMap::new();

    for (index, port) in args.ports.iter().enumerate() {
        let id = format!("gauge-{}", index + 1);
        let driver = GaugeDriver::serial(id.clone(), port.clone(), settings.clone());
        driver.set_display_name(format!("Gauge {} ({port})", index + 1));
        devices.insert(id, Arc::new(driver));
    }
    for index in 0..args.emulate {
        let id = format!("emulator-{}", index + 1);
        devices.insert(
            id.clone(),
            Arc::new(GaugeEmulator::new(id, config.emulator.settings())),
        );
    }
    Ok(devices)
}

/// Take `device` out of polling and retry `connect` with growing delays
/// until it succeeds, then hand it back to the manager.
async fn reconnect(manager: Arc<DeviceManager>, device: SharedDevice, mut backoff: ExponentialBackoff) {
    manager.remove_device(device.device_id()).await;

    loop {
        let delay: Duration = backoff.next_delay();
        info!(device = %device.device_id(), ?delay, "reconnecting");
        tokio::time::sleep(delay).await;

        match device.connect().await {
            Ok(()) => {
                backoff.reset();
                manager.add_device(device);
                return;
            }
            Err(e) => warn!(device = %device.device_id(), error = %e, "reconnect failed"),
        }
    }
}

async fn echo_readings(
    mut readings: tokio::sync::broadcast::Receiver<gauge_logger::GaugeReading>,
    json: bool,
) {
    loop {
        match readings.recv().await {
            Ok(reading) if json => match serde_json::to_string(&reading) {
                Ok(line) => println!("{line}"),
                Err(e) => warn!(error = %e, "could not encode reading"),
            },
            Ok(reading) => println!(
                "{} {:<12} {:.4E} Torr{}",
                reading.timestamp_iso(),
                reading.device_id,
                reading.pressure_torr(),
                if reading.status.is_ok() {
                    String::new()
                } else {
                    format!(" [{:?}]", reading.status)
                }
            ),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "echo fell behind"),
            Err(RecvError::Closed) => return,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("signal received, shutting down");
}
