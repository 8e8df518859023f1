pub mod codec;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod device;
pub mod error;
pub mod hub;
pub mod meter;
pub mod options;
pub mod prelude;
pub mod reader;
pub mod register;
pub mod remote_control;
pub mod scheduler;
pub mod snapshot;
pub mod transport;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::options::Command;
use crate::scheduler::Scheduler;

use anyhow::Result;
use log::LevelFilter;
use std::io::Write;
use std::time::Duration;

/// Installs the process logger.
///
/// `RUST_LOG` wins when set; otherwise the level starts at info and follows
/// the config file's `loglevel` once it is loaded.
pub fn init_logging() {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("trace"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("logger already initialised: {}", e);
        return;
    }
    if std::env::var_os("RUST_LOG").is_none() {
        log::set_max_level(LevelFilter::Info);
    }
}

fn apply_loglevel(level: &str) {
    if std::env::var_os("RUST_LOG").is_some() {
        return;
    }
    match level.parse::<LevelFilter>() {
        Ok(filter) => log::set_max_level(filter),
        Err(_) => warn!("ignoring unknown loglevel {}", level),
    }
}

/// Every device built from the enabled config entries.
pub struct Devices {
    pub inverters: Vec<Arc<SolakonHub>>,
    pub meters: Vec<Arc<MeterHub>>,
}

impl Devices {
    pub fn from_config(config: &ConfigWrapper) -> Result<Self> {
        let inverters = config
            .enabled_inverters()
            .iter()
            .map(|inverter| Arc::new(SolakonHub::from_config(config, inverter)))
            .collect();

        let meters = config
            .enabled_meters()
            .iter()
            .map(|meter| MeterHub::from_config(meter).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { inverters, meters })
    }

    pub fn all(&self) -> Vec<Arc<dyn Device>> {
        let inverters = self.inverters.iter().map(|i| i.clone() as Arc<dyn Device>);
        let meters = self.meters.iter().map(|m| m.clone() as Arc<dyn Device>);
        inverters.chain(meters).collect()
    }

    pub async fn close(&self) {
        for device in self.all() {
            device.close().await;
        }
    }
}

/// Runs one command against the configured devices until it completes or
/// `shutdown_rx` fires.
pub async fn app(
    shutdown_rx: broadcast::Receiver<()>,
    config: ConfigWrapper,
    command: Command,
) -> Result<()> {
    let devices = Devices::from_config(&config)?;
    info!(
        "{} inverters and {} meters enabled",
        devices.inverters.len(),
        devices.meters.len()
    );

    let result = match command {
        Command::Poll => poll(shutdown_rx, &config, &devices).await,
        Command::Read => read(&devices).await,
        Command::Info => print_info(&devices).await,
        Command::Write { control, value } => write(&devices, &control, &value).await,
    };

    devices.close().await;
    result
}

async fn poll(
    shutdown_rx: broadcast::Receiver<()>,
    config: &ConfigWrapper,
    devices: &Devices,
) -> Result<()> {
    for device in devices.all() {
        if let Err(e) = device.setup().await {
            // polling keeps retrying, so a device that is down now can recover
            warn!("{}: setup failed: {}", device.name(), e);
        }
    }

    Scheduler::new(config, devices.all()).start(shutdown_rx).await
}

async fn read(devices: &Devices) -> Result<()> {
    let mut output = serde_json::Map::new();

    for hub in &devices.inverters {
        let snapshot = hub.read_all_data().await?;
        output.insert(
            hub.name().to_string(),
            serde_json::json!({
                "values": snapshot.values,
                "controls": control::control_values(&snapshot),
                "unavailable": snapshot.unavailable,
                "taken_at": snapshot.taken_at,
            }),
        );
    }
    for meter in &devices.meters {
        let snapshot = meter.read_all_data().await?;
        output.insert(
            meter.name().to_string(),
            serde_json::json!({
                "values": snapshot.values,
                "taken_at": snapshot.taken_at,
            }),
        );
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn print_info(devices: &Devices) -> Result<()> {
    let mut output = serde_json::Map::new();

    for device in devices.all() {
        let info = device
            .get_device_info()
            .await
            .with_context(|| format!("reading device info of {}", device.name()))?;
        output.insert(device.name().to_string(), serde_json::to_value(info)?);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn write(devices: &Devices, name: &str, value: &str) -> Result<()> {
    let hub = devices
        .inverters
        .first()
        .ok_or_else(|| anyhow!("no enabled inverter to write to"))?;

    let control = Control::parse(name, value)?;
    hub.write_control(&control).await?;

    if let Some(snapshot) = hub.coordinator().latest() {
        if let Some(current) = control::control_values(&snapshot).get(control.name()) {
            info!("{} is now {}", control.name(), current);
        } else if let Some(current) = snapshot.get(control.name()) {
            info!("{} is now {}", control.name(), current);
        }
    }
    Ok(())
}

/// Entry point of the binary.
pub async fn run(options: Options) -> Result<()> {
    init_logging();
    info!("solakon-bridge {} starting", CARGO_PKG_VERSION);

    let config = ConfigWrapper::new(options.config_file.clone())?;
    apply_loglevel(&config.loglevel());

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let ctrl_c_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
        }
        let _ = ctrl_c_tx.send(());
    });

    if let Some(runtime) = options.runtime {
        let timer_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(runtime)).await;
            info!("runtime limit of {}s reached", runtime);
            let _ = timer_tx.send(());
        });
    }

    app(shutdown_rx, config, options.command()).await
}
