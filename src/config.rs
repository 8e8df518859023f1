use crate::prelude::*;

use anyhow::Result;
use serde::Deserialize;
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default = "Vec::new")]
    pub inverters: Vec<Inverter>,
    #[serde(default = "Vec::new")]
    pub meters: Vec<Meter>,

    #[serde(default = "Config::default_scheduler")]
    pub scheduler: Scheduler,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,

    #[serde(default)]
    pub read_only: bool,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_modbus_port")]
    pub port: u16,
    #[serde(default = "Config::default_device_id")]
    pub device_id: u8,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_inverter_timeout")]
    pub timeout: Duration,

    pub merge_gap: Option<u16>,
    pub max_block_size: Option<u16>,
    pub delay_ms: Option<u64>,
    pub read_only: Option<bool>,
}
impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn device_id(&self) -> u8 {
        self.device_id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn merge_gap(&self) -> u16 {
        self.merge_gap.unwrap_or(4)
    }

    pub fn max_block_size(&self) -> u16 {
        self.max_block_size.unwrap_or(100)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms.unwrap_or(0))
    }

    pub fn read_only(&self) -> bool {
        self.read_only == Some(true)
    }

    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
} // }}}

// Meter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Meter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_http_port")]
    pub port: u16,

    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_meter_timeout")]
    pub timeout: Duration,
}
impl Meter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
} // }}}

// Scheduler {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Scheduler {
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "Config::default_interval")]
    pub interval: Duration,
}
impl Scheduler {
    pub fn interval(&self) -> Duration {
        self.interval
    }
} // }}}

#[derive(Clone, Debug)]
pub struct ConfigWrapper {
    config: Arc<Config>,
}

impl ConfigWrapper {
    pub fn new(file: String) -> Result<Self> {
        Ok(Self::from_config(Config::new(file)?))
    }

    pub fn from_config(config: Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn inverters(&self) -> Vec<Inverter> {
        self.config.inverters.clone()
    }

    pub fn enabled_inverters(&self) -> Vec<Inverter> {
        self.inverters().into_iter().filter(|i| i.enabled()).collect()
    }

    pub fn inverter_with_host(&self, host: &str) -> Option<Inverter> {
        self.inverters().into_iter().find(|i| i.host() == host)
    }

    pub fn meters(&self) -> Vec<Meter> {
        self.config.meters.clone()
    }

    pub fn enabled_meters(&self) -> Vec<Meter> {
        self.meters().into_iter().filter(|m| m.enabled()).collect()
    }

    pub fn scheduler(&self) -> Scheduler {
        self.config.scheduler.clone()
    }

    pub fn loglevel(&self) -> String {
        self.config.loglevel.clone()
    }

    pub fn read_only(&self) -> bool {
        self.config.read_only
    }

    /// Global switch or the inverter's own.
    pub fn inverter_read_only(&self, inverter: &Inverter) -> bool {
        self.read_only() || inverter.read_only()
    }
}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        info!("Reading configuration from {}", file);
        let content = std::fs::read_to_string(&file)
            .map_err(|err| anyhow!("error reading {}: {}", file, err))?;

        let config = Self::from_yaml(&content)?;

        info!("Configuration loaded successfully:");
        info!(
            "  Inverters: {} configured, {} enabled",
            config.inverters.len(),
            config.inverters.iter().filter(|i| i.enabled).count()
        );
        for (i, inv) in config.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Enabled: {}", inv.enabled);
            info!("      Host: {}:{} (unit {})", inv.host, inv.port, inv.device_id);
            info!("      Timeout: {}s", inv.timeout.as_secs());
            info!(
                "      Spans: gap {} / block {} / delay {}ms",
                inv.merge_gap(),
                inv.max_block_size(),
                inv.delay().as_millis()
            );
            info!("      Read Only: {}", inv.read_only());
        }
        info!(
            "  Meters: {} configured, {} enabled",
            config.meters.len(),
            config.meters.iter().filter(|m| m.enabled).count()
        );
        for (i, meter) in config.meters.iter().enumerate() {
            info!("    Meter[{}]: {} enabled={}", i, meter.name(), meter.enabled);
        }
        info!("  Poll Interval: {}s", config.scheduler.interval.as_secs());
        info!("  Global Read Only: {}", config.read_only);
        info!("  Log Level: {}", config.loglevel);

        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, inv) in self.inverters.iter().enumerate() {
            if !inv.enabled {
                continue;
            }
            if inv.host.is_empty() {
                bail!("inverter[{}].host cannot be empty", i);
            }
            if inv.port == 0 {
                bail!("inverter[{}].port must be between 1 and 65535", i);
            }
            if !(1..=247).contains(&inv.device_id) {
                bail!("inverter[{}].device_id must be between 1 and 247", i);
            }
            if inv.timeout.is_zero() {
                bail!("inverter[{}].timeout cannot be 0", i);
            }
            if !(1..=crate::reader::HARD_BLOCK_LIMIT).contains(&inv.max_block_size()) {
                bail!(
                    "inverter[{}].max_block_size must be between 1 and {}",
                    i,
                    crate::reader::HARD_BLOCK_LIMIT
                );
            }
        }

        for (i, meter) in self.meters.iter().enumerate() {
            if !meter.enabled {
                continue;
            }
            if meter.host.is_empty() {
                bail!("meter[{}].host cannot be empty", i);
            }
            if let Err(e) = url::Url::parse(&format!("http://{}:{}/", meter.host, meter.port)) {
                bail!("meter[{}] is not a valid address: {}", i, e);
            }
            if meter.timeout.is_zero() {
                bail!("meter[{}].timeout cannot be 0", i);
            }
        }

        let interval = self.scheduler.interval.as_secs();
        if !(1..=300).contains(&interval) {
            bail!("scheduler.interval must be between 1 and 300 seconds");
        }

        Ok(())
    }

    fn default_scheduler() -> Scheduler {
        Scheduler {
            interval: Self::default_interval(),
        }
    }

    fn default_interval() -> Duration {
        Duration::from_secs(30)
    }

    fn default_modbus_port() -> u16 {
        502
    }

    fn default_http_port() -> u16 {
        80
    }

    fn default_device_id() -> u8 {
        1
    }

    fn default_inverter_timeout() -> Duration {
        Duration::from_secs(5)
    }

    fn default_meter_timeout() -> Duration {
        Duration::from_secs(10)
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}
