use crate::prelude::*;
use crate::error::Result;

use async_trait::async_trait;

/// Reported for every device this bridge talks to, inverter and meter alike.
pub const MANUFACTURER: &str = "Solakon";
/// Model name used when the model register reads back blank.
pub const DEFAULT_MODEL: &str = "ONE";

// read once by get_device_info, outside the regular poll
const INFO_REGISTERS: [&str; 5] = [
    "model_name",
    "serial_number",
    "master_version",
    "slave_version",
    "manager_version",
];

/// Polls the whole catalog in planned spans.
struct RegisterPoller {
    transport: Arc<dyn Transport>,
    reader: Arc<BulkReader>,
}

#[async_trait]
impl Poller for RegisterPoller {
    async fn poll(&self) -> Result<Snapshot> {
        self.reader.read(self.transport.as_ref()).await
    }
}

/// One Solakon ONE inverter over Modbus TCP.
///
/// Reads go through the coordinator, so concurrent callers share one poll.
/// Every successful write is followed by a refresh so the new state shows
/// up in `latest()`.
pub struct SolakonHub {
    /// Used as the log prefix and the coordinator name.
    name: String,
    transport: Arc<dyn Transport>,
    /// Shared with the poller; also serves the out-of-band device info reads.
    reader: Arc<BulkReader>,
    writer: ControlWriter,
    coordinator: Coordinator,
}

impl SolakonHub {
    /// `read_only` refuses every write before it reaches the transport.
    pub fn new(
        name: &str,
        transport: Arc<dyn Transport>,
        limits: ReadLimits,
        read_only: bool,
    ) -> Self {
        let catalog = Catalog::solakon();
        let reader = Arc::new(BulkReader::new(catalog, limits));
        let writer = ControlWriter::new(transport.clone(), catalog, read_only);
        let poller = Arc::new(RegisterPoller {
            transport: transport.clone(),
            reader: reader.clone(),
        });

        Self {
            name: name.to_string(),
            coordinator: Coordinator::new(name, poller),
            transport,
            reader,
            writer,
        }
    }

    /// Builds the hub and its Modbus client from one `inverters` entry.
    /// Either the global or the entry's `read_only` makes it read-only.
    pub fn from_config(config: &ConfigWrapper, inverter: &config::Inverter) -> Self {
        Self::new(
            &inverter.name(),
            Arc::new(ModbusTcp::from_config(inverter)),
            ReadLimits::from_config(inverter),
            config.inverter_read_only(inverter),
        )
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// Applies one control, then refreshes so the new state is visible.
    pub async fn write_control(&self, control: &Control) -> Result<()> {
        self.writer.apply(control).await?;
        info!("{}: {} applied", self.name, control.name());

        if let Err(e) = self.coordinator.refresh().await {
            warn!("{}: refresh after {} failed: {}", self.name, control.name(), e);
        }
        Ok(())
    }

    async fn write_raw(&self, address: u16, values: &[u16]) -> bool {
        match self.writer.write_raw(address, values).await {
            Ok(()) => {
                if let Err(e) = self.coordinator.refresh().await {
                    warn!("{}: refresh after write to {} failed: {}", self.name, address, e);
                }
                true
            }
            Err(e) => {
                error!("{}: write to {} failed: {}", self.name, address, e);
                false
            }
        }
    }
}

#[async_trait]
impl Device for SolakonHub {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self) -> Result<()> {
        self.transport.connect().await?;
        let info = self.get_device_info().await?;
        info!(
            "{}: {} {} serial {} firmware {}",
            self.name,
            info.manufacturer,
            info.model,
            info.serial_number.as_deref().unwrap_or("unknown"),
            info.version.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    async fn test_connection(&self) -> bool {
        if let Err(e) = self.transport.connect().await {
            warn!("{}: connection test failed: {}", self.name, e);
            return false;
        }

        match self.reader.read_names(self.transport.as_ref(), &["model_name"]).await {
            Ok(snapshot) => snapshot.get("model_name").is_some(),
            Err(e) => {
                warn!("{}: connection test failed: {}", self.name, e);
                false
            }
        }
    }

    async fn get_device_info(&self) -> Result<DeviceInfo> {
        let snapshot = self
            .reader
            .read_names(self.transport.as_ref(), &INFO_REGISTERS)
            .await?;

        let text = |name: &str| {
            snapshot
                .get(name)
                .map(|v| v.to_string())
                .filter(|s| !s.trim().is_empty())
        };

        let mut extra = BTreeMap::new();
        for name in ["slave_version", "manager_version"] {
            if let Some(version) = text(name) {
                extra.insert(name.to_string(), version);
            }
        }

        Ok(DeviceInfo {
            manufacturer: MANUFACTURER.to_string(),
            model: text("model_name").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            serial_number: text("serial_number"),
            version: text("master_version"),
            extra,
        })
    }

    async fn read_all_data(&self) -> Result<Arc<Snapshot>> {
        self.coordinator.refresh().await
    }

    async fn write_register(&self, address: u16, value: u16) -> bool {
        self.write_raw(address, &[value]).await
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> bool {
        self.write_raw(address, values).await
    }

    async fn close(&self) {
        self.coordinator.cancel();
        self.transport.close().await;
        info!("{}: closed", self.name);
    }
}
