use crate::prelude::*;
use crate::error::Result;
use crate::hub::MANUFACTURER;
use crate::transport::http::HttpTransport;

use {async_trait::async_trait, serde::Deserialize, serde_json::Value as Json};

/// Friendly names for the OBIS codes most meters report.
pub const OBIS_NAMES: [(&str, &str); 13] = [
    ("1-0:1.7.0", "active_power"),
    ("1-0:1.8.0", "total_energy"),
    ("1-0:1.8.1", "total_energy_tariff1"),
    ("1-0:1.8.2", "total_energy_tariff2"),
    ("1-0:32.7.0", "voltage_l1"),
    ("1-0:52.7.0", "voltage_l2"),
    ("1-0:72.7.0", "voltage_l3"),
    ("1-0:31.7.0", "current_l1"),
    ("1-0:51.7.0", "current_l2"),
    ("1-0:71.7.0", "current_l3"),
    ("1-0:13.7.0", "power_factor"),
    ("1-0:0.0.0", "meter_serial"),
    ("1-0:0.2.0", "meter_version"),
];

pub fn obis_name(code: &str) -> Option<&'static str> {
    OBIS_NAMES
        .iter()
        .find(|(obis, _)| *obis == code)
        .map(|(_, name)| *name)
}

/// Key under which the raw text of an OBIS code is kept.
pub fn obis_raw_key(code: &str) -> String {
    format!("obis_{}", code.replace([':', '-', '.'], "_"))
}

// {{{ status document
/// The document served at `/api/v1/status`.
///
/// Every section is optional. Leaf values stay raw JSON until they are
/// flattened into snapshot values.
#[derive(Debug, Default, Deserialize)]
pub struct Status {
    /// Present on every firmware that can identify itself; its absence
    /// fails `test_connection`.
    pub device: Option<DeviceSection>,
    #[serde(default)]
    pub wifi: WifiSection,
    /// Values the meter has already computed from its readings.
    #[serde(default)]
    pub extracted: Extracted,
    #[serde(default)]
    pub meter: MeterSection,
}

/// Identity of the IR reader itself.
#[derive(Debug, Default, Deserialize)]
pub struct DeviceSection {
    /// Seconds since boot.
    pub uptime: Option<Json>,
    pub fw_ver: Option<Json>,
    /// Hardware model, reported as "IR Meter <hw>".
    pub hw: Option<Json>,
    pub hw_sn: Option<Json>,
    pub hw_rev: Option<Json>,
}

#[derive(Debug, Default, Deserialize)]
pub struct WifiSection {
    /// dBm
    pub rssi: Option<Json>,
    pub ssid: Option<Json>,
    pub channel: Option<Json>,
    pub ip: Option<Json>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Extracted {
    /// W
    pub instantaneous_power_w: Option<Json>,
    /// kWh
    pub energy_summation_kwh: Option<Json>,
}

/// What the IR head read from the utility meter.
#[derive(Debug, Default, Deserialize)]
pub struct MeterSection {
    #[serde(default)]
    pub obis_values: Vec<ObisValue>,
    pub serial_protocol: Option<Json>,
    pub manufacturer_code: Option<Json>,
    pub device_identification: Option<Json>,
}

/// One OBIS reading. `value` is usually a string, even for numbers.
#[derive(Debug, Default, Deserialize)]
pub struct ObisValue {
    /// e.g. `1-0:1.8.0`
    #[serde(default)]
    pub obis_code: String,
    #[serde(default)]
    pub value: Json,
    pub unit: Option<String>,
}
// }}}

fn to_value(json: &Json) -> Option<Value> {
    match json {
        Json::Null => None,
        Json::Bool(b) => Some(Value::Flag(*b)),
        Json::Number(n) => n.as_f64().map(Value::Number),
        Json::String(s) => Some(Value::Text(s.clone())),
        other => Some(Value::Text(other.to_string())),
    }
}

fn to_text(json: &Json) -> Option<String> {
    match json {
        Json::Null => None,
        Json::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// OBIS readings arrive as text; numbers become numbers, anything else
/// stays text and empty readings are dropped.
fn obis_value(raw: &str) -> Option<Value> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(Value::Number(n)),
        _ => Some(Value::Text(raw.to_string())),
    }
}

impl Status {
    /// A document that does not fit the shape is a transport failure, like
    /// a body that is not JSON at all.
    pub fn parse(json: Json) -> Result<Self> {
        serde_json::from_value(json)
            .map_err(|e| Error::transport(format!("unexpected meter status: {}", e)))
    }

    /// Flattens the status document into snapshot values.
    pub fn values(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        let mut put = |key: &str, json: &Option<Json>| {
            if let Some(value) = json.as_ref().and_then(to_value) {
                values.insert(key.to_string(), value);
            }
        };

        if let Some(device) = &self.device {
            put("uptime", &device.uptime);
            put("firmware_version", &device.fw_ver);
        }

        put("wifi_rssi", &self.wifi.rssi);
        put("wifi_ssid", &self.wifi.ssid);
        put("wifi_channel", &self.wifi.channel);
        put("ip_address", &self.wifi.ip);

        put("instantaneous_power", &self.extracted.instantaneous_power_w);
        put("energy_total", &self.extracted.energy_summation_kwh);

        put("meter_protocol", &self.meter.serial_protocol);
        put("meter_manufacturer", &self.meter.manufacturer_code);
        put("meter_identification", &self.meter.device_identification);

        for obis in &self.meter.obis_values {
            let raw = to_text(&obis.value).unwrap_or_default();

            if let Some(name) = obis_name(&obis.obis_code) {
                if let Some(value) = obis_value(&raw) {
                    values.insert(name.to_string(), value);
                }
            }
            values.insert(obis_raw_key(&obis.obis_code), Value::Text(raw));
        }

        values
    }

    /// `None` when the document has no `device` section.
    pub fn device_info(&self) -> Option<DeviceInfo> {
        let device = self.device.as_ref()?;
        let text = |json: &Option<Json>| json.as_ref().and_then(to_text);

        let mut extra = BTreeMap::new();
        for (key, json) in [
            ("hw_revision", &device.hw_rev),
            ("meter_protocol", &self.meter.serial_protocol),
            ("meter_manufacturer", &self.meter.manufacturer_code),
            ("meter_model", &self.meter.device_identification),
        ] {
            extra.insert(key.to_string(), text(json).unwrap_or_default());
        }

        Some(DeviceInfo {
            manufacturer: MANUFACTURER.to_string(),
            model: format!(
                "IR Meter {}",
                text(&device.hw).unwrap_or_else(|| "Unknown".to_string())
            ),
            serial_number: text(&device.hw_sn),
            version: text(&device.fw_ver),
            extra,
        })
    }
}

struct StatusPoller {
    transport: Arc<HttpTransport>,
}

#[async_trait]
impl Poller for StatusPoller {
    async fn poll(&self) -> Result<Snapshot> {
        let status = Status::parse(self.transport.fetch_status().await?)?;
        Ok(Snapshot::new(status.values(), BTreeSet::new()))
    }
}

/// The Solakon IR meter read over its HTTP status API. Read-only.
///
/// Each poll fetches the whole status document; register writes are
/// refused and return false.
pub struct MeterHub {
    name: String,
    transport: Arc<HttpTransport>,
    /// Polls through `StatusPoller` on the same transport.
    coordinator: Coordinator,
}

impl MeterHub {
    pub fn new(name: &str, transport: HttpTransport) -> Self {
        let transport = Arc::new(transport);
        let poller = Arc::new(StatusPoller {
            transport: transport.clone(),
        });

        Self {
            name: name.to_string(),
            coordinator: Coordinator::new(name, poller),
            transport,
        }
    }

    pub fn from_config(meter: &config::Meter) -> Result<Self> {
        Ok(Self::new(&meter.name(), HttpTransport::from_config(meter)?))
    }

    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    async fn status(&self) -> Result<Status> {
        Status::parse(self.transport.fetch_status().await?)
    }
}

#[async_trait]
impl Device for MeterHub {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&self) -> Result<()> {
        self.transport.connect().await
    }

    async fn test_connection(&self) -> bool {
        match self.status().await {
            Ok(status) => status.device.is_some(),
            Err(e) => {
                error!("{}: connection test failed: {}", self.name, e);
                false
            }
        }
    }

    async fn get_device_info(&self) -> Result<DeviceInfo> {
        self.status()
            .await?
            .device_info()
            .ok_or_else(|| Error::protocol("meter status has no device section"))
    }

    async fn read_all_data(&self) -> Result<Arc<Snapshot>> {
        self.coordinator.refresh().await
    }

    async fn write_register(&self, address: u16, _value: u16) -> bool {
        warn!("{}: meter is read-only, ignoring write to {}", self.name, address);
        false
    }

    async fn write_registers(&self, address: u16, _values: &[u16]) -> bool {
        warn!("{}: meter is read-only, ignoring write to {}", self.name, address);
        false
    }

    async fn close(&self) {
        self.coordinator.cancel();
        self.transport.close().await;
        info!("{}: closed", self.name);
    }
}
