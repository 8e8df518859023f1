use crate::error::Result;
use crate::snapshot::Snapshot;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DeviceInfo {
    pub manufacturer: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Device specific details, flattened next to the common fields.
    #[serde(flatten)]
    pub extra: BTreeMap<String, String>,
}

/// What the host application drives: one inverter or one meter.
///
/// Writes report plain success; the reason for a failure is logged.
#[async_trait]
pub trait Device: Send + Sync {
    fn name(&self) -> &str;

    async fn setup(&self) -> Result<()>;

    async fn test_connection(&self) -> bool;

    async fn get_device_info(&self) -> Result<DeviceInfo>;

    async fn read_all_data(&self) -> Result<Arc<Snapshot>>;

    async fn write_register(&self, address: u16, value: u16) -> bool;

    async fn write_registers(&self, address: u16, values: &[u16]) -> bool;

    async fn close(&self);
}
