pub mod frame;
pub mod http;
pub mod modbus;

use crate::error::Result;

use async_trait::async_trait;

/// Capability shared by every link to a device.
///
/// Implementations serialize their own requests; callers may share one
/// instance freely and will queue behind whatever request is in flight.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Opens the link. Does nothing when it is already open.
    async fn connect(&self) -> Result<()>;

    /// Drops the link, aborting any request still waiting on it. Calling it
    /// again is harmless.
    async fn close(&self);

    async fn read_holding(&self, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn write_single(&self, address: u16, value: u16) -> Result<()>;

    async fn write_multiple(&self, address: u16, values: &[u16]) -> Result<()>;

    /// False after a transport failure, until the next request succeeds.
    fn is_healthy(&self) -> bool;
}
