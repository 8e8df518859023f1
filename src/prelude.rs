pub use anyhow::{anyhow, bail, Context};
pub use log::{debug, error, info, trace, warn};

pub use std::collections::{BTreeMap, BTreeSet, HashMap};
pub use std::sync::Arc;

pub use tokio::sync::broadcast;

pub use crate::codec;
pub use crate::config::{self, Config, ConfigWrapper};
pub use crate::control::{Control, ControlWriter};
pub use crate::coordinator::{Coordinator, FailureKind, Poller};
pub use crate::device::{Device, DeviceInfo};
pub use crate::error::Error;
pub use crate::hub::SolakonHub;
pub use crate::meter::MeterHub;
pub use crate::options::Options;
pub use crate::reader::{BulkReader, ReadLimits, ReadSpan};
pub use crate::register::{self, Catalog, RegisterDescriptor, Scale, WireType};
pub use crate::remote_control::{ForceMode, RemoteControlMode, RemoteControlState};
pub use crate::snapshot::{Snapshot, Value};
pub use crate::transport::{modbus::ModbusTcp, Transport};
