use crate::prelude::*;
use crate::error::Result;
use crate::remote_control;

pub const FORCE_MODE: &str = "force_mode";
pub const REMOTE_CONTROL_MODE: &str = "remote_control_mode";
pub const FORCE_DURATION: &str = "force_duration";
pub const FORCE_POWER: &str = "force_power";

/// Longest force duration, in minutes, that fits the seconds register.
pub const MAX_FORCE_DURATION: f64 = 1092.0;

/// One user-facing control action.
#[derive(Clone, Debug, PartialEq)]
pub enum Control {
    RemoteControlMode(RemoteControlMode),
    ForceMode(ForceMode),
    /// Minutes.
    ForceDuration(f64),
    /// Watts; the sign is ignored.
    ForcePower(f64),
    Register { name: String, value: f64 },
}

impl Control {
    pub fn parse(name: &str, value: &str) -> Result<Self> {
        let number = || {
            value
                .trim()
                .parse::<f64>()
                .map_err(|_| Error::validation(format!("{}: {} is not a number", name, value)))
        };

        Ok(match name {
            REMOTE_CONTROL_MODE => Control::RemoteControlMode(value.parse()?),
            FORCE_MODE => Control::ForceMode(value.parse()?),
            FORCE_DURATION => Control::ForceDuration(number()?),
            FORCE_POWER => Control::ForcePower(number()?),
            _ => Control::Register {
                name: name.to_string(),
                value: number()?,
            },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Control::RemoteControlMode(_) => REMOTE_CONTROL_MODE,
            Control::ForceMode(_) => FORCE_MODE,
            Control::ForceDuration(_) => FORCE_DURATION,
            Control::ForcePower(_) => FORCE_POWER,
            Control::Register { name, .. } => name.as_str(),
        }
    }
}

/// Current value of every virtual control, derived from a snapshot.
pub fn control_values(snapshot: &Snapshot) -> BTreeMap<&'static str, Value> {
    let mut values = BTreeMap::new();

    if let Some(state) = snapshot.remote_control_state() {
        values.insert(FORCE_MODE, Value::Text(state.force_mode().name().to_string()));
        if let Some(mode) = state.mode {
            values.insert(REMOTE_CONTROL_MODE, Value::Text(mode.name().to_string()));
        }
    }
    if let Some(seconds) = snapshot.number(register::REMOTE_TIMEOUT_SET) {
        values.insert(FORCE_DURATION, Value::Number((seconds / 6.0).round() / 10.0));
    }
    if let Some(watts) = snapshot.number(register::REMOTE_ACTIVE_POWER) {
        values.insert(FORCE_POWER, Value::Number(watts.abs()));
    }

    values
}

/// Turns control actions into register writes.
///
/// Controls sharing the `remote_control` register read it right before
/// writing and keep every bit they do not own. Nothing guards that read
/// against another writer changing the register in between; the last
/// writer wins.
#[derive(Clone)]
pub struct ControlWriter {
    transport: Arc<dyn Transport>,
    catalog: &'static Catalog,
    read_only: bool,
}

impl ControlWriter {
    pub fn new(transport: Arc<dyn Transport>, catalog: &'static Catalog, read_only: bool) -> Self {
        Self {
            transport,
            catalog,
            read_only,
        }
    }

    fn check_read_only(&self) -> Result<()> {
        if self.read_only {
            Err(Error::validation("write operations are disabled in read-only mode"))
        } else {
            Ok(())
        }
    }

    fn writable(&self, name: &str) -> Result<&'static RegisterDescriptor> {
        let descriptor = self.catalog.lookup(name)?;
        if !descriptor.writable || descriptor.bit.is_some() {
            return Err(Error::validation(format!("{} is not writable", name)));
        }
        Ok(descriptor)
    }

    pub async fn apply(&self, control: &Control) -> Result<()> {
        match control {
            Control::RemoteControlMode(mode) => self.set_remote_control_mode(*mode).await,
            Control::ForceMode(mode) => self.set_force_mode(*mode).await,
            Control::ForceDuration(minutes) => self.set_force_duration(*minutes).await,
            Control::ForcePower(watts) => self.set_force_power(*watts).await,
            Control::Register { name, value } => self.write(name, *value).await,
        }
    }

    /// Writes an engineering value to a writable register.
    pub async fn write(&self, name: &str, value: f64) -> Result<()> {
        self.check_read_only()?;
        let descriptor = self.writable(name)?;
        let words = codec::encode_for_write(value, descriptor)?;

        if let Some(options) = descriptor.options {
            if !options.contains(&words[0]) {
                return Err(Error::validation(format!(
                    "{} accepts only {:?}, not {}",
                    name, options, words[0]
                )));
            }
        }

        self.write_words(descriptor, &words).await
    }

    /// Writes raw words starting at `address`, which must belong to a
    /// writable register of the same width.
    pub async fn write_raw(&self, address: u16, words: &[u16]) -> Result<()> {
        self.check_read_only()?;
        let descriptor = self
            .catalog
            .writable_at(address)
            .ok_or_else(|| Error::validation(format!("no writable register at {}", address)))?;

        if words.len() != usize::from(descriptor.word_count()) {
            return Err(Error::validation(format!(
                "{} takes {} words, got {}",
                descriptor.name,
                descriptor.word_count(),
                words.len()
            )));
        }
        if let Some(options) = descriptor.options {
            if !options.contains(&words[0]) {
                return Err(Error::validation(format!(
                    "{} accepts only {:?}, not {}",
                    descriptor.name, options, words[0]
                )));
            }
        }

        self.write_words(descriptor, words).await
    }

    async fn write_words(&self, descriptor: &RegisterDescriptor, words: &[u16]) -> Result<()> {
        info!(
            "writing {} at {}: {:?}",
            descriptor.name, descriptor.address, words
        );

        let result = match words {
            [word] => self.transport.write_single(descriptor.address, *word).await,
            _ => self.transport.write_multiple(descriptor.address, words).await,
        };

        if let Err(e) = &result {
            error!("write of {} failed: {}", descriptor.name, e);
        }
        result
    }

    async fn read_word(&self, descriptor: &RegisterDescriptor) -> Result<u16> {
        let words = self.transport.read_holding(descriptor.address, 1).await?;
        words
            .first()
            .copied()
            .ok_or_else(|| Error::protocol(format!("empty read of {}", descriptor.name)))
    }

    pub async fn set_remote_control_mode(&self, mode: RemoteControlMode) -> Result<()> {
        self.check_read_only()?;
        let descriptor = self.writable(register::REMOTE_CONTROL)?;

        let current = self.read_word(descriptor).await?;
        let merged = remote_control::merge(current, mode);
        debug!(
            "{}: {:#06x} -> {:#06x} ({})",
            descriptor.name,
            current,
            merged,
            mode.name()
        );

        self.write_words(descriptor, &[merged]).await
    }

    pub async fn set_force_mode(&self, mode: ForceMode) -> Result<()> {
        self.set_remote_control_mode(mode.into()).await
    }

    pub async fn set_force_duration(&self, minutes: f64) -> Result<()> {
        if !minutes.is_finite() {
            return Err(Error::validation(format!("force duration {} minutes", minutes)));
        }
        let minutes = minutes.clamp(0.0, MAX_FORCE_DURATION);
        self.write(register::REMOTE_TIMEOUT_SET, minutes * 60.0).await
    }

    /// Sets active and reactive power to the same magnitude. Stops at the
    /// first failed write.
    pub async fn set_force_power(&self, watts: f64) -> Result<()> {
        let watts = watts.abs();
        self.write(register::REMOTE_ACTIVE_POWER, watts).await?;
        self.write(register::REMOTE_REACTIVE_POWER, watts).await
    }
}
