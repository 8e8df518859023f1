use clap::{Parser, Subcommand};

/// Solakon Bridge - polls and controls Solakon ONE inverters and IR meters
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Optional runtime limit in seconds
    #[clap(short = 't', long = "time")]
    pub runtime: Option<u64>,

    #[clap(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, PartialEq, Subcommand)]
pub enum Command {
    /// Poll every enabled device at the configured interval (default)
    Poll,
    /// Poll every enabled device once and print the values as JSON
    Read,
    /// Print device information as JSON
    Info,
    /// Apply one control to the first enabled inverter
    Write {
        /// force_mode, remote_control_mode, force_duration, force_power or a register name
        control: String,
        value: String,
    },
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Poll)
    }
}
