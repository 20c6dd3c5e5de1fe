//! Command implementations.
//!
//! Each subcommand is implemented in its own module for clean separation.

pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod mode;

use anyhow::Result;
use rmiflash::Flasher;

use crate::Cli;
use crate::config::Config;

/// Open the configured device and set up a flasher on it.
#[cfg(target_os = "linux")]
pub(crate) fn open_flasher(cli: &Cli, config: &Config) -> Result<Box<dyn Flasher>> {
    use anyhow::Context;

    let device = cli.device_path(config)?;
    let kind = cli.transport_kind(config);
    log::debug!("Opening {device} over {kind}");

    kind.create_flasher(&device, cli.dump(config), config.flash.to_flash_config())
        .with_context(|| format!("failed to open {device}"))
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn open_flasher(cli: &Cli, config: &Config) -> Result<Box<dyn Flasher>> {
    let device = cli.device_path(config)?;
    Err(crate::CliError::Device(format!(
        "cannot open {device}: device access is only supported on Linux"
    ))
    .into())
}
