//! PS/2 mode switching command implementation.

use anyhow::{Context, Result};
use console::style;
use rmiflash::{DriverControl, SerioDriver, TransportKind};

use crate::config::Config;
use crate::{Cli, CliError, Mode};

/// Mode command implementation.
pub(crate) fn cmd_mode(cli: &Cli, config: &Config, mode: Mode) -> Result<()> {
    let kind = cli.transport_kind(config);
    if kind != TransportKind::Ps2 {
        return Err(CliError::Usage(format!(
            "mode switching needs the PS/2 transport, not {kind}; use --transport ps2"
        ))
        .into());
    }

    let dir = cli.sysfs_dir(config)?;
    if !dir.is_dir() {
        return Err(CliError::Device(format!("{} is not a directory", dir.display())).into());
    }
    let control = DriverControl::new(&dir);

    let driver = match mode {
        Mode::Bootloader => SerioDriver::SerioRaw,
        Mode::Runtime => SerioDriver::Psmouse,
    };
    let switched = match mode {
        Mode::Bootloader => control.enter_raw_mode(),
        Mode::Runtime => control.restore_runtime_mode(),
    };
    switched.with_context(|| format!("failed to switch {} to {driver}", dir.display()))?;

    if !cli.quiet {
        eprintln!(
            "{} {} bound to {}",
            style("✓").green(),
            dir.display(),
            style(driver).cyan()
        );
    }
    Ok(())
}
