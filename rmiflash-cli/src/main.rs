//! rmiflash CLI - Command-line tool for flashing RMI4 touch controllers.
//!
//! ## Features
//!
//! - Show the function table and flash geometry of a device
//! - Flash raw firmware and config images over HID or PS/2
//! - Switch a PS/2 port between `psmouse` and `serio_raw`
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use log::debug;
use rmiflash::TransportKind;
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;

use commands::flash::cmd_flash;
use commands::info::cmd_info;
use commands::mode::cmd_mode;
use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Generic failure.
const EXIT_FAILURE: u8 = 1;
/// Bad invocation; clap uses the same code for its own parse errors.
const EXIT_USAGE: u8 = 2;
/// Device node or sysfs knob missing or not accessible.
const EXIT_DEVICE: u8 = 3;
/// Device stopped answering or stayed busy.
const EXIT_TIMEOUT: u8 = 4;

/// User-facing failures with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// The command line is incomplete or inconsistent.
    #[error("{0}")]
    Usage(String),
    /// The device could not be opened.
    #[error("{0}")]
    Device(String),
}

/// rmiflash - flash firmware to RMI4 touchpads and touchsticks.
///
/// Environment variables:
///   RMIFLASH_DEVICE     - Default device node (/dev/hidrawN or /dev/serio_rawN)
///   RMIFLASH_TRANSPORT  - Default transport (hid, ps2)
///   RMIFLASH_SYSFS      - serio sysfs directory for PS/2 mode switching
#[derive(Parser)]
#[command(name = "rmiflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Device node to open.
    #[arg(short, long, global = true, env = "RMIFLASH_DEVICE")]
    pub(crate) device: Option<String>,

    /// Transport used to reach the device.
    #[arg(short, long, global = true, env = "RMIFLASH_TRANSPORT")]
    pub(crate) transport: Option<Transport>,

    /// serio sysfs directory (e.g. /sys/bus/serio/devices/serio1).
    #[arg(long, global = true, env = "RMIFLASH_SYSFS", value_name = "DIR")]
    pub(crate) sysfs: Option<PathBuf>,

    /// Verbose output level (-v, -vv for register dumps).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub(crate) config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Supported transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Transport {
    /// HID reports over hidraw.
    Hid,
    /// PS/2 bytes over serio_raw.
    Ps2,
}

impl From<Transport> for TransportKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Hid => TransportKind::Hid,
            Transport::Ps2 => TransportKind::Ps2,
        }
    }
}

/// Driver a PS/2 port should be bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum Mode {
    /// serio_raw, for register access and flashing.
    Bootloader,
    /// psmouse, for normal operation.
    Runtime,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the function table and flash properties of a device.
    Info {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Erase the device and write firmware and config images.
    Flash {
        /// Raw firmware image.
        #[arg(long, value_name = "FILE")]
        firmware: PathBuf,

        /// Raw config image.
        #[arg(long = "config-image", value_name = "FILE")]
        config_image: PathBuf,

        /// Enter flash programming mode first if the device is running.
        #[arg(long)]
        enter_bootloader: bool,
    },

    /// Switch a PS/2 port between runtime and raw register mode.
    Mode {
        /// Target mode.
        #[arg(value_enum)]
        mode: Mode,
    },
}

impl Cli {
    /// Transport from the command line, then config, then HID.
    pub(crate) fn transport_kind(&self, config: &Config) -> TransportKind {
        self.transport
            .map(TransportKind::from)
            .or_else(|| config.device.transport_kind())
            .unwrap_or_default()
    }

    /// Device node from the command line or config.
    pub(crate) fn device_path(&self, config: &Config) -> Result<String> {
        self.device
            .clone()
            .or_else(|| config.device.path.clone())
            .ok_or_else(|| {
                CliError::Usage(
                    "no device given; use --device or set RMIFLASH_DEVICE".to_string(),
                )
                .into()
            })
    }

    /// serio sysfs directory from the command line or config.
    pub(crate) fn sysfs_dir(&self, config: &Config) -> Result<PathBuf> {
        self.sysfs
            .clone()
            .or_else(|| config.device.sysfs.clone())
            .ok_or_else(|| {
                CliError::Usage("no sysfs directory given; use --sysfs".to_string()).into()
            })
    }

    /// Whether register traffic should be dumped.
    pub(crate) fn dump(&self, config: &Config) -> bool {
        self.verbose >= 2 || config.flash.dump
    }
}

/// Map an error to the process exit code.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => EXIT_USAGE,
            CliError::Device(_) => EXIT_DEVICE,
        };
    }

    let Some(rmi_err) = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<rmiflash::Error>())
    else {
        return EXIT_FAILURE;
    };

    match rmi_err.root() {
        rmiflash::Error::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ) =>
        {
            EXIT_DEVICE
        },
        rmiflash::Error::LinkDenied(_) => EXIT_DEVICE,
        rmiflash::Error::TransportTimeout(_) | rmiflash::Error::DeviceBusyTimeout(_) => {
            EXIT_TIMEOUT
        },
        _ => EXIT_FAILURE,
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "rmiflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Info { json } => cmd_info(cli, &config, *json),
        Commands::Flash {
            firmware,
            config_image,
            enter_bootloader,
        } => cmd_flash(cli, &config, firmware, config_image, *enter_bootloader),
        Commands::Mode { mode } => cmd_mode(cli, &config, *mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_usage_exit_code() {
        let err: anyhow::Error = CliError::Usage("missing".into()).into();
        assert_eq!(exit_code_for(&err), EXIT_USAGE);
    }

    #[test]
    fn test_device_exit_codes() {
        let missing = rmiflash::Error::Io(std::io::Error::from(std::io::ErrorKind::NotFound))
            .context("failed to open /dev/hidraw9");
        let err = anyhow::Error::new(missing);
        assert_eq!(exit_code_for(&err), EXIT_DEVICE);

        let denied: Result<()> =
            Err(rmiflash::Error::LinkDenied("drvctl".into())).context("switching mode");
        assert_eq!(exit_code_for(&denied.unwrap_err()), EXIT_DEVICE);
    }

    #[test]
    fn test_timeout_exit_code() {
        let busy: Result<()> =
            Err(rmiflash::Error::DeviceBusyTimeout("0x52".into())).context("flashing");
        assert_eq!(exit_code_for(&busy.unwrap_err()), EXIT_TIMEOUT);
    }

    #[test]
    fn test_other_exit_code() {
        let err = anyhow::anyhow!("firmware image has wrong size");
        assert_eq!(exit_code_for(&err), EXIT_FAILURE);
        let flash = anyhow::Error::new(rmiflash::Error::FlashStatus(2));
        assert_eq!(exit_code_for(&flash), EXIT_FAILURE);
    }

    #[test]
    fn test_transport_resolution() {
        let cli = Cli::parse_from(["rmiflash", "info"]);
        let mut config = Config::default();
        assert_eq!(cli.transport_kind(&config), TransportKind::Hid);

        config.device.transport = Some("ps2".into());
        assert_eq!(cli.transport_kind(&config), TransportKind::Ps2);

        let cli = Cli::parse_from(["rmiflash", "--transport", "hid", "info"]);
        assert_eq!(cli.transport_kind(&config), TransportKind::Hid);
    }

    #[test]
    fn test_device_path_resolution() {
        let cli = Cli::parse_from(["rmiflash", "info"]);
        let mut config = Config::default();
        let err = cli.device_path(&config).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_USAGE);

        config.device.path = Some("/dev/hidraw1".into());
        assert_eq!(cli.device_path(&config).unwrap(), "/dev/hidraw1");

        let cli = Cli::parse_from(["rmiflash", "-d", "/dev/hidraw2", "info"]);
        assert_eq!(cli.device_path(&config).unwrap(), "/dev/hidraw2");
    }
}
