//! PS/2 driver switching through the serio `drvctl` knob.
//!
//! In normal operation the touch controller is driven by `psmouse`. Register
//! access needs the raw byte channel, which the kernel only exposes once the
//! port is rebound to `serio_raw`.

use crate::error::{Error, Result};
use log::{debug, warn};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Kernel drivers a serio port can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerioDriver {
    /// Raw byte access, needed for register traffic.
    SerioRaw,
    /// Normal mouse driver.
    Psmouse,
}

impl SerioDriver {
    /// The name written to `drvctl`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SerioRaw => "serio_raw",
            Self::Psmouse => "psmouse",
        }
    }
}

impl fmt::Display for SerioDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handle on a serio port's sysfs directory (e.g. `/sys/bus/serio/devices/serio1`).
#[derive(Debug, Clone)]
pub struct DriverControl {
    dir: PathBuf,
}

impl DriverControl {
    /// Create a handle for the given sysfs directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The sysfs directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name of the driver currently bound, if any.
    pub fn bound_driver(&self) -> Result<Option<String>> {
        match fs::read_link(self.dir.join("driver")) {
            Ok(target) => Ok(target
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Whether the port is in raw mode, i.e. ready for register access.
    pub fn is_raw_mode(&self) -> Result<bool> {
        Ok(self.bound_driver()?.as_deref() == Some(SerioDriver::SerioRaw.as_str()))
    }

    /// Rebind the port to `driver`.
    pub fn set_driver(&self, driver: SerioDriver) -> Result<()> {
        let path = self.dir.join("drvctl");
        debug!("Writing {driver} to {}", path.display());
        fs::write(&path, driver.as_str()).map_err(|e| drvctl_error(&path, e))
    }

    /// Switch to raw mode unless already there.
    pub fn enter_raw_mode(&self) -> Result<()> {
        if self.is_raw_mode()? {
            debug!("Already in serio_raw mode, skipping");
            return Ok(());
        }
        self.set_driver(SerioDriver::SerioRaw)
    }

    /// Switch back to `psmouse`.
    ///
    /// A [`Error::LinkDenied`] here is logged and swallowed; the device keeps
    /// working in raw mode until the next rebind.
    pub fn restore_runtime_mode(&self) -> Result<()> {
        tolerate_denied(self.set_driver(SerioDriver::Psmouse))
    }
}

fn drvctl_error(path: &Path, e: io::Error) -> Error {
    match e.kind() {
        io::ErrorKind::PermissionDenied => {
            Error::LinkDenied(format!("cannot write {}: {e}", path.display()))
        },
        _ => Error::Io(e),
    }
}

fn tolerate_denied(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::LinkDenied(msg)) => {
            warn!("Could not restore psmouse driver: {msg}");
            Ok(())
        },
        other => other,
    }
}
