//! # rmiflash
//!
//! A library for flashing RMI4 touch controllers.
//!
//! This crate provides the register protocol engine for touchpads and
//! touchsticks that expose an RMI4 function table, including:
//!
//! - Register access over HID reports (`hidraw`)
//! - Register access over PS/2 bytes (`serio_raw`), with the RMI backdoor
//! - Page addressing and function table discovery
//! - The version 5 flash state machine (unlock, erase, block programming)
//!
//! ## Features
//!
//! - `native` (default): Linux `hidraw`/`serio_raw` device nodes
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use rmiflash::{FlashConfig, TransportKind};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let firmware = std::fs::read("firmware.bin")?;
//!     let config = std::fs::read("config.bin")?;
//!
//!     #[cfg(all(feature = "native", target_os = "linux"))]
//!     {
//!         let mut flasher =
//!             TransportKind::Hid.create_flasher("/dev/hidraw0", false, FlashConfig::default())?;
//!
//!         flasher.write_firmware(&firmware, &config, &mut |done, total| {
//!             println!("Flashing: {done}/{total}");
//!         })?;
//!         flasher.close();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod link;
pub mod protocol;
pub mod session;
pub mod target;

#[cfg(test)]
mod mock;

// Re-exports for convenience
#[cfg(all(feature = "native", target_os = "linux"))]
pub use link::{HidrawPort, SerioPort};
pub use {
    device::{FunctionDescriptor, FunctionTable},
    error::{Error, Result, ResultExt},
    image::{Chunk, block_count, chunks},
    link::{ByteLink, DriverControl, ReportLink, SerioDriver},
    protocol::{
        RegisterTransport, TransportKind,
        hid::{HidConfig, HidTransport, RmiMode},
        ps2::{AckOutcome, Ps2Config, Ps2Timing, Ps2Transport},
    },
    session::{RmiSession, SessionState},
    target::{
        Flasher, create_flasher_with_transport,
        v5::{FlashConfig, FlashInfo, FlashState, IdleFlags, V5Flasher},
    },
};
