//! Flash engines and their construction.
//!
//! The engine is picked once when the device is opened; everything after that
//! goes through the [`Flasher`] trait.

pub mod v5;

use crate::device::FunctionTable;
use crate::error::Result;
use crate::protocol::{RegisterTransport, TransportKind};
use log::warn;
use v5::{FlashConfig, FlashInfo, FlashState, V5Flasher};

/// Trait for flashing operations, independent of the transport.
pub trait Flasher {
    /// Which transport is underneath.
    fn kind(&self) -> TransportKind;

    /// Flash geometry read at setup.
    fn flash_info(&self) -> &FlashInfo;

    /// Functions found at setup.
    fn functions(&self) -> &FunctionTable;

    /// Whether the device was in bootloader mode at the last status query.
    fn is_bootloader(&self) -> bool;

    /// Re-read the bootloader flag from the device.
    fn query_status(&mut self) -> Result<bool>;

    /// Put the device into flash programming mode.
    fn enter_flash_programming(&mut self) -> Result<()>;

    /// Erase and program both images.
    ///
    /// # Arguments
    ///
    /// * `firmware` - Raw firmware image
    /// * `config` - Raw config image
    /// * `progress` - Progress callback (blocks done, total blocks)
    fn write_firmware(
        &mut self,
        firmware: &[u8],
        config: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()>;

    /// State of the last flash run.
    fn state(&self) -> FlashState;

    /// Release the device.
    ///
    /// Safe to call more than once; failures are logged.
    fn close(&mut self);
}

impl<T: RegisterTransport> Flasher for V5Flasher<T> {
    fn kind(&self) -> TransportKind {
        V5Flasher::kind(self)
    }

    fn flash_info(&self) -> &FlashInfo {
        self.info()
    }

    fn functions(&self) -> &FunctionTable {
        V5Flasher::functions(self)
    }

    fn is_bootloader(&self) -> bool {
        V5Flasher::is_bootloader(self)
    }

    fn query_status(&mut self) -> Result<bool> {
        V5Flasher::query_status(self)
    }

    fn enter_flash_programming(&mut self) -> Result<()> {
        V5Flasher::enter_flash_programming(self)
    }

    fn write_firmware(
        &mut self,
        firmware: &[u8],
        config: &[u8],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        V5Flasher::write_firmware(self, firmware, config, progress)
    }

    fn state(&self) -> FlashState {
        V5Flasher::state(self)
    }

    fn close(&mut self) {
        if let Err(e) = V5Flasher::close(self) {
            warn!("Failed to close device: {e}");
        }
    }
}

/// Create a flasher on an already opened transport.
///
/// This is useful for testing or custom link implementations.
pub fn create_flasher_with_transport<T: RegisterTransport + 'static>(
    transport: T,
    config: FlashConfig,
) -> Result<Box<dyn Flasher>> {
    Ok(Box::new(V5Flasher::setup(transport, config)?))
}

#[cfg(all(feature = "native", target_os = "linux"))]
impl TransportKind {
    /// Open `device` and create a flasher for it.
    ///
    /// # Arguments
    ///
    /// * `device` - Device node, `/dev/hidrawN` or `/dev/serio_rawN`
    /// * `verbose` - Dump all register traffic at debug level
    /// * `config` - Flash timing
    ///
    /// HID devices are switched to attention reports; PS/2 devices are reset
    /// and quiesced before the function table is scanned.
    pub fn create_flasher(
        &self,
        device: &str,
        verbose: bool,
        config: FlashConfig,
    ) -> Result<Box<dyn Flasher>> {
        use crate::error::ResultExt;
        use crate::link::{HidrawPort, SerioPort};
        use crate::protocol::hid::{HidConfig, HidTransport, RmiMode};
        use crate::protocol::ps2::{Ps2Config, Ps2Transport};
        use crate::session::SessionState;

        match self {
            Self::Hid => {
                let port = HidrawPort::open(device)?;
                let mut transport =
                    HidTransport::with_config(port, HidConfig::default().with_verbose(verbose));
                transport
                    .set_mode(RmiMode::AttentionReports)
                    .context("failed to enable attention reports")?;
                create_flasher_with_transport(transport, config)
            },
            Self::Ps2 => {
                let port = SerioPort::open(device)?;
                let mut transport =
                    Ps2Transport::with_config(port, Ps2Config::default().with_verbose(verbose));
                transport
                    .reset_link(&mut SessionState::new())
                    .context("failed to reset PS/2 device")?;
                create_flasher_with_transport(transport, config)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use std::time::Duration;

    #[test]
    fn test_create_flasher_with_transport() {
        let mut mock = MockTransport::new();
        mock.set(0x00E9, &[0x20, 0x21, 0x22, 0x23, 0x01, 0x01]);
        mock.set(0x00E3, &[0x30, 0x31, 0x32, 0x40, 0x01, 0x34]);
        mock.set(0x0032, &[0x00, 8, 0, 1, 0, 1, 0]);
        mock.set(0x0023, &[0x40]);
        mock.mark_volatile(0x0040 + 2 + 8);

        let config = FlashConfig::default().with_erase_settle(Duration::ZERO);
        let mut flasher = create_flasher_with_transport(mock, config).unwrap();
        assert_eq!(flasher.kind(), TransportKind::Hid);
        assert_eq!(flasher.functions().len(), 2);
        assert_eq!(flasher.flash_info().block_size, 8);
        assert!(flasher.is_bootloader());

        let mut last = None;
        flasher
            .write_firmware(&[1; 8], &[2; 8], &mut |done, total| last = Some((done, total)))
            .unwrap();
        assert_eq!(last, Some((2, 2)));
        assert_eq!(flasher.state(), FlashState::Done);
        flasher.close();
    }

    #[test]
    fn test_create_flasher_without_f34() {
        let mut mock = MockTransport::new();
        mock.set(0x00E9, &[0x20, 0x21, 0x22, 0x23, 0x01, 0x01]);
        let err = create_flasher_with_transport(mock, FlashConfig::default())
            .err()
            .unwrap();
        assert!(matches!(err, crate::Error::FunctionNotFound(0x34)));
    }
}
