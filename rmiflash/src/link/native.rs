//! Native Linux device nodes for the report and byte links.
//!
//! Both links are plain character devices. Timeouts are implemented with
//! `poll(2)` before each read or write, and HID feature reports go through
//! the hidraw `HIDIOCSFEATURE` ioctl.

use {
    crate::{
        error::{Error, Result},
        link::{ByteLink, ReportLink},
    },
    log::trace,
    nix::poll::{PollFd, PollFlags, PollTimeout, poll},
    std::{
        fs::{File, OpenOptions},
        io::{self, Read, Write},
        os::fd::{AsFd, AsRawFd, BorrowedFd},
        path::Path,
        time::Duration,
    },
};

// HIDIOCSFEATURE(len) = _IOC(_IOC_WRITE|_IOC_READ, 'H', 0x06, len)
nix::ioctl_readwrite_buf!(hidraw_set_feature, b'H', 0x06, u8);

/// Wait until `fd` is ready for `flags`, returning `false` on timeout.
fn wait_ready(fd: BorrowedFd<'_>, flags: PollFlags, timeout: Duration) -> Result<bool> {
    let ms = u16::try_from(timeout.as_millis()).unwrap_or(u16::MAX);
    let mut fds = [PollFd::new(fd, flags)];
    let n = poll(&mut fds, PollTimeout::from(ms)).map_err(io::Error::from)?;
    Ok(n > 0)
}

fn open_rw(path: &Path) -> Result<File> {
    Ok(OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)?)
}

/// hidraw device node.
pub struct HidrawPort {
    file: File,
    name: String,
}

impl HidrawPort {
    /// Open a hidraw node (e.g. `/dev/hidraw0`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            file: open_rw(path)?,
            name: path
                .display()
                .to_string(),
        })
    }
}

impl ReportLink for HidrawPort {
    fn write_report(&mut self, report: &[u8], timeout: Duration) -> Result<()> {
        if !wait_ready(self.file.as_fd(), PollFlags::POLLOUT, timeout)? {
            return Err(Error::TransportTimeout(format!(
                "{}: output report not accepted",
                self.name
            )));
        }
        let n = self.file.write(report)?;
        if n != report.len() {
            return Err(Error::ProtocolViolation(format!(
                "short report write: {n} of {} bytes",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !wait_ready(self.file.as_fd(), PollFlags::POLLIN, timeout)? {
            return Err(Error::TransportTimeout(format!(
                "{}: no input report",
                self.name
            )));
        }
        Ok(self.file.read(buf)?)
    }

    #[allow(unsafe_code)]
    fn send_feature_report(&mut self, report: &[u8]) -> Result<()> {
        let mut buf = report.to_vec();
        trace!("SET_FEATURE {:02x?}", buf);
        // SAFETY: the fd is owned by `self.file` and `buf` outlives the call;
        // the ioctl size is derived from the buffer length.
        unsafe { hidraw_set_feature(self.file.as_raw_fd(), &mut buf) }
            .map_err(io::Error::from)?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// serio_raw device node.
pub struct SerioPort {
    file: File,
    name: String,
}

impl SerioPort {
    /// Open a serio_raw node (e.g. `/dev/serio_raw0`).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self {
            file: open_rw(path)?,
            name: path
                .display()
                .to_string(),
        })
    }

    fn flush_input(&mut self) -> Result<()> {
        let mut tmp = [0u8; 64];
        while wait_ready(self.file.as_fd(), PollFlags::POLLIN, Duration::ZERO)? {
            let n = self.file.read(&mut tmp)?;
            if n == 0 {
                break;
            }
            trace!("Discarded {n} stale bytes");
        }
        Ok(())
    }
}

impl ByteLink for SerioPort {
    fn write_bytes(&mut self, data: &[u8], timeout: Duration) -> Result<()> {
        self.flush_input()?;
        if !wait_ready(self.file.as_fd(), PollFlags::POLLOUT, timeout)? {
            return Err(Error::TransportTimeout(format!(
                "{}: write not accepted",
                self.name
            )));
        }
        self.file.write_all(data)?;
        Ok(())
    }

    fn read_byte(&mut self, timeout: Duration) -> Result<u8> {
        if !wait_ready(self.file.as_fd(), PollFlags::POLLIN, timeout)? {
            return Err(Error::TransportTimeout(format!(
                "{}: no data",
                self.name
            )));
        }
        let mut buf = [0u8; 1];
        match self.file.read(&mut buf)? {
            1 => Ok(buf[0]),
            _ => Err(Error::TransportTimeout(format!("{}: no data", self.name))),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
