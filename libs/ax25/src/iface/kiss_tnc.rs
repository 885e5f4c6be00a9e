//! KISS TNC driver: a serial device, PTY, or UNIX-domain socket carrying a
//! byte-stuffed KISS stream, decoded via [`crate::kiss::Decoder`].

use std::os::unix::io::RawFd;
use std::os::unix::net::UnixStream;
use std::path::Path;

use nix::sys::termios::{self, SetArg};
use nix::unistd::{close, read, write};

use crate::error::{Error, Result};
use crate::iface::{InterfaceDriver, Stats};
use crate::kiss::{self, Decoder};

const BUFSZ: usize = 4096;
pub const TNC_PORT: u8 = 0;

enum Device {
    Owned(RawFd),
    Socket(UnixStream),
}

impl Device {
    fn fd(&self) -> RawFd {
        match self {
            Device::Owned(fd) => *fd,
            Device::Socket(s) => std::os::unix::io::AsRawFd::as_raw_fd(s),
        }
    }
}

pub struct KissTnc {
    device: Device,
    buf: [u8; BUFSZ],
    readlen: usize,
    offset_i: usize,
    decoder: Decoder,
    stats: Stats,
    owns_fd: bool,
}

impl KissTnc {
    /// Open a serial device or character special file, putting it into raw
    /// mode if it's a tty.
    pub fn open(
        path: &Path,
        baud: Option<termios::BaudRate>,
        flow: Option<crate::config::FlowControl>,
    ) -> Result<KissTnc> {
        let fd = nix::fcntl::open(
            path,
            nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_NOCTTY,
            nix::sys::stat::Mode::empty(),
        )?;

        if let Ok(mut attrs) = termios::tcgetattr(fd) {
            termios::cfmakeraw(&mut attrs);
            if let Some(baud) = baud {
                termios::cfsetspeed(&mut attrs, baud)?;
            }
            match flow {
                Some(crate::config::FlowControl::Crtscts) => {
                    attrs.control_flags.insert(termios::ControlFlags::CRTSCTS);
                }
                Some(crate::config::FlowControl::Xonxoff) => {
                    attrs.input_flags.insert(termios::InputFlags::IXON | termios::InputFlags::IXOFF);
                }
                None => {}
            }
            termios::tcflush(fd, termios::FlushArg::TCIOFLUSH)?;
            termios::tcsetattr(fd, SetArg::TCSANOW, &attrs)?;
        }

        Ok(KissTnc::from_fd(fd, true))
    }

    /// Connect to a UNIX-domain socket TNC (e.g. a software modem).
    pub fn connect(path: &Path) -> Result<KissTnc> {
        let socket = UnixStream::connect(path)?;
        Ok(KissTnc {
            device: Device::Socket(socket),
            buf: [0u8; BUFSZ],
            readlen: 0,
            offset_i: 0,
            decoder: Decoder::new(BUFSZ),
            stats: Stats::default(),
            owns_fd: true,
        })
    }

    /// Wrap an already-open fd (used by tests and when the caller manages
    /// the device's lifetime, e.g. a PTY opened by the server itself).
    pub fn from_fd(fd: RawFd, owns_fd: bool) -> KissTnc {
        KissTnc {
            device: Device::Owned(fd),
            buf: [0u8; BUFSZ],
            readlen: 0,
            offset_i: 0,
            decoder: Decoder::new(BUFSZ),
            stats: Stats::default(),
            owns_fd,
        }
    }
}

impl Drop for KissTnc {
    fn drop(&mut self) {
        if self.owns_fd {
            if let Device::Owned(fd) = self.device {
                let _ = close(fd);
            }
        }
    }
}

impl InterfaceDriver for KissTnc {
    fn fd(&self) -> RawFd {
        self.device.fd()
    }

    fn fill(&mut self) -> Result<usize> {
        let n = read(self.device.fd(), &mut self.buf)?;
        self.readlen = n;
        self.offset_i = 0;
        Ok(n)
    }

    fn drain(&mut self, buf: &mut [u8]) -> Result<usize> {
        let start = self.offset_i;
        while self.offset_i < self.readlen {
            let c = self.buf[self.offset_i];
            self.offset_i += 1;
            if self.decoder.feed(c)? {
                break;
            }
        }
        let len = self.decoder.buf().len().min(buf.len());
        buf[..len].copy_from_slice(&self.decoder.buf()[..len]);
        Ok(self.offset_i - start)
    }

    fn pending(&self) -> bool {
        self.decoder.pending()
    }

    fn flush(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.decoder.buf().len().min(buf.len());
        buf[..len].copy_from_slice(&self.decoder.buf()[..len]);
        let consumed = self.decoder.flush();
        self.stats.rx_frames += 1;
        self.stats.rx_bytes += consumed as u64;
        Ok(len)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let mut out = Vec::with_capacity(buf.len() + 8);
        kiss::encode(&mut out, buf, TNC_PORT);
        write(self.device.fd(), &out)?;
        self.stats.tx_frames += 1;
        self.stats.tx_bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn reset(&mut self) -> Result<()> {
        Err(Error::NotSupported("kiss_tnc driver reset"))
    }

    fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    #[test]
    fn decodes_a_frame_fed_through_a_pipe() {
        let (rfd, wfd) = pipe().unwrap();
        let frame = [0x01, 0xab, 0xcd];
        let mut encoded = Vec::new();
        kiss::encode(&mut encoded, &frame, TNC_PORT);
        write(wfd, &encoded).unwrap();
        close(wfd).unwrap();

        let mut tnc = KissTnc::from_fd(rfd, true);
        let filled = tnc.fill().unwrap();
        assert!(filled > 0);

        let mut scratch = [0u8; 64];
        loop {
            tnc.drain(&mut scratch).unwrap();
            if tnc.pending() {
                break;
            }
        }
        let len = tnc.flush(&mut scratch).unwrap();
        assert_eq!(&scratch[..len], &frame);
        assert_eq!(tnc.stats().rx_frames, 1);
    }
}
