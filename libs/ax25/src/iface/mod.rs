//! Interface driver abstraction: a uniform fill/drain/pending/flush/send
//! surface over any link (KISS-TNC, APRS-IS, or a file replay).

pub mod aprs_is;
pub mod kiss_tnc;
pub mod replay;

use std::os::unix::io::RawFd;

use crate::addr::Address;
use crate::error::Result;

pub const DEFAULT_MTU: usize = 4096;
pub const DEFAULT_MRU: usize = 4096;

/// Cap on a single reassembly's accumulator: a peer advertising 127
/// remaining pieces at N1=1536 would otherwise claim ~190 KiB per socket.
pub const ASSEMBLER_CEILING: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Down,
    Up,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Stats {
    pub rx_frames: u64,
    pub tx_frames: u64,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub dropped: u64,
}

/// Behavioral interface every link type implements. Drivers are free to
/// decode directly into the caller's buffer (KISS) or translate a
/// higher-level protocol into an AX.25 UI frame (APRS-IS).
pub trait InterfaceDriver {
    /// The raw fd the event loop should poll for readability.
    fn fd(&self) -> RawFd;

    /// Pull bytes from the link into the driver's internal buffer. Returns
    /// the number of bytes read; `Ok(0)` means the link is at EOF.
    fn fill(&mut self) -> Result<usize>;

    /// Push decoded bytes from the internal buffer into `buf`, returning
    /// bytes consumed.
    fn drain(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// True when a complete frame is buffered and ready for `flush`.
    fn pending(&self) -> bool;

    /// Commit the pending frame, returning its length in `buf`.
    fn flush(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Encode and write one frame to the link.
    fn send(&mut self, buf: &[u8]) -> Result<usize>;

    /// Reset the driver after an I/O error (e.g. reopen the device).
    fn reset(&mut self) -> Result<()>;

    fn stats(&self) -> Stats;
}

/// An interface: a driver plus the AX.25-level station identity and
/// negotiated capability flags bound to it.
pub struct Interface {
    pub name: String,
    pub addr: Address,
    pub aliases: Vec<Address>,
    pub classes: u32,
    pub mtu: usize,
    pub mru: usize,
    pub status: Status,
    pub driver: Box<dyn InterfaceDriver>,
}

impl Interface {
    pub fn new(name: impl Into<String>, addr: Address, driver: Box<dyn InterfaceDriver>) -> Interface {
        Interface {
            name: name.into(),
            addr,
            aliases: Vec::new(),
            classes: crate::xid::CLASSES_HALF_DUPLEX,
            mtu: DEFAULT_MTU,
            mru: DEFAULT_MRU,
            status: Status::Down,
            driver,
        }
    }

    pub fn up(&mut self) {
        self.status = Status::Up;
    }

    pub fn down(&mut self) {
        self.status = Status::Down;
    }

    pub fn error(&mut self) {
        self.status = Status::Error;
    }

    /// True if `addr` names this interface's primary address or one of its
    /// aliases.
    pub fn matches(&self, addr: &Address) -> bool {
        &self.addr == addr || self.aliases.iter().any(|a| a == addr)
    }

    pub fn add_alias(&mut self, addr: Address) {
        if !self.aliases.contains(&addr) {
            self.aliases.push(addr);
        }
    }
}
