//! XID negotiation parameters (AX.25 v2.2 Section 4.3.3.7).

/// Parameter id, matching `enum patty_ax25_param_type` on the wire.
pub const PARAM_CLASSES: u8 = 2;
pub const PARAM_HDLC: u8 = 3;
pub const PARAM_INFO_TX: u8 = 5;
pub const PARAM_INFO_RX: u8 = 6;
pub const PARAM_WINDOW_TX: u8 = 7;
pub const PARAM_WINDOW_RX: u8 = 8;
pub const PARAM_ACK: u8 = 9;
pub const PARAM_RETRY: u8 = 10;

pub const CLASSES_ABM: u32 = 1 << 8;
pub const CLASSES_HALF_DUPLEX: u32 = 1 << 13;
pub const CLASSES_FULL_DUPLEX: u32 = 1 << 14;

pub const HDLC_REJ: u32 = 1 << 17;
pub const HDLC_SREJ: u32 = 1 << 18;
pub const HDLC_XADDR: u32 = 1 << 23;
pub const HDLC_MODULO_8: u32 = 1 << 10;
pub const HDLC_MODULO_128: u32 = 1 << 11;
pub const HDLC_TEST: u32 = 1 << 13;
pub const HDLC_FCS_16: u32 = 1 << 15;
pub const HDLC_SYNC_TX: u32 = 1 << 1;
pub const HDLC_SREJ_MULTI: u32 = 1 << 5;

/// A negotiated (or to-be-negotiated) set of XID parameters. `flags` tracks
/// which fields are present, mirroring the original's `1 << param_id`
/// convention so an unset field is never confused with an explicit zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pub flags: u32,
    pub classes: u32,
    pub hdlc: u32,
    pub info_tx: usize,
    pub info_rx: usize,
    pub window_tx: usize,
    pub window_rx: usize,
    pub ack: usize,
    pub retry: usize,
}

impl Params {
    pub const CLASSES: u32 = 1 << PARAM_CLASSES;
    pub const HDLC: u32 = 1 << PARAM_HDLC;
    pub const INFO_TX: u32 = 1 << PARAM_INFO_TX;
    pub const INFO_RX: u32 = 1 << PARAM_INFO_RX;
    pub const WINDOW_TX: u32 = 1 << PARAM_WINDOW_TX;
    pub const WINDOW_RX: u32 = 1 << PARAM_WINDOW_RX;
    pub const ACK: u32 = 1 << PARAM_ACK;
    pub const RETRY: u32 = 1 << PARAM_RETRY;

    pub(crate) fn id_for_bit(bit: u32) -> u8 {
        match bit {
            Self::CLASSES => PARAM_CLASSES,
            Self::HDLC => PARAM_HDLC,
            Self::INFO_TX => PARAM_INFO_TX,
            Self::INFO_RX => PARAM_INFO_RX,
            Self::WINDOW_TX => PARAM_WINDOW_TX,
            Self::WINDOW_RX => PARAM_WINDOW_RX,
            Self::ACK => PARAM_ACK,
            Self::RETRY => PARAM_RETRY,
            _ => unreachable!("not a known XID parameter bit"),
        }
    }

    /// Set a raw parameter id/value pair decoded off the wire. The I-field
    /// length parameters are carried on the wire as a byte count and kept
    /// here as bits (see `set_info_rx`), so they're scaled on the way in.
    pub(crate) fn set(&mut self, id: u8, value: u32) {
        match id {
            PARAM_CLASSES => self.classes = value,
            PARAM_HDLC => self.hdlc = value,
            PARAM_INFO_TX => self.info_tx = value as usize * 8,
            PARAM_INFO_RX => self.info_rx = value as usize * 8,
            PARAM_WINDOW_TX => self.window_tx = value as usize,
            PARAM_WINDOW_RX => self.window_rx = value as usize,
            PARAM_ACK => self.ack = value as usize,
            PARAM_RETRY => self.retry = value as usize,
            _ => return,
        }
        self.flags |= 1 << id;
    }

    pub fn set_classes(&mut self, classes: u32) {
        self.classes = classes;
        self.flags |= Self::CLASSES;
    }

    pub fn set_hdlc(&mut self, hdlc: u32) {
        self.hdlc = hdlc;
        self.flags |= Self::HDLC;
    }

    pub fn set_info_rx(&mut self, bytes: usize) {
        self.info_rx = bytes * 8;
        self.flags |= Self::INFO_RX;
    }

    pub fn set_window_rx(&mut self, frames: usize) {
        self.window_rx = frames;
        self.flags |= Self::WINDOW_RX;
    }

    pub fn set_ack(&mut self, millis: usize) {
        self.ack = millis;
        self.flags |= Self::ACK;
    }

    pub fn set_retry(&mut self, count: usize) {
        self.retry = count;
        self.flags |= Self::RETRY;
    }

    pub fn has(&self, bit: u32) -> bool {
        self.flags & bit != 0
    }
}
