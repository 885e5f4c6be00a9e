//! Per-link AX.25 connection state. `Sock` owns the sliding window, the
//! reassembler, and the negotiated parameters; it knows how to encode every
//! frame an AX.25 connection can send but never touches an interface or a
//! pty directly — the server drives the state machine and performs I/O.

use std::time::Duration;

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::frame::{Cr, Format, Frame, FrameType, Repeater};
use crate::route::IfaceId;
use crate::timer::Timer;
use crate::frame::xid as xid_codec;
use crate::xid::{self, Params};

pub const PROTO_NONE: u8 = 0xf0;
pub const PROTO_SEGMENT: u8 = 0x08;

pub const DEFAULT_DELAY_MS: u64 = 3000;
pub const DEFAULT_KEEPALIVE_MS: u64 = 30_000;
pub const DEFAULT_I_LEN: usize = 127;
pub const DEFAULT_WINDOW: usize = 4;
pub const DEFAULT_RETRY: usize = 10;
pub const DEFAULT_ACK_MS: u64 = 3000;

pub const V2_2_DEFAULT_I_LEN: usize = 255;
pub const V2_2_DEFAULT_WINDOW: usize = 32;
pub const V2_2_MAX_I_LEN: usize = 1536;
pub const V2_2_MAX_WINDOW: usize = 127;

pub const SEGMENTS_MAX: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockType {
    Stream,
    Dgram,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockVersion {
    Old,
    V2_0,
    V2_2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Listening,
    PendingAccept,
    PendingConnect,
    PendingDisconnect,
    Established,
    Promisc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Dm,
    Sabm,
    Sabme,
}

impl Mode {
    pub fn format(self) -> Format {
        match self {
            Mode::Sabme => Format::Extended,
            _ => Format::Normal,
        }
    }

    pub fn modulus(self) -> u8 {
        match self {
            Mode::Sabme => 128,
            _ => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Wait,
    Ready,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    payload: Vec<u8>,
    ack: bool,
}

/// Segment reassembly accumulator.
#[derive(Debug, Clone)]
pub struct Assembler {
    total: usize,
    remaining: usize,
    buf: Vec<u8>,
}

impl Assembler {
    fn new(total: usize, cap: usize) -> Assembler {
        Assembler { total, remaining: total, buf: Vec::with_capacity(cap) }
    }
}

pub struct Sock {
    pub ty: SockType,
    pub version: SockVersion,
    pub state: State,
    pub mode: Mode,
    pub flow: Flow,

    pub iface: Option<IfaceId>,
    pub local: Address,
    pub remote: Address,
    pub repeaters: Vec<Repeater>,

    pub proto: u8,

    pub flags_classes: u32,
    pub flags_hdlc: u32,

    pub n_maxlen_tx: usize,
    pub n_maxlen_rx: usize,
    pub n_window_tx: usize,
    pub n_window_rx: usize,
    pub n_ack: u64,
    pub n_retry: usize,

    pub timer_t1: Timer,
    pub timer_t2: Timer,
    pub timer_t3: Timer,

    pub vs: u8,
    pub vr: u8,
    pub va: u8,

    pub retries: usize,
    pub rx_pending: usize,

    slots: Vec<Slot>,
    assembler: Option<Assembler>,
}

impl Sock {
    pub fn new(ty: SockType) -> Sock {
        let mut sock = Sock {
            ty,
            version: SockVersion::V2_0,
            state: State::Closed,
            mode: Mode::Dm,
            flow: Flow::Wait,
            iface: None,
            local: Address::EMPTY,
            remote: Address::EMPTY,
            repeaters: Vec::new(),
            proto: PROTO_NONE,
            flags_classes: xid::CLASSES_ABM,
            flags_hdlc: xid::HDLC_REJ | xid::HDLC_XADDR | xid::HDLC_MODULO_8 | xid::HDLC_TEST | xid::HDLC_SYNC_TX,
            n_maxlen_tx: DEFAULT_I_LEN,
            n_maxlen_rx: DEFAULT_I_LEN,
            n_window_tx: DEFAULT_WINDOW,
            n_window_rx: DEFAULT_WINDOW,
            n_ack: DEFAULT_ACK_MS,
            n_retry: DEFAULT_RETRY,
            timer_t1: Timer::new(Duration::from_millis(DEFAULT_ACK_MS)),
            timer_t2: Timer::new(Duration::from_millis(DEFAULT_DELAY_MS)),
            timer_t3: Timer::new(Duration::from_millis(DEFAULT_KEEPALIVE_MS)),
            vs: 0,
            vr: 0,
            va: 0,
            retries: DEFAULT_RETRY,
            rx_pending: 0,
            slots: Vec::new(),
            assembler: None,
        };
        sock.realloc_slots();
        sock
    }

    /// AX.25 v2.2 Section 6.5 "Resetting Procedure".
    pub fn reset(&mut self) {
        self.flow = Flow::Ready;
        self.vs = 0;
        self.vr = 0;
        self.va = 0;
        self.retries = self.n_retry;
        self.rx_pending = 0;
        for slot in &mut self.slots {
            slot.payload.clear();
            slot.ack = false;
        }
        self.timer_t1.start();
        self.timer_t2.clear();
        self.timer_t3.clear();
    }

    pub fn bind_if(&mut self, iface: IfaceId, iface_classes: u32) {
        self.iface = Some(iface);
        self.flags_classes |= iface_classes;
    }

    pub fn params_upgrade(&mut self) {
        if self.version == SockVersion::V2_2 {
            return;
        }
        self.version = SockVersion::V2_2;
        self.flags_hdlc = xid::HDLC_REJ
            | xid::HDLC_SREJ
            | xid::HDLC_XADDR
            | xid::HDLC_MODULO_128
            | xid::HDLC_TEST
            | xid::HDLC_FCS_16
            | xid::HDLC_SYNC_TX;
        self.n_maxlen_tx = V2_2_DEFAULT_I_LEN;
        self.n_maxlen_rx = V2_2_DEFAULT_I_LEN;
        self.n_window_tx = V2_2_DEFAULT_WINDOW;
        self.n_window_rx = V2_2_DEFAULT_WINDOW;
    }

    pub fn params_max(&mut self) {
        self.version = SockVersion::V2_2;
        self.flags_hdlc = xid::HDLC_REJ
            | xid::HDLC_SREJ
            | xid::HDLC_XADDR
            | xid::HDLC_MODULO_128
            | xid::HDLC_TEST
            | xid::HDLC_FCS_16
            | xid::HDLC_SYNC_TX
            | xid::HDLC_SREJ_MULTI;
        self.n_maxlen_tx = V2_2_MAX_I_LEN;
        self.n_maxlen_rx = V2_2_MAX_I_LEN;
        self.n_window_tx = V2_2_MAX_WINDOW;
        self.n_window_rx = V2_2_MAX_WINDOW;
    }

    /// Downgrade N1/N2 to the minimum of local/peer, upgrade N_ack/N_retry
    /// to the maximum; reject a peer missing a mandatory flag.
    pub fn params_negotiate(&mut self, params: &Params) -> Result<()> {
        if params.has(Params::CLASSES) {
            if params.classes & xid::CLASSES_ABM == 0 {
                return Err(Error::NotSupported("peer does not offer ABM"));
            }
            if params.classes & xid::CLASSES_HALF_DUPLEX == 0 {
                return Err(Error::NotSupported("peer does not offer half-duplex"));
            }
            if params.classes & xid::CLASSES_FULL_DUPLEX != 0 {
                return Err(Error::NotSupported("peer requires full-duplex"));
            }
        }

        if params.has(Params::HDLC) {
            let mut hdlc = params.hdlc;
            if hdlc & xid::HDLC_REJ == 0 {
                self.flags_hdlc &= !xid::HDLC_REJ;
            }
            if hdlc & xid::HDLC_SREJ == 0 {
                self.flags_hdlc &= !xid::HDLC_SREJ;
            }
            if hdlc & xid::HDLC_XADDR == 0 {
                return Err(Error::Protocol("peer lacks extended address support"));
            }
            if hdlc & xid::HDLC_MODULO_8 == 0 {
                if hdlc & xid::HDLC_MODULO_128 == 0 {
                    return Err(Error::Protocol("peer offers no modulo"));
                }
            } else {
                if hdlc & xid::HDLC_MODULO_128 == 0 {
                    return Err(Error::Protocol("peer requires modulo-8 exclusively"));
                }
                hdlc &= !xid::HDLC_MODULO_8;
                hdlc |= xid::HDLC_MODULO_128;
            }
            if hdlc & xid::HDLC_SYNC_TX == 0 {
                return Err(Error::Protocol("peer lacks sync-tx support"));
            }
        }

        if params.has(Params::INFO_RX) && self.n_maxlen_tx > params.info_rx / 8 {
            self.n_maxlen_tx = params.info_rx / 8;
        }
        if params.has(Params::WINDOW_RX) && self.n_window_tx > params.window_rx {
            self.n_window_tx = params.window_rx;
        }
        if params.has(Params::ACK) && (self.n_ack as usize) < params.ack {
            self.n_ack = params.ack as u64;
            self.timer_t1.set_duration(Duration::from_millis(self.n_ack));
        }
        if params.has(Params::RETRY) && self.n_retry < params.retry {
            self.n_retry = params.retry;
        }

        Ok(())
    }

    fn slot_count(&self) -> usize {
        self.mode.modulus() as usize
    }

    fn tx_seq(&self, seq: usize) -> usize {
        seq % self.slot_count()
    }

    /// Resize the slot table for the negotiated modulus (called after a
    /// mode change, mirroring the original's realloc-on-negotiate).
    pub fn realloc_slots(&mut self) {
        self.slots.resize_with(self.slot_count(), Slot::default);
    }

    fn tx_slot_save(&mut self, seq: u8, buf: &[u8]) {
        let i = self.tx_seq(seq as usize);
        self.slots[i].payload = buf.to_vec();
        self.slots[i].ack = false;
    }

    /// True once V(S) has reached V(A) + window.
    pub fn window_full(&self) -> bool {
        if self.n_window_tx == 1 {
            return true;
        }
        let edge = self.tx_seq(self.va as usize + self.n_window_tx);
        self.vs as usize == edge
    }

    fn format(&self) -> Format {
        self.mode.format()
    }

    fn control_i(&self, ns: u8) -> u16 {
        let pf = self.window_full() as u16;
        match self.mode {
            Mode::Sabm => (((self.vr & 0x07) as u16) << 5) | (((ns & 0x07) as u16) << 1) | (pf << 4),
            Mode::Sabme => (((self.vr & 0x7f) as u16) << 9) | (((ns & 0x7f) as u16) << 1) | (pf << 8),
            Mode::Dm => 0,
        }
    }

    fn control_ui(&self, pf: bool) -> u16 {
        (FrameType::Ui.control_bits()) | ((pf as u16) << 4)
    }

    fn control_s(&self, ty: FrameType, pf: bool) -> u16 {
        let bits = ty.control_bits();
        match self.mode {
            Mode::Sabm => (((self.vr & 0x07) as u16) << 5) | (bits & 0x0f) | ((pf as u16) << 4),
            Mode::Sabme => (((self.vr & 0x7f) as u16) << 9) | (bits & 0x0f) | ((pf as u16) << 8),
            Mode::Dm => bits,
        }
    }

    fn control_u(ty: FrameType, pf: bool) -> u16 {
        ty.control_bits() | ((pf as u16) << 4)
    }

    fn build_frame(&self, cr: Cr, control: u16, ty: FrameType, nr: u8, ns: u8, pf: bool, proto: u8, info: Vec<u8>) -> Frame {
        Frame {
            dest: self.remote,
            src: self.local,
            repeaters: self.repeaters.clone(),
            cr,
            version: match self.version {
                SockVersion::Old => crate::frame::Version::Old,
                SockVersion::V2_0 => crate::frame::Version::V2_0,
                SockVersion::V2_2 => crate::frame::Version::V2_2,
            },
            format: self.format(),
            control,
            ty,
            nr,
            ns,
            pf,
            proto,
            info,
        }
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        frame.encode(&mut out)?;
        Ok(out)
    }

    pub fn encode_rr(&self, cr: Cr, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(cr, self.control_s(FrameType::Rr, pf), FrameType::Rr, self.vr, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_rnr(&self, cr: Cr, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(cr, self.control_s(FrameType::Rnr, pf), FrameType::Rnr, self.vr, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_rej(&self, cr: Cr, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(cr, self.control_s(FrameType::Rej, pf), FrameType::Rej, self.vr, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_srej(&self, cr: Cr) -> Result<Vec<u8>> {
        let f = self.build_frame(cr, self.control_s(FrameType::Srej, true), FrameType::Srej, self.vr, 0, true, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_sabm(&self, pf: bool) -> Result<Vec<u8>> {
        let ty = if self.mode == Mode::Sabme { FrameType::Sabme } else { FrameType::Sabm };
        let f = self.build_frame(Cr::Command, Self::control_u(ty, pf), ty, 0, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_disc(&self, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(
            Cr::Command,
            Self::control_u(FrameType::Disc, pf),
            FrameType::Disc,
            0,
            0,
            pf,
            0,
            vec![],
        );
        self.encode(&f)
    }

    pub fn encode_ua(&self, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(Cr::Response, Self::control_u(FrameType::Ua, pf), FrameType::Ua, 0, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    pub fn encode_dm(&self, pf: bool) -> Result<Vec<u8>> {
        let f = self.build_frame(Cr::Response, Self::control_u(FrameType::Dm, pf), FrameType::Dm, 0, 0, pf, 0, vec![]);
        self.encode(&f)
    }

    /// Advertise the maximal v2.2 parameter set.
    pub fn encode_xid(&self, cr: Cr) -> Result<Vec<u8>> {
        if self.iface.is_none() {
            return Err(Error::NetworkDown);
        }
        let mut params = Params::default();
        params.set_classes(self.flags_classes);
        params.set_hdlc(xid::HDLC_REJ | xid::HDLC_SREJ | xid::HDLC_XADDR | xid::HDLC_MODULO_128 | xid::HDLC_TEST | xid::HDLC_FCS_16 | xid::HDLC_SYNC_TX | xid::HDLC_SREJ_MULTI);
        params.set_info_rx(V2_2_MAX_I_LEN);
        params.set_window_rx(V2_2_MAX_WINDOW);
        params.set_ack(self.n_ack as usize);
        params.set_retry(self.n_retry);

        let mut info = Vec::new();
        xid_codec::encode(&params, &mut info)?;

        let f = self.build_frame(cr, Self::control_u(FrameType::Xid, false), FrameType::Xid, 0, 0, false, 0, info);
        self.encode(&f)
    }

    pub fn encode_test(&self, cr: Cr, info: &[u8]) -> Result<Vec<u8>> {
        let f = self.build_frame(cr, Self::control_u(FrameType::Test, true), FrameType::Test, 0, 0, true, 0, info.to_vec());
        self.encode(&f)
    }

    /// Resend the I frame carrying sequence number `seq`, if still unacked.
    pub fn resend(&self, seq: u8) -> Result<Option<Vec<u8>>> {
        let slot = &self.slots[self.tx_seq(seq as usize)];
        if slot.payload.is_empty() {
            return Ok(None);
        }
        let f = self.build_frame(Cr::Command, self.control_i(seq), FrameType::I, self.vr, seq, self.window_full(), self.proto, slot.payload.clone());
        Ok(Some(self.encode(&f)?))
    }

    /// Resend the oldest unacknowledged frame at V(S), if one is pending.
    pub fn resend_pending(&mut self) -> Result<Option<Vec<u8>>> {
        let i = self.tx_seq(self.vs as usize);
        if self.slots[i].payload.is_empty() || self.slots[i].ack {
            return Ok(None);
        }
        let out = self.resend(self.vs)?;
        Ok(out)
    }

    /// Mark slots `[V(A), nr)` acked, advance V(A). Returns the count of
    /// newly-acked slots.
    pub fn ack(&mut self, nr: u8) -> usize {
        let min = self.va as usize;
        let mut max = nr as usize;
        if max < min {
            max += self.mode.modulus() as usize;
        }
        if min == max {
            return 0;
        }
        let mut acked = 0;
        for i in min..max {
            let idx = self.tx_seq(i);
            let slot = &mut self.slots[idx];
            if !slot.payload.is_empty() && !slot.ack {
                slot.ack = true;
                self.va = self.tx_seq(i + 1) as u8;
                acked += 1;
            }
        }
        acked
    }

    pub fn ack_pending(&self) -> usize {
        self.slots.iter().filter(|s| !s.payload.is_empty() && !s.ack).count()
    }

    pub fn vs_incr(&mut self) {
        self.vs = ((self.vs as usize + 1) % self.mode.modulus() as usize) as u8;
    }

    pub fn vr_incr(&mut self) {
        self.vr = ((self.vr as usize + 1) % self.mode.modulus() as usize) as u8;
    }

    pub fn assembler_init(&mut self, total: usize) -> Result<()> {
        if total < 2 {
            return Err(Error::Protocol("segment count below minimum"));
        }
        let cap = total * self.n_maxlen_rx;
        if cap > crate::iface::ASSEMBLER_CEILING {
            return Err(Error::Overflow);
        }
        if self.assembler.as_ref().map(|a| a.total < total).unwrap_or(true) {
            self.assembler = Some(Assembler::new(total, cap));
        }
        Ok(())
    }

    pub fn assembler_pending(&self, remaining: usize) -> bool {
        match &self.assembler {
            Some(a) if a.total != 0 => remaining + 1 == a.remaining,
            _ => false,
        }
    }

    pub fn assembler_stop(&mut self) {
        self.assembler = None;
    }

    pub fn assembler_save(&mut self, buf: &[u8]) -> Result<()> {
        if buf.len() > self.n_maxlen_rx - 1 {
            return Err(Error::Overflow);
        }
        let a = self.assembler.as_mut().ok_or(Error::Protocol("no reassembly in progress"))?;
        if a.remaining == 0 {
            return Err(Error::Decode("segment received after reassembly complete".into()));
        }
        a.buf.extend_from_slice(buf);
        a.remaining -= 1;
        Ok(())
    }

    /// Consume the completed reassembly, returning `(protocol id, payload)`.
    pub fn assembler_read(&mut self) -> Option<(u8, Vec<u8>)> {
        let a = self.assembler.take()?;
        if a.buf.is_empty() {
            return Some((0, Vec::new()));
        }
        Some((a.buf[0], a.buf[1..].to_vec()))
    }

    fn write_segmented(&mut self, buf: &[u8]) -> Result<Vec<Vec<u8>>> {
        if self.n_maxlen_tx < 2 {
            return Err(Error::Overflow);
        }
        let seglen = self.n_maxlen_tx - 1;
        let mut segments = (buf.len() + 1) / seglen;
        if (buf.len() + 1) % seglen != 0 {
            segments += 1;
        }
        if segments > SEGMENTS_MAX {
            return Err(Error::Overflow);
        }

        let mut frames = Vec::with_capacity(segments);
        let mut first = true;
        let mut offset = 0usize;
        let mut remaining = segments;

        while remaining > 0 {
            remaining -= 1;
            let mut piece = vec![(remaining & 0xff) as u8 | if first { 0x80 } else { 0 }];
            if first {
                piece.push(self.proto);
            }
            let take = if remaining == 0 { buf.len() - offset } else { seglen - (if first { 1 } else { 0 }) };
            piece.extend_from_slice(&buf[offset..offset + take]);
            offset += take;

            if self.ty == SockType::Stream {
                self.tx_slot_save(self.vs, &piece[if first { 2 } else { 1 }..]);
            }

            let control = if self.ty == SockType::Stream { self.control_i(self.vs) } else { self.control_ui(false) };
            let ty = if self.ty == SockType::Stream { FrameType::I } else { FrameType::Ui };
            let f = self.build_frame(Cr::Command, control, ty, self.vr, self.vs, false, PROTO_SEGMENT, piece);
            frames.push(self.encode(&f)?);

            if self.ty == SockType::Stream {
                self.vs_incr();
            }
            first = false;
        }

        Ok(frames)
    }

    /// Accept a pty write, segmenting if needed. Returns the encoded frames
    /// to hand to the bound interface's `send`, in order.
    pub fn write(&mut self, buf: &[u8]) -> Result<Vec<Vec<u8>>> {
        if self.mode == Mode::Dm {
            return Err(Error::State("socket has no peer"));
        }

        match self.ty {
            SockType::Stream => {
                if buf.len() > self.n_maxlen_tx {
                    return self.write_segmented(buf);
                }
                self.tx_slot_save(self.vs, buf);
                let f = self.build_frame(Cr::Command, self.control_i(self.vs), FrameType::I, self.vr, self.vs, false, self.proto, buf.to_vec());
                let encoded = self.encode(&f)?;
                self.vs_incr();
                Ok(vec![encoded])
            }
            SockType::Dgram => {
                if buf.len() > self.n_maxlen_tx {
                    return self.write_segmented(buf);
                }
                let f = self.build_frame(Cr::Command, self.control_ui(false), FrameType::Ui, 0, 0, false, self.proto, buf.to_vec());
                Ok(vec![self.encode(&f)?])
            }
            SockType::Raw => Err(Error::Protocol("raw sockets bypass the write path")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn linked(ty: SockType) -> Sock {
        let mut s = Sock::new(ty);
        s.local = addr("TEST-1");
        s.remote = addr("PEER-0");
        s.iface = Some(0);
        s.mode = Mode::Sabm;
        s
    }

    #[test]
    fn ack_advances_va_and_restarts_t1() {
        let mut s = linked(SockType::Stream);
        s.write(b"one").unwrap();
        s.write(b"two").unwrap();
        s.write(b"three").unwrap();
        assert_eq!(s.vs, 3);

        let acked = s.ack(2);
        assert_eq!(acked, 2);
        assert_eq!(s.va, 2);
        assert_eq!(s.ack_pending(), 1);
    }

    #[test]
    fn retry_exhaustion_boundary_scenario() {
        let mut s = linked(SockType::Stream);
        s.state = State::PendingConnect;
        s.n_retry = 3;
        s.retries = 3;
        s.timer_t1.start();

        let mut retransmits = 0;
        loop {
            s.timer_t1.tick(Duration::from_millis(DEFAULT_ACK_MS));
            if !s.timer_t1.expired() {
                break;
            }
            if s.retries == 0 {
                break;
            }
            s.retries -= 1;
            s.timer_t1.start();
            retransmits += 1;
        }
        assert_eq!(retransmits, 3);
        assert_eq!(s.retries, 0);
    }

    #[test]
    fn window_full_blocks_further_sends() {
        let mut s = linked(SockType::Stream);
        s.n_window_tx = 2;
        assert!(!s.window_full());
        s.write(b"a").unwrap();
        s.write(b"b").unwrap();
        assert!(s.window_full());
    }

    #[test]
    fn segmentation_round_trips_through_reassembler() {
        let mut s = linked(SockType::Stream);
        s.n_maxlen_tx = 4;
        s.proto = 0xcc;
        let payload: Vec<u8> = (0..20u8).collect();
        let frames = s.write(&payload).unwrap();
        assert!(frames.len() > 1);

        let mut rx = Sock::new(SockType::Stream);
        rx.n_maxlen_rx = 4;
        for encoded in &frames {
            let (mut f, addr_len) = Frame::decode_address(encoded).unwrap();
            f.decode_control(Format::Normal, encoded, addr_len).unwrap();
            let info = &f.info;
            let first = info[0] & 0x80 != 0;
            let remaining = (info[0] & 0x7f) as usize;
            let body = &info[1..];
            if first {
                rx.assembler_init(frames.len()).unwrap();
            }
            assert!(rx.assembler_pending(remaining));
            rx.assembler_save(body).unwrap();
        }
        let (proto, data) = rx.assembler_read().unwrap();
        assert_eq!(proto, 0xcc);
        assert_eq!(data, payload);
    }

    #[test]
    fn negotiate_rejects_missing_xaddr() {
        let mut s = linked(SockType::Stream);
        let mut params = Params::default();
        params.set_hdlc(xid::HDLC_MODULO_8);
        assert!(s.params_negotiate(&params).is_err());
    }

    #[test]
    fn negotiate_downgrades_to_peer_minimum() {
        let mut s = linked(SockType::Stream);
        let mut params = Params::default();
        params.set_info_rx(16);
        params.set_window_rx(2);
        s.params_negotiate(&params).unwrap();
        assert_eq!(s.n_maxlen_tx, 16);
        assert_eq!(s.n_window_tx, 2);
    }
}
