//! AX.25 frame codec: addresses, control field, and XID parameter groups.

use crate::addr::{Address, SSID_CR, SSID_LAST};
use crate::error::{Error, Result};
use crate::xid::Params;

pub const MAX_HOPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Normal,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cr {
    Old,
    Command,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    Old,
    V2_0,
    V2_2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    I,
    Rr,
    Rnr,
    Rej,
    Srej,
    Sabm,
    Sabme,
    Disc,
    Dm,
    Ua,
    Frmr,
    Ui,
    Xid,
    Test,
}

impl FrameType {
    /// The fixed bits of the control byte that select this type (masked by
    /// `U_MASK`/`S_MASK` as appropriate; meaningless for `I`, which carries
    /// no fixed type bits).
    pub fn control_bits(self) -> u16 {
        use FrameType::*;
        match self {
            I => 0x00,
            Rr => 0x01,
            Rnr => 0x05,
            Rej => 0x09,
            Srej => 0x0d,
            Sabm => 0x2f,
            Sabme => 0x6f,
            Disc => 0x43,
            Dm => 0x0f,
            Ua => 0x63,
            Frmr => 0x87,
            Ui => 0x03,
            Xid => 0xaf,
            Test => 0xe3,
        }
    }

    fn from_s(c: u16) -> Option<FrameType> {
        use FrameType::*;
        match c {
            0x01 => Some(Rr),
            0x05 => Some(Rnr),
            0x09 => Some(Rej),
            0x0d => Some(Srej),
            _ => None,
        }
    }

    fn from_u(c: u16) -> Option<FrameType> {
        use FrameType::*;
        match c {
            0x2f => Some(Sabm),
            0x6f => Some(Sabme),
            0x43 => Some(Disc),
            0x0f => Some(Dm),
            0x63 => Some(Ua),
            0x87 => Some(Frmr),
            0x03 => Some(Ui),
            0xaf => Some(Xid),
            0xe3 => Some(Test),
            _ => None,
        }
    }

    pub fn carries_info(self) -> bool {
        matches!(self, FrameType::I | FrameType::Ui | FrameType::Test)
    }

    pub fn has_proto(self) -> bool {
        matches!(self, FrameType::I | FrameType::Ui)
    }
}

const S_MASK: u16 = 0x0f;
const U_MASK: u16 = 0xef;

fn is_i(control: u16) -> bool {
    control & 0x01 == 0x00
}
fn is_s(control: u16) -> bool {
    control & 0x03 == 0x01
}
fn is_u(control: u16) -> bool {
    control & 0x03 == 0x03
}

/// A repeater hop: the station address plus its has-been-repeated flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Repeater {
    pub addr: Address,
    pub repeated: bool,
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub dest: Address,
    pub src: Address,
    pub repeaters: Vec<Repeater>,
    pub cr: Cr,
    pub version: Version,
    pub format: Format,
    pub control: u16,
    pub ty: FrameType,
    pub nr: u8,
    pub ns: u8,
    pub pf: bool,
    pub proto: u8,
    pub info: Vec<u8>,
}

impl Frame {
    /// Decode the destination/source/repeater address list. Returns the
    /// frame (with a placeholder control section) and the number of bytes
    /// consumed.
    pub fn decode_address(buf: &[u8]) -> Result<(Frame, usize)> {
        let (dest, dest_last, dest_cr) = Address::decode(buf)?;
        if dest_last {
            return Err(Error::Decode("destination marked as last station".into()));
        }
        let (src, src_last, src_cr) = Address::decode(&buf[7..])?;
        let mut offset = 14;

        let (cr, version) = if dest_cr != src_cr {
            (if dest_cr { Cr::Command } else { Cr::Response }, Version::V2_0)
        } else {
            (Cr::Old, Version::Old)
        };

        let mut repeaters = Vec::new();
        if !src_last {
            let mut last_seen = false;
            for _ in 0..MAX_HOPS {
                if buf.len() < offset + 7 {
                    return Err(Error::Decode("truncated repeater".into()));
                }
                let (addr, last, repeated) = Address::decode(&buf[offset..])?;
                offset += 7;
                repeaters.push(Repeater { addr, repeated });
                if last {
                    last_seen = true;
                    break;
                }
            }
            if !last_seen {
                return Err(Error::Decode("repeater list has no extension bit".into()));
            }
        }

        Ok((
            Frame {
                dest,
                src,
                repeaters,
                cr,
                version,
                format: Format::Normal,
                control: 0,
                ty: FrameType::I,
                nr: 0,
                ns: 0,
                pf: false,
                proto: 0,
                info: Vec::new(),
            },
            offset,
        ))
    }

    fn decode_nr(control: u16, format: Format) -> u8 {
        match format {
            Format::Normal => ((control & 0x00e0) >> 5) as u8,
            Format::Extended => ((control & 0x7e00) >> 9) as u8,
        }
    }

    fn decode_ns(control: u16, format: Format) -> u8 {
        match format {
            Format::Normal => ((control & 0x000e) >> 1) as u8,
            Format::Extended => ((control & 0x007e) >> 1) as u8,
        }
    }

    fn decode_pf(control: u16, format: Format) -> bool {
        match format {
            Format::Normal => (control & 0x0010) != 0,
            Format::Extended => (control & 0x0100) != 0,
        }
    }

    /// Decode the control field (and, for I/UI/TEST, the protocol id and
    /// info region) starting at `offset` in `buf`. `format` is chosen by
    /// the caller based on whether the owning socket is modulo-128.
    pub fn decode_control(&mut self, format: Format, buf: &[u8], offset: usize) -> Result<usize> {
        let start = offset;
        let mut offset = offset;
        if buf.len() <= offset {
            return Err(Error::Decode("truncated control field".into()));
        }
        let mut control = buf[offset] as u16;
        offset += 1;

        let effective_format = if format == Format::Extended && !is_u(control) {
            if buf.len() <= offset {
                return Err(Error::Decode("truncated extended control field".into()));
            }
            control |= (buf[offset] as u16) << 8;
            offset += 1;
            Format::Extended
        } else {
            Format::Normal
        };

        self.control = control;
        self.format = effective_format;

        if is_i(control) {
            self.ty = FrameType::I;
            self.nr = Self::decode_nr(control, effective_format);
            self.ns = Self::decode_ns(control, effective_format);
            self.pf = Self::decode_pf(control, effective_format);
        } else if is_s(control) {
            let masked = control & S_MASK;
            self.ty = FrameType::from_s(masked)
                .ok_or_else(|| Error::Decode(format!("unknown S frame type {masked:#x}")))?;
            self.nr = Self::decode_nr(control, effective_format);
            self.pf = Self::decode_pf(control, effective_format);
        } else if is_u(control) {
            let masked = control & U_MASK;
            self.ty = FrameType::from_u(masked)
                .ok_or_else(|| Error::Decode(format!("unknown U frame type {masked:#x}")))?;
            self.pf = Self::decode_pf(control, Format::Normal);
        } else {
            return Err(Error::Decode("unclassifiable control byte".into()));
        }

        if self.ty.has_proto() {
            if buf.len() <= offset {
                return Err(Error::Decode("missing protocol id".into()));
            }
            self.proto = buf[offset];
            offset += 1;
        }
        if self.ty.carries_info() {
            self.info = buf[offset..].to_vec();
            offset = buf.len();
        }

        Ok(offset - start)
    }

    /// Emit dest/src/repeater addresses. `reply` swaps src/dest and reverses
    /// the repeater path (used by `encode_reply_to`).
    fn encode_address(&self, out: &mut Vec<u8>, reply: bool) -> Result<()> {
        let (flags_remote, flags_local) = match self.cr {
            Cr::Command => (SSID_CR, 0u8),
            Cr::Response => (0u8, SSID_CR),
            Cr::Old => (0, 0),
        };

        let mut buf = [0u8; 7];
        if reply {
            self.src.encode(&mut buf, flags_local)?;
            out.extend_from_slice(&buf);
            self.dest.encode(&mut buf, flags_remote)?;
            out.extend_from_slice(&buf);
            for rep in self.repeaters.iter().rev() {
                rep.addr.encode(&mut buf, if rep.repeated { SSID_CR } else { 0 })?;
                out.extend_from_slice(&buf);
            }
        } else {
            self.dest.encode(&mut buf, flags_remote)?;
            out.extend_from_slice(&buf);
            self.src.encode(&mut buf, flags_local)?;
            out.extend_from_slice(&buf);
            for rep in &self.repeaters {
                rep.addr.encode(&mut buf, if rep.repeated { SSID_CR } else { 0 })?;
                out.extend_from_slice(&buf);
            }
        }
        *out.last_mut().unwrap() |= SSID_LAST;
        Ok(())
    }

    fn encode_control(&self, out: &mut Vec<u8>) {
        match self.format {
            Format::Normal => out.push((self.control & 0xff) as u8),
            Format::Extended => {
                out.push((self.control & 0xff) as u8);
                if !is_u(self.control) {
                    out.push(((self.control & 0xff00) >> 8) as u8);
                }
            }
        }
    }

    /// Encode this frame to `out`, appending.
    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        self.encode_address(out, false)?;
        self.encode_control(out);
        if !self.info.is_empty() {
            if self.ty.has_proto() {
                out.push(self.proto);
            }
            out.extend_from_slice(&self.info);
        }
        Ok(())
    }

    /// Build a reply to `self`: swap source/destination, reverse the
    /// repeater path, invert C/R role, then emit `reply`'s control and info.
    pub fn encode_reply_to(&self, reply: &Frame, out: &mut Vec<u8>) -> Result<()> {
        self.encode_address(out, true)?;
        reply.encode_control(out);
        if reply.ty.has_proto() || !reply.info.is_empty() {
            if reply.ty.has_proto() {
                out.push(reply.proto);
            }
            out.extend_from_slice(&reply.info);
        }
        Ok(())
    }

    /// Build the swapped, role-inverted reply skeleton shared by UA/DM/FRMR
    /// responses and SABM/DISC retransmissions.
    pub fn reply_cr(&self) -> Cr {
        match self.cr {
            Cr::Command => Cr::Response,
            Cr::Response => Cr::Command,
            Cr::Old => Cr::Old,
        }
    }

    /// One-line human-readable dump, in the style of `ax25dump`.
    pub fn dump(&self) -> String {
        format!(
            "{} > {}{}: {:?} pf={} nr={} ns={} len={}",
            self.src,
            self.dest,
            self.repeaters
                .iter()
                .map(|r| format!(",{}{}", r.addr, if r.repeated { "*" } else { "" }))
                .collect::<String>(),
            self.ty,
            self.pf as u8,
            self.nr,
            self.ns,
            self.info.len()
        )
    }
}

pub fn decode_xid(params: &mut Params, data: &[u8]) -> Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        offset += xid::decode_group(params, &data[offset..])?;
    }
    if offset != data.len() {
        return Err(Error::Decode("trailing bytes after XID groups".into()));
    }
    Ok(())
}

pub mod xid {
    use super::*;
    use byteorder::{BigEndian, ByteOrder};

    const GROUP_FORMAT: u8 = 0x82;
    const GROUP_TYPE: u8 = 0x80;

    /// Decode one XID group starting at the front of `data`, returning the
    /// number of bytes consumed (header + body, regardless of whether the
    /// group matched the recognized format/type).
    pub fn decode_group(params: &mut Params, data: &[u8]) -> Result<usize> {
        if data.len() < 4 {
            return Err(Error::Decode("truncated XID group header".into()));
        }
        let format = data[0];
        let ty = data[1];
        let grouplen = BigEndian::read_u16(&data[2..4]) as usize;
        let body = &data[4..];
        let bound = grouplen.min(body.len());

        if format != GROUP_FORMAT || ty != GROUP_TYPE {
            return Ok(4 + bound);
        }

        *params = Params::default();
        let mut offset = 0;
        while offset < bound {
            if bound - offset < 2 {
                break;
            }
            let id = body[offset];
            let plen = body[offset + 1] as usize;
            if bound - offset - 2 < plen {
                break;
            }
            offset += 2;
            let mut value: u32 = 0;
            for i in 0..plen {
                value |= (body[offset + i] as u32) << ((plen - 1 - i) * 8);
            }
            offset += plen;
            params.set(id, value);
        }
        Ok(4 + offset)
    }

    /// Encode a parameter group carrying only the flags set in `params`.
    /// Mirrors the original's asymmetric choice to advertise only the
    /// receive-side info length and window (CLASSES/HDLC/INFO_RX/WINDOW_RX/
    /// ACK/RETRY) — the transmit-side values are never put on the wire.
    pub fn encode(params: &Params, out: &mut Vec<u8>) -> Result<()> {
        let header_at = out.len();
        out.push(GROUP_FORMAT);
        out.push(GROUP_TYPE);
        out.extend_from_slice(&[0, 0]); // length patched below

        let body_start = out.len();
        encode_param_if_set(out, params, Params::CLASSES, Some(2), params.classes)?;
        encode_param_if_set(out, params, Params::HDLC, Some(3), params.hdlc)?;
        encode_param_if_set(out, params, Params::INFO_RX, None, (params.info_rx / 8) as u32)?;
        encode_param_if_set(out, params, Params::WINDOW_RX, Some(1), params.window_rx as u32)?;
        encode_param_if_set(out, params, Params::ACK, None, params.ack as u32)?;
        encode_param_if_set(out, params, Params::RETRY, None, params.retry as u32)?;

        let body_len = out.len() - body_start;
        BigEndian::write_u16(&mut out[header_at + 2..header_at + 4], body_len as u16);
        Ok(())
    }

    fn needed_bytes(value: u32) -> usize {
        if value & 0xffff_ff00 == 0 {
            1
        } else if value & 0xffff_0000 == 0 {
            2
        } else if value & 0xff00_0000 == 0 {
            3
        } else {
            4
        }
    }

    fn encode_param_if_set(
        out: &mut Vec<u8>,
        params: &Params,
        bit: u32,
        fixed_bytes: Option<usize>,
        value: u32,
    ) -> Result<()> {
        if params.flags & bit == 0 {
            return Ok(());
        }
        let id = Params::id_for_bit(bit);
        let bytes = fixed_bytes.unwrap_or_else(|| needed_bytes(value));
        if bytes > 4 {
            return Err(Error::Overflow);
        }
        out.push(id);
        out.push(bytes as u8);
        for i in 0..bytes {
            let shift = (bytes - 1 - i) * 8;
            out.push(((value >> shift) & 0xff) as u8);
        }
        Ok(())
    }
}

impl std::fmt::Display for FrameType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn xid_parse_boundary_scenario() {
        let input = [
            0x82, 0x80, 0x00, 0x0c, 0x02, 0x02, 0x00, 0x21, 0x03, 0x02, 0x00, 0x00, 0x06, 0x01,
            0xfe,
        ];
        let mut params = Params::default();
        decode_xid(&mut params, &input).unwrap();
        assert_eq!(params.classes, 0x0021);
        assert_eq!(params.hdlc, 0);
        assert_eq!(params.info_rx, 0xfe * 8);
    }

    #[test]
    fn frame_address_round_trip() {
        let mut f = Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: vec![],
            cr: Cr::Command,
            version: Version::V2_0,
            format: Format::Normal,
            control: 0,
            ty: FrameType::Sabm,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: vec![],
        };
        f.control = (FrameType::Sabm.control_bits() | 0x10) as u16;

        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();

        let (mut decoded, addr_len) = Frame::decode_address(&buf).unwrap();
        decoded.decode_control(Format::Normal, &buf, addr_len).unwrap();

        assert_eq!(decoded.dest, f.dest);
        assert_eq!(decoded.src, f.src);
        assert_eq!(decoded.ty, FrameType::Sabm);
        assert!(decoded.pf);
        assert_eq!(decoded.cr, Cr::Command);
    }

    #[test]
    fn i_frame_with_info_round_trips() {
        let f = Frame {
            dest: addr("WIDE1-1"),
            src: addr("N0CALL-5"),
            repeaters: vec![Repeater { addr: addr("RELAY"), repeated: true }],
            cr: Cr::Response,
            version: Version::V2_0,
            format: Format::Normal,
            control: (3 << 5) | (1 << 1),
            ty: FrameType::I,
            nr: 3,
            ns: 1,
            pf: false,
            proto: 0xf0,
            info: b"hello".to_vec(),
        };
        let mut buf = Vec::new();
        f.encode(&mut buf).unwrap();

        let (mut decoded, addr_len) = Frame::decode_address(&buf).unwrap();
        decoded.decode_control(Format::Normal, &buf, addr_len).unwrap();

        assert_eq!(decoded.ty, FrameType::I);
        assert_eq!(decoded.nr, 3);
        assert_eq!(decoded.ns, 1);
        assert_eq!(decoded.proto, 0xf0);
        assert_eq!(decoded.info, b"hello");
        assert_eq!(decoded.repeaters.len(), 1);
        assert!(decoded.repeaters[0].repeated);
    }

    #[test]
    fn encode_reply_to_swaps_and_reverses() {
        let original = Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: vec![Repeater { addr: addr("R1"), repeated: false }],
            cr: Cr::Command,
            version: Version::V2_0,
            format: Format::Normal,
            control: FrameType::Sabm.control_bits() as u16 | 0x10,
            ty: FrameType::Sabm,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: vec![],
        };
        let reply = Frame {
            dest: Address::EMPTY,
            src: Address::EMPTY,
            repeaters: vec![],
            cr: Cr::Response,
            version: Version::V2_0,
            format: Format::Normal,
            control: FrameType::Ua.control_bits() as u16 | 0x10,
            ty: FrameType::Ua,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: vec![],
        };

        let mut buf = Vec::new();
        original.encode_reply_to(&reply, &mut buf).unwrap();

        let (decoded, _) = Frame::decode_address(&buf).unwrap();
        assert_eq!(decoded.dest, original.src);
        assert_eq!(decoded.src, original.dest);
        assert_eq!(decoded.cr, Cr::Response);
        assert_eq!(decoded.repeaters.len(), 1);
        assert_eq!(decoded.repeaters[0].addr, addr("R1"));
    }

    #[test]
    fn xid_round_trip_through_params() {
        let mut params = Params::default();
        params.set_classes(0x0021);
        params.window_rx = 7;
        params.set_window_rx(7);
        params.ack = 3000;
        params.set_ack(3000);

        let mut buf = Vec::new();
        xid::encode(&params, &mut buf).unwrap();

        let mut decoded = Params::default();
        decode_xid(&mut decoded, &buf).unwrap();
        assert_eq!(decoded.classes, params.classes);
        assert_eq!(decoded.window_rx, params.window_rx);
        assert_eq!(decoded.ack, params.ack);
    }
}
