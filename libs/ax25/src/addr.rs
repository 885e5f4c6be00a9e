//! Station address codec: text <-> binary, and the Jenkins one-at-a-time
//! hash used to key the route table.

use crate::error::{Error, Result};

pub const CALLSTRLEN: usize = 6;
pub const ADDRSTRLEN: usize = CALLSTRLEN + 3;

/// Bit set in the trailing station's SSID byte to terminate an address list.
pub const SSID_LAST: u8 = 0x01;
/// C/R role bit (destination/source) or "has-been-repeated" bit (repeater).
pub const SSID_CR: u8 = 0x80;
/// Reserved bits that are always set to 1 on the wire.
const SSID_RESERVED: u8 = 0x60;

/// A 6-character callsign plus SSID, stored in plain text form (uppercase
/// letters/digits are conventional but not enforced; see the callsign text
/// form note in the external interfaces).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub struct Address {
    pub call: [u8; CALLSTRLEN],
    pub ssid: u8,
}

impl Address {
    pub const EMPTY: Address = Address { call: [b' '; CALLSTRLEN], ssid: 0 };

    /// Parse a textual callsign of the form `CALL[-SSID]`.
    pub fn parse(text: &str) -> Result<Address> {
        if text.is_empty() || text.len() > ADDRSTRLEN {
            return Err(Error::Protocol("invalid callsign length"));
        }

        let mut call = [b' '; CALLSTRLEN];
        let mut len = 0usize;
        let mut ssid: u32 = 0;
        let mut digits = 0usize;
        let mut in_ssid = false;
        let mut last = 0u8;

        for b in text.bytes() {
            last = b;
            if !in_ssid {
                if b == b'-' {
                    in_ssid = true;
                } else if (0x20..=0x7e).contains(&b) {
                    if len >= CALLSTRLEN {
                        return Err(Error::Protocol("callsign too long"));
                    }
                    call[len] = b;
                    len += 1;
                } else {
                    return Err(Error::Protocol("invalid callsign character"));
                }
            } else {
                if digits == 2 || !b.is_ascii_digit() {
                    return Err(Error::Protocol("invalid ssid"));
                }
                ssid = ssid * 10 + (b - b'0') as u32;
                digits += 1;
            }
        }

        if last == b'-' || ssid > 15 {
            return Err(Error::Protocol("invalid ssid"));
        }

        Ok(Address { call, ssid: ssid as u8 })
    }

    /// Render in canonical `CALL[-SSID]` form (trailing blanks trimmed,
    /// SSID omitted when zero).
    pub fn format(&self) -> String {
        let mut s = String::with_capacity(ADDRSTRLEN);
        for &c in &self.call {
            if c == b' ' {
                break;
            }
            s.push(c as char);
        }
        if self.ssid > 0 {
            s.push('-');
            s.push_str(&self.ssid.to_string());
        }
        s
    }

    /// Jenkins one-at-a-time hash over the six callsign bytes plus the SSID
    /// number, using staged `init -> data -> end` mixing so a pair of
    /// addresses can be hashed by calling `data` twice.
    pub fn hash(&self) -> u32 {
        let mut h = hash_init();
        hash_data(&mut h, &self.call);
        hash_data(&mut h, &[self.ssid]);
        hash_end(&mut h);
        h
    }

    /// Hash a (local, remote) address pair for the by-pair socket index.
    pub fn hash_pair(local: &Address, remote: &Address) -> u32 {
        let mut h = hash_init();
        hash_data(&mut h, &local.call);
        hash_data(&mut h, &[local.ssid]);
        hash_data(&mut h, &remote.call);
        hash_data(&mut h, &[remote.ssid]);
        hash_end(&mut h);
        h
    }

    /// Decode one 7-octet wire station. Returns the address, whether this
    /// was the last station in the list, and the raw SSID byte's high bits
    /// (C/R role for dest/src, has-been-repeated for a repeater).
    pub fn decode(buf: &[u8]) -> Result<(Address, bool, bool)> {
        if buf.len() < 7 {
            return Err(Error::Decode("short address".into()));
        }
        let mut call = [0u8; CALLSTRLEN];
        for i in 0..CALLSTRLEN {
            let shifted = buf[i];
            let c = shifted >> 1;
            if !(0x20..=0x7e).contains(&c) || shifted & SSID_LAST != 0 {
                return Err(Error::Decode("invalid address character".into()));
            }
            call[i] = c;
        }
        // no interior blanks followed by non-blanks: once a blank is seen,
        // every remaining character must also be blank (trailing padding).
        let mut seen_blank = false;
        for &c in &call {
            if c == b' ' {
                seen_blank = true;
            } else if seen_blank {
                return Err(Error::Decode("interior blank in callsign".into()));
            }
        }
        let ssid_byte = buf[6];
        let ssid = (ssid_byte & 0x1e) >> 1;
        let last = (ssid_byte & SSID_LAST) != 0;
        let flag = (ssid_byte & SSID_CR) != 0;
        Ok((Address { call, ssid }, last, flag))
    }

    /// Emit the 7-byte wire form. `ssid_flags` is OR'd into the SSID byte
    /// (e.g. `SSID_CR` for command role / has-been-repeated, `SSID_LAST`
    /// to terminate the address list).
    pub fn encode(&self, buf: &mut [u8], ssid_flags: u8) -> Result<usize> {
        if buf.len() < 7 {
            return Err(Error::Overflow);
        }
        for i in 0..CALLSTRLEN {
            buf[i] = self.call[i] << 1;
        }
        buf[6] = ssid_flags | SSID_RESERVED | ((self.ssid & 0x0f) << 1);
        Ok(7)
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.format())
    }
}

fn hash_init() -> u32 {
    0xffff_ffdf
}

fn hash_data(h: &mut u32, data: &[u8]) {
    for &c in data {
        *h = h.wrapping_add(c as u32);
        *h = h.wrapping_add(h.wrapping_shl(10));
        *h ^= *h >> 6;
    }
}

fn hash_end(h: &mut u32) {
    *h = h.wrapping_add(h.wrapping_shl(3));
    *h ^= *h >> 11;
    *h = h.wrapping_add(h.wrapping_shl(15));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_ssid() {
        let a = Address::parse("N0CALL-7").unwrap();
        assert_eq!(&a.call, b"N0CALL");
        assert_eq!(a.ssid, 7);
        assert_eq!(a.format(), "N0CALL-7");
    }

    #[test]
    fn round_trip_without_ssid_strips_dash_zero() {
        let a = Address::parse("N0CALL-0").unwrap();
        assert_eq!(a.ssid, 0);
        assert_eq!(a.format(), "N0CALL");
    }

    #[test]
    fn short_callsign_is_padded() {
        let a = Address::parse("AB").unwrap();
        assert_eq!(&a.call, b"AB    ");
    }

    #[test]
    fn rejects_ssid_over_15() {
        assert!(Address::parse("N0CALL-16").is_err());
    }

    #[test]
    fn rejects_trailing_dash() {
        assert!(Address::parse("N0CALL-").is_err());
    }

    #[test]
    fn wire_round_trip() {
        let a = Address::parse("WIDE2-1").unwrap();
        let mut buf = [0u8; 7];
        a.encode(&mut buf, SSID_LAST).unwrap();
        let (decoded, last, flag) = Address::decode(&buf).unwrap();
        assert_eq!(decoded, a);
        assert!(last);
        assert!(!flag);
    }

    #[test]
    fn decode_rejects_interior_blank() {
        let mut buf = [0u8; 7];
        let a = Address { call: *b"AB  CD", ssid: 0 };
        a.encode(&mut buf, 0).unwrap();
        assert!(Address::decode(&buf).is_err());
    }

    #[test]
    fn hash_pair_is_order_sensitive() {
        let a = Address::parse("TEST-1").unwrap();
        let b = Address::parse("PEER-0").unwrap();
        assert_ne!(Address::hash_pair(&a, &b), Address::hash_pair(&b, &a));
    }
}
