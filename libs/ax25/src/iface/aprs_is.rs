//! APRS-IS driver: a TCP feed of TNC2-format text lines (`SRC>DST,HOP:BODY`)
//! translated to and from AX.25 UI frames.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::frame::{Cr, Frame, FrameType, Repeater};
use crate::iface::{InterfaceDriver, Stats};

pub const PAYLOAD_MAX: usize = 256;
pub const PACKET_MAX: usize = 512;
pub const DEFAULT_APPNAME: &str = "patty-aprs-is";
pub const DEFAULT_VERSION: &str = "0.0.0";
const CONNECT_ATTEMPTS_MAX: usize = 3;

#[derive(Debug, Clone)]
pub struct AprsIsInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub appname: String,
    pub version: String,
    pub filter: String,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Header,
    Comment,
    Body,
    Complete,
}

fn addr_char_valid(c: u8) -> bool {
    c.is_ascii_graphic()
}

pub struct AprsIs {
    info: AprsIsInfo,
    stream: TcpStream,

    rx_buf: [u8; PACKET_MAX],
    readlen: usize,
    offset_i: usize,

    call: String,
    body: Vec<u8>,

    state: State,

    dest: Address,
    src: Address,
    repeaters: Vec<Repeater>,

    encoded: Vec<u8>,
    stats: Stats,
}

fn login_line(info: &AprsIsInfo) -> String {
    format!(
        "user {} pass {} vers {} {} filter {}\r\n",
        info.user, info.pass, info.appname, info.version, info.filter
    )
}

fn connect(info: &AprsIsInfo) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((info.host.as_str(), info.port))?;
    stream.write_all(login_line(info).as_bytes())?;
    Ok(stream)
}

impl AprsIs {
    pub fn new(info: AprsIsInfo) -> Result<AprsIs> {
        let stream = connect(&info)?;
        Ok(AprsIs {
            info,
            stream,
            rx_buf: [0u8; PACKET_MAX],
            readlen: 0,
            offset_i: 0,
            call: String::with_capacity(crate::addr::ADDRSTRLEN),
            body: Vec::with_capacity(PAYLOAD_MAX),
            state: State::Header,
            dest: Address::EMPTY,
            src: Address::EMPTY,
            repeaters: Vec::new(),
            encoded: Vec::new(),
            stats: Stats::default(),
        })
    }

    fn reset_parse(&mut self) {
        self.state = State::Header;
        self.call.clear();
        self.body.clear();
        self.dest = Address::EMPTY;
        self.src = Address::EMPTY;
        self.repeaters.clear();
    }

    fn drop_line(&mut self) -> usize {
        self.stats.dropped += 1;
        self.flush(&mut []).unwrap_or(0)
    }
}

impl InterfaceDriver for AprsIs {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn fill(&mut self) -> Result<usize> {
        let n = self.stream.read(&mut self.rx_buf)?;
        self.readlen = n;
        self.offset_i = 0;
        Ok(n)
    }

    /// Text lines have no partial-frame representation; decoded bytes only
    /// become available from `flush` once a full line parses.
    fn drain(&mut self, _buf: &mut [u8]) -> Result<usize> {
        let start = self.offset_i;

        while self.offset_i < self.readlen {
            let c = self.rx_buf[self.offset_i];
            self.offset_i += 1;

            match self.state {
                State::Header => {
                    let mut completed_addr: Option<Address> = None;

                    match c {
                        b'#' => self.state = State::Comment,
                        b'>' => {
                            completed_addr = Some(Address::EMPTY);
                        }
                        b',' | b':' => {
                            completed_addr = Some(Address::EMPTY);
                            if c == b':' {
                                self.state = State::Body;
                            }
                        }
                        c if addr_char_valid(c) => {
                            if self.call.len() == crate::addr::ADDRSTRLEN {
                                return Ok(self.drop_line() + (self.offset_i - start - 1));
                            }
                            self.call.push(c as char);
                        }
                        _ => {
                            return Ok(self.drop_line() + (self.offset_i - start - 1));
                        }
                    }

                    if completed_addr.is_some() {
                        let parsed = match Address::parse(&self.call) {
                            Ok(a) => a,
                            Err(_) => return Ok(self.drop_line() + (self.offset_i - start)),
                        };
                        self.call.clear();

                        if self.src == Address::EMPTY && self.dest == Address::EMPTY {
                            self.src = parsed;
                        } else if self.dest == Address::EMPTY {
                            self.dest = parsed;
                        } else {
                            if self.repeaters.len() == crate::frame::MAX_HOPS {
                                return Ok(self.drop_line() + (self.offset_i - start));
                            }
                            self.repeaters.push(Repeater { addr: parsed, repeated: false });
                        }
                    }
                }

                State::Comment => {
                    if c == b'\n' {
                        self.state = State::Header;
                        return Ok(self.offset_i - start);
                    }
                }

                State::Body => {
                    if c == b'\r' {
                    } else if c == b'\n' {
                        self.state = State::Complete;

                        let frame = Frame {
                            dest: self.dest,
                            src: self.src,
                            repeaters: std::mem::take(&mut self.repeaters),
                            cr: Cr::Command,
                            version: crate::frame::Version::Old,
                            format: crate::frame::Format::Normal,
                            control: FrameType::Ui.control_bits(),
                            ty: FrameType::Ui,
                            nr: 0,
                            ns: 0,
                            pf: false,
                            proto: crate::sock::PROTO_NONE,
                            info: std::mem::take(&mut self.body),
                        };

                        self.encoded.clear();
                        frame.encode(&mut self.encoded)?;

                        return Ok(self.offset_i - start);
                    } else {
                        if self.body.len() == PAYLOAD_MAX {
                            return Ok(self.drop_line() + (self.offset_i - start));
                        }
                        self.body.push(c);
                    }
                }

                State::Complete => return Ok(self.offset_i - start),
            }
        }

        Ok(self.offset_i - start)
    }

    fn pending(&self) -> bool {
        self.state == State::Complete
    }

    fn flush(&mut self, buf: &mut [u8]) -> Result<usize> {
        let len = self.encoded.len().min(buf.len());
        buf[..len].copy_from_slice(&self.encoded[..len]);
        self.reset_parse();
        self.stats.rx_frames += 1;
        self.stats.rx_bytes += len as u64;
        Ok(len)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let (mut frame, consumed) = Frame::decode_address(buf)?;
        let consumed = consumed + frame.decode_control(crate::frame::Format::Normal, buf, consumed)?;

        if frame.ty != FrameType::Ui {
            return Ok(0);
        }

        let mut line = format!("{}>{}", frame.src, frame.dest);
        for hop in &frame.repeaters {
            line.push(',');
            line.push_str(&hop.addr.to_string());
        }
        line.push(':');

        let mut out = line.into_bytes();
        if out.len() + frame.info.len() + 2 > PACKET_MAX {
            return Err(Error::Overflow);
        }
        out.append(&mut frame.info);
        out.extend_from_slice(b"\r\n");

        let mut attempt = 0;
        loop {
            match self.stream.write_all(&out) {
                Ok(()) => break,
                Err(e) => {
                    attempt += 1;
                    if attempt == CONNECT_ATTEMPTS_MAX {
                        return Err(Error::Io(e));
                    }
                    if e.raw_os_error() == Some(libc::EIO) {
                        self.stream = connect(&self.info)?;
                    } else {
                        return Err(Error::Io(e));
                    }
                }
            }
        }

        self.stats.tx_frames += 1;
        self.stats.tx_bytes += out.len() as u64;
        Ok(consumed)
    }

    fn reset(&mut self) -> Result<()> {
        for _ in 0..CONNECT_ATTEMPTS_MAX {
            if let Ok(stream) = connect(&self.info) {
                self.stream = stream;
                return Ok(());
            }
        }
        Err(Error::NetworkDown)
    }

    fn stats(&self) -> Stats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use std::net::TcpListener;
    use std::thread;

    fn test_info(port: u16) -> AprsIsInfo {
        AprsIsInfo {
            host: "127.0.0.1".into(),
            port,
            user: "N0CALL".into(),
            pass: "-1".into(),
            appname: DEFAULT_APPNAME.into(),
            version: DEFAULT_VERSION.into(),
            filter: "m/50".into(),
        }
    }

    #[test]
    fn login_line_has_expected_fields() {
        let info = test_info(0);
        let line = login_line(&info);
        assert_eq!(line, "user N0CALL pass -1 vers patty-aprs-is 0.0.0 filter m/50\r\n");
    }

    #[test]
    fn sends_login_on_connect_and_decodes_one_tnc2_line() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = std::io::BufReader::new(stream.try_clone().unwrap());
            let mut login = String::new();
            reader.read_line(&mut login).unwrap();
            assert!(login.starts_with("user N0CALL"));
            stream.write_all(b"N0CALL-1>APRS,WIDE1-1:>hello world\r\n").unwrap();
        });

        let mut aprs = AprsIs::new(test_info(port)).unwrap();
        server.join().unwrap();

        aprs.fill().unwrap();
        let mut scratch = [0u8; 512];
        loop {
            aprs.drain(&mut scratch).unwrap();
            if aprs.pending() {
                break;
            }
        }
        let len = aprs.flush(&mut scratch).unwrap();

        let (frame, consumed) = Frame::decode_address(&scratch[..len]).unwrap();
        let mut frame = frame;
        frame.decode_control(crate::frame::Format::Normal, &scratch[..len], consumed).unwrap();
        assert_eq!(frame.src, Address::parse("N0CALL-1").unwrap());
        assert_eq!(frame.dest, Address::parse("APRS").unwrap());
        assert_eq!(frame.repeaters.len(), 1);
        assert_eq!(frame.ty, FrameType::Ui);
        assert_eq!(frame.info, b">hello world");
    }
}
