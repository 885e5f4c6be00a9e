//! Wire protocol for the local-domain control socket: fixed-layout request
//! and response records, mirroring a BSD-sockets-like API.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::addr::Address;
use crate::error::{Error, Result};

pub const DEFAULT_SOCK_PATH: &str = "/var/run/patty/patty.sock";
pub const PATH_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    None,
    Ping,
    Socket,
    SetSockOpt,
    Bind,
    Listen,
    Accept,
    Connect,
    Close,
    SendTo,
    RecvFrom,
}

impl Tag {
    fn from_u32(v: u32) -> Result<Tag> {
        Ok(match v {
            0 => Tag::None,
            1 => Tag::Ping,
            2 => Tag::Socket,
            3 => Tag::SetSockOpt,
            4 => Tag::Bind,
            5 => Tag::Listen,
            6 => Tag::Accept,
            7 => Tag::Connect,
            8 => Tag::Close,
            9 => Tag::SendTo,
            10 => Tag::RecvFrom,
            _ => return Err(Error::Protocol("unknown client call tag")),
        })
    }

    fn as_u32(self) -> u32 {
        match self {
            Tag::None => 0,
            Tag::Ping => 1,
            Tag::Socket => 2,
            Tag::SetSockOpt => 3,
            Tag::Bind => 4,
            Tag::Listen => 5,
            Tag::Accept => 6,
            Tag::Connect => 7,
            Tag::Close => 8,
            Tag::SendTo => 9,
            Tag::RecvFrom => 10,
        }
    }

    pub fn write(self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.as_u32())?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Tag> {
        Tag::from_u32(r.read_u32::<LittleEndian>()?)
    }
}

/// Socket option selector for `SETSOCKOPT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockOpt {
    Params,
    If,
}

pub const OPT_PARAM_MTU: u32 = 1 << 5;
pub const OPT_PARAM_WINDOW: u32 = 1 << 7;
pub const OPT_PARAM_ACK: u32 = 1 << 9;
pub const OPT_PARAM_RETRY: u32 = 1 << 10;

fn write_addr(w: &mut impl Write, addr: &Address) -> Result<()> {
    w.write_all(&addr.call)?;
    w.write_u8(addr.ssid)?;
    Ok(())
}

fn read_addr(r: &mut impl Read) -> Result<Address> {
    let mut call = [0u8; 6];
    r.read_exact(&mut call)?;
    let ssid = r.read_u8()?;
    Ok(Address { call, ssid })
}

fn write_path(w: &mut impl Write, path: &str) -> Result<()> {
    let bytes = path.as_bytes();
    if bytes.len() >= PATH_SIZE {
        return Err(Error::Overflow);
    }
    let mut buf = [0u8; PATH_SIZE];
    buf[..bytes.len()].copy_from_slice(bytes);
    w.write_all(&buf)?;
    Ok(())
}

fn read_path(r: &mut impl Read) -> Result<String> {
    let mut buf = [0u8; PATH_SIZE];
    r.read_exact(&mut buf)?;
    let end = buf.iter().position(|&b| b == 0).unwrap_or(PATH_SIZE);
    Ok(String::from_utf8_lossy(&buf[..end]).into_owned())
}

/// Every response carries `{ret, eno}`; `ret < 0` signals failure with
/// `eno` set to the nearest POSIX errno.
#[derive(Debug, Clone, Copy, Default)]
pub struct Status {
    pub ret: i32,
    pub eno: i32,
}

impl Status {
    pub fn ok(ret: i32) -> Status {
        Status { ret, eno: 0 }
    }

    pub fn err(eno: i32) -> Status {
        Status { ret: -1, eno }
    }

    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.ret)?;
        w.write_i32::<LittleEndian>(self.eno)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<Status> {
        let ret = r.read_i32::<LittleEndian>()?;
        let eno = r.read_i32::<LittleEndian>()?;
        Ok(Status { ret, eno })
    }

    pub fn is_ok(&self) -> bool {
        self.ret >= 0
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Status {
        Status::err(e.errno())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SocketRequest {
    pub proto: i32,
    pub ty: i32,
}

impl SocketRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.proto)?;
        w.write_i32::<LittleEndian>(self.ty)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<SocketRequest> {
        Ok(SocketRequest { proto: r.read_i32::<LittleEndian>()?, ty: r.read_i32::<LittleEndian>()? })
    }
}

#[derive(Debug, Clone)]
pub struct SocketResponse {
    pub fd: i32,
    pub eno: i32,
    pub path: String,
}

impl SocketResponse {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        w.write_i32::<LittleEndian>(self.eno)?;
        write_path(w, &self.path)
    }

    pub fn read(r: &mut impl Read) -> Result<SocketResponse> {
        let fd = r.read_i32::<LittleEndian>()?;
        let eno = r.read_i32::<LittleEndian>()?;
        let path = read_path(r)?;
        Ok(SocketResponse { fd, eno, path })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetSockOptParams {
    pub flags: u32,
    pub mtu: u32,
    pub window: u32,
    pub retry: u32,
    pub ack: u32,
}

impl SetSockOptParams {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_u32::<LittleEndian>(self.flags)?;
        w.write_u32::<LittleEndian>(self.mtu)?;
        w.write_u32::<LittleEndian>(self.window)?;
        w.write_u32::<LittleEndian>(self.retry)?;
        w.write_u32::<LittleEndian>(self.ack)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<SetSockOptParams> {
        Ok(SetSockOptParams {
            flags: r.read_u32::<LittleEndian>()?,
            mtu: r.read_u32::<LittleEndian>()?,
            window: r.read_u32::<LittleEndian>()?,
            retry: r.read_u32::<LittleEndian>()?,
            ack: r.read_u32::<LittleEndian>()?,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SetSockOptRequest {
    pub fd: i32,
    pub opt: SockOpt,
}

impl SetSockOptRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        w.write_i32::<LittleEndian>(match self.opt {
            SockOpt::Params => 0,
            SockOpt::If => 1,
        })?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<SetSockOptRequest> {
        let fd = r.read_i32::<LittleEndian>()?;
        let opt = match r.read_i32::<LittleEndian>()? {
            0 => SockOpt::Params,
            1 => SockOpt::If,
            _ => return Err(Error::Protocol("unknown setsockopt option")),
        };
        Ok(SetSockOptRequest { fd, opt })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BindRequest {
    pub fd: i32,
    pub addr: Address,
}

impl BindRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        write_addr(w, &self.addr)
    }

    pub fn read(r: &mut impl Read) -> Result<BindRequest> {
        let fd = r.read_i32::<LittleEndian>()?;
        let addr = read_addr(r)?;
        Ok(BindRequest { fd, addr })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FdRequest {
    pub fd: i32,
}

impl FdRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<FdRequest> {
        Ok(FdRequest { fd: r.read_i32::<LittleEndian>()? })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectRequest {
    pub fd: i32,
    pub peer: Address,
}

impl ConnectRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        write_addr(w, &self.peer)
    }

    pub fn read(r: &mut impl Read) -> Result<ConnectRequest> {
        let fd = r.read_i32::<LittleEndian>()?;
        let peer = read_addr(r)?;
        Ok(ConnectRequest { fd, peer })
    }
}

/// Delivered over the listening socket's own pty once a peer completes the
/// SABM/UA handshake.
#[derive(Debug, Clone)]
pub struct AcceptMessage {
    pub fd: i32,
    pub peer: Address,
    pub path: String,
}

impl AcceptMessage {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        write_addr(w, &self.peer)?;
        write_path(w, &self.path)
    }

    pub fn read(r: &mut impl Read) -> Result<AcceptMessage> {
        let fd = r.read_i32::<LittleEndian>()?;
        let peer = read_addr(r)?;
        let path = read_path(r)?;
        Ok(AcceptMessage { fd, peer, path })
    }
}

#[derive(Debug, Clone)]
pub struct SendToRequest {
    pub fd: i32,
    pub addr: Address,
    pub data: Vec<u8>,
}

impl SendToRequest {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        w.write_i32::<LittleEndian>(self.fd)?;
        write_addr(w, &self.addr)?;
        w.write_u32::<LittleEndian>(self.data.len() as u32)?;
        w.write_all(&self.data)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<SendToRequest> {
        let fd = r.read_i32::<LittleEndian>()?;
        let addr = read_addr(r)?;
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(SendToRequest { fd, addr, data })
    }
}

#[derive(Debug, Clone)]
pub struct RecvFromResponse {
    pub status: Status,
    pub addr: Address,
    pub data: Vec<u8>,
}

impl RecvFromResponse {
    pub fn write(&self, w: &mut impl Write) -> Result<()> {
        self.status.write(w)?;
        write_addr(w, &self.addr)?;
        w.write_u32::<LittleEndian>(self.data.len() as u32)?;
        w.write_all(&self.data)?;
        Ok(())
    }

    pub fn read(r: &mut impl Read) -> Result<RecvFromResponse> {
        let status = Status::read(r)?;
        let addr = read_addr(r)?;
        let len = r.read_u32::<LittleEndian>()? as usize;
        let mut data = vec![0u8; len];
        r.read_exact(&mut data)?;
        Ok(RecvFromResponse { status, addr, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips() {
        let mut buf = Vec::new();
        Status::ok(7).write(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let s = Status::read(&mut cursor).unwrap();
        assert_eq!(s.ret, 7);
        assert!(s.is_ok());
    }

    #[test]
    fn path_round_trips_with_nul_padding() {
        let mut buf = Vec::new();
        write_path(&mut buf, "/tmp/pty3").unwrap();
        assert_eq!(buf.len(), PATH_SIZE);
        let mut cursor = &buf[..];
        assert_eq!(read_path(&mut cursor).unwrap(), "/tmp/pty3");
    }

    #[test]
    fn tag_round_trips() {
        let mut buf = Vec::new();
        Tag::Connect.write(&mut buf).unwrap();
        let mut cursor = &buf[..];
        assert_eq!(Tag::read(&mut cursor).unwrap(), Tag::Connect);
    }
}
