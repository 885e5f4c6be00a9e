//! Client library for the AX.25 daemon control socket: every call opens a
//! request/response round trip over the control stream, then (for `socket`
//! and `accept`) opens the pty handed back and puts it into raw mode so the
//! caller can read/write link data directly.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::path::Path;

use ax25::addr::Address;
use ax25::error::{Error, Result};
use ax25::protocol::{
    AcceptMessage, BindRequest, ConnectRequest, FdRequest, RecvFromResponse, SendToRequest,
    SetSockOptParams, SetSockOptRequest, SockOpt, SocketRequest, SocketResponse, Status, Tag,
    DEFAULT_SOCK_PATH,
};
use ax25::sock::SockType;

pub const DEFAULT_SOCK_NAME: &str = "patty.sock";

fn status_result(status: Status) -> Result<i32> {
    if status.is_ok() {
        Ok(status.ret)
    } else {
        Err(Error::Errno(nix::errno::Errno::from_i32(status.eno)))
    }
}

struct ClientSock {
    server_fd: i32,
    file: File,
}

fn find_sock(path: Option<&str>) -> String {
    match path {
        Some(p) => p.to_string(),
        None if Path::new(DEFAULT_SOCK_NAME).exists() => DEFAULT_SOCK_NAME.to_string(),
        None => DEFAULT_SOCK_PATH.to_string(),
    }
}

fn open_raw_pty(path: &str) -> Result<File> {
    let file = OpenOptions::new().read(true).write(true).open(path)?;
    let fd = file.as_raw_fd();
    let mut t = nix::sys::termios::tcgetattr(fd)?;
    nix::sys::termios::cfmakeraw(&mut t);
    nix::sys::termios::tcsetattr(fd, nix::sys::termios::SetArg::TCSANOW, &t)?;
    Ok(file)
}

fn ty_code(ty: SockType) -> i32 {
    match ty {
        SockType::Stream => 1,
        SockType::Dgram => 2,
        SockType::Raw => 3,
    }
}

/// A connection to the daemon's control socket, tracking every socket
/// opened through it and the raw pty fd backing each one.
pub struct Client {
    stream: UnixStream,
    socks: HashMap<RawFd, ClientSock>,
}

impl Client {
    /// Connect to the control socket at `path`, or (if `None`) `patty.sock`
    /// in the current directory if present, else the default install path.
    pub fn connect(path: Option<&str>) -> Result<Client> {
        let stream = UnixStream::connect(find_sock(path))?;
        Ok(Client { stream, socks: HashMap::new() })
    }

    fn sock(&self, fd: RawFd) -> Result<&ClientSock> {
        self.socks.get(&fd).ok_or(Error::Protocol("bad socket descriptor"))
    }

    fn sock_mut(&mut self, fd: RawFd) -> Result<&mut ClientSock> {
        self.socks.get_mut(&fd).ok_or(Error::Protocol("bad socket descriptor"))
    }

    fn request_close(&mut self, server_fd: i32) -> Result<()> {
        Tag::Close.write(&mut self.stream)?;
        FdRequest { fd: server_fd }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `ping()`: a liveness probe that does not touch any socket state.
    /// EOF on the control socket is treated as a dead daemon, not an error.
    pub fn ping(&mut self) -> Result<i32> {
        match (|| -> Result<i32> {
            Tag::Ping.write(&mut self.stream)?;
            status_result(Status::read(&mut self.stream)?)
        })() {
            Ok(v) => Ok(v),
            Err(Error::Io(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// `socket()`: allocate a connection socket on the daemon and open its
    /// pty in raw mode. Returns the local pty fd used by every other call.
    pub fn socket(&mut self, proto: i32, ty: SockType) -> Result<RawFd> {
        Tag::Socket.write(&mut self.stream)?;
        SocketRequest { proto, ty: ty_code(ty) }.write(&mut self.stream)?;
        let resp = SocketResponse::read(&mut self.stream)?;
        if resp.fd < 0 {
            return Err(Error::Errno(nix::errno::Errno::from_i32(resp.eno)));
        }

        let file = match open_raw_pty(&resp.path) {
            Ok(f) => f,
            Err(e) => {
                let _ = self.request_close(resp.fd);
                return Err(e);
            }
        };
        let local_fd = file.as_raw_fd();
        self.socks.insert(local_fd, ClientSock { server_fd: resp.fd, file });
        Ok(local_fd)
    }

    /// `setsockopt()` with window/MTU/retry/ack parameters.
    pub fn setsockopt_params(&mut self, fd: RawFd, params: &SetSockOptParams) -> Result<()> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::SetSockOpt.write(&mut self.stream)?;
        SetSockOptRequest { fd: server_fd, opt: SockOpt::Params }.write(&mut self.stream)?;
        params.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `setsockopt()` binding the socket to the interface identified by
    /// `iface` (its station address).
    pub fn setsockopt_if(&mut self, fd: RawFd, iface: Address) -> Result<()> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::SetSockOpt.write(&mut self.stream)?;
        SetSockOptRequest { fd: server_fd, opt: SockOpt::If }.write(&mut self.stream)?;
        BindRequest { fd: server_fd, addr: iface }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `bind()`: fix the socket's local station address.
    pub fn bind(&mut self, fd: RawFd, addr: Address) -> Result<()> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::Bind.write(&mut self.stream)?;
        BindRequest { fd: server_fd, addr }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `listen()`: accept inbound SABM as a passive station.
    pub fn listen(&mut self, fd: RawFd) -> Result<()> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::Listen.write(&mut self.stream)?;
        FdRequest { fd: server_fd }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `accept()`: confirm the socket is listening, then block on its own
    /// pty for the accept notification the daemon sends once a peer
    /// completes the SABM/UA handshake. Returns the new connection's pty fd
    /// and the peer's address.
    pub fn accept(&mut self, fd: RawFd) -> Result<(RawFd, Address)> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::Accept.write(&mut self.stream)?;
        FdRequest { fd: server_fd }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?)?;

        let message = AcceptMessage::read(&mut self.sock_mut(fd)?.file)?;

        let file = match open_raw_pty(&message.path) {
            Ok(f) => f,
            Err(e) => {
                let _ = self.request_close(message.fd);
                return Err(e);
            }
        };
        let local_fd = file.as_raw_fd();
        self.socks.insert(local_fd, ClientSock { server_fd: message.fd, file });
        Ok((local_fd, message.peer))
    }

    /// `connect()`: resolve a route to `peer` and begin the SABM handshake.
    pub fn connect_to(&mut self, fd: RawFd, peer: Address) -> Result<()> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::Connect.write(&mut self.stream)?;
        ConnectRequest { fd: server_fd, peer }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|_| ())
    }

    /// `close()`: release the daemon-side socket and stop tracking its pty.
    pub fn close(&mut self, fd: RawFd) -> Result<()> {
        let server_fd = self.socks.get(&fd).ok_or(Error::Protocol("bad socket descriptor"))?.server_fd;
        self.request_close(server_fd)?;
        self.socks.remove(&fd);
        Ok(())
    }

    /// `sendto()`: addressed send for datagram and raw sockets, which have
    /// no single established peer to write bytes to over the pty.
    pub fn sendto(&mut self, fd: RawFd, addr: Address, data: &[u8]) -> Result<usize> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::SendTo.write(&mut self.stream)?;
        SendToRequest { fd: server_fd, addr, data: data.to_vec() }.write(&mut self.stream)?;
        status_result(Status::read(&mut self.stream)?).map(|n| n as usize)
    }

    /// `recvfrom()`: addressed receive for datagram and raw sockets.
    pub fn recvfrom(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<(usize, Address)> {
        let server_fd = self.sock(fd)?.server_fd;
        Tag::RecvFrom.write(&mut self.stream)?;
        FdRequest { fd: server_fd }.write(&mut self.stream)?;
        let resp = RecvFromResponse::read(&mut self.stream)?;
        status_result(resp.status)?;
        let n = resp.data.len().min(buf.len());
        buf[..n].copy_from_slice(&resp.data[..n]);
        Ok((n, resp.addr))
    }

    /// Read link data directly from a stream socket's pty.
    pub fn read(&mut self, fd: RawFd, buf: &mut [u8]) -> Result<usize> {
        Ok(self.sock_mut(fd)?.file.read(buf)?)
    }

    /// Write link data directly to a stream socket's pty.
    pub fn write(&mut self, fd: RawFd, buf: &[u8]) -> Result<usize> {
        Ok(self.sock_mut(fd)?.file.write(buf)?)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let server_fds: Vec<i32> = self.socks.values().map(|s| s.server_fd).collect();
        for server_fd in server_fds {
            let _ = self.request_close(server_fd);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    fn test_path() -> String {
        format!(
            "/tmp/patty-client-test-{}-{}.sock",
            std::process::id(),
            std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos()
        )
    }

    #[test]
    fn ping_reads_pong_status() {
        let path = test_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            assert_eq!(Tag::read(&mut stream).unwrap(), Tag::Ping);
            Status::ok(1).write(&mut stream).unwrap();
        });

        let mut client = Client::connect(Some(&path)).unwrap();
        assert_eq!(client.ping().unwrap(), 1);

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn ping_against_closed_daemon_reports_zero() {
        let path = test_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (_stream, _) = listener.accept().unwrap();
        });

        let mut client = Client::connect(Some(&path)).unwrap();
        assert_eq!(client.ping().unwrap(), 0);

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn bind_request_carries_server_side_fd_not_local_pty_fd() {
        let path = test_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            assert_eq!(Tag::read(&mut stream).unwrap(), Tag::Bind);
            let req = BindRequest::read(&mut stream).unwrap();
            assert_eq!(req.fd, 42);
            assert_eq!(req.addr, Address::parse("TEST-1").unwrap());
            Status::ok(0).write(&mut stream).unwrap();
        });

        let mut client = Client::connect(Some(&path)).unwrap();
        client.socks.insert(99, ClientSock { server_fd: 42, file: File::open("/dev/null").unwrap() });
        client.bind(99, Address::parse("TEST-1").unwrap()).unwrap();

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn close_removes_local_tracking_on_success() {
        let path = test_path();
        let listener = UnixListener::bind(&path).unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            assert_eq!(Tag::read(&mut stream).unwrap(), Tag::Close);
            let req = FdRequest::read(&mut stream).unwrap();
            assert_eq!(req.fd, 7);
            Status::ok(0).write(&mut stream).unwrap();
        });

        let mut client = Client::connect(Some(&path)).unwrap();
        client.socks.insert(55, ClientSock { server_fd: 7, file: File::open("/dev/null").unwrap() });
        client.close(55).unwrap();
        assert!(client.socks.is_empty());

        server.join().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}
