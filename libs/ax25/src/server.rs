//! Event loop: one readiness wait multiplexes the control-socket listener,
//! accepted clients, per-socket ptys and interface drivers; each iteration
//! ticks timers, services clients and interfaces, and dispatches decoded
//! frames into the connection state machine.

use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::net::UnixListener;
use std::time::{Duration, Instant};

use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::openpty;
use nix::unistd::{close, ttyname};

use crate::addr::Address;
use crate::error::{Error, Result};
use crate::frame::{Cr, Format, Frame, FrameType};
use crate::iface::Interface;
use crate::protocol::{
    AcceptMessage, BindRequest, ConnectRequest, FdRequest, OPT_PARAM_ACK, OPT_PARAM_MTU,
    OPT_PARAM_RETRY, OPT_PARAM_WINDOW, RecvFromResponse, SendToRequest, SetSockOptParams,
    SetSockOptRequest, SockOpt, SocketRequest, SocketResponse, Status, Tag,
};
use crate::route::{IfaceId, RouteTable};
use crate::sock::{Flow, Mode, Sock, SockType, State as SockState};
use crate::xid::Params;

pub type SockId = usize;
pub type ClientId = usize;

const POLL_TIMEOUT_MS: libc::c_int = 1000;
const READ_CHUNK: usize = 2048;

struct SockEntry {
    sock: Sock,
    pty_master: RawFd,
    pty_path: String,
    owner: Option<ClientId>,
}

impl Drop for SockEntry {
    fn drop(&mut self) {
        let _ = close(self.pty_master);
    }
}

struct ClientEntry {
    stream: std::os::unix::net::UnixStream,
}

/// Owns every piece of server-side state: the control-socket listener, the
/// interface list, the route table, and the socket arena with its
/// by-fd/by-local-address/by-address-pair/by-client indices.
pub struct Server {
    listener: UnixListener,

    interfaces: Vec<Interface>,
    routes: RouteTable,

    socks: Vec<Option<SockEntry>>,
    socks_by_fd: HashMap<RawFd, SockId>,
    socks_by_local: HashMap<u32, SockId>,
    socks_by_pair: HashMap<u32, SockId>,

    clients: Vec<Option<ClientEntry>>,
    socks_by_client: HashMap<ClientId, Vec<SockId>>,

    elapsed: Duration,
}

fn open_pty() -> Result<(RawFd, String)> {
    let pair = openpty(None, None)?;
    let path = ttyname(pair.slave).map_err(Error::Errno)?;
    close(pair.slave)?;
    Ok((pair.master, path.to_string_lossy().into_owned()))
}

fn read_nonblocking(fd: RawFd, buf: &mut [u8]) -> Result<usize> {
    match nix::unistd::read(fd, buf) {
        Ok(n) => Ok(n),
        Err(nix::errno::Errno::EAGAIN) => Ok(0),
        Err(e) => Err(Error::Errno(e)),
    }
}

fn write_nonblocking(fd: RawFd, buf: &[u8]) -> Result<usize> {
    match nix::unistd::write(fd, buf) {
        Ok(n) => Ok(n),
        Err(nix::errno::Errno::EAGAIN) => Ok(0),
        Err(e) => Err(Error::Errno(e)),
    }
}

impl Server {
    pub fn new(sock_path: &str) -> Result<Server> {
        let _ = std::fs::remove_file(sock_path);
        let listener = UnixListener::bind(sock_path)?;
        listener.set_nonblocking(true)?;
        Ok(Server {
            listener,
            interfaces: Vec::new(),
            routes: RouteTable::new(),
            socks: Vec::new(),
            socks_by_fd: HashMap::new(),
            socks_by_local: HashMap::new(),
            socks_by_pair: HashMap::new(),
            clients: Vec::new(),
            socks_by_client: HashMap::new(),
            elapsed: Duration::ZERO,
        })
    }

    // -- interfaces --------------------------------------------------

    pub fn if_add(&mut self, iface: Interface) -> IfaceId {
        self.interfaces.push(iface);
        self.interfaces.len() - 1
    }

    pub fn if_get(&self, id: IfaceId) -> Option<&Interface> {
        self.interfaces.get(id)
    }

    pub fn if_get_mut(&mut self, id: IfaceId) -> Option<&mut Interface> {
        self.interfaces.get_mut(id)
    }

    pub fn if_each<F: FnMut(IfaceId, &Interface)>(&self, mut f: F) {
        for (id, iface) in self.interfaces.iter().enumerate() {
            f(id, iface);
        }
    }

    // -- routes ------------------------------------------------------

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.routes
    }

    // -- socket arena --------------------------------------------------

    fn sock_alloc(&mut self, sock: Sock, pty_master: RawFd, pty_path: String) -> SockId {
        let entry = SockEntry { sock, pty_master, pty_path, owner: None };
        match self.socks.iter().position(|s| s.is_none()) {
            Some(id) => {
                self.socks[id] = Some(entry);
                id
            }
            None => {
                self.socks.push(Some(entry));
                self.socks.len() - 1
            }
        }
    }

    fn entry(&self, id: SockId) -> Result<&SockEntry> {
        self.socks.get(id).and_then(|s| s.as_ref()).ok_or(Error::Protocol("bad socket descriptor"))
    }

    fn entry_mut(&mut self, id: SockId) -> Result<&mut SockEntry> {
        self.socks.get_mut(id).and_then(|s| s.as_mut()).ok_or(Error::Protocol("bad socket descriptor"))
    }

    pub fn sock(&self, id: SockId) -> Result<&Sock> {
        Ok(&self.entry(id)?.sock)
    }

    pub fn pty_path(&self, id: SockId) -> Result<&str> {
        Ok(&self.entry(id)?.pty_path)
    }

    fn index_by_local(&mut self, id: SockId) {
        let hash = self.entry(id).unwrap().sock.local.hash();
        self.socks_by_local.insert(hash, id);
    }

    fn index_by_pair(&mut self, id: SockId) {
        let e = self.entry(id).unwrap();
        let hash = Address::hash_pair(&e.sock.local, &e.sock.remote);
        self.socks_by_pair.insert(hash, id);
    }

    /// `SOCKET`: allocate a connection socket and its pty.
    pub fn sock_open(&mut self, client: ClientId, ty: SockType) -> Result<SockId> {
        let (master, path) = open_pty()?;
        let sock = Sock::new(ty);
        let id = self.sock_alloc(sock, master, path);
        self.socks_by_fd.insert(master, id);
        self.entry_mut(id)?.owner = Some(client);
        self.socks_by_client.entry(client).or_default().push(id);
        Ok(id)
    }

    pub fn sock_setsockopt_params(&mut self, id: SockId, params: &SetSockOptParams) -> Result<()> {
        let e = self.entry_mut(id)?;
        if params.flags & OPT_PARAM_MTU != 0 {
            e.sock.n_maxlen_tx = params.mtu as usize;
            e.sock.n_maxlen_rx = params.mtu as usize;
        }
        if params.flags & OPT_PARAM_WINDOW != 0 {
            e.sock.n_window_tx = params.window as usize;
            e.sock.n_window_rx = params.window as usize;
        }
        if params.flags & OPT_PARAM_RETRY != 0 {
            e.sock.n_retry = params.retry as usize;
        }
        if params.flags & OPT_PARAM_ACK != 0 {
            e.sock.n_ack = params.ack as u64;
        }
        e.sock.realloc_slots();
        Ok(())
    }

    pub fn sock_setsockopt_if(&mut self, id: SockId, iface: IfaceId, classes: u32) -> Result<()> {
        let e = self.entry_mut(id)?;
        e.sock.bind_if(iface, classes);
        if e.sock.ty == SockType::Raw {
            e.sock.state = SockState::Promisc;
        }
        Ok(())
    }

    /// `BIND`: fix the socket's local address and index it for routing and
    /// for control-frame dispatch to listening sockets.
    pub fn sock_bind(&mut self, id: SockId, addr: Address) -> Result<()> {
        if self.entry(id)?.sock.state != SockState::Closed {
            return Err(Error::State("socket already bound"));
        }
        self.entry_mut(id)?.sock.local = addr;
        self.index_by_local(id);
        Ok(())
    }

    /// `LISTEN`: accept inbound SABM as a passive station.
    pub fn sock_listen(&mut self, id: SockId) -> Result<()> {
        let e = self.entry_mut(id)?;
        if e.sock.local == Address::EMPTY {
            return Err(Error::State("socket not bound"));
        }
        e.sock.state = SockState::Listening;
        Ok(())
    }

    /// `CONNECT`: resolve a route to `peer`, bind the interface, and send
    /// the initial SABM.
    pub fn sock_connect(&mut self, id: SockId, peer: Address) -> Result<Vec<u8>> {
        let route = self.routes.find(&peer).ok_or(Error::NetworkDown)?.clone();
        let iface_classes = self.if_get(route.iface).map(|i| i.classes).unwrap_or(0);

        let e = self.entry_mut(id)?;
        e.sock.remote = peer;
        e.sock.repeaters = route.repeaters;
        e.sock.bind_if(route.iface, iface_classes);
        e.sock.mode = Mode::Sabm;
        e.sock.reset();
        e.sock.state = SockState::PendingConnect;
        let out = e.sock.encode_sabm(true)?;
        self.index_by_pair(id);
        Ok(out)
    }

    /// `CLOSE`: begin a graceful shutdown (DISC) if linked, otherwise close
    /// immediately. Matches the cancellation policy: a lingering socket is
    /// dropped unilaterally once its owning client goes away.
    pub fn sock_close(&mut self, id: SockId) -> Result<Option<Vec<u8>>> {
        let e = self.entry_mut(id)?;
        if e.sock.state == SockState::Established || e.sock.state == SockState::PendingConnect {
            e.sock.state = SockState::PendingDisconnect;
            e.sock.timer_t1.start();
            let out = e.sock.encode_disc(true)?;
            return Ok(Some(out));
        }
        self.sock_remove(id);
        Ok(None)
    }

    fn sock_remove(&mut self, id: SockId) {
        if let Some(entry) = self.socks.get_mut(id).and_then(|s| s.take()) {
            self.socks_by_fd.remove(&entry.pty_master);
            self.socks_by_local.retain(|_, v| *v != id);
            self.socks_by_pair.retain(|_, v| *v != id);
            if let Some(owner) = entry.owner {
                if let Some(list) = self.socks_by_client.get_mut(&owner) {
                    list.retain(|&s| s != id);
                }
            }
        }
    }

    /// Close every socket owned by a client whose control connection went
    /// away: shut each down gracefully first, removing any already closed.
    fn close_client_socks(&mut self, client: ClientId) {
        let owned = self.socks_by_client.remove(&client).unwrap_or_default();
        for id in owned {
            let _ = self.sock_close(id);
        }
    }

    // -- timers: step 3 of the iteration -----------------------------

    fn tick_socks(&mut self, elapsed: Duration) -> Vec<(IfaceId, Vec<u8>)> {
        let mut outbound = Vec::new();
        let ids: Vec<SockId> = self.socks.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|_| i)).collect();

        for id in ids {
            let e = match self.entry_mut(id) {
                Ok(e) => e,
                Err(_) => continue,
            };
            e.sock.timer_t1.tick(elapsed);
            e.sock.timer_t2.tick(elapsed);
            e.sock.timer_t3.tick(elapsed);

            let iface = match e.sock.iface {
                Some(i) => i,
                None => continue,
            };

            if e.sock.timer_t1.expired() {
                e.sock.timer_t1.stop();
                if e.sock.retries == 0 {
                    e.sock.state = SockState::Closed;
                    self.sock_remove(id);
                    continue;
                }
                e.sock.retries -= 1;
                let frame = if e.sock.state == SockState::PendingConnect {
                    e.sock.encode_sabm(true)
                } else if e.sock.ack_pending() > 0 {
                    e.sock.resend_pending().map(|o| o.unwrap_or_default())
                } else {
                    e.sock.encode_rr(Cr::Command, true)
                };
                if let Ok(bytes) = frame {
                    e.sock.timer_t1.start();
                    outbound.push((iface, bytes));
                }
            } else if e.sock.timer_t3.expired() {
                e.sock.timer_t3.stop();
                if let Ok(bytes) = e.sock.encode_rr(Cr::Command, true) {
                    e.sock.timer_t1.start();
                    outbound.push((iface, bytes));
                }
            } else if e.sock.timer_t2.expired() {
                e.sock.timer_t2.stop();
                e.sock.rx_pending = 0;
                if let Ok(bytes) = e.sock.encode_rr(Cr::Response, true) {
                    outbound.push((iface, bytes));
                }
            }
        }
        outbound
    }

    // -- client pty writes: also step 3, "walk every connection socket" --

    fn handle_sock_ptys(&mut self) {
        let ids: Vec<SockId> = self.socks.iter().enumerate().filter_map(|(i, s)| s.as_ref().map(|_| i)).collect();
        for id in ids {
            let (master, ready, iface) = match self.entry(id) {
                Ok(e) => (e.pty_master, e.sock.flow == Flow::Ready && e.sock.state == SockState::Established, e.sock.iface),
                Err(_) => continue,
            };
            let iface = match (ready, iface) {
                (true, Some(i)) => i,
                _ => continue,
            };
            let mut buf = [0u8; READ_CHUNK];
            let n = match read_nonblocking(master, &mut buf) {
                Ok(n) if n > 0 => n,
                _ => continue,
            };
            let frames = match self.entry_mut(id) {
                Ok(e) => e.sock.write(&buf[..n]),
                Err(_) => continue,
            };
            if let Ok(frames) = frames {
                for f in frames {
                    self.send_to_iface(iface, &f);
                }
                if let Ok(e) = self.entry_mut(id) {
                    if e.sock.window_full() {
                        e.sock.flow = Flow::Wait;
                    }
                }
            }
        }
    }

    // -- clients: step 4 of the iteration ----------------------------

    fn accept_client(&mut self) -> Result<()> {
        let (stream, _) = self.listener.accept()?;
        stream.set_nonblocking(true)?;
        let id = match self.clients.iter().position(|c| c.is_none()) {
            Some(id) => {
                self.clients[id] = Some(ClientEntry { stream });
                id
            }
            None => {
                self.clients.push(Some(ClientEntry { stream }));
                self.clients.len() - 1
            }
        };
        self.socks_by_client.entry(id).or_default();
        Ok(())
    }

    fn client_fd(&self, client: ClientId) -> Option<RawFd> {
        self.clients.get(client).and_then(|c| c.as_ref()).map(|c| c.stream.as_raw_fd())
    }

    fn client_stream(&mut self, client: ClientId) -> Result<&mut std::os::unix::net::UnixStream> {
        Ok(&mut self.clients.get_mut(client).and_then(|c| c.as_mut()).ok_or(Error::Protocol("bad client"))?.stream)
    }

    /// Dispatch one call from `client`. Returns `false` if the client's
    /// control connection was closed (EOF), in which case its sockets are
    /// torn down.
    fn handle_client(&mut self, client: ClientId) -> Result<bool> {
        let tag = {
            let stream = self.client_stream(client)?;
            match Tag::read(stream) {
                Ok(t) => t,
                Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                    self.clients[client] = None;
                    self.close_client_socks(client);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        };

        match tag {
            Tag::None => {}
            Tag::Ping => Status::ok(1).write(self.client_stream(client)?)?,
            Tag::Socket => self.call_socket(client)?,
            Tag::SetSockOpt => self.call_setsockopt(client)?,
            Tag::Bind => self.call_bind(client)?,
            Tag::Listen => self.call_listen(client)?,
            Tag::Accept => self.call_accept(client)?,
            Tag::Connect => self.call_connect(client)?,
            Tag::Close => self.call_close(client)?,
            Tag::SendTo => self.call_sendto(client)?,
            Tag::RecvFrom => self.call_recvfrom(client)?,
        }
        Ok(true)
    }

    fn call_socket(&mut self, client: ClientId) -> Result<()> {
        let req = SocketRequest::read(self.client_stream(client)?)?;
        let ty = match req.ty {
            1 => Some(SockType::Stream),
            2 => Some(SockType::Dgram),
            3 => Some(SockType::Raw),
            _ => None,
        };
        let resp = match ty {
            None => SocketResponse { fd: -1, eno: libc::EINVAL, path: String::new() },
            Some(ty) => match self.sock_open(client, ty) {
                Ok(id) => SocketResponse { fd: id as i32, eno: 0, path: self.pty_path(id)?.to_string() },
                Err(e) => SocketResponse { fd: -1, eno: e.errno(), path: String::new() },
            },
        };
        resp.write(self.client_stream(client)?)
    }

    fn call_setsockopt(&mut self, client: ClientId) -> Result<()> {
        let req = SetSockOptRequest::read(self.client_stream(client)?)?;
        let result = match req.opt {
            SockOpt::Params => {
                let params = SetSockOptParams::read(self.client_stream(client)?)?;
                self.sock_setsockopt_params(req.fd as SockId, &params)
            }
            SockOpt::If => {
                let bind = BindRequest::read(self.client_stream(client)?)?;
                match self.interfaces.iter().position(|i| i.matches(&bind.addr)) {
                    Some(iface) => {
                        let classes = self.interfaces[iface].classes;
                        self.sock_setsockopt_if(req.fd as SockId, iface, classes)
                    }
                    None => Err(Error::NetworkDown),
                }
            }
        };
        let status = match result {
            Ok(()) => Status::ok(0),
            Err(e) => Status::from(e),
        };
        status.write(self.client_stream(client)?)
    }

    fn call_bind(&mut self, client: ClientId) -> Result<()> {
        let req = BindRequest::read(self.client_stream(client)?)?;
        let status = match self.sock_bind(req.fd as SockId, req.addr) {
            Ok(()) => Status::ok(0),
            Err(e) => Status::from(e),
        };
        status.write(self.client_stream(client)?)
    }

    fn call_listen(&mut self, client: ClientId) -> Result<()> {
        let req = FdRequest::read(self.client_stream(client)?)?;
        let status = match self.sock_listen(req.fd as SockId) {
            Ok(()) => Status::ok(0),
            Err(e) => Status::from(e),
        };
        status.write(self.client_stream(client)?)
    }

    /// Phase one of `ACCEPT`: acknowledge the listening fd is valid. The
    /// matching `accept_message` is delivered later, over the listening
    /// socket's own pty, once a peer completes the SABM/UA handshake.
    fn call_accept(&mut self, client: ClientId) -> Result<()> {
        let req = FdRequest::read(self.client_stream(client)?)?;
        let status = match self.sock(req.fd as SockId) {
            Ok(sock) if sock.state == SockState::Listening => Status::ok(0),
            Ok(_) => Status::from(Error::State("socket not listening")),
            Err(e) => Status::from(e),
        };
        status.write(self.client_stream(client)?)
    }

    fn call_connect(&mut self, client: ClientId) -> Result<()> {
        let req = ConnectRequest::read(self.client_stream(client)?)?;
        let id = req.fd as SockId;
        match self.sock_connect(id, req.peer) {
            Ok(bytes) => {
                if let Some(iface) = self.sock(id)?.iface {
                    self.send_to_iface(iface, &bytes);
                }
                Status::ok(0).write(self.client_stream(client)?)
            }
            Err(e) => Status::from(e).write(self.client_stream(client)?),
        }
    }

    fn call_close(&mut self, client: ClientId) -> Result<()> {
        let req = FdRequest::read(self.client_stream(client)?)?;
        let id = req.fd as SockId;
        let iface = self.sock(id).ok().and_then(|s| s.iface);
        match self.sock_close(id) {
            Ok(Some(bytes)) => {
                if let Some(iface) = iface {
                    self.send_to_iface(iface, &bytes);
                }
                Status::ok(0).write(self.client_stream(client)?)
            }
            Ok(None) => Status::ok(0).write(self.client_stream(client)?),
            Err(e) => Status::from(e).write(self.client_stream(client)?),
        }
    }

    fn call_sendto(&mut self, client: ClientId) -> Result<()> {
        let req = SendToRequest::read(self.client_stream(client)?)?;
        let id = req.fd as SockId;
        let result = (|| -> Result<usize> {
            let iface = self.sock(id)?.iface.ok_or(Error::NetworkDown)?;
            let frames = self.entry_mut(id)?.sock.write(&req.data)?;
            for f in &frames {
                self.send_to_iface(iface, f);
            }
            Ok(req.data.len())
        })();
        match result {
            Ok(n) => Status::ok(n as i32).write(self.client_stream(client)?),
            Err(e) => Status::from(e).write(self.client_stream(client)?),
        }
    }

    fn call_recvfrom(&mut self, client: ClientId) -> Result<()> {
        let req = FdRequest::read(self.client_stream(client)?)?;
        let id = req.fd as SockId;
        let resp = match self.entry(id) {
            Ok(e) => {
                let mut buf = [0u8; READ_CHUNK];
                match read_nonblocking(e.pty_master, &mut buf) {
                    Ok(n) => RecvFromResponse { status: Status::ok(n as i32), addr: e.sock.remote, data: buf[..n].to_vec() },
                    Err(err) => RecvFromResponse { status: Status::from(err), addr: Address::EMPTY, data: Vec::new() },
                }
            }
            Err(e) => RecvFromResponse { status: Status::from(e), addr: Address::EMPTY, data: Vec::new() },
        };
        resp.write(self.client_stream(client)?)
    }

    fn notify_accept(&mut self, listening: SockId, peer: Address, accepted: SockId) -> Result<()> {
        let msg = AcceptMessage { fd: accepted as i32, peer, path: self.pty_path(accepted)?.to_string() };
        let master = self.entry(listening)?.pty_master;
        let mut out = Vec::new();
        msg.write(&mut out)?;
        write_nonblocking(master, &out).map(|_| ())
    }

    // -- interfaces: step 5 of the iteration -------------------------

    fn send_to_iface(&mut self, iface: IfaceId, bytes: &[u8]) {
        if let Some(i) = self.if_get_mut(iface) {
            let _ = i.driver.send(bytes);
        }
    }

    fn handle_interface(&mut self, iface: IfaceId) -> Result<()> {
        match self.if_get_mut(iface).unwrap().driver.fill() {
            Ok(0) => {
                self.if_get_mut(iface).unwrap().down();
                return Ok(());
            }
            Ok(_) => {}
            Err(_) => {
                let i = self.if_get_mut(iface).unwrap();
                i.error();
                return i.driver.reset();
            }
        }

        loop {
            let mut scratch = [0u8; crate::iface::DEFAULT_MRU];
            let drained = self.if_get_mut(iface).unwrap().driver.drain(&mut scratch)?;
            if self.if_get(iface).unwrap().driver.pending() {
                let mut buf = [0u8; crate::iface::DEFAULT_MRU];
                let len = self.if_get_mut(iface).unwrap().driver.flush(&mut buf)?;
                self.handle_frame(iface, &buf[..len])?;
            }
            if drained == 0 {
                break;
            }
        }
        Ok(())
    }

    // -- frame dispatch ------------------------------------------------

    fn find_sock_for(&self, dest: &Address, src: &Address) -> Option<SockId> {
        let pair = Address::hash_pair(dest, src);
        self.socks_by_pair.get(&pair).copied().or_else(|| self.socks_by_local.get(&dest.hash()).copied())
    }

    fn handle_frame(&mut self, iface: IfaceId, buf: &[u8]) -> Result<()> {
        let (mut frame, consumed) = match Frame::decode_address(buf) {
            Ok(v) => v,
            Err(_) => return self.drop_frame(iface),
        };

        let local = self.resolve_local(iface, &frame.dest);
        let id = self.find_sock_for(&local, &frame.src);
        let format = id.and_then(|id| self.sock(id).ok()).map(|s| s.mode.format()).unwrap_or(Format::Normal);

        if frame.decode_control(format, buf, consumed).is_err() {
            return self.drop_frame(iface);
        }

        self.forward_promisc(iface, buf);

        let reply = match frame.ty {
            FrameType::Sabm | FrameType::Sabme => self.handle_sabm(iface, &frame, &local)?,
            FrameType::Ua => self.handle_ua(id)?,
            FrameType::Dm => self.handle_dm(id)?,
            FrameType::Disc => self.handle_disc(id, &frame)?,
            FrameType::I => self.handle_i(id, &frame)?,
            FrameType::Ui => self.handle_ui(&local, &frame)?,
            FrameType::Rr => self.handle_rr(id, &frame)?,
            FrameType::Rnr => self.handle_rnr(id, &frame)?,
            FrameType::Rej => self.handle_rej(id, &frame)?,
            FrameType::Srej => self.handle_srej(id, &frame)?,
            FrameType::Xid => self.handle_xid(id, &frame)?,
            FrameType::Test => self.handle_test(&frame)?,
            FrameType::Frmr => self.handle_frmr(id)?,
        };

        if let Some(bytes) = reply {
            self.send_to_iface(iface, &bytes);
        }
        Ok(())
    }

    /// A station address as seen on the wire may be an interface's alias
    /// rather than its primary address; resolve it to the primary address
    /// a socket would have bound, so alias traffic reaches the same sockets.
    fn resolve_local(&self, iface: IfaceId, addr: &Address) -> Address {
        match self.if_get(iface) {
            Some(i) if i.matches(addr) => i.addr,
            _ => *addr,
        }
    }

    fn drop_frame(&mut self, iface: IfaceId) -> Result<()> {
        log::warn!("dropped unparsable frame on interface {iface}");
        Ok(())
    }

    /// Deliver the raw, still-encoded frame to every RAW socket bound
    /// promiscuously to `iface`, regardless of frame type.
    fn forward_promisc(&mut self, iface: IfaceId, buf: &[u8]) {
        let observers: Vec<RawFd> = self
            .socks
            .iter()
            .filter_map(|s| s.as_ref())
            .filter(|e| e.sock.state == SockState::Promisc && e.sock.iface == Some(iface))
            .map(|e| e.pty_master)
            .collect();
        for master in observers {
            let _ = write_nonblocking(master, buf);
        }
    }

    /// A SABM/SABME addressed to one of our stations: find a listening
    /// socket bound to the destination, spawn a child connection socket in
    /// ESTABLISHED state, and reply UA.
    fn handle_sabm(&mut self, iface: IfaceId, frame: &Frame, local: &Address) -> Result<Option<Vec<u8>>> {
        let listening = match self.socks_by_local.get(&local.hash()).copied() {
            Some(id) if self.sock(id)?.state == SockState::Listening => id,
            _ => return self.reply_dm(frame),
        };

        let owner = self.entry(listening)?.owner;
        let mut child = Sock::new(self.sock(listening)?.ty);
        child.local = frame.dest;
        child.remote = frame.src;
        child.repeaters = frame.repeaters.clone();
        child.mode = if frame.ty == FrameType::Sabme { Mode::Sabme } else { Mode::Sabm };
        child.iface = Some(iface);
        child.state = SockState::Established;
        child.reset();
        child.realloc_slots();

        let (master, path) = open_pty()?;
        let child_id = self.sock_alloc(child, master, path);
        self.socks_by_fd.insert(master, child_id);
        self.entry_mut(child_id)?.owner = owner;
        if let Some(owner) = owner {
            self.socks_by_client.entry(owner).or_default().push(child_id);
        }
        self.index_by_local(child_id);
        self.index_by_pair(child_id);

        let _ = self.notify_accept(listening, frame.src, child_id);

        self.reply_ua(frame)
    }

    fn handle_ua(&mut self, id: Option<SockId>) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let e = self.entry_mut(id)?;
        if e.sock.state != SockState::PendingConnect {
            return Ok(None);
        }
        e.sock.state = SockState::Established;
        e.sock.reset();
        self.index_by_pair(id);
        Ok(None)
    }

    fn handle_dm(&mut self, id: Option<SockId>) -> Result<Option<Vec<u8>>> {
        if let Some(id) = id {
            self.sock_remove(id);
        }
        Ok(None)
    }

    fn handle_disc(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        if let Some(id) = id {
            self.sock_remove(id);
        }
        self.reply_ua(frame)
    }

    fn handle_i(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return self.reply_dm(frame),
        };
        let e = self.entry_mut(id)?;
        if e.sock.state != SockState::Established {
            return Ok(None);
        }
        if frame.ns != e.sock.vr {
            let expected = e.sock.vr.wrapping_add(1) % e.sock.mode.modulus();
            return if frame.ns == expected {
                e.sock.encode_srej(Cr::Response).map(Some)
            } else {
                e.sock.encode_rej(Cr::Response, frame.pf).map(Some)
            };
        }

        e.sock.ack(frame.nr);
        e.sock.vr_incr();

        if frame.proto == crate::sock::PROTO_SEGMENT {
            if let Some(bytes) = self.handle_segment(id, frame)? {
                return Ok(Some(bytes));
            }
        } else if !frame.info.is_empty() {
            let master = self.entry(id)?.pty_master;
            let _ = write_nonblocking(master, &frame.info);
        }

        let e = self.entry_mut(id)?;
        if frame.pf {
            e.sock.timer_t2.stop();
            e.sock.rx_pending = 0;
            return e.sock.encode_rr(Cr::Response, true).map(Some);
        }

        e.sock.rx_pending += 1;
        let threshold = (e.sock.n_window_rx / 2).max(1);
        if e.sock.rx_pending >= threshold {
            e.sock.timer_t2.stop();
            e.sock.rx_pending = 0;
            return e.sock.encode_rr(Cr::Response, false).map(Some);
        }
        if !e.sock.timer_t2.running() {
            e.sock.timer_t2.start();
        }
        Ok(None)
    }

    /// Apply one reassembly segment. Returns `Some(reply)` only when the
    /// segment deviates from the expected remaining count, in which case
    /// the in-progress reassembly is discarded and an SREJ is due.
    fn handle_segment(&mut self, id: SockId, frame: &Frame) -> Result<Option<Vec<u8>>> {
        if frame.info.is_empty() {
            return Err(Error::Decode("empty segment".into()));
        }
        let first = frame.info[0] & 0x80 != 0;
        let remaining = (frame.info[0] & 0x7f) as usize;
        let body = frame.info[if first { 2 } else { 1 }..].to_vec();

        let e = self.entry_mut(id)?;
        if first {
            e.sock.assembler_init(remaining + 1)?;
        }
        if !e.sock.assembler_pending(remaining) {
            e.sock.assembler_stop();
            return e.sock.encode_srej(Cr::Response).map(Some);
        }
        e.sock.assembler_save(&body)?;

        if remaining == 0 {
            if let Some((_, data)) = e.sock.assembler_read() {
                let master = e.pty_master;
                let _ = write_nonblocking(master, &data);
            }
        }
        Ok(None)
    }

    fn handle_ui(&mut self, local: &Address, frame: &Frame) -> Result<Option<Vec<u8>>> {
        if let Some(dgram) = self.socks_by_local.get(&local.hash()).copied() {
            if self.sock(dgram).map(|s| s.ty).ok() == Some(SockType::Dgram) {
                let master = self.entry(dgram)?.pty_master;
                let _ = write_nonblocking(master, &frame.info);
            }
        }
        Ok(None)
    }

    fn handle_rr(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let e = self.entry_mut(id)?;
        e.sock.flow = Flow::Ready;
        e.sock.ack(frame.nr);
        if frame.pf && e.sock.mode != Mode::Dm {
            return e.sock.encode_rr(Cr::Response, true).map(Some);
        }
        Ok(None)
    }

    fn handle_rnr(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let e = self.entry_mut(id)?;
        e.sock.flow = Flow::Wait;
        e.sock.ack(frame.nr);
        Ok(None)
    }

    fn handle_rej(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let e = self.entry_mut(id)?;
        e.sock.ack(frame.nr);
        e.sock.resend(frame.nr)
    }

    fn handle_srej(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        self.entry(id)?.sock.resend(frame.nr)
    }

    fn handle_xid(&mut self, id: Option<SockId>, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let id = match id {
            Some(id) => id,
            None => return Ok(None),
        };
        let mut params = Params::default();
        crate::frame::decode_xid(&mut params, &frame.info)?;
        let e = self.entry_mut(id)?;
        e.sock.params_negotiate(&params)?;
        if frame.cr == Cr::Command {
            return e.sock.encode_xid(Cr::Response).map(Some);
        }
        Ok(None)
    }

    fn handle_test(&mut self, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let mut out = Vec::new();
        frame.encode_reply_to(frame, &mut out)?;
        Ok(Some(out))
    }

    fn handle_frmr(&mut self, id: Option<SockId>) -> Result<Option<Vec<u8>>> {
        if let Some(id) = id {
            self.sock_remove(id);
        }
        Ok(None)
    }

    fn reply_dm(&self, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let reply = Frame {
            dest: frame.src,
            src: frame.dest,
            repeaters: Vec::new(),
            cr: Cr::Response,
            version: frame.version,
            format: Format::Normal,
            control: FrameType::Dm.control_bits() | ((frame.pf as u16) << 4),
            ty: FrameType::Dm,
            nr: 0,
            ns: 0,
            pf: frame.pf,
            proto: 0,
            info: Vec::new(),
        };
        let mut out = Vec::new();
        frame.encode_reply_to(&reply, &mut out)?;
        Ok(Some(out))
    }

    fn reply_ua(&self, frame: &Frame) -> Result<Option<Vec<u8>>> {
        let reply = Frame {
            dest: frame.src,
            src: frame.dest,
            repeaters: Vec::new(),
            cr: Cr::Response,
            version: frame.version,
            format: Format::Normal,
            control: FrameType::Ua.control_bits() | ((frame.pf as u16) << 4),
            ty: FrameType::Ua,
            nr: 0,
            ns: 0,
            pf: frame.pf,
            proto: 0,
            info: Vec::new(),
        };
        let mut out = Vec::new();
        frame.encode_reply_to(&reply, &mut out)?;
        Ok(Some(out))
    }

    // -- the event loop --------------------------------------------------

    /// Run one iteration: poll, tick timers, service client pty writes,
    /// service clients, service interfaces, accept a pending connection.
    pub fn run_once(&mut self) -> Result<()> {
        let before = Instant::now();

        let mut fds = vec![PollFd::new(self.listener.as_raw_fd(), PollFlags::POLLIN)];
        let client_ids: Vec<ClientId> = self.clients.iter().enumerate().filter_map(|(i, c)| c.as_ref().map(|_| i)).collect();
        for &id in &client_ids {
            fds.push(PollFd::new(self.client_fd(id).unwrap(), PollFlags::POLLIN));
        }
        let iface_ids: Vec<IfaceId> = (0..self.interfaces.len()).collect();
        for &id in &iface_ids {
            fds.push(PollFd::new(self.interfaces[id].driver.fd(), PollFlags::POLLIN));
        }

        poll(&mut fds, POLL_TIMEOUT_MS)?;

        let elapsed = before.elapsed();
        self.elapsed = elapsed;

        let outbound = self.tick_socks(elapsed);
        for (iface, bytes) in outbound {
            self.send_to_iface(iface, &bytes);
        }

        self.handle_sock_ptys();

        for (i, &id) in client_ids.iter().enumerate() {
            if fds[1 + i].revents().unwrap_or(PollFlags::empty()).contains(PollFlags::POLLIN) {
                let _ = self.handle_client(id);
            }
        }

        for (i, &id) in iface_ids.iter().enumerate() {
            if fds[1 + client_ids.len() + i].revents().unwrap_or(PollFlags::empty()).contains(PollFlags::POLLIN) {
                let _ = self.handle_interface(id);
            }
        }

        if fds[0].revents().unwrap_or(PollFlags::empty()).contains(PollFlags::POLLIN) {
            let _ = self.accept_client();
        }

        Ok(())
    }

    pub fn run(&mut self, mut running: impl FnMut() -> bool) -> Result<()> {
        while running() {
            self.run_once()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::replay::Replay;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    fn test_server() -> (Server, String) {
        let path = format!("/tmp/patty-test-{}-{}.sock", std::process::id(), std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap().subsec_nanos());
        (Server::new(&path).unwrap(), path)
    }

    #[test]
    fn bind_listen_roundtrip() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();

        let id = server.sock_open(0, SockType::Stream).unwrap();
        server.sock_bind(id, addr("TEST-1")).unwrap();
        server.sock_listen(id).unwrap();
        assert_eq!(server.sock(id).unwrap().state, SockState::Listening);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sabm_from_unbound_destination_is_refused_with_dm() {
        let (server, path) = test_server();

        let frame = Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: Vec::new(),
            cr: Cr::Command,
            version: crate::frame::Version::V2_0,
            format: Format::Normal,
            control: FrameType::Sabm.control_bits() | (1 << 4),
            ty: FrameType::Sabm,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: Vec::new(),
        };
        let reply = server.reply_dm(&frame).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Dm);
        assert_eq!(decoded.src, addr("TEST-1"));
        assert_eq!(decoded.dest, addr("PEER-0"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sabm_handshake_establishes_child_socket_and_replies_ua() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();

        let listening = server.sock_open(0, SockType::Stream).unwrap();
        server.sock_bind(listening, addr("TEST-1")).unwrap();
        server.sock_listen(listening).unwrap();

        let frame = Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: Vec::new(),
            cr: Cr::Command,
            version: crate::frame::Version::V2_0,
            format: Format::Normal,
            control: FrameType::Sabm.control_bits() | (1 << 4),
            ty: FrameType::Sabm,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: Vec::new(),
        };

        let local = addr("TEST-1");
        let reply = server.handle_sabm(iface, &frame, &local).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Ua);

        let pair = Address::hash_pair(&addr("TEST-1"), &addr("PEER-0"));
        let child = *server.socks_by_pair.get(&pair).unwrap();
        assert_eq!(server.sock(child).unwrap().state, SockState::Established);
        assert_ne!(child, listening);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn rr_poll_acks_pending_frames() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();

        let id = server.sock_open(0, SockType::Stream).unwrap();
        {
            let e = server.entry_mut(id).unwrap();
            e.sock.local = addr("TEST-1");
            e.sock.remote = addr("PEER-0");
            e.sock.iface = Some(iface);
            e.sock.mode = Mode::Sabm;
            e.sock.state = SockState::Established;
            e.sock.write(b"hello").unwrap();
        }
        server.index_by_pair(id);

        let rr = Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: Vec::new(),
            cr: Cr::Command,
            version: crate::frame::Version::V2_0,
            format: Format::Normal,
            control: 0,
            ty: FrameType::Rr,
            nr: 1,
            ns: 0,
            pf: false,
            proto: 0,
            info: Vec::new(),
        };
        server.handle_rr(Some(id), &rr).unwrap();
        assert_eq!(server.sock(id).unwrap().va, 1);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sabm_to_an_alias_reaches_the_socket_bound_to_the_primary_address() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        server.if_get_mut(iface).unwrap().add_alias(addr("WIDE1-1"));

        let listening = server.sock_open(0, SockType::Stream).unwrap();
        server.sock_bind(listening, addr("TEST-1")).unwrap();
        server.sock_listen(listening).unwrap();

        let frame = Frame {
            dest: addr("WIDE1-1"),
            src: addr("PEER-0"),
            repeaters: Vec::new(),
            cr: Cr::Command,
            version: crate::frame::Version::V2_0,
            format: Format::Normal,
            control: FrameType::Sabm.control_bits() | (1 << 4),
            ty: FrameType::Sabm,
            nr: 0,
            ns: 0,
            pf: true,
            proto: 0,
            info: Vec::new(),
        };

        let local = server.resolve_local(iface, &frame.dest);
        assert_eq!(local, addr("TEST-1"));
        let reply = server.handle_sabm(iface, &frame, &local).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Ua);

        let pair = Address::hash_pair(&addr("WIDE1-1"), &addr("PEER-0"));
        let child = *server.socks_by_pair.get(&pair).unwrap();
        assert_eq!(server.sock(child).unwrap().state, SockState::Established);
        assert_ne!(child, listening);

        let _ = std::fs::remove_file(&path);
    }

    fn i_frame(ns: u8, nr: u8, pf: bool, info: &[u8]) -> Frame {
        Frame {
            dest: addr("TEST-1"),
            src: addr("PEER-0"),
            repeaters: Vec::new(),
            cr: Cr::Command,
            version: crate::frame::Version::V2_0,
            format: Format::Normal,
            control: 0,
            ty: FrameType::I,
            nr,
            ns,
            pf,
            proto: 0,
            info: info.to_vec(),
        }
    }

    fn established_stream(server: &mut Server, iface: IfaceId) -> SockId {
        let id = server.sock_open(0, SockType::Stream).unwrap();
        let e = server.entry_mut(id).unwrap();
        e.sock.local = addr("TEST-1");
        e.sock.remote = addr("PEER-0");
        e.sock.iface = Some(iface);
        e.sock.mode = Mode::Sabm;
        e.sock.state = SockState::Established;
        server.index_by_pair(id);
        id
    }

    #[test]
    fn i_frame_with_gap_of_one_gets_srej_larger_gap_gets_rej() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        let id = established_stream(&mut server, iface);

        let gap_one = i_frame(1, 0, true, b"x");
        let reply = server.handle_i(Some(id), &gap_one).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Srej);

        let gap_two = i_frame(2, 0, true, b"x");
        let reply = server.handle_i(Some(id), &gap_two).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Rej);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn non_poll_i_frames_batch_until_half_the_window_then_ack() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        let id = established_stream(&mut server, iface);
        server.entry_mut(id).unwrap().sock.n_window_rx = 4;

        let first = i_frame(0, 0, false, b"a");
        assert!(server.handle_i(Some(id), &first).unwrap().is_none());
        assert_eq!(server.sock(id).unwrap().rx_pending, 1);
        assert!(server.sock(id).unwrap().timer_t2.running());

        let second = i_frame(1, 0, false, b"b");
        let reply = server.handle_i(Some(id), &second).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Rr);
        assert_eq!(server.sock(id).unwrap().rx_pending, 0);
        assert!(!server.sock(id).unwrap().timer_t2.running());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn t2_expiry_flushes_a_batched_ack() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        let id = established_stream(&mut server, iface);
        server.entry_mut(id).unwrap().sock.n_window_rx = 8;

        let first = i_frame(0, 0, false, b"a");
        assert!(server.handle_i(Some(id), &first).unwrap().is_none());
        assert_eq!(server.sock(id).unwrap().rx_pending, 1);

        let t2_duration = server.sock(id).unwrap().timer_t2.duration();
        server.entry_mut(id).unwrap().sock.timer_t2.tick(t2_duration);
        let outbound = server.tick_socks(Duration::ZERO);
        assert_eq!(outbound.len(), 1);
        assert_eq!(server.sock(id).unwrap().rx_pending, 0);

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn out_of_order_segment_gets_srej_and_drops_the_partial_reassembly() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        let id = established_stream(&mut server, iface);

        let mut first = i_frame(0, 0, true, &[]);
        first.proto = crate::sock::PROTO_SEGMENT;
        first.info = vec![0x80 | 2, 0xcc, b'a'];
        server.handle_i(Some(id), &first).unwrap();

        let mut skipped = i_frame(1, 0, true, &[]);
        skipped.proto = crate::sock::PROTO_SEGMENT;
        skipped.info = vec![0x00, b'z'];
        let reply = server.handle_i(Some(id), &skipped).unwrap().unwrap();
        let (mut decoded, consumed) = Frame::decode_address(&reply).unwrap();
        decoded.decode_control(Format::Normal, &reply, consumed).unwrap();
        assert_eq!(decoded.ty, FrameType::Srej);

        assert!(server.entry_mut(id).unwrap().sock.assembler_read().is_none());

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn sock_ptys_stop_reading_once_the_tx_window_fills() {
        let (mut server, path) = test_server();
        let iface = server.if_add(Interface::new("kiss0", addr("TEST-1"), Box::new(Replay::new(Vec::new()))));
        server.if_get_mut(iface).unwrap().up();
        let id = established_stream(&mut server, iface);
        server.entry_mut(id).unwrap().sock.n_window_tx = 1;
        server.entry_mut(id).unwrap().sock.flow = Flow::Ready;

        let slave_path = server.pty_path(id).unwrap().to_string();
        {
            use std::io::Write;
            let mut slave = std::fs::OpenOptions::new().write(true).open(&slave_path).unwrap();
            slave.write_all(b"hi").unwrap();
        }

        server.handle_sock_ptys();
        assert!(server.sock(id).unwrap().window_full());
        assert_eq!(server.sock(id).unwrap().flow, Flow::Wait);

        let _ = std::fs::remove_file(&path);
    }
}
