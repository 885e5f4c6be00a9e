use std::io;

/// Crate-wide error type. Every fallible operation in `ax25` returns a
/// `Result<T, Error>`; variants map onto the nearest POSIX errno when a
/// failure needs to cross the client control socket.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("i/o error: {0}")]
    Errno(#[from] nix::errno::Errno),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("buffer overflow")]
    Overflow,

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("wrong state: {0}")]
    State(&'static str),

    #[error("timed out")]
    Timeout,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("not supported: {0}")]
    NotSupported(&'static str),

    #[error("network is down")]
    NetworkDown,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The POSIX errno nearest to this error's meaning, for surfacing to
    /// clients over the control socket (see `patty_client_*_response.eno`).
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::Errno(e) => *e as i32,
            Error::Decode(_) => libc::EIO,
            Error::Overflow => libc::EOVERFLOW,
            Error::Protocol(_) => libc::EINVAL,
            Error::State(_) => libc::EINVAL,
            Error::Timeout => libc::ETIMEDOUT,
            Error::ConnectionRefused => libc::ECONNREFUSED,
            Error::NotSupported(_) => libc::ENOTSUP,
            Error::NetworkDown => libc::ENETDOWN,
        }
    }
}
