pub mod addr;
pub mod config;
pub mod error;
pub mod frame;
pub mod iface;
pub mod kiss;
pub mod protocol;
pub mod route;
pub mod server;
pub mod sock;
pub mod timer;
pub mod xid;

pub use error::{Error, Result};
