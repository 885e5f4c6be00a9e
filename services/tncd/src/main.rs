//! Minimal manual-testing harness: opens a raw-mode promiscuous socket
//! against a named interface, prints the pty path it was handed, and blocks
//! keeping the link open until the daemon goes away.

use std::process::ExitCode;
use std::thread;
use std::time::Duration;

use clap::Parser;

use ax25::error::{Error, Result};
use ax25_client::Client;

const PING_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "tncd", about = "hold open a raw socket against one interface")]
struct Cli {
    /// Control socket path
    #[arg(short = 's', long = "sock")]
    sock: Option<String>,

    /// Interface station address to attach to
    #[arg(short = 'i', long = "if")]
    ifname: String,
}

fn pty_path(fd: std::os::unix::io::RawFd) -> Result<String> {
    std::fs::read_link(format!("/proc/self/fd/{}", fd))
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(Error::Io)
}

fn run(cli: &Cli) -> Result<()> {
    let mut client = Client::connect(cli.sock.as_deref())?;
    let fd = client.socket(ax25::sock::PROTO_NONE as i32, ax25::sock::SockType::Raw)?;

    let iface = ax25::addr::Address::parse(&cli.ifname).map_err(|_| Error::Protocol("invalid interface address"))?;
    if let Err(e) = client.setsockopt_if(fd, iface) {
        let _ = client.close(fd);
        return Err(e);
    }

    println!("{}", pty_path(fd)?);

    loop {
        if client.ping()? == 0 {
            break;
        }
        thread::sleep(PING_INTERVAL);
    }

    client.close(fd)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("tncd: {}", e);
            ExitCode::from(1)
        }
    }
}
