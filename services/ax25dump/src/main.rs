//! Frame dump tool: decodes and prints AX.25 frames from a running daemon's
//! interface (in promiscuous mode), directly from a serial KISS device, or
//! from a captured file, in the style of `tcpdump`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ax25::error::{Error, Result};
use ax25::frame::Format;
use ax25_client::Client;

const BUFSZ: usize = 4096;

#[derive(Parser)]
#[command(name = "ax25dump", about = "dump AX.25 frames from an interface, device, or capture file")]
struct Cli {
    /// Control socket path
    #[arg(short = 's', long = "sock")]
    sock: Option<String>,

    /// Attach to a running daemon's interface in promiscuous mode
    #[arg(short = 'i', long = "if")]
    ifname: Option<String>,

    /// A device or capture file, when not attaching via `--if`
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn printable(c: u8) -> char {
    if (0x20..0x7f).contains(&c) {
        c as char
    } else {
        '.'
    }
}

fn hexdump(data: &[u8]) {
    for chunk_start in (0..data.len()).step_by(16) {
        print!("{:08x}:", chunk_start);
        for x in 0..16 {
            if x % 2 == 0 {
                print!(" ");
            }
            let i = chunk_start + x;
            if i < data.len() {
                print!("{:02x}", data[i]);
            } else {
                print!("  ");
            }
        }
        print!("  ");
        let end = (chunk_start + 16).min(data.len());
        for &c in &data[chunk_start..end] {
            print!("{}", printable(c));
        }
        println!();
    }
}

fn dump_frame(buf: &[u8]) {
    let (mut frame, consumed) = match ax25::frame::Frame::decode_address(buf) {
        Ok(v) => v,
        Err(_) => {
            println!("Invalid frame address");
            hexdump(buf);
            return;
        }
    };

    if frame.decode_control(Format::Normal, buf, consumed).is_err() {
        println!("Invalid frame control");
        hexdump(buf);
        return;
    }

    println!("{}", frame.dump());
    hexdump(buf);
}

/// Attach to an interface on a running daemon in promiscuous mode and dump
/// every frame it forwards.
fn dump_interface(sock: Option<&str>, ifname: &str) -> Result<()> {
    let mut client = Client::connect(sock)?;
    let fd = client.socket(ax25::sock::PROTO_NONE as i32, ax25::sock::SockType::Raw)?;
    let iface = ax25::addr::Address::parse(ifname).map_err(|_| Error::Protocol("invalid interface address"))?;
    client.setsockopt_if(fd, iface)?;

    let mut buf = [0u8; BUFSZ];
    loop {
        let n = client.read(fd, &mut buf)?;
        if n == 0 {
            break;
        }
        dump_frame(&buf[..n]);
    }
    client.close(fd)?;
    Ok(())
}

/// Decode frames directly from a serial KISS device, with optional trailing
/// `baud`/`flow` arguments matching `pattyd`'s standalone device syntax.
fn dump_device(device: &str, opts: &[String]) -> Result<()> {
    let mut baud = None;
    let mut flow = None;
    let mut i = 0;
    while i < opts.len() {
        match opts[i].as_str() {
            "crtscts" => flow = Some(ax25::config::FlowControl::Crtscts),
            "xonxoff" => flow = Some(ax25::config::FlowControl::Xonxoff),
            s if s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                let rate: u32 = s.parse().map_err(|_| Error::Decode(format!("invalid baud rate '{}'", s)))?;
                baud = Some(match rate {
                    1200 => nix::sys::termios::BaudRate::B1200,
                    2400 => nix::sys::termios::BaudRate::B2400,
                    4800 => nix::sys::termios::BaudRate::B4800,
                    9600 => nix::sys::termios::BaudRate::B9600,
                    19200 => nix::sys::termios::BaudRate::B19200,
                    38400 => nix::sys::termios::BaudRate::B38400,
                    57600 => nix::sys::termios::BaudRate::B57600,
                    115200 => nix::sys::termios::BaudRate::B115200,
                    _ => return Err(Error::Decode(format!("unsupported baud rate '{}'", rate))),
                });
            }
            other => return Err(Error::Decode(format!("invalid device option '{}'", other))),
        }
        i += 1;
    }

    let mut tnc = ax25::iface::kiss_tnc::KissTnc::open(&PathBuf::from(device), baud, flow)?;
    run_driver(&mut tnc)
}

fn dump_file(path: &str) -> Result<()> {
    let data = std::fs::read(path)?;
    let mut replay = ax25::iface::replay::Replay::new(data);
    run_driver(&mut replay)
}

fn run_driver(driver: &mut impl ax25::iface::InterfaceDriver) -> Result<()> {
    let mut scratch = [0u8; BUFSZ];
    loop {
        if driver.fill()? == 0 {
            break;
        }
        loop {
            if driver.drain(&mut scratch)? == 0 {
                break;
            }
            if driver.pending() {
                let len = driver.flush(&mut scratch)?;
                dump_frame(&scratch[..len]);
            }
        }
    }
    Ok(())
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(ifname) = &cli.ifname {
        if !cli.args.is_empty() {
            return Err(Error::Protocol("too many arguments provided"));
        }
        return dump_interface(cli.sock.as_deref(), ifname);
    }

    if cli.args.is_empty() {
        return Err(Error::Protocol("not enough arguments provided"));
    }

    let path = std::path::Path::new(&cli.args[0]);
    if cli.args.len() == 1 && is_capture_file(path) {
        return dump_file(&cli.args[0]);
    }
    dump_device(&cli.args[0], &cli.args[1..])
}

/// A bare path with no device-option suffix and no character-device mode is
/// treated as a capture file rather than a serial device.
fn is_capture_file(path: &std::path::Path) -> bool {
    use std::os::unix::fs::FileTypeExt;
    match std::fs::metadata(path) {
        Ok(meta) => !meta.file_type().is_char_device(),
        Err(_) => false,
    }
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::Protocol(_)) => {
            eprintln!("usage: ax25dump [-s patty.sock] -i ifname");
            eprintln!("       ax25dump /dev/ttyXYZ [tioarg ...]");
            eprintln!("       ax25dump file.cap");
            ExitCode::from(64)
        }
        Err(e) => {
            eprintln!("ax25dump: {}", e);
            ExitCode::from(1)
        }
    }
}
