//! Daemon entry point: loads interfaces and routes either from a
//! configuration file or from standalone command-line arguments, then runs
//! the event loop until signaled to stop.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use ax25::addr::Address;
use ax25::config::{self, AprsIsIf, Directive, FlowControl, IfKind, KissIf};
use ax25::iface::aprs_is::{AprsIs, AprsIsInfo, DEFAULT_APPNAME, DEFAULT_VERSION};
use ax25::iface::kiss_tnc::KissTnc;
use ax25::iface::Interface;
use ax25::protocol::DEFAULT_SOCK_PATH;
use ax25::route::Route;
use ax25::server::Server;

const DEFAULT_IFNAME: &str = "kiss0";

#[derive(Parser)]
#[command(name = "pattyd", about = "AX.25 packet network daemon")]
struct Cli {
    /// Run in the foreground instead of daemonizing
    #[arg(short = 'f', long = "fg")]
    foreground: bool,

    /// Configuration file path
    #[arg(short = 'c', long = "config", default_value = "/etc/patty/pattyd.conf")]
    config: PathBuf,

    /// Construct a single KISS interface from command-line arguments instead
    /// of reading a configuration file
    #[arg(short = 's', long = "standalone")]
    standalone: bool,

    /// SOCK MYCALL DEVICE [tioarg ...] when `--standalone` is given
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn baud_rate(baud: u32) -> Option<nix::sys::termios::BaudRate> {
    use nix::sys::termios::BaudRate::*;
    Some(match baud {
        110 => B110,
        300 => B300,
        1200 => B1200,
        2400 => B2400,
        4800 => B4800,
        9600 => B9600,
        19200 => B19200,
        38400 => B38400,
        57600 => B57600,
        115200 => B115200,
        230400 => B230400,
        _ => return None,
    })
}

fn build_kiss_interface(addr: Address, kiss: &KissIf) -> ax25::error::Result<Interface> {
    let baud = match kiss.baud {
        Some(b) => Some(baud_rate(b).ok_or(ax25::error::Error::Protocol("unsupported baud rate"))?),
        None => None,
    };
    let tnc = KissTnc::open(std::path::Path::new(&kiss.device), baud, kiss.flow)?;
    Ok(Interface::new(kiss.device.clone(), addr, Box::new(tnc)))
}

fn build_aprs_is_interface(addr: Address, aprs: &AprsIsIf) -> ax25::error::Result<Interface> {
    let host = aprs.host.clone().ok_or(ax25::error::Error::Protocol("aprs-is interface missing 'host'"))?;
    let port = aprs.port.ok_or(ax25::error::Error::Protocol("aprs-is interface missing 'port'"))?;
    let info = AprsIsInfo {
        host,
        port,
        user: aprs.user.clone().unwrap_or_else(|| "N0CALL".to_string()),
        pass: aprs.pass.clone().unwrap_or_else(|| "-1".to_string()),
        appname: aprs.appname.clone().unwrap_or_else(|| DEFAULT_APPNAME.to_string()),
        version: aprs.version.clone().unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        filter: aprs.filter.clone().unwrap_or_else(|| "m/25".to_string()),
    };
    let driver = AprsIs::new(info)?;
    Ok(Interface::new("aprs-is", addr, Box::new(driver)))
}

/// Applies a parsed configuration file to a freshly created server, in the
/// fixed order `sock`/`pid` (already bound by the time this runs), `if`,
/// `alias`, then `route` -- each `if` must exist before a `route` can name it.
fn apply_config(server: &mut Server, lines: &[config::Line]) -> ax25::error::Result<()> {
    let mut iface_by_name: std::collections::HashMap<String, ax25::route::IfaceId> = std::collections::HashMap::new();

    for line in lines {
        if let Directive::If { name, decl } = &line.directive {
            let iface = match &decl.kind {
                IfKind::Kiss(kiss) => build_kiss_interface(decl.addr, kiss),
                IfKind::AprsIs(aprs) => build_aprs_is_interface(decl.addr, aprs),
            }
            .map_err(|e| ax25::error::Error::Decode(format!("line {}: interface '{}': {}", line.lineno, name, e)))?;

            let id = server.if_add(iface);
            server.if_get_mut(id).unwrap().up();
            iface_by_name.insert(name.clone(), id);
        }
    }

    for line in lines {
        if let Directive::Alias { name, addr } = &line.directive {
            let id = *iface_by_name
                .get(name)
                .ok_or_else(|| ax25::error::Error::Decode(format!("line {}: unknown interface '{}'", line.lineno, name)))?;
            if let Some(iface) = server.if_get_mut(id) {
                iface.add_alias(*addr);
            }
        }
    }

    for line in lines {
        match &line.directive {
            Directive::RouteDefault { iface } => {
                let id = *iface_by_name.get(iface).ok_or_else(|| {
                    ax25::error::Error::Decode(format!("line {}: unknown interface '{}'", line.lineno, iface))
                })?;
                server
                    .routes_mut()
                    .add(Route::default_route(id))
                    .map_err(|e| ax25::error::Error::Decode(format!("line {}: {}", line.lineno, e)))?;
            }
            Directive::RouteStation { addr, iface, path } => {
                let id = *iface_by_name.get(iface).ok_or_else(|| {
                    ax25::error::Error::Decode(format!("line {}: unknown interface '{}'", line.lineno, iface))
                })?;
                let repeaters = path
                    .iter()
                    .map(|addr| ax25::frame::Repeater { addr: *addr, repeated: false })
                    .collect();
                let route = Route::new(id, *addr, repeaters)
                    .map_err(|e| ax25::error::Error::Decode(format!("line {}: {}", line.lineno, e)))?;
                server
                    .routes_mut()
                    .add(route)
                    .map_err(|e| ax25::error::Error::Decode(format!("line {}: {}", line.lineno, e)))?;
            }
            _ => {}
        }
    }

    Ok(())
}

fn sock_path_from_config(lines: &[config::Line]) -> String {
    for line in lines {
        if let Directive::Sock(path) = &line.directive {
            return path.clone();
        }
    }
    DEFAULT_SOCK_PATH.to_string()
}

/// `SOCK MYCALL DEVICE [tioarg...]`: one KISS interface bound to a default
/// route, named `kiss0`.
fn run_standalone(sock_path: &str, args: &[String]) -> ax25::error::Result<Server> {
    let addr = Address::parse(&args[0]).map_err(|_| ax25::error::Error::Decode(format!("invalid callsign '{}'", args[0])))?;
    let device = args[1].clone();

    let mut baud = None;
    let mut flow = None;
    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "crtscts" => flow = Some(FlowControl::Crtscts),
            "xonxoff" => flow = Some(FlowControl::Xonxoff),
            s if s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                baud = Some(s.parse().map_err(|_| ax25::error::Error::Decode(format!("invalid baud rate '{}'", s)))?);
            }
            other => return Err(ax25::error::Error::Decode(format!("invalid device option '{}'", other))),
        }
        i += 1;
    }

    let kiss = KissIf { device, baud, flow };

    let mut server = Server::new(sock_path)?;
    let iface = build_kiss_interface(addr, &kiss)?;
    let id = server.if_add(iface);
    server.if_get_mut(id).unwrap().up();
    println!("if {} pty {}", DEFAULT_IFNAME, server.if_get(id).unwrap().driver.fd());
    server.routes_mut().add(Route::default_route(id))?;
    Ok(server)
}

fn run() -> ax25::error::Result<()> {
    let cli = Cli::parse();

    let mut server = if cli.standalone {
        if cli.args.len() < 3 {
            return Err(ax25::error::Error::Decode("standalone mode requires SOCK MYCALL DEVICE".into()));
        }
        run_standalone(&cli.args[0], &cli.args[1..])?
    } else {
        let text = std::fs::read_to_string(&cli.config)?;
        let lines = config::parse(&text)?;
        let sock_path = sock_path_from_config(&lines);
        let mut server = Server::new(&sock_path)?;
        apply_config(&mut server, &lines)?;
        server
    };

    if !cli.foreground {
        nix::unistd::daemon(true, false)?;
    }

    server.run(|| true)
}

fn main() -> ExitCode {
    env_logger::init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pattyd: {}", e);
            ExitCode::from(1)
        }
    }
}
