//! Configuration file grammar: a tokenizer over whitespace-delimited words
//! with comments and quoting, and a directive parser on top of it.

use crate::addr::Address;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowControl {
    Crtscts,
    Xonxoff,
}

#[derive(Debug, Clone)]
pub struct KissIf {
    pub device: String,
    pub baud: Option<u32>,
    pub flow: Option<FlowControl>,
}

#[derive(Debug, Clone, Default)]
pub struct AprsIsIf {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub appname: Option<String>,
    pub version: Option<String>,
    pub filter: Option<String>,
}

#[derive(Debug, Clone)]
pub enum IfKind {
    Kiss(KissIf),
    AprsIs(AprsIsIf),
}

#[derive(Debug, Clone)]
pub struct IfDecl {
    pub addr: Address,
    pub kind: IfKind,
}

#[derive(Debug, Clone)]
pub enum Directive {
    Sock(String),
    Pid(String),
    If { name: String, decl: IfDecl },
    Alias { name: String, addr: Address },
    RouteDefault { iface: String },
    RouteStation { addr: Address, iface: String, path: Vec<Address> },
}

#[derive(Debug, Clone)]
pub struct Line {
    pub lineno: usize,
    pub directive: Directive,
}

fn err(lineno: usize, message: impl Into<String>) -> Error {
    Error::Decode(format!("line {}: {}", lineno, message.into()))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TokState {
    Delim,
    Bare,
    Single,
    Double,
    Comment,
}

/// Splits the file into logical lines of tokens, joining any physical line
/// ending in an unescaped backslash into the next before tokenizing, honoring
/// `#` comments and single/double quoting with backslash escapes recognized
/// only inside double quotes.
fn tokenize(input: &str) -> Vec<(usize, Vec<String>)> {
    let mut lines = Vec::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut state = TokState::Delim;
    let mut escape = false;
    let mut lineno = 1usize;
    let mut line_start = 1usize;

    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' && matches!(state, TokState::Delim | TokState::Bare) && chars.peek() == Some(&'\n') {
            chars.next();
            lineno += 1;
            continue;
        }

        if c == '\n' {
            match state {
                TokState::Bare | TokState::Single | TokState::Double => {
                    tokens.push(std::mem::take(&mut cur));
                }
                _ => {}
            }
            if !tokens.is_empty() {
                lines.push((line_start, std::mem::take(&mut tokens)));
            }
            state = TokState::Delim;
            lineno += 1;
            line_start = lineno;
            continue;
        }

        match state {
            TokState::Comment => {}
            TokState::Delim => {
                if c.is_whitespace() {
                } else if c == '#' {
                    state = TokState::Comment;
                } else if c == '\'' {
                    state = TokState::Single;
                } else if c == '"' {
                    state = TokState::Double;
                } else {
                    state = TokState::Bare;
                    cur.push(c);
                }
            }
            TokState::Bare => {
                if c.is_whitespace() {
                    tokens.push(std::mem::take(&mut cur));
                    state = TokState::Delim;
                } else if c == '#' {
                    tokens.push(std::mem::take(&mut cur));
                    state = TokState::Comment;
                } else {
                    cur.push(c);
                }
            }
            TokState::Single => {
                if c == '\'' {
                    tokens.push(std::mem::take(&mut cur));
                    state = TokState::Delim;
                } else {
                    cur.push(c);
                }
            }
            TokState::Double => {
                if escape {
                    cur.push(c);
                    escape = false;
                } else if c == '\\' {
                    escape = true;
                } else if c == '"' {
                    tokens.push(std::mem::take(&mut cur));
                    state = TokState::Delim;
                } else {
                    cur.push(c);
                }
            }
        }
    }

    if matches!(state, TokState::Bare | TokState::Single | TokState::Double) {
        tokens.push(cur);
    }
    if !tokens.is_empty() {
        lines.push((line_start, tokens));
    }

    lines
}

fn parse_addr(lineno: usize, s: &str) -> Result<Address> {
    Address::parse(s).map_err(|_| err(lineno, format!("invalid callsign '{}'", s)))
}

fn parse_kiss_if(lineno: usize, rest: &[String]) -> Result<IfKind> {
    let device = rest.first().ok_or_else(|| err(lineno, "no device path provided"))?.clone();

    let mut baud = None;
    let mut flow = None;
    let mut i = 1;

    while i < rest.len() {
        match rest[i].as_str() {
            "baud" => {
                let v = rest.get(i + 1).ok_or_else(|| err(lineno, "missing baud value"))?;
                baud = Some(v.parse().map_err(|_| err(lineno, format!("invalid baud rate '{}'", v)))?);
                i += 2;
            }
            "flow" => {
                let v = rest.get(i + 1).ok_or_else(|| err(lineno, "missing flow value"))?;
                flow = Some(match v.as_str() {
                    "crtscts" => FlowControl::Crtscts,
                    "xonxoff" => FlowControl::Xonxoff,
                    _ => return Err(err(lineno, format!("unknown flow control '{}'", v))),
                });
                i += 2;
            }
            other => return Err(err(lineno, format!("unexpected kiss option '{}'", other))),
        }
    }

    Ok(IfKind::Kiss(KissIf { device, baud, flow }))
}

fn parse_aprs_is_if(lineno: usize, rest: &[String]) -> Result<IfKind> {
    let mut aprs = AprsIsIf::default();
    let mut i = 0;

    while i < rest.len() {
        let key = rest[i].as_str();
        let val = rest.get(i + 1).ok_or_else(|| err(lineno, format!("missing value for '{}'", key)))?;

        match key {
            "host" => aprs.host = Some(val.clone()),
            "port" => aprs.port = Some(val.parse().map_err(|_| err(lineno, format!("invalid port '{}'", val)))?),
            "user" => aprs.user = Some(val.clone()),
            "pass" => aprs.pass = Some(val.clone()),
            "appname" => aprs.appname = Some(val.clone()),
            "version" => aprs.version = Some(val.clone()),
            "filter" => aprs.filter = Some(val.clone()),
            other => return Err(err(lineno, format!("unexpected aprs-is option '{}'", other))),
        }

        i += 2;
    }

    Ok(IfKind::AprsIs(aprs))
}

fn parse_if(lineno: usize, tokens: &[String]) -> Result<Directive> {
    if tokens.len() < 5 {
        return Err(err(lineno, "invalid interface declaration"));
    }

    let name = tokens[1].clone();

    if tokens[2] != "ax25" {
        return Err(err(lineno, format!("unsupported interface family '{}'", tokens[2])));
    }

    let addr = parse_addr(lineno, &tokens[3])?;

    let kind = match tokens[4].as_str() {
        "kiss" => parse_kiss_if(lineno, &tokens[5..])?,
        "aprs-is" => parse_aprs_is_if(lineno, &tokens[5..])?,
        other => return Err(err(lineno, format!("unknown interface driver '{}'", other))),
    };

    Ok(Directive::If { name, decl: IfDecl { addr, kind } })
}

fn parse_route(lineno: usize, tokens: &[String]) -> Result<Directive> {
    if tokens.len() < 2 {
        return Err(err(lineno, "invalid route declaration"));
    }

    match tokens[1].as_str() {
        "default" => {
            if tokens.len() != 4 || tokens[2] != "if" {
                return Err(err(lineno, "invalid default route declaration"));
            }
            Ok(Directive::RouteDefault { iface: tokens[3].clone() })
        }
        "station" => {
            if tokens.len() < 3 {
                return Err(err(lineno, "invalid station route declaration"));
            }
            let addr = parse_addr(lineno, &tokens[2])?;

            if tokens.len() < 5 {
                return Err(err(lineno, "invalid station route declaration"));
            }
            if tokens[3] != "if" {
                return Err(err(lineno, format!("unexpected keyword '{}'", tokens[3])));
            }
            let iface = tokens[4].clone();

            if tokens.len() == 5 {
                return Ok(Directive::RouteStation { addr, iface, path: Vec::new() });
            }

            if tokens[5] != "path" {
                return Err(err(lineno, format!("unexpected keyword '{}'", tokens[5])));
            }

            let path = tokens[6..].iter().map(|t| parse_addr(lineno, t)).collect::<Result<Vec<_>>>()?;

            Ok(Directive::RouteStation { addr, iface, path })
        }
        other => Err(err(lineno, format!("invalid route type '{}'", other))),
    }
}

fn parse_directive(lineno: usize, tokens: &[String]) -> Result<Directive> {
    match tokens[0].as_str() {
        "sock" => {
            if tokens.len() != 2 {
                return Err(err(lineno, "invalid arguments for 'sock'"));
            }
            Ok(Directive::Sock(tokens[1].clone()))
        }
        "pid" => {
            if tokens.len() != 2 {
                return Err(err(lineno, "invalid arguments for 'pid'"));
            }
            Ok(Directive::Pid(tokens[1].clone()))
        }
        "if" => parse_if(lineno, tokens),
        "alias" => {
            if tokens.len() != 3 {
                return Err(err(lineno, "invalid arguments for 'alias'"));
            }
            Ok(Directive::Alias { name: tokens[1].clone(), addr: parse_addr(lineno, &tokens[2])? })
        }
        "route" => parse_route(lineno, tokens),
        other => Err(err(lineno, format!("unknown configuration value '{}'", other))),
    }
}

/// Parses a whole configuration file into an ordered list of directives.
/// Directive application order (`sock`/`pid`, then `if`, then `alias`, then
/// `route`) is the caller's responsibility; this only validates grammar.
pub fn parse(input: &str) -> Result<Vec<Line>> {
    tokenize(input)
        .into_iter()
        .map(|(lineno, tokens)| Ok(Line { lineno, directive: parse_directive(lineno, &tokens)? }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sock_and_pid() {
        let lines = parse("sock /var/run/patty/patty.sock\npid /var/run/patty.pid\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::Sock(p) if p == "/var/run/patty/patty.sock"));
        assert!(matches!(&lines[1].directive, Directive::Pid(p) if p == "/var/run/patty.pid"));
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let lines = parse("# a comment\n\nsock /tmp/x.sock # trailing comment\n").unwrap();
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn quoted_strings_keep_embedded_spaces_and_escapes() {
        let lines = parse("pid \"/var/run/patty daemon.pid\"\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::Pid(p) if p == "/var/run/patty daemon.pid"));

        let lines = parse("pid \"/var/run/patty\\\"s.pid\"\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::Pid(p) if p == "/var/run/patty\"s.pid"));
    }

    #[test]
    fn line_continuation_joins_physical_lines() {
        let lines = parse("if kiss0 ax25 N0CALL-1 \\\nkiss /dev/ttyUSB0\n").unwrap();
        assert_eq!(lines.len(), 1);
        assert!(matches!(&lines[0].directive, Directive::If { name, .. } if name == "kiss0"));
    }

    #[test]
    fn kiss_interface_with_options() {
        let lines = parse("if kiss0 ax25 N0CALL-1 kiss /dev/ttyUSB0 baud 9600 flow crtscts\n").unwrap();
        match &lines[0].directive {
            Directive::If { name, decl } => {
                assert_eq!(name, "kiss0");
                assert_eq!(decl.addr, Address::parse("N0CALL-1").unwrap());
                match &decl.kind {
                    IfKind::Kiss(k) => {
                        assert_eq!(k.device, "/dev/ttyUSB0");
                        assert_eq!(k.baud, Some(9600));
                        assert_eq!(k.flow, Some(FlowControl::Crtscts));
                    }
                    _ => panic!("expected kiss"),
                }
            }
            _ => panic!("expected if"),
        }
    }

    #[test]
    fn aprs_is_interface_with_options() {
        let lines = parse("if aprs0 ax25 N0CALL-2 aprs-is host rotate.aprs2.net port 14580 user N0CALL pass -1\n")
            .unwrap();
        match &lines[0].directive {
            Directive::If { decl, .. } => match &decl.kind {
                IfKind::AprsIs(a) => {
                    assert_eq!(a.host.as_deref(), Some("rotate.aprs2.net"));
                    assert_eq!(a.port, Some(14580));
                    assert_eq!(a.user.as_deref(), Some("N0CALL"));
                    assert_eq!(a.pass.as_deref(), Some("-1"));
                }
                _ => panic!("expected aprs-is"),
            },
            _ => panic!("expected if"),
        }
    }

    #[test]
    fn route_default() {
        let lines = parse("route default if kiss0\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::RouteDefault { iface } if iface == "kiss0"));
    }

    #[test]
    fn route_station_with_path() {
        let lines = parse("route station WIDE1-1 if kiss0 path N0CALL-1 N0CALL-2\n").unwrap();
        match &lines[0].directive {
            Directive::RouteStation { addr, iface, path } => {
                assert_eq!(*addr, Address::parse("WIDE1-1").unwrap());
                assert_eq!(iface, "kiss0");
                assert_eq!(path, &vec![Address::parse("N0CALL-1").unwrap(), Address::parse("N0CALL-2").unwrap()]);
            }
            _ => panic!("expected route station"),
        }
    }

    #[test]
    fn route_station_trailing_empty_path_is_valid() {
        let lines = parse("route station WIDE1-1 if kiss0 path\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::RouteStation { path, .. } if path.is_empty()));
    }

    #[test]
    fn route_station_without_if_keyword_in_fourth_slot_is_rejected() {
        assert!(parse("route station WIDE1-1 path kiss0 N0CALL-1\n").is_err());
    }

    #[test]
    fn alias_directive() {
        let lines = parse("alias kiss0 WIDE1-1\n").unwrap();
        assert!(matches!(&lines[0].directive, Directive::Alias{name, addr}
            if name == "kiss0" && *addr == Address::parse("WIDE1-1").unwrap()));
    }

    #[test]
    fn unknown_directive_is_rejected() {
        assert!(parse("bogus 1 2 3\n").is_err());
    }
}
