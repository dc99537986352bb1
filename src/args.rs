use std::net::IpAddr;

use clap::Parser;

/// Command line interface of the relay: `relay <ip> <port> [<host>]`.
///
/// The doc comments on the fields double as the generated help text.
#[derive(Parser, Debug)]
#[command(version = env!("CARGO_PKG_VERSION"), about = "Room-based WebSocket relay")]
#[command(long_about = None)]
pub struct Args {
    /// Address to bind the listening socket to
    pub ip: IpAddr,

    /// TCP port to listen on
    pub port: u16,

    /// Origin host suffix that is allowed to connect; leave it out (or
    /// pass an empty string) to accept any origin
    pub host: Option<String>,
}

impl Args {
    pub fn new() -> Args {
        Args::parse()
    }
}

impl Default for Args {
    fn default() -> Args {
        Args::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ip_and_port() {
        let args = Args::try_parse_from(["relay", "127.0.0.1", "8080"]).unwrap();
        assert_eq!(args.ip, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(args.port, 8080);
        assert_eq!(args.host, None);
    }

    #[test]
    fn parses_the_optional_origin_suffix() {
        let args = Args::try_parse_from(["relay", "::", "443", "example.com"]).unwrap();
        assert_eq!(args.ip, "::".parse::<IpAddr>().unwrap());
        assert_eq!(args.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn rejects_garbage_addresses() {
        assert!(Args::try_parse_from(["relay", "not-an-ip", "8080"]).is_err());
        assert!(Args::try_parse_from(["relay", "127.0.0.1", "99999"]).is_err());
        assert!(Args::try_parse_from(["relay", "127.0.0.1"]).is_err());
    }
}
