use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::TransportError;

/// Address of a stream endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// TCP socket address (`host:port`).
    Tcp(String),
    /// Filesystem-path Unix domain socket.
    Unix(PathBuf),
}

impl Endpoint {
    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match self {
            Endpoint::Tcp(_) => "tcp",
            Endpoint::Unix(_) => "unix-domain-socket",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp(addr) => write!(f, "tcp://{addr}"),
            Endpoint::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        if let Some(path) = input.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(TransportError::InvalidEndpoint(input.to_string()));
            }
            return Ok(Endpoint::Unix(PathBuf::from(path)));
        }
        if let Some(addr) = input.strip_prefix("tcp://") {
            return parse_tcp(addr, input);
        }
        if input.starts_with('/') || input.starts_with("./") {
            return Ok(Endpoint::Unix(PathBuf::from(input)));
        }
        parse_tcp(input, input)
    }
}

fn parse_tcp(addr: &str, original: &str) -> Result<Endpoint, TransportError> {
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(Endpoint::Tcp(addr.to_string()))
        }
        _ => Err(TransportError::InvalidEndpoint(original.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_unix_prefix() {
        let endpoint: Endpoint = "unix:/tmp/msgprims.sock".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/tmp/msgprims.sock")));
    }

    #[test]
    fn parses_bare_absolute_path_as_unix() {
        let endpoint: Endpoint = "/run/app.sock".parse().unwrap();
        assert_eq!(endpoint, Endpoint::Unix(PathBuf::from("/run/app.sock")));
    }

    #[test]
    fn parses_tcp_forms() {
        let a: Endpoint = "tcp://127.0.0.1:7000".parse().unwrap();
        let b: Endpoint = "localhost:7000".parse().unwrap();
        assert_eq!(a, Endpoint::Tcp("127.0.0.1:7000".to_string()));
        assert_eq!(b, Endpoint::Tcp("localhost:7000".to_string()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            "nonsense".parse::<Endpoint>(),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!("host:notaport".parse::<Endpoint>().is_err());
        assert!("unix:".parse::<Endpoint>().is_err());
    }

    #[test]
    fn display_round_trips() {
        for input in ["unix:/tmp/a.sock", "tcp://127.0.0.1:9"] {
            let endpoint: Endpoint = input.parse().unwrap();
            assert_eq!(endpoint.to_string(), input);
        }
    }
}
