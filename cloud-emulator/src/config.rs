use crate::Error;
use std::env::var;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::str::FromStr;

/// Same port as LocalStack so that clients configured for it work unchanged.
const DEFAULT_LISTENER: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4566);
const DEFAULT_REGION: &str = "us-east-1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorConfig {
    /// E.g. 127.0.0.1:4566. Port 0 picks a free port.
    pub listener: SocketAddr,
    /// Goes into ARNs and the AWS_REGION of the functions
    pub region: String,
    /// Function code is extracted into subdirectories of this one.
    /// None creates a temporary dir that is removed when the emulator stops.
    pub work_dir: Option<PathBuf>,
}

impl EmulatorConfig {
    /// Creates a new Config instance from the environment variables.
    /// Uses default values where possible.
    pub fn from_env() -> Result<Self, Error> {
        let listener = match var("CLOUD_EMULATOR_LISTENER") {
            Ok(v) => parse_listener(&v)?,
            Err(_) => SocketAddr::V4(DEFAULT_LISTENER),
        };

        let work_dir = match var("CLOUD_EMULATOR_WORK_DIR") {
            Ok(v) => PathBuf::from(v),
            Err(_) => std::env::temp_dir().join("cloud-emulator"),
        };

        Ok(Self {
            listener,
            region: var("AWS_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_owned()),
            work_dir: Some(work_dir),
        })
    }

    /// A free local port and a temporary work dir, for emulators started by tests.
    pub fn ephemeral() -> Self {
        Self {
            listener: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)),
            region: DEFAULT_REGION.to_owned(),
            work_dir: None,
        }
    }
}

/// Parses `ip:port`. An IP without a port gets the default port.
fn parse_listener(value: &str) -> Result<SocketAddr, Error> {
    let (ip, port) = match value.split_once(':') {
        Some((ip, port)) => (
            ip,
            port.parse::<u16>().map_err(|_| {
                format!("Invalid port number in CLOUD_EMULATOR_LISTENER: {value}. Must be a valid port number, e.g. 4566")
            })?,
        ),
        None => (value, DEFAULT_LISTENER.port()),
    };

    let ip = Ipv4Addr::from_str(ip).map_err(|_| {
        format!("Invalid IP address in CLOUD_EMULATOR_LISTENER: {value}. Must be a valid IP4, e.g. 127.0.0.1")
    })?;

    Ok(SocketAddr::V4(SocketAddrV4::new(ip, port)))
}
