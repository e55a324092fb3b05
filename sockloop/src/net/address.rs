use crate::error::Error;

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs};

/// Wildcard address: listen on every interface.
pub const ANY_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Wildcard port: let the system pick one.
pub const ANY_PORT: u16 = 0;

/// Resolves `host[:port]` to an IPv4 endpoint.
///
/// A missing port resolves to [`ANY_PORT`] and an empty host to
/// [`ANY_ADDRESS`]. Dotted IPv4 literals are taken as is; anything else
/// goes through the system resolver and the first IPv4 result wins.
///
/// # Examples
///
/// ```
/// use sockloop::net::resolve;
/// use std::net::Ipv4Addr;
///
/// let addr = resolve("127.0.0.1:8080").unwrap();
/// assert_eq!(*addr.ip(), Ipv4Addr::LOCALHOST);
/// assert_eq!(addr.port(), 8080);
///
/// let addr = resolve(":9000").unwrap();
/// assert_eq!(*addr.ip(), Ipv4Addr::UNSPECIFIED);
/// ```
pub fn resolve(text: &str) -> Result<SocketAddrV4, Error> {
    let failed = |source: io::Error| Error::Resolution {
        address: text.to_owned(),
        source,
    };

    let (host, port) = match text.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                failed(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid port `{port}`"),
                ))
            })?;
            (host, port)
        }
        None => (text, ANY_PORT),
    };

    if host.is_empty() {
        return Ok(SocketAddrV4::new(ANY_ADDRESS, port));
    }

    if let Ok(ip) = host.parse::<Ipv4Addr>() {
        return Ok(SocketAddrV4::new(ip, port));
    }

    let candidates = (host, port).to_socket_addrs().map_err(failed)?;

    candidates
        .into_iter()
        .find_map(|addr| match addr {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| {
            failed(io::Error::new(
                io::ErrorKind::NotFound,
                "no IPv4 address found",
            ))
        })
}
