//! Opening the broker socket along whatever route the selector picks.

use std::io::{self, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use log::{debug, info, warn};
use url::Url;

use crate::error::TransportError;
use crate::proxy::{Route, RouteSelector};

const MAX_PROXY_REPLY: usize = 8 * 1024;

/// Connect to `target` through the first route of `selector` that works.
///
/// Failed routes are reported back through [`RouteSelector::connect_failed`].
pub fn open_stream(
    selector: &dyn RouteSelector,
    target: &Url,
    timeout: Duration,
) -> Result<TcpStream, TransportError> {
    // bracketed for IPv6, which is what the CONNECT request line wants
    let host = target
        .host_str()
        .ok_or_else(|| TransportError::NoRoute(target.to_string()))?;
    let port = target
        .port_or_known_default()
        .ok_or_else(|| TransportError::NoRoute(target.to_string()))?;

    let mut last_error = None;
    for route in selector.select(Some(target)) {
        debug!("trying route {} to {}:{}", route, host, port);
        let attempt = match &route {
            Route::Direct => connect(
                &format!("{}:{}", host, port),
                port,
                target.socket_addrs(|| Some(port)),
                timeout,
            ),
            Route::Http {
                host: proxy_host,
                port: proxy_port,
            } => {
                let proxy_host = proxy_host.trim_start_matches('[').trim_end_matches(']');
                connect(
                    &format!("{}:{}", proxy_host, proxy_port),
                    *proxy_port,
                    (proxy_host, *proxy_port)
                        .to_socket_addrs()
                        .map(|addrs| addrs.collect()),
                    timeout,
                )
                .and_then(|(stream, addr)| {
                    tunnel(stream, addr, host, port, timeout).map(|stream| (stream, addr))
                })
            }
        };

        match attempt {
            Ok((stream, _)) => {
                info!("Connected to {}:{} via {}", host, port, route);
                return Ok(stream);
            }
            Err(failure) => {
                warn!("route {} to {}:{} failed: {}", route, host, port, failure.error);
                let cause = failure.cause();
                if let Err(e) =
                    selector.connect_failed(Some(target), Some(failure.addr), Some(&cause))
                {
                    warn!("route selector rejected failure report: {}", e);
                }
                last_error = Some(failure.error);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| TransportError::NoRoute(target.to_string())))
}

struct RouteFailure {
    /// the address that failed, or the unspecified address when the name never resolved
    addr: SocketAddr,
    error: TransportError,
}

impl RouteFailure {
    /// the failure as an I/O error for [`RouteSelector::connect_failed`]
    fn cause(&self) -> io::Error {
        match &self.error {
            TransportError::Connect { source, .. } => {
                io::Error::new(source.kind(), source.to_string())
            }
            other => io::Error::new(io::ErrorKind::ConnectionRefused, other.to_string()),
        }
    }
}

fn connect(
    target: &str,
    port: u16,
    resolved: io::Result<Vec<SocketAddr>>,
    timeout: Duration,
) -> Result<(TcpStream, SocketAddr), RouteFailure> {
    let connect_error = |addr, source| RouteFailure {
        addr,
        error: TransportError::Connect {
            target: target.to_owned(),
            source,
        },
    };
    let unresolved = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);

    let addrs = resolved.map_err(|e| connect_error(unresolved, e))?;

    let mut last = io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses");
    let mut last_addr = unresolved;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok((stream, addr)),
            Err(e) => {
                last = e;
                last_addr = addr;
            }
        }
    }
    Err(connect_error(last_addr, last))
}

/// Ask the HTTP proxy on `stream` for a CONNECT tunnel to `host:port`.
fn tunnel(
    mut stream: TcpStream,
    proxy: SocketAddr,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<TcpStream, RouteFailure> {
    let io_failure = |source| RouteFailure {
        addr: proxy,
        error: TransportError::Connect {
            target: proxy.to_string(),
            source,
        },
    };
    let reply_failure = |error| RouteFailure {
        addr: proxy,
        error,
    };

    stream
        .set_read_timeout(Some(timeout))
        .map_err(io_failure)?;
    let request = format!(
        "CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\nProxy-Connection: Keep-Alive\r\n\r\n",
        host = host,
        port = port
    );
    stream.write_all(request.as_bytes()).map_err(io_failure)?;
    stream.flush().map_err(io_failure)?;

    let head = read_reply_head(&mut stream).map_err(io_failure)?;
    let status_line = head.lines().next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    let code = parts.next().and_then(|c| c.parse::<u16>().ok());

    match code {
        Some(code) if version.starts_with("HTTP/1.") && (200..300).contains(&code) => {
            debug!("proxy {} opened tunnel: {}", proxy, status_line);
            stream.set_read_timeout(None).map_err(io_failure)?;
            Ok(stream)
        }
        Some(_) if version.starts_with("HTTP/1.") => {
            Err(reply_failure(TransportError::ProxyRejected {
                proxy: proxy.to_string(),
                status: status_line.to_owned(),
            }))
        }
        _ => Err(reply_failure(TransportError::MalformedProxyReply {
            proxy: proxy.to_string(),
        })),
    }
}

/// Read up to the blank line ending the reply head, one byte at a time so nothing
/// behind it is consumed.
fn read_reply_head(stream: &mut TcpStream) -> io::Result<String> {
    let mut head = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_PROXY_REPLY {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "proxy reply head too large",
            ));
        }
        match stream.read(&mut byte)? {
            0 => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "proxy closed connection during handshake",
                ))
            }
            _ => head.push(byte[0]),
        }
    }
    Ok(String::from_utf8_lossy(&head).into_owned())
}
