//! The selective proxy.
//!
//! Browsers are pointed at this local proxy. It only understands `CONNECT` requests and decides
//! per connection, whether the destination is connected directly or through the secondary
//! tunnel proxy. The route table is read for every new connection, so updates apply right away.
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;

use pilot_lib::route::{Route, TunnelEndpoint};
use pilot_lib::RouteTable;
use tokio::io::{copy_bidirectional, AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::daemon::context::{read_routes, SharedRoutes};
use crate::internal_prelude::*;

/// Request and response heads larger than this are refused.
const MAX_HEAD_SIZE: usize = 8 * 1024;

const ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";
const BAD_REQUEST: &[u8] = b"HTTP/1.1 400 Bad Request\r\n\r\n";
const NOT_ALLOWED: &[u8] = b"HTTP/1.1 405 Method Not Allowed\r\nAllow: CONNECT\r\n\r\n";
const BAD_GATEWAY: &[u8] = b"HTTP/1.1 502 Bad Gateway\r\n\r\n";

/// A proxy that's been started by this daemon.
pub struct RunningProxy {
    pub address: SocketAddr,
    handle: JoinHandle<()>,
}

impl RunningProxy {
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Start listening on `listen`.
///
/// Returns `None`, if the address is already in use. In that case another instance is
/// assumed to serve the proxy.
pub async fn start(
    listen: &str,
    routes: SharedRoutes,
    connect_timeout: Duration,
) -> Result<Option<RunningProxy>> {
    let listener = match TcpListener::bind(listen).await {
        Ok(listener) => listener,
        Err(error) if error.kind() == ErrorKind::AddrInUse => {
            info!("Proxy address {listen} is already in use. Assuming another proxy serves it.");
            return Ok(None);
        }
        Err(error) => {
            return Err(error).wrap_err_with(|| format!("Failed to bind proxy to {listen}"));
        }
    };
    let address = listener
        .local_addr()
        .wrap_err("Failed to read the proxy's address")?;
    info!("Proxy listening on {address}");

    let handle = tokio::spawn(accept_connections(listener, routes, connect_timeout));

    Ok(Some(RunningProxy { address, handle }))
}

async fn accept_connections(
    listener: TcpListener,
    routes: SharedRoutes,
    connect_timeout: Duration,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(error) => {
                warn!("Failed to accept proxy connection: {error}");
                continue;
            }
        };

        let routes = read_routes(&routes);
        tokio::spawn(async move {
            if let Err(error) = handle_connection(stream, &routes, connect_timeout).await {
                debug!("Proxy connection from {peer} failed: {error:#}");
            }
        });
    }
}

/// Why a direct connection couldn't be established.
#[derive(Debug)]
enum DirectError {
    /// The destination's name couldn't be resolved.
    Resolve(String),
    Connect(String),
}

async fn handle_connection(
    mut client: TcpStream,
    routes: &RouteTable,
    connect_timeout: Duration,
) -> Result<()> {
    let (head, leftover) = timeout(connect_timeout, read_head(&mut client))
        .await
        .map_err(|_| eyre!("Client didn't send a complete request in time"))??;
    let Some((method, target)) = parse_request_line(&head) else {
        client.write_all(BAD_REQUEST).await?;
        bail!("Malformed request line");
    };
    if !method.eq_ignore_ascii_case("CONNECT") {
        client.write_all(NOT_ALLOWED).await?;
        bail!("Refused {method} request for {target}");
    }
    let Some((host, port)) = split_target(target) else {
        client.write_all(BAD_REQUEST).await?;
        bail!("Invalid CONNECT target {target}");
    };

    let connected = match routes.route(host) {
        Route::Tunnel(endpoint) => {
            debug!("Tunneling {host}:{port} through {}", endpoint.address());
            connect_tunnel(&endpoint, host, port, connect_timeout).await
        }
        Route::Direct => match connect_direct(host, port, connect_timeout).await {
            Ok(upstream) => Ok((upstream, Vec::new())),
            Err(DirectError::Resolve(message)) => match routes.fallback() {
                Some(Route::Tunnel(endpoint)) => {
                    info!("Couldn't resolve {host} ({message}). Falling back to the tunnel.");
                    connect_tunnel(&endpoint, host, port, connect_timeout).await
                }
                _ => Err(eyre!("Failed to resolve {host}: {message}")),
            },
            Err(DirectError::Connect(message)) => {
                Err(eyre!("Failed to connect to {host}:{port}: {message}"))
            }
        },
    };

    let (mut upstream, from_upstream) = match connected {
        Ok(connected) => connected,
        Err(error) => {
            client.write_all(BAD_GATEWAY).await?;
            return Err(error);
        }
    };

    client.write_all(ESTABLISHED).await?;
    if !from_upstream.is_empty() {
        client.write_all(&from_upstream).await?;
    }
    if !leftover.is_empty() {
        upstream.write_all(&leftover).await?;
    }

    // Dropping both streams tears down both sides.
    copy_bidirectional(&mut client, &mut upstream)
        .await
        .wrap_err_with(|| format!("Connection to {host}:{port} broke"))?;

    Ok(())
}

async fn connect_direct(host: &str, port: u16, limit: Duration) -> Result<TcpStream, DirectError> {
    let addresses: Vec<SocketAddr> = match timeout(limit, lookup_host((host, port))).await {
        Ok(Ok(addresses)) => addresses.collect(),
        Ok(Err(error)) => return Err(DirectError::Resolve(error.to_string())),
        Err(_) => return Err(DirectError::Resolve("lookup timed out".into())),
    };
    if addresses.is_empty() {
        return Err(DirectError::Resolve("no addresses".into()));
    }

    match timeout(limit, TcpStream::connect(addresses.as_slice())).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(error)) => Err(DirectError::Connect(error.to_string())),
        Err(_) => Err(DirectError::Connect("connect timed out".into())),
    }
}

/// Open a tunnel to `host:port` through the secondary proxy.
///
/// Nothing is forwarded before the tunnel confirmed the connection with a 2xx status.
/// Returns the stream and any bytes the tunnel already sent after its response head.
async fn connect_tunnel(
    endpoint: &TunnelEndpoint,
    host: &str,
    port: u16,
    limit: Duration,
) -> Result<(TcpStream, Vec<u8>)> {
    let address = endpoint.address();
    let mut stream = timeout(limit, TcpStream::connect(&address))
        .await
        .map_err(|_| eyre!("Connecting to tunnel {address} timed out"))?
        .wrap_err_with(|| format!("Failed to connect to tunnel {address}"))?;

    let request = format!("CONNECT {host}:{port} HTTP/1.1\r\nHost: {host}:{port}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let (head, leftover) = timeout(limit, read_head(&mut stream))
        .await
        .map_err(|_| eyre!("Tunnel {address} didn't answer in time"))??;
    let status = parse_status(&head)
        .ok_or_else(|| eyre!("Tunnel {address} sent an invalid response"))?;
    if !(200..300).contains(&status) {
        bail!("Tunnel {address} refused {host}:{port} with status {status}");
    }

    Ok((stream, leftover))
}

/// Read an HTTP head up to and including the empty line.
/// Returns the head and all bytes that have been read past it.
pub(crate) async fn read_head<S>(stream: &mut S) -> Result<(String, Vec<u8>)>
where
    S: AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = [0; 1024];
    loop {
        if let Some(end) = find_head_end(&buffer) {
            let rest = buffer.split_off(end);
            let head = String::from_utf8(buffer).wrap_err("Request head isn't valid utf8")?;
            return Ok((head, rest));
        }
        if buffer.len() > MAX_HEAD_SIZE {
            bail!("Head exceeds {MAX_HEAD_SIZE} bytes");
        }

        let read = stream.read(&mut chunk).await?;
        if read == 0 {
            bail!("Connection closed before the head was complete");
        }
        buffer.extend_from_slice(&chunk[..read]);
    }
}

fn find_head_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|window| window == b"\r\n\r\n")
        .map(|position| position + 4)
}

fn parse_request_line(head: &str) -> Option<(&str, &str)> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let target = parts.next()?;
    Some((method, target))
}

/// Split `host:port`. IPv6 literals are given in brackets.
fn split_target(target: &str) -> Option<(&str, u16)> {
    let (host, port) = target.rsplit_once(':')?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return None;
    }
    Some((host, port.parse().ok()?))
}

fn parse_status(head: &str) -> Option<u16> {
    head.lines().next()?.split_whitespace().nth(1)?.parse().ok()
}
