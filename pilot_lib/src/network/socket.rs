//! Low-level socket handling of the administrative surface.
//!
//! The daemon either listens on a unix socket or, if configured or on platforms without unix
//! sockets, on a local TCP port. Both are hidden behind the [Listener] and [Stream] traits.
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::error::Error;
use crate::internal_prelude::*;
use crate::settings::Shared;

/// A new trait, which can be used to represent Unix- and TcpStreams. \
/// This is necessary to write generic functions where both types can be used.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}
impl Stream for TcpStream {}

/// Convenience type, so we don't have type write `Box<dyn Stream>` all the time.
pub type GenericStream = Box<dyn Stream>;

/// A new trait, which can be used to represent Unix- and TcpListeners. \
/// This is necessary to write generic functions where both types can be used.
#[async_trait]
pub trait Listener: Sync + Send {
    async fn accept<'a>(&'a self) -> Result<GenericStream, Error>;
}

/// Convenience type, so we don't have type write `Box<dyn Listener>` all the time.
pub type GenericListener = Box<dyn Listener>;

#[async_trait]
impl Listener for TcpListener {
    async fn accept<'a>(&'a self) -> Result<GenericStream, Error> {
        let (stream, _) = self
            .accept()
            .await
            .map_err(|err| Error::IoError("accepting new tcp connection.".to_string(), err))?;
        Ok(Box::new(stream))
    }
}

#[cfg(unix)]
mod unix {
    use async_trait::async_trait;
    use tokio::net::{UnixListener, UnixStream};

    use super::{GenericStream, Listener, Stream};
    use crate::error::Error;

    impl Stream for UnixStream {}

    #[async_trait]
    impl Listener for UnixListener {
        async fn accept<'a>(&'a self) -> Result<GenericStream, Error> {
            let (stream, _) = self.accept().await.map_err(|err| {
                Error::IoError("accepting new unix connection.".to_string(), err)
            })?;
            Ok(Box::new(stream))
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn uses_unix_socket(shared: &Shared) -> bool {
    shared.use_unix_socket
}

#[cfg(target_os = "windows")]
fn uses_unix_socket(_shared: &Shared) -> bool {
    false
}

/// Get a new stream for the client.
pub async fn get_client_stream(shared: &Shared) -> Result<GenericStream, Error> {
    #[cfg(unix)]
    {
        if uses_unix_socket(shared) {
            let path = shared.unix_socket_path();
            let stream = tokio::net::UnixStream::connect(&path).await.map_err(|err| {
                Error::IoPathError(path, "connecting to daemon. Did you start it?", err)
            })?;

            return Ok(Box::new(stream));
        }
    }

    let address = format!("{}:{}", shared.host, shared.port);
    let stream = TcpStream::connect(&address).await.map_err(|_| {
        Error::Connection(format!(
            "Failed to connect to the daemon on {address}. Did you start it?"
        ))
    })?;

    Ok(Box::new(stream))
}

/// Get a new listener for the daemon.
///
/// If a unix socket already exists, we check whether another daemon is listening on it.
/// If nobody answers, the socket is a leftover of a crashed daemon and gets removed.
pub async fn get_listener(shared: &Shared) -> Result<GenericListener, Error> {
    #[cfg(unix)]
    {
        if uses_unix_socket(shared) {
            let socket_path = shared.unix_socket_path();
            info!("Using unix socket at: {socket_path:?}");

            if socket_path.exists() {
                if tokio::net::UnixStream::connect(&socket_path).await.is_ok() {
                    return Err(Error::UnixSocketExists);
                }
                std::fs::remove_file(&socket_path).map_err(|err| {
                    Error::IoPathError(socket_path.clone(), "removing stale socket", err)
                })?;
            }

            let listener = tokio::net::UnixListener::bind(&socket_path).map_err(|err| {
                Error::IoPathError(socket_path, "creating unix socket", err)
            })?;
            return Ok(Box::new(listener));
        }
    }

    let address = format!("{}:{}", shared.host, shared.port);
    info!("Binding to address: {address}");
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|err| Error::IoError(format!("binding tcp listener to {address}"), err))?;

    Ok(Box::new(listener))
}

/// Remove the daemon's unix socket, if there is one.
pub fn socket_cleanup(shared: &Shared) -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        if uses_unix_socket(shared) {
            let socket_path = shared.unix_socket_path();
            if socket_path.exists() {
                std::fs::remove_file(&socket_path)?;
            }
        }
    }

    #[cfg(not(unix))]
    let _ = shared;

    Ok(())
}
