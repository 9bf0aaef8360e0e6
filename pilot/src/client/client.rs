use pilot_lib::network::message::{Request, Response};
use pilot_lib::network::protocol::{receive_message, send_message};
use pilot_lib::network::socket::{get_client_stream, GenericStream};
use pilot_lib::{Error, Settings};
use serde::Serialize;

use crate::internal_prelude::*;

/// The connection to the daemon.
///
/// Every command is a simple ping-pong: send a [Request], receive a single [Response].
pub struct Client {
    pub settings: Settings,
    pub stream: GenericStream,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("settings", &self.settings)
            .field("stream", &"GenericStream<not_debuggable>")
            .finish()
    }
}

impl Client {
    /// Connect to the daemon.
    pub async fn new(settings: Settings) -> Result<Self> {
        let stream = get_client_stream(&settings.shared)
            .await
            .context("Failed to initialize stream.")?;

        Ok(Client { settings, stream })
    }

    /// Convenience wrapper around [`send_message`] to directly send [`Request`]s.
    pub async fn send_request<T>(&mut self, message: T) -> Result<(), Error>
    where
        T: Into<Request>,
        T: Serialize + std::fmt::Debug,
    {
        send_message::<_, Request>(message, &mut self.stream).await
    }

    /// Convenience wrapper that wraps `receive_message` for [`Response`]s
    pub async fn receive_response(&mut self) -> Result<Response, Error> {
        receive_message::<Response>(&mut self.stream).await
    }

    /// Send a request and wait for the daemon's answer.
    pub async fn request<T>(&mut self, message: T) -> Result<Response>
    where
        T: Into<Request>,
        T: Serialize + std::fmt::Debug,
    {
        trace!("Sending request {message:?}");
        self.send_request(message).await?;
        let response = self.receive_response().await?;
        trace!("Received response {response:?}");

        Ok(response)
    }
}
