use pilot_lib::network::message::create_failure_response;
use pilot_lib::network::protocol::{receive_request, send_response};
use pilot_lib::network::socket::{GenericListener, GenericStream};
use pilot_lib::Error;

use super::message_handler::handle_request;
use crate::daemon::context::Context;
use crate::internal_prelude::*;

/// Listen for new connections on the socket.
/// On a new connection, the connected stream will be handled in a separate tokio task.
/// See [handle_incoming] for the actual connection handler function.
pub async fn accept_incoming(listener: GenericListener, ctx: Context) -> Result<()> {
    loop {
        let stream = match listener.accept().await {
            Ok(stream) => stream,
            Err(err) => {
                warn!("Failed connecting to client: {err:?}");
                continue;
            }
        };

        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(error) = handle_incoming(stream, ctx).await {
                debug!("Client connection failed: {error:?}");
            }
        });
    }
}

/// Handle a new connection from a client.
///
/// The client sends a request, the daemon answers with a single response.
/// This repeats until the client goes away.
async fn handle_incoming(mut stream: GenericStream, ctx: Context) -> Result<()> {
    loop {
        let request = match receive_request(&mut stream).await {
            Ok(request) => request,
            Err(Error::EmptyPayload) => {
                debug!("Client went away");
                return Ok(());
            }
            // Respond with the error to the client and return early.
            Err(Error::MessageDeserialization(err)) => {
                let response =
                    create_failure_response(format!("Failed to deserialize message: {err}"));
                send_response(response, &mut stream).await?;
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        debug!("Received request: {request:?}");
        handle_request(&mut stream, request, &ctx).await?;
    }
}
