use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use ciborium::{from_reader, into_writer};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

// Reexport all stream/socket related stuff for convenience purposes
pub use super::socket::*;
use crate::{
    error::Error,
    internal_prelude::*,
    network::message::{Request, Response},
};

// We choose a packet size of 1280 to be on the safe site regarding IPv6 MTU.
pub const PACKET_SIZE: usize = 1280;

/// The biggest payload we're willing to allocate for.
/// Task snapshots with lots of logs can get big, but never this big.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Convenience wrapper around `send_message` to directly send [`Request`]s.
pub async fn send_request<T>(message: T, stream: &mut GenericStream) -> Result<(), Error>
where
    T: Into<Request>,
    T: Serialize + std::fmt::Debug,
{
    send_message::<_, Request>(message, stream).await
}

/// Convenience wrapper around `send_message` to directly send [`Response`]s.
pub async fn send_response<T>(message: T, stream: &mut GenericStream) -> Result<(), Error>
where
    T: Into<Response>,
    T: Serialize + std::fmt::Debug,
{
    send_message::<_, Response>(message, stream).await
}

/// Convenience wrapper around send_bytes.
/// Serialize a message and feed the bytes into send_bytes.
///
/// If there's no inner variant, you might need to annotate the type:
/// `send_message::<_, Request>(Request::List, &mut stream)`
pub async fn send_message<O, T>(message: O, stream: &mut GenericStream) -> Result<(), Error>
where
    O: Into<T>,
    T: Serialize + std::fmt::Debug,
{
    let message: T = message.into();
    debug!("Sending message: {message:?}");
    // Prepare the message for transfer and determine its byte size.
    let mut payload = Vec::new();
    into_writer(&message, &mut payload)
        .map_err(|err| Error::MessageSerialization(err.to_string()))?;

    send_bytes(&payload, stream).await
}

/// Send a Vec of bytes.
/// This is part of the basic protocol beneath all communication. \
///
/// 1. Sends a u64 as 8 bytes in BigEndian mode, which tells the receiver the length of the payload.
/// 2. Send the payload in chunks of [PACKET_SIZE] bytes.
pub async fn send_bytes(payload: &[u8], stream: &mut GenericStream) -> Result<(), Error> {
    let message_size = payload.len() as u64;

    // Send the size header first, the payload follows right after.
    let mut header = Vec::new();
    WriteBytesExt::write_u64::<BigEndian>(&mut header, message_size)?;

    stream
        .write_all(&header)
        .await
        .map_err(|err| Error::IoError("sending request size header".to_string(), err))?;

    // Split the payload into chunks that fit into a single packet.
    // Some carriers (e.g. Wireguard) have an MTU that's a bit smaller than the usual 1.5KByte.
    for chunk in payload.chunks(PACKET_SIZE) {
        stream
            .write_all(chunk)
            .await
            .map_err(|err| Error::IoError("sending payload chunk".to_string(), err))?;
    }

    stream.flush().await?;

    Ok(())
}

/// Receive a byte stream. \
/// This is part of the basic protocol beneath all communication. \
///
/// 1. Read the u64 header in BigEndian mode, which specifies the length of the payload.
/// 2. Receive chunks of [PACKET_SIZE] bytes until we finished all expected bytes.
pub async fn receive_bytes(stream: &mut GenericStream) -> Result<Vec<u8>, Error> {
    // Receive the header with the overall message size.
    let mut header = vec![0; 8];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|err| Error::IoError("reading request size header".to_string(), err))?;
    let mut header = Cursor::new(header);
    let message_size = ReadBytesExt::read_u64::<BigEndian>(&mut header)? as usize;

    if message_size > MAX_PAYLOAD_SIZE {
        return Err(Error::MessageTooBig(message_size, MAX_PAYLOAD_SIZE));
    }

    // Buffer for the whole payload.
    let mut payload_bytes = Vec::with_capacity(message_size);

    // Receive chunks until we reached the expected message size.
    while payload_bytes.len() < message_size {
        let remaining_bytes = message_size - payload_bytes.len();
        // Never read past the current message, the next one might already be queued.
        let mut chunk_buffer: Vec<u8> = vec![0; remaining_bytes.min(PACKET_SIZE)];

        // Read data and get the amount of received bytes.
        let received_bytes = stream
            .read(&mut chunk_buffer)
            .await
            .map_err(|err| Error::IoError("reading next chunk".to_string(), err))?;

        if received_bytes == 0 {
            return Err(Error::Connection(
                "Connection went away while receiving payload.".into(),
            ));
        }

        // Only the part of the buffer that has been filled during this iteration is payload.
        payload_bytes.extend_from_slice(&chunk_buffer[0..received_bytes]);
    }

    Ok(payload_bytes)
}

/// Convenience wrapper that wraps `receive_message` for [`Request`]s
pub async fn receive_request(stream: &mut GenericStream) -> Result<Request, Error> {
    receive_message::<Request>(stream).await
}

/// Convenience wrapper that wraps `receive_message` for [`Response`]s
pub async fn receive_response(stream: &mut GenericStream) -> Result<Response, Error> {
    receive_message::<Response>(stream).await
}

/// Receive a payload and deserialize it into the requested message type.
pub async fn receive_message<T: DeserializeOwned + std::fmt::Debug>(
    stream: &mut GenericStream,
) -> Result<T, Error> {
    let payload_bytes = receive_bytes(stream).await?;
    if payload_bytes.is_empty() {
        return Err(Error::EmptyPayload);
    }

    let message: T = from_reader(payload_bytes.as_slice()).map_err(|err| {
        // Check whether the payload is valid cbor at all.
        // That way we know whether it was corrupted or just sent by a different version.
        if let Ok(value) = from_reader::<ciborium::Value, _>(payload_bytes.as_slice()) {
            Error::UnexpectedPayload(value)
        } else {
            Error::MessageDeserialization(err.to_string())
        }
    })?;
    debug!("Received message: {message:?}");

    Ok(message)
}
