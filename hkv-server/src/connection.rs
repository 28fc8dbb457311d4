//! # Connection loop
//!
//! Drives a single accepted TCP connection: read bytes, feed the incremental
//! decoder, dispatch each completed top-level frame, write the reply back.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use hkv_common::resp::{encode_to_vec, Decoder, Frame, Reply};
use hkv_common::CommandError;

use crate::dispatch::Dispatcher;

/// Handles one accepted connection until the peer closes it or an I/O error
/// occurs. A decode error never closes the connection: the buffer and
/// decoder are reset and the loop keeps reading.
#[instrument(skip(stream, dispatcher), fields(peer = %peer_addr))]
pub async fn handle_connection(
    mut stream: TcpStream,
    dispatcher: Arc<Dispatcher>,
    peer_addr: std::net::SocketAddr,
) -> std::io::Result<()> {
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut decoder = Decoder::new();

    loop {
        buffer.clear();
        let read = stream.read_buf(&mut buffer).await?;
        if read == 0 {
            break;
        }

        let frames = match decoder.decode(&buffer) {
            Ok(frames) => frames,
            Err((completed, err)) => {
                // No reply is sent for the undecodable prefix itself, but any
                // frames that completed earlier in this same read are valid
                // pipelined commands and still get dispatched and replied to.
                debug!(%err, "decode error, resetting connection buffer");
                decoder.reset();
                completed
            }
        };

        for frame in frames {
            let reply = reply_for_frame(&dispatcher, frame);
            let bytes = encode_to_vec(&reply);
            stream.write_all(&bytes).await?;
        }
    }

    Ok(())
}

fn reply_for_frame(dispatcher: &Dispatcher, frame: Frame) -> Reply {
    match frame.into_bulk_array() {
        Some(args) => dispatcher.execute(args),
        None => Reply::Error(
            CommandError::SyntaxError("expected an array of bulk strings".to_string()).to_string(),
        ),
    }
}
