//! Per-connection request loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{AnyDelimiterCodec, AnyDelimiterCodecError, Framed};
use tokio_util::sync::CancellationToken;

use super::protocol::{PROTOCOL_ERROR, Reply, parse_request};
use super::service::TokenService;
use crate::error::EndpointError;

/// Connections that send nothing for this long are closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(3);

/// Longest accepted request line, in bytes.
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

type Lines = Framed<TcpStream, AnyDelimiterCodec>;

/// Newline framing over raw bytes, so a line that is not UTF-8 is answered
/// as a protocol error instead of ending the stream.
fn line_codec() -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), MAX_LINE_LENGTH)
}

async fn send(lines: &mut Lines, reply: &Reply) -> bool {
    match lines.send(reply.to_line()).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to write reply");
            false
        }
    }
}

/// Serve one client until it disconnects, idles out or the endpoint stops.
///
/// Requests on a connection are handled one at a time, in order.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: Arc<TokenService>,
    shutdown: CancellationToken,
    fatal: CancellationToken,
) {
    let mut lines = Framed::new(stream, line_codec());
    tracing::debug!(peer = %peer, "Token endpoint connection opened");

    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = tokio::time::timeout(IDLE_TIMEOUT, lines.next()) => next,
        };

        let line = match next {
            Ok(Some(Ok(line))) => line,
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(peer = %peer, "Connection closed due to idle timeout");
                break;
            }
            Ok(Some(Err(AnyDelimiterCodecError::MaxChunkLengthExceeded))) => {
                tracing::warn!(peer = %peer, "Request line too long, closing connection");
                send(&mut lines, &Reply::error("Message too long")).await;
                break;
            }
            Ok(Some(Err(AnyDelimiterCodecError::Io(e)))) => {
                tracing::debug!(peer = %peer, error = %e, "Connection read failed");
                break;
            }
        };

        let parsed = match std::str::from_utf8(&line) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => parse_request(text.trim()),
            Err(_) => Err(EndpointError::Protocol(PROTOCOL_ERROR.to_string())),
        };

        let result = match parsed {
            Ok(request) => {
                let action = request.action();
                tracing::debug!(peer = %peer, action, "Handling request");
                service.handle(request).await
            }
            Err(e) => Err(e),
        };

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if e.is_fatal() => {
                tracing::error!(peer = %peer, error = %e, "Fatal error in token endpoint");
                fatal.cancel();
                send(&mut lines, &Reply::error("Internal error")).await;
                break;
            }
            Err(e) => {
                tracing::warn!(peer = %peer, error = %e, "Request failed");
                Reply::error(e.to_string())
            }
        };

        if !send(&mut lines, &reply).await {
            break;
        }
    }

    tracing::debug!(peer = %peer, "Token endpoint connection closed");
}
