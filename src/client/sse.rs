//! Server-Sent Events (SSE) parser for generateContentStream responses

use bytes::Bytes;
use futures::stream::Stream;
use futures::StreamExt;
use std::pin::Pin;

use crate::models::{GenerateContentResponse, StreamError};

use super::ClientError;

/// Parsed events of one stream
pub type ResponseStream =
    Pin<Box<dyn Stream<Item = Result<GenerateContentResponse, ClientError>> + Send>>;

/// Parse a stream of bytes as gateway SSE events
///
/// Lines are split on `\n` before UTF-8 decoding, so multi-byte characters
/// cut across network chunks survive. `data:` is accepted with or without a
/// following space. An `{"error": ...}` payload becomes an `Err` item.
pub fn parse_sse_stream(
    byte_stream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
) -> ResponseStream {
    // Bytes of the current, incomplete line
    let mut buffer: Vec<u8> = Vec::new();

    let event_stream = byte_stream.flat_map(move |chunk_result| {
        let chunk = match chunk_result {
            Ok(bytes) => bytes,
            Err(e) => {
                return futures::stream::iter(vec![Err(ClientError::Stream(e.to_string()))]);
            }
        };

        buffer.extend_from_slice(&chunk);

        let mut events = Vec::new();
        while let Some(newline_pos) = buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buffer.drain(..=newline_pos).collect();
            let line = match std::str::from_utf8(&line) {
                Ok(line) => line.trim(),
                Err(e) => {
                    events.push(Err(ClientError::Stream(format!(
                        "Invalid UTF-8 in stream: {}",
                        e
                    ))));
                    continue;
                }
            };

            if let Some(data) = line.strip_prefix("data:") {
                events.push(parse_event(data.trim_start()));
            }
            // Ignore comments, keep-alives and other fields
        }

        futures::stream::iter(events)
    });

    Box::pin(event_stream)
}

fn parse_event(data: &str) -> Result<GenerateContentResponse, ClientError> {
    let value: serde_json::Value = serde_json::from_str(data).map_err(|e| {
        ClientError::Serialization(format!("Failed to parse SSE data: {}. Data: {}", e, data))
    })?;

    if value.get("error").is_some() {
        let message = serde_json::from_value::<StreamError>(value.clone())
            .map(|event| event.error)
            .unwrap_or_else(|_| value["error"].to_string());
        return Err(ClientError::Stream(message));
    }

    serde_json::from_value(value)
        .map_err(|e| ClientError::Serialization(format!("Unexpected stream event: {}", e)))
}
