// SSE event builders for generateContentStream

use serde::Serialize;
use warp::sse::Event;

use crate::models::{FinishReason, GenerateContentResponse, StreamError};

/// Build a `data: <json>` event
///
/// `json_data` writes `data:<json>` with no space, which line readers
/// matching on `data: ` skip.
fn data_event<T: Serialize>(payload: &T) -> Result<Event, serde_json::Error> {
    let json = serde_json::to_string(payload)?;
    Ok(Event::default().data(format!(" {}", json)))
}

/// Create a chunk event carrying one piece of generated text
pub fn create_chunk_event(text: &str) -> Result<Event, serde_json::Error> {
    data_event(&GenerateContentResponse::single(text, None))
}

/// Create the final event of a successful stream: empty text, finishReason STOP
pub fn create_stop_event() -> Result<Event, serde_json::Error> {
    data_event(&GenerateContentResponse::single("", Some(FinishReason::Stop)))
}

/// Create the terminal error event of a failed stream
pub fn create_error_event(message: impl Into<String>) -> Result<Event, serde_json::Error> {
    data_event(&StreamError {
        error: message.into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn payload(event: Event) -> Value {
        let encoded = event.to_string();
        let data = encoded
            .lines()
            .find_map(|line| line.strip_prefix("data: "))
            .expect("event has a data line");
        serde_json::from_str(data).unwrap()
    }

    #[test]
    fn test_create_chunk_event() {
        let json = payload(create_chunk_event("Привіт").unwrap());

        let candidate = &json["candidates"][0];
        assert_eq!(candidate["content"]["role"], "model");
        assert_eq!(candidate["content"]["parts"][0]["text"], "Привіт");
        assert!(candidate["finishReason"].is_null());
        assert_eq!(candidate["index"], 0);
        assert!(json.get("usageMetadata").is_none());
    }

    #[test]
    fn test_create_stop_event() {
        let json = payload(create_stop_event().unwrap());

        let candidate = &json["candidates"][0];
        assert_eq!(candidate["content"]["parts"][0]["text"], "");
        assert_eq!(candidate["finishReason"], "STOP");
    }

    #[test]
    fn test_create_error_event() {
        let json = payload(create_error_event("backend crashed").unwrap());
        assert_eq!(json, serde_json::json!({"error": "backend crashed"}));
    }

    #[test]
    fn test_events_are_single_spaced_data_lines() {
        let events = [
            create_chunk_event("Привіт").unwrap(),
            create_chunk_event("two\nlines").unwrap(),
            create_stop_event().unwrap(),
            create_error_event("boom").unwrap(),
        ];

        for event in events {
            let encoded = event.to_string();
            let lines: Vec<&str> = encoded.lines().filter(|l| !l.is_empty()).collect();
            assert_eq!(lines.len(), 1, "unexpected framing: {:?}", encoded);
            assert!(lines[0].starts_with("data: {"), "unexpected framing: {:?}", encoded);
            assert!(encoded.ends_with("\n\n"));
        }
    }

    #[test]
    fn test_chunk_whitespace_is_preserved() {
        let json = payload(create_chunk_event(" line\n").unwrap());
        assert_eq!(json["candidates"][0]["content"]["parts"][0]["text"], " line\n");
    }
}
