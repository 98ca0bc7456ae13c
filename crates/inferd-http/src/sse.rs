//! Server-sent-event framing for streaming completions.
//!
//! Frames follow the OpenAI wire format: `data: <json>\n\n` per chunk,
//! terminated by `data: [DONE]\n\n`.

use axum::body::Body;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::Value;

#[must_use]
pub fn data_frame(value: &Value) -> String {
    format!("data: {value}\n\n")
}

#[must_use]
pub fn done_frame() -> String {
    "data: [DONE]\n\n".to_string()
}

/// Build a chunked `text/event-stream` response from pre-rendered frames.
pub fn sse_response(frames: Vec<String>) -> Response {
    let stream = futures_util::stream::iter(
        frames
            .into_iter()
            .map(Ok::<_, std::convert::Infallible>),
    );
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_are_newline_delimited() {
        let frame = data_frame(&serde_json::json!({"a": 1}));
        assert!(frame.starts_with("data: {"));
        assert!(frame.ends_with("\n\n"));
        assert_eq!(done_frame(), "data: [DONE]\n\n");
    }

    #[test]
    fn response_carries_event_stream_headers() {
        let response = sse_response(vec![done_frame()]);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/event-stream"
        );
    }
}
