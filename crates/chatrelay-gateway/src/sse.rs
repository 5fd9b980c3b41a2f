use std::convert::Infallible;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

/// Frame one fragment as an SSE `data:` event. Each line of the fragment gets
/// its own `data:` field so clients rejoin them with `\n`. `\r\n`, `\r` and
/// `\n` all end a line.
pub fn data_event(fragment: &str) -> Bytes {
    let fragment = normalize_line_breaks(fragment.to_string());
    let mut event = String::with_capacity(fragment.len() + 8);
    for line in fragment.split('\n') {
        event.push_str("data: ");
        event.push_str(line);
        event.push('\n');
    }
    event.push('\n');
    Bytes::from(event)
}

/// Rewrite `\r\n` and bare `\r` as `\n`, the text an SSE client reassembles.
pub fn normalize_line_breaks(fragment: String) -> String {
    if !fragment.contains('\r') {
        return fragment;
    }
    fragment.replace("\r\n", "\n").replace('\r', "\n")
}

/// Terminal event sent after the last fragment.
pub fn done_event() -> Bytes {
    Bytes::from_static(b"event: done\ndata: \n\n")
}

pub fn sse_response<S, E>(stream: S) -> Response
where
    S: futures::Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(stream)).into_response()
}

/// An SSE body that is complete before it starts.
pub fn single_event_response(bytes: Bytes) -> Response {
    sse_response(futures::stream::once(async move { Ok::<_, Infallible>(bytes) }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_line_fragment() {
        assert_eq!(data_event("Hello"), Bytes::from("data: Hello\n\n"));
    }

    #[test]
    fn multi_line_fragment_uses_one_field_per_line() {
        assert_eq!(data_event("a\nb"), Bytes::from("data: a\ndata: b\n\n"));
        assert_eq!(data_event("\n\n"), Bytes::from("data: \ndata: \ndata: \n\n"));
    }

    #[test]
    fn carriage_returns_end_lines() {
        assert_eq!(data_event("a\rb"), Bytes::from("data: a\ndata: b\n\n"));
        assert_eq!(data_event("a\r\nb"), Bytes::from("data: a\ndata: b\n\n"));
        assert_eq!(normalize_line_breaks("x\r\ry\r\n".to_string()), "x\n\ny\n");
    }

    #[test]
    fn done_event_is_named() {
        assert!(done_event().starts_with(b"event: done\n"));
    }

    #[tokio::test]
    async fn response_carries_event_stream_headers() {
        let response = single_event_response(done_event());
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
    }
}
