use bytes::Bytes;
use futures::stream::BoxStream;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

use super::ProviderRequest;
use crate::error::{AppError, Result};

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Tags every outbound request. Derived from the wall clock in
/// milliseconds and forced strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

#[derive(Debug, Default)]
pub struct RequestIds {
    last: AtomicU64,
}

impl RequestIds {
    pub fn next(&self) -> RequestId {
        let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let candidate = now.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, candidate, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return RequestId(candidate),
                Err(actual) => prev = actual,
            }
        }
    }
}

/// One push event on the `stream-response` channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamResponse {
    pub request_id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(default)]
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamResponse {
    pub fn chunk(request_id: RequestId, chunk: String) -> Self {
        Self {
            request_id,
            chunk: Some(chunk),
            done: false,
            error: None,
        }
    }

    pub fn done(request_id: RequestId) -> Self {
        Self {
            request_id,
            chunk: None,
            done: true,
            error: None,
        }
    }

    pub fn error(request_id: RequestId, error: String) -> Self {
        Self {
            request_id,
            chunk: None,
            done: false,
            error: Some(error),
        }
    }
}

/// Re-assembles network reads into complete lines. Bytes after the last
/// newline are held back until more data (or the end of the body) arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(bytes);
        let last_newline = self.pending.iter().rposition(|&b| b == b'\n')?;
        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);
        Some(String::from_utf8_lossy(&complete).into_owned())
    }

    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest).into_owned();
        (!text.trim().is_empty()).then_some(text)
    }
}

/// Outbound HTTP seam for chat requests.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(&self, request: &ProviderRequest) -> Result<ByteStream>;

    async fn send(&self, request: &ProviderRequest) -> Result<serde_json::Value>;
}

pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn post(&self, request: &ProviderRequest) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.json(&request.body).send().await.map_err(|e| {
            AppError::Network(format!(
                "{} request failed: {}",
                request.provider.display_name(),
                e
            ))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Provider {
                provider: request.provider.display_name(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait::async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(&self, request: &ProviderRequest) -> Result<ByteStream> {
        let response = self.post(request).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| AppError::Network(format!("Stream error: {}", e))))
            .boxed())
    }

    async fn send(&self, request: &ProviderRequest) -> Result<serde_json::Value> {
        let response = self.post(request).await?;
        response.json().await.map_err(|e| {
            AppError::Parse(format!(
                "Failed to parse {} response: {}",
                request.provider.display_name(),
                e
            ))
        })
    }
}

/// Drains `stream` into `on_event` as line-aligned chunks, then a final
/// `done` (or a single `error`). Returns early without further events once
/// `cancel` fires.
pub async fn pump<F>(
    request_id: RequestId,
    mut stream: ByteStream,
    cancel: CancellationToken,
    mut on_event: F,
) where
    F: FnMut(StreamResponse),
{
    let mut lines = LineBuffer::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::debug!("Stream {:?} cancelled", request_id);
                return;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                if let Some(text) = lines.push(&bytes) {
                    on_event(StreamResponse::chunk(request_id, text));
                }
            }
            Some(Err(e)) => {
                on_event(StreamResponse::error(request_id, e.to_string()));
                return;
            }
            None => break,
        }
    }

    if cancel.is_cancelled() {
        return;
    }
    if let Some(rest) = lines.finish() {
        on_event(StreamResponse::chunk(request_id, rest));
    }
    on_event(StreamResponse::done(request_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn byte_stream(parts: Vec<Result<&'static str>>) -> ByteStream {
        stream::iter(
            parts
                .into_iter()
                .map(|p| p.map(|s| Bytes::from_static(s.as_bytes()))),
        )
        .boxed()
    }

    #[test]
    fn test_request_ids_strictly_increase() {
        let ids = RequestIds::default();
        let a = ids.next();
        let b = ids.next();
        let c = ids.next();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_line_buffer_holds_partial_lines() {
        let mut buf = LineBuffer::default();
        assert_eq!(buf.push(b"{\"message\":{\"con"), None);
        assert_eq!(
            buf.push(b"tent\":\"A\"}}\n{\"mess").as_deref(),
            Some("{\"message\":{\"content\":\"A\"}}\n")
        );
        assert_eq!(buf.finish().as_deref(), Some("{\"mess"));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_line_buffer_keeps_split_utf8_intact() {
        let mut buf = LineBuffer::default();
        let text = "héllo\n".as_bytes();
        // split inside the two-byte 'é'
        assert_eq!(buf.push(&text[..2]), None);
        assert_eq!(buf.push(&text[2..]).as_deref(), Some("héllo\n"));
    }

    #[tokio::test]
    async fn test_pump_emits_chunks_then_done() {
        let id = RequestId(7);
        let mut events = Vec::new();
        pump(
            id,
            byte_stream(vec![Ok("a\nb"), Ok("c\n"), Ok("tail")]),
            CancellationToken::new(),
            |e| events.push(e),
        )
        .await;

        assert_eq!(
            events,
            vec![
                StreamResponse::chunk(id, "a\n".into()),
                StreamResponse::chunk(id, "bc\n".into()),
                StreamResponse::chunk(id, "tail".into()),
                StreamResponse::done(id),
            ]
        );
    }

    #[tokio::test]
    async fn test_pump_reports_error_once() {
        let id = RequestId(8);
        let mut events = Vec::new();
        pump(
            id,
            byte_stream(vec![
                Ok("x\n"),
                Err(AppError::Network("reset".into())),
                Ok("never\n"),
            ]),
            CancellationToken::new(),
            |e| events.push(e),
        )
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].error.as_deref(), Some("Request failed: reset"));
        assert!(!events.iter().any(|e| e.done));
    }

    #[tokio::test]
    async fn test_pump_stops_when_cancelled() {
        let cancel = CancellationToken::new();
        let mut events = Vec::new();
        let token = cancel.clone();
        pump(
            RequestId(9),
            byte_stream(vec![Ok("one\n"), Ok("two\n")]),
            cancel,
            |e| {
                events.push(e);
                token.cancel();
            },
        )
        .await;

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].chunk.as_deref(), Some("one\n"));
    }

    #[test]
    fn test_stream_response_wire_shape() {
        let json = serde_json::to_value(StreamResponse::chunk(RequestId(42), "hi".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "requestId": 42, "chunk": "hi", "done": false }));
    }
}
