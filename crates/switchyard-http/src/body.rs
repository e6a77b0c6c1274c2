//! Response body type supporting buffered, empty, and streaming modes.
//!
//! Buffered covers XML payloads and error bodies; Empty covers 204/HEAD
//! responses; Streaming carries a backend response through the gateway in
//! proxy mode without buffering the object in memory.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use http_body_util::Full;

/// A boxed byte stream from a backend response.
pub type ByteStream =
    Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static>>;

/// HTTP response body for every gateway response.
#[derive(Default)]
pub enum GatewayBody {
    /// Buffered body for small responses.
    Buffered(Full<Bytes>),
    /// Empty body for 204 responses, redirects, HEAD responses.
    #[default]
    Empty,
    /// Streaming passthrough of a backend body (proxy mode).
    Streaming(ByteStream),
}

impl std::fmt::Debug for GatewayBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buffered(_) => f.write_str("GatewayBody::Buffered"),
            Self::Empty => f.write_str("GatewayBody::Empty"),
            Self::Streaming(_) => f.write_str("GatewayBody::Streaming"),
        }
    }
}

impl GatewayBody {
    /// Buffered body from bytes.
    #[must_use]
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::Buffered(Full::new(data.into()))
    }

    /// Buffered body from a UTF-8 string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self::Buffered(Full::new(Bytes::from(s.into())))
    }

    /// Buffered body from an XML byte vector.
    #[must_use]
    pub fn from_xml(xml: Vec<u8>) -> Self {
        Self::Buffered(Full::new(Bytes::from(xml)))
    }

    /// Empty body.
    #[must_use]
    pub fn empty() -> Self {
        Self::Empty
    }

    /// Streaming body wrapping a backend response stream.
    #[must_use]
    pub fn streaming(stream: ByteStream) -> Self {
        Self::Streaming(stream)
    }
}

impl http_body::Body for GatewayBody {
    type Data = Bytes;
    type Error = std::io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        match self.get_mut() {
            Self::Buffered(full) => Pin::new(full)
                .poll_frame(cx)
                .map_err(|never| match never {}),
            Self::Empty => Poll::Ready(None),
            Self::Streaming(stream) => match stream.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    Poll::Ready(Some(Ok(http_body::Frame::data(chunk))))
                }
                Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => Poll::Ready(None),
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn is_end_stream(&self) -> bool {
        match self {
            Self::Buffered(full) => full.is_end_stream(),
            Self::Empty => true,
            Self::Streaming(_) => false,
        }
    }

    fn size_hint(&self) -> http_body::SizeHint {
        match self {
            Self::Buffered(full) => full.size_hint(),
            Self::Empty => http_body::SizeHint::with_exact(0),
            Self::Streaming(_) => http_body::SizeHint::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body::Body;

    use super::*;

    #[test]
    fn test_should_report_empty_body_as_end_of_stream() {
        let body = GatewayBody::empty();
        assert!(body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(0));
    }

    #[test]
    fn test_should_size_buffered_body() {
        let body = GatewayBody::from_string("hello");
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), Some(5));
    }

    #[test]
    fn test_should_not_bound_streaming_body() {
        let stream = futures_util::stream::iter(vec![Ok(Bytes::from_static(b"x"))]);
        let body = GatewayBody::streaming(Box::pin(stream));
        assert!(!body.is_end_stream());
        assert_eq!(body.size_hint().exact(), None);
    }
}
