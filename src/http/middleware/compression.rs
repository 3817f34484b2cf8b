//! Content-encoding negotiation.
//!
//! Each compressor is a separate middleware for one token. On the request
//! path the first compressor whose token the client accepts claims the
//! request; every compressor after it forwards untouched. On the response
//! path the claiming compressor wraps the body unless something already
//! set `Content-Encoding`.

use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};
use flate2::write::{DeflateEncoder, GzEncoder};
use futures_util::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::Dispatch;

use crate::http::middleware::Middleware;
use crate::observability::logging;

const BROTLI_BUFFER_SIZE: usize = 4096;
const BROTLI_QUALITY: u32 = 6;
const BROTLI_LG_WINDOW: u32 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Gzip,
    #[serde(rename = "br")]
    Brotli,
    Deflate,
}

impl Encoding {
    /// The `Accept-Encoding` / `Content-Encoding` token.
    pub fn token(self) -> &'static str {
        match self {
            Encoding::Gzip => "gzip",
            Encoding::Brotli => "br",
            Encoding::Deflate => "deflate",
        }
    }

    fn encoder(self) -> (StreamEncoder, SharedSink) {
        let sink = SharedSink::default();
        let encoder = match self {
            Encoding::Gzip => {
                StreamEncoder::Gzip(GzEncoder::new(sink.clone(), flate2::Compression::default()))
            }
            Encoding::Deflate => {
                StreamEncoder::Deflate(DeflateEncoder::new(sink.clone(), flate2::Compression::best()))
            }
            Encoding::Brotli => StreamEncoder::Brotli(Box::new(::brotli::CompressorWriter::new(
                sink.clone(),
                BROTLI_BUFFER_SIZE,
                BROTLI_QUALITY,
                BROTLI_LG_WINDOW,
            ))),
        };
        (encoder, sink)
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gzip" => Ok(Encoding::Gzip),
            "br" => Ok(Encoding::Brotli),
            "deflate" => Ok(Encoding::Deflate),
            other => Err(format!("unsupported content encoding '{other}'")),
        }
    }
}

/// Request extension marking that a compressor has claimed the response.
#[derive(Debug, Clone, Copy)]
struct EncodingClaim;

/// Compress responses with `encoding` when the client accepts it.
#[derive(Debug, Clone, Copy)]
pub struct Compression(pub Encoding);

/// Gzip at the default level.
pub fn gzip() -> Compression {
    Compression(Encoding::Gzip)
}

/// Brotli at quality 6.
pub fn brotli() -> Compression {
    Compression(Encoding::Brotli)
}

/// Raw DEFLATE at the best compression level.
pub fn deflate() -> Compression {
    Compression(Encoding::Deflate)
}

impl Middleware for Compression {
    fn wrap(&self, router: Router) -> Router {
        router.layer(middleware::from_fn_with_state(self.0, compress))
    }
}

/// Whether the comma-separated `Accept-Encoding` values contain `token`.
///
/// Tokens compare exactly after trimming; quality parameters are not parsed.
pub fn accepts(headers: &HeaderMap, token: &str) -> bool {
    headers
        .get_all(header::ACCEPT_ENCODING)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|candidate| candidate.trim() == token)
}

async fn compress(State(encoding): State<Encoding>, mut request: Request, next: Next) -> Response {
    if request.extensions().get::<EncodingClaim>().is_some()
        || !accepts(request.headers(), encoding.token())
    {
        return next.run(request).await;
    }

    request.extensions_mut().insert(EncodingClaim);
    let response = next.run(request).await;

    if response.headers().contains_key(header::CONTENT_ENCODING)
        || matches!(response.status(), StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED)
    {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    parts
        .headers
        .insert(header::CONTENT_ENCODING, HeaderValue::from_static(encoding.token()));
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.append(header::VARY, HeaderValue::from_static("accept-encoding"));

    let stream = encode_stream(encoding, body, logging::current());
    Response::from_parts(parts, Body::from_stream(stream))
}

/// Buffer the encoder writes into; drained after every chunk.
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn take(&self) -> Bytes {
        match self.0.lock() {
            Ok(mut buf) => Bytes::from(std::mem::take(&mut *buf)),
            Err(_) => Bytes::new(),
        }
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut inner = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "compression buffer poisoned"))?;
        inner.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum StreamEncoder {
    Gzip(GzEncoder<SharedSink>),
    Deflate(DeflateEncoder<SharedSink>),
    Brotli(Box<::brotli::CompressorWriter<SharedSink>>),
}

impl StreamEncoder {
    fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        match self {
            StreamEncoder::Gzip(enc) => enc.write_all(chunk),
            StreamEncoder::Deflate(enc) => enc.write_all(chunk),
            StreamEncoder::Brotli(enc) => enc.write_all(chunk),
        }
    }

    /// Write the trailer. The encoder is consumed either way.
    fn finish(self) -> io::Result<()> {
        match self {
            StreamEncoder::Gzip(mut enc) => enc.try_finish(),
            StreamEncoder::Deflate(mut enc) => enc.try_finish(),
            StreamEncoder::Brotli(mut enc) => {
                // `into_inner` discards errors from the final block, so surface
                // sink failures through a flush first.
                enc.flush()?;
                enc.into_inner();
                Ok(())
            }
        }
    }
}

struct EncodeState<S> {
    body: S,
    encoder: Option<StreamEncoder>,
    sink: SharedSink,
    encoding: Encoding,
    dispatch: Dispatch,
}

impl<S> EncodeState<S> {
    fn log_failure(&self, what: &str, err: &dyn std::error::Error) {
        tracing::dispatcher::with_default(&self.dispatch, || {
            tracing::error!(encoding = %self.encoding, error = %err, "{what}");
        });
    }

    /// Close the encoder, logging a failed close.
    fn close(&mut self) {
        if let Some(encoder) = self.encoder.take() {
            if let Err(err) = encoder.finish() {
                self.log_failure("Failed to close compressor", &err);
            }
        }
    }
}

fn encode_stream(
    encoding: Encoding,
    body: Body,
    dispatch: Dispatch,
) -> impl Stream<Item = Result<Bytes, axum::Error>> {
    let (encoder, sink) = encoding.encoder();
    let state = EncodeState {
        body: body.into_data_stream(),
        encoder: Some(encoder),
        sink,
        encoding,
        dispatch,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            let encoder = state.encoder.as_mut()?;

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = encoder.write_chunk(&chunk) {
                        state.log_failure("Compression write failed", &err);
                        state.encoder = None;
                        return Some((Err(axum::Error::new(err)), state));
                    }
                    let out = state.sink.take();
                    if !out.is_empty() {
                        return Some((Ok(out), state));
                    }
                }
                Some(Err(err)) => {
                    state.log_failure("Response body failed mid-stream", &err);
                    state.close();
                    return Some((Err(err), state));
                }
                None => {
                    state.close();
                    let out = state.sink.take();
                    return if out.is_empty() {
                        None
                    } else {
                        Some((Ok(out), state))
                    };
                }
            }
        }
    })
}
