use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{LocalBoxStream, Stream, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// HTTP body shared by inbound requests, storefront calls and responses. Either a single
/// buffer or a local stream of chunks, so it stays usable on single-threaded edge runtimes.
pub enum Body {
    Once(Bytes),
    Stream(LocalBoxStream<'static, Result<Bytes, anyhow::Error>>),
}

impl Body {
    pub fn empty() -> Self {
        Body::Once(Bytes::new())
    }

    pub fn from_bytes<B>(bytes: B) -> Self
    where
        B: Into<Bytes>,
    {
        Body::Once(bytes.into())
    }

    pub fn from_stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + 'static,
        E: 'static,
        anyhow::Error: From<E>,
    {
        Body::Stream(
            stream
                .map(|chunk| chunk.map_err(anyhow::Error::from))
                .boxed_local(),
        )
    }

    /// GraphQL payloads and form posts travel as JSON/urlencoded text.
    pub fn text<S>(text: S) -> Self
    where
        S: Into<String>,
    {
        Body::Once(Bytes::from(text.into()))
    }

    pub fn json<T>(value: &T) -> Result<Self, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        Ok(Body::Once(Bytes::from(serde_json::to_vec(value)?)))
    }

    /// The in-memory buffer, or `None` while the body is still a stream.
    pub fn buffered(&self) -> Option<&Bytes> {
        match self {
            Body::Once(bytes) => Some(bytes),
            Body::Stream(_) => None,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Body::Stream(_))
    }

    /// Pull every chunk of a streaming body into one buffer.
    pub async fn collect(self) -> Result<Bytes, anyhow::Error> {
        match self {
            Body::Once(bytes) => Ok(bytes),
            Body::Stream(stream) => {
                let buf = stream
                    .try_fold(BytesMut::new(), |mut buf, chunk| async move {
                        buf.extend_from_slice(&chunk);
                        Ok::<_, anyhow::Error>(buf)
                    })
                    .await?;
                Ok(buf.freeze())
            }
        }
    }

    pub fn to_json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: DeserializeOwned,
    {
        match self.buffered() {
            Some(bytes) => serde_json::from_slice(bytes),
            None => Err(serde_json::Error::io(io::Error::new(
                io::ErrorKind::WouldBlock,
                "body is still streaming; collect it before decoding JSON",
            ))),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::empty()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Once(bytes) => write!(f, "Body::Once({} bytes)", bytes.len()),
            Body::Stream(_) => f.write_str("Body::Stream(..)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Once(value)
    }
}

impl From<&str> for Body {
    fn from(value: &str) -> Self {
        Body::text(value)
    }
}

impl From<String> for Body {
    fn from(value: String) -> Self {
        Body::text(value)
    }
}
