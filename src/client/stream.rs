use bytes::Bytes;

use super::error::ClientError;

/// Body of a downloaded task file, read chunk by chunk
pub struct FileStream {
    inner: Inner,
}

enum Inner {
    Http(reqwest::Response),
    Memory(Option<Bytes>),
}

impl FileStream {
    pub(crate) fn from_response(response: reqwest::Response) -> Self {
        Self {
            inner: Inner::Http(response),
        }
    }

    /// Stream over an in-memory body
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: Inner::Memory(Some(bytes.into())),
        }
    }

    /// Next chunk of the body, `None` once it is exhausted
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, ClientError> {
        match &mut self.inner {
            Inner::Http(response) => response.chunk().await.map_err(|e| {
                if e.is_timeout() {
                    ClientError::Timeout
                } else {
                    ClientError::Network(format!("failed to read body: {}", e))
                }
            }),
            Inner::Memory(bytes) => Ok(bytes.take()),
        }
    }
}

impl std::fmt::Debug for FileStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.inner {
            Inner::Http(_) => "http",
            Inner::Memory(_) => "memory",
        };
        f.debug_struct("FileStream").field("kind", &kind).finish()
    }
}
