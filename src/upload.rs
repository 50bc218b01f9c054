//! Multipart file uploads that take the connection for their whole duration.

use crate::decoder::check_reply;
use crate::error::{TransportError, UploadError};
use crate::http::MultipartForm;
use crate::lifecycle::ConnectionLifecycle;
use crate::transmitter::SharedLink;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;

/// Sequential bytes of known length.
#[async_trait]
pub trait ByteSource: Send {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fill `buf` from the current position; 0 means exhausted.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
}

pub struct FileSource {
    file: tokio::fs::File,
    len: u64,
}

impl FileSource {
    pub async fn open(path: &Path) -> Result<Self, UploadError> {
        let open_err = |source| UploadError::Open {
            path: PathBuf::from(path),
            source,
        };
        let file = tokio::fs::File::open(path).await.map_err(open_err)?;
        let meta = file.metadata().await.map_err(open_err)?;
        if !meta.is_file() {
            return Err(open_err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }
        Ok(Self {
            file,
            len: meta.len(),
        })
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf).await
    }
}

/// In-memory source for generated content.
#[derive(Debug, Clone)]
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_chunk(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let rest = &self.data[self.pos..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// What to upload and where.
pub struct UploadJob {
    pub chat_id: i64,
    pub operation: String,
    pub field_name: String,
    pub file_name: String,
    pub content_type: String,
    pub source: Box<dyn ByteSource>,
}

impl UploadJob {
    pub fn photo(chat_id: i64, file_name: impl Into<String>, source: Box<dyn ByteSource>) -> Self {
        Self {
            chat_id,
            operation: "sendPhoto".into(),
            field_name: "photo".into(),
            file_name: file_name.into(),
            content_type: "image/jpeg".into(),
            source,
        }
    }

    pub fn document(
        chat_id: i64,
        file_name: impl Into<String>,
        source: Box<dyn ByteSource>,
    ) -> Self {
        Self {
            chat_id,
            operation: "sendDocument".into(),
            field_name: "document".into(),
            file_name: file_name.into(),
            content_type: "application/octet-stream".into(),
            source,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }
}

/// Streams an [`UploadJob`] over the shared connection.
///
/// The command slot is reserved first, so neither the poller nor the worker
/// can start an exchange until the upload is finished.
pub struct FileUploadSession<'a> {
    link: &'a SharedLink,
    chunk: usize,
}

impl<'a> FileUploadSession<'a> {
    pub fn new(link: &'a SharedLink, chunk: usize) -> Self {
        Self { link, chunk }
    }

    pub async fn upload(&self, mut job: UploadJob) -> Result<(), UploadError> {
        if !self.link.slot.try_reserve() {
            return Err(UploadError::Busy);
        }
        let mut lifecycle = self.link.lifecycle.lock().await;
        let result = self.stream(&mut lifecycle, &mut job).await;
        drop(lifecycle);
        self.link.slot.complete(None);

        match &result {
            Ok(()) => tracing::info!(
                "Telegram {} uploaded {} ({} bytes) to {}",
                job.operation,
                job.file_name,
                job.source.len(),
                job.chat_id
            ),
            Err(e) => tracing::warn!("Telegram {} of {} failed: {e}", job.operation, job.file_name),
        }
        result
    }

    async fn stream(
        &self,
        lifecycle: &mut ConnectionLifecycle,
        job: &mut UploadJob,
    ) -> Result<(), UploadError> {
        if !lifecycle.is_connected() {
            return Err(UploadError::NotConnected);
        }
        let len = job.source.len();
        let form = MultipartForm::new(job.chat_id, &job.field_name, &job.file_name, &job.content_type);

        let head = form.request_head(lifecycle.host(), lifecycle.token(), &job.operation, len);
        lifecycle.send_raw(&head).await?;
        lifecycle.send_raw(form.head()).await?;

        let mut buf = vec![0u8; self.chunk];
        let mut sent: u64 = 0;
        while sent < len {
            let want = usize::try_from(len - sent).map_or(buf.len(), |rest| rest.min(buf.len()));
            let n = match job.source.read_chunk(&mut buf[..want]).await {
                Ok(n) => n,
                Err(e) => {
                    // The request is half written; the link cannot be reused.
                    lifecycle.abandon(&TransportError::Malformed(format!(
                        "upload source failed: {e}"
                    )));
                    return Err(UploadError::Source(e));
                }
            };
            if n == 0 {
                break;
            }
            lifecycle.send_raw(&buf[..n]).await?;
            sent += n as u64;
            tokio::task::yield_now().await;
        }

        if sent != len {
            let e = std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("source gave {sent} of {len} bytes"),
            );
            lifecycle.abandon(&TransportError::Malformed(e.to_string()));
            return Err(UploadError::Source(e));
        }
        lifecycle.send_raw(form.tail()).await?;

        let response = match tokio::time::timeout(self.link.deadline, lifecycle.receive()).await {
            Ok(response) => response?,
            Err(_) => {
                let e = TransportError::Timeout(self.link.deadline);
                lifecycle.abandon(&e);
                return Err(e.into());
            }
        };
        check_reply(&response.body)?;
        Ok(())
    }
}
