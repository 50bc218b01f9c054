use crate::error::TransportError;
use crate::transport::ByteConnection;

/// Largest accepted status line plus headers.
const MAX_HEAD_BYTES: usize = 8 * 1024;

const READ_CHUNK: usize = 1024;

/// One HTTP response, body fully buffered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// The server announced `Connection: close`.
    pub close: bool,
    pub body: String,
}

#[derive(Debug, Default)]
struct Head {
    status: u16,
    content_length: Option<usize>,
    chunked: bool,
    close: bool,
}

/// Reads responses off a keep-alive connection.
///
/// Bytes past the end of one response stay buffered for the next one.
#[derive(Debug)]
pub struct ResponseReader {
    buf: Vec<u8>,
    max_body: usize,
}

impl ResponseReader {
    pub fn new(max_body: usize) -> Self {
        Self {
            buf: Vec::with_capacity(READ_CHUNK),
            max_body,
        }
    }

    /// Drop anything buffered from a previous connection.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub async fn read_response<C>(&mut self, conn: &mut C) -> Result<HttpResponse, TransportError>
    where
        C: ByteConnection + ?Sized,
    {
        let head_len = loop {
            if let Some(end) = find_head_end(&self.buf) {
                break end;
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(TransportError::Malformed("header section too large".into()));
            }
            self.fill(conn).await?;
        };

        let head = parse_head(&self.buf[..head_len])?;
        self.buf.drain(..head_len);

        let body = if head.chunked {
            self.read_chunked(conn).await?
        } else if let Some(len) = head.content_length {
            if len > self.max_body {
                return Err(TransportError::PayloadTooLarge {
                    limit: self.max_body,
                });
            }
            while self.buf.len() < len {
                self.fill(conn).await?;
            }
            self.buf.drain(..len).collect()
        } else {
            self.read_to_close(conn).await?
        };

        if head.close {
            tracing::debug!("Server announced Connection: close");
        }

        Ok(HttpResponse {
            status: head.status,
            close: head.close,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    async fn fill<C>(&mut self, conn: &mut C) -> Result<(), TransportError>
    where
        C: ByteConnection + ?Sized,
    {
        let mut chunk = [0u8; READ_CHUNK];
        let n = conn.read(&mut chunk).await?;
        if n == 0 {
            return Err(TransportError::Closed);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(())
    }

    async fn read_line<C>(&mut self, conn: &mut C) -> Result<String, TransportError>
    where
        C: ByteConnection + ?Sized,
    {
        loop {
            if let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = self.buf.drain(..=pos).collect();
                let text = String::from_utf8_lossy(&line);
                return Ok(text.trim_end_matches(['\r', '\n']).to_string());
            }
            if self.buf.len() > MAX_HEAD_BYTES {
                return Err(TransportError::Malformed("chunk line too long".into()));
            }
            self.fill(conn).await?;
        }
    }

    async fn read_chunked<C>(&mut self, conn: &mut C) -> Result<Vec<u8>, TransportError>
    where
        C: ByteConnection + ?Sized,
    {
        let mut body = Vec::new();
        loop {
            let line = self.read_line(conn).await?;
            let size_text = line.split(';').next().unwrap_or_default().trim();
            let size = usize::from_str_radix(size_text, 16)
                .map_err(|_| TransportError::Malformed(format!("bad chunk size `{size_text}`")))?;

            if size == 0 {
                // trailers, up to the empty line
                while !self.read_line(conn).await?.is_empty() {}
                return Ok(body);
            }
            if size > self.max_body.saturating_sub(body.len()) {
                return Err(TransportError::PayloadTooLarge {
                    limit: self.max_body,
                });
            }
            while self.buf.len() < size + 2 {
                self.fill(conn).await?;
            }
            body.extend(self.buf.drain(..size));
            if self.buf.drain(..2).as_slice() != b"\r\n" {
                return Err(TransportError::Malformed(
                    "chunk not terminated by CRLF".into(),
                ));
            }
        }
    }

    async fn read_to_close<C>(&mut self, conn: &mut C) -> Result<Vec<u8>, TransportError>
    where
        C: ByteConnection + ?Sized,
    {
        loop {
            if self.buf.len() > self.max_body {
                return Err(TransportError::PayloadTooLarge {
                    limit: self.max_body,
                });
            }
            match self.fill(conn).await {
                Ok(()) => {}
                Err(TransportError::Closed) => return Ok(std::mem::take(&mut self.buf)),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Offset just past the blank line ending the header section.
fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|p| p + 2);
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn parse_head(raw: &[u8]) -> Result<Head, TransportError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| TransportError::Malformed("header is not utf-8".into()))?;
    let mut lines = text.lines();

    let status_line = lines.next().unwrap_or_default();
    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::Malformed(format!(
            "bad status line `{status_line}`"
        )));
    }
    let status = parts
        .next()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| TransportError::Malformed(format!("bad status line `{status_line}`")))?;

    let mut head = Head {
        status,
        ..Head::default()
    };
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => {
                let len = value
                    .parse::<usize>()
                    .map_err(|_| TransportError::Malformed(format!("bad content-length `{value}`")))?;
                head.content_length = Some(len);
            }
            "transfer-encoding" => {
                head.chunked = value.to_ascii_lowercase().contains("chunked");
            }
            "connection" => {
                head.close = value.eq_ignore_ascii_case("close");
            }
            _ => {}
        }
    }
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Endpoint, MemoryConnection, MemoryRemote};

    async fn connected() -> (MemoryConnection, MemoryRemote) {
        let (mut conn, remote) = MemoryConnection::pair();
        conn.connect(&Endpoint::Host {
            name: "api.telegram.org".into(),
            port: 443,
        })
        .await
        .unwrap();
        (conn, remote)
    }

    #[tokio::test]
    async fn reads_content_length_body() {
        let (mut conn, remote) = connected().await;
        remote.push_response("{\"ok\":true}");

        let mut reader = ResponseReader::new(1024);
        let resp = reader.read_response(&mut conn).await.unwrap();
        assert_eq!(resp.status, 200);
        assert!(!resp.close);
        assert_eq!(resp.body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn keeps_bytes_of_the_next_response() {
        let (mut conn, remote) = connected().await;
        remote.push_response("first");
        remote.push_response("second");

        let mut reader = ResponseReader::new(1024);
        assert_eq!(reader.read_response(&mut conn).await.unwrap().body, "first");
        assert_eq!(reader.read_response(&mut conn).await.unwrap().body, "second");
    }

    #[tokio::test]
    async fn decodes_chunked_body() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n{\"ok\"\r\n6;x=y\r\n:true}\r\n0\r\n\r\n",
        );

        let mut reader = ResponseReader::new(1024);
        let resp = reader.read_response(&mut conn).await.unwrap();
        assert_eq!(resp.body, "{\"ok\":true}");
    }

    #[tokio::test]
    async fn huge_chunk_size_is_too_large_not_a_panic() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nok\r\nffffffffffffffff\r\n",
        );

        let mut reader = ResponseReader::new(1024);
        let err = reader.read_response(&mut conn).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { limit: 1024 }), "{err}");
    }

    #[tokio::test]
    async fn chunk_without_crlf_is_malformed() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n2\r\nokXY0\r\n\r\n",
        );

        let mut reader = ResponseReader::new(1024);
        let err = reader.read_response(&mut conn).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)), "{err}");
    }

    #[tokio::test]
    async fn detects_remote_close_and_reads_to_eof() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n{\"ok\":false}");
        remote.drop_link_after_flush();

        let mut reader = ResponseReader::new(1024);
        let resp = reader.read_response(&mut conn).await.unwrap();
        assert!(resp.close);
        assert_eq!(resp.body, "{\"ok\":false}");
    }

    #[tokio::test]
    async fn accepts_bare_lf_headers() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(b"HTTP/1.1 200 OK\nContent-Length: 2\n\n{}");

        let mut reader = ResponseReader::new(1024);
        assert_eq!(reader.read_response(&mut conn).await.unwrap().body, "{}");
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let (mut conn, remote) = connected().await;
        remote.push_response(&"x".repeat(64));

        let mut reader = ResponseReader::new(16);
        let err = reader.read_response(&mut conn).await.unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn rejects_garbage_status_line() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(b"SSH-2.0-OpenSSH\r\n\r\n");

        let mut reader = ResponseReader::new(1024);
        let err = reader.read_response(&mut conn).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn truncated_body_reports_closed() {
        let (mut conn, remote) = connected().await;
        remote.push_raw(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\n{\"ok\"");
        remote.drop_link_after_flush();

        let mut reader = ResponseReader::new(1024);
        let err = reader.read_response(&mut conn).await.unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }
}
