//! Request framing for the single API host.

/// Boundary shared by every multipart upload.
pub const BOUNDARY: &str = "----WebKitFormBoundary7MA4YWxkTrZu0gW";

/// Build a complete JSON request: head and body in one buffer.
pub fn frame_json(host: &str, token: &str, operation: &str, body: &str) -> Vec<u8> {
    let mut out = format!(
        "POST https://{host}/bot{token}/{operation} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Connection: keep-alive\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body.as_bytes());
    out
}

/// The textual parts of a two-part `multipart/form-data` body.
///
/// The body on the wire is `head`, then the raw file bytes, then `tail`.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    head: String,
    tail: String,
}

impl MultipartForm {
    pub fn new(chat_id: i64, field_name: &str, file_name: &str, content_type: &str) -> Self {
        let head = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"chat_id\"\r\n\r\n\
             {chat_id}\r\n\
             --{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"{field_name}\"; filename=\"{file_name}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        );
        let tail = format!("\r\n--{BOUNDARY}--\r\n");
        Self { head, tail }
    }

    pub fn head(&self) -> &[u8] {
        self.head.as_bytes()
    }

    pub fn tail(&self) -> &[u8] {
        self.tail.as_bytes()
    }

    /// Exact body size for a file of `file_len` bytes.
    pub fn content_length(&self, file_len: u64) -> u64 {
        self.head.len() as u64 + file_len + self.tail.len() as u64
    }

    /// Request line and headers for an upload of `file_len` bytes.
    pub fn request_head(&self, host: &str, token: &str, operation: &str, file_len: u64) -> Vec<u8> {
        format!(
            "POST https://{host}/bot{token}/{operation} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Connection: keep-alive\r\n\
             Content-Type: multipart/form-data; boundary={BOUNDARY}\r\n\
             Content-Length: {}\r\n\r\n",
            self.content_length(file_len)
        )
        .into_bytes()
    }
}
