use anyhow::Result;
use std::path::Path;
use tempfile::TempDir;
use telepoll::http::BOUNDARY;
use telepoll::{
    BotConfig, MemoryConnection, MemoryRemote, MemorySource, Regime, TelegramBot, UploadError,
    UploadJob,
};

const GET_ME: &str = r#"{"ok":true,"result":{"id":1,"is_bot":true,"first_name":"U","username":"up_bot"}}"#;
const SENT: &str = r#"{"ok":true,"result":{"message_id":9,"chat":{"id":77},"date":1}}"#;

async fn started_bot() -> (TelegramBot, MemoryRemote) {
    let (conn, remote) = MemoryConnection::pair();
    remote.push_response(GET_ME);
    let config = BotConfig {
        regime: Regime::Inline,
        upload_chunk_bytes: 512,
        ..BotConfig::with_token("5:UPL")
    };
    let mut bot = TelegramBot::new(config, Box::new(conn));
    bot.begin().await.expect("begin");
    remote.take_written();
    (bot, remote)
}

/// Split a written request into its head and body.
fn split_request(raw: &[u8]) -> (String, Vec<u8>) {
    let at = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8(raw[..at].to_vec()).expect("utf8 head");
    (head, raw[at + 4..].to_vec())
}

fn declared_length(head: &str) -> usize {
    head.lines()
        .find_map(|l| l.strip_prefix("Content-Length: "))
        .expect("content length header")
        .trim()
        .parse()
        .expect("numeric length")
}

fn write_file(dir: &Path, name: &str, len: usize) -> std::path::PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
    std::fs::write(&path, data).expect("write fixture");
    path
}

// ══════════════════════════════════════════════════════════════════
// Gate 1: Content-Length matches the streamed body exactly
// ══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn gate1_length_exact_across_chunk_edges() -> Result<()> {
    let tmp = TempDir::new()?;
    for len in [0usize, 512, 513, 2048] {
        let (bot, remote) = started_bot().await;
        let path = write_file(tmp.path(), &format!("f{len}.jpg"), len);
        remote.push_response(SENT);

        bot.send_photo_by_file(77, &path).await?;

        let (head, body) = split_request(&remote.take_written());
        assert!(head.starts_with("POST https://api.telegram.org/bot5:UPL/sendPhoto HTTP/1.1"));
        assert!(head.contains(&format!("multipart/form-data; boundary={BOUNDARY}")));
        assert_eq!(declared_length(&head), body.len(), "file of {len} bytes");
        assert!(body.starts_with(format!("--{BOUNDARY}\r\n").as_bytes()));
        assert!(body.ends_with(format!("\r\n--{BOUNDARY}--\r\n").as_bytes()));

        let file_name = format!("filename=\"f{len}.jpg\"");
        assert!(String::from_utf8_lossy(&body).contains(&file_name));
    }
    Ok(())
}

#[tokio::test]
async fn gate1_file_bytes_arrive_unchanged() -> Result<()> {
    let tmp = TempDir::new()?;
    let path = write_file(tmp.path(), "raw.bin", 1500);
    let expected = std::fs::read(&path)?;
    let (bot, remote) = started_bot().await;
    remote.push_response(SENT);

    bot.send_photo_by_file(77, &path).await?;

    let (_, body) = split_request(&remote.take_written());
    let found = body
        .windows(expected.len())
        .any(|w| w == expected.as_slice());
    assert!(found, "file content must be streamed verbatim");
    Ok(())
}

// ══════════════════════════════════════════════════════════════════
// Gate 2: failures before any byte leaves
// ══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn gate2_missing_file_sends_nothing() {
    let (bot, remote) = started_bot().await;

    let err = bot
        .send_photo_by_file(77, Path::new("/no/such/photo.jpg"))
        .await
        .unwrap_err();
    assert!(matches!(err, UploadError::Open { .. }), "{err}");
    assert!(remote.written().is_empty());
}

#[tokio::test]
async fn gate2_busy_slot_refuses_upload() {
    let (bot, remote) = started_bot().await;
    assert!(bot.submit("sendMessage", r#"{"chat_id":1,"text":"hold"}"#.to_string()));

    let job = UploadJob::document(77, "a.txt", Box::new(MemorySource::new("abc")));
    let err = bot.upload(job).await.unwrap_err();
    assert!(matches!(err, UploadError::Busy));
    assert!(remote.written().is_empty());
}

// ══════════════════════════════════════════════════════════════════
// Gate 3: the server's verdict is reported
// ══════════════════════════════════════════════════════════════════

#[tokio::test]
async fn gate3_server_rejection_is_an_error() {
    let (bot, remote) = started_bot().await;
    remote.push_response(r#"{"ok":false,"error_code":400,"description":"Bad Request: IMAGE_PROCESS_FAILED"}"#);

    let job = UploadJob::photo(77, "x.jpg", Box::new(MemorySource::new(vec![0u8; 10])));
    let err = bot.upload(job).await.unwrap_err();
    assert!(matches!(err, UploadError::Rejected(_)));
    assert!(err.to_string().contains("IMAGE_PROCESS_FAILED"));
}

#[tokio::test]
async fn gate3_document_upload_then_polling_resumes() -> Result<()> {
    let (mut bot, remote) = started_bot().await;
    remote.push_response(SENT);

    let job = UploadJob::document(77, "notes.txt", Box::new(MemorySource::new("hello")))
        .with_content_type("text/plain");
    tokio_test::assert_ok!(bot.upload(job).await);
    let req = String::from_utf8(remote.take_written())?;
    assert!(req.contains("/sendDocument HTTP/1.1"));
    assert!(req.contains("name=\"document\"; filename=\"notes.txt\"\r\nContent-Type: text/plain"));

    // The slot is free again, so the next tick polls.
    remote.push_response(r#"{"ok":true,"result":[]}"#);
    assert!(bot.get_new_message().await.is_no_data());
    assert!(String::from_utf8(remote.take_written())?.contains("getUpdates"));
    Ok(())
}

#[tokio::test]
async fn gate3_disconnected_upload_fails_fast() {
    let (bot, remote) = started_bot().await;
    remote.drop_link();

    let job = UploadJob::photo(77, "x.jpg", Box::new(MemorySource::new("x")));
    let err = bot.upload(job).await.unwrap_err();
    assert!(matches!(err, UploadError::NotConnected));
}
