//! Client tests against a scripted server.
//!
//! The mock stream replays a canned server transcript and records what the
//! client wrote, so a whole poll round-trip can be checked without a server.

use std::io::{self, Cursor};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use motionwatch_imap::{Client, FetchAttribute, Flag, SearchQuery, StoreAction};

/// Replays `script` on read and records writes into `sent`.
struct ScriptedServer {
    script: Cursor<Vec<u8>>,
    sent: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedServer {
    fn new(script: &[u8]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let server = Self {
            script: Cursor::new(script.to_vec()),
            sent: Arc::clone(&sent),
        };
        (server, sent)
    }
}

impl AsyncRead for ScriptedServer {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let pos = usize::try_from(self.script.position()).unwrap_or(usize::MAX);
        let data = self.script.get_ref();
        if pos < data.len() {
            let n = (data.len() - pos).min(buf.remaining());
            buf.put_slice(&data[pos..pos + n]);
            self.script.set_position((pos + n) as u64);
        }
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for ScriptedServer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

const MESSAGE: &[u8] = b"Subject: Motion DetectStart\r\n\r\nhi\r\n";

fn transcript() -> Vec<u8> {
    let mut script = Vec::new();
    script.extend_from_slice(b"* OK [CAPABILITY IMAP4rev1] ready\r\n");
    script.extend_from_slice(b"A0001 OK LOGIN completed\r\n");
    script.extend_from_slice(b"* 2 EXISTS\r\n* OK [UIDVALIDITY 9] ok\r\nA0002 OK SELECT done\r\n");
    script.extend_from_slice(b"* SEARCH 31\r\nA0003 OK SEARCH done\r\n");
    script.extend_from_slice(
        format!(
            "* 1 FETCH (UID 31 INTERNALDATE \"16-Oct-2026 08:15:00 +0200\" BODY[] {{{}}}\r\n",
            MESSAGE.len()
        )
        .as_bytes(),
    );
    script.extend_from_slice(MESSAGE);
    script.extend_from_slice(b")\r\nA0004 OK FETCH done\r\n");
    script.extend_from_slice(b"A0005 OK STORE done\r\n");
    script.extend_from_slice(b"* BYE logging out\r\nA0006 OK LOGOUT done\r\n");
    script
}

#[tokio::test]
async fn test_full_poll_round_trip() {
    let (server, sent) = ScriptedServer::new(&transcript());

    let client = Client::from_stream(server).await.unwrap();
    let mut inbox = client
        .login("cam@example.com", "pw")
        .await
        .unwrap()
        .select("INBOX")
        .await
        .unwrap();
    assert_eq!(inbox.uid_validity(), Some(9));

    let uids = inbox
        .uid_search(&SearchQuery::new().text("Motion DetectStart"))
        .await
        .unwrap();
    assert_eq!(uids, vec![31]);

    let fetched = inbox
        .uid_fetch(
            &uids,
            vec![
                FetchAttribute::Uid,
                FetchAttribute::InternalDate,
                FetchAttribute::BodyPeek(None),
            ],
        )
        .await
        .unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0].uid(), Some(31));
    assert_eq!(fetched[0].internal_date(), Some("16-Oct-2026 08:15:00 +0200"));
    assert_eq!(fetched[0].body(""), Some(MESSAGE));

    inbox
        .uid_store(&[31], StoreAction::Add(vec![Flag::Seen]))
        .await
        .unwrap();
    inbox.logout().await.unwrap();

    let sent = String::from_utf8(sent.lock().unwrap().clone()).unwrap();
    assert!(sent.contains("A0003 UID SEARCH TEXT \"Motion DetectStart\"\r\n"));
    assert!(sent.contains("A0004 UID FETCH 31 (UID INTERNALDATE BODY.PEEK[])\r\n"));
    assert!(sent.contains("A0005 UID STORE 31 +FLAGS.SILENT (\\Seen)\r\n"));
    assert!(sent.ends_with("A0006 LOGOUT\r\n"));
}

#[tokio::test]
async fn test_server_hangup_is_connection_error() {
    let (server, _sent) = ScriptedServer::new(b"* OK ready\r\n");
    let client = Client::from_stream(server).await.unwrap();

    let err = client.login("a", "b").await.unwrap_err();
    assert!(err.is_connection_error());
}
