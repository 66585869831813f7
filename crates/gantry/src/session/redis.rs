//! Redis-shaped session store speaking a minimal slice of RESP.
//!
//! One TCP connection per operation: requests are RESP arrays
//! (`*<n>\r\n$<len>\r\n<payload>\r\n...`), GET replies are bulk strings
//! (`$<len>\r\n<payload>\r\n`). Each session is one key,
//! `session:[namespace:]<session_id>`, holding the JSON-serialized
//! session document.

use super::{Session, SessionStore};
use crate::config::HttpEndpoint;
use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

pub struct RedisSessionStore {
    endpoint: HttpEndpoint,
    password: String,
    db: i64,
    namespace: String,
}

impl RedisSessionStore {
    pub fn new(endpoint: HttpEndpoint, password: String, db: i64, namespace: String) -> Self {
        Self {
            endpoint,
            password,
            db,
            namespace,
        }
    }

    fn make_key(&self, session_id: &str) -> String {
        if self.namespace.is_empty() {
            format!("session:{}", session_id)
        } else {
            format!("session:{}:{}", self.namespace, session_id)
        }
    }

    async fn connect(&self) -> Option<TcpStream> {
        let addr = format!("{}:{}", self.endpoint.host, self.endpoint.port);
        let stream = TcpStream::connect(addr).await.ok()?;
        Some(stream)
    }

    async fn command(&self, conn: &mut TcpStream, args: &[&str]) -> Option<Vec<u8>> {
        conn.write_all(encode_resp(args).as_bytes()).await.ok()?;
        let mut buf = vec![0u8; 64 * 1024];
        let n = conn.read(&mut buf).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.truncate(n);
        Some(buf)
    }

    async fn auth_and_select(&self, conn: &mut TcpStream) -> bool {
        if !self.password.is_empty()
            && self.command(conn, &["AUTH", &self.password]).await.is_none()
        {
            return false;
        }
        if self.db != 0 {
            let db = self.db.to_string();
            if self.command(conn, &["SELECT", &db]).await.is_none() {
                return false;
            }
        }
        true
    }
}

/// Encode a RESP array of bulk strings.
pub fn encode_resp(args: &[&str]) -> String {
    let mut out = format!("*{}\r\n", args.len());
    for a in args {
        out.push_str(&format!("${}\r\n{}\r\n", a.len(), a));
    }
    out
}

/// Decode a bulk-string reply; `None` for nil replies, errors, or
/// anything that is not a bulk string.
pub fn decode_bulk_string(reply: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(reply).ok()?;
    let rest = text.strip_prefix('$')?;
    let crlf = rest.find("\r\n")?;
    let len: i64 = rest[..crlf].parse().ok()?;
    if len < 0 {
        return None;
    }
    let start = crlf + 2;
    let end = start + len as usize;
    if end > rest.len() {
        return None;
    }
    Some(rest[start..end].to_string())
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn load(&self, session_id: &str) -> Option<Session> {
        let mut conn = self.connect().await?;
        if !self.auth_and_select(&mut conn).await {
            return None;
        }
        let key = self.make_key(session_id);
        let reply = self.command(&mut conn, &["GET", &key]).await?;
        let payload = decode_bulk_string(&reply)?;
        let mut session: Session = serde_json::from_str(&payload).ok()?;
        session.session_id = session_id.to_string();
        Some(session)
    }

    async fn save(&self, session: &Session) {
        let Some(mut conn) = self.connect().await else {
            return;
        };
        if !self.auth_and_select(&mut conn).await {
            return;
        }
        let Ok(payload) = serde_json::to_string(session) else {
            return;
        };
        let key = self.make_key(&session.session_id);
        let _ = self.command(&mut conn, &["SET", &key, &payload]).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;
    use tokio::net::TcpListener;

    #[test]
    fn resp_encoding() {
        assert_eq!(
            encode_resp(&["GET", "session:abc"]),
            "*2\r\n$3\r\nGET\r\n$11\r\nsession:abc\r\n"
        );
    }

    #[test]
    fn bulk_string_decoding() {
        assert_eq!(
            decode_bulk_string(b"$5\r\nhello\r\n").as_deref(),
            Some("hello")
        );
        assert_eq!(decode_bulk_string(b"$-1\r\n"), None);
        assert_eq!(decode_bulk_string(b"+OK\r\n"), None);
    }

    #[test]
    fn key_includes_namespace() {
        let store = RedisSessionStore::new(
            HttpEndpoint::parse("127.0.0.1:6379", 6379),
            String::new(),
            0,
            "ns1".into(),
        );
        assert_eq!(store.make_key("abc"), "session:ns1:abc");
    }

    /// A one-shot RESP server good enough to serve a single GET.
    async fn serve_get(listener: TcpListener, value: String) {
        let (mut sock, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let _ = sock.read(&mut buf).await.unwrap();
        let reply = format!("${}\r\n{}\r\n", value.len(), value);
        sock.write_all(reply.as_bytes()).await.unwrap();
    }

    #[tokio::test]
    async fn load_parses_stored_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let session = Session {
            session_id: "abc".into(),
            history: vec![ChatMessage::new("user", "hi")],
            turns: vec![],
        };
        let payload = serde_json::to_string(&session).unwrap();
        let server = tokio::spawn(serve_get(listener, payload));

        let store = RedisSessionStore::new(
            HttpEndpoint::parse(&format!("127.0.0.1:{}", port), 6379),
            String::new(),
            0,
            String::new(),
        );
        let loaded = store.load("abc").await.unwrap();
        assert_eq!(loaded.history.len(), 1);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn load_returns_none_when_unreachable() {
        let store = RedisSessionStore::new(
            HttpEndpoint::parse("127.0.0.1:1", 6379),
            String::new(),
            0,
            String::new(),
        );
        assert!(store.load("abc").await.is_none());
    }
}
