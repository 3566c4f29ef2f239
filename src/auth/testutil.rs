//! Minimal scripted HTTP backend for exercising the auth components in tests
//!
//! Serves the auth endpoints with a canned body and answers every other path
//! according to an [`ApiMode`], recording what it saw.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// How the fake API route answers authenticated requests
#[derive(Clone)]
pub enum ApiMode {
    /// 200 for every request
    AcceptAll,
    /// 401 for every request
    AlwaysReject,
    /// 401 when the request carries this bearer token, 200 otherwise
    RejectToken(String),
}

pub struct FakeBackend {
    addr: SocketAddr,
    refresh_calls: Arc<AtomicUsize>,
    api_calls: Arc<AtomicUsize>,
    seen_bearers: Arc<Mutex<Vec<Option<String>>>>,
}

impl FakeBackend {
    pub async fn spawn(api_mode: ApiMode, auth_body: &str) -> Self {
        Self::spawn_with_auth_delay(api_mode, auth_body, Duration::ZERO).await
    }

    /// Like [`spawn`], but auth endpoints sleep before answering, widening
    /// the window for concurrent-refresh tests
    pub async fn spawn_with_auth_delay(
        api_mode: ApiMode,
        auth_body: &str,
        auth_delay: Duration,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let refresh_calls = Arc::new(AtomicUsize::new(0));
        let api_calls = Arc::new(AtomicUsize::new(0));
        let seen_bearers = Arc::new(Mutex::new(Vec::new()));
        let auth_body = auth_body.to_string();

        {
            let refresh_calls = refresh_calls.clone();
            let api_calls = api_calls.clone();
            let seen_bearers = seen_bearers.clone();
            tokio::spawn(async move {
                loop {
                    let Ok((socket, _)) = listener.accept().await else {
                        break;
                    };
                    let api_mode = api_mode.clone();
                    let auth_body = auth_body.clone();
                    let refresh_calls = refresh_calls.clone();
                    let api_calls = api_calls.clone();
                    let seen_bearers = seen_bearers.clone();
                    tokio::spawn(async move {
                        let _ = handle(
                            socket,
                            api_mode,
                            auth_body,
                            auth_delay,
                            refresh_calls,
                            api_calls,
                            seen_bearers,
                        )
                        .await;
                    });
                }
            });
        }

        Self {
            addr,
            refresh_calls,
            api_calls,
            seen_bearers,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn refresh_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn api_count(&self) -> usize {
        self.api_calls.load(Ordering::SeqCst)
    }

    pub fn bearers(&self) -> Vec<Option<String>> {
        self.seen_bearers.lock().unwrap().clone()
    }
}

async fn handle(
    mut socket: TcpStream,
    api_mode: ApiMode,
    auth_body: String,
    auth_delay: Duration,
    refresh_calls: Arc<AtomicUsize>,
    api_calls: Arc<AtomicUsize>,
    seen_bearers: Arc<Mutex<Vec<Option<String>>>>,
) -> std::io::Result<()> {
    let mut buf = Vec::with_capacity(4096);
    let mut tmp = [0u8; 1024];
    let header_end = loop {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > 64 * 1024 {
            return Ok(());
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();

    // drain the body so the client never sees a reset mid-write
    let content_length = header_value(&head, "content-length")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(0);
    let mut remaining = content_length.saturating_sub(buf.len() - (header_end + 4));
    while remaining > 0 {
        let n = socket.read(&mut tmp).await?;
        if n == 0 {
            break;
        }
        remaining = remaining.saturating_sub(n);
    }

    let request_line = head.lines().next().unwrap_or_default();
    let path = request_line.split_whitespace().nth(1).unwrap_or_default();
    let bearer = header_value(&head, "authorization");

    let (status, body) = if path.starts_with("/auth/") {
        if auth_delay > Duration::ZERO {
            tokio::time::sleep(auth_delay).await;
        }
        if path.starts_with("/auth/refresh") {
            refresh_calls.fetch_add(1, Ordering::SeqCst);
        }
        (200, auth_body)
    } else {
        api_calls.fetch_add(1, Ordering::SeqCst);
        seen_bearers.lock().unwrap().push(bearer.clone());
        let status = match &api_mode {
            ApiMode::AcceptAll => 200,
            ApiMode::AlwaysReject => 401,
            ApiMode::RejectToken(stale) => {
                if bearer.as_deref() == Some(format!("Bearer {}", stale).as_str()) {
                    401
                } else {
                    200
                }
            }
        };
        (status, "{}".to_string())
    };

    let reason = match status {
        200 => "OK",
        401 => "Unauthorized",
        _ => "Error",
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    socket.write_all(response.as_bytes()).await?;
    socket.flush().await?;
    Ok(())
}

fn header_value(head: &str, name: &str) -> Option<String> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case(name) {
            Some(value.trim().to_string())
        } else {
            None
        }
    })
}
