//! Shared utilities for integration testing.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const HEADER: &str = "#butlerstart";
pub const FOOTER: &str = "#butlerend";

/// Wrap a body in the sentinel lines every trusted fragment carries.
pub fn fragment(body: &str) -> String {
    format!("{HEADER}\n{body}\n{FOOTER}\n")
}

#[derive(Clone)]
struct Route {
    /// Responses served in order; the last one repeats.
    responses: VecDeque<(u16, String)>,
    delay: Duration,
    /// Authorization scheme prefix required, and the challenge sent without it.
    auth: Option<(String, String)>,
}

/// A request as the mock saw it. Header names are lowercased.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[allow(dead_code)]
impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Default)]
struct MockState {
    routes: HashMap<String, Route>,
    hits: HashMap<String, u32>,
    requests: HashMap<String, Vec<RecordedRequest>>,
}

/// Raw-TCP HTTP/1.1 mock with per-path responses and hit counters.
///
/// Unknown paths answer 404.
#[derive(Clone)]
pub struct MockServer {
    pub addr: SocketAddr,
    state: Arc<Mutex<MockState>>,
}

#[allow(dead_code)]
impl MockServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(MockState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, _)) => {
                        let state = shared.clone();
                        tokio::spawn(async move { serve(socket, state).await });
                    }
                    Err(_) => break,
                }
            }
        });

        Self { addr, state }
    }

    /// `host:port`, usable as a repo name for the http method.
    pub fn authority(&self) -> String {
        self.addr.to_string()
    }

    pub fn set(&self, path: &str, status: u16, body: &str) {
        self.set_sequence(path, &[(status, body)]);
    }

    pub fn set_sequence(&self, path: &str, responses: &[(u16, &str)]) {
        let mut state = self.state.lock().unwrap();
        let (delay, auth) = state
            .routes
            .get(path)
            .map(|r| (r.delay, r.auth.clone()))
            .unwrap_or_default();
        state.routes.insert(
            path.to_string(),
            Route {
                responses: responses.iter().map(|(s, b)| (*s, b.to_string())).collect(),
                delay,
                auth,
            },
        );
    }

    /// Answer 401 with `WWW-Authenticate: challenge` unless the request's
    /// Authorization header starts with `scheme`.
    pub fn require_auth(&self, path: &str, scheme: &str, challenge: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(route) = state.routes.get_mut(path) {
            route.auth = Some((scheme.to_string(), challenge.to_string()));
        }
    }

    pub fn requests(&self, path: &str) -> Vec<RecordedRequest> {
        self.state.lock().unwrap().requests.get(path).cloned().unwrap_or_default()
    }

    pub fn last_request(&self, path: &str) -> Option<RecordedRequest> {
        self.requests(path).pop()
    }

    pub fn set_delay(&self, path: &str, delay: Duration) {
        let mut state = self.state.lock().unwrap();
        if let Some(route) = state.routes.get_mut(path) {
            route.delay = delay;
        }
    }

    pub fn hits(&self, path: &str) -> u32 {
        self.state.lock().unwrap().hits.get(path).copied().unwrap_or(0)
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn serve(mut socket: TcpStream, state: Arc<Mutex<MockState>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("GET").to_string();
    let path = request_line.next().unwrap_or("/").to_string();
    let headers: HashMap<String, String> = head
        .lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_ascii_lowercase(), value.trim().to_string()))
        .collect();
    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
    let request_body = buf[header_end..].to_vec();

    let (status, body, delay, challenge) = {
        let mut state = state.lock().unwrap();
        *state.hits.entry(path.clone()).or_insert(0) += 1;
        let authorization = headers.get("authorization").cloned().unwrap_or_default();
        state.requests.entry(path.clone()).or_default().push(RecordedRequest {
            method,
            headers,
            body: request_body,
        });
        match state.routes.get_mut(&path) {
            Some(route) => match &route.auth {
                Some((scheme, challenge)) if !authorization.starts_with(scheme.as_str()) => {
                    (401, String::new(), route.delay, Some(challenge.clone()))
                }
                _ => {
                    let (status, body) = if route.responses.len() > 1 {
                        route.responses.pop_front().unwrap()
                    } else {
                        route.responses.front().cloned().unwrap_or((200, String::new()))
                    };
                    (status, body, route.delay, None)
                }
            },
            None => (404, "not found".to_string(), Duration::ZERO, None),
        }
    };

    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let extra = challenge
        .map(|c| format!("WWW-Authenticate: {c}\r\n"))
        .unwrap_or_default();
    let response = format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        extra,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}

/// TOML config for one manager pulling `primary`/`additional` over http from `mock`.
#[allow(dead_code)]
pub fn http_manager_toml(
    mock: &MockServer,
    dest: &Path,
    status_file: &Path,
    primary: &[&str],
    additional: &[&str],
    extra: &str,
) -> String {
    let list = |files: &[&str]| {
        files
            .iter()
            .map(|f| format!("\"{f}\""))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        r#"
[globals]
status_file = "{status}"

[[managers]]
name = "prometheus"
dest_path = "{dest}"
primary_config_name = "prometheus.yml"
{extra}

  [managers.http]
  timeout_secs = 2
  retries = 2
  retry_wait_min_ms = 10
  retry_wait_max_ms = 20

  [managers.reloader]
  method = "http"

  [managers.reloader.http]
  host = "127.0.0.1"
  port = {port}
  uri = "/-/reload"
  retries = 3
  retry_wait_min_ms = 10
  retry_wait_max_ms = 20

  [[managers.repos]]
  name = "{authority}"
  method = "http"
  repo_path = "/configs"
  primary_config = [{primary}]
  additional_config = [{additional}]
"#,
        status = status_file.display(),
        dest = dest.display(),
        port = mock.addr.port(),
        authority = mock.authority(),
        primary = list(primary),
        additional = list(additional),
    )
}
