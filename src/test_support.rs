//! Loopback HTTP responder for exercising the HTTP clients in tests.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A request as seen by the responder.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// e.g. `POST /api/chat HTTP/1.1`
    pub request_line: String,
    pub body: String,
}

impl SeenRequest {
    pub fn path(&self) -> &str {
        self.request_line.split_whitespace().nth(1).unwrap_or("")
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

/// Serves `responses` in order, one connection each, and returns the base
/// URL plus a handle yielding the requests received.
pub async fn serve(responses: Vec<(u16, String)>) -> (String, JoinHandle<Vec<SeenRequest>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let mut seen = Vec::new();
        for (status, body) in responses {
            let (mut stream, _) = listener.accept().await.unwrap();
            seen.push(read_request(&mut stream).await);

            let reply = format!(
                "HTTP/1.1 {} STATUS\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            stream.write_all(reply.as_bytes()).await.unwrap();
            stream.shutdown().await.ok();
        }
        seen
    });

    (base_url, handle)
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> SeenRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        let n = stream.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                let text = String::from_utf8_lossy(&buf).to_string();
                let request_line = text.lines().next().unwrap_or("").to_string();
                let body = String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).to_string();
                return SeenRequest { request_line, body };
            }
        }
    }

    let text = String::from_utf8_lossy(&buf).to_string();
    SeenRequest {
        request_line: text.lines().next().unwrap_or("").to_string(),
        body: String::new(),
    }
}
