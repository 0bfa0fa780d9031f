use arquebus::{Method, RequestConfig, RunConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Creates a run configuration with a 5s timeout and no headers or body
#[allow(dead_code)]
pub fn run_config(url: String, method: Method, concurrency: usize, total: u64) -> RunConfig {
    RunConfig {
        request: RequestConfig {
            target_url: url,
            method,
            timeout: Duration::from_secs(5),
            headers: String::new(),
            body: String::new(),
        },
        concurrency,
        total_requests: total,
    }
}

/// Starts a server that accepts connections but never answers.
/// Returns its base URL.
#[allow(dead_code)]
pub async fn hanging_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{}", addr)
}

/// Starts a server that answers every request with `200 OK` after `delay`.
/// Each connection serves one request. Returns its base URL.
#[allow(dead_code)]
pub async fn slow_server(delay: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut read = Vec::new();
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => {
                            read.extend_from_slice(&buf[..n]);
                            if read.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                tokio::time::sleep(delay).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\n{}")
                    .await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}
