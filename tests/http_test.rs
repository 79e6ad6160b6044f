use anyhow::Result;
use archgen::generator::http::HttpGenerator;
use archgen::generator::{CodeGenerator, ElementParams, GenerationError};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// One-shot HTTP server: answers the first request with `status_line` and `body`,
/// and yields the JSON body it received.
async fn serve_once(status_line: &'static str, body: String) -> Result<(String, JoinHandle<Result<Value>>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}/api/langchain/req_ui_component", listener.local_addr()?);

    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await?;

        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        let (header_end, content_length) = loop {
            let n = socket.read(&mut buf).await?;
            anyhow::ensure!(n > 0, "client closed before sending headers");
            received.extend_from_slice(&buf[..n]);
            if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
                let headers = String::from_utf8_lossy(&received[..pos]).to_ascii_lowercase();
                let length = headers
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                break (pos + 4, length);
            }
        };
        while received.len() < header_end + content_length {
            let n = socket.read(&mut buf).await?;
            anyhow::ensure!(n > 0, "client closed mid-body");
            received.extend_from_slice(&buf[..n]);
        }

        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await?;
        socket.shutdown().await?;

        let sent: Value = serde_json::from_slice(&received[header_end..header_end + content_length])?;
        Ok::<Value, anyhow::Error>(sent)
    });

    Ok((url, handle))
}

fn generator(url: &str) -> Result<HttpGenerator> {
    Ok(HttpGenerator::new(url, Duration::from_secs(5))?)
}

#[tokio::test]
async fn test_success_envelope_yields_fragment() -> Result<()> {
    let reply = json!({
        "status": "Success",
        "message": {
            "jsx_code": "export const Login = () => <button>Login</button>;",
            "component_name": "Login",
            "imports": ["react"]
        }
    });
    let (url, server) = serve_once("200 OK", reply.to_string()).await?;

    let params = ElementParams::new("button").label("Login").into_parameters();
    let fragment = generator(&url)?.generate("header", &params).await?;

    assert_eq!(fragment.component_name, "Login");
    assert!(fragment.source.contains("<button>"));
    assert_eq!(fragment.imports, vec!["react"]);

    // request body is { newId, targetId, ...parameters }
    let sent = server.await??;
    assert_eq!(sent["targetId"], "header");
    assert_eq!(sent["type"], "button");
    assert_eq!(sent["label"], "Login");
    assert!(sent["newId"].as_str().is_some_and(|s| !s.is_empty()));
    Ok(())
}

#[tokio::test]
async fn test_data_field_is_accepted() -> Result<()> {
    let reply = json!({ "data": { "jsx_code": "{}", "component_name": "Empty" } });
    let (url, server) = serve_once("200 OK", reply.to_string()).await?;

    let fragment = generator(&url)?.generate("root", &ElementParams::new("text").into_parameters()).await?;
    assert_eq!(fragment.component_name, "Empty");
    server.await??;
    Ok(())
}

#[tokio::test]
async fn test_non_success_status_is_a_server_error() -> Result<()> {
    let (url, server) = serve_once("500 Internal Server Error", "model overloaded".to_string()).await?;

    let err = generator(&url)?
        .generate("root", &ElementParams::new("text").into_parameters())
        .await
        .unwrap_err();
    assert_eq!(err, GenerationError::Server { status: 500, message: "model overloaded".to_string() });
    assert_eq!(err.kind(), "server");
    server.await??;
    Ok(())
}

#[tokio::test]
async fn test_failed_envelope_is_a_server_error() -> Result<()> {
    let reply = json!({ "status": "Error", "message": "unsupported component" });
    let (url, server) = serve_once("200 OK", reply.to_string()).await?;

    let err = generator(&url)?
        .generate("root", &ElementParams::new("text").into_parameters())
        .await
        .unwrap_err();
    match err {
        GenerationError::Server { status, message } => {
            assert_eq!(status, 200);
            assert!(message.contains("unsupported component"));
        }
        other => panic!("expected server error, got {:?}", other),
    }
    server.await??;
    Ok(())
}

#[tokio::test]
async fn test_unparseable_reply_is_a_decode_error() -> Result<()> {
    let (url, server) = serve_once("200 OK", "<html>oops</html>".to_string()).await?;

    let err = generator(&url)?
        .generate("root", &ElementParams::new("text").into_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "decode");
    server.await??;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_service_is_a_transport_error() -> Result<()> {
    // grab a free port, then close it
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let err = generator(&format!("http://{}/api", addr))?
        .generate("root", &ElementParams::new("text").into_parameters())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "transport");
    Ok(())
}
