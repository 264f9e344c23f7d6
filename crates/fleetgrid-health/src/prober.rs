//! Probe transport.
//!
//! The transport is an injected capability so probe-based checkers can
//! be tested deterministically with a scripted fake. Production uses a
//! one-shot hyper HTTP/1.1 POST per probe with a hard deadline.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::BodyExt;
use tracing::debug;

/// Sends one probe request and returns the response body.
///
/// `None` covers timeout, connection error, and non-2xx alike — the
/// caller treats all of them as a single untouched cycle and never
/// retries within the same pass.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, path: &str, payload: &[u8], timeout: Duration)
    -> Option<Bytes>;
}

/// HTTP/1.1 prober used in production.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpProber;

#[async_trait]
impl Prober for HttpProber {
    async fn probe(
        &self,
        address: &str,
        path: &str,
        payload: &[u8],
        timeout: Duration,
    ) -> Option<Bytes> {
        let uri = format!("http://{address}{path}");
        let body = Bytes::copy_from_slice(payload);

        let result = tokio::time::timeout(timeout, async {
            let stream = match tokio::net::TcpStream::connect(address).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, %uri, "probe connection failed");
                    return None;
                }
            };

            let io = hyper_util::rt::TokioIo::new(stream);
            let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
                Ok(pair) => pair,
                Err(e) => {
                    debug!(error = %e, %uri, "probe handshake failed");
                    return None;
                }
            };

            // Drive the connection in the background.
            tokio::spawn(async move {
                let _ = conn.await;
            });

            let req = http::Request::builder()
                .method("POST")
                .uri(&uri)
                .header("host", address)
                .header("content-type", "application/json")
                .header("user-agent", "fleetgrid-health/0.1")
                .body(http_body_util::Full::new(body))
                .ok()?;

            let resp = match sender.send_request(req).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(error = %e, %uri, "probe request failed");
                    return None;
                }
            };

            if !resp.status().is_success() {
                debug!(status = %resp.status(), %uri, "probe non-2xx");
                return None;
            }

            match resp.into_body().collect().await {
                Ok(collected) => Some(collected.to_bytes()),
                Err(e) => {
                    debug!(error = %e, %uri, "probe body read failed");
                    None
                }
            }
        })
        .await;

        match result {
            Ok(body) => body,
            Err(_) => {
                debug!(%uri, "probe timed out");
                None
            }
        }
    }
}
