// mailsentry/src/detectors/remote.rs
//
// HTTP model-service adapter.
//
// Contract (consumed):
//   POST <endpoint>/predict   {subject, sender, body_text, body_html}
//     → 200 {is_phishing: bool, confidence_score: 0-100, spam_probability: 0-100}
//   GET  <endpoint>/health    → 200 when the model is loaded
//
// Failure mapping:
//   deadline / per-call timeout exceeded   → Timeout
//   connection refused / reset             → Unreachable
//   non-2xx status                         → ProtocolError("HTTP <code>")
//   body not the documented JSON           → InvalidResponse(detail)
//
// No retries here. A failed call is an abstention for this dispatch.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use super::{Detector, DetectorKind};
use crate::config::ConfigError;
use crate::item::{DetectorError, Item, Verdict};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    subject: &'a str,
    sender: &'a str,
    body_text: &'a str,
    body_html: &'a str,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    is_phishing: bool,
    confidence_score: f64,
    spam_probability: f64,
}

impl PredictResponse {
    fn into_verdict(self) -> Result<Verdict, DetectorError> {
        if !self.confidence_score.is_finite() || !self.spam_probability.is_finite() {
            return Err(DetectorError::InvalidResponse("non-finite score".into()));
        }
        let confidence = self.confidence_score.round().clamp(0.0, 100.0) as u32;
        let indicators = if self.is_phishing {
            vec![format!("spam_probability:{:.1}%", self.spam_probability.clamp(0.0, 100.0))]
        } else {
            Vec::new()
        };
        Ok(Verdict::new(self.is_phishing, confidence, indicators))
    }
}

fn map_transport(e: reqwest::Error) -> DetectorError {
    if e.is_timeout() {
        DetectorError::Timeout
    } else if e.is_connect() || e.is_request() {
        DetectorError::Unreachable
    } else if e.is_decode() || e.is_body() {
        DetectorError::InvalidResponse(e.to_string())
    } else {
        DetectorError::ProtocolError(e.to_string())
    }
}

pub struct RemoteDetector {
    name: String,
    endpoint: String,
    timeout: Duration,
    client: Client, // shared connection pool; Client is Send + Sync
}

impl RemoteDetector {
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ConfigError::InvalidEndpoint { detector: name, endpoint });
        }
        if timeout.is_zero() {
            return Err(ConfigError::InvalidDeadline(format!("detector '{}' has a zero timeout", name)));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { name, endpoint, timeout, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn predict(&self, item: &Item) -> Result<Verdict, DetectorError> {
        let body = PredictRequest {
            subject: &item.subject,
            sender: &item.sender,
            body_text: &item.body_text,
            body_html: &item.body_html,
        };
        let resp = self
            .client
            .post(format!("{}/predict", self.endpoint))
            .json(&body)
            .send()
            .await
            .map_err(map_transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(DetectorError::ProtocolError(format!("HTTP {}", status.as_u16())));
        }

        let bytes = resp.bytes().await.map_err(map_transport)?;
        let parsed: PredictResponse = serde_json::from_slice(&bytes)
            .map_err(|e| DetectorError::InvalidResponse(e.to_string()))?;
        parsed.into_verdict()
    }

    /// Readiness probe: `GET <endpoint>/health` must answer 200.
    pub async fn health(&self) -> Result<(), DetectorError> {
        let resp = self
            .client
            .get(format!("{}/health", self.endpoint))
            .send()
            .await
            .map_err(map_transport)?;
        match resp.status().as_u16() {
            200 => Ok(()),
            code => Err(DetectorError::ProtocolError(format!("HTTP {}", code))),
        }
    }
}

#[async_trait]
impl Detector for RemoteDetector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> DetectorKind {
        DetectorKind::Remote
    }

    async fn analyze(&self, item: &Item, deadline: Instant) -> Result<Verdict, DetectorError> {
        let deadline = deadline.min(Instant::now() + self.timeout);
        let out = tokio::time::timeout_at(deadline, self.predict(item))
            .await
            .unwrap_or(Err(DetectorError::Timeout));
        debug!(detector = %self.name, endpoint = %self.endpoint, ok = out.is_ok(), "predict");
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal one-route HTTP responder. Every request gets the same canned
    /// response after `delay`. Returns the base URL.
    pub(crate) async fn stub_server(status: u16, body: &'static str, delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { break };
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 4096];
                    loop {
                        let n = match stream.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => n,
                        };
                        buf.extend_from_slice(&chunk[..n]);
                        let text = String::from_utf8_lossy(&buf);
                        if let Some(end) = text.find("\r\n\r\n") {
                            let content_len = text[..end]
                                .lines()
                                .find_map(|l| {
                                    let (k, v) = l.split_once(':')?;
                                    k.eq_ignore_ascii_case("content-length")
                                        .then(|| v.trim().parse::<usize>().ok())?
                                })
                                .unwrap_or(0);
                            if buf.len() >= end + 4 + content_len {
                                break;
                            }
                        }
                    }
                    tokio::time::sleep(delay).await;
                    let reply = format!(
                        "HTTP/1.1 {} STUB\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                        status,
                        body.len(),
                        body
                    );
                    let _ = stream.write_all(reply.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        format!("http://{}", addr)
    }

    fn item() -> Item {
        Item::new("Invoice", "billing@example.com", "Please see attached.", "")
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn maps_positive_prediction() {
        let url = stub_server(
            200,
            r#"{"is_phishing": true, "confidence_score": 87.6, "spam_probability": 91.0}"#,
            Duration::ZERO,
        )
        .await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(5)).unwrap();
        let v = d.analyze(&item(), far()).await.unwrap();
        assert!(v.is_positive);
        assert_eq!(v.confidence, 88);
        assert_eq!(v.indicators, vec!["spam_probability:91.0%".to_string()]);
        assert_eq!(d.kind(), DetectorKind::Remote);
    }

    #[tokio::test]
    async fn negative_prediction_has_no_indicators() {
        let url = stub_server(
            200,
            r#"{"is_phishing": false, "confidence_score": 12, "spam_probability": 3}"#,
            Duration::ZERO,
        )
        .await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(5)).unwrap();
        let v = d.analyze(&item(), far()).await.unwrap();
        assert!(!v.is_positive);
        assert_eq!(v.confidence, 12);
        assert!(v.indicators.is_empty());
    }

    #[tokio::test]
    async fn non_2xx_is_protocol_error() {
        let url = stub_server(503, r#"{"detail":"loading"}"#, Duration::ZERO).await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(5)).unwrap();
        let err = d.analyze(&item(), far()).await.unwrap_err();
        assert_eq!(err, DetectorError::ProtocolError("HTTP 503".into()));
    }

    #[tokio::test]
    async fn malformed_body_is_invalid_response() {
        let url = stub_server(200, r#"{"label": "spam"}"#, Duration::ZERO).await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(5)).unwrap();
        let err = d.analyze(&item(), far()).await.unwrap_err();
        assert!(matches!(err, DetectorError::InvalidResponse(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn missing_spam_probability_is_invalid_response() {
        let url = stub_server(200, r#"{"is_phishing": true, "confidence_score": 90}"#, Duration::ZERO).await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(5)).unwrap();
        let err = d.analyze(&item(), far()).await.unwrap_err();
        assert!(matches!(err, DetectorError::InvalidResponse(ref m) if m.contains("spam_probability")), "{:?}", err);
    }

    #[tokio::test]
    async fn slow_endpoint_times_out() {
        let url = stub_server(200, r#"{"is_phishing": true, "confidence_score": 90}"#, Duration::from_secs(3)).await;
        let d = RemoteDetector::new("model", url, Duration::from_millis(150)).unwrap();
        let started = Instant::now();
        let err = d.analyze(&item(), far()).await.unwrap_err();
        assert_eq!(err, DetectorError::Timeout);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn caller_deadline_wins_over_longer_timeout() {
        let url = stub_server(200, r#"{"is_phishing": true, "confidence_score": 90}"#, Duration::from_secs(3)).await;
        let d = RemoteDetector::new("model", url, Duration::from_secs(30)).unwrap();
        let err = d
            .analyze(&item(), Instant::now() + Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, DetectorError::Timeout);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let d = RemoteDetector::new("model", format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let err = d.analyze(&item(), far()).await.unwrap_err();
        assert_eq!(err, DetectorError::Unreachable);
    }

    #[tokio::test]
    async fn health_probe() {
        let up = stub_server(200, "{}", Duration::ZERO).await;
        let d = RemoteDetector::new("model", format!("{}/", up), Duration::from_secs(5)).unwrap();
        assert!(d.endpoint().ends_with(|c: char| c.is_ascii_digit()));
        assert!(d.health().await.is_ok());

        let down = stub_server(500, "{}", Duration::ZERO).await;
        let d = RemoteDetector::new("model", down, Duration::from_secs(5)).unwrap();
        assert!(d.health().await.is_err());
    }

    #[test]
    fn rejects_bad_configuration() {
        assert!(matches!(
            RemoteDetector::new("m", "localhost:8000", DEFAULT_TIMEOUT),
            Err(ConfigError::InvalidEndpoint { .. })
        ));
        assert!(matches!(
            RemoteDetector::new("m", "http://localhost:8000", Duration::ZERO),
            Err(ConfigError::InvalidDeadline(_))
        ));
    }
}
