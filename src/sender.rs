use async_trait::async_trait;
use serde::Serialize;

use crate::error::SendError;
use crate::signing::{compute_signature, SignatureAlgorithm};

pub const MIME_APPLICATION_JSON: &str = "application/json";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_ACCEPT: &str = "Accept";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_SIGNATURE: &str = "Signature";

/// Where the signature goes on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignaturePlacement {
    /// `Authorization: Signature <hex>`
    Authorization,
    /// `Signature: <hex>`, used by the gateway protocol.
    SignatureHeader,
}

/// A fully built, signed webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookRequest {
    pub url: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    /// Serialize `payload`, sign it and attach the JSON headers.
    pub fn signed<T: Serialize>(
        url: &str,
        payload: &T,
        algorithm: SignatureAlgorithm,
        secret_key: &str,
        placement: SignaturePlacement,
    ) -> Result<Self, SendError> {
        let url = validate_url(url)?;
        let body = serde_json::to_vec(payload).map_err(|e| SendError::Encoding(e.to_string()))?;
        let signature = compute_signature(algorithm, &body, secret_key);

        let signature_header = match placement {
            SignaturePlacement::Authorization => (HEADER_AUTHORIZATION, format!("Signature {signature}")),
            SignaturePlacement::SignatureHeader => (HEADER_SIGNATURE, signature),
        };

        Ok(Self {
            url,
            headers: vec![
                (HEADER_CONTENT_TYPE, MIME_APPLICATION_JSON.to_string()),
                (HEADER_ACCEPT, MIME_APPLICATION_JSON.to_string()),
                signature_header,
            ],
            body,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Merchant response to a webhook request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookResponse {
    pub status: u16,
    pub body: String,
}

impl WebhookResponse {
    pub fn new(status: u16) -> Self {
        Self { status, body: String::new() }
    }

    /// 200 and 204 are the only statuses accepted as delivered.
    pub fn is_delivered(&self) -> bool {
        self.status == 200 || self.status == 204
    }

    /// 422 is the merchant explicitly refusing the order.
    pub fn is_rejected(&self) -> bool {
        self.status == 422
    }
}

/// Executes signed webhook requests.
#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, SendError>;
}

pub fn validate_url(raw: &str) -> Result<String, SendError> {
    if raw.is_empty() {
        return Err(SendError::EmptyUrl);
    }
    let parsed = url::Url::parse(raw).map_err(|e| SendError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(SendError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", parsed.scheme()),
        });
    }
    Ok(parsed.to_string())
}

/// reqwest-backed sender. The timeout bounds a hung merchant endpoint.
#[cfg(feature = "http")]
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

#[cfg(feature = "http")]
impl HttpSender {
    pub fn new(timeout: std::time::Duration) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SendError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http")]
#[async_trait]
impl Sender for HttpSender {
    async fn send(&self, request: WebhookRequest) -> Result<WebhookResponse, SendError> {
        let mut builder = self.client.post(&request.url).body(request.body.clone());
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(|err| {
            if err.is_timeout() {
                SendError::Timeout
            } else {
                SendError::Network(err.to_string())
            }
        })?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        tracing::debug!(url = %request.url, status, "webhook request completed");
        Ok(WebhookResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::verify_signature;

    #[test]
    fn signed_request_carries_json_headers_and_authorization() {
        let payload = serde_json::json!({"id": "1"});
        let request = WebhookRequest::signed(
            "http://localhost/process",
            &payload,
            SignatureAlgorithm::Sha256,
            "Unit Test",
            SignaturePlacement::Authorization,
        )
        .expect("request");

        assert_eq!(request.header("content-type"), Some(MIME_APPLICATION_JSON));
        assert_eq!(request.header(HEADER_ACCEPT), Some(MIME_APPLICATION_JSON));

        let auth = request.header(HEADER_AUTHORIZATION).expect("authorization");
        let signature = crate::signing::parse_authorization_header(auth).expect("signature");
        assert!(verify_signature(SignatureAlgorithm::Sha256, &request.body, "Unit Test", signature));
        assert!(request.header(HEADER_SIGNATURE).is_none());
    }

    #[test]
    fn gateway_placement_uses_signature_header() {
        let request = WebhookRequest::signed(
            "https://merchant.example/callback",
            &serde_json::json!({}),
            SignatureAlgorithm::Sha512,
            "k",
            SignaturePlacement::SignatureHeader,
        )
        .expect("request");

        assert_eq!(request.header(HEADER_SIGNATURE).map(str::len), Some(128));
        assert!(request.header(HEADER_AUTHORIZATION).is_none());
    }

    #[test]
    fn url_validation() {
        assert!(matches!(validate_url(""), Err(SendError::EmptyUrl)));
        assert!(matches!(validate_url("not a url"), Err(SendError::InvalidUrl { .. })));
        assert!(matches!(validate_url("ftp://host/x"), Err(SendError::InvalidUrl { .. })));
        assert!(validate_url("http://localhost/process").is_ok());
    }

    #[test]
    fn response_classification() {
        assert!(WebhookResponse::new(200).is_delivered());
        assert!(WebhookResponse::new(204).is_delivered());
        assert!(!WebhookResponse::new(201).is_delivered());
        assert!(WebhookResponse::new(422).is_rejected());
    }
}
