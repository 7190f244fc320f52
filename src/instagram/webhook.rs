//! # Instagram webhook payloads and signature verification
//!
//! Meta signs every delivery with `X-Hub-Signature-256: sha256=<hex>`, an
//! HMAC-SHA256 of the raw request body keyed with the app secret.

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";
const SIGNATURE_PREFIX: &str = "sha256=";

/// The `object` value of Instagram deliveries.
pub const INSTAGRAM_OBJECT: &str = "instagram";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEntry {
    /// Account the delivery is for
    pub id: String,
    #[serde(default)]
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEvent {
    pub sender: Participant,
    pub recipient: Participant,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub message: Option<EventMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default)]
    pub mid: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub is_echo: bool,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
}

impl EventMessage {
    /// URL of the first audio attachment, if any.
    pub fn audio_url(&self) -> Option<&str> {
        self.attachments
            .iter()
            .filter(|a| a.kind == "audio")
            .find_map(|a| a.payload.as_ref().and_then(|p| p.url.as_deref()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("missing X-Hub-Signature-256 header")]
    MissingSignature,
    #[error("invalid signature format: {0}")]
    InvalidSignatureFormat(&'static str),
    #[error("signature verification failed")]
    VerificationFailed,
}

/// Verifies `X-Hub-Signature-256` against the raw body in constant time.
pub fn verify_signature(
    body: &[u8],
    signature_header: Option<&str>,
    app_secret: &str,
) -> Result<(), VerificationError> {
    let header = signature_header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(VerificationError::MissingSignature)?;

    let provided_hex = header
        .strip_prefix(SIGNATURE_PREFIX)
        .ok_or(VerificationError::InvalidSignatureFormat("must start with 'sha256='"))?;
    let provided = hex::decode(provided_hex)
        .map_err(|_| VerificationError::InvalidSignatureFormat("invalid hex"))?;

    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    let expected = mac.finalize().into_bytes();

    debug!(body_size = body.len(), "Verifying webhook signature");

    if subtle::ConstantTimeEq::ct_eq(expected.as_slice(), provided.as_slice()).into() {
        Ok(())
    } else {
        Err(VerificationError::VerificationFailed)
    }
}

/// Computes the `sha256=<hex>` header value for `body`.
pub fn sign_payload(body: &[u8], app_secret: &str) -> Result<String, VerificationError> {
    let mut mac = HmacSha256::new_from_slice(app_secret.as_bytes())
        .map_err(|_| VerificationError::VerificationFailed)?;
    mac.update(body);
    Ok(format!(
        "{}{}",
        SIGNATURE_PREFIX,
        hex::encode(mac.finalize().into_bytes())
    ))
}

/// Builds a single-message text delivery, as the platform would send it.
pub fn text_message_payload(
    recipient_id: &str,
    sender_id: &str,
    text: &str,
    mid: &str,
) -> WebhookPayload {
    let now = chrono::Utc::now().timestamp_millis();
    WebhookPayload {
        object: INSTAGRAM_OBJECT.to_string(),
        entry: vec![WebhookEntry {
            id: recipient_id.to_string(),
            time: Some(now),
            messaging: vec![MessagingEvent {
                sender: Participant {
                    id: sender_id.to_string(),
                },
                recipient: Participant {
                    id: recipient_id.to_string(),
                },
                timestamp: Some(now),
                message: Some(EventMessage {
                    mid: Some(mid.to_string()),
                    text: Some(text.to_string()),
                    is_echo: false,
                    attachments: Vec::new(),
                }),
            }],
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_signature_accepted() {
        let body = br#"{"object":"instagram","entry":[]}"#;
        let header = sign_payload(body, "app-secret").unwrap();
        assert!(verify_signature(body, Some(&header), "app-secret").is_ok());
    }

    #[test]
    fn test_signature_with_other_secret_rejected() {
        let body = b"{}";
        let header = sign_payload(body, "other-secret").unwrap();
        assert!(matches!(
            verify_signature(body, Some(&header), "app-secret"),
            Err(VerificationError::VerificationFailed)
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let header = sign_payload(b"{\"a\":1}", "s").unwrap();
        assert!(verify_signature(b"{\"a\":2}", Some(&header), "s").is_err());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            verify_signature(b"{}", None, "s"),
            Err(VerificationError::MissingSignature)
        ));
        assert!(matches!(
            verify_signature(b"{}", Some("sha1=abcd"), "s"),
            Err(VerificationError::InvalidSignatureFormat(_))
        ));
        assert!(matches!(
            verify_signature(b"{}", Some("sha256=zz"), "s"),
            Err(VerificationError::InvalidSignatureFormat(_))
        ));
    }

    #[test]
    fn test_payload_parsing_with_voice_note() {
        let raw = r#"{
            "object": "instagram",
            "entry": [{
                "id": "17841400000000001",
                "time": 1700000000000,
                "messaging": [{
                    "sender": {"id": "igsid-1"},
                    "recipient": {"id": "17841400000000001"},
                    "timestamp": 1700000000000,
                    "message": {
                        "mid": "m_1",
                        "attachments": [{"type": "audio", "payload": {"url": "https://cdn.example/a.mp4"}}]
                    }
                }]
            }]
        }"#;

        let payload: WebhookPayload = serde_json::from_str(raw).unwrap();
        let message = payload.entry[0].messaging[0].message.as_ref().unwrap();
        assert!(message.text.is_none());
        assert!(!message.is_echo);
        assert_eq!(message.audio_url(), Some("https://cdn.example/a.mp4"));
    }

    #[test]
    fn test_non_audio_attachment_has_no_voice_url() {
        let message = EventMessage {
            mid: None,
            text: None,
            is_echo: false,
            attachments: vec![Attachment {
                kind: "image".to_string(),
                payload: Some(AttachmentPayload {
                    url: Some("https://cdn.example/i.jpg".to_string()),
                }),
            }],
        };
        assert_eq!(message.audio_url(), None);
    }
}
