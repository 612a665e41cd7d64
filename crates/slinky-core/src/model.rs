use crate::error::GenerateError;
use crate::shortcode::ShortCode;
use jiff::{SignedDuration, Timestamp};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// One URL to shorten.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Caller-side business identifier, carried into the outbox message.
    #[builder(setter(into))]
    pub biz_id: String,
    #[builder(default)]
    pub creator_id: i64,
    #[builder(setter(into))]
    pub original_url: String,
    /// Caller-chosen code; bypasses hashing and pool fallback.
    #[builder(default, setter(strip_option, into))]
    pub custom_code: Option<String>,
    #[builder(default, setter(into))]
    pub comment: String,
    /// How long the short link stays valid once persisted.
    pub expiration: SignedDuration,
    #[builder(default = Timestamp::now())]
    pub created_at: Timestamp,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), GenerateError> {
        validate_url(&self.original_url)?;

        if !self.expiration.is_positive() {
            return Err(GenerateError::InvalidRequest(format!(
                "expiration must be positive, got {}",
                self.expiration
            )));
        }

        if let Some(code) = &self.custom_code {
            ShortCode::new(code.as_str())?;
        }

        Ok(())
    }
}

/// Validates that the URL has a scheme and host, and that the scheme is http(s).
fn validate_url(url: &str) -> Result<(), GenerateError> {
    if url.is_empty() {
        return Err(GenerateError::InvalidRequest(
            "URL cannot be empty".to_string(),
        ));
    }

    let Some((scheme, rest)) = url.split_once("://") else {
        return Err(GenerateError::InvalidRequest(format!(
            "URL must have a valid scheme and host: {}",
            url
        )));
    };
    if scheme.is_empty() || rest.is_empty() {
        return Err(GenerateError::InvalidRequest(format!(
            "URL must have a valid scheme and host: {}",
            url
        )));
    }

    let scheme = scheme.to_ascii_lowercase();
    if scheme != "http" && scheme != "https" {
        return Err(GenerateError::InvalidRequest(format!(
            "URL scheme must be http or https: {}",
            scheme
        )));
    }

    Ok(())
}

/// Where the code in a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeSource {
    /// Derived from the URL by the hasher.
    Hashed,
    /// Reserved from the pre-generated pool after a possible collision.
    Pooled,
    /// Supplied by the caller.
    Custom,
}

/// The accumulator each stage fills in.
///
/// Only converted into a [`GenerationResult`] once the whole chain succeeds,
/// so callers never observe a partially filled value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationResponse {
    pub id: i64,
    pub short_code: Option<ShortCode>,
    pub code_source: Option<CodeSource>,
    pub expire_at: Option<Timestamp>,
}

impl GenerationResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// The code reserved from the pool, if any.
    pub fn pooled_code(&self) -> Option<&ShortCode> {
        match self.code_source {
            Some(CodeSource::Pooled) => self.short_code.as_ref(),
            _ => None,
        }
    }

    pub fn into_result(self, original_url: String) -> Result<GenerationResult, GenerateError> {
        if self.id == 0 {
            return Err(GenerateError::Configuration(
                "pipeline finished without assigning an id".to_string(),
            ));
        }
        let short_code = self
            .short_code
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                GenerateError::Configuration(
                    "pipeline finished without assigning a short code".to_string(),
                )
            })?;
        let expire_at = self.expire_at.ok_or_else(|| {
            GenerateError::Configuration(
                "pipeline finished without an expiration".to_string(),
            )
        })?;

        Ok(GenerationResult {
            id: self.id,
            original_url,
            short_code,
            expire_at,
        })
    }
}

/// A completed generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub id: i64,
    pub original_url: String,
    pub short_code: ShortCode,
    pub expire_at: Timestamp,
}

/// A durable short-link row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub id: i64,
    pub original_url: String,
    pub short_code: ShortCode,
    pub expire_at: Timestamp,
    pub comment: String,
    pub creator_id: i64,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    NotSent,
    Sent,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::NotSent => "not_sent",
            MessageStatus::Sent => "sent",
        }
    }
}

/// An event committed alongside a record for later relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub biz_id: String,
    pub message_id: String,
    pub topic: String,
    pub payload: String,
    pub status: MessageStatus,
}

impl OutboxMessage {
    /// Message ids are derived from the record id so replays stay idempotent.
    pub fn message_id_for(id: i64) -> String {
        format!("gen-{id}")
    }

    /// Builds the "new mapping" notification for a freshly persisted record.
    pub fn for_record(
        biz_id: impl Into<String>,
        topic: impl Into<String>,
        record: &PersistedRecord,
    ) -> Result<Self, GenerateError> {
        let payload = serde_json::to_string(&RecordCreated::from(record))
            .map_err(|e| GenerateError::Relay(format!("failed to encode outbox payload: {e}")))?;
        Ok(Self {
            biz_id: biz_id.into(),
            message_id: Self::message_id_for(record.id),
            topic: topic.into(),
            payload,
            status: MessageStatus::NotSent,
        })
    }
}

#[derive(Serialize)]
struct RecordCreated<'a> {
    id: i64,
    original_url: &'a str,
    short_code: &'a str,
    expire_at: Timestamp,
}

impl<'a> From<&'a PersistedRecord> for RecordCreated<'a> {
    fn from(record: &'a PersistedRecord) -> Self {
        Self {
            id: record.id,
            original_url: &record.original_url,
            short_code: record.short_code.as_str(),
            expire_at: record.expire_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> GenerationRequest {
        GenerationRequest::builder()
            .biz_id("biz-1")
            .original_url(url)
            .expiration(SignedDuration::from_hours(24))
            .build()
    }

    #[test]
    fn valid_request_passes() {
        assert!(request("https://example.com/a?b=c").validate().is_ok());
    }

    #[test]
    fn rejects_bad_urls() {
        for url in ["", "not-a-url", "ftp://example.com", "https://", "://x"] {
            let err = request(url).validate().unwrap_err();
            assert!(matches!(err, GenerateError::InvalidRequest(_)), "{url}");
        }
    }

    #[test]
    fn rejects_non_positive_expiration() {
        let mut req = request("https://example.com");
        req.expiration = SignedDuration::ZERO;
        assert!(matches!(
            req.validate(),
            Err(GenerateError::InvalidRequest(_))
        ));
    }

    #[test]
    fn rejects_invalid_custom_code() {
        let req = GenerationRequest::builder()
            .biz_id("biz")
            .original_url("https://example.com")
            .custom_code("a b")
            .expiration(SignedDuration::from_hours(1))
            .build();
        assert!(req.validate().is_err());
    }

    #[test]
    fn incomplete_response_is_rejected() {
        let resp = GenerationResponse {
            id: 42,
            short_code: None,
            code_source: None,
            expire_at: Some(Timestamp::UNIX_EPOCH),
        };
        let err = resp.into_result("https://example.com".into()).unwrap_err();
        assert!(matches!(err, GenerateError::Configuration(_)));
    }

    #[test]
    fn pooled_code_only_for_pool_source() {
        let mut resp = GenerationResponse::new();
        resp.short_code = Some(ShortCode::new_unchecked("abc"));
        resp.code_source = Some(CodeSource::Hashed);
        assert!(resp.pooled_code().is_none());
        resp.code_source = Some(CodeSource::Pooled);
        assert_eq!(resp.pooled_code().unwrap().as_str(), "abc");
    }

    #[test]
    fn outbox_message_for_record() {
        let record = PersistedRecord {
            id: 77,
            original_url: "https://example.com".into(),
            short_code: ShortCode::new_unchecked("abc123"),
            expire_at: Timestamp::from_second(100).unwrap(),
            comment: String::new(),
            creator_id: 1,
            created_at: Timestamp::from_second(1).unwrap(),
            updated_at: Timestamp::from_second(1).unwrap(),
        };
        let msg = OutboxMessage::for_record("biz-9", "generator_events", &record).unwrap();
        assert_eq!(msg.message_id, "gen-77");
        assert_eq!(msg.status, MessageStatus::NotSent);
        assert!(msg.payload.contains("\"short_code\":\"abc123\""));
    }
}
