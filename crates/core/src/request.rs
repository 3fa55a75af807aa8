use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Routing key for clean requests and their continuations.
pub const ROUTING_KEY: &str = "clean";

/// Opaque storage pagination cursor carried between clean requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Wrap a backend cursor. Empty cursors mean "no more pages".
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        (!token.is_empty()).then_some(Self(token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message asking a worker to sweep one artifact bucket.
///
/// The first message of an episode carries no token; continuations carry
/// the cursor where the previous invocation stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanRequest {
    pub artifact_bucket_id: Uuid,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_token_as_none"
    )]
    pub pagination_token: Option<ResumeToken>,
}

impl CleanRequest {
    /// Start a fresh sweep from the beginning of the bucket.
    pub fn start(artifact_bucket_id: Uuid) -> Self {
        Self {
            artifact_bucket_id,
            pagination_token: None,
        }
    }

    /// Continue a sweep from `token`.
    pub fn resume(artifact_bucket_id: Uuid, token: ResumeToken) -> Self {
        Self {
            artifact_bucket_id,
            pagination_token: Some(token),
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.pagination_token.is_none()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

fn empty_token_as_none<'de, D>(deserializer: D) -> Result<Option<ResumeToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(ResumeToken::new))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_request_omits_token() {
        let id = Uuid::new_v4();
        let body = CleanRequest::start(id).to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, serde_json::json!({"artifact_bucket_id": id.to_string()}));
    }

    #[test]
    fn continuation_carries_token() {
        let id = Uuid::new_v4();
        let token = ResumeToken::new("artifacts/jobs/j1/a.txt").unwrap();
        let request = CleanRequest::resume(id, token.clone());
        let parsed = CleanRequest::from_bytes(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.pagination_token, Some(token));
        assert!(!parsed.is_fresh());
    }

    #[test]
    fn empty_or_missing_token_is_fresh() {
        let id = Uuid::new_v4();
        for body in [
            format!(r#"{{"artifact_bucket_id":"{id}"}}"#),
            format!(r#"{{"artifact_bucket_id":"{id}","pagination_token":""}}"#),
            format!(r#"{{"artifact_bucket_id":"{id}","pagination_token":null}}"#),
        ] {
            let parsed = CleanRequest::from_bytes(body.as_bytes()).unwrap();
            assert!(parsed.is_fresh(), "{body} should parse as a fresh request");
        }
    }

    #[test]
    fn malformed_body_is_rejected() {
        assert!(CleanRequest::from_bytes(b"not json").is_err());
        assert!(CleanRequest::from_bytes(br#"{"artifact_bucket_id":"nope"}"#).is_err());
    }

    #[test]
    fn empty_resume_token_is_none() {
        assert!(ResumeToken::new("").is_none());
        assert_eq!(ResumeToken::new("x").unwrap().as_str(), "x");
    }
}
