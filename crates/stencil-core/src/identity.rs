//! Requester identity and the OSB originating-identity header codec.
//!
//! The header value is `<platform> <base64(json)>`, where the JSON object
//! carries `username`, `uid`, `groups` and `extra`.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The user on whose behalf a broker call is made.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Vec<String>>,
}

impl UserInfo {
    pub fn new(username: &str) -> Self {
        Self {
            username: username.to_string(),
            ..Default::default()
        }
    }

    pub fn with_groups<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.groups = groups.into_iter().map(Into::into).collect();
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("originating identity header must be '<platform> <value>'")]
    Malformed,
    #[error("originating identity value is not valid base64: {0}")]
    InvalidBase64(String),
    #[error("originating identity value is not valid JSON: {0}")]
    InvalidJson(String),
}

/// Decode an originating-identity header into `(platform, user)`.
pub fn decode_originating_identity(header: &str) -> Result<(String, UserInfo), IdentityError> {
    let (platform, value) = header
        .trim()
        .split_once(' ')
        .ok_or(IdentityError::Malformed)?;
    let value = value.trim();
    if platform.is_empty() || value.is_empty() {
        return Err(IdentityError::Malformed);
    }
    let raw = STANDARD
        .decode(value)
        .map_err(|e| IdentityError::InvalidBase64(e.to_string()))?;
    let user: UserInfo =
        serde_json::from_slice(&raw).map_err(|e| IdentityError::InvalidJson(e.to_string()))?;
    Ok((platform.to_string(), user))
}

/// Encode a user as an originating-identity header value.
pub fn encode_originating_identity(platform: &str, user: &UserInfo) -> String {
    // UserInfo only holds strings and string maps, so serialization cannot fail.
    let json = serde_json::to_vec(user).unwrap_or_default();
    format!("{platform} {}", STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_kubernetes_identity() {
        let json = r#"{"username":"alice","uid":"u-1","groups":["devs"],"extra":{"scopes":["a"]}}"#;
        let header = format!("kubernetes {}", STANDARD.encode(json));
        let (platform, user) = decode_originating_identity(&header).unwrap();
        assert_eq!(platform, "kubernetes");
        assert_eq!(user.username, "alice");
        assert_eq!(user.uid, "u-1");
        assert_eq!(user.groups, vec!["devs"]);
        assert_eq!(user.extra["scopes"], vec!["a"]);
    }

    #[test]
    fn test_encode_then_decode() {
        let user = UserInfo::new("bob").with_groups(["ops"]);
        let header = encode_originating_identity("kubernetes", &user);
        let (_, decoded) = decode_originating_identity(&header).unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_missing_value_is_malformed() {
        assert_eq!(
            decode_originating_identity("kubernetes"),
            Err(IdentityError::Malformed)
        );
    }

    #[test]
    fn test_bad_base64() {
        let err = decode_originating_identity("kubernetes !!!").unwrap_err();
        assert!(matches!(err, IdentityError::InvalidBase64(_)));
    }

    #[test]
    fn test_bad_json() {
        let header = format!("kubernetes {}", STANDARD.encode("not json"));
        let err = decode_originating_identity(&header).unwrap_err();
        assert!(matches!(err, IdentityError::InvalidJson(_)));
    }

    #[test]
    fn test_anonymous() {
        assert!(UserInfo::default().is_anonymous());
        assert!(!UserInfo::new("alice").is_anonymous());
    }
}
