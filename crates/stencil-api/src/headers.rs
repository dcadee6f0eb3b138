//! OSB request headers: protocol version and originating identity.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;
use semver::Version;
use stencil_core::UserInfo;
use stencil_core::identity::decode_originating_identity;

use crate::ApiState;
use crate::error::ApiError;

pub const API_VERSION_HEADER: &str = "X-Broker-API-Version";
pub const ORIGINATING_IDENTITY_HEADER: &str = "X-Broker-API-Originating-Identity";

/// Parse `major.minor` (or a full semver) into a `Version`.
pub fn parse_api_version(raw: &str) -> Option<Version> {
    let raw = raw.trim();
    let normalized = match raw.matches('.').count() {
        0 => format!("{raw}.0.0"),
        1 => format!("{raw}.0"),
        _ => raw.to_string(),
    };
    Version::parse(&normalized).ok()
}

fn check_version(headers: &HeaderMap, min: &Version) -> Result<(), ApiError> {
    let raw = headers
        .get(API_VERSION_HEADER)
        .ok_or_else(|| ApiError::VersionMismatch(format!("{API_VERSION_HEADER} header is required")))?
        .to_str()
        .map_err(|_| ApiError::VersionMismatch(format!("{API_VERSION_HEADER} is not valid text")))?;
    let version = parse_api_version(raw)
        .ok_or_else(|| ApiError::VersionMismatch(format!("unparseable {API_VERSION_HEADER}: {raw:?}")))?;
    if version.major != min.major || version < *min {
        return Err(ApiError::VersionMismatch(format!(
            "unsupported {API_VERSION_HEADER} {raw}, need {}.{} or later {}.x",
            min.major, min.minor, min.major
        )));
    }
    Ok(())
}

fn originating_identity(headers: &HeaderMap) -> Result<UserInfo, ApiError> {
    let Some(value) = headers.get(ORIGINATING_IDENTITY_HEADER) else {
        return Ok(UserInfo::default());
    };
    let value = value
        .to_str()
        .map_err(|_| ApiError::BadRequest(format!("{ORIGINATING_IDENTITY_HEADER} is not valid text")))?;
    let (_platform, user) = decode_originating_identity(value)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(user)
}

/// The validated OSB headers of a request. Extraction fails unless the
/// version header is compatible.
#[derive(Debug, Clone)]
pub struct OsbHeaders {
    /// Anonymous (empty username) when no identity header was sent.
    pub actor: UserInfo,
}

impl FromRequestParts<ApiState> for OsbHeaders {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &ApiState) -> Result<Self, Self::Rejection> {
        check_version(&parts.headers, &state.min_api_version)?;
        let actor = originating_identity(&parts.headers)?;
        Ok(Self { actor })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderName, HeaderValue};
    use stencil_core::identity::encode_originating_identity;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(
                HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        map
    }

    #[test]
    fn versions_parse_with_missing_components() {
        assert_eq!(parse_api_version("2.7"), Some(Version::new(2, 7, 0)));
        assert_eq!(parse_api_version("2"), Some(Version::new(2, 0, 0)));
        assert_eq!(parse_api_version("2.13.1"), Some(Version::new(2, 13, 1)));
        assert_eq!(parse_api_version("two"), None);
    }

    #[test]
    fn version_check() {
        let min = Version::new(2, 7, 0);
        assert!(check_version(&headers(&[(API_VERSION_HEADER, "2.13")]), &min).is_ok());
        assert!(check_version(&headers(&[(API_VERSION_HEADER, "2.7")]), &min).is_ok());
        assert!(matches!(
            check_version(&headers(&[(API_VERSION_HEADER, "2.6")]), &min),
            Err(ApiError::VersionMismatch(_))
        ));
        assert!(matches!(
            check_version(&headers(&[(API_VERSION_HEADER, "3.0")]), &min),
            Err(ApiError::VersionMismatch(_))
        ));
        assert!(matches!(check_version(&headers(&[]), &min), Err(ApiError::VersionMismatch(_))));
    }

    #[test]
    fn identity_header() {
        assert!(originating_identity(&headers(&[])).unwrap().is_anonymous());

        let alice = UserInfo::new("alice").with_groups(["devs"]);
        let encoded = encode_originating_identity("stencil", &alice);
        let decoded = originating_identity(&headers(&[(ORIGINATING_IDENTITY_HEADER, &encoded)])).unwrap();
        assert_eq!(decoded, alice);

        assert!(matches!(
            originating_identity(&headers(&[(ORIGINATING_IDENTITY_HEADER, "garbage")])),
            Err(ApiError::BadRequest(_))
        ));
    }
}
