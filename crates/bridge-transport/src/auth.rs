//! Channel authorization requests.
//!
//! Private and presence channels need a signature from the application's
//! auth endpoint. This module describes that request; sending it is up to
//! the transport.

use serde::Serialize;
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;
use url::Url;

/// Request method for every authorization request.
pub const AUTH_METHOD: &str = "POST";

/// Header value that switches the body to JSON.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Errors building an authorization request.
#[derive(Debug, Error)]
pub enum AuthBuildError {
    /// The endpoint is not a valid absolute URL.
    #[error("Invalid auth endpoint {endpoint}: {source}")]
    InvalidEndpoint {
        /// The rejected endpoint.
        endpoint: String,
        /// Parse failure.
        #[source]
        source: url::ParseError,
    },

    /// A header name is empty or contains forbidden characters.
    #[error("Invalid auth header name: {0:?}")]
    InvalidHeaderName(String),

    /// A header value contains a line break.
    #[error("Invalid value for auth header {0}")]
    InvalidHeaderValue(String),
}

/// Body of an authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthBody {
    /// `{"socket_id": ..., "channel_name": ...}`
    Json(String),
    /// `socket_id=...&channel_name=...`
    Form(String),
}

impl AuthBody {
    /// Body text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            AuthBody::Json(body) | AuthBody::Form(body) => body,
        }
    }

    /// Whether the body is JSON encoded.
    #[must_use]
    pub fn is_json(&self) -> bool {
        matches!(self, AuthBody::Json(_))
    }
}

/// An outbound authorization request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    /// Always [`AUTH_METHOD`].
    pub method: &'static str,
    /// Auth endpoint.
    pub url: Url,
    /// Headers, attached verbatim.
    pub headers: BTreeMap<String, String>,
    /// Encoded body.
    pub body: AuthBody,
}

#[derive(Serialize)]
struct AuthPayload<'a> {
    socket_id: &'a str,
    channel_name: &'a str,
}

/// Build an authorization request for one channel subscription.
///
/// # Errors
///
/// Returns an error if `endpoint` is not a valid URL.
pub fn build(
    endpoint: &str,
    headers: &BTreeMap<String, String>,
    socket_id: &str,
    channel_name: &str,
) -> Result<AuthRequest, AuthBuildError> {
    let url = parse_endpoint(endpoint)?;
    Ok(request(url, headers.clone(), socket_id, channel_name))
}

fn parse_endpoint(endpoint: &str) -> Result<Url, AuthBuildError> {
    Url::parse(endpoint).map_err(|source| AuthBuildError::InvalidEndpoint {
        endpoint: endpoint.to_string(),
        source,
    })
}

fn request(
    url: Url,
    headers: BTreeMap<String, String>,
    socket_id: &str,
    channel_name: &str,
) -> AuthRequest {
    let body = if headers.values().any(|value| value == JSON_CONTENT_TYPE) {
        let payload = AuthPayload {
            socket_id,
            channel_name,
        };
        // Two string fields cannot fail to serialize.
        AuthBody::Json(serde_json::to_string(&payload).unwrap_or_default())
    } else {
        AuthBody::Form(format!(
            "socket_id={socket_id}&channel_name={channel_name}"
        ))
    };

    trace!(channel = %channel_name, json = body.is_json(), "Built auth request");

    AuthRequest {
        method: AUTH_METHOD,
        url,
        headers,
        body,
    }
}

fn validate_header(name: &str, value: &str) -> Result<(), AuthBuildError> {
    if name.is_empty()
        || !name
            .chars()
            .all(|c| c.is_ascii() && !c.is_ascii_control() && !c.is_ascii_whitespace() && c != ':')
    {
        return Err(AuthBuildError::InvalidHeaderName(name.to_string()));
    }
    if value.contains(['\r', '\n']) {
        return Err(AuthBuildError::InvalidHeaderValue(name.to_string()));
    }
    Ok(())
}

/// A validated auth endpoint with its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequestBuilder {
    endpoint: Url,
    headers: BTreeMap<String, String>,
}

impl AuthRequestBuilder {
    /// Create a builder, validating the endpoint and every header.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint or a header is malformed.
    pub fn new(endpoint: &str, headers: BTreeMap<String, String>) -> Result<Self, AuthBuildError> {
        let endpoint = parse_endpoint(endpoint)?;
        for (name, value) in &headers {
            validate_header(name, value)?;
        }
        Ok(Self { endpoint, headers })
    }

    /// Auth endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Configured headers.
    #[must_use]
    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    /// Build the request authorizing `socket_id` on `channel_name`.
    #[must_use]
    pub fn request_for(&self, socket_id: &str, channel_name: &str) -> AuthRequest {
        request(
            self.endpoint.clone(),
            self.headers.clone(),
            socket_id,
            channel_name,
        )
    }
}

/// How the transport authorizes private and presence channels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Authorizer {
    /// No authorization configured.
    #[default]
    NoMethod,
    /// Authorize through an HTTP endpoint.
    Endpoint(AuthRequestBuilder),
}

impl Authorizer {
    /// Build the request for a channel, if an endpoint is configured.
    #[must_use]
    pub fn request_for(&self, socket_id: &str, channel_name: &str) -> Option<AuthRequest> {
        match self {
            Authorizer::NoMethod => None,
            Authorizer::Endpoint(builder) => Some(builder.request_for(socket_id, channel_name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "https://example.com/pusher/auth";

    fn headers(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_json_body_when_content_type_is_json() {
        let req = build(
            ENDPOINT,
            &headers(&[("Content-Type", "application/json")]),
            "123.456",
            "private-x",
        )
        .unwrap();

        assert_eq!(req.method, "POST");
        assert_eq!(
            req.body,
            AuthBody::Json(r#"{"socket_id":"123.456","channel_name":"private-x"}"#.into())
        );
        assert_eq!(
            req.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
    }

    #[test]
    fn test_form_body_without_json_header() {
        let req = build(ENDPOINT, &BTreeMap::new(), "123.456", "private-x").unwrap();
        assert_eq!(
            req.body,
            AuthBody::Form("socket_id=123.456&channel_name=private-x".into())
        );
        assert!(req.headers.is_empty());
    }

    #[test]
    fn test_json_match_is_on_value_and_case_sensitive() {
        let by_key = headers(&[("application/json", "text/plain")]);
        assert!(!build(ENDPOINT, &by_key, "1.2", "c").unwrap().body.is_json());

        let upper = headers(&[("Content-Type", "Application/JSON")]);
        assert!(!build(ENDPOINT, &upper, "1.2", "c").unwrap().body.is_json());

        let other_header = headers(&[("Accept", "application/json")]);
        assert!(build(ENDPOINT, &other_header, "1.2", "c").unwrap().body.is_json());
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            build("not a url", &BTreeMap::new(), "1.2", "c"),
            Err(AuthBuildError::InvalidEndpoint { .. })
        ));
        assert!(AuthRequestBuilder::new("/relative/auth", BTreeMap::new()).is_err());
    }

    #[test]
    fn test_builder_validates_headers() {
        assert!(matches!(
            AuthRequestBuilder::new(ENDPOINT, headers(&[("Bad Header", "x")])),
            Err(AuthBuildError::InvalidHeaderName(_))
        ));
        assert!(matches!(
            AuthRequestBuilder::new(ENDPOINT, headers(&[("X-Token", "a\r\nb")])),
            Err(AuthBuildError::InvalidHeaderValue(_))
        ));

        let builder =
            AuthRequestBuilder::new(ENDPOINT, headers(&[("Authorization", "Bearer t")])).unwrap();
        let req = builder.request_for("9.9", "presence-lobby");
        assert_eq!(req.url.as_str(), ENDPOINT);
        assert_eq!(req.body.as_str(), "socket_id=9.9&channel_name=presence-lobby");
    }

    #[test]
    fn test_authorizer_no_method() {
        assert!(Authorizer::NoMethod.request_for("1.1", "private-a").is_none());
    }
}
