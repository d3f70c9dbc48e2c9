//! Shared deploy secrets and their verification

use std::fmt;

use http::HeaderMap;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use subtle::ConstantTimeEq;

use control_api::{SECRET_HEADER, SECRET_PARAM};

/// Compare a provided credential against the expected secret.
///
/// An empty expected secret never matches. Content comparison is constant
/// time; only the lengths may leak.
pub fn verify(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();

    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }

    expected.ct_eq(provided).into()
}

/// A bearer credential shared between the workbench and one instance.
///
/// Never printed by `Debug`; serialized in clear only where the settings
/// or registry files need it.
pub struct DeploySecret(SecretString);

impl DeploySecret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Generate a fresh random secret
    pub fn generate() -> Self {
        Self::new(crate::utils::generate_secret())
    }

    /// Expose the secret value for use on the wire
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.expose().is_empty()
    }

    /// Check a provided credential against this secret
    pub fn matches(&self, provided: &str) -> bool {
        verify(self.expose(), provided)
    }
}

impl Default for DeploySecret {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Clone for DeploySecret {
    fn clone(&self) -> Self {
        Self::new(self.expose().to_owned())
    }
}

impl fmt::Debug for DeploySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            f.write_str("[EMPTY]")
        } else {
            f.write_str("[REDACTED]")
        }
    }
}

impl Serialize for DeploySecret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.expose())
    }
}

impl<'de> Deserialize<'de> for DeploySecret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Self::new(String::deserialize(deserializer)?))
    }
}

/// Pull the credential presented with an inbound request.
///
/// Precedence: `X-Deploy-Secret` header, `Authorization: Bearer` header,
/// `secret` query parameter, `secret` field of a JSON or form body.
pub fn provided_secret(headers: &HeaderMap, query: Option<&str>, body: &[u8]) -> Option<String> {
    if let Some(value) = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }

    if let Some(token) = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    {
        return Some(token.trim().to_string());
    }

    if let Some(value) = query.and_then(form_param) {
        return Some(value);
    }

    if body.is_empty() {
        return None;
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_slice(body) {
        return map
            .get(SECRET_PARAM)
            .and_then(|v| v.as_str())
            .map(str::to_string);
    }

    std::str::from_utf8(body).ok().and_then(form_param)
}

fn form_param(encoded: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded.as_bytes())
        .find(|(key, _)| key == SECRET_PARAM)
        .map(|(_, value)| value.into_owned())
}
