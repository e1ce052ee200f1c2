//! OpenID Connect ID token claims.
//!
//! Tokens are decoded without signature verification; they arrive over TLS straight from
//! the token endpoint and only feed cache identity and the result's user view.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::de::DeserializeOwned;
// self
use crate::_prelude::*;

/// Errors raised while decoding ID tokens or client-info blobs.
#[derive(Debug, ThisError)]
pub enum IdentityError {
	/// The JWT did not contain three dot-separated segments.
	#[error("ID token is not a compact JWT.")]
	MalformedJwt,
	/// A segment was not valid base64url.
	#[error("Identity payload is not valid base64url.")]
	Base64(#[from] base64::DecodeError),
	/// A decoded payload was not the expected JSON shape.
	#[error("Identity payload is not valid JSON.")]
	Json(#[from] serde_json::Error),
}

/// Claims the client reads from an ID token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
	/// Issuer.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub iss: Option<String>,
	/// Subject.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sub: Option<String>,
	/// Object identifier of the user.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub oid: Option<String>,
	/// Tenant identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tid: Option<String>,
	/// Display name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Sign-in name as typed by the user.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub preferred_username: Option<String>,
	/// User principal name (v1 tokens).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub upn: Option<String>,
	/// Email address.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
	/// Expiry (unix seconds).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub exp: Option<i64>,
}
impl IdTokenClaims {
	/// Best displayable identifier: `preferred_username`, then `upn`, then `email`.
	pub fn displayable_id(&self) -> Option<&str> {
		self.preferred_username.as_deref().or(self.upn.as_deref()).or(self.email.as_deref())
	}
}

/// Raw ID token paired with its decoded claims.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdToken {
	raw: String,
	claims: IdTokenClaims,
}
impl IdToken {
	/// Decodes the payload segment of a compact JWT.
	pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
		let raw = raw.into();
		let claims = decode_jwt_payload(&raw)?;

		Ok(Self { raw, claims })
	}

	/// Raw token string as returned by the authority.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Decoded claims.
	pub fn claims(&self) -> &IdTokenClaims {
		&self.claims
	}
}
impl Serialize for IdToken {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.raw)
	}
}
impl<'de> Deserialize<'de> for IdToken {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		Self::parse(raw).map_err(serde::de::Error::custom)
	}
}

/// Decodes the claims of a compact JWT without verifying its signature.
pub fn decode_jwt_payload<T>(jwt: &str) -> Result<T, IdentityError>
where
	T: DeserializeOwned,
{
	let mut segments = jwt.split('.');
	let (Some(_header), Some(payload), Some(_signature), None) =
		(segments.next(), segments.next(), segments.next(), segments.next())
	else {
		return Err(IdentityError::MalformedJwt);
	};

	decode_json_segment(payload)
}

pub(crate) fn decode_json_segment<T>(segment: &str) -> Result<T, IdentityError>
where
	T: DeserializeOwned,
{
	let bytes = URL_SAFE_NO_PAD.decode(segment.trim_end_matches('='))?;

	Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
pub(crate) fn encode_unsigned_jwt(claims: &serde_json::Value) -> String {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
	let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

	format!("{header}.{payload}.")
}
