//! `client_info` response blob carrying the home-account identifiers.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::{IdentityError, id_token},
};

/// Decoded `client_info` (`{"uid": ..., "utid": ...}`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
	/// Unique user identifier within the home tenant.
	#[serde(default)]
	pub uid: String,
	/// Home tenant identifier.
	#[serde(default)]
	pub utid: String,
}
impl ClientInfo {
	/// Decodes a base64url `client_info` value.
	pub fn parse(raw: &str) -> Result<Self, IdentityError> {
		id_token::decode_json_segment(raw)
	}

	/// Encodes the blob the way the authority returns it.
	pub fn encode(&self) -> Result<String, IdentityError> {
		Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(self)?))
	}

	/// Home-account identifier (`uid.utid`), or `None` when either part is missing.
	pub fn home_account_id(&self) -> Option<String> {
		if self.uid.is_empty() || self.utid.is_empty() {
			return None;
		}

		Some(format!("{}.{}", self.uid, self.utid))
	}
}

/// Raw `client_info` paired with its decoded form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedClientInfo {
	raw: String,
	decoded: ClientInfo,
}
impl EncodedClientInfo {
	/// Decodes a raw `client_info` value.
	pub fn parse(raw: impl Into<String>) -> Result<Self, IdentityError> {
		let raw = raw.into();
		let decoded = ClientInfo::parse(&raw)?;

		Ok(Self { raw, decoded })
	}

	/// Raw value as returned by the authority.
	pub fn raw(&self) -> &str {
		&self.raw
	}

	/// Decoded identifiers.
	pub fn decoded(&self) -> &ClientInfo {
		&self.decoded
	}
}
impl Serialize for EncodedClientInfo {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.raw)
	}
}
impl<'de> Deserialize<'de> for EncodedClientInfo {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		Self::parse(raw).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn round_trips_and_joins_identifiers() {
		let info = ClientInfo { uid: "my-uid".into(), utid: "my-utid".into() };
		let raw = info.encode().expect("Client info fixture should encode.");
		let parsed = ClientInfo::parse(&raw).expect("Encoded client info should parse.");

		assert_eq!(parsed, info);
		assert_eq!(parsed.home_account_id().as_deref(), Some("my-uid.my-utid"));
		assert_eq!(ClientInfo { uid: "u".into(), utid: String::new() }.home_account_id(), None);

		let encoded = EncodedClientInfo::parse(raw.clone()).expect("Raw client info should parse.");

		assert_eq!(encoded.raw(), raw);
		assert_eq!(encoded.decoded(), &info);
	}
}
