//! Signed-in user view derived from `client_info` and ID token claims.

// self
use crate::{
	_prelude::*,
	auth::{ClientInfo, IdTokenClaims, UserIdentifier},
};

/// User an access or refresh token was issued for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
	/// Home-account identifier used as cache key material.
	pub identifier: UserIdentifier,
	/// Displayable sign-in name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub displayable_id: Option<String>,
	/// Display name.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Issuer of the ID token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub identity_provider: Option<String>,
}
impl User {
	/// Creates a user with only an identifier.
	pub fn new(identifier: UserIdentifier) -> Self {
		Self { identifier, displayable_id: None, name: None, identity_provider: None }
	}

	/// Derives the user from the identity fields of a token response.
	///
	/// `client_info` wins (`uid.utid`); otherwise the ID token's `oid.tid` (or `sub.tid`) is
	/// used. Returns `None` when neither source identifies a user.
	pub fn from_identity(
		client_info: Option<&ClientInfo>,
		claims: Option<&IdTokenClaims>,
	) -> Option<Self> {
		let identifier = client_info
			.and_then(ClientInfo::home_account_id)
			.or_else(|| claims.and_then(identifier_from_claims))?;
		let identifier = UserIdentifier::new(identifier).ok()?;
		let mut user = Self::new(identifier);

		if let Some(claims) = claims {
			user.displayable_id = claims.displayable_id().map(str::to_owned);
			user.name = claims.name.clone();
			user.identity_provider = claims.iss.clone();
		}

		Some(user)
	}
}

/// `oid.tid` identifier taken from the claims of a user assertion or ID token.
pub fn identifier_from_claims(claims: &IdTokenClaims) -> Option<String> {
	let object = claims.oid.as_deref().or(claims.sub.as_deref())?;

	match claims.tid.as_deref() {
		Some(tenant) => Some(format!("{object}.{tenant}")),
		None => Some(object.to_owned()),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn client_info_takes_precedence() {
		let info = ClientInfo { uid: "uid".into(), utid: "utid".into() };
		let claims = IdTokenClaims {
			oid: Some("oid".into()),
			tid: Some("tid".into()),
			preferred_username: Some("user@contoso.com".into()),
			..Default::default()
		};
		let user = User::from_identity(Some(&info), Some(&claims))
			.expect("Client info fixture should identify a user.");

		assert_eq!(user.identifier.as_ref(), "uid.utid");
		assert_eq!(user.displayable_id.as_deref(), Some("user@contoso.com"));

		let fallback = User::from_identity(None, Some(&claims))
			.expect("ID token claims should identify a user.");

		assert_eq!(fallback.identifier.as_ref(), "oid.tid");
		assert_eq!(User::from_identity(None, None), None);
	}
}
