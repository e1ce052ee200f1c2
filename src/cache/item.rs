//! Immutable cache items and the access-token item builder.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, EncodedClientInfo, IdToken, ScopeSet, TokenSecret, UserIdentifier},
	cache::{AccessTokenCacheKey, CacheKey, RefreshTokenCacheKey},
};

/// Errors produced by [`AccessTokenItemBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenItemBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// The expiry is not after the issue instant.
	#[error("Access token expiry must be later than its issue instant.")]
	ExpiryNotInFuture,
}

/// Cached access token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenCacheItem {
	/// Canonical authority the token was issued by.
	pub authority: String,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// ID token issued alongside, raw and decoded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<IdToken>,
	/// `client_info` issued alongside, raw and decoded.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_info: Option<EncodedClientInfo>,
	/// Scopes the token is valid for.
	pub scope: ScopeSet,
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Token type, usually `Bearer`.
	pub token_type: String,
	/// Expiry as a Unix timestamp in seconds.
	pub expires_on: i64,
	/// Extended expiry as a Unix timestamp in seconds.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub extended_expires_on: Option<i64>,
	/// User the token belongs to; `None` for app-only tokens.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_identifier: Option<UserIdentifier>,
	/// Digest of the user assertion an on-behalf-of token was issued for.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub assertion_hash: Option<String>,
}
impl AccessTokenCacheItem {
	/// Returns a builder for the provided identity dimensions.
	pub fn builder(
		authority: impl Into<String>,
		client_id: ClientId,
		scope: ScopeSet,
	) -> AccessTokenItemBuilder {
		AccessTokenItemBuilder::new(authority.into(), client_id, scope)
	}

	/// Identity dimensions of this item.
	pub fn key(&self) -> AccessTokenCacheKey {
		AccessTokenCacheKey::new(
			self.authority.clone(),
			self.client_id.clone(),
			self.scope.clone(),
			self.user_identifier.clone(),
		)
	}

	/// Canonical key string of this item.
	pub fn cache_key(&self) -> CacheKey {
		self.key().to_cache_key()
	}

	/// Expiry instant.
	pub fn expires_at(&self) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(self.expires_on).unwrap_or(OffsetDateTime::UNIX_EPOCH)
	}

	/// Returns true when the expiry is at or before `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.expires_on <= instant.unix_timestamp()
	}
}
impl Debug for AccessTokenCacheItem {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessTokenCacheItem")
			.field("authority", &self.authority)
			.field("client_id", &self.client_id)
			.field("scope", &self.scope)
			.field("access_token", &self.access_token)
			.field("token_type", &self.token_type)
			.field("expires_on", &self.expires_on)
			.field("extended_expires_on", &self.extended_expires_on)
			.field("user_identifier", &self.user_identifier)
			.field("assertion_hash", &self.assertion_hash)
			.field("has_id_token", &self.id_token.is_some())
			.finish()
	}
}

/// Builder for [`AccessTokenCacheItem`].
#[derive(Clone, Debug)]
pub struct AccessTokenItemBuilder {
	authority: String,
	client_id: ClientId,
	scope: ScopeSet,
	access_token: Option<TokenSecret>,
	token_type: Option<String>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	extended_expires_in: Option<Duration>,
	id_token: Option<IdToken>,
	client_info: Option<EncodedClientInfo>,
	user_identifier: Option<UserIdentifier>,
	assertion_hash: Option<String>,
}
impl AccessTokenItemBuilder {
	fn new(authority: String, client_id: ClientId, scope: ScopeSet) -> Self {
		Self {
			authority,
			client_id,
			scope,
			access_token: None,
			token_type: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
			extended_expires_in: None,
			id_token: None,
			client_info: None,
			user_identifier: None,
			assertion_hash: None,
		}
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<TokenSecret>) -> Self {
		self.access_token = Some(token.into());

		self
	}

	/// Sets the token type (defaults to `Bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = Some(token_type.into());

		self
	}

	/// Sets the issue instant (defaults to now).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets the lifetime relative to the issue instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the extended lifetime relative to the issue instant.
	pub fn extended_expires_in(mut self, duration: Duration) -> Self {
		self.extended_expires_in = Some(duration);

		self
	}

	/// Attaches the ID token.
	pub fn id_token(mut self, id_token: IdToken) -> Self {
		self.id_token = Some(id_token);

		self
	}

	/// Attaches `client_info`.
	pub fn client_info(mut self, client_info: EncodedClientInfo) -> Self {
		self.client_info = Some(client_info);

		self
	}

	/// Sets the owning user.
	pub fn user_identifier(mut self, user: Option<UserIdentifier>) -> Self {
		self.user_identifier = user;

		self
	}

	/// Binds the item to the user assertion it was exchanged for.
	pub fn assertion_hash(mut self, hash: Option<String>) -> Self {
		self.assertion_hash = hash;

		self
	}

	/// Consumes the builder and produces an item whose expiry follows its issue instant.
	pub fn build(self) -> Result<AccessTokenCacheItem, TokenItemBuilderError> {
		let access_token = self.access_token.ok_or(TokenItemBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenItemBuilderError::MissingExpiry),
		};

		if expires_at.unix_timestamp() <= issued_at.unix_timestamp() {
			return Err(TokenItemBuilderError::ExpiryNotInFuture);
		}

		let extended_expires_on =
			self.extended_expires_in.map(|delta| (issued_at + delta).unix_timestamp());

		Ok(AccessTokenCacheItem {
			authority: self.authority,
			client_id: self.client_id,
			id_token: self.id_token,
			client_info: self.client_info,
			scope: self.scope,
			access_token,
			token_type: self.token_type.unwrap_or_else(|| "Bearer".into()),
			expires_on: expires_at.unix_timestamp(),
			extended_expires_on,
			user_identifier: self.user_identifier,
			assertion_hash: self.assertion_hash,
		})
	}
}

/// Cached refresh token. Updated only by replacement.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenCacheItem {
	/// Canonical authority the token was issued by.
	pub authority: String,
	/// Authority family (host) the token can be redeemed across.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub environment: Option<String>,
	/// Application the token was issued to.
	pub client_id: ClientId,
	/// User the token belongs to.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_identifier: Option<UserIdentifier>,
	/// Refresh token secret.
	pub refresh_token: TokenSecret,
	/// `client_info` issued alongside.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_info: Option<EncodedClientInfo>,
}
impl RefreshTokenCacheItem {
	/// Creates an item scoped to one authority.
	pub fn new(
		authority: impl Into<String>,
		client_id: ClientId,
		user_identifier: Option<UserIdentifier>,
		refresh_token: impl Into<TokenSecret>,
	) -> Self {
		Self {
			authority: authority.into(),
			environment: None,
			client_id,
			user_identifier,
			refresh_token: refresh_token.into(),
			client_info: None,
		}
	}

	/// Marks the item redeemable across authorities sharing `environment`.
	pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
		self.environment = Some(environment.into());

		self
	}

	/// Attaches `client_info`.
	pub fn with_client_info(mut self, client_info: Option<EncodedClientInfo>) -> Self {
		self.client_info = client_info;

		self
	}

	/// Identity dimensions of this item.
	pub fn key(&self) -> RefreshTokenCacheKey {
		RefreshTokenCacheKey::new(
			self.authority.clone(),
			self.client_id.clone(),
			self.user_identifier.clone(),
		)
	}

	/// Canonical key string of this item.
	pub fn cache_key(&self) -> CacheKey {
		self.key().to_cache_key()
	}
}
impl Debug for RefreshTokenCacheItem {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshTokenCacheItem")
			.field("authority", &self.authority)
			.field("environment", &self.environment)
			.field("client_id", &self.client_id)
			.field("user_identifier", &self.user_identifier)
			.field("refresh_token", &self.refresh_token)
			.finish()
	}
}
