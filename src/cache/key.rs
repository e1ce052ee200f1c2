//! Canonical cache keys.
//!
//! The string form joins base64url (no padding) segments with `$`, a character outside the
//! base64url alphabet, in the order `authority$client_id$scopes$user` for access tokens and
//! `authority$client_id$user` for refresh tokens. Scopes are lowercased, sorted, and
//! space-joined before encoding; an absent user encodes as an empty segment. Persisted caches
//! depend on this layout.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, UserIdentifier},
};

/// Segment delimiter of the canonical key string.
pub const KEY_DELIMITER: char = '$';

/// Canonical key string indexing one cache entry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);
impl CacheKey {
	/// Key string.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl Display for CacheKey {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0)
	}
}

/// Identity dimensions of an access token.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AccessTokenCacheKey {
	/// Canonical authority string.
	pub authority: String,
	/// Application identifier.
	pub client_id: ClientId,
	/// Scope set, compared without regard to case or order.
	pub scope: ScopeSet,
	/// User identifier; `None` for app-only tokens.
	pub user_identifier: Option<UserIdentifier>,
}
impl AccessTokenCacheKey {
	/// Creates a key from its identity dimensions.
	pub fn new(
		authority: impl Into<String>,
		client_id: ClientId,
		scope: ScopeSet,
		user_identifier: Option<UserIdentifier>,
	) -> Self {
		Self { authority: authority.into(), client_id, scope, user_identifier }
	}

	/// Canonical string form.
	pub fn to_cache_key(&self) -> CacheKey {
		join_segments(&[
			&self.authority,
			self.client_id.as_ref(),
			&self.scope.canonical(),
			self.user_identifier.as_deref().unwrap_or_default(),
		])
	}
}

/// Identity dimensions of a refresh token; scope never participates.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RefreshTokenCacheKey {
	/// Canonical authority string.
	pub authority: String,
	/// Application identifier.
	pub client_id: ClientId,
	/// User identifier.
	pub user_identifier: Option<UserIdentifier>,
}
impl RefreshTokenCacheKey {
	/// Creates a key from its identity dimensions.
	pub fn new(
		authority: impl Into<String>,
		client_id: ClientId,
		user_identifier: Option<UserIdentifier>,
	) -> Self {
		Self { authority: authority.into(), client_id, user_identifier }
	}

	/// Canonical string form.
	pub fn to_cache_key(&self) -> CacheKey {
		join_segments(&[
			&self.authority,
			self.client_id.as_ref(),
			self.user_identifier.as_deref().unwrap_or_default(),
		])
	}
}

fn join_segments(segments: &[&str]) -> CacheKey {
	let mut key = String::new();

	for (idx, segment) in segments.iter().enumerate() {
		if idx > 0 {
			key.push(KEY_DELIMITER);
		}

		key.push_str(&URL_SAFE_NO_PAD.encode(segment));
	}

	CacheKey(key)
}
