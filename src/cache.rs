//! Token cache keyed by canonical cache keys.
//!
//! All operations are synchronous and take one lock, so a read-then-write sequence by a flow
//! never observes a half-written entry. Items are cloned in and out; nothing outside the
//! cache can mutate a stored item, and replacement is the only update.

pub mod item;
pub mod key;

pub use item::*;
pub use key::*;

// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, UserIdentifier},
	authority::Authority,
	error::codes,
	obs,
};

/// Token cache failures.
#[derive(Debug, ThisError)]
pub enum CacheError {
	/// More than one unexpired access token satisfied a lookup.
	#[error("Found {count} cached access tokens matching the request; the lookup is ambiguous.")]
	Ambiguous {
		/// Number of matching entries.
		count: usize,
	},
	/// Snapshot (de)serialization failed.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
}
impl CacheError {
	/// Stable error code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Ambiguous { .. } => codes::MULTIPLE_MATCHING_TOKENS,
			Self::Serialization { .. } => codes::CACHE_SERIALIZATION,
		}
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct CacheState {
	#[serde(default)]
	access_tokens: BTreeMap<CacheKey, AccessTokenCacheItem>,
	#[serde(default)]
	refresh_tokens: BTreeMap<CacheKey, RefreshTokenCacheItem>,
}

/// Thread-safe in-memory token cache.
///
/// One application holds two of these: the user cache and the app-only cache.
#[derive(Debug, Default)]
pub struct TokenCache {
	state: RwLock<CacheState>,
}
impl TokenCache {
	/// Creates an empty cache.
	pub fn new() -> Self {
		Self::default()
	}

	/// Stores an access token, replacing any entry under the same key.
	pub fn save_access_token(&self, item: AccessTokenCacheItem) -> CacheKey {
		let key = item.cache_key();

		self.state.write().access_tokens.insert(key.clone(), item);

		key
	}

	/// Stores a refresh token, replacing any entry under the same key.
	pub fn save_refresh_token(&self, item: RefreshTokenCacheItem) -> CacheKey {
		let key = item.cache_key();

		self.state.write().refresh_tokens.insert(key.clone(), item);

		key
	}

	/// Stores the tokens of one response under a single lock acquisition.
	///
	/// `redeemed_refresh` names the refresh token the response was obtained with. When a new
	/// refresh token is stored under a different key, the redeemed one is dropped so a user
	/// keeps one refresh token per authority family.
	pub fn save_tokens(
		&self,
		access_token: AccessTokenCacheItem,
		refresh_token: Option<RefreshTokenCacheItem>,
		redeemed_refresh: Option<&CacheKey>,
	) {
		let access_key = access_token.cache_key();
		let refresh_entry = refresh_token.map(|item| (item.cache_key(), item));
		let mut state = self.state.write();

		state.access_tokens.insert(access_key, access_token);

		if let Some((key, item)) = refresh_entry {
			if let Some(redeemed) = redeemed_refresh
				&& redeemed != &key
			{
				state.refresh_tokens.remove(redeemed);
			}

			state.refresh_tokens.insert(key, item);
		}
	}

	/// Finds an unexpired access token for the request using the current clock.
	pub fn find_access_token(
		&self,
		authority: &str,
		client_id: &ClientId,
		scope: &ScopeSet,
		user: Option<&UserIdentifier>,
	) -> Result<Option<AccessTokenCacheItem>, CacheError> {
		self.find_access_token_at(authority, client_id, scope, user, OffsetDateTime::now_utc())
	}

	/// Finds an unexpired access token as of `now`.
	///
	/// Authority, client, and user must match exactly; the cached scope set must contain every
	/// requested scope. An exact scope match wins outright. Otherwise a single superset match
	/// is a hit and several are [`CacheError::Ambiguous`]. Items expiring at or before `now`
	/// never match, and neither do items bound to a user assertion.
	pub fn find_access_token_at(
		&self,
		authority: &str,
		client_id: &ClientId,
		scope: &ScopeSet,
		user: Option<&UserIdentifier>,
		now: OffsetDateTime,
	) -> Result<Option<AccessTokenCacheItem>, CacheError> {
		self.find_matching(authority, client_id, scope, user, None, now)
	}

	/// Finds an unexpired on-behalf-of token issued for the assertion digested as
	/// `assertion_hash`, using the current clock.
	///
	/// Matching follows [`find_access_token_at`](Self::find_access_token_at), and the item
	/// must additionally carry the same assertion digest.
	pub fn find_access_token_for_assertion(
		&self,
		authority: &str,
		client_id: &ClientId,
		scope: &ScopeSet,
		user: Option<&UserIdentifier>,
		assertion_hash: &str,
	) -> Result<Option<AccessTokenCacheItem>, CacheError> {
		self.find_matching(
			authority,
			client_id,
			scope,
			user,
			Some(assertion_hash),
			OffsetDateTime::now_utc(),
		)
	}

	fn find_matching(
		&self,
		authority: &str,
		client_id: &ClientId,
		scope: &ScopeSet,
		user: Option<&UserIdentifier>,
		assertion_hash: Option<&str>,
		now: OffsetDateTime,
	) -> Result<Option<AccessTokenCacheItem>, CacheError> {
		let state = self.state.read();
		let mut candidates = state
			.access_tokens
			.values()
			.filter(|item| {
				item.authority == authority
					&& &item.client_id == client_id
					&& item.user_identifier.as_ref() == user
					&& item.assertion_hash.as_deref() == assertion_hash
					&& !item.is_expired_at(now)
					&& item.scope.is_superset_of(scope)
			})
			.collect::<Vec<_>>();

		if let Some(exact) = candidates.iter().find(|item| &item.scope == scope) {
			return Ok(Some((*exact).clone()));
		}

		match candidates.len() {
			0 => Ok(None),
			1 => Ok(candidates.pop().cloned()),
			count => {
				obs::record_cache_ambiguity(count);

				Err(CacheError::Ambiguous { count })
			},
		}
	}

	/// Finds the refresh token for the user.
	///
	/// An item issued by `authority` itself wins; otherwise any item whose environment equals
	/// the authority host is used, since refresh tokens are shared across one authority family.
	pub fn find_refresh_token(
		&self,
		authority: &Authority,
		client_id: &ClientId,
		user: Option<&UserIdentifier>,
	) -> Option<RefreshTokenCacheItem> {
		let state = self.state.read();
		let mut family_match = None;

		for item in state.refresh_tokens.values() {
			if &item.client_id != client_id || item.user_identifier.as_ref() != user {
				continue;
			}
			if item.authority == authority.canonical() {
				return Some(item.clone());
			}
			if family_match.is_none() && item.environment.as_deref() == Some(authority.host()) {
				family_match = Some(item.clone());
			}
		}

		family_match
	}

	/// Removes the entry stored under `key`. Removing a missing key is not an error.
	pub fn remove(&self, key: &CacheKey) -> bool {
		let mut state = self.state.write();
		let removed_access = state.access_tokens.remove(key).is_some();
		let removed_refresh = state.refresh_tokens.remove(key).is_some();

		removed_access || removed_refresh
	}

	/// Removes every item that belongs to `user`. Returns the number removed.
	pub fn remove_user(&self, user: &UserIdentifier) -> usize {
		let mut state = self.state.write();
		let before = state.access_tokens.len() + state.refresh_tokens.len();

		state.access_tokens.retain(|_, item| item.user_identifier.as_ref() != Some(user));
		state.refresh_tokens.retain(|_, item| item.user_identifier.as_ref() != Some(user));

		before - state.access_tokens.len() - state.refresh_tokens.len()
	}

	/// Drops access tokens expired as of `now`. Refresh tokens are kept.
	pub fn evict_expired(&self, now: OffsetDateTime) -> usize {
		let mut state = self.state.write();
		let before = state.access_tokens.len();

		state.access_tokens.retain(|_, item| !item.is_expired_at(now));

		before - state.access_tokens.len()
	}

	/// Drops every item.
	pub fn clear(&self) {
		let mut state = self.state.write();

		state.access_tokens.clear();
		state.refresh_tokens.clear();
	}

	/// Snapshot of the cached access tokens, ordered by key.
	pub fn access_tokens(&self) -> Vec<AccessTokenCacheItem> {
		self.state.read().access_tokens.values().cloned().collect()
	}

	/// Snapshot of the cached refresh tokens, ordered by key.
	pub fn refresh_tokens(&self) -> Vec<RefreshTokenCacheItem> {
		self.state.read().refresh_tokens.values().cloned().collect()
	}

	/// Number of cached access tokens.
	pub fn access_token_count(&self) -> usize {
		self.state.read().access_tokens.len()
	}

	/// Number of cached refresh tokens.
	pub fn refresh_token_count(&self) -> usize {
		self.state.read().refresh_tokens.len()
	}

	/// Serializes the cache to JSON keyed by canonical key strings.
	pub fn serialize(&self) -> Result<String, CacheError> {
		serde_json::to_string(&*self.state.read())
			.map_err(|e| CacheError::Serialization { message: e.to_string() })
	}

	/// Replaces the cache contents with a snapshot produced by [`serialize`](Self::serialize).
	///
	/// Entries are re-keyed from their identity fields, so the snapshot's map keys only need
	/// to be unique.
	pub fn deserialize(&self, json: &str) -> Result<(), CacheError> {
		let snapshot: CacheState = serde_json::from_str(json)
			.map_err(|e| CacheError::Serialization { message: e.to_string() })?;
		let state = CacheState {
			access_tokens: snapshot
				.access_tokens
				.into_values()
				.map(|item| (item.cache_key(), item))
				.collect(),
			refresh_tokens: snapshot
				.refresh_tokens
				.into_values()
				.map(|item| (item.cache_key(), item))
				.collect(),
		};

		*self.state.write() = state;

		Ok(())
	}
}
