//! Case-insensitive scope sets used for requests and cache matching.

// std
use std::{
	cmp::Ordering,
	collections::BTreeMap,
	hash::{Hash, Hasher},
	slice::Iter,
	sync::OnceLock,
};
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
use sha2::{Digest, Sha256};
// self
use crate::_prelude::*;

/// Scopes the client always adds to user-facing requests and strips before caching.
pub const RESERVED_SCOPES: [&str; 3] = ["openid", "profile", "offline_access"];

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Set of OAuth scopes compared without regard to case.
///
/// Entries are deduplicated case-insensitively (the first spelling wins) and ordered by their
/// lowercase form, so equality, ordering, hashing, and the [`fingerprint`](Self::fingerprint)
/// all agree on `User.Read` and `user.read`. The original spelling is kept for the wire through
/// [`normalized`](Self::normalized); cache keys use [`canonical`](Self::canonical).
#[derive(Default)]
pub struct ScopeSet {
	scopes: Arc<[String]>,
	folded: Arc<[String]>,
	fingerprint_cache: OnceLock<String>,
}
impl ScopeSet {
	/// Creates a scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let (scopes, folded) = normalize(scopes)?;

		Ok(Self { scopes, folded, fingerprint_cache: OnceLock::new() })
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.scopes.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.scopes.is_empty()
	}

	/// Returns true if the set contains the provided scope, ignoring case.
	pub fn contains(&self, scope: &str) -> bool {
		let needle = scope.to_lowercase();

		self.folded.binary_search(&needle).is_ok()
	}

	/// Returns true when every scope of `other` is present in `self`.
	pub fn is_superset_of(&self, other: &ScopeSet) -> bool {
		other.folded.iter().all(|scope| self.folded.binary_search(scope).is_ok())
	}

	/// Iterator over scopes in their original spelling.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.scopes.iter().map(|s| s.as_str())
	}

	/// Space-delimited scopes in their original spelling.
	pub fn normalized(&self) -> String {
		self.scopes.join(" ")
	}

	/// Space-delimited lowercase scopes used as cache key material.
	pub fn canonical(&self) -> String {
		self.folded.join(" ")
	}

	/// Returns a copy with `extra` merged in.
	pub fn union<I, S>(&self, extra: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self::new(self.scopes.iter().cloned().chain(extra.into_iter().map(Into::into)))
	}

	/// Returns a copy with `openid`, `profile`, and `offline_access` added.
	pub fn with_reserved(&self) -> Self {
		let mut extra = Vec::new();

		for reserved in RESERVED_SCOPES {
			if !self.contains(reserved) {
				extra.push(reserved.to_owned());
			}
		}
		if extra.is_empty() {
			return self.clone();
		}

		self.union(extra).unwrap_or_else(|_| self.clone())
	}

	/// Returns a copy without the reserved OpenID Connect scopes.
	pub fn without_reserved(&self) -> Self {
		let mut scopes = Vec::with_capacity(self.scopes.len());
		let mut folded = Vec::with_capacity(self.folded.len());

		for (scope, key) in self.scopes.iter().zip(self.folded.iter()) {
			if !RESERVED_SCOPES.contains(&key.as_str()) {
				scopes.push(scope.clone());
				folded.push(key.clone());
			}
		}

		Self { scopes: scopes.into(), folded: folded.into(), fingerprint_cache: OnceLock::new() }
	}

	/// Stable fingerprint derived from the canonical scope list.
	///
	/// The fingerprint is a base64 (no padding) encoding of the SHA-256 digest for the
	/// canonical, space-delimited scope string and is cached after the first calculation.
	pub fn fingerprint(&self) -> String {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.folded)).clone()
	}

	/// Returns the underlying slice of scope strings.
	pub fn as_slice(&self) -> &[String] {
		&self.scopes
	}
}
impl Clone for ScopeSet {
	fn clone(&self) -> Self {
		Self {
			scopes: self.scopes.clone(),
			folded: self.folded.clone(),
			fingerprint_cache: OnceLock::new(),
		}
	}
}
impl PartialEq for ScopeSet {
	fn eq(&self, other: &Self) -> bool {
		self.folded == other.folded
	}
}
impl Eq for ScopeSet {}
impl PartialOrd for ScopeSet {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}
impl Ord for ScopeSet {
	fn cmp(&self, other: &Self) -> Ordering {
		self.folded.cmp(&other.folded)
	}
}
impl Hash for ScopeSet {
	fn hash<H: Hasher>(&self, state: &mut H) {
		self.fingerprint_cache.get_or_init(|| compute_fingerprint(&self.folded)).hash(state);
	}
}
impl Debug for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("ScopeSet").field(&self.scopes).finish()
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}

/// Iterator over scope strings.
pub struct ScopeIter<'a> {
	inner: Iter<'a, String>,
}
impl<'a> Iterator for ScopeIter<'a> {
	type Item = &'a str;

	fn next(&mut self) -> Option<Self::Item> {
		self.inner.next().map(|s| s.as_str())
	}
}
impl TryFrom<Vec<String>> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl TryFrom<&[&str]> for ScopeSet {
	type Error = ScopeValidationError;

	fn try_from(value: &[&str]) -> Result<Self, Self::Error> {
		Self::new(value.iter().copied())
	}
}
impl<'a> IntoIterator for &'a ScopeSet {
	type IntoIter = ScopeIter<'a>;
	type Item = &'a str;

	fn into_iter(self) -> Self::IntoIter {
		ScopeIter { inner: self.scopes.iter() }
	}
}
impl FromStr for ScopeSet {
	type Err = ScopeValidationError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.is_empty() {
			return Ok(Self::default());
		}
		if s.chars().all(char::is_whitespace) {
			return Err(ScopeValidationError::Empty);
		}

		Self::new(s.split_whitespace())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.scopes.len()))?;

		for scope in self.scopes.iter() {
			seq.serialize_element(scope)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		ScopeSet::new(values).map_err(DeError::custom)
	}
}

type Normalized = (Arc<[String]>, Arc<[String]>);

fn normalize<I, S>(scopes: I) -> Result<Normalized, ScopeValidationError>
where
	I: IntoIterator<Item = S>,
	S: Into<String>,
{
	let mut set = BTreeMap::new();

	for scope in scopes {
		let owned: String = scope.into();

		if owned.is_empty() {
			return Err(ScopeValidationError::Empty);
		}
		if owned.chars().any(char::is_whitespace) {
			return Err(ScopeValidationError::ContainsWhitespace { scope: owned });
		}

		set.entry(owned.to_lowercase()).or_insert(owned);
	}

	let (folded, scopes): (Vec<_>, Vec<_>) = set.into_iter().unzip();

	Ok((scopes.into(), folded.into()))
}

fn compute_fingerprint(scopes: &[String]) -> String {
	let canonical = scopes.join(" ");
	let mut hasher = Sha256::new();

	hasher.update(canonical.as_bytes());

	let digest = hasher.finalize();

	STANDARD_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_compare_without_case() {
		let lhs = ScopeSet::new(["User.Read", "mail.send", "user.read"])
			.expect("Left-hand scope set should be valid.");
		let rhs =
			ScopeSet::new(["Mail.Send", "USER.READ"]).expect("Right-hand scope set should be valid.");

		assert_eq!(lhs, rhs);
		assert_eq!(lhs.len(), 2);
		assert_eq!(lhs.normalized(), "mail.send User.Read");
		assert_eq!(lhs.canonical(), "mail.send user.read");
		assert_eq!(lhs.fingerprint(), rhs.fingerprint());
	}

	#[test]
	fn scopes_reject_whitespace_padding() {
		let err = ScopeSet::new([" profile "]).expect_err("Padded scopes must be rejected.");

		assert!(matches!(err, ScopeValidationError::ContainsWhitespace { .. }));
		assert!(ScopeSet::from_str("").is_ok(), "Empty string represents an empty scope set.");
		assert!(ScopeSet::from_str("   ").is_err(), "Whitespace-only input must be rejected.");
		assert!(ScopeSet::new([""]).is_err());
	}

	#[test]
	fn superset_matching_ignores_case() {
		let cached = ScopeSet::from_str("r1/scope1 r1/scope2 r1/scope3")
			.expect("Cached scope string should parse successfully.");
		let wanted =
			ScopeSet::from_str("R1/Scope1").expect("Requested scope string should parse successfully.");
		let foreign =
			ScopeSet::from_str("r2/scope1").expect("Foreign scope string should parse successfully.");

		assert!(cached.is_superset_of(&wanted));
		assert!(!wanted.is_superset_of(&cached));
		assert!(!cached.is_superset_of(&foreign));
		assert!(cached.contains("R1/SCOPE2"));
	}

	#[test]
	fn reserved_scopes_are_added_and_stripped() {
		let scopes =
			ScopeSet::from_str("r1/scope1").expect("Scope string should parse successfully.");
		let wire = scopes.with_reserved();

		assert_eq!(wire.len(), 4);
		assert!(wire.contains("offline_access"));
		assert_eq!(wire.without_reserved(), scopes);
		assert!(ScopeSet::from_str("openid Profile").expect("Scopes should parse.")
			.without_reserved()
			.is_empty());
	}

	#[test]
	fn serde_keeps_original_spelling() {
		let scopes =
			ScopeSet::from_str("User.Read mail.send").expect("Scope string should parse successfully.");
		let json = serde_json::to_string(&scopes).expect("Scope set should serialize.");

		assert_eq!(json, r#"["mail.send","User.Read"]"#);

		let back: ScopeSet = serde_json::from_str(&json).expect("Scope set should deserialize.");

		assert_eq!(back, scopes);
	}
}
