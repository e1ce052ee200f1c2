//! Per-call request parameters, client credentials, and the request-scoped context.

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};
use url::form_urlencoded;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{
		self, ClientId, IdTokenClaims, IdentityError, ScopeSet, TokenSecret, User,
		UserIdentifier,
	},
	authority::Authority,
	error::ConfigError,
};

/// Produces signed client assertions (for example a certificate-backed JWT).
///
/// The engine never inspects the assertion; it forwards it as `client_assertion`.
pub trait ClientAssertionProvider
where
	Self: Send + Sync,
{
	/// Returns an assertion for `client_id` whose audience is `audience` (the token endpoint).
	fn client_assertion(
		&self,
		client_id: &ClientId,
		audience: &str,
	) -> Result<TokenSecret, ConfigError>;
}

/// Confidential client credential.
#[derive(Clone)]
pub enum ClientCredential {
	/// Shared client secret.
	Secret(TokenSecret),
	/// Assertion capability, usually backed by a certificate.
	Assertion(Arc<dyn ClientAssertionProvider>),
}
impl ClientCredential {
	/// Credential backed by a shared secret.
	pub fn secret(secret: impl Into<TokenSecret>) -> Self {
		Self::Secret(secret.into())
	}

	/// Credential backed by an assertion provider.
	pub fn assertion(provider: impl 'static + ClientAssertionProvider) -> Self {
		Self::Assertion(Arc::new(provider))
	}
}
impl Debug for ClientCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Secret(_) => f.write_str("ClientCredential::Secret(<redacted>)"),
			Self::Assertion(_) => f.write_str("ClientCredential::Assertion(..)"),
		}
	}
}

/// Externally issued token representing the user in the on-behalf-of flow.
#[derive(Clone, Debug)]
pub struct UserAssertion {
	assertion: TokenSecret,
}
impl UserAssertion {
	/// Wraps a raw assertion (a JWT access token).
	pub fn new(assertion: impl Into<TokenSecret>) -> Self {
		Self { assertion: assertion.into() }
	}

	/// Raw assertion.
	pub fn assertion(&self) -> &TokenSecret {
		&self.assertion
	}

	/// Decodes the assertion's claims without verifying its signature.
	pub fn claims(&self) -> Result<IdTokenClaims, IdentityError> {
		auth::decode_jwt_payload(self.assertion.expose())
	}

	/// Base64url SHA-256 digest of the raw assertion.
	///
	/// On-behalf-of cache entries carry it, and a lookup only hits when the presented
	/// assertion digests to the same value. The claims are never trusted on their own.
	pub fn assertion_hash(&self) -> String {
		URL_SAFE_NO_PAD.encode(Sha256::digest(self.assertion.expose().as_bytes()))
	}

	/// User identifier the on-behalf-of cache entries are keyed by.
	///
	/// Uses `oid.tid` from the assertion claims; opaque assertions fall back to
	/// [`assertion_hash`](Self::assertion_hash).
	pub fn user_identifier(&self) -> Result<UserIdentifier, ConfigError> {
		let from_claims = self.claims().ok().and_then(|claims| auth::identifier_from_claims(&claims));
		let identifier = match from_claims {
			Some(identifier) => identifier,
			None => self.assertion_hash(),
		};

		UserIdentifier::new(identifier).map_err(|e| ConfigError::ClientAssertion {
			message: e.to_string(),
		})
	}
}

/// Cooperative cancellation flag shared between a caller and an in-flight request.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);
impl CancellationToken {
	/// Creates a token that has not been canceled.
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.0.store(true, Ordering::SeqCst);
	}

	/// Returns true once [`cancel`](Self::cancel) was called on any clone.
	pub fn is_cancelled(&self) -> bool {
		self.0.load(Ordering::SeqCst)
	}
}

/// Request-scoped correlation and cancellation.
#[derive(Clone, Debug)]
pub struct RequestContext {
	correlation_id: Uuid,
	cancellation: CancellationToken,
}
impl RequestContext {
	/// Creates a context with a random correlation id.
	pub fn new() -> Self {
		Self { correlation_id: Uuid::new_v4(), cancellation: CancellationToken::new() }
	}

	/// Overrides the correlation id.
	pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
		self.correlation_id = correlation_id;

		self
	}

	/// Attaches a caller-owned cancellation token.
	pub fn with_cancellation(mut self, cancellation: CancellationToken) -> Self {
		self.cancellation = cancellation;

		self
	}

	/// Correlation id grouping the request's telemetry.
	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}

	/// Cancellation token observed by the pipeline.
	pub fn cancellation(&self) -> &CancellationToken {
		&self.cancellation
	}

	/// Returns true when the caller canceled the request.
	pub fn is_cancelled(&self) -> bool {
		self.cancellation.is_cancelled()
	}
}
impl Default for RequestContext {
	fn default() -> Self {
		Self::new()
	}
}

/// Which of the application's two token caches a request reads and writes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheTarget {
	/// Tokens issued for a signed-in user.
	#[default]
	User,
	/// App-only tokens (client credentials).
	App,
}

/// Per-call context handed to a flow handler. Immutable once built.
#[derive(Clone, Debug)]
pub struct AuthenticationRequestParameters {
	authority: Authority,
	client_id: ClientId,
	scope: ScopeSet,
	redirect_uri: Option<Url>,
	cache_target: CacheTarget,
	extra_query_parameters: Option<String>,
	user_assertion: Option<UserAssertion>,
	client_credential: Option<ClientCredential>,
	user: Option<User>,
	login_hint: Option<String>,
	force_refresh: bool,
	context: RequestContext,
}
impl AuthenticationRequestParameters {
	/// Starts a builder for the required dimensions.
	pub fn builder(
		authority: Authority,
		client_id: ClientId,
		scope: ScopeSet,
	) -> AuthenticationRequestParametersBuilder {
		AuthenticationRequestParametersBuilder {
			params: Self {
				authority,
				client_id,
				scope,
				redirect_uri: None,
				cache_target: CacheTarget::default(),
				extra_query_parameters: None,
				user_assertion: None,
				client_credential: None,
				user: None,
				login_hint: None,
				force_refresh: false,
				context: RequestContext::new(),
			},
		}
	}

	/// Authority the request targets.
	pub fn authority(&self) -> &Authority {
		&self.authority
	}

	/// Application identifier.
	pub fn client_id(&self) -> &ClientId {
		&self.client_id
	}

	/// Requested scopes.
	pub fn scope(&self) -> &ScopeSet {
		&self.scope
	}

	/// Redirect URI, when the flow uses one.
	pub fn redirect_uri(&self) -> Option<&Url> {
		self.redirect_uri.as_ref()
	}

	/// Target token cache.
	pub fn cache_target(&self) -> CacheTarget {
		self.cache_target
	}

	/// Raw extra query parameter string.
	pub fn extra_query_parameters(&self) -> Option<&str> {
		self.extra_query_parameters.as_deref()
	}

	/// User assertion for the on-behalf-of flow.
	pub fn user_assertion(&self) -> Option<&UserAssertion> {
		self.user_assertion.as_ref()
	}

	/// Client credential for confidential flows.
	pub fn client_credential(&self) -> Option<&ClientCredential> {
		self.client_credential.as_ref()
	}

	/// Previously signed-in user.
	pub fn user(&self) -> Option<&User> {
		self.user.as_ref()
	}

	/// Login hint forwarded to the authorization endpoint.
	pub fn login_hint(&self) -> Option<&str> {
		self.login_hint.as_deref()
	}

	/// Whether the access-token cache must be bypassed.
	pub fn force_refresh(&self) -> bool {
		self.force_refresh
	}

	/// Correlation and cancellation context.
	pub fn context(&self) -> &RequestContext {
		&self.context
	}

	pub(crate) fn with_cache_target(mut self, cache_target: CacheTarget) -> Self {
		self.cache_target = cache_target;

		self
	}

	/// Checks the redirect URI; a fragment is a caller error.
	pub fn validate_redirect_uri(&self) -> Result<(), ConfigError> {
		match &self.redirect_uri {
			Some(uri) => validate_redirect_uri(uri),
			None => Ok(()),
		}
	}

	/// Parses the extra query parameters and rejects names in `reserved`.
	pub fn checked_extra_parameters(
		&self,
		reserved: &[&str],
	) -> Result<Vec<(String, String)>, ConfigError> {
		let extra = self
			.extra_query_parameters
			.as_deref()
			.map(parse_extra_query_parameters)
			.unwrap_or_default();

		check_duplicate_parameters(&extra, reserved)?;

		Ok(extra)
	}
}

/// Builder for [`AuthenticationRequestParameters`].
#[derive(Clone, Debug)]
pub struct AuthenticationRequestParametersBuilder {
	params: AuthenticationRequestParameters,
}
impl AuthenticationRequestParametersBuilder {
	/// Overrides the authority.
	pub fn authority(mut self, authority: Authority) -> Self {
		self.params.authority = authority;

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.params.redirect_uri = Some(redirect_uri);

		self
	}

	/// Selects the token cache.
	pub fn cache_target(mut self, cache_target: CacheTarget) -> Self {
		self.params.cache_target = cache_target;

		self
	}

	/// Sets the raw extra query parameter string (`a=b&c=d`).
	pub fn extra_query_parameters(mut self, extra: impl Into<String>) -> Self {
		self.params.extra_query_parameters = Some(extra.into());

		self
	}

	/// Sets the user assertion.
	pub fn user_assertion(mut self, assertion: UserAssertion) -> Self {
		self.params.user_assertion = Some(assertion);

		self
	}

	/// Sets the client credential.
	pub fn client_credential(mut self, credential: Option<ClientCredential>) -> Self {
		self.params.client_credential = credential;

		self
	}

	/// Sets the signed-in user.
	pub fn user(mut self, user: User) -> Self {
		self.params.user = Some(user);

		self
	}

	/// Sets the login hint.
	pub fn login_hint(mut self, login_hint: impl Into<String>) -> Self {
		self.params.login_hint = Some(login_hint.into());

		self
	}

	/// Sets the force-refresh flag.
	pub fn force_refresh(mut self, force_refresh: bool) -> Self {
		self.params.force_refresh = force_refresh;

		self
	}

	/// Replaces the request context.
	pub fn context(mut self, context: RequestContext) -> Self {
		self.params.context = context;

		self
	}

	/// Finishes the parameters.
	pub fn build(self) -> AuthenticationRequestParameters {
		self.params
	}
}

/// Rejects redirect URIs carrying a fragment component.
pub fn validate_redirect_uri(redirect_uri: &Url) -> Result<(), ConfigError> {
	if redirect_uri.fragment().is_some() {
		return Err(ConfigError::RedirectUriContainsFragment {
			redirect_uri: redirect_uri.to_string(),
		});
	}

	Ok(())
}

/// Splits `a=b&c=d` (an optional leading `?` is ignored) into decoded pairs.
pub fn parse_extra_query_parameters(raw: &str) -> Vec<(String, String)> {
	let raw = raw.trim().trim_start_matches('?');

	form_urlencoded::parse(raw.as_bytes())
		.filter(|(key, _)| !key.is_empty())
		.map(|(key, value)| (key.into_owned(), value.into_owned()))
		.collect()
}

/// Fails when an extra parameter repeats a reserved name or another extra parameter.
///
/// Names compare case-insensitively.
pub fn check_duplicate_parameters(
	extra: &[(String, String)],
	reserved: &[&str],
) -> Result<(), ConfigError> {
	let mut seen = BTreeSet::new();

	for (name, _) in extra {
		let folded = name.to_ascii_lowercase();

		if reserved.iter().any(|reserved| reserved.eq_ignore_ascii_case(&folded))
			|| !seen.insert(folded)
		{
			return Err(ConfigError::DuplicateQueryParameter { name: name.clone() });
		}
	}

	Ok(())
}
