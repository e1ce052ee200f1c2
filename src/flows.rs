//! Acquisition flows and the application context they run in.
//!
//! Every flow is a handler value ([`AuthorizationCodeFlow`], [`ClientCredentialFlow`],
//! [`OnBehalfOfFlow`], [`InteractiveFlow`], [`SilentFlow`]) validated when it is built and
//! run through one shared pipeline by [`ClientApplication::acquire_token`]. The public
//! `acquire_token_*` helpers build the parameters and the handler for the common cases.

pub mod authorization_code;
pub mod client_credentials;
pub mod common;
pub mod interactive;
pub mod on_behalf_of;
pub mod silent;

pub use authorization_code::*;
pub use client_credentials::*;
pub use common::*;
pub use interactive::*;
pub use on_behalf_of::*;
pub use silent::*;

// crates.io
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	auth::{IdToken, ScopeSet, TokenSecret, User},
	authority::{Authority, EndpointCache, KnownAuthorities},
	cache::{AccessTokenCacheItem, CacheKey, TokenCache},
	config::ApplicationConfig,
	http::IdentityHttpClient,
	oauth::{OAuthClient, TransportErrorMapper},
	request::{AuthenticationRequestParametersBuilder, CacheTarget, ClientCredential},
	telemetry::Telemetry,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

#[cfg(feature = "reqwest")]
/// Application specialized for the crate's default reqwest transport stack.
pub type ReqwestClientApplication = ClientApplication<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Where an [`AuthenticationResult`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TokenSource {
	/// Served from the token cache.
	Cache,
	/// Issued by the token endpoint during this call.
	IdentityProvider,
}

/// Tokens and identity returned by a successful acquisition.
#[derive(Clone, Debug)]
pub struct AuthenticationResult {
	/// Access token.
	pub access_token: TokenSecret,
	/// Token type, usually `Bearer`.
	pub token_type: String,
	/// Expiry instant.
	pub expires_on: OffsetDateTime,
	/// Extended expiry instant, when the authority granted one.
	pub extended_expires_on: Option<OffsetDateTime>,
	/// Scopes the access token is valid for.
	pub scope: ScopeSet,
	/// ID token issued alongside, if any.
	pub id_token: Option<IdToken>,
	/// Signed-in user; `None` for app-only tokens.
	pub user: Option<User>,
	/// Tenant the token was issued by, when the ID token names it.
	pub tenant_id: Option<String>,
	/// Correlation id of the call.
	pub correlation_id: Uuid,
	/// Cache or network.
	pub source: TokenSource,
}
impl AuthenticationResult {
	pub(crate) fn from_cache_item(
		item: &AccessTokenCacheItem,
		correlation_id: Uuid,
		source: TokenSource,
	) -> Self {
		let claims = item.id_token.as_ref().map(IdToken::claims);
		let user = User::from_identity(item.client_info.as_ref().map(|info| info.decoded()), claims)
			.or_else(|| item.user_identifier.clone().map(User::new));

		Self {
			access_token: item.access_token.clone(),
			token_type: item.token_type.clone(),
			expires_on: item.expires_at(),
			extended_expires_on: item
				.extended_expires_on
				.and_then(|at| OffsetDateTime::from_unix_timestamp(at).ok()),
			scope: item.scope.clone(),
			id_token: item.id_token.clone(),
			user,
			tenant_id: claims.and_then(|claims| claims.tid.clone()),
			correlation_id,
			source,
		}
	}
}

/// Client application: configuration plus every per-application context object.
///
/// Trusted hosts, discovered endpoints, telemetry, and both token caches live here instead of
/// in process-wide state. Share one instance (behind an `Arc`) across tasks; the caches and
/// registries are internally synchronized.
pub struct ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	config: ApplicationConfig,
	authority: Authority,
	credential: Option<ClientCredential>,
	oauth: OAuthClient<C, M>,
	known_authorities: Arc<KnownAuthorities>,
	endpoints: Arc<EndpointCache>,
	telemetry: Arc<Telemetry>,
	user_cache: Arc<TokenCache>,
	app_cache: Arc<TokenCache>,
	web_ui: Option<Arc<dyn WebUi>>,
	flow_guards: Arc<Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>>,
}
impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an application that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		config: ApplicationConfig,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let authority = config.default_authority()?;
		let known_authorities = Arc::new(config.known_authorities());

		Ok(Self {
			config,
			authority,
			credential: None,
			oauth: OAuthClient::new(http_client, mapper),
			known_authorities,
			endpoints: Default::default(),
			telemetry: Default::default(),
			user_cache: Default::default(),
			app_cache: Default::default(),
			web_ui: None,
			flow_guards: Default::default(),
		})
	}

	/// Attaches the confidential client credential.
	pub fn with_client_credential(mut self, credential: ClientCredential) -> Self {
		self.credential = Some(credential);

		self
	}

	/// Attaches the web UI used by interactive sign-in.
	pub fn with_web_ui(mut self, web_ui: impl 'static + WebUi) -> Self {
		self.web_ui = Some(Arc::new(web_ui));

		self
	}

	/// Shares a telemetry registry.
	pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
		self.telemetry = telemetry;

		self
	}

	/// Shares a trusted host registry.
	pub fn with_known_authorities(mut self, known_authorities: Arc<KnownAuthorities>) -> Self {
		self.known_authorities = known_authorities;

		self
	}

	/// Shares an endpoint discovery cache.
	pub fn with_endpoint_cache(mut self, endpoints: Arc<EndpointCache>) -> Self {
		self.endpoints = endpoints;

		self
	}

	/// Shares the user token cache.
	pub fn with_user_cache(mut self, cache: Arc<TokenCache>) -> Self {
		self.user_cache = cache;

		self
	}

	/// Shares the app-only token cache.
	pub fn with_app_cache(mut self, cache: Arc<TokenCache>) -> Self {
		self.app_cache = cache;

		self
	}

	/// Static configuration.
	pub fn config(&self) -> &ApplicationConfig {
		&self.config
	}

	/// Default authority.
	pub fn authority(&self) -> &Authority {
		&self.authority
	}

	/// Trusted host registry.
	pub fn known_authorities(&self) -> &Arc<KnownAuthorities> {
		&self.known_authorities
	}

	/// Endpoint discovery cache.
	pub fn endpoint_cache(&self) -> &Arc<EndpointCache> {
		&self.endpoints
	}

	/// Telemetry registry.
	pub fn telemetry(&self) -> &Arc<Telemetry> {
		&self.telemetry
	}

	/// Token cache for signed-in users.
	pub fn user_cache(&self) -> &Arc<TokenCache> {
		&self.user_cache
	}

	/// Token cache for app-only tokens.
	pub fn app_cache(&self) -> &Arc<TokenCache> {
		&self.app_cache
	}

	/// Starts request parameters for `scope` against the default authority.
	///
	/// The configured redirect URI and client credential are pre-filled.
	pub fn parameters(&self, scope: ScopeSet) -> AuthenticationRequestParametersBuilder {
		let mut builder = crate::request::AuthenticationRequestParameters::builder(
			self.authority.clone(),
			self.config.client_id.clone(),
			scope,
		)
		.client_credential(self.credential.clone());

		if let Some(redirect_uri) = &self.config.redirect_uri {
			builder = builder.redirect_uri(redirect_uri.clone());
		}

		builder
	}

	/// Parses an authority override using this application's validation setting.
	pub fn resolve_authority(&self, authority: &str) -> Result<Authority> {
		Ok(Authority::parse(authority, self.config.validate_authority)?)
	}

	/// Removes every cached token of `user` from the user cache.
	pub fn remove_user(&self, user: &User) -> usize {
		self.user_cache.remove_user(&user.identifier)
	}

	pub(crate) fn cache_for(&self, target: CacheTarget) -> &TokenCache {
		match target {
			CacheTarget::User => &self.user_cache,
			CacheTarget::App => &self.app_cache,
		}
	}
}
#[cfg(feature = "reqwest")]
impl ClientApplication<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates an application backed by its own reqwest transport.
	pub fn new(config: ApplicationConfig) -> Result<Self> {
		Self::with_http_client(config, ReqwestHttpClient::default(), ReqwestTransportErrorMapper)
	}
}
impl<C, M> Debug for ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientApplication")
			.field("client_id", &self.config.client_id)
			.field("authority", &self.authority.scrubbed())
			.field("client_credential_set", &self.credential.is_some())
			.field("web_ui_set", &self.web_ui.is_some())
			.finish()
	}
}
