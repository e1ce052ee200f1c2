//! Shared acquisition pipeline.
//!
//! Every handler runs the same state machine: validated parameters, cache consultation,
//! authority trust and endpoint resolution, the grant-specific form, the token exchange, and
//! one atomic cache update. Handlers only contribute data (their form, cache identity, and
//! cached scope); the control flow lives here.

// crates.io
use async_lock::MutexGuardArc;
// self
use crate::{
	_prelude::*,
	auth::{EncodedClientInfo, IdToken, ScopeSet, User, UserIdentifier},
	authority::{AuthorityEndpoints, scrub_tenant},
	cache::{
		AccessTokenCacheItem, AccessTokenCacheKey, CacheKey, RefreshTokenCacheItem, TokenCache,
	},
	error::{ConfigError, ProtocolError, TransientError, codes},
	flows::{
		AuthenticationResult, AuthorizationCodeFlow, ClientApplication, ClientCredentialFlow,
		InteractiveFlow, OnBehalfOfFlow, SilentFlow, TokenSource,
	},
	http::IdentityHttpClient,
	oauth::{
		self, ClientAuthentication, GrantType, TokenRequest, TokenResponse, TransportErrorMapper,
	},
	obs::{self, FlowKind, FlowOutcome, FlowSpan, FlowState},
	request::AuthenticationRequestParameters,
	telemetry::{CollectionHandle, Event, events, keys},
};

/// Closed set of acquisition requests accepted by [`ClientApplication::acquire_token`].
#[derive(Clone, Debug)]
pub enum FlowRequest {
	/// Authorization code redemption.
	AuthorizationCode(AuthorizationCodeFlow),
	/// App-only client credentials.
	ClientCredentials(ClientCredentialFlow),
	/// On-behalf-of assertion exchange.
	OnBehalfOf(OnBehalfOfFlow),
	/// Interactive sign-in.
	Interactive(InteractiveFlow),
	/// Cache lookup with refresh-token fallback.
	Silent(SilentFlow),
}
impl FlowRequest {
	/// Flow kind used for spans and metrics.
	pub fn kind(&self) -> FlowKind {
		match self {
			Self::AuthorizationCode(_) => FlowKind::AuthorizationCode,
			Self::ClientCredentials(_) => FlowKind::ClientCredentials,
			Self::OnBehalfOf(_) => FlowKind::OnBehalfOf,
			Self::Interactive(_) => FlowKind::Interactive,
			Self::Silent(_) => FlowKind::Silent,
		}
	}

	/// Public API name recorded in telemetry.
	pub fn api_id(&self) -> &'static str {
		match self {
			Self::AuthorizationCode(_) => "acquire_token_by_authorization_code",
			Self::ClientCredentials(_) => "acquire_token_for_client",
			Self::OnBehalfOf(_) => "acquire_token_on_behalf_of",
			Self::Interactive(_) => "acquire_token_interactive",
			Self::Silent(_) => "acquire_token_silent",
		}
	}

	/// Request parameters of the wrapped handler.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		match self {
			Self::AuthorizationCode(flow) => flow.parameters(),
			Self::ClientCredentials(flow) => flow.parameters(),
			Self::OnBehalfOf(flow) => flow.parameters(),
			Self::Interactive(flow) => flow.parameters(),
			Self::Silent(flow) => flow.parameters(),
		}
	}

	fn grant(&self) -> GrantType {
		match self {
			Self::AuthorizationCode(_) | Self::Interactive(_) => GrantType::AuthorizationCode,
			Self::ClientCredentials(_) => GrantType::ClientCredentials,
			Self::OnBehalfOf(_) => GrantType::JwtBearer,
			Self::Silent(_) => GrantType::RefreshToken,
		}
	}

	// A code is single-use, so code-based flows never find their token in the cache.
	fn consults_cache(&self) -> bool {
		matches!(self, Self::ClientCredentials(_) | Self::OnBehalfOf(_) | Self::Silent(_))
			&& !self.parameters().force_refresh()
	}

	fn user_identifier(&self) -> Option<UserIdentifier> {
		match self {
			Self::ClientCredentials(_) => None,
			Self::OnBehalfOf(flow) => Some(flow.user_identifier().clone()),
			Self::Silent(flow) => Some(flow.user().identifier.clone()),
			Self::AuthorizationCode(_) | Self::Interactive(_) =>
				self.parameters().user().map(|user| user.identifier.clone()),
		}
	}

	fn assertion_hash(&self) -> Option<&str> {
		match self {
			Self::OnBehalfOf(flow) => Some(flow.assertion_hash()),
			_ => None,
		}
	}

	// Code-based flows learn the user from the response; the others know it up front.
	fn owner(&self, from_response: Option<UserIdentifier>) -> Option<UserIdentifier> {
		match self {
			Self::AuthorizationCode(_) | Self::Interactive(_) =>
				from_response.or_else(|| self.user_identifier()),
			_ => self.user_identifier(),
		}
	}

	fn cache_scope(&self, scope: &ScopeSet) -> ScopeSet {
		match self {
			Self::ClientCredentials(_) => scope.clone(),
			_ => scope.without_reserved(),
		}
	}

	fn lookup_key(&self) -> AccessTokenCacheKey {
		let params = self.parameters();

		AccessTokenCacheKey::new(
			params.authority().canonical(),
			params.client_id().clone(),
			self.cache_scope(params.scope()),
			self.user_identifier(),
		)
	}
}
impl From<AuthorizationCodeFlow> for FlowRequest {
	fn from(flow: AuthorizationCodeFlow) -> Self {
		Self::AuthorizationCode(flow)
	}
}
impl From<ClientCredentialFlow> for FlowRequest {
	fn from(flow: ClientCredentialFlow) -> Self {
		Self::ClientCredentials(flow)
	}
}
impl From<OnBehalfOfFlow> for FlowRequest {
	fn from(flow: OnBehalfOfFlow) -> Self {
		Self::OnBehalfOf(flow)
	}
}
impl From<InteractiveFlow> for FlowRequest {
	fn from(flow: InteractiveFlow) -> Self {
		Self::Interactive(flow)
	}
}
impl From<SilentFlow> for FlowRequest {
	fn from(flow: SilentFlow) -> Self {
		Self::Silent(flow)
	}
}

impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Runs `request` through the shared pipeline.
	///
	/// The call's telemetry is flushed as one batch before this returns, whatever the outcome.
	/// Dropping the future first discards the batch.
	pub async fn acquire_token(
		&self,
		request: impl Into<FlowRequest>,
	) -> Result<AuthenticationResult> {
		let request = request.into();
		let kind = request.kind();
		let span = FlowSpan::new(kind, request.api_id());

		obs::record_flow_outcome(kind, FlowOutcome::Attempt);

		let params = request.parameters();
		let correlation_id = params.context().correlation_id();
		let collection = self.telemetry.open_scoped(correlation_id);
		let mut api_event = Event::start(events::API);

		api_event
			.set(keys::API_ID, request.api_id())
			.set(keys::AUTHORITY, params.authority().scrubbed())
			.set(keys::CORRELATION_ID, correlation_id.to_string());

		let result = span.instrument(self.run_pipeline(&request, collection.handle())).await;

		match &result {
			Ok(_) => {
				obs::record_flow_outcome(kind, FlowOutcome::Success);
				api_event.set(keys::WAS_SUCCESSFUL, "true");
			},
			Err(err) => {
				obs::record_transition(kind, FlowState::Failed);
				obs::record_flow_outcome(kind, FlowOutcome::Failure);
				api_event.set(keys::WAS_SUCCESSFUL, "false").set(keys::ERROR_CODE, err.code());
			},
		}

		api_event.stop();
		self.telemetry.add_event(collection.handle(), api_event);
		collection.flush();

		result
	}

	async fn run_pipeline(
		&self,
		request: &FlowRequest,
		collection: &CollectionHandle,
	) -> Result<AuthenticationResult> {
		let kind = request.kind();
		let params = request.parameters();
		let correlation_id = params.context().correlation_id();
		let cache = self.cache_for(params.cache_target());

		obs::record_transition(kind, FlowState::ParametersValidated);

		let lookup = request.consults_cache().then(|| request.lookup_key());
		let _singleflight = match &lookup {
			Some(key) => Some(join_flight(&self.flow_guards, &key.to_cache_key()).await),
			None => None,
		};

		if let Some(key) = &lookup
			&& let Some(item) = self.consult_cache(request, cache, key, collection)?
		{
			return Ok(AuthenticationResult::from_cache_item(
				&item,
				correlation_id,
				TokenSource::Cache,
			));
		}

		obs::record_transition(kind, FlowState::CacheConsulted);

		let redeemed = match request {
			FlowRequest::Silent(flow) => Some(
				cache
					.find_refresh_token(params.authority(), params.client_id(), Some(&flow.user().identifier))
					.ok_or_else(no_tokens_found)?,
			),
			_ => None,
		};

		ensure_not_cancelled(params)?;

		let authority = params.authority();

		self.known_authorities
			.ensure_trusted(&self.oauth, authority, self.config.instance_discovery_endpoint.as_ref())
			.await?;

		let endpoints =
			self.endpoints.resolve(&self.oauth, authority, self.config.endpoint_discovery).await?;
		let token_request = match request {
			FlowRequest::AuthorizationCode(flow) => flow.token_request(),
			FlowRequest::ClientCredentials(flow) => flow.token_request(),
			FlowRequest::OnBehalfOf(flow) => flow.token_request(),
			FlowRequest::Interactive(flow) => {
				let code = self.authorize(flow, &endpoints, collection).await?;

				flow.token_request(&code)
			},
			FlowRequest::Silent(flow) => match &redeemed {
				Some(item) => flow.token_request(&item.refresh_token),
				None => return Err(no_tokens_found()),
			},
		};
		let auth = oauth::authenticate_client(
			params.client_id(),
			params.client_credential(),
			self.config.client_auth_method,
			&endpoints.token_endpoint,
		)?;

		obs::record_transition(kind, FlowState::NetworkRequestBuilt);
		ensure_not_cancelled(params)?;

		let issued_at = OffsetDateTime::now_utc();
		let redeemed_key = redeemed.as_ref().map(RefreshTokenCacheItem::cache_key);
		let response = self
			.redeem(
				request,
				&endpoints,
				&token_request,
				&auth,
				cache,
				redeemed_key.as_ref(),
				collection,
			)
			.await?;

		obs::record_transition(kind, FlowState::NetworkRequestSent);
		// The exchange completed; a cancellation requested meanwhile discards the tokens.
		ensure_not_cancelled(params)?;

		let (access_token, refresh_token) = build_cache_items(request, &response, issued_at)?;

		obs::record_transition(kind, FlowState::ResponseParsed);

		let result = AuthenticationResult::from_cache_item(
			&access_token,
			correlation_id,
			TokenSource::IdentityProvider,
		);

		cache.save_tokens(access_token, refresh_token, redeemed_key.as_ref());
		obs::record_transition(kind, FlowState::CacheUpdated);

		Ok(result)
	}

	fn consult_cache(
		&self,
		request: &FlowRequest,
		cache: &TokenCache,
		key: &AccessTokenCacheKey,
		collection: &CollectionHandle,
	) -> Result<Option<AccessTokenCacheItem>> {
		let kind = request.kind();
		let mut event = Event::start(events::CACHE);
		let found = match request.assertion_hash() {
			Some(assertion_hash) => cache.find_access_token_for_assertion(
				&key.authority,
				&key.client_id,
				&key.scope,
				key.user_identifier.as_ref(),
				assertion_hash,
			),
			None => cache.find_access_token(
				&key.authority,
				&key.client_id,
				&key.scope,
				key.user_identifier.as_ref(),
			),
		};

		event.set(keys::CACHE_HIT, matches!(found, Ok(Some(_))).to_string());
		event.stop();
		self.telemetry.add_event(collection, event);

		let found = found?;

		if found.is_some() {
			obs::record_transition(kind, FlowState::CacheHit);
		}

		Ok(found)
	}

	#[allow(clippy::too_many_arguments)]
	async fn redeem(
		&self,
		request: &FlowRequest,
		endpoints: &AuthorityEndpoints,
		token_request: &TokenRequest,
		auth: &ClientAuthentication,
		cache: &TokenCache,
		refresh_key: Option<&CacheKey>,
		collection: &CollectionHandle,
	) -> Result<TokenResponse> {
		let mut event = Event::start(events::HTTP);

		event.set(
			keys::HTTP_PATH,
			scrub_tenant(endpoints.token_endpoint.path()).unwrap_or_default(),
		);

		let outcome = self
			.oauth
			.exchange(&endpoints.token_endpoint, request.parameters().client_id(), token_request, auth)
			.await;
		let status = match &outcome {
			Ok((_, meta)) => meta.status,
			Err(Error::Transient(TransientError::Endpoint { status, .. })) => *status,
			Err(err) => err.protocol().and_then(|protocol| protocol.status),
		};

		if let Some(status) = status {
			event.set(keys::HTTP_STATUS, status.to_string());
		}

		event.stop();
		self.telemetry.add_event(collection, event);

		match outcome {
			Ok((response, _)) => Ok(response),
			Err(Error::Protocol(protocol)) => {
				let rejected_refresh = protocol.code == "invalid_grant";
				let err = oauth::translate_token_error(request.grant(), protocol);

				if rejected_refresh && let Some(key) = refresh_key {
					cache.remove(key);
				}

				Err(err)
			},
			Err(err) => Err(err),
		}
	}
}

/// In-flight request slot for one cache key.
///
/// The map entry is removed once the last holder or waiter is gone.
struct FlightGuard<'a> {
	guards: &'a FlightGuards,
	key: CacheKey,
	lock: Option<MutexGuardArc<()>>,
}
impl Drop for FlightGuard<'_> {
	fn drop(&mut self) {
		drop(self.lock.take());

		let mut guards = self.guards.lock();

		if guards.get(&self.key).is_some_and(|entry| Arc::strong_count(entry) == 1) {
			guards.remove(&self.key);
		}
	}
}

type FlightGuards = Mutex<HashMap<CacheKey, Arc<AsyncMutex<()>>>>;

// Callers for the same key queue behind one in-flight request.
async fn join_flight<'a>(guards: &'a FlightGuards, key: &CacheKey) -> FlightGuard<'a> {
	let mut flight = FlightGuard { guards, key: key.clone(), lock: None };
	let pending = guards
		.lock()
		.entry(key.clone())
		.or_insert_with(|| Arc::new(AsyncMutex::new(())))
		.lock_arc();

	flight.lock = Some(pending.await);

	flight
}

pub(crate) fn ensure_not_cancelled(params: &AuthenticationRequestParameters) -> Result<()> {
	if params.context().is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
}

fn no_tokens_found() -> Error {
	Error::ui_required(
		codes::NO_TOKENS_FOUND,
		ProtocolError::new(codes::NO_TOKENS_FOUND)
			.with_description("No refresh token was found in the cache for the user"),
	)
}

/// Turns a parsed token response into the cache items of one atomic write.
fn build_cache_items(
	request: &FlowRequest,
	response: &TokenResponse,
	issued_at: OffsetDateTime,
) -> Result<(AccessTokenCacheItem, Option<RefreshTokenCacheItem>), ConfigError> {
	let params = request.parameters();
	let authority = params.authority();
	let id_token = response.id_token.as_deref().map(IdToken::parse).transpose()?;
	let client_info = response.client_info.as_deref().map(EncodedClientInfo::parse).transpose()?;
	let from_response = User::from_identity(
		client_info.as_ref().map(EncodedClientInfo::decoded),
		id_token.as_ref().map(IdToken::claims),
	)
	.map(|user| user.identifier);
	let owner = request.owner(from_response);
	let granted = response.granted_scope()?.filter(|scope| !scope.is_empty());
	let scope = request.cache_scope(granted.as_ref().unwrap_or(params.scope()));
	let mut builder =
		AccessTokenCacheItem::builder(authority.canonical(), params.client_id().clone(), scope)
			.access_token(response.access_token.clone())
			.issued_at(issued_at)
			.expires_in(response.lifetime()?)
			.user_identifier(owner.clone())
			.assertion_hash(request.assertion_hash().map(str::to_owned));

	if let Some(token_type) = &response.token_type {
		builder = builder.token_type(token_type);
	}
	if let Some(extended) = response.extended_lifetime()? {
		builder = builder.extended_expires_in(extended);
	}
	if let Some(id_token) = id_token {
		builder = builder.id_token(id_token);
	}
	if let Some(client_info) = &client_info {
		builder = builder.client_info(client_info.clone());
	}

	let access_token = builder.build()?;
	let refresh_token = response.refresh_token.clone().map(|secret| {
		RefreshTokenCacheItem::new(authority.canonical(), params.client_id().clone(), owner, secret)
			.with_environment(authority.host())
			.with_client_info(client_info)
	});

	Ok((access_token, refresh_token))
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{
		auth::{ClientId, id_token},
		authority::Authority,
		request::{ClientCredential, UserAssertion},
	};

	fn params(scope: &str) -> AuthenticationRequestParameters {
		AuthenticationRequestParameters::builder(
			Authority::parse("https://login.example.com/tenant/", false)
				.expect("Authority fixture should parse."),
			ClientId::new("client").expect("Client fixture should be valid."),
			ScopeSet::from_str(scope).expect("Scope fixture should parse."),
		)
		.client_credential(Some(ClientCredential::secret("s3cr3t")))
		.build()
	}

	fn response(json: serde_json::Value) -> TokenResponse {
		serde_json::from_value(json).expect("Token response fixture should parse.")
	}

	#[test]
	fn client_credential_items_are_app_only() {
		let request = FlowRequest::from(
			ClientCredentialFlow::new(params("r1/.default"))
				.expect("Client credential flow should build."),
		);
		let (access, refresh) = build_cache_items(
			&request,
			&response(serde_json::json!({"access_token": "at", "expires_in": 3600})),
			OffsetDateTime::now_utc(),
		)
		.expect("App-only response should build cache items.");

		assert!(access.user_identifier.is_none());
		assert!(refresh.is_none());
		assert_eq!(access.key(), request.lookup_key());
	}

	#[test]
	fn user_items_strip_reserved_scopes_and_keep_the_assertion_owner() {
		let assertion = id_token::encode_unsigned_jwt(&serde_json::json!({"oid": "o", "tid": "t"}));
		let params = AuthenticationRequestParameters::builder(
			Authority::parse("https://login.example.com/tenant/", false)
				.expect("Authority fixture should parse."),
			ClientId::new("client").expect("Client fixture should be valid."),
			ScopeSet::from_str("r1/scope1").expect("Scope fixture should parse."),
		)
		.client_credential(Some(ClientCredential::secret("s3cr3t")))
		.user_assertion(UserAssertion::new(assertion))
		.build();
		let request =
			FlowRequest::from(OnBehalfOfFlow::new(params).expect("On-behalf-of flow should build."));
		let (access, refresh) = build_cache_items(
			&request,
			&response(serde_json::json!({
				"access_token": "at",
				"refresh_token": "rt",
				"expires_in": 3600,
				"scope": "r1/scope1 openid profile offline_access",
			})),
			OffsetDateTime::now_utc(),
		)
		.expect("User response should build cache items.");

		assert_eq!(access.scope.normalized(), "r1/scope1");
		assert_eq!(access.user_identifier.as_deref(), Some("o.t"));
		assert_eq!(
			refresh.expect("Refresh token should be cached.").environment.as_deref(),
			Some("login.example.com")
		);
	}

	#[test]
	fn code_flows_skip_the_cache_and_force_refresh_disables_lookups() {
		let forced = AuthenticationRequestParameters::builder(
			Authority::parse("https://login.example.com/tenant/", false)
				.expect("Authority fixture should parse."),
			ClientId::new("client").expect("Client fixture should be valid."),
			ScopeSet::from_str("r1/.default").expect("Scope fixture should parse."),
		)
		.client_credential(Some(ClientCredential::secret("s3cr3t")))
		.force_refresh(true)
		.build();

		assert!(
			!FlowRequest::from(
				ClientCredentialFlow::new(forced).expect("Client credential flow should build.")
			)
			.consults_cache()
		);
		assert!(
			FlowRequest::from(
				ClientCredentialFlow::new(params("r1/.default"))
					.expect("Client credential flow should build.")
			)
			.consults_cache()
		);
	}

	#[tokio::test]
	async fn flight_slots_are_released_by_the_last_holder() {
		let guards = FlightGuards::default();
		let key = FlowRequest::from(
			ClientCredentialFlow::new(params("r1/.default"))
				.expect("Client credential flow should build."),
		)
		.lookup_key()
		.to_cache_key();

		{
			let _flight = join_flight(&guards, &key).await;

			assert_eq!(guards.lock().len(), 1);
		}

		assert!(guards.lock().is_empty());

		let holder = join_flight(&guards, &key).await;
		let waiter =
			tokio::time::timeout(std::time::Duration::from_millis(20), join_flight(&guards, &key))
				.await;

		assert!(waiter.is_err());
		assert_eq!(guards.lock().len(), 1);

		drop(holder);

		assert!(guards.lock().is_empty());
	}
}
