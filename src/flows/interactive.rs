//! Interactive sign-in: authorize URL, web UI round-trip, redirect classification, and PKCE.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	authority::AuthorityEndpoints,
	error::{ConfigError, ProtocolError, codes},
	flows::{AuthenticationResult, ClientApplication},
	http::IdentityHttpClient,
	oauth::{TokenGrant, TokenRequest, TransportErrorMapper},
	obs::{self, FlowKind, FlowState},
	request::{AuthenticationRequestParameters, CacheTarget},
	telemetry::{CollectionHandle, Event, events, keys},
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const LOGIN_REQUIRED: &str = "login_required";

/// Boxed future returned by [`WebUi::acquire_authorization`].
pub type WebUiFuture<'a> = Pin<Box<dyn 'a + Future<Output = AuthorizationResult> + Send>>;

/// Presents an authorization URL to the user and reports the redirect it ended on.
pub trait WebUi
where
	Self: Send + Sync,
{
	/// Navigates to `authorization_url` and waits for a navigation to `redirect_uri`.
	fn acquire_authorization<'a>(
		&'a self,
		authorization_url: &'a Url,
		redirect_uri: &'a Url,
	) -> WebUiFuture<'a>;
}

/// `prompt` behavior of the authorize request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Prompt {
	/// Let the user pick among signed-in accounts.
	#[default]
	SelectAccount,
	/// Always ask for credentials.
	ForceLogin,
	/// Always show the consent screen.
	Consent,
	/// Never show UI; fail with `no_prompt_failed` when interaction is needed.
	Never,
}
impl Prompt {
	/// Wire value of the `prompt` parameter.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::SelectAccount => "select_account",
			Self::ForceLogin => "login",
			Self::Consent => "consent",
			Self::Never => "none",
		}
	}
}

/// Classification of a finished web UI session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AuthorizationStatus {
	/// The redirect carried a code.
	Success,
	/// The user closed the UI.
	UserCancel,
	/// The redirect carried `error` / `error_description`.
	ProtocolError,
	/// Navigation failed with an HTTP error.
	ErrorHttp,
	/// The UI failed without a classifiable outcome.
	UnknownError,
}

/// Outcome reported by a [`WebUi`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthorizationResult {
	/// Outcome class.
	pub status: AuthorizationStatus,
	/// Authorization code on success.
	pub code: Option<String>,
	/// Provider `error` value.
	pub error: Option<String>,
	/// Provider `error_description` value.
	pub error_description: Option<String>,
	/// `state` echoed by the redirect.
	pub state: Option<String>,
}
impl AuthorizationResult {
	/// Creates an empty result of `status`.
	pub fn new(status: AuthorizationStatus) -> Self {
		Self { status, code: None, error: None, error_description: None, state: None }
	}

	/// Classifies the redirect URL a UI ended on.
	///
	/// `code` means success and `error` means a protocol error; `status` is kept otherwise.
	pub fn from_redirect(status: AuthorizationStatus, redirect: &Url) -> Self {
		let mut result = Self::new(status);

		for (key, value) in redirect.query_pairs() {
			match key.as_ref() {
				"code" => result.code = Some(value.into_owned()),
				"state" => result.state = Some(value.into_owned()),
				"error" => result.error = Some(value.into_owned()),
				"error_description" => result.error_description = Some(value.into_owned()),
				_ => {},
			}
		}

		if result.error.is_some() {
			result.status = AuthorizationStatus::ProtocolError;
		} else if result.code.is_some() {
			result.status = AuthorizationStatus::Success;
		}

		result
	}

	fn protocol_error(&self, fallback: &str) -> ProtocolError {
		let mut error = ProtocolError::new(self.error.as_deref().unwrap_or(fallback));

		if let Some(description) = &self.error_description {
			error = error.with_description(description);
		}

		error
	}
}

/// Interactive sign-in handler.
#[derive(Clone, Debug)]
pub struct InteractiveFlow {
	params: AuthenticationRequestParameters,
	prompt: Prompt,
	extra_scopes_to_consent: Option<ScopeSet>,
	state: String,
	pkce: PkcePair,
}
impl InteractiveFlow {
	/// Validates `params`: a redirect URI without a fragment is required.
	pub fn new(params: AuthenticationRequestParameters) -> Result<Self, ConfigError> {
		if params.redirect_uri().is_none() {
			return Err(ConfigError::MissingRedirectUri { flow: "interactive" });
		}

		params.validate_redirect_uri()?;

		Ok(Self {
			params: params.with_cache_target(CacheTarget::User),
			prompt: Prompt::default(),
			extra_scopes_to_consent: None,
			state: random_string(STATE_LEN),
			pkce: PkcePair::generate(),
		})
	}

	/// Sets the `prompt` behavior.
	pub fn with_prompt(mut self, prompt: Prompt) -> Self {
		self.prompt = prompt;

		self
	}

	/// Asks for consent to more scopes than the token is requested for.
	pub fn with_extra_scopes_to_consent(mut self, scope: ScopeSet) -> Self {
		self.extra_scopes_to_consent = Some(scope);

		self
	}

	/// Request parameters.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		&self.params
	}

	/// `prompt` behavior.
	pub fn prompt(&self) -> Prompt {
		self.prompt
	}

	/// Opaque `state` the redirect must echo.
	pub fn state(&self) -> &str {
		&self.state
	}

	/// PKCE S256 challenge sent on the authorize URL.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE verifier sent with the code redemption.
	pub fn code_verifier(&self) -> &TokenSecret {
		&self.pkce.verifier
	}

	/// Builds the authorize URL against `endpoints`.
	///
	/// Fails with `duplicate_query_parameter` when an extra query parameter names a
	/// parameter this request already sets.
	pub fn authorization_request_url(
		&self,
		endpoints: &AuthorityEndpoints,
	) -> Result<Url, ConfigError> {
		let params = &self.params;
		let redirect_uri = params
			.redirect_uri()
			.ok_or(ConfigError::MissingRedirectUri { flow: "interactive" })?;
		let scope = match &self.extra_scopes_to_consent {
			Some(extra) => params.scope().union(extra.iter())?,
			None => params.scope().clone(),
		}
		.with_reserved();
		let mut pairs = vec![
			("client_id", params.client_id().to_string()),
			("response_type", "code".to_owned()),
			("redirect_uri", redirect_uri.to_string()),
			("scope", scope.normalized()),
			("state", self.state.clone()),
			("code_challenge", self.pkce.challenge.clone()),
			("code_challenge_method", "S256".to_owned()),
			("client_info", "1".to_owned()),
			("prompt", self.prompt.as_str().to_owned()),
		];

		if let Some(login_hint) = params.login_hint() {
			pairs.push(("login_hint", login_hint.to_owned()));
		}

		let reserved = pairs.iter().map(|(name, _)| *name).collect::<Vec<_>>();
		let extra = params.checked_extra_parameters(&reserved)?;
		let mut url = endpoints.authorization_endpoint.clone();

		url.query_pairs_mut()
			.extend_pairs(pairs.iter().map(|(name, value)| (*name, value.as_str())))
			.extend_pairs(extra.iter().map(|(name, value)| (name.as_str(), value.as_str())));

		Ok(url)
	}

	/// Turns a web UI outcome into the authorization code or the matching error.
	pub fn verify(&self, result: &AuthorizationResult) -> Result<TokenSecret> {
		match result.status {
			AuthorizationStatus::Success => {
				if result.state.as_deref() != Some(self.state.as_str()) {
					return Err(ProtocolError::new(codes::STATE_MISMATCH)
						.with_description("Returned state does not match the request")
						.into());
				}

				result.code.clone().map(TokenSecret::new).ok_or_else(|| {
					ProtocolError::new(codes::AUTHENTICATION_UI_FAILED)
						.with_description("Redirect did not carry an authorization code")
						.into()
				})
			},
			AuthorizationStatus::UserCancel => Err(Error::UserCancelled),
			AuthorizationStatus::ProtocolError
				if result.error.as_deref() == Some(LOGIN_REQUIRED) =>
				Err(Error::ui_required(
					codes::NO_PROMPT_FAILED,
					result.protocol_error(LOGIN_REQUIRED),
				)),
			AuthorizationStatus::ProtocolError
			| AuthorizationStatus::ErrorHttp
			| AuthorizationStatus::UnknownError =>
				Err(result.protocol_error(codes::AUTHENTICATION_UI_FAILED).into()),
		}
	}

	pub(crate) fn token_request(&self, code: &TokenSecret) -> TokenRequest {
		TokenRequest::new(
			TokenGrant::AuthorizationCode {
				code: code.clone(),
				redirect_uri: self.params.redirect_uri().cloned(),
				code_verifier: Some(self.pkce.verifier.clone()),
			},
			self.params.scope().with_reserved(),
		)
		.extra_param("client_info", "1")
	}
}

/// Authorize URL plus the values the caller needs to finish the exchange.
#[derive(Clone, Debug)]
pub struct AuthorizationRequest {
	/// Fully-formed authorize URL.
	pub url: Url,
	/// `state` the redirect must echo.
	pub state: String,
	/// PKCE verifier to pass to the code redemption.
	pub code_verifier: TokenSecret,
}

impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Signs the user in through the configured web UI and redeems the code.
	pub async fn acquire_token_interactive(
		&self,
		scope: ScopeSet,
		login_hint: Option<&str>,
		prompt: Prompt,
		extra_query_parameters: Option<&str>,
	) -> Result<AuthenticationResult> {
		let mut builder = self.parameters(scope);

		if let Some(login_hint) = login_hint {
			builder = builder.login_hint(login_hint);
		}
		if let Some(extra) = extra_query_parameters {
			builder = builder.extra_query_parameters(extra);
		}

		let flow = InteractiveFlow::new(builder.build())?.with_prompt(prompt);

		self.acquire_token(flow).await
	}

	/// Builds the authorize URL without running the web UI.
	pub async fn get_authorization_request_url(
		&self,
		scope: ScopeSet,
		login_hint: Option<&str>,
		extra_query_parameters: Option<&str>,
	) -> Result<AuthorizationRequest> {
		let mut builder = self.parameters(scope);

		if let Some(login_hint) = login_hint {
			builder = builder.login_hint(login_hint);
		}
		if let Some(extra) = extra_query_parameters {
			builder = builder.extra_query_parameters(extra);
		}

		let flow = InteractiveFlow::new(builder.build())?;
		let authority = flow.parameters().authority();

		self.known_authorities
			.ensure_trusted(&self.oauth, authority, self.config.instance_discovery_endpoint.as_ref())
			.await?;

		let endpoints =
			self.endpoints.resolve(&self.oauth, authority, self.config.endpoint_discovery).await?;
		let url = flow.authorization_request_url(&endpoints)?;

		Ok(AuthorizationRequest {
			url,
			state: flow.state.clone(),
			code_verifier: flow.pkce.verifier.clone(),
		})
	}

	/// Runs the authorization half of `flow` and returns the code.
	///
	/// Fails before the UI is shown when the authorize URL cannot be built.
	pub async fn pre_token_request(&self, flow: &InteractiveFlow) -> Result<TokenSecret> {
		let authority = flow.parameters().authority();

		self.known_authorities
			.ensure_trusted(&self.oauth, authority, self.config.instance_discovery_endpoint.as_ref())
			.await?;

		let endpoints =
			self.endpoints.resolve(&self.oauth, authority, self.config.endpoint_discovery).await?;
		let collection = self.telemetry.create_collection(flow.parameters().context().correlation_id());
		let code = self.authorize(flow, &endpoints, &collection).await;

		self.telemetry.flush(&collection);

		code
	}

	pub(crate) async fn authorize(
		&self,
		flow: &InteractiveFlow,
		endpoints: &AuthorityEndpoints,
		collection: &CollectionHandle,
	) -> Result<TokenSecret> {
		let url = flow.authorization_request_url(endpoints)?;
		let web_ui = self.web_ui.as_ref().ok_or(ConfigError::MissingWebUi)?;
		let redirect_uri = flow
			.parameters()
			.redirect_uri()
			.ok_or(ConfigError::MissingRedirectUri { flow: "interactive" })?;
		let mut event = Event::start(events::UI);
		let result = web_ui.acquire_authorization(&url, redirect_uri).await;

		event.set(
			keys::USER_CANCELLED,
			(result.status == AuthorizationStatus::UserCancel).to_string(),
		);
		event.stop();
		self.telemetry.add_event(collection, event);
		obs::record_transition(FlowKind::Interactive, FlowState::NetworkRequestBuilt);

		flow.verify(&result)
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: TokenSecret,
	challenge: String,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier: TokenSecret::new(verifier), challenge }
	}
}
impl Debug for PkcePair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("PkcePair").field("challenge", &self.challenge).finish()
	}
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
