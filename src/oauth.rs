//! OAuth wire layer: token requests, client authentication, JSON parsing, and error
//! translation for every outbound call.
//!
//! Authorization-code, refresh-token, and client-credentials grants run through an
//! [`oauth2::Client`]. The on-behalf-of jwt-bearer grant has no builder there, so its form is
//! assembled by hand and decoded with the same error mapping.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use base64::{Engine as _, engine::general_purpose::STANDARD};
use oauth2::{
	AsyncHttpClient, AuthType, AuthorizationCode, ClientSecret, EndpointNotSet, EndpointSet,
	ExtraTokenFields, HttpClientError, HttpRequest, HttpResponse, PkceCodeVerifier, RedirectUrl,
	RefreshToken, RequestTokenError, Scope, StandardRevocableToken, StandardTokenResponse,
	TokenResponse as _, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
	http::{
		Method,
		header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
	},
};
use serde::{Deserializer, de::DeserializeOwned, de::Error as DeError};
use url::form_urlencoded;
// self
use crate::{
	_prelude::*,
	auth::{ClientId, ScopeSet, TokenSecret},
	error::{ConfigError, ProtocolError, TransientError, TransportError},
	http::{IdentityHttpClient, ResponseMetadata, ResponseMetadataSlot},
	request::ClientCredential,
};
#[cfg(feature = "reqwest")] use crate::http::ReqwestHttpClient;

/// Token response shape decoded by the [`oauth2::Client`] grants.
pub type IdentityTokenResponse = StandardTokenResponse<IdentityTokenFields, BasicTokenType>;

type TokenEndpointClient = oauth2::Client<
	BasicErrorResponse,
	IdentityTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;
type TokenRequestError<E> = RequestTokenError<HttpClientError<E>, BasicErrorResponse>;

/// `client_assertion_type` used for JWT client assertions.
pub const CLIENT_ASSERTION_TYPE_JWT: &str =
	"urn:ietf:params:oauth:client-assertion-type:jwt-bearer";

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";
const MAX_EXPIRES_IN_SECS: i64 = 10 * 365 * 24 * 60 * 60;
const UI_REQUIRED_CODES: [&str; 3] = ["interaction_required", "login_required", "consent_required"];

/// Kind of endpoint an outbound call targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EndpointKind {
	/// OAuth token endpoint.
	Token,
	/// OpenID Connect discovery document.
	OpenIdConfiguration,
	/// Trusted-authority instance discovery.
	InstanceDiscovery,
}
impl EndpointKind {
	/// Returns a stable label suitable for messages and telemetry.
	pub const fn as_str(self) -> &'static str {
		match self {
			EndpointKind::Token => "token",
			EndpointKind::OpenIdConfiguration => "openid_configuration",
			EndpointKind::InstanceDiscovery => "instance_discovery",
		}
	}
}

/// OAuth grant types the engine redeems at the token endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GrantType {
	/// Authorization code redemption.
	AuthorizationCode,
	/// App-only client credentials.
	ClientCredentials,
	/// JWT bearer assertion used by the on-behalf-of flow.
	JwtBearer,
	/// Refresh token redemption.
	RefreshToken,
}
impl GrantType {
	/// Returns the wire value of `grant_type`.
	pub const fn as_str(self) -> &'static str {
		match self {
			GrantType::AuthorizationCode => "authorization_code",
			GrantType::ClientCredentials => "client_credentials",
			GrantType::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
			GrantType::RefreshToken => "refresh_token",
		}
	}
}

/// How a confidential client authenticates its secret at the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// `client_id` + `client_secret` in the form body.
	#[default]
	ClientSecretPost,
	/// HTTP Basic authentication header.
	ClientSecretBasic,
}

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into a crate error.
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Mapper for transports without special classification needs.
///
/// Every transport-specific error becomes [`TransportError::Network`].
#[derive(Clone, Debug, Default)]
pub struct DefaultTransportErrorMapper;
impl<E> TransportErrorMapper<E> for DefaultTransportErrorMapper
where
	E: 'static + Send + Sync + StdError,
{
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<E>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => TransportError::network(*inner).into(),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => unexpected_transport_error(endpoint, meta, message),
			_ => unexpected_transport_error(endpoint, meta, "unknown failure"),
		}
	}
}

/// Mapper for the reqwest transport that separates timeouts and builder failures.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		endpoint: EndpointKind,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(endpoint, meta, *inner),
			other => DefaultTransportErrorMapper.map_transport_error(endpoint, meta, other),
		}
	}
}

/// Grant-specific part of a token request.
#[derive(Clone, Debug)]
pub enum TokenGrant {
	/// Redeems an authorization code.
	AuthorizationCode {
		/// Code returned on the redirect.
		code: TokenSecret,
		/// Redirect URI the code was issued for.
		redirect_uri: Option<Url>,
		/// PKCE verifier matching the authorize request.
		code_verifier: Option<TokenSecret>,
	},
	/// App-only client credentials.
	ClientCredentials,
	/// Redeems a refresh token.
	RefreshToken {
		/// Refresh token being redeemed.
		refresh_token: TokenSecret,
	},
	/// On-behalf-of exchange of a user assertion.
	JwtBearer {
		/// Incoming user assertion.
		assertion: TokenSecret,
	},
}
impl TokenGrant {
	/// Wire grant type.
	pub fn grant_type(&self) -> GrantType {
		match self {
			Self::AuthorizationCode { .. } => GrantType::AuthorizationCode,
			Self::ClientCredentials => GrantType::ClientCredentials,
			Self::RefreshToken { .. } => GrantType::RefreshToken,
			Self::JwtBearer { .. } => GrantType::JwtBearer,
		}
	}
}

/// Token endpoint request assembled by a flow handler.
#[derive(Clone, Debug)]
pub struct TokenRequest {
	grant: TokenGrant,
	scope: ScopeSet,
	extra_params: Vec<(String, String)>,
}
impl TokenRequest {
	/// Requests `scope` with `grant`.
	pub fn new(grant: TokenGrant, scope: ScopeSet) -> Self {
		Self { grant, scope, extra_params: Vec::new() }
	}

	/// Appends a non-standard parameter such as `client_info`.
	pub fn extra_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.extra_params.push((key.into(), value.into()));

		self
	}

	/// Grant being redeemed.
	pub fn grant(&self) -> &TokenGrant {
		&self.grant
	}

	/// Scopes sent with the request.
	pub fn scope(&self) -> &ScopeSet {
		&self.scope
	}

	/// Returns the first extra parameter recorded for `key`.
	pub fn extra(&self, key: &str) -> Option<&str> {
		self.extra_params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
	}

	fn extra_params(&self) -> impl Iterator<Item = (&str, &str)> {
		self.extra_params.iter().map(|(key, value)| (key.as_str(), value.as_str()))
	}

	fn jwt_bearer_form(&self, assertion: &TokenSecret) -> TokenForm {
		let form = TokenForm::new(GrantType::JwtBearer)
			.param("assertion", assertion.expose())
			.scope(&self.scope);

		self.extra_params().fold(form, |form, (key, value)| form.param(key, value))
	}
}

/// Ordered `application/x-www-form-urlencoded` token request body.
#[derive(Clone, Debug, Default)]
pub struct TokenForm {
	params: Vec<(String, String)>,
}
impl TokenForm {
	/// Starts a form for the provided grant.
	pub fn new(grant: GrantType) -> Self {
		Self::default().param("grant_type", grant.as_str())
	}

	/// Appends a parameter.
	pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.params.push((key.into(), value.into()));

		self
	}

	/// Appends `scope` when the set is non-empty.
	pub fn scope(self, scope: &ScopeSet) -> Self {
		if scope.is_empty() { self } else { self.param("scope", scope.normalized()) }
	}

	/// Returns the first value recorded for `key`.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
	}

	/// Iterator over the recorded parameters.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.params.iter().map(|(key, value)| (key.as_str(), value.as_str()))
	}

	/// Serializes the form body.
	pub fn encode(&self) -> String {
		form_urlencoded::Serializer::new(String::new()).extend_pairs(self.iter()).finish()
	}
}

/// Successful token endpoint response.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenResponse {
	/// Issued access token.
	pub access_token: TokenSecret,
	/// Token type, usually `Bearer`.
	#[serde(default)]
	pub token_type: Option<String>,
	/// Lifetime in seconds; some authorities send it as a string.
	#[serde(default, deserialize_with = "deserialize_seconds")]
	pub expires_in: Option<i64>,
	/// Extended lifetime in seconds used during authority outages.
	#[serde(default, deserialize_with = "deserialize_seconds")]
	pub ext_expires_in: Option<i64>,
	/// Refresh token, when issued.
	#[serde(default)]
	pub refresh_token: Option<TokenSecret>,
	/// Raw ID token, when issued.
	#[serde(default)]
	pub id_token: Option<String>,
	/// Raw `client_info`, when requested.
	#[serde(default)]
	pub client_info: Option<String>,
	/// Granted scopes, space-delimited.
	#[serde(default)]
	pub scope: Option<String>,
}
impl TokenResponse {
	/// Validated `expires_in` as a positive duration.
	pub fn lifetime(&self) -> Result<Duration, ConfigError> {
		let expires_in = self.expires_in.ok_or(ConfigError::MissingExpiresIn)?;

		positive_seconds(expires_in)
	}

	/// Validated `ext_expires_in`, if present.
	pub fn extended_lifetime(&self) -> Result<Option<Duration>, ConfigError> {
		self.ext_expires_in.map(positive_seconds).transpose()
	}

	/// Granted scopes, if the response listed them.
	pub fn granted_scope(&self) -> Result<Option<ScopeSet>, ConfigError> {
		match self.scope.as_deref() {
			Some(raw) if !raw.trim().is_empty() => Ok(Some(ScopeSet::from_str(raw)?)),
			_ => Ok(None),
		}
	}
}

impl From<IdentityTokenResponse> for TokenResponse {
	fn from(response: IdentityTokenResponse) -> Self {
		let token_type = match response.token_type() {
			BasicTokenType::Bearer => "Bearer".to_owned(),
			BasicTokenType::Mac => "MAC".to_owned(),
			BasicTokenType::Extension(other) => other.clone(),
		};
		let scope = response.scopes().map(|scopes| {
			scopes.iter().map(|scope| scope.as_str()).collect::<Vec<_>>().join(" ")
		});
		let extra = response.extra_fields();

		Self {
			access_token: TokenSecret::new(response.access_token().secret().to_owned()),
			token_type: Some(token_type),
			expires_in: response
				.expires_in()
				.map(|lifetime| i64::try_from(lifetime.as_secs()).unwrap_or(i64::MAX)),
			ext_expires_in: extra.ext_expires_in,
			refresh_token: response
				.refresh_token()
				.map(|token| TokenSecret::new(token.secret().to_owned())),
			id_token: extra.id_token.clone(),
			client_info: extra.client_info.clone(),
			scope,
		}
	}
}

/// Identity fields the authority returns next to the standard token response.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdentityTokenFields {
	/// Raw ID token, when issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
	/// Raw `client_info`, when requested.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub client_info: Option<String>,
	/// Extended lifetime in seconds.
	#[serde(
		default,
		deserialize_with = "deserialize_seconds",
		skip_serializing_if = "Option::is_none"
	)]
	pub ext_expires_in: Option<i64>,
}
impl ExtraTokenFields for IdentityTokenFields {}

/// Token endpoint authentication resolved from the configured credential.
#[derive(Clone, Debug, Default)]
pub enum ClientAuthentication {
	/// Public client: only `client_id` is sent.
	#[default]
	Public,
	/// Client secret sent with `method`.
	Secret {
		/// Configured secret.
		secret: TokenSecret,
		/// Where the secret travels.
		method: ClientAuthMethod,
	},
	/// Signed JWT client assertion.
	Assertion(TokenSecret),
}
impl ClientAuthentication {
	fn configure(&self, client: TokenEndpointClient) -> TokenEndpointClient {
		match self {
			Self::Secret { secret, method } => {
				let client = client.set_client_secret(ClientSecret::new(secret.expose().to_owned()));

				match method {
					ClientAuthMethod::ClientSecretPost => client.set_auth_type(AuthType::RequestBody),
					ClientAuthMethod::ClientSecretBasic => client,
				}
			},
			Self::Public | Self::Assertion(_) => client.set_auth_type(AuthType::RequestBody),
		}
	}

	fn assertion_params(&self) -> Vec<(&str, &str)> {
		match self {
			Self::Assertion(assertion) => vec![
				("client_assertion_type", CLIENT_ASSERTION_TYPE_JWT),
				("client_assertion", assertion.expose()),
			],
			Self::Public | Self::Secret { .. } => Vec::new(),
		}
	}

	// Hand-built forms only; the oauth2 client authenticates the standard grants itself.
	fn apply_to_form(&self, form: TokenForm, client_id: &ClientId) -> (TokenForm, Option<String>) {
		match self {
			Self::Secret { secret, method: ClientAuthMethod::ClientSecretBasic } =>
				(form, Some(basic_authorization(client_id.as_ref(), secret.expose()))),
			Self::Secret { secret, method: ClientAuthMethod::ClientSecretPost } => (
				form.param("client_id", client_id.as_ref()).param("client_secret", secret.expose()),
				None,
			),
			Self::Public | Self::Assertion(_) => {
				let form = form.param("client_id", client_id.as_ref());
				let form = self
					.assertion_params()
					.into_iter()
					.fold(form, |form, (key, value)| form.param(key, value));

				(form, None)
			},
		}
	}
}

/// Transport plus error mapper shared by every outbound call.
pub struct OAuthClient<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> OAuthClient<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Pairs a transport with its error mapper.
	pub fn new(http_client: impl Into<Arc<C>>, error_mapper: impl Into<Arc<M>>) -> Self {
		Self { http_client: http_client.into(), error_mapper: error_mapper.into() }
	}

	/// Sends a request and returns the raw response with its metadata.
	pub async fn execute(
		&self,
		endpoint: EndpointKind,
		request: HttpRequest,
	) -> Result<(HttpResponse, ResponseMetadata)> {
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());

		match handle.call(request).await {
			Ok(response) => {
				let meta = slot.take().unwrap_or_else(|| ResponseMetadata::from_response(&response));

				Ok((response, meta))
			},
			Err(err) => {
				let meta = slot.take();

				Err(self.error_mapper.map_transport_error(endpoint, meta.as_ref(), err))
			},
		}
	}

	/// Performs a `GET` and decodes a JSON body.
	///
	/// Non-success responses carrying an OAuth error body surface as [`Error::Protocol`].
	pub async fn get_json<T>(&self, endpoint: EndpointKind, url: &Url) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let request = oauth2::http::Request::builder()
			.method(Method::GET)
			.uri(url.as_str())
			.header(ACCEPT, JSON_CONTENT_TYPE)
			.body(Vec::new())
			.map_err(ConfigError::from)?;
		let (response, meta) = self.execute(endpoint, request).await?;

		decode_json(endpoint, &response, &meta)
	}

	/// Redeems `request` at `token_endpoint` and returns the token response with its metadata.
	pub async fn exchange(
		&self,
		token_endpoint: &Url,
		client_id: &ClientId,
		request: &TokenRequest,
		auth: &ClientAuthentication,
	) -> Result<(TokenResponse, ResponseMetadata)> {
		let client = auth.configure(
			oauth2::Client::new(oauth2::ClientId::new(client_id.as_ref().to_owned()))
				.set_token_uri(TokenUrl::from_url(token_endpoint.clone())),
		);
		let slot = ResponseMetadataSlot::default();
		let handle = self.http_client.with_metadata(slot.clone());
		let assertion_params = auth.assertion_params();
		let extra_params = request.extra_params().chain(assertion_params.iter().copied());
		let outcome = match request.grant() {
			TokenGrant::AuthorizationCode { code, redirect_uri, code_verifier } => {
				let mut builder = client.exchange_code(AuthorizationCode::new(code.expose().to_owned()));

				if !request.scope().is_empty() {
					builder = builder.add_extra_param("scope", request.scope().normalized());
				}
				if let Some(redirect_uri) = redirect_uri {
					builder = builder
						.set_redirect_uri(Cow::Owned(RedirectUrl::from_url(redirect_uri.clone())));
				}
				if let Some(verifier) = code_verifier {
					builder =
						builder.set_pkce_verifier(PkceCodeVerifier::new(verifier.expose().to_owned()));
				}
				for (key, value) in extra_params {
					builder = builder.add_extra_param(key, value);
				}

				builder.request_async(&handle).await
			},
			TokenGrant::ClientCredentials => {
				let mut builder = client.exchange_client_credentials();

				for scope in request.scope().iter() {
					builder = builder.add_scope(Scope::new(scope.to_owned()));
				}
				for (key, value) in extra_params {
					builder = builder.add_extra_param(key, value);
				}

				builder.request_async(&handle).await
			},
			TokenGrant::RefreshToken { refresh_token } => {
				let refresh_token = RefreshToken::new(refresh_token.expose().to_owned());
				let mut builder = client.exchange_refresh_token(&refresh_token);

				for scope in request.scope().iter() {
					builder = builder.add_scope(Scope::new(scope.to_owned()));
				}
				for (key, value) in extra_params {
					builder = builder.add_extra_param(key, value);
				}

				builder.request_async(&handle).await
			},
			TokenGrant::JwtBearer { assertion } => {
				let (form, basic) =
					auth.apply_to_form(request.jwt_bearer_form(assertion), client_id);

				return self.post_form(token_endpoint, &form, basic.as_deref()).await;
			},
		};
		let meta = slot.take();

		match outcome {
			Ok(response) => Ok((response.into(), meta.unwrap_or_default())),
			Err(err) => Err(map_request_error(meta, err, self.error_mapper.as_ref())),
		}
	}

	async fn post_form(
		&self,
		token_endpoint: &Url,
		form: &TokenForm,
		basic: Option<&str>,
	) -> Result<(TokenResponse, ResponseMetadata)> {
		let mut builder = oauth2::http::Request::builder()
			.method(Method::POST)
			.uri(token_endpoint.as_str())
			.header(CONTENT_TYPE, FORM_CONTENT_TYPE)
			.header(ACCEPT, JSON_CONTENT_TYPE);

		if let Some(basic) = basic {
			builder = builder.header(AUTHORIZATION, basic);
		}

		let request = builder.body(form.encode().into_bytes()).map_err(ConfigError::from)?;
		let (response, meta) = self.execute(EndpointKind::Token, request).await?;
		let token = decode_json(EndpointKind::Token, &response, &meta)?;

		Ok((token, meta))
	}
}
#[cfg(feature = "reqwest")]
impl Default for OAuthClient<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	fn default() -> Self {
		Self::new(ReqwestHttpClient::default(), ReqwestTransportErrorMapper)
	}
}
impl<C, M> Clone for OAuthClient<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn clone(&self) -> Self {
		Self { http_client: self.http_client.clone(), error_mapper: self.error_mapper.clone() }
	}
}

/// Resolves the token-endpoint authentication for `credential`.
///
/// Secrets use `client_secret_post` or `client_secret_basic`; assertion providers are asked
/// for a JWT whose audience is the token endpoint.
pub(crate) fn authenticate_client(
	client_id: &ClientId,
	credential: Option<&ClientCredential>,
	method: ClientAuthMethod,
	token_endpoint: &Url,
) -> Result<ClientAuthentication> {
	match credential {
		None => Ok(ClientAuthentication::Public),
		Some(ClientCredential::Secret(secret)) =>
			Ok(ClientAuthentication::Secret { secret: secret.clone(), method }),
		Some(ClientCredential::Assertion(provider)) => Ok(ClientAuthentication::Assertion(
			provider.client_assertion(client_id, token_endpoint.as_str())?,
		)),
	}
}

/// Translates a token-endpoint protocol error into the crate taxonomy.
///
/// Interaction-class codes become [`Error::UiRequired`]; a rejected refresh token does too.
/// Every other code stays an [`Error::Protocol`] with the provider's code untouched.
pub fn translate_token_error(grant: GrantType, error: ProtocolError) -> Error {
	let code = error.code.as_str();

	let rejected_refresh = grant == GrantType::RefreshToken && code == "invalid_grant";

	if UI_REQUIRED_CODES.contains(&code) || rejected_refresh {
		let code = error.code.clone();

		return Error::ui_required(code, error);
	}

	Error::Protocol(error)
}

fn decode_json<T>(
	endpoint: EndpointKind,
	response: &HttpResponse,
	meta: &ResponseMetadata,
) -> Result<T>
where
	T: DeserializeOwned,
{
	let status = response.status();
	let body = response.body().as_slice();

	if status.is_success() {
		let mut de = serde_json::Deserializer::from_slice(body);

		return serde_path_to_error::deserialize(&mut de).map_err(|source| {
			TransientError::ResponseParse { source, status: Some(status.as_u16()) }.into()
		});
	}
	if let Ok(error) = serde_json::from_slice::<BasicErrorResponse>(body) {
		return Err(Error::Protocol(protocol_error(&error, Some(status.as_u16()))));
	}

	Err(TransientError::Endpoint {
		message: format!(
			"The {} endpoint returned HTTP {} without an OAuth error body",
			endpoint.as_str(),
			status.as_u16()
		),
		status: Some(status.as_u16()),
		retry_after: meta.retry_after,
	}
	.into())
}

fn map_request_error<E, M>(
	meta: Option<ResponseMetadata>,
	err: TokenRequestError<E>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let status = meta.as_ref().and_then(|value| value.status);
	let retry_after = meta.as_ref().and_then(|value| value.retry_after);

	match err {
		RequestTokenError::ServerResponse(response) =>
			Error::Protocol(protocol_error(&response, status)),
		RequestTokenError::Request(error) =>
			mapper.map_transport_error(EndpointKind::Token, meta.as_ref(), error),
		// Failure status without an OAuth error body.
		RequestTokenError::Parse(_, _) if status.is_some_and(|code| !(200..300).contains(&code)) =>
			TransientError::Endpoint {
				message: format!(
					"The token endpoint returned HTTP {} without an OAuth error body",
					status.unwrap_or_default()
				),
				status,
				retry_after,
			}
			.into(),
		RequestTokenError::Parse(source, _body) =>
			TransientError::ResponseParse { source, status }.into(),
		RequestTokenError::Other(message) => TransientError::Endpoint {
			message: format!("The token endpoint returned an unexpected response: {message}"),
			status,
			retry_after,
		}
		.into(),
	}
}

fn protocol_error(response: &BasicErrorResponse, status: Option<u16>) -> ProtocolError {
	let mut error = ProtocolError::new(response.error().as_ref());

	if let Some(description) = response.error_description() {
		error = error.with_description(description.clone());
	}
	if let Some(status) = status {
		error = error.with_status(status);
	}

	error
}

fn basic_authorization(client_id: &str, secret: &str) -> String {
	let user: String = form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
	let pass: String = form_urlencoded::byte_serialize(secret.as_bytes()).collect();

	format!("Basic {}", STANDARD.encode(format!("{user}:{pass}")))
}

fn positive_seconds(value: i64) -> Result<Duration, ConfigError> {
	if value <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn);
	}
	if value > MAX_EXPIRES_IN_SECS {
		return Err(ConfigError::ExpiresInOutOfRange);
	}

	Ok(Duration::seconds(value))
}

fn deserialize_seconds<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Seconds {
		Number(i64),
		Text(String),
	}

	match Option::<Seconds>::deserialize(deserializer)? {
		None => Ok(None),
		Some(Seconds::Number(value)) => Ok(Some(value)),
		Some(Seconds::Text(raw)) => raw.trim().parse().map(Some).map_err(DeError::custom),
	}
}

fn unexpected_transport_error(
	endpoint: EndpointKind,
	meta: Option<&ResponseMetadata>,
	message: impl Display,
) -> Error {
	TransientError::Endpoint {
		message: format!(
			"HTTP client error occurred while calling the {} endpoint: {message}",
			endpoint.as_str()
		),
		status: meta.and_then(|value| value.status),
		retry_after: meta.and_then(|value| value.retry_after),
	}
	.into()
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(
	endpoint: EndpointKind,
	meta: Option<&ResponseMetadata>,
	err: ReqwestError,
) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::Endpoint {
			message: format!("Request timed out while calling the {} endpoint", endpoint.as_str()),
			status: meta
				.and_then(|value| value.status)
				.or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta.and_then(|value| value.retry_after),
		}
		.into();
	}

	TransportError::from(err).into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn token_endpoint() -> Url {
		Url::parse("https://login.example.com/common/oauth2/v2.0/token")
			.expect("Token endpoint fixture should parse.")
	}

	#[test]
	fn token_response_accepts_string_lifetimes() {
		let response: TokenResponse = serde_json::from_str(
			r#"{"access_token":"at","token_type":"Bearer","expires_in":"3600","ext_expires_in":7200}"#,
		)
		.expect("Token response fixture should parse.");

		assert_eq!(response.lifetime().expect("Lifetime should be valid."), Duration::hours(1));
		assert_eq!(
			response.extended_lifetime().expect("Extended lifetime should be valid."),
			Some(Duration::hours(2))
		);
		assert!(response.granted_scope().expect("Missing scope is not an error.").is_none());
	}

	#[test]
	fn token_response_rejects_non_positive_lifetimes() {
		let response: TokenResponse =
			serde_json::from_str(r#"{"access_token":"at","expires_in":0}"#)
				.expect("Token response fixture should parse.");

		assert!(matches!(response.lifetime(), Err(ConfigError::NonPositiveExpiresIn)));

		let missing: TokenResponse = serde_json::from_str(r#"{"access_token":"at"}"#)
			.expect("Token response fixture should parse.");

		assert!(matches!(missing.lifetime(), Err(ConfigError::MissingExpiresIn)));
	}

	#[test]
	fn secret_post_and_basic_differ_on_hand_built_forms() {
		let client_id = ClientId::new("client").expect("Client fixture should be valid.");
		let credential = ClientCredential::secret("s3cr3t");
		let post = authenticate_client(
			&client_id,
			Some(&credential),
			ClientAuthMethod::ClientSecretPost,
			&token_endpoint(),
		)
		.expect("Secret post authentication should succeed.");
		let (form, basic) = post.apply_to_form(TokenForm::new(GrantType::JwtBearer), &client_id);

		assert_eq!(form.get("client_secret"), Some("s3cr3t"));
		assert!(basic.is_none());

		let basic_auth = authenticate_client(
			&client_id,
			Some(&credential),
			ClientAuthMethod::ClientSecretBasic,
			&token_endpoint(),
		)
		.expect("Secret basic authentication should succeed.");
		let (form, basic) =
			basic_auth.apply_to_form(TokenForm::new(GrantType::JwtBearer), &client_id);

		assert_eq!(form.get("client_secret"), None);
		assert_eq!(basic.as_deref(), Some("Basic Y2xpZW50OnMzY3IzdA=="));
	}

	#[test]
	fn standard_responses_keep_identity_fields() {
		let response: IdentityTokenResponse = serde_json::from_value(serde_json::json!({
			"access_token": "at",
			"token_type": "bearer",
			"expires_in": 3600,
			"ext_expires_in": "7200",
			"refresh_token": "rt",
			"scope": "r1/scope1 openid",
			"id_token": "header.payload.sig",
			"client_info": "eyJ1aWQiOiJ1In0",
		}))
		.expect("Standard token response fixture should parse.");
		let response = TokenResponse::from(response);

		assert_eq!(response.token_type.as_deref(), Some("Bearer"));
		assert_eq!(response.lifetime().expect("Lifetime should be valid."), Duration::hours(1));
		assert_eq!(
			response.extended_lifetime().expect("Extended lifetime should be valid."),
			Some(Duration::hours(2))
		);
		assert_eq!(response.refresh_token.as_ref().map(TokenSecret::expose), Some("rt"));
		assert_eq!(response.scope.as_deref(), Some("r1/scope1 openid"));
		assert_eq!(response.id_token.as_deref(), Some("header.payload.sig"));
		assert_eq!(response.client_info.as_deref(), Some("eyJ1aWQiOiJ1In0"));
	}

	#[test]
	fn unparseable_bodies_split_on_the_status() {
		let parse_failure = || {
			let mut de = serde_json::Deserializer::from_str("Service unavailable");

			serde_path_to_error::deserialize::<_, IdentityTokenResponse>(&mut de)
				.expect_err("Plain text should not parse.")
		};
		let meta = |status| ResponseMetadata {
			status: Some(status),
			retry_after: Some(Duration::seconds(5)),
		};
		let outage = map_request_error::<std::io::Error, _>(
			Some(meta(503)),
			RequestTokenError::Parse(parse_failure(), Vec::new()),
			&DefaultTransportErrorMapper,
		);

		assert!(matches!(
			outage,
			Error::Transient(TransientError::Endpoint { status: Some(503), retry_after: Some(_), .. })
		));

		let malformed = map_request_error::<std::io::Error, _>(
			Some(meta(200)),
			RequestTokenError::Parse(parse_failure(), Vec::new()),
			&DefaultTransportErrorMapper,
		);

		assert!(matches!(
			malformed,
			Error::Transient(TransientError::ResponseParse { status: Some(200), .. })
		));
	}

	#[test]
	fn server_errors_keep_the_provider_code() {
		let body: BasicErrorResponse = serde_json::from_str(
			r#"{"error":"consent_required","error_description":"AADSTS65001: consent"}"#,
		)
		.expect("Error body fixture should parse.");
		let err = map_request_error::<std::io::Error, _>(
			Some(ResponseMetadata { status: Some(400), retry_after: None }),
			RequestTokenError::ServerResponse(body),
			&DefaultTransportErrorMapper,
		);
		let protocol = err.protocol().expect("Server errors should stay protocol errors.");

		assert_eq!(protocol.code, "consent_required");
		assert_eq!(protocol.description.as_deref(), Some("AADSTS65001: consent"));
		assert_eq!(protocol.status, Some(400));
	}

	#[test]
	fn ui_required_codes_are_distinguished() {
		let err = translate_token_error(
			GrantType::AuthorizationCode,
			ProtocolError::new("interaction_required"),
		);

		assert!(err.is_ui_required());

		let err =
			translate_token_error(GrantType::AuthorizationCode, ProtocolError::new("invalid_grant"));

		assert!(matches!(err, Error::Protocol(_)));
		assert_eq!(err.code(), "invalid_grant");

		let err = translate_token_error(GrantType::RefreshToken, ProtocolError::new("invalid_grant"));

		assert!(err.is_ui_required());
	}

	#[test]
	fn jwt_bearer_form_encodes_in_insertion_order() {
		let scope = ScopeSet::from_str("r1/scope1").expect("Scope fixture should parse.");
		let request =
			TokenRequest::new(TokenGrant::JwtBearer { assertion: TokenSecret::new("a b") }, scope)
				.extra_param("requested_token_use", "on_behalf_of");
		let form = request.jwt_bearer_form(&TokenSecret::new("a b"));

		assert_eq!(
			form.encode(),
			"grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer&assertion=a+b&\
			 scope=r1%2Fscope1&requested_token_use=on_behalf_of"
		);
	}
}
