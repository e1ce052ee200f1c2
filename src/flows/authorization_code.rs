//! Authorization code redemption.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret},
	error::ConfigError,
	flows::{AuthenticationResult, ClientApplication},
	http::IdentityHttpClient,
	oauth::{TokenGrant, TokenRequest, TransportErrorMapper},
	request::{AuthenticationRequestParameters, CacheTarget},
};

/// Redeems an authorization code obtained outside the engine.
#[derive(Clone, Debug)]
pub struct AuthorizationCodeFlow {
	params: AuthenticationRequestParameters,
	code: TokenSecret,
	code_verifier: Option<TokenSecret>,
}
impl AuthorizationCodeFlow {
	/// Validates `params`: the redirect URI the code was issued for is required.
	pub fn new(
		params: AuthenticationRequestParameters,
		code: impl Into<TokenSecret>,
	) -> Result<Self, ConfigError> {
		if params.redirect_uri().is_none() {
			return Err(ConfigError::MissingRedirectUri { flow: "authorization_code" });
		}

		params.validate_redirect_uri()?;

		Ok(Self {
			params: params.with_cache_target(CacheTarget::User),
			code: code.into(),
			code_verifier: None,
		})
	}

	/// Sends the PKCE verifier the authorize request was built with.
	pub fn with_code_verifier(mut self, verifier: impl Into<TokenSecret>) -> Self {
		self.code_verifier = Some(verifier.into());

		self
	}

	/// Request parameters.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		&self.params
	}

	pub(crate) fn token_request(&self) -> TokenRequest {
		TokenRequest::new(
			TokenGrant::AuthorizationCode {
				code: self.code.clone(),
				redirect_uri: self.params.redirect_uri().cloned(),
				code_verifier: self.code_verifier.clone(),
			},
			self.params.scope().with_reserved(),
		)
		.extra_param("client_info", "1")
	}
}

impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Redeems `code` for `scope` against the default authority.
	pub async fn acquire_token_by_authorization_code(
		&self,
		code: impl Into<TokenSecret>,
		scope: ScopeSet,
	) -> Result<AuthenticationResult> {
		let flow = AuthorizationCodeFlow::new(self.parameters(scope).build(), code)?;

		self.acquire_token(flow).await
	}
}
