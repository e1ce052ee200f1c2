//! Silent acquisition: cache first, then the user's refresh token.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, User},
	error::ConfigError,
	flows::{AuthenticationResult, ClientApplication},
	http::IdentityHttpClient,
	oauth::{TokenGrant, TokenRequest, TransportErrorMapper},
	request::{AuthenticationRequestParameters, CacheTarget},
};

/// Token acquisition for a known user without any UI.
///
/// A miss with no refresh token, or a refresh token the authority rejects, fails with a
/// UI-required error so the caller can fall back to an interactive sign-in.
#[derive(Clone, Debug)]
pub struct SilentFlow {
	params: AuthenticationRequestParameters,
	user: User,
}
impl SilentFlow {
	/// Validates `params`: the signed-in user is required.
	pub fn new(params: AuthenticationRequestParameters) -> Result<Self, ConfigError> {
		let user = params.user().cloned().ok_or(ConfigError::MissingUser)?;

		Ok(Self { params: params.with_cache_target(CacheTarget::User), user })
	}

	/// Request parameters.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		&self.params
	}

	/// User the tokens belong to.
	pub fn user(&self) -> &User {
		&self.user
	}

	pub(crate) fn token_request(&self, refresh_token: &TokenSecret) -> TokenRequest {
		TokenRequest::new(
			TokenGrant::RefreshToken { refresh_token: refresh_token.clone() },
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
	/// Returns a cached token for `user` or redeems their refresh token.
	pub async fn acquire_token_silent(
		&self,
		scope: ScopeSet,
		user: &User,
		force_refresh: bool,
	) -> Result<AuthenticationResult> {
		let flow = SilentFlow::new(
			self.parameters(scope).user(user.clone()).force_refresh(force_refresh).build(),
		)?;

		self.acquire_token(flow).await
	}
}
