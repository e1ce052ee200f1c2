//! Client credentials grant for app-only tokens.
//!
//! Tokens land in the app cache under a key without a user segment. Concurrent callers
//! asking for the same authority, client, and scope share one in-flight request.

// self
use crate::{
	_prelude::*,
	auth::ScopeSet,
	error::ConfigError,
	flows::{AuthenticationResult, ClientApplication},
	http::IdentityHttpClient,
	oauth::{TokenGrant, TokenRequest, TransportErrorMapper},
	request::{AuthenticationRequestParameters, CacheTarget},
};

/// App-only token acquisition with a client credential.
#[derive(Clone, Debug)]
pub struct ClientCredentialFlow {
	params: AuthenticationRequestParameters,
}
impl ClientCredentialFlow {
	/// Validates `params`: a client credential is required.
	pub fn new(params: AuthenticationRequestParameters) -> Result<Self, ConfigError> {
		if params.client_credential().is_none() {
			return Err(ConfigError::MissingClientCredential { flow: "client_credentials" });
		}

		Ok(Self { params: params.with_cache_target(CacheTarget::App) })
	}

	/// Request parameters.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		&self.params
	}

	pub(crate) fn token_request(&self) -> TokenRequest {
		TokenRequest::new(TokenGrant::ClientCredentials, self.params.scope().clone())
	}
}

impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Acquires an app-only token for `scope`, reusing the app cache unless `force_refresh`.
	pub async fn acquire_token_for_client(
		&self,
		scope: ScopeSet,
		force_refresh: bool,
	) -> Result<AuthenticationResult> {
		let flow =
			ClientCredentialFlow::new(self.parameters(scope).force_refresh(force_refresh).build())?;

		self.acquire_token(flow).await
	}
}
