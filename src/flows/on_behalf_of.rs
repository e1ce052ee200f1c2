//! On-behalf-of exchange of a user assertion for a downstream token.

// self
use crate::{
	_prelude::*,
	auth::{ScopeSet, TokenSecret, UserIdentifier},
	error::ConfigError,
	flows::{AuthenticationResult, ClientApplication},
	http::IdentityHttpClient,
	oauth::{TokenGrant, TokenRequest, TransportErrorMapper},
	request::{AuthenticationRequestParameters, CacheTarget, UserAssertion},
};

/// Exchanges a user assertion for a token scoped to another resource.
///
/// Cache entries belong to the user the assertion names and are bound to the assertion's
/// digest. A cached token is only served back to a caller presenting that same assertion.
#[derive(Clone, Debug)]
pub struct OnBehalfOfFlow {
	params: AuthenticationRequestParameters,
	user_identifier: UserIdentifier,
	assertion: TokenSecret,
	assertion_hash: String,
}
impl OnBehalfOfFlow {
	/// Validates `params`: a user assertion and a client credential are required.
	pub fn new(params: AuthenticationRequestParameters) -> Result<Self, ConfigError> {
		let assertion = params.user_assertion().ok_or(ConfigError::MissingUserAssertion)?;

		if params.client_credential().is_none() {
			return Err(ConfigError::MissingClientCredential { flow: "on_behalf_of" });
		}

		let user_identifier = assertion.user_identifier()?;
		let assertion_hash = assertion.assertion_hash();
		let assertion = assertion.assertion().clone();

		Ok(Self {
			params: params.with_cache_target(CacheTarget::User),
			user_identifier,
			assertion,
			assertion_hash,
		})
	}

	/// Request parameters.
	pub fn parameters(&self) -> &AuthenticationRequestParameters {
		&self.params
	}

	/// User the cache entries are keyed by.
	pub fn user_identifier(&self) -> &UserIdentifier {
		&self.user_identifier
	}

	/// Digest of the assertion the cached tokens are bound to.
	pub fn assertion_hash(&self) -> &str {
		&self.assertion_hash
	}

	pub(crate) fn token_request(&self) -> TokenRequest {
		TokenRequest::new(
			TokenGrant::JwtBearer { assertion: self.assertion.clone() },
			self.params.scope().with_reserved(),
		)
		.extra_param("requested_token_use", "on_behalf_of")
		.extra_param("client_info", "1")
	}
}

impl<C, M> ClientApplication<C, M>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Exchanges `assertion` for a token for `scope`.
	pub async fn acquire_token_on_behalf_of(
		&self,
		scope: ScopeSet,
		assertion: UserAssertion,
	) -> Result<AuthenticationResult> {
		let flow = OnBehalfOfFlow::new(self.parameters(scope).user_assertion(assertion).build())?;

		self.acquire_token(flow).await
	}
}
