//! Authorization and token endpoint discovery with a per-application cache.

// self
use crate::{
	_prelude::*,
	authority::Authority,
	error::AuthorityError,
	http::IdentityHttpClient,
	oauth::{EndpointKind, OAuthClient, TransportErrorMapper},
};

/// How endpoints are obtained for an authority.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointDiscovery {
	/// Fetch `{authority}v2.0/.well-known/openid-configuration`.
	#[default]
	OpenIdConfiguration,
	/// Derive `{authority}oauth2/v2.0/{authorize,token}` without a network call.
	WellKnownPaths,
}

/// Endpoints resolved for one authority.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityEndpoints {
	/// Authorization endpoint used by interactive sign-in.
	pub authorization_endpoint: Url,
	/// Token endpoint used by every grant.
	pub token_endpoint: Url,
	/// Issuer advertised by the discovery document.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub issuer: Option<String>,
}
impl AuthorityEndpoints {
	/// Validates that both endpoints use HTTPS.
	pub fn new(authorization_endpoint: Url, token_endpoint: Url) -> Result<Self, AuthorityError> {
		validate_endpoint("authorization", &authorization_endpoint)?;
		validate_endpoint("token", &token_endpoint)?;

		Ok(Self { authorization_endpoint, token_endpoint, issuer: None })
	}

	/// Derives the v2.0 endpoints from the authority path.
	pub fn well_known(authority: &Authority) -> Result<Self, AuthorityError> {
		Self::new(authority.join("oauth2/v2.0/authorize")?, authority.join("oauth2/v2.0/token")?)
	}
}

#[derive(Debug, Deserialize)]
struct OpenIdConfiguration {
	authorization_endpoint: String,
	token_endpoint: String,
	#[serde(default)]
	issuer: Option<String>,
}

/// Discovery results keyed by canonical authority.
#[derive(Debug, Default)]
pub struct EndpointCache {
	entries: RwLock<HashMap<String, AuthorityEndpoints>>,
}
impl EndpointCache {
	/// Cached endpoints for `authority`.
	pub fn get(&self, authority: &Authority) -> Option<AuthorityEndpoints> {
		self.entries.read().get(authority.canonical()).cloned()
	}

	/// Records endpoints for `authority`, replacing any previous entry.
	pub fn insert(&self, authority: &Authority, endpoints: AuthorityEndpoints) {
		self.entries.write().insert(authority.canonical().to_owned(), endpoints);
	}

	/// Drops the entry for `authority`. Returns true if one existed.
	pub fn invalidate(&self, authority: &Authority) -> bool {
		self.entries.write().remove(authority.canonical()).is_some()
	}

	/// Drops every entry.
	pub fn clear(&self) {
		self.entries.write().clear();
	}

	/// Number of cached authorities.
	pub fn len(&self) -> usize {
		self.entries.read().len()
	}

	/// Returns true when nothing is cached.
	pub fn is_empty(&self) -> bool {
		self.entries.read().is_empty()
	}

	/// Returns cached endpoints or discovers and caches them.
	pub async fn resolve<C, M>(
		&self,
		client: &OAuthClient<C, M>,
		authority: &Authority,
		discovery: EndpointDiscovery,
	) -> Result<AuthorityEndpoints>
	where
		C: ?Sized + IdentityHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		if let Some(endpoints) = self.get(authority) {
			return Ok(endpoints);
		}

		let endpoints = match discovery {
			EndpointDiscovery::WellKnownPaths => AuthorityEndpoints::well_known(authority)?,
			EndpointDiscovery::OpenIdConfiguration =>
				discover_openid_configuration(client, authority).await?,
		};

		self.insert(authority, endpoints.clone());

		Ok(endpoints)
	}
}

async fn discover_openid_configuration<C, M>(
	client: &OAuthClient<C, M>,
	authority: &Authority,
) -> Result<AuthorityEndpoints>
where
	C: ?Sized + IdentityHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let url = authority.join("v2.0/.well-known/openid-configuration")?;
	let document = client
		.get_json::<OpenIdConfiguration>(EndpointKind::OpenIdConfiguration, &url)
		.await
		.map_err(|err| match err {
			Error::Protocol(protocol) => AuthorityError::Discovery {
				authority: authority.scrubbed(),
				message: protocol.message().to_owned(),
				status: protocol.status,
			}
			.into(),
			other => other,
		})?;
	let authorization = parse_endpoint("authorization", &document.authorization_endpoint)?;
	let token = parse_endpoint("token", &document.token_endpoint)?;
	let mut endpoints = AuthorityEndpoints::new(authorization, token)?;

	endpoints.issuer = document.issuer;

	Ok(endpoints)
}

fn parse_endpoint(name: &'static str, raw: &str) -> Result<Url, AuthorityError> {
	Url::parse(raw)
		.map_err(|_| AuthorityError::InvalidEndpoint { endpoint: name, url: raw.to_owned() })
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), AuthorityError> {
	if url.scheme() != "https" {
		Err(AuthorityError::InvalidEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn authority(raw: &str) -> Authority {
		Authority::parse(raw, false).expect("Authority fixture should parse.")
	}

	#[test]
	fn well_known_paths_follow_the_authority() {
		let endpoints = AuthorityEndpoints::well_known(&authority("https://login.example.com/tenant/"))
			.expect("Well-known endpoints should derive.");

		assert_eq!(
			endpoints.token_endpoint.as_str(),
			"https://login.example.com/tenant/oauth2/v2.0/token"
		);
		assert_eq!(
			endpoints.authorization_endpoint.as_str(),
			"https://login.example.com/tenant/oauth2/v2.0/authorize"
		);
	}

	#[test]
	fn insecure_endpoints_are_rejected() {
		let err = AuthorityEndpoints::new(
			Url::parse("https://login.example.com/authorize").expect("URL fixture should parse."),
			Url::parse("http://login.example.com/token").expect("URL fixture should parse."),
		)
		.expect_err("Plain HTTP token endpoints must be rejected.");

		assert!(matches!(err, AuthorityError::InvalidEndpoint { endpoint: "token", .. }));
	}

	#[test]
	fn cache_is_keyed_by_canonical_authority() {
		let cache = EndpointCache::default();
		let tenant_a = authority("https://login.example.com/tenant-a/");
		let tenant_b = authority("https://login.example.com/tenant-b/");
		let endpoints =
			AuthorityEndpoints::well_known(&tenant_a).expect("Well-known endpoints should derive.");

		cache.insert(&tenant_a, endpoints.clone());

		assert_eq!(cache.get(&authority("https://LOGIN.example.com/Tenant-A")), Some(endpoints));
		assert_eq!(cache.get(&tenant_b), None);
		assert!(cache.invalidate(&tenant_a));
		assert!(!cache.invalidate(&tenant_a));
		assert!(cache.is_empty());
	}
}
