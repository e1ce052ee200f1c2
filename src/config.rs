//! Application configuration.
//!
//! Everything here is plain data that can come from a config file. The client credential
//! is attached to the application at runtime and never deserialized.

// self
use crate::{
	_prelude::*,
	auth::ClientId,
	authority::{Authority, EndpointDiscovery, KnownAuthorities, PUBLIC_CLOUD_HOSTS},
	error::{AuthorityError, ConfigError},
	oauth::ClientAuthMethod,
};

/// Authority used when none is configured.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common/";

/// Static configuration for one [`ClientApplication`](crate::flows::ClientApplication).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
	/// Application (client) identifier.
	pub client_id: ClientId,
	/// Default authority for requests that do not override it.
	#[serde(default = "default_authority")]
	pub authority: String,
	/// Redirect URI registered for the application.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirect_uri: Option<Url>,
	/// Requires authority hosts to be trusted before any token request.
	#[serde(default = "default_validate_authority")]
	pub validate_authority: bool,
	/// Hosts trusted without instance discovery.
	#[serde(default = "default_trusted_hosts")]
	pub trusted_hosts: Vec<String>,
	/// Instance discovery endpoint asked about unknown hosts; unknown hosts fail without it.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub instance_discovery_endpoint: Option<Url>,
	/// How token and authorization endpoints are resolved.
	#[serde(default)]
	pub endpoint_discovery: EndpointDiscovery,
	/// How a client secret is presented to the token endpoint.
	#[serde(default)]
	pub client_auth_method: ClientAuthMethod,
}
impl ApplicationConfig {
	/// Starts a builder with defaults for everything but the client id.
	pub fn builder(client_id: ClientId) -> ApplicationConfigBuilder {
		ApplicationConfigBuilder {
			config: Self {
				client_id,
				authority: default_authority(),
				redirect_uri: None,
				validate_authority: default_validate_authority(),
				trusted_hosts: default_trusted_hosts(),
				instance_discovery_endpoint: None,
				endpoint_discovery: EndpointDiscovery::default(),
				client_auth_method: ClientAuthMethod::default(),
			},
		}
	}

	/// Parses a JSON document, reporting the failing field path on error.
	pub fn from_json(json: &str) -> Result<Self, ConfigError> {
		let mut de = serde_json::Deserializer::from_str(json);

		serde_path_to_error::deserialize(&mut de).map_err(ConfigError::from)
	}

	/// Parses the default authority.
	pub fn default_authority(&self) -> Result<Authority, AuthorityError> {
		Authority::parse(&self.authority, self.validate_authority)
	}

	/// Builds the trusted host registry for one application instance.
	pub fn known_authorities(&self) -> KnownAuthorities {
		KnownAuthorities::new(&self.trusted_hosts)
	}
}

/// Builder for [`ApplicationConfig`].
#[derive(Clone, Debug)]
pub struct ApplicationConfigBuilder {
	config: ApplicationConfig,
}
impl ApplicationConfigBuilder {
	/// Overrides the default authority.
	pub fn authority(mut self, authority: impl Into<String>) -> Self {
		self.config.authority = authority.into();

		self
	}

	/// Sets the redirect URI.
	pub fn redirect_uri(mut self, redirect_uri: Url) -> Self {
		self.config.redirect_uri = Some(redirect_uri);

		self
	}

	/// Toggles authority validation.
	pub fn validate_authority(mut self, validate: bool) -> Self {
		self.config.validate_authority = validate;

		self
	}

	/// Replaces the trusted host list.
	pub fn trusted_hosts<I, S>(mut self, hosts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.config.trusted_hosts = hosts.into_iter().map(Into::into).collect();

		self
	}

	/// Sets the instance discovery endpoint.
	pub fn instance_discovery_endpoint(mut self, endpoint: Url) -> Self {
		self.config.instance_discovery_endpoint = Some(endpoint);

		self
	}

	/// Selects how endpoints are resolved.
	pub fn endpoint_discovery(mut self, discovery: EndpointDiscovery) -> Self {
		self.config.endpoint_discovery = discovery;

		self
	}

	/// Selects the client secret presentation.
	pub fn client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.config.client_auth_method = method;

		self
	}

	/// Consumes the builder, checking the authority and redirect URI.
	pub fn build(self) -> Result<ApplicationConfig> {
		self.config.default_authority()?;

		if let Some(redirect_uri) = &self.config.redirect_uri {
			crate::request::validate_redirect_uri(redirect_uri)?;
		}

		Ok(self.config)
	}
}

fn default_authority() -> String {
	DEFAULT_AUTHORITY.into()
}

fn default_validate_authority() -> bool {
	true
}

fn default_trusted_hosts() -> Vec<String> {
	PUBLIC_CLOUD_HOSTS.iter().map(|host| (*host).to_owned()).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn json_defaults_fill_missing_fields() {
		let config = ApplicationConfig::from_json(r#"{"client_id":"client"}"#)
			.expect("Minimal config should parse.");

		assert_eq!(config.authority, DEFAULT_AUTHORITY);
		assert!(config.validate_authority);
		assert_eq!(config.trusted_hosts.len(), PUBLIC_CLOUD_HOSTS.len());
		assert_eq!(config.client_auth_method, ClientAuthMethod::ClientSecretPost);
		assert_eq!(config.endpoint_discovery, EndpointDiscovery::OpenIdConfiguration);
	}

	#[test]
	fn json_errors_report_the_field_path() {
		let err = ApplicationConfig::from_json(
			r#"{"client_id":"client","client_auth_method":"private_key_jwt"}"#,
		)
		.expect_err("Unknown auth methods must be rejected.");

		assert!(err.to_string().contains("client_auth_method"));
	}

	#[test]
	fn builder_validates_authority_and_redirect() {
		let client = ClientId::new("client").expect("Client fixture should be valid.");

		assert!(
			ApplicationConfig::builder(client.clone()).authority("http://insecure/common").build().is_err()
		);

		let err = ApplicationConfig::builder(client.clone())
			.redirect_uri(Url::parse("https://localhost/cb#x").expect("URL fixture should parse."))
			.build()
			.expect_err("Redirect fragments must be rejected.");

		assert_eq!(err.code(), "redirect_uri_fragment");

		let config = ApplicationConfig::builder(client)
			.authority("https://login.example.com/tenant")
			.validate_authority(false)
			.trusted_hosts(["login.example.com"])
			.build()
			.expect("Custom config should build.");

		assert!(config.known_authorities().contains("login.example.com"));
	}
}
