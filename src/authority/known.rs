//! Trusted authority hosts and instance discovery.

// self
use crate::{
	_prelude::*,
	authority::Authority,
	error::AuthorityError,
	http::IdentityHttpClient,
	oauth::{EndpointKind, OAuthClient, TransportErrorMapper},
};

/// Hosts of the public and sovereign clouds trusted without a discovery call.
pub const PUBLIC_CLOUD_HOSTS: [&str; 6] = [
	"login.microsoftonline.com",
	"login.windows.net",
	"login.chinacloudapi.cn",
	"login.microsoftonline.de",
	"login-us.microsoftonline.com",
	"login.microsoftonline.us",
];

#[derive(Debug, Deserialize)]
struct InstanceDiscoveryResponse {
	#[serde(default)]
	tenant_discovery_endpoint: Option<String>,
	#[serde(default)]
	metadata: Vec<InstanceMetadata>,
}

#[derive(Debug, Deserialize)]
struct InstanceMetadata {
	#[serde(default)]
	aliases: Vec<String>,
}

/// Set of authority hosts trusted for token acquisition.
///
/// Shared by every flow of one application; mutations are visible to all holders.
#[derive(Debug)]
pub struct KnownAuthorities {
	hosts: RwLock<BTreeSet<String>>,
}
impl KnownAuthorities {
	/// Creates a registry trusting `hosts`.
	pub fn new<I, S>(hosts: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		let hosts = hosts.into_iter().map(|host| host.as_ref().to_ascii_lowercase()).collect();

		Self { hosts: RwLock::new(hosts) }
	}

	/// Creates a registry seeded with [`PUBLIC_CLOUD_HOSTS`].
	pub fn with_public_cloud() -> Self {
		Self::new(PUBLIC_CLOUD_HOSTS)
	}

	/// Trusts `host`. Returns false when it was already trusted.
	pub fn insert(&self, host: impl AsRef<str>) -> bool {
		self.hosts.write().insert(host.as_ref().to_ascii_lowercase())
	}

	/// Returns true when `host` is trusted.
	pub fn contains(&self, host: &str) -> bool {
		self.hosts.read().contains(&host.to_ascii_lowercase())
	}

	/// Snapshot of the trusted hosts.
	pub fn hosts(&self) -> Vec<String> {
		self.hosts.read().iter().cloned().collect()
	}

	/// Forgets every trusted host.
	pub fn clear(&self) {
		self.hosts.write().clear();
	}

	/// Parses `authority` and, when `validate` is set, requires its host to be trusted.
	pub fn resolve(&self, authority: &str, validate: bool) -> Result<Authority, AuthorityError> {
		let authority = Authority::parse(authority, validate)?;

		self.check(&authority)?;

		Ok(authority)
	}

	/// Checks `authority` against the trusted set without any network activity.
	pub fn check(&self, authority: &Authority) -> Result<(), AuthorityError> {
		if !authority.validate_authority() {
			return Ok(());
		}
		if authority.is_b2c() {
			return Err(AuthorityError::ValidationNotSupported {
				authority: authority.scrubbed(),
			});
		}
		if self.contains(authority.host()) {
			return Ok(());
		}

		Err(AuthorityError::Untrusted { host: authority.host().to_owned() })
	}

	/// Validates `authority`, asking the instance discovery endpoint about unknown hosts.
	///
	/// A positive answer trusts the host (and any aliases it reports) for later calls.
	pub async fn ensure_trusted<C, M>(
		&self,
		client: &OAuthClient<C, M>,
		authority: &Authority,
		instance_discovery: Option<&Url>,
	) -> Result<()>
	where
		C: ?Sized + IdentityHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let untrusted = match self.check(authority) {
			Ok(()) => return Ok(()),
			Err(err @ AuthorityError::Untrusted { .. }) => err,
			Err(err) => return Err(err.into()),
		};
		let Some(endpoint) = instance_discovery else {
			return Err(untrusted.into());
		};
		let mut url = endpoint.clone();

		url.query_pairs_mut().append_pair("api-version", "1.1").append_pair(
			"authorization_endpoint",
			&format!("https://{}/common/oauth2/v2.0/authorize", authority.host()),
		);

		let response = match client
			.get_json::<InstanceDiscoveryResponse>(EndpointKind::InstanceDiscovery, &url)
			.await
		{
			Ok(response) => response,
			Err(Error::Protocol(_)) => return Err(untrusted.into()),
			Err(err) => return Err(err),
		};

		if response.tenant_discovery_endpoint.is_none() {
			return Err(untrusted.into());
		}

		self.insert(authority.host());

		for alias in response.metadata.iter().flat_map(|meta| meta.aliases.iter()) {
			self.insert(alias);
		}

		Ok(())
	}
}
impl Default for KnownAuthorities {
	fn default() -> Self {
		Self::with_public_cloud()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn validation_requires_a_trusted_host() {
		let known = KnownAuthorities::default();

		assert!(known.resolve("https://login.microsoftonline.com/common/", true).is_ok());
		assert!(matches!(
			known.resolve("https://login.example.com/common/", true),
			Err(AuthorityError::Untrusted { .. })
		));
		assert!(known.resolve("https://login.example.com/common/", false).is_ok());

		known.insert("LOGIN.EXAMPLE.COM");

		assert!(known.resolve("https://login.example.com/common/", true).is_ok());
	}

	#[test]
	fn clear_resets_trust() {
		let known = KnownAuthorities::with_public_cloud();

		known.clear();

		assert!(known.hosts().is_empty());
		assert!(matches!(
			known.resolve("https://login.microsoftonline.com/common/", true),
			Err(AuthorityError::Untrusted { .. })
		));
	}

	#[test]
	fn b2c_authorities_cannot_be_validated() {
		let known = KnownAuthorities::default();

		assert!(matches!(
			known.resolve("https://login.microsoftonline.com/tfp/tenant/policy/", true),
			Err(AuthorityError::ValidationNotSupported { .. })
		));
		assert!(known.resolve("https://login.microsoftonline.com/tfp/tenant/policy/", false).is_ok());
	}
}
