//! Authority model: canonical base URL, tenant segment, and trust validation.
//!
//! An [`Authority`] is a parsed value; it never changes after construction. Switching tenants
//! produces a new instance via [`Authority::with_tenant`]. Trust decisions live in
//! [`KnownAuthorities`] and endpoint discovery results in [`EndpointCache`], both owned by
//! the application context rather than the process.

pub mod endpoints;
pub mod known;
pub mod scrub;

pub use endpoints::*;
pub use known::*;
pub use scrub::*;

// self
use crate::{_prelude::*, error::AuthorityError};

/// Tenant segment of an authority path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tenant {
	/// Any work, school, or personal account (`common`).
	Common,
	/// Any work or school account (`organizations`).
	Organizations,
	/// Personal accounts only (`consumers`).
	Consumers,
	/// A tenant GUID or verified domain.
	Specific(String),
}
impl Tenant {
	/// Classifies a lowercase tenant segment.
	pub fn parse(segment: &str) -> Self {
		match segment {
			"common" => Tenant::Common,
			"organizations" => Tenant::Organizations,
			"consumers" => Tenant::Consumers,
			other => Tenant::Specific(other.to_owned()),
		}
	}

	/// Path segment for this tenant.
	pub fn as_str(&self) -> &str {
		match self {
			Tenant::Common => "common",
			Tenant::Organizations => "organizations",
			Tenant::Consumers => "consumers",
			Tenant::Specific(tenant) => tenant,
		}
	}

	/// Returns true for the multi-tenant sentinels.
	pub fn is_multi_tenant(&self) -> bool {
		!matches!(self, Tenant::Specific(_))
	}
}
impl Display for Tenant {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Authority flavor.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AuthorityKind {
	/// Azure AD style `https://host/{tenant}/`.
	Aad,
	/// B2C style `https://host/tfp/{tenant}/{policy}/`.
	B2c {
		/// Lowercase user-flow policy name.
		policy: String,
	},
}

/// Parsed, canonical authority.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Authority {
	canonical: Url,
	host: String,
	tenant: Tenant,
	kind: AuthorityKind,
	validate: bool,
}
impl Authority {
	/// Parses an authority string.
	///
	/// Only the tenant (and for B2C the policy) segments are kept; any trailing endpoint path
	/// such as `oauth2/v2.0/token` is ignored. Host, tenant, and policy are lowercased, so
	/// the canonical string is stable for one logical authority.
	pub fn parse(authority: &str, validate: bool) -> Result<Self, AuthorityError> {
		let url = Url::parse(authority.trim()).map_err(|source| AuthorityError::InvalidUrl {
			authority: authority.to_owned(),
			source,
		})?;

		if url.scheme() != "https" {
			return Err(AuthorityError::InsecureScheme { authority: authority.to_owned() });
		}

		let Some(host) = url.host_str().map(str::to_ascii_lowercase) else {
			return Err(AuthorityError::InvalidUrl {
				authority: authority.to_owned(),
				source: url::ParseError::EmptyHost,
			});
		};
		let segments = url
			.path_segments()
			.map(|segments| {
				segments.filter(|s| !s.is_empty()).map(str::to_lowercase).collect::<Vec<_>>()
			})
			.unwrap_or_default();
		let Some(first) = segments.first() else {
			return Err(AuthorityError::MissingTenant { authority: authority.to_owned() });
		};
		let (tenant, kind) = if first == B2C_PREFIX {
			let (Some(tenant), Some(policy)) = (segments.get(1), segments.get(2)) else {
				return Err(AuthorityError::InvalidB2cPath { authority: authority.to_owned() });
			};

			(Tenant::Specific(tenant.clone()), AuthorityKind::B2c { policy: policy.clone() })
		} else {
			(Tenant::parse(first), AuthorityKind::Aad)
		};
		let authority_port = url.port().map(|port| format!(":{port}")).unwrap_or_default();

		Self::assemble(&format!("https://{host}{authority_port}"), host, tenant, kind, validate)
	}

	fn assemble(
		origin: &str,
		host: String,
		tenant: Tenant,
		kind: AuthorityKind,
		validate: bool,
	) -> Result<Self, AuthorityError> {
		let raw = match &kind {
			AuthorityKind::Aad => format!("{origin}/{tenant}/"),
			AuthorityKind::B2c { policy } => format!("{origin}/{B2C_PREFIX}/{tenant}/{policy}/"),
		};
		let canonical = Url::parse(&raw)
			.map_err(|source| AuthorityError::InvalidUrl { authority: raw.clone(), source })?;

		Ok(Self { canonical, host, tenant, kind, validate })
	}

	/// Canonical `https://host/tenant/` form used as cache key material.
	pub fn canonical(&self) -> &str {
		self.canonical.as_str()
	}

	/// Canonical form as a [`Url`].
	pub fn url(&self) -> &Url {
		&self.canonical
	}

	/// Lowercase host, also the authority-family (environment) identifier.
	pub fn host(&self) -> &str {
		&self.host
	}

	/// Tenant segment.
	pub fn tenant(&self) -> &Tenant {
		&self.tenant
	}

	/// Authority flavor.
	pub fn kind(&self) -> &AuthorityKind {
		&self.kind
	}

	/// Returns true for B2C authorities.
	pub fn is_b2c(&self) -> bool {
		matches!(self.kind, AuthorityKind::B2c { .. })
	}

	/// Whether the host must be validated against the trusted host list.
	pub fn validate_authority(&self) -> bool {
		self.validate
	}

	/// Returns a new authority for `tenant` on the same host.
	///
	/// B2C authorities and tenant-specific authorities are returned unchanged.
	pub fn with_tenant(&self, tenant: &str) -> Result<Self, AuthorityError> {
		if self.is_b2c() || !self.tenant.is_multi_tenant() {
			return Ok(self.clone());
		}

		let origin = self.canonical.origin().ascii_serialization();

		Self::assemble(
			&origin,
			self.host.clone(),
			Tenant::parse(&tenant.to_lowercase()),
			AuthorityKind::Aad,
			self.validate,
		)
	}

	/// Canonical form with the tenant segment scrubbed.
	pub fn scrubbed(&self) -> String {
		scrub_url(&self.canonical)
	}

	/// Resolves a path relative to the canonical form.
	pub fn join(&self, path: &str) -> Result<Url, AuthorityError> {
		self.canonical.join(path).map_err(|source| AuthorityError::InvalidUrl {
			authority: self.canonical.to_string(),
			source,
		})
	}
}
impl Display for Authority {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.canonical())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn endpoint_paths_resolve_to_the_tenant_base() {
		let authority = Authority::parse("https://login.example.com/common/oauth2/v2.0/token", false)
			.expect("Authority with an endpoint path should parse.");

		assert_eq!(authority.canonical(), "https://login.example.com/common/");
		assert_eq!(authority.tenant(), &Tenant::Common);
		assert_eq!(authority.host(), "login.example.com");
		assert_eq!(authority.scrubbed(), "https://login.example.com/<tenant>/");
		assert!(!authority.validate_authority());
	}

	#[test]
	fn canonical_form_is_lowercase() {
		let authority = Authority::parse("https://Login.Example.COM/Contoso.OnMicrosoft.com", true)
			.expect("Mixed-case authority should parse.");

		assert_eq!(authority.canonical(), "https://login.example.com/contoso.onmicrosoft.com/");
		assert_eq!(authority.tenant(), &Tenant::Specific("contoso.onmicrosoft.com".into()));
	}

	#[test]
	fn b2c_authorities_keep_the_policy() {
		let authority = Authority::parse("https://login.example.com/tfp/tenant/B2C_1_SignIn/", true)
			.expect("B2C authority should parse.");

		assert!(authority.is_b2c());
		assert_eq!(authority.canonical(), "https://login.example.com/tfp/tenant/b2c_1_signin/");
		assert_eq!(authority.scrubbed(), "https://login.example.com/tfp/<tenant>/b2c_1_signin/");
		assert!(matches!(
			Authority::parse("https://login.example.com/tfp/tenant", true),
			Err(AuthorityError::InvalidB2cPath { .. })
		));
	}

	#[test]
	fn rejects_insecure_and_tenantless_authorities() {
		assert!(matches!(
			Authority::parse("http://login.example.com/common", false),
			Err(AuthorityError::InsecureScheme { .. })
		));
		assert!(matches!(
			Authority::parse("https://login.example.com/", false),
			Err(AuthorityError::MissingTenant { .. })
		));
		assert!(matches!(
			Authority::parse("not a url", false),
			Err(AuthorityError::InvalidUrl { .. })
		));
	}

	#[test]
	fn tenant_switch_yields_a_new_instance() {
		let common = Authority::parse("https://login.example.com:8443/organizations/", false)
			.expect("Multi-tenant authority should parse.");
		let specific = common.with_tenant("Tenant-Id").expect("Tenant switch should succeed.");

		assert_eq!(common.canonical(), "https://login.example.com:8443/organizations/");
		assert_eq!(specific.canonical(), "https://login.example.com:8443/tenant-id/");
		assert_eq!(specific.with_tenant("other").expect("No-op switch should succeed."), specific);
	}
}
