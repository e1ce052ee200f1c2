//! Tenant scrubbing for anything that leaves the process as diagnostics.

// self
use crate::{_prelude::*, error::ConfigError};

/// Placeholder written in place of the tenant segment.
pub const TENANT_PLACEHOLDER: &str = "<tenant>";
/// First path segment of B2C authorities (`/tfp/{tenant}/{policy}`).
pub const B2C_PREFIX: &str = "tfp";

/// Replaces the tenant segment of an absolute URL path with [`TENANT_PLACEHOLDER`].
///
/// The tenant sits at segment 1, or at segment 2 behind the B2C prefix. The segment is
/// replaced rather than removed so the result keeps the shape of the input; paths too short
/// to carry a tenant come back unchanged.
pub fn scrub_tenant(path: &str) -> Result<String, ConfigError> {
	if !path.starts_with('/') {
		return Err(ConfigError::InvalidAbsolutePath { path: path.to_owned() });
	}

	let mut pieces = path.split('/').collect::<Vec<_>>();
	let position =
		if pieces.get(1).is_some_and(|piece| piece.eq_ignore_ascii_case(B2C_PREFIX)) { 2 } else { 1 };

	if let Some(piece) = pieces.get_mut(position) {
		*piece = TENANT_PLACEHOLDER;
	}

	Ok(pieces.join("/"))
}

/// Renders `url` as `scheme://host[:port]/scrubbed/path`, dropping query and fragment.
pub fn scrub_url(url: &Url) -> String {
	let mut out = format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default());

	if let Some(port) = url.port() {
		out.push_str(&format!(":{port}"));
	}

	match scrub_tenant(url.path()) {
		Ok(path) => out.push_str(&path),
		Err(_) => out.push('/'),
	}

	out
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const SAMPLES: [&str; 8] = [
		"/",
		"/common",
		"/common/oauth2/v2.0/token",
		"/contoso.onmicrosoft.com/oauth2/authorize",
		"/72f988bf-86f1-41af-91ab-2d7cd011db47/",
		"/tfp/tenant/policy/oauth2/v2.0/token",
		"/tfp",
		"//double/slash",
	];

	#[test]
	fn scrubs_the_tenant_segment() {
		assert_eq!(
			scrub_tenant("/common/oauth2/v2.0/token").expect("Absolute path should scrub."),
			"/<tenant>/oauth2/v2.0/token"
		);
		assert_eq!(
			scrub_tenant("/tfp/contoso/b2c_1_signin/oauth2/v2.0/token")
				.expect("B2C path should scrub."),
			"/tfp/<tenant>/b2c_1_signin/oauth2/v2.0/token"
		);
		assert_eq!(scrub_tenant("/tfp").expect("Short B2C path should scrub."), "/tfp");
	}

	#[test]
	fn rejects_relative_and_empty_paths() {
		for path in ["", "common/oauth2", "https://login.example.com/common"] {
			let err = scrub_tenant(path).expect_err("Relative paths must be rejected.");

			assert!(matches!(err, ConfigError::InvalidAbsolutePath { .. }));
		}
	}

	#[test]
	fn scrubbing_is_idempotent_and_keeps_shape() {
		for path in SAMPLES {
			let once = scrub_tenant(path).expect("Sample paths are absolute.");
			let twice = scrub_tenant(&once).expect("Scrubbed paths stay absolute.");

			assert_eq!(once, twice, "Scrubbing `{path}` twice must be stable.");
			assert!(once.starts_with('/'));
			assert_eq!(once.split('/').count(), path.split('/').count());
		}

		let scrubbed = scrub_tenant("/contoso.onmicrosoft.com/oauth2/authorize")
			.expect("Tenant path should scrub.");

		assert!(!scrubbed.contains("contoso.onmicrosoft.com"));
	}

	#[test]
	fn urls_lose_tenant_query_and_fragment() {
		let url = Url::parse("https://login.example.com:8443/tenant-id/oauth2/v2.0/token?x=1#y")
			.expect("URL fixture should parse.");

		assert_eq!(scrub_url(&url), "https://login.example.com:8443/<tenant>/oauth2/v2.0/token");
	}
}
