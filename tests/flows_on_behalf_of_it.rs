mod common;

// crates.io
use oauth2_identity::{
	auth::ScopeSet,
	error::{ConfigError, Error},
	flows::TokenSource,
	request::{ClientCredential, UserAssertion},
};
// self
use common::*;

fn scope() -> ScopeSet {
	"r2/scope".parse().expect("Scope fixture should parse.")
}

fn assertion(oid: &str) -> UserAssertion {
	UserAssertion::new(unsigned_jwt(serde_json::json!({ "oid": oid, "tid": "tenant" })))
}

fn downstream_token(value: &str) -> serde_json::Value {
	serde_json::json!({
		"access_token": value,
		"token_type": "Bearer",
		"expires_in": 3600,
		"refresh_token": format!("{value}-refresh"),
		"scope": "r2/scope",
	})
}

#[tokio::test]
async fn assertion_is_exchanged_and_cached_per_user() {
	let (app, http) = app();
	let app = app.with_client_credential(ClientCredential::secret("s3cr3t"));

	http.push_json(200, downstream_token("alice-token"));

	let first = app
		.acquire_token_on_behalf_of(scope(), assertion("alice"))
		.await
		.expect("Exchange should succeed.");
	let cached = app
		.acquire_token_on_behalf_of(scope(), assertion("alice"))
		.await
		.expect("Cached exchange should succeed.");

	assert_eq!(first.source, TokenSource::IdentityProvider);
	assert_eq!(cached.source, TokenSource::Cache);
	assert_eq!(cached.access_token.expose(), "alice-token");
	assert_eq!(http.call_count(), 1);

	let form = http.requests()[0].form();

	assert_eq!(form["grant_type"], "urn:ietf:params:oauth:grant-type:jwt-bearer");
	assert_eq!(form["requested_token_use"], "on_behalf_of");
	assert_eq!(form["assertion"], assertion("alice").assertion().expose());
	assert_eq!(app.user_cache().access_tokens()[0].user_identifier.as_deref(), Some("alice.tenant"));
	http.assert_drained();
}

#[tokio::test]
async fn different_assertion_users_never_share_tokens() {
	let (app, http) = app();
	let app = app.with_client_credential(ClientCredential::secret("s3cr3t"));

	http.push_json(200, downstream_token("alice-token"))
		.push_json(200, downstream_token("bob-token"));

	app.acquire_token_on_behalf_of(scope(), assertion("alice"))
		.await
		.expect("Alice exchange should succeed.");

	let bob = app
		.acquire_token_on_behalf_of(scope(), assertion("bob"))
		.await
		.expect("Bob exchange should succeed.");

	assert_eq!(bob.access_token.expose(), "bob-token");
	assert_eq!(app.user_cache().access_token_count(), 2);
	assert_eq!(app.user_cache().refresh_token_count(), 2);
	http.assert_drained();
}

#[tokio::test]
async fn interaction_required_surfaces_as_ui_required() {
	let (app, http) = app();
	let app = app.with_client_credential(ClientCredential::secret("s3cr3t"));

	http.push_json(
		400,
		serde_json::json!({
			"error": "interaction_required",
			"error_description": "Conditional access requires MFA.",
		}),
	);

	let err = app
		.acquire_token_on_behalf_of(scope(), assertion("alice"))
		.await
		.expect_err("Interaction required should fail.");

	assert!(err.is_ui_required());
	assert_eq!(err.code(), "interaction_required");
	assert_eq!(app.user_cache().access_token_count(), 0);
}

#[tokio::test]
async fn missing_credential_fails_before_any_request() {
	let (app, http) = app();
	let err = app
		.acquire_token_on_behalf_of(scope(), assertion("alice"))
		.await
		.expect_err("Missing credential should fail.");

	assert!(matches!(err, Error::Config(ConfigError::MissingClientCredential { .. })));
	assert_eq!(http.call_count(), 0);
}

#[tokio::test]
async fn a_different_assertion_for_the_same_user_is_not_served_from_the_cache() {
	let (app, http) = app();
	let app = app.with_client_credential(ClientCredential::secret("s3cr3t"));
	let issued = UserAssertion::new(unsigned_jwt(
		serde_json::json!({ "oid": "alice", "tid": "tenant", "sig": "real" }),
	));
	let forged = unsigned_jwt(serde_json::json!({ "oid": "alice", "tid": "tenant" }));

	http.push_json(200, downstream_token("alice-token")).push_json(
		400,
		serde_json::json!({ "error": "invalid_grant", "error_description": "Assertion signature is invalid." }),
	);

	app.acquire_token_on_behalf_of(scope(), issued.clone())
		.await
		.expect("Exchange should succeed.");

	let err = app
		.acquire_token_on_behalf_of(scope(), UserAssertion::new(forged.clone()))
		.await
		.expect_err("Forged assertion should reach the authority and fail.");

	assert_eq!(err.code(), "invalid_grant");
	assert_eq!(http.call_count(), 2);
	assert_eq!(http.requests()[1].form()["assertion"], forged);

	let cached = app
		.acquire_token_on_behalf_of(scope(), issued)
		.await
		.expect("The original assertion should still hit the cache.");

	assert_eq!(cached.source, TokenSource::Cache);
	assert_eq!(cached.access_token.expose(), "alice-token");
	http.assert_drained();
}
