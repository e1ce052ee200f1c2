mod common;

// crates.io
use oauth2_identity::{
	auth::{ClientId, ScopeSet, UserIdentifier},
	cache::AccessTokenCacheItem,
	error::{ConfigError, Error},
	flows::{AuthorizationCodeFlow, TokenSource},
};
use time::Duration;
// self
use common::*;

fn scope(raw: &str) -> ScopeSet {
	raw.parse().expect("Scope fixture should parse.")
}

fn token_response() -> serde_json::Value {
	serde_json::json!({
		"access_token": "user-access-token",
		"token_type": "Bearer",
		"expires_in": 3600,
		"ext_expires_in": 7200,
		"refresh_token": "user-refresh-token",
		"scope": "r1/scope1 r1/scope2 openid profile offline_access",
		"id_token": id_token("oid", "tid", "user@contoso.com"),
		"client_info": client_info("uid", "utid"),
	})
}

#[tokio::test]
async fn code_exchange_adds_to_a_pre_seeded_cache() {
	let (app, http) = app();
	let seeded = AccessTokenCacheItem::builder(
		AUTHORITY,
		ClientId::new("other-client").expect("Client fixture should be valid."),
		scope("r9/unrelated"),
	)
	.access_token("seeded")
	.expires_in(Duration::hours(1))
	.user_identifier(Some(UserIdentifier::new("someone.else").expect("User fixture should be valid.")))
	.build()
	.expect("Seed item should build.");

	app.user_cache().save_access_token(seeded);
	http.push_json(200, token_response());

	let result = app
		.acquire_token_by_authorization_code("the-code", scope("r1/scope1"))
		.await
		.expect("Code redemption should succeed.");

	assert_eq!(result.access_token.expose(), "user-access-token");
	assert_eq!(result.source, TokenSource::IdentityProvider);
	assert_eq!(app.user_cache().access_token_count(), 2);
	assert_eq!(app.user_cache().refresh_token_count(), 1);
	assert!(result.extended_expires_on.is_some());
	http.assert_drained();
}

#[tokio::test]
async fn code_exchange_sends_the_grant_and_caches_the_user() {
	let (app, http) = app();

	http.push_json(200, token_response());

	let result = app
		.acquire_token_by_authorization_code("the-code", scope("r1/scope1"))
		.await
		.expect("Code redemption should succeed.");
	let requests = http.requests();
	let form = requests[0].form();

	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].url, TOKEN_ENDPOINT);
	assert_eq!(form["grant_type"], "authorization_code");
	assert_eq!(form["code"], "the-code");
	assert_eq!(form["redirect_uri"], REDIRECT_URI);
	assert_eq!(form["client_id"], CLIENT_ID);
	assert_eq!(form["client_info"], "1");
	assert_eq!(form["scope"], "offline_access openid profile r1/scope1");

	let user = result.user.expect("Result should carry the user.");

	assert_eq!(user.identifier.as_ref(), "uid.utid");
	assert_eq!(user.displayable_id.as_deref(), Some("user@contoso.com"));
	assert_eq!(result.tenant_id.as_deref(), Some("tid"));
	assert_eq!(result.scope.normalized(), "r1/scope1 r1/scope2");

	let cached = app.user_cache().access_tokens();

	assert_eq!(cached.len(), 1);
	assert_eq!(cached[0].user_identifier.as_deref(), Some("uid.utid"));
	assert!(!cached[0].scope.contains("openid"));

	let refresh = app.user_cache().refresh_tokens();

	assert_eq!(refresh[0].refresh_token.expose(), "user-refresh-token");
	assert_eq!(refresh[0].environment.as_deref(), Some("login.example.com"));
}

#[tokio::test]
async fn a_second_redemption_always_goes_to_the_network() {
	let (app, http) = app();

	http.push_json(200, token_response()).push_json(200, token_response());

	for _ in 0..2 {
		app.acquire_token_by_authorization_code("the-code", scope("r1/scope1"))
			.await
			.expect("Code redemption should succeed.");
	}

	assert_eq!(http.call_count(), 2);
	assert_eq!(app.user_cache().access_token_count(), 1);
	http.assert_drained();
}

#[tokio::test]
async fn protocol_errors_leave_the_cache_untouched() {
	let (app, http) = app();

	http.push_json(
		400,
		serde_json::json!({ "error": "invalid_grant", "error_description": "Code was already redeemed." }),
	);

	let err = app
		.acquire_token_by_authorization_code("used-code", scope("r1/scope1"))
		.await
		.expect_err("Rejected code should fail.");

	assert_eq!(err.code(), "invalid_grant");
	assert_eq!(err.protocol().and_then(|protocol| protocol.status), Some(400));
	assert!(!err.is_ui_required());
	assert_eq!(app.user_cache().access_token_count(), 0);
	assert_eq!(app.user_cache().refresh_token_count(), 0);
}

#[tokio::test]
async fn verifier_is_forwarded_when_supplied() {
	let (app, http) = app();

	http.push_json(200, token_response());

	let flow = AuthorizationCodeFlow::new(app.parameters(scope("r1/scope1")).build(), "code")
		.expect("Flow should build.")
		.with_code_verifier("pkce-verifier");

	app.acquire_token(flow).await.expect("Code redemption should succeed.");

	assert_eq!(http.requests()[0].form()["code_verifier"], "pkce-verifier");
}

#[tokio::test]
async fn malformed_token_response_is_transient() {
	let (app, http) = app();

	http.push_json(200, serde_json::json!({ "token_type": "Bearer" }));

	let err = app
		.acquire_token_by_authorization_code("the-code", scope("r1/scope1"))
		.await
		.expect_err("Missing access token should fail.");

	assert!(matches!(err, Error::Transient(_)), "Unexpected error: {err:?}.");
	assert_eq!(app.user_cache().access_token_count(), 0);
}

#[tokio::test]
async fn missing_expiry_is_a_configuration_error() {
	let (app, http) = app();

	http.push_json(200, serde_json::json!({ "access_token": "at", "token_type": "Bearer" }));

	let err = app
		.acquire_token_by_authorization_code("the-code", scope("r1/scope1"))
		.await
		.expect_err("Missing expiry should fail.");

	assert!(matches!(err, Error::Config(ConfigError::MissingExpiresIn)), "Unexpected error: {err:?}.");
}
