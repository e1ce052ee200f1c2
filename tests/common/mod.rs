//! Shared fixtures: a scripted transport, identity blobs, and a scripted web UI.

#![allow(dead_code)]

// std
use std::{
	collections::{BTreeMap, VecDeque},
	error::Error as StdError,
	fmt::{Display, Formatter, Result as FmtResult},
	future::Future,
	pin::Pin,
	sync::Arc,
};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use oauth2_identity::{
	auth::ClientId,
	authority::EndpointDiscovery,
	config::ApplicationConfig,
	flows::{AuthorizationResult, AuthorizationStatus, ClientApplication, WebUi, WebUiFuture},
	http::{IdentityHttpClient, ResponseMetadata, ResponseMetadataSlot},
	oauth::{
		DefaultTransportErrorMapper,
		oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse},
	},
	url::Url,
};
use parking_lot::Mutex;

pub const AUTHORITY: &str = "https://login.example.com/tenant/";
pub const TOKEN_ENDPOINT: &str = "https://login.example.com/tenant/oauth2/v2.0/token";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const CLIENT_ID: &str = "client-id";

pub type TestApp = ClientApplication<ScriptedHttpClient, DefaultTransportErrorMapper>;

#[derive(Debug)]
pub struct ScriptedTransportError(String);
impl Display for ScriptedTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "Scripted transport failed: {}.", self.0)
	}
}
impl StdError for ScriptedTransportError {}

/// One canned response.
#[derive(Clone, Debug)]
pub struct ScriptedResponse {
	pub status: u16,
	pub body: String,
}
impl ScriptedResponse {
	pub fn json(status: u16, body: serde_json::Value) -> Self {
		Self { status, body: body.to_string() }
	}
}

/// Request observed by the transport.
#[derive(Clone, Debug)]
pub struct RecordedRequest {
	pub method: String,
	pub url: String,
	pub body: String,
	pub authorization: Option<String>,
}
impl RecordedRequest {
	pub fn form(&self) -> BTreeMap<String, String> {
		url::form_urlencoded::parse(self.body.as_bytes()).into_owned().collect()
	}
}

type CallHook = Arc<dyn Fn(&RecordedRequest) + Send + Sync>;

#[derive(Default)]
struct ScriptState {
	responses: VecDeque<ScriptedResponse>,
	requests: Vec<RecordedRequest>,
	on_call: Option<CallHook>,
}
impl std::fmt::Debug for ScriptState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ScriptState")
			.field("responses", &self.responses)
			.field("requests", &self.requests)
			.field("on_call", &self.on_call.is_some())
			.finish()
	}
}

/// Transport answering from a queue of canned responses, in order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedHttpClient {
	state: Arc<Mutex<ScriptState>>,
}
impl ScriptedHttpClient {
	pub fn push(&self, response: ScriptedResponse) -> &Self {
		self.state.lock().responses.push_back(response);

		self
	}

	pub fn push_json(&self, status: u16, body: serde_json::Value) -> &Self {
		self.push(ScriptedResponse::json(status, body))
	}

	/// Runs `hook` for every request, after its response has been dequeued.
	pub fn on_call(&self, hook: impl 'static + Fn(&RecordedRequest) + Send + Sync) -> &Self {
		self.state.lock().on_call = Some(Arc::new(hook));

		self
	}

	pub fn requests(&self) -> Vec<RecordedRequest> {
		self.state.lock().requests.clone()
	}

	pub fn call_count(&self) -> usize {
		self.state.lock().requests.len()
	}

	pub fn assert_drained(&self) {
		let remaining = self.state.lock().responses.len();

		assert_eq!(remaining, 0, "Every scripted response should be consumed.");
	}
}
impl IdentityHttpClient for ScriptedHttpClient {
	type Handle = ScriptedHandle;
	type TransportError = ScriptedTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		ScriptedHandle { state: self.state.clone(), slot }
	}
}

pub struct ScriptedHandle {
	state: Arc<Mutex<ScriptState>>,
	slot: ResponseMetadataSlot,
}
impl<'a> AsyncHttpClient<'a> for ScriptedHandle {
	type Error = HttpClientError<ScriptedTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, request: HttpRequest) -> Self::Future {
		let state = self.state.clone();
		let slot = self.slot.clone();

		Box::pin(async move {
			assert!(slot.take().is_none(), "Metadata slot should start empty.");

			let recorded = RecordedRequest {
				method: request.method().to_string(),
				url: request.uri().to_string(),
				body: String::from_utf8_lossy(request.body()).into_owned(),
				authorization: request
					.headers()
					.get("authorization")
					.and_then(|value| value.to_str().ok())
					.map(str::to_owned),
			};
			let (next, hook) = {
				let mut state = state.lock();

				state.requests.push(recorded.clone());

				(state.responses.pop_front(), state.on_call.clone())
			};

			if let Some(hook) = hook {
				hook(&recorded);
			}

			let Some(next) = next else {
				return Err(HttpClientError::Reqwest(Box::new(ScriptedTransportError(format!(
					"no response scripted for {} {}",
					recorded.method, recorded.url
				)))));
			};

			let response = oauth2_identity::oauth::oauth2::http::Response::builder()
				.status(next.status)
				.header("content-type", "application/json")
				.body(next.body.into_bytes())
				.map_err(HttpClientError::Http)?;

			slot.store(ResponseMetadata::from_response(&response));

			Ok(response)
		})
	}
}

/// Web UI that answers every navigation with a fixed outcome.
///
/// With `echo_state`, a successful redirect copies `state` from the authorize URL.
#[derive(Clone, Debug)]
pub struct ScriptedWebUi {
	result: AuthorizationResult,
	echo_state: bool,
	seen: Arc<Mutex<Vec<Url>>>,
}
impl ScriptedWebUi {
	pub fn code(code: &str) -> Self {
		let mut result = AuthorizationResult::new(AuthorizationStatus::Success);

		result.code = Some(code.to_owned());

		Self { result, echo_state: true, seen: Default::default() }
	}

	pub fn redirect(query: &str) -> Self {
		let url = Url::parse(&format!("{REDIRECT_URI}?{query}")).expect("Redirect should parse.");

		Self {
			result: AuthorizationResult::from_redirect(AuthorizationStatus::UnknownError, &url),
			echo_state: false,
			seen: Default::default(),
		}
	}

	pub fn cancelled() -> Self {
		Self {
			result: AuthorizationResult::new(AuthorizationStatus::UserCancel),
			echo_state: false,
			seen: Default::default(),
		}
	}

	pub fn seen(&self) -> Vec<Url> {
		self.seen.lock().clone()
	}
}
impl WebUi for ScriptedWebUi {
	fn acquire_authorization<'a>(
		&'a self,
		authorization_url: &'a Url,
		_redirect_uri: &'a Url,
	) -> WebUiFuture<'a> {
		Box::pin(async move {
			self.seen.lock().push(authorization_url.clone());

			let mut result = self.result.clone();

			if self.echo_state {
				result.state = authorization_url
					.query_pairs()
					.find(|(key, _)| key == "state")
					.map(|(_, value)| value.into_owned());
			}

			result
		})
	}
}

pub fn config() -> ApplicationConfig {
	ApplicationConfig::builder(ClientId::new(CLIENT_ID).expect("Client fixture should be valid."))
		.authority(AUTHORITY)
		.trusted_hosts(["login.example.com"])
		.endpoint_discovery(EndpointDiscovery::WellKnownPaths)
		.redirect_uri(Url::parse(REDIRECT_URI).expect("Redirect fixture should parse."))
		.build()
		.expect("Config fixture should build.")
}

pub fn app() -> (TestApp, ScriptedHttpClient) {
	app_with(config())
}

pub fn app_with(config: ApplicationConfig) -> (TestApp, ScriptedHttpClient) {
	let http = ScriptedHttpClient::default();
	let app = TestApp::with_http_client(config, http.clone(), DefaultTransportErrorMapper)
		.expect("Application fixture should build.");

	(app, http)
}

pub fn unsigned_jwt(claims: serde_json::Value) -> String {
	let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
	let payload = URL_SAFE_NO_PAD.encode(claims.to_string());

	format!("{header}.{payload}.")
}

pub fn client_info(uid: &str, utid: &str) -> String {
	URL_SAFE_NO_PAD.encode(serde_json::json!({ "uid": uid, "utid": utid }).to_string())
}

pub fn id_token(oid: &str, tid: &str, username: &str) -> String {
	unsigned_jwt(serde_json::json!({
		"oid": oid,
		"tid": tid,
		"preferred_username": username,
		"name": "Test User",
		"iss": format!("https://login.example.com/{tid}/v2.0"),
	}))
}
