//! Error taxonomy shared by authorities, caches, and acquisition flows.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable error codes returned by [`Error::code`].
pub mod codes {
	/// Redirect URI carries a fragment component.
	pub const REDIRECT_URI_FRAGMENT: &str = "redirect_uri_fragment";
	/// Extra query parameters collide with a protocol parameter.
	pub const DUPLICATE_QUERY_PARAMETER: &str = "duplicate_query_parameter";
	/// Tenant scrubbing received a relative or empty path.
	pub const INVALID_ABSOLUTE_PATH: &str = "invalid_absolute_path";
	/// Caller-supplied value failed validation.
	pub const INVALID_REQUEST: &str = "invalid_request";
	/// Flow needs a client credential that was not configured.
	pub const CLIENT_CREDENTIAL_REQUIRED: &str = "client_credential_required";
	/// Token endpoint returned a token the client could not process.
	pub const INVALID_TOKEN_RESPONSE: &str = "invalid_token_response";
	/// Authority string cannot be used.
	pub const INVALID_AUTHORITY: &str = "invalid_authority";
	/// Authority host is not trusted.
	pub const AUTHORITY_NOT_IN_VALID_LIST: &str = "authority_not_in_valid_list";
	/// Authority kind cannot be validated against the trusted host list.
	pub const AUTHORITY_VALIDATION_NOT_SUPPORTED: &str = "authority_validation_not_supported";
	/// Endpoint discovery failed.
	pub const ENDPOINT_DISCOVERY_FAILED: &str = "endpoint_discovery_failed";
	/// Prompt-less authorization was rejected; interactive sign-in is needed.
	pub const NO_PROMPT_FAILED: &str = "no_prompt_failed";
	/// Silent acquisition found neither an access nor a refresh token.
	pub const NO_TOKENS_FOUND: &str = "no_tokens_found";
	/// The user dismissed the interactive sign-in.
	pub const AUTHENTICATION_CANCELED: &str = "authentication_canceled";
	/// The web UI finished without a code or a protocol error.
	pub const AUTHENTICATION_UI_FAILED: &str = "authentication_ui_failed";
	/// Redirect `state` did not match the authorization request.
	pub const STATE_MISMATCH: &str = "state_mismatch";
	/// More than one cached token satisfied a lookup.
	pub const MULTIPLE_MATCHING_TOKENS: &str = "multiple_matching_tokens_detected";
	/// Cache snapshot could not be (de)serialized.
	pub const CACHE_SERIALIZATION: &str = "cache_serialization_failed";
	/// The caller canceled the request.
	pub const OPERATION_CANCELED: &str = "operation_canceled";
	/// Temporary upstream failure.
	pub const SERVICE_NOT_AVAILABLE: &str = "service_not_available";
	/// Transport-level failure.
	pub const NETWORK_ERROR: &str = "network_error";
}

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Caller or configuration problem detected before any I/O.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Authority could not be parsed, trusted, or discovered.
	#[error(transparent)]
	Authority(#[from] AuthorityError),
	/// Structured OAuth error from the token endpoint or the authorization redirect.
	#[error(transparent)]
	Protocol(ProtocolError),
	/// Protocol error the caller is expected to answer with an interactive sign-in.
	#[error("User interaction is required ({code}): {source}")]
	UiRequired {
		/// Stable error code (`no_prompt_failed`, `no_tokens_found`, or the provider code).
		code: String,
		/// Protocol error that triggered the condition.
		#[source]
		source: ProtocolError,
	},
	/// The user dismissed the interactive sign-in.
	#[error("User canceled the authentication.")]
	UserCancelled,
	/// Token cache failure, including ambiguous lookups.
	#[error(transparent)]
	Cache(#[from] crate::cache::CacheError),
	/// The caller canceled the request before it completed.
	#[error("The operation was canceled.")]
	Cancelled,
	/// Temporary upstream failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl Error {
	/// Wraps a protocol error as a UI-required error with a distinguished code.
	pub fn ui_required(code: impl Into<String>, source: ProtocolError) -> Self {
		Self::UiRequired { code: code.into(), source }
	}

	/// Stable, machine-readable error code.
	///
	/// Protocol errors preserve the provider's `error` value verbatim.
	pub fn code(&self) -> &str {
		match self {
			Self::Config(e) => e.code(),
			Self::Authority(e) => e.code(),
			Self::Protocol(e) => &e.code,
			Self::UiRequired { code, .. } => code,
			Self::UserCancelled => codes::AUTHENTICATION_CANCELED,
			Self::Cache(e) => e.code(),
			Self::Cancelled => codes::OPERATION_CANCELED,
			Self::Transient(_) => codes::SERVICE_NOT_AVAILABLE,
			Self::Transport(_) => codes::NETWORK_ERROR,
		}
	}

	/// Returns the wrapped protocol error, if any.
	pub fn protocol(&self) -> Option<&ProtocolError> {
		match self {
			Self::Protocol(e) | Self::UiRequired { source: e, .. } => Some(e),
			_ => None,
		}
	}

	/// Returns `true` when the caller should fall back to an interactive sign-in.
	pub fn is_ui_required(&self) -> bool {
		matches!(self, Self::UiRequired { .. })
	}
}
impl From<ProtocolError> for Error {
	fn from(e: ProtocolError) -> Self {
		Self::Protocol(e)
	}
}

/// Structured OAuth error (`error` plus `error_description`).
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{}", self.message())]
pub struct ProtocolError {
	/// Provider-supplied `error` value, preserved verbatim.
	pub code: String,
	/// Provider-supplied `error_description`, preserved verbatim.
	pub description: Option<String>,
	/// HTTP status that carried the error, when one was observed.
	pub status: Option<u16>,
}
impl ProtocolError {
	/// Creates a protocol error for the provided code.
	pub fn new(code: impl Into<String>) -> Self {
		Self { code: code.into(), description: None, status: None }
	}

	/// Attaches the provider's error description.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());

		self
	}

	/// Attaches the HTTP status code.
	pub fn with_status(mut self, status: u16) -> Self {
		self.status = Some(status);

		self
	}

	/// Human-readable message: the description when present, otherwise the code.
	pub fn message(&self) -> &str {
		self.description.as_deref().unwrap_or(&self.code)
	}
}

/// Caller and configuration failures raised before any network activity.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Redirect URI contains a fragment component.
	#[error("{}: {redirect_uri}.", ConfigError::REDIRECT_URI_CONTAINS_FRAGMENT)]
	RedirectUriContainsFragment {
		/// Offending redirect URI.
		redirect_uri: String,
	},
	/// Flow requires a redirect URI that was not supplied.
	#[error("The {flow} flow requires a redirect URI.")]
	MissingRedirectUri {
		/// Flow label.
		flow: &'static str,
	},
	/// Extra query parameters collide with a parameter the flow sets itself.
	#[error("Duplicate query parameter `{name}` in extra query parameters.")]
	DuplicateQueryParameter {
		/// Colliding parameter name.
		name: String,
	},
	/// Tenant scrubbing requires an absolute path.
	#[error("Tenant scrubbing requires an absolute path, got `{path}`.")]
	InvalidAbsolutePath {
		/// Offending path.
		path: String,
	},
	/// Requested scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Flow requires a client credential that was not configured.
	#[error("The {flow} flow requires a client credential.")]
	MissingClientCredential {
		/// Flow label.
		flow: &'static str,
	},
	/// On-behalf-of flow requires a user assertion.
	#[error("The on_behalf_of flow requires a user assertion.")]
	MissingUserAssertion,
	/// Silent flow requires a signed-in user.
	#[error("The silent flow requires a user.")]
	MissingUser,
	/// Interactive flow requires a web UI collaborator.
	#[error("The interactive flow requires a web UI.")]
	MissingWebUi,
	/// Application configuration document does not match the expected shape.
	#[error("Application configuration is invalid: {0}.")]
	InvalidConfig(#[from] serde_path_to_error::Error<serde_json::Error>),
	/// Client assertion provider failed to produce an assertion.
	#[error("Client assertion could not be produced: {message}.")]
	ClientAssertion {
		/// Provider-supplied message.
		message: String,
	},
	/// Cache item builder validation failed.
	#[error("Unable to build token cache item.")]
	TokenBuild(#[from] crate::cache::TokenItemBuilderError),
	/// ID token or client-info in the response could not be decoded.
	#[error("Token response carries an invalid identity.")]
	InvalidIdentity(#[from] crate::auth::IdentityError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
}
impl ConfigError {
	/// Message prefix used for redirect URIs carrying a fragment.
	pub const REDIRECT_URI_CONTAINS_FRAGMENT: &'static str =
		"Redirect URI must not contain a fragment";

	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}

	/// Stable error code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::RedirectUriContainsFragment { .. } => codes::REDIRECT_URI_FRAGMENT,
			Self::DuplicateQueryParameter { .. } => codes::DUPLICATE_QUERY_PARAMETER,
			Self::InvalidAbsolutePath { .. } => codes::INVALID_ABSOLUTE_PATH,
			Self::MissingClientCredential { .. } | Self::ClientAssertion { .. } =>
				codes::CLIENT_CREDENTIAL_REQUIRED,
			Self::TokenBuild(_)
			| Self::InvalidIdentity(_)
			| Self::MissingExpiresIn
			| Self::ExpiresInOutOfRange
			| Self::NonPositiveExpiresIn => codes::INVALID_TOKEN_RESPONSE,
			_ => codes::INVALID_REQUEST,
		}
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Authority parsing, validation, and discovery failures.
#[derive(Debug, ThisError)]
pub enum AuthorityError {
	/// Authority string is not a URL.
	#[error("Authority `{authority}` is not a valid URL.")]
	InvalidUrl {
		/// Offending authority string.
		authority: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Authorities must use HTTPS.
	#[error("Authority `{authority}` must use HTTPS.")]
	InsecureScheme {
		/// Offending authority string.
		authority: String,
	},
	/// Authority path has no tenant segment.
	#[error("Authority `{authority}` is missing a tenant segment.")]
	MissingTenant {
		/// Offending authority string.
		authority: String,
	},
	/// B2C authority path is missing the tenant or policy segment.
	#[error("B2C authority `{authority}` must look like https://host/tfp/tenant/policy/.")]
	InvalidB2cPath {
		/// Offending authority string.
		authority: String,
	},
	/// Host is not in the trusted authority list.
	#[error("Authority host `{host}` is not in the list of trusted authorities.")]
	Untrusted {
		/// Untrusted host.
		host: String,
	},
	/// Authority kind cannot be validated against the trusted host list.
	#[error("Authority validation is not supported for `{authority}`.")]
	ValidationNotSupported {
		/// Authority that cannot be validated.
		authority: String,
	},
	/// Discovery returned a non-HTTPS or unparseable endpoint.
	#[error("The discovered {endpoint} endpoint is invalid: {url}.")]
	InvalidEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint value that failed validation.
		url: String,
	},
	/// Endpoint or instance discovery failed.
	#[error("Discovery for `{authority}` failed: {message}.")]
	Discovery {
		/// Scrubbed authority string.
		authority: String,
		/// Failure summary.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
impl AuthorityError {
	/// Stable error code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Untrusted { .. } => codes::AUTHORITY_NOT_IN_VALID_LIST,
			Self::ValidationNotSupported { .. } => codes::AUTHORITY_VALIDATION_NOT_SUPPORTED,
			Self::InvalidEndpoint { .. } | Self::Discovery { .. } =>
				codes::ENDPOINT_DISCOVERY_FAILED,
			_ => codes::INVALID_AUTHORITY,
		}
	}
}

/// Temporary failure variants (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Endpoint returned an unexpected but non-fatal response.
	#[error("Endpoint returned an unexpected response: {message}.")]
	Endpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Endpoint responded with JSON that does not match the expected shape.
	#[error("Endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the authority.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the authority.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}
