//! Optional observability helpers for acquisition flows.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `oauth2_identity.flow` with the `flow`
//!   and `stage` (public API) fields, a `debug!` event per pipeline state, and a `warn!` when
//!   a cache lookup is ambiguous.
//! - Enable `metrics` to increment the `oauth2_identity_flow_total` counter for every
//!   attempt/success/failure, labeled by `flow` + `outcome`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Acquisition flows observed by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization code redemption.
	AuthorizationCode,
	/// App-only client credentials.
	ClientCredentials,
	/// On-behalf-of assertion exchange.
	OnBehalfOf,
	/// Interactive sign-in through the web UI.
	Interactive,
	/// Cache lookup with refresh-token fallback.
	Silent,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::ClientCredentials => "client_credentials",
			FlowKind::OnBehalfOf => "on_behalf_of",
			FlowKind::Interactive => "interactive",
			FlowKind::Silent => "silent",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a public acquisition call.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// States of the shared acquisition pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowState {
	/// Caller input passed validation.
	ParametersValidated,
	/// The access-token cache was consulted (or deliberately skipped).
	CacheConsulted,
	/// A cached token satisfied the request.
	CacheHit,
	/// The token request form is ready.
	NetworkRequestBuilt,
	/// The token request was answered.
	NetworkRequestSent,
	/// The token response was parsed into cache items.
	ResponseParsed,
	/// The cache holds the new tokens.
	CacheUpdated,
	/// The pipeline stopped with an error.
	Failed,
}
impl FlowState {
	/// Returns a stable label suitable for log fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowState::ParametersValidated => "parameters_validated",
			FlowState::CacheConsulted => "cache_consulted",
			FlowState::CacheHit => "cache_hit",
			FlowState::NetworkRequestBuilt => "network_request_built",
			FlowState::NetworkRequestSent => "network_request_sent",
			FlowState::ResponseParsed => "response_parsed",
			FlowState::CacheUpdated => "cache_updated",
			FlowState::Failed => "failed",
		}
	}
}
