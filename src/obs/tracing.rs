// self
use crate::{
	_prelude::*,
	obs::{FlowKind, FlowState},
};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedFlow<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedFlow<F> = F;

/// Span wrapping one public acquisition call.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a span tagged with the flow kind and the public API name.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("oauth2_identity.flow", flow = kind.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (kind, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedFlow<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `debug!` event for a pipeline state transition.
pub fn record_transition(kind: FlowKind, state: FlowState) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(flow = kind.as_str(), state = state.as_str(), "Flow state changed.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (kind, state);
	}
}

/// Emits a `warn!` event when a cache lookup matched more than one access token.
pub fn record_cache_ambiguity(count: usize) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(count, "Cache lookup matched multiple access tokens.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = count;
	}
}
