//! Request-scoped telemetry events, collections, and the receiver registry.
//!
//! Every public acquisition call opens a collection under its correlation id, records an
//! API event (plus UI, HTTP, and cache events for the sub-operations it runs), and flushes
//! the collection as one batch. Receivers never see an individual event. The receiver is
//! resolved when a collection is flushed, so swapping it affects every collection that has
//! not been flushed yet.

// crates.io
use uuid::Uuid;
// self
use crate::_prelude::*;

/// Reserved key carrying the event name.
pub const EVENT_NAME_KEY: &str = "msal.event_name";
/// Reserved key carrying the start instant in Unix milliseconds.
pub const START_TIME_KEY: &str = "msal.start_time";
/// Reserved key carrying the elapsed time in milliseconds (`-1` until stopped).
pub const ELAPSED_TIME_KEY: &str = "msal.elapsed_time";
/// Elapsed-time value of an event that was never stopped.
pub const ELAPSED_SENTINEL: &str = "-1";

/// Names of the events recorded by the engine.
pub mod events {
	/// One public acquisition call.
	pub const API: &str = "msal.api_event";
	/// Interactive web UI presentation.
	pub const UI: &str = "msal.ui_event";
	/// Outbound HTTP call.
	pub const HTTP: &str = "msal.http_event";
	/// Token cache lookup.
	pub const CACHE: &str = "msal.cache_event";
}

/// Flow-specific keys recorded by the engine.
pub mod keys {
	/// API identifier (the public method name).
	pub const API_ID: &str = "msal.api_id";
	/// Scrubbed authority.
	pub const AUTHORITY: &str = "msal.authority";
	/// Request correlation id.
	pub const CORRELATION_ID: &str = "msal.correlation_id";
	/// `true` when the call succeeded.
	pub const WAS_SUCCESSFUL: &str = "msal.was_successful";
	/// Error code of a failed call.
	pub const ERROR_CODE: &str = "msal.error_code";
	/// `true` when the user dismissed the web UI.
	pub const USER_CANCELLED: &str = "msal.user_cancelled";
	/// `true` when the cache satisfied the lookup.
	pub const CACHE_HIT: &str = "msal.cache_hit";
	/// Scrubbed HTTP request path.
	pub const HTTP_PATH: &str = "msal.http_path";
	/// HTTP status of the response.
	pub const HTTP_STATUS: &str = "msal.http_status";
}

const RESERVED_KEYS: [&str; 3] = [EVENT_NAME_KEY, START_TIME_KEY, ELAPSED_TIME_KEY];

/// Ordered string-to-string event with three reserved keys.
///
/// The reserved keys can only be written by [`start`](Self::start) and [`stop`](Self::stop).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
	fields: Vec<(String, String)>,
	started_ms: i64,
}
impl Event {
	/// Starts an event named `name` at the current instant.
	pub fn start(name: impl Into<String>) -> Self {
		let started_ms = unix_millis(OffsetDateTime::now_utc());

		Self {
			fields: vec![
				(EVENT_NAME_KEY.into(), name.into()),
				(START_TIME_KEY.into(), started_ms.to_string()),
				(ELAPSED_TIME_KEY.into(), ELAPSED_SENTINEL.into()),
			],
			started_ms,
		}
	}

	/// Records the elapsed time since [`start`](Self::start), overwriting the sentinel.
	pub fn stop(&mut self) {
		let elapsed = (unix_millis(OffsetDateTime::now_utc()) - self.started_ms).max(0);

		self.put(ELAPSED_TIME_KEY, elapsed.to_string());
	}

	/// Sets a flow-specific field. Reserved keys are ignored.
	pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
		let key = key.into();

		if !RESERVED_KEYS.contains(&key.as_str()) {
			self.put(&key, value.into());
		}

		self
	}

	/// Event name.
	pub fn name(&self) -> &str {
		self.get(EVENT_NAME_KEY).unwrap_or_default()
	}

	/// Value stored under `key`.
	pub fn get(&self, key: &str) -> Option<&str> {
		self.fields.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
	}

	/// Fields in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.fields.iter().map(|(key, value)| (key.as_str(), value.as_str()))
	}

	/// Copies the fields into a map.
	pub fn to_map(&self) -> BTreeMap<String, String> {
		self.fields.iter().cloned().collect()
	}

	fn put(&mut self, key: &str, value: String) {
		match self.fields.iter_mut().find(|(name, _)| name == key) {
			Some((_, slot)) => *slot = value,
			None => self.fields.push((key.to_owned(), value)),
		}
	}
}

/// Receives flushed event batches.
pub trait EventReceiver
where
	Self: Send + Sync,
{
	/// Handles one flushed collection.
	fn on_events(&self, events: &[Event]);
}
impl<F> EventReceiver for F
where
	F: Send + Sync + Fn(&[Event]),
{
	fn on_events(&self, events: &[Event]) {
		self(events)
	}
}

/// Handle to an open collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CollectionHandle {
	correlation_id: Uuid,
}
impl CollectionHandle {
	/// Correlation id owning the collection.
	pub fn correlation_id(&self) -> Uuid {
		self.correlation_id
	}
}

/// Per-application telemetry registry.
#[derive(Default)]
pub struct Telemetry {
	receiver: RwLock<Option<Arc<dyn EventReceiver>>>,
	collections: Mutex<HashMap<Uuid, Vec<Event>>>,
}
impl Telemetry {
	/// Creates a registry without a receiver.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `receiver`, replacing any previous one.
	pub fn set_receiver(&self, receiver: impl 'static + EventReceiver) {
		*self.receiver.write() = Some(Arc::new(receiver));
	}

	/// Removes the receiver; later flushes drop their batches.
	pub fn clear_receiver(&self) {
		*self.receiver.write() = None;
	}

	/// Opens (or reopens) the collection for `correlation_id`.
	pub fn create_collection(&self, correlation_id: Uuid) -> CollectionHandle {
		self.collections.lock().entry(correlation_id).or_default();

		CollectionHandle { correlation_id }
	}

	/// Appends `event` to the collection.
	pub fn add_event(&self, handle: &CollectionHandle, event: Event) {
		self.collections.lock().entry(handle.correlation_id).or_default().push(event);
	}

	/// Delivers the collection as one batch to the current receiver, then discards it.
	///
	/// Empty collections are discarded without calling the receiver.
	pub fn flush(&self, handle: &CollectionHandle) {
		let Some(events) = self.collections.lock().remove(&handle.correlation_id) else {
			return;
		};

		if events.is_empty() {
			return;
		}

		let receiver = self.receiver.read().clone();

		if let Some(receiver) = receiver {
			receiver.on_events(&events);
		}
	}

	/// Opens the collection for `correlation_id` and discards it if the scope is dropped
	/// before [`ScopedCollection::flush`].
	pub fn open_scoped(&self, correlation_id: Uuid) -> ScopedCollection<'_> {
		ScopedCollection { telemetry: self, handle: self.create_collection(correlation_id) }
	}

	/// Drops the collection without delivering it.
	pub fn discard(&self, handle: &CollectionHandle) {
		self.collections.lock().remove(&handle.correlation_id);
	}

	/// Number of open collections.
	pub fn open_collections(&self) -> usize {
		self.collections.lock().len()
	}

	/// Number of events buffered under `handle`.
	pub fn pending(&self, handle: &CollectionHandle) -> usize {
		self.collections.lock().get(&handle.correlation_id).map_or(0, Vec::len)
	}

	/// Drops every open collection and the receiver.
	pub fn clear(&self) {
		self.collections.lock().clear();
		self.clear_receiver();
	}
}
impl Debug for Telemetry {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Telemetry")
			.field("has_receiver", &self.receiver.read().is_some())
			.field("open_collections", &self.collections.lock().len())
			.finish()
	}
}

/// Collection bound to one acquisition call.
#[derive(Debug)]
pub struct ScopedCollection<'a> {
	telemetry: &'a Telemetry,
	handle: CollectionHandle,
}
impl ScopedCollection<'_> {
	/// Handle events are recorded under.
	pub fn handle(&self) -> &CollectionHandle {
		&self.handle
	}

	/// Delivers the batch to the receiver.
	pub fn flush(self) {
		self.telemetry.flush(&self.handle);
	}
}
impl Drop for ScopedCollection<'_> {
	fn drop(&mut self) {
		self.telemetry.discard(&self.handle);
	}
}

fn unix_millis(instant: OffsetDateTime) -> i64 {
	i64::try_from(instant.unix_timestamp_nanos() / 1_000_000).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn events_carry_reserved_keys_and_ignore_overrides() {
		let mut event = Event::start(events::HTTP);

		assert_eq!(event.name(), events::HTTP);
		assert_eq!(event.get(ELAPSED_TIME_KEY), Some(ELAPSED_SENTINEL));
		assert!(event.get(START_TIME_KEY).and_then(|v| v.parse::<i64>().ok()).is_some());

		event.set(EVENT_NAME_KEY, "spoofed").set(keys::HTTP_STATUS, "200");
		event.stop();

		assert_eq!(event.name(), events::HTTP);
		assert_eq!(event.get(keys::HTTP_STATUS), Some("200"));
		assert!(
			event.get(ELAPSED_TIME_KEY).and_then(|v| v.parse::<i64>().ok()).is_some_and(|v| v >= 0)
		);
		assert_eq!(event.iter().count(), 4);
	}

	#[test]
	fn flush_delivers_one_batch_to_the_late_receiver() {
		let telemetry = Telemetry::new();
		let batches = Arc::new(Mutex::new(Vec::<usize>::new()));
		let handle = telemetry.create_collection(Uuid::new_v4());

		telemetry.add_event(&handle, Event::start(events::API));
		telemetry.add_event(&handle, Event::start(events::UI));

		let sink = batches.clone();

		telemetry.set_receiver(move |events: &[Event]| sink.lock().push(events.len()));

		assert_eq!(telemetry.pending(&handle), 2);

		telemetry.flush(&handle);
		telemetry.flush(&handle);

		assert_eq!(*batches.lock(), vec![2]);
		assert_eq!(telemetry.pending(&handle), 0);
	}

	#[test]
	fn dropped_scopes_discard_their_events() {
		let telemetry = Telemetry::new();
		let delivered = Arc::new(Mutex::new(0_usize));
		let sink = delivered.clone();

		telemetry.set_receiver(move |events: &[Event]| *sink.lock() += events.len());

		{
			let scope = telemetry.open_scoped(Uuid::new_v4());

			telemetry.add_event(scope.handle(), Event::start(events::HTTP));
		}

		assert_eq!(telemetry.open_collections(), 0);
		assert_eq!(*delivered.lock(), 0);

		let scope = telemetry.open_scoped(Uuid::new_v4());

		telemetry.add_event(scope.handle(), Event::start(events::API));
		scope.flush();

		assert_eq!(telemetry.open_collections(), 0);
		assert_eq!(*delivered.lock(), 1);
	}
}
