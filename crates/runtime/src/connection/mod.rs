//! Request/response correlation for one session channel.
//!
//! This module implements the correlation layer on top of a transport.
//! It handles:
//! - Generating unique request IDs
//! - Correlating responses with pending requests
//! - Routing unsolicited events by kind
//! - Settling every pending request when the channel goes away
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send`] with a [`Command`]
//! 2. Connection generates a unique ID and creates a oneshot channel
//! 3. Request is serialized and queued for the writer task
//! 4. Caller awaits the oneshot receiver (bounded by timeout / cancellation)
//! 5. Message loop receives a response from the transport
//! 6. Response is correlated by ID and sent through the oneshot channel
//! 7. Caller receives the reply
//!
//! Several calls may be in flight on one connection at a time; each one
//! gets exactly the response carrying its own id.


use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use sqlw_protocol::{Command, Event, Message, Reply, Request};
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::transport::{Transport, TransportParts, TransportReceiver};

/// Capacity of the per-connection event broadcast.
const EVENT_CAPACITY: usize = 16;

/// Pending request callbacks keyed by request ID.
type CallbackMap = Arc<TokioMutex<HashMap<u32, oneshot::Sender<Result<Reply>>>>>;

/// RAII guard ensuring callback cleanup when a request future is dropped.
struct CancelGuard {
	id: u32,
	callbacks: CallbackMap,
	completed: bool,
}

impl CancelGuard {
	fn new(id: u32, callbacks: CallbackMap) -> Self {
		Self {
			id,
			callbacks,
			completed: false,
		}
	}

	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.completed {
			return;
		}

		let id = self.id;
		let callbacks = Arc::clone(&self.callbacks);

		if let Ok(handle) = tokio::runtime::Handle::try_current() {
			handle.spawn(async move {
				if callbacks.lock().await.remove(&id).is_some() {
					tracing::debug!(id, "CancelGuard: removed orphaned callback");
				}
			});
		}
	}
}

/// Future returned by [`Connection::send`] with automatic cancellation cleanup.
struct ResponseFuture {
	rx: oneshot::Receiver<Result<Reply>>,
	guard: CancelGuard,
}

impl Future for ResponseFuture {
	type Output = Result<Reply>;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		match Pin::new(&mut self.rx).poll(cx) {
			Poll::Ready(result) => {
				self.guard.complete();
				Poll::Ready(result.map_err(|_| Error::ChannelClosed).and_then(|r| r))
			}
			Poll::Pending => Poll::Pending,
		}
	}
}

/// Correlating connection to one execution context.
///
/// Uses sequential request IDs and oneshot channels for correlation.
pub struct Connection {
	/// Session name, used in log fields
	label: Arc<str>,
	/// Sequential request ID counter
	last_id: AtomicU32,
	/// Pending request callbacks keyed by request ID
	callbacks: CallbackMap,
	/// Set once the message loop has ended; guarded by the callbacks lock
	closed: AtomicBool,
	/// Channel for sending outbound messages to the writer task
	outbound_tx: mpsc::UnboundedSender<Value>,
	/// Transport sender (taken by run() to start writer task)
	transport_sender: TokioMutex<Option<Box<dyn Transport>>>,
	/// Receiver half of transport (taken by run())
	transport_receiver: TokioMutex<Option<Box<dyn TransportReceiver>>>,
	/// Receiver for incoming messages from transport
	message_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Receiver for outbound messages (taken by run() to start writer task)
	outbound_rx: TokioMutex<Option<mpsc::UnboundedReceiver<Value>>>,
	/// Unsolicited events from the context
	events: broadcast::Sender<Event>,
	/// Upper bound on how long a caller waits for its response
	call_timeout: Option<Duration>,
}

impl Connection {
	/// Create a new Connection with the given transport
	pub fn new(parts: TransportParts) -> Self {
		let TransportParts {
			sender,
			receiver,
			message_rx,
		} = parts;

		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		Self {
			label: Arc::from(""),
			last_id: AtomicU32::new(0),
			callbacks: Arc::new(TokioMutex::new(HashMap::new())),
			closed: AtomicBool::new(false),
			outbound_tx,
			transport_sender: TokioMutex::new(Some(sender)),
			transport_receiver: TokioMutex::new(Some(receiver)),
			message_rx: TokioMutex::new(Some(message_rx)),
			outbound_rx: TokioMutex::new(Some(outbound_rx)),
			events,
			call_timeout: None,
		}
	}

	/// Names the connection after its session for log output.
	pub fn with_label(mut self, label: impl Into<Arc<str>>) -> Self {
		self.label = label.into();
		self
	}

	/// Bounds every call on this connection by `timeout`.
	pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
		self.call_timeout = timeout;
		self
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	/// Returns true once the message loop has ended.
	pub fn is_closed(&self) -> bool {
		self.closed.load(Ordering::SeqCst)
	}

	/// Subscribes to unsolicited events from the context.
	pub fn subscribe(&self) -> broadcast::Receiver<Event> {
		self.events.subscribe()
	}

	/// Sends a command and awaits its response.
	pub async fn send(&self, command: Command) -> Result<Reply> {
		self.send_with(command, None).await
	}

	/// Sends a command and awaits its response, giving up when `cancel` fires.
	///
	/// Giving up only stops the wait on this side; the context still runs the
	/// command to completion and its late response is discarded.
	pub async fn send_with(
		&self,
		command: Command,
		cancel: Option<&CancellationToken>,
	) -> Result<Reply> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		let action = command.action();

		tracing::debug!(session = %self.label, id, action, "Sending command");

		let (tx, rx) = oneshot::channel();
		{
			let mut callbacks = self.callbacks.lock().await;
			if self.closed.load(Ordering::SeqCst) {
				return Err(Error::ChannelClosed);
			}
			callbacks.insert(id, tx);
		}

		let guard = CancelGuard::new(id, Arc::clone(&self.callbacks));

		let request_value = serde_json::to_value(&Request { id, command })?;
		if self.outbound_tx.send(request_value).is_err() {
			tracing::error!(session = %self.label, "Failed to queue command: outbound channel closed");
			return Err(Error::ChannelClosed);
		}

		let response = ResponseFuture { rx, guard };
		match cancel {
			Some(token) => tokio::select! {
				biased;
				_ = token.cancelled() => {
					tracing::debug!(session = %self.label, id, action, "Call cancelled by caller");
					Err(Error::Cancelled(format!("{action} (id={id})")))
				}
				result = self.await_response(response, action, id) => result,
			},
			None => self.await_response(response, action, id).await,
		}
	}

	async fn await_response(
		&self,
		response: ResponseFuture,
		action: &'static str,
		id: u32,
	) -> Result<Reply> {
		let Some(limit) = self.call_timeout else {
			return response.await;
		};

		match tokio::time::timeout(limit, response).await {
			Ok(result) => result,
			Err(_) => {
				tracing::warn!(session = %self.label, id, action, "Call timed out");
				Err(Error::Timeout(format!(
					"no response to {action} (id={id}) within {}ms",
					limit.as_millis()
				)))
			}
		}
	}

	/// Sends a command without waiting for (or expecting) a response.
	///
	/// Synchronous so it can be used from `Drop`.
	pub fn notify(&self, command: Command) -> Result<()> {
		let id = self.last_id.fetch_add(1, Ordering::SeqCst);
		tracing::debug!(session = %self.label, id, action = command.action(), "Sending notification");
		let request_value = serde_json::to_value(&Request { id, command })?;
		self.outbound_tx
			.send(request_value)
			.map_err(|_| Error::ChannelClosed)
	}

	/// Run the message dispatch loop until the transport closes.
	///
	/// On return every pending call has been settled with
	/// [`Error::ChannelClosed`] and further calls fail immediately.
	pub async fn run(self: &Arc<Self>) -> Result<()> {
		let transport_receiver = self.transport_receiver.lock().await.take();
		let transport_sender = self.transport_sender.lock().await.take();
		let outbound_rx = self.outbound_rx.lock().await.take();
		let message_rx = self.message_rx.lock().await.take();

		let (
			Some(transport_receiver),
			Some(mut transport_sender),
			Some(mut outbound_rx),
			Some(mut message_rx),
		) = (transport_receiver, transport_sender, outbound_rx, message_rx)
		else {
			return Err(Error::ProtocolError(
				"run() can only be called once per connection".to_string(),
			));
		};

		let label = Arc::clone(&self.label);
		let reader_handle = tokio::spawn(async move {
			if let Err(e) = transport_receiver.run().await {
				tracing::error!(session = %label, "Transport read error: {}", e);
			}
		});

		let label = Arc::clone(&self.label);
		let writer_handle = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = transport_sender.send(message).await {
					tracing::error!(session = %label, "Transport write error: {}", e);
					break;
				}
			}
		});

		while let Some(message_value) = message_rx.recv().await {
			match serde_json::from_value::<Message>(message_value) {
				Ok(message) => self.dispatch_internal(message).await,
				Err(e) => {
					tracing::error!(session = %self.label, "Failed to parse message: {}", e);
				}
			}
		}

		self.fail_pending().await;

		let _ = reader_handle.await;
		writer_handle.abort();

		tracing::debug!(session = %self.label, "Connection message loop finished");
		Ok(())
	}

	/// Dispatch an incoming message (test-only public version)
	#[cfg(test)]
	pub async fn dispatch(&self, message: Message) {
		self.dispatch_internal(message).await
	}

	async fn dispatch_internal(&self, message: Message) {
		match message {
			Message::Response(response) => {
				let id = response.id;
				let Some(callback) = self.callbacks.lock().await.remove(&id) else {
					// expected after a timeout or cancellation
					tracing::debug!(session = %self.label, id, "Response for abandoned request (ignored)");
					return;
				};

				let result = response.into_result().map_err(Error::from);
				let _ = callback.send(result);
			}
			Message::Event(event) => {
				tracing::debug!(session = %self.label, ?event, "Event received");
				// no subscribers is fine
				let _ = self.events.send(event);
			}
			Message::Unknown(value) => {
				let Some(id) = value.get("id").and_then(Value::as_u64) else {
					tracing::debug!(
						session = %self.label,
						"Unknown message type (forward-compatible, ignored): {}",
						value
					);
					return;
				};

				// an undecodable reply still has to settle its caller
				let callback = match u32::try_from(id) {
					Ok(id) => self.callbacks.lock().await.remove(&id),
					Err(_) => None,
				};

				match callback {
					Some(callback) => {
						tracing::warn!(session = %self.label, id, "Malformed response");
						let _ = callback.send(Err(Error::ProtocolError(format!(
							"malformed response for id={id}: {value}"
						))));
					}
					None => {
						tracing::debug!(session = %self.label, id, "Malformed response for unknown request (ignored)");
					}
				}
			}
		}
	}

	async fn fail_pending(&self) {
		let mut callbacks = self.callbacks.lock().await;
		self.closed.store(true, Ordering::SeqCst);

		if !callbacks.is_empty() {
			tracing::warn!(
				session = %self.label,
				pending = callbacks.len(),
				"Channel closed with calls in flight"
			);
		}

		for (_, callback) in callbacks.drain() {
			let _ = callback.send(Err(Error::ChannelClosed));
		}
	}
}
