//! Message transport between the controller and an execution context.
//!
//! A transport moves whole JSON messages in both directions. It is split into
//! a sender half ([`Transport`]) and a receiver half ([`TransportReceiver`])
//! whose `run` loop pushes every inbound message into an unbounded channel.
//!
//! Two implementations exist:
//!
//! - [`PipeTransport`]: length-prefixed frames over any byte stream
//!   (child process stdio, `tokio::io::duplex` in tests). Each frame is a
//!   4-byte little-endian length followed by that many bytes of JSON.
//! - [`channel_pair`]: in-process channels for contexts hosted on a thread.

#[cfg(test)]
mod tests;

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

/// Largest frame accepted from or written to a pipe.
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// Sending half of a transport.
pub trait Transport: Send {
	/// Sends one message to the peer.
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Receiving half of a transport.
pub trait TransportReceiver: Send {
	/// Reads messages until the peer goes away, forwarding each one to the
	/// message channel handed out alongside this receiver.
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>>;
}

/// Both halves of a transport plus the channel its receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Length-prefixed JSON transport over a byte stream pair.
pub struct PipeTransport<W, R> {
	writer: W,
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	///
	/// Returns the transport and the receiver that inbound messages are
	/// delivered to once [`run`](Self::run) is driving the reader.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		(
			Self {
				writer,
				reader,
				message_tx,
			},
			message_rx,
		)
	}

	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}

	/// Reads frames until end of stream.
	///
	/// A clean end of stream between frames returns `Ok(())`; a stream that
	/// ends inside a frame is an error.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.reader, &self.message_tx).await
	}

	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender {
				writer: self.writer,
			},
			PipeTransportReceiver {
				reader: self.reader,
				message_tx: self.message_tx,
			},
		)
	}

	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}
}

/// Writing half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
}

impl<W> PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	pub async fn send(&mut self, message: Value) -> Result<()> {
		write_frame(&mut self.writer, &message).await
	}
}

impl<W> Transport for PipeTransportSender<W>
where
	W: AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		Box::pin(async move { write_frame(&mut self.writer, &message).await })
	}
}

/// Reading half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<R> TransportReceiver for PipeTransportReceiver<R>
where
	R: AsyncRead + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		let PipeTransportReceiver {
			mut reader,
			message_tx,
		} = *self;
		Box::pin(async move { read_frames(&mut reader, &message_tx).await })
	}
}

async fn write_frame<W>(writer: &mut W, message: &Value) -> Result<()>
where
	W: AsyncWrite + Unpin,
{
	let bytes = serde_json::to_vec(message)?;
	if bytes.len() > MAX_FRAME_LEN {
		return Err(Error::TransportError(format!(
			"Message of {} bytes exceeds frame limit of {MAX_FRAME_LEN}",
			bytes.len()
		)));
	}

	let length = bytes.len() as u32;
	writer
		.write_all(&length.to_le_bytes())
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write length prefix: {e}")))?;
	writer
		.write_all(&bytes)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write message: {e}")))?;
	writer
		.flush()
		.await
		.map_err(|e| Error::TransportError(format!("Failed to flush: {e}")))?;

	Ok(())
}

/// Reads a frame length, or `None` on a clean end of stream.
async fn read_length_prefix<R>(reader: &mut R) -> Result<Option<usize>>
where
	R: AsyncRead + Unpin,
{
	let mut buf = [0u8; 4];
	let mut filled = 0;
	while filled < buf.len() {
		let n = reader
			.read(&mut buf[filled..])
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
		if n == 0 {
			if filled == 0 {
				return Ok(None);
			}
			return Err(Error::TransportError(format!(
				"Failed to read length prefix: stream ended after {filled} of 4 bytes"
			)));
		}
		filled += n;
	}
	Ok(Some(u32::from_le_bytes(buf) as usize))
}

async fn read_frames<R>(reader: &mut R, message_tx: &mpsc::UnboundedSender<Value>) -> Result<()>
where
	R: AsyncRead + Unpin,
{
	loop {
		let Some(length) = read_length_prefix(reader).await? else {
			tracing::debug!("Transport reached end of stream");
			return Ok(());
		};

		if length > MAX_FRAME_LEN {
			return Err(Error::TransportError(format!(
				"Frame of {length} bytes exceeds limit of {MAX_FRAME_LEN}"
			)));
		}

		let mut body = vec![0u8; length];
		reader
			.read_exact(&mut body)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read message body: {e}")))?;

		let message = match serde_json::from_slice::<Value>(&body) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!(length, "Dropping frame that is not valid JSON: {}", e);
				continue;
			}
		};

		if message_tx.send(message).is_err() {
			tracing::debug!("Message receiver dropped, stopping transport reader");
			return Ok(());
		}
	}
}

/// Creates a connected pair of in-process transports.
///
/// Whatever one side sends arrives on the other side's `message_rx`.
pub fn channel_pair() -> (TransportParts, TransportParts) {
	let (a_to_b_tx, a_to_b_rx) = mpsc::unbounded_channel();
	let (b_to_a_tx, b_to_a_rx) = mpsc::unbounded_channel();

	(
		channel_side(a_to_b_tx, b_to_a_rx),
		channel_side(b_to_a_tx, a_to_b_rx),
	)
}

fn channel_side(
	outbound: mpsc::UnboundedSender<Value>,
	inbound: mpsc::UnboundedReceiver<Value>,
) -> TransportParts {
	let (message_tx, message_rx) = mpsc::unbounded_channel();
	TransportParts {
		sender: Box::new(ChannelTransportSender { outbound }),
		receiver: Box::new(ChannelTransportReceiver {
			inbound,
			message_tx,
		}),
		message_rx,
	}
}

struct ChannelTransportSender {
	outbound: mpsc::UnboundedSender<Value>,
}

impl Transport for ChannelTransportSender {
	fn send(&mut self, message: Value) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
		let result = self.outbound.send(message).map_err(|_| Error::ChannelClosed);
		Box::pin(std::future::ready(result))
	}
}

struct ChannelTransportReceiver {
	inbound: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for ChannelTransportReceiver {
	fn run(self: Box<Self>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> {
		let ChannelTransportReceiver {
			mut inbound,
			message_tx,
		} = *self;
		Box::pin(async move {
			while let Some(message) = inbound.recv().await {
				if message_tx.send(message).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}
