//! Duplex audio channel to the interview service.
//!
//! Frames submitted before the connection opens wait in a FIFO queue. When
//! the transport reports `Opened`, the session identifier goes out first and
//! the queue is flushed in submission order. After close, sends fail with
//! [`ChannelError::Closed`].
//!
//! The websocket itself runs on a spawned task; this type only owns the
//! queue and the two mpsc endpoints, so it can be driven by any transport
//! that speaks [`OutboundFrame`] / [`ChannelEvent`].

use crate::error::ChannelError;
use crate::protocol::{decode_inbound, InboundMessage, OutboundFrame};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// What the transport reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    Inbound(InboundMessage),
    Closed { reason: Option<String> },
    Failed(String),
}

pub struct DuplexChannel {
    session_id: String,
    state: ChannelState,
    pending: VecDeque<OutboundFrame>,
    writer: Option<mpsc::UnboundedSender<OutboundFrame>>,
    events: mpsc::UnboundedReceiver<ChannelEvent>,
    task: Option<JoinHandle<()>>,
    transmitted: u64,
}

impl DuplexChannel {
    /// Open a websocket to `url`. Must be called within a tokio runtime.
    pub fn connect(url: &str, session_id: impl Into<String>) -> Self {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_websocket(url.to_string(), writer_rx, events_tx));
        let mut channel = Self::from_parts(session_id, writer_tx, events_rx);
        channel.task = Some(task);
        channel
    }

    /// Channel over an arbitrary transport: frames to send come out of `writer`'s
    /// receiver, transport events go into `events`' sender.
    pub fn from_parts(
        session_id: impl Into<String>,
        writer: mpsc::UnboundedSender<OutboundFrame>,
        events: mpsc::UnboundedReceiver<ChannelEvent>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            state: ChannelState::Connecting,
            pending: VecDeque::new(),
            writer: Some(writer),
            events,
            task: None,
            transmitted: 0,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Frames handed to the transport so far.
    pub fn transmitted(&self) -> u64 {
        self.transmitted
    }

    /// Queue while connecting, transmit while open, refuse once closed.
    pub fn send(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        match self.state {
            ChannelState::Connecting => {
                debug!("channel connecting; queued {} frame", frame.kind());
                self.pending.push_back(frame);
                Ok(())
            }
            ChannelState::Open => self.transmit(frame),
            ChannelState::Closed => Err(ChannelError::Closed),
        }
    }

    /// Transport is up: identify, then drain the queue. Returns how many queued frames were flushed.
    pub fn on_opened(&mut self) -> Result<usize, ChannelError> {
        match self.state {
            ChannelState::Connecting => {}
            ChannelState::Open => return Ok(0),
            ChannelState::Closed => return Err(ChannelError::Closed),
        }
        self.state = ChannelState::Open;
        self.transmit(OutboundFrame::Identify {
            session_id: self.session_id.clone(),
        })?;
        let mut flushed = 0;
        while let Some(frame) = self.pending.pop_front() {
            self.transmit(frame)?;
            flushed += 1;
        }
        info!("🔌 Channel open for session {} ({} queued frame(s) flushed)", self.session_id, flushed);
        Ok(flushed)
    }

    /// Transport went away.
    pub fn on_closed(&mut self) {
        if self.state != ChannelState::Closed {
            self.state = ChannelState::Closed;
            if !self.pending.is_empty() {
                warn!("channel closed with {} frame(s) never sent", self.pending.len());
            }
            self.pending.clear();
            self.writer = None;
        }
    }

    /// Close from our side. The transport task sends a close frame and exits.
    pub fn close(&mut self) {
        if self.state != ChannelState::Closed {
            debug!("closing channel for session {}", self.session_id);
        }
        self.on_closed();
    }

    /// Next transport event. Pending forever once the channel is closed.
    pub async fn next_event(&mut self) -> Option<ChannelEvent> {
        if self.state == ChannelState::Closed {
            return std::future::pending().await;
        }
        self.events.recv().await
    }

    fn transmit(&mut self, frame: OutboundFrame) -> Result<(), ChannelError> {
        let writer = self.writer.as_ref().ok_or(ChannelError::Closed)?;
        writer.send(frame).map_err(|_| ChannelError::Closed)?;
        self.transmitted += 1;
        Ok(())
    }
}

impl Drop for DuplexChannel {
    fn drop(&mut self) {
        self.close();
        if let Some(task) = self.task.take() {
            // The task exits on its own once the writer is gone; detach it.
            drop(task);
        }
    }
}

async fn run_websocket(
    url: String,
    mut writer_rx: mpsc::UnboundedReceiver<OutboundFrame>,
    events: mpsc::UnboundedSender<ChannelEvent>,
) {
    let ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(e) => {
            error!("❌ Failed to connect to {}: {}", url, e);
            let _ = events.send(ChannelEvent::Failed(e.to_string()));
            return;
        }
    };
    let _ = events.send(ChannelEvent::Opened);
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = writer_rx.recv() => match frame {
                Some(frame) => {
                    let message = match frame.to_message() {
                        Ok(message) => message,
                        Err(e) => {
                            warn!("dropping unencodable {} frame: {}", frame.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(message).await {
                        let _ = events.send(ChannelEvent::Failed(e.to_string()));
                        return;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    return;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty());
                    let _ = events.send(ChannelEvent::Closed { reason });
                    return;
                }
                Some(Ok(message)) => {
                    if let Some(inbound) = decode_inbound(message) {
                        let _ = events.send(ChannelEvent::Inbound(inbound));
                    }
                }
                Some(Err(e)) => {
                    let _ = events.send(ChannelEvent::Failed(e.to_string()));
                    return;
                }
                None => {
                    let _ = events.send(ChannelEvent::Closed { reason: None });
                    return;
                }
            },
        }
    }
}
