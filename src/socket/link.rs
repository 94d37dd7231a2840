//! The signaling link: owns the websocket to the relay.
//!
//! Runs as an actor: a command channel in, engine events out. Inbound
//! envelopes are delivered in arrival order with no reordering or
//! deduplication — sequencing is the session engine's job. The link
//! reconnects on its own after unexpected closes; while disconnected,
//! `Send` commands are dropped with a warning (callers check link state
//! before issuing commands that require it).

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::session::event::{EngineEvent, LinkEvent};
use crate::socket::consts::RECONNECT_MAX_DELAY_SECS;
use crate::socket::envelope::{ClientEnvelope, ServerEnvelope};
use crate::socket::error::{Result, SocketError};

type RawWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Commands accepted by the link actor.
#[derive(Debug)]
pub enum LinkCommand {
    /// Serialize and send one envelope. Dropped if the link is down.
    Send(ClientEnvelope),
    /// Close the connection and stop the actor.
    Shutdown,
}

pub struct SignalLink {
    url: String,
    connect_timeout: Duration,
    commands: mpsc::Receiver<LinkCommand>,
    events: mpsc::Sender<EngineEvent>,
}

impl SignalLink {
    pub fn spawn(
        url: String,
        connect_timeout: Duration,
        commands: mpsc::Receiver<LinkCommand>,
        events: mpsc::Sender<EngineEvent>,
    ) -> tokio::task::JoinHandle<()> {
        let link = Self {
            url,
            connect_timeout,
            commands,
            events,
        };
        tokio::spawn(link.run())
    }

    async fn run(mut self) {
        info!("signal link started for {}", self.url);
        let mut errors: u32 = 0;

        loop {
            match self.dial().await {
                Ok(ws) => {
                    errors = 0;
                    self.emit(LinkEvent::Up).await;
                    let shutdown = self.pump(ws).await;
                    self.emit(LinkEvent::Down).await;
                    if shutdown {
                        break;
                    }
                }
                Err(e) => {
                    warn!("relay connection failed: {e}");
                }
            }

            let delay = Duration::from_secs(u64::from(errors * 2).min(RECONNECT_MAX_DELAY_SECS));
            info!("will reconnect to relay in {delay:?} (attempt {})", errors + 1);
            errors += 1;
            if self.wait_for_reconnect(delay).await {
                break;
            }
        }
        info!("signal link stopped");
    }

    async fn dial(&self) -> Result<RawWs> {
        debug!("dialing {}", self.url);
        let connect = connect_async(self.url.as_str());
        match timeout(self.connect_timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(SocketError::WebSocket(e)),
            Err(_) => Err(SocketError::ConnectTimeout),
        }
    }

    /// Drive one live connection. Returns true if the actor should stop.
    async fn pump(&mut self, ws: RawWs) -> bool {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(LinkCommand::Send(envelope)) => {
                        let text = match serde_json::to_string(&envelope) {
                            Ok(text) => text,
                            Err(e) => {
                                warn!("failed to encode envelope: {e}");
                                continue;
                            }
                        };
                        debug!("--> {text}");
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!("relay send failed: {e}");
                            return false;
                        }
                    }
                    Some(LinkCommand::Shutdown) | None => {
                        let _ = sink.send(Message::Close(None)).await;
                        return true;
                    }
                },
                message = stream.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        debug!("<-- {text}");
                        match serde_json::from_str::<ServerEnvelope>(&text) {
                            Ok(envelope) => self.emit(LinkEvent::Inbound(envelope)).await,
                            Err(e) => warn!("skipping undecodable envelope: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            return false;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        trace!("relay closed the connection");
                        return false;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("error reading from relay: {e}");
                        return false;
                    }
                    None => {
                        trace!("relay stream ended");
                        return false;
                    }
                },
            }
        }
    }

    /// Sleep out the backoff, servicing commands. Returns true on shutdown.
    async fn wait_for_reconnect(&mut self, delay: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return false,
                command = self.commands.recv() => match command {
                    Some(LinkCommand::Send(envelope)) => {
                        warn!("link is down, dropping outbound envelope: {envelope:?}");
                    }
                    Some(LinkCommand::Shutdown) | None => return true,
                },
            }
        }
    }

    async fn emit(&self, event: LinkEvent) {
        if self.events.send(EngineEvent::Link(event)).await.is_err() {
            warn!("engine queue dropped, link event lost");
        }
    }
}
