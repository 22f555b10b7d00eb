//! Session owner.
//!
//! Turns the CLI's direct TCP mode into rendezvous events (dialling is the
//! initiator side, accepting is the responder side), builds the transport,
//! runs one [`Session`] at a time and carries the suspended receive and the
//! unsent files from a dropped session into the next one.

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::core::config::{MAX_RECONNECT_ATTEMPTS, RECONNECT_DELAY};
use crate::core::rendezvous::{RendezvousAction, RendezvousCoordinator, RendezvousEvent};
use crate::core::session::{
    Carryover, Session, SessionConfig, SessionHandle, SessionPorts, TeardownReason,
};
use crate::core::transport::{TcpTransport, TransportEvents};
use crate::utils::sos::SignalOfStop;
use crate::workers::args::Command;

pub struct Node {
    config: SessionConfig,
    handle: SessionHandle,
    ports: SessionPorts,
    rendezvous: RendezvousCoordinator,
    carryover: Carryover,
    sos: SignalOfStop,
}

impl Node {
    pub fn new(
        config: SessionConfig,
        handle: SessionHandle,
        ports: SessionPorts,
        sos: SignalOfStop,
    ) -> Self {
        Self {
            config,
            handle,
            ports,
            rendezvous: RendezvousCoordinator::new(),
            carryover: Carryover::default(),
            sos,
        }
    }

    pub async fn run(mut self, command: Command) -> Result<()> {
        match command {
            Command::Listen { bind } => self.listen(&bind).await,
            Command::Connect {
                addr,
                files,
                reconnect,
            } => {
                if !files.is_empty() {
                    self.handle.enqueue_files(files)?;
                }
                self.connect(&addr, reconnect).await
            }
        }
    }

    /// Responder: accept one peer at a time until stopped.
    async fn listen(&mut self, bind: &str) -> Result<()> {
        let listener = TcpListener::bind(bind)
            .await
            .with_context(|| format!("Failed to listen on {bind}"))?;
        let local = listener.local_addr()?;
        info!(event = "listening", addr = %local, "Waiting for a peer");
        println!("Listening on {local}");

        loop {
            let (stream, addr) = tokio::select! {
                accepted = listener.accept() => accepted.context("Failed to accept connection")?,
                _ = self.sos.wait() => return Ok(()),
            };

            let actions = self.rendezvous.handle(RendezvousEvent::IncomingOffer {
                blob: String::new(),
                from: addr.to_string(),
            });
            if !matches!(actions.as_slice(), [RendezvousAction::StartAsResponder { .. }]) {
                continue;
            }

            let (transport, events) = match TcpTransport::from_stream(stream) {
                Ok(link) => link,
                Err(e) => {
                    warn!(event = "transport_setup_failed", peer = %addr, error = %e, "Dropping connection");
                    self.rendezvous.reset();
                    continue;
                }
            };

            let reason = self.run_session(transport, events, Some(&listener)).await;
            if self.sos.cancelled() || reason == TeardownReason::LocalClose {
                return Ok(());
            }
            println!("Waiting for the next peer on {local}");
        }
    }

    /// Initiator: dial `addr`, and with `reconnect` redial after a dropped
    /// link so the next session resumes where this one stopped.
    async fn connect(&mut self, addr: &str, reconnect: bool) -> Result<()> {
        let mut failures = 0u32;
        let mut connected_once = false;

        loop {
            let actions = self.rendezvous.handle(RendezvousEvent::PeerJoined {
                peer_id: addr.to_string(),
            });
            if !matches!(actions.as_slice(), [RendezvousAction::StartAsInitiator { .. }]) {
                anyhow::bail!("a session is already running");
            }

            let dialled = tokio::select! {
                dialled = TcpTransport::connect(addr) => dialled,
                _ = self.sos.wait() => return Ok(()),
            };
            let (transport, events) = match dialled {
                Ok(link) => link,
                Err(e) if !connected_once || !reconnect || failures >= MAX_RECONNECT_ATTEMPTS => {
                    self.rendezvous.reset();
                    return Err(e).with_context(|| format!("Could not connect to {addr}"));
                }
                Err(e) => {
                    failures += 1;
                    warn!(event = "redial_failed", %addr, attempt = failures, error = %e, "Redial failed");
                    self.rendezvous.reset();
                    if !self.pause_before_redial().await {
                        return Ok(());
                    }
                    continue;
                }
            };
            self.rendezvous.handle(RendezvousEvent::OfferAccepted {
                blob: String::new(),
            });
            connected_once = true;
            failures = 0;

            let reason = self.run_session(transport, events, None).await;
            if !reconnect || !reason.is_transport_loss() || self.sos.cancelled() {
                return Ok(());
            }
            info!(event = "redial", %addr, "Connection lost, redialling");
            println!("Connection lost, redialling {addr}");
            if !self.pause_before_redial().await {
                return Ok(());
            }
        }
    }

    /// Returns false when stopped while waiting.
    async fn pause_before_redial(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(RECONNECT_DELAY) => true,
            _ = self.sos.wait() => false,
        }
    }

    /// Run one session to completion. While it runs, further peers reaching
    /// `listener` are refused. A stop signal closes the session cleanly.
    async fn run_session(
        &mut self,
        transport: TcpTransport,
        events: TransportEvents,
        listener: Option<&TcpListener>,
    ) -> TeardownReason {
        self.rendezvous.on_connected();
        let carryover = std::mem::take(&mut self.carryover);
        let session = Session::new(
            self.config.clone(),
            transport,
            events,
            &mut self.ports,
            carryover,
        );
        let run = session.run();
        tokio::pin!(run);

        let mut closing = false;
        let outcome = loop {
            tokio::select! {
                outcome = &mut run => break outcome,
                accepted = accept_extra(listener) => {
                    if let Ok((stream, addr)) = accepted {
                        self.rendezvous.handle(RendezvousEvent::IncomingOffer {
                            blob: String::new(),
                            from: addr.to_string(),
                        });
                        drop(stream);
                    }
                }
                _ = self.sos.wait(), if !closing => {
                    closing = true;
                    let _ = self.handle.close();
                }
            }
        };

        self.rendezvous.handle(RendezvousEvent::PeerLeft);
        self.rendezvous.reset();
        if outcome.reason.is_transport_loss() {
            self.carryover = outcome.carryover;
        }
        outcome.reason
    }
}

async fn accept_extra(
    listener: Option<&TcpListener>,
) -> std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}
