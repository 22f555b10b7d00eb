//! Rendezvous coordinator: turns matchmaking signals into transport
//! start/stop instructions for the session owner.
//!
//! Pure state machine in the engine style: feed it a [`RendezvousEvent`],
//! get back the [`RendezvousAction`]s to carry out. Blobs are opaque
//! transport-establishment data relayed between the two parties.

use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousEvent {
    /// Another party entered the room; we dial them.
    PeerJoined { peer_id: String },
    /// A party dialled us.
    IncomingOffer { blob: String, from: String },
    /// Our dial was answered.
    OfferAccepted { blob: String },
    PeerLeft,
    /// The room already holds two parties.
    SessionFull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousAction {
    StartAsInitiator { peer_id: String },
    StartAsResponder { blob: String, from: String },
    CompleteHandshake { blob: String },
    /// Tear the current transport (and session) down.
    Teardown,
    /// Turn away a party because a session is already running.
    Refuse { peer_id: String },
    /// Tell the user the room is full; nothing to tear down.
    ReportFull,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RendezvousPhase {
    Waiting,
    Initiating { peer_id: String },
    Responding { peer_id: String },
    Connected { peer_id: String },
}

#[derive(Debug)]
pub struct RendezvousCoordinator {
    phase: RendezvousPhase,
}

impl Default for RendezvousCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl RendezvousCoordinator {
    pub fn new() -> Self {
        Self {
            phase: RendezvousPhase::Waiting,
        }
    }

    pub fn phase(&self) -> &RendezvousPhase {
        &self.phase
    }

    pub fn is_busy(&self) -> bool {
        self.phase != RendezvousPhase::Waiting
    }

    pub fn handle(&mut self, event: RendezvousEvent) -> Vec<RendezvousAction> {
        match event {
            RendezvousEvent::PeerJoined { peer_id } => {
                if self.is_busy() {
                    warn!(event = "rendezvous_refuse", %peer_id, "Peer joined during a session");
                    return vec![RendezvousAction::Refuse { peer_id }];
                }
                info!(event = "rendezvous_initiate", %peer_id, "Starting as initiator");
                self.phase = RendezvousPhase::Initiating {
                    peer_id: peer_id.clone(),
                };
                vec![RendezvousAction::StartAsInitiator { peer_id }]
            }
            RendezvousEvent::IncomingOffer { blob, from } => {
                if self.is_busy() {
                    warn!(event = "rendezvous_refuse", peer_id = %from, "Offer during a session");
                    return vec![RendezvousAction::Refuse { peer_id: from }];
                }
                info!(event = "rendezvous_respond", peer_id = %from, "Starting as responder");
                self.phase = RendezvousPhase::Responding {
                    peer_id: from.clone(),
                };
                vec![RendezvousAction::StartAsResponder { blob, from }]
            }
            RendezvousEvent::OfferAccepted { blob } => match &self.phase {
                RendezvousPhase::Initiating { .. } => {
                    vec![RendezvousAction::CompleteHandshake { blob }]
                }
                other => {
                    warn!(event = "rendezvous_stray_answer", phase = ?other, "Answer without a pending offer");
                    Vec::new()
                }
            },
            RendezvousEvent::PeerLeft => {
                if self.is_busy() {
                    info!(event = "rendezvous_peer_left", "Peer left, tearing down");
                    self.phase = RendezvousPhase::Waiting;
                    vec![RendezvousAction::Teardown]
                } else {
                    Vec::new()
                }
            }
            RendezvousEvent::SessionFull => {
                warn!(event = "rendezvous_full", "Session is full");
                vec![RendezvousAction::ReportFull]
            }
        }
    }

    /// The transport came up.
    pub fn on_connected(&mut self) {
        let peer_id = match &self.phase {
            RendezvousPhase::Initiating { peer_id } | RendezvousPhase::Responding { peer_id } => {
                peer_id.clone()
            }
            _ => return,
        };
        self.phase = RendezvousPhase::Connected { peer_id };
    }

    /// The session ended for any reason; accept the next party.
    pub fn reset(&mut self) {
        self.phase = RendezvousPhase::Waiting;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joiner_is_dialled_and_answer_completes() {
        let mut rdv = RendezvousCoordinator::new();
        assert_eq!(
            rdv.handle(RendezvousEvent::PeerJoined { peer_id: "p1".into() }),
            vec![RendezvousAction::StartAsInitiator { peer_id: "p1".into() }]
        );
        assert_eq!(
            rdv.handle(RendezvousEvent::OfferAccepted { blob: "sdp".into() }),
            vec![RendezvousAction::CompleteHandshake { blob: "sdp".into() }]
        );
        rdv.on_connected();
        assert_eq!(
            rdv.phase(),
            &RendezvousPhase::Connected { peer_id: "p1".into() }
        );
    }

    #[test]
    fn second_party_is_refused_while_busy() {
        let mut rdv = RendezvousCoordinator::new();
        rdv.handle(RendezvousEvent::IncomingOffer {
            blob: "b".into(),
            from: "p1".into(),
        });
        assert_eq!(
            rdv.handle(RendezvousEvent::IncomingOffer {
                blob: "b2".into(),
                from: "p2".into(),
            }),
            vec![RendezvousAction::Refuse { peer_id: "p2".into() }]
        );
    }

    #[test]
    fn peer_left_tears_down_and_frees_the_room() {
        let mut rdv = RendezvousCoordinator::new();
        rdv.handle(RendezvousEvent::PeerJoined { peer_id: "p1".into() });
        rdv.on_connected();
        assert_eq!(
            rdv.handle(RendezvousEvent::PeerLeft),
            vec![RendezvousAction::Teardown]
        );
        assert!(!rdv.is_busy());
        assert!(rdv.handle(RendezvousEvent::PeerLeft).is_empty());
    }

    #[test]
    fn stray_answer_and_full_room() {
        let mut rdv = RendezvousCoordinator::new();
        assert!(rdv.handle(RendezvousEvent::OfferAccepted { blob: "x".into() }).is_empty());
        assert_eq!(
            rdv.handle(RendezvousEvent::SessionFull),
            vec![RendezvousAction::ReportFull]
        );
        assert!(!rdv.is_busy());
    }
}
