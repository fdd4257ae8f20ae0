//! User-decision prompts relayed through the plugin
//!
//! Delete prompts are asynchronous: the plugin shows a dialog and later
//! answers with `delete-confirmed` and/or `delete-cancelled`. Each request
//! gets a oneshot channel that resolves with the confirmed names once every
//! requested name has been answered. Dropping the sender (disconnect, failed
//! send) tells the waiter nothing was confirmed.

use std::collections::HashMap;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::conflict::Conflict;
use super::message::OutboundMessage;
use super::transport::Transport;
use crate::paths::lookup_key;

struct PendingDelete {
    id: u64,
    /// Unanswered names, keyed by lookup key
    remaining: HashMap<String, String>,
    confirmed: Vec<String>,
    tx: oneshot::Sender<Vec<String>>,
}

#[derive(Default)]
pub struct PromptCoordinator {
    next_id: u64,
    pending: Vec<PendingDelete>,
}

impl PromptCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the plugin to delete files, optionally after user confirmation
    ///
    /// Without confirmation the receiver is already resolved with every name.
    pub fn request_delete_decision(
        &mut self,
        transport: &dyn Transport,
        file_names: Vec<String>,
        require_confirmation: bool,
    ) -> oneshot::Receiver<Vec<String>> {
        let (tx, rx) = oneshot::channel();

        let message = OutboundMessage::FileDelete {
            file_names: file_names.clone(),
            require_confirmation,
        };
        if !transport.send(&message) {
            warn!(
                "Could not send delete request for {} file(s) to {}",
                file_names.len(),
                transport.id()
            );
            return rx;
        }

        if !require_confirmation {
            let _ = tx.send(file_names);
            return rx;
        }

        self.next_id += 1;
        let id = self.next_id;
        debug!("Delete prompt {} waiting on {} file(s)", id, file_names.len());
        self.pending.push(PendingDelete {
            id,
            remaining: file_names
                .into_iter()
                .map(|name| (lookup_key(&name), name))
                .collect(),
            confirmed: Vec::new(),
            tx,
        });
        rx
    }

    /// Send conflicts the heuristic could not settle; the answer arrives as `conflicts-resolved`
    pub fn request_conflict_decisions(
        &self,
        transport: &dyn Transport,
        conflicts: &[Conflict],
    ) -> bool {
        info!("Asking user to resolve {} conflict(s)", conflicts.len());
        transport.send(&OutboundMessage::ConflictsDetected {
            conflicts: conflicts.to_vec(),
        })
    }

    /// The user approved these deletions
    pub fn delete_confirmed(&mut self, file_names: &[String]) {
        self.answer(file_names, true);
    }

    /// The user refused these deletions
    pub fn delete_cancelled(&mut self, file_names: &[String]) {
        self.answer(file_names, false);
    }

    /// Drop every outstanding prompt; waiters observe a closed channel
    pub fn cancel_all(&mut self) -> usize {
        let count = self.pending.len();
        if count > 0 {
            debug!("Cancelling {} outstanding delete prompt(s)", count);
        }
        self.pending.clear();
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn answer(&mut self, file_names: &[String], approved: bool) {
        for name in file_names {
            let key = lookup_key(name);
            let prompt = self
                .pending
                .iter_mut()
                .find(|prompt| prompt.remaining.contains_key(&key));

            match prompt {
                Some(prompt) => {
                    if let Some(requested) = prompt.remaining.remove(&key) {
                        if approved {
                            prompt.confirmed.push(requested);
                        }
                    }
                }
                None => debug!("No delete prompt waiting on {}", name),
            }
        }

        let (done, open): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|prompt| prompt.remaining.is_empty());
        self.pending = open;

        for prompt in done {
            debug!(
                "Delete prompt {} answered, {} confirmed",
                prompt.id,
                prompt.confirmed.len()
            );
            let _ = prompt.tx.send(prompt.confirmed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        sent: Mutex<Vec<OutboundMessage>>,
        online: bool,
    }

    impl Recorder {
        fn new(online: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                online,
            }
        }
    }

    impl Transport for Recorder {
        fn id(&self) -> &str {
            "recorder"
        }

        fn send(&self, message: &OutboundMessage) -> bool {
            if self.online {
                self.sent.lock().unwrap().push(message.clone());
            }
            self.online
        }
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_unconfirmed_request_resolves_immediately() {
        let peer = Recorder::new(true);
        let mut prompts = PromptCoordinator::new();

        let mut rx = prompts.request_delete_decision(&peer, names(&["A.tsx"]), false);

        assert_eq!(rx.try_recv().unwrap(), names(&["A.tsx"]));
        assert_eq!(prompts.pending_count(), 0);
        assert_eq!(
            peer.sent.lock().unwrap()[0],
            OutboundMessage::FileDelete {
                file_names: names(&["A.tsx"]),
                require_confirmation: false,
            }
        );
    }

    #[test]
    fn test_partial_confirmation() {
        let peer = Recorder::new(true);
        let mut prompts = PromptCoordinator::new();
        let mut rx = prompts.request_delete_decision(&peer, names(&["A.tsx", "B.tsx"]), true);

        prompts.delete_confirmed(&names(&["a.tsx"]));
        assert!(rx.try_recv().is_err());
        assert_eq!(prompts.pending_count(), 1);

        prompts.delete_cancelled(&names(&["B.tsx"]));
        assert_eq!(rx.try_recv().unwrap(), names(&["A.tsx"]));
        assert_eq!(prompts.pending_count(), 0);
    }

    #[test]
    fn test_failed_send_closes_receiver() {
        let peer = Recorder::new(false);
        let mut prompts = PromptCoordinator::new();
        let mut rx = prompts.request_delete_decision(&peer, names(&["A.tsx"]), true);

        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
        assert_eq!(prompts.pending_count(), 0);
    }

    #[test]
    fn test_cancel_all_on_disconnect() {
        let peer = Recorder::new(true);
        let mut prompts = PromptCoordinator::new();
        let mut rx = prompts.request_delete_decision(&peer, names(&["A.tsx"]), true);

        assert_eq!(prompts.cancel_all(), 1);
        assert!(matches!(
            rx.try_recv(),
            Err(oneshot::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn test_unknown_answer_is_ignored() {
        let mut prompts = PromptCoordinator::new();
        prompts.delete_confirmed(&names(&["Ghost.tsx"]));
        assert_eq!(prompts.pending_count(), 0);
    }
}
