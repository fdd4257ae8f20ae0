//! Depth-first event processing
//!
//! One external event is drained to completion before `handle` returns:
//! effects run in list order, and any follow-up event an effect produces is
//! fully processed, effects included, before the next sibling effect runs.

use std::sync::Arc;

use tracing::debug;

use super::executor::EffectExecutor;
use super::machine::{Effect, SyncEvent, SyncMachine, SyncMode, SyncState};
use super::transport::Transport;
use crate::models::FileRecord;

enum Work {
    Event(SyncEvent),
    Effect(Effect),
}

pub struct SyncEngine {
    machine: SyncMachine,
    state: SyncState,
    executor: EffectExecutor,
}

impl SyncEngine {
    pub fn new(machine: SyncMachine, executor: EffectExecutor) -> Self {
        Self {
            machine,
            state: SyncState::disconnected(),
            executor,
        }
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    pub fn machine(&self) -> &SyncMachine {
        &self.machine
    }

    pub fn mode(&self) -> SyncMode {
        self.state.mode()
    }

    pub fn executor(&self) -> &EffectExecutor {
        &self.executor
    }

    pub fn executor_mut(&mut self) -> &mut EffectExecutor {
        &mut self.executor
    }

    /// Process one event and everything it cascades into
    pub fn handle(&mut self, event: SyncEvent) {
        let mut stack = vec![Work::Event(event)];

        while let Some(work) = stack.pop() {
            match work {
                Work::Event(event) => {
                    let name = event.name();
                    let before = self.state.mode();
                    let (next, effects) = self.machine.transition(&self.state, event);
                    if next.mode() != before {
                        debug!("{} -> {} on {}", before, next.mode(), name);
                    }
                    self.state = next;
                    stack.extend(effects.into_iter().rev().map(Work::Effect));
                }
                Work::Effect(effect) => {
                    let follow_ups = self.executor.execute(effect);
                    stack.extend(follow_ups.into_iter().rev().map(Work::Event));
                }
            }
        }
    }

    /// Bind a peer; its handshake still has to arrive as an event
    pub fn connect(&mut self, peer: Arc<dyn Transport>) {
        self.executor.attach_peer(peer);
    }

    /// Drop the peer, cancel its prompts and return to disconnected
    pub fn disconnect(&mut self) {
        self.executor.detach_peer();
        self.handle(SyncEvent::Disconnect);
    }

    /// The user approved deleting these files remotely
    pub fn delete_confirmed(&mut self, file_names: &[String]) {
        self.executor.prompts_mut().delete_confirmed(file_names);
    }

    /// The user refused; restore the returned files locally
    pub fn delete_cancelled(&mut self, files: Vec<FileRecord>) {
        let names: Vec<String> = files.iter().map(|f| f.name.clone()).collect();
        self.executor.prompts_mut().delete_cancelled(&names);
        self.handle(SyncEvent::LocalDeleteRejected { files });
    }

    /// Flush persisted state
    pub async fn shutdown(self) {
        self.executor.shutdown().await;
    }
}
