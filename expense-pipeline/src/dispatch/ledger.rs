//! Per-Record sequence tokens
//!
//! Every in-flight Record has one token. An event carries the token that was
//! current when it was submitted, and its handler must [`claim`] that token
//! before any side effect. At most one handler holds the claim for a token,
//! so a duplicate event arriving while the step runs is dropped instead of
//! repeating it. A finished step advances the token, so a late event for the
//! same step finds it moved on.
//!
//! A [`Claim`] that is dropped without advancing gives the token back, which
//! lets the `failed` event of a broken step claim it again.
//!
//! [`claim`]: SequenceLedger::claim

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ClaimRefused {
    #[error("sequence token {0} is not current")]
    NotCurrent(u64),

    #[error("step for sequence token {0} is already running")]
    InProgress(u64),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    token: u64,
    claimed: bool,
}

#[derive(Debug, Default)]
pub struct SequenceLedger {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl SequenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Uuid, Slot>> {
        // Entries stay consistent even if a holder panicked
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current token for `id`, registering it at 0 when unknown
    pub fn enter(&self, id: Uuid) -> u64 {
        self.slots()
            .entry(id)
            .or_insert(Slot {
                token: 0,
                claimed: false,
            })
            .token
    }

    pub fn is_current(&self, id: Uuid, token: u64) -> bool {
        self.slots().get(&id).map(|slot| slot.token) == Some(token)
    }

    pub fn is_claimed(&self, id: Uuid) -> bool {
        self.slots().get(&id).is_some_and(|slot| slot.claimed)
    }

    /// Reserve the step for `token`
    pub fn claim(self: &Arc<Self>, id: Uuid, token: u64) -> Result<Claim, ClaimRefused> {
        let mut slots = self.slots();
        match slots.get_mut(&id) {
            Some(slot) if slot.token == token && !slot.claimed => {
                slot.claimed = true;
                Ok(Claim {
                    ledger: Arc::clone(self),
                    id,
                    token,
                    settled: false,
                })
            }
            Some(slot) if slot.token == token => Err(ClaimRefused::InProgress(token)),
            _ => Err(ClaimRefused::NotCurrent(token)),
        }
    }

    fn settle(&self, id: Uuid, token: u64, advance: bool) {
        if let Some(slot) = self.slots().get_mut(&id) {
            if slot.token == token && slot.claimed {
                slot.claimed = false;
                if advance {
                    slot.token += 1;
                }
            }
        }
    }

    /// Forget `id` once it reached a terminal status
    pub fn release(&self, id: Uuid) {
        self.slots().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive right to run the step for one sequence token
#[must_use]
#[derive(Debug)]
pub struct Claim {
    ledger: Arc<SequenceLedger>,
    id: Uuid,
    token: u64,
    settled: bool,
}

impl Claim {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> u64 {
        self.token
    }

    /// Finish the step and return the token of the next one
    pub fn advance(mut self) -> u64 {
        self.settled = true;
        self.ledger.settle(self.id, self.token, true);
        self.token + 1
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.settle(self.id, self.token, false);
        }
    }
}
