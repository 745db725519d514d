//! Per-stream consumer state.
//!
//! A consumer is `Idle` until something may be new, `Fetching` while a query
//! is in flight, and `AwaitingCursor` after a batch went out until the client
//! acknowledges it with its next cursor. Events that arrive while a query is
//! in flight set `rerun`, so a wake-up is never lost.

use tandem_core::sync::SyncConsumerType;

use crate::source::SyncUser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Idle,
    Fetching { rerun: bool },
    AwaitingCursor,
}

#[derive(Debug, Clone)]
pub struct SyncConsumer {
    user: SyncUser,
    consumer_type: SyncConsumerType,
    cursor: i64,
    state: ConsumerState,
}

impl SyncConsumer {
    pub fn new(user: SyncUser, consumer_type: SyncConsumerType, cursor: i64) -> Self {
        Self {
            user,
            consumer_type,
            cursor,
            state: ConsumerState::Idle,
        }
    }

    pub fn user(&self) -> &SyncUser {
        &self.user
    }

    pub fn consumer_type(&self) -> SyncConsumerType {
        self.consumer_type
    }

    pub fn cursor(&self) -> i64 {
        self.cursor
    }

    pub fn state(&self) -> ConsumerState {
        self.state
    }

    /// The client announced its cursor. Returns whether a fetch should start.
    pub fn update_cursor(&mut self, cursor: i64) -> bool {
        match self.state {
            ConsumerState::Idle => {
                if cursor == self.cursor {
                    return false;
                }
                self.cursor = cursor;
                self.begin_fetch()
            }
            ConsumerState::AwaitingCursor => {
                self.cursor = cursor;
                self.state = ConsumerState::Idle;
                self.begin_fetch()
            }
            ConsumerState::Fetching { .. } => {
                if cursor != self.cursor {
                    self.cursor = cursor;
                    self.state = ConsumerState::Fetching { rerun: true };
                }
                false
            }
        }
    }

    /// Something relevant happened. Returns whether a fetch should start.
    pub fn offer_fetch(&mut self) -> bool {
        match self.state {
            ConsumerState::Idle => self.begin_fetch(),
            ConsumerState::Fetching { .. } => {
                self.state = ConsumerState::Fetching { rerun: true };
                false
            }
            // The client's acknowledgement re-queries from its new cursor.
            ConsumerState::AwaitingCursor => false,
        }
    }

    /// The in-flight query finished. `delivered` is whether a batch was
    /// pushed. Returns whether another fetch should start right away.
    pub fn complete_fetch(&mut self, delivered: bool) -> bool {
        let rerun = matches!(self.state, ConsumerState::Fetching { rerun: true });
        if delivered {
            self.state = ConsumerState::AwaitingCursor;
            return false;
        }
        self.state = ConsumerState::Idle;
        rerun && self.begin_fetch()
    }

    fn begin_fetch(&mut self) -> bool {
        if self.state != ConsumerState::Idle {
            return false;
        }
        self.state = ConsumerState::Fetching { rerun: false };
        true
    }
}
