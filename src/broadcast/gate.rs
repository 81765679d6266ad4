//! Per-connection ordering gate
//!
//! A connection starts deferring the moment it begins fetching its initial
//! snapshot. Messages routed to it meanwhile are held back and released, in
//! their original order, right after the snapshot (or the error notice that
//! replaces it) has been sent.

use super::protocol::OutboundMessage;

/// Outcome of routing one message through a gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Send now
    Deliver,
    /// Held until the gate opens
    Deferred,
    /// Already reflected in the snapshot this client received
    Covered,
}

/// Sync state for one connection
#[derive(Debug, Clone)]
pub struct ClientSyncState {
    initial_snapshot_sent: bool,
    /// Last sequence reflected in the snapshot; cleared if no snapshot was delivered
    anchor: Option<u64>,
    deferred: Vec<OutboundMessage>,
}

impl Default for ClientSyncState {
    /// Open. Connections are switched to deferring explicitly; this is only a fallback.
    fn default() -> Self {
        Self {
            initial_snapshot_sent: true,
            anchor: None,
            deferred: Vec::new(),
        }
    }
}

impl ClientSyncState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gate that starts closed with `anchor` as the snapshot's last sequence
    pub fn deferring(anchor: u64) -> Self {
        let mut state = Self::default();
        state.begin_deferring(anchor);
        state
    }

    /// Close the gate; `anchor` is the last sequence the snapshot will reflect
    pub fn begin_deferring(&mut self, anchor: u64) {
        self.initial_snapshot_sent = false;
        self.anchor = Some(anchor);
        self.deferred.clear();
    }

    pub fn is_deferring(&self) -> bool {
        !self.initial_snapshot_sent
    }

    pub fn anchor(&self) -> Option<u64> {
        self.anchor
    }

    #[cfg(test)]
    fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    /// Decide what to do with a broadcast message
    ///
    /// Everything is held while deferring, including messages at or below the
    /// anchor: whether those are covered depends on the snapshot outcome.
    pub fn route(&mut self, msg: &OutboundMessage) -> Route {
        if !self.initial_snapshot_sent {
            self.deferred.push(msg.clone());
            return Route::Deferred;
        }
        if self.anchor.is_some_and(|anchor| msg.sequence <= anchor) {
            Route::Covered
        } else {
            Route::Deliver
        }
    }

    /// Open the gate, returning the held messages in original order
    ///
    /// When the snapshot was delivered, held messages it already reflects are
    /// dropped. Otherwise all of them are released and the anchor is cleared.
    pub fn open(&mut self, snapshot_delivered: bool) -> Vec<OutboundMessage> {
        self.initial_snapshot_sent = true;
        let held = std::mem::take(&mut self.deferred);
        if !snapshot_delivered {
            self.anchor = None;
            return held;
        }
        match self.anchor {
            Some(anchor) => held.into_iter().filter(|m| m.sequence > anchor).collect(),
            None => held,
        }
    }
}
