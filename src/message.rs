// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use std::{
    fmt,
    sync::{Arc, Weak},
};

/// A plain message addressed to a [`MessageHandler`].
///
/// `what` discriminates message kinds within a handler; `data` is an
/// opaque token carried through unchanged.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// The message type identifier.
    pub what: i32,
    /// Opaque payload token, delivered untouched alongside `what`.
    pub data: usize,
}

impl Message {
    /// Creates a message carrying `what` and no payload.
    pub fn new(what: i32) -> Message {
        Message { what, data: 0 }
    }

    /// Creates a message carrying `what` and a payload token.
    pub fn with_data(what: i32, data: usize) -> Message {
        Message { what, data }
    }
}

/// Receives messages on the loop's owning thread.
///
/// Handlers are shared across threads (any thread may enqueue a message for
/// them) but only ever invoked by the thread that polls the loop, with no
/// loop lock held.
pub trait MessageHandler: Send + Sync {
    /// Handles one delivered message.
    fn handle_message(&self, message: &Message);
}

/// A handler that holds its target weakly and upgrades at dispatch time.
///
/// Useful when the target's lifetime is controlled elsewhere: once the last
/// strong reference to the target drops, pending messages addressed through
/// this adapter are silently discarded instead of keeping the target alive.
pub struct WeakMessageHandler {
    handler: Weak<dyn MessageHandler>,
}

impl WeakMessageHandler {
    /// Wraps `handler` without taking a strong reference to it.
    pub fn new(handler: &Arc<dyn MessageHandler>) -> WeakMessageHandler {
        WeakMessageHandler {
            handler: Arc::downgrade(handler),
        }
    }
}

impl MessageHandler for WeakMessageHandler {
    fn handle_message(&self, message: &Message) {
        if let Some(handler) = self.handler.upgrade() {
            handler.handle_message(message);
        }
    }
}

impl fmt::Debug for WeakMessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("WeakMessageHandler { .. }")
    }
}

/// A queued message: the deadline on the uptime clock, the handler, and the
/// message itself. The loop keeps envelopes sorted ascending by uptime,
/// with FIFO order among equal uptimes.
pub(crate) struct MessageEnvelope {
    pub(crate) uptime: u64,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) message: Message,
}
