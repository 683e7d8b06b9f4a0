// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
//! # Looper - a thread-owned event loop.
//!
//! A looper lets one thread serve asynchronous I/O and timed work from a
//! single place, without spawning a thread per source. It multiplexes three
//! kinds of wakeups on one kernel wait:
//!
//! * readiness on arbitrary file descriptors, registered with
//!   [`Looper::add_fd`];
//! * delayed in-loop messages addressed to [`MessageHandler`]s, posted with
//!   [`Looper::send_message`] and friends;
//! * cross-thread nudges via [`Looper::wake`], which break an ongoing wait.
//!
//! The kernel side is `epoll` on Linux and Android and `kqueue` on macOS,
//! iOS and FreeBSD. The wake channel is an `eventfd` counter where the
//! kernel provides one, and a socket-pair emulation elsewhere; either way
//! wakes coalesce, so a burst of nudges costs one loop iteration.
//!
//! ## Ownership model
//!
//! A loop is owned by exactly one thread: only the owner may call
//! [`Looper::poll_once`] or [`Looper::poll_all`]. Every other operation
//! is safe from any thread. Callbacks and message handlers always run on
//! the owning thread with no internal lock held, so they may freely call
//! back into the loop, even to close their own file descriptors or
//! unregister themselves.
//!
//! Each registration gets a fresh, never-reused sequence number, which is
//! what makes descriptor recycling safe: if a callback closes its fd and
//! the kernel hands the same number to someone else, stale readiness can
//! only ever refer to a retired sequence number and is discarded instead
//! of being misdelivered to the new registration.
//!
//! ## Dispatch modes
//!
//! A registration made with a callback is dispatched by invoking the
//! callback; the callback's return value decides whether the registration
//! stays. A registration made without a callback (opt-in via
//! [`PrepareOpts::ALLOW_NON_CALLBACKS`]) is *manual*: its readiness is
//! returned from [`Looper::poll_once`] as [`PollResult::Ready`] under the
//! identifier chosen at registration, for the caller to act on.
//!
//! ## Example
//!
//! ```
//! use looper::{Looper, Message, MessageHandler, PrepareOpts, PollResult};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! impl MessageHandler for Greeter {
//!     fn handle_message(&self, message: &Message) {
//!         println!("hello from message {}", message.what);
//!     }
//! }
//!
//! let looper = Looper::prepare(PrepareOpts::empty());
//! let handler: Arc<dyn MessageHandler> = Arc::new(Greeter);
//! looper.send_message(handler, Message::new(1));
//! assert_eq!(looper.poll_once(1000), PollResult::Callback);
//! ```
#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]
#[macro_use]
extern crate lazy_static;

#[macro_use]
mod sys;

mod clock;
mod error;
mod events;
mod looper;
mod message;
mod wake;

pub use crate::clock::uptime_nanos;
pub use crate::error::{LooperError, Result};
pub use crate::events::Events;
pub use crate::looper::{
    CallbackAction, FdState, Looper, LooperCallback, PollResult, PrepareOpts, CALLBACK_IDENT,
};
pub use crate::message::{Message, MessageHandler, WeakMessageHandler};
