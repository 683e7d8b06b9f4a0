// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use crate::clock;
use crate::error::{LooperError, Result};
use crate::events::Events;
use crate::message::{Message, MessageEnvelope, MessageHandler};
use crate::sys::{self, EventBatch, Poller, EVENT_BATCH};
use crate::wake::WakeChannel;
use ahash::AHashMap;
use log::{debug, error, warn};
use smallvec::SmallVec;
use std::{
    cell::RefCell,
    collections::VecDeque,
    fmt, io,
    os::unix::io::RawFd,
    sync::atomic::{AtomicBool, Ordering},
    sync::{Arc, Mutex},
};

/// Strictly increasing identifier assigned to every registration. Never
/// reused within a loop's lifetime.
pub(crate) type SequenceNumber = u64;

// The wake channel's permanently reserved sequence number.
const WAKE_SEQ: SequenceNumber = 1;

// Sentinel for "no message queued" in the next-wakeup bookkeeping.
const NO_DEADLINE: u64 = u64::MAX;

/// Identifier reported for callback-mode registrations.
///
/// Supplying a callback to [`Looper::add_fd`] overrides whatever identifier
/// the caller passed with this sentinel; readiness is then delivered by
/// invoking the callback rather than returning from [`Looper::poll_once`].
pub const CALLBACK_IDENT: i32 = -2;

bitflags::bitflags! {
    /// Options accepted by [`Looper::prepare`].
    pub struct PrepareOpts: u32 {
        /// Permit registrations without a callback: their readiness is
        /// returned from [`Looper::poll_once`] under the registration's
        /// identifier instead of being dispatched.
        const ALLOW_NON_CALLBACKS = 1 << 0;
    }
}

/// What a file descriptor callback wants done with its registration after
/// handling an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    /// Keep the registration; future readiness keeps dispatching here.
    Keep,
    /// Unregister this callback. The registration that fired is removed;
    /// a newer registration that happens to reuse the same fd number is
    /// unaffected.
    Unregister,
}

/// Receives readiness events for a registered file descriptor.
///
/// Invoked only by the loop's owning thread, with no loop lock held, so a
/// callback may freely call back into the loop. It may even close its own
/// fd and register a replacement.
pub trait LooperCallback: Send + Sync {
    /// Handles readiness on `fd`. `events` is the observed subset of the
    /// requested mask plus `ERROR`/`HANGUP` when the kernel raised them;
    /// `data` is the token supplied at registration.
    fn handle_event(&self, fd: RawFd, events: Events, data: usize) -> CallbackAction;
}

impl<F> LooperCallback for F
where
    F: Fn(RawFd, Events, usize) -> CallbackAction + Send + Sync,
{
    fn handle_event(&self, fd: RawFd, events: Events, data: usize) -> CallbackAction {
        self(fd, events, data)
    }
}

/// Outcome of [`Looper::poll_once`] and [`Looper::poll_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollResult {
    /// The loop was nudged with [`Looper::wake`] before the timeout and no
    /// registered fd or message was ready.
    Wake,
    /// One or more callbacks ran, either for fd readiness or for due
    /// messages.
    Callback,
    /// The timeout expired with nothing to do.
    Timeout,
    /// The readiness backend failed in a way the loop could not classify.
    /// Loop state remains valid; polling again is allowed.
    Error,
    /// A file descriptor registered without a callback became ready.
    Ready {
        /// The identifier supplied at registration.
        ident: i32,
        /// The ready file descriptor.
        fd: RawFd,
        /// The observed readiness events.
        events: Events,
        /// The token supplied at registration.
        data: usize,
    },
}

/// Everything the loop knows about one registration. Copied into a
/// [`Response`] at dispatch time so the callback stays alive even if the
/// table entry is concurrently replaced or removed.
#[derive(Clone)]
struct Request {
    fd: RawFd,
    ident: i32,
    events: Events,
    callback: Option<Arc<dyn LooperCallback>>,
    data: usize,
}

// A readiness event captured during one poll iteration, paired with a
// snapshot of the registration that produced it.
struct Response {
    seq: SequenceNumber,
    events: Events,
    request: Request,
}

/// Diagnostic snapshot of a registration, as returned by
/// [`Looper::get_fd_state_debug`].
pub struct FdState {
    /// The identifier (or [`CALLBACK_IDENT`] for callback mode).
    pub ident: i32,
    /// The requested event mask.
    pub events: Events,
    /// The registered callback, if any.
    pub callback: Option<Arc<dyn LooperCallback>>,
    /// The opaque token supplied at registration.
    pub data: usize,
}

impl fmt::Debug for FdState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FdState")
            .field("ident", &self.ident)
            .field("events", &self.events)
            .field("has_callback", &self.callback.is_some())
            .field("data", &self.data)
            .finish()
    }
}

struct Inner {
    poller: Arc<dyn Poller>,
    requests: AHashMap<SequenceNumber, Request>,
    sequence_by_fd: AHashMap<RawFd, SequenceNumber>,
    messages: Vec<MessageEnvelope>,
    // Manual-mode readiness waiting to be returned from poll_once.
    responses: VecDeque<Response>,
    next_seq: SequenceNumber,
    sending_message: bool,
    rebuild_required: bool,
    next_message_uptime: u64,
}

/// A thread-owned event loop multiplexing three wakeup sources on one
/// kernel wait: readiness on registered file descriptors, delayed in-loop
/// messages, and cross-thread [`wake`] nudges.
///
/// One thread owns the loop and is the only one allowed to call
/// [`poll_once`] / [`poll_all`]. Every other operation is safe from any
/// thread. Callbacks and message handlers run on the owning thread with
/// no internal lock held.
///
/// [`wake`]: Looper::wake
/// [`poll_once`]: Looper::poll_once
/// [`poll_all`]: Looper::poll_all
pub struct Looper {
    allow_non_callbacks: bool,
    wake: WakeChannel,
    // True while the owner is blocked in the kernel wait. Written only by
    // the owner; read anywhere for diagnostics.
    polling: AtomicBool,
    inner: Mutex<Inner>,
}

thread_local! {
    static THREAD_LOOPER: RefCell<Option<Arc<Looper>>> = RefCell::new(None);
}

impl Looper {
    /// Creates a loop without binding it to the current thread.
    ///
    /// Fails only if the kernel multiplexer or the wake channel cannot be
    /// created.
    pub fn new(opts: PrepareOpts) -> io::Result<Arc<Looper>> {
        let wake = WakeChannel::new()?;
        let poller = sys::new_poller()?;
        poller.add(wake.as_raw_fd(), Events::INPUT, WAKE_SEQ)?;

        Ok(Arc::new(Looper {
            allow_non_callbacks: opts.contains(PrepareOpts::ALLOW_NON_CALLBACKS),
            wake,
            polling: AtomicBool::new(false),
            inner: Mutex::new(Inner {
                poller,
                requests: AHashMap::new(),
                sequence_by_fd: AHashMap::new(),
                messages: Vec::new(),
                responses: VecDeque::new(),
                next_seq: WAKE_SEQ + 1,
                sending_message: false,
                rebuild_required: false,
                next_message_uptime: NO_DEADLINE,
            }),
        }))
    }

    /// Returns the calling thread's loop, creating and installing one if
    /// the thread has none yet.
    ///
    /// A thread has at most one loop. If it was already prepared with a
    /// different `ALLOW_NON_CALLBACKS` setting the existing loop is
    /// returned unchanged and a warning is logged.
    ///
    /// # Panics
    ///
    /// Aborts if the loop infrastructure cannot be created; a loop without
    /// a working backend or wake channel cannot function.
    pub fn prepare(opts: PrepareOpts) -> Arc<Looper> {
        let allow_non_callbacks = opts.contains(PrepareOpts::ALLOW_NON_CALLBACKS);
        if let Some(looper) = Looper::get_for_thread() {
            if looper.allow_non_callbacks != allow_non_callbacks {
                warn!(
                    "looper already prepared for this thread with a different value for \
                     the ALLOW_NON_CALLBACKS option"
                );
            }
            return looper;
        }
        let looper =
            Looper::new(opts).expect("could not create the looper for the current thread");
        Looper::set_for_thread(looper.clone());
        looper
    }

    /// The loop installed for the calling thread, if any.
    pub fn get_for_thread() -> Option<Arc<Looper>> {
        THREAD_LOOPER.with(|slot| slot.borrow().clone())
    }

    /// Installs `looper` as the calling thread's loop, replacing any
    /// previous one.
    pub fn set_for_thread(looper: Arc<Looper>) {
        THREAD_LOOPER.with(|slot| *slot.borrow_mut() = Some(looper));
    }

    /// Whether registrations without a callback are accepted.
    pub fn get_allow_non_callbacks(&self) -> bool {
        self.allow_non_callbacks
    }

    /// True while the owning thread is blocked waiting for events. Best
    /// effort, for diagnostics only.
    pub fn is_polling(&self) -> bool {
        self.polling.load(Ordering::Relaxed)
    }

    /// Nudges the loop out of its kernel wait from any thread.
    ///
    /// Wakes coalesce: any number of calls before the loop drains the
    /// channel produce at most one [`PollResult::Wake`].
    pub fn wake(&self) {
        debug!("wake");
        self.wake.wake();
    }

    /// Waits up to `timeout_ms` milliseconds for work and performs one
    /// round of dispatch. `timeout_ms < 0` waits indefinitely; `0` polls
    /// without blocking.
    ///
    /// Readiness on callback-mode registrations and due messages are
    /// dispatched internally and reported as [`PollResult::Callback`].
    /// Readiness on manual-mode registrations is returned one entry at a
    /// time as [`PollResult::Ready`]; entries buffered in one iteration
    /// are drained by subsequent calls before the loop waits again.
    ///
    /// Must only be called by the thread that owns the loop.
    pub fn poll_once(&self, timeout_ms: i32) -> PollResult {
        let mut result: Option<PollResult> = None;
        loop {
            let response = self.inner.lock().unwrap().responses.pop_front();
            if let Some(response) = response {
                debug!(
                    "poll_once - returning signalled identifier {}: fd={}, events={:?}",
                    response.request.ident, response.request.fd, response.events
                );
                return PollResult::Ready {
                    ident: response.request.ident,
                    fd: response.request.fd,
                    events: response.events,
                    data: response.request.data,
                };
            }

            if let Some(result) = result {
                debug!("poll_once - returning result {:?}", result);
                return result;
            }

            result = Some(self.poll_inner(timeout_ms));
        }
    }

    /// Like [`poll_once`], but keeps going while callbacks are being
    /// dispatched.
    ///
    /// With `timeout_ms <= 0`, repeats until an iteration produces
    /// something other than [`PollResult::Callback`]. With a positive
    /// timeout, repeats with the remaining budget until a non-callback
    /// result or [`PollResult::Timeout`] on exhaustion.
    ///
    /// [`poll_once`]: Looper::poll_once
    pub fn poll_all(&self, timeout_ms: i32) -> PollResult {
        if timeout_ms <= 0 {
            loop {
                let result = self.poll_once(timeout_ms);
                if result != PollResult::Callback {
                    return result;
                }
            }
        } else {
            let end_time = clock::uptime_nanos() + (timeout_ms as u64) * 1_000_000;
            let mut timeout_ms = timeout_ms;
            loop {
                let result = self.poll_once(timeout_ms);
                if result != PollResult::Callback {
                    return result;
                }
                timeout_ms = clock::millis_until(clock::uptime_nanos(), end_time);
                if timeout_ms == 0 {
                    return PollResult::Timeout;
                }
            }
        }
    }

    // One pass of the wait-translate-dispatch state machine.
    fn poll_inner(&self, timeout_ms: i32) -> PollResult {
        let mut timeout_ms = timeout_ms;

        let poller = {
            let mut inner = self.inner.lock().unwrap();

            // Shorten the wait so the loop is awake when the next message
            // is due. An explicit zero timeout stays zero: the caller
            // asked for a no-block poll.
            if timeout_ms != 0 && inner.next_message_uptime != NO_DEADLINE {
                let now = clock::uptime_nanos();
                let message_timeout_ms = clock::millis_until(now, inner.next_message_uptime);
                if timeout_ms < 0 || message_timeout_ms < timeout_ms {
                    timeout_ms = message_timeout_ms;
                }
                debug!(
                    "poll_inner - next message in {} ns, adjusted timeout: timeout_ms={}",
                    inner.next_message_uptime.saturating_sub(now),
                    timeout_ms
                );
            }

            inner.responses.clear();
            inner.poller.clone()
        };

        // We are about to idle.
        self.polling.store(true, Ordering::Relaxed);

        let mut events: EventBatch = SmallVec::new();
        let wait_result = poller.wait(timeout_ms, &mut events);

        // No longer idling.
        self.polling.store(false, Ordering::Relaxed);

        let mut result = PollResult::Wake;
        let mut callback_responses: SmallVec<[Response; EVENT_BATCH]> = SmallVec::new();
        let mut inner = self.inner.lock().unwrap();

        if inner.rebuild_required {
            // A registration or removal hit stale kernel state while we
            // were waiting. Whatever this iteration observed may belong to
            // the stale instance; discard it and start over.
            inner.rebuild_required = false;
            self.rebuild_poller_locked(&mut inner);
        } else {
            match wait_result {
                Err(err) if err.raw_os_error() == Some(libc::EINTR) => {}
                Err(err) => {
                    warn!("poll failed with an unexpected error: {}", err);
                    result = PollResult::Error;
                }
                Ok(0) => {
                    debug!("poll_inner - timeout");
                    result = PollResult::Timeout;
                }
                Ok(_) => {
                    for event in &events {
                        if event.seq == WAKE_SEQ {
                            if event.events.contains(Events::INPUT) {
                                self.wake.awoken();
                            } else {
                                warn!(
                                    "ignoring unexpected events {:?} on wake event fd",
                                    event.events
                                );
                            }
                            continue;
                        }

                        let response = match inner.requests.get(&event.seq) {
                            Some(request) => Response {
                                seq: event.seq,
                                events: event.events,
                                request: request.clone(),
                            },
                            None => {
                                // The registration that produced this event
                                // is gone; a recycled descriptor's events
                                // can never be misattributed because its
                                // seq is never reissued.
                                warn!(
                                    "ignoring unexpected events {:?} for sequence number {} \
                                     that is no longer registered",
                                    event.events, event.seq
                                );
                                continue;
                            }
                        };
                        if response.request.ident >= 0 {
                            inner.responses.push_back(response);
                        } else {
                            callback_responses.push(response);
                        }
                    }
                }
            }
        }

        // Invoke pending message callbacks.
        inner.next_message_uptime = NO_DEADLINE;
        while !inner.messages.is_empty() {
            let now = clock::uptime_nanos();
            if inner.messages[0].uptime <= now {
                // The envelope holds the strong handler reference through
                // the call; drop it before reacquiring the lock so the
                // handler can be released without the lock held.
                let envelope = inner.messages.remove(0);
                inner.sending_message = true;
                drop(inner);

                debug!("poll_inner - sending message: what={}", envelope.message.what);
                envelope.handler.handle_message(&envelope.message);
                drop(envelope);

                inner = self.inner.lock().unwrap();
                inner.sending_message = false;
                result = PollResult::Callback;
            } else {
                // The message at the head of the queue determines the next
                // wakeup time.
                inner.next_message_uptime = inner.messages[0].uptime;
                break;
            }
        }

        drop(inner);

        // Invoke all response callbacks, with no lock held. The descriptor
        // may be closed and even reused by the callback before it returns,
        // which is why removal targets the sequence number that fired and
        // not the fd.
        for response in callback_responses {
            if let Some(callback) = &response.request.callback {
                let fd = response.request.fd;
                debug!(
                    "poll_inner - invoking fd event callback: fd={}, events={:?}",
                    fd, response.events
                );
                let action = callback.handle_event(fd, response.events, response.request.data);
                if action == CallbackAction::Unregister {
                    let mut inner = self.inner.lock().unwrap();
                    let _ = self.remove_sequence_number_locked(&mut inner, response.seq);
                }
                result = PollResult::Callback;
            }
            // The response (and its callback reference) drops here, before
            // the next callback runs.
        }

        result
    }

    /// Registers `fd`, replacing any existing registration for it.
    ///
    /// With a callback the identifier is forced to [`CALLBACK_IDENT`] and
    /// readiness is dispatched to the callback. Without one (permitted
    /// only on loops prepared with [`PrepareOpts::ALLOW_NON_CALLBACKS`],
    /// and requiring `ident >= 0`) readiness is returned from
    /// [`Looper::poll_once`] as [`PollResult::Ready`].
    ///
    /// `events` is the requested mask over `INPUT | OUTPUT`; `ERROR` and
    /// `HANGUP` are always reported. `data` is an opaque token handed back
    /// with every event.
    ///
    /// Callable from any thread.
    pub fn add_fd(
        &self,
        fd: RawFd,
        ident: i32,
        events: Events,
        callback: Option<Arc<dyn LooperCallback>>,
        data: usize,
    ) -> Result<()> {
        debug!("add_fd - fd={}, ident={}, events={:?}", fd, ident, events);

        let ident = if callback.is_some() {
            CALLBACK_IDENT
        } else {
            if !self.allow_non_callbacks {
                error!("invalid attempt to register fd {} without a callback", fd);
                return Err(LooperError::NonCallbacksNotAllowed);
            }
            if ident < 0 {
                error!(
                    "invalid attempt to register fd {} without a callback and ident < 0",
                    fd
                );
                return Err(LooperError::InvalidIdent { ident });
            }
            ident
        };

        let mut inner = self.inner.lock().unwrap();

        // One sequence number is reserved for the wake channel.
        if inner.next_seq == WAKE_SEQ {
            inner.next_seq += 1;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;

        let request = Request {
            fd,
            ident,
            events,
            callback,
            data,
        };

        match inner.sequence_by_fd.get(&fd).copied() {
            None => {
                if let Err(err) = inner.poller.add(fd, events, seq) {
                    error!("error adding events for fd {}: {}", fd, err);
                    return Err(err.into());
                }
                inner.requests.insert(seq, request);
                inner.sequence_by_fd.insert(fd, seq);
            }
            Some(old_seq) => {
                if let Err(err) = inner.poller.modify(fd, events, seq) {
                    if err.raw_os_error() == Some(libc::ENOENT) {
                        // The fd number was recycled: its previous
                        // incarnation was closed without being
                        // unregistered, so the kernel has no record to
                        // modify. Register it fresh. The backend may still
                        // hold a subscription against the dead descriptor
                        // that we can no longer address, hence the rebuild.
                        debug!(
                            "add_fd - modify failed for recycled fd {}, falling back on add",
                            fd
                        );
                        if let Err(err) = inner.poller.add(fd, events, seq) {
                            error!("error modifying or adding events for fd {}: {}", fd, err);
                            return Err(err.into());
                        }
                        self.schedule_rebuild_locked(&mut inner);
                    } else {
                        error!("error modifying events for fd {}: {}", fd, err);
                        return Err(err.into());
                    }
                }
                inner.requests.remove(&old_seq);
                inner.requests.insert(seq, request);
                inner.sequence_by_fd.insert(fd, seq);
            }
        }
        Ok(())
    }

    /// Removes the registration for `fd`, if any.
    ///
    /// Returns `Ok(false)` when the fd was not registered and `Ok(true)`
    /// when it was removed. An `Err` means the registration was retired
    /// from the loop's tables but the backend refused the removal; the
    /// loop schedules a rebuild and remains usable.
    ///
    /// Takes effect immediately: no further callbacks fire for the retired
    /// registration, except a response already captured in the current
    /// poll iteration.
    ///
    /// Callable from any thread.
    pub fn remove_fd(&self, fd: RawFd) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let seq = match inner.sequence_by_fd.get(&fd).copied() {
            Some(seq) => seq,
            None => return Ok(false),
        };
        self.remove_sequence_number_locked(&mut inner, seq)?;
        Ok(true)
    }

    fn remove_sequence_number_locked(
        &self,
        inner: &mut Inner,
        seq: SequenceNumber,
    ) -> Result<()> {
        debug!("remove_fd - seq={}", seq);

        // Retire the request before touching the backend, so a failed
        // backend call cannot leak the callback reference.
        let request = match inner.requests.remove(&seq) {
            Some(request) => request,
            None => return Ok(()),
        };
        let fd = request.fd;
        inner.sequence_by_fd.remove(&fd);

        if let Err(err) = inner.poller.remove(fd) {
            match err.raw_os_error() {
                Some(libc::EBADF) | Some(libc::ENOENT) => {
                    // The fd was closed before it was unregistered, which
                    // happens naturally when a callback closes its own fd
                    // before returning. The backend may still hold a
                    // subscription we can no longer address.
                    debug!(
                        "remove_fd - backend removal failed, fd {} already closed: {}",
                        fd, err
                    );
                    self.schedule_rebuild_locked(inner);
                }
                _ => {
                    // The registration tables and the backend got out of
                    // sync somehow. Rebuild so stale subscriptions cannot
                    // keep delivering events with nowhere to go.
                    error!("error removing events for fd {}: {}", fd, err);
                    self.schedule_rebuild_locked(inner);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Re-arms the backend registration for `fd` with its current mask.
    ///
    /// Returns `false` when the fd is not registered or the backend
    /// rejects the modification.
    pub fn repoll(&self, fd: RawFd) -> bool {
        let inner = self.inner.lock().unwrap();
        let seq = match inner.sequence_by_fd.get(&fd) {
            Some(&seq) => seq,
            None => return false,
        };
        let request = match inner.requests.get(&seq) {
            Some(request) => request,
            None => return false,
        };
        assert_eq!(
            request.fd, fd,
            "looper has an inconsistent registration table: looked up fd {} and found fd {}",
            fd, request.fd
        );
        inner.poller.modify(fd, request.events, seq).is_ok()
    }

    /// Diagnostic snapshot of the registration for `fd`, if any.
    pub fn get_fd_state_debug(&self, fd: RawFd) -> Option<FdState> {
        let inner = self.inner.lock().unwrap();
        let seq = inner.sequence_by_fd.get(&fd)?;
        let request = inner.requests.get(seq)?;
        Some(FdState {
            ident: request.ident,
            events: request.events,
            callback: request.callback.clone(),
            data: request.data,
        })
    }

    /// Enqueues `message` for immediate delivery to `handler`.
    ///
    /// Callable from any thread. Delivery happens on the owning thread,
    /// after any messages already due.
    pub fn send_message(&self, handler: Arc<dyn MessageHandler>, message: Message) {
        self.send_message_at_time(clock::uptime_nanos(), handler, message)
    }

    /// Enqueues `message` for delivery after `delay_nanos` nanoseconds.
    pub fn send_message_delayed(
        &self,
        delay_nanos: u64,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) {
        self.send_message_at_time(clock::uptime_nanos() + delay_nanos, handler, message)
    }

    /// Enqueues `message` for delivery at `uptime_nanos` on the
    /// [uptime clock](crate::uptime_nanos).
    ///
    /// Messages deliver in non-decreasing uptime order; among equal
    /// uptimes, in the order they were enqueued.
    pub fn send_message_at_time(
        &self,
        uptime_nanos: u64,
        handler: Arc<dyn MessageHandler>,
        message: Message,
    ) {
        debug!(
            "send_message_at_time - uptime={}, what={}",
            uptime_nanos, message.what
        );

        let index;
        {
            let mut inner = self.inner.lock().unwrap();

            // Strictly after everything due at the same or an earlier
            // uptime, so equal uptimes deliver in enqueue order.
            index = inner
                .messages
                .partition_point(|envelope| envelope.uptime <= uptime_nanos);
            inner.messages.insert(
                index,
                MessageEnvelope {
                    uptime: uptime_nanos,
                    handler,
                    message,
                },
            );

            // If the loop is mid message dispatch it recomputes the next
            // wakeup as it unwinds; a wake from here would be redundant.
            if inner.sending_message {
                return;
            }
        }

        // Only an insert at the head can shorten the pending wait.
        if index == 0 {
            self.wake();
        }
    }

    /// Removes every queued message addressed to `handler`.
    ///
    /// A message already being dispatched is not recalled; removal covers
    /// the queue only.
    pub fn remove_messages(&self, handler: &Arc<dyn MessageHandler>) {
        debug!("remove_messages");
        let mut inner = self.inner.lock().unwrap();
        // Back to front so removals do not disturb the indices still to
        // be visited.
        for index in (0..inner.messages.len()).rev() {
            if Arc::ptr_eq(&inner.messages[index].handler, handler) {
                inner.messages.remove(index);
            }
        }
    }

    /// Removes every queued message addressed to `handler` whose `what`
    /// matches.
    pub fn remove_messages_what(&self, handler: &Arc<dyn MessageHandler>, what: i32) {
        debug!("remove_messages - what={}", what);
        let mut inner = self.inner.lock().unwrap();
        for index in (0..inner.messages.len()).rev() {
            if Arc::ptr_eq(&inner.messages[index].handler, handler)
                && inner.messages[index].message.what == what
            {
                inner.messages.remove(index);
            }
        }
    }

    fn schedule_rebuild_locked(&self, inner: &mut Inner) {
        if !inner.rebuild_required {
            debug!("scheduling readiness backend rebuild");
            inner.rebuild_required = true;
            self.wake.wake();
        }
    }

    // Discards the backend and re-registers the wake channel and every
    // live request under its current seq. Runs on the owning thread with
    // the lock held, after the wait has returned.
    fn rebuild_poller_locked(&self, inner: &mut Inner) {
        debug!("rebuilding the readiness backend");

        let poller = match sys::new_poller() {
            Ok(poller) => poller,
            Err(err) => panic!("could not recreate the readiness backend: {}", err),
        };
        if let Err(err) = poller.add(self.wake.as_raw_fd(), Events::INPUT, WAKE_SEQ) {
            panic!(
                "could not add the wake event fd to the readiness backend: {}",
                err
            );
        }
        for (&seq, request) in &inner.requests {
            if let Err(err) = poller.add(request.fd, request.events, seq) {
                error!(
                    "error adding events for fd {} while rebuilding the backend: {}",
                    request.fd, err
                );
            }
        }
        inner.poller = poller;
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("allow_non_callbacks", &self.allow_non_callbacks)
            .field("polling", &self.is_polling())
            .finish_non_exhaustive()
    }
}
