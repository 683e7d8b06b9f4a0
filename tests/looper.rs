// Unless explicitly stated otherwise all files in this repository are licensed
// under the MIT/Apache-2.0 License, at your convenience
//
// This product includes software developed at Datadog (https://www.datadoghq.com/). Copyright 2020 Datadog, Inc.
//
use looper::{
    CallbackAction, Events, Looper, LooperCallback, Message, MessageHandler, PollResult,
    PrepareOpts,
};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn pipe() -> (RawFd, RawFd) {
    let mut fds = [0 as RawFd; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn write_byte(fd: RawFd) {
    assert_eq!(
        unsafe { libc::write(fd, b"x".as_ptr() as *const _, 1) },
        1
    );
}

fn close_fd(fd: RawFd) {
    assert_eq!(unsafe { libc::close(fd) }, 0);
}

struct Recorder {
    seen: Mutex<Vec<i32>>,
}

impl Recorder {
    fn new() -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        })
    }

    fn seen(&self) -> Vec<i32> {
        self.seen.lock().unwrap().clone()
    }
}

impl MessageHandler for Recorder {
    fn handle_message(&self, message: &Message) {
        self.seen.lock().unwrap().push(message.what);
    }
}

#[test]
fn wakes_from_another_thread_coalesce() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();

    let remote = looper.clone();
    thread::spawn(move || {
        remote.wake();
        remote.wake();
        remote.wake();
    })
    .join()
    .unwrap();

    assert_eq!(looper.poll_once(1000), PollResult::Wake);
    assert_eq!(looper.poll_once(0), PollResult::Timeout);
}

#[test]
fn wake_breaks_an_indefinite_wait() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();

    let owner = looper.clone();
    let handle = thread::spawn(move || owner.poll_once(-1));

    while !looper.is_polling() {
        thread::yield_now();
    }
    looper.wake();

    assert_eq!(handle.join().unwrap(), PollResult::Wake);
}

#[test]
fn a_delayed_message_arrives_on_schedule() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();
    let recorder = Recorder::new();
    let handler: Arc<dyn MessageHandler> = recorder.clone();

    let start = Instant::now();
    looper.send_message_delayed(50_000_000, handler, Message::new(7));

    // The enqueue nudges the loop; the message itself is not yet due.
    assert_eq!(looper.poll_once(0), PollResult::Wake);
    assert!(recorder.seen().is_empty());

    assert_eq!(looper.poll_once(1000), PollResult::Callback);
    let elapsed = start.elapsed();

    assert_eq!(recorder.seen(), vec![7]);
    assert!(elapsed >= Duration::from_millis(45), "elapsed {:?}", elapsed);
    assert!(elapsed <= Duration::from_millis(200), "elapsed {:?}", elapsed);
}

#[test]
fn a_message_sent_into_a_blocked_poll_is_delivered() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();
    let recorder = Recorder::new();
    let handler: Arc<dyn MessageHandler> = recorder.clone();

    let owner = looper.clone();
    let handle = thread::spawn(move || owner.poll_once(-1));

    while !looper.is_polling() {
        thread::yield_now();
    }
    looper.send_message(handler, Message::new(1));

    assert_eq!(handle.join().unwrap(), PollResult::Callback);
    assert_eq!(recorder.seen(), vec![1]);
}

#[test]
fn manual_mode_readiness_is_returned_to_the_caller() {
    let looper = Looper::new(PrepareOpts::ALLOW_NON_CALLBACKS).unwrap();
    let (rd, wr) = pipe();

    looper.add_fd(rd, 42, Events::INPUT, None, 0xABCD).unwrap();
    write_byte(wr);

    match looper.poll_once(1000) {
        PollResult::Ready {
            ident,
            fd,
            events,
            data,
        } => {
            assert_eq!(ident, 42);
            assert_eq!(fd, rd);
            assert!(events.contains(Events::INPUT));
            assert_eq!(data, 0xABCD);
        }
        other => panic!("expected manual readiness, got {:?}", other),
    }

    close_fd(rd);
    close_fd(wr);
}

#[test]
fn a_callback_can_unregister_itself() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();
    let (rd, wr) = pipe();

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_callback = fired.clone();
    let callback: Arc<dyn LooperCallback> =
        Arc::new(move |_fd: RawFd, _events: Events, _data: usize| {
            fired_in_callback.fetch_add(1, Ordering::SeqCst);
            CallbackAction::Unregister
        });
    looper.add_fd(rd, 0, Events::INPUT, Some(callback), 0).unwrap();

    write_byte(wr);
    assert_eq!(looper.poll_once(1000), PollResult::Callback);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(looper.get_fd_state_debug(rd).is_none());

    // Further readiness on the same fd is no longer dispatched.
    write_byte(wr);
    assert_eq!(looper.poll_once(100), PollResult::Timeout);
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    close_fd(rd);
    close_fd(wr);
}

#[test]
fn poll_all_drains_callbacks_before_returning() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();
    let recorder = Recorder::new();
    let handler: Arc<dyn MessageHandler> = recorder.clone();

    let uptime = looper::uptime_nanos();
    looper.send_message_at_time(uptime, handler.clone(), Message::new(1));
    looper.send_message_at_time(uptime, handler, Message::new(2));

    assert_eq!(looper.poll_all(0), PollResult::Timeout);
    assert_eq!(recorder.seen(), vec![1, 2]);
}

// A callback closes its own fd mid-dispatch, the fd number gets recycled,
// and a new callback is registered on the recycled number before the old
// registration is retired. The new registration must only ever see its own
// events; the loop is expected to recover through an internal rebuild.
#[test]
fn recycled_descriptor_events_are_not_misdelivered() {
    let looper = Looper::new(PrepareOpts::empty()).unwrap();
    let (rd1, wr1) = pipe();

    let first_fired = Arc::new(AtomicUsize::new(0));
    let second_fired = Arc::new(AtomicUsize::new(0));
    let second_writer: Arc<Mutex<Option<RawFd>>> = Arc::new(Mutex::new(None));

    let looper_in_callback = looper.clone();
    let first_fired_in_callback = first_fired.clone();
    let second_fired_for_registration = second_fired.clone();
    let second_writer_in_callback = second_writer.clone();

    let first: Arc<dyn LooperCallback> =
        Arc::new(move |fd: RawFd, _events: Events, _data: usize| {
            first_fired_in_callback.fetch_add(1, Ordering::SeqCst);

            // Close the watched fd and arrange for a new pipe to occupy
            // the same descriptor number.
            assert_eq!(unsafe { libc::close(fd) }, 0);
            let (rd2, wr2) = pipe();
            assert_eq!(unsafe { libc::dup2(rd2, fd) }, fd);
            assert_eq!(unsafe { libc::close(rd2) }, 0);
            *second_writer_in_callback.lock().unwrap() = Some(wr2);

            let second_fired = second_fired_for_registration.clone();
            let second: Arc<dyn LooperCallback> =
                Arc::new(move |fd: RawFd, _events: Events, _data: usize| {
                    // Consume the byte so the level-triggered backend does
                    // not report it again.
                    let mut buf = [0u8; 8];
                    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut _, buf.len()) };
                    second_fired.fetch_add(1, Ordering::SeqCst);
                    CallbackAction::Keep
                });
            looper_in_callback
                .add_fd(fd, 0, Events::INPUT, Some(second), 0)
                .unwrap();

            CallbackAction::Unregister
        });

    looper.add_fd(rd1, 0, Events::INPUT, Some(first), 0).unwrap();
    write_byte(wr1);

    assert_eq!(looper.poll_once(1000), PollResult::Callback);
    assert_eq!(first_fired.load(Ordering::SeqCst), 1);

    // Settle the scheduled rebuild. The second callback must not fire for
    // anything that happened to the first registration.
    while looper.poll_once(0) != PollResult::Timeout {
        assert_eq!(second_fired.load(Ordering::SeqCst), 0);
    }

    let wr2 = second_writer.lock().unwrap().take().unwrap();
    write_byte(wr2);

    let deadline = Instant::now() + Duration::from_secs(2);
    while second_fired.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
        looper.poll_once(100);
    }
    assert_eq!(second_fired.load(Ordering::SeqCst), 1);
    assert_eq!(first_fired.load(Ordering::SeqCst), 1);

    // And nothing further once the byte is consumed.
    while looper.poll_once(0) != PollResult::Timeout {}
    assert_eq!(second_fired.load(Ordering::SeqCst), 1);

    let recycled = looper.get_fd_state_debug(rd1);
    assert!(recycled.is_some());

    close_fd(rd1);
    close_fd(wr1);
    close_fd(wr2);
}
