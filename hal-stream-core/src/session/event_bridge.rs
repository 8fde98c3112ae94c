use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use crate::models::error::StreamError;
use crate::traits::engine::{EventSink, HardwareEvent};
use crate::traits::stream_callback::{StreamCallback, StreamEvent};

/// One-shot receiver armed before an asynchronous operation.
///
/// The matching event completes the ticket even if it fires before the
/// caller starts waiting.
#[derive(Debug)]
pub struct ReadyTicket {
    rx: Arc<Receiver<StreamEvent>>,
}

impl ReadyTicket {
    /// Block until the event arrives or `timeout` passes.
    pub fn wait(&self, timeout: Duration) -> Option<StreamEvent> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_wait(&self) -> Option<StreamEvent> {
        self.rx.try_recv().ok()
    }
}

/// Sending half of an armed ticket. Dead once the ticket is dropped.
struct Waiter {
    tx: Sender<StreamEvent>,
    ticket: Weak<Receiver<StreamEvent>>,
}

/// Turns engine events into completed tickets and client callbacks.
pub struct EventBridge {
    write_waiters: Mutex<Vec<Waiter>>,
    drain_waiters: Mutex<Vec<Waiter>>,
    gapless_pending: AtomicBool,
    callback: RwLock<Option<Arc<dyn StreamCallback>>>,
}

impl EventBridge {
    pub fn new() -> Self {
        Self {
            write_waiters: Mutex::new(Vec::new()),
            drain_waiters: Mutex::new(Vec::new()),
            gapless_pending: AtomicBool::new(false),
            callback: RwLock::new(None),
        }
    }

    pub fn set_callback(&self, callback: Option<Arc<dyn StreamCallback>>) {
        *self.callback.write() = callback;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.read().is_some()
    }

    pub fn arm_write_ready(&self) -> ReadyTicket {
        Self::arm(&self.write_waiters)
    }

    pub fn arm_drain_ready(&self) -> ReadyTicket {
        Self::arm(&self.drain_waiters)
    }

    /// Tickets dropped without their event (timed-out waits) are pruned here.
    fn arm(waiters: &Mutex<Vec<Waiter>>) -> ReadyTicket {
        let (tx, rx) = bounded(1);
        let rx = Arc::new(rx);
        let mut waiters = waiters.lock();
        waiters.retain(|w| w.ticket.strong_count() > 0);
        waiters.push(Waiter {
            tx,
            ticket: Arc::downgrade(&rx),
        });
        ReadyTicket { rx }
    }

    /// Complete every armed ticket in `waiters`. Dropped tickets are skipped.
    fn complete(waiters: &mut Vec<Waiter>, event: StreamEvent) {
        for waiter in waiters.drain(..) {
            let _ = waiter.tx.try_send(event);
        }
    }

    pub fn mark_gapless_pending(&self) {
        self.gapless_pending.store(true, Ordering::SeqCst);
    }

    pub fn is_gapless_pending(&self) -> bool {
        self.gapless_pending.load(Ordering::SeqCst)
    }

    /// Clear the pending flag, returning whether it was set.
    pub fn take_gapless_pending(&self) -> bool {
        self.gapless_pending.swap(false, Ordering::SeqCst)
    }

    /// Handle one engine event.
    ///
    /// Flag updates and ticket completion happen under the waiter lock so an
    /// armed ticket can never miss its event. Unknown events are rejected and
    /// not forwarded.
    pub fn dispatch(&self, event: HardwareEvent) -> Result<(), StreamError> {
        let normalized = match event {
            HardwareEvent::WriteReady => {
                Self::complete(&mut self.write_waiters.lock(), StreamEvent::WriteReady);
                StreamEvent::WriteReady
            }
            HardwareEvent::DrainReady => {
                let mut waiters = self.drain_waiters.lock();
                self.gapless_pending.store(false, Ordering::SeqCst);
                Self::complete(&mut waiters, StreamEvent::DrainReady);
                StreamEvent::DrainReady
            }
            HardwareEvent::PartialDrainReady => {
                let mut waiters = self.drain_waiters.lock();
                self.gapless_pending.store(true, Ordering::SeqCst);
                Self::complete(&mut waiters, StreamEvent::DrainReady);
                StreamEvent::DrainReady
            }
            HardwareEvent::Error => {
                Self::complete(&mut self.write_waiters.lock(), StreamEvent::Error);
                Self::complete(&mut self.drain_waiters.lock(), StreamEvent::Error);
                StreamEvent::Error
            }
            HardwareEvent::Unknown(id) => {
                log::error!("invalid engine event {:#x}", id);
                return Err(StreamError::Configuration(format!("invalid engine event {:#x}", id)));
            }
        };

        let callback = self.callback.read().clone();
        if let Some(callback) = callback {
            callback.on_stream_event(normalized);
        }
        Ok(())
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBridge {
    fn deliver(&self, event: HardwareEvent) -> Result<(), StreamError> {
        self.dispatch(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<StreamEvent>>,
    }

    impl StreamCallback for Recorder {
        fn on_stream_event(&self, event: StreamEvent) {
            self.events.lock().push(event);
        }
    }

    #[test]
    fn abandoned_tickets_are_pruned() {
        let bridge = EventBridge::new();
        for _ in 0..100 {
            let ticket = bridge.arm_drain_ready();
            assert_eq!(ticket.wait(Duration::from_millis(0)), None);
        }
        let _kept = bridge.arm_write_ready();
        let _also_kept = bridge.arm_drain_ready();
        assert_eq!(bridge.drain_waiters.lock().len(), 1);
        assert_eq!(bridge.write_waiters.lock().len(), 1);
    }

    #[test]
    fn event_before_wait_is_not_lost() {
        let bridge = EventBridge::new();
        let ticket = bridge.arm_write_ready();
        bridge.dispatch(HardwareEvent::WriteReady).unwrap();
        assert_eq!(ticket.wait(Duration::from_millis(10)), Some(StreamEvent::WriteReady));
    }

    #[test]
    fn wakes_waiter_on_other_thread() {
        let bridge = Arc::new(EventBridge::new());
        let ticket = bridge.arm_drain_ready();
        let engine = Arc::clone(&bridge);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            engine.dispatch(HardwareEvent::DrainReady).unwrap();
        });
        assert_eq!(ticket.wait(Duration::from_secs(2)), Some(StreamEvent::DrainReady));
        handle.join().unwrap();
    }

    #[test]
    fn partial_drain_arms_gapless_and_full_drain_clears() {
        let bridge = EventBridge::new();
        bridge.dispatch(HardwareEvent::PartialDrainReady).unwrap();
        assert!(bridge.is_gapless_pending());
        bridge.dispatch(HardwareEvent::DrainReady).unwrap();
        assert!(!bridge.is_gapless_pending());
    }

    #[test]
    fn take_clears_pending() {
        let bridge = EventBridge::new();
        bridge.mark_gapless_pending();
        assert!(bridge.take_gapless_pending());
        assert!(!bridge.take_gapless_pending());
    }

    #[test]
    fn forwards_normalized_events() {
        let bridge = EventBridge::new();
        let recorder = Arc::new(Recorder::default());
        bridge.set_callback(Some(recorder.clone()));
        bridge.dispatch(HardwareEvent::WriteReady).unwrap();
        bridge.dispatch(HardwareEvent::PartialDrainReady).unwrap();
        bridge.dispatch(HardwareEvent::Error).unwrap();
        assert_eq!(
            *recorder.events.lock(),
            vec![StreamEvent::WriteReady, StreamEvent::DrainReady, StreamEvent::Error]
        );
    }

    #[test]
    fn unknown_event_is_rejected_and_not_forwarded() {
        let bridge = EventBridge::new();
        let recorder = Arc::new(Recorder::default());
        bridge.set_callback(Some(recorder.clone()));
        assert!(bridge.dispatch(HardwareEvent::Unknown(0x77)).is_err());
        assert!(recorder.events.lock().is_empty());
    }

    #[test]
    fn error_completes_pending_tickets() {
        let bridge = EventBridge::new();
        let write = bridge.arm_write_ready();
        let drain = bridge.arm_drain_ready();
        bridge.dispatch(HardwareEvent::Error).unwrap();
        assert_eq!(write.try_wait(), Some(StreamEvent::Error));
        assert_eq!(drain.try_wait(), Some(StreamEvent::Error));
    }

    #[test]
    fn dropped_ticket_is_harmless() {
        let bridge = EventBridge::new();
        drop(bridge.arm_write_ready());
        bridge.dispatch(HardwareEvent::WriteReady).unwrap();
    }
}
