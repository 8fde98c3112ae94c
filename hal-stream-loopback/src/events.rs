//! Asynchronous event delivery for loopback sessions.
//!
//! Real engines raise write-ready and drain-ready callbacks on their own
//! thread. The pump reproduces that: sessions post events into a channel
//! and a dedicated thread hands them to each session's sink.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use hal_stream_core::traits::engine::{EventSink, HardwareEvent};

use crate::error::LoopbackError;

type Envelope = (Arc<dyn EventSink>, HardwareEvent);

/// Poll interval of the delivery thread's shutdown check.
const SHUTDOWN_POLL: Duration = Duration::from_millis(10);

/// Cloneable handle sessions use to post events.
#[derive(Clone)]
pub struct EventPoster {
    tx: Sender<Envelope>,
}

impl EventPoster {
    pub fn post(&self, sink: &Arc<dyn EventSink>, event: HardwareEvent) {
        if self.tx.send((Arc::clone(sink), event)).is_err() {
            log::warn!("event pump stopped, dropping {:?}", event);
        }
    }
}

/// Owns the delivery thread.
pub struct EventPump {
    poster: EventPoster,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl EventPump {
    pub fn start() -> Result<Self, LoopbackError> {
        let (tx, rx) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);

        let handle = thread::Builder::new()
            .name("loopback-events".into())
            .spawn(move || {
                delivery_loop(&thread_running, &rx);
                thread_running.store(false, Ordering::SeqCst);
            })
            .map_err(|e| LoopbackError::Spawn(e.to_string()))?;

        Ok(Self {
            poster: EventPoster { tx },
            running,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn poster(&self) -> EventPoster {
        self.poster.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the thread after it delivers what is already queued.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().take() {
            if handle.join().is_err() {
                log::error!("loopback event thread panicked");
            }
        }
    }
}

impl Drop for EventPump {
    fn drop(&mut self) {
        self.stop();
    }
}

fn delivery_loop(running: &AtomicBool, rx: &Receiver<Envelope>) {
    loop {
        match rx.recv_timeout(SHUTDOWN_POLL) {
            Ok((sink, event)) => {
                if let Err(e) = sink.deliver(event) {
                    log::warn!("event {:?} rejected by session: {}", event, e);
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                if !running.load(Ordering::SeqCst) {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hal_stream_core::models::error::StreamError;

    #[derive(Default)]
    struct Collect {
        events: Mutex<Vec<HardwareEvent>>,
    }

    impl EventSink for Collect {
        fn deliver(&self, event: HardwareEvent) -> Result<(), StreamError> {
            self.events.lock().push(event);
            Ok(())
        }
    }

    #[test]
    fn delivers_in_order_then_stops() {
        let pump = EventPump::start().unwrap();
        let collect = Arc::new(Collect::default());
        let sink: Arc<dyn EventSink> = collect.clone();

        let poster = pump.poster();
        poster.post(&sink, HardwareEvent::WriteReady);
        poster.post(&sink, HardwareEvent::DrainReady);
        pump.stop();

        assert!(!pump.is_running());
        assert_eq!(
            *collect.events.lock(),
            vec![HardwareEvent::WriteReady, HardwareEvent::DrainReady]
        );
    }

    #[test]
    fn post_after_stop_is_dropped() {
        let pump = EventPump::start().unwrap();
        let poster = pump.poster();
        pump.stop();
        drop(pump);

        let collect = Arc::new(Collect::default());
        let sink: Arc<dyn EventSink> = collect.clone();
        poster.post(&sink, HardwareEvent::WriteReady);
        assert!(collect.events.lock().is_empty());
    }
}
