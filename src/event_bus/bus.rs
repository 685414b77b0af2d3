use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::{sync::oneshot, task};

use super::event::Event;
use super::sink::{EventSink, StdOutSink};

/// Fans events out to a set of sinks for the duration of a run.
///
/// The bus owns the sinks and the event channel; each run attaches its own
/// [`RunListener`] for exactly as long as it executes. Closing the listener
/// drains everything already sent, so a run that has returned has always
/// delivered its events. Concurrent runs may attach concurrently; every
/// event reaches the sinks exactly once.
pub struct EventBus {
    sinks: Arc<Mutex<Vec<Box<dyn EventSink>>>>,
    channel: (flume::Sender<Event>, flume::Receiver<Event>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sink(StdOutSink::default())
    }
}

impl EventBus {
    /// Create an EventBus with a single sink.
    pub fn with_sink<T>(sink: T) -> Self
    where
        T: EventSink + 'static,
    {
        Self::with_sinks(vec![Box::new(sink)])
    }

    /// Create an EventBus with multiple sinks.
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(sinks)),
            channel: flume::unbounded(),
        }
    }

    /// Dynamically add a sink (useful for per-run streaming).
    pub fn add_sink<T: EventSink + 'static>(&self, sink: T) {
        lock_sinks(&self.sinks).push(Box::new(sink));
    }

    /// Get a clone of the sender side so producers can emit events.
    pub fn get_sender(&self) -> flume::Sender<Event> {
        self.channel.0.clone()
    }

    /// Start dispatching events to the sinks until the returned listener
    /// is closed.
    ///
    /// The executor attaches one listener per run, before the first layer,
    /// and closes it after the last. Events queued at close time are
    /// drained before `close` returns.
    pub fn attach(&self) -> RunListener {
        let receiver = self.channel.1.clone();
        let sinks = self.sinks.clone();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        let handle = task::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        // Deliver whatever was sent before the close.
                        while let Ok(event) = receiver.try_recv() {
                            dispatch(&sinks, &event);
                        }
                        break;
                    }
                    recv = receiver.recv_async() => match recv {
                        Ok(event) => dispatch(&sinks, &event),
                        Err(_) => break,
                    }
                }
            }
        });

        RunListener {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

fn dispatch(sinks: &Mutex<Vec<Box<dyn EventSink>>>, event: &Event) {
    for sink in lock_sinks(sinks).iter_mut() {
        if let Err(e) = sink.handle(event) {
            tracing::warn!(error = %e, "event bus sink error");
        }
    }
}

fn lock_sinks(sinks: &Mutex<Vec<Box<dyn EventSink>>>) -> MutexGuard<'_, Vec<Box<dyn EventSink>>> {
    sinks.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dispatch scope tied to one run.
///
/// Dropping an unclosed listener stops dispatch without draining; prefer
/// [`close`](Self::close) so queued events reach the sinks.
pub struct RunListener {
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<task::JoinHandle<()>>,
}

impl RunListener {
    /// Stop dispatching after draining everything already sent.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RunListener {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
