//! Single-producer broadcast of stream chunks.
//!
//! One producer thread reads the camera and renders chunks; every viewer gets
//! its own bounded channel. A viewer that falls behind loses frames, it never
//! stalls the producer or the other viewers. The producer runs only while at
//! least one viewer is subscribed: when the last one leaves, the camera is
//! released, and the next subscriber starts a fresh producer (re-running
//! discovery when the camera is not open).

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::ingest::{CameraStatus, FrameSource};
use crate::state::SystemState;

use super::producer::{FramePipeline, FrameStream};

pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 4;

pub type Chunk = Arc<[u8]>;

struct HubInner {
    source: Mutex<FrameSource>,
    pipeline: Mutex<FramePipeline>,
    state: Arc<SystemState>,
    subscribers: Mutex<Vec<Sender<Chunk>>>,
    producers: Mutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
    shutdown: AtomicBool,
    capacity: usize,
}

/// Fan-out of one camera stream to any number of viewers.
#[derive(Clone)]
pub struct StreamHub {
    inner: Arc<HubInner>,
}

/// A viewer's end of the hub. Dropping it detaches the viewer.
pub struct Subscription {
    rx: Receiver<Chunk>,
}

impl Subscription {
    /// Wait up to `timeout` for the next chunk. `None` on timeout or once the
    /// stream has ended.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Chunk> {
        match self.rx.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

impl Iterator for Subscription {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        self.rx.recv().ok()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking holder leaves plain data behind; keep serving.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl StreamHub {
    pub fn new(source: FrameSource, pipeline: FramePipeline, state: Arc<SystemState>) -> Self {
        Self::with_capacity(source, pipeline, state, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(
        source: FrameSource,
        pipeline: FramePipeline,
        state: Arc<SystemState>,
        capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(HubInner {
                source: Mutex::new(source),
                pipeline: Mutex::new(pipeline),
                state,
                subscribers: Mutex::new(Vec::new()),
                producers: Mutex::new(Vec::new()),
                running: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                capacity: capacity.max(1),
            }),
        }
    }

    pub fn state(&self) -> &Arc<SystemState> {
        &self.inner.state
    }

    /// Run camera discovery now and record the outcome in the system state.
    pub fn open_source(&self) -> CameraStatus {
        let mut source = lock(&self.inner.source);
        self.inner.open_locked(&mut *source)
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner.subscribers).len()
    }

    pub fn is_producing(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Attach a viewer, starting the producer if it is idle.
    pub fn subscribe(&self) -> Result<Subscription> {
        let (tx, rx) = bounded(self.inner.capacity);
        let mut subscribers = lock(&self.inner.subscribers);
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(anyhow!("stream hub is shut down"));
        }
        subscribers.push(tx);
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            let handle = std::thread::Builder::new()
                .name("stream-producer".to_string())
                .spawn(move || inner.run_producer())
                .map_err(|err| {
                    self.inner.running.store(false, Ordering::SeqCst);
                    anyhow!("spawn stream producer: {}", err)
                })?;
            let mut producers = lock(&self.inner.producers);
            producers.retain(|p| !p.is_finished());
            producers.push(handle);
        }
        Ok(Subscription { rx })
    }

    /// Detach every viewer, stop the producer and release the camera.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        lock(&self.inner.subscribers).clear();
        let producers: Vec<JoinHandle<()>> = lock(&self.inner.producers).drain(..).collect();
        let mut panicked = false;
        for producer in producers {
            panicked |= producer.join().is_err();
        }
        lock(&self.inner.source).close();
        if panicked {
            return Err(anyhow!("stream producer thread panicked"));
        }
        log::info!("stream hub stopped");
        Ok(())
    }
}

impl HubInner {
    fn open_locked(&self, source: &mut FrameSource) -> CameraStatus {
        let status = source.open();
        if status.is_ready() {
            self.state.mark_ready();
        } else {
            self.state.mark_degraded();
        }
        status
    }

    fn run_producer(self: Arc<Self>) {
        let mut source = lock(&self.source);
        if !source.is_ready() {
            self.open_locked(&mut *source);
        }
        let was_ready = source.is_ready();

        let mut pipeline = lock(&self.pipeline);
        let mut stream = FrameStream::new(&mut *source, &mut *pipeline);
        let mut viewers_left = true;
        let mut last: Option<(Chunk, usize)> = None;
        for chunk in stream.by_ref() {
            if self.shutdown.load(Ordering::SeqCst) {
                viewers_left = false;
                break;
            }
            let chunk: Chunk = chunk.into();
            let reached = self.broadcast(Arc::clone(&chunk));
            if reached == 0 {
                viewers_left = false;
                break;
            }
            last = Some((chunk, reached));
        }
        let finished = stream.is_finished();
        drop(stream);
        drop(pipeline);

        if finished {
            if was_ready && !source.is_ready() {
                self.state.mark_degraded();
            }
            self.finish(last);
        } else if !viewers_left {
            log::info!("stream: no viewers left, releasing camera");
            source.close();
        }
        if self.shutdown.load(Ordering::SeqCst) {
            self.running.store(false, Ordering::SeqCst);
        }
    }

    /// The source ran dry: end every current viewer's stream. Viewers that
    /// joined after the last broadcast get that chunk before the end.
    fn finish(&self, last: Option<(Chunk, usize)>) {
        let mut subscribers = lock(&self.subscribers);
        if let Some((chunk, reached)) = last {
            for tx in subscribers.iter().skip(reached) {
                let _ = tx.try_send(Arc::clone(&chunk));
            }
        }
        subscribers.clear();
        self.running.store(false, Ordering::SeqCst);
    }

    /// Send to every viewer and return how many are still attached. At zero
    /// the producer is marked stopped.
    fn broadcast(&self, chunk: Chunk) -> usize {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| match tx.try_send(Arc::clone(&chunk)) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        });
        if subscribers.is_empty() {
            self.running.store(false, Ordering::SeqCst);
        }
        subscribers.len()
    }
}
