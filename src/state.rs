//! Process-wide readiness.
//!
//! `SystemState` replaces a module-level "camera initialized" flag with an
//! owned value that is shared by `Arc` between the stream hub, the API and the
//! daemon. Transitions: `Uninitialized -> Ready | Degraded`, and at runtime
//! `Ready <-> Degraded` when camera rediscovery succeeds or fails.

use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    Uninitialized,
    Ready,
    Degraded,
}

impl Readiness {
    fn to_u8(self) -> u8 {
        match self {
            Readiness::Uninitialized => 0,
            Readiness::Ready => 1,
            Readiness::Degraded => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Readiness::Ready,
            2 => Readiness::Degraded,
            _ => Readiness::Uninitialized,
        }
    }
}

#[derive(Debug)]
pub struct SystemState {
    readiness: AtomicU8,
}

impl SystemState {
    pub fn new() -> Self {
        Self {
            readiness: AtomicU8::new(Readiness::Uninitialized.to_u8()),
        }
    }

    pub fn readiness(&self) -> Readiness {
        Readiness::from_u8(self.readiness.load(Ordering::SeqCst))
    }

    pub fn is_camera_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    pub fn mark_ready(&self) {
        self.transition(Readiness::Ready);
    }

    pub fn mark_degraded(&self) {
        self.transition(Readiness::Degraded);
    }

    fn transition(&self, next: Readiness) {
        let prev = Readiness::from_u8(self.readiness.swap(next.to_u8(), Ordering::SeqCst));
        if prev != next {
            log::info!("system state: {:?} -> {:?}", prev, next);
        }
    }

    /// Health label used by `/health`.
    pub fn health_label(&self) -> &'static str {
        match self.readiness() {
            Readiness::Ready => "healthy",
            Readiness::Degraded | Readiness::Uninitialized => "degraded",
        }
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}
