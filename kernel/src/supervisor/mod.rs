//! Lifecycle supervision of the background loops.
//!
//! The supervisor owns the session-expiry sweep, the event dispatch loop,
//! the snapshot sweep, the quantum progress monitor and any registered
//! [`PeriodicTask`]s, and stops all of them within a bounded time.

pub mod lifecycle;
pub mod runtime;

pub use lifecycle::{LoopSignals, LoopState, SupervisorError};
pub use runtime::{
    LifecycleSupervisor, PeriodicTask, EVENT_DISPATCH_LOOP, QUANTUM_MONITOR_LOOP,
    SESSION_EXPIRY_LOOP, SNAPSHOT_SWEEP_LOOP,
};
