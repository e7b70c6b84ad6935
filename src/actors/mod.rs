//! Actor-based measurement loops
//!
//! Every target gets its own [`tester::TargetTesterActor`] running as an
//! independent tokio task. The scheduler owns the handles.
//!
//! ```text
//!                 ┌───────────────────┐
//!                 │     Scheduler     │
//!                 └─────────┬─────────┘
//!                           │ spawns / cancels
//!            ┌──────────────┼──────────────┐
//!            │              │              │
//!     ┌──────▼──────┐       │       ┌──────▼──────┐
//!     │  Tester-1   │       │       │  Tester-N   │
//!     │ (host:port) │       │       │ (host:port) │
//!     └──────┬──────┘       │       └──────┬──────┘
//!            │ append       │              │
//!            ▼              │              ▼
//!       ResultStore         │         ResultStore
//!            │              │              │
//!            └──────────────┼──────────────┘
//!                           │
//!                ┌──────────▼─────────┐
//!                │  Broadcast Channel │ (SchedulerEvent)
//!                └──────────┬─────────┘
//!                           │ subscribe
//!                      CLI / callers
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each loop has an mpsc command channel
//! 2. **Events**: loops publish to one broadcast channel
//! 3. **Request/Response**: oneshot channels for `TestNow`
//! 4. **Cancellation**: one `CancellationToken` per loop

pub mod messages;
pub mod tester;
