//! # Actor Sample
//!
//! Demonstration actors for the runtime, each showing one feature:
//!
//! | Module | Feature |
//! |--------|---------|
//! | [`echo`] | Replies |
//! | [`heartbeat`] | Checkpoints |
//! | [`supervisor`] | Children and `ForwardAndReturn` |
//! | [`pinger`] | The timer gateway |
//! | [`lifecycle`] | A complete system with a console gateway |

pub mod echo;
pub mod heartbeat;
pub mod lifecycle;
pub mod pinger;
pub mod supervisor;

use actor_framework::CoroutineRegistry;

/// Registry covering every sample coroutine, so the demo can persist or evict any
/// of them.
pub fn registry() -> CoroutineRegistry {
    CoroutineRegistry::new()
        .register::<echo::Echo>(echo::ECHO_TAG)
        .register::<heartbeat::Heartbeat>(heartbeat::HEARTBEAT_TAG)
        .register::<supervisor::Supervisor>(supervisor::SUPERVISOR_TAG)
        .register::<supervisor::Worker>(supervisor::WORKER_TAG)
        .register::<pinger::Pinger>(pinger::PINGER_TAG)
}
