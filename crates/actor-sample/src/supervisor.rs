//! # Supervisor Actor
//!
//! Shows children and the `ForwardAndReturn` suspend mode. The supervisor spawns
//! `w0..wN` on its first message. Jobs sent to `<supervisor>:w<i>` are handled by the
//! worker, which replies to the requester with the upper-cased job. The supervisor is
//! then resumed with [`Resumption::Returned`] and reports the completion.
//!
//! ```text
//!  client ──job──► runner:sup:w1 ──"JOB"──► client
//!                        │
//!                     returned
//!                        ▼
//!                   runner:sup ──"w1 done (1)"──► monitor
//! ```
//!
//! Messages for an unknown worker fall through to the supervisor itself, which
//! answers `no such worker`.

use actor_framework::codec;
use actor_framework::error::{ActorError, CodecError};
use actor_framework::{Address, Context, Coroutine, Payload, Resumption, Step, SuspendMode};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const SUPERVISOR_TAG: &str = "supervisor";
pub const WORKER_TAG: &str = "worker";

#[derive(Debug, Serialize, Deserialize)]
pub struct Supervisor {
    monitor: Address,
    workers: u32,
    started: bool,
    completed: u64,
}

impl Supervisor {
    pub fn new(monitor: Address, workers: u32) -> Self {
        Self {
            monitor,
            workers,
            started: false,
            completed: 0,
        }
    }
}

impl Coroutine for Supervisor {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
        if let Resumption::Returned { child } = cx.resumption() {
            self.completed += 1;
            let report = format!("{} done ({})", child.last(), self.completed);
            cx.send(self.monitor.clone(), Payload::from(report.into_bytes()));
            return Ok(Step::Suspend);
        }

        if !self.started {
            self.started = true;
            cx.set_mode(SuspendMode::ForwardAndReturn);
            for i in 0..self.workers {
                cx.spawn_child(format!("w{i}"), Worker::default(), vec![]);
            }
            debug!(address = %cx.address(), workers = self.workers, "Workers spawned");
            return Ok(Step::Suspend);
        }

        cx.reply(Payload::from_static(b"no such worker"));
        Ok(Step::Suspend)
    }

    fn tag(&self) -> &'static str {
        SUPERVISOR_TAG
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}

/// Upper-cases UTF-8 jobs. Anything else fails the turn.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Worker {
    jobs: u64,
}

impl Coroutine for Worker {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
        let job = std::str::from_utf8(cx.incoming().payload().as_bytes())
            .map_err(|e| ActorError::Failed(format!("job is not text: {e}")))?;
        let result = job.to_uppercase();
        self.jobs += 1;
        cx.reply(Payload::from(result.into_bytes()));
        Ok(Step::Suspend)
    }

    fn tag(&self) -> &'static str {
        WORKER_TAG
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}
