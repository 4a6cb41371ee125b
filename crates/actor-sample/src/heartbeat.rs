//! # Heartbeat Actor
//!
//! Shows checkpoints: the actor asks the store to wake it after `interval` of
//! silence, and reports each wake-up to a monitor address.
//!
//! | Incoming | Effect |
//! |----------|--------|
//! | checkpoint | `beat <n>` to the monitor, re-arm |
//! | `stop` | `stopped` to the monitor, finish |
//! | anything else | re-arm (pushes the next beat back) |

use actor_framework::codec;
use actor_framework::error::{ActorError, CodecError};
use actor_framework::{Address, Context, Coroutine, Payload, Step};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const HEARTBEAT_TAG: &str = "heartbeat";

#[derive(Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    monitor: Address,
    interval_ms: u64,
}

impl Heartbeat {
    pub fn new(monitor: Address, interval: Duration) -> Self {
        Self {
            monitor,
            interval_ms: interval.as_millis() as u64,
        }
    }
}

impl Coroutine for Heartbeat {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
        if cx.is_checkpoint() {
            let beat = format!("beat {}", cx.checkpoint_instance());
            cx.send(self.monitor.clone(), Payload::from(beat.into_bytes()));
        } else if cx.incoming().payload().as_bytes().as_ref() == b"stop" {
            cx.clear_checkpoint();
            cx.send(self.monitor.clone(), Payload::from_static(b"stopped"));
            return Ok(Step::Finish);
        }
        cx.set_checkpoint(Payload::from_static(b"beat"), Duration::from_millis(self.interval_ms));
        Ok(Step::Suspend)
    }

    fn tag(&self) -> &'static str {
        HEARTBEAT_TAG
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}
