//! # Pinger Actor
//!
//! Shows the timer gateway. After `start`, the pinger pings its target every
//! `interval` by sending itself a `tick` through `timer:<ms>`, forwards every answer
//! to the monitor, and finishes after `rounds` pings.

use actor_framework::codec;
use actor_framework::error::{ActorError, CodecError};
use actor_framework::timer::TIMER_PREFIX;
use actor_framework::{Address, Context, Coroutine, Payload, Step};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const PINGER_TAG: &str = "pinger";

#[derive(Debug, Serialize, Deserialize)]
pub struct Pinger {
    target: Address,
    monitor: Address,
    interval_ms: u64,
    remaining: u32,
}

impl Pinger {
    pub fn new(target: Address, monitor: Address, interval: Duration, rounds: u32) -> Self {
        Self {
            target,
            monitor,
            interval_ms: interval.as_millis() as u64,
            remaining: rounds,
        }
    }

    fn wake_up(&self) -> Address {
        Address::of(TIMER_PREFIX).child(self.interval_ms.to_string())
    }
}

impl Coroutine for Pinger {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
        match cx.incoming().payload().as_bytes().as_ref() {
            b"start" | b"tick" => {
                if self.remaining == 0 {
                    cx.send(self.monitor.clone(), Payload::from_static(b"finished"));
                    return Ok(Step::Finish);
                }
                self.remaining -= 1;
                cx.send(self.target.clone(), Payload::from_static(b"ping"));
                cx.send(self.wake_up(), Payload::from_static(b"tick"));
            }
            _ => {
                let answer = cx.incoming().payload().clone();
                cx.send(self.monitor.clone(), answer);
            }
        }
        Ok(Step::Suspend)
    }

    fn tag(&self) -> &'static str {
        PINGER_TAG
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}
