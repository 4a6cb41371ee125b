//! # Echo Actor
//!
//! The smallest useful actor: replies to every message with the same payload and
//! counts how many it has answered.

use actor_framework::codec;
use actor_framework::error::{ActorError, CodecError};
use actor_framework::{Context, Coroutine, Step};
use serde::{Deserialize, Serialize};

pub const ECHO_TAG: &str = "echo";

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Echo {
    answered: u64,
}

impl Echo {
    pub fn answered(&self) -> u64 {
        self.answered
    }
}

impl Coroutine for Echo {
    fn resume(&mut self, cx: &mut Context) -> Result<Step, ActorError> {
        self.answered += 1;
        let payload = cx.incoming().payload().clone();
        cx.reply(payload);
        Ok(Step::Suspend)
    }

    fn tag(&self) -> &'static str {
        ECHO_TAG
    }

    fn encode(&self) -> Result<Vec<u8>, CodecError> {
        codec::encode(self)
    }
}
