//! # Unreliable Lines
//!
//! A [`Line`] decides what happens to a message on its way between two endpoints:
//! how long it takes, whether it is lost, and whether it arrives more than once.
//! Lines are deterministic given their seed, so a failing simulation replays exactly.
//!
//! ## Departure algorithm
//!
//! ```text
//! count = 0
//! loop:
//!     count += 1
//!     if !roll(drop_chance):
//!         emit(delay = min_delay + uniform(0, max_jitter))
//!     if count >= max_send or !roll(repeat_chance):
//!         break
//! ```
//!
//! One departure can therefore produce zero, one or up to `max_send` transit copies.
//!
//! | Line | Parameters |
//! |------|------------|
//! | [`SimpleLine`] | as configured |
//! | [`PerKbLine`] | configured rates multiplied by the payload size in KB (rounded up, at least 1); probabilities capped at 1 |

use crate::config::LineConfig;
use crate::error::ConfigError;
use crate::message::Message;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::time::Duration;
use tokio::time::Instant;

/// A message leaving an endpoint.
#[derive(Clone, Debug)]
pub struct DepartMessage {
    pub message: Message,
}

/// One copy of a departed message in flight.
#[derive(Clone, Debug)]
pub struct TransitMessage {
    pub message: Message,
    pub departed: Instant,
    pub delay: Duration,
}

impl TransitMessage {
    pub fn arrival(&self) -> Instant {
        self.departed + self.delay
    }
}

pub trait Line: Send {
    fn depart(&mut self, time: Instant, departing: DepartMessage) -> Vec<TransitMessage>;

    fn arrive(&mut self, _time: Instant, transit: TransitMessage) -> Message {
        transit.message
    }
}

struct Params {
    min_delay: Duration,
    max_jitter: Duration,
    drop_chance: f64,
    repeat_chance: f64,
    max_send: u32,
}

fn transmit(rng: &mut ChaCha8Rng, params: &Params, time: Instant, message: Message) -> Vec<TransitMessage> {
    let mut transits = Vec::new();
    let mut count = 0;
    loop {
        count += 1;
        if !rng.gen_bool(params.drop_chance) {
            let jitter = params.max_jitter.mul_f64(rng.gen::<f64>());
            transits.push(TransitMessage {
                message: message.clone(),
                departed: time,
                delay: params.min_delay + jitter,
            });
        }
        if count >= params.max_send || !rng.gen_bool(params.repeat_chance) {
            break;
        }
    }
    transits
}

/// Fixed delay, jitter, drop and repeat parameters.
pub struct SimpleLine {
    params: Params,
    rng: ChaCha8Rng,
}

impl SimpleLine {
    pub fn new(config: LineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            params: Params {
                min_delay: config.min_delay,
                max_jitter: config.max_jitter,
                drop_chance: config.drop_chance,
                repeat_chance: config.repeat_chance,
                max_send: config.max_send,
            },
        })
    }
}

impl Line for SimpleLine {
    fn depart(&mut self, time: Instant, departing: DepartMessage) -> Vec<TransitMessage> {
        transmit(&mut self.rng, &self.params, time, departing.message)
    }
}

/// Parameters scaled by payload size, for links where big messages are slower and
/// more fragile.
pub struct PerKbLine {
    per_kb: LineConfig,
    rng: ChaCha8Rng,
}

impl PerKbLine {
    pub fn new(per_kb: LineConfig) -> Result<Self, ConfigError> {
        per_kb.validate()?;
        Ok(Self {
            rng: ChaCha8Rng::seed_from_u64(per_kb.seed),
            per_kb,
        })
    }

    fn params_for(&self, message: &Message) -> Params {
        let kb = u32::try_from(message.payload().size_kb().max(1)).unwrap_or(u32::MAX);
        Params {
            min_delay: self.per_kb.min_delay.saturating_mul(kb),
            max_jitter: self.per_kb.max_jitter.saturating_mul(kb),
            drop_chance: (self.per_kb.drop_chance * f64::from(kb)).min(1.0),
            repeat_chance: (self.per_kb.repeat_chance * f64::from(kb)).min(1.0),
            max_send: self.per_kb.max_send,
        }
    }
}

impl Line for PerKbLine {
    fn depart(&mut self, time: Instant, departing: DepartMessage) -> Vec<TransitMessage> {
        let params = self.params_for(&departing.message);
        transmit(&mut self.rng, &params, time, departing.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::message::Payload;

    fn departing(size: usize) -> DepartMessage {
        DepartMessage {
            message: Message::new(
                Address::of("a"),
                Address::of("b"),
                Payload::from(vec![7u8; size]),
            ),
        }
    }

    #[test]
    fn test_always_repeat_sends_max_copies() {
        let mut line = SimpleLine::new(LineConfig {
            repeat_chance: 1.0,
            max_send: 3,
            ..LineConfig::default()
        })
        .unwrap();
        let now = Instant::now();
        for _ in 0..50 {
            assert_eq!(line.depart(now, departing(10)).len(), 3);
        }
    }

    #[test]
    fn test_always_drop_sends_nothing() {
        let mut line = SimpleLine::new(LineConfig {
            drop_chance: 1.0,
            repeat_chance: 0.5,
            max_send: 5,
            ..LineConfig::default()
        })
        .unwrap();
        let now = Instant::now();
        for _ in 0..50 {
            assert!(line.depart(now, departing(10)).is_empty());
        }
    }

    #[test]
    fn test_delay_stays_within_jitter_window_and_is_reproducible() {
        let config = LineConfig {
            min_delay: Duration::from_millis(10),
            max_jitter: Duration::from_millis(5),
            repeat_chance: 0.5,
            max_send: 4,
            seed: 42,
            ..LineConfig::default()
        };
        let now = Instant::now();
        let mut first = SimpleLine::new(config.clone()).unwrap();
        let mut second = SimpleLine::new(config).unwrap();
        for _ in 0..100 {
            let a = first.depart(now, departing(1));
            let b = second.depart(now, departing(1));
            assert_eq!(
                a.iter().map(|t| t.delay).collect::<Vec<_>>(),
                b.iter().map(|t| t.delay).collect::<Vec<_>>()
            );
            for transit in a {
                assert!(transit.delay >= Duration::from_millis(10));
                assert!(transit.delay <= Duration::from_millis(15));
                assert_eq!(transit.arrival(), now + transit.delay);
            }
        }
    }

    #[test]
    fn test_per_kb_scales_by_rounded_up_size() {
        let mut line = PerKbLine::new(LineConfig {
            min_delay: Duration::from_millis(10),
            drop_chance: 0.4,
            ..LineConfig::default()
        })
        .unwrap();

        let params = line.params_for(&departing(2049).message);
        assert_eq!(params.min_delay, Duration::from_millis(30));
        assert_eq!(params.drop_chance, 1.0);

        let params = line.params_for(&departing(0).message);
        assert_eq!(params.min_delay, Duration::from_millis(10));

        assert!(line.depart(Instant::now(), departing(3000)).is_empty());
    }

    #[test]
    fn test_arrive_returns_the_message() {
        let mut line = SimpleLine::new(LineConfig::default()).unwrap();
        let now = Instant::now();
        let mut transits = line.depart(now, departing(3));
        assert_eq!(transits.len(), 1);
        let message = line.arrive(now, transits.remove(0));
        assert_eq!(message.destination(), &Address::of("b"));
        assert_eq!(message.payload().len(), 3);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = SimpleLine::new(LineConfig {
            repeat_chance: 2.0,
            ..LineConfig::default()
        });
        assert!(result.is_err());
    }
}
