//! # Demo System
//!
//! Wires the sample actors into one [`ActorSystem`]:
//!
//! | Address | Actor |
//! |---------|-------|
//! | `runner:echo` | [`Echo`] |
//! | `runner:heart` | [`Heartbeat`] reporting to `console:heart` |
//! | `runner:sup` | [`Supervisor`] with `w0..wN`, reporting to `console:sup` |
//! | `runner:pinger` | [`Pinger`] pinging `runner:echo`, reporting to `console:pinger` |
//!
//! Everything sent to the `console` prefix is logged and handed to
//! [`DemoSystem::next_report`].
//!
//! ```text
//!   DemoSystem::job ──► runner ◄──► timer
//!                         │
//!                         ▼
//!                      console ──► next_report()
//! ```

use crate::echo::Echo;
use crate::heartbeat::Heartbeat;
use crate::pinger::Pinger;
use crate::supervisor::Supervisor;
use actor_framework::config::RunnerConfig;
use actor_framework::shuttle::{ChannelShuttle, Gateway, Shuttle};
use actor_framework::timer::TimerGateway;
use actor_framework::{Address, Message, Payload};
use actor_runtime::{ActorSystem, SystemError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

pub const CONSOLE_PREFIX: &str = "console";
pub const RUNNER_PREFIX: &str = "runner";

/// Knobs for the demo. Deserializable so it can come from a file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub runner: RunnerConfig,
    pub heartbeat: Duration,
    pub supervised_workers: u32,
    pub ping_interval: Duration,
    pub ping_rounds: u32,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            heartbeat: Duration::from_millis(200),
            supervised_workers: 3,
            ping_interval: Duration::from_millis(100),
            ping_rounds: 3,
        }
    }
}

struct ConsoleShuttle {
    inner: ChannelShuttle,
}

impl Shuttle for ConsoleShuttle {
    fn prefix(&self) -> &str {
        self.inner.prefix()
    }

    fn send(&self, messages: Vec<Message>) {
        for message in &messages {
            info!(
                from = %message.source(),
                to = %message.destination(),
                payload = %String::from_utf8_lossy(message.payload().as_bytes()),
                "Report"
            );
        }
        self.inner.send(messages);
    }
}

/// Receive-only gateway collecting reports.
struct ConsoleGateway {
    incoming: Arc<ConsoleShuttle>,
}

#[async_trait]
impl Gateway for ConsoleGateway {
    fn prefix(&self) -> &str {
        CONSOLE_PREFIX
    }

    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        self.incoming.clone()
    }

    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) {
        debug!(prefix = %shuttle.prefix(), "Console never sends, ignoring shuttle");
    }

    fn remove_outgoing_shuttle(&self, _prefix: &str) {}

    fn close(&self) {}

    async fn join(&self) {}
}

/// The running demo: an actor system plus the console's inbox.
pub struct DemoSystem {
    system: ActorSystem,
    reports: Mutex<(mpsc::UnboundedReceiver<Vec<Message>>, VecDeque<Message>)>,
}

impl DemoSystem {
    /// Builds and starts the whole demo. Must be called inside a tokio runtime.
    pub async fn start(config: DemoConfig) -> Result<Self, SystemError> {
        let (inner, receiver) = ChannelShuttle::new(CONSOLE_PREFIX);
        let console = ConsoleGateway {
            incoming: Arc::new(ConsoleShuttle { inner }),
        };

        let runner = Address::of(RUNNER_PREFIX);
        let console_at = |name: &str| Address::of(CONSOLE_PREFIX).child(name);

        let system = ActorSystem::builder(RUNNER_PREFIX)
            .config(config.runner)
            .registry(crate::registry())
            .gateway(Arc::new(TimerGateway::start()))
            .gateway(Arc::new(console))
            .actor(runner.child("echo"), Echo::default(), vec![])
            .actor(
                runner.child("heart"),
                Heartbeat::new(console_at("heart"), config.heartbeat),
                vec![Payload::from_static(b"start")],
            )
            .actor(
                runner.child("sup"),
                Supervisor::new(console_at("sup"), config.supervised_workers),
                vec![Payload::from_static(b"start")],
            )
            .actor(
                runner.child("pinger"),
                Pinger::new(
                    runner.child("echo"),
                    console_at("pinger"),
                    config.ping_interval,
                    config.ping_rounds,
                ),
                vec![Payload::from_static(b"start")],
            )
            .build()
            .await?;

        info!("Demo system started");
        Ok(Self {
            system,
            reports: Mutex::new((receiver, VecDeque::new())),
        })
    }

    pub fn system(&self) -> &ActorSystem {
        &self.system
    }

    /// Hands `job` to supervised worker `worker`; the result comes back to
    /// `console:<reply_to>`.
    pub async fn job(&self, worker: u32, job: &str, reply_to: &str) {
        let destination = Address::of(RUNNER_PREFIX)
            .child("sup")
            .child(format!("w{worker}"));
        self.system
            .send(
                Address::of(CONSOLE_PREFIX).child(reply_to),
                destination,
                Payload::from(job.as_bytes().to_vec()),
            )
            .await;
    }

    /// Next message that reached the console, or `None` after `timeout`.
    pub async fn next_report(&self, timeout: Duration) -> Option<Message> {
        let mut guard = self.reports.lock().await;
        let (receiver, buffered) = &mut *guard;
        if let Some(message) = buffered.pop_front() {
            return Some(message);
        }
        let batch = tokio::time::timeout(timeout, receiver.recv()).await.ok()??;
        buffered.extend(batch);
        buffered.pop_front()
    }

    /// Asks the heartbeat to stop.
    pub async fn stop_heartbeat(&self) {
        self.system
            .send(
                Address::of(CONSOLE_PREFIX),
                Address::of(RUNNER_PREFIX).child("heart"),
                Payload::from_static(b"stop"),
            )
            .await;
    }

    pub async fn shutdown(self) {
        self.system.shutdown().await;
        info!("Demo system stopped");
    }
}
