//! # Timer Gateway
//!
//! Delayed delivery. A message sent to
//!
//! ```text
//! timer:<target address...>:<delay in ms>
//! ```
//!
//! is delivered to `<target address...>` after the delay, with its original source
//! and payload. When the target is empty (`timer:250`) the message goes back to its
//! source, which is how an actor schedules a wake-up for itself.
//!
//! One task owns the pending heap and the outgoing shuttle table. Incoming messages,
//! shuttle registration and removal all reach it through the same command channel,
//! so a timer never fires against a half-updated shuttle table.

use crate::address::Address;
use crate::error::TimerError;
use crate::message::{Message, Payload};
use crate::schedule::DelayQueue;
use crate::shuttle::{group_by_prefix, Gateway, Shuttle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const TIMER_PREFIX: &str = "timer";

enum Command {
    Send(Vec<Message>),
    AddShuttle(Arc<dyn Shuttle>),
    RemoveShuttle(String),
}

/// Splits a timer destination into the delivery target and the delay.
pub fn parse_timer_destination(
    source: &Address,
    destination: &Address,
) -> Result<(Address, Duration), TimerError> {
    if destination.len() < 2 {
        return Err(TimerError::MissingDelay(destination.clone()));
    }
    let raw = destination.last();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TimerError::InvalidDelay(raw.to_string()));
    }
    let millis: u64 = raw
        .parse()
        .map_err(|_| TimerError::InvalidDelay(raw.to_string()))?;
    let target = &destination.segments()[1..destination.len() - 1];
    let target = match Address::new(target.iter().cloned()) {
        Ok(target) => target,
        Err(_) => source.clone(),
    };
    Ok((target, Duration::from_millis(millis)))
}

struct TimerShuttle {
    prefix: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shuttle for TimerShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn send(&self, messages: Vec<Message>) {
        if self.commands.send(Command::Send(messages)).is_err() {
            debug!(prefix = %self.prefix, "Timer stopped, dropping messages");
        }
    }
}

/// Gateway delivering messages after a per-message delay.
pub struct TimerGateway {
    prefix: String,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TimerGateway {
    /// Starts the timer loop under [`TIMER_PREFIX`]. Must be called inside a tokio
    /// runtime.
    pub fn start() -> Self {
        Self::with_prefix(TIMER_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(prefix.clone(), receiver, shutdown_rx));
        Self {
            prefix,
            commands,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(prefix = %self.prefix, "Timer stopped, ignoring command");
        }
    }
}

#[async_trait]
impl Gateway for TimerGateway {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        Arc::new(TimerShuttle {
            prefix: self.prefix.clone(),
            commands: self.commands.clone(),
        })
    }

    fn add_outgoing_shuttle(&self, shuttle: Arc<dyn Shuttle>) {
        self.command(Command::AddShuttle(shuttle));
    }

    fn remove_outgoing_shuttle(&self, prefix: &str) {
        self.command(Command::RemoveShuttle(prefix.to_string()));
    }

    fn close(&self) {
        let _ = self.shutdown.send(true);
    }

    async fn join(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(prefix = %self.prefix, error = %e, "Timer task failed");
            }
        }
    }
}

struct Pending {
    from: Address,
    to: Address,
    payload: Payload,
}

async fn run(
    prefix: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut queue: DelayQueue<Pending> = DelayQueue::new();
    let mut shuttles: HashMap<String, Arc<dyn Shuttle>> = HashMap::new();
    info!(%prefix, "Timer started");

    loop {
        let next = queue.next_due();
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            command = commands.recv() => match command {
                Some(Command::Send(messages)) => {
                    let now = Instant::now();
                    for message in messages {
                        match parse_timer_destination(message.source(), message.destination()) {
                            Ok((to, delay)) => {
                                debug!(%to, delay_ms = delay.as_millis() as u64, "Scheduled");
                                let (from, _, payload) = message.into_parts();
                                queue.push(now + delay, Pending { from, to, payload });
                            }
                            Err(e) => warn!(destination = %message.destination(), error = %e, "Dropping timer message"),
                        }
                    }
                }
                Some(Command::AddShuttle(shuttle)) => {
                    shuttles.insert(shuttle.prefix().to_string(), shuttle);
                }
                Some(Command::RemoveShuttle(removed)) => {
                    shuttles.remove(&removed);
                }
                None => break,
            },
            _ = tokio::time::sleep_until(next.unwrap_or_else(Instant::now)), if next.is_some() => {}
        }

        let due = queue.pop_due(Instant::now());
        if due.is_empty() {
            continue;
        }
        let messages = due
            .into_iter()
            .map(|p| Message::new(p.from, p.to, p.payload))
            .collect();
        for (target, batch) in group_by_prefix(messages) {
            match shuttles.get(&target) {
                Some(shuttle) => shuttle.send(batch),
                None => warn!(prefix = %target, count = batch.len(), "No shuttle for timer target, dropping"),
            }
        }
    }

    info!(%prefix, pending = queue.len(), "Timer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shuttle::ChannelShuttle;

    fn addr(s: &str) -> Address {
        Address::parse(s).unwrap()
    }

    #[test]
    fn test_parse_timer_destination() {
        let source = addr("runner:a");
        assert_eq!(
            parse_timer_destination(&source, &addr("timer:runner:b:50")),
            Ok((addr("runner:b"), Duration::from_millis(50)))
        );
        assert_eq!(
            parse_timer_destination(&source, &addr("timer:0")),
            Ok((source.clone(), Duration::ZERO))
        );
        assert_eq!(
            parse_timer_destination(&source, &addr("timer:runner:b:soon")),
            Err(TimerError::InvalidDelay("soon".into()))
        );
        assert_eq!(
            parse_timer_destination(&source, &addr("timer:-5")),
            Err(TimerError::InvalidDelay("-5".into()))
        );
        assert!(matches!(
            parse_timer_destination(&source, &addr("timer")),
            Err(TimerError::MissingDelay(_))
        ));
    }

    #[test]
    fn test_delay_must_be_plain_digits() {
        let source = addr("runner:a");
        for raw in ["+50", " 50", "5_0", ""] {
            let destination = Address::new(["timer", "runner", "b", raw]).unwrap();
            assert_eq!(
                parse_timer_destination(&source, &destination),
                Err(TimerError::InvalidDelay(raw.into())),
                "{raw:?} should be rejected"
            );
        }
        assert_eq!(
            parse_timer_destination(&source, &addr("timer:runner:b:0050")),
            Ok((addr("runner:b"), Duration::from_millis(50)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivers_in_delay_order() {
        let timer = TimerGateway::start();
        let (runner, mut delivered) = ChannelShuttle::new("runner");
        timer.add_outgoing_shuttle(Arc::new(runner));

        let source = addr("runner:src");
        timer.incoming_shuttle().send(vec![
            Message::new(source.clone(), addr("timer:100"), Payload::from_static(b"hundred")),
            Message::new(source.clone(), addr("timer:50"), Payload::from_static(b"fifty")),
            Message::new(source.clone(), addr("timer:nope"), Payload::from_static(b"bad")),
        ]);

        let first = delivered.recv().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].payload().as_bytes().as_ref(), b"fifty");
        assert_eq!(first[0].source(), &source);
        assert_eq!(first[0].destination(), &source);

        let second = delivered.recv().await.unwrap();
        assert_eq!(second[0].payload().as_bytes().as_ref(), b"hundred");

        timer.close();
        timer.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_shuttle_drops_due_messages() {
        let timer = TimerGateway::start();
        let (runner, mut delivered) = ChannelShuttle::new("runner");
        let runner: Arc<dyn Shuttle> = Arc::new(runner);
        timer.add_outgoing_shuttle(runner.clone());

        timer.incoming_shuttle().send(vec![Message::new(
            addr("runner:src"),
            addr("timer:runner:dst:10"),
            Payload::default(),
        )]);
        timer.remove_outgoing_shuttle("runner");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(delivered.try_recv().is_err());

        timer.close();
        timer.join().await;
    }
}
