//! # Line Gateway
//!
//! An in-process network simulator. Anything sent to `<prefix>:<target...>` crosses
//! a [`Line`] and every transit copy is delivered to `<target...>` once its delay has
//! elapsed. The delivered source becomes `<prefix>:<source...>`, so a reply sent back
//! to the source crosses the line as well.
//!
//! ```text
//!   runner:a ──► net:runner:b ──(Line: drop / delay / repeat)──► runner:b
//!                                                     source = net:runner:a
//! ```
//!
//! Like the timer, one task owns the line, the in-flight queue and the shuttle table.

use crate::address::Address;
use crate::line::{DepartMessage, Line, TransitMessage};
use crate::message::Message;
use crate::schedule::DelayQueue;
use crate::shuttle::{group_by_prefix, strip_prefix, Gateway, Shuttle};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

enum Command {
    Send(Vec<Message>),
    AddShuttle(Arc<dyn Shuttle>),
    RemoveShuttle(String),
}

struct LineShuttle {
    prefix: String,
    commands: mpsc::UnboundedSender<Command>,
}

impl Shuttle for LineShuttle {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn send(&self, messages: Vec<Message>) {
        if self.commands.send(Command::Send(messages)).is_err() {
            debug!(prefix = %self.prefix, "Line stopped, dropping messages");
        }
    }
}

/// Gateway routing messages through an unreliable [`Line`].
pub struct LineGateway {
    prefix: String,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LineGateway {
    /// Starts the simulator loop. Must be called inside a tokio runtime.
    pub fn start(prefix: impl Into<String>, line: impl Line + 'static) -> Self {
        let prefix = prefix.into();
        let (commands, receiver) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(prefix.clone(), Box::new(line), receiver, shutdown_rx));
        Self {
            prefix,
            commands,
            shutdown,
            handle: Mutex::new(Some(handle)),
        }
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!(prefix = %self.prefix, "Line stopped, ignoring command");
        }
    }
}

#[async_trait]
impl Gateway for LineGateway {
    fn prefix(&self) -> &str {
        &self.prefix
    }

    fn incoming_shuttle(&self) -> Arc<dyn Shuttle> {
        Arc::new(LineShuttle {
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
                warn!(prefix = %self.prefix, error = %e, "Line task failed");
            }
        }
    }
}

async fn run(
    prefix: String,
    mut line: Box<dyn Line>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut in_flight: DelayQueue<TransitMessage> = DelayQueue::new();
    let mut shuttles: HashMap<String, Arc<dyn Shuttle>> = HashMap::new();
    let origin = Address::of(prefix.clone());
    info!(%prefix, "Line started");

    loop {
        let next = in_flight.next_due();
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            command = commands.recv() => match command {
                Some(Command::Send(messages)) => {
                    let now = Instant::now();
                    for message in messages {
                        let Some(target) = strip_prefix(message.destination()) else {
                            warn!(destination = %message.destination(), "No target behind line prefix, dropping");
                            continue;
                        };
                        let (source, _, payload) = message.into_parts();
                        let message = Message::new(origin.append(&source), target, payload);
                        let transits = line.depart(now, DepartMessage { message });
                        trace!(copies = transits.len(), "Departed");
                        for transit in transits {
                            in_flight.push(transit.arrival(), transit);
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

        let now = Instant::now();
        let arrived: Vec<Message> = in_flight
            .pop_due(now)
            .into_iter()
            .map(|transit| line.arrive(now, transit))
            .collect();
        for (target, batch) in group_by_prefix(arrived) {
            match shuttles.get(&target) {
                Some(shuttle) => shuttle.send(batch),
                None => warn!(prefix = %target, count = batch.len(), "No shuttle behind line, dropping"),
            }
        }
    }

    info!(%prefix, in_flight = in_flight.len(), "Line stopped");
}
