//
// Copyright (c) The netconfd Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! Event notification bus.
//!
//! Streams are named; every published event is appended to a bounded,
//! time-indexed replay buffer and fanned out to the live subscriptions whose
//! filter matches. A subscription is a task-less object owning a bounded
//! channel: subscribers that stop draining are dropped after a bounded
//! number of failed deliveries, and a stop time in the past yields a pure
//! replay that terminates immediately.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::sync::mpsc;

use crate::data::DataTree;
use crate::error::{Error, ErrorTag, Result};
use crate::xpath;

/// Replay buffer bound, per stream.
const REPLAY_CAPACITY: usize = 1024;

/// Queued events per subscription channel.
const CHANNEL_CAPACITY: usize = 64;

/// Failed deliveries tolerated before a subscriber is dropped.
const BACKPRESSURE_STRIKES: u32 = 8;

/// A single published event.
#[derive(Debug)]
pub struct Event {
    pub time: DateTime<Utc>,
    pub stream: String,
    /// The notification payload tree.
    pub payload: DataTree,
}

/// Subscription identifier.
pub type SubscriptionId = u32;

#[derive(Debug)]
struct StreamEntry {
    replay: VecDeque<Arc<Event>>,
}

#[derive(Debug)]
struct Subscription {
    id: SubscriptionId,
    stream: String,
    filter: Option<String>,
    stop_time: Option<DateTime<Utc>>,
    sender: mpsc::Sender<Arc<Event>>,
    strikes: u32,
}

/// The in-process notification bus.
#[derive(Debug)]
pub struct NotificationBus {
    streams: HashMap<String, StreamEntry>,
    subscriptions: Vec<Subscription>,
    next_id: SubscriptionId,
}

impl Default for NotificationBus {
    fn default() -> NotificationBus {
        NotificationBus::new()
    }
}

// ===== impl NotificationBus =====

impl NotificationBus {
    /// Create a bus holding the base `NETCONF` stream.
    pub fn new() -> NotificationBus {
        let mut bus = NotificationBus {
            streams: HashMap::new(),
            subscriptions: Vec::new(),
            next_id: 1,
        };
        bus.add_stream("NETCONF");
        bus
    }

    /// Register a named stream. Adding an existing stream is a no-op.
    pub fn add_stream(&mut self, name: &str) {
        self.streams.entry(name.to_string()).or_insert(StreamEntry {
            replay: VecDeque::new(),
        });
    }

    /// Names of the registered streams.
    pub fn streams(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }

    /// Subscribe to a stream. Events already in the replay buffer that fall
    /// within [start_time, stop_time] are delivered immediately; a stop time
    /// in the past terminates the subscription after replay (the returned id
    /// is `None` in that case).
    pub fn subscribe(
        &mut self,
        stream: &str,
        start_time: Option<DateTime<Utc>>,
        stop_time: Option<DateTime<Utc>>,
        filter: Option<String>,
    ) -> Result<(Option<SubscriptionId>, mpsc::Receiver<Arc<Event>>)> {
        let entry = self.streams.get(stream).ok_or_else(|| {
            Error::new(
                ErrorTag::InvalidValue,
                format!("unknown stream '{}'", stream),
            )
        })?;
        if start_time.is_none() && stop_time.is_some() {
            return Err(Error::protocol(
                ErrorTag::MissingElement,
                "stopTime requires startTime",
            ));
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);

        // Replay from the buffer.
        if let Some(start) = start_time {
            for event in &entry.replay {
                if event.time < start {
                    continue;
                }
                if let Some(stop) = stop_time {
                    if event.time > stop {
                        break;
                    }
                }
                if !filter_matches(filter.as_deref(), event) {
                    continue;
                }
                // Replay overflow simply truncates; the subscriber asked
                // for more history than its channel can hold.
                if sender.try_send(event.clone()).is_err() {
                    break;
                }
            }
        }

        // A stop time in the past means replay-then-terminate.
        if let Some(stop) = stop_time {
            if stop <= Utc::now() {
                debug!("subscription to '{}' ended at replay", stream);
                return Ok((None, receiver));
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.subscriptions.push(Subscription {
            id,
            stream: stream.to_string(),
            filter,
            stop_time,
            sender,
            strikes: 0,
        });
        Ok((Some(id), receiver))
    }

    /// Cancel a subscription. Unknown ids are ignored (the subscriber may
    /// have been dropped for backpressure already).
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|sub| sub.id != id);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Publish an event: append it to the stream's replay buffer and fan it
    /// out to every live subscription whose filter matches.
    pub fn publish(&mut self, stream: &str, payload: DataTree) -> Result<()> {
        let event = Arc::new(Event {
            time: Utc::now(),
            stream: stream.to_string(),
            payload,
        });
        let entry = self.streams.get_mut(stream).ok_or_else(|| {
            Error::new(
                ErrorTag::InvalidValue,
                format!("unknown stream '{}'", stream),
            )
        })?;
        entry.replay.push_back(event.clone());
        while entry.replay.len() > REPLAY_CAPACITY {
            entry.replay.pop_front();
        }

        let mut dropped: Vec<SubscriptionId> = Vec::new();
        for sub in &mut self.subscriptions {
            if sub.stream != stream {
                continue;
            }
            // Stop time reached: the subscription terminates.
            if let Some(stop) = sub.stop_time {
                if event.time > stop {
                    dropped.push(sub.id);
                    continue;
                }
            }
            if !filter_matches(sub.filter.as_deref(), &event) {
                continue;
            }
            match sub.sender.try_send(event.clone()) {
                Ok(()) => sub.strikes = 0,
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dropped.push(sub.id);
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    sub.strikes += 1;
                    if sub.strikes >= BACKPRESSURE_STRIKES {
                        warn!(
                            "dropping subscription {} on stream '{}': \
                             subscriber is not draining",
                            sub.id, stream
                        );
                        dropped.push(sub.id);
                    }
                }
            }
        }
        for id in dropped {
            self.unsubscribe(id);
        }
        Ok(())
    }
}

// The filter is an XPath expression evaluated against the event payload;
// non-matching events are skipped.
fn filter_matches(filter: Option<&str>, event: &Event) -> bool {
    match filter {
        None => true,
        Some(filter) => xpath::eval_boolean(
            &event.payload,
            None,
            filter,
            &HashMap::new(),
        )
        .unwrap_or(false),
    }
}
