//! The runtime event bus.
//!
//! Events publish into a per-tick buffer and deliver to channel
//! subscribers in `dispatch_order` when the runtime flushes at tick
//! end, so subscribers observe a step's events only after its state
//! changes are complete. The buffer carries soft and hard limits: the
//! soft limit records a warning counter and keeps accepting, the hard
//! limit drops the event with an overflow counter — a runaway producer
//! degrades observability, never correctness.

use std::time::Instant;

use indexmap::IndexMap;
use serde_json::Value;

use lode_core::telemetry::TelemetryHandle;
use lode_core::Step;

/// Buffer limits and the slow-handler threshold.
#[derive(Clone, Copy, Debug)]
pub struct EventBusConfig {
    /// Buffered events beyond which publishes are soft-limited.
    pub soft_limit: usize,
    /// Buffered events beyond which publishes are dropped.
    pub hard_limit: usize,
    /// Subscriber callbacks slower than this increment the
    /// slow-handler counter (microseconds).
    pub slow_handler_threshold_us: u64,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            soft_limit: 256,
            hard_limit: 1024,
            slow_handler_threshold_us: 2_000,
        }
    }
}

/// A buffered runtime event.
#[derive(Clone, Debug)]
pub struct BusEvent {
    /// Channel the event publishes on.
    pub channel: String,
    /// Event name.
    pub name: String,
    /// Step the event was emitted in.
    pub step: Step,
    /// Structured payload.
    pub data: Value,
    /// Global publication order.
    pub dispatch_order: u64,
}

/// Back-pressure state reported per publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishState {
    /// Buffered normally.
    Accepted,
    /// Buffered, but the soft limit is active.
    SoftLimited,
    /// Dropped at the hard limit.
    Overflowed,
}

/// Snapshot of the bus state returned from each publish.
#[derive(Clone, Debug, PartialEq)]
pub struct PublishReceipt {
    /// Whether the event was buffered.
    pub accepted: bool,
    /// Back-pressure state.
    pub state: PublishState,
    /// Channel published on.
    pub channel: String,
    /// Buffered events after this publish.
    pub buffer_size: usize,
    /// Slots remaining before the hard limit.
    pub remaining_capacity: usize,
    /// Publication order assigned (meaningful when accepted).
    pub dispatch_order: u64,
    /// Whether the soft limit is currently active.
    pub soft_limit_active: bool,
}

/// A channel subscriber.
pub type Subscriber = Box<dyn FnMut(&BusEvent) + Send>;

/// Publish/subscribe bus with bounded buffering.
pub struct EventBus {
    config: EventBusConfig,
    buffer: Vec<BusEvent>,
    next_dispatch_order: u64,
    subscribers: IndexMap<String, Vec<Subscriber>>,
    soft_limit_hits: u64,
    overflow_drops: u64,
    slow_handler_count: u64,
    telemetry: TelemetryHandle,
}

impl EventBus {
    /// Create a bus with the given limits.
    pub fn new(config: EventBusConfig, telemetry: TelemetryHandle) -> Self {
        Self {
            config,
            buffer: Vec::new(),
            next_dispatch_order: 0,
            subscribers: IndexMap::new(),
            soft_limit_hits: 0,
            overflow_drops: 0,
            slow_handler_count: 0,
            telemetry,
        }
    }

    /// Register a subscriber on a channel.
    pub fn subscribe(&mut self, channel: impl Into<String>, subscriber: Subscriber) {
        self.subscribers
            .entry(channel.into())
            .or_default()
            .push(subscriber);
    }

    /// Publish an event.
    pub fn publish(
        &mut self,
        channel: impl Into<String>,
        name: impl Into<String>,
        step: Step,
        data: Value,
    ) -> PublishReceipt {
        let channel: String = channel.into();
        let name: String = name.into();
        let buffered = self.buffer.len();

        if buffered >= self.config.hard_limit {
            self.overflow_drops += 1;
            self.telemetry.record_warning(
                "EventBusOverflow",
                Some(&serde_json::json!({ "channel": channel, "dropped": name })),
            );
            return PublishReceipt {
                accepted: false,
                state: PublishState::Overflowed,
                channel,
                buffer_size: buffered,
                remaining_capacity: 0,
                dispatch_order: self.next_dispatch_order,
                soft_limit_active: true,
            };
        }

        let soft_limit_active = buffered >= self.config.soft_limit;
        if soft_limit_active {
            self.soft_limit_hits += 1;
        }

        let dispatch_order = self.next_dispatch_order;
        self.next_dispatch_order += 1;
        self.buffer.push(BusEvent {
            channel: channel.clone(),
            name,
            step,
            data,
            dispatch_order,
        });

        let buffer_size = self.buffer.len();
        PublishReceipt {
            accepted: true,
            state: if soft_limit_active {
                PublishState::SoftLimited
            } else {
                PublishState::Accepted
            },
            channel,
            buffer_size,
            remaining_capacity: self.config.hard_limit.saturating_sub(buffer_size),
            dispatch_order,
            soft_limit_active,
        }
    }

    /// Deliver all buffered events to their channel subscribers, in
    /// publication order, and clear the buffer.
    pub fn dispatch(&mut self) -> usize {
        let events = std::mem::take(&mut self.buffer);
        let delivered = events.len();
        for event in &events {
            if let Some(subscribers) = self.subscribers.get_mut(&event.channel) {
                for subscriber in subscribers.iter_mut() {
                    let start = Instant::now();
                    subscriber(event);
                    let elapsed_us = start.elapsed().as_micros() as u64;
                    if elapsed_us > self.config.slow_handler_threshold_us {
                        self.slow_handler_count += 1;
                    }
                }
            }
        }
        if delivered > 0 {
            self.telemetry.record_counters(
                "eventBus",
                &[
                    ("delivered", delivered as f64),
                    ("softLimitHits", self.soft_limit_hits as f64),
                    ("overflowDrops", self.overflow_drops as f64),
                    ("slowHandlers", self.slow_handler_count as f64),
                ],
            );
        }
        delivered
    }

    /// Events currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Cumulative events dropped at the hard limit.
    pub fn overflow_drops(&self) -> u64 {
        self.overflow_drops
    }

    /// Cumulative slow-handler observations.
    pub fn slow_handler_count(&self) -> u64 {
        self.slow_handler_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_core::telemetry::{CountingTelemetry, NoopTelemetry};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bus(soft: usize, hard: usize) -> EventBus {
        EventBus::new(
            EventBusConfig {
                soft_limit: soft,
                hard_limit: hard,
                slow_handler_threshold_us: 2_000,
            },
            Arc::new(NoopTelemetry),
        )
    }

    #[test]
    fn publish_and_dispatch_in_order() {
        let mut b = bus(8, 16);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        b.subscribe(
            "progression",
            Box::new(move |event: &BusEvent| {
                sink.lock().unwrap().push((event.dispatch_order, event.name.clone()));
            }),
        );

        let r1 = b.publish("progression", "first", Step(1), json!({}));
        let r2 = b.publish("progression", "second", Step(1), json!({}));
        assert!(r1.accepted && r2.accepted);
        assert!(r1.dispatch_order < r2.dispatch_order);

        assert_eq!(b.dispatch(), 2);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].0 < seen[1].0);
        assert_eq!(seen[0].1, "first");
    }

    #[test]
    fn subscribers_only_see_their_channel() {
        let mut b = bus(8, 16);
        let count = Arc::new(AtomicUsize::new(0));
        let sink = count.clone();
        b.subscribe(
            "prestige",
            Box::new(move |_| {
                sink.fetch_add(1, Ordering::SeqCst);
            }),
        );

        b.publish("progression", "x", Step(0), json!({}));
        b.publish("prestige", "y", Step(0), json!({}));
        b.dispatch();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn soft_limit_keeps_publishing_with_warning() {
        let telemetry = Arc::new(CountingTelemetry::default());
        let mut b = EventBus::new(
            EventBusConfig {
                soft_limit: 2,
                hard_limit: 8,
                slow_handler_threshold_us: 2_000,
            },
            telemetry.clone(),
        );
        b.publish("c", "a", Step(0), json!({}));
        b.publish("c", "b", Step(0), json!({}));
        let receipt = b.publish("c", "c", Step(0), json!({}));
        assert!(receipt.accepted);
        assert_eq!(receipt.state, PublishState::SoftLimited);
        assert!(receipt.soft_limit_active);
        assert_eq!(b.buffered(), 3);
    }

    #[test]
    fn hard_limit_drops_with_overflow_counter() {
        let mut b = bus(1, 2);
        b.publish("c", "a", Step(0), json!({}));
        b.publish("c", "b", Step(0), json!({}));
        let receipt = b.publish("c", "dropped", Step(0), json!({}));
        assert!(!receipt.accepted);
        assert_eq!(receipt.state, PublishState::Overflowed);
        assert_eq!(receipt.remaining_capacity, 0);
        assert_eq!(b.overflow_drops(), 1);
        // The dropped event never reaches subscribers.
        assert_eq!(b.dispatch(), 2);
    }

    #[test]
    fn receipt_reports_remaining_capacity() {
        let mut b = bus(8, 10);
        let receipt = b.publish("c", "a", Step(0), json!({}));
        assert_eq!(receipt.buffer_size, 1);
        assert_eq!(receipt.remaining_capacity, 9);
    }

    #[test]
    fn dispatch_clears_the_buffer() {
        let mut b = bus(8, 16);
        b.publish("c", "a", Step(0), json!({}));
        b.dispatch();
        assert_eq!(b.buffered(), 0);
        assert_eq!(b.dispatch(), 0);
    }

    #[test]
    fn slow_handler_counter_increments() {
        let mut b = EventBus::new(
            EventBusConfig {
                soft_limit: 8,
                hard_limit: 16,
                slow_handler_threshold_us: 0,
            },
            Arc::new(NoopTelemetry),
        );
        b.subscribe(
            "c",
            Box::new(|_| {
                std::thread::sleep(std::time::Duration::from_micros(50));
            }),
        );
        b.publish("c", "a", Step(0), json!({}));
        b.dispatch();
        assert_eq!(b.slow_handler_count(), 1);
    }
}
