use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex, RwLock, watch};

use crate::bus::{DEFAULT_PARTITION, MessageBus};
use crate::message::{BusMessage, ConsumerEvent, ConsumerStream, StartOffset, Subscription};
use crate::{BusError, Result};

#[derive(Debug, Default)]
struct LogState {
    base_offset: i64,
    messages: VecDeque<BusMessage>,
}

impl LogState {
    fn latest(&self) -> i64 {
        self.base_offset + self.messages.len() as i64
    }

    fn get(&self, offset: i64) -> Option<&BusMessage> {
        if offset < self.base_offset {
            return None;
        }
        self.messages.get((offset - self.base_offset) as usize)
    }
}

/// A single partition: an append-only log plus a watermark consumers wait on.
#[derive(Debug)]
struct PartitionLog {
    state: RwLock<LogState>,
    latest: watch::Sender<i64>,
}

impl PartitionLog {
    fn new() -> Self {
        let (latest, _) = watch::channel(0);
        Self {
            state: RwLock::new(LogState::default()),
            latest,
        }
    }
}

/// In-memory message bus for testing and single-process deployments.
///
/// Each topic partition is an ordered log with stable offsets. Consumers
/// read independently from any retained offset, the way a Kafka partition
/// consumer does. Retention can be emulated with [`truncate_before`].
///
/// [`truncate_before`]: InMemoryMessageBus::truncate_before
#[derive(Debug, Clone, Default)]
pub struct InMemoryMessageBus {
    logs: Arc<Mutex<HashMap<(String, i32), Arc<PartitionLog>>>>,
    failing_topics: Arc<RwLock<HashSet<String>>>,
}

impl InMemoryMessageBus {
    /// Creates a new empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    async fn partition_log(&self, topic: &str, partition: i32) -> Arc<PartitionLog> {
        let mut logs = self.logs.lock().await;
        logs.entry((topic.to_string(), partition))
            .or_insert_with(|| Arc::new(PartitionLog::new()))
            .clone()
    }

    /// Makes every publish to `topic` fail until called again with `false`.
    pub async fn set_fail_on_publish(&self, topic: &str, fail: bool) {
        let mut failing = self.failing_topics.write().await;
        if fail {
            failing.insert(topic.to_string());
        } else {
            failing.remove(topic);
        }
    }

    /// Drops every message below `offset` from the default partition of `topic`.
    pub async fn truncate_before(&self, topic: &str, offset: i64) {
        let log = self.partition_log(topic, DEFAULT_PARTITION).await;
        let mut state = log.state.write().await;
        let target = offset.min(state.latest());
        while state.base_offset < target {
            state.messages.pop_front();
            state.base_offset += 1;
        }
        tracing::debug!(topic, earliest = state.base_offset, "partition truncated");
    }

    /// Returns every retained message of the default partition of `topic`.
    pub async fn messages(&self, topic: &str) -> Vec<BusMessage> {
        let log = self.partition_log(topic, DEFAULT_PARTITION).await;
        let state = log.state.read().await;
        state.messages.iter().cloned().collect()
    }

    /// Returns the retained messages of `topic` carrying `key`.
    pub async fn messages_with_key(&self, topic: &str, key: &str) -> Vec<BusMessage> {
        self.messages(topic)
            .await
            .into_iter()
            .filter(|m| m.key == key)
            .collect()
    }
}

enum Poll {
    Ready(BusMessage),
    Trimmed { earliest: i64, latest: i64 },
    Wait,
}

struct Cursor {
    log: Arc<PartitionLog>,
    changes: watch::Receiver<i64>,
    topic: String,
    partition: i32,
    next: i64,
}

fn cursor_stream(cursor: Cursor) -> ConsumerStream {
    Box::pin(futures_util::stream::unfold(
        cursor,
        |mut cursor| async move {
            loop {
                let poll = {
                    let state = cursor.log.state.read().await;
                    if cursor.next < state.base_offset {
                        Poll::Trimmed {
                            earliest: state.base_offset,
                            latest: state.latest(),
                        }
                    } else if let Some(message) = state.get(cursor.next) {
                        Poll::Ready(message.clone())
                    } else {
                        Poll::Wait
                    }
                };

                match poll {
                    Poll::Ready(message) => {
                        cursor.next += 1;
                        return Some((ConsumerEvent::Message(message), cursor));
                    }
                    Poll::Trimmed { earliest, latest } => {
                        // Retention overtook the reader; report it and skip ahead.
                        let err = BusError::OffsetOutOfRange {
                            topic: cursor.topic.clone(),
                            partition: cursor.partition,
                            offset: cursor.next,
                            earliest,
                            latest,
                        };
                        cursor.next = earliest;
                        return Some((ConsumerEvent::Error(err), cursor));
                    }
                    Poll::Wait => {
                        if cursor.changes.changed().await.is_err() {
                            return None;
                        }
                    }
                }
            }
        },
    ))
}

#[async_trait]
impl MessageBus for InMemoryMessageBus {
    async fn publish(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<i64> {
        if self.failing_topics.read().await.contains(topic) {
            return Err(BusError::PublishFailed {
                topic: topic.to_string(),
                reason: "broker unavailable".to_string(),
            });
        }

        let log = self.partition_log(topic, DEFAULT_PARTITION).await;
        let mut state = log.state.write().await;
        let offset = state.latest();
        state.messages.push_back(BusMessage {
            topic: topic.to_string(),
            partition: DEFAULT_PARTITION,
            offset,
            key: key.to_string(),
            value: payload,
            timestamp: Utc::now(),
        });
        let latest = state.latest();
        drop(state);

        log.latest.send_replace(latest);
        metrics::counter!("bus_messages_published_total", "topic" => topic.to_string())
            .increment(1);
        tracing::debug!(topic, key, offset, "message published");

        Ok(offset)
    }

    async fn subscribe(
        &self,
        topic: &str,
        partition: i32,
        start: StartOffset,
    ) -> Result<Subscription> {
        let log = self.partition_log(topic, partition).await;
        let start_offset = {
            let state = log.state.read().await;
            match start {
                StartOffset::Earliest => state.base_offset,
                StartOffset::At(offset) => {
                    if offset < state.base_offset || offset > state.latest() {
                        return Err(BusError::OffsetOutOfRange {
                            topic: topic.to_string(),
                            partition,
                            offset,
                            earliest: state.base_offset,
                            latest: state.latest(),
                        });
                    }
                    offset
                }
            }
        };

        let changes = log.latest.subscribe();
        let stream = cursor_stream(Cursor {
            log,
            changes,
            topic: topic.to_string(),
            partition,
            next: start_offset,
        });

        Ok(Subscription {
            start_offset,
            stream,
        })
    }

    async fn earliest_offset(&self, topic: &str, partition: i32) -> Result<i64> {
        let log = self.partition_log(topic, partition).await;
        let state = log.state.read().await;
        Ok(state.base_offset)
    }

    async fn latest_offset(&self, topic: &str, partition: i32) -> Result<i64> {
        let log = self.partition_log(topic, partition).await;
        let state = log.state.read().await;
        Ok(state.latest())
    }
}
