//! Per-bot log history fed by the `log/{botId}` topics.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use botdash_core::{log_topic, BotId, LogEntry};
use botdash_transport::{EventChannel, EventHandler, SubscriptionId};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, trace};

const FEED_CAPACITY: usize = 1024;

/// Bounded FIFO buffers keyed by bot id.
#[derive(Debug)]
struct LogBook {
    capacity: usize,
    buffers: HashMap<BotId, VecDeque<LogEntry>>,
}

impl LogBook {
    fn ensure(&mut self, bot_id: &str) {
        if !self.buffers.contains_key(bot_id) {
            self.buffers
                .insert(bot_id.to_string(), VecDeque::with_capacity(self.capacity.min(64)));
        }
    }

    fn push(&mut self, bot_id: &str, entry: LogEntry) {
        self.ensure(bot_id);
        if let Some(buffer) = self.buffers.get_mut(bot_id) {
            while buffer.len() >= self.capacity {
                buffer.pop_front();
            }
            buffer.push_back(entry);
        }
    }
}

struct Shared {
    book: RwLock<LogBook>,
    feed: broadcast::Sender<LogEntry>,
}

impl Shared {
    fn add(&self, entry: LogEntry) -> bool {
        let Some(bot_id) = entry.bot().map(str::to_string) else {
            trace!("dropping log entry without bot id");
            return false;
        };
        self.book.write().push(&bot_id, entry.clone());
        // Nobody listening is fine.
        let _ = self.feed.send(entry);
        true
    }
}

/// Collects log lines per bot and owns the `log/{botId}` subscriptions.
pub struct LogAggregator {
    channel: Arc<dyn EventChannel>,
    shared: Arc<Shared>,
    subscriptions: Mutex<HashMap<String, SubscriptionId>>,
}

impl LogAggregator {
    pub fn new(channel: Arc<dyn EventChannel>, capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            channel,
            shared: Arc::new(Shared {
                book: RwLock::new(LogBook {
                    capacity: capacity.max(1),
                    buffers: HashMap::new(),
                }),
                feed,
            }),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.book.read().capacity
    }

    /// Ensure a buffer per bot and hold exactly one subscription per `log/{botId}` topic.
    pub fn attach(&self, bot_ids: &[BotId]) {
        let mut subscriptions = self.subscriptions.lock();
        for bot_id in bot_ids {
            self.shared.book.write().ensure(bot_id);
            let topic = log_topic(bot_id);
            if let Some(previous) = subscriptions.remove(&topic) {
                self.channel.unsubscribe(previous);
            }
            let shared = self.shared.clone();
            let handler: EventHandler = Arc::new(move |payload: &Value| {
                shared.add(LogEntry::from(payload.clone()));
            });
            let id = self.channel.subscribe(&topic, handler);
            subscriptions.insert(topic, id);
            debug!(bot = %bot_id, "attached log stream");
        }
    }

    /// Append an entry to its bot's buffer. Entries without a bot id are ignored.
    pub fn add_log(&self, entry: LogEntry) -> bool {
        self.shared.add(entry)
    }

    /// Remove the subscriptions; history is kept.
    pub fn detach(&self, bot_ids: &[BotId]) {
        let mut subscriptions = self.subscriptions.lock();
        for bot_id in bot_ids {
            if let Some(id) = subscriptions.remove(&log_topic(bot_id)) {
                self.channel.unsubscribe(id);
                debug!(bot = %bot_id, "detached log stream");
            }
        }
    }

    /// Full history for a bot, oldest first.
    #[must_use]
    pub fn logs(&self, bot_id: &str) -> Vec<LogEntry> {
        self.shared
            .book
            .read()
            .buffers
            .get(bot_id)
            .map(|buffer| buffer.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Last `n` entries for a bot, oldest first.
    #[must_use]
    pub fn tail(&self, bot_id: &str, n: usize) -> Vec<LogEntry> {
        let book = self.shared.book.read();
        match book.buffers.get(bot_id) {
            Some(buffer) => buffer
                .iter()
                .skip(buffer.len().saturating_sub(n))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn len(&self, bot_id: &str) -> usize {
        self.shared
            .book
            .read()
            .buffers
            .get(bot_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    #[must_use]
    pub fn has_buffer(&self, bot_id: &str) -> bool {
        self.shared.book.read().buffers.contains_key(bot_id)
    }

    /// Bots with a live subscription, sorted.
    #[must_use]
    pub fn attached(&self) -> Vec<BotId> {
        let mut bots: Vec<BotId> = self
            .subscriptions
            .lock()
            .keys()
            .filter_map(|topic| topic.strip_prefix("log/").map(str::to_string))
            .collect();
        bots.sort();
        bots
    }

    /// Live feed of every accepted entry.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.shared.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botdash_test_utils::InMemoryChannel;
    use serde_json::json;

    fn aggregator(capacity: usize) -> (Arc<InMemoryChannel>, LogAggregator) {
        let channel = InMemoryChannel::new();
        let logs = LogAggregator::new(channel.clone(), capacity);
        (channel, logs)
    }

    #[test]
    fn attach_is_idempotent_per_topic() {
        let (channel, logs) = aggregator(10);
        let bots = vec!["bot1".to_string(), "bot2".to_string()];
        logs.attach(&bots);
        logs.attach(&bots);
        logs.attach(&bots[..1]);
        assert_eq!(channel.listener_count("log/bot1"), 1);
        assert_eq!(channel.listener_count("log/bot2"), 1);
        assert_eq!(logs.attached(), bots);
        assert!(logs.has_buffer("bot2"));
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let (_, logs) = aggregator(500);
        for n in 0..501 {
            logs.add_log(LogEntry::new("bot1", format!("line {n}")));
        }
        let history = logs.logs("bot1");
        assert_eq!(history.len(), 500);
        assert_eq!(history[0].message, "line 1");
        assert_eq!(history[499].message, "line 500");
        let tail = logs.tail("bot1", 2);
        assert_eq!(tail[0].message, "line 499");
        assert_eq!(tail[1].message, "line 500");
    }

    #[test]
    fn entries_without_bot_id_are_dropped() {
        let (_, logs) = aggregator(10);
        let mut entry = LogEntry::new("bot1", "orphan");
        entry.bot_id = None;
        assert!(!logs.add_log(entry.clone()));
        entry.bot_id = Some(String::new());
        assert!(!logs.add_log(entry));
        assert_eq!(logs.len("bot1"), 0);
        assert!(!logs.has_buffer("bot1"));
    }

    #[test]
    fn topic_events_reach_the_buffer() {
        let (channel, logs) = aggregator(10);
        logs.attach(&["bot1".to_string()]);
        channel.deliver(
            "log/bot1",
            json!({ "timestamp": 1_700_000_000_000_i64, "message": "hello", "source": "engine", "sessionId": "s1", "botId": "bot1" }),
        );
        channel.deliver("log/bot1", json!("not an entry"));
        channel.deliver("log/bot1", json!({ "message": "legacy", "botid": "bot1" }));
        let history = logs.logs("bot1");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].message, "hello");
        assert_eq!(history[1].message, "legacy");
    }

    #[test]
    fn odd_field_shapes_still_reach_the_buffer() {
        let (channel, logs) = aggregator(10);
        logs.attach(&["bot1".to_string()]);
        let payloads = [
            json!({ "timestamp": 1_700_000_000_123.5, "message": "fractional", "botId": "bot1" }),
            json!({ "message": { "k": 1 }, "botId": "bot1" }),
            json!({ "message": "numeric source", "source": 3, "botId": "bot1" }),
            json!({ "message": "both spellings", "botId": "bot1", "botid": "bot1" }),
            json!({ "message": "no id at all" }),
        ];
        for payload in payloads {
            channel.deliver("log/bot1", payload);
        }
        let history = logs.logs("bot1");
        assert_eq!(history.len(), 4);
        assert_eq!(history[0].message, "fractional");
        assert_eq!(history[1].message, "{\"k\":1}");
        assert_eq!(history[2].source.as_deref(), Some("3"));
        assert_eq!(history[3].message, "both spellings");
    }

    #[test]
    fn detach_keeps_history() {
        let (channel, logs) = aggregator(10);
        let bots = vec!["bot1".to_string()];
        logs.attach(&bots);
        channel.deliver("log/bot1", json!({ "message": "kept", "botId": "bot1" }));
        logs.detach(&bots);
        assert_eq!(channel.listener_count("log/bot1"), 0);
        channel.deliver("log/bot1", json!({ "message": "ignored", "botId": "bot1" }));
        assert_eq!(logs.len("bot1"), 1);
        assert!(logs.attached().is_empty());
    }

    #[tokio::test]
    async fn feed_publishes_accepted_entries() {
        let (_, logs) = aggregator(10);
        let mut feed = logs.subscribe();
        logs.add_log(LogEntry::new("bot7", "streamed"));
        let entry = feed.recv().await.expect("entry");
        assert_eq!(entry.bot(), Some("bot7"));
    }
}
