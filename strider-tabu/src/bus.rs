// Copyright (C) 2024 Strider Robotics.
// All rights reserved.
//
// This software may be modified and distributed under the terms
// of the included license.  See the LICENSE file for details.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::stats::Stats;
use crate::{AddressKind, Message, TOPIC_HELP, TOPIC_TRANSFER};

/// Longest the registry lock may be contended before the process is
/// considered wedged. The lock is never held across handler
/// invocation, so a wait this long means reentrant deadlock.
const LOCK_PATIENCE: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub enum SendError {
    /// No acknowledgement arrived for a transfer chunk.
    AckTimeout,
    /// The bus transport is gone.
    Closed,
}

impl std::error::Error for SendError {}

impl std::fmt::Display for SendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AckTimeout => write!(f, "no acknowledgement for transfer chunk"),
            Self::Closed => write!(f, "bus transport closed"),
        }
    }
}

/// Tuning for the chunked big-message sub-protocol.
#[derive(Debug, Clone, Copy)]
pub struct TransferPolicy {
    /// Largest payload sent as a single line; bigger payloads are
    /// chunked. Bounded by the transport's line buffer.
    pub chunk_size: usize,
    /// How long to wait for a chunk acknowledgement.
    pub ack_timeout: Duration,
    /// Total sends of one chunk before giving up.
    pub ack_attempts: u32,
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self {
            chunk_size: 256,
            ack_timeout: Duration::from_secs(1),
            ack_attempts: 3,
        }
    }
}

type TopicHandler = dyn Fn(Message) + Send + Sync;
type ReplyHandler = Box<dyn FnOnce(Message, Message) + Send>;

/// Chunk accumulator for one inbound transfer.
struct Transfer {
    text: String,
    address: String,
    /// Id of the last chunk applied. A resent chunk (its ack was lost
    /// in transit) carries the same id and must not be applied twice.
    last_segment: String,
}

#[derive(Default)]
struct Registry {
    topics: Vec<(String, Arc<TopicHandler>)>,
    replies: Vec<(Message, ReplyHandler)>,
    orphans: Vec<Message>,
    transfers: HashMap<String, Transfer>,
    help: serde_json::Map<String, Value>,
    stats: Stats,
}

struct Shared {
    registry: Mutex<Registry>,
    outbound: mpsc::UnboundedSender<String>,
    policy: TransferPolicy,
}

/// A tabu message bus.
///
/// The bus owns its topic, reply and orphan registries and a handle to
/// the outbound line writer. Clones share the same registries, so a
/// handler can capture a clone to publish or subscribe from inside a
/// dispatch.
///
/// Registry mutation happens under a single lock; handler invocation
/// always happens outside it, on a snapshot of the matching listeners.
#[derive(Clone)]
pub struct Bus {
    shared: Arc<Shared>,
}

impl Bus {
    /// Construct a bus writing outbound lines to the given transport.
    ///
    /// Spawns the writer task, so this must be called within a tokio
    /// runtime. The reserved "file-transfer" and "help" topics are
    /// installed here.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_policy(writer, TransferPolicy::default())
    }

    /// Construct a bus with a custom transfer policy.
    pub fn with_policy<W>(writer: W, policy: TransferPolicy) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (outbound, mut rx) = mpsc::unbounded_channel::<String>();

        // A single writer task serializes all outbound lines so two
        // senders can never interleave partial lines.
        tokio::spawn(async move {
            let mut writer = writer;
            while let Some(mut line) = rx.recv().await {
                line.push('\n');
                if let Err(err) = writer.write_all(line.as_bytes()).await {
                    error!("serial write failed: {}", err);
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let bus = Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(Registry::default()),
                outbound,
                policy,
            }),
        };
        bus.install_builtins();
        bus
    }

    /// Acquire the registry lock with a bounded wait.
    ///
    /// Failure to acquire within [`LOCK_PATIENCE`] indicates reentrant
    /// deadlock or starvation and is unrecoverable; the process aborts
    /// after logging rather than corrupting dispatch state.
    fn registry(&self) -> MutexGuard<'_, Registry> {
        let deadline = Instant::now() + LOCK_PATIENCE;
        loop {
            match self.shared.registry.try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(_)) => {
                    error!("bus registry lock poisoned, aborting");
                    std::process::abort();
                }
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        error!(
                            "bus registry lock not acquired within {:?}, aborting",
                            LOCK_PATIENCE
                        );
                        std::process::abort();
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
            }
        }
    }

    /// Snapshot of the bus line statistics.
    pub fn stats(&self) -> Stats {
        self.registry().stats.clone()
    }

    /// Construct and send an event message. Fire and forget.
    pub fn publish(&self, topic: impl Into<String>, content: Value) -> Message {
        let msg = Message::event(topic, content);
        self.send(&msg);
        msg
    }

    /// Construct and send a reply to an earlier message.
    pub fn reply(&self, original: &Message, content: Value) -> Message {
        let msg = Message::reply_to(original, content);
        self.send(&msg);
        msg
    }

    /// Construct and send an event, chunking the payload when it
    /// exceeds the single-line safe size.
    pub async fn publish_big(
        &self,
        topic: impl Into<String>,
        content: Value,
    ) -> Result<Message, SendError> {
        let msg = Message::event(topic, content);
        self.send_sized(&msg).await?;
        Ok(msg)
    }

    /// Construct and send a reply, chunking the payload when it
    /// exceeds the single-line safe size.
    pub async fn reply_big(
        &self,
        original: &Message,
        content: Value,
    ) -> Result<Message, SendError> {
        let msg = Message::reply_to(original, content);
        self.send_sized(&msg).await?;
        Ok(msg)
    }

    /// Register a listener for a topic. The listener runs on the
    /// dispatch task; it must not block.
    pub fn subscribe<F>(&self, topic: impl Into<String>, listener: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.registry().topics.push((topic.into(), Arc::new(listener)));
    }

    /// Register a listener for a topic that runs on its own task per
    /// invocation, so it never stalls the dispatch loop.
    pub fn subscribe_async<F>(&self, topic: impl Into<String>, listener: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let listener = Arc::new(listener);
        self.subscribe(topic, move |msg| {
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { listener(msg) });
        });
    }

    /// Register a one-shot listener for replies to `awaiting`.
    ///
    /// If a matching reply already arrived and sits in the orphan
    /// list, the listener fires synchronously here and the orphan is
    /// consumed.
    pub fn on_reply<F>(&self, awaiting: &Message, listener: F)
    where
        F: FnOnce(Message, Message) + Send + 'static,
    {
        let mut registry = self.registry();
        if let Some(index) = registry
            .orphans
            .iter()
            .position(|orphan| orphan.address == awaiting.id)
        {
            let reply = registry.orphans.remove(index);
            drop(registry);
            listener(reply, awaiting.clone());
        } else {
            registry.replies.push((awaiting.clone(), Box::new(listener)));
        }
    }

    /// Publish an event and register a one-shot reply listener for it.
    pub fn request<F>(&self, topic: impl Into<String>, content: Value, on_reply: F) -> Message
    where
        F: FnOnce(Message, Message) + Send + 'static,
    {
        let msg = self.publish(topic, content);
        self.on_reply(&msg, on_reply);
        msg
    }

    /// Register a request handler for a topic.
    ///
    /// The handler's return value is sent back as a reply to the
    /// triggering message, chunked when necessary. The handler runs on
    /// its own task.
    pub fn serve<F, Fut>(&self, topic: impl Into<String>, handler: F)
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Value> + Send + 'static,
    {
        let bus = self.clone();
        let handler = Arc::new(handler);
        self.subscribe(topic, move |msg| {
            let bus = bus.clone();
            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                let value = handler(msg.clone()).await;
                if let Err(err) = bus.reply_big(&msg, value).await {
                    warn!("failed to deliver reply for '{}': {}", msg.address, err);
                }
            });
        });
    }

    /// Attach a help descriptor array to a topic.
    ///
    /// The registry is served on the reserved "help" topic for the
    /// operator console.
    pub fn help(&self, topic: impl Into<String>, descriptors: Value) {
        self.registry().help.insert(topic.into(), descriptors);
    }

    /// Parse and route one line of serial input.
    ///
    /// Malformed lines are logged and dropped; they never unwind past
    /// the dispatch loop and no reply is sent for them.
    pub fn handle_line(&self, line: &str) {
        let msg = {
            let mut registry = self.registry();
            registry.stats.rx_count += 1;
            match Message::parse(line) {
                Ok(msg) => msg,
                Err(err) => {
                    registry.stats.rx_failure += 1;
                    warn!("dropping line: {}", err);
                    return;
                }
            }
        };
        self.route(msg);
    }

    /// Read lines from the transport and dispatch each until EOF.
    pub async fn run<R>(&self, reader: R) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            self.handle_line(&line);
        }
        debug!("serial input closed");
        Ok(())
    }

    fn route(&self, msg: Message) {
        match msg.kind {
            AddressKind::Event => self.dispatch_event(msg),
            AddressKind::Reply => self.dispatch_reply(msg),
        }
    }

    fn dispatch_event(&self, msg: Message) {
        let matching: Vec<(String, Arc<TopicHandler>)> = {
            let registry = self.registry();
            registry
                .topics
                .iter()
                .filter(|(topic, _)| *topic == msg.address)
                .map(|(topic, listener)| (topic.clone(), Arc::clone(listener)))
                .collect()
        };

        if matching.is_empty() {
            trace!("no listener for topic '{}'", msg.address);
        }

        // A panicking listener must not take down its siblings or the
        // dispatch loop.
        for (topic, listener) in matching {
            let event = msg.clone();
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("caught panic in listener for '{}'", topic);
            }
        }
    }

    fn dispatch_reply(&self, msg: Message) {
        let matching: Vec<(Message, ReplyHandler)> = {
            let mut registry = self.registry();
            let mut matching = Vec::new();
            let mut index = 0;
            while index < registry.replies.len() {
                if registry.replies[index].0.id == msg.address {
                    matching.push(registry.replies.remove(index));
                } else {
                    index += 1;
                }
            }
            if matching.is_empty() {
                registry.orphans.push(msg.clone());
                registry.stats.orphaned += 1;
            }
            matching
        };

        for (original, listener) in matching {
            let reply = msg.clone();
            if catch_unwind(AssertUnwindSafe(move || listener(reply, original))).is_err() {
                error!("caught panic in reply handler for '{}'", msg.address);
            }
        }
    }

    fn send(&self, msg: &Message) {
        self.say(msg.text());
    }

    fn say(&self, line: String) {
        let mut registry = self.registry();
        registry.stats.tx_count += 1;
        if self.shared.outbound.send(line).is_err() {
            registry.stats.tx_failure += 1;
            warn!("serial transport closed, dropping outbound line");
        }
    }

    async fn send_sized(&self, msg: &Message) -> Result<(), SendError> {
        if msg.content.to_string().len() <= self.shared.policy.chunk_size {
            self.send(msg);
            Ok(())
        } else {
            self.send_chunked(msg).await
        }
    }

    /// Send a message in chunks over the "file-transfer" topic.
    ///
    /// Each chunk is acknowledged by the receiver before the next is
    /// sent, so the remote line buffer can never overflow. Blocks the
    /// caller for the duration of the transfer.
    async fn send_chunked(&self, msg: &Message) -> Result<(), SendError> {
        let data = msg.content.to_string();
        let chunk_size = self.shared.policy.chunk_size.max(1);

        let mut position = 0;
        while position < data.len() {
            let mut end = (position + chunk_size).min(data.len());
            while !data.is_char_boundary(end) {
                end -= 1;
            }
            let segment = Message::event(
                TOPIC_TRANSFER,
                json!({
                    "origId": msg.id,
                    "origAddr": msg.sigil_address(),
                    "nextData": &data[position..end],
                    "done": end == data.len(),
                }),
            );
            self.send_acknowledged(&segment).await?;
            position = end;
        }
        Ok(())
    }

    /// Send one chunk and wait for its acknowledgement, resending the
    /// same segment on timeout up to the policy's attempt budget.
    async fn send_acknowledged(&self, segment: &Message) -> Result<(), SendError> {
        let policy = self.shared.policy;
        for attempt in 1..=policy.ack_attempts {
            let (ack_tx, ack_rx) = oneshot::channel();
            self.on_reply(segment, move |reply, _| {
                let _ = ack_tx.send(reply);
            });
            self.send(segment);

            match tokio::time::timeout(policy.ack_timeout, ack_rx).await {
                Ok(Ok(_)) => return Ok(()),
                Ok(Err(_)) => return Err(SendError::Closed),
                Err(_) => {
                    // The listener will never fire; drop it so the
                    // registry does not grow with every failed attempt.
                    self.registry()
                        .replies
                        .retain(|(awaiting, _)| awaiting.id != segment.id);
                    debug!(
                        "no ack for transfer chunk (attempt {}/{})",
                        attempt, policy.ack_attempts
                    );
                }
            }
        }
        Err(SendError::AckTimeout)
    }

    fn install_builtins(&self) {
        let bus = self.clone();
        self.subscribe(TOPIC_TRANSFER, move |msg| bus.accept_chunk(msg));

        let bus = self.clone();
        self.serve(TOPIC_HELP, move |_| {
            let bus = bus.clone();
            async move { Value::Object(bus.registry().help.clone()) }
        });
    }

    /// Handle one inbound transfer chunk: accumulate, acknowledge, and
    /// on the final chunk reconstruct the original envelope and route
    /// it through the normal dispatch path.
    fn accept_chunk(&self, msg: Message) {
        let (orig_id, orig_addr, next_data, done) = match (
            msg.string("origId"),
            msg.string("origAddr"),
            msg.string("nextData"),
            msg.boolean("done"),
        ) {
            (Some(orig_id), Some(orig_addr), Some(next_data), Some(done)) => {
                (orig_id.to_owned(), orig_addr.to_owned(), next_data, done)
            }
            _ => {
                warn!("malformed transfer chunk, dropping");
                return;
            }
        };

        let completed = {
            let mut registry = self.registry();
            let transfer = registry
                .transfers
                .entry(orig_id.clone())
                .or_insert_with(|| Transfer {
                    text: String::new(),
                    address: orig_addr,
                    last_segment: String::new(),
                });
            let duplicate = transfer.last_segment == msg.id;
            if !duplicate {
                transfer.last_segment.clone_from(&msg.id);
                transfer.text.push_str(next_data);
            }
            if done && !duplicate {
                registry.transfers.remove(&orig_id)
            } else {
                None
            }
        };

        // Always acknowledge; the sender blocks on this before the
        // next chunk.
        self.reply(&msg, json!({}));

        if let Some(transfer) = completed {
            let kind = match transfer.address.chars().next() {
                Some('=') => AddressKind::Event,
                Some('@') => AddressKind::Reply,
                _ => {
                    warn!("transfer for '{}' has no address kind", orig_id);
                    return;
                }
            };
            let content = match serde_json::from_str(&transfer.text) {
                Ok(content) => content,
                Err(err) => {
                    warn!("reassembled transfer '{}' is not valid JSON: {}", orig_id, err);
                    return;
                }
            };
            self.route(Message {
                kind,
                address: transfer.address[1..].to_owned(),
                id: orig_id,
                content,
            });
        }
    }
}
