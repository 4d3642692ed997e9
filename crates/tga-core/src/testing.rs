//! In-memory fakes for the ports, shared by the unit tests of this crate.

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream;

use crate::{
    ports::{ArtifactSink, MessageSource, Notifier, RawMessage, RawMessageStream},
    Error, Result,
};

pub fn raw(id: i64, ts: Option<DateTime<Utc>>, text: Option<&str>) -> RawMessage {
    RawMessage {
        timestamp: ts,
        sender_id: Some(id * 100),
        text: text.map(str::to_string),
        id,
    }
}

#[derive(Default)]
pub struct FakeSource {
    channels: HashMap<String, Vec<RawMessage>>,
    /// channel -> number of good messages before the stream errors out
    broken: HashMap<String, usize>,
    /// channel -> remaining `stream_messages` calls that fail before succeeding
    flaky: HashMap<String, AtomicUsize>,
    stalled: HashSet<String>,
    connected: AtomicBool,
    connects: AtomicUsize,
    log: Arc<Mutex<Vec<String>>>,
}

impl FakeSource {
    pub fn with_channel(mut self, name: &str, messages: Vec<RawMessage>) -> Self {
        self.channels.insert(name.to_string(), messages);
        self
    }

    pub fn with_broken_channel(mut self, name: &str, good: usize) -> Self {
        let msgs = (0..good as i64)
            .map(|i| raw(i, Some(Utc::now()), Some("ok")))
            .collect();
        self.channels.insert(name.to_string(), msgs);
        self.broken.insert(name.to_string(), good);
        self
    }

    pub fn with_flaky_channel(mut self, name: &str, failures: usize, messages: Vec<RawMessage>) -> Self {
        self.channels.insert(name.to_string(), messages);
        self.flaky
            .insert(name.to_string(), AtomicUsize::new(failures));
        self
    }

    pub fn with_stalled_channel(mut self, name: &str) -> Self {
        self.channels.insert(name.to_string(), vec![]);
        self.stalled.insert(name.to_string());
        self
    }

    pub fn connect_calls(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// `start:<channel>` / `end:<channel>` events in the order they happened.
    pub fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn stream_calls(&self, channel: &str) -> usize {
        let needle = format!("start:{channel}");
        self.log().iter().filter(|e| **e == needle).count()
    }
}

#[async_trait]
impl MessageSource for FakeSource {
    async fn connect(&self) -> Result<()> {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn stream_messages(&self, channel: &str) -> Result<RawMessageStream> {
        self.log.lock().unwrap().push(format!("start:{channel}"));

        let Some(messages) = self.channels.get(channel) else {
            return Err(Error::ChannelUnavailable(channel.to_string()));
        };

        if let Some(left) = self.flaky.get(channel) {
            if left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::SourceTransport("connection reset".to_string()));
            }
        }

        if self.stalled.contains(channel) {
            return Ok(Box::pin(stream::pending::<Result<RawMessage>>()));
        }

        let mut items: Vec<Result<RawMessage>> = messages.iter().cloned().map(Ok).collect();
        if self.broken.contains_key(channel) {
            items.push(Err(Error::External("stream interrupted".to_string())));
        }

        let log = self.log.clone();
        let name = channel.to_string();
        let s = stream::unfold((items.into_iter(), log, name), |(mut it, log, name)| async move {
            tokio::task::yield_now().await;
            match it.next() {
                Some(item) => Some((item, (it, log, name))),
                None => {
                    log.lock().unwrap().push(format!("end:{name}"));
                    None
                }
            }
        });
        Ok(Box::pin(s))
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct FakeSink {
    container: String,
    fail_ensure: bool,
    ensure_calls: AtomicUsize,
    fail_keys: HashSet<String>,
    fail_next_puts: AtomicUsize,
    uploads: Mutex<Vec<(String, String)>>,
}

impl Default for FakeSink {
    fn default() -> Self {
        Self {
            container: "archive-bucket".to_string(),
            fail_ensure: false,
            ensure_calls: AtomicUsize::new(0),
            fail_keys: HashSet::new(),
            fail_next_puts: AtomicUsize::new(0),
            uploads: Mutex::new(vec![]),
        }
    }
}

impl FakeSink {
    pub fn unavailable() -> Self {
        Self {
            fail_ensure: true,
            ..Self::default()
        }
    }

    pub fn failing_key(mut self, key: &str) -> Self {
        self.fail_keys.insert(key.to_string());
        self
    }

    pub fn failing_next_puts(self, n: usize) -> Self {
        self.fail_next_puts.store(n, Ordering::SeqCst);
        self
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    /// `(key, body)` pairs in upload order.
    pub fn uploads(&self) -> Vec<(String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArtifactSink for FakeSink {
    fn container(&self) -> &str {
        &self.container
    }

    async fn ensure_container(&self) -> Result<()> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_ensure {
            return Err(Error::SinkUnavailable(format!(
                "failed to create bucket '{}': AccessDenied",
                self.container
            )));
        }
        Ok(())
    }

    async fn put_object(&self, key: &str, local_path: &Path) -> Result<String> {
        if self.fail_keys.contains(key)
            || self
                .fail_next_puts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::SinkWrite(format!("upload of {key} refused")));
        }
        let body = tokio::fs::read_to_string(local_path).await?;
        self.uploads.lock().unwrap().push((key.to_string(), body));
        Ok(format!(
            "https://{}.s3.test-region.amazonaws.com/{key}",
            self.container
        ))
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    sent: Mutex<Vec<String>>,
}

impl FakeNotifier {
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, text: &str) -> Result<()> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
