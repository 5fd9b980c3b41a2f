use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatrelay_common::{CompletionMessage, ConversationMode, Message, ThreadId};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Lifecycle phase of a thread, used for first-turn tool visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPhase {
    /// Seeded with its system prompt, nothing else appended yet.
    New,
    Active,
}

/// What a thread is created with. Consulted only when the id is unseen.
#[derive(Debug, Clone)]
pub struct ThreadSeed {
    pub mode: ConversationMode,
    pub system_prompt: String,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_threads: Option<usize>,
    pub idle_ttl: Option<Duration>,
}

impl StoreLimits {
    pub fn unbounded() -> Self {
        Self {
            max_threads: None,
            idle_ttl: None,
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_threads: Some(10_000),
            idle_ttl: Some(Duration::from_secs(86_400)),
        }
    }
}

/// Debug view of a thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub mode: ConversationMode,
    pub phase: ThreadPhase,
    pub message_count: usize,
    pub title: Option<String>,
}

struct ThreadState {
    messages: Vec<Message>,
    phase: ThreadPhase,
    title: Option<String>,
}

struct Thread {
    id: ThreadId,
    mode: ConversationMode,
    state: Mutex<ThreadState>,
    last_used_ms: AtomicU64,
    epoch: Instant,
}

impl Thread {
    fn touch(&self) {
        self.last_used_ms
            .store(elapsed_ms(self.epoch), Ordering::Relaxed);
    }

    fn last_used_ms(&self) -> u64 {
        self.last_used_ms.load(Ordering::Relaxed)
    }
}

fn elapsed_ms(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Shared handle to one thread. Appends are serialized per thread.
#[derive(Clone)]
pub struct ThreadHandle {
    inner: Arc<Thread>,
}

impl ThreadHandle {
    pub fn id(&self) -> &ThreadId {
        &self.inner.id
    }

    /// Mode pinned when the thread was created.
    pub fn mode(&self) -> ConversationMode {
        self.inner.mode
    }

    pub async fn append(&self, message: Message) {
        let mut state = self.inner.state.lock().await;
        state.messages.push(message);
        state.phase = ThreadPhase::Active;
        drop(state);
        self.inner.touch();
    }

    /// Append several messages as one contiguous run.
    pub async fn append_all(&self, messages: impl IntoIterator<Item = Message>) {
        let mut state = self.inner.state.lock().await;
        let before = state.messages.len();
        state.messages.extend(messages);
        if state.messages.len() > before {
            state.phase = ThreadPhase::Active;
        }
        drop(state);
        self.inner.touch();
    }

    /// History in completion-service form, bookkeeping fields removed.
    pub async fn snapshot(&self) -> Vec<CompletionMessage> {
        let state = self.inner.state.lock().await;
        state.messages.iter().map(Message::to_completion).collect()
    }

    /// Full stored history including ids and timestamps.
    pub async fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().await.messages.clone()
    }

    pub async fn phase(&self) -> ThreadPhase {
        self.inner.state.lock().await.phase
    }

    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.messages.len()
    }

    pub async fn set_title(&self, title: impl Into<String>) {
        self.inner.state.lock().await.title = Some(title.into());
    }

    pub async fn title(&self) -> Option<String> {
        self.inner.state.lock().await.title.clone()
    }

    pub async fn summary(&self) -> ThreadSummary {
        let state = self.inner.state.lock().await;
        ThreadSummary {
            thread_id: self.inner.id.clone(),
            mode: self.inner.mode,
            phase: state.phase,
            message_count: state.messages.len(),
            title: state.title.clone(),
        }
    }
}

/// In-memory, process-lifetime store of conversation threads.
pub struct ConversationStore {
    threads: DashMap<ThreadId, Arc<Thread>>,
    limits: StoreLimits,
    epoch: Instant,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new(StoreLimits::default())
    }
}

impl ConversationStore {
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            threads: DashMap::new(),
            limits,
            epoch: Instant::now(),
        }
    }

    /// Return the thread for `id`, creating and seeding it if it does not exist.
    ///
    /// The seed is evaluated at most once per id, under the map entry lock, so
    /// racing first requests produce exactly one system message.
    pub fn get_or_create<F>(&self, id: &ThreadId, seed: F) -> ThreadHandle
    where
        F: FnOnce() -> ThreadSeed,
    {
        let (thread, created) = match self.threads.entry(id.clone()) {
            Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
            Entry::Vacant(entry) => {
                let seed = seed();
                let thread = Arc::new(Thread {
                    id: id.clone(),
                    mode: seed.mode,
                    state: Mutex::new(ThreadState {
                        messages: vec![Message::system(seed.system_prompt)],
                        phase: ThreadPhase::New,
                        title: None,
                    }),
                    last_used_ms: AtomicU64::new(elapsed_ms(self.epoch)),
                    epoch: self.epoch,
                });
                entry.insert(Arc::clone(&thread));
                (thread, true)
            }
        };

        thread.touch();
        if created {
            debug!(thread_id = %id, mode = %thread.mode, "created thread");
            self.enforce_capacity(id);
        }

        ThreadHandle { inner: thread }
    }

    pub fn get(&self, id: &ThreadId) -> Option<ThreadHandle> {
        self.threads.get(id).map(|entry| ThreadHandle {
            inner: Arc::clone(entry.value()),
        })
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    /// Drop threads idle for longer than the configured TTL. Returns the number removed.
    pub fn evict_idle(&self) -> usize {
        let Some(ttl) = self.limits.idle_ttl else {
            return 0;
        };
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        let now = elapsed_ms(self.epoch);

        let before = self.threads.len();
        self.threads
            .retain(|_, thread| now.saturating_sub(thread.last_used_ms()) <= ttl_ms);
        let removed = before.saturating_sub(self.threads.len());
        if removed > 0 {
            info!("evicted {removed} idle thread(s)");
        }
        removed
    }

    /// Periodically evict idle threads for the lifetime of the process.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) {
        if self.limits.idle_ttl.is_none() {
            return;
        }
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                store.evict_idle();
            }
        });
    }

    fn enforce_capacity(&self, keep: &ThreadId) {
        let Some(max) = self.limits.max_threads else {
            return;
        };
        while self.threads.len() > max {
            let oldest = self
                .threads
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.value().last_used_ms())
                .map(|entry| entry.key().clone());
            match oldest {
                Some(id) => {
                    self.threads.remove(&id);
                    debug!(thread_id = %id, "evicted least recently used thread");
                }
                None => break,
            }
        }
    }
}
