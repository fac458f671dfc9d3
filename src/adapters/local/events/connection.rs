use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::Notify;
use uuid::Uuid;

/// One live observer. Outbound messages go through a bounded queue that
/// drops its oldest entry when full, so a slow reader never stalls broadcasts.
pub struct ClientConnection {
    pub id: Uuid,
    queue: Mutex<VecDeque<Message>>,
    capacity: usize,
    notify: Notify,
    alive: AtomicBool,
    closed: AtomicBool,
    dropped: AtomicU64,
    last_activity: Mutex<DateTime<Utc>>,
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("queued", &self.queued())
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl ClientConnection {
    pub fn new(capacity: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            last_activity: Mutex::new(Utc::now()),
        }
    }

    fn queue(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a message. Returns false once the connection is closed.
    pub fn enqueue(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut queue = self.queue();
            if queue.len() >= self.capacity {
                queue.pop_front();
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(message);
        }
        self.notify.notify_one();
        true
    }

    /// Next message for the socket writer; `None` once closed and drained.
    pub async fn next_outbound(&self) -> Option<Message> {
        loop {
            if let Some(message) = self.queue().pop_front() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting messages and ask the writer to send a close frame.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue().push_back(Message::Close(None));
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Record inbound traffic (pong or otherwise) from the peer.
    pub fn touch(&self) {
        self.alive.store(true, Ordering::Release);
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Utc::now();
    }

    /// Read and clear the liveness flag for a heartbeat cycle.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::AcqRel)
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn queued(&self) -> usize {
        self.queue().len()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
