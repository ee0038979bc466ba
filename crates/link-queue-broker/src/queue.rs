use link_queue_core::{observe_created_at, Request, RequestId};
use link_queue_persistence::SnapshotStore;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info};

/// FIFO of pending linking requests, mirrored to a snapshot file.
///
/// Every mutation rewrites the snapshot while still holding the write lock,
/// so the file always matches some state the in-memory queue passed through.
/// A failed write is logged and counted; the in-memory change stands.
pub struct RequestQueue {
    requests: RwLock<VecDeque<Request>>,
    store: SnapshotStore,
    persist_failures: AtomicU64,
}

impl RequestQueue {
    /// Open the queue, loading whatever the snapshot file holds
    pub fn open(store: SnapshotStore) -> Self {
        let requests: VecDeque<Request> = store.recover().into();
        for request in &requests {
            observe_created_at(request.created_at());
        }

        RequestQueue {
            requests: RwLock::new(requests),
            store,
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Append a request to the tail
    pub fn enqueue(&self, request: Request) {
        let mut requests = self.requests.write();
        let request_id = request.id();
        let subject = request.subject_label().to_string();
        requests.push_back(request);
        self.persist(&requests);
        info!(%request_id, %subject, depth = requests.len(), "Enqueued request");
    }

    /// Remove and return the head, if any
    pub fn dequeue(&self) -> Option<Request> {
        let mut requests = self.requests.write();
        let request = requests.pop_front()?;
        self.persist(&requests);
        info!(request_id = %request.id(), subject = %request.subject_label(), "Dequeued request");
        Some(request)
    }

    /// Look at the head without removing it
    pub fn peek(&self) -> Option<Request> {
        self.requests.read().front().cloned()
    }

    /// Snapshot of every queued request in queue order
    pub fn list_all(&self) -> Vec<Request> {
        self.requests.read().iter().cloned().collect()
    }

    /// Remove a specific request by id. `None` is a normal answer: the
    /// request was already processed or never existed.
    pub fn remove_by_id(&self, request_id: &RequestId) -> Option<Request> {
        let mut requests = self.requests.write();
        let position = requests.iter().position(|r| r.id() == *request_id)?;
        let request = requests.remove(position)?;
        self.persist(&requests);
        info!(%request_id, subject = %request.subject_label(), "Removed request");
        Some(request)
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.read().is_empty()
    }

    /// Drop every queued request
    pub fn clear(&self) {
        let mut requests = self.requests.write();
        let dropped = requests.len();
        requests.clear();
        self.persist(&requests);
        info!(dropped, "Cleared all requests from queue");
    }

    /// Number of snapshot writes that failed since the queue was opened
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    fn persist(&self, requests: &VecDeque<Request>) {
        let (front, back) = requests.as_slices();
        let snapshot = if back.is_empty() {
            self.store.save(front)
        } else {
            let contiguous: Vec<Request> = requests.iter().cloned().collect();
            self.store.save(&contiguous)
        };

        if let Err(e) = snapshot {
            self.persist_failures.fetch_add(1, Ordering::Relaxed);
            error!(
                path = ?self.store.path(),
                "Failed to save queue, durability degraded until next successful save: {}", e
            );
        }
    }
}
