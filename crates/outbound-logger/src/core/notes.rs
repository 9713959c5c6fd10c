use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type SharedNotes = Arc<Mutex<NoteStore>>;

#[derive(Debug, Clone)]
struct NoteEntry {
    headers: String,
    updated_at: Instant,
}

/// Header blocks captured at queue time, keyed by job id, so later
/// delivery hooks can resolve the subject even when the host does not
/// resend the headers.
#[derive(Debug)]
pub struct NoteStore {
    entries: HashMap<String, NoteEntry>,
    ttl: Duration,
}

impl NoteStore {
    pub fn new(ttl: Duration) -> Self {
        Self { entries: HashMap::new(), ttl }
    }

    pub fn shared(ttl: Duration) -> SharedNotes {
        Arc::new(Mutex::new(Self::new(ttl)))
    }

    pub fn insert(
        &mut self,
        job_id: String,
        headers: String,
    ) {
        self.entries
            .insert(job_id, NoteEntry { headers, updated_at: Instant::now() });
    }

    /// Returns the note for `job_id`, refreshing it. Expired notes are
    /// dropped rather than returned.
    pub fn get(&mut self, job_id: &str) -> Option<String> {
        let now = Instant::now();
        let entry = self.entries.get_mut(job_id)?;
        if now.duration_since(entry.updated_at) <= self.ttl {
            entry.updated_at = now;
            return Some(entry.headers.clone());
        }

        self.entries.remove(job_id);
        None
    }

    /// Removes notes not refreshed within the ttl; returns how many.
    pub fn prune(&mut self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.duration_since(entry.updated_at) <= ttl);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

pub async fn run_note_pruner(
    notes: SharedNotes,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut cleanup_tick = interval(every.max(Duration::from_secs(1)));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("note pruner stopping");
                break;
            }
            _ = cleanup_tick.tick() => {
                let mut store = notes.lock().await;
                let removed = store.prune();
                if removed > 0 {
                    debug!(
                        "cleaned stale header notes: removed={}, tracked={}",
                        removed,
                        store.len()
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::NoteStore;

    #[test]
    fn returns_note_for_known_job() {
        let mut store = NoteStore::new(Duration::from_secs(60));
        store.insert("J1".to_string(), "Subject: hi\r\n\r\n".to_string());

        assert_eq!(store.get("J1").as_deref(), Some("Subject: hi\r\n\r\n"));
        assert!(store.get("J2").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn expired_notes_are_dropped() {
        let mut store = NoteStore::new(Duration::from_millis(1));
        store.insert("J1".to_string(), "Subject: a\r\n\r\n".to_string());
        store.insert("J2".to_string(), "Subject: b\r\n\r\n".to_string());
        thread::sleep(Duration::from_millis(20));

        assert!(store.get("J1").is_none());
        assert_eq!(store.len(), 1);
        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 0);
    }
}
