//! C1 — Priority Queue & Job Store.
//!
//! A min-heap of job ids keyed by `(priority, enqueue_time_ns, job_id)`,
//! plus parallel indices by status/capability/target, all guarded by a
//! single mutex (spec.md §5: "One orchestrator-wide mutex guards C1 and
//! the status/capability/target indices").

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use reconwatch_types::{Capability, Job, JobStatus, Priority};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("QUEUE_FULL")]
    Full,
    #[error("job already exists: {0}")]
    AlreadyExists(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeapKey {
    priority: Priority,
    enqueue_seq: u64,
    // job id ordering is approximated by enqueue_seq (monotonic, assigned once
    // per job) which already totally orders ties on priority+time.
}

impl PartialOrd for HeapKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.priority, self.enqueue_seq).cmp(&(other.priority, other.enqueue_seq))
    }
}

struct HeapEntry {
    key: HeapKey,
    job_id: String,
}
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

#[derive(Default)]
pub struct JobFilter {
    pub capability: Option<Capability>,
    pub status: Option<JobStatus>,
    pub target: Option<String>,
    pub limit: Option<usize>,
    pub offset: usize,
}

struct Inner {
    jobs: HashMap<String, Job>,
    // min-heap over Reverse so BinaryHeap (a max-heap) pops the smallest key.
    heap: BinaryHeap<Reverse<HeapEntry>>,
    by_status: HashMap<JobStatus, HashSet<String>>,
    by_capability: HashMap<Capability, HashSet<String>>,
    by_target: HashMap<String, HashSet<String>>,
}

pub struct JobStore {
    inner: Mutex<Inner>,
    capacity: usize,
    seq: AtomicU64,
}

impl JobStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                jobs: HashMap::new(),
                heap: BinaryHeap::new(),
                by_status: HashMap::new(),
                by_capability: HashMap::new(),
                by_target: HashMap::new(),
            }),
            capacity,
            seq: AtomicU64::new(0),
        }
    }

    /// Inserts a new job or re-indexes an existing one. The same job is
    /// never pushed onto the heap twice: a re-`put` of a known job updates
    /// the stored record but does not re-enqueue it.
    pub fn put(&self, job: Job) -> Result<(), QueueError> {
        let mut inner = self.inner.lock();
        let is_new = !inner.jobs.contains_key(&job.id);
        if is_new && inner.jobs.len() >= self.capacity {
            return Err(QueueError::Full);
        }

        Self::unindex(&mut inner, &job.id);

        let status = job.status;
        let capability = job.capability;
        let target = job.target.clone();
        let id = job.id.clone();

        if is_new && status == JobStatus::Queued {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            inner.heap.push(Reverse(HeapEntry {
                key: HeapKey { priority: job.priority, enqueue_seq: seq },
                job_id: id.clone(),
            }));
        }

        inner.by_status.entry(status).or_default().insert(id.clone());
        inner.by_capability.entry(capability).or_default().insert(id.clone());
        inner.by_target.entry(target).or_default().insert(id.clone());
        inner.jobs.insert(id, job);
        Ok(())
    }

    fn unindex(inner: &mut Inner, id: &str) {
        if let Some(existing) = inner.jobs.get(id) {
            if let Some(s) = inner.by_status.get_mut(&existing.status) {
                s.remove(id);
            }
            if let Some(s) = inner.by_capability.get_mut(&existing.capability) {
                s.remove(id);
            }
            if let Some(s) = inner.by_target.get_mut(&existing.target) {
                s.remove(id);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.inner.lock().jobs.get(id).cloned()
    }

    pub fn list(&self, filter: JobFilter) -> Vec<Job> {
        let inner = self.inner.lock();
        let mut ids: Option<HashSet<String>> = None;

        let intersect = |a: Option<HashSet<String>>, b: &HashSet<String>| -> HashSet<String> {
            match a {
                Some(a) => a.intersection(b).cloned().collect(),
                None => b.clone(),
            }
        };

        if let Some(cap) = filter.capability {
            let set = inner.by_capability.get(&cap).cloned().unwrap_or_default();
            ids = Some(intersect(ids, &set));
        }
        if let Some(status) = filter.status {
            let set = inner.by_status.get(&status).cloned().unwrap_or_default();
            ids = Some(intersect(ids, &set));
        }
        if let Some(target) = &filter.target {
            let set = inner.by_target.get(target).cloned().unwrap_or_default();
            ids = Some(intersect(ids, &set));
        }

        let mut jobs: Vec<Job> = match ids {
            Some(set) => set.iter().filter_map(|id| inner.jobs.get(id).cloned()).collect(),
            None => inner.jobs.values().cloned().collect(),
        };
        jobs.sort_by_key(|j| j.created_at);

        let jobs = jobs.into_iter().skip(filter.offset);
        match filter.limit {
            Some(limit) => jobs.take(limit).collect(),
            None => jobs.collect(),
        }
    }

    /// Pops the job with lowest `(priority, enqueue_time)`. Total, deterministic
    /// order for a given insertion sequence.
    pub fn pop_next(&self) -> Option<Job> {
        let mut inner = self.inner.lock();
        loop {
            let Reverse(entry) = inner.heap.pop()?;
            // The job may have been cancelled/removed between push and pop.
            if let Some(job) = inner.jobs.get(&entry.job_id) {
                if job.status == JobStatus::Queued {
                    return inner.jobs.get(&entry.job_id).cloned();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconwatch_types::Capability;

    fn job(id: &str, priority: Priority) -> Job {
        let mut j = Job::new(id.to_string(), Capability::ExposureDiscovery, "example.com".into(), priority);
        j.status = JobStatus::Queued;
        j
    }

    #[test]
    fn pop_next_yields_critical_then_high_then_normal() {
        let store = JobStore::new(100);
        store.put(job("a", Priority::Normal)).unwrap();
        store.put(job("b", Priority::High)).unwrap();
        store.put(job("c", Priority::Critical)).unwrap();

        assert_eq!(store.pop_next().unwrap().id, "c");
        assert_eq!(store.pop_next().unwrap().id, "b");
        assert_eq!(store.pop_next().unwrap().id, "a");
        assert!(store.pop_next().is_none());
    }

    #[test]
    fn ties_break_by_enqueue_order() {
        let store = JobStore::new(100);
        store.put(job("first", Priority::Normal)).unwrap();
        store.put(job("second", Priority::Normal)).unwrap();
        assert_eq!(store.pop_next().unwrap().id, "first");
        assert_eq!(store.pop_next().unwrap().id, "second");
    }

    #[test]
    fn queue_full_is_surfaced_to_caller() {
        let store = JobStore::new(1);
        store.put(job("a", Priority::Normal)).unwrap();
        let err = store.put(job("b", Priority::Normal)).unwrap_err();
        assert_eq!(err, QueueError::Full);
    }

    #[test]
    fn list_filters_by_capability_and_status() {
        let store = JobStore::new(10);
        store.put(job("a", Priority::Normal)).unwrap();
        let mut b = job("b", Priority::Normal);
        b.capability = Capability::EmailSecurity;
        store.put(b).unwrap();

        let results = store.list(JobFilter { capability: Some(Capability::EmailSecurity), ..Default::default() });
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "b");
    }

    #[test]
    fn pop_on_empty_does_not_block_and_returns_none() {
        let store = JobStore::new(10);
        assert!(store.pop_next().is_none());
    }
}
