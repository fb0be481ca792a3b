//! Hierarchical task identifiers.
//!
//! Compact form: `PP.N[.M[...]]` — a 2-character base-62 PID prefix,
//! a strictly increasing base-62 root counter, and one base-62 segment
//! per nesting level. A 128-bit random UUID form is available for
//! distributed deployments via `LOGXPY_DISTRIBUTED=1`.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use once_cell::sync::Lazy;
use rand::Rng;

use crate::clock::base62_encode;

/// Counter width before the generator re-randomizes its prefix and wraps.
/// 62^4 gives generous headroom above a 6-digit default-width counter
const COUNTER_WRAP: u32 = 62u32.pow(4);

/// Opaque hierarchical or UUID task identifier. Treated as a plain string
/// by every other component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Rebuilds an opaque `TaskId` from a string previously produced by
    /// `Display`/`serialize_task_id` — used when a caller transfers a
    /// task id across a thread or process boundary out-of-band and
    /// wants to resume logging under it via `continue_task`.
    pub fn parse(s: impl Into<String>) -> Self {
        TaskId(s.into())
    }

    fn from_parts(prefix: &str, segments: &[u32]) -> Self {
        let mut s = String::with_capacity(prefix.len() + segments.len() * 3);
        s.push_str(prefix);
        for seg in segments {
            s.push('.');
            s.push_str(&base62_encode(u64::from(*seg)));
        }
        TaskId(s)
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<TaskId> for String {
    fn from(id: TaskId) -> String {
        id.0
    }
}

/// Distributed-mode identifiers: 128-bit random UUIDs rendered opaque,
/// still satisfying `TaskId`'s string contract.
fn random_prefix() -> String {
    let mut rng = rand::thread_rng();
    let n: u32 = rng.gen_range(0..62 * 62);
    format!(
        "{}{}",
        char_at(n / 62),
        char_at(n % 62)
    )
}

fn char_at(digit: u32) -> char {
    let table = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";
    table[digit as usize] as char
}

struct Counter {
    prefix: Mutex<String>,
    next: AtomicU32,
}

impl Counter {
    fn new() -> Self {
        // PID-derived prefix, collision-avoidance across processes.
        let pid = std::process::id();
        let n = pid % (62 * 62);
        Self {
            prefix: Mutex::new(format!("{}{}", char_at(n / 62), char_at(n % 62))),
            next: AtomicU32::new(1),
        }
    }

    fn next_root(&self) -> TaskId {
        loop {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            if n < COUNTER_WRAP {
                let prefix = self.prefix.lock().unwrap().clone();
                return TaskId::from_parts(&prefix, &[n]);
            }
            // Overflow: re-randomize the prefix and reset the counter.
            // Never emits the same ID twice within one process lifetime.
            let mut prefix = self.prefix.lock().unwrap();
            *prefix = random_prefix();
            self.next.store(1, Ordering::Relaxed);
        }
    }
}

static COUNTER: Lazy<Counter> = Lazy::new(Counter::new);

/// Whether distributed (random UUID) identifiers are in effect, controlled
/// by `LOGXPY_DISTRIBUTED=1` or set explicitly for tests.
static DISTRIBUTED: Lazy<bool> =
    Lazy::new(|| std::env::var("LOGXPY_DISTRIBUTED").as_deref() == Ok("1"));

/// Generate a new root task ID.
pub fn new_root() -> TaskId {
    if *DISTRIBUTED {
        TaskId(uuid::Uuid::new_v4().simple().to_string())
    } else {
        COUNTER.next_root()
    }
}

/// Per-parent child-step atomic allocator, owned by the parent's
/// `ActionContext` so that concurrent `start_action` calls on the same
/// parent allocate distinct step numbers atomically.
#[derive(Debug, Default)]
pub struct ChildStepAllocator(AtomicU32);

impl ChildStepAllocator {
    pub fn new() -> Self {
        ChildStepAllocator(AtomicU32::new(0))
    }

    pub fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Derive a child ID by appending one step to the parent's path.
/// Distributed mode ignores the parent's textual ID (a fresh UUID is
/// generated per call) because
/// `task_level` alone carries the tree structure once IDs are opaque.
pub fn child(parent: &TaskId, step: u32) -> TaskId {
    if *DISTRIBUTED {
        TaskId(uuid::Uuid::new_v4().simple().to_string())
    } else {
        let mut s = parent.0.clone();
        s.push('.');
        s.push_str(&base62_encode(u64::from(step)));
        TaskId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_ids_are_unique_and_short() {
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let id = new_root();
            assert!(id.as_str().len() <= 6, "{id} too long for a root id");
            assert!(seen.insert(id));
        }
    }

    #[test]
    fn child_ids_extend_the_parent() {
        let parent = new_root();
        let kid = child(&parent, 1);
        let grandkid = child(&kid, 2);
        assert!(kid.as_str().starts_with(parent.as_str()));
        assert!(grandkid.as_str().starts_with(kid.as_str()));
        assert!(grandkid.as_str().len() < 16);
    }
}
