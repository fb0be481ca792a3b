//! Action context stack: tracks the caller's current
//! nested "action" — a named unit of work with a start/end pair of
//! records and an automatically-derived duration.
//!
//! The stack belongs to exactly one OS thread at a time, so a
//! `thread_local!` `RefCell<Vec<_>>` holds it — no contention, no
//! locking. Crossing a `thread::spawn` boundary is only possible via an
//! explicit `ContextHandle`, never a hidden global.
//!
//! A root action's level is always `[1]`; every record emitted while a
//! scope is active — whether it opens a nested action or is a plain log
//! call — consumes the next step from that scope's child counter, so
//! plain records interleave into the same sequence as nested actions.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::Instant;

use crate::id::{self, ChildStepAllocator, TaskId};
use crate::record::{ActionStatus, FieldValue};

/// One frame of the action-context stack.
#[derive(Debug, Clone)]
struct ContextFrame {
    task_id: TaskId,
    task_level: Vec<u32>,
    action_type: String,
    started_at: Instant,
    child_steps: Arc<ChildStepAllocator>,
}

/// An opaque, `Clone + Send + Sync` snapshot of "where we are" in the
/// action tree, for propagating context across a `thread::spawn`
/// boundary explicitly.
#[derive(Debug, Clone)]
pub struct ContextHandle {
    task_id: TaskId,
    task_level: Vec<u32>,
    action_type: Option<String>,
    child_steps: Arc<ChildStepAllocator>,
}

impl ContextHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_level(&self) -> &[u32] {
        &self.task_level
    }

    /// Installs this handle as the current thread's active context, so
    /// records emitted from a spawned thread inherit the parent's task
    /// id. Returns a guard that restores the
    /// prior (empty) state on drop.
    pub fn adopt(self) -> AdoptedGuard {
        STACK.with(|s| {
            s.borrow_mut().push(ContextFrame {
                task_id: self.task_id,
                task_level: self.task_level,
                action_type: self.action_type.unwrap_or_default(),
                started_at: Instant::now(),
                child_steps: self.child_steps,
            })
        });
        AdoptedGuard { _private: () }
    }

    /// Cross-boundary serialization of the task id alone; `task_level` still needs to travel
    /// out-of-band since the wire format only carries the opaque id.
    pub fn serialize_task_id(&self) -> String {
        self.task_id.to_string()
    }
}

/// Pops the adopted frame when a spawned thread finishes using it.
pub struct AdoptedGuard {
    _private: (),
}

impl Drop for AdoptedGuard {
    fn drop(&mut self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

thread_local! {
    static STACK: RefCell<Vec<ContextFrame>> = RefCell::new(Vec::new());
    static AMBIENT: RefCell<Vec<Arc<Vec<(String, FieldValue)>>>> = RefCell::new(Vec::new());
}

/// A read-only snapshot of the active scope, or `None` if the calling
/// thread has no action open.
#[derive(Debug, Clone)]
pub struct CurrentContext {
    pub task_id: TaskId,
    pub task_level: Vec<u32>,
    pub action_type: Option<String>,
    pub ambient_fields: Arc<Vec<(String, FieldValue)>>,
}

fn top_ambient() -> Arc<Vec<(String, FieldValue)>> {
    AMBIENT.with(|a| a.borrow().last().cloned().unwrap_or_default())
}

/// RAII guard returned by [`push_scope_fields`]; pops the ambient frame
/// it pushed when dropped, restoring the prior snapshot.
pub struct ScopeFieldsGuard {
    _private: (),
}

impl Drop for ScopeFieldsGuard {
    fn drop(&mut self) {
        AMBIENT.with(|a| {
            a.borrow_mut().pop();
        });
    }
}

/// Pushes ambient context fields onto the task-local stack for the
/// duration of the returned guard. Every record emitted on this thread
/// while the guard is alive carries these fields in its `context` map,
/// in addition to any fields pushed by an enclosing `scope()`.
///
/// Each push builds a new snapshot by copying the parent's fields and
/// appending the new ones (copy-on-grow), rather than mutating a shared
/// map in place — concurrent scopes on other threads never observe a
/// partially-updated snapshot.
pub fn push_scope_fields(fields: crate::record::OrderedFields) -> ScopeFieldsGuard {
    let mut next = (*top_ambient()).clone();
    next.extend(fields.0);
    AMBIENT.with(|a| a.borrow_mut().push(Arc::new(next)));
    ScopeFieldsGuard { _private: () }
}

/// Peeks the active frame without allocating a new child step. Returns
/// `None` when no scope is open on this thread.
pub fn current() -> Option<CurrentContext> {
    STACK.with(|s| {
        s.borrow().last().map(|frame| CurrentContext {
            task_id: frame.task_id.clone(),
            task_level: frame.task_level.clone(),
            action_type: Some(frame.action_type.clone()),
            ambient_fields: top_ambient(),
        })
    })
}

/// Computes the context a single emitted record should carry. Unlike
/// [`current`], this always allocates: a plain log call nested inside
/// an open scope still consumes the next step of that scope's child
/// counter, interleaving with any nested `start_action` calls.
pub fn next_emission_context() -> CurrentContext {
    let ambient_fields = top_ambient();
    STACK.with(|s| {
        let stack = s.borrow();
        match stack.last() {
            Some(frame) => {
                let step = frame.child_steps.next();
                let mut task_level = frame.task_level.clone();
                task_level.push(step);
                CurrentContext {
                    task_id: id::child(&frame.task_id, step),
                    task_level,
                    action_type: Some(frame.action_type.clone()),
                    ambient_fields,
                }
            }
            None => CurrentContext {
                task_id: id::new_root(),
                task_level: vec![1],
                action_type: None,
                ambient_fields,
            },
        }
    })
}

/// Produces a `ContextHandle` capturing the current thread's frame (or
/// a fresh root if none is active) for explicit propagation to another
/// thread.
pub fn handle() -> ContextHandle {
    STACK.with(|s| {
        let stack = s.borrow();
        match stack.last() {
            Some(frame) => ContextHandle {
                task_id: frame.task_id.clone(),
                task_level: frame.task_level.clone(),
                action_type: Some(frame.action_type.clone()),
                child_steps: frame.child_steps.clone(),
            },
            None => ContextHandle {
                task_id: id::new_root(),
                task_level: vec![1],
                action_type: None,
                child_steps: Arc::new(ChildStepAllocator::new()),
            },
        }
    })
}

/// Begins a nested action under the current context, returning an RAII
/// `Scope` that must be `finish()`ed (or dropped) to close it. With no
/// scope currently open this starts a fresh root at `task_level = [1]`,
/// matching a plain unscoped record.
pub fn start_action(action_type: impl Into<String>) -> Scope {
    let action_type = action_type.into();

    let (task_id, task_level) = STACK.with(|s| {
        let stack = s.borrow();
        match stack.last() {
            Some(frame) => {
                let step = frame.child_steps.next();
                let mut task_level = frame.task_level.clone();
                task_level.push(step);
                (id::child(&frame.task_id, step), task_level)
            }
            None => (id::new_root(), vec![1]),
        }
    });

    STACK.with(|s| {
        s.borrow_mut().push(ContextFrame {
            task_id: task_id.clone(),
            task_level: task_level.clone(),
            action_type: action_type.clone(),
            started_at: Instant::now(),
            child_steps: Arc::new(ChildStepAllocator::new()),
        })
    });

    Scope {
        action_type,
        task_id,
        task_level,
        started_at: Instant::now(),
        finished: false,
    }
}

/// Resumes a task that was transferred across a thread or process
/// boundary, given its serialized id and the `task_level` it carried
/// out-of-band (the wire format only carries the opaque id, so the
/// level has to travel alongside it some other way — a function
/// argument, a second header field, whatever the transport offers).
///
/// Unlike [`start_action`], the supplied `task_id`/`task_level` are
/// used directly rather than derived as a child of whatever is
/// currently open on this thread: the resumed task continues its own
/// tree, independent of this thread's prior nesting.
pub fn continue_task(task_id: TaskId, task_level: Vec<u32>, action_type: impl Into<String>) -> Scope {
    let action_type = action_type.into();
    STACK.with(|s| {
        s.borrow_mut().push(ContextFrame {
            task_id: task_id.clone(),
            task_level: task_level.clone(),
            action_type: action_type.clone(),
            started_at: Instant::now(),
            child_steps: Arc::new(ChildStepAllocator::new()),
        })
    });
    Scope {
        action_type,
        task_id,
        task_level,
        started_at: Instant::now(),
        finished: false,
    }
}

thread_local! {
    static SYNC_OVERRIDE_DEPTH: std::cell::Cell<u32> = const { std::cell::Cell::new(0) };
}

/// RAII guard returned by [`push_sync_override`]; decrements the
/// per-thread override depth on drop.
pub struct SyncOverrideGuard {
    _private: (),
}

impl Drop for SyncOverrideGuard {
    fn drop(&mut self) {
        SYNC_OVERRIDE_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

/// Forces this thread's emissions to bypass the async writer for the
/// duration of the returned guard, regardless of the logger's global
/// mode. Nests: the override stays active until every acquired guard
/// on this thread has been dropped.
pub fn push_sync_override() -> SyncOverrideGuard {
    SYNC_OVERRIDE_DEPTH.with(|d| d.set(d.get() + 1));
    SyncOverrideGuard { _private: () }
}

/// Whether this thread currently has a `sync_mode()` scope open.
pub fn sync_override_active() -> bool {
    SYNC_OVERRIDE_DEPTH.with(|d| d.get() > 0)
}

/// RAII guard for one nested action's stack frame. Dropping it always
/// pops the frame; `Logger::start_action`'s caller-facing `ActionGuard`
/// wraps this to additionally emit a `status=failed` end-record when
/// the guard is dropped without an explicit `succeed`/`fail` call, so
/// an action abandoned by an early `?` return or a panic unwind is
/// never silently lost.
pub struct Scope {
    action_type: String,
    task_id: TaskId,
    task_level: Vec<u32>,
    started_at: Instant,
    finished: bool,
}

impl Scope {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn task_level(&self) -> &[u32] {
        &self.task_level
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    /// Explicitly closes the action with the given status. The state
    /// machine is one-shot; repeated calls aren't possible
    /// since `finish` consumes `self`. A second, separate `DoubleFinish`
    /// detection lives in `Logger`, which tracks whether it already
    /// called `finish` on a given `ActionGuard`.
    pub fn finish(mut self, status: ActionStatus) -> (TaskId, Vec<u32>, String, f64, ActionStatus) {
        let result = (
            self.task_id.clone(),
            self.task_level.clone(),
            self.action_type.clone(),
            self.elapsed_secs(),
            status,
        );
        self.finished = true;
        result
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unscoped_emission_gets_root_level_one() {
        let ctx = next_emission_context();
        assert_eq!(ctx.task_level, vec![1]);
        assert!(ctx.action_type.is_none());
    }

    #[test]
    fn no_scope_open_means_current_is_none() {
        assert!(current().is_none());
    }

    #[test]
    fn nested_action_levels_follow_the_action_tree() {
        // start A -> [1]; emit inside A -> [1,1];
        // start B inside A -> [1,2]; emit inside B -> [1,2,1];
        // end B -> [1,2]; end A -> [1].
        let a = start_action("A");
        assert_eq!(a.task_level(), &[1]);

        let x = next_emission_context();
        assert_eq!(x.task_level, vec![1, 1]);

        let b = start_action("B");
        assert_eq!(b.task_level(), &[1, 2]);

        let y = next_emission_context();
        assert_eq!(y.task_level, vec![1, 2, 1]);

        let (_, b_level, _, _, _) = b.finish(ActionStatus::Failed);
        assert_eq!(b_level, vec![1, 2]);

        let (_, a_level, _, _, _) = a.finish(ActionStatus::Succeeded);
        assert_eq!(a_level, vec![1]);
    }

    #[test]
    fn sibling_root_actions_are_distinguished_by_task_id_not_level() {
        let a = start_action("a");
        let a_level = a.task_level().to_vec();
        let a_id = a.task_id().clone();
        let _ = a.finish(ActionStatus::Succeeded);

        let b = start_action("b");
        let b_level = b.task_level().to_vec();
        let b_id = b.task_id().clone();
        let _ = b.finish(ActionStatus::Succeeded);

        assert_eq!(a_level, vec![1]);
        assert_eq!(b_level, vec![1]);
        assert_ne!(a_id, b_id);
    }

    #[test]
    fn scope_fields_are_inherited_and_popped() {
        assert!(current().is_none());
        let mut fields = crate::record::OrderedFields::new();
        fields.push("request_id", "r-1");
        let outer = push_scope_fields(fields);
        assert_eq!(next_emission_context().ambient_fields.len(), 1);

        let mut inner_fields = crate::record::OrderedFields::new();
        inner_fields.push("user", "alice");
        let inner = push_scope_fields(inner_fields);
        let ctx = next_emission_context();
        assert_eq!(ctx.ambient_fields.len(), 2);
        assert_eq!(ctx.ambient_fields[0].0, "request_id");
        assert_eq!(ctx.ambient_fields[1].0, "user");

        drop(inner);
        assert_eq!(next_emission_context().ambient_fields.len(), 1);
        drop(outer);
        assert_eq!(next_emission_context().ambient_fields.len(), 0);
    }

    #[test]
    fn continue_task_uses_transferred_id_and_level_directly() {
        let id = TaskId::parse("ab.5");
        let scope = continue_task(id.clone(), vec![5], "resumed");
        assert_eq!(scope.task_id(), &id);
        assert_eq!(scope.task_level(), &[5]);
        let _ = scope.finish(ActionStatus::Succeeded);
    }

    #[test]
    fn sync_override_nests_and_restores() {
        assert!(!sync_override_active());
        let a = push_sync_override();
        assert!(sync_override_active());
        let b = push_sync_override();
        assert!(sync_override_active());
        drop(b);
        assert!(sync_override_active());
        drop(a);
        assert!(!sync_override_active());
    }

    #[test]
    fn handle_round_trips_task_id_across_adoption() {
        let scope = start_action("work");
        let expected = scope.task_id().clone();
        let h = handle();
        let _ = scope.finish(ActionStatus::Succeeded);
        let th = std::thread::spawn(move || {
            let _guard = h.adopt();
            current().unwrap().task_id
        });
        let observed = th.join().unwrap();
        assert_eq!(observed, expected);
    }
}
