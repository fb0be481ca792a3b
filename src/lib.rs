//! An asynchronous structured-logging write pipeline: producers hand
//! off pre-serialized records through a bounded queue to one dedicated
//! writer thread, which batches them out to pluggable file destinations
//! under a supervisor that restarts the writer on crash and falls back
//! to synchronous emission if restarts are exhausted.
//!
//! This crate is the write core only. Reading logs back, querying them,
//! rendering a CLI tree, or parsing a config file are all out of scope
//! — that's the job of callers layered on top.

pub mod clock;
pub mod config;
pub mod context;
pub mod destination;
pub mod error;
pub mod flush;
pub mod id;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod serializer;
pub mod supervisor;
pub mod writer;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::OnceCell;

pub use config::{DestinationKind, WriterConfig};
pub use error::PipelineError;
pub use flush::WriterMode;
pub use metrics::MetricsSnapshot;
pub use queue::{BackpressurePolicy, EnqueueOutcome};
pub use record::{ActionStatus, FieldValue, Level, OrderedFields, Record};

use context::Scope;
use destination::{BlockBufferedFile, Destination, LineFlushedFile, MmapFile};
use serializer::{LineSerializer, RecordSerializer};
use supervisor::Supervisor;

/// The public entry point: owns the supervisor, the serializer, and the
/// configured minimum level.
pub struct Logger {
    supervisor: Arc<Supervisor>,
    serializer: Box<dyn RecordSerializer>,
    level: Level,
}

static GLOBAL: OnceCell<Logger> = OnceCell::new();

/// Where the writer persists records — a path plus which file strategy
/// to use. `Logger::init` builds the matching `Destination`
/// lazily so the supervisor can recreate it identically on restart.
#[derive(Debug, Clone)]
pub struct DestinationSpec {
    pub path: PathBuf,
    pub kind: DestinationKind,
}

impl DestinationSpec {
    pub fn new(path: impl Into<PathBuf>, kind: DestinationKind) -> Self {
        DestinationSpec {
            path: path.into(),
            kind,
        }
    }

    fn open(&self) -> io::Result<Box<dyn Destination>> {
        match self.kind {
            DestinationKind::LineFlushed => {
                Ok(Box::new(LineFlushedFile::open(&self.path)?))
            }
            DestinationKind::BlockBuffered => {
                Ok(Box::new(BlockBufferedFile::open(&self.path)?))
            }
            DestinationKind::Mmap => Ok(Box::new(MmapFile::open(&self.path)?)),
        }
    }
}

impl Logger {
    /// Builds a `Logger` writing to every destination in `specs`, not
    /// installed as the process-wide global.
    pub fn new(config: WriterConfig, specs: Vec<DestinationSpec>) -> io::Result<Self> {
        let config = config.apply_env_overrides();
        let level = config.level;
        let make_destinations: supervisor::DestinationFactory = Box::new(move || {
            specs.iter().map(DestinationSpec::open).collect()
        });
        let supervisor = Supervisor::start(config, make_destinations)?;
        Ok(Logger {
            supervisor,
            serializer: Box::new(LineSerializer),
            level,
        })
    }

    /// Installs a `Logger` as the process-wide global.
    /// Returns an error if a global logger is already installed —
    /// callers that want more than one pipeline should hold their own
    /// `Logger` instances instead.
    pub fn init(config: WriterConfig, specs: Vec<DestinationSpec>) -> io::Result<()> {
        let logger = Logger::new(config, specs)?;
        GLOBAL
            .set(logger)
            .map_err(|_| io::Error::other("logxpy: global logger already initialized"))
    }

    /// The process-wide global installed by [`init`], if any.
    pub fn global() -> Option<&'static Logger> {
        GLOBAL.get()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.supervisor
            .metrics()
            .snapshot(self.supervisor.queue().len() as u64)
    }

    pub fn is_sync_mode(&self) -> bool {
        self.supervisor.is_sync_mode()
    }

    /// Blocks until every record enqueued before this call is written,
    /// or `timeout` elapses.
    pub fn flush(&self, timeout: Duration) -> bool {
        self.supervisor.flush(timeout)
    }

    /// Drains the queue and joins the writer thread.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        self.supervisor.shutdown(timeout)
    }

    fn emit(&self, level: Level, message: &str, fields: OrderedFields) {
        self.supervisor.check_fork();
        if (level as u8) < (self.level as u8) {
            return;
        }
        let ctx = context::next_emission_context();
        let context_fields = ambient_context_fields(&ctx);
        let rec = Record::new(
            clock::wall_clock_secs(),
            level,
            message,
            None,
            fields,
            context_fields,
            ctx.task_id,
            ctx.task_level,
        );
        self.emit_record(rec);
    }

    fn emit_record(&self, rec: Record) {
        let (bytes, err) = self.serializer.serialize(&rec);
        if let Some(err) = err {
            log::warn!("logxpy: {err}");
            self.supervisor.metrics().inc_serialization_errors();
        }
        self.supervisor.submit(bytes, context::sync_override_active());
    }

    pub fn debug(&self, message: &str) {
        self.emit(Level::Debug, message, OrderedFields::new());
    }
    pub fn info(&self, message: &str) {
        self.emit(Level::Info, message, OrderedFields::new());
    }
    pub fn success(&self, message: &str) {
        self.emit(Level::Success, message, OrderedFields::new());
    }
    pub fn note(&self, message: &str) {
        self.emit(Level::Note, message, OrderedFields::new());
    }
    pub fn warning(&self, message: &str) {
        self.emit(Level::Warning, message, OrderedFields::new());
    }
    pub fn error(&self, message: &str) {
        self.emit(Level::Error, message, OrderedFields::new());
    }
    pub fn critical(&self, message: &str) {
        self.emit(Level::Critical, message, OrderedFields::new());
    }
    pub fn checkpoint(&self, message: &str) {
        self.emit(Level::Checkpoint, message, OrderedFields::new());
    }

    /// Same as [`Logger::error`] but attaches the fields a caught
    /// exception/error value would carry: its kind and rendered message,
    /// as ordinary fields.
    pub fn exception(&self, message: &str, kind: &str, detail: &str) {
        let mut fields = OrderedFields::new();
        fields.push("exception_kind", kind);
        fields.push("exception_detail", detail);
        self.emit(Level::Error, message, fields);
    }

    /// Same as the bare level methods, but with caller-supplied
    /// structured fields.
    pub fn log_with_fields(&self, level: Level, message: &str, fields: OrderedFields) {
        self.emit(level, message, fields);
    }

    /// Begins a nested action. The returned
    /// guard must be finished explicitly with [`ActionGuard::succeed`]/
    /// [`ActionGuard::fail`], or it emits a `status=failed` end record
    /// automatically when dropped.
    pub fn start_action<'a>(&'a self, action_type: impl Into<String>) -> ActionGuard<'a> {
        // The scope is created first so its task_id/task_level already
        // reflect the new nesting level before the start record is built.
        let scope = context::start_action(action_type);
        self.emit_action_record(
            scope.task_id().clone(),
            scope.task_level().to_vec(),
            scope.action_type().to_string(),
            ActionStatus::Started,
            None,
        );
        ActionGuard {
            logger: self,
            scope: Some(scope),
        }
    }

    /// Resumes a task transferred across a thread or process boundary.
    /// `task_id` is a string previously produced by
    /// [`ActionGuard::task_id`]'s `Display`/[`context::ContextHandle::serialize_task_id`];
    /// `task_level` must travel alongside it out-of-band since the wire
    /// format carries only the opaque id. Emits a `started` record under
    /// the resumed id/level and returns a guard that closes it like any
    /// other action.
    pub fn continue_task<'a>(
        &'a self,
        task_id: &str,
        task_level: Vec<u32>,
        action_type: impl Into<String>,
    ) -> ActionGuard<'a> {
        let scope = context::continue_task(id::TaskId::parse(task_id), task_level, action_type);
        self.emit_action_record(
            scope.task_id().clone(),
            scope.task_level().to_vec(),
            scope.action_type().to_string(),
            ActionStatus::Started,
            None,
        );
        ActionGuard {
            logger: self,
            scope: Some(scope),
        }
    }

    /// Pushes ambient context fields onto the task-local stack for the
    /// duration of the returned guard; every record emitted on this
    /// thread while the guard is alive carries them under `context`.
    pub fn scope(&self, fields: OrderedFields) -> ScopeGuard {
        ScopeGuard {
            _inner: context::push_scope_fields(fields),
        }
    }

    /// Forces this thread's emissions to bypass the async writer —
    /// writing directly on the caller's thread — for the duration of
    /// the returned guard, regardless of the logger's global mode.
    pub fn sync_mode(&self) -> SyncModeGuard {
        SyncModeGuard {
            _inner: context::push_sync_override(),
        }
    }

    fn emit_action_record(
        &self,
        task_id: id::TaskId,
        task_level: Vec<u32>,
        action_type: String,
        status: ActionStatus,
        duration_secs: Option<f64>,
    ) {
        self.supervisor.check_fork();
        let mut rec = Record::new(
            clock::wall_clock_secs(),
            Level::Info,
            format!("{action_type} {}", status.as_str()),
            None,
            OrderedFields::new(),
            OrderedFields::new(),
            task_id,
            task_level,
        );
        rec.action_type = Some(action_type);
        rec.action_status = Some(status);
        rec.duration_secs = duration_secs;
        self.emit_record(rec);
    }
}

fn ambient_context_fields(ctx: &context::CurrentContext) -> OrderedFields {
    let mut fields = OrderedFields::new();
    if let Some(action_type) = &ctx.action_type {
        fields.push("parent_action", action_type.clone());
    }
    for (name, value) in ctx.ambient_fields.iter() {
        fields.push(name.clone(), value.clone());
    }
    fields
}

/// RAII guard returned by [`Logger::scope`]. Pops the ambient fields it
/// pushed when dropped.
pub struct ScopeGuard {
    _inner: context::ScopeFieldsGuard,
}

/// RAII guard returned by [`Logger::sync_mode`]. Restores the prior
/// (possibly still-forced, if nested) mode when dropped.
pub struct SyncModeGuard {
    _inner: context::SyncOverrideGuard,
}

/// RAII guard returned by [`Logger::start_action`]. Exactly one of
/// [`succeed`](ActionGuard::succeed)/[`fail`](ActionGuard::fail) should
/// be called; dropping without either emits a failed end record so an
/// action abandoned via an early return or panic is never silently lost
pub struct ActionGuard<'a> {
    logger: &'a Logger,
    scope: Option<Scope>,
}

impl<'a> ActionGuard<'a> {
    pub fn task_id(&self) -> &id::TaskId {
        self.scope.as_ref().expect("scope already finished").task_id()
    }

    pub fn succeed(mut self) {
        self.finish(ActionStatus::Succeeded);
    }

    pub fn fail(mut self) {
        self.finish(ActionStatus::Failed);
    }

    fn finish(&mut self, status: ActionStatus) {
        if let Some(scope) = self.scope.take() {
            let (task_id, task_level, action_type, duration, status) = scope.finish(status);
            self.logger
                .emit_action_record(task_id, task_level, action_type, status, Some(duration));
        }
    }
}

impl<'a> Drop for ActionGuard<'a> {
    fn drop(&mut self) {
        if self.scope.is_some() {
            self.finish(ActionStatus::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_logger(dir: &tempfile::TempDir, mode: WriterMode) -> Logger {
        let cfg = WriterConfig::new()
            .writer_mode(mode)
            .batch_size(1)
            .flush_interval(Duration::from_millis(5))
            .deadline(Duration::from_millis(5));
        let spec = DestinationSpec::new(dir.path().join("out.ndjson"), DestinationKind::LineFlushed);
        Logger::new(cfg, vec![spec]).unwrap()
    }

    #[test]
    fn basic_emission_reaches_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        logger.info("hello world");
        assert!(logger.flush(Duration::from_secs(2)));
        assert!(logger.shutdown(Duration::from_secs(2)));
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        assert!(content.contains("hello world"));
        assert!(content.contains("\"lvl\":\"info\""));
    }

    #[test]
    fn action_guard_emits_started_and_succeeded_records() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        {
            let action = logger.start_action("do_work");
            action.succeed();
        }
        assert!(logger.shutdown(Duration::from_secs(2)));
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        assert!(content.contains("\"st\":\"started\""));
        assert!(content.contains("\"st\":\"succeeded\""));
    }

    #[test]
    fn dropped_action_guard_emits_failed_record() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        {
            let _action = logger.start_action("abandoned");
        }
        assert!(logger.shutdown(Duration::from_secs(2)));
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        assert!(content.contains("\"st\":\"failed\""));
    }

    #[test]
    fn scope_fields_appear_in_emitted_records() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        {
            let mut fields = OrderedFields::new();
            fields.push("request_id", "r-42");
            let _scope = logger.scope(fields);
            logger.info("inside scope");
        }
        logger.info("outside scope");
        assert!(logger.flush(Duration::from_secs(2)));
        assert!(logger.shutdown(Duration::from_secs(2)));
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert!(lines[0].contains("\"request_id\":\"r-42\""));
        assert!(!lines[1].contains("request_id"));
    }

    #[test]
    fn sync_mode_scope_writes_without_explicit_flush() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Manual);
        {
            let _sync = logger.sync_mode();
            logger.info("written synchronously");
        }
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        assert!(content.contains("written synchronously"));
        assert!(logger.shutdown(Duration::from_secs(2)));
    }

    #[test]
    fn continue_task_resumes_transferred_id() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        let action = logger.continue_task("zz.9", vec![9], "resumed_work");
        let resumed_id = action.task_id().clone();
        action.succeed();
        assert!(logger.shutdown(Duration::from_secs(2)));
        let content = std::fs::read_to_string(dir.path().join("out.ndjson")).unwrap();
        assert!(content.contains(&format!("\"tid\":\"{resumed_id}\"")));
        assert_eq!(resumed_id.as_str(), "zz.9");
    }

    #[test]
    fn metrics_count_enqueued_and_written() {
        let dir = tempfile::tempdir().unwrap();
        let logger = test_logger(&dir, WriterMode::Trigger);
        for i in 0..5 {
            logger.info(&format!("line {i}"));
        }
        assert!(logger.flush(Duration::from_secs(2)));
        let snap = logger.metrics();
        assert_eq!(snap.enqueued, 5);
        assert!(logger.shutdown(Duration::from_secs(2)));
    }
}
