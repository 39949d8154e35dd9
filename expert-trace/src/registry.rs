//! Registry of per-execution-unit trace contexts.
//!
//! Every execution unit gets its own [`TraceContext`], created on first access
//! and never visible to any other unit. The registry lock only covers lookup
//! and insertion; each context has its own lock, so one unit flushing to disk
//! does not stall another unit recording.
//!
//! A context keyed by the calling thread is released when that thread exits.
//! `Task` keys live until [`TraceRegistry::release`].

use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::thread::{self, ThreadId};

use expert_trace_core::device::{DeviceProbe, ThreadDevice};
use expert_trace_core::logits::RoutingLogits;
use expert_trace_core::{Result, TraceError};

use crate::context::{local_clock, Clock, TraceContext, TraceOutcome};
use crate::TracerConfig;

/// Identity of the unit of work that owns a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionKey {
    /// An OS thread.
    Thread(ThreadId),
    /// A task on a cooperative scheduler, numbered by the caller.
    Task(u64),
}

impl ExecutionKey {
    pub fn current_thread() -> Self {
        ExecutionKey::Thread(thread::current().id())
    }
}

type SharedContext = Arc<Mutex<TraceContext>>;
type ContextMap = Mutex<HashMap<ExecutionKey, SharedContext>>;

/// Removes one thread's context from a registry when the thread's locals drop.
struct ReleaseOnExit {
    contexts: Weak<ContextMap>,
    key: ExecutionKey,
}

impl Drop for ReleaseOnExit {
    fn drop(&mut self) {
        if let Some(contexts) = self.contexts.upgrade() {
            if let Ok(mut contexts) = contexts.lock() {
                contexts.remove(&self.key);
            }
        }
    }
}

thread_local! {
    static RELEASE_ON_EXIT: RefCell<Vec<ReleaseOnExit>> = const { RefCell::new(Vec::new()) };
}

/// Lazily populated map from [`ExecutionKey`] to [`TraceContext`].
pub struct TraceRegistry {
    config: TracerConfig,
    probe: Arc<dyn DeviceProbe>,
    clock: Clock,
    contexts: Arc<ContextMap>,
}

impl fmt::Debug for TraceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceRegistry")
            .field("config", &self.config)
            .field("contexts", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for TraceRegistry {
    fn default() -> Self {
        Self::new(TracerConfig::default())
    }
}

impl TraceRegistry {
    /// Registry whose contexts read the device bound to the calling thread.
    pub fn new(config: TracerConfig) -> Self {
        Self::with_probe(config, Arc::new(ThreadDevice))
    }

    pub fn with_probe(config: TracerConfig, probe: Arc<dyn DeviceProbe>) -> Self {
        Self {
            config,
            probe,
            clock: local_clock,
            contexts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Replace the timestamp source of contexts created from now on.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    fn context(&self, key: ExecutionKey) -> Result<SharedContext> {
        let mut contexts = self
            .contexts
            .lock()
            .map_err(|_| TraceError::ContextPoisoned)?;
        let ctx = match contexts.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                tracing::trace!(?key, "creating expert trace context");
                if key == ExecutionKey::current_thread() {
                    self.release_on_exit(key);
                }
                let ctx = TraceContext::with_probe(self.config.clone(), Arc::clone(&self.probe))
                    .with_clock(self.clock);
                Arc::clone(entry.insert(Arc::new(Mutex::new(ctx))))
            }
        };
        Ok(ctx)
    }

    fn release_on_exit(&self, key: ExecutionKey) {
        let guard = ReleaseOnExit {
            contexts: Arc::downgrade(&self.contexts),
            key,
        };
        // Fails only while the thread is already tearing down its locals.
        let _ = RELEASE_ON_EXIT.try_with(|guards| guards.borrow_mut().push(guard));
    }

    /// Run `f` with exclusive access to the context of `key`.
    pub fn with_context<R>(
        &self,
        key: ExecutionKey,
        f: impl FnOnce(&mut TraceContext) -> R,
    ) -> Result<R> {
        let ctx = self.context(key)?;
        let mut guard = ctx.lock().map_err(|_| TraceError::ContextPoisoned)?;
        Ok(f(&mut guard))
    }

    /// Arm the calling thread's context.
    pub fn ready(&self) -> Result<()> {
        self.with_context(ExecutionKey::current_thread(), TraceContext::ready)
    }

    /// Record a routing decision on the calling thread's context.
    pub fn add(
        &self,
        model_name: impl Into<String>,
        logits: RoutingLogits,
        k: usize,
    ) -> Result<TraceOutcome> {
        self.with_context(ExecutionKey::current_thread(), |ctx| {
            ctx.add(model_name, logits, k)
        })?
    }

    /// Flush the calling thread's window to `path`.
    pub fn dump(&self, path: impl AsRef<Path>, phase: &str) -> Result<TraceOutcome> {
        self.with_context(ExecutionKey::current_thread(), |ctx| ctx.dump(path, phase))?
    }

    /// Drop the calling thread's pending window.
    pub fn clear(&self) -> Result<()> {
        self.with_context(ExecutionKey::current_thread(), TraceContext::clear)
    }

    /// Forget the context of `key`, e.g. when a worker shuts down.
    pub fn release(&self, key: ExecutionKey) -> bool {
        self.contexts
            .lock()
            .map(|mut contexts| contexts.remove(&key).is_some())
            .unwrap_or(false)
    }

    /// Number of live contexts.
    pub fn len(&self) -> usize {
        self.contexts.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static EXPERT_TRACER: OnceLock<TraceRegistry> = OnceLock::new();

/// Install the process-wide registry with `config`.
///
/// Returns `false` if the registry was already initialized (explicitly or by a
/// prior [`expert_tracer`] call).
pub fn init_expert_tracer(config: TracerConfig) -> bool {
    EXPERT_TRACER.set(TraceRegistry::new(config)).is_ok()
}

/// Process-wide registry, built with the default config on first use.
pub fn expert_tracer() -> &'static TraceRegistry {
    EXPERT_TRACER.get_or_init(TraceRegistry::default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SkipReason;
    use expert_trace_core::device::{DeviceId, FixedDevice};

    fn registry() -> TraceRegistry {
        TraceRegistry::with_probe(
            TracerConfig::default(),
            Arc::new(FixedDevice(DeviceId::Cpu)),
        )
    }

    fn scores() -> RoutingLogits {
        RoutingLogits::from_scores(&[0.1, 0.7, 0.2]).unwrap()
    }

    #[test]
    fn contexts_are_created_lazily_per_key() {
        let registry = registry();
        assert!(registry.is_empty());

        registry.ready().unwrap();
        assert_eq!(registry.len(), 1);

        registry
            .with_context(ExecutionKey::Task(7), |ctx| assert!(!ctx.is_armed()))
            .unwrap();
        assert_eq!(registry.len(), 2);

        assert!(registry.release(ExecutionKey::Task(7)));
        assert!(!registry.release(ExecutionKey::Task(7)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn arming_one_thread_leaves_others_unarmed() {
        let registry = Arc::new(registry());
        registry.ready().unwrap();
        assert_eq!(registry.add("m", scores(), 1).unwrap(), TraceOutcome::Recorded);

        let other = Arc::clone(&registry);
        let outcome = thread::spawn(move || other.add("m", scores(), 1).unwrap())
            .join()
            .unwrap();
        assert_eq!(outcome, TraceOutcome::Skipped(SkipReason::NotArmed));

        registry
            .with_context(ExecutionKey::current_thread(), |ctx| {
                assert_eq!(ctx.pending_len(), 1)
            })
            .unwrap();
    }

    #[test]
    fn task_keys_are_isolated_from_threads() {
        let registry = registry();
        registry
            .with_context(ExecutionKey::Task(1), |ctx| {
                ctx.ready();
                ctx.add("m", scores(), 2)
            })
            .unwrap()
            .unwrap();

        registry
            .with_context(ExecutionKey::current_thread(), |ctx| {
                assert_eq!(ctx.pending_len(), 0);
            })
            .unwrap();
        registry
            .with_context(ExecutionKey::Task(1), |ctx| {
                assert_eq!(ctx.pending_len(), 1);
                assert_eq!(ctx.top_k(), 2);
            })
            .unwrap();
    }

    #[test]
    fn exited_threads_release_their_contexts() {
        let registry = Arc::new(registry());

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    registry.ready().unwrap();
                    registry.add("m", scores(), 1).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 0);

        // Task keys are not tied to any thread.
        let tasks = Arc::clone(&registry);
        thread::spawn(move || {
            tasks
                .with_context(ExecutionKey::Task(9), TraceContext::ready)
                .unwrap()
        })
        .join()
        .unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn released_thread_context_starts_unarmed_again() {
        let registry = registry();
        registry.ready().unwrap();
        assert!(registry.release(ExecutionKey::current_thread()));
        assert_eq!(
            registry.add("m", scores(), 1).unwrap(),
            TraceOutcome::Skipped(SkipReason::NotArmed)
        );
    }

    #[test]
    fn dropped_registry_outlives_thread_guards() {
        let first = registry();
        first.ready().unwrap();
        drop(first);
        // The guard registered above now points at a dead registry; a new
        // registry on the same thread works independently.
        let fresh = registry();
        fresh.ready().unwrap();
        assert_eq!(fresh.len(), 1);
    }

    #[test]
    fn clear_drops_pending_window() {
        let registry = registry();
        registry.ready().unwrap();
        registry.add("m", scores(), 1).unwrap();
        registry.clear().unwrap();
        assert_eq!(
            registry.dump("unused-expert-trace.json", "decode").unwrap(),
            TraceOutcome::Skipped(SkipReason::NothingRecorded)
        );
    }
}
