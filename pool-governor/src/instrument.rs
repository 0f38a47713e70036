use std::fmt;
use std::sync::Arc;
use std::thread::{self, Thread};

use pool_governor_api::{ExecutionHooks, TaskContext, TaskError};

use crate::config::SharedConfig;
use crate::governor::Governor;
use crate::logging::{LogSink, sink_error, sink_warn};
use crate::statistics::Statistics;

/// Execution hooks feeding a pool's [`Statistics`] and tying its termination to the
/// governor.
///
/// Nothing in here may fail into the worker: a missing start record is logged and the task
/// completion carries on.
pub struct Instrumentation {
    config: SharedConfig,
    statistics: Arc<Statistics>,
    governor: Arc<Governor>,
    sink: Arc<dyn LogSink>,
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("identity", &self.config.read().identity())
            .field("statistics", &self.statistics)
            .finish()
    }
}

impl Instrumentation {
    pub fn new(config: SharedConfig, statistics: Arc<Statistics>, governor: Arc<Governor>) -> Self {
        let sink = Arc::clone(governor.sink());
        Self {
            config,
            statistics,
            governor,
            sink,
        }
    }
}

impl ExecutionHooks for Instrumentation {
    fn before_execute(&self, thread: &Thread, task: &TaskContext) {
        self.statistics.record_start(thread, task);
    }

    fn after_execute(&self, task: &TaskContext, error: Option<&TaskError>) {
        let current = thread::current();
        if self.statistics.record_finish(task, current.id()).is_none() {
            sink_error!(
                self.sink,
                "Thread pool '{}' has no execution record of {} on thread {:?}",
                self.config.read().identity(),
                task,
                current.id()
            );
        }
        if let Some(error) = error {
            sink_warn!(
                self.sink,
                "Task {} in thread pool {} failed: {}",
                task,
                self.config.read().identity(),
                error
            );
        }
    }

    fn terminated(&self) {
        self.governor.unregister(&self.config);
    }
}
