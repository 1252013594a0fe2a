use super::pool::GcWorker;
use crossbeam_channel::Sender;
use std::sync::Arc;

/// What a copy-forward work item asks a worker to do.
///
/// `All` drives every phase back to back on one worker; the single-phase
/// actions exist so the pool can fence phases across workers with a barrier
/// between them.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum CopyForwardAction {
    All,
    Roots,
    Scan,
    Complete,
}

/// The collector-side implementation of the copy-forward phases.
///
/// The scheduler knows nothing about what a phase does; it only sequences
/// them. Every method is invoked in parallel, once per participating worker.
pub trait CopyForwardScheme: Send + Sync {
    /// Scans the root set, copying the objects it reaches.
    fn process_roots(&self, worker: &GcWorker);

    /// Scans copied objects, copying whatever they reference.
    fn scan(&self, worker: &GcWorker);

    /// Finishes the cycle: flushes copy caches and publishes results.
    fn complete(&self, worker: &GcWorker);
}

/// One unit of copy-forward work, bound to a scheme and optionally to an
/// acknowledgement channel the pool uses as its phase barrier.
pub struct CopyForwardTask {
    action: CopyForwardAction,
    scheme: Arc<dyn CopyForwardScheme>,
    done: Option<Sender<()>>,
}

impl CopyForwardTask {
    pub fn new(
        action: CopyForwardAction,
        scheme: Arc<dyn CopyForwardScheme>,
        done: Option<Sender<()>>,
    ) -> CopyForwardTask {
        CopyForwardTask {
            action,
            scheme,
            done,
        }
    }

    pub fn action(&self) -> CopyForwardAction {
        self.action
    }

    /// Runs the requested phase (or all of them) on the calling worker, then
    /// acknowledges completion when a barrier is waiting.
    pub fn run(&self, worker: &GcWorker) {
        match self.action {
            CopyForwardAction::All => {
                self.scheme.process_roots(worker);
                self.scheme.scan(worker);
                self.scheme.complete(worker);
            }
            CopyForwardAction::Roots => self.scheme.process_roots(worker),
            CopyForwardAction::Scan => self.scheme.scan(worker),
            CopyForwardAction::Complete => self.scheme.complete(worker),
        }

        if let Some(done) = &self.done {
            // The barrier may already have been abandoned; that is not the
            // worker's problem.
            let _ = done.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct RecordingScheme {
        log: Mutex<Vec<&'static str>>,
    }

    impl RecordingScheme {
        fn new() -> RecordingScheme {
            RecordingScheme {
                log: Mutex::new(Vec::new()),
            }
        }
    }

    impl CopyForwardScheme for RecordingScheme {
        fn process_roots(&self, _worker: &GcWorker) {
            self.log.lock().push("roots");
        }

        fn scan(&self, _worker: &GcWorker) {
            self.log.lock().push("scan");
        }

        fn complete(&self, _worker: &GcWorker) {
            self.log.lock().push("complete");
        }
    }

    #[test]
    fn all_runs_every_phase_in_order() {
        let scheme = Arc::new(RecordingScheme::new());
        let task = CopyForwardTask::new(CopyForwardAction::All, scheme.clone(), None);

        task.run(&GcWorker::new(0));

        assert_eq!(*scheme.log.lock(), vec!["roots", "scan", "complete"]);
    }

    #[test]
    fn single_phase_actions_run_only_their_phase() {
        let scheme = Arc::new(RecordingScheme::new());

        CopyForwardTask::new(CopyForwardAction::Scan, scheme.clone(), None)
            .run(&GcWorker::new(0));
        CopyForwardTask::new(CopyForwardAction::Complete, scheme.clone(), None)
            .run(&GcWorker::new(0));

        assert_eq!(*scheme.log.lock(), vec!["scan", "complete"]);
    }

    #[test]
    fn completion_is_acknowledged() {
        let scheme = Arc::new(RecordingScheme::new());
        let (tx, rx) = crossbeam_channel::bounded(1);

        CopyForwardTask::new(CopyForwardAction::Roots, scheme, Some(tx))
            .run(&GcWorker::new(3));

        assert!(rx.try_recv().is_ok());
    }
}
