use super::copy_forward::{CopyForwardAction, CopyForwardScheme, CopyForwardTask};
use super::park::ParkGroup;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use crossbeam_deque::{Injector, Steal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// The per-thread identity handed to scheme callbacks, used for worker-local
/// copy caches and the like.
pub struct GcWorker {
    pub id: usize,
}

impl GcWorker {
    pub fn new(id: usize) -> GcWorker {
        GcWorker { id }
    }
}

/// State shared by every worker of a pool.
struct PoolState {
    /// Unpinned work, stealable by any worker.
    global: Injector<CopyForwardTask>,

    /// Whether the pool should keep running.
    alive: AtomicBool,

    /// Parks idle workers between dispatches.
    park_group: ParkGroup,
}

impl PoolState {
    fn new() -> PoolState {
        PoolState {
            global: Injector::new(),
            alive: AtomicBool::new(true),
            park_group: ParkGroup::new(),
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn steal_global(&self) -> Option<CopyForwardTask> {
        loop {
            match self.global.steal() {
                Steal::Empty => return None,
                Steal::Retry => {}
                Steal::Success(task) => return Some(task),
            }
        }
    }
}

/// A pool of OS threads that runs copy-forward work items.
///
/// Work arrives either on the global queue (any worker may take it) or
/// pinned to a specific worker. Pinning one item per worker and collecting
/// one acknowledgement per worker is what turns a set of unordered workers
/// into a phase barrier.
pub struct GcWorkerPool {
    state: Arc<PoolState>,
    pinned: Vec<Sender<CopyForwardTask>>,
    handles: Vec<thread::JoinHandle<()>>,
}

impl GcWorkerPool {
    pub fn new(workers: usize) -> GcWorkerPool {
        assert!(workers > 0, "a GcWorkerPool requires at least one worker");

        let state = Arc::new(PoolState::new());
        let mut pinned = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for id in 0..workers {
            let (sender, receiver) = unbounded();

            pinned.push(sender);
            handles.push(Self::spawn_worker(id, state.clone(), receiver));
        }

        GcWorkerPool {
            state,
            pinned,
            handles,
        }
    }

    /// A pool sized by the embedder's configuration.
    pub fn from_config(config: &crate::config::Config) -> GcWorkerPool {
        GcWorkerPool::new(config.gc_workers)
    }

    pub fn workers(&self) -> usize {
        self.pinned.len()
    }

    /// Schedules a task onto the global queue; whichever worker wakes first
    /// takes it.
    pub fn dispatch(&self, task: CopyForwardTask) {
        trace!("dispatching {:?} copy forward work item", task.action());

        self.state.global.push(task);
        self.state.park_group.notify_one();
    }

    /// Runs one phase on every worker and blocks until all of them are done.
    pub fn run_phase(&self, action: CopyForwardAction, scheme: &Arc<dyn CopyForwardScheme>) {
        let workers = self.workers();
        let (done, acks) = bounded(workers);

        for sender in &self.pinned {
            let task = CopyForwardTask::new(action, scheme.clone(), Some(done.clone()));

            // The receiving end only disappears after terminate(), at which
            // point no phase should be running anyway.
            let _ = sender.send(task);
        }

        // Pinned sends cannot target a specific sleeper, so wake everyone.
        self.state.park_group.notify_all();

        drop(done);
        Self::await_acks(&acks, workers);
    }

    /// Drives a full copy-forward cycle: every worker processes roots, then
    /// all of them scan, then all of them complete, with a barrier between
    /// the phases.
    pub fn run_copy_forward(&self, scheme: &Arc<dyn CopyForwardScheme>) {
        trace!("copy forward: roots phase across {} workers", self.workers());
        self.run_phase(CopyForwardAction::Roots, scheme);

        trace!("copy forward: scan phase");
        self.run_phase(CopyForwardAction::Scan, scheme);

        trace!("copy forward: completion phase");
        self.run_phase(CopyForwardAction::Complete, scheme);
    }

    /// Runs every phase back to back on each worker, without fencing the
    /// phases against each other. Suitable when the units of work are
    /// independent per worker.
    pub fn run_to_completion(&self, scheme: &Arc<dyn CopyForwardScheme>) {
        self.run_phase(CopyForwardAction::All, scheme);
    }

    /// Shuts the workers down and joins their threads.
    pub fn terminate(&mut self) {
        self.state.alive.store(false, Ordering::Release);
        self.state.park_group.notify_all();

        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn await_acks(acks: &Receiver<()>, expected: usize) {
        for _ in 0..expected {
            if acks.recv().is_err() {
                // A worker died with the ack sender; nothing left to wait on.
                warn!("copy forward phase barrier broken, worker lost");
                return;
            }
        }
    }

    fn spawn_worker(
        id: usize,
        state: Arc<PoolState>,
        pinned: Receiver<CopyForwardTask>,
    ) -> thread::JoinHandle<()> {
        thread::Builder::new()
            .name(format!("gc-worker-{}", id))
            .spawn(move || {
                let worker = GcWorker::new(id);

                while state.is_alive() {
                    if let Ok(task) = pinned.try_recv() {
                        task.run(&worker);
                        continue;
                    }

                    if let Some(task) = state.steal_global() {
                        task.run(&worker);
                        continue;
                    }

                    state.park_group.park_while(|| {
                        state.is_alive() && pinned.is_empty() && state.global.is_empty()
                    });
                }
            })
            .expect("failed to spawn a GC worker thread")
    }
}

impl Drop for GcWorkerPool {
    fn drop(&mut self) {
        if !self.handles.is_empty() {
            self.terminate();
        }
    }
}
