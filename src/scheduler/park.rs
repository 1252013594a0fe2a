use parking_lot::{Condvar, Mutex};

/// Parks and wakes the pool's worker threads.
///
/// The group carries no value of its own; sleepers pass the condition they
/// are waiting out to `park_while`.
pub struct ParkGroup {
    mutex: Mutex<()>,
    cvar: Condvar,
}

impl ParkGroup {
    pub fn new() -> ParkGroup {
        ParkGroup {
            mutex: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    pub fn notify_all(&self) {
        // Taking the lock first closes the window between a sleeper checking
        // its condition and actually blocking on the condvar.
        let _lock = self.mutex.lock();

        self.cvar.notify_all();
    }

    pub fn notify_one(&self) {
        let _lock = self.mutex.lock();

        self.cvar.notify_one();
    }

    /// Parks the current thread for as long as the condition holds.
    pub fn park_while<F>(&self, condition: F)
    where
        F: Fn() -> bool,
    {
        let mut lock = self.mutex.lock();

        while condition() {
            self.cvar.wait(&mut lock);
        }
    }
}
