//! A process-wide bounded task queue.
//!
//! One `TaskQueue` is constructed at startup and shared (via `Arc`) with
//! every component that runs background work. Units of work are drained in
//! FIFO order by a fixed pool of worker threads; cancellation is cooperative.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

/// The concurrency ceiling used by [`TaskQueue::default`].
pub const DEFAULT_CONCURRENCY: usize = 4;

/// A cooperative cancellation flag, shared between a task and whoever holds
/// its handle.
///
/// A cancelled unit that has not started never runs its body. A unit that is
/// already running is expected to check the token at its next checkpoint, in
/// particular before launching any subprocess, and bail out. Nothing is ever
/// interrupted forcibly.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A handle to one submitted unit of work. Dropping the handle does not
/// cancel the unit.
pub struct TaskHandle {
    token: CancellationToken,
}

impl TaskHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

struct Job {
    token: CancellationToken,
    work: Box<dyn FnOnce() + Send>,
}

/// A FIFO work queue drained by a fixed number of worker threads.
///
/// At most `max_concurrency` units execute at any moment; when a running
/// unit finishes, the next queued unit (if any) starts. There are no
/// priorities and no result channel; units communicate through whatever
/// side effect they perform.
pub struct TaskQueue {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn new(max_concurrency: usize) -> Self {
        assert!(max_concurrency > 0);
        let (sender, receiver) = crossbeam_channel::unbounded::<Job>();
        let workers = (0..max_concurrency)
            .map(|_| {
                let receiver: Receiver<Job> = receiver.clone();
                std::thread::spawn(move || {
                    while let Ok(job) = receiver.recv() {
                        if job.token.is_cancelled() {
                            // Never even enter the body of a unit that was
                            // cancelled while queued.
                            continue;
                        }
                        (job.work)();
                    }
                })
            })
            .collect();
        TaskQueue {
            sender: Some(sender),
            workers,
        }
    }

    /// Enqueues a unit of work and returns a handle that can cancel it.
    pub fn submit<F>(&self, work: F) -> TaskHandle
    where
        F: FnOnce() + Send + 'static,
    {
        let token = CancellationToken::new();
        self.submit_with_token(token.clone(), work);
        TaskHandle { token }
    }

    /// Enqueues a unit of work governed by a caller-supplied token, so that
    /// many units can share one cancellation scope.
    pub fn submit_with_token<F>(&self, token: CancellationToken, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let job = Job {
            token,
            work: Box::new(work),
        };
        // The workers only stop receiving when the queue is dropped, so the
        // send can only fail during teardown, where losing the unit is fine.
        if let Some(sender) = &self.sender {
            let _ = sender.send(job);
        }
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        TaskQueue::new(DEFAULT_CONCURRENCY)
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain the remaining queue and
        // exit their recv loops.
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_submitted_work() {
        let queue = TaskQueue::new(2);
        let (done_sender, done_receiver) = crossbeam_channel::unbounded();
        for i in 0..8 {
            let done_sender = done_sender.clone();
            queue.submit(move || {
                done_sender.send(i).unwrap();
            });
        }
        let mut seen: Vec<i32> = (0..8).map(|_| done_receiver.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn never_exceeds_the_concurrency_ceiling() {
        let queue = TaskQueue::new(4);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (done_sender, done_receiver) = crossbeam_channel::unbounded();

        for _ in 0..10 {
            let running = running.clone();
            let peak = peak.clone();
            let done_sender = done_sender.clone();
            queue.submit(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(20));
                running.fetch_sub(1, Ordering::SeqCst);
                done_sender.send(()).unwrap();
            });
        }
        for _ in 0..10 {
            done_receiver.recv().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn cancelled_queued_unit_never_runs() {
        // One worker: the gate job occupies it while the victim is queued.
        let queue = TaskQueue::new(1);
        let (gate_sender, gate_receiver) = crossbeam_channel::bounded::<()>(0);
        queue.submit(move || {
            let _ = gate_receiver.recv();
        });

        let ran = Arc::new(AtomicBool::new(false));
        let ran2 = ran.clone();
        let victim = queue.submit(move || {
            ran2.store(true, Ordering::SeqCst);
        });
        victim.cancel();
        gate_sender.send(()).unwrap();

        // A sentinel submitted after the victim proves the victim's slot was
        // reached and skipped.
        let (done_sender, done_receiver) = crossbeam_channel::bounded(1);
        queue.submit(move || {
            done_sender.send(()).unwrap();
        });
        done_receiver.recv().unwrap();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn in_flight_work_observes_its_token() {
        let queue = TaskQueue::new(1);
        let token = CancellationToken::new();
        let (entered_sender, entered_receiver) = crossbeam_channel::bounded(1);
        let (checked_sender, checked_receiver) = crossbeam_channel::bounded(1);
        let task_token = token.clone();
        queue.submit_with_token(token.clone(), move || {
            entered_sender.send(()).unwrap();
            // The unit's cancellation checkpoint.
            while !task_token.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            checked_sender.send(()).unwrap();
        });
        entered_receiver.recv().unwrap();
        token.cancel();
        checked_receiver.recv().unwrap();
    }
}
