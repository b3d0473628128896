//! Accelerator backend abstraction
//!
//! Tasks of an algorithm registered for [`Backend::Accelerator`] are handed
//! to an [`Accelerator`] instead of a worker thread. The accelerator runs
//! the work on one of its device queues and reports completion through a
//! callback, which may fire on a different thread than the one that
//! enqueued it.
//!
//! [`SimulatedAccelerator`] is the built-in implementation: every device
//! queue is a dedicated host thread and a single notification thread
//! delivers completions, mimicking the asynchronous completion model of
//! real device queues. [`DeviceManager`] assigns devices to tasks.
//!
//! [`Backend::Accelerator`]: crate::dispatch::Backend::Accelerator

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use tessera_core::{AcceleratorConfig, Descriptor, TesseraError, TesseraResult};

/// Unit of work executed on a device queue
pub type DeviceWork = Box<dyn FnOnce() -> TesseraResult<()> + Send>;

/// Completion callback invoked exactly once per accepted work item
pub type Completion = Box<dyn FnOnce(TesseraResult<()>) + Send>;

/// Device-side execution backend
pub trait Accelerator: Send + Sync + fmt::Debug {
    /// Human-readable backend name
    fn name(&self) -> &str;

    fn device_count(&self) -> usize;

    fn queues_per_device(&self) -> usize;

    /// Submit `work` to a queue of `device`
    ///
    /// On `Ok` the accelerator owns both closures and calls `on_complete`
    /// exactly once with the work's result. On `Err` both closures were
    /// dropped without running.
    fn enqueue(&self, device: usize, work: DeviceWork, on_complete: Completion) -> TesseraResult<()>;

    /// Counters since creation
    fn stats(&self) -> AcceleratorStats {
        AcceleratorStats::default()
    }
}

/// Snapshot of accelerator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AcceleratorStats {
    /// Work items accepted by `enqueue`
    pub launched: u64,
    /// Work items that returned `Ok`
    pub completed: u64,
    /// Work items that returned an error or panicked
    pub failed: u64,
    /// Total time spent running work, in microseconds
    pub busy_micros: u64,
}

#[derive(Debug, Default)]
struct Counters {
    launched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    busy_micros: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AcceleratorStats {
        AcceleratorStats {
            launched: self.launched.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            busy_micros: self.busy_micros.load(Ordering::Relaxed),
        }
    }
}

struct QueueItem {
    work: DeviceWork,
    on_complete: Completion,
}

type Notification = (TesseraResult<()>, Completion);

/// Host-thread simulation of a multi-device, multi-queue accelerator
pub struct SimulatedAccelerator {
    device_count: usize,
    queues_per_device: usize,
    queues: RwLock<Vec<Sender<QueueItem>>>,
    next_queue: Vec<AtomicUsize>,
    counters: Arc<Counters>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedAccelerator {
    /// Spawn `device_count * queues_per_device` queue threads and one
    /// notification thread
    ///
    /// # Errors
    ///
    /// `InvalidArgument` for zero devices or queues, `PlatformNotFound` if a
    /// thread cannot be spawned.
    pub fn new(device_count: usize, queues_per_device: usize) -> TesseraResult<Self> {
        if device_count == 0 || queues_per_device == 0 {
            return Err(TesseraError::invalid_argument(
                "accelerator needs at least one device and one queue",
            ));
        }

        let counters = Arc::new(Counters::default());
        let (notify_tx, notify_rx) = channel::unbounded::<Notification>();
        let mut threads = Vec::with_capacity(device_count * queues_per_device + 1);

        threads.push(spawn("tessera-accel-notify".to_string(), move || {
            for (result, on_complete) in notify_rx {
                on_complete(result);
            }
        })?);

        let mut queues = Vec::with_capacity(device_count * queues_per_device);
        for device in 0..device_count {
            for queue in 0..queues_per_device {
                let (tx, rx) = channel::unbounded::<QueueItem>();
                let notify = notify_tx.clone();
                let counters = Arc::clone(&counters);
                threads.push(spawn(format!("tessera-accel-{device}-{queue}"), move || {
                    run_queue(rx, notify, &counters)
                })?);
                queues.push(tx);
            }
        }

        tracing::info!(device_count, queues_per_device, "simulated accelerator started");
        Ok(Self {
            device_count,
            queues_per_device,
            queues: RwLock::new(queues),
            next_queue: (0..device_count).map(|_| AtomicUsize::new(0)).collect(),
            counters,
            threads: Mutex::new(threads),
        })
    }

    /// Build from the accelerator section of a library configuration
    pub fn from_config(config: &AcceleratorConfig) -> TesseraResult<Self> {
        Self::new(config.device_count, config.queues_per_device)
    }
}

fn spawn(name: String, f: impl FnOnce() + Send + 'static) -> TesseraResult<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|e| TesseraError::PlatformNotFound(format!("cannot spawn {name}: {e}")))
}

fn run_queue(rx: Receiver<QueueItem>, notify: Sender<Notification>, counters: &Counters) {
    for QueueItem { work, on_complete } in rx {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(work))
            .unwrap_or_else(|_| Err(TesseraError::generic("device work panicked")));
        counters
            .busy_micros
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
        if result.is_ok() {
            counters.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Err((result, on_complete)) = notify.send((result, on_complete)).map_err(|e| e.into_inner()) {
            // notification thread is gone, complete inline
            on_complete(result);
        }
    }
}

impl Accelerator for SimulatedAccelerator {
    fn name(&self) -> &str {
        "simulated"
    }

    fn device_count(&self) -> usize {
        self.device_count
    }

    fn queues_per_device(&self) -> usize {
        self.queues_per_device
    }

    fn enqueue(&self, device: usize, work: DeviceWork, on_complete: Completion) -> TesseraResult<()> {
        if device >= self.device_count {
            return Err(TesseraError::DeviceNotFound(format!(
                "device {device} of {}",
                self.device_count
            )));
        }
        let queue = self.next_queue[device].fetch_add(1, Ordering::Relaxed) % self.queues_per_device;
        let queues = self.queues.read();
        let sender = queues
            .get(device * self.queues_per_device + queue)
            .ok_or_else(|| TesseraError::invalid_state("accelerator is shut down"))?;
        sender
            .send(QueueItem { work, on_complete })
            .map_err(|_| TesseraError::invalid_state("accelerator queue closed"))?;
        self.counters.launched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn stats(&self) -> AcceleratorStats {
        self.counters.snapshot()
    }
}

impl fmt::Debug for SimulatedAccelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulatedAccelerator")
            .field("device_count", &self.device_count)
            .field("queues_per_device", &self.queues_per_device)
            .field("stats", &self.counters.snapshot())
            .finish()
    }
}

impl Drop for SimulatedAccelerator {
    fn drop(&mut self) {
        self.queues.write().clear();
        let current = thread::current().id();
        for handle in self.threads.lock().drain(..) {
            // the last reference may be released from a completion callback
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
        tracing::debug!("simulated accelerator stopped");
    }
}

/// Assigns devices to the tasks of a node
#[derive(Debug)]
pub struct DeviceManager {
    device_count: usize,
    next: AtomicUsize,
}

impl DeviceManager {
    pub fn new(device_count: usize) -> Self {
        Self {
            device_count,
            next: AtomicUsize::new(0),
        }
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    /// Devices for `count` tasks
    ///
    /// A valid `device_id` in the descriptor pins every task to that device;
    /// otherwise devices are handed out round-robin across calls.
    pub fn fetch_devices(&self, count: usize, descriptor: &Descriptor) -> Vec<usize> {
        if self.device_count == 0 {
            return Vec::new();
        }
        match descriptor.device_id {
            Some(id) if id < self.device_count => vec![id; count],
            pinned => {
                if let Some(id) = pinned {
                    tracing::warn!(device = id, available = self.device_count, "ignoring unknown device id");
                }
                let start = self.next.fetch_add(count, Ordering::Relaxed);
                (0..count).map(|k| (start + k) % self.device_count).collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_enqueue_completes_on_notification_thread() {
        let accel = SimulatedAccelerator::new(2, 2).unwrap();
        let (tx, rx) = mpsc::channel();
        accel
            .enqueue(
                1,
                Box::new(|| Ok(())),
                Box::new(move |result| {
                    let name = thread::current().name().map(str::to_string);
                    tx.send((result, name)).unwrap();
                }),
            )
            .unwrap();
        let (result, name) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(result.is_ok());
        assert_eq!(name.as_deref(), Some("tessera-accel-notify"));
    }

    #[test]
    fn test_failed_and_panicking_work() {
        let accel = SimulatedAccelerator::new(1, 1).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        accel
            .enqueue(
                0,
                Box::new(|| Err(TesseraError::generic("boom"))),
                Box::new(move |r| tx.send(r).unwrap()),
            )
            .unwrap();
        accel
            .enqueue(0, Box::new(|| panic!("device fault")), Box::new(move |r| tx2.send(r).unwrap()))
            .unwrap();
        for _ in 0..2 {
            assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().is_err());
        }
        let stats = accel.stats();
        assert_eq!(stats.launched, 2);
        assert_eq!(stats.failed, 2);
    }

    #[test]
    fn test_unknown_device() {
        let accel = SimulatedAccelerator::new(1, 1).unwrap();
        let err = accel
            .enqueue(3, Box::new(|| Ok(())), Box::new(|_| {}))
            .unwrap_err();
        assert!(matches!(err, TesseraError::DeviceNotFound(_)));
        assert!(SimulatedAccelerator::new(0, 1).is_err());
    }

    #[test]
    fn test_device_manager_round_robin() {
        let manager = DeviceManager::new(3);
        let desc = Descriptor::default();
        assert_eq!(manager.fetch_devices(4, &desc), vec![0, 1, 2, 0]);
        assert_eq!(manager.fetch_devices(2, &desc), vec![1, 2]);
    }

    #[test]
    fn test_device_manager_pinned() {
        let manager = DeviceManager::new(2);
        assert_eq!(manager.fetch_devices(3, &Descriptor::default().with_device_id(1)), vec![1, 1, 1]);
        // out-of-range id falls back to round-robin
        assert_eq!(manager.fetch_devices(2, &Descriptor::default().with_device_id(9)), vec![0, 1]);
        assert!(DeviceManager::new(0).fetch_devices(2, &Descriptor::default()).is_empty());
    }
}
