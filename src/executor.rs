//! The opaque scheduler abstraction. An [`Executor`] accepts blocks for
//! immediate, asynchronous, or delayed execution; `derived_serial` produces
//! an executor that totally orders a subset of submissions without
//! serializing the whole backing pool.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use dupe::Dupe;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio::runtime::Builder;
use tokio::runtime::Runtime;

type Block = Box<dyn FnOnce() + Send + 'static>;

/// A scheduler. Cheap to clone; all variants share their backing state via
/// `Arc`, so `Executor` identity (pointer equality) is meaningful for the
/// global presets in [`crate::executor`]'s free functions.
#[derive(Clone, Dupe)]
pub struct Executor(pub(crate) Arc<Inner>);

pub(crate) enum Inner {
    Immediate,
    Pool { name: &'static str, pool: PoolHandle },
    Serial {
        name: String,
        backing: Executor,
        state: Mutex<SerialState>,
    },
}

pub(crate) struct SerialState {
    queue: VecDeque<Block>,
    running: bool,
}

#[derive(Clone)]
pub(crate) struct PoolHandle(Arc<Runtime>);

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            Inner::Immediate => write!(f, "Executor::Immediate"),
            Inner::Pool { name, .. } => write!(f, "Executor::Pool({name})"),
            Inner::Serial { name, .. } => write!(f, "Executor::Serial({name})"),
        }
    }
}

impl PartialEq for Executor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}
impl Eq for Executor {}

impl Executor {
    /// Runs `block` inline on the calling thread. Never asynchronous.
    pub fn immediate() -> Executor {
        static IMMEDIATE: Lazy<Executor> = Lazy::new(|| Executor(Arc::new(Inner::Immediate)));
        IMMEDIATE.clone()
    }

    /// Schedules `block` per this executor's policy. Must not run
    /// synchronously unless `self` is the `immediate` variant.
    pub fn execute(&self, block: impl FnOnce() + Send + 'static) {
        match &*self.0 {
            Inner::Immediate => block(),
            Inner::Pool { pool, .. } => {
                let span = tracing::Span::current();
                pool.0.spawn_blocking(move || {
                    let _enter = span.enter();
                    block();
                });
            }
            Inner::Serial { .. } => self.submit_serial(Box::new(block)),
        }
    }

    /// Schedules `block` after `delay`. Not cancellable through the
    /// executor itself; pair with a [`crate::CancellationToken`] for that.
    pub fn execute_after(&self, delay: Duration, block: impl FnOnce() + Send + 'static) {
        let this = self.clone();
        timer_runtime().spawn(async move {
            tokio::time::sleep(delay).await;
            this.execute(block);
        });
    }

    /// Returns a new executor whose submissions are totally ordered with
    /// respect to each other and never run concurrently, even though they
    /// still execute on `self`'s underlying threads.
    pub fn derived_serial(&self) -> Executor {
        Executor(Arc::new(Inner::Serial {
            name: format!("{self:?}/serial"),
            backing: self.clone(),
            state: Mutex::new(SerialState {
                queue: VecDeque::new(),
                running: false,
            }),
        }))
    }

    fn submit_serial(&self, block: Block) {
        let (backing, state) = match &*self.0 {
            Inner::Serial { backing, state, .. } => (backing, state),
            _ => unreachable!("submit_serial called on a non-serial executor"),
        };

        let should_start = {
            let mut guard = state.lock();
            guard.queue.push_back(block);
            if guard.running {
                false
            } else {
                guard.running = true;
                true
            }
        };

        if should_start {
            let this = self.clone();
            backing.execute(move || this.drain_serial());
        }
    }

    /// Drains the serial queue until empty. Only ever in flight on one
    /// thread at a time, enforced by the `running` flag — the classic
    /// serial-dispatcher pattern.
    fn drain_serial(&self) {
        let state = match &*self.0 {
            Inner::Serial { state, .. } => state,
            _ => unreachable!("drain_serial called on a non-serial executor"),
        };

        loop {
            let next = {
                let mut guard = state.lock();
                match guard.queue.pop_front() {
                    Some(block) => Some(block),
                    None => {
                        guard.running = false;
                        None
                    }
                }
            };
            match next {
                Some(block) => block(),
                None => break,
            }
        }
    }
}

fn timer_runtime() -> &'static Runtime {
    static TIMER: Lazy<Runtime> = Lazy::new(|| {
        Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("skein-timer")
            .enable_time()
            .build()
            .expect("failed to start skein timer runtime")
    });
    &TIMER
}

fn build_pool(name: &'static str, workers: usize) -> PoolHandle {
    PoolHandle(Arc::new(
        Builder::new_multi_thread()
            .worker_threads(workers.max(1))
            .thread_name(name)
            .enable_all()
            .build()
            .unwrap_or_else(|e| panic!("failed to start {name} pool: {e}")),
    ))
}

macro_rules! preset {
    ($fn_name:ident, $name:literal, $workers:expr) => {
        pub fn $fn_name() -> Executor {
            static POOL: Lazy<Executor> = Lazy::new(|| {
                Executor(Arc::new(Inner::Pool {
                    name: $name,
                    pool: build_pool($name, $workers),
                }))
            });
            POOL.clone()
        }
    };
}

impl Executor {
    preset!(main, "skein-main", 1);
    preset!(user_interactive, "skein-user-interactive", 2);
    preset!(user_initiated, "skein-user-initiated", 4);
    preset!(default_qos, "skein-default", 4);
    preset!(utility, "skein-utility", 2);
    preset!(background, "skein-background", 1);

    /// Alias for [`Executor::default_qos`].
    pub fn primary() -> Executor {
        Executor::default_qos()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    #[test]
    fn immediate_runs_inline() {
        let mut ran = false;
        Executor::immediate().execute(|| ran = true);
        assert!(ran);
    }

    #[test]
    fn serial_executor_preserves_order() {
        let serial = Executor::default_qos().derived_serial();
        let order = Arc::new(Mutex::new(Vec::new()));

        let (tx, rx) = std::sync::mpsc::channel();
        for i in 0..50 {
            let order = order.clone();
            let tx = tx.clone();
            serial.execute(move || {
                order.lock().push(i);
                if i == 49 {
                    tx.send(()).unwrap();
                }
            });
        }
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(*order.lock(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn execute_after_runs_once_delay_elapses() {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let (tx, rx) = std::sync::mpsc::channel();
        Executor::background().execute_after(Duration::from_millis(20), move || {
            c.fetch_add(1, Ordering::SeqCst);
            tx.send(()).unwrap();
        });
        assert_eq!(counter.load(Ordering::SeqCst), 0);
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn presets_are_stable_identities() {
        assert_eq!(Executor::primary(), Executor::default_qos());
        assert_eq!(Executor::main(), Executor::main());
    }
}
