use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use mockall::mock;
use tlmu::bus::MemoryTarget;
use tlmu::common::Dmi;
use tlmu::{AccessStatus, BusTarget, Direction};

mock! {
    pub Target {}
    impl BusTarget for Target {
        fn access(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus;
        fn access_debug(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]);
        fn get_dmi(&self, addr: u64, dmi: &mut Dmi);
        fn sync(&self, time_ns: u64);
    }
}

/// A memory target the test keeps a handle on while the module owns the other.
#[derive(Clone, Debug)]
pub struct SharedMemory {
    pub inner: Arc<MemoryTarget>,
}

impl SharedMemory {
    pub fn new(base: u64, size: usize) -> Self {
        Self {
            inner: Arc::new(MemoryTarget::new(base, size)),
        }
    }

    pub fn snapshot(&self, offset: usize, len: usize) -> Vec<u8> {
        self.inner.contents()[offset..offset + len].to_vec()
    }
}

impl BusTarget for SharedMemory {
    fn access(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus {
        self.inner.access(clock, dir, addr, data)
    }

    fn access_debug(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) {
        self.inner.access_debug(clock, dir, addr, data);
    }

    fn get_dmi(&self, addr: u64, dmi: &mut Dmi) {
        self.inner.get_dmi(addr, dmi);
    }

    fn sync(&self, time_ns: u64) {
        self.inner.sync(time_ns);
    }
}

/// A target whose every callback panics.
#[derive(Debug, Default)]
pub struct PanickingTarget;

impl BusTarget for PanickingTarget {
    fn access(&self, _clock: i64, _dir: Direction, addr: u64, _data: &mut [u8]) -> AccessStatus {
        panic!("bus fault at {addr:#x}");
    }

    fn access_debug(&self, _clock: i64, _dir: Direction, addr: u64, _data: &mut [u8]) {
        panic!("debug fault at {addr:#x}");
    }

    fn sync(&self, _time_ns: u64) {
        panic!("sync fault");
    }
}

/// How long the first `sync` of a [`HandshakeTarget`] waits for the bus side.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// A memory target whose first `sync` blocks until the bus side writes to `doorbell`.
///
/// This is the co-simulation handshake: the module thread parks in `sync` while the bus
/// thread issues an access that the module routes back to this same target.
#[derive(Clone, Debug)]
pub struct HandshakeTarget {
    inner: Arc<Handshake>,
}

#[derive(Debug)]
struct Handshake {
    memory: MemoryTarget,
    doorbell: u64,
    started: AtomicBool,
    entered: Mutex<Option<Sender<()>>>,
    rung: Mutex<bool>,
    ring: Condvar,
    outcome: Mutex<Option<bool>>,
}

impl HandshakeTarget {
    /// Returns the target and a receiver signalled once the first `sync` starts waiting.
    pub fn new(base: u64, size: usize, doorbell: u64) -> (Self, Receiver<()>) {
        let (tx, rx) = mpsc::channel();
        let target = Self {
            inner: Arc::new(Handshake {
                memory: MemoryTarget::new(base, size),
                doorbell,
                started: AtomicBool::new(false),
                entered: Mutex::new(Some(tx)),
                rung: Mutex::new(false),
                ring: Condvar::new(),
                outcome: Mutex::new(None),
            }),
        };
        (target, rx)
    }

    /// `Some(true)` once the first `sync` saw the doorbell, `Some(false)` if it timed out.
    pub fn outcome(&self) -> Option<bool> {
        *self.inner.outcome.lock().unwrap()
    }

    pub fn memory(&self) -> &MemoryTarget {
        &self.inner.memory
    }
}

impl BusTarget for HandshakeTarget {
    fn access(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) -> AccessStatus {
        let status = self.inner.memory.access(clock, dir, addr, data);
        if dir == Direction::Write && addr == self.inner.doorbell {
            *self.inner.rung.lock().unwrap() = true;
            self.inner.ring.notify_all();
        }
        status
    }

    fn access_debug(&self, clock: i64, dir: Direction, addr: u64, data: &mut [u8]) {
        self.inner.memory.access_debug(clock, dir, addr, data);
    }

    fn get_dmi(&self, addr: u64, dmi: &mut Dmi) {
        self.inner.memory.get_dmi(addr, dmi);
    }

    fn sync(&self, time_ns: u64) {
        self.inner.memory.sync(time_ns);
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let rung = self.inner.rung.lock().unwrap();
        if let Some(tx) = self.inner.entered.lock().unwrap().take() {
            let _ = tx.send(());
        }
        let (rung, _) = self
            .inner
            .ring
            .wait_timeout_while(rung, HANDSHAKE_TIMEOUT, |rung| !*rung)
            .unwrap();
        *self.inner.outcome.lock().unwrap() = Some(*rung);
    }
}
