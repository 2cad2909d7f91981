//! The one cross-thread cell: the latest fingerprint, copied in and out whole
//! under a single lock, gated on the pipeline's running flag.

use std::sync::{ atomic::{ AtomicBool, AtomicU64, Ordering }, Mutex };

use super::PipelineError;

struct Stored {
    fingerprint: Box<[f32]>,
    /// At least one fingerprint was published since the last `begin`.
    fresh: bool,
}

pub struct FingerprintPublisher {
    stored: Mutex<Stored>,
    /// Written only while `stored` is held, so publish/snapshot see a
    /// consistent value. Read lock-free by the producer to skip work.
    running: AtomicBool,
    /// Bumped by every `begin`, under the same lock. A producer may only
    /// publish for the generation whose reset it honoured.
    generation: AtomicU64,
    reset_pending: AtomicBool,
}

impl FingerprintPublisher {
    pub fn new(fp_length: usize) -> Self {
        Self {
            stored: Mutex::new(Stored {
                fingerprint: vec![0.0; fp_length].into_boxed_slice(),
                fresh: false,
            }),
            running: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            reset_pending: AtomicBool::new(false),
        }
    }

    pub fn fp_length(&self) -> usize {
        match self.stored.lock() {
            Ok(s) => s.fingerprint.len(),
            Err(poisoned) => poisoned.into_inner().fingerprint.len(),
        }
    }

    /// Copies `fp` over the stored fingerprint. Returns `Ok(false)` without
    /// writing when the pipeline is not running, or when `generation` is not
    /// the current one (the data predates the latest `begin`).
    pub fn publish(&self, fp: &[f32], generation: u64) -> Result<bool, PipelineError> {
        let mut stored = self.stored.lock().map_err(|_| PipelineError::LockPoisoned)?;
        if !self.running.load(Ordering::Acquire) {
            return Ok(false);
        }
        if self.generation.load(Ordering::Acquire) != generation {
            return Ok(false);
        }
        if stored.fingerprint.len() != fp.len() {
            return Err(PipelineError::LengthMismatch {
                expected: stored.fingerprint.len(),
                got: fp.len(),
            });
        }
        stored.fingerprint.copy_from_slice(fp);
        stored.fresh = true;
        Ok(true)
    }

    /// Copies the current fingerprint into `out`. Fails without touching
    /// `out` while stopped, before the first fingerprint after a start, or
    /// on a length mismatch.
    pub fn snapshot(&self, out: &mut [f32]) -> bool {
        // a poisoned lock still guards a complete vector: publish never
        // panics mid-copy
        let stored = match self.stored.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        if !self.running.load(Ordering::Acquire) || !stored.fresh {
            return false;
        }
        if out.len() != stored.fingerprint.len() {
            return false;
        }
        out.copy_from_slice(&stored.fingerprint);
        true
    }

    /// Marks the pipeline running and asks the producer to start from empty
    /// buffers.
    pub fn begin(&self) {
        let mut stored = match self.stored.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        stored.fresh = false;
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.reset_pending.store(true, Ordering::Release);
        self.running.store(true, Ordering::Release);
    }

    /// Marks the pipeline idle. Once this returns no later publish is visible.
    pub fn halt(&self) {
        let _stored = match self.stored.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn request_reset(&self) {
        self.reset_pending.store(true, Ordering::Release);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Consumes a pending reset request, returning the generation the
    /// producer publishes for from now on.
    pub(crate) fn take_reset_request(&self) -> Option<u64> {
        if self.reset_pending.swap(false, Ordering::AcqRel) {
            Some(self.generation())
        } else {
            None
        }
    }
}
