//! Cross-thread lifecycle scenarios: completion, cancellation latency,
//! read-scope blocking, and the at-most-one-worker guarantee.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, mpsc};
use std::time::{Duration, Instant};

use vireo::{
    LinearRgba, RenderSession, Resolution, RowRange, Sample, Sampler, SessionOpts, VireoError,
    VireoResult, WorkerState,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn res(w: u32, h: u32) -> Resolution {
    Resolution::new(w, h).unwrap()
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for condition");
        std::thread::sleep(Duration::from_millis(2));
    }
}

fn expand(ranges: &[RowRange]) -> Vec<u32> {
    ranges.iter().flat_map(|r| r.start..r.end).collect()
}

/// Blocks every sample call until the gate is released.
struct GateSampler {
    gate: Mutex<bool>,
    cond: Condvar,
}

impl GateSampler {
    fn new() -> Self {
        Self {
            gate: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    fn release(&self) {
        *self.gate.lock().unwrap() = true;
        self.cond.notify_all();
    }
}

impl Sampler for GateSampler {
    fn sample(&self, _x: u32, _y: u32) -> VireoResult<Sample> {
        let mut open = self.gate.lock().unwrap();
        while !*open {
            open = self.cond.wait(open).unwrap();
        }
        Ok(Sample {
            color: LinearRgba::OPAQUE_BLACK,
            depth: 0.0,
        })
    }
}

/// A 4x3 pass with the normalized-position sampler runs to completion; every
/// row is reported ready exactly once; row 1 holds the expected gradient
/// values.
#[test]
fn pass_completes_with_exactly_once_row_delivery() {
    let sampler = move |x: u32, y: u32| -> VireoResult<Sample> {
        Ok(Sample {
            color: LinearRgba::new(x as f32 / 4.0, y as f32 / 3.0, 0.0, 1.0),
            depth: 1.0,
        })
    };
    let mut sess = RenderSession::new(Arc::new(sampler), SessionOpts::default());
    let adapter = sess.display_adapter();
    sess.start(res(4, 3)).unwrap();

    let mut seen_rows = Vec::new();
    while !sess.is_completed() {
        if let Some(view) = adapter.acquire_for_read() {
            seen_rows.extend(expand(view.dirty_rows()));
        }
        std::thread::sleep(Duration::from_millis(1));
    }

    let view = adapter.acquire_for_read().unwrap();
    seen_rows.extend(expand(view.dirty_rows()));
    seen_rows.sort_unstable();
    assert_eq!(seen_rows, vec![0, 1, 2], "each row delivered exactly once");

    let row = view.frame().color().read_row(1).unwrap();
    let reds: Vec<f32> = row.iter().map(|c| c.r).collect();
    assert_eq!(reds, vec![0.0, 0.25, 0.5, 0.75]);
    assert!(row.iter().all(|c| c.g == 1.0 / 3.0));
    assert!(!view.frame().is_open(), "completed pass closes all channels");
    drop(view);

    assert!(sess.is_completed());
    sess.stop().unwrap();
}

/// stop() while the sampler is stuck mid-row returns once the per-row
/// cancellation check fires, with channels closed, not left open.
#[test]
fn stop_returns_after_row_granular_cancel() {
    init_tracing();
    let sampler = Arc::new(GateSampler::new());
    let gate: Arc<dyn Sampler> = sampler.clone();
    let mut sess = RenderSession::new(gate, SessionOpts::default());
    let adapter = sess.display_adapter();
    sess.start(res(4, 64)).unwrap();
    assert!(sess.is_running());
    assert!(!adapter.is_frame_available(), "no row finished yet");

    // stop() sets the cancel flag immediately; the worker is released from
    // the sampler shortly after and must terminate at the next row boundary.
    let release_gate = Arc::clone(&sampler);
    let releaser = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        release_gate.release();
    });

    sess.stop().unwrap();
    releaser.join().unwrap();

    assert_eq!(sess.worker_state(), WorkerState::Cancelled);
    assert!(!sess.is_completed());
    assert!(!sess.is_running());
}

/// resize() blocks while a read scope is outstanding and proceeds as soon as
/// it is released; no torn state in the overlap window.
#[test]
fn resize_blocks_until_read_guard_released() {
    init_tracing();
    // ~2ms per pixel keeps the pass alive for the whole test.
    let sampler = move |x: u32, _y: u32| -> VireoResult<Sample> {
        std::thread::sleep(Duration::from_millis(2));
        Ok(Sample {
            color: LinearRgba::new(x as f32, 0.0, 0.0, 1.0),
            depth: 0.0,
        })
    };
    let mut sess = RenderSession::new(Arc::new(sampler), SessionOpts::default());
    let adapter = sess.display_adapter();
    sess.start(res(8, 32)).unwrap();
    wait_until(|| adapter.is_frame_available());

    let released = Arc::new(AtomicBool::new(false));
    let (acquired_tx, acquired_rx) = mpsc::channel::<()>();

    let reader_adapter = adapter.clone();
    let reader_released = Arc::clone(&released);
    let reader = std::thread::spawn(move || {
        let view = reader_adapter.acquire_for_read().expect("frame published");
        let first = view.frame().color().read_row(0).unwrap();
        assert_eq!(first.len(), 8);
        acquired_tx.send(()).unwrap();

        std::thread::sleep(Duration::from_millis(150));
        // Store-then-drop: if resize ever returned before this drop, the
        // flag would still be false on the other side.
        reader_released.store(true, Ordering::Release);
        drop(view);
    });

    acquired_rx.recv().unwrap();
    sess.resize(res(4, 4)).unwrap();
    assert!(
        released.load(Ordering::Acquire),
        "resize returned while a read scope was still held"
    );
    reader.join().unwrap();

    assert_eq!(sess.progress().rows_total, 4);
    sess.stop().unwrap();
}

/// Sampler that records the maximum number of concurrently live workers ever
/// observed sampling through it.
struct ConcurrencyProbe {
    active: AtomicU32,
    max_seen: AtomicU32,
}

impl ConcurrencyProbe {
    fn new() -> Self {
        Self {
            active: AtomicU32::new(0),
            max_seen: AtomicU32::new(0),
        }
    }
}

impl Sampler for ConcurrencyProbe {
    fn sample(&self, _x: u32, _y: u32) -> VireoResult<Sample> {
        let now = self.active.fetch_add(1, Ordering::AcqRel) + 1;
        self.max_seen.fetch_max(now, Ordering::AcqRel);
        std::thread::sleep(Duration::from_micros(200));
        self.active.fetch_sub(1, Ordering::AcqRel);
        Ok(Sample {
            color: LinearRgba::TRANSPARENT,
            depth: 0.0,
        })
    }
}

/// At-most-one-worker invariant across arbitrary start/stop/resize churn.
#[test]
fn at_most_one_worker_across_lifecycle_churn() {
    let probe = Arc::new(ConcurrencyProbe::new());
    let probe_sampler: Arc<dyn Sampler> = probe.clone();
    let mut sess = RenderSession::new(probe_sampler, SessionOpts::default());

    for round in 0u32..5 {
        sess.start(res(16, 16)).unwrap();
        assert!(matches!(
            sess.start(res(16, 16)),
            Err(VireoError::InvalidState(_))
        ));
        std::thread::sleep(Duration::from_millis(5));
        sess.resize(res(8, 8 + round)).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        sess.stop().unwrap();
    }

    assert_eq!(
        probe.max_seen.load(Ordering::Acquire),
        1,
        "two workers overlapped against one session"
    );
}

/// A failed pass keeps its partial image visible to the consumer and
/// surfaces the sampler error on stop.
#[test]
fn failed_pass_retains_partial_image() {
    let sampler = move |x: u32, y: u32| -> VireoResult<Sample> {
        if y == 2 {
            return Err(VireoError::sampler("shader blew up"));
        }
        Ok(Sample {
            color: LinearRgba::new(x as f32, 1.0, 0.0, 1.0),
            depth: 0.25,
        })
    };
    let mut sess = RenderSession::new(Arc::new(sampler), SessionOpts::default());
    let adapter = sess.display_adapter();
    sess.start(res(8, 8)).unwrap();

    wait_until(|| sess.worker_state().is_terminal());
    assert_eq!(sess.worker_state(), WorkerState::Failed);
    assert!(!sess.is_completed());

    let view = adapter.acquire_for_read().unwrap();
    assert_eq!(view.frame().rows_published(), 2);
    assert!(!view.frame().is_open(), "failed pass still closes channels");
    assert_eq!(view.frame().color().read_row(1).unwrap()[3].r, 3.0);
    drop(view);

    assert!(matches!(sess.stop(), Err(VireoError::Sampler(_))));
}
