//! Background polling worker and the shared mailbox it publishes into.
//!
//! One worker thread repeatedly fetches raw nvidia-smi output and publishes
//! the result into a single-slot mailbox; the consumer loop reads the slot
//! on its own cadence. The slot holds only the most recent observation and
//! every publish replaces it wholesale, so readers see either the fully-old
//! or the fully-new value, never a torn mix.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use log::{debug, warn};

use crate::smi::{self, FetchError, RawSample};

/// Granularity at which the worker's sleep re-checks the stop flag. A stop
/// request is honored within roughly this bound regardless of how long the
/// configured poll interval is.
const STOP_CHECK_SLICE: Duration = Duration::from_millis(100);

/// Upper bound on how long `stop` waits for the worker to wind down. A slow
/// in-flight nvidia-smi call is abandoned rather than waited on.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// One published poll result: raw output or the error that prevented it.
#[derive(Clone, Debug)]
pub struct Observation {
    /// Wall-clock time the fetch completed
    pub taken_at: DateTime<Local>,
    /// Raw tool output, or how fetching it failed
    pub outcome: Result<RawSample, FetchError>,
}

/// Latest-value mailbox shared between the worker and the consumer loop.
///
/// Not a queue: a publish overwrites whatever was there before.
#[derive(Default)]
pub struct Mailbox {
    slot: Mutex<Option<Observation>>,
}

impl Mailbox {
    /// Replace the slot content wholesale.
    pub fn publish(&self, obs: Observation) {
        // Lock poisoning only happens if a publisher panicked mid-store;
        // the slot still holds a whole value either way.
        match self.slot.lock() {
            Ok(mut slot) => *slot = Some(obs),
            Err(poisoned) => *poisoned.into_inner() = Some(obs),
        }
    }

    /// Clone out the most recent observation, if any was published yet.
    pub fn latest(&self) -> Option<Observation> {
        match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

/// Handle to one background polling worker.
///
/// Each sampler owns its own mailbox. Manual refresh stops the current
/// sampler and starts a fresh one; because the fresh sampler brings a fresh
/// mailbox, a late result from the cancelled cycle can never be mistaken
/// for a current one.
pub struct Sampler {
    mailbox: Arc<Mailbox>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Sampler {
    /// Spawn the worker thread polling at `interval`.
    pub fn start(interval: Duration) -> Self {
        let mailbox = Arc::new(Mailbox::default());
        let stop = Arc::new(AtomicBool::new(false));

        let worker_mailbox = mailbox.clone();
        let worker_stop = stop.clone();
        let handle = thread::Builder::new()
            .name("nvmon-sampler".into())
            .spawn(move || worker_loop(worker_mailbox, worker_stop, interval))
            .ok();

        if handle.is_none() {
            warn!("failed to spawn sampler thread");
        }

        Self {
            mailbox,
            stop,
            handle,
        }
    }

    /// The mailbox this sampler publishes into.
    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    /// Request the worker to stop and wait up to [`JOIN_TIMEOUT`] for it.
    ///
    /// Returns true if the worker actually finished. On timeout the thread
    /// is detached; it will notice the stop flag after its in-flight call
    /// completes, and whatever it publishes lands in this (now abandoned)
    /// mailbox.
    pub fn stop(&mut self) -> bool {
        self.stop.store(true, Ordering::Relaxed);

        let Some(handle) = self.handle.take() else {
            return true;
        };

        let deadline = Instant::now() + JOIN_TIMEOUT;
        while Instant::now() < deadline {
            if handle.is_finished() {
                let _ = handle.join();
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }

        debug!("sampler did not stop within {:?}, abandoning", JOIN_TIMEOUT);
        false
    }
}

#[cfg(test)]
impl Sampler {
    /// A sampler with a mailbox but no worker thread, so tests can publish
    /// observations themselves.
    pub(crate) fn idle() -> Self {
        Self {
            mailbox: Arc::new(Mailbox::default()),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Worker body: fetch, publish, sleep in stop-checked slices, repeat.
///
/// Fetch failures are published like any other observation. Neither a
/// missing binary nor a transient driver error terminates the loop; the
/// worker keeps polling on the same cadence.
fn worker_loop(mailbox: Arc<Mailbox>, stop: Arc<AtomicBool>, interval: Duration) {
    while !stop.load(Ordering::Relaxed) {
        let outcome = smi::sample();
        if let Err(ref err) = outcome {
            debug!("poll cycle failed: {}", err);
        }

        mailbox.publish(Observation {
            taken_at: Local::now(),
            outcome,
        });

        let mut slept = Duration::ZERO;
        while slept < interval {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let slice = STOP_CHECK_SLICE.min(interval - slept);
            thread::sleep(slice);
            slept += slice;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_obs(tag: &str) -> Observation {
        Observation {
            taken_at: Local::now(),
            outcome: Ok(RawSample {
                gpu_csv: tag.to_string(),
                proc_csv: String::new(),
            }),
        }
    }

    #[test]
    fn mailbox_keeps_only_latest() {
        let mailbox = Mailbox::default();
        assert!(mailbox.latest().is_none());

        mailbox.publish(sample_obs("first"));
        mailbox.publish(sample_obs("second"));

        let latest = mailbox.latest().unwrap();
        assert_eq!(latest.outcome.unwrap().gpu_csv, "second");
    }

    #[test]
    fn stop_is_honored_promptly_despite_long_interval() {
        // nvidia-smi is almost certainly absent in the test environment; the
        // worker then publishes a ToolMissing observation, which is exactly
        // the failure path we want exercised.
        let mut sampler = Sampler::start(Duration::from_secs(30));
        thread::sleep(Duration::from_millis(300));

        let start = Instant::now();
        sampler.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn replacement_sampler_has_a_fresh_mailbox() {
        let mut old = Sampler::start(Duration::from_secs(30));
        let old_mailbox = old.mailbox().clone();
        old.stop();

        // Simulate a late publish from the abandoned cycle.
        old_mailbox.publish(sample_obs("stale"));

        let mut fresh = Sampler::start(Duration::from_secs(30));
        let leaked = fresh
            .mailbox()
            .latest()
            .and_then(|obs| obs.outcome.ok())
            .map(|raw| raw.gpu_csv == "stale")
            .unwrap_or(false);
        assert!(!leaked);
        fresh.stop();
    }
}
