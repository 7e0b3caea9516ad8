//! nvidia-smi invocation for nvmon.
//!
//! All subprocess calls to the driver tool live here, together with the
//! retry policy applied to the fetch step. Parsing is elsewhere: a failed
//! parse is not a fetch failure and is never retried.

use std::fmt;
use std::io::ErrorKind;
use std::process::Command;
use std::thread;
use std::time::Duration;

use log::debug;

/// How a call to the external tool failed.
///
/// The two variants are deliberately distinguishable in the UI: a missing
/// binary is a persistent condition the user has to fix (install drivers),
/// while an invocation error is usually transient driver noise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FetchError {
    /// The nvidia-smi binary is not on PATH.
    ToolMissing,
    /// The tool ran but exited nonzero or could not be spawned.
    Invocation(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::ToolMissing => {
                write!(f, "nvidia-smi not found. Ensure drivers are installed.")
            }
            FetchError::Invocation(msg) => write!(f, "nvidia-smi failed: {}", msg),
        }
    }
}

impl std::error::Error for FetchError {}

impl FetchError {
    /// Whether this failure will persist until the user intervenes.
    pub fn is_persistent(&self) -> bool {
        matches!(self, FetchError::ToolMissing)
    }
}

/// Raw, unparsed output of one poll cycle.
#[derive(Clone, Debug)]
pub struct RawSample {
    /// The single `--query-gpu` CSV line
    pub gpu_csv: String,
    /// Zero or more `--query-compute-apps` CSV lines
    pub proc_csv: String,
}

/// Fixed-delay retry policy for the fetch step.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// Run an operation under a retry policy.
///
/// A missing binary is not retried: it cannot heal between attempts. The
/// final failure after exhausting the policy is returned as-is rather than
/// being swallowed or re-raised implicitly.
pub fn run_with_retry<T, F>(mut op: F, policy: RetryPolicy) -> Result<T, FetchError>
where
    F: FnMut() -> Result<T, FetchError>,
{
    let mut last_err = FetchError::Invocation("no attempts made".into());
    for attempt in 1..=policy.attempts.max(1) {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_persistent() => return Err(err),
            Err(err) => {
                debug!("fetch attempt {}/{} failed: {}", attempt, policy.attempts, err);
                last_err = err;
                if attempt < policy.attempts {
                    thread::sleep(policy.delay);
                }
            }
        }
    }
    Err(last_err)
}

/// Fetch one poll cycle's raw output, retried per the default policy.
pub fn sample() -> Result<RawSample, FetchError> {
    run_with_retry(
        || {
            let gpu_csv = run_query(&[
                "--query-gpu=utilization.gpu,memory.used,memory.total,temperature.gpu,\
                 power.draw,power.limit,fan.speed,clocks.gr,clocks.mem",
                "--format=csv,noheader,nounits",
            ])?;
            let proc_csv = run_query(&[
                "--query-compute-apps=pid,process_name,used_memory",
                "--format=csv,noheader,nounits",
            ])?;
            Ok(RawSample { gpu_csv, proc_csv })
        },
        RetryPolicy::default(),
    )
}

/// Query the device name (first line for multi-GPU machines).
pub fn query_device_name() -> Result<String, FetchError> {
    let out = run_with_retry(
        || run_query(&["--query-gpu=name", "--format=csv,noheader,nounits"]),
        RetryPolicy::default(),
    )?;
    Ok(out.lines().next().unwrap_or_default().trim().to_string())
}

/// Query the power management block (`nvidia-smi -q -d POWER`).
pub fn query_power_block() -> Result<String, FetchError> {
    run_with_retry(|| run_query(&["-q", "-d", "POWER"]), RetryPolicy::default())
}

/// Issue the privileged power-limit mutation.
///
/// Requires administrator rights on Windows and root (via sudo) elsewhere;
/// that precondition is the caller's problem, not something this function
/// can satisfy. Mutations are never retried: `-pl` is not safe to blindly
/// reissue on an ambiguous failure.
pub fn set_power_limit(watts: i64) -> Result<String, FetchError> {
    let limit = watts.to_string();
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("nvidia-smi");
        c.args(["-pl", &limit]);
        c
    } else {
        let mut c = Command::new("sudo");
        c.args(["nvidia-smi", "-pl", &limit]);
        c
    };
    run_command(&mut cmd)
}

/// Run nvidia-smi with the given arguments and capture stdout.
fn run_query(args: &[&str]) -> Result<String, FetchError> {
    run_command(Command::new("nvidia-smi").args(args))
}

/// Spawn a command, mapping a missing binary and nonzero exits to the
/// fetch error taxonomy. Stderr is folded into the error text so driver
/// messages survive to the UI.
fn run_command(cmd: &mut Command) -> Result<String, FetchError> {
    let output = cmd.output().map_err(|e| {
        if e.kind() == ErrorKind::NotFound {
            FetchError::ToolMissing
        } else {
            FetchError::Invocation(e.to_string())
        }
    })?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    } else {
        let mut msg = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if msg.is_empty() {
            msg = String::from_utf8_lossy(&output.stdout).trim().to_string();
        }
        if msg.is_empty() {
            msg = format!("exit status {}", output.status);
        }
        Err(FetchError::Invocation(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn retry_returns_first_success() {
        let mut calls = 0;
        let result = run_with_retry(
            || {
                calls += 1;
                if calls < 2 {
                    Err(FetchError::Invocation("flaky".into()))
                } else {
                    Ok(42)
                }
            },
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        );
        assert_eq!(result, Ok(42));
        assert_eq!(calls, 2);
    }

    #[test]
    fn retry_surfaces_last_error_after_exhaustion() {
        let mut calls = 0;
        let result: Result<(), _> = run_with_retry(
            || {
                calls += 1;
                Err(FetchError::Invocation(format!("attempt {}", calls)))
            },
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
            },
        );
        assert_eq!(calls, 3);
        assert_eq!(result, Err(FetchError::Invocation("attempt 3".into())));
    }

    #[test]
    fn missing_tool_is_not_retried() {
        let mut calls = 0;
        let start = Instant::now();
        let result: Result<(), _> = run_with_retry(
            || {
                calls += 1;
                Err(FetchError::ToolMissing)
            },
            RetryPolicy {
                attempts: 3,
                delay: Duration::from_secs(1),
            },
        );
        assert_eq!(calls, 1);
        assert_eq!(result, Err(FetchError::ToolMissing));
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn persistent_errors_are_labeled() {
        assert!(FetchError::ToolMissing.is_persistent());
        assert!(!FetchError::Invocation("boom".into()).is_persistent());
        assert!(FetchError::ToolMissing.to_string().contains("not found"));
    }
}
