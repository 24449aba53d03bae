//! Drain of stale reports and soft revive of an unresponsive transport.
//!
//! The device has no internal queuing: an aborted session can leave
//! unsolicited acknowledgments in the host-side buffer, and an out-of-order
//! command can wedge its state machine until the handle is cycled. Both
//! recoveries are bounded; a failed revive means the user has to physically
//! reconnect the keyboard.

use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::frame::{Command, Frame};
use crate::transport::{HidLink, RetryPolicy, Transport};
use crate::types::{Gmk87Error, Result};

/// Poll interval while draining.
const DRAIN_POLL: Duration = Duration::from_millis(20);

/// Reopen attempts per revive.
pub const REVIVE_ATTEMPTS: u32 = 6;

/// Attempt index that gets the extended cooldown.
const COOLDOWN_ATTEMPT: u32 = 3;

/// Discard unsolicited reports until the link stays quiet for `quiescent`,
/// or `hard_limit` elapses. Returns the number of discarded frames.
pub fn drain<L: HidLink>(
    transport: &mut Transport<L>,
    quiescent: Duration,
    hard_limit: Duration,
) -> Result<usize> {
    let start = Instant::now();
    let mut last_data = Instant::now();
    let mut discarded = 0usize;
    while start.elapsed() < hard_limit {
        match transport.read_once(DRAIN_POLL)? {
            Some(frame) => {
                discarded += 1;
                last_data = Instant::now();
                debug!("draining stale report: {frame:?}");
            }
            None if last_data.elapsed() >= quiescent => break,
            None => {}
        }
    }
    if discarded > 0 {
        debug!("drained {discarded} stale report(s)");
    }
    Ok(discarded)
}

/// Deterministic reopen backoff: doubles from 250 ms, with one extended
/// cooldown partway through the schedule.
pub fn revive_backoff(attempt: u32) -> Duration {
    if attempt == COOLDOWN_ATTEMPT {
        return Duration::from_secs(5);
    }
    Duration::from_millis(250u64 << attempt.min(4))
}

/// How a revive paces and bounds itself. Tests substitute a zero-delay
/// schedule to run without real timing.
#[derive(Clone, Copy)]
pub struct ReviveSchedule {
    pub attempts: u32,
    pub backoff: fn(u32) -> Duration,
}

impl Default for ReviveSchedule {
    fn default() -> Self {
        Self {
            attempts: REVIVE_ATTEMPTS,
            backoff: revive_backoff,
        }
    }
}

/// Close and reopen the device until an init probe is acknowledged.
///
/// The dead transport is consumed: a zero-payload kick frame is fired at it,
/// then it is dropped and `reopen` produces fresh candidates with increasing
/// backoff. Ownership of the first candidate whose probe acks is returned;
/// `ReviveExhausted` once the schedule runs out.
pub fn revive<L, F>(
    transport: Transport<L>,
    mut reopen: F,
    schedule: ReviveSchedule,
) -> Result<Transport<L>>
where
    L: HidLink,
    F: FnMut() -> Result<Transport<L>>,
{
    let mut dead = transport;
    if let Ok(kick) = Frame::encode(Command::Init, &[], 0) {
        let _ = dead.write_frame(&kick);
    }
    drop(dead);

    let probe = RetryPolicy {
        tries: 1,
        ..Default::default()
    };
    for attempt in 0..schedule.attempts {
        thread::sleep((schedule.backoff)(attempt));
        let mut candidate = match reopen() {
            Ok(transport) => transport,
            Err(err) => {
                debug!("reopen failed on attempt {}: {err}", attempt + 1);
                continue;
            }
        };
        match candidate.try_send(Command::Init, &[], 0, &probe) {
            Ok(_) => {
                info!("transport revived after {} attempt(s)", attempt + 1);
                return Ok(candidate);
            }
            Err(_) => debug!("init probe unanswered on attempt {}", attempt + 1),
        }
    }
    warn!("revive exhausted after {} attempts", schedule.attempts);
    Err(Gmk87Error::ReviveExhausted)
}
