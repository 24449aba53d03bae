//! The fixed command choreographies the device requires.
//!
//! Every step except frame streaming must be acknowledged before the next
//! one is issued; the device has no internal queuing and out-of-order
//! commands corrupt its state machine. Choreographies are strictly linear:
//! the only exits are success or a typed error, and recovery runs only at
//! the documented points, never silently.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::{ConfigView, CONFIG_LEN};
use crate::frame::Command;
use crate::image::UploadPlan;
use crate::recovery::{self, ReviveSchedule};
use crate::transport::{HidLink, RetryPolicy, Transport};
use crate::types::{Gmk87Error, Result};

/// Stale input is discarded until the line stays quiet this long.
const DRAIN_QUIESCENT: Duration = Duration::from_millis(150);
/// Upper bound on a drain, however chatty the line is.
const DRAIN_LIMIT: Duration = Duration::from_secs(2);

/// Window size for configuration reads.
const READ_STEP: usize = 4;
/// Prep writes the read choreography must issue. Their content is unused
/// but the device refuses the commit without them.
const PREP_WRITES: usize = 9;
/// Position of the final single-byte prep write.
const PREP_TAIL_POS: u32 = 36;

/// Chunk failures tolerated before an upload is abandoned. A half-written
/// slot is never a valid end state, so past this we abort loudly.
const UPLOAD_FAILURE_BUDGET: u32 = 3;

/// One high-level operation's exclusive hold on the device. Dropping the
/// session releases the transport.
pub struct Session<L: HidLink> {
    transport: Transport<L>,
    retry: RetryPolicy,
    ready: RetryPolicy,
}

impl<L: HidLink> Session<L> {
    pub fn new(transport: Transport<L>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
            ready: RetryPolicy::READY_WAIT,
        }
    }

    pub fn into_transport(self) -> Transport<L> {
        self.transport
    }

    /// Discard responses left over from an aborted prior session.
    pub fn drain(&mut self) -> Result<()> {
        recovery::drain(&mut self.transport, DRAIN_QUIESCENT, DRAIN_LIMIT)?;
        Ok(())
    }

    /// Read-Configuration choreography: init, prep writes, commit, then the
    /// block in twelve 4-byte windows.
    pub fn read_config(&mut self) -> Result<ConfigView> {
        self.transport.try_send(Command::Init, &[], 0, &self.retry)?;
        for i in 0..PREP_WRITES {
            self.transport.try_send(
                Command::Prepare,
                &[0; READ_STEP],
                (i * READ_STEP) as u32,
                &self.retry,
            )?;
        }
        self.transport
            .try_send(Command::Prepare, &[0], PREP_TAIL_POS, &self.retry)?;
        self.transport.try_send(Command::Commit, &[], 0, &self.retry)?;

        let mut raw = [0u8; CONFIG_LEN];
        for i in 0..CONFIG_LEN / READ_STEP {
            let pos = i * READ_STEP;
            let payload = self.transport.try_send(
                Command::ReadConfig,
                &[0; READ_STEP],
                pos as u32,
                &self.retry,
            )?;
            raw[pos..pos + READ_STEP].copy_from_slice(&payload[..READ_STEP]);
        }
        debug!("configuration block: {raw:02x?}");
        Ok(ConfigView::parse(raw))
    }

    /// Write-Configuration choreography. `block` must derive from a prior
    /// read on this device; the write is all-or-nothing.
    pub fn write_config(&mut self, block: &[u8; CONFIG_LEN]) -> Result<()> {
        self.transport.try_send(Command::Init, &[], 0, &self.retry)?;
        self.transport
            .try_send(Command::WriteConfig, block, 0, &self.retry)?;
        self.transport.try_send(Command::Commit, &[], 0, &self.retry)?;
        Ok(())
    }

    /// Image-Upload choreography: configuration carrying the new frame
    /// counts, the ready wait, then the chunk stream in strict offset order,
    /// closed by a final commit.
    pub fn upload(
        &mut self,
        plan: &UploadPlan,
        block: &[u8; CONFIG_LEN],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.drain()?;
        self.write_config(block)?;
        self.transport
            .try_send(Command::BeginUpload, &[], 0, &self.ready)?;
        self.transport.try_send(Command::Init, &[], 0, &self.retry)?;

        let total = plan.chunks().len();
        let mut failures = 0u32;
        let mut idx = 0usize;
        while idx < total {
            let chunk = &plan.chunks()[idx];
            let pos = plan.slot_base(chunk.slot) + chunk.offset;
            match self
                .transport
                .try_send(Command::FrameData, &chunk.data, pos, &self.retry)
            {
                Ok(_) => {
                    idx += 1;
                    progress(idx, total);
                }
                Err(err @ Gmk87Error::NoAcknowledgment(_)) => {
                    failures += 1;
                    if failures > UPLOAD_FAILURE_BUDGET {
                        warn!("aborting upload at chunk {idx}/{total}");
                        return Err(err);
                    }
                    debug!("chunk {idx} unacknowledged ({failures}/{UPLOAD_FAILURE_BUDGET})");
                }
                Err(err) => return Err(err),
            }
        }

        self.transport.try_send(Command::Commit, &[], 0, &self.retry)?;
        info!(
            "uploaded {} byte(s) in {total} chunk(s)",
            plan.total_bytes()
        );
        Ok(())
    }
}

/// Run the upload choreography, reviving the transport at most once if an
/// init goes unanswered. A failed revive is fatal and the choreography is
/// never replayed on the dead handle.
pub fn upload_with_recovery<L, F>(
    transport: Transport<L>,
    mut reopen: F,
    schedule: ReviveSchedule,
    plan: &UploadPlan,
    block: &[u8; CONFIG_LEN],
    progress: &mut dyn FnMut(usize, usize),
) -> Result<()>
where
    L: HidLink,
    F: FnMut() -> Result<Transport<L>>,
{
    let mut session = Session::new(transport);
    match session.upload(plan, block, progress) {
        Err(Gmk87Error::NoAcknowledgment(cmd)) if cmd == Command::Init as u8 => {
            warn!("init unanswered, attempting soft revive");
            let transport = recovery::revive(session.into_transport(), &mut reopen, schedule)?;
            let mut session = Session::new(transport);
            session.upload(plan, block, progress)
        }
        other => other,
    }
}
