//! Single-request-at-a-time transport over the keyboard's vendor interface.
//!
//! Exactly one request may be in flight per transport; every command is
//! written as a complete frame and the matching acknowledgment is awaited
//! before anything else is issued.

use std::sync::{LazyLock, RwLock};
use std::thread;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use tracing::{debug, trace};

use crate::consts;
use crate::frame::{Command, Frame, FRAME_LEN};
use crate::types::{Gmk87Error, Result};

/// Identity of the target peripheral. Passed into [`Transport::open`] so
/// tests and alternate hardware revisions can carry their own ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceProfile {
    pub vendor_id: u16,
    pub product_id: u16,
    /// Interface number carrying the vendor protocol.
    pub interface: i32,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            vendor_id: consts::GMK87_VENDOR_ID,
            product_id: consts::GMK87_PRODUCT_ID,
            interface: consts::GMK87_INTERFACE,
        }
    }
}

/// Retry parameters for [`Transport::try_send`].
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Complete send attempts before giving up.
    pub tries: u32,
    /// How long each attempt waits for its acknowledgment.
    pub read_timeout: Duration,
    /// Pause between attempts.
    pub pause: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            tries: 3,
            read_timeout: Duration::from_millis(250),
            pause: Duration::from_millis(50),
        }
    }
}

impl RetryPolicy {
    /// Wider window for the ready wait after arming an upload; the device
    /// takes noticeably longer to answer while it clears a slot.
    pub const READY_WAIT: Self = Self {
        tries: 5,
        read_timeout: Duration::from_millis(1000),
        pause: Duration::from_millis(200),
    };
}

/// Settle time the device needs before a commit frame.
const COMMIT_SETTLE: Duration = Duration::from_millis(100);

/// Seam between the transport and hidapi, so choreographies can run against
/// a scripted link in tests.
pub trait HidLink {
    fn write_report(&mut self, buf: &[u8]) -> Result<()>;
    /// Read one report, waiting up to `timeout`. Returns 0 on timeout.
    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;
}

impl HidLink for HidDevice {
    fn write_report(&mut self, buf: &[u8]) -> Result<()> {
        HidDevice::write(self, buf)?;
        Ok(())
    }

    fn read_report(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        Ok(HidDevice::read_timeout(self, buf, timeout.as_millis() as i32)?)
    }
}

/// Lazy handle to hidapi
static API: LazyLock<RwLock<HidApi>> =
    LazyLock::new(|| RwLock::new(HidApi::new().expect("failed to init hidapi")));

/// Owns the device handle for the lifetime of one session.
pub struct Transport<L = HidDevice> {
    link: L,
    buf: [u8; FRAME_LEN],
}

impl<L> std::fmt::Debug for Transport<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport").finish_non_exhaustive()
    }
}

impl Transport<HidDevice> {
    /// Find and open the device described by `profile`. Does not queue: if
    /// another process holds the interface the open fails immediately.
    pub fn open(profile: &DeviceProfile) -> Result<Self> {
        API.write().unwrap().refresh_devices()?;
        let api = API.read().unwrap();
        let device = api
            .device_list()
            .find(|d| {
                d.vendor_id() == profile.vendor_id
                    && d.product_id() == profile.product_id
                    && d.interface_number() == profile.interface
            })
            .ok_or(Gmk87Error::DeviceNotFound)?
            .open_device(&api)?;
        Ok(Self::from_link(device))
    }
}

impl<L: HidLink> Transport<L> {
    pub fn from_link(link: L) -> Self {
        Self {
            link,
            buf: [0u8; FRAME_LEN],
        }
    }

    /// Write a single frame. Fire and forget.
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        trace!(">> {:02x?}", frame.as_bytes());
        self.link.write_report(frame.as_bytes())
    }

    /// Block up to `timeout` for one inbound report. `None` on timeout.
    pub fn read_once(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        let len = self.link.read_report(&mut self.buf, timeout)?;
        if len == 0 {
            return Ok(None);
        }
        trace!("<< {:02x?}", &self.buf[..len]);
        match Frame::decode(&self.buf[..len]) {
            Ok(frame) => Ok(Some(frame)),
            Err(err) => {
                // garbage on the line reads the same as silence
                debug!("discarding unparseable report: {err}");
                Ok(None)
            }
        }
    }

    /// Write a command and await its acknowledgment. Returns the response
    /// payload, or `None` on timeout or header mismatch.
    pub fn send_and_await(
        &mut self,
        command: Command,
        data: &[u8],
        position: u32,
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>> {
        if command == Command::Commit {
            thread::sleep(COMMIT_SETTLE);
        }
        let frame = Frame::encode(command, data, position)?;
        self.write_frame(&frame)?;
        match self.read_once(timeout)? {
            None => {
                debug!("no response for command {:#04x}", command as u8);
                Ok(None)
            }
            Some(response) if frame.matches(&response) => {
                Ok(Some(response.response_data().to_vec()))
            }
            Some(response) => {
                debug!(
                    "header mismatch for command {:#04x}: sent {:02x?}, received {:02x?}",
                    command as u8,
                    &frame.as_bytes()[..4],
                    &response.as_bytes()[..4],
                );
                Ok(None)
            }
        }
    }

    /// Run [`Self::send_and_await`] up to `policy.tries` times. Every attempt
    /// is a fresh, complete write; a command is never partially applied.
    pub fn try_send(
        &mut self,
        command: Command,
        data: &[u8],
        position: u32,
        policy: &RetryPolicy,
    ) -> Result<Vec<u8>> {
        for attempt in 0..policy.tries {
            if attempt > 0 {
                thread::sleep(policy.pause);
            }
            if let Some(payload) = self.send_and_await(command, data, position, policy.read_timeout)? {
                return Ok(payload);
            }
        }
        Err(Gmk87Error::NoAcknowledgment(command as u8))
    }

    #[cfg(test)]
    pub(crate) fn link_ref(&self) -> &L {
        &self.link
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{echo, fast_retry, ScriptedLink};
    use super::*;

    #[test]
    fn send_and_await_returns_response_payload() {
        let link = ScriptedLink::new(|sent| Some(echo(sent, &[9, 8, 7, 6])));
        let mut transport = Transport::from_link(link);
        let payload = transport
            .send_and_await(Command::ReadConfig, &[0; 4], 4, Duration::ZERO)
            .unwrap()
            .unwrap();
        assert_eq!(&payload[..4], &[9, 8, 7, 6]);
    }

    #[test]
    fn mismatched_header_reads_as_no_ack() {
        let link = ScriptedLink::new(|sent| {
            let mut bad = echo(sent, &[]);
            bad[2] ^= 0xff;
            Some(bad)
        });
        let mut transport = Transport::from_link(link);
        let res = transport
            .send_and_await(Command::Init, &[], 0, Duration::ZERO)
            .unwrap();
        assert!(res.is_none());
    }

    #[test]
    fn try_send_exhausts_every_attempt() {
        let mut transport = Transport::from_link(ScriptedLink::dead());
        let err = transport
            .try_send(Command::Init, &[], 0, &fast_retry(3))
            .unwrap_err();
        assert!(matches!(err, Gmk87Error::NoAcknowledgment(0x01)));
        // one fresh, complete write per attempt
        assert_eq!(transport.link.writes.len(), 3);
    }

    #[test]
    fn try_send_recovers_after_transient_drop() {
        let mut count = 0;
        let link = ScriptedLink::new(move |sent| {
            count += 1;
            (count > 2).then(|| echo(sent, &[]))
        });
        let mut transport = Transport::from_link(link);
        transport
            .try_send(Command::Prepare, &[0; 4], 8, &fast_retry(3))
            .unwrap();
        assert_eq!(transport.link.writes.len(), 3);
    }
}
