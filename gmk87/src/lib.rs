//! Vendor protocol for the Zuoya GMK87 keyboard: persistent configuration
//! (underglow, indicator LED, onboard clock) and image upload to the 240x135
//! display over its raw HID interface.
//!
//! The wire protocol is 64-byte checksummed report frames; every high-level
//! operation is a fixed choreography of them. [`Gmk87`] is the caller-facing
//! surface; the submodules expose the layers underneath for tests and tools
//! that need them.

pub mod config;
pub mod frame;
pub mod image;
pub mod recovery;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{ActiveScreen, ConfigChanges, ConfigView, LedChanges, UnderglowChanges};
pub use image::{Truncation, UploadPlan};
pub use session::Session;
pub use transport::{DeviceProfile, Transport};
pub use types::{Gmk87Error, Result};

use hidapi::HidDevice;

use crate::config::{merge, MIN_FRAME_DELAY_MS};
use crate::recovery::ReviveSchedule;

/// USB identity of the GMK87.
pub mod consts {
    pub const GMK87_VENDOR_ID: u16 = 0x320f;
    pub const GMK87_PRODUCT_ID: u16 = 0x5055;
    /// The vendor protocol lives on interface 3; the other interfaces carry
    /// ordinary keyboard traffic.
    pub const GMK87_INTERFACE: i32 = 3;
}

/// Handle for one GMK87, holding the ids needed to open it. Each operation
/// opens a fresh session and releases the interface when done.
#[derive(Debug, Clone, Copy, Default)]
pub struct Gmk87 {
    profile: DeviceProfile,
}

impl Gmk87 {
    pub fn new(profile: DeviceProfile) -> Self {
        Self { profile }
    }

    /// Open the device and drain anything a previous session left behind.
    pub fn open_session(&self) -> Result<Session<HidDevice>> {
        let mut session = Session::new(Transport::open(&self.profile)?);
        session.drain()?;
        Ok(session)
    }

    /// Read the current configuration block.
    pub fn read_config(&self) -> Result<ConfigView> {
        self.open_session()?.read_config()
    }

    /// Apply `changes` on top of the device's current configuration. A no-op
    /// change set still runs the full read choreography.
    pub fn apply_changes(&self, changes: &ConfigChanges) -> Result<ConfigView> {
        let mut session = self.open_session()?;
        let current = session.read_config()?;
        let block = merge(&current, changes);
        session.write_config(&block)?;
        Ok(ConfigView::parse(block))
    }

    /// Stamp the onboard clock from the host's local time.
    pub fn sync_clock(&self) -> Result<()> {
        self.apply_changes(&ConfigChanges {
            sync_clock: true,
            ..Default::default()
        })?;
        Ok(())
    }

    /// Upload decoded display frames to the two image slots and switch the
    /// display to the first populated one. Frames beyond the combined
    /// hardware ceiling are dropped proportionally and reported.
    pub fn upload(
        &self,
        first: &[Vec<u16>],
        second: &[Vec<u16>],
        delay_ms: Option<u16>,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Option<Truncation>> {
        let (plan, truncation) = UploadPlan::build(first, second);
        let counts = plan.frame_counts();

        let mut session = self.open_session()?;
        let current = session.read_config()?;
        let changes = ConfigChanges {
            image1_frames: Some(counts.0),
            image2_frames: Some(counts.1),
            frame_delay_ms: delay_ms.map(|d| d.max(MIN_FRAME_DELAY_MS)),
            active_screen: Some(if counts.0 > 0 {
                ActiveScreen::Image1
            } else {
                ActiveScreen::Image2
            }),
            ..Default::default()
        };
        let block = merge(&current, &changes);

        let profile = self.profile;
        session::upload_with_recovery(
            session.into_transport(),
            move || Transport::open(&profile),
            ReviveSchedule::default(),
            &plan,
            &block,
            progress,
        )?;
        Ok(truncation)
    }
}
