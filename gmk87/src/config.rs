//! The device's persistent 48-byte settings block.
//!
//! Only a handful of bytes are understood; everything else is reserved
//! firmware state. Writes therefore always start from a block that was read
//! off the device, with just the requested fields overwritten. Building a
//! block from defaults clobbers reserved state and is not supported.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};

/// Size of the configuration block.
pub const CONFIG_LEN: usize = 48;

/// Lowest frame delay the device accepts.
pub const MIN_FRAME_DELAY_MS: u16 = 60;

/// Byte offsets of the known fields. Bytes not named here must be carried
/// over unchanged on every write.
pub mod offsets {
    pub const UNDERGLOW_EFFECT: usize = 1;
    pub const UNDERGLOW_BRIGHTNESS: usize = 2;
    pub const UNDERGLOW_SPEED: usize = 3;
    pub const UNDERGLOW_ORIENTATION: usize = 4;
    pub const UNDERGLOW_RAINBOW: usize = 5;
    /// Three bytes, r/g/b.
    pub const UNDERGLOW_COLOR: usize = 6;
    pub const WINDOWS_LOCK: usize = 20;
    pub const LED_MODE: usize = 28;
    pub const LED_SATURATION: usize = 29;
    pub const LED_RAINBOW: usize = 30;
    pub const LED_COLOR_INDEX: usize = 31;
    pub const ACTIVE_SCREEN: usize = 33;
    pub const IMAGE1_FRAMES: usize = 34;
    /// Seven BCD bytes: second, minute, hour, weekday, day, month, year-2000.
    pub const CLOCK: usize = 35;
    pub const CLOCK_LEN: usize = 7;
    /// u16 little endian, milliseconds.
    pub const FRAME_DELAY: usize = 43;
    pub const IMAGE2_FRAMES: usize = 46;
}

/// What the display shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ActiveScreen {
    #[default]
    Clock = 0,
    Image1 = 1,
    Image2 = 2,
}

impl ActiveScreen {
    pub fn from_raw(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Clock),
            1 => Some(Self::Image1),
            2 => Some(Self::Image2),
            _ => None,
        }
    }
}

impl FromStr for ActiveScreen {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "clock" | "c" => Ok(Self::Clock),
            "image1" | "1" => Ok(Self::Image1),
            "image2" | "2" => Ok(Self::Image2),
            _ => Err(format!(
                "invalid screen, must be one of: [ clock|c, image1|1, image2|2 ], got {s}"
            )),
        }
    }
}

/// Underglow state as stored on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Underglow {
    pub effect: u8,
    pub brightness: u8,
    pub speed: u8,
    pub reversed: bool,
    pub rainbow: bool,
    pub color: [u8; 3],
}

/// Indicator LED state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndicatorLed {
    pub mode: u8,
    pub saturation: u8,
    pub rainbow: bool,
    pub color_index: u8,
}

/// Onboard clock fields, decoded from BCD.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockFields {
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    /// ISO weekday, 1 = Monday.
    pub weekday: u8,
    pub day: u8,
    pub month: u8,
    /// Years since 2000.
    pub year: u8,
}

/// Parsed view over a configuration block read from the device. Retains the
/// raw buffer so writes can be derived from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigView {
    raw: [u8; CONFIG_LEN],
}

impl ConfigView {
    pub fn parse(raw: [u8; CONFIG_LEN]) -> Self {
        Self { raw }
    }

    pub fn as_bytes(&self) -> &[u8; CONFIG_LEN] {
        &self.raw
    }

    pub fn underglow(&self) -> Underglow {
        Underglow {
            effect: self.raw[offsets::UNDERGLOW_EFFECT],
            brightness: self.raw[offsets::UNDERGLOW_BRIGHTNESS],
            speed: self.raw[offsets::UNDERGLOW_SPEED],
            reversed: self.raw[offsets::UNDERGLOW_ORIENTATION] != 0,
            rainbow: self.raw[offsets::UNDERGLOW_RAINBOW] != 0,
            color: [
                self.raw[offsets::UNDERGLOW_COLOR],
                self.raw[offsets::UNDERGLOW_COLOR + 1],
                self.raw[offsets::UNDERGLOW_COLOR + 2],
            ],
        }
    }

    pub fn led(&self) -> IndicatorLed {
        IndicatorLed {
            mode: self.raw[offsets::LED_MODE],
            saturation: self.raw[offsets::LED_SATURATION],
            rainbow: self.raw[offsets::LED_RAINBOW] != 0,
            color_index: self.raw[offsets::LED_COLOR_INDEX],
        }
    }

    pub fn windows_lock(&self) -> bool {
        self.raw[offsets::WINDOWS_LOCK] != 0
    }

    pub fn active_screen(&self) -> Option<ActiveScreen> {
        ActiveScreen::from_raw(self.raw[offsets::ACTIVE_SCREEN])
    }

    /// Frame counts for (slot 0, slot 1).
    pub fn frame_counts(&self) -> (u8, u8) {
        (
            self.raw[offsets::IMAGE1_FRAMES],
            self.raw[offsets::IMAGE2_FRAMES],
        )
    }

    pub fn frame_delay_ms(&self) -> u16 {
        u16::from_le_bytes([
            self.raw[offsets::FRAME_DELAY],
            self.raw[offsets::FRAME_DELAY + 1],
        ])
    }

    pub fn clock(&self) -> ClockFields {
        let c = &self.raw[offsets::CLOCK..offsets::CLOCK + offsets::CLOCK_LEN];
        ClockFields {
            second: from_bcd(c[0]),
            minute: from_bcd(c[1]),
            hour: from_bcd(c[2]),
            weekday: c[3],
            day: from_bcd(c[4]),
            month: from_bcd(c[5]),
            year: from_bcd(c[6]),
        }
    }
}

/// Requested underglow changes. Absent fields keep the device bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnderglowChanges {
    pub effect: Option<u8>,
    pub brightness: Option<u8>,
    pub speed: Option<u8>,
    pub reversed: Option<bool>,
    pub rainbow: Option<bool>,
    pub color: Option<[u8; 3]>,
}

/// Requested indicator LED changes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedChanges {
    pub mode: Option<u8>,
    pub saturation: Option<u8>,
    pub rainbow: Option<bool>,
    pub color_index: Option<u8>,
}

/// A set of requested configuration changes. Every field is explicitly
/// present or absent; [`merge`] only touches present ones. Range validation
/// (brightness, speed and saturation are 0-9 on the hardware) is the
/// caller's job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub underglow: UnderglowChanges,
    pub led: LedChanges,
    pub windows_lock: Option<bool>,
    pub active_screen: Option<ActiveScreen>,
    pub image1_frames: Option<u8>,
    pub image2_frames: Option<u8>,
    pub frame_delay_ms: Option<u16>,
    /// Recompute the seven clock bytes from the wall clock.
    pub sync_clock: bool,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Apply `changes` on top of `current`, stamping the clock from `now` when
/// requested. The result differs from `current` only at the bytes owned by
/// the present fields.
pub fn merge_at<Tz: TimeZone>(
    current: &ConfigView,
    changes: &ConfigChanges,
    now: DateTime<Tz>,
) -> [u8; CONFIG_LEN] {
    let mut out = *current.as_bytes();

    let glow = &changes.underglow;
    if let Some(effect) = glow.effect {
        out[offsets::UNDERGLOW_EFFECT] = effect;
    }
    if let Some(brightness) = glow.brightness {
        out[offsets::UNDERGLOW_BRIGHTNESS] = brightness;
    }
    if let Some(speed) = glow.speed {
        out[offsets::UNDERGLOW_SPEED] = speed;
    }
    if let Some(reversed) = glow.reversed {
        out[offsets::UNDERGLOW_ORIENTATION] = reversed as u8;
    }
    if let Some(rainbow) = glow.rainbow {
        out[offsets::UNDERGLOW_RAINBOW] = rainbow as u8;
    }
    if let Some([r, g, b]) = glow.color {
        out[offsets::UNDERGLOW_COLOR] = r;
        out[offsets::UNDERGLOW_COLOR + 1] = g;
        out[offsets::UNDERGLOW_COLOR + 2] = b;
    }

    let led = &changes.led;
    if let Some(mode) = led.mode {
        out[offsets::LED_MODE] = mode;
    }
    if let Some(saturation) = led.saturation {
        out[offsets::LED_SATURATION] = saturation;
    }
    if let Some(rainbow) = led.rainbow {
        out[offsets::LED_RAINBOW] = rainbow as u8;
    }
    if let Some(index) = led.color_index {
        out[offsets::LED_COLOR_INDEX] = index;
    }

    if let Some(lock) = changes.windows_lock {
        out[offsets::WINDOWS_LOCK] = lock as u8;
    }
    if let Some(screen) = changes.active_screen {
        out[offsets::ACTIVE_SCREEN] = screen as u8;
    }
    if let Some(frames) = changes.image1_frames {
        out[offsets::IMAGE1_FRAMES] = frames;
    }
    if let Some(frames) = changes.image2_frames {
        out[offsets::IMAGE2_FRAMES] = frames;
    }
    if let Some(delay) = changes.frame_delay_ms {
        out[offsets::FRAME_DELAY..offsets::FRAME_DELAY + 2].copy_from_slice(&delay.to_le_bytes());
    }

    if changes.sync_clock {
        out[offsets::CLOCK] = to_bcd(now.second() as u8);
        out[offsets::CLOCK + 1] = to_bcd(now.minute() as u8);
        out[offsets::CLOCK + 2] = to_bcd(now.hour() as u8);
        out[offsets::CLOCK + 3] = now.weekday().number_from_monday() as u8;
        out[offsets::CLOCK + 4] = to_bcd(now.day() as u8);
        out[offsets::CLOCK + 5] = to_bcd(now.month() as u8);
        // year without the century, matching the vendor software
        out[offsets::CLOCK + 6] = to_bcd((now.year() % 100) as u8);
    }

    out
}

/// [`merge_at`] against the local wall clock.
pub fn merge(current: &ConfigView, changes: &ConfigChanges) -> [u8; CONFIG_LEN] {
    merge_at(current, changes, Local::now())
}

/// Pack 0..=99 into a BCD byte.
pub fn to_bcd(n: u8) -> u8 {
    debug_assert!(n <= 99);
    (n / 10) << 4 | (n % 10)
}

/// Unpack a BCD byte.
pub fn from_bcd(b: u8) -> u8 {
    (b >> 4) * 10 + (b & 0x0f)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn sample_block() -> [u8; CONFIG_LEN] {
        let mut raw = [0u8; CONFIG_LEN];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (i as u8).wrapping_mul(7).wrapping_add(3);
        }
        raw
    }

    #[test]
    fn parse_maps_fixed_offsets() {
        let mut raw = [0u8; CONFIG_LEN];
        raw[1] = 0x05;
        raw[2] = 0x09;
        let view = ConfigView::parse(raw);
        assert_eq!(view.underglow().effect, 5);
        assert_eq!(view.underglow().brightness, 9);
    }

    #[test]
    fn merging_nothing_changes_nothing() {
        let view = ConfigView::parse(sample_block());
        let merged = merge(&view, &ConfigChanges::default());
        assert_eq!(&merged, view.as_bytes());
    }

    #[test]
    fn single_field_change_touches_only_its_byte() {
        let view = ConfigView::parse(sample_block());
        let changes = ConfigChanges {
            underglow: UnderglowChanges {
                brightness: Some(7),
                ..Default::default()
            },
            ..Default::default()
        };
        let merged = merge(&view, &changes);
        for (i, (a, b)) in view.as_bytes().iter().zip(merged.iter()).enumerate() {
            if i == offsets::UNDERGLOW_BRIGHTNESS {
                assert_eq!(*b, 7);
            } else {
                assert_eq!(a, b, "byte {i} must be preserved");
            }
        }
    }

    #[test]
    fn merge_preserves_unrelated_fields() {
        let mut raw = sample_block();
        raw[offsets::ACTIVE_SCREEN] = 0x02;
        raw[offsets::IMAGE2_FRAMES] = 0x04;
        let view = ConfigView::parse(raw);
        let changes = ConfigChanges {
            underglow: UnderglowChanges {
                effect: Some(0x0b),
                brightness: Some(0x07),
                ..Default::default()
            },
            ..Default::default()
        };
        let merged = merge(&view, &changes);
        assert_eq!(merged[offsets::UNDERGLOW_EFFECT], 0x0b);
        assert_eq!(merged[offsets::UNDERGLOW_BRIGHTNESS], 0x07);
        assert_eq!(merged[offsets::ACTIVE_SCREEN], 0x02);
        assert_eq!(merged[offsets::IMAGE2_FRAMES], 0x04);
    }

    #[test]
    fn sync_clock_rewrites_exactly_the_rtc_bytes() {
        let view = ConfigView::parse(sample_block());
        let changes = ConfigChanges {
            sync_clock: true,
            ..Default::default()
        };
        // tuesday
        let now = Utc.with_ymd_and_hms(2025, 10, 14, 15, 43, 55).unwrap();
        let merged = merge_at(&view, &changes, now);
        assert_eq!(
            &merged[offsets::CLOCK..offsets::CLOCK + offsets::CLOCK_LEN],
            &[0x55, 0x43, 0x15, 2, 0x14, 0x10, 0x25],
        );
        for (i, (a, b)) in view.as_bytes().iter().zip(merged.iter()).enumerate() {
            if !(offsets::CLOCK..offsets::CLOCK + offsets::CLOCK_LEN).contains(&i) {
                assert_eq!(a, b, "byte {i} must be preserved");
            }
        }

        let clock = ConfigView::parse(merged).clock();
        assert_eq!(clock.hour, 15);
        assert_eq!(clock.weekday, 2);
        assert_eq!(clock.year, 25);
    }

    #[test]
    fn bcd_roundtrip() {
        for n in 0..=99 {
            assert_eq!(from_bcd(to_bcd(n)), n);
        }
    }

    #[test]
    fn frame_delay_is_little_endian() {
        let view = ConfigView::parse(sample_block());
        let changes = ConfigChanges {
            frame_delay_ms: Some(300),
            ..Default::default()
        };
        let merged = merge(&view, &changes);
        assert_eq!(merged[offsets::FRAME_DELAY], 0x2c);
        assert_eq!(merged[offsets::FRAME_DELAY + 1], 0x01);
        assert_eq!(ConfigView::parse(merged).frame_delay_ms(), 300);
    }
}
