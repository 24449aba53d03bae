//! Named lighting presets stored in the user's config directory.

use std::error::Error;
use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use gmk87::config::{ActiveScreen, ConfigChanges, LedChanges, UnderglowChanges};
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Preset {
    pub effect: Option<u8>,
    pub brightness: Option<u8>,
    pub speed: Option<u8>,
    pub reversed: Option<bool>,
    pub rainbow: Option<bool>,
    /// Underglow color as [r, g, b].
    pub color: Option<[u8; 3]>,
    pub led_mode: Option<u8>,
    pub led_saturation: Option<u8>,
    pub led_rainbow: Option<bool>,
    pub led_color: Option<u8>,
    /// "clock", "image1" or "image2".
    pub screen: Option<String>,
}

impl Preset {
    pub fn to_changes(&self) -> Result<ConfigChanges, Box<dyn Error>> {
        let screen = self
            .screen
            .as_deref()
            .map(|s| s.parse::<ActiveScreen>())
            .transpose()?;
        Ok(ConfigChanges {
            underglow: UnderglowChanges {
                effect: self.effect,
                brightness: self.brightness,
                speed: self.speed,
                reversed: self.reversed,
                rainbow: self.rainbow,
                color: self.color,
            },
            led: LedChanges {
                mode: self.led_mode,
                saturation: self.led_saturation,
                rainbow: self.led_rainbow,
                color_index: self.led_color,
            },
            active_screen: screen,
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresetFile {
    #[serde(default)]
    pub presets: std::collections::BTreeMap<String, Preset>,
}

/// Preset file path for this platform
pub fn path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "gmk87-sync").map(|dirs| dirs.config_dir().join("presets.toml"))
}

/// Look up a named preset from the preset file.
pub fn load(name: &str) -> Result<Preset, Box<dyn Error>> {
    let path = path().ok_or("could not determine config directory")?;
    if !path.exists() {
        return Err(format!("no preset file at {}", path.display()).into());
    }
    let contents = fs::read_to_string(&path)?;
    let file: PresetFile = toml::from_str(&contents)?;
    file.presets
        .get(name)
        .cloned()
        .ok_or_else(|| format!("preset '{name}' not found in {}", path.display()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_presets() {
        let file: PresetFile = toml::from_str(
            r#"
            [presets.night]
            brightness = 2
            color = [255, 64, 0]
            screen = "clock"

            [presets.off]
            brightness = 0
            "#,
        )
        .unwrap();
        let night = &file.presets["night"];
        assert_eq!(night.brightness, Some(2));
        assert_eq!(night.color, Some([255, 64, 0]));

        let changes = night.to_changes().unwrap();
        assert_eq!(changes.underglow.brightness, Some(2));
        assert_eq!(changes.active_screen, Some(ActiveScreen::Clock));
        assert_eq!(changes.underglow.effect, None);
        assert!(!changes.sync_clock);

        assert!(file.presets["off"].to_changes().unwrap().led.mode.is_none());
    }

    #[test]
    fn unknown_screen_is_rejected() {
        let preset = Preset {
            screen: Some("bogus".into()),
            ..Default::default()
        };
        assert!(preset.to_changes().is_err());
    }
}
