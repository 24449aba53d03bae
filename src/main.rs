use std::error::Error;
use std::fmt::Display;
use std::io::{stdout, Write};
use std::path::PathBuf;
use std::str::FromStr;

use bpaf::Bpaf;
use gmk87::config::{ConfigChanges, ConfigView, LedChanges, UnderglowChanges, MIN_FRAME_DELAY_MS};
use gmk87::{ActiveScreen, Gmk87};
use tracing_subscriber::EnvFilter;

use crate::media::FrameSource;

mod media;
mod presets;

/// Hex color argument (#RRGGBB or #RGB)
#[derive(Debug, Clone, Hash)]
struct Color(pub [u8; 3]);
impl Display for Color {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{r:02x}{g:02x}{b:02x}")
    }
}
impl FromStr for Color {
    type Err = String;
    fn from_str(code: &str) -> Result<Self, Self::Err> {
        let mut hex = code.trim_start_matches('#').to_string();
        match hex.len() {
            // double up shorthand #rgb codes
            3 => hex = hex.chars().flat_map(|c| [c, c]).collect(),
            6 => {},
            l => return Err(format!("hex color needs 3 or 6 digits, {code} has {l}")),
        }
        let packed = u32::from_str_radix(&hex, 16)
            .map_err(|_| format!("{code} is not a hex color"))?;
        Ok(Self([
            (packed >> 16) as u8,
            (packed >> 8) as u8,
            packed as u8,
        ]))
    }
}

fn level(n: u8) -> bool {
    n <= 9
}

#[derive(Clone, Debug, Bpaf)]
struct SetArgs {
    /// Underglow effect id
    #[bpaf(short, long)]
    effect: Option<u8>,
    /// Underglow brightness (0-9)
    #[bpaf(short, long, argument("NUM"), guard(|n| level(*n), "brightness must be 0-9"), optional)]
    brightness: Option<u8>,
    /// Underglow animation speed (0-9)
    #[bpaf(short, long, argument("NUM"), guard(|n| level(*n), "speed must be 0-9"), optional)]
    speed: Option<u8>,
    /// Reverse the underglow animation direction
    #[bpaf(short, long)]
    reversed: Option<bool>,
    /// Cycle underglow hues instead of a fixed color
    #[bpaf(long)]
    rainbow: Option<bool>,
    /// Underglow color (hex: #RRGGBB or #RGB)
    #[bpaf(short, long)]
    color: Option<Color>,
    /// Indicator led mode
    #[bpaf(long)]
    led_mode: Option<u8>,
    /// Indicator led saturation (0-9)
    #[bpaf(long, argument("NUM"), guard(|n| level(*n), "saturation must be 0-9"), optional)]
    led_saturation: Option<u8>,
    /// Cycle indicator led hues
    #[bpaf(long)]
    led_rainbow: Option<bool>,
    /// Indicator led color index
    #[bpaf(long)]
    led_color: Option<u8>,
    /// Enable or disable the windows key lock
    #[bpaf(long)]
    winlock: Option<bool>,
    /// Active screen (clock|c, image1|1, image2|2)
    #[bpaf(long)]
    screen: Option<ActiveScreen>,
    /// Frame delay in milliseconds for the image slots (min 60)
    #[bpaf(short, long)]
    delay: Option<u16>,
}

impl SetArgs {
    fn to_changes(&self) -> ConfigChanges {
        ConfigChanges {
            underglow: UnderglowChanges {
                effect: self.effect,
                brightness: self.brightness,
                speed: self.speed,
                reversed: self.reversed,
                rainbow: self.rainbow,
                color: self.color.as_ref().map(|c| c.0),
            },
            led: LedChanges {
                mode: self.led_mode,
                saturation: self.led_saturation,
                rainbow: self.led_rainbow,
                color_index: self.led_color,
            },
            windows_lock: self.winlock,
            active_screen: self.screen,
            frame_delay_ms: self.delay.map(|d| d.max(MIN_FRAME_DELAY_MS)),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, Bpaf)]
enum Command {
    /// Print the keyboard's current configuration
    #[bpaf(command)]
    Config,
    /// Sync the onboard clock to the system clock
    #[bpaf(command)]
    Time,
    /// Change underglow, led and screen settings
    #[bpaf(command, fallback_to_usage)]
    Set(#[bpaf(external(set_args))] SetArgs),
    /// Upload images or gifs to the display's two slots
    #[bpaf(command, fallback_to_usage)]
    Upload {
        /// Frame delay in milliseconds for animations (min 60)
        #[bpaf(short, long)]
        delay: Option<u16>,
        /// Background color for transparent images (hex: #RRGGBB or #RGB)
        #[bpaf(long, fallback(Color([0; 3])), display_fallback)]
        bg: Color,
        /// Use nearest neighbor interpolation when resizing, otherwise uses lanczos
        #[bpaf(short('n'), long("nearest"))]
        nearest: bool,
        /// Image for the first slot
        #[bpaf(positional("PATH"), guard(|p| p.exists(), "file not found"))]
        first: PathBuf,
        /// Optional image for the second slot
        #[bpaf(positional("PATH2"), guard(|p| p.exists(), "file not found"), optional)]
        second: Option<PathBuf>,
    },
    /// Apply a named preset from the preset file
    #[bpaf(command)]
    Preset {
        #[bpaf(positional("NAME"))]
        name: String,
    },
}

#[derive(Clone, Debug, Bpaf)]
#[bpaf(options, version, descr(env!("CARGO_PKG_DESCRIPTION")))]
struct Cli {
    /// Enable debug logging
    #[bpaf(short, long)]
    verbose: bool,
    #[bpaf(external(command))]
    command: Command,
}

fn print_config(view: &ConfigView) {
    let glow = view.underglow();
    let led = view.led();
    let clock = view.clock();
    let (frames1, frames2) = view.frame_counts();
    println!("underglow:");
    println!("  effect: {}", glow.effect);
    println!("  brightness: {}", glow.brightness);
    println!("  speed: {}", glow.speed);
    println!("  reversed: {}", glow.reversed);
    println!("  rainbow: {}", glow.rainbow);
    println!("  color: {}", Color(glow.color));
    println!("led:");
    println!("  mode: {}", led.mode);
    println!("  saturation: {}", led.saturation);
    println!("  rainbow: {}", led.rainbow);
    println!("  color index: {}", led.color_index);
    println!(
        "screen: {:?}",
        view.active_screen().unwrap_or_default()
    );
    println!("frames: {frames1} + {frames2} @ {}ms", view.frame_delay_ms());
    println!(
        "clock: 20{:02}-{:02}-{:02} {:02}:{:02}:{:02}",
        clock.year, clock.month, clock.day, clock.hour, clock.minute, clock.second
    );
    println!("windows lock: {}", view.windows_lock());
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli().run();
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let keyboard = Gmk87::default();
    match cli.command {
        Command::Config => {
            print_config(&keyboard.read_config()?);
            Ok(())
        },
        Command::Time => {
            keyboard.sync_clock()?;
            println!("updated time to {}", chrono::Local::now());
            Ok(())
        },
        Command::Set(args) => {
            let changes = args.to_changes();
            if changes.is_empty() {
                return Err("nothing to set".into());
            }
            print_config(&keyboard.apply_changes(&changes)?);
            Ok(())
        },
        Command::Preset { name } => {
            let changes = presets::load(&name)?.to_changes()?;
            if changes.is_empty() {
                return Err(format!("preset '{name}' is empty").into());
            }
            print_config(&keyboard.apply_changes(&changes)?);
            println!("applied preset '{name}'");
            Ok(())
        },
        Command::Upload {
            delay,
            bg,
            nearest,
            first,
            second,
        } => {
            let FrameSource { frames, delay_ms } = media::load(&first, bg.0, nearest)?;
            let second_frames = second
                .map(|path| media::load(&path, bg.0, nearest))
                .transpose()?
                .map(|source| source.frames)
                .unwrap_or_default();

            let truncation = keyboard.upload(
                &frames,
                &second_frames,
                delay.or(delay_ms),
                &mut |done, total| {
                    let fmt_width = total.to_string().len();
                    print!("\ruploading ({done:fmt_width$}/{total}) ... ");
                    stdout().flush().unwrap();
                },
            )?;
            println!("done");
            if let Some(t) = truncation {
                let (r1, r2) = t.requested;
                let (k1, k2) = t.kept;
                println!("note: kept {k1}+{k2} of {r1}+{r2} frames (device limit)");
            }
            Ok(())
        },
    }
}
