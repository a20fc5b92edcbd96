// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every field has a default, so a missing file or a partial file both work.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

/// Default config file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub controls: ControlsConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "VkPong".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
            resizable: true,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    pub shader_dir: PathBuf,
    pub require_geometry_shader: bool,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
            shader_dir: PathBuf::from("shaders"),
            require_geometry_shader: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub verbose_validation: bool,
    pub log_level: String,
    pub log_to_file: bool,
    pub log_file: PathBuf,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            verbose_validation: false,
            log_level: "info".to_string(),
            log_to_file: false,
            log_file: PathBuf::from("vkpong.log"),
            show_fps: true,
        }
    }
}

/// Control key bindings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControlsConfig {
    pub quit_key: String,
    pub fullscreen_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
            fullscreen_key: "F11".to_string(),
        }
    }
}

impl Config {
    /// Load configuration, falling back to defaults on any error.
    ///
    /// `path_override` comes from the command line; `config.toml` otherwise.
    pub fn load(path_override: Option<PathBuf>) -> Self {
        let path = path_override.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self::load_from_path(&path).unwrap_or_else(|e| {
            // Logging is not up yet, the config decides its level
            eprintln!("Failed to load {}: {:#}. Using defaults.", path.display(), e);
            Config::default()
        })
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Config::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config file: {:?}", path))
            }
        };

        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validation only ever runs in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    /// Log filter from `debug.log_level`, `Info` when unrecognised
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        parse_present_mode(&self.graphics.present_mode).unwrap_or_else(|| {
            log::warn!(
                "Unknown present mode '{}', defaulting to FIFO",
                self.graphics.present_mode
            );
            ash::vk::PresentModeKHR::FIFO
        })
    }

    pub fn quit_key(&self) -> Option<KeyCode> {
        resolve_key("quit_key", &self.controls.quit_key)
    }

    pub fn fullscreen_key(&self) -> Option<KeyCode> {
        resolve_key("fullscreen_key", &self.controls.fullscreen_key)
    }
}

pub fn parse_present_mode(name: &str) -> Option<ash::vk::PresentModeKHR> {
    match name.to_lowercase().as_str() {
        "immediate" => Some(ash::vk::PresentModeKHR::IMMEDIATE),
        "mailbox" => Some(ash::vk::PresentModeKHR::MAILBOX),
        "fifo" => Some(ash::vk::PresentModeKHR::FIFO),
        "fifo_relaxed" => Some(ash::vk::PresentModeKHR::FIFO_RELAXED),
        _ => None,
    }
}

fn resolve_key(binding: &str, name: &str) -> Option<KeyCode> {
    let key = parse_key(name);
    if key.is_none() {
        log::warn!("Unknown key '{}' for {}, binding disabled", name, binding);
    }
    key
}

/// Map a key name from the config file to a physical key code
pub fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name {
        "Escape" | "Esc" => KeyCode::Escape,
        "Space" => KeyCode::Space,
        "Enter" => KeyCode::Enter,
        "Tab" => KeyCode::Tab,
        "Backspace" => KeyCode::Backspace,
        "F1" => KeyCode::F1,
        "F2" => KeyCode::F2,
        "F3" => KeyCode::F3,
        "F4" => KeyCode::F4,
        "F5" => KeyCode::F5,
        "F6" => KeyCode::F6,
        "F7" => KeyCode::F7,
        "F8" => KeyCode::F8,
        "F9" => KeyCode::F9,
        "F10" => KeyCode::F10,
        "F11" => KeyCode::F11,
        "F12" => KeyCode::F12,
        "Q" => KeyCode::KeyQ,
        "F" => KeyCode::KeyF,
        "P" => KeyCode::KeyP,
        _ => return None,
    };
    Some(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.window.title, "VkPong");
        assert_eq!((config.window.width, config.window.height), (800, 600));
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.shader_dir, PathBuf::from("shaders"));
        assert!(config.graphics.require_geometry_shader);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn partial_tables_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "mailbox"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(Config::from_toml("[window\nwidth = ").is_err());
        assert!(Config::from_toml("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here.toml").unwrap();
        assert_eq!(config.window.title, "VkPong");
    }

    #[test]
    fn unreadable_path_is_an_error() {
        // A regular file used as a parent directory cannot be read through
        let path = Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("Cargo.toml")
            .join("config.toml");
        let err = Config::load_from_path(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to read config file"));
    }

    #[test]
    fn frames_in_flight_is_at_least_one() {
        let config = Config::from_toml("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        assert_eq!(parse_present_mode("FIFO"), Some(vk::PresentModeKHR::FIFO));
        assert_eq!(
            parse_present_mode("Fifo_Relaxed"),
            Some(vk::PresentModeKHR::FIFO_RELAXED)
        );
        assert_eq!(
            parse_present_mode("immediate"),
            Some(vk::PresentModeKHR::IMMEDIATE)
        );
        assert_eq!(parse_present_mode("vsync"), None);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::from_toml("[graphics]\npresent_mode = \"turbo\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn log_level_parsing() {
        let config = Config::from_toml("[debug]\nlog_level = \"debug\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);

        let config = Config::from_toml("[debug]\nlog_level = \"loud\"").unwrap();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn key_bindings() {
        let config = Config::default();
        assert_eq!(config.quit_key(), Some(KeyCode::Escape));
        assert_eq!(config.fullscreen_key(), Some(KeyCode::F11));
        assert_eq!(parse_key("Esc"), Some(KeyCode::Escape));
        assert_eq!(parse_key("Hyper"), None);
    }
}
