// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional. Missing keys use the defaults below, and a
// file that fails to parse falls back to the defaults as a whole.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use winit::keyboard::KeyCode;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub shaders: ShaderConfig,
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
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "voxel-renderer".to_string(),
            width: 1280,
            height: 720,
            fullscreen: false,
        }
    }
}

/// Which kind of GPU to favour when more than one can render
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    HighPerformance,
    LowPower,
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub power_preference: PowerPreference,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "fifo".to_string(),
            power_preference: PowerPreference::HighPerformance,
            clear_color: [0.1, 0.2, 0.3, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
    pub hot_reload: bool,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
            hot_reload: true,
        }
    }
}

impl ShaderConfig {
    /// Directories to watch for recompiled shaders, without duplicates
    pub fn watch_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = Vec::with_capacity(2);
        for shader in [&self.vertex, &self.fragment] {
            let dir = match shader.parent() {
                Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
                _ => PathBuf::from("."),
            };
            if !dirs.contains(&dir) {
                dirs.push(dir);
            }
        }
        dirs
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: "renderer.log".to_string(),
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
    pub reload_shaders_key: String,
}

impl Default for ControlsConfig {
    fn default() -> Self {
        Self {
            quit_key: "Escape".to_string(),
            fullscreen_key: "F11".to_string(),
            reload_shaders_key: "F5".to_string(),
        }
    }
}

/// Resolved key bindings; `None` disables the action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyBindings {
    pub quit: Option<KeyCode>,
    pub fullscreen: Option<KeyCode>,
    pub reload_shaders: Option<KeyCode>,
}

impl ControlsConfig {
    pub fn bindings(&self) -> KeyBindings {
        KeyBindings {
            quit: resolve_key("quit_key", &self.quit_key),
            fullscreen: resolve_key("fullscreen_key", &self.fullscreen_key),
            reload_shaders: resolve_key("reload_shaders_key", &self.reload_shaders_key),
        }
    }
}

fn resolve_key(binding: &str, name: &str) -> Option<KeyCode> {
    let key = parse_key_code(name);
    if key.is_none() {
        log::warn!("Unknown key '{}' for {}, binding disabled", name, binding);
    }
    key
}

/// Parse a key name such as "Escape", "F11", "Space", "Q" or "7"
pub fn parse_key_code(name: &str) -> Option<KeyCode> {
    let name = name.trim();
    let key = match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "space" => KeyCode::Space,
        "enter" | "return" => KeyCode::Enter,
        "tab" => KeyCode::Tab,
        "backspace" => KeyCode::Backspace,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        other => {
            let mut chars = other.chars();
            let (Some(c), None) = (chars.next(), chars.next()) else {
                return None;
            };
            return parse_single_char(c);
        }
    };
    Some(key)
}

fn parse_single_char(c: char) -> Option<KeyCode> {
    const LETTERS: [KeyCode; 26] = [
        KeyCode::KeyA, KeyCode::KeyB, KeyCode::KeyC, KeyCode::KeyD, KeyCode::KeyE,
        KeyCode::KeyF, KeyCode::KeyG, KeyCode::KeyH, KeyCode::KeyI, KeyCode::KeyJ,
        KeyCode::KeyK, KeyCode::KeyL, KeyCode::KeyM, KeyCode::KeyN, KeyCode::KeyO,
        KeyCode::KeyP, KeyCode::KeyQ, KeyCode::KeyR, KeyCode::KeyS, KeyCode::KeyT,
        KeyCode::KeyU, KeyCode::KeyV, KeyCode::KeyW, KeyCode::KeyX, KeyCode::KeyY,
        KeyCode::KeyZ,
    ];
    const DIGITS: [KeyCode; 10] = [
        KeyCode::Digit0, KeyCode::Digit1, KeyCode::Digit2, KeyCode::Digit3, KeyCode::Digit4,
        KeyCode::Digit5, KeyCode::Digit6, KeyCode::Digit7, KeyCode::Digit8, KeyCode::Digit9,
    ];

    match c {
        'a'..='z' => Some(LETTERS[(c as u8 - b'a') as usize]),
        '0'..='9' => Some(DIGITS[(c as u8 - b'0') as usize]),
        _ => None,
    }
}

fn source_description(path: &Path) -> String {
    if path.exists() {
        format!("Loaded configuration from {:?}", path)
    } else {
        format!("Config file not found at {:?}, using defaults", path)
    }
}

impl Config {
    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::parse(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Report where the configuration came from
    ///
    /// Loading happens before the logger exists, so this runs afterwards.
    pub fn log_source<P: AsRef<Path>>(&self, path: P) {
        log::info!("{}", source_description(path.as_ref()));
        log::debug!("Config: {:?}", self);
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to FIFO",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::FIFO
            }
        }
    }

    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    /// Validation is only honoured in debug builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.title, "voxel-renderer");
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.graphics.power_preference, PowerPreference::HighPerformance);
        assert!(config.shaders.hot_reload);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 640

            [graphics]
            present_mode = "Mailbox"
            power_preference = "low_power"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.graphics.power_preference, PowerPreference::LowPower);
        assert_eq!(config.controls.quit_key, "Escape");
    }

    #[test]
    fn unknown_present_mode_falls_back_to_fifo() {
        let config = Config::parse("[graphics]\npresent_mode = \"vsync-please\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window\nwidth = ").is_err());
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("definitely/not/here/config.toml").unwrap();
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn zero_frames_in_flight_is_clamped() {
        let config = Config::parse("[graphics]\nmax_frames_in_flight = 0").unwrap();
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn key_names_parse() {
        assert_eq!(parse_key_code("Escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("esc"), Some(KeyCode::Escape));
        assert_eq!(parse_key_code("F11"), Some(KeyCode::F11));
        assert_eq!(parse_key_code(" f5 "), Some(KeyCode::F5));
        assert_eq!(parse_key_code("q"), Some(KeyCode::KeyQ));
        assert_eq!(parse_key_code("Z"), Some(KeyCode::KeyZ));
        assert_eq!(parse_key_code("7"), Some(KeyCode::Digit7));
        assert_eq!(parse_key_code("F13"), None);
        assert_eq!(parse_key_code(""), None);
        assert_eq!(parse_key_code("?"), None);
    }

    #[test]
    fn unknown_binding_is_disabled() {
        let controls = ControlsConfig {
            quit_key: "Q".to_string(),
            fullscreen_key: "Hyper".to_string(),
            reload_shaders_key: "F5".to_string(),
        };
        let bindings = controls.bindings();
        assert_eq!(bindings.quit, Some(KeyCode::KeyQ));
        assert_eq!(bindings.fullscreen, None);
        assert_eq!(bindings.reload_shaders, Some(KeyCode::F5));
    }

    #[test]
    fn shared_shader_directory_is_watched_once() {
        assert_eq!(ShaderConfig::default().watch_dirs(), vec![PathBuf::from("shaders")]);
    }

    #[test]
    fn both_shader_directories_are_watched() {
        let split = ShaderConfig {
            vertex: PathBuf::from("tri.vert.spv"),
            fragment: PathBuf::from("shaders/frag/tri.frag.spv"),
            ..ShaderConfig::default()
        };
        assert_eq!(
            split.watch_dirs(),
            vec![PathBuf::from("."), PathBuf::from("shaders/frag")]
        );
    }

    #[test]
    fn source_reports_missing_file() {
        let missing = source_description(Path::new("definitely/not/here/config.toml"));
        assert!(missing.starts_with("Config file not found"));

        let present = source_description(Path::new("Cargo.toml"));
        assert!(present.starts_with("Loaded configuration from"));
    }
}
