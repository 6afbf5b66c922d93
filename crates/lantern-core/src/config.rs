// SPDX-License-Identifier: CEPL-1.0
//! Application configuration.
//!
//! Everything has a compiled-in default. An optional `lantern.toml` overrides
//! the defaults and the app's CLI flags override the file. Once resolved the
//! config is handed to the renderer by reference and never mutated again.

use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "lantern.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("max_frames_in_flight must be at least 1")]
    NoFramesInFlight,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub window: WindowConfig,
    pub render: RenderConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Lantern".to_owned(),
            width: 800,
            height: 600,
        }
    }
}

/// How the device selector picks among suitable adapters.
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// First adapter (in enumeration order) that passes every check.
    FirstSuitable,
    /// Highest score wins; discrete adapters and large max texture size are rewarded.
    #[default]
    HighestScore,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderConfig {
    pub max_frames_in_flight: usize,
    pub validation: bool,
    pub selection: SelectionPolicy,
    pub msaa: bool,
    pub clear_color: [f32; 4],
    pub model_path: PathBuf,
    pub texture_path: PathBuf,
    pub shader_dir: PathBuf,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_frames_in_flight: 2,
            validation: cfg!(debug_assertions),
            selection: SelectionPolicy::HighestScore,
            msaa: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            model_path: PathBuf::from("assets/models/viking_room.obj"),
            texture_path: PathBuf::from("assets/textures/viking_room.png"),
            shader_dir: PathBuf::from("shaders"),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(src: &str, origin: &Path) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(src).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Loads `path`, or `lantern.toml` in the working directory when `path` is `None`.
    ///
    /// A missing default file is not an error; a missing explicit file is.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };

        match fs::read_to_string(&path) {
            Ok(src) => {
                tracing::info!("config: loaded {}", path.display());
                Self::from_toml_str(&src, &path)
            }
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("config: {} not found, using defaults", path.display());
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read { path, source }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.max_frames_in_flight == 0 {
            return Err(ConfigError::NoFramesInFlight);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_compiled_in_constants() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.window.width, 800);
        assert_eq!(cfg.window.height, 600);
        assert_eq!(cfg.render.max_frames_in_flight, 2);
        assert_eq!(cfg.render.selection, SelectionPolicy::HighestScore);
        assert_eq!(cfg.render.validation, cfg!(debug_assertions));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let src = r#"
            [render]
            max_frames_in_flight = 3
            selection = "first_suitable"
        "#;
        let cfg = AppConfig::from_toml_str(src, Path::new("test.toml")).unwrap();
        assert_eq!(cfg.render.max_frames_in_flight, 3);
        assert_eq!(cfg.render.selection, SelectionPolicy::FirstSuitable);
        assert!(cfg.render.msaa);
        assert_eq!(cfg.window, WindowConfig::default());
    }

    #[test]
    fn zero_frames_in_flight_is_rejected() {
        let src = "[render]\nmax_frames_in_flight = 0\n";
        let err = AppConfig::from_toml_str(src, Path::new("test.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NoFramesInFlight));
    }

    #[test]
    fn malformed_file_reports_its_path() {
        let err = AppConfig::from_toml_str("[render\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = AppConfig::load(Some(Path::new("definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
