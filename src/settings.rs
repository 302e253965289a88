use std::path::{Path, PathBuf};

use config_file::FromConfigFile;
use serde::Deserialize;

use crate::effects::EffectKind;

#[derive(thiserror::Error, Debug)]
#[error("cannot load settings from {path}: {reason}")]
pub struct SettingsError {
    path: PathBuf,
    reason: String,
}

/// Defaults read from a settings file. Command line flags take precedence.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server: Option<String>,
    pub layout: Option<PathBuf>,
    pub fps: Option<f32>,
    pub effect: Option<EffectKind>,
    pub color: Option<[f32; 3]>,
}

impl Settings {
    /// The format is picked from the file extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Settings, SettingsError> {
        let path = path.as_ref();
        match Settings::from_config_file(path) {
            Ok(settings) => Ok(settings),
            Err(err) => Err(SettingsError {
                path: path.to_path_buf(),
                reason: err.to_string(),
            }),
        }
    }
}
