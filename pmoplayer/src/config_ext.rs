//! Extension pour lire les préférences du lecteur dans pmoconfig
//!
//! Toutes les clés vivent sous `player`. Une valeur invalide est remplacée
//! par la valeur par défaut, avec un avertissement.

use anyhow::Result;
use async_trait::async_trait;
use pmoconfig::Config;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::engine::RepeatMode;
use crate::repository::PreferencesRepository;

const SECTION: &str = "player";
pub const DEFAULT_PLAYBACK_SPEED: f32 = 1.0;

/// Reprise de la lecture à la dernière position connue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resume {
    #[default]
    Yes,
    No,
}

impl Resume {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resume::Yes => "yes",
            Resume::No => "no",
        }
    }
}

impl FromStr for Resume {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "true" | "on" => Ok(Resume::Yes),
            "no" | "false" | "off" => Ok(Resume::No),
            other => Err(format!("unknown resume policy: {other}")),
        }
    }
}

/// Mode de répétition mémorisé
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoopMode {
    #[default]
    Off,
    One,
    All,
}

impl LoopMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoopMode::Off => "off",
            LoopMode::One => "one",
            LoopMode::All => "all",
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoopMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(LoopMode::Off),
            "one" => Ok(LoopMode::One),
            "all" => Ok(LoopMode::All),
            other => Err(format!("unknown loop mode: {other}")),
        }
    }
}

impl From<RepeatMode> for LoopMode {
    fn from(mode: RepeatMode) -> Self {
        match mode {
            RepeatMode::Off => LoopMode::Off,
            RepeatMode::One => LoopMode::One,
            RepeatMode::All => LoopMode::All,
        }
    }
}

impl From<LoopMode> for RepeatMode {
    fn from(mode: LoopMode) -> Self {
        match mode {
            LoopMode::Off => RepeatMode::Off,
            LoopMode::One => RepeatMode::One,
            LoopMode::All => RepeatMode::All,
        }
    }
}

/// Préférences de lecture, lues une fois à l'ouverture de la session
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPreferences {
    pub resume: Resume,
    pub remember_selections: bool,
    pub default_playback_speed: f32,
    pub loop_mode: LoopMode,
    pub autoplay: bool,
}

impl Default for PlayerPreferences {
    fn default() -> Self {
        Self {
            resume: Resume::Yes,
            remember_selections: true,
            default_playback_speed: DEFAULT_PLAYBACK_SPEED,
            loop_mode: LoopMode::Off,
            autoplay: true,
        }
    }
}

/// Trait d'extension pour ajouter les préférences du lecteur à pmoconfig
pub trait PlayerConfigExt {
    fn get_player_preferences(&self) -> Result<PlayerPreferences>;

    fn get_resume(&self) -> Result<Resume>;

    fn set_resume(&self, resume: Resume) -> Result<()>;

    fn get_remember_selections(&self) -> Result<bool>;

    fn set_remember_selections(&self, remember: bool) -> Result<()>;

    /// Vitesse par défaut, strictement positive
    fn get_default_playback_speed(&self) -> Result<f32>;

    fn set_default_playback_speed(&self, speed: f32) -> Result<()>;

    fn get_loop_mode(&self) -> Result<LoopMode>;

    fn set_loop_mode(&self, mode: LoopMode) -> Result<()>;

    fn get_autoplay(&self) -> Result<bool>;

    fn set_autoplay(&self, autoplay: bool) -> Result<()>;
}

impl PlayerConfigExt for Config {
    fn get_player_preferences(&self) -> Result<PlayerPreferences> {
        Ok(PlayerPreferences {
            resume: self.get_resume()?,
            remember_selections: self.get_remember_selections()?,
            default_playback_speed: self.get_default_playback_speed()?,
            loop_mode: self.get_loop_mode()?,
            autoplay: self.get_autoplay()?,
        })
    }

    fn get_resume(&self) -> Result<Resume> {
        let raw = self.get_string(&[SECTION, "resume"], Resume::default().as_str())?;
        Ok(raw.parse().unwrap_or_else(|e| {
            warn!("{}, using {}", e, Resume::default().as_str());
            Resume::default()
        }))
    }

    fn set_resume(&self, resume: Resume) -> Result<()> {
        self.set_string(&[SECTION, "resume"], resume.as_str())
    }

    fn get_remember_selections(&self) -> Result<bool> {
        self.get_bool(&[SECTION, "remember_selections"], true)
    }

    fn set_remember_selections(&self, remember: bool) -> Result<()> {
        self.set_bool(&[SECTION, "remember_selections"], remember)
    }

    fn get_default_playback_speed(&self) -> Result<f32> {
        let speed = self.get_f32(&[SECTION, "default_playback_speed"], DEFAULT_PLAYBACK_SPEED)?;
        if speed.is_finite() && speed > 0.0 {
            Ok(speed)
        } else {
            warn!(speed, "Invalid default playback speed, using {}", DEFAULT_PLAYBACK_SPEED);
            Ok(DEFAULT_PLAYBACK_SPEED)
        }
    }

    fn set_default_playback_speed(&self, speed: f32) -> Result<()> {
        self.set_f32(&[SECTION, "default_playback_speed"], speed)
    }

    fn get_loop_mode(&self) -> Result<LoopMode> {
        let raw = self.get_string(&[SECTION, "loop_mode"], LoopMode::default().as_str())?;
        Ok(raw.parse().unwrap_or_else(|e| {
            warn!("{}, using {}", e, LoopMode::default());
            LoopMode::default()
        }))
    }

    fn set_loop_mode(&self, mode: LoopMode) -> Result<()> {
        self.set_string(&[SECTION, "loop_mode"], mode.as_str())
    }

    fn get_autoplay(&self) -> Result<bool> {
        self.get_bool(&[SECTION, "autoplay"], true)
    }

    fn set_autoplay(&self, autoplay: bool) -> Result<()> {
        self.set_bool(&[SECTION, "autoplay"], autoplay)
    }
}

#[async_trait]
impl PreferencesRepository for Config {
    async fn update_loop_mode(&self, mode: LoopMode) -> Result<()> {
        self.set_loop_mode(mode)
    }
}
