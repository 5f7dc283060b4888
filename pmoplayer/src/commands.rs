//! Commandes personnalisées acceptées par la session de lecture

use serde_json::{Map, Value};

pub const ACTION_ADD_SUBTITLE_TRACK: &str = "ADD_SUBTITLE_TRACK";
pub const ACTION_STOP_PLAYER_SESSION: &str = "STOP_PLAYER_SESSION";
pub const SUBTITLE_TRACK_URI_KEY: &str = "subtitle_track_uri";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Attache un sous-titre externe au média courant et le sélectionne
    AddSubtitleTrack { uri: String },
    StopPlayerSession,
}

impl SessionCommand {
    /// Décode une commande reçue d'un contrôleur. `None` pour une action
    /// inconnue ou un argument manquant.
    pub fn from_action(action: &str, args: &Map<String, Value>) -> Option<Self> {
        match action {
            ACTION_ADD_SUBTITLE_TRACK => args
                .get(SUBTITLE_TRACK_URI_KEY)
                .and_then(Value::as_str)
                .filter(|uri| !uri.is_empty())
                .map(|uri| SessionCommand::AddSubtitleTrack {
                    uri: uri.to_string(),
                }),
            ACTION_STOP_PLAYER_SESSION => Some(SessionCommand::StopPlayerSession),
            _ => None,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            SessionCommand::AddSubtitleTrack { .. } => ACTION_ADD_SUBTITLE_TRACK,
            SessionCommand::StopPlayerSession => ACTION_STOP_PLAYER_SESSION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    /// Action inconnue ou argument manquant
    BadValue,
}
