//! Modèle des pistes exposé par le moteur de lecture
//!
//! Le moteur rapporte ses pistes sous forme de groupes typés (audio, vidéo,
//! texte). Les sélections persistées sont des index *parmi les groupes
//! supportés d'un type*, dans l'ordre rapporté par le moteur.

use pmocache::QualityKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackType {
    Audio,
    Video,
    Text,
    Other,
}

/// Format d'une piste
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackFormat {
    pub id: Option<String>,
    pub label: Option<String>,
    pub language: Option<String>,
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bitrate: Option<u32>,
}

impl TrackFormat {
    pub fn video(height: u32, bitrate: u32) -> Self {
        Self {
            height: Some(height),
            bitrate: Some(bitrate),
            ..Default::default()
        }
    }

    pub fn language(language: &str) -> Self {
        Self {
            language: Some(language.to_string()),
            ..Default::default()
        }
    }
}

/// Groupe de pistes interchangeables
#[derive(Debug, Clone, PartialEq)]
pub struct TrackGroup {
    /// Identifiant stable du groupe, référencé par les overrides
    pub id: String,
    pub track_type: TrackType,
    pub supported: bool,
    pub formats: Vec<TrackFormat>,
    pub selected: Vec<bool>,
}

impl TrackGroup {
    pub fn new(id: impl Into<String>, track_type: TrackType, formats: Vec<TrackFormat>) -> Self {
        let selected = vec![false; formats.len()];
        Self {
            id: id.into(),
            track_type,
            supported: true,
            formats,
            selected,
        }
    }

    pub fn with_selected(mut self, index: usize) -> Self {
        if let Some(flag) = self.selected.get_mut(index) {
            *flag = true;
        }
        self
    }

    pub fn unsupported(mut self) -> Self {
        self.supported = false;
        self
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    pub fn selected_format(&self) -> Option<&TrackFormat> {
        self.selected
            .iter()
            .position(|s| *s)
            .and_then(|i| self.formats.get(i))
    }
}

/// Ensemble des groupes de pistes du média courant
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Tracks {
    pub groups: Vec<TrackGroup>,
}

impl Tracks {
    pub fn new(groups: Vec<TrackGroup>) -> Self {
        Self { groups }
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Groupes supportés d'un type, dans l'ordre du moteur
    pub fn supported_groups(&self, track_type: TrackType) -> Vec<&TrackGroup> {
        self.groups
            .iter()
            .filter(|g| g.track_type == track_type && g.supported)
            .collect()
    }

    pub fn supported_group_count(&self, track_type: TrackType) -> usize {
        self.supported_groups(track_type).len()
    }

    /// Clé de qualité de la piste sélectionnée dans le premier groupe vidéo
    /// supporté. `None` sans vidéo ou sans sélection.
    pub fn selected_quality_key(&self) -> Option<QualityKey> {
        let group = self.supported_groups(TrackType::Video).into_iter().next()?;
        let format = group.selected_format()?;
        Some(QualityKey::for_video(format.height, format.bitrate))
    }
}

/// Sélection explicite de pistes dans un groupe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackSelectionOverride {
    pub group_id: String,
    pub track_type: TrackType,
    pub track_indices: Vec<usize>,
}

impl TrackSelectionOverride {
    pub fn new(group: &TrackGroup, track_index: usize) -> Self {
        Self {
            group_id: group.id.clone(),
            track_type: group.track_type,
            track_indices: vec![track_index],
        }
    }
}

/// Paramètres de sélection de pistes du moteur
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSelectionParameters {
    pub overrides: Vec<TrackSelectionOverride>,
    pub disabled_types: Vec<TrackType>,
}

impl TrackSelectionParameters {
    /// Remplace tout override existant du même type
    pub fn set_override_for_type(mut self, selection: TrackSelectionOverride) -> Self {
        self.overrides
            .retain(|o| o.track_type != selection.track_type);
        self.overrides.push(selection);
        self
    }

    pub fn clear_overrides_of_type(mut self, track_type: TrackType) -> Self {
        self.overrides.retain(|o| o.track_type != track_type);
        self
    }

    pub fn set_track_type_disabled(mut self, track_type: TrackType, disabled: bool) -> Self {
        self.disabled_types.retain(|t| *t != track_type);
        if disabled {
            self.disabled_types.push(track_type);
        }
        self
    }

    pub fn is_track_type_disabled(&self, track_type: TrackType) -> bool {
        self.disabled_types.contains(&track_type)
    }

    pub fn override_for_type(&self, track_type: TrackType) -> Option<&TrackSelectionOverride> {
        self.overrides.iter().find(|o| o.track_type == track_type)
    }
}

/// Index, parmi les groupes supportés du type, du groupe choisi manuellement.
///
/// `None` si le type est désactivé, sans override, ou si l'override vise un
/// groupe absent de la disposition courante.
pub fn manually_selected_track_index(
    tracks: &Tracks,
    params: &TrackSelectionParameters,
    track_type: TrackType,
) -> Option<usize> {
    if params.is_track_type_disabled(track_type) {
        return None;
    }
    let selection = params.override_for_type(track_type)?;
    tracks
        .supported_groups(track_type)
        .iter()
        .position(|g| g.id == selection.group_id)
}

/// Paramètres sélectionnant la première piste du `index`-ième groupe
/// supporté du type. `None` si l'index ne correspond à aucun groupe.
pub fn switch_track(
    tracks: &Tracks,
    params: &TrackSelectionParameters,
    track_type: TrackType,
    index: usize,
) -> Option<TrackSelectionParameters> {
    let groups = tracks.supported_groups(track_type);
    let group = groups.get(index).filter(|g| !g.is_empty())?;
    Some(
        params
            .clone()
            .set_track_type_disabled(track_type, false)
            .set_override_for_type(TrackSelectionOverride::new(group, 0)),
    )
}
