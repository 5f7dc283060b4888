//! Restauration d'une qualité vidéo mémorisée
//!
//! Une qualité est mémorisée comme un couple (index de groupe vidéo
//! supporté, index de piste dans ce groupe). La disposition des pistes peut
//! avoir changé depuis (source ré-encodée) : l'échec de la résolution est un
//! résultat normal, la sélection reste alors automatique.

use crate::errors::ResolveError;
use crate::overlay::VideoQualitySelection;
use crate::tracks::{TrackSelectionOverride, TrackSelectionParameters, TrackType, Tracks};

pub struct VideoQualityOverrideResolver;

impl VideoQualityOverrideResolver {
    /// Paramètres sélectionnant exactement la piste demandée, vidéo
    /// réactivée. Les paramètres d'entrée ne sont pas modifiés.
    pub fn resolve(
        tracks: &Tracks,
        params: &TrackSelectionParameters,
        selection: VideoQualitySelection,
    ) -> Result<TrackSelectionParameters, ResolveError> {
        let groups = tracks.supported_groups(TrackType::Video);
        let group = groups
            .get(selection.group_index)
            .ok_or(ResolveError::GroupOutOfRange {
                index: selection.group_index,
                available: groups.len(),
            })?;
        if selection.track_index_in_group >= group.len() {
            return Err(ResolveError::TrackOutOfRange {
                group: selection.group_index,
                index: selection.track_index_in_group,
                available: group.len(),
            });
        }

        Ok(params
            .clone()
            .set_track_type_disabled(TrackType::Video, false)
            .set_override_for_type(TrackSelectionOverride::new(
                group,
                selection.track_index_in_group,
            )))
    }

    /// Qualité actuellement forcée par un override vidéo, exprimée dans la
    /// disposition courante.
    pub fn current_selection(
        tracks: &Tracks,
        params: &TrackSelectionParameters,
    ) -> Option<VideoQualitySelection> {
        let selection = params.override_for_type(TrackType::Video)?;
        let group_index = tracks
            .supported_groups(TrackType::Video)
            .iter()
            .position(|g| g.id == selection.group_id)?;
        let track_index = *selection.track_indices.first()?;
        Some(VideoQualitySelection::new(group_index, track_index))
    }
}
