//! Préchargement des flux DASH
//!
//! Le manifeste MPD du média actif est lu une fois (sauf flux `dynamic`),
//! puis les segments qui suivent la position de lecture sont confiés au
//! [`SegmentPrefetcher`]. La limite de concurrence est donc partagée entre
//! flux progressifs et flux adaptatifs.
//!
//! Formes d'adressage supportées :
//! - `SegmentTemplate` avec `$Number$`, `$Number%0Nd$`, `$RepresentationID$`,
//!   `$Bandwidth$`, `$Time$` et `$$` ;
//! - `SegmentTemplate` + `SegmentTimeline` (`S@t`, `S@d`, `S@r`, y compris `r=-1`) ;
//! - `SegmentList` (`SegmentURL@media`, `@mediaRange`).
//!
//! Les `BaseURL` sont résolues du MPD vers la représentation.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};
use url::Url;

use crate::error::{CacheError, Result};
use crate::keys::{ByteRange, QualityKey};
use crate::prefetch::SegmentPrefetcher;

/// Type MIME des manifestes DASH
pub const DASH_MIME_TYPE: &str = "application/dash+xml";

// ============= Structures MPD =============

#[derive(Debug, Clone, Default, Deserialize)]
struct BaseUrl {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename = "MPD")]
struct Mpd {
    #[serde(rename = "@type", default)]
    kind: Option<String>,
    #[serde(rename = "@mediaPresentationDuration", default)]
    media_presentation_duration: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "Period", default)]
    periods: Vec<Period>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Period {
    #[serde(rename = "@start", default)]
    start: Option<String>,
    #[serde(rename = "@duration", default)]
    duration: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList", default)]
    segment_list: Option<SegmentList>,
    #[serde(rename = "AdaptationSet", default)]
    adaptation_sets: Vec<AdaptationSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct AdaptationSet {
    #[serde(rename = "@mimeType", default)]
    mime_type: Option<String>,
    #[serde(rename = "@contentType", default)]
    content_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList", default)]
    segment_list: Option<SegmentList>,
    #[serde(rename = "Representation", default)]
    representations: Vec<Representation>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Representation {
    #[serde(rename = "@id", default)]
    id: String,
    #[serde(rename = "@bandwidth", default)]
    bandwidth: Option<u64>,
    #[serde(rename = "@width", default)]
    width: Option<u32>,
    #[serde(rename = "@height", default)]
    height: Option<u32>,
    #[serde(rename = "@mimeType", default)]
    mime_type: Option<String>,
    #[serde(rename = "BaseURL", default)]
    base_urls: Vec<BaseUrl>,
    #[serde(rename = "SegmentTemplate", default)]
    segment_template: Option<SegmentTemplate>,
    #[serde(rename = "SegmentList", default)]
    segment_list: Option<SegmentList>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SegmentTemplate {
    #[serde(rename = "@media", default)]
    media: Option<String>,
    #[serde(rename = "@initialization", default)]
    initialization: Option<String>,
    #[serde(rename = "@startNumber", default)]
    start_number: Option<u64>,
    #[serde(rename = "@timescale", default)]
    timescale: Option<u64>,
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
    #[serde(rename = "@presentationTimeOffset", default)]
    presentation_time_offset: Option<u64>,
    #[serde(rename = "SegmentTimeline", default)]
    segment_timeline: Option<SegmentTimeline>,
}

impl SegmentTemplate {
    /// Complète les attributs absents avec ceux du niveau parent
    fn inherit(&self, parent: &SegmentTemplate) -> SegmentTemplate {
        SegmentTemplate {
            media: self.media.clone().or_else(|| parent.media.clone()),
            initialization: self
                .initialization
                .clone()
                .or_else(|| parent.initialization.clone()),
            start_number: self.start_number.or(parent.start_number),
            timescale: self.timescale.or(parent.timescale),
            duration: self.duration.or(parent.duration),
            presentation_time_offset: self
                .presentation_time_offset
                .or(parent.presentation_time_offset),
            segment_timeline: self
                .segment_timeline
                .clone()
                .or_else(|| parent.segment_timeline.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SegmentTimeline {
    #[serde(rename = "S", default)]
    entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TimelineEntry {
    #[serde(rename = "@t", default)]
    t: Option<u64>,
    #[serde(rename = "@d", default)]
    d: u64,
    #[serde(rename = "@r", default)]
    r: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SegmentList {
    #[serde(rename = "@timescale", default)]
    timescale: Option<u64>,
    #[serde(rename = "@duration", default)]
    duration: Option<u64>,
    #[serde(rename = "Initialization", default)]
    initialization: Option<UrlElement>,
    #[serde(rename = "SegmentURL", default)]
    segment_urls: Vec<SegmentUrl>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct UrlElement {
    #[serde(rename = "@sourceURL", default)]
    source_url: Option<String>,
    #[serde(rename = "@range", default)]
    range: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SegmentUrl {
    #[serde(rename = "@media", default)]
    media: Option<String>,
    #[serde(rename = "@mediaRange", default)]
    media_range: Option<String>,
}

// ============= Modèle résolu =============

/// Segment concret d'un flux DASH
#[derive(Debug, Clone, PartialEq)]
pub struct DashSegment {
    pub uri: String,
    pub range: Option<ByteRange>,
    /// Début du segment dans la présentation (secondes)
    pub start_secs: f64,
    pub duration_secs: f64,
    /// Segment d'initialisation
    pub is_init: bool,
}

/// Représentation telle qu'annoncée par le manifeste
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepresentationInfo {
    pub id: String,
    pub bandwidth: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub is_video: bool,
}

#[derive(Debug, Clone, Copy)]
struct PeriodBounds {
    start: f64,
    duration: Option<f64>,
}

impl PeriodBounds {
    fn contains(&self, position: f64) -> bool {
        position >= self.start && self.duration.is_none_or(|d| position < self.start + d)
    }
}

/// Manifeste MPD analysé
#[derive(Debug, Clone)]
pub struct MpdManifest {
    uri: Url,
    mpd: Mpd,
}

impl MpdManifest {
    pub fn parse(xml: &str, manifest_uri: &str) -> Result<Self> {
        let uri = Url::parse(manifest_uri)?;
        let mpd: Mpd = quick_xml::de::from_str(xml)
            .map_err(|e| CacheError::manifest(format!("invalid MPD: {}", e)))?;
        if mpd.periods.is_empty() {
            return Err(CacheError::manifest("MPD without Period"));
        }
        Ok(Self { uri, mpd })
    }

    /// Flux en direct : le manifeste doit être relu
    pub fn is_dynamic(&self) -> bool {
        self.mpd.kind.as_deref() == Some("dynamic")
    }

    /// Durée totale annoncée (secondes)
    pub fn total_duration(&self) -> Option<f64> {
        self.mpd
            .media_presentation_duration
            .as_deref()
            .and_then(parse_iso8601_duration)
    }

    /// Représentations de toutes les périodes
    pub fn representations(&self) -> Vec<RepresentationInfo> {
        self.mpd
            .periods
            .iter()
            .flat_map(|period| period.adaptation_sets.iter())
            .flat_map(|set| {
                let video = is_video_set(set);
                set.representations.iter().map(move |rep| RepresentationInfo {
                    id: rep.id.clone(),
                    bandwidth: rep.bandwidth,
                    width: rep.width,
                    height: rep.height,
                    is_video: video,
                })
            })
            .collect()
    }

    fn period_bounds(&self) -> Vec<PeriodBounds> {
        let periods = &self.mpd.periods;
        let total = self.total_duration();
        let mut bounds: Vec<PeriodBounds> = Vec::with_capacity(periods.len());
        for (i, period) in periods.iter().enumerate() {
            let start = period
                .start
                .as_deref()
                .and_then(parse_iso8601_duration)
                .or_else(|| {
                    bounds
                        .last()
                        .and_then(|prev| prev.duration.map(|d| prev.start + d))
                })
                .unwrap_or(0.0);
            let explicit = period.duration.as_deref().and_then(parse_iso8601_duration);
            let next_start = periods
                .get(i + 1)
                .and_then(|next| next.start.as_deref())
                .and_then(parse_iso8601_duration);
            let duration = explicit
                .or_else(|| next_start.map(|n| n - start))
                .or_else(|| total.map(|t| t - start))
                .filter(|d| *d > 0.0);
            bounds.push(PeriodBounds { start, duration });
        }
        bounds
    }

    /// Segments à venir après `position_secs`, `count` par ensemble d'adaptation,
    /// précédés des segments d'initialisation des représentations retenues.
    pub fn upcoming_segments(
        &self,
        position_secs: f64,
        quality: Option<&QualityKey>,
        count: usize,
    ) -> Result<Vec<DashSegment>> {
        let bounds = self.period_bounds();
        let index = bounds
            .iter()
            .position(|b| b.contains(position_secs))
            .or_else(|| bounds.iter().rposition(|b| b.start <= position_secs))
            .unwrap_or(0);
        let period = &self.mpd.periods[index];
        let period_bounds = bounds[index];

        let mut segments = Vec::new();
        for set in &period.adaptation_sets {
            let Some(rep) = select_representation(set, quality) else {
                continue;
            };
            let base = self.resolve_base(&[
                self.mpd.base_urls.as_slice(),
                period.base_urls.as_slice(),
                set.base_urls.as_slice(),
                rep.base_urls.as_slice(),
            ])?;
            let ctx = SegmentContext {
                base: &base,
                representation: rep,
                period: period_bounds,
                position: position_secs,
                count,
            };

            let template = merge_templates(&[
                period.segment_template.as_ref(),
                set.segment_template.as_ref(),
                rep.segment_template.as_ref(),
            ]);
            let list = rep
                .segment_list
                .as_ref()
                .or(set.segment_list.as_ref())
                .or(period.segment_list.as_ref());

            if let Some(template) = template {
                segments.extend(ctx.template_segments(&template)?);
            } else if let Some(list) = list {
                segments.extend(ctx.list_segments(list)?);
            } else {
                trace!(representation = %rep.id, "no segment addressing, nothing to prefetch");
            }
        }
        Ok(segments)
    }

    fn resolve_base(&self, layers: &[&[BaseUrl]]) -> Result<Url> {
        let mut base = self.uri.clone();
        for layer in layers {
            if let Some(first) = layer.first() {
                let value = first.value.trim();
                if !value.is_empty() {
                    base = base.join(value)?;
                }
            }
        }
        Ok(base)
    }
}

fn merge_templates(levels: &[Option<&SegmentTemplate>]) -> Option<SegmentTemplate> {
    let mut merged: Option<SegmentTemplate> = None;
    for template in levels.iter().flatten() {
        merged = Some(match merged {
            Some(parent) => template.inherit(&parent),
            None => (*template).clone(),
        });
    }
    merged
}

fn is_video_set(set: &AdaptationSet) -> bool {
    if set.content_type.as_deref() == Some("video") {
        return true;
    }
    if set
        .mime_type
        .as_deref()
        .is_some_and(|m| m.starts_with("video/"))
    {
        return true;
    }
    set.representations.iter().any(|rep| {
        rep.height.is_some()
            || rep
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("video/"))
    })
}

/// Choisit la représentation à précharger dans un ensemble d'adaptation.
///
/// Vidéo : hauteur et débit de la qualité courante, sinon même hauteur,
/// sinon le plus petit débit. Autres ensembles : la première représentation.
fn select_representation<'a>(
    set: &'a AdaptationSet,
    quality: Option<&QualityKey>,
) -> Option<&'a Representation> {
    let reps = &set.representations;
    if !is_video_set(set) {
        return reps.first();
    }

    if let Some((height, bitrate)) = quality.and_then(QualityKey::video_dimensions) {
        if let Some(rep) = reps.iter().find(|r| {
            height.is_some()
                && r.height == height
                && bitrate.is_some()
                && r.bandwidth.map(|b| b as i64) == bitrate.map(i64::from)
        }) {
            return Some(rep);
        }
        if let Some(rep) = reps.iter().find(|r| height.is_some() && r.height == height) {
            return Some(rep);
        }
    }

    reps.iter()
        .min_by_key(|r| r.bandwidth.unwrap_or(u64::MAX))
}

struct SegmentContext<'a> {
    base: &'a Url,
    representation: &'a Representation,
    period: PeriodBounds,
    position: f64,
    count: usize,
}

impl SegmentContext<'_> {
    fn is_upcoming(&self, start: f64, duration: f64) -> bool {
        start + duration > self.position
    }

    fn join(&self, relative: &str) -> Result<String> {
        Ok(self.base.join(relative)?.to_string())
    }

    fn expand(&self, template: &str, number: u64, time: u64) -> String {
        expand_template(
            template,
            &self.representation.id,
            number,
            self.representation.bandwidth.unwrap_or(0),
            time,
        )
    }

    fn template_segments(&self, template: &SegmentTemplate) -> Result<Vec<DashSegment>> {
        let timescale = template.timescale.unwrap_or(1).max(1) as f64;
        let pto = template.presentation_time_offset.unwrap_or(0);
        let start_number = template.start_number.unwrap_or(1);
        let mut out = Vec::new();

        if let Some(init) = &template.initialization {
            out.push(DashSegment {
                uri: self.join(&self.expand(init, start_number, 0))?,
                range: None,
                start_secs: self.period.start,
                duration_secs: 0.0,
                is_init: true,
            });
        }

        let Some(media) = template.media.as_ref().filter(|_| self.count > 0) else {
            return Ok(out);
        };
        let mut produced = 0;

        if let Some(timeline) = &template.segment_timeline {
            let entries = &timeline.entries;
            let mut time = 0u64;
            let mut number = start_number;
            'timeline: for (i, entry) in entries.iter().enumerate() {
                if let Some(t) = entry.t {
                    time = t;
                }
                if entry.d == 0 {
                    continue;
                }
                let repeats = match entry.r {
                    Some(r) if r >= 0 => r as u64,
                    Some(_) => {
                        let end = entries
                            .get(i + 1)
                            .and_then(|next| next.t)
                            .map(|t| t as f64)
                            .or_else(|| {
                                self.period
                                    .duration
                                    .map(|d| d * timescale + pto as f64)
                            });
                        match end {
                            Some(end) if end > time as f64 => {
                                (((end - time as f64) / entry.d as f64).ceil() as u64)
                                    .saturating_sub(1)
                            }
                            _ => 0,
                        }
                    }
                    None => 0,
                };
                // Saut direct à la première répétition encore à venir
                let behind =
                    (self.position - self.period.start) * timescale + pto as f64 - time as f64;
                let whole = (behind / entry.d as f64).floor();
                let skip = if whole > 1.0 {
                    (whole as u64 - 1).min(repeats)
                } else {
                    0
                };
                for k in skip..=repeats {
                    let Some(segment_time) =
                        k.checked_mul(entry.d).and_then(|offset| time.checked_add(offset))
                    else {
                        break 'timeline;
                    };
                    let start = self.period.start + (segment_time as f64 - pto as f64) / timescale;
                    let duration = entry.d as f64 / timescale;
                    if self.is_upcoming(start, duration) {
                        out.push(DashSegment {
                            uri: self.join(&self.expand(
                                media,
                                number.saturating_add(k),
                                segment_time,
                            ))?,
                            range: None,
                            start_secs: start,
                            duration_secs: duration,
                            is_init: false,
                        });
                        produced += 1;
                        if produced >= self.count {
                            break 'timeline;
                        }
                    }
                }
                let advance = repeats
                    .checked_add(1)
                    .and_then(|n| n.checked_mul(entry.d))
                    .and_then(|span| time.checked_add(span));
                let Some(next) = advance else {
                    break;
                };
                time = next;
                number = number.saturating_add(repeats).saturating_add(1);
            }
        } else if let Some(d) = template.duration.filter(|d| *d > 0) {
            let segment_secs = d as f64 / timescale;
            let total = self
                .period
                .duration
                .map(|pd| (pd / segment_secs).ceil() as u64);
            let first = ((self.position - self.period.start).max(0.0) / segment_secs).floor() as u64;
            let mut index = first;
            while produced < self.count && total.is_none_or(|t| index < t) {
                out.push(DashSegment {
                    uri: self.join(&self.expand(
                        media,
                        start_number.saturating_add(index),
                        index.saturating_mul(d).saturating_add(pto),
                    ))?,
                    range: None,
                    start_secs: self.period.start + index as f64 * segment_secs,
                    duration_secs: segment_secs,
                    is_init: false,
                });
                produced += 1;
                index += 1;
            }
        }

        Ok(out)
    }

    fn list_segments(&self, list: &SegmentList) -> Result<Vec<DashSegment>> {
        let timescale = list.timescale.unwrap_or(1).max(1) as f64;
        let segment_secs = list.duration.map(|d| d as f64 / timescale);
        let mut out = Vec::new();

        if let Some(init) = &list.initialization {
            let uri = match &init.source_url {
                Some(source) => self.join(source)?,
                None => self.base.to_string(),
            };
            out.push(DashSegment {
                uri,
                range: init.range.as_deref().and_then(parse_byte_range),
                start_secs: self.period.start,
                duration_secs: 0.0,
                is_init: true,
            });
        }

        let mut produced = 0;
        for (i, segment) in list.segment_urls.iter().enumerate() {
            if produced >= self.count {
                break;
            }
            let start = self.period.start + segment_secs.map(|s| s * i as f64).unwrap_or(0.0);
            let duration = segment_secs.unwrap_or(0.0);
            if segment_secs.is_some() && !self.is_upcoming(start, duration) {
                continue;
            }
            let uri = match &segment.media {
                Some(media) => self.join(media)?,
                None => self.base.to_string(),
            };
            out.push(DashSegment {
                uri,
                range: segment.media_range.as_deref().and_then(parse_byte_range),
                start_secs: start,
                duration_secs: duration,
                is_init: false,
            });
            produced += 1;
        }
        Ok(out)
    }
}

// ============= Utilitaires =============

/// Durée ISO 8601 (`PT1H2M3.5S`, `P1DT2H`) en secondes
pub fn parse_iso8601_duration(value: &str) -> Option<f64> {
    let rest = value.trim().strip_prefix('P')?;
    let (date, time) = rest.split_once('T').unwrap_or((rest, ""));
    let date_secs = sum_components(
        date,
        &[
            ('Y', 365.0 * 86400.0),
            ('M', 30.0 * 86400.0),
            ('W', 7.0 * 86400.0),
            ('D', 86400.0),
        ],
    )?;
    let time_secs = sum_components(time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)])?;
    Some(date_secs + time_secs)
}

fn sum_components(part: &str, units: &[(char, f64)]) -> Option<f64> {
    let mut total = 0.0;
    let mut number = String::new();
    for c in part.chars() {
        if c.is_ascii_digit() || c == '.' {
            number.push(c);
            continue;
        }
        let (_, factor) = units.iter().find(|(unit, _)| *unit == c)?;
        let value: f64 = number.parse().ok()?;
        total += value * factor;
        number.clear();
    }
    if !number.is_empty() {
        return None;
    }
    Some(total)
}

/// Plage `a-b` (bornes incluses)
fn parse_byte_range(value: &str) -> Option<ByteRange> {
    let (start, end) = value.trim().split_once('-')?;
    let start: u64 = start.parse().ok()?;
    let end: u64 = end.parse().ok()?;
    (end >= start).then(|| ByteRange::new(start, end - start + 1))
}

/// Développe les identifiants d'un `SegmentTemplate`
pub fn expand_template(
    template: &str,
    representation_id: &str,
    number: u64,
    bandwidth: u64,
    time: u64,
) -> String {
    let mut out = String::with_capacity(template.len() + 16);
    let mut rest = template;
    while let Some(start) = rest.find('$') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let Some(end) = after.find('$') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let token = &after[..end];
        if token.is_empty() {
            out.push('$');
        } else {
            let (name, format) = match token.split_once('%') {
                Some((name, format)) => (name, Some(format)),
                None => (token, None),
            };
            let value = match name {
                "RepresentationID" => Some(representation_id.to_string()),
                "Number" => Some(format_number(number, format)),
                "Bandwidth" => Some(format_number(bandwidth, format)),
                "Time" => Some(format_number(time, format)),
                _ => None,
            };
            match value {
                Some(value) => out.push_str(&value),
                None => {
                    out.push('$');
                    out.push_str(token);
                    out.push('$');
                }
            }
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

fn format_number(value: u64, format: Option<&str>) -> String {
    let width = format
        .and_then(|f| f.strip_suffix('d'))
        .map(|f| f.trim_start_matches('0'))
        .and_then(|w| w.parse::<usize>().ok());
    match width {
        Some(width) => format!("{value:0width$}"),
        None => value.to_string(),
    }
}

// ============= Préchargeur =============

/// Préchargeur de segments DASH
#[derive(Debug)]
pub struct DashSegmentPrefetcher {
    prefetcher: Arc<SegmentPrefetcher>,
    manifests: Mutex<HashMap<String, Arc<MpdManifest>>>,
}

impl DashSegmentPrefetcher {
    pub fn new(prefetcher: Arc<SegmentPrefetcher>) -> Self {
        Self {
            prefetcher,
            manifests: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_dash(mime_type: Option<&str>) -> bool {
        mime_type.is_some_and(|m| m.eq_ignore_ascii_case(DASH_MIME_TYPE))
    }

    pub fn prefetcher(&self) -> &Arc<SegmentPrefetcher> {
        &self.prefetcher
    }

    /// Manifeste du flux, lu et mis en cache au premier appel
    pub async fn manifest(&self, manifest_uri: &str) -> Result<Arc<MpdManifest>> {
        if let Some(manifest) = self.manifests.lock().await.get(manifest_uri) {
            return Ok(manifest.clone());
        }

        let body = self.prefetcher.fetcher().fetch_all(manifest_uri).await?;
        let xml = String::from_utf8_lossy(&body);
        let manifest = Arc::new(MpdManifest::parse(&xml, manifest_uri)?);
        if !manifest.is_dynamic() {
            self.manifests
                .lock()
                .await
                .insert(manifest_uri.to_string(), manifest.clone());
        }
        Ok(manifest)
    }

    pub async fn forget_manifest(&self, manifest_uri: &str) {
        self.manifests.lock().await.remove(manifest_uri);
    }

    /// Précharge les segments qui suivent `position_ms`.
    ///
    /// Ne fait rien si le flux n'est pas DASH ou si le média n'est plus actif.
    /// Renvoie le nombre de téléchargements lancés.
    pub async fn on_progress(
        &self,
        media_id: &str,
        manifest_uri: &str,
        mime_type: Option<&str>,
        position_ms: u64,
    ) -> Result<usize> {
        if !Self::is_dash(mime_type) {
            return Ok(0);
        }
        let coordinator = self.prefetcher.coordinator();
        if coordinator.active_media_id().as_deref() != Some(media_id) {
            return Ok(0);
        }

        let manifest = self.manifest(manifest_uri).await?;
        let quality = coordinator.current_quality_key();
        let ahead = self.prefetcher.settings().max_concurrent;
        let segments =
            manifest.upcoming_segments(position_ms as f64 / 1000.0, quality.as_ref(), ahead)?;

        let scheduled = segments
            .iter()
            .filter(|segment| {
                self.prefetcher
                    .prefetch_resource(media_id, &segment.uri, segment.range)
            })
            .count();
        if scheduled > 0 {
            debug!(media_id = %media_id, scheduled, position_ms, "DASH segments prefetch scheduled");
        }
        Ok(scheduled)
    }
}
