//! Clés du cache de flux
//!
//! Un flux est rangé sur disque en trois niveaux :
//!
//! ```text
//! <root>/<media_key>/<quality>/<resource>_<offset>_<length>.bin
//! ```
//!
//! - `media_key` : hash de l'identifiant du média (l'URI d'origine)
//! - `quality` : la [`QualityKey`] de la variante, ou `auto` tant qu'elle n'est pas connue
//! - `resource` : hash de l'URI réellement téléchargée (flux principal ou segment DASH)

use sha2::{Digest, Sha256};
use std::fmt;

/// Nom de la partition utilisée tant qu'aucune qualité n'a été déterminée.
pub const UNKNOWN_QUALITY: &str = "auto";

/// Identifiant dérivé d'une variante vidéo encodée (`v_{hauteur}_{débit}`).
///
/// Les valeurs inconnues sont rendues par `-1`, comme le fait le moteur de lecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QualityKey(String);

impl QualityKey {
    pub fn for_video(height: Option<u32>, bitrate: Option<u32>) -> Self {
        let h = height.map(i64::from).unwrap_or(-1);
        let b = bitrate.map(i64::from).unwrap_or(-1);
        QualityKey(format!("v_{h}_{b}"))
    }

    /// Reprend une clé quelconque en remplaçant les caractères interdits dans un nom de répertoire.
    pub fn new(raw: &str) -> Self {
        let sanitized: String = raw
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        QualityKey(sanitized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Hauteur et débit d'une clé de la forme `v_{h}_{b}`.
    pub fn video_dimensions(&self) -> Option<(Option<u32>, Option<u32>)> {
        let mut parts = self.0.strip_prefix("v_")?.splitn(2, '_');
        let h: i64 = parts.next()?.parse().ok()?;
        let b: i64 = parts.next()?.parse().ok()?;
        Some((u32::try_from(h).ok(), u32::try_from(b).ok()))
    }
}

impl fmt::Display for QualityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Nom de répertoire d'une partition de qualité.
pub fn partition_name(quality: Option<&QualityKey>) -> &str {
    quality.map(QualityKey::as_str).unwrap_or(UNKNOWN_QUALITY)
}

/// Génère une clé stable à partir d'un identifiant (SHA256, 16 premiers octets en hex).
pub fn hashed_key(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..16])
}

/// Plage d'octets demandée à l'amont. `length == None` signifie « jusqu'à la fin ».
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: Option<u64>,
}

impl ByteRange {
    pub fn new(offset: u64, length: u64) -> Self {
        Self {
            offset,
            length: Some(length),
        }
    }

    pub fn to_end(offset: u64) -> Self {
        Self {
            offset,
            length: None,
        }
    }

    /// Ressource entière.
    pub fn whole() -> Self {
        Self::to_end(0)
    }

    /// Fin exclusive, si la plage est bornée.
    pub fn end(&self) -> Option<u64> {
        self.length.map(|len| self.offset + len)
    }

    /// Valeur de l'en-tête HTTP `Range`, `None` pour la ressource entière.
    pub fn header_value(&self) -> Option<String> {
        match (self.offset, self.length) {
            (0, None) => None,
            (offset, None) => Some(format!("bytes={offset}-")),
            (offset, Some(len)) => Some(format!("bytes={}-{}", offset, offset + len.max(1) - 1)),
        }
    }

    /// Découpe la plage en morceaux alignés sur `chunk_size` qui la couvrent.
    ///
    /// Une plage ouverte ne donne que le morceau contenant son début.
    pub fn aligned_chunks(&self, chunk_size: u64) -> Vec<ByteRange> {
        let chunk_size = chunk_size.max(1);
        let first = self.offset / chunk_size;
        let last = match self.length {
            Some(0) => return Vec::new(),
            Some(len) => (self.offset + len - 1) / chunk_size,
            None => first,
        };
        (first..=last)
            .map(|index| ByteRange::new(index * chunk_size, chunk_size))
            .collect()
    }
}

/// Identifie un fragment stocké dans une partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanKey {
    pub media_key: String,
    pub quality: String,
    pub resource: String,
    pub range: ByteRange,
}

impl SpanKey {
    pub fn new(media_id: &str, quality: Option<&QualityKey>, uri: &str, range: ByteRange) -> Self {
        Self {
            media_key: hashed_key(media_id),
            quality: partition_name(quality).to_string(),
            resource: hashed_key(uri),
            range,
        }
    }

    /// Longueur inscrite dans le nom du fichier (`end` pour une plage ouverte).
    pub fn length_label(&self) -> String {
        match self.range.length {
            Some(len) => len.to_string(),
            None => "end".to_string(),
        }
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{}.bin",
            self.resource,
            self.range.offset,
            self.length_label()
        )
    }
}
