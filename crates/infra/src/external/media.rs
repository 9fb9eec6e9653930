//! Video inspection and download links for ar-generate.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header};
use serde::{Deserialize, Serialize};

use kitchenline_pipeline::ar_generate::{MediaInfo, MediaProbe, UploadLinker};
use kitchenline_pipeline::{ArtifactError, ArtifactStore, ServiceError};

/// Iterate the ISO-BMFF boxes in `data` as `(type, body)`.
fn boxes(mut data: &[u8]) -> impl Iterator<Item = ([u8; 4], &[u8])> {
    std::iter::from_fn(move || {
        if data.len() < 8 {
            return None;
        }
        let size32 = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as u64;
        let kind = [data[4], data[5], data[6], data[7]];
        let (header, size) = match size32 {
            0 => (8u64, data.len() as u64),
            1 => {
                if data.len() < 16 {
                    return None;
                }
                let mut large = [0u8; 8];
                large.copy_from_slice(&data[8..16]);
                (16u64, u64::from_be_bytes(large))
            }
            n => (8u64, n),
        };
        if size < header || size > data.len() as u64 {
            return None;
        }
        let body = &data[header as usize..size as usize];
        data = &data[size as usize..];
        Some((kind, body))
    })
}

fn be_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let b = bytes.get(at..at + 4)?;
    Some(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
}

fn be_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let b = bytes.get(at..at + 8)?;
    let mut buf = [0u8; 8];
    buf.copy_from_slice(b);
    Some(u64::from_be_bytes(buf))
}

/// `(timescale, duration)` from an `mvhd` body.
fn movie_header(mvhd: &[u8]) -> Option<(u32, u64)> {
    match mvhd.first()? {
        0 => Some((be_u32(mvhd, 12)?, u64::from(be_u32(mvhd, 16)?))),
        1 => Some((be_u32(mvhd, 20)?, be_u64(mvhd, 24)?)),
        _ => None,
    }
}

/// Read container format and duration from an MP4/QuickTime file.
///
/// The format is `mov` for the QuickTime brand and `mp4` for any other ISO
/// brand.
pub fn probe_iso_media(data: &[u8]) -> Result<MediaInfo, ServiceError> {
    let not_media = || ServiceError::invalid_response("not an MP4/QuickTime file");

    let mut brand: Option<[u8; 4]> = None;
    let mut header: Option<(u32, u64)> = None;
    for (kind, body) in boxes(data) {
        match &kind {
            b"ftyp" => brand = body.get(0..4).map(|b| [b[0], b[1], b[2], b[3]]),
            b"moov" => {
                header = boxes(body)
                    .find(|(k, _)| k == b"mvhd")
                    .and_then(|(_, mvhd)| movie_header(mvhd));
            }
            _ => {}
        }
    }

    let brand = brand.ok_or_else(not_media)?;
    let (timescale, duration) = header.ok_or_else(|| ServiceError::invalid_response("no movie header"))?;
    if timescale == 0 {
        return Err(ServiceError::invalid_response("movie header has zero timescale"));
    }
    let format = if &brand == b"qt  " { "mov" } else { "mp4" };
    Ok(MediaInfo {
        format: format.to_string(),
        duration_secs: duration as f64 / f64::from(timescale),
    })
}

/// Probes uploaded videos by reading them from the artifact store.
pub struct ArtifactMediaProbe {
    artifacts: Arc<dyn ArtifactStore>,
}

impl ArtifactMediaProbe {
    pub fn new(artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self { artifacts }
    }
}

impl MediaProbe for ArtifactMediaProbe {
    fn probe(&self, video_ref: &str) -> Result<MediaInfo, ServiceError> {
        let video = self.artifacts.get(video_ref).map_err(|e| match e {
            ArtifactError::NotFound(key) => ServiceError::not_found(format!("video {key} not found")),
            ArtifactError::InvalidKey(key) => ServiceError::rejected(format!("invalid video key {key}")),
            ArtifactError::Storage(msg) => ServiceError::unavailable(msg),
        })?;
        probe_iso_media(&video.bytes)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LinkClaims {
    key: String,
    exp: i64,
}

/// Builds `{base_url}/{key}?token=<jwt>` links; the HS256 token names the key
/// and expires after the requested TTL.
pub struct SignedUrlLinker {
    base_url: String,
    key: EncodingKey,
}

impl SignedUrlLinker {
    pub fn new(base_url: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key: EncodingKey::from_secret(secret.as_ref()),
        }
    }
}

impl UploadLinker for SignedUrlLinker {
    fn download_url(&self, video_ref: &str, ttl: Duration) -> Result<String, ServiceError> {
        let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX / 2);
        let claims = LinkClaims {
            key: video_ref.to_string(),
            exp: Utc::now().timestamp().saturating_add(ttl),
        };
        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.key)
            .map_err(|e| ServiceError::rejected(format!("cannot sign download link: {e}")))?;
        Ok(format!("{}/{}?token={}", self.base_url, video_ref, token))
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    /// Smallest MP4-shaped file: `ftyp` plus `moov/mvhd` (version 0).
    pub fn iso_media(brand: &[u8; 4], timescale: u32, duration: u32) -> Vec<u8> {
        let mut mvhd = vec![0u8; 4 + 4 + 4];
        mvhd.extend_from_slice(&timescale.to_be_bytes());
        mvhd.extend_from_slice(&duration.to_be_bytes());
        mvhd.extend_from_slice(&[0u8; 80]);

        let boxed = |kind: &[u8; 4], body: &[u8]| {
            let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
            out.extend_from_slice(kind);
            out.extend_from_slice(body);
            out
        };

        let mut ftyp_body = brand.to_vec();
        ftyp_body.extend_from_slice(&[0, 0, 2, 0]);
        ftyp_body.extend_from_slice(b"isommp42");

        let mut file = boxed(b"ftyp", &ftyp_body);
        file.extend(boxed(b"free", &[]));
        file.extend(boxed(b"moov", &boxed(b"mvhd", &mvhd)));
        file
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::iso_media;
    use super::*;
    use crate::artifacts::InMemoryArtifactStore;
    use jsonwebtoken::{Algorithm, DecodingKey, Validation};

    #[test]
    fn reads_format_and_duration() {
        let info = probe_iso_media(&iso_media(b"isom", 600, 7_200)).unwrap();
        assert_eq!(info.format, "mp4");
        assert_eq!(info.duration_secs, 12.0);

        let info = probe_iso_media(&iso_media(b"qt  ", 1_000, 4_500)).unwrap();
        assert_eq!(info.format, "mov");
        assert_eq!(info.duration_secs, 4.5);
    }

    #[test]
    fn rejects_non_media() {
        assert!(probe_iso_media(b"GIF89a....").is_err());
        assert!(probe_iso_media(&iso_media(b"isom", 0, 10)).is_err());
    }

    #[test]
    fn probe_reads_from_artifacts() {
        let store = Arc::new(InMemoryArtifactStore::new());
        store
            .put("uploads/burger.mp4", &iso_media(b"mp42", 30, 300), "video/mp4")
            .unwrap();
        let probe = ArtifactMediaProbe::new(store);

        assert_eq!(probe.probe("uploads/burger.mp4").unwrap().duration_secs, 10.0);
        assert!(probe.probe("uploads/missing.mp4").is_err());
    }

    #[test]
    fn signed_link_carries_key_and_expiry() {
        let linker = SignedUrlLinker::new("https://media.example/", "s3cret");
        let url = linker
            .download_url("uploads/burger.mp4", Duration::from_secs(600))
            .unwrap();
        let (prefix, token) = url.split_once("?token=").unwrap();
        assert_eq!(prefix, "https://media.example/uploads/burger.mp4");

        let data = jsonwebtoken::decode::<LinkClaims>(
            token,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::new(Algorithm::HS256),
        )
        .unwrap();
        assert_eq!(data.claims.key, "uploads/burger.mp4");
        assert!(data.claims.exp > Utc::now().timestamp());
    }
}
