//! Etapa de extracción: valida la imagen y obtiene los candidatos a plato
//! a través de la capacidad de visión (con caché y reintentos).

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    cache::{Cache, Namespace},
    capabilities::VisionCapability,
    error::{ErrorKind, ProcessingError},
    models::{DishCandidate, RawImage},
    retry::{self, RetryPolicy},
};

/// Formatos de imagen admitidos.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
    Webp,
}

impl ImageFormat {
    /// Interpreta un tipo MIME sin distinguir mayúsculas e ignorando
    /// parámetros (`image/jpeg; charset=...`).
    pub fn from_mime(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        match essence.to_ascii_lowercase().as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::Webp),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Webp => "image/webp",
        }
    }

    /// `true` si los primeros bytes corresponden a la firma del formato.
    pub fn matches_signature(&self, bytes: &[u8]) -> bool {
        match self {
            Self::Jpeg => bytes.starts_with(&[0xFF, 0xD8, 0xFF]),
            Self::Png => bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]),
            Self::Webp => bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP",
        }
    }
}

/// Comprueba formato, tamaño y firma antes de tocar caché o red.
pub fn validate(image: &RawImage, max_bytes: usize) -> Result<ImageFormat, ProcessingError> {
    let format = ImageFormat::from_mime(image.mime_type()).ok_or_else(|| {
        ProcessingError::validation(format!(
            "Formato de imagen no soportado ('{}'). Sube una foto JPEG, PNG o WEBP.",
            image.mime_type()
        ))
    })?;

    if image.bytes().is_empty() {
        return Err(ProcessingError::validation("La imagen está vacía."));
    }
    if image.bytes().len() > max_bytes {
        return Err(ProcessingError::validation(format!(
            "La imagen ocupa {} bytes; el máximo permitido es {} bytes.",
            image.bytes().len(),
            max_bytes
        )));
    }
    if !format.matches_signature(image.bytes()) {
        return Err(ProcessingError::validation(format!(
            "El contenido no es una imagen {} válida.",
            format.mime_type()
        )));
    }
    Ok(format)
}

/// Hash SHA-256 (hex) del contenido, usado como clave de caché.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct ExtractionStage {
    vision: Arc<dyn VisionCapability>,
    cache: Cache,
    policy: RetryPolicy,
    max_upload_bytes: usize,
}

impl ExtractionStage {
    pub fn new(
        vision: Arc<dyn VisionCapability>,
        cache: Cache,
        policy: RetryPolicy,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            vision,
            cache,
            policy,
            max_upload_bytes,
        }
    }

    /// Devuelve los candidatos (posiblemente ninguno) o un error de
    /// validación/extracción. Una lista vacía no es un error de esta etapa.
    pub async fn run(&self, image: &RawImage) -> Result<Vec<DishCandidate>, ProcessingError> {
        let format = validate(image, self.max_upload_bytes)?;
        let key = content_hash(image.bytes());

        if let Some(cached) = self.cache.get::<Vec<DishCandidate>>(Namespace::Extraction, &key) {
            info!("Extracción en caché para la imagen {}...", &key[..12]);
            return Ok(cached);
        }

        info!(
            "Extrayendo platos de una imagen {} de {} bytes",
            format.mime_type(),
            image.bytes().len()
        );
        let candidates = retry::execute("visión", &self.policy, || self.vision.extract(image))
            .await
            .map_err(|e| {
                warn!("La extracción ha fallado: {e}");
                e.with_kind(ErrorKind::Extraction)
            })?;

        info!("Extracción completada: {} candidatos", candidates.len());
        self.cache.put(Namespace::Extraction, &key, &candidates);
        Ok(candidates)
    }
}
