//! Modelos de dominio (imagen de entrada, platos, fotos y descripciones).

use serde::{Deserialize, Serialize};

use crate::error::ProcessingError;

/// URL que sustituye a una foto que no se pudo obtener.
pub const PLACEHOLDER_IMAGE_URL: &str =
    "https://via.placeholder.com/400x300/f0f0f0/666666?text=Food+Image";
pub const PLACEHOLDER_THUMBNAIL_URL: &str =
    "https://via.placeholder.com/150x150/f0f0f0/666666?text=Food";

/// Imagen subida por el usuario. Sólo vive durante la petición.
#[derive(Debug, Clone)]
pub struct RawImage {
    bytes: Vec<u8>,
    mime_type: String,
}

impl RawImage {
    pub fn new(bytes: impl Into<Vec<u8>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }
}

/// Par (nombre, precio) tal y como lo devuelve la capacidad de visión,
/// antes de tiparlo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishCandidate {
    pub name_text: String,
    #[serde(default)]
    pub price_text: String,
    /// Confianza de la extracción, si el servicio la informa.
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl DishCandidate {
    pub fn new(name_text: impl Into<String>, price_text: impl Into<String>) -> Self {
        Self {
            name_text: name_text.into(),
            price_text: price_text.into(),
            confidence: None,
        }
    }
}

/// Plato ya tipado por la etapa de parsing. Inmutable a partir de aquí.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDish {
    pub id: String,
    pub name: String,
    pub original_name: String,
    /// Subcadena literal del precio; nunca se reformatea.
    pub price_text: String,
    pub confidence: f32,
    pub source_position: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodImage {
    pub url: String,
    pub thumbnail_url: String,
    pub title: String,
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub load_status: LoadStatus,
}

impl FoodImage {
    /// Foto sustituta para cuando la búsqueda no da nada utilizable.
    /// La interfaz pinta un placeholder en su hueco en vez de omitirlo.
    pub fn placeholder() -> Self {
        Self {
            url: PLACEHOLDER_IMAGE_URL.to_string(),
            thumbnail_url: PLACEHOLDER_THUMBNAIL_URL.to_string(),
            title: "Food placeholder image".to_string(),
            source: "placeholder".to_string(),
            width: 400,
            height: 300,
            load_status: LoadStatus::Failed,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.load_status == LoadStatus::Failed
    }

    pub fn has_thumbnail(&self) -> bool {
        !self.thumbnail_url.trim().is_empty()
    }
}

/// Descripción generada de un plato. Un campo opcional ausente significa
/// "no identificable", nunca un error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DishDescription {
    pub text: String,
    pub ingredients: Vec<String>,
    pub dietary_tags: Vec<String>,
    pub cuisine_type: Option<String>,
    pub cultural_context: Option<String>,
    pub spice_level: Option<String>,
    pub preparation_method: Option<String>,
    pub confidence: f32,
}

/// Respuesta estructurada (y poco fiable) del servicio de descripciones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DishDescriptionPayload {
    pub text: Option<String>,
    pub ingredients: Option<Vec<String>>,
    #[serde(alias = "dietary_restrictions")]
    pub dietary_tags: Option<Vec<String>>,
    pub cuisine_type: Option<String>,
    pub cultural_context: Option<String>,
    pub spice_level: Option<String>,
    pub preparation_method: Option<String>,
    pub confidence: Option<f32>,
}

/// Resultado final por plato, construido una sola vez por el agregador.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedDish {
    pub dish: ParsedDish,
    pub primary_image: Option<FoodImage>,
    pub secondary_images: Vec<FoodImage>,
    pub description: Option<DishDescription>,
    pub errors: Vec<ProcessingError>,
}

impl EnrichedDish {
    pub fn id(&self) -> &str {
        &self.dish.id
    }

    pub fn has_placeholder_image(&self) -> bool {
        self.primary_image
            .as_ref()
            .map_or(true, FoodImage::is_placeholder)
    }

    /// `true` si ambas etapas de enriquecimiento terminaron sin error.
    pub fn is_fully_enriched(&self) -> bool {
        self.errors.is_empty() && self.description.is_some() && !self.has_placeholder_image()
    }
}
