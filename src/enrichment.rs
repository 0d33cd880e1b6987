//! Etapas de enriquecimiento por plato: fotos y descripción.
//!
//! Ninguna de las dos hace fallar el plato: ante cualquier problema
//! devuelven un sustituto (placeholder o ausencia de descripción) más un
//! error a nivel de plato.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    cache::{normalize_key, Cache, Namespace},
    capabilities::{DescriptionCapability, ImageSearchCapability},
    error::{ErrorKind, ProcessingError},
    models::{DishDescription, DishDescriptionPayload, FoodImage, ParsedDish},
    retry::{self, RetryPolicy},
};

/// Resolución mínima (ancho y alto, en píxeles) de una foto "buena".
pub const MIN_IMAGE_DIMENSION: u32 = 200;
/// Confianza asumida cuando el servicio no la informa.
const DEFAULT_DESCRIPTION_CONFIDENCE: f32 = 0.8;

/// Fotos de un plato: una principal y las secundarias por orden de calidad.
#[derive(Debug, Clone)]
pub struct ImageEnrichment {
    pub primary: FoodImage,
    pub secondary: Vec<FoodImage>,
    pub error: Option<ProcessingError>,
}

impl ImageEnrichment {
    fn placeholder(error: ProcessingError) -> Self {
        Self {
            primary: FoodImage::placeholder(),
            secondary: Vec::new(),
            error: Some(error),
        }
    }
}

pub struct ImageEnricher {
    search: Arc<dyn ImageSearchCapability>,
    cache: Cache,
    policy: RetryPolicy,
    max_images: usize,
}

impl ImageEnricher {
    pub fn new(
        search: Arc<dyn ImageSearchCapability>,
        cache: Cache,
        policy: RetryPolicy,
        max_images: usize,
    ) -> Self {
        Self {
            search,
            cache,
            policy,
            max_images: max_images.max(1),
        }
    }

    pub async fn enrich(&self, dish: &ParsedDish) -> ImageEnrichment {
        let key = normalize_key(&dish.name);

        let images = match self.cache.get::<Vec<FoodImage>>(Namespace::ImageSearch, &key) {
            Some(cached) => cached,
            None => {
                let label = format!("búsqueda de imágenes '{}'", dish.name);
                match retry::execute(&label, &self.policy, || self.search.search(&dish.name)).await {
                    Ok(found) => {
                        let ranked = rank_images(found);
                        self.cache.put(Namespace::ImageSearch, &key, &ranked);
                        ranked
                    }
                    Err(e) => {
                        warn!("Sin fotos para '{}': {}", dish.name, e);
                        return ImageEnrichment::placeholder(
                            e.with_kind(ErrorKind::ImageSearch)
                                .with_recoverable(true)
                                .for_dish(&dish.id),
                        );
                    }
                }
            }
        };

        let mut images = images.into_iter().take(self.max_images);
        match images.next() {
            Some(primary) => {
                debug!("'{}': foto principal {}", dish.name, primary.url);
                ImageEnrichment {
                    primary,
                    secondary: images.collect(),
                    error: None,
                }
            }
            None => {
                info!("La búsqueda no devolvió fotos para '{}'", dish.name);
                ImageEnrichment::placeholder(
                    ProcessingError::new(
                        ErrorKind::ImageSearch,
                        format!("No se encontraron fotos para '{}'", dish.name),
                    )
                    .for_dish(&dish.id),
                )
            }
        }
    }
}

/// Ordena por calidad: primero las que alcanzan la resolución mínima,
/// luego las que tienen miniatura, luego por área. Los empates conservan
/// el orden de la búsqueda.
pub fn rank_images(mut images: Vec<FoodImage>) -> Vec<FoodImage> {
    images.sort_by_key(|img| {
        let meets_resolution = img.width >= MIN_IMAGE_DIMENSION && img.height >= MIN_IMAGE_DIMENSION;
        let area = u64::from(img.width) * u64::from(img.height);
        std::cmp::Reverse((meets_resolution, img.has_thumbnail(), area.min(1_000_000)))
    });
    images
}

pub struct DescriptionEnricher {
    describer: Arc<dyn DescriptionCapability>,
    cache: Cache,
    policy: RetryPolicy,
}

impl DescriptionEnricher {
    pub fn new(describer: Arc<dyn DescriptionCapability>, cache: Cache, policy: RetryPolicy) -> Self {
        Self {
            describer,
            cache,
            policy,
        }
    }

    /// Descripción del plato o un error a nivel de plato. En caso de error
    /// la descripción queda ausente: nunca se rellena con texto de error.
    pub async fn enrich(&self, dish: &ParsedDish) -> Result<DishDescription, ProcessingError> {
        let key = normalize_key(&dish.name);
        if let Some(cached) = self.cache.get::<DishDescription>(Namespace::Description, &key) {
            return Ok(cached);
        }

        let context = description_context(dish);
        let label = format!("descripción '{}'", dish.name);
        let payload = retry::execute(&label, &self.policy, || {
            self.describer.describe(&dish.name, context.as_deref())
        })
        .await
        .map_err(|e| {
            warn!("Sin descripción para '{}': {}", dish.name, e);
            e.with_kind(ErrorKind::Description)
                .with_recoverable(true)
                .for_dish(&dish.id)
        })?;

        let description = into_description(payload).ok_or_else(|| {
            ProcessingError::new(
                ErrorKind::Description,
                format!("Respuesta sin texto de descripción para '{}'", dish.name),
            )
            .for_dish(&dish.id)
        })?;

        self.cache.put(Namespace::Description, &key, &description);
        Ok(description)
    }
}

/// Contexto extra para el prompt: nombre original (si difiere) y precio.
fn description_context(dish: &ParsedDish) -> Option<String> {
    let mut parts = Vec::new();
    let original = dish.original_name.trim();
    if !original.is_empty() && original != dish.name {
        parts.push(format!("Nombre original en la carta: {original}"));
    }
    if !dish.price_text.is_empty() {
        parts.push(format!("Precio: {}", dish.price_text));
    }
    (!parts.is_empty()).then(|| parts.join("\n"))
}

/// Convierte la respuesta del servicio tolerando campos ausentes. Sólo el
/// texto principal es obligatorio.
pub fn into_description(payload: DishDescriptionPayload) -> Option<DishDescription> {
    let text = payload.text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty())?;
    let non_empty = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("null"))
    };
    let clean_list = |values: Option<Vec<String>>| {
        values
            .unwrap_or_default()
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect::<Vec<_>>()
    };

    Some(DishDescription {
        text,
        ingredients: clean_list(payload.ingredients),
        dietary_tags: clean_list(payload.dietary_tags),
        cuisine_type: non_empty(payload.cuisine_type),
        cultural_context: non_empty(payload.cultural_context),
        spice_level: non_empty(payload.spice_level),
        preparation_method: non_empty(payload.preparation_method),
        confidence: payload
            .confidence
            .filter(|c| c.is_finite())
            .map(|c| c.clamp(0.0, 1.0))
            .unwrap_or(DEFAULT_DESCRIPTION_CONFIDENCE),
    })
}
