//! Contratos de los servicios externos de los que depende el pipeline.
//!
//! El pipeline sólo conoce estos traits; los adaptadores concretos viven en
//! `vision`, `image_search` y `llm`.

use async_trait::async_trait;

use crate::error::CapabilityError;
use crate::models::{DishCandidate, DishDescriptionPayload, FoodImage, RawImage};

/// Visión/OCR: de la foto de la carta a pares (nombre, precio) sin tipar.
#[async_trait]
pub trait VisionCapability: Send + Sync {
    async fn extract(&self, image: &RawImage) -> Result<Vec<DishCandidate>, CapabilityError>;
}

/// Búsqueda de fotos de un plato.
#[async_trait]
pub trait ImageSearchCapability: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<FoodImage>, CapabilityError>;
}

/// Generación de la descripción de un plato.
#[async_trait]
pub trait DescriptionCapability: Send + Sync {
    async fn describe(
        &self,
        dish_name: &str,
        context: Option<&str>,
    ) -> Result<DishDescriptionPayload, CapabilityError>;
}

/// Sustituto de un servicio sin credenciales: falla siempre de forma
/// permanente, así el pipeline degrada en vez de no arrancar.
#[derive(Debug, Clone)]
pub struct Unconfigured {
    service: &'static str,
}

impl Unconfigured {
    pub fn new(service: &'static str) -> Self {
        Self { service }
    }

    fn error(&self) -> CapabilityError {
        CapabilityError::Unconfigured(format!("faltan credenciales para {}", self.service))
    }
}

#[async_trait]
impl VisionCapability for Unconfigured {
    async fn extract(&self, _image: &RawImage) -> Result<Vec<DishCandidate>, CapabilityError> {
        Err(self.error())
    }
}

#[async_trait]
impl ImageSearchCapability for Unconfigured {
    async fn search(&self, _query: &str) -> Result<Vec<FoodImage>, CapabilityError> {
        Err(self.error())
    }
}

#[async_trait]
impl DescriptionCapability for Unconfigured {
    async fn describe(
        &self,
        _dish_name: &str,
        _context: Option<&str>,
    ) -> Result<DishDescriptionPayload, CapabilityError> {
        Err(self.error())
    }
}

/// Limpia la respuesta de un LLM para quedarnos sólo con el JSON.
pub(crate) fn strip_code_fences(response: &str) -> &str {
    response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_fences_are_removed() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[tokio::test]
    async fn unconfigured_fails_permanently() {
        let search = Unconfigured::new("búsqueda de imágenes");
        let err = search.search("paella").await.unwrap_err();
        assert!(!err.is_transient());
    }
}
