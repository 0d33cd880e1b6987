//! Orquestación de una ejecución completa: extracción → parsing →
//! enriquecimiento por plato (acotado en concurrencia) → resultado final.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Instant;

use anyhow::Result;
use futures::{stream, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::{
    cache::Cache,
    capabilities::{DescriptionCapability, ImageSearchCapability, VisionCapability},
    enrichment::{DescriptionEnricher, ImageEnricher, ImageEnrichment},
    error::ProcessingError,
    extraction::ExtractionStage,
    models::{DishDescription, EnrichedDish, ParsedDish, RawImage},
    parsing::MenuParser,
    progress::{ProcessingState, ProcessingStep, ProgressTracker},
    retry::RetryPolicy,
};

const EXTRACTION_PROGRESS: u8 = 10;
const PARSING_PROGRESS: u8 = 30;
const ENRICHMENT_START: u8 = 50;
const ENRICHMENT_END: u8 = 90;

/// Servicios externos que consume el pipeline.
#[derive(Clone)]
pub struct Capabilities {
    pub vision: Arc<dyn VisionCapability>,
    pub image_search: Arc<dyn ImageSearchCapability>,
    pub description: Arc<dyn DescriptionCapability>,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_concurrent_enrichment: usize,
    pub max_images_per_dish: usize,
    pub max_dishes_per_menu: usize,
    pub max_upload_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_enrichment: 3,
            max_images_per_dish: 5,
            max_dishes_per_menu: 50,
            max_upload_bytes: 16 * 1024 * 1024,
            retry: RetryPolicy::default(),
        }
    }
}

/// Lo que recibe quien llama: los platos (quizá ninguno) y el estado final.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub dishes: Vec<EnrichedDish>,
    pub state: ProcessingState,
}

impl PipelineOutcome {
    /// Errores de pipeline seguidos de los de cada plato, en orden.
    pub fn all_errors(&self) -> Vec<&ProcessingError> {
        self.state
            .errors
            .iter()
            .chain(self.dishes.iter().flat_map(|d| d.errors.iter()))
            .collect()
    }
}

pub struct MenuPipeline {
    extraction: ExtractionStage,
    parser: MenuParser,
    images: ImageEnricher,
    descriptions: DescriptionEnricher,
    max_concurrent: usize,
}

impl MenuPipeline {
    pub fn new(capabilities: Capabilities, cache: Cache, settings: PipelineSettings) -> Result<Self> {
        info!(
            "Pipeline: {} platos en paralelo, espera máxima por llamada externa {:?}",
            settings.max_concurrent_enrichment,
            settings.retry.max_total_wait()
        );
        Ok(Self {
            extraction: ExtractionStage::new(
                capabilities.vision,
                cache.clone(),
                settings.retry.clone(),
                settings.max_upload_bytes,
            ),
            parser: MenuParser::new(settings.max_dishes_per_menu)?,
            images: ImageEnricher::new(
                capabilities.image_search,
                cache.clone(),
                settings.retry.clone(),
                settings.max_images_per_dish,
            ),
            descriptions: DescriptionEnricher::new(capabilities.description, cache, settings.retry),
            max_concurrent: settings.max_concurrent_enrichment.max(1),
        })
    }

    /// Procesa una foto de carta de principio a fin.
    pub async fn process(&self, image: &RawImage) -> PipelineOutcome {
        let tracker = ProgressTracker::new();
        let dishes = self.process_tracked(image, &tracker).await;
        PipelineOutcome {
            dishes,
            state: tracker.snapshot(),
        }
    }

    /// Igual que [`process`](Self::process) pero publicando el progreso en
    /// `tracker`, que otro hilo puede consultar mientras tanto.
    pub async fn process_tracked(&self, image: &RawImage, tracker: &ProgressTracker) -> Vec<EnrichedDish> {
        let started = Instant::now();
        info!("Nueva ejecución: imagen {} de {} bytes", image.mime_type(), image.bytes().len());

        tracker.advance(ProcessingStep::Extraction, EXTRACTION_PROGRESS);
        let candidates = match self.extraction.run(image).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Ejecución detenida en la extracción: {e}");
                tracker.push_error(e);
                tracker.finish();
                return Vec::new();
            }
        };

        tracker.advance(ProcessingStep::Parsing, PARSING_PROGRESS);
        let parsed = self.parser.parse(&candidates);
        debug!(
            "{} platos con precio de {}",
            parsed.stats.dishes_with_price, parsed.stats.total_dishes
        );
        if let Some(e) = parsed.error {
            warn!("{e}");
            tracker.push_error(e);
        }

        tracker.advance(ProcessingStep::Enrichment, ENRICHMENT_START);
        let dishes = self.enrich_all(parsed.dishes, tracker).await;

        tracker.advance(ProcessingStep::Complete, 100);
        tracker.finish();

        let degraded = dishes.iter().filter(|d| !d.is_fully_enriched()).count();
        for dish in dishes.iter().filter(|d| !d.errors.is_empty()) {
            debug!("Plato {} con {} errores", dish.id(), dish.errors.len());
        }
        info!(
            "Ejecución completada en {:.2?}: {} platos ({} con datos incompletos)",
            started.elapsed(),
            dishes.len(),
            degraded
        );
        dishes
    }

    /// Enriquece todos los platos con como mucho `max_concurrent` a la vez.
    /// El resultado respeta el orden del parsing, no el de finalización.
    async fn enrich_all(&self, dishes: Vec<ParsedDish>, tracker: &ProgressTracker) -> Vec<EnrichedDish> {
        let total = dishes.len();
        let completed = &AtomicUsize::new(0);

        stream::iter(dishes)
            .map(move |dish| async move {
                let (images, description) =
                    futures::join!(self.images.enrich(&dish), self.descriptions.enrich(&dish));

                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.advance(ProcessingStep::Enrichment, enrichment_progress(done, total));
                assemble(dish, images, description)
            })
            .buffered(self.max_concurrent)
            .collect()
            .await
    }
}

fn enrichment_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return ENRICHMENT_END;
    }
    let span = usize::from(ENRICHMENT_END - ENRICHMENT_START);
    ENRICHMENT_START + (span * done.min(total) / total) as u8
}

/// Une los resultados de ambas etapas en el registro final del plato.
fn assemble(
    dish: ParsedDish,
    images: ImageEnrichment,
    description: Result<DishDescription, ProcessingError>,
) -> EnrichedDish {
    let mut errors = Vec::new();
    if let Some(e) = images.error {
        errors.push(e);
    }
    let description = match description {
        Ok(description) => Some(description),
        Err(e) => {
            errors.push(e);
            None
        }
    };

    EnrichedDish {
        dish,
        primary_image: Some(images.primary),
        secondary_images: images.secondary,
        description,
        errors,
    }
}
