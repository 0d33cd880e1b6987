// Módulos de la aplicación
mod api;
mod app_state;
mod cache;
mod capabilities;
mod config;
mod enrichment;
mod error;
mod extraction;
mod image_search;
mod llm;
mod models;
mod parsing;
mod pipeline;
mod progress;
mod retry;
mod vision;

#[cfg(test)]
mod testing;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use axum::Router;
use tokio::sync::oneshot;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    app_state::{AppState, ServiceStatus},
    cache::{Cache, CacheStore, MemoryCache, NoopCache},
    capabilities::{DescriptionCapability, ImageSearchCapability, Unconfigured, VisionCapability},
    config::AppConfig,
    pipeline::{Capabilities, MenuPipeline},
};

#[tokio::main]
async fn main() {
    // 1. Cargar .env e inicializar logging
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // 2. Cargar configuración
    let cfg = AppConfig::from_env().expect("Error al cargar la configuración");

    // 3. Construir los servicios externos y el pipeline
    let (capabilities, services) = build_capabilities(&cfg).expect("Error inicializando los servicios externos");
    let store: Arc<dyn CacheStore> = if cfg.cache_enabled {
        Arc::new(MemoryCache::new(cfg.cache_ttl))
    } else {
        info!("Caché desactivada");
        Arc::new(NoopCache)
    };
    let cache = Cache::new(store, cfg.cache_ttl);
    let pipeline = MenuPipeline::new(capabilities, cache.clone(), cfg.pipeline_settings())
        .expect("Error construyendo el pipeline");

    // Crear canal para la señal de apagado.
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    // 4. Crear estado compartido de la aplicación
    let app_state = AppState {
        config: cfg.clone(),
        pipeline: Arc::new(pipeline),
        cache,
        services,
        runs: Arc::new(Mutex::new(HashMap::new())),
        shutdown_sender: Arc::new(Mutex::new(Some(shutdown_tx))),
    };

    // 5. Configurar el router de la API
    let app = Router::new().merge(api::create_router(app_state.clone())).layer(
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    );

    // 6. Iniciar el servidor
    let server_addr = &app_state.config.server_addr;
    let listener = tokio::net::TcpListener::bind(server_addr)
        .await
        .expect("No se pudo abrir el puerto del servidor");
    info!("🚀 Servidor escuchando en http://{}", server_addr);

    // Configurar el apagado ordenado.
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            info!("Señal de apagado recibida, iniciando cierre del servidor.");
        })
        .await
        .expect("Error en el servidor HTTP");

    info!("✅ Servidor cerrado correctamente.");
}

/// Adaptadores reales para los servicios con credenciales; el resto se
/// sustituye por `Unconfigured` y el pipeline degrada.
fn build_capabilities(cfg: &AppConfig) -> Result<(Capabilities, ServiceStatus)> {
    let mut services = ServiceStatus::default();

    let vision: Arc<dyn VisionCapability> = match &cfg.vision_api_key {
        Some(key) => {
            services.vision = true;
            Arc::new(vision::VisionClient::new(
                &cfg.vision_api_url,
                key,
                &cfg.vision_model,
                cfg.request_timeout,
            )?)
        }
        None => {
            warn!("Sin VISION_API_KEY ni OPENAI_API_KEY: no se podrán leer cartas");
            Arc::new(Unconfigured::new("visión"))
        }
    };

    let image_search: Arc<dyn ImageSearchCapability> =
        match (&cfg.google_search_api_key, &cfg.google_search_engine_id) {
            (Some(key), Some(engine_id)) => {
                services.image_search = true;
                Arc::new(image_search::GoogleImageSearch::new(
                    key,
                    engine_id,
                    cfg.max_images_per_dish * 2,
                    cfg.request_timeout,
                )?)
            }
            _ => {
                warn!("Sin credenciales de Google Custom Search: se usarán imágenes de relleno");
                Arc::new(Unconfigured::new("búsqueda de imágenes"))
            }
        };

    let description: Arc<dyn DescriptionCapability> = if cfg.description_available() {
        services.description = true;
        Arc::new(llm::LlmManager::from_config(cfg))
    } else {
        warn!(
            "Sin OPENAI_API_KEY o con LLM_PROVIDER={:?}: los platos no tendrán descripción",
            cfg.llm_provider
        );
        Arc::new(Unconfigured::new("descripciones"))
    };

    info!(
        "Servicios configurados: visión={}, imágenes={}, descripciones={}",
        services.vision, services.image_search, services.description
    );
    Ok((
        Capabilities {
            vision,
            image_search,
            description,
        },
        services,
    ))
}
