use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;
use tracing::info;

use crate::{
    cache::Cache,
    config::AppConfig,
    error::{ErrorKind, ProcessingError},
    models::EnrichedDish,
    pipeline::MenuPipeline,
    progress::ProgressTracker,
};

/// Ejecuciones terminadas que se conservan para poder consultarlas.
const MAX_FINISHED_RUNS: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub pipeline: Arc<MenuPipeline>,
    pub cache: Cache,
    pub services: ServiceStatus,
    pub runs: Arc<Mutex<HashMap<String, MenuRun>>>,
    pub shutdown_sender: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

/// Qué servicios externos tienen credenciales.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ServiceStatus {
    pub vision: bool,
    pub image_search: bool,
    pub description: bool,
}

/// Una carta subida: su progreso y, al terminar, los platos.
#[derive(Debug, Clone)]
pub struct MenuRun {
    pub filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tracker: ProgressTracker,
    pub dishes: Option<Vec<EnrichedDish>>,
    /// Cancelada por el cliente; sus resultados se descartan al llegar.
    pub cancelled: bool,
}

impl MenuRun {
    pub fn new(filename: Option<String>, tracker: ProgressTracker) -> Self {
        Self {
            filename,
            created_at: Utc::now(),
            tracker,
            dishes: None,
            cancelled: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.dishes.is_some() || self.cancelled
    }
}

impl AppState {
    pub fn runs(&self) -> MutexGuard<'_, HashMap<String, MenuRun>> {
        self.runs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_run(&self, run_id: String, run: MenuRun) {
        let mut runs = self.runs();
        prune_finished(&mut runs);
        runs.insert(run_id, run);
    }

    pub fn complete_run(&self, run_id: &str, dishes: Vec<EnrichedDish>) {
        match self.runs().get_mut(run_id) {
            Some(run) if run.cancelled => info!("Resultados descartados de la ejecución cancelada {run_id}"),
            Some(run) => run.dishes = Some(dishes),
            None => {}
        }
    }

    /// Cancela una ejecución en curso. Las llamadas externas ya lanzadas
    /// terminan, pero su resultado no se publica. Devuelve `false` si la
    /// ejecución no existe o ya había terminado.
    pub fn cancel_run(&self, run_id: &str) -> bool {
        let mut runs = self.runs();
        let Some(run) = runs.get_mut(run_id).filter(|run| !run.is_finished()) else {
            return false;
        };
        run.cancelled = true;
        run.tracker.push_error(
            ProcessingError::new(ErrorKind::Network, "El procesamiento ha sido cancelado por el usuario.")
                .with_recoverable(false),
        );
        run.tracker.finish();
        info!("Ejecución {run_id} cancelada");
        true
    }
}

/// Olvida las ejecuciones terminadas más antiguas si hay demasiadas.
fn prune_finished(runs: &mut HashMap<String, MenuRun>) {
    let mut finished: Vec<(DateTime<Utc>, String)> = runs
        .iter()
        .filter(|(_, run)| run.is_finished())
        .map(|(id, run)| (run.created_at, id.clone()))
        .collect();
    if finished.len() < MAX_FINISHED_RUNS {
        return;
    }
    finished.sort();
    let excess = finished.len() + 1 - MAX_FINISHED_RUNS;
    for (_, id) in finished.into_iter().take(excess) {
        runs.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::NoopCache;
    use crate::models::{DishCandidate, FoodImage};
    use crate::pipeline::Capabilities;
    use crate::testing::{description_payload, Scripted};
    use chrono::Duration;

    fn state() -> AppState {
        let config = AppConfig::from_lookup(|_| None).unwrap();
        let cache = Cache::new(Arc::new(NoopCache), std::time::Duration::from_secs(60));
        let capabilities = Capabilities {
            vision: Arc::new(Scripted::ok(vec![DishCandidate::new("Paella", "€14")])),
            image_search: Arc::new(Scripted::<Vec<FoodImage>>::ok(Vec::new())),
            description: Arc::new(Scripted::ok(description_payload("Arroz."))),
        };
        let pipeline = MenuPipeline::new(capabilities, cache.clone(), config.pipeline_settings()).unwrap();
        AppState {
            config,
            pipeline: Arc::new(pipeline),
            cache,
            services: ServiceStatus::default(),
            runs: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(None)),
        }
    }

    #[test]
    fn oldest_finished_runs_are_dropped_first() {
        let mut runs = HashMap::new();
        let base = Utc::now();
        for i in 0..MAX_FINISHED_RUNS {
            let mut run = MenuRun::new(None, ProgressTracker::new());
            run.created_at = base + Duration::seconds(i as i64);
            run.dishes = Some(Vec::new());
            runs.insert(format!("run-{i}"), run);
        }
        runs.insert("activa".to_string(), MenuRun::new(None, ProgressTracker::new()));

        prune_finished(&mut runs);
        assert_eq!(runs.len(), MAX_FINISHED_RUNS);
        assert!(!runs.contains_key("run-0"));
        assert!(runs.contains_key("activa"));
    }

    #[test]
    fn cancelled_run_ignores_late_results() {
        let state = state();
        let tracker = ProgressTracker::new();
        state.insert_run("r1".to_string(), MenuRun::new(None, tracker.clone()));

        assert!(state.cancel_run("r1"));
        assert!(!state.cancel_run("r1"));
        state.complete_run("r1", Vec::new());

        let runs = state.runs();
        let run = &runs["r1"];
        assert!(run.cancelled);
        assert!(run.is_finished());
        assert!(run.dishes.is_none());

        let snapshot = tracker.snapshot();
        assert!(snapshot.is_finished());
        assert_eq!(snapshot.errors.len(), 1);
        assert_eq!(snapshot.errors[0].kind, ErrorKind::Network);
        assert!(!snapshot.errors[0].recoverable);
    }

    #[test]
    fn unknown_or_finished_runs_cannot_be_cancelled() {
        let state = state();
        assert!(!state.cancel_run("nada"));

        state.insert_run("r1".to_string(), MenuRun::new(None, ProgressTracker::new()));
        state.complete_run("r1", Vec::new());
        assert!(!state.cancel_run("r1"));
        assert!(!state.runs()["r1"].cancelled);
    }
}
