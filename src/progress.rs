//! Estado de una ejecución del pipeline y su seguimiento compartido.
//!
//! El estado sólo avanza: el paso sigue el orden
//! `upload → extraction → parsing → enrichment → complete` y el progreso
//! nunca disminuye.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::ProcessingError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    Upload,
    Extraction,
    Parsing,
    Enrichment,
    Complete,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingState {
    pub step: ProcessingStep,
    /// Valor entre 0 y 100.
    pub progress: u8,
    /// Errores a nivel de pipeline. Los de cada plato viajan en su `EnrichedDish`.
    pub errors: Vec<ProcessingError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingState {
    pub fn new() -> Self {
        Self {
            step: ProcessingStep::Upload,
            progress: 0,
            errors: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished_at.is_some()
    }
}

impl Default for ProcessingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Manejador compartido del estado de una ejecución. Los clones apuntan al
/// mismo estado, de modo que la capa HTTP puede consultar mientras el
/// pipeline avanza.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    state: Arc<Mutex<ProcessingState>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copia de sólo lectura del estado actual.
    pub fn snapshot(&self) -> ProcessingState {
        self.lock().clone()
    }

    /// Avanza a `step` con `progress`. Un paso anterior al actual, un
    /// progreso menor o una ejecución ya terminada se ignoran.
    pub(crate) fn advance(&self, step: ProcessingStep, progress: u8) {
        let mut state = self.lock();
        if step < state.step || state.is_finished() {
            return;
        }
        state.step = step;
        state.progress = state.progress.max(progress.min(100));
    }

    pub(crate) fn push_error(&self, error: ProcessingError) {
        let mut state = self.lock();
        if !state.is_finished() {
            state.errors.push(error);
        }
    }

    /// Marca el final de la ejecución, haya llegado o no a `complete`.
    pub(crate) fn finish(&self) {
        let mut state = self.lock();
        if state.finished_at.is_none() {
            state.finished_at = Some(Utc::now());
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProcessingState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn steps_are_ordered() {
        assert!(ProcessingStep::Upload < ProcessingStep::Extraction);
        assert!(ProcessingStep::Extraction < ProcessingStep::Parsing);
        assert!(ProcessingStep::Parsing < ProcessingStep::Enrichment);
        assert!(ProcessingStep::Enrichment < ProcessingStep::Complete);
    }

    #[test]
    fn tracker_never_rolls_back() {
        let tracker = ProgressTracker::new();
        tracker.advance(ProcessingStep::Parsing, 30);
        tracker.advance(ProcessingStep::Extraction, 10);
        tracker.advance(ProcessingStep::Parsing, 20);

        let state = tracker.snapshot();
        assert_eq!(state.step, ProcessingStep::Parsing);
        assert_eq!(state.progress, 30);

        tracker.advance(ProcessingStep::Complete, 250);
        assert_eq!(tracker.snapshot().progress, 100);
    }

    #[test]
    fn clones_share_state() {
        let tracker = ProgressTracker::new();
        let observer = tracker.clone();
        tracker.push_error(ProcessingError::new(ErrorKind::Parsing, "vacío"));
        tracker.finish();

        let state = observer.snapshot();
        assert_eq!(state.errors.len(), 1);
        assert!(state.is_finished());
    }

    #[test]
    fn finished_state_is_frozen() {
        let tracker = ProgressTracker::new();
        tracker.advance(ProcessingStep::Enrichment, 40);
        tracker.finish();

        tracker.advance(ProcessingStep::Complete, 100);
        tracker.push_error(ProcessingError::new(ErrorKind::Description, "tarde"));

        let state = tracker.snapshot();
        assert_eq!(state.step, ProcessingStep::Enrichment);
        assert_eq!(state.progress, 40);
        assert!(state.errors.is_empty());
    }
}
