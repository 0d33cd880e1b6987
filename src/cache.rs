//! Almacén clave/valor con TTL por espacio de nombres.
//!
//! `CacheStore` es el contrato mínimo (valores JSON) para poder cambiar el
//! backend en memoria por uno compartido. `Cache` es la fachada tipada que
//! usan las etapas: cualquier fallo interno se trata como un fallo de caché
//! y nunca se propaga.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Namespace {
    /// Clave: hash del contenido de la imagen.
    Extraction,
    /// Clave: nombre del plato normalizado.
    ImageSearch,
    /// Clave: nombre del plato normalizado.
    Description,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [Self::Extraction, Self::ImageSearch, Self::Description];
}

/// Backend de caché. `get`/`put` no fallan nunca hacia fuera.
pub trait CacheStore: Send + Sync {
    fn get(&self, namespace: Namespace, key: &str) -> Option<Value>;
    fn put(&self, namespace: Namespace, key: &str, value: Value, ttl: Duration);
    /// Número aproximado de entradas vivas por espacio de nombres.
    fn entry_counts(&self) -> HashMap<Namespace, u64> {
        HashMap::new()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// Caché en memoria del proceso respaldada por `moka`. El TTL de cada
/// espacio de nombres actúa como techo para el TTL de cada entrada.
pub struct MemoryCache {
    namespaces: HashMap<Namespace, moka::sync::Cache<String, CacheEntry>>,
}

impl MemoryCache {
    pub fn new(namespace_ttl: Duration) -> Self {
        let namespaces = Namespace::ALL
            .into_iter()
            .map(|ns| {
                let cache = moka::sync::Cache::builder()
                    .time_to_live(namespace_ttl)
                    .build();
                (ns, cache)
            })
            .collect();
        Self { namespaces }
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, namespace: Namespace, key: &str) -> Option<Value> {
        let cache = self.namespaces.get(&namespace)?;
        let entry = cache.get(key)?;
        if entry.expires_at <= Instant::now() {
            cache.invalidate(key);
            return None;
        }
        Some(entry.value)
    }

    fn put(&self, namespace: Namespace, key: &str, value: Value, ttl: Duration) {
        if let Some(cache) = self.namespaces.get(&namespace) {
            let entry = CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            };
            cache.insert(key.to_string(), entry);
        }
    }

    fn entry_counts(&self) -> HashMap<Namespace, u64> {
        self.namespaces
            .iter()
            .map(|(ns, cache)| {
                cache.run_pending_tasks();
                (*ns, cache.entry_count())
            })
            .collect()
    }
}

/// Backend que nunca guarda nada (caché desactivada).
#[derive(Debug, Default)]
pub struct NoopCache;

impl CacheStore for NoopCache {
    fn get(&self, _namespace: Namespace, _key: &str) -> Option<Value> {
        None
    }

    fn put(&self, _namespace: Namespace, _key: &str, _value: Value, _ttl: Duration) {}
}

/// Fachada tipada sobre un `CacheStore`, con el TTL por defecto de cada
/// espacio de nombres.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<T> {
        let value = self.store.get(namespace, key)?;
        match serde_json::from_value(value) {
            Ok(decoded) => {
                debug!(?namespace, key, "Acierto de caché");
                Some(decoded)
            }
            Err(e) => {
                warn!(?namespace, key, "Entrada de caché ilegible, se ignora: {e}");
                None
            }
        }
    }

    pub fn put<T: Serialize>(&self, namespace: Namespace, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.store.put(namespace, key, json, self.ttl),
            Err(e) => warn!(?namespace, key, "No se pudo serializar para caché: {e}"),
        }
    }

    pub fn entry_counts(&self) -> HashMap<Namespace, u64> {
        self.store.entry_counts()
    }
}

/// Normaliza un nombre de plato para usarlo como clave:
/// recorta, pasa a minúsculas y colapsa espacios.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
