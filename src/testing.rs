//! Dobles de prueba de los servicios externos: respuestas programadas,
//! contador de llamadas, retardo simulado y concurrencia máxima observada.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::{CacheStore, MemoryCache, Namespace};
use crate::capabilities::{DescriptionCapability, ImageSearchCapability, VisionCapability};
use crate::error::CapabilityError;
use crate::models::{DishCandidate, DishDescriptionPayload, FoodImage, LoadStatus, RawImage};

type Responder<T> = Box<dyn Fn(&str) -> Result<T, CapabilityError> + Send + Sync>;
type DelayFn = Box<dyn Fn(&str) -> Duration + Send + Sync>;

pub struct Scripted<T> {
    responder: Responder<T>,
    script: Mutex<VecDeque<Result<T, CapabilityError>>>,
    delay: DelayFn,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    queries: Mutex<Vec<String>>,
}

impl<T: Clone + Send + Sync + 'static> Scripted<T> {
    pub fn new(responder: impl Fn(&str) -> Result<T, CapabilityError> + Send + Sync + 'static) -> Self {
        Self {
            responder: Box::new(responder),
            script: Mutex::new(VecDeque::new()),
            delay: Box::new(|_| Duration::ZERO),
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn ok(value: T) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }

    pub fn failing(err: CapabilityError) -> Self {
        Self::new(move |_| Err(err.clone()))
    }

    /// Respuestas que se devuelven, en orden, antes de recurrir al responder.
    pub fn first(self, results: Vec<Result<T, CapabilityError>>) -> Self {
        self.script
            .lock()
            .unwrap()
            .extend(results);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Box::new(move |_| delay);
        self
    }

    pub fn with_delay_fn(mut self, delay: impl Fn(&str) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    async fn respond(&self, query: &str) -> Result<T, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = (self.delay)(query);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| (self.responder)(query))
    }
}

#[async_trait]
impl VisionCapability for Scripted<Vec<DishCandidate>> {
    async fn extract(&self, image: &RawImage) -> Result<Vec<DishCandidate>, CapabilityError> {
        self.respond(image.mime_type()).await
    }
}

#[async_trait]
impl ImageSearchCapability for Scripted<Vec<FoodImage>> {
    async fn search(&self, query: &str) -> Result<Vec<FoodImage>, CapabilityError> {
        self.respond(query).await
    }
}

#[async_trait]
impl DescriptionCapability for Scripted<DishDescriptionPayload> {
    async fn describe(
        &self,
        dish_name: &str,
        _context: Option<&str>,
    ) -> Result<DishDescriptionPayload, CapabilityError> {
        self.respond(dish_name).await
    }
}

/// Caché en memoria que cuenta los accesos.
#[derive(Default)]
pub struct CountingCache {
    inner: Option<MemoryCache>,
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
}

impl CountingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Some(MemoryCache::new(Duration::from_secs(3600))),
            ..Default::default()
        })
    }

    pub fn accesses(&self) -> usize {
        self.gets.load(Ordering::SeqCst) + self.puts.load(Ordering::SeqCst)
    }
}

impl CacheStore for CountingCache {
    fn get(&self, namespace: Namespace, key: &str) -> Option<Value> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.as_ref()?.get(namespace, key)
    }

    fn put(&self, namespace: Namespace, key: &str, value: Value, ttl: Duration) {
        self.puts.fetch_add(1, Ordering::SeqCst);
        if let Some(inner) = &self.inner {
            inner.put(namespace, key, value, ttl);
        }
    }

    fn entry_counts(&self) -> HashMap<Namespace, u64> {
        self.inner.as_ref().map(|c| c.entry_counts()).unwrap_or_default()
    }
}

pub fn food_image(url: &str, width: u32, height: u32) -> FoodImage {
    FoodImage {
        url: url.to_string(),
        thumbnail_url: format!("{url}?thumb"),
        title: String::new(),
        source: "example.com".to_string(),
        width,
        height,
        load_status: LoadStatus::Pending,
    }
}

pub fn description_payload(text: &str) -> DishDescriptionPayload {
    DishDescriptionPayload {
        text: Some(text.to_string()),
        ingredients: Some(vec!["tomate".to_string()]),
        cuisine_type: Some("Italiana".to_string()),
        confidence: Some(0.9),
        ..Default::default()
    }
}
