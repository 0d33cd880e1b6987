//! Carga y gestión de configuración de la aplicación (servicios externos,
//! caché y límites del pipeline).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};

use crate::{
    pipeline::PipelineSettings,
    retry::{Backoff, RetryPolicy},
};

const DEFAULT_VISION_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Clone, Debug)]
pub enum LlmProvider {
    OpenAI,
    Gemini,
    Ollama,
}

impl LlmProvider {
    pub fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "ollama" => Ok(Self::Ollama),
            other => Err(anyhow!("Proveedor LLM no soportado: {other}")),
        }
    }
}

/// Configuración completa de la aplicación.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_addr: String,

    pub llm_provider: LlmProvider,
    pub llm_chat_model: String,
    pub openai_api_key: Option<String>,

    pub vision_api_url: String,
    pub vision_model: String,
    pub vision_api_key: Option<String>,

    pub google_search_api_key: Option<String>,
    pub google_search_engine_id: Option<String>,

    pub cache_enabled: bool,
    pub cache_ttl: Duration,

    pub max_concurrent_enrichment: usize,
    pub max_images_per_dish: usize,
    pub max_dishes_per_menu: usize,
    pub max_upload_bytes: usize,
    pub request_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_backoff: Backoff,
    pub retry_base_delay: Duration,
}

impl AppConfig {
    /// Carga la configuración desde variables de entorno (usando .env si existe).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Igual que `from_env` pero con una fuente de variables arbitraria.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let server_addr = var("SERVER_ADDR").unwrap_or_else(|| "127.0.0.1:3322".to_string());

        let llm_provider_str = var("LLM_PROVIDER").unwrap_or_else(|| "openai".to_string());
        let llm_provider = LlmProvider::from_str(&llm_provider_str)?;
        let llm_chat_model = var("LLM_CHAT_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let openai_api_key = var("OPENAI_API_KEY");

        let vision_api_url = var("VISION_API_URL").unwrap_or_else(|| DEFAULT_VISION_API_URL.to_string());
        let vision_model = var("VISION_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string());
        let vision_api_key = var("VISION_API_KEY").or_else(|| openai_api_key.clone());

        let cache_enabled = match var("CACHE_ENABLED") {
            Some(v) => parse_bool(&v).with_context(|| format!("CACHE_ENABLED inválido: {v}"))?,
            None => true,
        };

        Ok(Self {
            server_addr,
            llm_provider,
            llm_chat_model,
            openai_api_key,
            vision_api_url,
            vision_model,
            vision_api_key,
            google_search_api_key: var("GOOGLE_SEARCH_API_KEY"),
            google_search_engine_id: var("GOOGLE_SEARCH_ENGINE_ID"),
            cache_enabled,
            cache_ttl: Duration::from_secs(parse_or(&var, "CACHE_TTL_SECS", 3600)?),
            max_concurrent_enrichment: parse_or(&var, "MAX_CONCURRENT_ENRICHMENT", 3)?,
            max_images_per_dish: parse_or(&var, "MAX_IMAGES_PER_DISH", 5)?,
            max_dishes_per_menu: parse_or(&var, "MAX_DISHES_PER_MENU", 50)?,
            max_upload_bytes: parse_or(&var, "MAX_UPLOAD_BYTES", 16 * 1024 * 1024)?,
            request_timeout: Duration::from_secs(parse_or(&var, "REQUEST_TIMEOUT_SECS", 30)?),
            retry_max_attempts: parse_or(&var, "RETRY_MAX_ATTEMPTS", 3)?,
            retry_backoff: match var("RETRY_BACKOFF") {
                Some(v) => parse_backoff(&v)?,
                None => Backoff::Exponential,
            },
            retry_base_delay: Duration::from_millis(parse_or(&var, "RETRY_BASE_DELAY_MS", 500)?),
        })
    }

    /// Las descripciones sólo funcionan con OpenAI y su clave.
    pub fn description_available(&self) -> bool {
        matches!(self.llm_provider, LlmProvider::OpenAI) && self.openai_api_key.is_some()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_backoff, self.retry_base_delay)
            .with_attempt_timeout(self.request_timeout)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            max_concurrent_enrichment: self.max_concurrent_enrichment,
            max_images_per_dish: self.max_images_per_dish,
            max_dishes_per_menu: self.max_dishes_per_menu,
            max_upload_bytes: self.max_upload_bytes,
            retry: self.retry_policy(),
        }
    }
}

fn parse_or<T>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|e| anyhow!("Valor inválido para {key} ('{raw}'): {e}")),
        None => Ok(default),
    }
}

fn parse_backoff(raw: &str) -> Result<Backoff> {
    match raw.to_lowercase().as_str() {
        "linear" => Ok(Backoff::Linear),
        "exponential" => Ok(Backoff::Exponential),
        other => Err(anyhow!("RETRY_BACKOFF debe ser linear o exponential, llegó '{other}'")),
    }
}

fn parse_bool(raw: &str) -> Result<bool> {
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(anyhow!("se esperaba true/false, llegó '{other}'")),
    }
}
