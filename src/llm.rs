//! Abstracción sobre Rig para generar descripciones de platos con distintos
//! proveedores de LLM. De momento se implementa OpenAI; Gemini/Ollama quedan
//! preparados para el futuro.

use async_trait::async_trait;
use rig::completion::Prompt;
use tracing::{debug, warn};

use crate::{
    capabilities::{strip_code_fences, DescriptionCapability},
    config::{AppConfig, LlmProvider},
    error::CapabilityError,
    models::DishDescriptionPayload,
};

const DESCRIPTION_PROMPT: &str = r#"
Eres un experto en gastronomía que ayuda a los comensales a entender los platos de una carta.
Para el plato indicado, genera una descripción que ayude a decidir si pedirlo.

La salida DEBE ser un único objeto JSON válido con esta estructura:
{
    "text": "Descripción breve y apetecible (2-3 frases) de qué es el plato y qué lo hace especial",
    "ingredients": ["lista", "de", "ingredientes", "principales"],
    "dietary_restrictions": ["vegetarian", "vegan", "gluten-free", "dairy-free", "nut-free", "spicy"],
    "cuisine_type": "Tipo de cocina (italiana, tailandesa, mexicana...)",
    "cultural_context": "Origen o tradición del plato, si la tiene",
    "spice_level": "mild, medium o hot (si aplica)",
    "preparation_method": "Cómo se prepara (a la parrilla, frito, al vapor...)",
    "confidence": 0.85
}

Reglas:
- Incluye sólo las restricciones dietéticas que apliquen claramente.
- La confianza va de 0.7 a 0.95 según lo conocido que sea el plato.
- Si no estás seguro de un campo, usa null o una lista vacía.
- Responde en el idioma del nombre del plato cuando sea posible.
No incluyas explicaciones, solo el JSON.
"#;

/// Gestor de LLMs: genera descripciones de platos.
#[derive(Debug, Clone)]
pub struct LlmManager {
    pub provider: LlmProvider,
    pub chat_model: String,
}

impl LlmManager {
    /// Construye el manager a partir de la configuración.
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            provider: cfg.llm_provider.clone(),
            chat_model: cfg.llm_chat_model.clone(),
        }
    }

    fn model_name(&self) -> &str {
        if self.chat_model.is_empty() {
            "gpt-4o-mini"
        } else {
            self.chat_model.as_str()
        }
    }

    async fn describe_with_openai(&self, request: &str) -> Result<String, CapabilityError> {
        use rig::providers::openai;
        // Trait para client.agent(...)
        use rig::client::CompletionClient as _;

        let client = openai::Client::from_env();
        let agent = client
            .agent(self.model_name())
            .preamble(DESCRIPTION_PROMPT)
            .build();

        agent
            .prompt(request)
            .await
            .map_err(|e| classify_llm_error(&e.to_string()))
    }
}

#[async_trait]
impl DescriptionCapability for LlmManager {
    async fn describe(
        &self,
        dish_name: &str,
        context: Option<&str>,
    ) -> Result<DishDescriptionPayload, CapabilityError> {
        let request = build_request(dish_name, context);

        let response = match self.provider {
            LlmProvider::OpenAI => self.describe_with_openai(&request).await?,
            ref other => {
                return Err(CapabilityError::Unconfigured(format!(
                    "Proveedor LLM {:?} aún no implementado para descripciones",
                    other
                )))
            }
        };

        debug!("Respuesta del LLM para '{dish_name}': {response}");
        parse_description(&response)
    }
}

fn build_request(dish_name: &str, context: Option<&str>) -> String {
    match context {
        Some(context) if !context.trim().is_empty() => format!("Plato: {dish_name}\n{context}"),
        _ => format!("Plato: {dish_name}"),
    }
}

/// Una respuesta que no es JSON no mejora repitiendo la misma petición.
fn parse_description(response: &str) -> Result<DishDescriptionPayload, CapabilityError> {
    serde_json::from_str(strip_code_fences(response)).map_err(|e| {
        warn!("No se pudo parsear el JSON de la descripción. Error: {e}. Respuesta LLM: '{response}'");
        CapabilityError::Permanent(format!("respuesta del LLM no es JSON válido: {e}"))
    })
}

/// Rig sólo expone el error como texto: se clasifica por su contenido.
fn classify_llm_error(message: &str) -> CapabilityError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") {
        CapabilityError::RateLimited(message.to_string())
    } else if lower.contains("401")
        || lower.contains("403")
        || lower.contains("invalid_api_key")
        || lower.contains("incorrect api key")
        || lower.contains("model_not_found")
    {
        CapabilityError::Permanent(message.to_string())
    } else {
        CapabilityError::Transient(message.to_string())
    }
}
