//! Adaptador de visión sobre un endpoint de chat completions compatible con
//! OpenAI: la foto viaja como data URL en base64 y la respuesta se restringe
//! con un JSON schema.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use schemars::{schema_for, JsonSchema};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    capabilities::{strip_code_fences, VisionCapability},
    error::CapabilityError,
    extraction::ImageFormat,
    models::{DishCandidate, RawImage},
};

const ANALYSIS_PROMPT: &str = r#"
Analiza esta foto de una carta de restaurante y extrae todos los platos visibles con su nombre y su precio.

Devuelve SOLO un objeto JSON válido con esta estructura exacta:
{"dishes": [{"dish_name": "nombre exacto tal como aparece", "price": "precio tal como aparece, con su símbolo de moneda"}]}

Reglas:
- Extrae sólo platos claramente visibles y legibles.
- Copia los nombres exactamente como aparecen, en su idioma y alfabeto originales.
- Copia los precios exactamente como aparecen (símbolo, decimales, separadores).
- Si un plato no tiene precio visible, usa null en "price".
- Ignora títulos de sección, el nombre del restaurante y lo que no sea comida.
- Si no hay platos, devuelve {"dishes": []}.
"#;

/// Lo que devuelve el modelo; también genera el JSON schema de la petición.
#[derive(Debug, Deserialize, JsonSchema)]
struct MenuAnalysis {
    dishes: Vec<ExtractedDish>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct ExtractedDish {
    /// Nombre del plato tal como aparece en la carta
    dish_name: String,
    /// Precio con su símbolo de moneda, o null si no se ve
    price: Option<String>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

pub struct VisionClient {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    response_schema: Value,
}

impl VisionClient {
    pub fn new(api_url: &str, api_key: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
            response_schema: serde_json::to_value(schema_for!(MenuAnalysis))?,
        })
    }

    fn request_body(&self, image: &RawImage) -> Value {
        let mime = ImageFormat::from_mime(image.mime_type())
            .map(|f| f.mime_type())
            .unwrap_or("image/jpeg");
        let data_url = format!("data:{mime};base64,{}", STANDARD.encode(image.bytes()));

        json!({
            "model": self.model,
            "temperature": 0.0,
            "max_tokens": 2048,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": ANALYSIS_PROMPT },
                    { "type": "image_url", "image_url": { "url": data_url } }
                ]
            }],
            "response_format": {
                "type": "json_schema",
                "json_schema": { "name": "menu_analysis", "schema": self.response_schema }
            }
        })
    }
}

#[async_trait]
impl VisionCapability for VisionClient {
    async fn extract(&self, image: &RawImage) -> Result<Vec<DishCandidate>, CapabilityError> {
        debug!("Enviando imagen a {} (modelo {})", self.api_url, self.model);
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(image))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(status.as_u16(), &body));
        }

        let chat: ChatResponse = resp.json().await?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let candidates = parse_analysis(&content)?;
        info!("El modelo de visión ha devuelto {} platos", candidates.len());
        Ok(candidates)
    }
}

fn parse_analysis(content: &str) -> Result<Vec<DishCandidate>, CapabilityError> {
    let analysis: MenuAnalysis = serde_json::from_str(strip_code_fences(content))
        .map_err(|e| CapabilityError::Permanent(format!("respuesta de visión no es JSON válido: {e}")))?;

    Ok(analysis
        .dishes
        .into_iter()
        .map(|d| DishCandidate::new(d.dish_name, d.price.unwrap_or_default()))
        .collect())
}
