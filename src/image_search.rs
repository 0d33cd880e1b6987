//! Búsqueda de fotos de platos con Google Custom Search (modo imagen).

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::{
    capabilities::ImageSearchCapability,
    error::CapabilityError,
    models::{FoodImage, LoadStatus},
};

const SEARCH_URL: &str = "https://www.googleapis.com/customsearch/v1";
/// Sufijo que orienta la búsqueda a fotos de comida.
const QUERY_SUFFIX: &str = "food dish";
/// Máximo que admite la API por petición.
const MAX_RESULTS_PER_SEARCH: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "displayLink")]
    display_link: String,
    #[serde(default)]
    image: ImageMeta,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageMeta {
    #[serde(default)]
    thumbnail_link: String,
    #[serde(default)]
    width: u32,
    #[serde(default)]
    height: u32,
}

pub struct GoogleImageSearch {
    client: reqwest::Client,
    api_key: String,
    engine_id: String,
    num_results: usize,
}

impl GoogleImageSearch {
    pub fn new(api_key: &str, engine_id: &str, num_results: usize, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            api_key: api_key.to_string(),
            engine_id: engine_id.to_string(),
            num_results: num_results.clamp(1, MAX_RESULTS_PER_SEARCH),
        })
    }
}

#[async_trait]
impl ImageSearchCapability for GoogleImageSearch {
    async fn search(&self, query: &str) -> Result<Vec<FoodImage>, CapabilityError> {
        let q = format!("{} {QUERY_SUFFIX}", query.trim());
        let num = self.num_results.to_string();
        let resp = self
            .client
            .get(SEARCH_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.engine_id.as_str()),
                ("q", q.as_str()),
                ("searchType", "image"),
                ("num", num.as_str()),
                ("imgType", "photo"),
                ("safe", "active"),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(status.as_u16(), &body));
        }

        let data: SearchResponse = resp.json().await?;
        debug!("{} resultados brutos para '{}'", data.items.len(), query);
        Ok(into_food_images(data.items))
    }
}

/// Descarta enlaces que no son http(s) y logotipos.
fn into_food_images(items: Vec<SearchItem>) -> Vec<FoodImage> {
    items
        .into_iter()
        .filter(|item| is_http_url(&item.link))
        .filter(|item| !item.title.to_lowercase().contains("logo"))
        .map(|item| {
            let thumbnail_url = if is_http_url(&item.image.thumbnail_link) {
                item.image.thumbnail_link
            } else {
                String::new()
            };
            FoodImage {
                url: item.link,
                thumbnail_url,
                title: item.title,
                source: item.display_link,
                width: item.image.width,
                height: item.image.height,
                load_status: LoadStatus::Pending,
            }
        })
        .collect()
}

fn is_http_url(candidate: &str) -> bool {
    Url::parse(candidate)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}
