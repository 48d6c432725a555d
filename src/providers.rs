//! Model-provider catalog.
//!
//! The catalog rarely changes, so fetches go through a short-lived cache:
//! fast path on a warm cache, a fetch lock so concurrent misses don't stampede
//! the server, bounded retry with backoff, and an expired cache as the last
//! fallback before giving up with an empty list.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

const CACHE_TTL: Duration = Duration::from_secs(300); // 5 minutes

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub supports_reasoning: Option<bool>,
    #[serde(default)]
    pub context_window: Option<u32>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct ProviderInfo {
    pub name: String,
    #[serde(default)]
    pub models: Vec<ModelInfo>,
    #[serde(default)]
    pub default_model: Option<String>,
}

#[derive(Deserialize)]
struct CatalogResponse {
    providers: Vec<ProviderInfo>,
}

struct CatalogCache {
    providers: Vec<ProviderInfo>,
    last_fetch: Instant,
}

lazy_static::lazy_static! {
    static ref CATALOG_CACHE: Arc<Mutex<Option<CatalogCache>>> = Arc::new(Mutex::new(None));
    static ref FETCH_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::new(());
}

async fn fetch_catalog_from_server(
    base_url: &str,
    api_key: &str,
) -> Result<Vec<ProviderInfo>, Box<dyn std::error::Error + Send + Sync>> {
    let url = format!("{}/v1/providers", base_url.trim_end_matches('/'));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;

    let mut request = client.get(&url);
    if !api_key.is_empty() {
        request = request.header("Authorization", format!("Bearer {}", api_key));
    }

    let response = request.send().await?;
    let response_text = response.text().await?;

    let catalog: CatalogResponse = match serde_json::from_str(&response_text) {
        Ok(res) => res,
        Err(e) => {
            eprintln!("[CATALOG] Failed to deserialize response: {}", e);
            eprintln!("[CATALOG] Raw response preview: {:.1000}", response_text);
            return Err(Box::new(e));
        }
    };

    Ok(catalog.providers)
}

pub async fn get_catalog(base_url: &str, api_key: &str) -> Vec<ProviderInfo> {
    // 1. Fast path: warm cache.
    if let Ok(cache) = CATALOG_CACHE.lock() {
        if let Some(ref cached) = *cache {
            if cached.last_fetch.elapsed() < CACHE_TTL {
                return cached.providers.clone();
            }
        }
    }

    // 2. Coordinate concurrent misses.
    let _lock = FETCH_LOCK.lock().await;

    // 3. Double-check after acquiring the lock.
    if let Ok(cache) = CATALOG_CACHE.lock() {
        if let Some(ref cached) = *cache {
            if cached.last_fetch.elapsed() < CACHE_TTL {
                return cached.providers.clone();
            }
        }
    }

    // 4. Truly need to fetch.
    let mut retry_count = 0;
    let max_retries = 2;

    loop {
        match fetch_catalog_from_server(base_url, api_key).await {
            Ok(providers) => {
                if let Ok(mut cache) = CATALOG_CACHE.lock() {
                    *cache = Some(CatalogCache {
                        providers: providers.clone(),
                        last_fetch: Instant::now(),
                    });
                    eprintln!(
                        "[CATALOG] Fetched {} providers from {}",
                        providers.len(),
                        base_url
                    );
                }
                return providers;
            }
            Err(e) => {
                retry_count += 1;
                if retry_count > max_retries {
                    eprintln!(
                        "[CATALOG] Failed to fetch catalog from {} after {} retries: {}",
                        base_url, max_retries, e
                    );
                    break;
                }

                let delay = Duration::from_millis(500 * (1 << (retry_count - 1)));
                eprintln!(
                    "[CATALOG] Fetch failed ({}): {}. Retrying in {:?}...",
                    retry_count, e, delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }

    // 5. Expired cache beats nothing at all.
    if let Ok(cache) = CATALOG_CACHE.lock() {
        if let Some(ref cached) = *cache {
            eprintln!("[CATALOG] Using EXPIRED cache as fallback");
            return cached.providers.clone();
        }
    }

    Vec::new()
}

/// Probe one provider's connectivity through the platform.
pub async fn test_connection(base_url: &str, api_key: &str, provider: &str) -> Result<(), String> {
    let url = format!(
        "{}/v1/providers/{}/test",
        base_url.trim_end_matches('/'),
        provider
    );
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(|e| e.to_string())?;

    let mut request = client.get(&url);
    if !api_key.is_empty() {
        request = request.header("Authorization", format!("Bearer {}", api_key));
    }

    let response = request
        .send()
        .await
        .map_err(|e| format!("Failed to reach provider {}: {}", provider, e))?;

    if response.status().is_success() {
        Ok(())
    } else {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(format!("Server returned {}: {}", status, text))
    }
}

pub fn clear_cache() {
    if let Ok(mut cache) = CATALOG_CACHE.lock() {
        *cache = None;
    }
}
