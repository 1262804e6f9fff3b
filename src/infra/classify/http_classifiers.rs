// HTTP clients for the external image classifiers.
//
// Both services take a base64-encoded image in a JSON body and answer with
// JSON. The inference endpoints are deployment configuration; the model
// architectures behind them are not this crate's business.

use crate::core::classify::{
    ClassifierError, Detection, NsfwClassifier, NsfwScores, ObjectClassifier,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

async fn encode_image(path: &Path) -> Result<String, ClassifierError> {
    let bytes = tokio::fs::read(path).await?;
    Ok(BASE64.encode(bytes))
}

async fn post_image(
    client: &Client,
    url: &str,
    image: &Path,
) -> Result<reqwest::Response, ClassifierError> {
    let payload = json!({ "image": encode_image(image).await? });
    let response = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| ClassifierError::Backend(e.to_string()))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(ClassifierError::Backend(format!(
            "classifier error: {status} - {text}"
        )));
    }
    Ok(response)
}

pub struct HttpNsfwClassifier {
    client: Client,
    url: String,
}

impl HttpNsfwClassifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/nsfw", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl NsfwClassifier for HttpNsfwClassifier {
    async fn score(&self, image: &Path) -> Result<NsfwScores, ClassifierError> {
        let response = post_image(&self.client, &self.url, image).await?;
        response
            .json::<NsfwScores>()
            .await
            .map_err(|e| ClassifierError::Backend(e.to_string()))
    }
}

pub struct HttpObjectClassifier {
    client: Client,
    url: String,
}

impl HttpObjectClassifier {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            url: format!("{}/detect", base_url.trim_end_matches('/')),
        }
    }
}

#[derive(Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<Detection>,
}

#[async_trait]
impl ObjectClassifier for HttpObjectClassifier {
    async fn detect(&self, image: &Path) -> Result<Vec<Detection>, ClassifierError> {
        let response = post_image(&self.client, &self.url, image).await?;
        let body: DetectResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Backend(e.to_string()))?;
        Ok(body.detections)
    }
}
