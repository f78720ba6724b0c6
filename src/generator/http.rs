//! Generic HTTP media provider.
//!
//! POSTs the capability config as JSON to an endpoint and takes the response
//! body as the media bytes, with `Content-Type` as the object's type. The
//! prompt is sent brand-styled, next to the raw `brand_style` and
//! `reference_image_url`; image requests also name an `output_format`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use super::provider::{Brand, ImageProvider, MediaOutput, VideoProvider};
use crate::error::ProviderError;
use crate::job::{ImageConfig, VideoConfig};

#[derive(Serialize)]
struct MediaRequest<'a, C> {
    #[serde(flatten)]
    config: C,
    #[serde(flatten)]
    brand: Brand<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output_format: Option<&'static str>,
}

pub struct HttpMediaProvider {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpMediaProvider {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Unavailable(format!("http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key: None,
            timeout,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    async fn fetch<B: Serialize + Sync>(&self, body: &B, fallback_type: &str) -> Result<MediaOutput, ProviderError> {
        let mut req = self.client.post(&self.endpoint).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await.map_err(|e| self.network_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(status_error(status, message));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(fallback_type)
            .to_string();
        let bytes = response.bytes().await.map_err(|e| self.network_error(e))?;
        if bytes.is_empty() {
            return Err(ProviderError::Unavailable("provider returned an empty body".into()));
        }
        Ok(MediaOutput::new(bytes.to_vec(), content_type))
    }

    fn network_error(&self, e: reqwest::Error) -> ProviderError {
        if e.is_timeout() {
            ProviderError::Timeout(self.timeout)
        } else {
            ProviderError::Unavailable(e.to_string())
        }
    }
}

fn status_error(status: StatusCode, message: String) -> ProviderError {
    let msg = format!("status {}: {message}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::PAYMENT_REQUIRED {
        ProviderError::QuotaExceeded(msg)
    } else if status.is_server_error() {
        ProviderError::Unavailable(msg)
    } else {
        ProviderError::InvalidInput(msg)
    }
}

#[async_trait]
impl ImageProvider for HttpMediaProvider {
    async fn image(&self, config: &ImageConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError> {
        let body = MediaRequest {
            config: ImageConfig {
                prompt: brand.styled_prompt(&config.prompt),
                ..config.clone()
            },
            brand,
            output_format: Some(config.output_format()),
        };
        self.fetch(&body, config.output_content_type()).await
    }
}

#[async_trait]
impl VideoProvider for HttpMediaProvider {
    async fn video(&self, config: &VideoConfig, brand: Brand<'_>) -> Result<MediaOutput, ProviderError> {
        let body = MediaRequest {
            config: VideoConfig {
                prompt: brand.styled_prompt(&config.prompt),
                ..config.clone()
            },
            brand,
            output_format: None,
        };
        self.fetch(&body, "video/mp4").await
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::job::{BrandStyle, BrandTone, ColorUsage, TaskPlan};

    fn image_cfg() -> ImageConfig {
        ImageConfig {
            prompt: "a red bicycle".into(),
            size: "512x512".into(),
            max_file_size_mb: None,
        }
    }

    #[tokio::test]
    async fn returns_body_and_content_type() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer k"))
            .and(body_partial_json(serde_json::json!({"prompt": "a red bicycle"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xff, 0xd8, 0xff]),
            )
            .mount(&server)
            .await;

        let provider = HttpMediaProvider::new(server.uri(), Duration::from_secs(5))
            .unwrap()
            .with_api_key("k");
        let out = provider.image(&image_cfg(), Brand::default()).await.unwrap();
        assert_eq!(out.bytes, vec![0xff, 0xd8, 0xff]);
        assert_eq!(out.extension(), "jpg");
    }

    async fn error_for_status(code: u16) -> ProviderError {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
            .mount(&server)
            .await;
        let provider = HttpMediaProvider::new(server.uri(), Duration::from_secs(5)).unwrap();
        provider.image(&image_cfg(), Brand::default()).await.unwrap_err()
    }

    #[tokio::test]
    async fn maps_status_codes() {
        assert_eq!(
            error_for_status(429).await,
            ProviderError::QuotaExceeded("status 429: nope".into())
        );
        assert_eq!(
            error_for_status(503).await,
            ProviderError::Unavailable("status 503: nope".into())
        );
        assert_eq!(
            error_for_status(400).await,
            ProviderError::InvalidInput("status 400: nope".into())
        );
    }

    #[tokio::test]
    async fn capped_image_requests_jpeg_with_brand() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "output_format": "jpeg",
                "max_file_size_mb": 2.0,
                "brand_style": {"tone": "luxury", "tagline": "Elevate"},
                "reference_image_url": "https://cdn.test/j/reference_image.jpg",
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xff, 0xd8]),
            )
            .mount(&server)
            .await;

        let plan = TaskPlan::new("Launch")
            .with_brand_style(
                BrandStyle::new(BrandTone::Luxury)
                    .with_color("1A1A1A", "Charcoal", ColorUsage::Primary)
                    .with_tagline("Elevate"),
            )
            .with_reference_image("https://cdn.test/j/reference_image.jpg");
        let config = ImageConfig {
            max_file_size_mb: Some(2.0),
            ..image_cfg()
        };
        let provider = HttpMediaProvider::new(server.uri(), Duration::from_secs(5)).unwrap();
        let out = provider.image(&config, Brand::of(&plan)).await.unwrap();
        assert_eq!(out.extension(), "jpg");

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("a red bicycle. Brand tone: luxury. Primary color: Charcoal (#1A1A1A)"));
    }

    #[tokio::test]
    async fn uncapped_image_requests_png() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({"output_format": "png", "prompt": "a red bicycle"})))
            .respond_with(ResponseTemplate::new(200).insert_header("content-type", "image/png").set_body_bytes(vec![1]))
            .mount(&server)
            .await;
        let provider = HttpMediaProvider::new(server.uri(), Duration::from_secs(5)).unwrap();
        let out = provider.image(&image_cfg(), Brand::default()).await.unwrap();
        assert_eq!(out.extension(), "png");
    }

    #[tokio::test]
    async fn slow_provider_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![1])
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;
        let provider = HttpMediaProvider::new(server.uri(), Duration::from_millis(100)).unwrap();
        let err = provider
            .video(
                &VideoConfig {
                    prompt: "x".into(),
                    duration_sec: 10,
                    max_file_size_mb: None,
                },
                Brand::default(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ProviderError::Timeout(Duration::from_millis(100)));
    }
}
