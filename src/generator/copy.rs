//! Provedor de legendas sobre a API de Messages da Anthropic.
//!
//! Pede ao modelo uma lista numerada e extrai uma legenda por linha.

use async_trait::async_trait;
use std::time::Duration;

use super::provider::{Brand, CopyProvider};
use crate::anthropic::{MessageSender, MessagesRequest};
use crate::error::ProviderError;
use crate::job::CaptionConfig;

const SYSTEM_PROMPT: &str = "You are a social media copywriter. \
Reply with a numbered list of captions and nothing else.";

pub struct AnthropicCopyProvider<S> {
    sender: S,
    model: String,
    /// Usado para reportar [`ProviderError::Timeout`].
    timeout: Duration,
}

impl<S: MessageSender> AnthropicCopyProvider<S> {
    pub fn new(sender: S, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            sender,
            model: model.into(),
            timeout,
        }
    }

    fn prompt(goal: &str, config: &CaptionConfig, brand: Brand<'_>) -> String {
        let mut prompt = format!(
            "Write {} {} social media captions for this campaign goal:\n\n{}\n\n\
             Keep each caption under 220 characters. Include at most two hashtags.",
            config.n,
            config.style,
            goal.trim()
        );
        if let Some(style) = brand.style {
            prompt.push_str(&format!("\nWrite in a {} brand voice.", style.tone));
            if let Some(tagline) = &style.tagline {
                prompt.push_str(&format!(" Work the tagline \"{}\" into at least one caption.", tagline.trim()));
            }
        }
        if brand.reference_image_url.is_some() {
            prompt.push_str("\nThe post shows a photo of the actual product; describe it, not a generic one.");
        }
        prompt
    }
}

#[async_trait]
impl<S: MessageSender> CopyProvider for AnthropicCopyProvider<S> {
    async fn captions(
        &self,
        goal: &str,
        config: &CaptionConfig,
        brand: Brand<'_>,
    ) -> Result<Vec<String>, ProviderError> {
        let req = MessagesRequest::single_turn(&self.model, 1024, Self::prompt(goal, config, brand))
            .with_system(SYSTEM_PROMPT);

        let resp = self
            .sender
            .send_message(&req)
            .await
            .map_err(|e| e.into_provider_error(self.timeout))?;

        let mut captions = parse_numbered_captions(&resp.text());
        if captions.is_empty() {
            return Err(ProviderError::Unavailable(
                "model returned no captions".into(),
            ));
        }
        captions.truncate(config.n as usize);
        Ok(captions)
    }
}

/// Extrai itens de uma lista (`1.`, `1)`, `-`, `*`). Linhas fora de lista
/// são ignoradas, exceto quando não há marcador algum no texto.
pub fn parse_numbered_captions(text: &str) -> Vec<String> {
    let lines: Vec<&str> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let listed: Vec<String> = lines
        .iter()
        .filter_map(|l| strip_marker(l))
        .map(|s| s.trim().trim_matches('"').trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if !listed.is_empty() {
        return listed;
    }
    lines.into_iter().map(str::to_string).collect()
}

fn strip_marker(line: &str) -> Option<&str> {
    if let Some(rest) = line.strip_prefix("- ").or_else(|| line.strip_prefix("* ")) {
        return Some(rest);
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::anthropic::{AnthropicError, ContentBlock, MessagesResponse, Usage};
    use crate::job::{BrandStyle, BrandTone, ColorUsage, TaskPlan};

    struct Scripted {
        reply: Mutex<Option<Result<String, AnthropicError>>>,
        seen: Mutex<Vec<MessagesRequest>>,
    }

    impl Scripted {
        fn new(reply: Result<String, AnthropicError>) -> Self {
            Self {
                reply: Mutex::new(Some(reply)),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl MessageSender for Scripted {
        async fn send_message(
            &self,
            req: &MessagesRequest,
        ) -> Result<MessagesResponse, AnthropicError> {
            self.seen.lock().unwrap().push(req.clone());
            let text = self.reply.lock().unwrap().take().unwrap()?;
            Ok(MessagesResponse {
                id: "msg".into(),
                content: vec![ContentBlock {
                    content_type: "text".into(),
                    text,
                }],
                model: req.model.clone(),
                stop_reason: Some("end_turn".into()),
                usage: Usage {
                    input_tokens: 1,
                    output_tokens: 1,
                },
            })
        }
    }

    fn cfg(n: u32) -> CaptionConfig {
        CaptionConfig {
            n,
            style: "playful".into(),
        }
    }

    #[test]
    fn parses_common_list_markers() {
        let text = "Here you go:\n1. First one\n2) \"Second\"\n- Third\n\n* Fourth";
        assert_eq!(
            parse_numbered_captions(text),
            vec!["First one", "Second", "Third", "Fourth"]
        );
    }

    #[test]
    fn unmarked_text_falls_back_to_lines() {
        assert_eq!(parse_numbered_captions("alpha\nbeta"), vec!["alpha", "beta"]);
        assert!(parse_numbered_captions("  \n ").is_empty());
    }

    #[tokio::test]
    async fn truncates_to_requested_count() {
        let sender = Scripted::new(Ok("1. a\n2. b\n3. c".into()));
        let provider = AnthropicCopyProvider::new(sender, "m", Duration::from_secs(5));
        let caps = provider.captions("Launch", &cfg(2), Brand::default()).await.unwrap();
        assert_eq!(caps, vec!["a", "b"]);

        let seen = provider.sender.seen.lock().unwrap();
        assert!(seen[0].messages[0].content.contains("2 playful"));
        assert!(seen[0].system.is_some());
        assert!(!seen[0].messages[0].content.contains("brand voice"));
    }

    #[tokio::test]
    async fn brand_style_shapes_the_prompt() {
        let plan = TaskPlan::new("Launch")
            .with_brand_style(
                BrandStyle::new(BrandTone::Playful)
                    .with_color("FF5733", "Coral", ColorUsage::Primary)
                    .with_tagline("Made to play"),
            )
            .with_reference_image("https://cdn.test/j/reference_image.jpg");
        let sender = Scripted::new(Ok("1. a".into()));
        let provider = AnthropicCopyProvider::new(sender, "m", Duration::from_secs(5));
        provider.captions("Launch", &cfg(1), Brand::of(&plan)).await.unwrap();

        let seen = provider.sender.seen.lock().unwrap();
        let content = &seen[0].messages[0].content;
        assert!(content.contains("playful brand voice"));
        assert!(content.contains("\"Made to play\""));
        assert!(content.contains("actual product"));
    }

    #[tokio::test]
    async fn rate_limit_maps_to_quota() {
        let sender = Scripted::new(Err(AnthropicError::RateLimited { retry_after_ms: 10 }));
        let provider = AnthropicCopyProvider::new(sender, "m", Duration::from_secs(5));
        let err = provider.captions("Launch", &cfg(3), Brand::default()).await.unwrap_err();
        assert!(matches!(err, ProviderError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn empty_reply_is_unavailable() {
        let sender = Scripted::new(Ok("   ".into()));
        let provider = AnthropicCopyProvider::new(sender, "m", Duration::from_secs(5));
        let err = provider.captions("Launch", &cfg(3), Brand::default()).await.unwrap_err();
        assert!(err.allows_fallback());
    }
}
