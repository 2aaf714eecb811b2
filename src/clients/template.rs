use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::RenderError;
use crate::providers::{RenderedMessage, TemplateRenderer};

#[derive(Debug, Clone, Deserialize)]
struct Template {
    #[serde(default)]
    subject: Option<String>,
    body: String,

    /// Variable names the template requires; a missing one makes the
    /// request unsatisfiable rather than retryable.
    #[serde(default)]
    variables: Vec<String>,
}

/// Template service adapter: fetches a template by code and substitutes
/// `{{name}}` placeholders. Rendering itself is side-effect-free.
pub struct TemplateServiceClient {
    http_client: Client,
    base_url: String,
}

impl TemplateServiceClient {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, RenderError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;

        info!(base_url = %base_url, "Template service client initialized");

        Ok(Self {
            http_client,
            base_url,
        })
    }

    async fn fetch_template(&self, template_code: &str) -> Result<Template, RenderError> {
        let url = format!("{}/api/v1/templates/{}", self.base_url, template_code);

        debug!(template_code, "Fetching template");

        let response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(RenderError::InvalidTemplate {
                template_code: template_code.to_string(),
                reason: "template not found".into(),
            }),
            status if status.is_success() => response
                .json()
                .await
                .map_err(|e| RenderError::Unavailable(e.to_string())),
            status => Err(RenderError::Unavailable(format!(
                "template service returned {}",
                status
            ))),
        }
    }

    fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
        let mut rendered = text.to_string();

        for (name, value) in variables {
            rendered = rendered.replace(&format!("{{{{{}}}}}", name), value);
        }

        rendered
    }
}

#[async_trait]
impl TemplateRenderer for TemplateServiceClient {
    async fn render(
        &self,
        template_code: &str,
        variables: &HashMap<String, String>,
    ) -> Result<RenderedMessage, RenderError> {
        let template = self.fetch_template(template_code).await?;

        for required in &template.variables {
            if !variables.contains_key(required) {
                return Err(RenderError::InvalidTemplate {
                    template_code: template_code.to_string(),
                    reason: format!("missing required variable '{}'", required),
                });
            }
        }

        Ok(RenderedMessage {
            subject: template
                .subject
                .as_deref()
                .map(|s| Self::substitute(s, variables)),
            body: Self::substitute(&template.body, variables),
        })
    }
}
