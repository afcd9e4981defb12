use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    AssistantConfig, CreatedAssistant, ImportOptions, ImportedNumber, ProviderError,
    VoiceAiProvider,
};

#[derive(Debug, Clone)]
pub struct VoiceAiSettings {
    pub api_base: String,
    pub api_key: Option<String>,
    pub credential_id: Option<String>,
}

/// key: voice-ai-http -> voice platform REST adapter
pub struct HttpVoiceAiProvider {
    client: reqwest::Client,
    settings: VoiceAiSettings,
}

impl HttpVoiceAiProvider {
    pub fn new(settings: VoiceAiSettings) -> anyhow::Result<Self> {
        url::Url::parse(&settings.api_base)
            .with_context(|| format!("invalid voice-ai api base `{}`", settings.api_base))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build voice-ai client")?;
        Ok(Self { client, settings })
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.settings.api_base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let request = match &self.settings.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status, body))
    }

    async fn patch_number(&self, voice_id: &str, body: Value) -> Result<(), ProviderError> {
        self.send(
            self.client
                .patch(self.endpoint(&format!("phone-number/{voice_id}")))
                .json(&body),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl VoiceAiProvider for HttpVoiceAiProvider {
    fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.settings.api_key.is_none() {
            missing.push("VOICE_AI_API_KEY");
        }
        if self.settings.credential_id.is_none() {
            missing.push("VOICE_AI_CREDENTIAL_ID");
        }
        missing
    }

    fn credential_id(&self) -> Option<&str> {
        self.settings.credential_id.as_deref()
    }

    async fn import_phone_number(
        &self,
        number: &str,
        carrier_name: &str,
        options: &ImportOptions,
    ) -> Result<ImportedNumber, ProviderError> {
        let payload = json!({
            "provider": carrier_name,
            "number": number,
            "name": options.name,
            "assistantId": options.assistant_id,
            "credentialId": options.credential_id,
        });
        let response = self
            .send(self.client.post(self.endpoint("phone-number")).json(&payload))
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_phone_number(&self, voice_id: &str) -> Result<(), ProviderError> {
        self.send(
            self.client
                .delete(self.endpoint(&format!("phone-number/{voice_id}"))),
        )
        .await?;
        Ok(())
    }

    async fn assign_assistant_to_number(
        &self,
        voice_id: &str,
        assistant_id: &str,
    ) -> Result<(), ProviderError> {
        self.patch_number(voice_id, json!({ "assistantId": assistant_id }))
            .await
    }

    async fn detach_assistant(&self, voice_id: &str) -> Result<(), ProviderError> {
        self.patch_number(voice_id, json!({ "assistantId": Value::Null }))
            .await
    }

    async fn create_assistant(
        &self,
        config: &AssistantConfig,
    ) -> Result<CreatedAssistant, ProviderError> {
        let payload = json!({
            "name": config.name,
            "firstMessage": config.first_message,
            "maxConcurrentSessions": config.max_concurrent_sessions,
            "metadata": config.metadata,
        });
        let response = self
            .send(self.client.post(self.endpoint("assistant")).json(&payload))
            .await?;
        Ok(response.json().await?)
    }

    async fn delete_assistant(&self, assistant_id: &str) -> Result<(), ProviderError> {
        self.send(
            self.client
                .delete(self.endpoint(&format!("assistant/{assistant_id}"))),
        )
        .await?;
        Ok(())
    }
}
