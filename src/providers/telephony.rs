use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, warn};

use super::{CandidateNumber, OwnedNumber, ProviderError, PurchaseReport, RejectedPurchase};
use super::TelephonyProvider;

#[derive(Debug, Clone)]
pub struct TelephonySettings {
    pub api_base: String,
    pub account_sid: Option<String>,
    pub auth_token: Option<String>,
    pub routing_app_id: Option<String>,
    pub country: String,
    pub carrier_name: String,
}

/// key: telephony-http -> carrier REST adapter
pub struct HttpTelephonyProvider {
    client: reqwest::Client,
    settings: TelephonySettings,
}

#[derive(Debug, Deserialize)]
struct AvailableNumbersResponse {
    #[serde(default)]
    available_phone_numbers: Vec<CandidateNumber>,
}

#[derive(Debug, Deserialize)]
struct IncomingNumberResponse {
    sid: String,
    phone_number: String,
}

impl HttpTelephonyProvider {
    pub fn new(settings: TelephonySettings) -> anyhow::Result<Self> {
        url::Url::parse(&settings.api_base)
            .with_context(|| format!("invalid telephony api base `{}`", settings.api_base))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build telephony client")?;
        Ok(Self { client, settings })
    }

    fn account_sid(&self) -> Result<&str, ProviderError> {
        self.settings
            .account_sid
            .as_deref()
            .ok_or_else(|| ProviderError::Unauthorized("carrier account sid not configured".into()))
    }

    fn endpoint(&self, path: &str) -> Result<String, ProviderError> {
        Ok(format!(
            "{}/Accounts/{}/{}",
            self.settings.api_base.trim_end_matches('/'),
            self.account_sid()?,
            path.trim_start_matches('/')
        ))
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.account_sid {
            Some(sid) => request.basic_auth(sid, self.settings.auth_token.as_deref()),
            None => request,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, ProviderError> {
        let response = self.auth(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ProviderError::from_status(status, body))
    }

    async fn purchase_one(&self, candidate: &CandidateNumber) -> Result<OwnedNumber, ProviderError> {
        let response = self
            .send(
                self.client
                    .post(self.endpoint("IncomingPhoneNumbers.json")?)
                    .form(&[("PhoneNumber", candidate.phone_number.as_str())]),
            )
            .await?;
        // The purchase went through even if the body is unreadable.
        let parsed = match response.json::<IncomingNumberResponse>().await {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(
                    phone_number = %candidate.phone_number,
                    %err,
                    "carrier accepted purchase but the response was unreadable; number may be owned"
                );
                return Err(ProviderError::Malformed(format!(
                    "purchase of {} accepted but response unreadable; number may be owned: {err}",
                    candidate.phone_number
                )));
            }
        };
        Ok(OwnedNumber {
            phone_number: parsed.phone_number,
            carrier_id: parsed.sid,
        })
    }
}

#[async_trait]
impl TelephonyProvider for HttpTelephonyProvider {
    fn carrier_name(&self) -> &str {
        &self.settings.carrier_name
    }

    fn missing_credentials(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.settings.account_sid.is_none() {
            missing.push("TELEPHONY_ACCOUNT_SID");
        }
        if self.settings.auth_token.is_none() {
            missing.push("TELEPHONY_AUTH_TOKEN");
        }
        missing
    }

    fn routing_app_id(&self) -> Option<&str> {
        self.settings.routing_app_id.as_deref()
    }

    async fn search_available_numbers(
        &self,
        count: u32,
        region: Option<&str>,
    ) -> Result<Vec<CandidateNumber>, ProviderError> {
        let mut query = vec![("PageSize", count.to_string()), ("VoiceEnabled", "true".into())];
        if let Some(region) = region {
            query.push(("InRegion", region.to_string()));
        }
        let path = format!("AvailablePhoneNumbers/{}/Local.json", self.settings.country);
        let response = self
            .send(self.client.get(self.endpoint(&path)?).query(&query))
            .await?;
        let parsed: AvailableNumbersResponse = response.json().await?;
        let mut candidates = parsed.available_phone_numbers;
        candidates.truncate(count as usize);
        debug!(count = candidates.len(), ?region, "carrier returned candidate numbers");
        Ok(candidates)
    }

    async fn purchase_numbers(
        &self,
        candidates: &[CandidateNumber],
    ) -> Result<PurchaseReport, ProviderError> {
        let mut report = PurchaseReport::default();
        for candidate in candidates {
            match self.purchase_one(candidate).await {
                Ok(owned) => report.owned.push(owned),
                Err(error) => {
                    warn!(
                        phone_number = %candidate.phone_number,
                        %error,
                        "carrier rejected number purchase"
                    );
                    report.rejected.push(RejectedPurchase {
                        candidate: candidate.clone(),
                        error,
                    });
                }
            }
        }
        Ok(report)
    }

    async fn release_number(&self, carrier_id: &str) -> Result<(), ProviderError> {
        let path = format!("IncomingPhoneNumbers/{carrier_id}.json");
        self.send(self.client.delete(self.endpoint(&path)?)).await?;
        Ok(())
    }

    async fn assign_to_routing_app(
        &self,
        carrier_id: &str,
        app_id: &str,
    ) -> Result<(), ProviderError> {
        let path = format!("IncomingPhoneNumbers/{carrier_id}.json");
        self.send(
            self.client
                .post(self.endpoint(&path)?)
                .form(&[("VoiceApplicationSid", app_id)]),
        )
        .await?;
        Ok(())
    }
}
