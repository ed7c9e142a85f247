//! REST client for the bot server's `/api/v1` surface.

use std::time::Duration;

use async_trait::async_trait;
use botdash_core::{
    AllPrices, BotConfig, BotId, BotState, CurrencyPairs, LiquidityResponse, ManualTradeArgs,
    PriceMap, VenueKind,
};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{BotApi, Session, TransportError, TransportErrorKind, TransportResult};

/// Configuration for the REST client.
#[derive(Clone, Debug)]
pub struct HttpApiConfig {
    /// Base URL including the API prefix, e.g. `http://host:6900/api/v1`.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for HttpApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://deadhorse.net:6900/api/v1".into(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// A thin wrapper over the bot server REST API.
pub struct HttpBotApi {
    http: Client,
    config: HttpApiConfig,
    session: Session,
}

impl HttpBotApi {
    pub fn new(config: HttpApiConfig, session: Session) -> TransportResult<Self> {
        let http = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Other))?;
        Ok(Self {
            http,
            config,
            session,
        })
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let mut request = self.http.request(method, self.url(path));
        if let Some(token) = self.session.token() {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        request
    }

    async fn send(&self, request: RequestBuilder) -> TransportResult<Response> {
        let resp = request
            .send()
            .await
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Transport))?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %resp.url(), "session rejected by server, logging out");
            self.session.logout();
            return Err(TransportError::Unauthorized(format!(
                "{} rejected the session credential",
                resp.url().path()
            )));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn get_json<T>(&self, path: &str) -> TransportResult<T>
    where
        T: DeserializeOwned,
    {
        debug!(path, "GET");
        self.send(self.request(Method::GET, path))
            .await?
            .json::<T>()
            .await
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Serialization))
    }

    async fn post(&self, path: &str, body: Option<&Value>) -> TransportResult<Response> {
        debug!(path, "POST");
        let mut request = self.request(Method::POST, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }
}

/// `null` bodies decode to the type's default, mirroring `response.data || {}`.
fn or_default<T: Default>(value: Option<T>) -> T {
    value.unwrap_or_default()
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn list_bots(&self) -> TransportResult<Vec<BotId>> {
        self.get_json::<Option<Vec<BotId>>>("/bots")
            .await
            .map(or_default)
    }

    async fn bot_state(&self, bot_id: &str) -> TransportResult<BotState> {
        self.get_json(&format!("/bots/{bot_id}/state")).await
    }

    async fn bot_config(&self, bot_id: &str) -> TransportResult<BotConfig> {
        self.get_json(&format!("/bots/{bot_id}/config")).await
    }

    async fn liquidity(
        &self,
        bot_id: &str,
        venue: VenueKind,
    ) -> TransportResult<LiquidityResponse> {
        self.get_json(&format!("/bots/{bot_id}/liquidities/{}", venue.as_path()))
            .await
    }

    async fn prices(&self, bot_id: &str, venue: VenueKind) -> TransportResult<PriceMap> {
        self.get_json::<Option<PriceMap>>(&format!("/bots/{bot_id}/prices/{}", venue.as_path()))
            .await
            .map(or_default)
    }

    async fn all_prices(&self, bot_id: &str) -> TransportResult<AllPrices> {
        self.get_json(&format!("/bots/{bot_id}/prices")).await
    }

    async fn currency_pairs(&self, bot_id: &str) -> TransportResult<CurrencyPairs> {
        self.get_json::<Option<CurrencyPairs>>(&format!("/bots/{bot_id}/currencyPairs"))
            .await
            .map(or_default)
    }

    async fn pause(&self, bot_id: &str) -> TransportResult<()> {
        self.post(&format!("/bots/{bot_id}/pause"), None).await?;
        Ok(())
    }

    async fn resume(&self, bot_id: &str) -> TransportResult<()> {
        self.post(&format!("/bots/{bot_id}/resume"), None).await?;
        Ok(())
    }

    async fn manual_trade(&self, bot_id: &str, args: &ManualTradeArgs) -> TransportResult<Value> {
        let body = serde_json::to_value(args)
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Serialization))?;
        let resp = self
            .post(&format!("/bots/{bot_id}/manualTrade"), Some(&body))
            .await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Transport))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&bytes)
            .map_err(|err| TransportError::from_display(err, TransportErrorKind::Serialization))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_duplicate_slashes() {
        let api = HttpBotApi::new(
            HttpApiConfig {
                base_url: "http://localhost:6900/api/v1/".into(),
                ..HttpApiConfig::default()
            },
            Session::default(),
        )
        .expect("client");
        assert_eq!(api.url("/bots"), "http://localhost:6900/api/v1/bots");
        assert_eq!(
            api.url("bots/bot1/state"),
            "http://localhost:6900/api/v1/bots/bot1/state"
        );
    }
}
