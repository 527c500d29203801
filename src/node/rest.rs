//! Cliente REST de un nodo Lavalink v4.
//!
//! Sin estado: cada llamada recibe lo que necesita (p.ej. el session id).
//! Las respuestas no exitosas se convierten en [`RestError`] y nunca se
//! reintentan.

use reqwest::{header::AUTHORIZATION, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::{
    error::{RestError, Result},
    model::{GuildId, LoadResult, NodeInfo, NodeStats, Player, SessionUpdate, Track, UpdatePlayer},
    node::NodeEndpoint,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RestClient {
    http: Client,
    base: Url,
    password: String,
    trace: bool,
}

impl RestClient {
    pub fn new(endpoint: &NodeEndpoint, password: impl Into<String>, trace: bool) -> Result<Self> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("open-lavalink/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base: endpoint.http_base()?,
            password: password.into(),
            trace,
        })
    }

    /// `GET /v4/loadtracks?identifier=...`
    pub async fn load_tracks(&self, identifier: &str) -> Result<LoadResult> {
        let request = self
            .request(Method::GET, "v4/loadtracks")?
            .query(&[("identifier", identifier)]);
        self.json(request).await
    }

    /// `GET /v4/decodetrack?encodedTrack=...`
    pub async fn decode_track(&self, encoded: &str) -> Result<Track> {
        let request = self
            .request(Method::GET, "v4/decodetrack")?
            .query(&[("encodedTrack", encoded)]);
        self.json(request).await
    }

    /// `POST /v4/decodetracks`
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>> {
        let request = self.request(Method::POST, "v4/decodetracks")?.json(encoded);
        self.json(request).await
    }

    pub async fn get_players(&self, session_id: &str) -> Result<Vec<Player>> {
        let path = format!("v4/sessions/{}/players", session_id);
        self.json(self.request(Method::GET, &path)?).await
    }

    pub async fn get_player(&self, session_id: &str, guild_id: GuildId) -> Result<Player> {
        let path = format!("v4/sessions/{}/players/{}", session_id, guild_id);
        self.json(self.request(Method::GET, &path)?).await
    }

    /// `PATCH /v4/sessions/{id}/players/{guild}?noReplace=...`
    ///
    /// Crea el player remoto si no existe.
    pub async fn update_player(
        &self,
        session_id: &str,
        guild_id: GuildId,
        update: &UpdatePlayer,
        no_replace: bool,
    ) -> Result<Player> {
        update.validate()?;

        let path = format!("v4/sessions/{}/players/{}", session_id, guild_id);
        let request = self
            .request(Method::PATCH, &path)?
            .query(&[("noReplace", no_replace)])
            .json(update);
        self.json(request).await
    }

    pub async fn destroy_player(&self, session_id: &str, guild_id: GuildId) -> Result<()> {
        let path = format!("v4/sessions/{}/players/{}", session_id, guild_id);
        self.send(self.request(Method::DELETE, &path)?).await?;
        Ok(())
    }

    /// `PATCH /v4/sessions/{id}` (resuming y timeout)
    pub async fn update_session(
        &self,
        session_id: &str,
        update: &SessionUpdate,
    ) -> Result<SessionUpdate> {
        let path = format!("v4/sessions/{}", session_id);
        let request = self.request(Method::PATCH, &path)?.json(update);
        self.json(request).await
    }

    pub async fn info(&self) -> Result<NodeInfo> {
        self.json(self.request(Method::GET, "v4/info")?).await
    }

    pub async fn stats(&self) -> Result<NodeStats> {
        self.json(self.request(Method::GET, "v4/stats")?).await
    }

    /// `GET /version` (sin prefijo `/v4`), texto plano
    pub async fn version(&self) -> Result<String> {
        let response = self.send(self.request(Method::GET, "version")?).await?;
        Ok(response.text().await?.trim().to_string())
    }

    fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        let url = self.base.join(path)?;
        debug!(%method, %url, "Lavalink REST");

        Ok(self
            .http
            .request(method, url)
            .header(AUTHORIZATION, &self.password)
            .query(&[("trace", self.trace)]))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let headers = response.headers().clone();
        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str(&body).ok();

        Err(RestError {
            status,
            headers,
            body,
            error,
        }
        .into())
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        Ok(response.json().await?)
    }
}
