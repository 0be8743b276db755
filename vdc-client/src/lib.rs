use std::collections::BTreeMap;

use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

pub mod panel;

pub use panel::ApiContext;

pub const DEFAULT_LOCATION: &str = "https://vdc.msg.systems";
/// Device identifier sent on login; the panel ties a session to it.
pub const DEFAULT_DEVICE_HASH: &str = "6a3f1c0d9b7e4d2a8c5f0e1b3d7a9c24";

const USER_ID_HEADER: &str = "X-Auth-UserId";
const TOKEN_HEADER: &str = "X-Auth-Token";

#[derive(Debug, Error)]
pub enum VdcError {
    #[error("Could not parse url")]
    ParseUrl(#[from] url::ParseError),
    #[error("Url can't be used as a base: {0}")]
    InvalidBase(Url),
    #[error("Request failed")]
    Request(#[from] reqwest::Error),
    #[error("Panel page has no {0} entry")]
    MissingMarker(&'static str),
    #[error("Panel page has an invalid {marker} entry")]
    InvalidValue {
        marker: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Panel page has a non-scalar {0} entry")]
    NestedValue(&'static str),
    #[error("Invalid marker pattern")]
    Pattern(#[from] regex::Error),
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url, VdcError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| VdcError::InvalidBase(base.clone()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[derive(Debug, Clone)]
pub struct VdcBuilder {
    location: Url,
    proxy: Option<Url>,
    device_hash: String,
}

impl VdcBuilder {
    pub fn new(location: Url) -> Self {
        Self {
            location,
            proxy: None,
            device_hash: DEFAULT_DEVICE_HASH.to_string(),
        }
    }

    pub fn proxy(&mut self, proxy: Url) {
        self.proxy = Some(proxy);
    }

    pub fn device_hash<S: Into<String>>(&mut self, device_hash: S) {
        self.device_hash = device_hash.into();
    }

    /// Build the client shared by every call of the session; it keeps the
    /// session cookies and routes through the proxy, if any.
    pub fn build(self) -> Result<Vdc, VdcError> {
        if self.location.cannot_be_a_base() {
            return Err(VdcError::InvalidBase(self.location));
        }

        let mut builder = Client::builder().cookie_store(true);
        builder = match self.proxy {
            Some(proxy) => {
                debug!("Using proxy {}", proxy);
                builder.proxy(reqwest::Proxy::all(proxy)?)
            }
            None => builder.no_proxy(),
        };

        Ok(Vdc {
            client: builder.build()?,
            location: self.location,
            device_hash: self.device_hash,
        })
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
    device_hash: &'a str,
    force_login: bool,
}

/// Unauthenticated handle on a vDC panel
#[derive(Debug, Clone)]
pub struct Vdc {
    client: Client,
    location: Url,
    device_hash: String,
}

impl Vdc {
    pub fn location(&self) -> &Url {
        &self.location
    }

    #[tracing::instrument(skip(self, password), fields(location = %self.location))]
    pub async fn authenticate(&self, username: &str, password: &str) -> Result<(), VdcError> {
        let url = join_segments(&self.location, &["api", "login"])?;
        self.client
            .post(url)
            .json(&LoginRequest {
                username,
                password,
                device_hash: &self.device_hash,
                force_login: true,
            })
            .send()
            .await?
            .error_for_status()?;
        debug!("Logged in");
        Ok(())
    }

    /// Fetch the panel page and scrape the api context from it. Requires a
    /// successful [`Vdc::authenticate`] on this handle.
    #[tracing::instrument(skip(self), fields(location = %self.location))]
    pub async fn discover(&self) -> Result<ApiContext, VdcError> {
        let url = join_segments(&self.location, &["Panel", ""])?;
        let html = self
            .client
            .get(url.clone())
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        let context = ApiContext::from_panel(&html, &url)?;
        debug!(?context, "Discovered api");
        Ok(context)
    }

    pub async fn login(self, username: &str, password: &str) -> Result<Session, VdcError> {
        self.authenticate(username, password).await?;
        let context = self.discover().await?;
        Ok(Session {
            client: self.client,
            context,
        })
    }
}

/// VM display name to vDC object id
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServerTable {
    ids: BTreeMap<String, String>,
}

impl ServerTable {
    pub fn lookup(&self, name: &str) -> Option<&str> {
        self.ids.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ids.keys().map(String::as_str)
    }

    fn from_listing(listing: ServerListing) -> Self {
        let mut ids = BTreeMap::new();
        for (id, server) in listing.servers {
            if let Some(existing) = ids.get(&server.name) {
                warn!(
                    "Server name {} used by both {} and {}; using {}",
                    server.name, existing, id, existing
                );
                continue;
            }
            ids.insert(server.name, id);
        }
        Self { ids }
    }
}

/// Pairs of (name, id)
impl<N: Into<String>, I: Into<String>> FromIterator<(N, I)> for ServerTable {
    fn from_iter<T: IntoIterator<Item = (N, I)>>(iter: T) -> Self {
        Self {
            ids: iter
                .into_iter()
                .map(|(n, i)| (n.into(), i.into()))
                .collect(),
        }
    }
}

#[derive(Deserialize, Debug)]
struct ServerListing {
    servers: BTreeMap<String, ServerEntry>,
}

#[derive(Deserialize, Debug)]
struct ServerEntry {
    name: String,
}

#[derive(Serialize)]
struct PowerRequest {
    power: bool,
}

/// Authenticated vDC session; only valid together with the cookies of the
/// client that discovered its api context.
#[derive(Debug, Clone)]
pub struct Session {
    client: Client,
    context: ApiContext,
}

impl Session {
    pub fn api_context(&self) -> &ApiContext {
        &self.context
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(USER_ID_HEADER, &self.context.user)
            .header(TOKEN_HEADER, &self.context.token)
    }

    #[tracing::instrument(skip(self), fields(api = %self.context.api))]
    pub async fn list_servers(&self) -> Result<ServerTable, VdcError> {
        let url = join_segments(&self.context.api, &["objects", "servers"])?;
        let listing: ServerListing = self
            .authorized(self.client.get(url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let table = ServerTable::from_listing(listing);
        debug!("Found {} servers", table.len());
        Ok(table)
    }

    #[tracing::instrument(skip(self), fields(api = %self.context.api))]
    pub async fn set_power(&self, server_id: &str, on: bool) -> Result<(), VdcError> {
        let url = join_segments(&self.context.api, &["objects", "servers", server_id, "power"])?;
        self.authorized(self.client.patch(url))
            .json(&PowerRequest { power: on })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
