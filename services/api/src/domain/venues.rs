//! Venues: Foursquare proxy with a details cache

use common::cache::{CacheExt, CacheProvider};
use common::rest::{RequestData, RestError, RestProvider, RetryConfig};
use common::{Ctx, DomainError, LogBody, LogProvider, log_body};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Foursquare API version pinned on every call
pub const FOURSQUARE_API_VERSION: &str = "20210514";

/// Attempts made for each upstream read
const UPSTREAM_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Venue {
    pub id: String,
    pub name: String,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Location {
    pub address: String,
    pub cross_street: String,
    pub lat: f64,
    pub lng: f64,
    pub labeled_lat_lngs: Vec<LabeledLatLng>,
    pub distance: i64,
    pub postal_code: String,
    pub cc: String,
    pub city: String,
    pub state: String,
    pub country: String,
    pub formatted_address: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LabeledLatLng {
    pub label: String,
    pub lat: f64,
    pub lng: f64,
}

#[derive(Deserialize)]
struct SearchEnvelope {
    response: SearchResponse,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    venues: Vec<Venue>,
}

/// Foursquare endpoint and credentials
#[derive(Debug, Clone)]
pub struct FoursquareConfig {
    pub base_url: String,
    pub client_id: String,
    pub secret: String,
}

#[derive(Clone)]
pub struct VenuesService {
    logger: Arc<dyn LogProvider>,
    rest: Arc<dyn RestProvider>,
    cache: Arc<dyn CacheProvider>,
    foursquare: FoursquareConfig,
}

impl VenuesService {
    pub fn new(
        logger: Arc<dyn LogProvider>,
        rest: Arc<dyn RestProvider>,
        cache: Arc<dyn CacheProvider>,
        foursquare: FoursquareConfig,
    ) -> Self {
        Self {
            logger,
            rest,
            cache,
            foursquare,
        }
    }

    /// Venues around a coordinate
    pub async fn get_venues(
        &self,
        ctx: &Ctx,
        latitude: f64,
        longitude: f64,
    ) -> Result<Vec<Venue>, DomainError> {
        let coordinates = log_body! { "latitude" => latitude, "longitude" => longitude };
        let mut url = self.endpoint(&["venues", "search"])?;
        url.query_pairs_mut()
            .append_pair("ll", &format!("{latitude},{longitude}"));

        let response = match self.rest.get(ctx, url.as_str(), upstream_request()).await {
            Ok(response) => response,
            Err(err) => {
                self.logger.error(
                    ctx,
                    "error-retrieving-venues-from-foursquare-by-coordinates",
                    &[coordinates.clone(), failure_details(&err)],
                );
                return Err(DomainError::internal(
                    "error retrieving venues from foursquare",
                    coordinates,
                ));
            }
        };

        let envelope: SearchEnvelope = response.json().map_err(|e| {
            DomainError::internal(
                "error parsing foursquare venues as JSON",
                coordinates.with("error", e.to_string()),
            )
        })?;
        Ok(envelope.response.venues)
    }

    /// Raw details document of a venue, served from the cache when possible
    pub async fn get_venue(&self, ctx: &Ctx, venue_id: &str) -> Result<String, DomainError> {
        let key = format!("venue:{venue_id}");
        let ids = log_body! { "venue_id" => venue_id };

        match self.cache.get::<String>(ctx, &key).await {
            Ok(cached) => {
                self.logger
                    .debug(ctx, "fetching-venue-from-cache", &[ids.clone()]);
                return Ok(cached);
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => {
                self.logger.warn(
                    ctx,
                    "could-not-read-venue-from-cache",
                    &[ids.clone(), log_body! { "error" => err.to_string() }],
                );
            }
        }

        let url = self.endpoint(&["venues", venue_id])?;
        let response = match self.rest.get(ctx, url.as_str(), upstream_request()).await {
            Ok(response) => response,
            Err(err) => {
                self.logger.error(
                    ctx,
                    "error-fetching-venue-details-from-foursquare",
                    &[ids.clone(), failure_details(&err)],
                );
                return Err(DomainError::internal(
                    "error retrieving venue from foursquare",
                    ids,
                ));
            }
        };
        let venue = response.text().into_owned();

        self.logger.debug(ctx, "adding-venue-to-cache", &[ids.clone()]);
        if let Err(err) = self.cache.set(ctx, &key, &venue).await {
            self.logger.warn(
                ctx,
                "could-not-add-venue-to-cache",
                &[ids, log_body! { "error" => err.to_string() }],
            );
        }

        Ok(venue)
    }

    /// Authenticated URL below the configured base
    fn endpoint(&self, segments: &[&str]) -> Result<Url, DomainError> {
        let invalid = || {
            DomainError::internal(
                "invalid foursquare base url",
                log_body! { "base_url" => self.foursquare.base_url.as_str() },
            )
        };

        let mut url = Url::parse(&self.foursquare.base_url).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(segments);
        url.query_pairs_mut()
            .append_pair("client_id", &self.foursquare.client_id)
            .append_pair("client_secret", &self.foursquare.secret)
            .append_pair("v", FOURSQUARE_API_VERSION);
        Ok(url)
    }
}

fn upstream_request() -> RequestData {
    RequestData::new().with_retry(RetryConfig::default().with_max_attempts(UPSTREAM_ATTEMPTS))
}

/// Error text plus the upstream payload when there is one
fn failure_details(err: &RestError) -> LogBody {
    let mut body = log_body! { "error" => err.to_string() };
    if let Some(response) = err.response() {
        body.insert("payload", response.text().into_owned());
    }
    body
}
