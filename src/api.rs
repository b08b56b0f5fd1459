//! The table of target API endpoints exercised by virtual users.
//!
//! Every call a [`VirtualUser`](../user/index.html) makes is looked up here: the HTTP
//! method, the path template, the scenario the call is tagged with in its metric record,
//! and the status codes that count as success. The table is plain data so a load test can
//! be pointed at a mock server or a differently shaped deployment without touching the
//! action logic.
//!
//! # Example
//! ```rust
//! use marquee::api::{ApiTable, Endpoint};
//!
//! let api = ApiTable::default().expect_status(Endpoint::Register, &[200, 201]);
//! assert!(api.spec(Endpoint::Register).accepts(200));
//! assert_eq!(api.spec(Endpoint::GetMovie).path, "/movies/:id");
//! ```

use http::Method;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::scenario::Category;

/// Every endpoint of the target API that an action can call.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Endpoint {
    /// Create an account, returning an auth token.
    Register,
    /// Fetch the authenticated user's own profile.
    Profile,
    /// Paginated movie listing.
    ListMovies,
    /// One movie by id.
    GetMovie,
    /// Full-text movie search.
    SearchMovies,
    /// Movies filtered by genre.
    MoviesByGenre,
    /// Personalized recommendations.
    Recommendations,
    /// Movies similar to a given movie.
    SimilarMovies,
    /// Record a view, like, rating, watchlist addition or purchase.
    RecordInteraction,
    /// List the user's own interactions.
    ListInteractions,
    /// List the user's watchlist.
    Watchlist,
    /// List the user's purchases.
    Purchases,
}

/// How one endpoint is called and judged.
#[derive(Clone, Debug, PartialEq)]
pub struct EndpointSpec {
    /// Scenario tag written into metric records for this endpoint.
    pub scenario: Category,
    pub method: Method,
    /// Path template relative to the API base, with `:name` placeholders.
    pub path: String,
    /// Status codes that count as success.
    pub expected_status: Vec<u16>,
}
impl EndpointSpec {
    pub fn new(scenario: Category, method: Method, path: &str, expected_status: &[u16]) -> Self {
        EndpointSpec {
            scenario,
            method,
            path: path.to_string(),
            expected_status: expected_status.to_vec(),
        }
    }

    /// Returns true if the status code is one this endpoint is expected to return.
    pub fn accepts(&self, status_code: u16) -> bool {
        self.expected_status.contains(&status_code)
    }

    /// Substitute `:name` placeholders in the path template with the matching parameter.
    ///
    /// Placeholders without a matching parameter are left untouched.
    pub fn resolve(&self, params: &[(&str, &str)]) -> String {
        self.path
            .split('/')
            .map(|segment| match segment.strip_prefix(':') {
                Some(name) => params
                    .iter()
                    .find(|(key, _)| *key == name)
                    .map(|(_, value)| *value)
                    .unwrap_or(segment),
                None => segment,
            })
            .collect::<Vec<&str>>()
            .join("/")
    }
}

/// Injectable table mapping every [`Endpoint`] to its [`EndpointSpec`].
///
/// The table always holds a spec for every endpoint; individual entries can only be
/// replaced, never removed.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiTable {
    endpoints: Vec<EndpointSpec>,
}
impl Default for ApiTable {
    fn default() -> Self {
        let endpoints = Endpoint::iter().map(default_spec).collect();
        ApiTable { endpoints }
    }
}
impl ApiTable {
    /// The spec used for an endpoint.
    pub fn spec(&self, endpoint: Endpoint) -> &EndpointSpec {
        &self.endpoints[endpoint as usize]
    }

    /// Replace the spec for an endpoint.
    pub fn set(mut self, endpoint: Endpoint, spec: EndpointSpec) -> Self {
        self.endpoints[endpoint as usize] = spec;
        self
    }

    /// Replace only the accepted status codes for an endpoint.
    pub fn expect_status(mut self, endpoint: Endpoint, expected_status: &[u16]) -> Self {
        self.endpoints[endpoint as usize].expected_status = expected_status.to_vec();
        self
    }

    /// Iterate over all endpoints and their specs.
    pub fn iter(&self) -> impl Iterator<Item = (Endpoint, &EndpointSpec)> {
        Endpoint::iter().zip(self.endpoints.iter())
    }
}

fn default_spec(endpoint: Endpoint) -> EndpointSpec {
    use Category::*;
    match endpoint {
        Endpoint::Register => EndpointSpec::new(Auth, Method::POST, "/auth/register", &[201]),
        Endpoint::Profile => EndpointSpec::new(Auth, Method::GET, "/auth/me", &[200]),
        Endpoint::ListMovies => EndpointSpec::new(Movies, Method::GET, "/movies", &[200]),
        Endpoint::GetMovie => EndpointSpec::new(Movies, Method::GET, "/movies/:id", &[200]),
        Endpoint::SearchMovies => {
            EndpointSpec::new(Movies, Method::GET, "/movies/search", &[200])
        }
        Endpoint::MoviesByGenre => {
            EndpointSpec::new(Movies, Method::GET, "/movies/genre/:genre", &[200])
        }
        Endpoint::Recommendations => {
            EndpointSpec::new(Recommendations, Method::GET, "/recommendations", &[200])
        }
        Endpoint::SimilarMovies => EndpointSpec::new(
            Recommendations,
            Method::GET,
            "/recommendations/similar/:id",
            &[200],
        ),
        Endpoint::RecordInteraction => {
            EndpointSpec::new(Interactions, Method::POST, "/interactions", &[200, 201])
        }
        Endpoint::ListInteractions => {
            EndpointSpec::new(Interactions, Method::GET, "/interactions", &[200])
        }
        Endpoint::Watchlist => {
            EndpointSpec::new(Interactions, Method::GET, "/watchlist", &[200])
        }
        Endpoint::Purchases => {
            EndpointSpec::new(Interactions, Method::GET, "/purchases", &[200])
        }
    }
}
