//! Scenario categories and the actions virtual users choose between.
//!
//! A virtual user is configured with one [`Category`]. On every loop iteration it asks the
//! [`WeightTable`] to [`select`](WeightTable::select) a [`Choice`] from that category, then
//! [`execute`]s it. Choices are plain data, so the weights can be inspected and tuned
//! without touching the code that performs the calls.
//!
//! Every HTTP call made while executing a choice emits exactly one
//! [`MetricRecord`](../metrics/struct.MetricRecord.html). Some choices make two calls, for
//! example listing movies before fetching one of them, and so emit two records.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

use crate::api::Endpoint;
use crate::client::{ApiClient, Call};
use crate::metrics::{self, MetricRecord};
use crate::user::Session;

const SEARCH_TERMS: [&str; 8] = [
    "action", "comedy", "drama", "the", "love", "dark", "war", "hero",
];
const GENRES: [&str; 7] = [
    "Action", "Comedy", "Drama", "Horror", "Sci-Fi", "Romance", "Thriller",
];
const FIRST_NAMES: [&str; 8] = [
    "Ada", "Grace", "Alan", "Linus", "Margaret", "Dennis", "Barbara", "Ken",
];
const LAST_NAMES: [&str; 8] = [
    "Lovelace", "Hopper", "Turing", "Torvalds", "Hamilton", "Ritchie", "Liskov", "Thompson",
];

/// A named group of related actions.
#[derive(
    Clone, Copy, Debug, Display, EnumIter, EnumString, Eq, Hash, Ord, PartialEq, PartialOrd,
)]
#[strum(serialize_all = "lowercase")]
pub enum Category {
    Auth,
    Movies,
    Interactions,
    Recommendations,
    /// Picks one of the other categories at random on every iteration.
    All,
}

/// One action a virtual user can take in a loop iteration.
#[derive(Clone, Copy, Debug, Display, EnumIter, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Choice {
    FetchProfile,
    /// List movies, then fetch one of them by id.
    BrowseMovies,
    SearchMovies,
    FilterByGenre,
    /// Fetch a movie this user has seen before, or list movies if none is known.
    RevisitMovie,
    RecordView,
    Like,
    Rate,
    AddToWatchlist,
    Purchase,
    ListInteractions,
    ListWatchlist,
    ListPurchases,
    UserBased,
    ItemBased,
    Hybrid,
    /// Movies similar to a known one, falling back to hybrid recommendations.
    SimilarMovies,
}
impl Choice {
    /// The category this choice belongs to.
    pub fn category(self) -> Category {
        use Choice::*;
        match self {
            FetchProfile => Category::Auth,
            BrowseMovies | SearchMovies | FilterByGenre | RevisitMovie => Category::Movies,
            RecordView | Like | Rate | AddToWatchlist | Purchase | ListInteractions
            | ListWatchlist | ListPurchases => Category::Interactions,
            UserBased | ItemBased | Hybrid | SimilarMovies => Category::Recommendations,
        }
    }
}

/// Relative weights of categories and of the choices within each category.
///
/// By default every weight is 1, giving a uniform choice.
#[derive(Clone, Debug, PartialEq)]
pub struct WeightTable {
    categories: Vec<(Category, usize)>,
    choices: BTreeMap<Category, Vec<(Choice, usize)>>,
}
impl Default for WeightTable {
    fn default() -> Self {
        let categories = Category::iter()
            .filter(|c| *c != Category::All)
            .map(|c| (c, 1))
            .collect();
        let mut choices: BTreeMap<Category, Vec<(Choice, usize)>> = BTreeMap::new();
        for choice in Choice::iter() {
            choices.entry(choice.category()).or_default().push((choice, 1));
        }
        WeightTable {
            categories,
            choices,
        }
    }
}
impl WeightTable {
    /// Set the weight of one choice within its category. A weight of 0 disables it.
    pub fn set_choice_weight(mut self, choice: Choice, weight: usize) -> Self {
        if let Some(entries) = self.choices.get_mut(&choice.category()) {
            for entry in entries.iter_mut().filter(|(c, _)| *c == choice) {
                entry.1 = weight;
            }
        }
        self
    }

    /// Set how often `all` picks a category. A weight of 0 disables it.
    pub fn set_category_weight(mut self, category: Category, weight: usize) -> Self {
        for entry in self.categories.iter_mut().filter(|(c, _)| *c == category) {
            entry.1 = weight;
        }
        self
    }

    /// Weight of a choice within its category.
    pub fn choice_weight(&self, choice: Choice) -> usize {
        self.choices
            .get(&choice.category())
            .and_then(|entries| entries.iter().find(|(c, _)| *c == choice))
            .map(|(_, weight)| *weight)
            .unwrap_or(0)
    }

    /// Pick the next choice for a category.
    ///
    /// `all` first picks one of the other categories by weight. Returns `None` only if
    /// every weight that could apply is 0.
    pub fn select<R: Rng + ?Sized>(&self, category: Category, rng: &mut R) -> Option<Choice> {
        let category = match category {
            Category::All => pick_weighted(&self.categories, rng)?,
            category => category,
        };
        pick_weighted(self.choices.get(&category)?, rng)
    }
}

fn pick_weighted<T: Copy, R: Rng + ?Sized>(entries: &[(T, usize)], rng: &mut R) -> Option<T> {
    let total: usize = entries.iter().map(|(_, weight)| *weight).sum();
    if total == 0 {
        return None;
    }
    let mut draw = rng.random_range(0..total);
    for (item, weight) in entries {
        if draw < *weight {
            return Some(*item);
        }
        draw -= weight;
    }
    None
}

/// What a successful action produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionOutcome {
    /// Registration returned an auth token.
    Token(String),
    /// A listing returned these movie ids, possibly none.
    MovieIds(Vec<String>),
    /// The action completed and returns nothing of interest.
    Completed,
}

/// Why an action failed. The failure has already been recorded.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionFailure {
    /// The server was never reached, or the response couldn't be read.
    Transport(String),
    /// The server answered with a status code the endpoint doesn't expect.
    UnexpectedStatus(u16),
    /// The response body didn't hold what the action needed.
    InvalidPayload(String),
    /// The action needs a movie id and none could be discovered.
    NoMovieAvailable,
}
impl fmt::Display for ActionFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ActionFailure::Transport(message) => write!(f, "transport error: {}", message),
            ActionFailure::UnexpectedStatus(status) => write!(f, "unexpected status {}", status),
            ActionFailure::InvalidPayload(detail) => write!(f, "invalid payload: {}", detail),
            ActionFailure::NoMovieAvailable => write!(f, "no movie id available"),
        }
    }
}

#[derive(Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Deserialize)]
struct MoviesResponse {
    movies: Vec<MovieSummary>,
}

#[derive(Deserialize)]
struct MovieSummary {
    #[serde(rename = "_id")]
    id: String,
}

/// Interaction kinds accepted by `POST /interactions`.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
#[strum(serialize_all = "lowercase")]
enum InteractionKind {
    View,
    Like,
    Rating,
    Watchlist,
    Purchase,
}

// Probe one call and hand its record to the aggregator.
async fn call(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    call: Call,
) -> Result<Vec<u8>, ActionFailure> {
    let probe = client.probe(&call).await;
    metrics::emit(sender, probe.record).await;
    probe.result
}

/// Register a new account with credentials derived from the session, returning its token.
///
/// A response without a token is an [`ActionFailure::InvalidPayload`]; its record still
/// reflects only what the server answered.
pub async fn register(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<ActionOutcome, ActionFailure> {
    let first_name = FIRST_NAMES.choose(&mut session.rng).copied().unwrap_or("Load");
    let last_name = LAST_NAMES.choose(&mut session.rng).copied().unwrap_or("Tester");
    let body = json!({
        "email": session.email,
        "password": session.password,
        "username": session.username,
        "firstName": first_name,
        "lastName": last_name,
    });
    let payload = call(client, sender, Call::new(Endpoint::Register).json(body)).await?;
    let response: AuthResponse = serde_json::from_slice(&payload)
        .map_err(|e| ActionFailure::InvalidPayload(e.to_string()))?;
    if response.token.is_empty() {
        return Err(ActionFailure::InvalidPayload("empty token".to_string()));
    }
    Ok(ActionOutcome::Token(response.token))
}

/// List a random page of movies, remembering the ids in the session.
pub async fn list_movies(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<Vec<String>, ActionFailure> {
    let limit = session.rng.random_range(20..=50);
    let skip = session.rng.random_range(0..=100);
    let payload = call(
        client,
        sender,
        Call::new(Endpoint::ListMovies)
            .query("limit", limit)
            .query("skip", skip),
    )
    .await?;
    let response: MoviesResponse = serde_json::from_slice(&payload)
        .map_err(|e| ActionFailure::InvalidPayload(e.to_string()))?;
    let ids: Vec<String> = response.movies.into_iter().map(|m| m.id).collect();
    session.remember_movies(&ids);
    Ok(ids)
}

/// Record that the user viewed a movie.
pub async fn record_view(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
    movie_id: &str,
) -> Result<ActionOutcome, ActionFailure> {
    interact(client, sender, session, movie_id, InteractionKind::View).await
}

async fn interact(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
    movie_id: &str,
    kind: InteractionKind,
) -> Result<ActionOutcome, ActionFailure> {
    let body = match kind {
        InteractionKind::Rating => json!({
            "movieId": movie_id,
            "type": kind.to_string(),
            "rating": session.rng.random_range(1..=10),
        }),
        _ => json!({ "movieId": movie_id, "type": kind.to_string() }),
    };
    call(client, sender, Call::new(Endpoint::RecordInteraction).json(body)).await?;
    Ok(ActionOutcome::Completed)
}

async fn get(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    request: Call,
) -> Result<ActionOutcome, ActionFailure> {
    call(client, sender, request).await?;
    Ok(ActionOutcome::Completed)
}

async fn get_movie(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    movie_id: &str,
) -> Result<ActionOutcome, ActionFailure> {
    get(client, sender, Call::new(Endpoint::GetMovie).param("id", movie_id)).await
}

async fn recommendations(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
    strategy: &str,
) -> Result<ActionOutcome, ActionFailure> {
    let limit = session.rng.random_range(5..=20);
    let request = Call::new(Endpoint::Recommendations)
        .query("strategy", strategy)
        .query("limit", limit);
    get(client, sender, request).await
}

/// Perform one choice on behalf of a virtual user.
///
/// Interaction choices need a movie to act on: if the session knows none, one listing
/// call is made first, and if it fails or is empty the iteration ends there.
pub async fn execute(
    choice: Choice,
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<ActionOutcome, ActionFailure> {
    match choice.category() {
        Category::Auth => get(client, sender, Call::new(Endpoint::Profile)).await,
        Category::Movies => execute_movies(choice, client, sender, session).await,
        Category::Interactions => execute_interactions(choice, client, sender, session).await,
        Category::Recommendations => {
            execute_recommendations(choice, client, sender, session).await
        }
        Category::All => Ok(ActionOutcome::Completed),
    }
}

async fn execute_movies(
    choice: Choice,
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<ActionOutcome, ActionFailure> {
    match choice {
        Choice::BrowseMovies => {
            let ids = list_movies(client, sender, session).await?;
            if let Some(id) = ids.choose(&mut session.rng) {
                get_movie(client, sender, id).await?;
            }
            Ok(ActionOutcome::MovieIds(ids))
        }
        Choice::SearchMovies => {
            let term = SEARCH_TERMS.choose(&mut session.rng).copied().unwrap_or("the");
            let request = Call::new(Endpoint::SearchMovies)
                .query("q", term)
                .query("limit", 20);
            get(client, sender, request).await
        }
        Choice::FilterByGenre => {
            let genre = GENRES.choose(&mut session.rng).copied().unwrap_or("Drama");
            let request = Call::new(Endpoint::MoviesByGenre)
                .param("genre", genre)
                .query("limit", 20);
            get(client, sender, request).await
        }
        _ => match session.random_movie_id() {
            Some(id) => get_movie(client, sender, &id).await,
            None => Ok(ActionOutcome::MovieIds(
                list_movies(client, sender, session).await?,
            )),
        },
    }
}

async fn execute_interactions(
    choice: Choice,
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<ActionOutcome, ActionFailure> {
    let movie_id = match session.random_movie_id() {
        Some(id) => id,
        None => list_movies(client, sender, session)
            .await?
            .into_iter()
            .next()
            .ok_or(ActionFailure::NoMovieAvailable)?,
    };

    let kind = match choice {
        Choice::RecordView => InteractionKind::View,
        Choice::Like => InteractionKind::Like,
        Choice::Rate => InteractionKind::Rating,
        Choice::AddToWatchlist => InteractionKind::Watchlist,
        Choice::Purchase => InteractionKind::Purchase,
        Choice::ListWatchlist => return get(client, sender, Call::new(Endpoint::Watchlist)).await,
        Choice::ListPurchases => return get(client, sender, Call::new(Endpoint::Purchases)).await,
        _ => return get(client, sender, Call::new(Endpoint::ListInteractions)).await,
    };
    interact(client, sender, session, &movie_id, kind).await
}

async fn execute_recommendations(
    choice: Choice,
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
) -> Result<ActionOutcome, ActionFailure> {
    match choice {
        Choice::UserBased => recommendations(client, sender, session, "user-based").await,
        Choice::ItemBased => recommendations(client, sender, session, "item-based").await,
        Choice::SimilarMovies => match session.random_movie_id() {
            Some(id) => {
                let limit = session.rng.random_range(5..=15);
                let request = Call::new(Endpoint::SimilarMovies)
                    .param("id", &id)
                    .query("limit", limit);
                get(client, sender, request).await
            }
            None => recommendations(client, sender, session, "hybrid").await,
        },
        _ => recommendations(client, sender, session, "hybrid").await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiTable;
    use httpmock::{Method::GET, Method::POST, MockServer};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(server: &MockServer) -> ApiClient {
        ApiClient::new(
            &server.base_url(),
            Duration::from_secs(5),
            Arc::new(ApiTable::default()),
        )
        .unwrap()
    }

    fn drain(receiver: &flume::Receiver<MetricRecord>) -> Vec<MetricRecord> {
        receiver.try_iter().collect()
    }

    #[test]
    fn category_names() {
        assert_eq!(Category::from_str("auth").unwrap(), Category::Auth);
        assert_eq!(
            Category::from_str("recommendations").unwrap(),
            Category::Recommendations
        );
        assert_eq!(Category::Interactions.to_string(), "interactions");
        assert!(Category::from_str("everything").is_err());
    }

    #[test]
    fn default_weights_cover_every_choice() {
        let weights = WeightTable::default();
        for choice in Choice::iter() {
            assert_eq!(weights.choice_weight(choice), 1, "{}", choice);
        }
    }

    #[test]
    fn select_stays_in_category() {
        let weights = WeightTable::default();
        let mut rng = StdRng::seed_from_u64(7);
        for category in [
            Category::Auth,
            Category::Movies,
            Category::Interactions,
            Category::Recommendations,
        ] {
            for _ in 0..200 {
                let choice = weights.select(category, &mut rng).unwrap();
                assert_eq!(choice.category(), category);
            }
        }
        // Auth has a single choice.
        assert_eq!(
            weights.select(Category::Auth, &mut rng),
            Some(Choice::FetchProfile)
        );
    }

    #[test]
    fn all_reaches_every_category() {
        let weights = WeightTable::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut seen: HashMap<Category, usize> = HashMap::new();
        for _ in 0..4_000 {
            let choice = weights.select(Category::All, &mut rng).unwrap();
            *seen.entry(choice.category()).or_insert(0) += 1;
        }
        assert_eq!(seen.len(), 4);
        // Roughly uniform: each category close to a quarter of the draws.
        for count in seen.values() {
            assert!(*count > 800 && *count < 1_200, "{:?}", seen);
        }
    }

    #[test]
    fn weights_are_honored() {
        let weights = WeightTable::default()
            .set_choice_weight(Choice::BrowseMovies, 0)
            .set_choice_weight(Choice::SearchMovies, 0)
            .set_choice_weight(Choice::RevisitMovie, 0);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            assert_eq!(
                weights.select(Category::Movies, &mut rng),
                Some(Choice::FilterByGenre)
            );
        }

        let weights = weights.set_choice_weight(Choice::FilterByGenre, 0);
        assert_eq!(weights.select(Category::Movies, &mut rng), None);

        let weights = WeightTable::default()
            .set_category_weight(Category::Auth, 0)
            .set_category_weight(Category::Movies, 0)
            .set_category_weight(Category::Interactions, 0);
        for _ in 0..100 {
            let choice = weights.select(Category::All, &mut rng).unwrap();
            assert_eq!(choice.category(), Category::Recommendations);
        }
    }

    #[tokio::test]
    async fn register_extracts_token() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/register");
                then.status(201)
                    .json_body(json!({"token": "abc", "user": {"_id": "u1"}}));
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(3, 9);

        let outcome = register(&client(&server), &sender, &mut session).await;
        mock.assert_async().await;
        assert_eq!(outcome, Ok(ActionOutcome::Token("abc".to_string())));
        let records = drain(&receiver);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].scenario, "auth");
        assert_eq!(records[0].endpoint, "/auth/register");
        assert_eq!(records[0].status_code, 201);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn register_without_token_is_invalid() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/auth/register");
                then.status(201).body("{}");
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 1);

        let outcome = register(&client(&server), &sender, &mut session).await;
        assert!(matches!(outcome, Err(ActionFailure::InvalidPayload(_))));
        assert_eq!(drain(&receiver).len(), 1);
    }

    #[tokio::test]
    async fn browse_lists_then_fetches() {
        let server = MockServer::start_async().await;
        let list = server
            .mock_async(|when, then| {
                when.method(GET).path("/movies");
                then.status(200)
                    .json_body(json!({"movies": [{"_id": "m1"}, {"_id": "m2"}]}));
            })
            .await;
        let fetch_first = server
            .mock_async(|when, then| {
                when.method(GET).path("/movies/m1");
                then.status(200).json_body(json!({"movie": {"_id": "m1"}}));
            })
            .await;
        let fetch_second = server
            .mock_async(|when, then| {
                when.method(GET).path("/movies/m2");
                then.status(200).json_body(json!({"movie": {"_id": "m2"}}));
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 5);

        let outcome = execute(
            Choice::BrowseMovies,
            &client(&server),
            &sender,
            &mut session,
        )
        .await;
        assert_eq!(
            outcome,
            Ok(ActionOutcome::MovieIds(vec!["m1".to_string(), "m2".to_string()]))
        );
        assert_eq!(list.hits_async().await, 1);
        assert_eq!(
            fetch_first.hits_async().await + fetch_second.hits_async().await,
            1
        );
        assert_eq!(session.known_movie_ids(), &["m1".to_string(), "m2".to_string()]);

        let records = drain(&receiver);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint, "/movies");
        assert_eq!(records[1].endpoint, "/movies/:id");
    }

    #[tokio::test]
    async fn interaction_discovers_movie_first() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/movies");
                then.status(200).json_body(json!({"movies": [{"_id": "m9"}]}));
            })
            .await;
        let like = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/interactions")
                    .json_body(json!({"movieId": "m9", "type": "like"}));
                then.status(201);
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 5);

        let outcome = execute(Choice::Like, &client(&server), &sender, &mut session).await;
        assert_eq!(outcome, Ok(ActionOutcome::Completed));
        like.assert_async().await;
        let records = drain(&receiver);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].scenario, "movies");
        assert_eq!(records[1].scenario, "interactions");
        assert!(records.iter().all(|r| r.success));

        // The movie is now known, so no further listing is needed.
        let outcome = execute(Choice::Like, &client(&server), &sender, &mut session).await;
        assert_eq!(outcome, Ok(ActionOutcome::Completed));
        assert_eq!(drain(&receiver).len(), 1);
    }

    #[tokio::test]
    async fn interaction_without_movies_stops_after_listing() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/movies");
                then.status(200).json_body(json!({"movies": []}));
            })
            .await;
        let interactions = server
            .mock_async(|when, then| {
                when.path("/interactions");
                then.status(200);
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 5);

        let outcome = execute(Choice::Rate, &client(&server), &sender, &mut session).await;
        assert_eq!(outcome, Err(ActionFailure::NoMovieAvailable));
        assert_eq!(interactions.hits_async().await, 0);
        assert_eq!(drain(&receiver).len(), 1);
    }

    #[tokio::test]
    async fn similar_falls_back_to_hybrid() {
        let server = MockServer::start_async().await;
        let hybrid = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/recommendations")
                    .query_param("strategy", "hybrid");
                then.status(200).json_body(json!({"recommendations": []}));
            })
            .await;
        let similar = server
            .mock_async(|when, then| {
                when.method(GET).path("/recommendations/similar/m3");
                then.status(200).json_body(json!({"movies": []}));
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 5);

        execute(Choice::SimilarMovies, &client(&server), &sender, &mut session)
            .await
            .unwrap();
        assert_eq!(hybrid.hits_async().await, 1);
        assert_eq!(similar.hits_async().await, 0);

        session.remember_movies(&["m3".to_string()]);
        execute(Choice::SimilarMovies, &client(&server), &sender, &mut session)
            .await
            .unwrap();
        assert_eq!(similar.hits_async().await, 1);

        let records = drain(&receiver);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].endpoint, "/recommendations");
        assert_eq!(records[1].endpoint, "/recommendations/similar/:id");
    }

    #[tokio::test]
    async fn failed_call_still_records() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/auth/me");
                then.status(401);
            })
            .await;
        let (sender, receiver) = flume::bounded(10);
        let mut session = Session::with_seed(0, 5);

        let outcome = execute(
            Choice::FetchProfile,
            &client(&server),
            &sender,
            &mut session,
        )
        .await;
        assert_eq!(outcome, Err(ActionFailure::UnexpectedStatus(401)));
        let records = drain(&receiver);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status_code, 401);
        assert!(!records[0].success);
        assert!(records[0].error.is_empty());
    }
}
