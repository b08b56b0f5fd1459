//! Virtual users.
//!
//! Each virtual user is one independent client session running in its own tokio task. It
//! moves through these states:
//!
//! ```text
//! Registering -> Authenticated -> Looping -> Stopped
//!      |                                        ^
//!      +----------------------------------------+   (registration failed)
//! ```
//!
//! While looping it selects a [`Choice`](../scenario/enum.Choice.html), executes it, then
//! sleeps before the next iteration. The scheduler ends the loop by sending
//! [`UserCommand::Exit`], which is checked after registering, between warm-up views,
//! before every iteration and at least every 500 milliseconds while sleeping. A call already in flight is never interrupted, so a user
//! can take up to the HTTP client timeout to notice it was told to stop.

use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;

use crate::client::ApiClient;
use crate::metrics::MetricRecord;
use crate::scenario::{self, ActionOutcome, Category, WeightTable};

/// Never sleep longer than this between checks for an exit command.
const MAXIMUM_SLEEP: Duration = Duration::from_millis(500);

/// Commands the scheduler sends to a running virtual user.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UserCommand {
    /// Stop before the next action.
    Exit,
}

/// Lifecycle states of a virtual user.
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum UserState {
    Registering,
    Authenticated,
    Looping,
    Stopped,
}

/// State owned by exactly one virtual user.
///
/// Movie ids discovered by this user's own listings are cached here and never shared with
/// other users.
#[derive(Debug)]
pub struct Session {
    /// Ordinal of the user, starting at 0.
    pub index: usize,
    pub email: String,
    pub username: String,
    pub password: String,
    known_movie_ids: Vec<String>,
    pub(crate) rng: StdRng,
}
impl Session {
    /// A session with unique random credentials for user `index`.
    pub fn new(index: usize) -> Session {
        Session::from_rng(index, StdRng::from_rng(&mut rand::rng()))
    }

    /// A reproducible session, for tests.
    pub fn with_seed(index: usize, seed: u64) -> Session {
        Session::from_rng(index, StdRng::seed_from_u64(seed))
    }

    fn from_rng(index: usize, mut rng: StdRng) -> Session {
        let mut suffix = || -> String {
            (0..5)
                .map(|_| rng.random_range(b'a'..=b'z') as char)
                .collect()
        };
        let email = format!("user{}_{}@test.com", index, suffix());
        let username = format!("user{}_{}", index, suffix());
        Session {
            index,
            email,
            username,
            password: "password123".to_string(),
            known_movie_ids: Vec::new(),
            rng,
        }
    }

    /// Movie ids from this user's most recent non-empty listing.
    pub fn known_movie_ids(&self) -> &[String] {
        &self.known_movie_ids
    }

    /// Replace the cached movie ids. An empty listing leaves the cache untouched.
    pub fn remember_movies(&mut self, ids: &[String]) {
        if !ids.is_empty() {
            self.known_movie_ids = ids.to_vec();
        }
    }

    /// A random cached movie id, if any is known.
    pub fn random_movie_id(&mut self) -> Option<String> {
        self.known_movie_ids.choose(&mut self.rng).cloned()
    }
}

/// How every virtual user in a load test behaves.
#[derive(Clone, Debug)]
pub struct UserSettings {
    pub category: Category,
    /// Base sleep between iterations.
    pub iteration_delay: Duration,
    /// Added to the sleep once per user ordinal, desynchronizing users.
    pub user_stagger: Duration,
    /// How many warm-up views to record after registering.
    pub warmup: usize,
    pub weights: Arc<WeightTable>,
}
impl UserSettings {
    /// Sleep between iterations for the user with this ordinal.
    pub fn iteration_delay_for(&self, index: usize) -> Duration {
        self.iteration_delay + self.user_stagger * index as u32
    }
}

/// What a virtual user did before it stopped.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct UserSummary {
    pub registered: bool,
    pub iterations: usize,
}

/// Run one virtual user until registration fails or it is told to exit.
pub(crate) async fn user_main(
    mut session: Session,
    mut client: ApiClient,
    settings: Arc<UserSettings>,
    sender: flume::Sender<MetricRecord>,
    receiver: flume::Receiver<UserCommand>,
) -> UserSummary {
    let index = session.index;
    let mut summary = UserSummary::default();
    let mut state = UserState::Registering;
    debug!("user {}: {}", index, state);

    // Registering: one attempt, no retry.
    match scenario::register(&client, &sender, &mut session).await {
        Ok(ActionOutcome::Token(token)) => {
            client.set_token(&token);
            summary.registered = true;
            state = UserState::Authenticated;
        }
        Ok(outcome) => {
            info!("user {}: registration returned {:?}, stopping", index, outcome);
        }
        Err(failure) => {
            info!("user {}: registration failed ({}), stopping", index, failure);
        }
    }
    if state != UserState::Authenticated {
        debug!("user {}: {}", index, UserState::Stopped);
        return summary;
    }
    debug!("user {}: {}", index, state);

    // Authenticated: warm up, recording views of freshly listed movies. Exit is sent
    // once, so whichever check receives it has to end the session.
    let exiting = received_exit(&receiver)
        || warm_up(&client, &sender, &mut session, &settings, &receiver).await;

    if !exiting {
        state = UserState::Looping;
        debug!("user {}: {}", index, state);
        let delay = settings.iteration_delay_for(index);
        loop {
            if received_exit(&receiver) {
                break;
            }

            match settings.weights.select(settings.category, &mut session.rng) {
                Some(choice) => {
                    trace!("user {}: {}", index, choice);
                    if let Err(failure) =
                        scenario::execute(choice, &client, &sender, &mut session).await
                    {
                        debug!("user {}: {} failed: {}", index, choice, failure);
                    }
                }
                None => debug!("user {}: nothing to do in {}", index, settings.category),
            }
            summary.iterations += 1;

            if sleep_or_exit(delay, &receiver).await {
                break;
            }
        }
    }

    state = UserState::Stopped;
    debug!(
        "user {}: {} after {} iterations",
        index, state, summary.iterations
    );
    summary
}

// Returns true if an exit command arrived while warming up.
async fn warm_up(
    client: &ApiClient,
    sender: &flume::Sender<MetricRecord>,
    session: &mut Session,
    settings: &UserSettings,
    receiver: &flume::Receiver<UserCommand>,
) -> bool {
    if settings.warmup == 0 {
        return false;
    }
    let ids = match scenario::list_movies(client, sender, session).await {
        Ok(ids) => ids,
        Err(failure) => {
            debug!("user {}: warm-up listing failed: {}", session.index, failure);
            return false;
        }
    };
    for id in ids.iter().take(settings.warmup) {
        if received_exit(receiver) {
            return true;
        }
        if let Err(failure) = scenario::record_view(client, sender, session, id).await {
            debug!("user {}: warm-up view failed: {}", session.index, failure);
        }
    }
    false
}

/// Sleep `delay` in chunks of at most 500 milliseconds, returning true as soon as an exit
/// command arrives.
async fn sleep_or_exit(delay: Duration, receiver: &flume::Receiver<UserCommand>) -> bool {
    let mut remaining = delay;
    while remaining > Duration::ZERO {
        if received_exit(receiver) {
            return true;
        }
        let chunk = remaining.min(MAXIMUM_SLEEP);
        tokio::time::sleep(chunk).await;
        remaining -= chunk;
    }
    received_exit(receiver)
}

// An exit command, or a scheduler that went away, both mean stop.
fn received_exit(receiver: &flume::Receiver<UserCommand>) -> bool {
    match receiver.try_recv() {
        Ok(UserCommand::Exit) => true,
        Err(flume::TryRecvError::Disconnected) => true,
        Err(flume::TryRecvError::Empty) => false,
    }
}
