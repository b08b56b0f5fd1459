use gumdrop::Options;
use httpmock::{Method::GET, Method::POST, Mock, MockServer};
use serde_json::json;

use marquee::config::LoadTestConfiguration;
use marquee::metrics::LoadTestMetrics;
use marquee::LoadTest;

/// Not all functions are used by all tests, so we enable allow(dead_code) to avoid
/// compiler warnings during testing.

/// The following options are configured by default, if not set to a custom value:
///  --host <mock-server>
///  --base-path /
///  --users 1
///  --ramp-up 0
///  --run-time 1
///  --iteration-delay 50
pub fn build_configuration(server: &MockServer, custom: Vec<&str>) -> LoadTestConfiguration {
    // Start with an empty configuration.
    let mut configuration: Vec<&str> = vec![];
    // Declare server_url here no matter what, so its lifetime is sufficient when needed.
    let server_url = server.base_url();

    // Merge in all custom options first.
    configuration.extend_from_slice(&custom);

    // Default to using mock server if not otherwise configured.
    if !configuration.contains(&"--host") {
        configuration.extend_from_slice(&["--host", &server_url]);
    }

    // Mock endpoints are mounted at the root.
    if !configuration.contains(&"--base-path") {
        configuration.extend_from_slice(&["--base-path", "/"]);
    }

    // Default to testing with 1 user if not otherwise configured.
    if !configuration.contains(&"--users") {
        configuration.extend_from_slice(&["--users", "1"]);
    }

    // Default to launching every user at once if not otherwise configured.
    if !configuration.contains(&"--ramp-up") {
        configuration.extend_from_slice(&["--ramp-up", "0"]);
    }

    // Default to running for 1 second if not otherwise configured.
    if !configuration.contains(&"--run-time") {
        configuration.extend_from_slice(&["--run-time", "1"]);
    }

    // Default to a short pause between actions if not otherwise configured.
    if !configuration.contains(&"--iteration-delay") {
        configuration.extend_from_slice(&["--iteration-delay", "50"]);
    }

    // Parse these options to generate a LoadTestConfiguration.
    LoadTestConfiguration::parse_args_default(&configuration)
        .expect("failed to parse options and generate a configuration")
}

/// A results directory unique to one test.
#[allow(dead_code)]
pub fn results_dir(test: &str) -> String {
    std::env::temp_dir()
        .join(format!("marquee-{}-{}", test, std::process::id()))
        .to_string_lossy()
        .to_string()
}

/// Mock every endpoint the default API table calls, with a movie catalog of two movies.
#[allow(dead_code)]
pub fn setup_mock_server_endpoints(server: &MockServer) -> Vec<Mock> {
    vec![
        server.mock(|when, then| {
            when.method(POST).path("/auth/register");
            then.status(201)
                .json_body(json!({"token": "load-test-token", "user": {"_id": "u1"}}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/auth/me");
            then.status(200).json_body(json!({"user": {"_id": "u1"}}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/movies");
            then.status(200)
                .json_body(json!({"movies": [{"_id": "m1"}, {"_id": "m2"}]}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/movies/m1");
            then.status(200).json_body(json!({"movie": {"_id": "m1"}}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/movies/m2");
            then.status(200).json_body(json!({"movie": {"_id": "m2"}}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/movies/search");
            then.status(200).json_body(json!({"movies": []}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/recommendations");
            then.status(200).json_body(json!({"recommendations": []}));
        }),
        server.mock(|when, then| {
            when.method(POST).path("/interactions");
            then.status(201);
        }),
        server.mock(|when, then| {
            when.method(GET).path("/interactions");
            then.status(200).json_body(json!({"interactions": []}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/watchlist");
            then.status(200).json_body(json!({"watchlist": []}));
        }),
        server.mock(|when, then| {
            when.method(GET).path("/purchases");
            then.status(200).json_body(json!({"purchases": []}));
        }),
    ]
}

/// Run the load test, returning its metrics.
pub fn run_load_test(load_test: LoadTest) -> LoadTestMetrics {
    load_test.execute().unwrap()
}

/// Helper to delete test artifacts, if existing.
#[allow(dead_code)]
pub fn cleanup_dir(dir: &str) {
    if std::path::Path::new(dir).exists() {
        std::fs::remove_dir_all(dir).expect("failed to remove directory");
    }
}
