//! Pre-configured test data for coordinator tests.

use room_coordinator::config::Config;
use std::collections::HashMap;
use uuid::Uuid;

/// Cluster token shared by every config built here, so coordinators in
/// one test accept each other's broadcasts.
pub const TEST_CLUSTER_TOKEN: &str = "test-cluster-token";

/// Build a config pinned to `server_id`, with defaults suitable for
/// in-memory tests.
pub fn test_config(server_id: &str) -> Config {
    config_from(server_id, &[])
}

/// Build a config pinned to `server_id` with extra variable overrides.
pub fn config_from(server_id: &str, overrides: &[(&str, &str)]) -> Config {
    let mut vars = HashMap::from([
        (
            "ROOMS_REDIS_URL".to_string(),
            "redis://localhost:6379".to_string(),
        ),
        (
            "ROOMS_CLUSTER_TOKEN".to_string(),
            TEST_CLUSTER_TOKEN.to_string(),
        ),
        ("ROOMS_SERVER_ID".to_string(), server_id.to_string()),
    ]);
    for (key, value) in overrides {
        vars.insert((*key).to_string(), (*value).to_string());
    }
    Config::from_vars(&vars).expect("test config should always parse")
}

/// A unique connection id for tests that must not collide.
#[must_use]
pub fn connection_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}
