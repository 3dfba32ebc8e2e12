//! Shared test utilities for the event bus and projection crates
//!
//! - `TestRedis`: Redis container for the Redis Streams broker (feature: "redis")
//! - `TestMongo`: MongoDB container with a per-test database (feature: "mongo")
//! - `TestDataBuilder`: deterministic ids and names (always available)
//!
//! Container-backed tests need Docker and are marked `#[ignore]`; run them
//! with `cargo test -- --ignored`.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! test-utils = { workspace = true, features = ["redis"] }
//! ```
//!
//! ```rust,ignore
//! use test_utils::TestRedis;
//!
//! #[tokio::test]
//! #[ignore] // Requires Docker
//! async fn my_stream_test() {
//!     let redis = TestRedis::new().await;
//!     let broker = RedisStreamsBroker::connect(redis.connection_string(), 3).await.unwrap();
//! }
//! ```

use uuid::Uuid;

#[cfg(feature = "mongo")]
mod mongo;

#[cfg(feature = "redis")]
mod redis;

#[cfg(feature = "mongo")]
pub use mongo::TestMongo;

#[cfg(feature = "redis")]
pub use redis::TestRedis;

/// Builder for test data with deterministic randomization
///
/// Seeding from the test name keeps aggregate ids stable between runs, which
/// makes partition assignment (keyed by aggregate id) reproducible too.
pub struct TestDataBuilder {
    seed: u64,
}

impl TestDataBuilder {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    /// Create from test name (generates seed from test name hash)
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("test_customer_projection");
    /// ```
    pub fn from_test_name(name: &str) -> Self {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        Self::new(hasher.finish())
    }

    /// Deterministic UUID for the `index`-th entity of this test
    pub fn uuid(&self, index: u64) -> Uuid {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.seed.to_le_bytes());
        bytes[8..].copy_from_slice(&index.to_le_bytes());
        Uuid::from_bytes(bytes)
    }

    /// Aggregate id such as `customer-<uuid>`
    ///
    /// ```
    /// use test_utils::TestDataBuilder;
    ///
    /// let builder = TestDataBuilder::from_test_name("my_test");
    /// assert!(builder.aggregate_id("customer", 0).starts_with("customer-"));
    /// ```
    pub fn aggregate_id(&self, prefix: &str, index: u64) -> String {
        format!("{}-{}", prefix, self.uuid(index))
    }

    /// Unique, human-readable name, e.g. for categories or topics
    pub fn name(&self, prefix: &str, suffix: &str) -> String {
        format!("test-{}-{}-{}", prefix, self.seed, suffix)
    }

    /// Unique e-mail address
    pub fn email(&self, local: &str) -> String {
        format!("{}+{}@example.com", local, self.seed)
    }
}
