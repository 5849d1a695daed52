//! Tandem integration test harness.
//!
//! Everything runs in-process: rendezvous paths over loopback TCP, calls
//! against a scripted SFU and peer connection. No root, no network setup.
//!
//!   cargo test --test integration

use std::time::Duration;

use tandem_core::config::ChunkingConfig;
use tandem_core::TandemConfig;

mod calls;
mod chunking;
mod rendezvous;

// ── Harness ───────────────────────────────────────────────────────────────────

/// Upper bound for anything a test waits on.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Small chunks so every handshake message spans several frames.
pub fn small_chunks() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 32,
        ..ChunkingConfig::default()
    }
}

pub fn test_config() -> TandemConfig {
    let mut config = TandemConfig::default();
    config.chunking = small_chunks();
    config
}

/// Await `fut`, failing the test if it takes longer than [`TEST_TIMEOUT`].
pub async fn within<F: std::future::Future>(what: &str, fut: F) -> F::Output {
    match tokio::time::timeout(TEST_TIMEOUT, fut).await {
        Ok(out) => out,
        Err(_) => panic!("timed out waiting for {what}"),
    }
}

#[test]
fn test_config_is_valid() {
    test_config().validate().expect("test config should validate");
}
