/*! Integration tests for vaultsync.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * The module structure mirrors the main library structure:
 * - diff: Tests for the diff engine laws
 * - container: Tests for containers against a running server (save, sync, share, compact, watch)
 * - transaction: Tests for staging and the commit coordinator
 * - auth: Tests for challenge-response login
 * - backend: Tests for storage persistence
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("vaultsync=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod auth;
mod backend;
mod container;
mod diff;
mod helpers;
mod transaction;
