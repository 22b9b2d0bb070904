use std::sync::Arc;
use std::time::Instant;

use vaultsync::{
    Config,
    backend::database::InMemory,
    config::HashingConfig,
    crypto::{encode_base64, random_bytes},
    protocol::ChallengeAnswer,
    server::Server,
    session::Session,
};

use crate::helpers::{connect, register, test_config, test_server};

fn answer_with_random_key() -> ChallengeAnswer {
    ChallengeAnswer {
        challenge_key: encode_base64(&random_bytes(32)),
    }
}

#[tokio::test]
async fn unknown_user_and_wrong_passphrase_look_the_same() {
    let server = test_server().await;
    register(&server, "alice").await;

    let wrong = Session::login(connect(&server), "alice", "not-pw", test_config())
        .await
        .unwrap_err();
    let unknown = Session::login(connect(&server), "nobody", "pw", test_config())
        .await
        .unwrap_err();

    assert!(wrong.is_authentication_error());
    assert!(unknown.is_authentication_error());
    assert_eq!(wrong.to_string(), unknown.to_string());
    assert_eq!(wrong.kind(), unknown.kind());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_user_still_pays_for_a_hash() {
    // Costly enough that the hash dominates everything else in a login
    let config = Config {
        hashing: HashingConfig {
            memory_kib: 4096,
            iterations: 3,
            parallelism: 1,
        },
        ..test_config()
    };
    let server = Server::new(Arc::new(InMemory::new()), config.clone());
    server.start().await;
    Session::register(connect(&server), "alice", "pw", config)
        .await
        .unwrap();

    // The first unknown-user answer of the process, right after start
    let started = Instant::now();
    let unknown = server.answer("nobody", &answer_with_random_key()).await;
    let unknown_elapsed = started.elapsed();

    let started = Instant::now();
    let wrong = server.answer("alice", &answer_with_random_key()).await;
    let wrong_elapsed = started.elapsed();

    assert!(wrong.is_err() && unknown.is_err());
    assert!(
        unknown_elapsed * 4 >= wrong_elapsed,
        "unknown user took {unknown_elapsed:?}, wrong answer took {wrong_elapsed:?}"
    );
    assert!(
        unknown_elapsed <= wrong_elapsed * 4,
        "unknown user took {unknown_elapsed:?}, wrong answer took {wrong_elapsed:?}"
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn fake_challenges_are_stable_and_shaped_like_real_ones() {
    let server = test_server().await;
    register(&server, "alice").await;

    let real = server.challenge("alice").await.unwrap();
    let fake = server.challenge("nobody").await.unwrap();
    assert_eq!(fake, server.challenge("nobody").await.unwrap());
    assert_ne!(fake, server.challenge("somebody-else").await.unwrap());
    assert_eq!(fake.keyring.len(), real.keyring.len());
    assert_eq!(
        fake.challenge_key_salt.len(),
        real.challenge_key_salt.len()
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn configured_secret_keeps_fakes_stable_across_restarts() {
    let config = Config {
        server_secret: Some("correct horse battery staple".to_string()),
        ..test_config()
    };
    let first = Server::new(Arc::new(InMemory::new()), config.clone());
    let second = Server::new(Arc::new(InMemory::new()), config);
    assert_eq!(
        first.challenge("nobody").await.unwrap(),
        second.challenge("nobody").await.unwrap()
    );

    let random = Server::new(Arc::new(InMemory::new()), test_config());
    assert_ne!(
        first.challenge("nobody").await.unwrap(),
        random.challenge("nobody").await.unwrap()
    );
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let server = test_server().await;
    register(&server, "alice").await;

    let err = Session::register(connect(&server), "alice", "other", test_config())
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation(), "{err:?}");

    // The first account is untouched
    Session::login(connect(&server), "alice", "pw", test_config())
        .await
        .unwrap();

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn logout_ends_the_session() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;

    let challenge = server.challenge("alice").await.unwrap();
    let key = vaultsync::account::challenge_key(
        "pw",
        &challenge.challenge_key_salt,
        &test_config().hashing,
    )
    .unwrap();
    let grant = server
        .answer(
            "alice",
            &ChallengeAnswer {
                challenge_key: encode_base64(key.as_bytes()),
            },
        )
        .await
        .unwrap();
    assert_eq!(grant.account_id, alice.account_id());

    server.open_transaction(&grant.session_id).await.unwrap();
    assert!(server.logout(&grant.session_id).await);
    assert!(!server.logout(&grant.session_id).await);

    let err = server
        .open_transaction(&grant.session_id)
        .await
        .unwrap_err();
    assert!(err.is_authentication_error());

    // Other sessions of the same account are unaffected
    alice.connection().create_transaction().await.unwrap();

    server.shutdown().await.unwrap();
}
