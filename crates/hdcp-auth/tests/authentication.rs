//! End-to-end authentication against the simulated receiver.
//!
//! Run with: cargo test -p hdcp-auth --test authentication

mod common;

use common::*;
use hdcp_auth::SimulatedReceiver;
use hdcp_core::caps::Caps;
use hdcp_core::error::{AuthError, Error, RegistryError};
use hdcp_core::ids::LinkType;
use hdcp_core::state::AuthState;
use hdcp_crypto::{GatewayOp, SoftwareGateway};
use std::sync::Arc;

fn attempt_failure(err: &Error) -> (u32, AuthError) {
    match err {
        Error::Auth(AuthError::AuthenticationFailed { attempts, cause }) => (*attempts, (**cause).clone()),
        other => panic!("expected AuthenticationFailed, got {:?}", other),
    }
}

mod receivers {
    use super::*;

    #[tokio::test]
    async fn dp_receiver_reaches_authenticated() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();

        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::A5);
        assert!(engine.content_enabled(link).await.unwrap());
        assert!(sim.encryption_enabled().await);
        assert_eq!(sim.encryption_enable_count().await, 1);
        assert_eq!(sim.ake_init_count().await, 1);
        assert_eq!(sim.lc_init_count().await, 1);
        assert!(engine.receiver_id_list(link).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn iia_receiver_with_precomputed_locality_check() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();

        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::A5);
        assert_eq!(sim.encryption_enable_count().await, 1);
    }

    #[tokio::test]
    async fn iia_receiver_without_precompute() {
        let gateway = Arc::new(SoftwareGateway::new(DERIVATION_KEY.to_vec()).with_lc_precompute(false));
        let engine = build_engine(gateway);
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::A5);
    }

    #[tokio::test]
    async fn hdcp_2_0_receiver_skips_precompute() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_version(0, true);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::A5);
    }

    #[tokio::test]
    async fn stored_pairing_is_used_on_reauthentication() {
        let gateway = software_gateway();
        let engine = build_engine(gateway.clone());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        assert!(gateway.has_pairing(&RECEIVER_ID).await);
        assert_eq!(sim.stored_km_count().await, 0);

        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(sim.stored_km_count().await, 1);
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::A5);
        // Disabled once on the way back to H1, enabled again at A5.
        assert_eq!(sim.encryption_enable_count().await, 2);
    }

    #[tokio::test]
    async fn iia_stored_pairing() {
        let gateway = software_gateway();
        let engine = build_engine(gateway.clone());
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(sim.stored_km_count().await, 1);
    }
}

mod failures {
    use super::*;

    #[tokio::test]
    async fn revoked_certificate_exhausts_attempts() {
        let gateway = Arc::new(SoftwareGateway::new(DERIVATION_KEY.to_vec()).with_revoked([RECEIVER_ID]));
        let engine = build_engine(gateway);
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::ExchangeKmFailed));
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::H1);
        assert!(!engine.content_enabled(link).await.unwrap());
        assert_eq!(sim.ake_init_count().await, 5);
        assert_eq!(sim.encryption_enable_count().await, 0);
    }

    #[tokio::test]
    async fn certificate_from_another_key_is_rejected() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::Iia, b"someone else".to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::ExchangeKmFailed));
    }

    #[tokio::test]
    async fn receiver_without_hdcp2_is_not_capable() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_caps(Caps([0x01, 0x00, Caps::HDCP_CAPABLE]));
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::RxNotCapable));
        assert_eq!(sim.ake_init_count().await, 0);
    }

    #[tokio::test]
    async fn locality_check_gives_up_after_ten_rounds() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_bad_l_prime(u32::MAX);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::LocalityCheckFailed));
        assert_eq!(sim.lc_init_count().await, 50);
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::H1);
    }

    #[tokio::test]
    async fn locality_check_recovers_within_budget() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_bad_l_prime(3);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(sim.lc_init_count().await, 4);
        assert_eq!(sim.ake_init_count().await, 1);
    }

    #[tokio::test]
    async fn precomputed_locality_check_failure() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_bad_l_prime(u32::MAX);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::LocalityCheckFailed));
    }

    #[tokio::test]
    async fn half_l_prime_without_precompute_fails_locality() {
        let gateway = Arc::new(SoftwareGateway::new(DERIVATION_KEY.to_vec()).with_lc_precompute(false));
        let engine = build_engine(gateway);
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID)
            .with_truncated_l_prime();
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::LocalityCheckFailed));
        assert_eq!(sim.lc_init_count().await, 50);
        assert_eq!(engine.link_state(link).await.unwrap(), AuthState::H1);
        assert_eq!(sim.encryption_enable_count().await, 0);
    }

    #[tokio::test]
    async fn transient_gateway_failure_is_retried() {
        let gateway = software_gateway();
        gateway.fail_next(GatewayOp::CompareAkeHmac, 1).await;
        let engine = build_engine(gateway);
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(link, &sim).await.unwrap();
        assert_eq!(sim.ake_init_count().await, 2);
        assert_eq!(sim.encryption_enable_count().await, 1);
    }

    #[tokio::test]
    async fn session_key_failure_is_classified() {
        let gateway = software_gateway();
        gateway.fail_always(GatewayOp::GenerateSessionKey).await;
        let engine = build_engine(gateway);
        let sim = SimulatedReceiver::new(LinkType::Iia, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::Iia).await.unwrap();

        let err = engine.authenticate(link, &sim).await.unwrap_err();
        assert_eq!(attempt_failure(&err), (5, AuthError::ExchangeKsFailed));
    }

    #[tokio::test]
    async fn unknown_link_is_rejected() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let err = engine
            .authenticate(hdcp_auth::LinkHandle(u64::MAX), &sim)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::InvalidHandle(_))));
    }
}

mod sessions {
    use super::*;

    #[tokio::test]
    async fn links_in_one_session_share_riv_and_ks() {
        let engine = build_engine(software_gateway());
        let first = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let second = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), [1, 2, 3, 4, 5]);
        let session = engine.session_open().await;
        let a = engine.link_open(session, LinkType::DisplayPort).await.unwrap();
        let b = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(a, &first).await.unwrap();
        engine.authenticate(b, &second).await.unwrap();

        assert_eq!(first.riv().await, second.riv().await);
        assert!(first.session_key().await.is_some());
        assert_eq!(first.session_key().await, second.session_key().await);

        let stored = engine.registry().find_session(session).await.unwrap();
        let keys = stored.keys().lock().await;
        assert_eq!(keys.riv, Some(first.riv().await));
        assert!(keys.wrapped_ks.is_some());
    }

    #[tokio::test]
    async fn sessions_do_not_share_riv() {
        let engine = build_engine(software_gateway());
        let first = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let second = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let a = engine.link_open(engine.session_open().await, LinkType::DisplayPort).await.unwrap();
        let b = engine.link_open(engine.session_open().await, LinkType::DisplayPort).await.unwrap();

        engine.authenticate(a, &first).await.unwrap();
        engine.authenticate(b, &second).await.unwrap();
        assert_ne!(first.riv().await, second.riv().await);
    }

    #[tokio::test]
    async fn session_lifecycle_through_engine() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();

        let err = engine.session_close(session).await.unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::InvalidState(_))));

        engine.link_close(link, &sim).await.unwrap();
        assert!(engine.link_state(link).await.is_err());
        engine.session_close(session).await.unwrap();

        let err = engine.link_open(session, LinkType::Iia).await.unwrap_err();
        assert!(matches!(err, Error::Registry(RegistryError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn closing_authenticated_link() {
        let engine = build_engine(software_gateway());
        let sim = SimulatedReceiver::new(LinkType::DisplayPort, DERIVATION_KEY.to_vec(), RECEIVER_ID);
        let session = engine.session_open().await;
        let link = engine.link_open(session, LinkType::DisplayPort).await.unwrap();
        engine.authenticate(link, &sim).await.unwrap();

        let handle = engine.registry().find_link(link).await.unwrap();
        engine.link_close(link, &sim).await.unwrap();
        assert_eq!(handle.state().await, AuthState::H0);
        assert!(!handle.content_enabled());
        assert!(!sim.encryption_enabled().await);
        assert_eq!(sim.encryption_enable_count().await, 1);
    }
}
