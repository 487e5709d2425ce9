//! Races on a single transaction: duplicate deliveries and cross-source interleavings must resolve to exactly one
//! winner per event, with no lost updates and a monotonic rank trail.
use std::sync::Arc;

use chrono::Utc;
use futures_util::future::join_all;
use log::*;
use payrec_engine::{
    db_types::{Decision, EventSource, PaymentStatus, TxCode},
    events::EventProducers,
    ReconDatabase,
    TransitionAuthority,
    Verdict,
};
use tokio::runtime::Runtime;

mod support;

use support::{new_transaction, setup, tear_down};

const NUM_CALLERS: usize = 8;

#[test]
fn duplicate_deliveries_race_to_one_acceptance() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let db = setup().await;
        let authority = Arc::new(TransitionAuthority::new(db.clone(), EventProducers::default()));
        authority.register_transaction(new_transaction("TX-RACE1")).await.unwrap();
        let code = TxCode::from("TX-RACE1".to_string());

        // The gateway's retry policy can deliver the same event many times, concurrently
        let handles = (0..NUM_CALLERS)
            .map(|i| {
                let authority = Arc::clone(&authority);
                let code = code.clone();
                tokio::spawn(async move {
                    trace!("🚀️ Caller {i} delivering");
                    authority
                        .apply(&code, EventSource::Webhook, PaymentStatus::Settled, "evt-settle", Utc::now())
                        .await
                        .expect("apply must not error")
                })
            })
            .collect::<Vec<_>>();
        let verdicts = join_all(handles).await.into_iter().map(|h| h.unwrap()).collect::<Vec<_>>();

        let accepted = verdicts.iter().filter(|v| v.is_accepted()).count();
        let superseded = verdicts.iter().filter(|v| matches!(v, Verdict::Superseded)).count();
        assert_eq!(accepted, 1, "exactly one delivery wins");
        assert_eq!(superseded, NUM_CALLERS - 1);

        let records = db.fetch_transitions(&code).await.unwrap();
        assert_eq!(records.iter().filter(|r| r.decision == Decision::Accepted).count(), 1);
        let tx = db.fetch_transaction(&code).await.unwrap().unwrap();
        assert_eq!(tx.status, PaymentStatus::Settled);
        assert_eq!(authority.replay_status(&code).await.unwrap(), PaymentStatus::Settled);
        tear_down(db).await;
    });
    info!("🚀️ test complete");
}

#[test]
fn concurrent_sources_never_lose_updates() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let db = setup().await;
        let authority = Arc::new(TransitionAuthority::new(db.clone(), EventProducers::default()));
        authority.register_transaction(new_transaction("TX-RACE2")).await.unwrap();
        let code = TxCode::from("TX-RACE2".to_string());

        // A webhook and a poll race with different observations; no ordering is assumed between them
        let webhook = {
            let authority = Arc::clone(&authority);
            let code = code.clone();
            tokio::spawn(async move {
                authority.apply(&code, EventSource::Webhook, PaymentStatus::Settled, "evt-w", Utc::now()).await
            })
        };
        let poll = {
            let authority = Arc::clone(&authority);
            let code = code.clone();
            tokio::spawn(async move {
                authority.apply(&code, EventSource::Poll, PaymentStatus::Pending, "evt-p", Utc::now()).await
            })
        };
        webhook.await.unwrap().expect("webhook apply errored");
        poll.await.unwrap().expect("poll apply errored");

        // Whichever interleaving happened, the higher rank wins and the trail is monotonic
        let tx = db.fetch_transaction(&code).await.unwrap().unwrap();
        assert_eq!(tx.status, PaymentStatus::Settled);
        assert_eq!(authority.replay_status(&code).await.unwrap(), PaymentStatus::Settled);
        let records = db.fetch_transitions(&code).await.unwrap();
        let accepted_ranks = records
            .iter()
            .filter(|r| r.decision == Decision::Accepted)
            .map(|r| r.resulting.rank())
            .collect::<Vec<_>>();
        assert!(accepted_ranks.windows(2).all(|w| w[0] < w[1]), "rank strictly increases along accepted records");
        tear_down(db).await;
    });
    info!("🚀️ test complete");
}

#[test]
fn burst_of_transactions_do_not_contend() {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let db = setup().await;
        let authority = Arc::new(TransitionAuthority::new(db.clone(), EventProducers::default()));
        // Lock granularity is per code: transitions on distinct transactions proceed independently
        for i in 0..20 {
            authority.register_transaction(new_transaction(&format!("TX-B{i}"))).await.unwrap();
        }
        let handles = (0..20)
            .map(|i| {
                let authority = Arc::clone(&authority);
                tokio::spawn(async move {
                    let code = TxCode::from(format!("TX-B{i}"));
                    let event = format!("evt-b{i}");
                    authority.apply(&code, EventSource::Webhook, PaymentStatus::Pending, &event, Utc::now()).await
                })
            })
            .collect::<Vec<_>>();
        for handle in join_all(handles).await {
            assert!(handle.unwrap().unwrap().is_accepted());
        }
        tear_down(db).await;
    });
    info!("🚀️ test complete");
}
