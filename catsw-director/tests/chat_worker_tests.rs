//! Chat vote worker: message handling, weighting, dedupe and reconnects

mod helpers;

use catsw_director::collaborators::ChatPoll;
use catsw_director::workers::{
    join_with_timeout, ChatContext, ChatSettings, ChatVoteWorker, TierWeights, VoteKeyMap,
    WorkerHandle, WorkerKind,
};
use catsw_director::{ChatEvent, PrivilegeTier, SceneId, VoteLedger};
use helpers::{event, test_config, wait_until, ScriptedConnector};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn context(connector: Arc<ScriptedConnector>, ledger: &Arc<VoteLedger>) -> ChatContext {
    let mut config = test_config("");
    config.chat.super_users = vec!["owner".to_string()];
    config.chat.reconnect_backoff_initial_ms = 10;
    config.chat.reconnect_backoff_max_ms = 40;
    config.chat.event_timeout_ms = 20;
    config.chat.failure_threshold = 3;
    ChatContext {
        connector,
        keys: Arc::new(VoteKeyMap::from_config(&config)),
        weigher: Arc::new(TierWeights::from_config(&config)),
        ledger: Arc::clone(ledger),
        settings: ChatSettings::from_config(&config),
    }
}

fn worker(ledger: &Arc<VoteLedger>) -> ChatVoteWorker {
    let ctx = context(ScriptedConnector::new(Vec::new()), ledger);
    let handle = Arc::new(WorkerHandle::new(WorkerKind::Chat));
    ChatVoteWorker::new(ctx, handle)
}

#[test]
fn test_unknown_scene_from_unknown_sender_is_dropped() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let mut worker = worker(&ledger);

    let msg = ChatEvent::new("stranger-9000", PrivilegeTier::Viewer, "garage");
    assert!(worker.handle_event(&msg, Instant::now()).is_none());
    assert!(ledger.is_empty());
}

#[test]
fn test_vote_key_and_id_both_vote() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let mut worker = worker(&ledger);
    let now = Instant::now();

    let by_key = worker
        .handle_event(&ChatEvent::new("u1", PrivilegeTier::Viewer, "2"), now)
        .unwrap();
    assert_eq!(by_key.scene, SceneId::from("b"));

    let by_id = worker
        .handle_event(&ChatEvent::new("u2", PrivilegeTier::Viewer, " C "), now)
        .unwrap();
    assert_eq!(by_id.scene, SceneId::from("c"));
}

#[test]
fn test_privileged_senders_weigh_more() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let mut worker = worker(&ledger);
    let now = Instant::now();

    let follower = ChatEvent::new("u1", PrivilegeTier::Follower { level: 6 }, "1");
    let owner = ChatEvent::new("owner", PrivilegeTier::Viewer, "1");
    assert_eq!(worker.handle_event(&follower, now).unwrap().weight, 7.0);
    assert_eq!(worker.handle_event(&owner, now).unwrap().weight, 11.0);
}

#[test]
fn test_one_vote_per_sender_per_window() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let mut worker = worker(&ledger);
    let t0 = Instant::now();

    let first = ChatEvent::new("u1", PrivilegeTier::Viewer, "1");
    let change_of_mind = ChatEvent::new("u1", PrivilegeTier::Viewer, "2");
    assert!(worker.handle_event(&first, t0).is_some());
    assert!(worker
        .handle_event(&change_of_mind, t0 + Duration::from_secs(10))
        .is_none());
    // Window defaults to the 30s vote TTL
    assert!(worker
        .handle_event(&change_of_mind, t0 + Duration::from_secs(30))
        .is_some());
}

#[test]
fn test_worker_records_votes_and_survives_disconnects() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let connector = ScriptedConnector::new(vec![
        None,
        Some(vec![
            event("u1", "1"),
            event("u2", "not a vote"),
            ChatPoll::Disconnected("relay restarted".to_string()),
        ]),
        None,
        Some(vec![event("u3", "2")]),
    ]);

    let (handle, thread) = ChatVoteWorker::spawn(context(Arc::clone(&connector), &ledger)).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        let tally = ledger.snapshot(Instant::now());
        tally.score("a") == 1.0 && tally.score("b") == 1.0
    }));
    assert!(connector.connects() >= 4);
    assert!(wait_until(Duration::from_secs(2), || handle.is_connected()));
    assert!(!handle.is_unhealthy());

    handle.request_stop();
    assert!(join_with_timeout(thread, Duration::from_secs(2)).is_ok());
    assert!(!handle.is_connected());
}

#[test]
fn test_repeated_connect_failures_mark_unhealthy() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let connector = ScriptedConnector::new(vec![None; 500]);

    let (handle, thread) = ChatVoteWorker::spawn(context(Arc::clone(&connector), &ledger)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || handle.is_unhealthy()));
    assert_eq!(handle.last_error().as_deref(), Some("chat connect failed: relay refused"));

    // Still retrying, with a fresh heartbeat
    let before = connector.connects();
    assert!(wait_until(Duration::from_secs(5), || connector.connects() > before));
    assert!(handle.heartbeat_age(Instant::now()) < Duration::from_secs(1));

    handle.request_stop();
    assert!(join_with_timeout(thread, Duration::from_secs(2)).is_ok());
}

#[test]
fn test_relay_that_drops_at_once_keeps_backing_off() {
    let ledger = Arc::new(VoteLedger::new(Duration::from_secs(30)));
    let dropped = || Some(vec![ChatPoll::Disconnected("closed by relay".to_string())]);
    let connector = ScriptedConnector::new((0..5).map(|_| dropped()).collect());

    let started = Instant::now();
    let (handle, thread) = ChatVoteWorker::spawn(context(Arc::clone(&connector), &ledger)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || connector.connects() >= 6));

    // 10 + 20 + 40 + 40 + 40 ms; resetting on every connect would give 5 x 10 ms
    assert!(started.elapsed() >= Duration::from_millis(140));

    handle.request_stop();
    assert!(join_with_timeout(thread, Duration::from_secs(2)).is_ok());
}
