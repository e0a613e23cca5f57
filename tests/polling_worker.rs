//! End-to-end polling scenarios against a simulated store: scheduling,
//! lease claiming, retrying and supervisor discovery.

mod helpers;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use fleetnexus::db::enums::{self, PollingResult, PollingStatus};
use fleetnexus::db::{DevicePollingParameter, NewDevice, Repository};
use fleetnexus::monitor::DeviceMonitor;
use fleetnexus::simulator::random_string;
use fleetnexus::worker::PollingWorker;

use helpers::{polling_config, sample_response, InMemoryRepository, ScriptedMonitor, ScriptedReply, TestStrategy};

const CANONICAL_TYPES: [&str; 4] = [
    enums::ROUTER,
    enums::SWITCH,
    enums::CAMERA,
    enums::DOOR_ACCESS_SYSTEM,
];

fn seed_fleet(repo: &InMemoryRepository, devices_per_type: usize) {
    for (t, device_type) in CANONICAL_TYPES.iter().enumerate() {
        repo.seed_device_type(device_type);
        for d in 0..devices_per_type {
            let use_rest = (t + d) % 2 == 0;
            repo.seed_device(NewDevice {
                device_id: random_string(10),
                device_type: device_type.to_string(),
                hostname: format!("{}-{d}.example.com", device_type.replace('_', "-")),
                protocols: vec![if use_rest { "rest".into() } else { "grpc".into() }],
                rest_port: use_rest.then_some(50_080),
                rest_path: use_rest.then(|| "/api/v1/device".to_string()),
                grpc_port: (!use_rest).then_some(60_051),
            });
        }
    }
}

fn strategy_for_all(config: fleetnexus::monitor::strategy::PollingConfig) -> TestStrategy {
    let mut strategy = TestStrategy::default();
    for device_type in CANONICAL_TYPES {
        strategy.configs.insert(device_type.to_string(), config.clone());
    }
    strategy
}

fn worker_with(
    repo: &Arc<InMemoryRepository>,
    monitor: Arc<dyn DeviceMonitor>,
    strategy: TestStrategy,
) -> PollingWorker {
    let repo: Arc<dyn Repository> = repo.clone();
    PollingWorker::new(repo, monitor.clone(), monitor, Arc::new(strategy))
        .with_shutdown_grace(Duration::from_secs(5))
}

#[tokio::test]
async fn reliable_devices_accumulate_successful_history() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_fleet(&repo, 3);

    let interval = Duration::from_millis(100);
    let strategy = strategy_for_all(polling_config(interval, Duration::from_secs(1)));
    let monitor = Arc::new(ScriptedMonitor::new(|_| {
        ScriptedReply::Respond(sample_response())
    }));

    let worker = worker_with(&repo, monitor, strategy);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();
    });
    worker.run(cancel).await.unwrap();

    for device in repo.all_devices() {
        let history = repo.history_for(&device.device_id);
        assert!(
            history.len() >= 3,
            "device {} only has {} history rows",
            device.device_id,
            history.len()
        );
        for row in &history {
            assert_eq!(row.device_id, device.device_id);
            assert_eq!(row.polling_result, PollingResult::Succeed);
        }
    }
}

#[tokio::test]
async fn unreliable_devices_record_bounded_success_ratio() {
    let repo = Arc::new(InMemoryRepository::new());
    seed_fleet(&repo, 2);

    let interval = Duration::from_millis(100);
    let timeout = Duration::from_millis(100);
    let strategy = strategy_for_all(polling_config(interval, timeout));

    // Deterministic per-device pattern keyed by host:port, counting from 1:
    // slow failure, success, failure, repeating.
    let counters: Arc<Mutex<HashMap<String, u32>>> = Arc::new(Mutex::new(HashMap::new()));
    let monitor = Arc::new(ScriptedMonitor::new(move |request| {
        let key = format!("{}:{}", request.hostname, request.port.unwrap_or(0));
        let mut counters = counters.lock().unwrap();
        let count = counters
            .entry(key.clone())
            .and_modify(|c| *c += 1)
            .or_insert(1);
        match *count % 3 {
            1 => ScriptedReply::SlowFail(2 * timeout, format!("device {key} is not reachable")),
            2 => ScriptedReply::Respond(sample_response()),
            _ => ScriptedReply::Fail(format!("device {key} is not reachable")),
        }
    }));

    let worker = worker_with(&repo, monitor, strategy);
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(2)).await;
        canceller.cancel();
    });
    worker.run(cancel).await.unwrap();

    for device in repo.all_devices() {
        let history = repo.history_for(&device.device_id);
        let total = history.len();
        let succeeded = history
            .iter()
            .filter(|row| row.polling_result == PollingResult::Succeed)
            .count();
        assert!(succeeded > 0, "device {} never succeeded", device.device_id);
        assert!(
            succeeded * 3 <= total + 2,
            "device {} succeeded {succeeded} of {total} attempts",
            device.device_id
        );
    }
}

#[tokio::test]
async fn claim_recovers_orphaned_in_progress_devices() {
    let repo = InMemoryRepository::new();
    repo.seed_device_type(enums::ROUTER);
    let mut device = repo.seed_device(NewDevice {
        device_id: "orphan".into(),
        device_type: enums::ROUTER.into(),
        hostname: "router-0.example.com".into(),
        protocols: vec!["grpc".into()],
        grpc_port: Some(60_051),
        ..Default::default()
    });

    // a scheduler crashed mid-retry: lease marker left behind, stale
    device.polling_status = Some(PollingStatus::InProgress);
    device.last_checked_at = Some(Utc::now() - chrono::Duration::seconds(30 * 60 + 1));
    repo.update_device(&device).await.unwrap();

    let claimed = repo
        .claim_due_devices(DevicePollingParameter {
            device_type: enums::ROUTER.into(),
            interval: Duration::from_secs(30),
            outdated_period: None,
            limit: 10,
        })
        .await
        .unwrap();

    assert_eq!(claimed.len(), 1);
    assert_eq!(claimed[0].device_id, "orphan");
    assert_eq!(claimed[0].polling_status, Some(PollingStatus::InProgress));
}

#[tokio::test]
async fn claim_predicate_selects_exactly_the_due_devices() {
    let repo = InMemoryRepository::new();
    repo.seed_device_type(enums::CAMERA);
    let interval = Duration::from_secs(30);
    let now = Utc::now();

    let seed = |device_id: &str| -> fleetnexus::db::entities::device::Model {
        repo.seed_device(NewDevice {
            device_id: device_id.into(),
            device_type: enums::CAMERA.into(),
            hostname: format!("{device_id}.example.com"),
            protocols: vec!["rest".into()],
            rest_port: Some(50_080),
            ..Default::default()
        })
    };

    // never polled at all
    seed("fresh");

    // polled recently and done: not due
    let mut recent = seed("recently-done");
    recent.polling_status = Some(PollingStatus::Done);
    recent.last_checked_at = Some(now - chrono::Duration::seconds(10));
    repo.update_device(&recent).await.unwrap();

    // done, one interval behind: due
    let mut idle = seed("idle-done");
    idle.polling_status = Some(PollingStatus::Done);
    idle.last_checked_at = Some(now - chrono::Duration::seconds(31));
    repo.update_device(&idle).await.unwrap();

    // claimed by a live scheduler moments ago: not due
    let mut leased = seed("leased");
    leased.polling_status = Some(PollingStatus::InProgress);
    leased.last_checked_at = Some(now - chrono::Duration::seconds(10));
    repo.update_device(&leased).await.unwrap();

    // abandoned lease: due through the staleness fallback
    let mut stuck = seed("stuck");
    stuck.polling_status = Some(PollingStatus::InProgress);
    stuck.last_checked_at = Some(now - chrono::Duration::seconds(30 * 60 + 5));
    repo.update_device(&stuck).await.unwrap();

    // claimed once, never finished, older than the outdated period: due
    let mut newcomer = seed("stale-newcomer");
    newcomer.polling_status = Some(PollingStatus::InProgress);
    newcomer.created_at = now - chrono::Duration::seconds(30 * 60 + 5);
    repo.update_device(&newcomer).await.unwrap();

    // soft-deleted: never due
    let mut deleted = seed("deleted");
    deleted.deleted_at = Some(now);
    repo.update_device(&deleted).await.unwrap();

    let claimed = repo
        .claim_due_devices(DevicePollingParameter {
            device_type: enums::CAMERA.into(),
            interval,
            outdated_period: None,
            limit: 10,
        })
        .await
        .unwrap();

    let claimed_ids: Vec<&str> = claimed.iter().map(|d| d.device_id.as_str()).collect();
    let expected: HashSet<&str> = ["fresh", "idle-done", "stuck", "stale-newcomer"]
        .into_iter()
        .collect();
    assert_eq!(
        claimed_ids.iter().copied().collect::<HashSet<_>>(),
        expected
    );

    // null last_checked_at sorts first, then ascending timestamps
    let nulls: HashSet<&str> = claimed_ids[..2].iter().copied().collect();
    assert_eq!(nulls, ["fresh", "stale-newcomer"].into_iter().collect());
    assert_eq!(claimed_ids[2], "stuck");
    assert_eq!(claimed_ids[3], "idle-done");

    for device in claimed {
        assert_eq!(device.polling_status, Some(PollingStatus::InProgress));
    }
}

#[tokio::test]
async fn claim_caps_the_batch_at_the_limit() {
    let repo = InMemoryRepository::new();
    repo.seed_device_type(enums::SWITCH);
    for i in 0..5 {
        repo.seed_device(NewDevice {
            device_id: format!("switch-{i}"),
            device_type: enums::SWITCH.into(),
            hostname: format!("switch-{i}.example.com"),
            protocols: vec!["grpc".into()],
            grpc_port: Some(60_051),
            ..Default::default()
        });
    }

    let claimed = repo
        .claim_due_devices(DevicePollingParameter {
            device_type: enums::SWITCH.into(),
            interval: Duration::from_secs(60),
            outdated_period: None,
            limit: 2,
        })
        .await
        .unwrap();
    assert_eq!(claimed.len(), 2);
}

#[tokio::test]
async fn concurrent_schedulers_never_double_claim() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.seed_device_type(enums::ROUTER);
    for i in 0..20 {
        repo.seed_device(NewDevice {
            device_id: format!("router-{i}"),
            device_type: enums::ROUTER.into(),
            hostname: format!("router-{i}.example.com"),
            protocols: vec!["rest".into()],
            rest_port: Some(50_080),
            ..Default::default()
        });
    }

    let claims: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let mut schedulers = Vec::new();
    for _ in 0..4 {
        let repo = repo.clone();
        let claims = claims.clone();
        schedulers.push(tokio::spawn(async move {
            for _ in 0..10 {
                let claimed = repo
                    .claim_due_devices(DevicePollingParameter {
                        device_type: enums::ROUTER.into(),
                        interval: Duration::from_millis(50),
                        outdated_period: None,
                        limit: 5,
                    })
                    .await
                    .unwrap();
                {
                    let mut claims = claims.lock().unwrap();
                    claims.extend(claimed.into_iter().map(|d| d.device_id));
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }));
    }
    for scheduler in schedulers {
        scheduler.await.unwrap();
    }

    // No device ever resets its lease inside the window, so each may be
    // claimed at most once across all schedulers.
    let claims = claims.lock().unwrap();
    let unique: HashSet<&String> = claims.iter().collect();
    assert_eq!(claims.len(), unique.len(), "a device was double-claimed");
    assert_eq!(unique.len(), 20);
}

#[tokio::test]
async fn first_poll_lands_within_two_intervals_of_registration() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.seed_device_type(enums::ROUTER);
    let device = repo.seed_device(NewDevice {
        device_id: "freshly-registered".into(),
        device_type: enums::ROUTER.into(),
        hostname: "router-0.example.com".into(),
        protocols: vec!["rest".into()],
        rest_port: Some(50_080),
        ..Default::default()
    });

    let interval = Duration::from_millis(200);
    let mut strategy = TestStrategy::default();
    strategy.configs.insert(
        enums::ROUTER.into(),
        polling_config(interval, Duration::from_secs(1)),
    );
    let monitor = Arc::new(ScriptedMonitor::new(|_| {
        ScriptedReply::Respond(sample_response())
    }));

    let worker = worker_with(&repo, monitor, strategy);
    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let handle = tokio::spawn(async move { worker.run(run_token).await });

    let observed = tokio::time::timeout(Duration::from_millis(400), async {
        loop {
            if !repo.history_for(&device.device_id).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(observed.is_ok(), "no history row within two intervals");

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn discovery_starts_schedulers_for_newly_appearing_types() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.seed_device_type(enums::ROUTER);
    repo.seed_device(NewDevice {
        device_id: "router-0".into(),
        device_type: enums::ROUTER.into(),
        hostname: "router-0.example.com".into(),
        protocols: vec!["rest".into()],
        rest_port: Some(50_080),
        ..Default::default()
    });

    let config = polling_config(Duration::from_millis(100), Duration::from_secs(1));
    let mut strategy = TestStrategy::default();
    strategy.configs.insert(enums::ROUTER.into(), config.clone());
    strategy.configs.insert(enums::CAMERA.into(), config);

    let monitor = Arc::new(ScriptedMonitor::new(|_| {
        ScriptedReply::Respond(sample_response())
    }));
    let worker =
        worker_with(&repo, monitor, strategy).with_discovery_interval(Duration::from_millis(150));

    let cancel = CancellationToken::new();
    let run_token = cancel.clone();
    let handle = tokio::spawn(async move { worker.run(run_token).await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    repo.seed_device_type(enums::CAMERA);
    let camera = repo.seed_device(NewDevice {
        device_id: "camera-0".into(),
        device_type: enums::CAMERA.into(),
        hostname: "camera-0.example.com".into(),
        protocols: vec!["grpc".into()],
        grpc_port: Some(60_051),
        ..Default::default()
    });

    let observed = tokio::time::timeout(Duration::from_millis(1_500), async {
        loop {
            if !repo.history_for(&camera.device_id).is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(observed.is_ok(), "new type was never scheduled");

    cancel.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unknown_type_fails_its_scheduler_but_not_the_others() {
    let repo = Arc::new(InMemoryRepository::new());
    repo.seed_device_type(enums::ROUTER);
    repo.seed_device_type("toaster");
    let router = repo.seed_device(NewDevice {
        device_id: "router-0".into(),
        device_type: enums::ROUTER.into(),
        hostname: "router-0.example.com".into(),
        protocols: vec!["rest".into()],
        rest_port: Some(50_080),
        ..Default::default()
    });
    let toaster = repo.seed_device(NewDevice {
        device_id: "toaster-0".into(),
        device_type: "toaster".into(),
        hostname: "toaster-0.example.com".into(),
        protocols: vec!["rest".into()],
        rest_port: Some(50_080),
        ..Default::default()
    });

    let mut strategy = TestStrategy::default();
    strategy.configs.insert(
        enums::ROUTER.into(),
        polling_config(Duration::from_millis(100), Duration::from_secs(1)),
    );

    let monitor = Arc::new(ScriptedMonitor::new(|_| {
        ScriptedReply::Respond(sample_response())
    }));
    let worker = worker_with(&repo, monitor, strategy);

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        canceller.cancel();
    });
    worker.run(cancel).await.unwrap();

    assert!(!repo.history_for(&router.device_id).is_empty());
    assert!(repo.history_for(&toaster.device_id).is_empty());
}
