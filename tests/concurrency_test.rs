//! 并发测试 - 多个参与者同时操作同一 team

use std::fs;
use std::sync::{Arc, Barrier};
use std::thread;

use teamwork::{
    LockOptions, LockStrategy, MessageType, Storage, TaskStatus, TeamBridge, TeamError, TeamMember,
};
use tempfile::tempdir;

const WORKERS: usize = 8;

fn setup(storage: Storage) -> TeamBridge {
    let bridge = TeamBridge::new(storage);
    bridge.registry().create_team("race-team", "lead").unwrap();
    for i in 0..WORKERS {
        let id = format!("worker-{}", i);
        bridge
            .registry()
            .add_teammate("race-team", TeamMember::new(&id, &id, "coder"))
            .unwrap();
    }
    bridge
}

fn race_claims(bridge: TeamBridge) {
    let task_id = bridge.tasks().create_task("race-team", "contested", &[]).unwrap();
    let bridge = Arc::new(bridge);
    let barrier = Arc::new(Barrier::new(WORKERS));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            let task_id = task_id.clone();
            thread::spawn(move || {
                let agent = format!("worker-{}", i);
                barrier.wait();
                let claimed = bridge.tasks().claim_task("race-team", &task_id, &agent).unwrap();
                (agent, claimed)
            })
        })
        .collect();

    let results: Vec<(String, bool)> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&String> = results.iter().filter(|(_, claimed)| *claimed).map(|(a, _)| a).collect();
    assert_eq!(winners.len(), 1, "exactly one claimer wins: {:?}", results);

    let task = bridge.tasks().get_task("race-team", &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::InProgress);
    assert_eq!(task.assignee.as_ref(), Some(winners[0]));
}

#[test]
fn test_concurrent_claims_native_lock() {
    let temp = tempdir().unwrap();
    race_claims(setup(Storage::new(temp.path())));
}

#[test]
fn test_concurrent_claims_marker_lock() {
    let temp = tempdir().unwrap();
    race_claims(setup(Storage::with_lock_options(temp.path(), LockOptions::marker())));
}

#[test]
fn test_concurrent_task_creation_unique_ids() {
    let temp = tempdir().unwrap();
    let bridge = Arc::new(setup(Storage::new(temp.path())));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                bridge
                    .tasks()
                    .create_task("race-team", &format!("task {}", i), &[])
                    .unwrap()
            })
        })
        .collect();

    let mut ids: Vec<u64> = handles
        .into_iter()
        .map(|h| h.join().unwrap().parse().unwrap())
        .collect();
    ids.sort();
    assert_eq!(ids, (1..=WORKERS as u64).collect::<Vec<_>>());
    assert_eq!(bridge.tasks().get_tasks("race-team", None).unwrap().len(), WORKERS);
}

#[test]
fn test_concurrent_member_registration() {
    let temp = tempdir().unwrap();
    let bridge = Arc::new(TeamBridge::new(Storage::new(temp.path())));
    bridge.registry().create_team("join-team", "lead").unwrap();

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let id = format!("joiner-{}", i);
                bridge
                    .registry()
                    .add_teammate("join-team", TeamMember::new(&id, &id, "coder"))
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let config = bridge.registry().require_team("join-team").unwrap();
    assert_eq!(config.members.len(), WORKERS);
}

#[test]
fn test_concurrent_sends_to_lead() {
    let temp = tempdir().unwrap();
    let bridge = Arc::new(setup(Storage::new(temp.path())));

    let handles: Vec<_> = (0..WORKERS)
        .map(|i| {
            let bridge = Arc::clone(&bridge);
            thread::spawn(move || {
                let from = format!("worker-{}", i);
                for n in 0..3 {
                    bridge
                        .mailbox()
                        .send_message("race-team", &from, "lead", &format!("update {}", n), MessageType::Notification, None)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(bridge.mailbox().get_unread_count("race-team", "lead").unwrap(), WORKERS * 3);
}

#[test]
fn test_stale_marker_is_reclaimed() {
    let temp = tempdir().unwrap();
    let options = LockOptions {
        stale_after_ms: 0,
        ..LockOptions::marker()
    };
    assert_eq!(options.strategy, LockStrategy::Marker);
    let storage = Storage::with_lock_options(temp.path(), options);
    let bridge = setup(storage.clone());
    let task_id = bridge.tasks().create_task("race-team", "work", &[]).unwrap();

    // 崩溃的持有者留下的 marker
    let lock_path = storage.task_lock_path("race-team").unwrap();
    fs::write(&lock_path, "crashed-holder").unwrap();

    assert!(bridge.tasks().claim_task("race-team", &task_id, "worker-0").unwrap());
    assert!(!lock_path.exists());
}

#[test]
fn test_held_lock_times_out_without_mutation() {
    let temp = tempdir().unwrap();
    let options = LockOptions {
        timeout_ms: 150,
        ..LockOptions::default()
    };
    let storage = Storage::with_lock_options(temp.path(), options);
    let bridge = setup(storage.clone());
    let task_id = bridge.tasks().create_task("race-team", "work", &[]).unwrap();

    let held = storage.lock(&storage.task_lock_path("race-team").unwrap()).unwrap();
    let result = bridge.tasks().claim_task("race-team", &task_id, "worker-0");
    assert!(matches!(result, Err(TeamError::LockTimeout { .. })));
    held.release().unwrap();

    let task = bridge.tasks().get_task("race-team", &task_id).unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Pending);
    assert!(bridge.tasks().claim_task("race-team", &task_id, "worker-0").unwrap());
}

#[test]
fn test_delete_races_task_and_message_writes() {
    let temp = tempdir().unwrap();
    let bridge = Arc::new(TeamBridge::new(Storage::new(temp.path())));

    for round in 0..100 {
        bridge.registry().create_team("race-y", "lead").unwrap();
        bridge
            .registry()
            .add_teammate("race-y", TeamMember::new("dev", "dev", "coder"))
            .unwrap();

        let barrier = Arc::new(Barrier::new(3));
        let creator = {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..30 {
                    match bridge.tasks().create_task("race-y", &format!("task {}", i), &[]) {
                        Ok(_) | Err(TeamError::TeamNotFound(_)) => {}
                        Err(e) => panic!("unexpected create_task error: {}", e),
                    }
                }
            })
        };
        let sender = {
            let bridge = Arc::clone(&bridge);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..30 {
                    match bridge.mailbox().send_message(
                        "race-y",
                        "lead",
                        "dev",
                        &format!("note {}", i),
                        MessageType::Message,
                        None,
                    ) {
                        Ok(_) | Err(TeamError::TeamNotFound(_)) => {}
                        Err(e) => panic!("unexpected send_message error: {}", e),
                    }
                }
            })
        };

        barrier.wait();
        bridge.registry().force_delete_team("race-y").unwrap();
        creator.join().unwrap();
        sender.join().unwrap();

        bridge.registry().create_team("race-y", "lead").unwrap();
        bridge
            .registry()
            .add_teammate("race-y", TeamMember::new("dev", "dev", "coder"))
            .unwrap();
        assert!(
            bridge.tasks().get_tasks("race-y", None).unwrap().is_empty(),
            "round {}: recreated team inherited tasks",
            round
        );
        assert!(
            bridge.mailbox().get_messages("race-y", "dev", false).unwrap().is_empty(),
            "round {}: recreated team inherited messages",
            round
        );
        bridge.registry().force_delete_team("race-y").unwrap();
    }
}
