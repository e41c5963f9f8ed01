use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use ecs_runtime::task::TaskManager;

#[test]
fn dependency_chain_preserves_order() {
    let manager = TaskManager::with_workers(4);
    let trace: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));

    let mut predecessor = None;
    for step in 0..32u32 {
        let trace = trace.clone();
        let predecessors: Vec<_> = predecessor.iter().cloned().collect();
        predecessor = Some(manager.schedule(
            move || trace.lock().unwrap().push(step),
            &predecessors,
        ));
    }
    manager.activate_waiting_tasks();
    predecessor.unwrap().complete();

    assert_eq!(*trace.lock().unwrap(), (0..32).collect::<Vec<_>>());
}

#[test]
fn diamond_runs_tips_after_root_and_join_last() {
    let manager = TaskManager::with_workers(4);
    let trace: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let root = {
        let trace = trace.clone();
        manager.schedule(move || trace.lock().unwrap().push("root"), &[])
    };
    let left = {
        let trace = trace.clone();
        manager.schedule(move || trace.lock().unwrap().push("tip"), &[root.clone()])
    };
    let right = {
        let trace = trace.clone();
        manager.schedule(move || trace.lock().unwrap().push("tip"), &[root])
    };
    let join = {
        let trace = trace.clone();
        manager.schedule(move || trace.lock().unwrap().push("join"), &[left, right])
    };
    manager.activate_waiting_tasks();
    join.complete();

    let trace = trace.lock().unwrap();
    assert_eq!(*trace, vec!["root", "tip", "tip", "join"]);
}

#[test]
fn combine_barrier_holds_under_jittered_workloads() {
    let manager = TaskManager::with_workers(8);
    let completed = Arc::new(AtomicU32::new(0));
    let mut rng = rand::thread_rng();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let completed = completed.clone();
            let delay = Duration::from_micros(rng.gen_range(0..500));
            manager.schedule(
                move || {
                    std::thread::sleep(delay);
                    completed.fetch_add(1, Ordering::SeqCst);
                },
                &[],
            )
        })
        .collect();
    let barrier = manager.combine(&tasks);
    manager.activate_waiting_tasks();
    barrier.complete();

    assert_eq!(completed.load(Ordering::SeqCst), 64);
    assert!(tasks.iter().all(|task| task.is_finished()));
}

#[test]
fn incremental_activation_extends_a_running_graph() {
    let manager = TaskManager::with_workers(4);
    let counter = Arc::new(AtomicU32::new(0));

    let first = {
        let counter = counter.clone();
        manager.schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &[],
        )
    };
    manager.activate_waiting_tasks();
    first.complete();

    // Scheduling against an already-finished predecessor must still run.
    let second = {
        let counter = counter.clone();
        manager.schedule(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &[first],
        )
    };
    manager.activate_waiting_tasks();
    second.complete();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
}
