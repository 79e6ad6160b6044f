mod common;

use anyhow::{Result, anyhow};
use archgen::generator::GenerationError;
use archgen::runtime::protocol::{WorkerEvent, WorkerResponse};
use archgen::runtime::{RequestId, RequestStatus, Scheduler};
use common::{GatedGenerator, fragment, request, wait_until};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

async fn next_started(started: &mut mpsc::UnboundedReceiver<String>) -> Result<String> {
    timeout(WAIT, started.recv())
        .await?
        .ok_or_else(|| anyhow!("generator dropped"))
}

async fn next_event(events: &mut mpsc::Receiver<WorkerResponse>) -> Result<WorkerResponse> {
    timeout(WAIT, events.recv())
        .await?
        .ok_or_else(|| anyhow!("event channel closed"))
}

/// Collects events until `terminals` terminal events have been seen.
async fn collect(events: &mut mpsc::Receiver<WorkerResponse>, terminals: usize) -> Result<Vec<WorkerResponse>> {
    let mut seen = Vec::new();
    while seen.iter().filter(|e: &&WorkerResponse| e.is_terminal()).count() < terminals {
        seen.push(next_event(events).await?);
    }
    Ok(seen)
}

fn id(s: &str) -> RequestId {
    RequestId::from(s)
}

#[tokio::test]
async fn test_requests_beyond_max_permits_wait_their_turn() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let r1_gate = generator.gate("r1");
    let r2_gate = generator.gate("r2");
    let r3_gate = generator.gate("r3");
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(2, generator.clone(), tx);

    assert!(scheduler.submit(request("r1", "A")));
    assert!(scheduler.submit(request("r2", "B")));
    assert!(scheduler.submit(request("r3", "A")));

    // 1. r1 and r2 start, r3 queues
    let mut first = vec![next_started(&mut started).await?, next_started(&mut started).await?];
    first.sort();
    assert_eq!(first, vec!["r1", "r2"]);
    assert_eq!(scheduler.status(&id("r1")), Some(RequestStatus::InFlight));
    assert_eq!(scheduler.status(&id("r2")), Some(RequestStatus::InFlight));
    assert_eq!(scheduler.status(&id("r3")), Some(RequestStatus::Pending));
    assert_eq!(scheduler.in_flight_len(), 2);
    assert_eq!(scheduler.available_permits(), 0);
    assert_eq!(scheduler.queue_length(), 1);

    // 2. r1 completes, r3 takes its permit
    r1_gate.send(Ok(fragment("r1"))).map_err(|_| anyhow!("r1 gate closed"))?;
    assert_eq!(next_started(&mut started).await?, "r3");
    assert_eq!(scheduler.status(&id("r1")), None);
    assert_eq!(scheduler.status(&id("r3")), Some(RequestStatus::InFlight));

    // 3. the rest complete
    r2_gate.send(Ok(fragment("r2"))).map_err(|_| anyhow!("r2 gate closed"))?;
    r3_gate.send(Ok(fragment("r3"))).map_err(|_| anyhow!("r3 gate closed"))?;
    let seen = collect(&mut events, 3).await?;

    let mut per_request: HashMap<String, Vec<&'static str>> = HashMap::new();
    for event in &seen {
        per_request.entry(event.request_id.to_string()).or_default().push(event.kind());
    }
    for name in ["r1", "r2", "r3"] {
        assert_eq!(per_request[name], vec![WorkerResponse::PROGRESS, WorkerResponse::RESULT], "events for {}", name);
    }

    assert!(wait_until(|| scheduler.pending_len() == 0).await);
    assert!(wait_until(|| scheduler.available_permits() == 2).await);
    assert!(generator.max_running() <= 2);
    Ok(())
}

#[tokio::test]
async fn test_result_carries_the_generated_fragment() -> Result<()> {
    let (generator, _started) = GatedGenerator::new();
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator, tx);

    scheduler.submit(request("only", "A"));

    let progress = next_event(&mut events).await?;
    match progress.event {
        WorkerEvent::Progress(info) => {
            assert_eq!(info.status, "processing");
            assert_eq!(info.progress, 0);
        }
        other => panic!("expected progress, got {:?}", other),
    }

    let result = next_event(&mut events).await?;
    assert_eq!(result.request_id, id("only"));
    assert_eq!(result.event, WorkerEvent::Result(fragment("only")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_count_never_exceeds_max_permits() -> Result<()> {
    let (generator, _started) = GatedGenerator::new();
    let mut gates = Vec::new();
    for i in 0..10 {
        gates.push(generator.gate(&format!("r{}", i)));
    }
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(3, generator.clone(), tx);

    for i in 0..10 {
        scheduler.submit(request(&format!("r{}", i), "A"));
    }

    // release in reverse submission order while sampling the in-flight count
    for gate in gates.into_iter().rev() {
        assert!(scheduler.in_flight_len() <= 3);
        let _ = gate.send(Ok(fragment("done")));
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let seen = collect(&mut events, 10).await?;
    assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 10);
    assert!(generator.max_running() <= 3);
    assert!(wait_until(|| scheduler.available_permits() == 3).await);
    Ok(())
}

#[tokio::test]
async fn test_failure_reports_error_and_frees_the_permit() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let r1_gate = generator.gate("r1");
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator, tx);

    scheduler.submit(request("r1", "A"));
    scheduler.submit(request("r2", "A"));
    assert_eq!(next_started(&mut started).await?, "r1");

    r1_gate
        .send(Err(GenerationError::Transport("connection reset".to_string())))
        .map_err(|_| anyhow!("r1 gate closed"))?;

    let seen = collect(&mut events, 2).await?;
    let r1_error = seen
        .iter()
        .find(|e| e.request_id == id("r1") && e.is_terminal())
        .ok_or_else(|| anyhow!("no terminal event for r1"))?;
    match &r1_error.event {
        WorkerEvent::Error(payload) => {
            assert_eq!(payload.kind, "transport");
            assert!(payload.message.contains("connection reset"));
        }
        other => panic!("expected error, got {:?}", other),
    }

    // r2 ran on the permit r1 gave back
    assert_eq!(next_started(&mut started).await?, "r2");
    assert!(seen.iter().any(|e| e.request_id == id("r2") && e.kind() == WorkerResponse::RESULT));
    Ok(())
}

#[tokio::test]
async fn test_cancel_pending_request_produces_no_events() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let r1_gate = generator.gate("r1");
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator.clone(), tx);

    scheduler.submit(request("r1", "A"));
    scheduler.submit(request("r2", "B"));
    assert_eq!(next_started(&mut started).await?, "r1");
    assert_eq!(scheduler.status(&id("r2")), Some(RequestStatus::Pending));

    assert!(scheduler.cancel(&id("r2")));
    assert_eq!(scheduler.status(&id("r2")), None);
    assert!(wait_until(|| scheduler.queue_length() == 0).await);

    r1_gate.send(Ok(fragment("r1"))).map_err(|_| anyhow!("r1 gate closed"))?;
    let seen = collect(&mut events, 1).await?;
    assert!(seen.iter().all(|e| e.request_id == id("r1")));

    // nothing further arrives for r2, and the generator never saw it
    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    assert!(started.try_recv().is_err());
    assert_eq!(generator.finished(), 1);
    assert!(wait_until(|| scheduler.available_permits() == 1).await);
    Ok(())
}

#[tokio::test]
async fn test_cancel_in_flight_request_drops_its_outcome() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let r1_gate = generator.gate("r1");
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator.clone(), tx);

    scheduler.submit(request("r1", "A"));
    assert_eq!(next_started(&mut started).await?, "r1");
    let progress = next_event(&mut events).await?;
    assert_eq!(progress.kind(), WorkerResponse::PROGRESS);

    assert!(scheduler.cancel(&id("r1")));
    assert_eq!(scheduler.pending_len(), 0);

    // the call still runs to completion and still holds its permit until then
    assert_eq!(scheduler.available_permits(), 0);
    r1_gate.send(Ok(fragment("r1"))).map_err(|_| anyhow!("r1 gate closed"))?;
    assert!(wait_until(|| scheduler.available_permits() == 1).await);
    assert_eq!(generator.finished(), 1);

    assert!(timeout(Duration::from_millis(100), events.recv()).await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_cancel_unknown_request_returns_false() -> Result<()> {
    let (generator, _started) = GatedGenerator::new();
    let (tx, _events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator, tx);

    assert!(!scheduler.cancel(&id("missing")));
    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_is_rejected_while_pending() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let dup_gate = generator.gate("dup");
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(2, generator.clone(), tx);

    assert!(scheduler.submit(request("dup", "A")));
    assert!(!scheduler.submit(request("dup", "B")));
    assert_eq!(scheduler.pending_len(), 1);
    assert_eq!(next_started(&mut started).await?, "dup");

    dup_gate.send(Ok(fragment("dup"))).map_err(|_| anyhow!("gate closed"))?;
    let seen = collect(&mut events, 1).await?;
    assert_eq!(seen.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(generator.finished(), 1);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_forgets_everything_and_refuses_new_work() -> Result<()> {
    let (generator, mut started) = GatedGenerator::new();
    let _r1_gate = generator.gate("r1");
    let (tx, _events) = mpsc::channel(100);
    let scheduler = Scheduler::new(1, generator, tx);

    scheduler.submit(request("r1", "A"));
    scheduler.submit(request("r2", "A"));
    assert_eq!(next_started(&mut started).await?, "r1");

    scheduler.shutdown();
    assert_eq!(scheduler.pending_len(), 0);
    assert!(scheduler.requests().is_empty());
    assert!(!scheduler.submit(request("r3", "A")));
    Ok(())
}

#[tokio::test]
async fn test_zero_max_permits_still_admits_one_at_a_time() -> Result<()> {
    let (generator, _started) = GatedGenerator::new();
    let (tx, mut events) = mpsc::channel(100);
    let scheduler = Scheduler::new(0, generator.clone(), tx);

    scheduler.submit(request("r1", "A"));
    scheduler.submit(request("r2", "A"));

    let seen = collect(&mut events, 2).await?;
    assert_eq!(seen.iter().filter(|e| e.kind() == WorkerResponse::RESULT).count(), 2);
    assert_eq!(generator.max_running(), 1);
    Ok(())
}
