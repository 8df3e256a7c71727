//! End-to-end engine runs against scripted probes.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedProbe, ScriptedTier, by_key, request};
use key_pool::{
    Admission, BackoffPolicy, BatchController, KeyStatus, PaidDetectionQueue, PaidTierHook,
    StartOutcome,
};
use provider::{Outcome, ProviderKind, TierVerdict};

async fn run_to_end(controller: &BatchController, req: key_pool::BatchRequest) -> key_pool::RunSummary {
    match controller.start(req).await.unwrap() {
        StartOutcome::Completed(summary) => summary,
        StartOutcome::Cancelled { .. } => panic!("no run should be active"),
    }
}

#[tokio::test(start_paused = true)]
async fn duplicates_are_reported_and_scheduled_once() {
    let probe = Arc::new(ScriptedProbe::new(ProviderKind::OpenAi));
    let controller = BatchController::new();

    let summary = run_to_end(&controller, request("k1\nk1\nk2", probe.clone(), 5, 2)).await;

    assert_eq!(summary.total, 2);
    assert_eq!(summary.duplicates, 1);
    assert_eq!(summary.completed, 2);
    assert_eq!(probe.calls("k1"), 1);
    assert_eq!(probe.calls("k2"), 1);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_on_retry() {
    let probe = Arc::new(
        ScriptedProbe::new(ProviderKind::OpenAi)
            .script("k1", vec![Outcome::failure("HTTP 502"), Outcome::success()]),
    );
    let controller = BatchController::new();
    run_to_end(&controller, request("k1", probe.clone(), 5, 2)).await;

    let results = by_key(controller.last_results(None, true));
    assert_eq!(results["k1"].status, KeyStatus::Valid);
    assert_eq!(results["k1"].attempt, 1);
    assert!(results["k1"].last_error.is_none());
    assert_eq!(probe.calls("k1"), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_stops_after_one_attempt() {
    let probe = Arc::new(
        ScriptedProbe::new(ProviderKind::OpenAi)
            .script("k1", vec![Outcome::rate_limited("Rate Limited (429)")]),
    );
    let controller = BatchController::new();
    run_to_end(&controller, request("k1", probe.clone(), 5, 4)).await;

    let results = by_key(controller.last_results(None, true));
    assert_eq!(results["k1"].status, KeyStatus::RateLimited);
    assert_eq!(results["k1"].last_error.as_deref(), Some("Rate Limited (429)"));
    assert_eq!(probe.calls("k1"), 1);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_is_invalid_without_retry() {
    let probe = Arc::new(
        ScriptedProbe::new(ProviderKind::OpenAi).script("k1", vec![Outcome::failure("HTTP 401")]),
    );
    let controller = BatchController::new();
    run_to_end(&controller, request("k1", probe.clone(), 5, 3)).await;

    let results = by_key(controller.last_results(None, true));
    assert_eq!(results["k1"].status, KeyStatus::Invalid);
    assert_eq!(results["k1"].attempt, 0);
    assert_eq!(probe.calls("k1"), 1);
}

#[tokio::test(start_paused = true)]
async fn gemini_paid_tier_splits_paid_from_valid() {
    let tier = Arc::new(ScriptedTier::new(&[
        ("paid-key", TierVerdict::paid()),
        ("free-key", TierVerdict::free("permission_denied")),
    ]));
    let queue = Arc::new(PaidDetectionQueue::new(
        tier.clone(),
        5,
        BackoffPolicy::default(),
    ));
    let inner = Arc::new(ScriptedProbe::new(ProviderKind::Gemini).script(
        "bad-key",
        vec![Outcome::failure("HTTP 400: API key not valid")],
    ));
    let probe = Arc::new(PaidTierHook::new(inner, queue));
    let controller = BatchController::new();

    let summary = run_to_end(
        &controller,
        request("paid-key\nfree-key\nbad-key", probe, 5, 2),
    )
    .await;

    let results = by_key(controller.last_results(None, true));
    assert_eq!(results["paid-key"].status, KeyStatus::Paid);
    assert_eq!(results["paid-key"].is_paid_tier, Some(true));
    assert_eq!(results["free-key"].status, KeyStatus::Valid);
    assert_eq!(results["free-key"].is_paid_tier, Some(false));
    assert_eq!(results["bad-key"].status, KeyStatus::Invalid);
    assert!(results["bad-key"].is_paid_tier.is_none());
    assert_eq!(tier.calls(), 2, "only successful keys reach the tier probe");
    assert_eq!(summary.counts.paid, 1);
    assert_eq!(summary.counts.valid, 1);
    assert_eq!(summary.counts.invalid, 1);
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_holds_across_the_run() {
    let probe = Arc::new(
        ScriptedProbe::new(ProviderKind::OpenAi).latency(Duration::from_millis(100)),
    );
    let controller = BatchController::new();
    let input = (1..=6).map(|i| format!("k{i}")).collect::<Vec<_>>().join("\n");

    let summary = run_to_end(&controller, request(&input, probe.clone(), 2, 2)).await;

    assert_eq!(probe.peak(), 2);
    assert_eq!(summary.completed, 6);
    assert!(
        controller
            .last_results(None, false)
            .iter()
            .all(|v| v.status.is_terminal())
    );
}

#[tokio::test(start_paused = true)]
async fn every_record_terminal_and_attempts_bounded() {
    let probe = Arc::new(
        ScriptedProbe::new(ProviderKind::Claude)
            .script("flaky", vec![Outcome::failure("Network error: timeout")])
            .script("denied", vec![Outcome::failure("Permission denied (403)")])
            .script("busy", vec![Outcome::rate_limited("Rate Limited (429)")])
            .script(
                "garbled",
                vec![Outcome::failure("invalid response format")],
            )
            .script(
                "overloaded",
                vec![Outcome::failure("HTTP 503"), Outcome::failure("HTTP 529: Overloaded")],
            ),
    );
    let controller = BatchController::new();
    let max_retries = 2;
    let input = "ok\nflaky\ndenied\nbusy\ngarbled\noverloaded\nok\n\n";

    let summary = run_to_end(&controller, request(input, probe.clone(), 3, max_retries)).await;

    assert_eq!(summary.total, 6);
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.counts.total(), 6);

    let results = by_key(controller.last_results(None, true));
    for (key, view) in &results {
        assert!(view.status.is_terminal(), "{key} ended in {}", view.status);
        assert!(view.completed_at.is_some(), "{key} has no completion time");
        assert!(probe.calls(key) <= max_retries as usize + 1, "{key} over budget");
    }

    assert_eq!(probe.calls("flaky"), 3);
    assert_eq!(results["flaky"].last_error.as_deref(), Some("Network error: timeout"));
    assert_eq!(probe.calls("denied"), 3);
    assert_eq!(results["denied"].status, KeyStatus::Invalid);
    assert_eq!(results["denied"].last_error.as_deref(), Some("Permission denied (403)"));
    assert_eq!(probe.calls("garbled"), 1);
    // 503 is retried, 529 is not
    assert_eq!(probe.calls("overloaded"), 2);
    assert_eq!(results["overloaded"].last_error.as_deref(), Some("HTTP 529: Overloaded"));
    assert_eq!(results["ok"].status, KeyStatus::Valid);
}

#[tokio::test(start_paused = true)]
async fn cancel_twice_matches_cancel_once() {
    async fn cancelled_run(cancel_calls: usize) -> (key_pool::RunSummary, usize) {
        let probe = Arc::new(
            ScriptedProbe::new(ProviderKind::OpenAi).latency(Duration::from_millis(100)),
        );
        let controller = BatchController::new();
        let input = (1..=8).map(|i| format!("k{i}")).collect::<Vec<_>>().join("\n");
        let Admission::Started(prepared) = controller
            .begin(request(&input, probe.clone(), 2, 0))
            .unwrap()
        else {
            panic!("controller was idle");
        };

        let runner = controller.clone();
        let handle = tokio::spawn(async move { runner.execute(prepared).await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        for _ in 0..cancel_calls {
            assert!(controller.cancel());
        }
        let summary = handle.await.unwrap();
        (summary, probe.total_calls())
    }

    let (once, once_calls) = cancelled_run(1).await;
    let (twice, twice_calls) = cancelled_run(2).await;

    assert!(once.cancelled && twice.cancelled);
    assert_eq!(once.completed, twice.completed);
    assert_eq!(once_calls, twice_calls);
    // Keys 1-2 finished at 100ms, 3-4 were in flight at 150ms and drained.
    assert_eq!(once.completed, 4);
    assert!(once.completed < once.total);
}

#[tokio::test(start_paused = true)]
async fn progress_subscribers_see_the_final_snapshot() {
    let probe = Arc::new(ScriptedProbe::new(ProviderKind::OpenAi));
    let controller = BatchController::new();
    let mut progress = controller.progress();

    run_to_end(&controller, request("a\nb\nc", probe, 2, 0)).await;

    assert!(progress.has_changed().unwrap());
    let snapshot = progress.borrow_and_update().clone();
    assert!(snapshot.finished);
    assert!(!snapshot.cancelled);
    assert_eq!(snapshot.completed, 3);
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.counts.valid, 3);
    assert!(snapshot.run_id.is_some());
}

#[tokio::test(start_paused = true)]
async fn a_new_run_replaces_the_last_one() {
    let probe = Arc::new(ScriptedProbe::new(ProviderKind::OpenAi));
    let controller = BatchController::new();

    let first = run_to_end(&controller, request("a\nb", probe.clone(), 2, 0)).await;
    let second = run_to_end(&controller, request("c", probe, 2, 0)).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(controller.last_summary().unwrap().run_id, second.run_id);
    assert_eq!(controller.last_results(None, true).len(), 1);
}
