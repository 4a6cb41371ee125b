use actor_framework::config::RunnerConfig;
use actor_sample::lifecycle::{DemoConfig, DemoSystem};
use std::time::Duration;

fn config(heartbeat_ms: u64, ping_rounds: u32) -> DemoConfig {
    DemoConfig {
        runner: RunnerConfig {
            workers: 2,
            ..RunnerConfig::default()
        },
        heartbeat: Duration::from_millis(heartbeat_ms),
        ping_rounds,
        ..DemoConfig::default()
    }
}

/// `(destination, payload)` of every report until the console stays quiet for `quiet`.
async fn reports(demo: &DemoSystem, quiet: Duration) -> Vec<(String, String)> {
    let mut seen = Vec::new();
    while let Some(report) = demo.next_report(quiet).await {
        seen.push((
            report.destination().to_string(),
            String::from_utf8_lossy(report.payload().as_bytes()).into_owned(),
        ));
    }
    seen
}

fn to(seen: &[(String, String)], destination: &str) -> Vec<String> {
    seen.iter()
        .filter(|(d, _)| d == destination)
        .map(|(_, p)| p.clone())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_supervised_jobs_reply_and_report() {
    let demo = DemoSystem::start(config(60_000, 0)).await.unwrap();

    demo.job(1, "hello", "jobs").await;
    demo.job(2, "actors", "jobs").await;
    demo.job(7, "nobody", "jobs").await;

    let seen = reports(&demo, Duration::from_secs(1)).await;
    let mut replies = to(&seen, "console:jobs");
    replies.sort();
    assert_eq!(replies, vec!["ACTORS", "HELLO", "no such worker"]);

    let mut done = to(&seen, "console:sup");
    done.sort();
    assert_eq!(done, vec!["w1 done (1)", "w2 done (2)"]);

    demo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_pinger_uses_timer_then_finishes() {
    let demo = DemoSystem::start(config(60_000, 2)).await.unwrap();

    let seen = reports(&demo, Duration::from_secs(1)).await;
    assert_eq!(to(&seen, "console:pinger"), vec!["ping", "ping", "finished"]);

    demo.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_beats_until_stopped() {
    let demo = DemoSystem::start(config(100, 0)).await.unwrap();

    let mut beats = Vec::new();
    while beats.len() < 3 {
        let report = demo.next_report(Duration::from_secs(1)).await.unwrap();
        if report.destination().last() == "heart" {
            beats.push(String::from_utf8_lossy(report.payload().as_bytes()).into_owned());
        }
    }
    assert_eq!(beats, vec!["beat 1", "beat 2", "beat 3"]);

    demo.stop_heartbeat().await;
    let rest = reports(&demo, Duration::from_secs(1)).await;
    assert_eq!(to(&rest, "console:heart").last().map(String::as_str), Some("stopped"));

    demo.shutdown().await;
}
