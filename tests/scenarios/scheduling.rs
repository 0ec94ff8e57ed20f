//! Scheduler scenarios: cron next-fire, non-overlap, and restore.

use chrono::{TimeZone, Utc};
use serde_json::json;
use stanchion_scheduler::{
    CronExpression, JobSpec, Schedule, Scheduler, SchedulerConfig,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Six-field hourly cron from 00:30 fires at the top of the next hour.
#[test]
fn cron_next_fire_at_the_hour() {
    let cron = CronExpression::parse("0 0 * * * *").unwrap();
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 30, 0).unwrap();
    let next = cron.next_fire(from, None).unwrap();
    assert_eq!(next, Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
}

/// A job scheduled faster than it completes never overlaps itself.
#[tokio::test]
async fn scheduled_job_never_overlaps() {
    let scheduler = Scheduler::new(SchedulerConfig::default().tick_interval(Duration::from_millis(50)));
    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let a = Arc::clone(&active);
    let p = Arc::clone(&peak);

    scheduler.add_job(
        JobSpec::new(Schedule::every(Duration::from_millis(1)), move |_ctx| {
            let a = Arc::clone(&a);
            let p = Arc::clone(&p);
            async move {
                let now = a.fetch_add(1, Ordering::SeqCst) + 1;
                p.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(80)).await;
                a.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        })
        .with_id("busy"),
    );

    scheduler.start().await;
    tokio::time::sleep(Duration::from_millis(400)).await;
    scheduler.stop().await;

    assert!(scheduler.get_stats().total_runs >= 2);
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

/// restoreState(saveState()) reproduces the observable scheduler state.
#[tokio::test]
async fn restore_is_idempotent() {
    let scheduler = Scheduler::with_defaults();
    let counter = Arc::new(AtomicU32::new(0));
    let c = Arc::clone(&counter);
    scheduler.add_job(
        JobSpec::new(Schedule::cron("0 0 * * * *"), move |_ctx| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(json!(null))
            }
        })
        .with_id("hourly"),
    );
    scheduler.buffer().set("carried", json!("over")).await.unwrap();

    let saved = scheduler.get_state().await;
    scheduler.restore_state(saved.clone()).await;
    let round_tripped = scheduler.get_state().await;

    assert_eq!(
        serde_json::to_value(&saved).unwrap(),
        serde_json::to_value(&round_tripped).unwrap()
    );
    assert_eq!(round_tripped.buffer.get("carried"), Some(&json!("over")));
}

/// Jobs run under the scheduler's buffer and can accumulate state.
#[tokio::test]
async fn jobs_accumulate_buffer_state() {
    let scheduler = Scheduler::with_defaults();
    scheduler.add_job(
        JobSpec::new(Schedule::every(Duration::from_secs(3600)), |ctx| async move {
            ctx.buffer
                .run(|state| {
                    let count = state
                        .get("count")
                        .and_then(serde_json::Value::as_i64)
                        .unwrap_or(0);
                    state.insert("count".to_string(), json!(count + 1));
                    Ok(())
                })
                .await?;
            Ok(json!(null))
        })
        .with_id("accumulate"),
    );

    scheduler.tick().await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(scheduler.buffer().get("count").await, Some(json!(1)));
}
