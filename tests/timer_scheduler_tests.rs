use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use taskforge::{
    core::timers::{timer_callback, TimerCallback, TimerPreset, TimerScheduler},
    AppError,
};

fn counting_callback(counter: &Arc<AtomicUsize>) -> TimerCallback {
    let counter = Arc::clone(counter);
    timer_callback(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    })
}

#[tokio::test]
async fn test_six_field_task_fires_every_second() {
    let timers = TimerScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));

    assert!(timers
        .start_custom_task("* * * * * *", "every-second", counting_callback(&fired))
        .unwrap());

    tokio::time::sleep(Duration::from_millis(2_600)).await;
    let count = fired.load(Ordering::SeqCst);
    assert!((2..=3).contains(&count), "fired {} times", count);

    let status = timers.tasks_status();
    let task = &status["every-second"];
    assert!(task.running);
    assert!(task.execution_count >= 2);
    assert!(task.last_execution.is_some());
    assert_eq!(task.expression, "* * * * * *");

    timers.stop_all_tasks();
}

#[tokio::test]
async fn test_stopped_task_stops_firing() {
    let timers = TimerScheduler::new();
    let fired = Arc::new(AtomicUsize::new(0));
    timers
        .start_custom_task("* * * * * *", "ticker", counting_callback(&fired))
        .unwrap();

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert!(timers.stop_task("ticker"));
    // Let any callback spawned just before the stop finish.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let at_stop = fired.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(fired.load(Ordering::SeqCst), at_stop);

    let status = timers.tasks_status();
    assert!(!status["ticker"].running);
    assert_eq!(status["ticker"].execution_count as usize, at_stop);
}

#[tokio::test]
async fn test_invalid_cron_is_rejected_and_not_listed() {
    let timers = TimerScheduler::new();
    let err = timers
        .start_custom_task("61 * * * *", "broken", timer_callback(|| async {}))
        .unwrap_err();

    assert!(matches!(err, AppError::InvalidCronExpression { .. }));
    assert!(!timers.contains("broken"));
    assert!(!timers.tasks_status().contains_key("broken"));
}

#[tokio::test]
async fn test_preset_armed_twice_yields_one_timer() {
    let timers = TimerScheduler::new();

    assert!(timers.start_preset(TimerPreset::Hourly).unwrap());
    assert!(!timers.start_preset(TimerPreset::Hourly).unwrap());

    let status = timers.tasks_status();
    let armed: Vec<_> = status.iter().filter(|(_, task)| task.running).collect();
    assert_eq!(armed.len(), 1);
    assert_eq!(armed[0].0, "hourly-task");
}

#[tokio::test]
async fn test_stop_all_disarms_everything() {
    let timers = TimerScheduler::new();
    timers.start_preset(TimerPreset::Daily).unwrap();
    timers.start_preset(TimerPreset::Weekly).unwrap();
    timers
        .start_custom_task("*/10 * * * *", "report", timer_callback(|| async {}))
        .unwrap();

    timers.stop_all_tasks();
    timers.stop_all_tasks();

    let status = timers.tasks_status();
    assert!(status.values().all(|task| !task.running));
    assert!(!status.contains_key("report"));
    assert_eq!(status.len(), TimerPreset::ALL.len());

    // Identifiers are free again.
    assert!(timers.start_preset(TimerPreset::Daily).unwrap());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let timers = TimerScheduler::new();
    timers.start_preset(TimerPreset::Monthly).unwrap();

    assert!(timers.stop_task("monthly-task"));
    assert!(!timers.is_running("monthly-task"));
    // Re-registering a stopped id replaces it and arms it.
    assert!(timers.start_preset(TimerPreset::Monthly).unwrap());
    assert!(timers.is_running("monthly-task"));

    assert!(!timers.start_task("monthly-task"));
    assert!(!timers.start_task("no-such-task"));
}
