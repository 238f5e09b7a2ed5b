use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::FileCache;
use crate::digest::DigestBuilder;
use crate::extractor_memory::DomainMemory;
use crate::models::ScheduleSetting;
use crate::orchestrator::Orchestrator;
use crate::store;

/// Scheduler wake interval.
const TICK_SECS: u64 = 30;

/// Dispatcher loop over the ScheduleSettings table. Each due task runs
/// the same operation the API triggers manually; concurrent runs of one
/// task are suppressed via its `is_running` flag.
#[allow(clippy::too_many_arguments)]
pub async fn scheduler_loop(
    pool: SqlitePool,
    orchestrator: Arc<Orchestrator>,
    digest_builder: Arc<DigestBuilder>,
    cache: Arc<FileCache>,
    memory: Arc<DomainMemory>,
    cancel: CancellationToken,
) {
    info!("scheduler started");

    // Anchor for tasks that have never run: without a stable reference
    // the next-run computation would drift forward with `now` and a
    // daily tick could never land.
    let mut first_seen: std::collections::HashMap<String, chrono::DateTime<Utc>> = std::collections::HashMap::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("scheduler shutting down");
                return;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(TICK_SECS)) => {}
        }

        let settings = match store::get_schedule_settings(&pool).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to load schedule settings");
                continue;
            }
        };

        let now = Utc::now();
        for setting in settings {
            if !setting.enabled {
                continue;
            }
            if setting.is_running {
                debug!(task = %setting.task_name, "task already running, skipping");
                continue;
            }

            let tz: Tz = match setting.timezone.parse() {
                Ok(tz) => tz,
                Err(_) => {
                    warn!(task = %setting.task_name, tz = %setting.timezone, "invalid task timezone");
                    continue;
                }
            };

            let after = setting
                .last_run
                .unwrap_or_else(|| *first_seen.entry(setting.task_name.clone()).or_insert(now - Duration::seconds(1)));
            let Some(next_run) = compute_next_run(&setting, tz, after) else {
                continue;
            };

            // Keep next_run visible to the status endpoint
            if setting.next_run != Some(next_run)
                && let Err(e) = store::set_task_runtimes(&pool, &setting.task_name, None, Some(next_run)).await
            {
                warn!(task = %setting.task_name, error = %e, "failed to persist next_run");
            }

            if next_run > now {
                continue;
            }

            if let Err(e) = store::set_task_running(&pool, &setting.task_name, true).await {
                error!(task = %setting.task_name, error = %e, "failed to mark task running");
                continue;
            }

            let pool = pool.clone();
            let orchestrator = orchestrator.clone();
            let digest_builder = digest_builder.clone();
            let cache = cache.clone();
            let memory = memory.clone();
            let task_name = setting.task_name.clone();
            let cancel = cancel.clone();

            tokio::spawn(async move {
                if cancel.is_cancelled() {
                    let _ = store::set_task_running(&pool, &task_name, false).await;
                    return;
                }
                info!(task = %task_name, "scheduled task starting");

                let run_result = run_task(&task_name, &orchestrator, &digest_builder, &cache, &memory).await;
                match run_result {
                    Ok(detail) => info!(task = %task_name, detail = %detail, "scheduled task complete"),
                    Err(e) => error!(task = %task_name, error = %e, "scheduled task failed"),
                }

                let finished = Utc::now();
                if let Err(e) = store::set_task_runtimes(&pool, &task_name, Some(finished), None).await {
                    error!(task = %task_name, error = %e, "failed to record last_run");
                }
                if let Err(e) = store::set_task_running(&pool, &task_name, false).await {
                    error!(task = %task_name, error = %e, "failed to clear running flag");
                }
            });
        }
    }
}

async fn run_task(
    task_name: &str,
    orchestrator: &Orchestrator,
    digest_builder: &DigestBuilder,
    cache: &FileCache,
    memory: &DomainMemory,
) -> anyhow::Result<String> {
    match task_name {
        "news_processing" => {
            let stats = orchestrator.run_full_cycle().await?;
            Ok(format!(
                "{} fetched, {} processed",
                stats.articles_fetched, stats.articles_processed
            ))
        }
        "telegram_digest" => {
            let outcome = orchestrator.send_telegram_digest().await;
            Ok(outcome.detail)
        }
        "daily_summaries" => {
            let count = digest_builder.ensure_daily_summaries(Utc::now().date_naive(), false).await?;
            Ok(format!("{count} categories summarized"))
        }
        "backup" => {
            orchestrator.run_maintenance(cache, memory).await;
            Ok("maintenance complete".to_string())
        }
        other => anyhow::bail!("unknown task '{other}'"),
    }
}

/// Compute the next fire time after `after`, in the task's timezone.
///
/// `daily` fires at (hour, minute) on the configured weekdays; `hourly`
/// fires at the configured minute of every hour; `interval` fires every
/// `task_config.interval_minutes`, clamped to 1..1440.
pub fn compute_next_run(setting: &ScheduleSetting, tz: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match setting.schedule_type.as_str() {
        "daily" => {
            let time = NaiveTime::from_hms_opt(
                setting.hour.clamp(0, 23) as u32,
                setting.minute.clamp(0, 59) as u32,
                0,
            )?;
            let weekdays = setting.weekdays();
            let after_local = after.with_timezone(&tz);
            let today = after_local.date_naive();

            // Scan forward over a week plus DST slack
            for day_offset in 0..9i64 {
                let date = today + Duration::days(day_offset);
                let weekday = date.weekday().number_from_monday();
                if !weekdays.is_empty() && !weekdays.contains(&weekday) {
                    continue;
                }
                if let Some(candidate) = tz.from_local_datetime(&date.and_time(time)).earliest()
                    && candidate > after_local
                {
                    return Some(candidate.with_timezone(&Utc));
                }
                // A nonexistent local time (DST gap) falls through to the next day
            }
            None
        }
        "hourly" => {
            let minute = setting.minute.clamp(0, 59) as u32;
            let after_local = after.with_timezone(&tz);
            let base = after_local.with_minute(minute)?.with_second(0)?.with_nanosecond(0)?;
            let candidate = if base > after_local { base } else { base + Duration::hours(1) };
            Some(candidate.with_timezone(&Utc))
        }
        "interval" => {
            let minutes = setting
                .task_config()
                .get("interval_minutes")
                .and_then(|v| v.as_i64())
                .unwrap_or(30)
                .clamp(1, 1440);
            Some(after + Duration::minutes(minutes))
        }
        other => {
            warn!(task = %setting.task_name, schedule_type = %other, "unknown schedule type");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setting(schedule_type: &str, hour: i64, minute: i64, weekdays: &str, config: &str) -> ScheduleSetting {
        ScheduleSetting {
            id: 1,
            task_name: "news_processing".to_string(),
            enabled: true,
            schedule_type: schedule_type.to_string(),
            hour,
            minute,
            weekdays: weekdays.to_string(),
            timezone: "Europe/Belgrade".to_string(),
            task_config: config.to_string(),
            last_run: None,
            next_run: None,
            is_running: false,
        }
    }

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn daily_fires_today_when_time_ahead() {
        let tz: Tz = "Europe/Belgrade".parse().unwrap();
        // 2025-08-01 is a Friday; 06:00 UTC = 08:00 local (CEST)
        let after = at("2025-08-01T06:00:00Z");
        let s = setting("daily", 20, 0, "[1,2,3,4,5,6,7]", "{}");
        let next = compute_next_run(&s, tz, after).unwrap();
        assert_eq!(next, at("2025-08-01T18:00:00Z"), "20:00 local is 18:00 UTC in summer");
    }

    #[test]
    fn daily_rolls_to_next_allowed_weekday() {
        let tz: Tz = "Europe/Belgrade".parse().unwrap();
        // Friday evening, past 20:00 local; only Monday (1) allowed
        let after = at("2025-08-01T19:00:00Z");
        let s = setting("daily", 20, 0, "[1]", "{}");
        let next = compute_next_run(&s, tz, after).unwrap();
        let local = next.with_timezone(&tz);
        assert_eq!(local.weekday().number_from_monday(), 1);
        assert_eq!(local.time(), NaiveTime::from_hms_opt(20, 0, 0).unwrap());
    }

    #[test]
    fn hourly_fires_at_minute() {
        let tz: Tz = "Europe/Belgrade".parse().unwrap();
        let s = setting("hourly", 0, 15, "[]", "{}");

        let before_minute = at("2025-08-01T06:10:00Z");
        assert_eq!(compute_next_run(&s, tz, before_minute).unwrap(), at("2025-08-01T06:15:00Z"));

        let after_minute = at("2025-08-01T06:20:00Z");
        assert_eq!(compute_next_run(&s, tz, after_minute).unwrap(), at("2025-08-01T07:15:00Z"));
    }

    #[test]
    fn interval_clamped_to_day() {
        let tz: Tz = "Europe/Belgrade".parse().unwrap();
        let after = at("2025-08-01T06:00:00Z");

        let s = setting("interval", 0, 0, "[]", r#"{"interval_minutes": 30}"#);
        assert_eq!(compute_next_run(&s, tz, after).unwrap(), at("2025-08-01T06:30:00Z"));

        let huge = setting("interval", 0, 0, "[]", r#"{"interval_minutes": 99999}"#);
        assert_eq!(compute_next_run(&huge, tz, after).unwrap(), at("2025-08-02T06:00:00Z"));

        let zero = setting("interval", 0, 0, "[]", r#"{"interval_minutes": 0}"#);
        assert_eq!(compute_next_run(&zero, tz, after).unwrap(), at("2025-08-01T06:01:00Z"));
    }

    #[test]
    fn unknown_schedule_type_yields_none() {
        let tz: Tz = "Europe/Belgrade".parse().unwrap();
        let s = setting("weekly", 0, 0, "[]", "{}");
        assert!(compute_next_run(&s, tz, at("2025-08-01T06:00:00Z")).is_none());
    }
}
