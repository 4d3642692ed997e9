//! Daily scheduled export.
//!
//! - Fires on a standard 5-field cron expression (min hour dom mon dow),
//!   evaluated in a fixed reference timezone
//! - Each fire re-reads the identifier file and exports the previous calendar
//!   day (in that timezone) as a single-day window
//! - The summary is logged and, when a notifier is configured, sent out

use std::{path::PathBuf, sync::Arc, time::Duration};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{parse_identifier_list, BatchSummary},
    orchestrator::BatchOrchestrator,
    ports::Notifier,
    window::{previous_day_in, DateWindow},
    Error, Result,
};

#[derive(Clone)]
pub struct ExportScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    identifiers_file: PathBuf,
    expr: CronExpr,
    tz: Tz,
    orchestrator: Arc<BatchOrchestrator>,
    notifier: Option<Arc<dyn Notifier>>,
    job: Mutex<Option<JobEntry>>,
}

struct JobEntry {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExportScheduler {
    pub fn new(
        identifiers_file: impl Into<PathBuf>,
        cron: &str,
        tz: Tz,
        orchestrator: Arc<BatchOrchestrator>,
        notifier: Option<Arc<dyn Notifier>>,
    ) -> Result<Self> {
        let expr = CronExpr::parse(cron)?;
        Ok(Self {
            inner: Arc::new(SchedulerInner {
                identifiers_file: identifiers_file.into(),
                expr,
                tz,
                orchestrator,
                notifier,
                job: Mutex::new(None),
            }),
        })
    }

    /// Spawn the job loop. Calling `start` again replaces the running loop.
    pub async fn start(&self) {
        self.stop().await;

        let cancel = CancellationToken::new();
        let scheduler = self.clone();
        let cancel_clone = cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler.job_loop(cancel_clone).await;
        });

        *self.inner.job.lock().await = Some(JobEntry { cancel, handle });

        match self.next_run(Utc::now()) {
            Some(next) => tracing::info!(next = %next, file = %self.inner.identifiers_file.display(), "daily export scheduled"),
            None => tracing::warn!("cron expression never fires"),
        }
    }

    pub async fn stop(&self) {
        if let Some(job) = self.inner.job.lock().await.take() {
            job.cancel.cancel();
            job.handle.abort(); // best-effort
        }
    }

    /// Next fire time strictly after `now`, in the reference timezone.
    pub fn next_run(&self, now: DateTime<Utc>) -> Option<DateTime<Tz>> {
        self.inner.expr.next_after(now.with_timezone(&self.inner.tz))
    }

    async fn job_loop(&self, cancel: CancellationToken) {
        loop {
            let now = Utc::now();
            let Some(next) = self.next_run(now) else {
                tracing::error!("scheduled export has no next run (stopping)");
                break;
            };

            let dur = (next.with_timezone(&Utc) - now)
                .to_std()
                .unwrap_or(Duration::from_secs(0));

            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(dur) => {
                if let Err(e) = self.run_once(Utc::now()).await {
                  tracing::error!(error = %e, "scheduled export failed");
                }
              }
            }
        }
    }

    /// Execute one scheduled export as if fired at `fired_at`.
    pub async fn run_once(&self, fired_at: DateTime<Utc>) -> Result<BatchSummary> {
        let day = previous_day_in(&self.inner.tz, fired_at);
        tracing::info!(day = %day, "running scheduled export");

        let res = self.export_day(DateWindow::single_day(day)).await;

        if let Some(notifier) = &self.inner.notifier {
            let text = match &res {
                Ok(summary) => format!("Daily export for {day}\n{}", summary.to_report()),
                Err(e) => format!("Daily export for {day} failed: {e}"),
            };
            if let Err(e) = notifier.notify(&text).await {
                tracing::warn!(error = %e, "failed to send export notification");
            }
        }

        res
    }

    async fn export_day(&self, window: DateWindow) -> Result<BatchSummary> {
        let path = &self.inner.identifiers_file;
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Config(format!(
                "cannot read identifier file {}: {e}",
                path.display()
            ))
        })?;
        let identifiers = parse_identifier_list(&content);

        let summary = self.inner.orchestrator.run(&identifiers, &window).await?;
        match serde_json::to_string(&summary) {
            Ok(json) => tracing::info!(summary = %json, "daily processing completed"),
            Err(e) => tracing::warn!(error = %e, "failed to render summary"),
        }
        Ok(summary)
    }
}

// === Cron expression engine ===

#[derive(Clone, Debug)]
pub struct CronExpr {
    min: Field,
    hour: Field,
    dom: Field,
    mon: Field,
    dow: Field,
}

#[derive(Clone, Debug)]
struct Field {
    min: u32,
    max: u32,
    any: bool,
    allowed: Vec<bool>, // index = value
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let parts = expr.split_whitespace().collect::<Vec<_>>();
        if parts.len() != 5 {
            return Err(Error::Config(format!(
                "cron: expected 5 fields, got {}",
                parts.len()
            )));
        }

        Ok(Self {
            min: Field::parse(parts[0], 0, 59, false)?,
            hour: Field::parse(parts[1], 0, 23, false)?,
            dom: Field::parse(parts[2], 1, 31, false)?,
            mon: Field::parse(parts[3], 1, 12, false)?,
            dow: Field::parse(parts[4], 0, 6, true)?,
        })
    }

    pub fn matches<Z: TimeZone>(&self, dt: &DateTime<Z>) -> bool {
        if !self.min.contains(dt.minute())
            || !self.hour.contains(dt.hour())
            || !self.mon.contains(dt.month())
        {
            return false;
        }

        // Standard cron semantics: if both DOM and DOW are restricted, match when EITHER matches.
        let dom_match = self.dom.contains(dt.day());
        let dow_match = self.dow.contains(dt.weekday().num_days_from_sunday());

        match (self.dom.any, self.dow.any) {
            (true, true) => true,
            (true, false) => dow_match,
            (false, true) => dom_match,
            (false, false) => dom_match || dow_match,
        }
    }

    /// First matching minute strictly after `now`.
    pub fn next_after<Z: TimeZone>(&self, now: DateTime<Z>) -> Option<DateTime<Z>> {
        let tz = now.timezone();
        // Truncate on the UTC instant: local wall times repeat when clocks go back.
        let start = (now.with_timezone(&Utc) + chrono::Duration::minutes(1))
            .with_second(0)?
            .with_nanosecond(0)?;
        let mut t = start.with_timezone(&tz);

        // Hard cap to avoid infinite loops for impossible expressions.
        let max_iters = 366usize * 24 * 60;
        for _ in 0..max_iters {
            if self.matches(&t) {
                return Some(t);
            }
            t = t + chrono::Duration::minutes(1);
        }
        None
    }
}

impl Field {
    fn parse(raw: &str, min: u32, max: u32, allow_7_as_0: bool) -> Result<Self> {
        let raw = raw.trim();
        let mut allowed = vec![false; (max + 1) as usize];
        // Day-of-week accepts 7 for Sunday, including as a range end (`5-7`).
        let upper = if allow_7_as_0 { 7 } else { max };

        for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (base, step) = match part.split_once('/') {
                Some((a, b)) => {
                    let step: u32 = b
                        .trim()
                        .parse()
                        .map_err(|_| Error::Config(format!("cron: invalid step: {b}")))?;
                    if step == 0 {
                        return Err(Error::Config("cron: step must be > 0".to_string()));
                    }
                    (a.trim(), Some(step))
                }
                None => (part, None),
            };

            let (start, end) = if base == "*" {
                (min, max)
            } else if let Some((a, b)) = base.split_once('-') {
                (parse_u32(a.trim())?, parse_u32(b.trim())?)
            } else {
                let a = parse_u32(base)?;
                (a, if step.is_some() { max } else { a })
            };

            if start < min || end > upper || start > end {
                return Err(Error::Config(format!("cron: value out of range: {part}")));
            }

            let mut v = start;
            while v <= end {
                allowed[(v % (max + 1)) as usize] = true;
                v = v.saturating_add(step.unwrap_or(1));
            }
        }

        let any = (min..=max).all(|v| allowed[v as usize]);
        if !any && !allowed.iter().any(|a| *a) {
            return Err(Error::Config(format!("cron: empty field: {raw:?}")));
        }

        Ok(Self {
            min,
            max,
            any,
            allowed,
        })
    }

    fn contains(&self, v: u32) -> bool {
        if v < self.min || v > self.max {
            return false;
        }
        self.allowed.get(v as usize).copied().unwrap_or(false)
    }
}

fn parse_u32(s: &str) -> Result<u32> {
    s.parse()
        .map_err(|_| Error::Config(format!("cron: invalid number: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{build, RunPolicy};
    use crate::testing::{raw, FakeNotifier, FakeSink, FakeSource};
    use chrono_tz::US::Pacific;

    #[test]
    fn cron_expr_parses_and_matches_basic() {
        let expr = CronExpr::parse("0 * * * *").unwrap();
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        assert!(expr.matches(&dt));
        let dt2 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 1, 0).unwrap();
        assert!(!expr.matches(&dt2));
    }

    #[test]
    fn cron_expr_rejects_malformed_input() {
        for bad in ["* * * *", "61 * * * *", "*/0 * * * *", "a * * * *", "5-1 * * * *"] {
            assert!(CronExpr::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn cron_dow_accepts_seven_as_sunday() {
        let expr = CronExpr::parse("0 12 * * 7").unwrap();
        // 2026-01-04 is a Sunday.
        assert!(expr.matches(&Utc.with_ymd_and_hms(2026, 1, 4, 12, 0, 0).unwrap()));
        assert!(!expr.matches(&Utc.with_ymd_and_hms(2026, 1, 5, 12, 0, 0).unwrap()));
    }

    #[test]
    fn daily_fire_is_evaluated_in_reference_timezone() {
        let expr = CronExpr::parse("1 0 * * *").unwrap();
        // 2024-03-01 07:00 UTC is 2024-02-29 23:00 in Los Angeles (PST, UTC-8).
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap().with_timezone(&Pacific);
        let next = expr.next_after(now).unwrap();
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 3, 1, 8, 1, 0).unwrap()
        );
        assert_eq!((next.hour(), next.minute()), (0, 1));
    }

    #[test]
    fn cron_dow_ranges_may_end_on_seven() {
        let expr = CronExpr::parse("0 9 * * 5-7").unwrap();
        // 2026-01-02 Fri, 2026-01-03 Sat, 2026-01-04 Sun, 2026-01-05 Mon.
        for day in 2..=4 {
            assert!(expr.matches(&Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap()), "{day}");
        }
        assert!(!expr.matches(&Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()));

        assert!(CronExpr::parse("0 9 * * 1-7").unwrap().dow.any);
        assert!(CronExpr::parse("0 9 * * 8").is_err());
        assert!(CronExpr::parse("0 9 * * 7-1").is_err());
    }

    #[test]
    fn next_fire_is_found_during_repeated_autumn_hour() {
        let expr = CronExpr::parse("1 0 * * *").unwrap();
        // 2024-11-03 08:30 UTC is 01:30 PDT, an hour Los Angeles lives through twice.
        let now = Utc.with_ymd_and_hms(2024, 11, 3, 8, 30, 0).unwrap().with_timezone(&Pacific);
        let next = expr.next_after(now).expect("daily cron must keep firing");
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 11, 4, 8, 1, 0).unwrap()
        );

        // Minute steps walk across the fall-back boundary in real time.
        let hourly = CronExpr::parse("0 * * * *").unwrap();
        let before = Utc.with_ymd_and_hms(2024, 11, 3, 8, 59, 30).unwrap().with_timezone(&Pacific);
        let next = hourly.next_after(before).unwrap();
        assert_eq!(
            next.with_timezone(&Utc),
            Utc.with_ymd_and_hms(2024, 11, 3, 9, 0, 0).unwrap()
        );
        assert_eq!(next.hour(), 1);
    }

    #[test]
    fn next_after_is_strictly_after_now() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        let dt = Utc.with_ymd_and_hms(2026, 1, 1, 10, 5, 0).unwrap();
        let next = expr.next_after(dt).unwrap();
        assert_eq!(next.minute(), 10);
        assert_eq!(next.second(), 0);
    }

    #[tokio::test]
    async fn run_once_exports_previous_pacific_day_and_notifies() {
        let dir = tempfile::tempdir().unwrap();
        let list = dir.path().join("channels.txt");
        std::fs::write(&list, "alpha\n\nghost\n").unwrap();

        // Fired at 00:01 PST on 2024-01-02 (08:01 UTC): yesterday is 2024-01-01.
        let fired = Utc.with_ymd_and_hms(2024, 1, 2, 8, 1, 0).unwrap();
        let source = Arc::new(FakeSource::default().with_channel(
            "alpha",
            vec![
                raw(1, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()), Some("in")),
                raw(2, Some(Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap()), Some("today")),
                raw(3, Some(Utc.with_ymd_and_hms(2023, 12, 31, 12, 0, 0).unwrap()), Some("old")),
            ],
        ));
        let sink = Arc::new(FakeSink::default());
        let orch = Arc::new(build(
            source,
            sink.clone(),
            dir.path().join("out"),
            RunPolicy::default(),
        ));
        let notifier = Arc::new(FakeNotifier::default());
        let sched = ExportScheduler::new(
            &list,
            "1 0 * * *",
            Pacific,
            orch,
            Some(notifier.clone() as Arc<dyn Notifier>),
        )
        .unwrap();

        let summary = sched.run_once(fired).await.unwrap();

        assert_eq!(summary.outcomes.len(), 2);
        assert_eq!(summary.outcomes[0].message_count, Some(1));
        assert!(!summary.outcomes[1].is_success());

        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Daily export for 2024-01-01"));
        assert!(sent[0].contains("1 ok, 1 failed"));
    }

    #[tokio::test]
    async fn missing_identifier_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Arc::new(build(
            Arc::new(FakeSource::default()),
            Arc::new(FakeSink::default()),
            dir.path(),
            RunPolicy::default(),
        ));
        let notifier = Arc::new(FakeNotifier::default());
        let sched = ExportScheduler::new(
            dir.path().join("absent.txt"),
            "1 0 * * *",
            Pacific,
            orch,
            Some(notifier.clone() as Arc<dyn Notifier>),
        )
        .unwrap();

        let err = sched.run_once(Utc::now()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(notifier.sent()[0].contains("failed"));
    }

    #[tokio::test]
    async fn start_and_stop_manage_the_job_loop() {
        let dir = tempfile::tempdir().unwrap();
        let orch = Arc::new(build(
            Arc::new(FakeSource::default()),
            Arc::new(FakeSink::default()),
            dir.path(),
            RunPolicy::default(),
        ));
        let sched = ExportScheduler::new(dir.path().join("x"), "1 0 * * *", Pacific, orch, None)
            .unwrap();

        sched.start().await;
        assert!(sched.inner.job.lock().await.is_some());
        sched.stop().await;
        assert!(sched.inner.job.lock().await.is_none());
    }
}
