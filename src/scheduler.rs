//! The standalone scheduler: selects self-scheduled checks and
//! computes their deterministic first-fire splay.

use std::time::Duration;

use crate::check::Check;
use crate::settings::Settings;
use crate::splay;

/// One standalone check's schedule: fire after `splay`, then every
/// `interval`.
#[derive(Debug, Clone)]
pub struct ScheduleEntry {
    pub check: Check,
    pub splay: Duration,
    pub interval: Duration,
}

/// A test-mode override: splay pinned to zero, interval pinned to 0.5 s,
/// regardless of the check's configured interval. An external input, never
/// derived from settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulerOverride {
    pub test_mode: bool,
}

/// Build the standalone schedule: local checks with `standalone == true`
/// and an integer `interval`, each paired with its deterministic splay.
pub fn build_schedule(
    settings: &Settings,
    now_ms: u64,
    schedule_override: SchedulerOverride,
) -> Vec<ScheduleEntry> {
    settings
        .standalone_checks()
        .into_iter()
        .filter_map(|check| {
            let interval_secs = check.interval?;
            let (splay, interval) = if schedule_override.test_mode {
                (Duration::ZERO, Duration::from_millis(500))
            } else {
                let splay_secs = splay::splay_seconds(
                    &settings.client.name,
                    &check.name,
                    interval_secs.saturating_mul(1000),
                    now_ms,
                );
                (Duration::from_secs_f64(splay_secs), Duration::from_secs(interval_secs))
            };
            Some(ScheduleEntry {
                check,
                splay,
                interval,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn settings() -> Settings {
        Settings::from_value(json!({
            "client": {"name": "h1", "subscriptions": ["all"]},
            "checks": {
                "disk": {"command": "df", "standalone": true, "interval": 60},
                "no_interval": {"command": "x", "standalone": true},
                "not_standalone": {"command": "y", "interval": 30},
            }
        }))
        .unwrap()
    }

    #[test]
    fn selects_standalone_checks_with_interval() {
        let schedule = build_schedule(&settings(), 1_700_000_000_000, SchedulerOverride::default());
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule[0].check.name, "disk");
        assert_eq!(schedule[0].interval, Duration::from_secs(60));
        assert!(schedule[0].splay < Duration::from_secs(60));
    }

    #[test]
    fn test_mode_overrides_splay_and_interval() {
        let schedule = build_schedule(
            &settings(),
            1_700_000_000_000,
            SchedulerOverride { test_mode: true },
        );
        assert_eq!(schedule[0].splay, Duration::ZERO);
        assert_eq!(schedule[0].interval, Duration::from_millis(500));
    }

    #[test]
    fn splay_is_deterministic_across_calls() {
        let a = build_schedule(&settings(), 1_700_000_000_000, SchedulerOverride::default());
        let b = build_schedule(&settings(), 1_700_000_000_000, SchedulerOverride::default());
        assert_eq!(a[0].splay, b[0].splay);
    }
}
