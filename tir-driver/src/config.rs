use std::env;

/// Process-wide configuration read once from the environment (§6), never re-read mid-pipeline.
/// Mirrors the teacher's session-config-at-startup pattern (`midenc-session::Session::new`
/// reads its `Options` once and holds them for the session's lifetime).
#[derive(Debug, Clone, Copy, Default)]
pub struct DriverConfig {
    /// `MOLT_MIDEND_HARD_FAIL=1` — raise `ConvergenceFailure` instead of degrading.
    pub hard_fail: bool,
    /// `MOLT_MIDEND_BUDGET_MS` — overrides the policy's tier-default budget when set.
    pub budget_ms_override: Option<u64>,
    /// `MOLT_MIDEND_DEV_ENABLE` — force dev-tier passes (idempotence check) even in release.
    pub dev_enable: bool,
    /// `MOLT_SCCP_MAX_ITERS` — overrides the policy's tier-default SCCP iteration cap.
    pub sccp_max_iters_override: Option<usize>,
}

impl DriverConfig {
    pub fn from_env() -> Self {
        Self {
            hard_fail: read_bool_flag("MOLT_MIDEND_HARD_FAIL"),
            budget_ms_override: read_u64("MOLT_MIDEND_BUDGET_MS"),
            dev_enable: read_bool_flag("MOLT_MIDEND_DEV_ENABLE"),
            sccp_max_iters_override: read_u64("MOLT_SCCP_MAX_ITERS").map(|v| v as usize),
        }
    }
}

fn read_bool_flag(key: &str) -> bool {
    matches!(env::var(key).ok().as_deref(), Some("1"))
}

fn read_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_env_produces_default_config() {
        // SAFETY: single-threaded test process; no other test in this crate mutates these keys.
        unsafe {
            for key in [
                "MOLT_MIDEND_HARD_FAIL",
                "MOLT_MIDEND_BUDGET_MS",
                "MOLT_MIDEND_DEV_ENABLE",
                "MOLT_SCCP_MAX_ITERS",
            ] {
                env::remove_var(key);
            }
        }
        let config = DriverConfig::from_env();
        assert!(!config.hard_fail);
        assert_eq!(config.budget_ms_override, None);
        assert!(!config.dev_enable);
        assert_eq!(config.sccp_max_iters_override, None);
    }

    #[test]
    fn malformed_budget_override_is_ignored() {
        // SAFETY: single-threaded test process; no other test in this crate mutates this key.
        unsafe {
            env::set_var("MOLT_MIDEND_BUDGET_MS", "not-a-number");
        }
        let config = DriverConfig::from_env();
        assert_eq!(config.budget_ms_override, None);
        unsafe {
            env::remove_var("MOLT_MIDEND_BUDGET_MS");
        }
    }
}
