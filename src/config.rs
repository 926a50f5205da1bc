use std::path::PathBuf;

pub const ENV_WORKSPACE: &str = "GRADESD_WORKSPACE";
pub const ENV_LOG: &str = "GRADESD_LOG";
pub const ENV_LOG_JSON: &str = "GRADESD_LOG_JSON";

const DEFAULT_LOG_LEVEL: &str = "info";

/// Startup settings. Everything else arrives per request.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let workspace = lookup(ENV_WORKSPACE)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let log_level = lookup(ENV_LOG)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());
        let log_json = lookup(ENV_LOG_JSON)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Self {
            workspace,
            log_level,
            log_json,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn defaults_without_env() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.workspace, None);
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.log_json);
    }

    #[test]
    fn reads_workspace_and_logging() {
        let cfg = config_from(&[
            (ENV_WORKSPACE, " /tmp/school "),
            (ENV_LOG, "gradesd=debug"),
            (ENV_LOG_JSON, "TRUE"),
        ]);
        assert_eq!(cfg.workspace, Some(PathBuf::from("/tmp/school")));
        assert_eq!(cfg.log_level, "gradesd=debug");
        assert!(cfg.log_json);
    }

    #[test]
    fn blank_workspace_is_ignored() {
        let cfg = config_from(&[(ENV_WORKSPACE, "   "), (ENV_LOG_JSON, "0")]);
        assert_eq!(cfg.workspace, None);
        assert!(!cfg.log_json);
    }
}
