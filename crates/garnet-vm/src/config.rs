//! Engine configuration.

use std::path::PathBuf;

/// Default frame limit per fiber.
pub const DEFAULT_MAX_FRAME_DEPTH: usize = 10_000;

/// Tunables for an [`ExecutionContext`](crate::ExecutionContext).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// Frames a fiber may hold before `SystemStackError` is raised
    pub max_frame_depth: usize,
    /// Print unhandled exceptions to stderr before returning them to the host
    pub report_unhandled: bool,
    /// Initial `$0`
    pub program_name: String,
    /// Initial `$LOAD_PATH`
    pub load_path: Vec<PathBuf>,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frame_depth: DEFAULT_MAX_FRAME_DEPTH,
            report_unhandled: true,
            program_name: "garnet".to_string(),
            load_path: Vec::new(),
        }
    }
}

impl VmConfig {
    /// Defaults overridden by `GARNET_MAX_DEPTH` and `GARNET_REPORT_UNHANDLED`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`VmConfig::from_env`] with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(depth) = lookup("GARNET_MAX_DEPTH").and_then(|v| v.trim().parse().ok()) {
            config.max_frame_depth = depth;
        }
        if let Some(flag) = lookup("GARNET_REPORT_UNHANDLED") {
            config.report_unhandled = !matches!(flag.trim(), "0" | "false" | "no" | "off");
        }
        config
    }

    /// Sets the frame limit.
    pub fn with_max_frame_depth(mut self, depth: usize) -> Self {
        self.max_frame_depth = depth;
        self
    }

    /// Enables or disables stderr reports of unhandled exceptions.
    pub fn with_report_unhandled(mut self, report: bool) -> Self {
        self.report_unhandled = report;
        self
    }

    /// Sets `$0`.
    pub fn with_program_name(mut self, name: impl Into<String>) -> Self {
        self.program_name = name.into();
        self
    }

    /// Appends a `$LOAD_PATH` entry.
    pub fn with_load_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.load_path.push(path.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_frame_depth, DEFAULT_MAX_FRAME_DEPTH);
        assert!(config.report_unhandled);
    }

    #[test]
    fn test_lookup_overrides() {
        let config = VmConfig::from_lookup(|key| match key {
            "GARNET_MAX_DEPTH" => Some("64".to_string()),
            "GARNET_REPORT_UNHANDLED" => Some("off".to_string()),
            _ => None,
        });
        assert_eq!(config.max_frame_depth, 64);
        assert!(!config.report_unhandled);
    }

    #[test]
    fn test_bad_depth_ignored() {
        let config = VmConfig::from_lookup(|key| {
            (key == "GARNET_MAX_DEPTH").then(|| "lots".to_string())
        });
        assert_eq!(config.max_frame_depth, DEFAULT_MAX_FRAME_DEPTH);
    }

    #[test]
    fn test_builder() {
        let config = VmConfig::default()
            .with_max_frame_depth(5)
            .with_program_name("script.rb")
            .with_load_path("/lib");
        assert_eq!(config.max_frame_depth, 5);
        assert_eq!(config.program_name, "script.rb");
        assert_eq!(config.load_path, vec![PathBuf::from("/lib")]);
    }
}
