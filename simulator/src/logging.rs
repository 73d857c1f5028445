//! Per-run logging handle
//!
//! Components never call the `log` macros with a bare target. Each receives a
//! [`RunLog`] at construction, which tags every record with the run name and
//! a component-specific target under `wfss_simulator::`, so
//! `RUST_LOG=wfss_simulator::disperser=debug` narrows output to one stage.

use std::fmt;
use std::sync::Arc;

use log::Level;

/// Cheap-to-clone logging handle for one simulation run
#[derive(Debug, Clone)]
pub struct RunLog {
    run: Arc<str>,
    target: Arc<str>,
}

impl RunLog {
    /// Create the root handle for a run, logging under `wfss_simulator::pipeline`
    pub fn new(run: &str) -> Self {
        Self {
            run: Arc::from(run),
            target: Arc::from("wfss_simulator::pipeline"),
        }
    }

    /// Handle for a named component of the same run
    pub fn component(&self, name: &str) -> Self {
        Self {
            run: Arc::clone(&self.run),
            target: Arc::from(format!("wfss_simulator::{name}")),
        }
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        log::log_enabled!(target: &*self.target, level)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: &*self.target, level, "[{}] {}", self.run, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_targets() {
        let log = RunLog::new("jw01234");
        assert_eq!(log.target(), "wfss_simulator::pipeline");
        assert_eq!(log.run(), "jw01234");

        let disperser = log.component("disperser");
        assert_eq!(disperser.target(), "wfss_simulator::disperser");
        assert_eq!(disperser.run(), "jw01234");
    }

    #[test]
    fn test_logging_without_logger_is_silent() {
        let _ = env_logger::builder().is_test(true).try_init();
        let log = RunLog::new("quiet").component("background");
        log.info(format_args!("level {} e/s", 1.5));
        log.debug(format_args!("debug output"));
    }
}
