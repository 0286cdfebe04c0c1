#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// What a run does. Exactly one per invocation; download-all is the default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    DownloadAll { resume_from: Option<String> },
    CountOnly,
    Compare,
    Album { name: String, sanitized: bool },
    FixIncomplete,
    Dedupe { thorough: bool },
}

impl Mode {
    /// Modes that work without contacting the server at all.
    pub fn can_run_offline(&self) -> bool {
        matches!(self, Mode::Dedupe { .. })
    }

    /// Modes that write into the output directory and so take the
    /// instance lock.
    pub fn writes_local(&self) -> bool {
        !matches!(self, Mode::CountOnly | Mode::Compare)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_predicates() {
        assert!(Mode::Dedupe { thorough: false }.can_run_offline());
        assert!(!Mode::FixIncomplete.can_run_offline());
        assert!(Mode::FixIncomplete.writes_local());
        assert!(!Mode::Compare.writes_local());
        assert!(!Mode::CountOnly.writes_local());
    }
}
