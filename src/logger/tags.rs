/// Log tags identifying the subsystem a message originates from
///
/// Each tag maps to a --debug-<key> command line flag via `to_debug_key()`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogTag {
    System,
    Database,
    Pool,
    Api,
    Selector,
    Fetcher,
    Processor,
    Staging,
    Failures,
    Recovery,
    Classifier,
    Stats,
    Summary,
    Test,
    Other(String),
}

impl LogTag {
    /// Plain uppercase name used in file output (no colors)
    pub fn to_plain_string(&self) -> String {
        match self {
            LogTag::System => "SYSTEM".to_string(),
            LogTag::Database => "DATABASE".to_string(),
            LogTag::Pool => "POOL".to_string(),
            LogTag::Api => "API".to_string(),
            LogTag::Selector => "SELECTOR".to_string(),
            LogTag::Fetcher => "FETCHER".to_string(),
            LogTag::Processor => "PROCESSOR".to_string(),
            LogTag::Staging => "STAGING".to_string(),
            LogTag::Failures => "FAILURES".to_string(),
            LogTag::Recovery => "RECOVERY".to_string(),
            LogTag::Classifier => "CLASSIFY".to_string(),
            LogTag::Stats => "STATS".to_string(),
            LogTag::Summary => "SUMMARY".to_string(),
            LogTag::Test => "TEST".to_string(),
            LogTag::Other(s) => s.to_uppercase(),
        }
    }

    /// Lowercase key used for --debug-<key> flag matching
    pub fn to_debug_key(&self) -> String {
        match self {
            LogTag::Other(s) => s.to_lowercase(),
            _ => self.to_plain_string().to_lowercase(),
        }
    }
}

impl std::fmt::Display for LogTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_plain_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_key_is_lowercase() {
        assert_eq!(LogTag::Fetcher.to_debug_key(), "fetcher");
        assert_eq!(LogTag::Classifier.to_debug_key(), "classify");
        assert_eq!(LogTag::Other("Custom".to_string()).to_debug_key(), "custom");
    }
}
