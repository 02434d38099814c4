use std::collections::BTreeMap;
use std::time::Duration;

/// Static per-kind execution metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMetadata {
    pub base_timeout: Option<Duration>,
    pub retryable: bool,
    pub max_retries: u32,
    pub wait_for_completion: bool,
    pub critical: bool,
}

impl Default for CommandMetadata {
    fn default() -> Self {
        Self {
            base_timeout: None,
            retryable: true,
            max_retries: 3,
            wait_for_completion: false,
            critical: false,
        }
    }
}

impl CommandMetadata {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            base_timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn waiting(mut self) -> Self {
        self.wait_for_completion = true;
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }

    pub fn no_retry(mut self) -> Self {
        self.retryable = false;
        self.max_retries = 0;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Kind → metadata table, built once when the player is assembled.
#[derive(Debug, Clone, Default)]
pub struct CommandRegistry {
    entries: BTreeMap<String, CommandMetadata>,
    fallback: CommandMetadata,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fallback(fallback: CommandMetadata) -> Self {
        Self {
            entries: BTreeMap::new(),
            fallback,
        }
    }

    pub fn register(&mut self, kind: impl Into<String>, metadata: CommandMetadata) -> &mut Self {
        self.entries.insert(kind.into(), metadata);
        self
    }

    pub fn is_registered(&self, kind: &str) -> bool {
        self.entries.contains_key(kind)
    }

    pub fn metadata(&self, kind: &str) -> &CommandMetadata {
        self.entries.get(kind).unwrap_or(&self.fallback)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod registry_tests {
    use super::*;

    #[test]
    fn unknown_kinds_use_fallback() {
        let mut registry = CommandRegistry::new();
        registry.register(
            "wait",
            CommandMetadata::with_timeout(Duration::from_secs(60)).waiting(),
        );

        assert!(registry.metadata("wait").wait_for_completion);
        assert_eq!(
            registry.metadata("wait").base_timeout,
            Some(Duration::from_secs(60))
        );
        assert_eq!(registry.metadata("other"), &CommandMetadata::default());
        assert!(!registry.is_registered("other"));
        assert_eq!(registry.kinds().collect::<Vec<_>>(), vec!["wait"]);
    }

    #[test]
    fn builders_compose() {
        let metadata = CommandMetadata::default().critical().no_retry();
        assert!(metadata.critical);
        assert!(!metadata.retryable);
        assert_eq!(metadata.max_retries, 0);
    }
}
