use log::{debug, error, info, warn};

/// Thin wrapper over the `log` facade that prefixes every message with the
/// subject and step it concerns.
#[derive(Debug, Clone)]
pub struct LogManager {
    context: Option<String>,
}

impl LogManager {
    pub fn new() -> Self {
        Self { context: None }
    }

    pub fn scoped(subject: &str, step: impl std::fmt::Display) -> Self {
        Self {
            context: Some(format!("subject {} [{}]", subject, step)),
        }
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    fn prefixed(&self, message: &str) -> String {
        match &self.context {
            Some(context) => format!("{}: {}", context, message),
            None => message.to_string(),
        }
    }

    pub fn record(&self, message: &str) {
        info!("{}", self.prefixed(message));
    }

    pub fn detail(&self, message: &str) {
        debug!("{}", self.prefixed(message));
    }

    pub fn warn(&self, message: &str) {
        warn!("{}", self.prefixed(message));
    }

    pub fn error(&self, message: &str) {
        error!("{}", self.prefixed(message));
    }
}

impl Default for LogManager {
    fn default() -> Self {
        Self::new()
    }
}
