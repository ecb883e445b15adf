use std::fmt;

use crate::signal::StopSignal;

/// Long-running synchronization task owned by a [`super::SharedInformerFactory`]
pub trait SharedInformer: Send + Sync {
    /// Run until `stop` fires. Called at most once per informer by the factory.
    fn run(&self, stop: StopSignal);

    /// Whether `run` has returned
    fn is_stopped(&self) -> bool;

    /// Label used for thread names and logs
    fn name(&self) -> String {
        "informer".to_string()
    }
}

/// Identifies the kind of resource an informer synchronizes.
///
/// The factory keeps one informer per distinct value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceType(String);

impl ResourceType {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceType {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}

impl From<String> for ResourceType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}
