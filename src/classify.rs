//! Map raw subprocess failure text to a user-facing category with a remediation hint.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    OutputOverflow,
    NameResolution,
    PermissionDenied,
    ImageNotFound,
    BinaryNotFound,
    Generic,
}

impl FailureCategory {
    pub fn summary(self) -> &'static str {
        match self {
            FailureCategory::OutputOverflow => "command output exceeded the capture limit",
            FailureCategory::NameResolution => "network connectivity issue while contacting a registry",
            FailureCategory::PermissionDenied => "permission denied talking to docker",
            FailureCategory::ImageNotFound => "a container image could not be found",
            FailureCategory::BinaryNotFound => "docker or docker compose was not found",
            FailureCategory::Generic => "deployment failed",
        }
    }

    pub fn remediation(self) -> &'static str {
        match self {
            FailureCategory::OutputOverflow => {
                "Docker produced too much output. Retry, or pull images separately with `docker compose pull`."
            }
            FailureCategory::NameResolution => {
                "Check internet connectivity and DNS, then retry. Images cannot be pulled while offline."
            }
            FailureCategory::PermissionDenied => {
                "Make sure the current user can reach the docker daemon (docker group or rootless docker)."
            }
            FailureCategory::ImageNotFound => {
                "Check image names and tags in docker-compose.yml and your registry credentials."
            }
            FailureCategory::BinaryNotFound => {
                "Install Docker with the compose plugin and make sure `docker` is on PATH."
            }
            FailureCategory::Generic => "Inspect the docker output above and retry.",
        }
    }
}

/// Every needle of a rule must appear in the lower-cased message.
struct Rule {
    all_of: &'static [&'static str],
    category: FailureCategory,
}

// Order matters: the first matching rule wins, and image lookups are checked before the
// generic "not found".
const RULES: &[Rule] = &[
    Rule { all_of: &["output buffer exceeded"], category: FailureCategory::OutputOverflow },
    Rule { all_of: &["maxbuffer"], category: FailureCategory::OutputOverflow },
    Rule { all_of: &["no such host"], category: FailureCategory::NameResolution },
    Rule { all_of: &["dial tcp"], category: FailureCategory::NameResolution },
    Rule { all_of: &["temporary failure in name resolution"], category: FailureCategory::NameResolution },
    Rule { all_of: &["permission denied"], category: FailureCategory::PermissionDenied },
    Rule { all_of: &["pull access denied"], category: FailureCategory::ImageNotFound },
    Rule { all_of: &["manifest unknown"], category: FailureCategory::ImageNotFound },
    Rule { all_of: &["image", "not found"], category: FailureCategory::ImageNotFound },
    Rule { all_of: &["not found"], category: FailureCategory::BinaryNotFound },
];

pub fn categorize(message: &str) -> FailureCategory {
    let lower = message.to_ascii_lowercase();
    RULES
        .iter()
        .find(|r| r.all_of.iter().all(|needle| lower.contains(needle)))
        .map(|r| r.category)
        .unwrap_or(FailureCategory::Generic)
}

/// A subprocess failure with its category and the original text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFailure {
    pub category: FailureCategory,
    pub raw: String,
}

impl ClassifiedFailure {
    pub fn remediation(&self) -> &'static str {
        self.category.remediation()
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.category {
            FailureCategory::Generic => write!(f, "deployment failed: {}", self.raw),
            other => write!(f, "{}: {}", other.summary(), self.raw),
        }
    }
}

pub fn classify(message: &str) -> ClassifiedFailure {
    ClassifiedFailure {
        category: categorize(message),
        raw: message.trim().to_string(),
    }
}
