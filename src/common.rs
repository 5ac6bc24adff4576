//! Common functions and the SCXML feature registry.
//!

/// In tests and in builds without the `EnvLog` feature the log macros fall
/// back to plain stdout.
#[cfg(any(test, not(feature = "EnvLog")))]
pub use std::{println as debug, println as error, println as info, println as warn};

#[cfg(all(feature = "EnvLog", not(test)))]
pub use log::{debug, error, info, warn};

use std::collections::HashMap;
use std::fmt;
use std::fmt::{Display, Formatter};

/// Sets up env_logger for hosts embedding the crate: millisecond
/// timestamps, no target column. Level filtering stays under the control
/// of `RUST_LOG`.
pub fn init_logging() {
    #[cfg(feature = "EnvLog")]
    {
        let _ = env_logger::builder()
            .format_timestamp_millis()
            .format_target(false)
            .try_init();
    }
}

/// Support level of a single SCXML feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSupport {
    Supported,
    Partial,
    Unsupported,
}

impl Display for FeatureSupport {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FeatureSupport::Supported => f.write_str("supported"),
            FeatureSupport::Partial => f.write_str("partial"),
            FeatureSupport::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// Registry of SCXML features and their support level.\
/// Tests consult the registry to skip cases for unsupported features instead
/// of reporting spurious passes.
pub struct FeatureRegistry {
    features: HashMap<&'static str, FeatureSupport>,
}

impl Default for FeatureRegistry {
    fn default() -> Self {
        FeatureRegistry::new()
    }
}

impl FeatureRegistry {
    pub fn new() -> FeatureRegistry {
        let mut features = HashMap::new();
        for tag in [
            "scxml",
            "state",
            "parallel",
            "final",
            "initial",
            "history",
            "transition",
            "onentry",
            "onexit",
            "datamodel",
            "data",
            "assign",
            "log",
            "raise",
            "if",
            "elseif",
            "else",
            "foreach",
            "send",
            "param",
            "content",
        ] {
            features.insert(tag, FeatureSupport::Supported);
        }
        // Invokes are dispatched through the handler registry only,
        // child SCXML sessions are not spawned.
        features.insert("invoke", FeatureSupport::Partial);
        features.insert("script", FeatureSupport::Unsupported);
        features.insert("donedata", FeatureSupport::Unsupported);
        features.insert("finalize", FeatureSupport::Unsupported);
        FeatureRegistry { features }
    }

    pub fn support(&self, feature: &str) -> FeatureSupport {
        *self
            .features
            .get(feature)
            .unwrap_or(&FeatureSupport::Unsupported)
    }

    pub fn is_supported(&self, feature: &str) -> bool {
        self.support(feature) == FeatureSupport::Supported
    }

    /// All features with at least partial support, in no particular order.
    pub fn known_features(&self) -> Vec<&'static str> {
        self.features
            .iter()
            .filter(|(_, s)| **s != FeatureSupport::Unsupported)
            .map(|(n, _)| *n)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn feature_registry_defaults() {
        let reg = FeatureRegistry::new();
        assert_eq!(reg.support("state"), FeatureSupport::Supported);
        assert_eq!(reg.support("invoke"), FeatureSupport::Partial);
        assert_eq!(reg.support("script"), FeatureSupport::Unsupported);
        assert_eq!(reg.support("no-such-feature"), FeatureSupport::Unsupported);
        assert!(!reg.is_supported("invoke"));
    }
}
