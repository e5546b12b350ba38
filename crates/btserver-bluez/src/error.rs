//! BlueZ backend errors and their mapping onto engine errors

use btserver_core::{AdvertiseError, ProbeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BluezError {
    #[error("BlueZ session unavailable: {0}")]
    Session(String),

    #[error("Adapter query failed: {0}")]
    Adapter(String),

    #[error("Profile registration failed: {0}")]
    Profile(String),

    #[error("BlueZ is not available on this platform")]
    Unsupported,
}

impl From<BluezError> for AdvertiseError {
    fn from(e: BluezError) -> Self {
        match e {
            BluezError::Profile(reason) => AdvertiseError::Rejected(reason),
            other => AdvertiseError::Unavailable(other.to_string()),
        }
    }
}

impl From<BluezError> for ProbeError {
    fn from(e: BluezError) -> Self {
        ProbeError::Failed(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_errors_are_rejections() {
        let e: AdvertiseError = BluezError::Profile("already registered".into()).into();
        assert!(matches!(e, AdvertiseError::Rejected(_)));

        let e: AdvertiseError = BluezError::Session("no dbus".into()).into();
        assert!(matches!(e, AdvertiseError::Unavailable(_)));
    }
}
