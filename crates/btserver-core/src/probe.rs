//! Platform capability probing

use async_trait::async_trait;

use crate::error::ProbeError;

/// Answers whether the radio exists and whether it is switched on
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// An adapter is present
    async fn is_available(&self) -> Result<bool, ProbeError>;

    /// The adapter is present and powered
    async fn is_enabled(&self) -> Result<bool, ProbeError>;
}

/// Fixed answers, for transports that do not depend on a radio
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe {
    pub available: bool,
    pub enabled: bool,
}

impl StaticProbe {
    pub fn new(available: bool, enabled: bool) -> Self {
        Self { available, enabled }
    }

    /// Reports an available, enabled adapter
    pub fn present() -> Self {
        Self::new(true, true)
    }

    /// Reports no adapter
    pub fn absent() -> Self {
        Self::new(false, false)
    }
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::present()
    }
}

#[async_trait]
impl CapabilityProbe for StaticProbe {
    async fn is_available(&self) -> Result<bool, ProbeError> {
        Ok(self.available)
    }

    async fn is_enabled(&self) -> Result<bool, ProbeError> {
        Ok(self.available && self.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_adapter_is_available_but_not_enabled() {
        let probe = StaticProbe::new(true, false);
        assert!(probe.is_available().await.unwrap());
        assert!(!probe.is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_absent_adapter_is_never_enabled() {
        let probe = StaticProbe::new(false, true);
        assert!(!probe.is_available().await.unwrap());
        assert!(!probe.is_enabled().await.unwrap());
        assert!(!StaticProbe::absent().is_enabled().await.unwrap());
    }
}
