use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::types::{HardwareInfo, Model, VolumeLevel};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Capabilities every adapter exposes
///
/// Methods a model cannot perform keep their default body, which returns
/// `Unsupported` without touching the network. Identifiers are the caller's
/// strings; each adapter validates them before any I/O.
#[async_trait]
pub trait Switcher: Send + Sync {
    /// The model this adapter drives
    fn model(&self) -> Model;

    /// Input currently routed to `output`
    async fn get_input(&self, ctx: &RequestContext, output: &str) -> Result<String>;

    /// Route `input` to `output`
    async fn set_input(&self, ctx: &RequestContext, output: &str, input: &str) -> Result<()>;

    /// Current routing of every output, keyed by output name
    ///
    /// Models with a single output key it by [`SINGLE_OUTPUT`].
    async fn audio_video_inputs(&self, ctx: &RequestContext) -> Result<BTreeMap<String, String>>;

    /// Normalized (0-100) volume of an audio zone or block
    async fn get_volume(&self, _ctx: &RequestContext, _block: &str) -> Result<VolumeLevel> {
        Err(self.unsupported("get volume"))
    }

    /// Set the normalized (0-100) volume of an audio zone or block
    async fn set_volume(&self, _ctx: &RequestContext, _block: &str, _level: VolumeLevel) -> Result<()> {
        Err(self.unsupported("set volume"))
    }

    async fn get_muted(&self, _ctx: &RequestContext, _block: &str) -> Result<bool> {
        Err(self.unsupported("get muted"))
    }

    async fn set_muted(&self, _ctx: &RequestContext, _block: &str, _muted: bool) -> Result<()> {
        Err(self.unsupported("set muted"))
    }

    /// Hardware details, or `Unimplemented` for models without an endpoint
    async fn hardware_info(&self, _ctx: &RequestContext) -> Result<HardwareInfo> {
        Ok(HardwareInfo::Unimplemented)
    }

    /// The error returned for a capability this model lacks
    fn unsupported(&self, operation: &'static str) -> SwitcherError {
        SwitcherError::Unsupported {
            operation,
            model: self.model().name(),
        }
    }
}

/// Key of the only output in a single-output routing snapshot
pub const SINGLE_OUTPUT: &str = "";

/// Parse a caller-supplied numeric identifier
pub(crate) fn parse_index(kind: &str, value: &str) -> Result<u32> {
    value.trim().parse::<u32>().map_err(|_| {
        SwitcherError::InvalidParameter(format!("{} must be a number, got {:?}", kind, value))
    })
}

/// Reject volume levels outside 0-100
pub(crate) fn check_level(level: VolumeLevel) -> Result<()> {
    if level > crate::volume::VolumeCurve::MAX_LEVEL {
        return Err(SwitcherError::InvalidParameter(format!(
            "volume must be between 0 and 100, got {}",
            level
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parse_index_rejects_garbage() {
        assert_eq!(parse_index("input", " 3 ").unwrap(), 3);
        for bad in ["", "one", "-1", "2.5"] {
            assert_eq!(
                parse_index("input", bad).unwrap_err().kind(),
                ErrorKind::InvalidParameter
            );
        }
    }

    #[test]
    fn check_level_bounds() {
        assert!(check_level(0).is_ok());
        assert!(check_level(100).is_ok());
        assert_eq!(check_level(101).unwrap_err().kind(), ErrorKind::InvalidParameter);
    }
}
