// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

/// Unrecoverable presentation failures. Surface staleness is never reported
/// through this type; see [`crate::ChainStatus`] and [`crate::Acquired`].
#[derive(Error, Debug)]
pub enum ChainError {
    /// Creating one of the chain's objects failed.
    #[error("failed to create {what}: {source}")]
    Create {
        what: &'static str,
        #[source]
        source: vk::Result,
    },

    /// Querying the surface or device failed.
    #[error("{what} query failed: {source}")]
    Query {
        what: &'static str,
        #[source]
        source: vk::Result,
    },

    /// None of the candidate depth formats supports optimal-tiling depth attachments.
    #[error("no supported depth format among {candidates:?}")]
    NoDepthFormat { candidates: Vec<vk::Format> },

    /// A fence wait or acquire outlived the frame loop's timeout; treated as
    /// device loss.
    #[error("{op} timed out after {timeout_ns} ns")]
    Timeout { op: &'static str, timeout_ns: u64 },

    /// Waiting, acquiring, submitting or presenting failed for a reason other
    /// than an out-of-date or suboptimal surface.
    #[error("{op} failed: {source}")]
    Frame {
        op: &'static str,
        #[source]
        source: vk::Result,
    },

    /// `submit` named an image the current frame slot did not acquire.
    #[error("image {index} was not acquired by the current frame slot")]
    NotAcquired { index: u32 },

    /// `submit` named an image index the chain does not have.
    #[error("image index {index} out of range (chain has {count} images)")]
    ImageIndex { index: u32, count: usize },
}

impl ChainError {
    pub(crate) fn create(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| Self::Create { what, source }
    }

    pub(crate) fn query(what: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| Self::Query { what, source }
    }

    pub(crate) fn frame(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |source| Self::Frame { op, source }
    }

    /// True when the device is gone and the whole renderer must restart.
    pub fn is_device_lost(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Create { source, .. }
            | Self::Query { source, .. }
            | Self::Frame { source, .. } => *source == vk::Result::ERROR_DEVICE_LOST,
            _ => false,
        }
    }
}

pub type ChainResult<T> = std::result::Result<T, ChainError>;
