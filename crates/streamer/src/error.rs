//! Session error types

use crate::backend::{BindError, BindStep};
use common::{DeviceMatchCriteria, StatusCode};
use std::fmt;
use thiserror::Error;

/// Which plugin binding failed, and at which half
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStage {
    DevicePlugin,
    DeviceQuery,
    InterfacePlugin,
    InterfaceQuery,
}

impl BindStage {
    pub(crate) fn for_device(err: &BindError) -> Self {
        match err.step {
            BindStep::Plugin => Self::DevicePlugin,
            BindStep::Query => Self::DeviceQuery,
        }
    }

    pub(crate) fn for_interface(err: &BindError) -> Self {
        match err.step {
            BindStep::Plugin => Self::InterfacePlugin,
            BindStep::Query => Self::InterfaceQuery,
        }
    }
}

impl fmt::Display for BindStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DevicePlugin => "device plugin",
            Self::DeviceQuery => "device interface query",
            Self::InterfacePlugin => "interface plugin",
            Self::InterfaceQuery => "interface interface query",
        };
        f.write_str(name)
    }
}

/// Errors that end a session early
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("No device matching {criteria} was found (status {status})")]
    DeviceNotFound {
        criteria: DeviceMatchCriteria,
        status: StatusCode,
    },

    #[error("Binding the {stage} failed (status {status})")]
    BindFailed { stage: BindStage, status: StatusCode },

    #[error("Device open failed ({open_status}) and seize failed ({seize_status})")]
    OpenFailed {
        open_status: StatusCode,
        seize_status: StatusCode,
    },

    #[error("Device exposes no interface (status {status})")]
    NoInterfaceFound { status: StatusCode },

    #[error("Write of frame {frame_index} to pipe {pipe} failed (status {status})")]
    WriteFailed {
        pipe: u8,
        frame_index: u32,
        status: StatusCode,
    },
}

impl SessionError {
    /// Raw platform status carried by the error
    pub fn status(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound { status, .. }
            | Self::BindFailed { status, .. }
            | Self::NoInterfaceFound { status }
            | Self::WriteFailed { status, .. } => *status,
            Self::OpenFailed { seize_status, .. } => *seize_status,
        }
    }

    /// Whether the error aborted device acquisition
    ///
    /// A failed first write stops streaming but the session itself still
    /// counts as having started.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::WriteFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SessionError::WriteFailed {
            pipe: 2,
            frame_index: 0,
            status: StatusCode::NOT_FOUND,
        };
        let msg = err.to_string();
        assert!(msg.contains("pipe 2"));
        assert!(msg.contains("0xe00002f0"));

        let err = SessionError::DeviceNotFound {
            criteria: DeviceMatchCriteria::new(0x15e4, 0x0053),
            status: StatusCode::NOT_FOUND,
        };
        assert!(err.to_string().contains("15e4:0053"));
    }

    #[test]
    fn test_fatality() {
        let write = SessionError::WriteFailed {
            pipe: 1,
            frame_index: 0,
            status: StatusCode::IO_ERROR,
        };
        assert!(!write.is_fatal());
        assert_eq!(write.status(), StatusCode::IO_ERROR);

        let open = SessionError::OpenFailed {
            open_status: StatusCode::EXCLUSIVE_ACCESS,
            seize_status: StatusCode::NOT_PERMITTED,
        };
        assert!(open.is_fatal());
        assert_eq!(open.status(), StatusCode::NOT_PERMITTED);
    }

    #[test]
    fn test_bind_stage_mapping() {
        let err = BindError::query(StatusCode::UNSUPPORTED);
        assert_eq!(BindStage::for_device(&err), BindStage::DeviceQuery);
        assert_eq!(BindStage::for_interface(&err), BindStage::InterfaceQuery);
    }
}
