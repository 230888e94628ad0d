use core::{error::Error, fmt::Display};

use hal::task::StartError;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum KernErrorKind {
    AllocError,
    InvalidConfig,
    AlreadyBooted,
    LoggerInstalled,
    ProcessExiting,
    SpawnFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernError {
    kind: KernErrorKind,
}

impl KernError {
    pub fn kind(&self) -> KernErrorKind {
        self.kind
    }

    pub fn as_error_code(&self) -> u32 {
        self.kind() as u32
    }
}

impl Display for KernError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "kernel error occurred: {:?}", self.kind())
    }
}

impl From<KernErrorKind> for KernError {
    fn from(value: KernErrorKind) -> Self {
        KernError { kind: value }
    }
}

impl From<StartError> for KernError {
    fn from(_: StartError) -> Self {
        KernErrorKind::SpawnFailed.into()
    }
}

impl Error for KernError {}

pub type KernResult<T> = Result<T, KernError>;
