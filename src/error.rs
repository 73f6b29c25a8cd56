use thiserror::Error;

use crate::eval::RuntimeError;
use crate::event::EventError;
use crate::parser::CompileError;
use crate::platform::PlatformError;
use crate::scheduler::ScheduleError;
use crate::store::StoreError;

/// Crate-level error wrapper for embedders that want one error type.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Schedule(#[from] ScheduleError),
}

pub type EngineResult<T> = Result<T, EngineError>;
