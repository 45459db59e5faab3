use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("could not pin module: {0}")]
    PinFailed(String),

    #[error("module '{0}' is still pinned")]
    ModulePinned(String),

    #[error("calls are already redirected")]
    AlreadyAttached,

    #[error("no redirection is active")]
    NotAttached,

    #[error("redirect table error: {0}")]
    Table(String),

    #[error("region error: {0}")]
    Region(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
