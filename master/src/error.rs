use std::{error::Error, fmt, io};

/// The master process result type.
pub type Result<T> = std::result::Result<T, MasterErr>;

/// Master startup and configuration failures. Everything after startup is
/// handled in place: no error in the running subsystems is fatal.
#[derive(Debug)]
pub enum MasterErr {
    Io(io::Error),
    Config { var: &'static str, msg: String },
}

impl MasterErr {
    pub(crate) fn config(var: &'static str, err: impl fmt::Display) -> Self {
        Self::Config {
            var,
            msg: err.to_string(),
        }
    }
}

impl fmt::Display for MasterErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MasterErr::Io(e) => write!(f, "io error: {e}"),
            MasterErr::Config { var, msg } => write!(f, "bad configuration in {var}: {msg}"),
        }
    }
}

impl Error for MasterErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MasterErr::Io(e) => Some(e),
            MasterErr::Config { .. } => None,
        }
    }
}

impl From<io::Error> for MasterErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for the binary's `io::Result` main.
impl From<MasterErr> for io::Error {
    fn from(value: MasterErr) -> Self {
        match value {
            MasterErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidInput, other.to_string()),
        }
    }
}
