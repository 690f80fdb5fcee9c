use std::path::PathBuf;

/// Errors that can end the analysis of a single target.
///
/// None of these abort a whole run: the controller logs them, removes the
/// target's output directory and moves on to the next target.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid parameter: {0}")]
    Parameter(String),

    #[error("I/O error: {source} ({path})")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },

    #[error("htslib error: {source} ({path})")]
    Htslib {
        source: rust_htslib::errors::Error,
        path: PathBuf,
    },

    #[error("FASTA/FASTQ error in {path}: {message}")]
    Fastx { path: PathBuf, message: String },

    #[error("parse error in {path} line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("{tool} failed: {detail} (command: {command})")]
    Tool {
        tool: String,
        command: String,
        detail: String,
    },
}

impl Error {
    /// Wrap an `io::Error` with the offending path.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: path.into(),
        }
    }

    pub fn htslib(source: rust_htslib::errors::Error, path: impl Into<PathBuf>) -> Self {
        Self::Htslib {
            source,
            path: path.into(),
        }
    }

    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            source: err,
            path: PathBuf::from("<unknown>"),
        }
    }
}
