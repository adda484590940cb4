use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Files(#[from] fpfiles::Error),

    #[error("could not read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no entry in {folder} matches {selector:?}")]
    NoTool { folder: PathBuf, selector: String },

    #[error("{0} requested by version but no tools folder is configured")]
    ToolNotConfigured(String),

    #[error("workflow {0} does not exist")]
    MissingWorkflow(PathBuf),

    #[error("no data to search for run {0:?}")]
    NoRawData(String),

    #[error("run {name:?} reuses {key:?}, which it has no counterpart for")]
    NoPredecessor { name: String, key: String },

    #[error("unknown stage {0:?}")]
    UnknownStage(String),

    #[error("could not start the worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Attach the offending path to an I/O error
pub(crate) fn io_err<P: Into<PathBuf>>(path: P) -> impl FnOnce(io::Error) -> Error {
    let path = path.into();
    move |source| Error::Io { path, source }
}
