//! Read and edit the flat text files consumed by a headless search pipeline
//!
//! # File formats
//!
//! Parameter files are line oriented, `=` delimited, with `#` comments.
//! Workflow files use the same layout without spaces around the `=`, and
//! prefix every search-engine key with `msfragger.`
//!
//! ```text
//! $ cat closed.params
//! database_name = 2020-07-03-decoys-contam.fas
//! fragment_ion_series = b,y
//! remove_precursor_peak = 1
//! ...
//! ```
//!
//! Manifests are tab delimited, one data file per line, with experiment,
//! bioreplicate and acquisition mode columns. Pipeline configs are YAML-like,
//! with two-space indented `key: value` lines.
//!
//! Windows share and mapped drive paths found in any of these files can be
//! rewritten to the Linux mount they are exported under with [`PathRules`].
//!
//! # Example
//!
//! ```rust,ignore
//! # use fpfiles::params::{self, Activation};
//! let copy = params::variant("closed.params", "./HCD", Some(Activation::Hcd), None)?;
//! ```

pub mod manifest;
pub mod params;
pub mod pathref;
pub mod paths;
pub mod workflow;
pub mod yml;

use memchr::{memchr, memchr_iter, Memchr};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use params::{Activation, Enzyme, ParamFile};
pub use paths::{Convention, PathRules};

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("could not read or write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unknown activation type {0:?}, must be one of: HCD, CID, ETD, AIETD, EThcD")]
    UnknownActivation(String),

    #[error("unknown enzyme {0:?}, must be one of: TRYP, CHYTR, TRYP+CHYTR")]
    UnknownEnzyme(String),

    #[error("refusing to overwrite the base file {0}")]
    WouldOverwrite(PathBuf),

    #[error("{0} does not contain a path")]
    EmptyReference(PathBuf),

    #[error("{path}:{line}: expected at least {expected} tab separated fields")]
    Malformed {
        path: PathBuf,
        line: usize,
        expected: usize,
    },
}

/// Attach the offending path to an I/O error
pub(crate) fn io_err<P: AsRef<Path>>(path: P) -> impl FnOnce(io::Error) -> Error {
    let path = path.as_ref().to_path_buf();
    move |source| Error::Io { path, source }
}

/// `dir/stem.ext` becomes `dir/stem<suffix>.ext`
pub fn with_suffix<P: AsRef<Path>>(path: P, suffix: &str) -> PathBuf {
    let path = path.as_ref();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}{}.{}", stem, suffix, ext.to_string_lossy()),
        None => format!("{}{}", stem, suffix),
    };
    path.with_file_name(name)
}

/// Save `path` as `<stem>_copy.<ext>` unless a backup already exists, so
/// the first backup always holds the original
pub fn backup<P: AsRef<Path>>(path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let copy = with_suffix(path, "_copy");
    if !copy.exists() {
        std::fs::copy(path, &copy).map_err(io_err(path))?;
    }
    Ok(copy)
}

/// Split a line into fields on a single delimiter byte. Unlike
/// [`str::split`], the delimiter search is done with [`Memchr`]. A trailing
/// delimiter yields a trailing empty field.
pub struct Fields<'a> {
    pos: usize,
    line: &'a str,
    inner: Memchr<'a>,
    done: bool,
}

impl<'a> Fields<'a> {
    pub fn new(delimiter: u8, line: &'a str) -> Self {
        Self {
            pos: 0,
            line,
            inner: memchr_iter(delimiter, line.as_bytes()),
            done: false,
        }
    }
}

impl<'a> Iterator for Fields<'a> {
    type Item = &'a str;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let end = match self.inner.next() {
            Some(e) => e,
            None => {
                self.done = true;
                self.line.len()
            }
        };
        // delimiters are ASCII, so `end` is always a char boundary
        let field = &self.line[self.pos..end];
        self.pos = end + 1;
        Some(field)
    }
}

/// Split a template row, using tabs if the row contains any and commas
/// otherwise. Line terminators are stripped and fields are trimmed.
pub fn split_row(line: &str) -> Vec<&str> {
    let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');
    let delimiter = match memchr(b'\t', line.as_bytes()) {
        Some(_) => b'\t',
        None => b',',
    };
    Fields::new(delimiter, line).map(str::trim).collect()
}
