//! Pipeline manifests: which data files to search, and how they group
//!
//! # File format
//!
//! ```text
//! Z:\dpolasky\data\a.raw	exp1	1	DDA
//! Z:\dpolasky\data\b.raw	exp1	2	DDA
//! ```
//!
//! Experiment and bioreplicate may be empty; the acquisition mode defaults
//! to `DDA`.
use super::*;
use std::fs;

pub const EXTENSION: &str = "fp-manifest";

/// Name the pipeline gives the manifest it saves into its results folder
pub const RESULTS_MANIFEST: &str = "fragpipe-files.fp-manifest";

#[derive(Clone, Debug, PartialEq)]
pub struct Entry {
    pub path: String,
    pub experiment: String,
    pub bioreplicate: String,
    pub mode: String,
}

impl Entry {
    pub fn new<S: Into<String>>(path: S) -> Self {
        Entry {
            path: path.into(),
            experiment: String::new(),
            bioreplicate: String::new(),
            mode: "DDA".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Manifest {
    pub entries: Vec<Entry>,
}

impl Manifest {
    /// `origin` is only used for error messages
    pub fn parse(text: &str, origin: &Path) -> Result<Self> {
        let mut entries = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            let mut iter = Fields::new(b'\t', line);
            let path = iter.next().unwrap_or_default().trim();
            if path.is_empty() {
                return Err(Error::Malformed {
                    path: origin.to_path_buf(),
                    line: idx + 1,
                    expected: 1,
                });
            }
            let mut entry = Entry::new(path);
            if let Some(exp) = iter.next() {
                entry.experiment = exp.into();
            }
            if let Some(bio) = iter.next() {
                entry.bioreplicate = bio.into();
            }
            if let Some(mode) = iter.next().filter(|m| !m.is_empty()) {
                entry.mode = mode.into();
            }
            entries.push(entry);
        }
        Ok(Manifest { entries })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        Manifest::parse(&text, path)
    }

    /// One entry per data file, without experiment grouping
    pub fn from_raw<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Manifest {
            entries: paths.into_iter().map(Entry::new).collect(),
        }
    }

    pub fn text(&self) -> String {
        self.entries
            .iter()
            .map(|e| {
                format!(
                    "{}\t{}\t{}\t{}\n",
                    e.path, e.experiment, e.bioreplicate, e.mode
                )
            })
            .collect()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.text()).map_err(io_err(path))
    }

    pub fn map_paths<F: FnMut(&str) -> String>(mut self, mut f: F) -> Self {
        for e in self.entries.iter_mut() {
            e.path = f(&e.path);
        }
        self
    }
}

/// Write a copy of the manifest at `path` with Linux data paths, next to it
/// as `<stem>_linux.<ext>`. Returns the path of the copy
pub fn linuxize<P: AsRef<Path>>(path: P, rules: &PathRules) -> Result<PathBuf> {
    let path = path.as_ref();
    let dest = with_suffix(path, "_linux");
    Manifest::open(path)?
        .map_paths(|p| rules.to_linux(p))
        .write(&dest)?;
    Ok(dest)
}

/// Rewrite the manifest at `path` to Windows data paths in place, after
/// saving the original. Returns the backup path
pub fn windowsize<P: AsRef<Path>>(
    path: P,
    rules: &PathRules,
    convention: Convention,
) -> Result<PathBuf> {
    let path = path.as_ref();
    let manifest = Manifest::open(path)?;
    let copy = backup(path)?;
    manifest
        .map_paths(|p| rules.to_windows(p, convention))
        .write(path)?;
    Ok(copy)
}

#[cfg(test)]
mod test {
    use super::*;

    const MANIFEST: &str = "Z:\\dpolasky\\data\\a.raw\texp1\t1\tDDA\r\n\\\\corexfs.med.umich.edu\\proteomics\\data\\b.raw\n\n";

    #[test]
    fn parse() {
        let m = Manifest::parse(MANIFEST, Path::new("x")).unwrap();
        assert_eq!(m.entries.len(), 2);
        assert_eq!(m.entries[0].experiment, "exp1");
        assert_eq!(m.entries[0].bioreplicate, "1");
        assert_eq!(m.entries[1], Entry::new("\\\\corexfs.med.umich.edu\\proteomics\\data\\b.raw"));

        match Manifest::parse("a.raw\n\texp\n", Path::new("bad")) {
            Err(Error::Malformed { line: 2, .. }) => {}
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn from_raw() {
        let m = Manifest::from_raw(vec!["/storage/a.raw", "/storage/b.raw"]);
        assert_eq!(m.text(), "/storage/a.raw\t\t\tDDA\n/storage/b.raw\t\t\tDDA\n");
    }

    #[test]
    fn linux_and_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(RESULTS_MANIFEST);
        fs::write(&path, MANIFEST).unwrap();
        let rules = PathRules::default();

        let linux = linuxize(&path, &rules).unwrap();
        assert_eq!(linux.file_name().unwrap(), "fragpipe-files_linux.fp-manifest");
        let m = Manifest::open(&linux).unwrap();
        assert_eq!(m.entries[0].path, "/storage/dpolasky/data/a.raw");
        assert_eq!(m.entries[1].path, "/storage/data/b.raw");

        fs::copy(&linux, &path).unwrap();
        let copy = windowsize(&path, &rules, Convention::Drive).unwrap();
        assert_eq!(
            Manifest::open(&path).unwrap().entries[0].path,
            "Z:\\dpolasky\\data\\a.raw"
        );
        assert_eq!(
            Manifest::open(copy).unwrap().entries[0].path,
            "/storage/dpolasky/data/a.raw"
        );
    }
}
