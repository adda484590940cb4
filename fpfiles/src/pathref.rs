//! Single line files that stand in for a data location (`*.pathraw`)
use super::*;
use std::fs;

pub const EXTENSION: &str = "pathraw";

/// Returns the referenced path and the stem of the reference file, which
/// names the data set
pub fn read<P: AsRef<Path>>(path: P) -> Result<(String, String)> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(io_err(path))?;
    let target = text
        .lines()
        .next()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .ok_or_else(|| Error::EmptyReference(path.to_path_buf()))?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok((target.to_string(), stem))
}

pub fn is_reference<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|e| e == EXTENSION)
        .unwrap_or(false)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn read_reference() {
        let dir = tempfile::TempDir::new().unwrap();
        let p = dir.path().join("yeast_HCD.pathraw");
        fs::write(&p, "/storage/data/yeast\r\nignored\n").unwrap();
        assert!(is_reference(&p));
        assert_eq!(
            read(&p).unwrap(),
            ("/storage/data/yeast".to_string(), "yeast_HCD".to_string())
        );

        fs::write(&p, "\n").unwrap();
        assert!(matches!(read(&p), Err(Error::EmptyReference(_))));
        assert!(!is_reference("a.raw"));
    }
}
