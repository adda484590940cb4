//! Two-space indented `key: value` pipeline configs
use super::*;
use std::fs;

const PROTEIN_DATABASE: &str = "  protein_database:";

/// Point every `protein_database` entry at `database`
pub fn set_protein_database(text: &str, database: &str) -> String {
    let mut out = String::with_capacity(text.len() + database.len());
    for line in text.split_inclusive('\n') {
        if line.starts_with(PROTEIN_DATABASE) {
            out.push_str(PROTEIN_DATABASE);
            out.push(' ');
            out.push_str(database);
            out.push('\n');
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Copy the config at `src` into `out_dir` with the database replaced
pub fn copy_with_database<P: AsRef<Path>, Q: AsRef<Path>>(
    src: P,
    out_dir: Q,
    database: &str,
) -> Result<PathBuf> {
    let src = src.as_ref();
    let name = src
        .file_name()
        .ok_or_else(|| Error::EmptyReference(src.to_path_buf()))?;
    let dest = out_dir.as_ref().join(name);
    crate::params::ensure_distinct(src, &dest)?;

    let text = fs::read_to_string(src).map_err(io_err(src))?;
    fs::write(&dest, set_protein_database(&text, database)).map_err(io_err(&dest))?;
    Ok(dest)
}
