//! Edits specific to pipeline workflow files
//!
//! Workflows are java properties files. Each pipeline stage is switched on
//! or off by a key ending in `run-<stage>`, e.g.
//!
//! ```text
//! msfragger.run-msfragger=true
//! peptide-prophet.run-peptide-prophet=true
//! database.db-path=Z\:\\dpolasky\\db\\2020-07-03-decoys-contam.fas
//! ```
use super::*;

/// Keys holding paths that must be valid on the machine running the workflow
pub const PATH_KEYS: &[&str] = &["database.db-path", "ptmshepherd.glycodatabase"];

const DATABASE: &str = "database.db-path";
const SLICE_DB: &str = "misc.slice-db";

/// Set `run-<stage>` to `false` for every stage in `stages`.
/// Returns the number of lines changed
pub fn disable<'s, I>(file: &mut ParamFile, stages: I) -> usize
where
    I: IntoIterator<Item = &'s str>,
{
    stages
        .into_iter()
        .map(|stage| {
            let flag = format!("run-{}", stage);
            file.set_where(|key| key.ends_with(&flag), "false")
        })
        .sum()
}

pub fn database_path(file: &ParamFile) -> Option<&str> {
    file.get(DATABASE).filter(|s| !s.is_empty())
}

/// `path` as a properties value: `Z:\db\x.fas` becomes `Z\:\\db\\x.fas`.
/// Values already escaped are returned unchanged
pub fn escape(path: &str) -> String {
    if path.contains("\\:") || path.contains("\\\\") {
        return path.into();
    }
    path.replace('\\', "\\\\").replace(':', "\\:")
}

/// Point the search at `path`, escaped for the properties format
pub fn set_database(file: &mut ParamFile, path: &str) -> usize {
    file.set(DATABASE, &escape(path))
}

/// Number of database slices the search engine splits the database into
pub fn set_slice_db(file: &mut ParamFile, slices: usize) -> usize {
    file.set(SLICE_DB, &slices.to_string())
}

/// Rewrite the path valued keys to their Linux form
pub fn linuxize(file: &mut ParamFile, rules: &PathRules) -> usize {
    PATH_KEYS
        .iter()
        .map(|key| file.map_lines(key, |line| rules.to_linux(line)))
        .sum()
}
