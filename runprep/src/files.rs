//! Housekeeping on converted data and finished results
use super::*;
use fpfiles::manifest::{self, RESULTS_MANIFEST};
use fpfiles::{backup, Activation, Convention, Enzyme, PathRules};
use log::{info, warn};
use std::fs;
use std::io;
use std::thread;
use std::time::Duration;

/// Wait before the second attempt at a rename or link. Network shares
/// sometimes hold a file briefly after it was written
const RETRY_PAUSE: Duration = Duration::from_millis(500);

pub const SHEPHERD_CONFIG: &str = "shepherd.config";

/// Extensions linked into a combined results folder
pub const SUBSET_EXTENSIONS: &[&str] = &["pepXML", "tsv"];

/// Files that were handled, and the ones given up on
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outcome {
    pub done: Vec<PathBuf>,
    pub failed: Vec<Failure>,
}

impl Outcome {
    fn attempt<F>(&mut self, source: &Path, dest: PathBuf, mut f: F)
    where
        F: FnMut(&Path, &Path) -> io::Result<()>,
    {
        let result = f(source, &dest).or_else(|e| {
            warn!("{} -> {}: {}, trying again", source.display(), dest.display(), e);
            thread::sleep(RETRY_PAUSE);
            f(source, &dest)
        });
        match result {
            Ok(()) => {
                info!("{} -> {}", source.display(), dest.display());
                self.done.push(dest);
            }
            Err(e) => self.failed.push(Failure {
                path: source.into(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Files directly inside `dir` with extension `ext` (ignoring case), sorted
pub fn list_files<P: AsRef<Path>>(dir: P, ext: &str) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut v = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err(dir))? {
        let path = entry.map_err(io_err(dir))?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(e) = path.extension() {
            if e.to_string_lossy().eq_ignore_ascii_case(ext) {
                v.push(path);
            }
        }
    }
    v.sort();
    Ok(v)
}

fn split_name(path: &Path) -> (String, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// `sample_01_HCD.mzML` becomes `sample_01_TRYP_HCD.mzML`
pub fn enzyme_name<P: AsRef<Path>>(path: P, enzyme: Enzyme) -> PathBuf {
    let path = path.as_ref();
    let (stem, ext) = split_name(path);
    let mut parts = stem.split('_').collect::<Vec<_>>();
    let at = parts.len().saturating_sub(1);
    parts.insert(at, enzyme.tag());
    path.with_file_name(format!("{}{}", parts.join("_"), ext))
}

/// Rename `files` to carry the enzyme tag ahead of their activation
pub fn rename_enzyme<P: AsRef<Path>>(files: &[P], enzyme: Enzyme) -> Outcome {
    let mut outcome = Outcome::default();
    for file in files {
        let file = file.as_ref();
        outcome.attempt(file, enzyme_name(file, enzyme), |from, to| fs::rename(from, to));
    }
    outcome
}

/// The activation a results folder was searched with, taken from the last
/// `_` separated token of its name that names one of `activations`
pub fn folder_activation<P: AsRef<Path>>(folder: P, activations: &[Activation]) -> Option<Activation> {
    let name = folder.as_ref().file_name()?.to_string_lossy().into_owned();
    name.split('_')
        .filter_map(|token| token.parse::<Activation>().ok())
        .filter(|act| activations.is_empty() || activations.contains(act))
        .last()
}

/// Hard link the search outputs of several single-activation runs into
/// `combined`, appending the activation to each file name so that the
/// subsets do not collide
pub fn link_subsets<P: AsRef<Path>>(
    results_folders: &[P],
    activations: &[Activation],
    combined: &Path,
) -> Result<Outcome> {
    fs::create_dir_all(combined).map_err(io_err(combined))?;
    let mut outcome = Outcome::default();

    for folder in results_folders {
        let folder = folder.as_ref();
        let act = match folder_activation(folder, activations) {
            Some(act) => act,
            None => {
                warn!("no activation in the name of {}", folder.display());
                outcome.failed.push(Failure {
                    path: folder.into(),
                    reason: "no activation in folder name".into(),
                });
                continue;
            }
        };
        for ext in SUBSET_EXTENSIONS {
            for file in list_files(folder, ext)? {
                let (stem, ext) = split_name(&file);
                let dest = combined.join(format!("{}_{}{}", stem, act, ext));
                outcome.attempt(&file, dest, |from, to| fs::hard_link(from, to));
            }
        }
    }
    Ok(outcome)
}

/// Rewrite the paths in a finished results folder for viewing from a
/// Windows machine. The manifest must exist; `shepherd.config` is only
/// rewritten when present. Originals are kept as `_copy` files, and the
/// backups are returned
pub fn windowsize_results<P: AsRef<Path>>(
    folder: P,
    rules: &PathRules,
    convention: Convention,
) -> Result<Vec<PathBuf>> {
    let folder = folder.as_ref();
    let mut backups = vec![manifest::windowsize(
        folder.join(RESULTS_MANIFEST),
        rules,
        convention,
    )?];

    let shepherd = folder.join(SHEPHERD_CONFIG);
    if !shepherd.exists() {
        warn!("{} not found, leaving it", shepherd.display());
        return Ok(backups);
    }
    let text = fs::read_to_string(&shepherd).map_err(io_err(&shepherd))?;
    backups.push(backup(&shepherd)?);
    let text = text
        .split_inclusive('\n')
        .map(|line| {
            if line.contains("database =") || line.contains("dataset =") {
                rules.to_windows(line, convention)
            } else {
                line.to_string()
            }
        })
        .collect::<String>();
    fs::write(&shepherd, text).map_err(io_err(&shepherd))?;
    Ok(backups)
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn enzyme_names() {
        assert_eq!(
            enzyme_name("/d/sample_01_HCD.mzML", Enzyme::Trypsin),
            PathBuf::from("/d/sample_01_TRYP_HCD.mzML")
        );
        assert_eq!(
            enzyme_name("/d/run_ETD.mzML", Enzyme::TrypsinChymotrypsin),
            PathBuf::from("/d/run_TRYP+CHYTR_ETD.mzML")
        );
        assert_eq!(
            enzyme_name("plain.mzML", Enzyme::Chymotrypsin),
            PathBuf::from("CHYTR_plain.mzML")
        );
    }

    #[test]
    fn renames() {
        let dir = TempDir::new().unwrap();
        let d = dir.path();
        fs::write(d.join("a_HCD.mzML"), "a").unwrap();
        fs::write(d.join("b_ETD.mzML"), "b").unwrap();

        let files = list_files(d, "mzml").unwrap();
        assert_eq!(files.len(), 2);
        let mut files = files;
        files.push(d.join("gone_HCD.mzML"));

        let out = rename_enzyme(&files, Enzyme::Trypsin);
        assert_eq!(out.done, vec![d.join("a_TRYP_HCD.mzML"), d.join("b_TRYP_ETD.mzML")]);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].path, d.join("gone_HCD.mzML"));
        assert_eq!(fs::read_to_string(d.join("b_TRYP_ETD.mzML")).unwrap(), "b");
    }

    #[test]
    fn activations_from_folder_names() {
        let all = [Activation::Hcd, Activation::Etd, Activation::Ethcd];
        assert_eq!(folder_activation("/r/2021_glyco_HCD", &all), Some(Activation::Hcd));
        assert_eq!(folder_activation("/r/EThcD_glyco_ETD", &all), Some(Activation::Etd));
        assert_eq!(folder_activation("/r/glyco_CID", &all), None);
        assert_eq!(folder_activation("/r/glyco_CID", &[]), Some(Activation::Cid));
    }

    #[test]
    fn combined_subsets() {
        let dir = TempDir::new().unwrap();
        let d = dir.path();
        for (folder, act) in &[("run_HCD", "h"), ("run_ETD", "e"), ("run_other", "x")] {
            fs::create_dir(d.join(folder)).unwrap();
            fs::write(d.join(folder).join("a.pepXML"), act).unwrap();
            fs::write(d.join(folder).join("psm.tsv"), act).unwrap();
            fs::write(d.join(folder).join("log.txt"), act).unwrap();
        }
        let folders = ["run_HCD", "run_ETD", "run_other"]
            .iter()
            .map(|f| d.join(f))
            .collect::<Vec<_>>();
        let combined = d.join("__FraggerResults").join("_Combined");

        let out = link_subsets(&folders, &[Activation::Hcd, Activation::Etd], &combined).unwrap();
        assert_eq!(out.done.len(), 4);
        assert_eq!(out.failed.len(), 1);
        assert_eq!(out.failed[0].path, d.join("run_other"));
        assert_eq!(fs::read_to_string(combined.join("a_ETD.pepXML")).unwrap(), "e");
        assert_eq!(fs::read_to_string(combined.join("psm_HCD.tsv")).unwrap(), "h");
        assert!(!combined.join("log_HCD.txt").exists());

        // linking again collides with the first links
        let again = link_subsets(&folders[..1], &[], &combined).unwrap();
        assert_eq!(again.done.len(), 0);
        assert_eq!(again.failed.len(), 2);
    }

    #[test]
    fn results_for_windows() {
        let dir = TempDir::new().unwrap();
        let d = dir.path();
        fs::write(
            d.join(RESULTS_MANIFEST),
            "/storage/dpolasky/a.raw\texp\t1\tDDA\n",
        )
        .unwrap();
        fs::write(
            d.join(SHEPHERD_CONFIG),
            "threads = 8\ndatabase = /storage/dpolasky/db.fas\ndataset = psm /storage/x/psm.tsv /storage/x\n",
        )
        .unwrap();

        let rules = PathRules::default();
        let backups = windowsize_results(d, &rules, Convention::Drive).unwrap();
        assert_eq!(
            backups,
            vec![
                d.join("fragpipe-files_copy.fp-manifest"),
                d.join("shepherd_copy.config")
            ]
        );
        assert_eq!(
            fs::read_to_string(d.join(RESULTS_MANIFEST)).unwrap(),
            "Z:\\dpolasky\\a.raw\texp\t1\tDDA\n"
        );
        assert_eq!(
            fs::read_to_string(d.join(SHEPHERD_CONFIG)).unwrap(),
            "threads = 8\ndatabase = Z:\\dpolasky\\db.fas\ndataset = psm Z:\\x\\psm.tsv Z:\\x\n"
        );
        assert!(fs::read_to_string(d.join("shepherd_copy.config"))
            .unwrap()
            .contains("/storage/dpolasky/db.fas"));

        // no shepherd config is fine, a missing manifest is not
        fs::remove_file(d.join(SHEPHERD_CONFIG)).unwrap();
        assert_eq!(windowsize_results(d, &rules, Convention::Drive).unwrap().len(), 1);
        fs::remove_file(d.join(RESULTS_MANIFEST)).unwrap();
        assert!(windowsize_results(d, &rules, Convention::Drive).is_err());
    }
}
