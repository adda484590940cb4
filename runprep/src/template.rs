//! Batch templates
//!
//! # File format
//!
//! One run per row, comma or tab separated. Lists inside a field are `;`
//! separated and trailing fields may be left off:
//!
//! ```text
//! # name, workflow, msfragger, philosopher, ionquant, fragpipe, ram, threads, raw, activations, enzymes, skip_from
//! !,Z:\dpolasky\projects\_BuildTests\_results
//! Run1,workflow.tsv,MSFragger-3.2,Philosopher-4.0,IonQuant-1.8,,32,8
//! glyco,glyco-N.workflow,3.2,4.0,1.8,,64,16,yeast.pathraw;human.pathraw,HCD;EThcD,TRYP
//! ```
//!
//! `#` rows are comments. A `!` row changes the folder that the output of
//! the following rows is written under; before the first one it is the
//! folder holding the template. Relative file references are resolved
//! against the template's folder.
//!
//! The workflow field names either a `.workflow` file, or a workflow list of
//! `workflow, data[, database]` rows. Names in a list without the
//! `.workflow` extension refer to the workflows shipped with FragPipe.
use super::*;
use fpfiles::{manifest, pathref, split_row, Activation, Enzyme};
use log::{debug, warn};
use std::fmt;
use std::fs;

/// Number of leading fields every run row must have
const REQUIRED_FIELDS: usize = 8;

/// A template row that was not turned into a run
#[derive(Clone, Debug, PartialEq)]
pub struct Skipped {
    pub origin: PathBuf,
    pub line: usize,
    pub reason: String,
}

impl fmt::Display for Skipped {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.origin.display(), self.line, self.reason)
    }
}

/// Version selectors, matched against the entries of the tools folder
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Selectors {
    pub msfragger: String,
    pub philosopher: String,
    pub ionquant: String,
    pub fragpipe: String,
}

/// A data location and the name it contributes to folder names
#[derive(Clone, Debug, PartialEq)]
pub struct RawSet {
    pub name: String,
    pub location: PathBuf,
}

#[derive(Clone, Debug, PartialEq)]
pub enum WorkflowRef {
    File(PathBuf),
    /// Looked up in the `workflows` folder of the FragPipe install
    Named(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum DataRef {
    Manifest(PathBuf),
    Raw(RawSet),
}

#[derive(Clone, Debug, PartialEq)]
pub struct WorkflowEntry {
    pub name: String,
    pub workflow: WorkflowRef,
    /// Overrides the data of the run when present
    pub data: Option<DataRef>,
    pub database: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunSpec {
    pub origin: PathBuf,
    pub line: usize,
    pub name: String,
    pub base_dir: PathBuf,
    pub workflows: Vec<WorkflowEntry>,
    pub tools: Selectors,
    pub ram: u32,
    pub threads: u32,
    pub raw: Vec<RawSet>,
    pub activations: Vec<Activation>,
    pub enzymes: Vec<Enzyme>,
    pub skip_from: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Template {
    pub specs: Vec<RunSpec>,
    pub skipped: Vec<Skipped>,
}

/// Resolve a file reference relative to `dir`, leaving Windows and
/// absolute paths alone
pub(crate) fn resolve(dir: &Path, reference: &str) -> PathBuf {
    let p = Path::new(reference);
    if p.is_absolute() || reference.starts_with('\\') || reference.contains(':') {
        p.to_path_buf()
    } else {
        dir.join(p)
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().map(|e| e == ext).unwrap_or(false)
}

fn raw_set(dir: &Path, reference: &str) -> Result<RawSet, String> {
    let path = resolve(dir, reference);
    if pathref::is_reference(&path) {
        // the referenced location is usually only visible from the server
        let (location, name) = pathref::read(&path).map_err(|e| e.to_string())?;
        return Ok(RawSet {
            name,
            location: location.into(),
        });
    }
    if !path.exists() {
        return Err(format!("raw data {} does not exist", path.display()));
    }
    Ok(RawSet {
        name: stem(&path),
        location: path,
    })
}

fn list<T, F>(field: Option<&&str>, mut f: F) -> Result<Vec<T>, String>
where
    F: FnMut(&str) -> Result<T, String>,
{
    field
        .map(|s| s.split(';').map(str::trim).filter(|s| !s.is_empty()))
        .into_iter()
        .flatten()
        .map(|s| f(s))
        .collect()
}

/// Read a workflow list file
fn workflow_list(path: &Path) -> Result<Vec<WorkflowEntry>, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let fields = split_row(line);
        let name = fields[0];
        if name.is_empty() {
            return Err(format!("{}:{}: missing workflow name", path.display(), idx + 1));
        }

        let workflow = if name.ends_with(".workflow") {
            let file = resolve(dir, name);
            if !file.exists() {
                return Err(format!("workflow {} does not exist", file.display()));
            }
            WorkflowRef::File(file)
        } else {
            WorkflowRef::Named(name.into())
        };

        let data = match fields.get(1).filter(|s| !s.is_empty()) {
            Some(d) if d.ends_with(manifest::EXTENSION) => {
                let m = resolve(dir, d);
                if !m.exists() {
                    return Err(format!("manifest {} does not exist", m.display()));
                }
                Some(DataRef::Manifest(m))
            }
            Some(d) => Some(DataRef::Raw(raw_set(dir, d)?)),
            None => None,
        };

        entries.push(WorkflowEntry {
            name: stem(Path::new(name)),
            workflow,
            data,
            database: fields
                .get(2)
                .filter(|s| !s.is_empty())
                .map(|db| resolve(dir, db)),
        });
    }
    Ok(entries)
}

fn parse_row(
    fields: &[&str],
    origin_dir: &Path,
    base_dir: &Path,
) -> Result<RunSpec, String> {
    if fields.len() < REQUIRED_FIELDS {
        return Err(format!(
            "expected at least {} fields, found {}",
            REQUIRED_FIELDS,
            fields.len()
        ));
    }

    let workflow = resolve(origin_dir, fields[1]);
    let workflows = if has_extension(&workflow, "workflow") {
        if !workflow.exists() {
            return Err(format!("workflow {} does not exist", workflow.display()));
        }
        vec![WorkflowEntry {
            name: stem(&workflow),
            workflow: WorkflowRef::File(workflow),
            data: None,
            database: None,
        }]
    } else {
        workflow_list(&workflow)?
    };
    if workflows.is_empty() {
        return Err(format!("{} lists no workflows", fields[1]));
    }

    let number = |idx: usize, what: &str| {
        fields[idx]
            .parse::<u32>()
            .map_err(|_| format!("{} must be a whole number, found {:?}", what, fields[idx]))
    };

    Ok(RunSpec {
        origin: PathBuf::new(),
        line: 0,
        name: fields[0].into(),
        base_dir: base_dir.into(),
        workflows,
        tools: Selectors {
            msfragger: fields[2].into(),
            philosopher: fields[3].into(),
            ionquant: fields[4].into(),
            fragpipe: fields[5].into(),
        },
        ram: number(6, "ram")?,
        threads: number(7, "threads")?,
        raw: list(fields.get(8), |s| raw_set(origin_dir, s))?,
        activations: list(fields.get(9), |s| s.parse().map_err(|e: fpfiles::Error| e.to_string()))?,
        enzymes: list(fields.get(10), |s| s.parse().map_err(|e: fpfiles::Error| e.to_string()))?,
        skip_from: fields
            .get(11)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string()),
    })
}

impl Template {
    /// Parse template text. `origin` is the template's path, relative
    /// references are resolved against its folder
    pub fn parse<P: AsRef<Path>>(text: &str, origin: P) -> Template {
        let origin = origin.as_ref();
        let origin_dir = origin.parent().unwrap_or_else(|| Path::new(""));
        let mut base_dir = origin_dir.to_path_buf();
        let mut template = Template::default();

        for (idx, line) in text.lines().enumerate() {
            let line_no = idx + 1;
            if line.trim().is_empty() || line.trim_start().starts_with('#') {
                continue;
            }
            let fields = split_row(line);
            if let Some(rest) = fields[0].strip_prefix('!') {
                let dir = if rest.trim().is_empty() {
                    fields.get(1).copied().unwrap_or_default()
                } else {
                    rest.trim()
                };
                base_dir = resolve(origin_dir, dir);
                debug!("{}:{}: output folder is now {}", origin.display(), line_no, base_dir.display());
                continue;
            }

            match parse_row(&fields, origin_dir, &base_dir) {
                Ok(mut spec) => {
                    spec.origin = origin.into();
                    spec.line = line_no;
                    template.specs.push(spec);
                }
                Err(reason) => {
                    let skipped = Skipped {
                        origin: origin.into(),
                        line: line_no,
                        reason,
                    };
                    warn!("skipping {}", skipped);
                    template.skipped.push(skipped);
                }
            }
        }
        template
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Template> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        Ok(Template::parse(&text, path))
    }
}
