//! Expand run specifications into concrete, laid-out runs
//!
//! Every run spec yields one [`RunInstance`] per workflow × data set ×
//! activation × enzyme. An empty axis counts as a single "no variation"
//! value. Each instance gets its own output folder:
//!
//! ```text
//! <base>/<run name>/<workflow>[_<ACT>][_<ENZ>][_<data set>]
//! ```
//!
//! where the data set suffix is only added if the run searches more than
//! one data set. The folder receives a patched copy of the workflow and the
//! manifest the run searches; the files the run spec refers to are never
//! modified.
use super::*;
use crate::template::{self, DataRef, RawSet, RunSpec, WorkflowEntry, WorkflowRef};
use fpfiles::manifest::{self, Manifest};
use fpfiles::{params, workflow, Activation, Enzyme, ParamFile, PathRules};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};
use std::fs;

/// Extensions of the data files listed in generated manifests
const DATA_EXTENSIONS: &[&str] = &["raw", "mzml", "mzxml", "mgf", "d"];

/// Paths of a run, spelled the way the generated script needs them
#[derive(Clone, Debug, PartialEq)]
pub struct PathView {
    pub executable: String,
    pub workflow: String,
    pub manifest: String,
    pub output_dir: String,
    pub tools: Vec<(Tool, String)>,
    pub predecessor: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunInstance {
    /// Position of the originating run spec in the batch
    pub spec_index: usize,
    pub run_name: String,
    /// Output folder name before collision suffixes, shared by a run and
    /// the run it reuses results from
    pub key: String,
    pub output_dir: PathBuf,
    pub workflow: PathBuf,
    pub manifest: PathBuf,
    pub tools: Toolset,
    pub ram: u32,
    pub threads: u32,
    pub activation: Option<Activation>,
    pub enzyme: Option<Enzyme>,
    /// Folder holding search results this run reuses instead of searching
    pub predecessor: Option<PathBuf>,
    linux: Option<PathView>,
}

impl RunInstance {
    fn view_with<F: Fn(&Path) -> String>(&self, shell: Shell, f: F) -> PathView {
        let tools = [Tool::MsFragger, Tool::Philosopher, Tool::IonQuant]
            .iter()
            .filter_map(|t| self.tools.get(*t).map(|p| (*t, f(p))))
            .collect();
        PathView {
            executable: f(&self.tools.executable(shell)),
            workflow: f(&self.workflow),
            manifest: f(&self.manifest),
            output_dir: f(&self.output_dir),
            tools,
            predecessor: self.predecessor.as_deref().map(|p| f(p)),
        }
    }

    /// Paths as they are on this machine
    pub fn view(&self, shell: Shell) -> PathView {
        self.view_with(shell, |p| p.to_string_lossy().into_owned())
    }

    /// Paths as seen from the Linux mount, if they were derived
    pub fn linux(&self) -> Option<&PathView> {
        self.linux.as_ref()
    }

    pub fn with_linux(mut self, rules: &PathRules) -> Self {
        self.linux = Some(self.view_with(Shell::Bash, |p| rules.to_linux(&p.to_string_lossy())));
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expansion {
    pub instances: Vec<RunInstance>,
    pub skipped: Vec<Skipped>,
}

impl Expansion {
    fn skip(&mut self, spec: &RunSpec, reason: String) {
        let s = Skipped {
            origin: spec.origin.clone(),
            line: spec.line,
            reason,
        };
        warn!("skipping {}", s);
        self.skipped.push(s);
    }
}

/// Expands run specs in batch order, remembering the output folders handed
/// out so far
pub struct Expander<'c> {
    config: &'c Config,
    spec_index: usize,
    used: HashSet<PathBuf>,
    /// run name -> (key, output folder) of every instance expanded so far
    outputs: HashMap<String, Vec<(String, PathBuf)>>,
}

fn push_suffix(s: &mut String, suffix: &str) {
    s.push('_');
    s.push_str(suffix);
}

/// `[None]` for an empty axis
fn axis<T: Copy>(values: &[T]) -> Vec<Option<T>> {
    if values.is_empty() {
        vec![None]
    } else {
        values.iter().copied().map(Some).collect()
    }
}

fn strip_workflow_ext(s: &str) -> &str {
    s.strip_suffix(".workflow").unwrap_or(s)
}

fn data_files(location: &Path) -> Vec<PathBuf> {
    if !location.is_dir() {
        return vec![location.to_path_buf()];
    }
    let mut files = match fs::read_dir(location) {
        Ok(entries) => entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|e| {
                        let e = e.to_string_lossy().to_ascii_lowercase();
                        DATA_EXTENSIONS.contains(&e.as_str())
                    })
                    .unwrap_or(false)
            })
            .collect::<Vec<_>>(),
        Err(e) => {
            warn!("could not list {}: {}", location.display(), e);
            Vec::new()
        }
    };
    files.sort();
    if files.is_empty() {
        files.push(location.to_path_buf());
    }
    files
}

impl<'c> Expander<'c> {
    pub fn new(config: &'c Config) -> Self {
        Expander {
            config,
            spec_index: 0,
            used: HashSet::new(),
            outputs: HashMap::new(),
        }
    }

    /// First free folder, adding `-2`, `-3`... on collision
    fn claim(&mut self, dir: PathBuf) -> PathBuf {
        if self.used.insert(dir.clone()) {
            return dir;
        }
        let name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut n = 2;
        loop {
            let candidate = dir.with_file_name(format!("{}-{}", name, n));
            if self.used.insert(candidate.clone()) {
                warn!("{} is used twice in this batch, writing to {}", dir.display(), candidate.display());
                return candidate;
            }
            n += 1;
        }
    }

    fn run_folder(&self, spec: &RunSpec) -> PathBuf {
        if spec.name.is_empty() {
            spec.base_dir.join(&self.config.results_folder)
        } else {
            spec.base_dir.join(&spec.name)
        }
    }

    fn predecessor(&self, spec: &RunSpec, key: &str) -> Result<Option<PathBuf>> {
        let from = match &spec.skip_from {
            Some(s) => s.as_str(),
            None => return Ok(None),
        };
        if let Some(outputs) = self.outputs.get(from) {
            let same_key = outputs.iter().find(|(k, _)| k == key);
            return match (same_key, outputs.len()) {
                (Some((_, dir)), _) => Ok(Some(dir.clone())),
                (None, 1) => Ok(Some(outputs[0].1.clone())),
                _ => Err(Error::NoPredecessor {
                    name: from.into(),
                    key: key.into(),
                }),
            };
        }

        let path = template::resolve(&spec.base_dir, strip_workflow_ext(from));
        if spec.name.is_empty() {
            let leaf = path.file_name().map(|s| s.to_os_string()).unwrap_or_default();
            let parent = path.parent().unwrap_or_else(|| Path::new(""));
            Ok(Some(parent.join(&self.config.results_folder).join(leaf)))
        } else {
            Ok(Some(path))
        }
    }

    /// Copy the workflow into `dir` and apply every edit the run needs
    fn patch_workflow(
        &self,
        base: &Path,
        dir: &Path,
        entry: &WorkflowEntry,
        activation: Option<Activation>,
        enzyme: Option<Enzyme>,
        skips_search: bool,
    ) -> Result<PathBuf> {
        let copy = params::variant(base, dir, activation, enzyme)?;
        let mut file = ParamFile::open(&copy)?;

        let mut disabled = self.config.disable_stages.clone();
        if skips_search {
            disabled.insert(Stage::MsFragger);
        }
        workflow::disable(&mut file, disabled.iter().map(|s| s.as_str()));

        if let Some(db) = &entry.database {
            workflow::set_database(&mut file, &self.config.target_path(db));
        }
        if self.config.split_database_count > 0 {
            workflow::set_slice_db(&mut file, self.config.split_database_count);
        }
        if self.config.use_linux_paths {
            workflow::linuxize(&mut file, &self.config.path_rules);
        }
        file.write(&copy)?;
        Ok(copy)
    }

    /// Manifest for the data a run searches, written into `dir`
    fn write_manifest(&self, data: &DataRef, dir: &Path) -> Result<PathBuf> {
        match data {
            DataRef::Manifest(src) => {
                let name = src.file_name().unwrap_or_default();
                let copy = dir.join(name);
                fs::copy(src, &copy).map_err(io_err(src.as_path()))?;
                if self.config.use_linux_paths {
                    Ok(manifest::linuxize(&copy, &self.config.path_rules)?)
                } else {
                    Ok(copy)
                }
            }
            DataRef::Raw(set) => {
                let path = dir.join(format!("{}.{}", set.name, manifest::EXTENSION));
                let files = data_files(&set.location);
                Manifest::from_raw(files.iter().map(|f| self.config.target_path(f))).write(&path)?;
                Ok(path)
            }
        }
    }

    fn expand_entry(
        &mut self,
        spec: &RunSpec,
        entry: &WorkflowEntry,
        tools: &Toolset,
        out: &mut Expansion,
    ) -> Result<()> {
        let base = match &entry.workflow {
            WorkflowRef::File(p) => p.clone(),
            WorkflowRef::Named(name) => tools.bundled_workflow(name),
        };
        if !base.exists() {
            return Err(Error::MissingWorkflow(base));
        }

        let data: Vec<DataRef> = match &entry.data {
            Some(d) => vec![d.clone()],
            None => spec.raw.iter().cloned().map(DataRef::Raw).collect(),
        };
        if data.is_empty() {
            return Err(Error::NoRawData(spec.name.clone()));
        }
        let several = data.len() > 1;

        // predecessors are resolved for every combination before anything
        // is written, and instances are only recorded once all are built
        let mut planned = Vec::new();
        for d in &data {
            for activation in axis(&spec.activations) {
                for enzyme in axis(&spec.enzymes) {
                    let mut key = entry.name.clone();
                    if let Some(a) = activation {
                        push_suffix(&mut key, a.as_str());
                    }
                    if let Some(e) = enzyme {
                        push_suffix(&mut key, e.tag());
                    }
                    if several {
                        let name = match d {
                            DataRef::Raw(RawSet { name, .. }) => name.clone(),
                            DataRef::Manifest(m) => m
                                .file_stem()
                                .map(|s| s.to_string_lossy().into_owned())
                                .unwrap_or_default(),
                        };
                        push_suffix(&mut key, &name);
                    }
                    let predecessor = self.predecessor(spec, &key)?;
                    planned.push((d, activation, enzyme, key, predecessor));
                }
            }
        }

        let mut built = Vec::with_capacity(planned.len());
        for (d, activation, enzyme, key, predecessor) in planned {
            let dir = self.claim(self.run_folder(spec).join(&key));
            fs::create_dir_all(&dir).map_err(io_err(dir.as_path()))?;

            let workflow = self.patch_workflow(
                &base,
                &dir,
                entry,
                activation,
                enzyme,
                predecessor.is_some(),
            )?;
            let manifest = self.write_manifest(d, &dir)?;
            info!("prepared {}", dir.display());
            debug!("workflow {}, manifest {}", workflow.display(), manifest.display());

            let mut instance = RunInstance {
                spec_index: self.spec_index,
                run_name: spec.name.clone(),
                key,
                output_dir: dir,
                workflow,
                manifest,
                tools: tools.clone(),
                ram: spec.ram,
                threads: spec.threads,
                activation,
                enzyme,
                predecessor,
                linux: None,
            };
            if self.config.use_linux_paths {
                instance = instance.with_linux(&self.config.path_rules);
            }
            built.push(instance);
        }

        let outputs = self.outputs.entry(spec.name.clone()).or_default();
        outputs.extend(built.iter().map(|i| (i.key.clone(), i.output_dir.clone())));
        out.instances.extend(built);
        Ok(())
    }

    /// Expand one run spec. Workflows that cannot be prepared are reported
    /// in the returned [`Expansion`] and do not stop the others
    pub fn expand(&mut self, spec: &RunSpec) -> Expansion {
        let mut out = Expansion::default();
        match Toolset::resolve(self.config, &spec.tools) {
            Ok(tools) => {
                for entry in &spec.workflows {
                    if let Err(e) = self.expand_entry(spec, entry, &tools, &mut out) {
                        out.skip(spec, format!("{}: {}", entry.name, e));
                    }
                }
            }
            Err(e) => out.skip(spec, e.to_string()),
        }
        self.spec_index += 1;
        out
    }

    pub fn expand_all<'s, I>(&mut self, specs: I) -> Expansion
    where
        I: IntoIterator<Item = &'s RunSpec>,
    {
        let mut all = Expansion::default();
        for spec in specs {
            let Expansion { instances, skipped } = self.expand(spec);
            all.instances.extend(instances);
            all.skipped.extend(skipped);
        }
        all
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fixture::{fixture, WORKFLOW};

    #[test]
    fn scenario() {
        let f = fixture();
        let t = f.template("Run1,workflow.tsv,MSFragger-3.2,Philosopher-4.0,IonQuant-1.8,,32,8\n");
        let e = Expander::new(&f.config).expand_all(&t.specs);
        assert!(e.skipped.is_empty(), "{:?}", e.skipped);
        assert_eq!(e.instances.len(), 1);

        let i = &e.instances[0];
        let tools = f.root().join("tools");
        assert_eq!(i.output_dir, f.root().join("Run1").join("closed"));
        assert_eq!(i.tools.fragpipe, tools.join("FragPipe-15.0"));
        assert_eq!(i.tools.msfragger, Some(tools.join("MSFragger-3.2")));
        assert_eq!(i.tools.philosopher, Some(tools.join("Philosopher-4.0")));
        assert_eq!(i.tools.ionquant, Some(tools.join("IonQuant-1.8")));
        assert_eq!(i.workflow, i.output_dir.join("closed.workflow"));
        assert_eq!((i.ram, i.threads), (32, 8));

        let m = Manifest::open(&i.manifest).unwrap();
        assert_eq!(i.manifest, i.output_dir.join("sample.fp-manifest"));
        assert_eq!(m.entries.len(), 1);
        assert_eq!(m.entries[0].path, f.root().join("sample.raw").to_string_lossy());

        let linux = i.linux().unwrap();
        assert_eq!(linux.output_dir, i.output_dir.to_string_lossy());
        assert_eq!(linux.tools.len(), 3);
    }

    #[test]
    fn cross_product() {
        let f = fixture();
        let t = f.template(
            "\
a,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD;EThcD,TRYP;CHYTR
b,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD;EThcD,TRYP
c,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD;EThcD
d,open.workflow,3.2,4.0,1.8,,32,8,sample.raw
e,open.workflow,3.2,4.0,1.8,,32,8,sample.raw;other.raw,HCD
",
        );
        let mut x = Expander::new(&f.config);
        let counts = t
            .specs
            .iter()
            .map(|s| x.expand(s).instances.len())
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![6, 3, 3, 1, 2]);

        let e = Expander::new(&f.config).expand(&t.specs[0]);
        let names = e
            .instances
            .iter()
            .map(|i| i.key.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "open_HCD_TRYP",
                "open_HCD_CHYTR",
                "open_ETD_TRYP",
                "open_ETD_CHYTR",
                "open_EThcD_TRYP",
                "open_EThcD_CHYTR"
            ]
        );
        let etd = ParamFile::open(&e.instances[2].workflow).unwrap();
        assert_eq!(etd.get("remove_precursor_peak"), Some("2"));
        assert_eq!(etd.get("search_enzyme_name_1"), Some("Trypsin"));
        assert_eq!(
            e.instances[2].workflow,
            f.root().join("a/open_ETD_TRYP/open_ETD.workflow")
        );

        let e = Expander::new(&f.config).expand(&t.specs[4]);
        assert_eq!(e.instances[0].key, "open_HCD_sample");
        assert_eq!(e.instances[1].key, "open_HCD_other");
    }

    #[test]
    fn base_files_untouched() {
        let f = fixture();
        let base = f.root().join("open.workflow");
        let before = fs::metadata(&base).unwrap().modified().unwrap();
        let t = f.template("a,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD;AIETD,TRYP;CHYTR;TRYP+CHYTR\n");
        let config = f.config.clone().disable(Stage::PtmProphet).split_database(4);
        let e = Expander::new(&config).expand_all(&t.specs);
        assert_eq!(e.instances.len(), 9);

        assert_eq!(fs::read_to_string(&base).unwrap(), WORKFLOW);
        assert_eq!(fs::metadata(&base).unwrap().modified().unwrap(), before);

        let wf = ParamFile::open(&e.instances[8].workflow).unwrap();
        assert_eq!(wf.get("ptmprophet.run-ptmprophet"), Some("false"));
        assert_eq!(wf.get("run-msfragger"), Some("true"));
        assert_eq!(wf.get("misc.slice-db"), Some("4"));
        assert_eq!(wf.get("database.db-path"), Some("/storage/dpolasky/db/decoys.fas"));
    }

    #[test]
    fn collisions() {
        let f = fixture();
        let t = f.template(
            "\
a,open.workflow,3.2,4.0,1.8,,32,8,sample.raw
a,open.workflow,3.2,4.0,1.8,,32,8,other.raw
a,open.workflow,3.2,4.0,1.8,,32,8,other.raw
",
        );
        let e = Expander::new(&f.config).expand_all(&t.specs);
        let dirs = e.instances.iter().map(|i| i.output_dir.clone()).collect::<Vec<_>>();
        assert_eq!(
            dirs,
            vec![
                f.root().join("a/open"),
                f.root().join("a/open-2"),
                f.root().join("a/open-3")
            ]
        );
        assert!(f.root().join("a/open-2/other.fp-manifest").exists());
    }

    #[test]
    fn reuse_results() {
        let f = fixture();
        let t = f.template(
            "\
search,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD
quant,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD,,search
,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,,,old/open.workflow
named,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,,,old/open.workflow
",
        );
        let e = Expander::new(&f.config).expand_all(&t.specs);
        assert!(e.skipped.is_empty(), "{:?}", e.skipped);
        assert_eq!(e.instances.len(), 6);

        let quant = &e.instances[3];
        assert_eq!(quant.key, "open_ETD");
        assert_eq!(quant.predecessor, Some(f.root().join("search/open_ETD")));
        let wf = ParamFile::open(&quant.workflow).unwrap();
        assert_eq!(wf.get("run-msfragger"), Some("false"));
        assert_eq!(wf.get("peptide-prophet.run-peptide-prophet"), Some("true"));

        assert_eq!(e.instances[4].output_dir, f.root().join("__FraggerResults/open"));
        assert_eq!(
            e.instances[4].predecessor,
            Some(f.root().join("old/__FraggerResults/open"))
        );
        assert_eq!(e.instances[5].predecessor, Some(f.root().join("old/open")));
        assert!(e.instances[0].predecessor.is_none());
    }

    #[test]
    fn skipped_entries() {
        let f = fixture();
        fs::write(f.root().join("list.tsv"), "closed\tsample.raw\nmissing\tsample.raw\n").unwrap();
        let t = f.template(
            "\
a,list.tsv,3.2,4.0,1.8,,32,8
b,open.workflow,3.2,4.0,1.8,,32,8
c,open.workflow,MSFragger-9,4.0,1.8,,32,8,sample.raw
d,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD
e,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,CID,,d
",
        );
        let e = Expander::new(&f.config).expand_all(&t.specs);
        assert_eq!(e.instances.len(), 3);
        assert_eq!(
            e.skipped.iter().map(|s| s.line).collect::<Vec<_>>(),
            vec![1, 2, 3, 5]
        );
        assert!(!f.root().join("e").exists());
        assert!(e.skipped[0].reason.contains("missing"));
        assert!(e.skipped[2].reason.contains("MSFragger-9"));
    }

    #[test]
    fn partial_entries_leave_nothing_behind() {
        let f = fixture();
        let t = f.template(
            "\
s,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;ETD
q,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD;CID,,s
r,open.workflow,3.2,4.0,1.8,,32,8,sample.raw,HCD,,q
",
        );
        let e = Expander::new(&f.config).expand_all(&t.specs);
        let keys = e
            .instances
            .iter()
            .map(|i| (i.run_name.as_str(), i.key.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(keys, vec![("s", "open_HCD"), ("s", "open_ETD"), ("r", "open_HCD")]);
        assert_eq!(e.skipped.len(), 1);
        assert_eq!(e.skipped[0].line, 2);
        assert!(e.skipped[0].reason.contains("open_CID"), "{}", e.skipped[0].reason);
        assert!(!f.root().join("q").exists());

        // `q` produced nothing, so `r` reads from a folder named after it
        assert_eq!(e.instances[2].predecessor, Some(f.root().join("q")));
    }

    #[test]
    fn windows_database_paths() {
        let f = fixture();
        fs::write(
            f.root().join("list.tsv"),
            "open.workflow\tsample.raw\tZ:\\dpolasky\\db\\x.fas\n",
        )
        .unwrap();
        let t = f.template("w,list.tsv,3.2,4.0,1.8,,32,8\n");

        let windows = f.config.clone().linux(false);
        let e = Expander::new(&windows).expand_all(&t.specs);
        let text = fs::read_to_string(&e.instances[0].workflow).unwrap();
        assert!(
            text.contains("database.db-path=Z\\:\\\\dpolasky\\\\db\\\\x.fas\n"),
            "{}",
            text
        );

        let e = Expander::new(&f.config).expand_all(&t.specs);
        let wf = ParamFile::open(&e.instances[0].workflow).unwrap();
        assert_eq!(wf.get("database.db-path"), Some("/storage/dpolasky/db/x.fas"));
    }

    #[test]
    fn manifests() {
        let f = fixture();
        let raw = f.root().join("rawdir");
        fs::create_dir(&raw).unwrap();
        for n in &["b.raw", "a.mzML", "notes.txt"] {
            fs::write(raw.join(n), "").unwrap();
        }
        fs::write(
            f.root().join("given.fp-manifest"),
            "Z:\\dpolasky\\x.raw\texp\t1\tDDA\n",
        )
        .unwrap();
        fs::write(f.root().join("list.tsv"), "open.workflow\tgiven.fp-manifest\n").unwrap();

        let t = f.template(
            "\
dir,open.workflow,3.2,4.0,1.8,,32,8,rawdir
given,list.tsv,3.2,4.0,1.8,,32,8
",
        );
        let e = Expander::new(&f.config).expand_all(&t.specs);
        let m = Manifest::open(&e.instances[0].manifest).unwrap();
        let paths = m.entries.iter().map(|e| e.path.clone()).collect::<Vec<_>>();
        assert_eq!(
            paths,
            vec![
                raw.join("a.mzML").to_string_lossy().into_owned(),
                raw.join("b.raw").to_string_lossy().into_owned()
            ]
        );

        let given = &e.instances[1];
        assert_eq!(given.manifest, given.output_dir.join("given_linux.fp-manifest"));
        let m = Manifest::open(&given.manifest).unwrap();
        assert_eq!(m.entries[0].path, "/storage/dpolasky/x.raw");
    }
}
