//! Options controlling batch generation, loaded from a JSON file
//!
//! ```text
//! {
//!     "use_linux_paths": true,
//!     "disable_stages": ["ptmprophet"],
//!     "tools_folder": "Z:\\dpolasky\\projects\\_BuildTests\\tools",
//!     "aggregation": {
//!         "program": "/storage/tools/philosopher",
//!         "args": ["report", "--dir", "{dir}"],
//!         "expected": "protein.tsv"
//!     }
//! }
//! ```
//!
//! Every field is optional.
use super::*;
use fpfiles::PathRules;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::str::FromStr;

/// Pipeline stages that a workflow can switch off with `run-<stage>=false`
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    #[serde(rename = "msfragger")]
    MsFragger,
    #[serde(rename = "protein-prophet")]
    ProteinProphet,
    #[serde(rename = "peptide-prophet")]
    PeptideProphet,
    #[serde(rename = "ptmprophet")]
    PtmProphet,
    #[serde(rename = "shepherd")]
    Shepherd,
    /// Needed whenever peptide-prophet or percolator is off
    #[serde(rename = "psm-validation")]
    Validation,
    #[serde(rename = "tmtintegrator")]
    TmtIntegrator,
    #[serde(rename = "percolator")]
    Percolator,
    #[serde(rename = "report")]
    Report,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::MsFragger,
        Stage::ProteinProphet,
        Stage::PeptideProphet,
        Stage::PtmProphet,
        Stage::Shepherd,
        Stage::Validation,
        Stage::TmtIntegrator,
        Stage::Percolator,
        Stage::Report,
    ];

    /// Name used in the workflow's `run-<stage>` keys
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::MsFragger => "msfragger",
            Stage::ProteinProphet => "protein-prophet",
            Stage::PeptideProphet => "peptide-prophet",
            Stage::PtmProphet => "ptmprophet",
            Stage::Shepherd => "shepherd",
            Stage::Validation => "psm-validation",
            Stage::TmtIntegrator => "tmtintegrator",
            Stage::Percolator => "percolator",
            Stage::Report => "report",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Stage::ALL
            .iter()
            .copied()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::UnknownStage(s.into()))
    }
}

/// How predecessor outputs are brought into a run that skips the search
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    Copy,
    Symlink,
}

impl Default for LinkMode {
    fn default() -> Self {
        LinkMode::Copy
    }
}

/// Paths used when a template leaves a tool's version selector empty
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDefaults {
    /// FragPipe install directory, containing `bin/` and `workflows/`
    pub fragpipe: Option<PathBuf>,
    pub msfragger: Option<PathBuf>,
    pub philosopher: Option<PathBuf>,
    pub ionquant: Option<PathBuf>,
}

/// A downstream step run once per output directory after all searches of a
/// run are done.
///
/// `{dir}` in `args` is replaced by the output directory. The step is
/// skipped for directories that already contain `expected`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub expected: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionConfig {
    pub program: PathBuf,
    pub threads: usize,
    pub timeout_secs: u64,
    pub retries: usize,
    pub max_charge: u8,
    pub deisotope: bool,
    /// One output folder per activation filter. Empty means no filter
    pub activations: Vec<String>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        ConversionConfig {
            program: PathBuf::from("msconvert"),
            threads: 4,
            timeout_secs: 3600,
            retries: 2,
            max_charge: 6,
            deisotope: true,
            activations: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub use_linux_paths: bool,
    pub disable_stages: BTreeSet<Stage>,
    /// Patched into the workflow's `msfragger.misc.slice-db` when non-zero
    pub split_database_count: usize,
    pub tools_folder: Option<PathBuf>,
    pub default_tools: ToolDefaults,
    pub results_folder: String,
    /// Extensions of predecessor outputs brought into stage-skipping runs
    pub copy_filetypes: Vec<String>,
    pub link_mode: LinkMode,
    pub aggregation: Option<Aggregation>,
    pub path_rules: PathRules,
    /// Appended to the generated script name, for several batches in one folder
    pub batch_increment: String,
    pub conversion: ConversionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_linux_paths: true,
            disable_stages: BTreeSet::new(),
            split_database_count: 0,
            tools_folder: None,
            default_tools: ToolDefaults::default(),
            results_folder: "__FraggerResults".into(),
            copy_filetypes: vec!["pepXML".into()],
            link_mode: LinkMode::Copy,
            aggregation: None,
            path_rules: PathRules::default(),
            batch_increment: String::new(),
            conversion: ConversionConfig::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        serde_json::from_str(&text).map_err(|source| Error::Config {
            path: path.into(),
            source,
        })
    }

    pub fn linux(mut self, on: bool) -> Self {
        self.use_linux_paths = on;
        self
    }

    pub fn disable(mut self, stage: Stage) -> Self {
        self.disable_stages.insert(stage);
        self
    }

    pub fn tools_folder<P: Into<PathBuf>>(mut self, folder: P) -> Self {
        self.tools_folder = Some(folder.into());
        self
    }

    pub fn split_database(mut self, count: usize) -> Self {
        self.split_database_count = count;
        self
    }

    /// Rewrite a path for the machine the generated script will run on
    pub fn target_path<P: AsRef<Path>>(&self, path: P) -> String {
        let s = path.as_ref().to_string_lossy();
        if self.use_linux_paths {
            self.path_rules.to_linux(&s)
        } else {
            s.into_owned()
        }
    }
}
