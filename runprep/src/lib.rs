//! Turn a batch template into search-pipeline runs and the shell script that
//! executes them.
//!
//! A template is parsed into [`RunSpec`]s, each of which is expanded into one
//! [`RunInstance`] per combination of workflow, data set, activation and
//! enzyme. Expansion lays out an output folder per instance holding patched
//! copies of the workflow and a manifest. The instances are then rendered
//! into a script by an [`Emitter`].
//!
//! ```rust,ignore
//! # use runprep::*;
//! let config = Config::default().tools_folder("/storage/tools");
//! let template = Template::open("batch.tsv")?;
//! let expansion = Expander::new(&config).expand_all(&template.specs);
//!
//! let mut emitter = Emitter::new(&config, chrono::Local::now().naive_local());
//! emitter.batch(&expansion.instances);
//! emitter.write("fragpipe_batch.sh")?;
//! ```
//!
//! Rows that cannot be used are reported as [`Skipped`] and generation carries
//! on with the rest of the batch.

pub mod config;
pub mod convert;
pub mod emit;
mod error;
pub mod expand;
pub mod files;
pub mod script;
pub mod template;
pub mod tools;

use std::path::{Path, PathBuf};

pub use config::{Aggregation, Config, ConversionConfig, LinkMode, Stage};
pub use emit::Emitter;
pub use error::{Error, Result};
pub(crate) use error::io_err;
pub use expand::{Expander, Expansion, RunInstance};
pub use script::{Arg, Command, Script, Shell};
pub use template::{RunSpec, Skipped, Template};
pub use tools::{Resolution, Tool, Toolset};

/// A file that a conversion, rename or link step gave up on
#[derive(Clone, Debug, PartialEq)]
pub struct Failure {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// A tools folder with one install of each tool, and a data folder holding
/// a workflow, a workflow list and a raw file
#[cfg(test)]
pub(crate) mod fixture {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    pub const WORKFLOW: &str = "\
# Workflow: closed
database.db-path=Z\\:\\\\dpolasky\\\\db\\\\decoys.fas
msfragger.misc.slice-db=1
msfragger.remove_precursor_peak=1
msfragger.fragment_ion_series=b,y
msfragger.search_enzyme_name_1=stricttrypsin
msfragger.search_enzyme_cut_1=KR
msfragger.run-msfragger=true
peptide-prophet.run-peptide-prophet=true
ptmprophet.run-ptmprophet=true
";

    pub struct Fixture {
        pub dir: TempDir,
        pub config: Config,
    }

    impl Fixture {
        pub fn root(&self) -> &Path {
            self.dir.path()
        }

        pub fn template(&self, text: &str) -> Template {
            Template::parse(text, self.root().join("batch.csv"))
        }
    }

    pub fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        let tools = root.join("tools");
        let fragpipe = tools.join("FragPipe-15.0");
        fs::create_dir_all(fragpipe.join("bin")).unwrap();
        fs::create_dir_all(fragpipe.join("workflows")).unwrap();
        fs::write(fragpipe.join("workflows/closed.workflow"), WORKFLOW).unwrap();
        for t in &["MSFragger-3.2", "Philosopher-4.0", "IonQuant-1.8"] {
            fs::create_dir(tools.join(t)).unwrap();
        }

        fs::write(root.join("open.workflow"), WORKFLOW).unwrap();
        fs::write(root.join("workflow.tsv"), "closed\tsample.raw\n").unwrap();
        fs::write(root.join("sample.raw"), "").unwrap();
        fs::write(root.join("other.raw"), "").unwrap();

        let config = Config::default().tools_folder(tools);
        Fixture { dir, config }
    }
}
