//! Find tool installations by version selector
use super::*;
use crate::template::Selectors;
use log::warn;
use std::fmt;
use std::fs;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Tool {
    FragPipe,
    MsFragger,
    Philosopher,
    IonQuant,
}

impl Tool {
    pub fn name(self) -> &'static str {
        match self {
            Tool::FragPipe => "fragpipe",
            Tool::MsFragger => "msfragger",
            Tool::Philosopher => "philosopher",
            Tool::IonQuant => "ionquant",
        }
    }

    /// Command line flag the pipeline runner takes this tool's path with
    pub fn flag(self) -> Option<&'static str> {
        match self {
            Tool::FragPipe => None,
            Tool::MsFragger => Some("--config-msfragger"),
            Tool::Philosopher => Some("--config-philosopher"),
            Tool::IonQuant => Some("--config-ionquant"),
        }
    }
}

impl fmt::Display for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Unique(PathBuf),
    /// More than one entry was equally good, `chosen` is the first of them
    Ambiguous {
        chosen: PathBuf,
        candidates: Vec<PathBuf>,
    },
}

impl Resolution {
    pub fn into_path(self) -> PathBuf {
        match self {
            Resolution::Unique(p) => p,
            Resolution::Ambiguous { chosen, .. } => chosen,
        }
    }
}

const PRERELEASE: &[&str] = &["-rc", "-build"];

fn is_prerelease(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    PRERELEASE.iter().any(|m| name.contains(m))
}

/// Pick the entry of `folder` whose name contains `selector`, ignoring case.
///
/// Release builds win over `-rc`/`-build` entries unless the selector asks
/// for a pre-release itself. Remaining ties go to the first name in sorted
/// order, with a warning
pub fn resolve<P: AsRef<Path>>(folder: P, selector: &str) -> Result<Resolution> {
    let folder = folder.as_ref();
    let needle = selector.to_ascii_lowercase();
    let mut names = Vec::new();
    for entry in fs::read_dir(folder).map_err(io_err(folder))? {
        let entry = entry.map_err(io_err(folder))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.to_ascii_lowercase().contains(&needle) {
            names.push(name);
        }
    }
    names.sort();

    if !is_prerelease(selector) && names.iter().any(|n| !is_prerelease(n)) {
        names.retain(|n| !is_prerelease(n));
    }

    let mut candidates = names.into_iter().map(|n| folder.join(n));
    match (candidates.next(), candidates.next()) {
        (None, _) => Err(Error::NoTool {
            folder: folder.into(),
            selector: selector.into(),
        }),
        (Some(only), None) => Ok(Resolution::Unique(only)),
        (Some(first), Some(second)) => {
            let mut all = vec![first.clone(), second];
            all.extend(candidates);
            warn!(
                "{:?} matches {} entries in {}, using {}",
                selector,
                all.len(),
                folder.display(),
                first.display()
            );
            Ok(Resolution::Ambiguous {
                chosen: first,
                candidates: all,
            })
        }
    }
}

/// Resolved tool locations for one run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Toolset {
    /// FragPipe install directory
    pub fragpipe: PathBuf,
    pub msfragger: Option<PathBuf>,
    pub philosopher: Option<PathBuf>,
    pub ionquant: Option<PathBuf>,
}

impl Toolset {
    /// Resolve every selector. An empty selector falls back to the
    /// configured default; FragPipe itself is looked up by name if there is
    /// none, the others are left to the pipeline's own settings
    pub fn resolve(config: &Config, selectors: &Selectors) -> Result<Toolset> {
        let defaults = &config.default_tools;
        let lookup = |tool: Tool, selector: &str, default: &Option<PathBuf>| -> Result<Option<PathBuf>> {
            if selector.is_empty() {
                if default.is_some() || tool != Tool::FragPipe {
                    return Ok(default.clone());
                }
            }
            let selector = if selector.is_empty() { tool.name() } else { selector };
            let folder = config
                .tools_folder
                .as_ref()
                .ok_or_else(|| Error::ToolNotConfigured(tool.to_string()))?;
            resolve(folder, selector).map(|r| Some(r.into_path()))
        };

        let fragpipe = lookup(Tool::FragPipe, &selectors.fragpipe, &defaults.fragpipe)?
            .ok_or_else(|| Error::ToolNotConfigured(Tool::FragPipe.to_string()))?;
        Ok(Toolset {
            fragpipe,
            msfragger: lookup(Tool::MsFragger, &selectors.msfragger, &defaults.msfragger)?,
            philosopher: lookup(Tool::Philosopher, &selectors.philosopher, &defaults.philosopher)?,
            ionquant: lookup(Tool::IonQuant, &selectors.ionquant, &defaults.ionquant)?,
        })
    }

    pub fn get(&self, tool: Tool) -> Option<&Path> {
        match tool {
            Tool::FragPipe => Some(&self.fragpipe),
            Tool::MsFragger => self.msfragger.as_deref(),
            Tool::Philosopher => self.philosopher.as_deref(),
            Tool::IonQuant => self.ionquant.as_deref(),
        }
    }

    /// The headless runner inside the install directory
    pub fn executable(&self, shell: Shell) -> PathBuf {
        match shell {
            Shell::Bash => self.fragpipe.join("bin").join("fragpipe"),
            Shell::Batch => self.fragpipe.join("bin").join("fragpipe.bat"),
        }
    }

    /// Location of a workflow shipped with the install
    pub fn bundled_workflow(&self, name: &str) -> PathBuf {
        self.fragpipe
            .join("workflows")
            .join(format!("{}.workflow", name))
    }
}
