use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fpfiles::{params, yml, Activation, Convention, Enzyme};
use log::{error, info, warn, LevelFilter};
use runprep::convert::{self, ConversionJob};
use runprep::{emit, files, Config, Emitter, Expander, Failure, Stage, Template};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Generate FragPipe batch scripts from run templates, and tidy up the
/// files around them
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// JSON options file, see `runprep::config`
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write the batch script for one or more templates
    Generate {
        #[arg(required = true)]
        templates: Vec<PathBuf>,

        /// Put every template into one script, next to the first template
        #[arg(long, default_value_t = false)]
        single: bool,

        /// Write a bash script with Linux paths, whatever the options file says
        #[arg(long, default_value_t = false, conflicts_with = "windows")]
        linux: bool,

        /// Write a Windows batch file with paths left as they are
        #[arg(long, default_value_t = false)]
        windows: bool,

        /// Switch a pipeline stage off in every workflow (repeatable)
        #[arg(long)]
        disable: Vec<Stage>,

        /// Folder holding the versioned tool installs
        #[arg(long)]
        tools: Option<PathBuf>,

        /// Number of database slices for the search
        #[arg(long)]
        split_db: Option<usize>,
    },

    /// Write activation and enzyme specific copies of a parameter file
    Params {
        base: PathBuf,

        #[arg(short, long)]
        activation: Vec<Activation>,

        #[arg(short, long)]
        enzyme: Option<Enzyme>,

        /// Defaults to the folder holding `base`, or its subfolder named
        /// after the enzyme. Enzyme variants look for their database one
        /// folder up
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Pipeline config to copy with its protein database replaced
        #[arg(long, requires = "database")]
        yml: Option<PathBuf>,

        #[arg(long)]
        database: Option<String>,
    },

    /// Convert raw files to mzML
    Convert {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// One output folder per activation filter (repeatable)
        #[arg(short, long)]
        activation: Vec<String>,

        #[arg(short, long)]
        threads: Option<usize>,

        #[arg(long, default_value_t = false)]
        no_deisotope: bool,
    },

    /// Insert the enzyme tag ahead of the activation in file names
    RenameEnzyme {
        enzyme: Enzyme,

        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Link the outputs of single-activation runs into one folder
    LinkSubsets {
        /// Folder holding one results folder per activation
        dir: PathBuf,

        #[arg(short, long)]
        activation: Vec<Activation>,
    },

    /// Rewrite a finished results folder to Windows paths
    WindowsPaths {
        folder: PathBuf,

        #[arg(long, value_enum, default_value_t = Style::Drive)]
        style: Style,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum Style {
    Drive,
    Unc,
}

impl From<Style> for Convention {
    fn from(s: Style) -> Self {
        match s {
            Style::Drive => Convention::Drive,
            Style::Unc => Convention::Unc,
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p).with_context(|| format!("loading options from {}", p.display())),
        None => Ok(Config::default()),
    }
}

fn report(what: &str, failed: &[Failure]) {
    for f in failed {
        error!("{}: {}", what, f);
    }
    if !failed.is_empty() {
        warn!("{} {} file(s) failed", failed.len(), what);
    }
}

fn generate(config: &Config, templates: &[PathBuf], single: bool) -> Result<()> {
    let now = chrono::Local::now().naive_local();
    let name = emit::script_name(config);
    let script_path = |template: &Path| {
        template
            .parent()
            .unwrap_or_else(|| Path::new(""))
            .join(&name)
    };

    let mut skipped = 0;
    let mut unreadable = 0;
    let mut combined = None;
    let mut expander = Expander::new(config);
    let mut emitter = Emitter::new(config, now);
    for path in templates {
        let template = match Template::open(path) {
            Ok(t) => t,
            Err(e) => {
                error!("reading {}: {}, skipping it", path.display(), e);
                unreadable += 1;
                continue;
            }
        };
        if !single {
            expander = Expander::new(config);
            emitter = Emitter::new(config, now);
        }
        let expansion = expander.expand_all(&template.specs);
        skipped += template.skipped.len() + expansion.skipped.len();
        info!(
            "{}: {} runs from {} rows",
            path.display(),
            expansion.instances.len(),
            template.specs.len()
        );
        emitter.batch(&expansion.instances);
        if single {
            combined.get_or_insert_with(|| script_path(path));
        } else {
            emitter.write(script_path(path))?;
        }
    }
    if unreadable == templates.len() {
        bail!("none of the {} template(s) could be read", unreadable);
    }
    if let Some(dest) = combined {
        emitter.write(dest)?;
    }
    if unreadable > 0 {
        warn!("{} template(s) could not be read, see above", unreadable);
    }
    if skipped > 0 {
        warn!("{} rows or runs were skipped, see above", skipped);
    }
    Ok(())
}

/// Output folder for `params` without `--out`. Enzyme variants reroot
/// their database to `../`, so they get a subfolder of their own
fn default_out(base: &Path, enzyme: Option<Enzyme>) -> PathBuf {
    let dir = base.parent().map(Path::to_path_buf).unwrap_or_default();
    match enzyme {
        Some(e) => dir.join(e.tag()),
        None => dir,
    }
}

fn write_params(
    base: &Path,
    activations: &[Activation],
    enzyme: Option<Enzyme>,
    out: &Path,
) -> Result<()> {
    let activations = if activations.is_empty() {
        vec![None]
    } else {
        activations.iter().copied().map(Some).collect()
    };
    for act in activations {
        let dest = params::variant(base, out, act, enzyme)
            .with_context(|| format!("deriving from {}", base.display()))?;
        info!("wrote {}", dest.display());
    }
    Ok(())
}

/// Subfolders of `dir` except the one combined results go into
fn results_folders(dir: &Path, skip: &str) -> Result<Vec<PathBuf>> {
    let mut v = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let path = entry?.path();
        if path.is_dir() && path.file_name().map(|n| n != skip).unwrap_or(false) {
            v.push(path);
        }
    }
    v.sort();
    Ok(v)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut logger =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Cmd::Generate {
            templates,
            single,
            linux,
            windows,
            disable,
            tools,
            split_db,
        } => {
            if linux || windows {
                config = config.linux(linux);
            }
            for stage in disable {
                config = config.disable(stage);
            }
            if let Some(t) = tools {
                config = config.tools_folder(t);
            }
            if let Some(n) = split_db {
                config = config.split_database(n);
            }
            generate(&config, &templates, single)?;
        }
        Cmd::Params {
            base,
            activation,
            enzyme,
            out,
            yml,
            database,
        } => {
            let out = out.unwrap_or_else(|| default_out(&base, enzyme));
            write_params(&base, &activation, enzyme, &out)?;
            if let (Some(pipeline), Some(db)) = (yml, database) {
                let dest = yml::copy_with_database(&pipeline, &out, &db)
                    .with_context(|| format!("copying {}", pipeline.display()))?;
                info!("wrote {}", dest.display());
            }
        }
        Cmd::Convert {
            files,
            activation,
            threads,
            no_deisotope,
        } => {
            let mut conv = config.conversion.clone();
            if !activation.is_empty() {
                conv.activations = activation;
            }
            if no_deisotope {
                conv.deisotope = false;
            }
            let threads = threads.unwrap_or(conv.threads);
            let jobs = ConversionJob::plan(&conv, &files);
            info!("converting {} files in {} jobs", files.len(), jobs.len());

            let failed = convert::run_pool(
                &jobs,
                threads,
                Duration::from_secs(conv.timeout_secs),
                conv.retries,
            )?;
            report("conversion", &failed);
            let outputs = jobs
                .iter()
                .filter(|j| !failed.iter().any(|f| f.path == j.input))
                .map(ConversionJob::output);
            report("verification", &convert::verify(outputs));
        }
        Cmd::RenameEnzyme { enzyme, files } => {
            let outcome = files::rename_enzyme(&files, enzyme);
            info!("renamed {} files", outcome.done.len());
            report("rename", &outcome.failed);
        }
        Cmd::LinkSubsets { dir, activation } => {
            let combined = dir
                .join(&config.results_folder)
                .join("_Combined_Philosopher");
            let folders = results_folders(&dir, &config.results_folder)?;
            if folders.is_empty() {
                bail!("no results folders in {}", dir.display());
            }
            let outcome = files::link_subsets(&folders, &activation, &combined)?;
            info!("linked {} files into {}", outcome.done.len(), combined.display());
            report("link", &outcome.failed);
        }
        Cmd::WindowsPaths { folder, style } => {
            let backups = files::windowsize_results(&folder, &config.path_rules, style.into())
                .with_context(|| format!("updating {}", folder.display()))?;
            for b in backups {
                info!("original saved as {}", b.display());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cli_shape() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn generate_args() {
        let args = Args::parse_from(&[
            "fpbatch",
            "generate",
            "a.csv",
            "b.csv",
            "--single",
            "--disable",
            "ptmprophet",
            "--disable",
            "psm-validation",
            "--split-db",
            "4",
        ]);
        match args.command {
            Cmd::Generate {
                templates,
                single,
                disable,
                split_db,
                windows,
                ..
            } => {
                assert_eq!(templates.len(), 2);
                assert!(single && !windows);
                assert_eq!(disable, vec![Stage::PtmProphet, Stage::Validation]);
                assert_eq!(split_db, Some(4));
            }
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn params_args() {
        let args = Args::parse_from(&[
            "fpbatch", "params", "closed.params", "-a", "HCD", "-a", "ethcd", "-e", "TRYP",
        ]);
        match args.command {
            Cmd::Params {
                activation, enzyme, ..
            } => {
                assert_eq!(activation, vec![Activation::Hcd, Activation::Ethcd]);
                assert_eq!(enzyme, Some(Enzyme::Trypsin));
            }
            other => panic!("{:?}", other),
        }
        assert!(Args::try_parse_from(&["fpbatch", "params", "p", "--yml", "x.yml"]).is_err());
        assert!(
            Args::try_parse_from(&["fpbatch", "generate", "a.csv", "--linux", "--windows"]).is_err()
        );
    }

    #[test]
    fn enzyme_variants_get_their_own_folder() {
        let dir = tempfile::TempDir::new().unwrap();
        let d = dir.path();
        let base = d.join("closed.params");
        fs::write(
            &base,
            "database_name = db.fas\nsearch_enzyme_name = Trypsin\nremove_precursor_peak = 1\n",
        )
        .unwrap();

        assert_eq!(default_out(&base, None), d);
        let out = default_out(&base, Some(Enzyme::Chymotrypsin));
        assert_eq!(out, d.join("CHYTR"));

        write_params(&base, &[], Some(Enzyme::Chymotrypsin), &out).unwrap();
        write_params(&base, &[Activation::Hcd], Some(Enzyme::Chymotrypsin), &out).unwrap();
        fs::write(d.join("db.fas"), "").unwrap();
        for name in &["closed.params", "closed_HCD.params"] {
            let file = params::ParamFile::open(out.join(name)).unwrap();
            let db = params::database_name(&file).unwrap();
            assert_eq!(db, "../db.fas");
            assert_eq!(
                fs::canonicalize(out.join(db)).unwrap(),
                fs::canonicalize(d.join("db.fas")).unwrap()
            );
        }
        assert!(fs::read_to_string(&base).unwrap().contains("database_name = db.fas"));

        // activation-only variants stay next to the base file
        write_params(&base, &[Activation::Etd], None, &default_out(&base, None)).unwrap();
        assert!(d.join("closed_ETD.params").exists());
    }

    #[test]
    fn unreadable_templates_are_skipped() {
        let dir = tempfile::TempDir::new().unwrap();
        let d = dir.path();
        let tools = d.join("tools");
        fs::create_dir_all(tools.join("FragPipe-15.0/bin")).unwrap();
        for t in &["MSFragger-3.2", "Philosopher-4.0", "IonQuant-1.8"] {
            fs::create_dir(tools.join(t)).unwrap();
        }
        fs::write(d.join("open.workflow"), "msfragger.run-msfragger=true\n").unwrap();
        fs::write(d.join("sample.raw"), "").unwrap();
        let good = d.join("good").join("batch.csv");
        fs::create_dir(d.join("good")).unwrap();
        fs::write(&good, "a,../open.workflow,3.2,4.0,1.8,,32,8,../sample.raw\n").unwrap();
        let missing = d.join("missing").join("batch.csv");

        let config = Config::default().tools_folder(tools);
        let script = d.join("good").join(emit::script_name(&config));
        generate(&config, &[missing.clone(), good.clone()], false).unwrap();
        assert!(fs::read_to_string(&script).unwrap().contains("--headless"));
        fs::remove_file(&script).unwrap();

        generate(&config, &[missing.clone(), good], true).unwrap();
        assert!(script.exists());
        assert!(generate(&config, &[missing], true).is_err());
    }

    #[test]
    fn subset_folders() {
        let dir = tempfile::TempDir::new().unwrap();
        let d = dir.path();
        for f in &["b_ETD", "a_HCD", "__FraggerResults"] {
            fs::create_dir(d.join(f)).unwrap();
        }
        fs::write(d.join("notes.txt"), "").unwrap();
        assert_eq!(
            results_folders(d, "__FraggerResults").unwrap(),
            vec![d.join("a_HCD"), d.join("b_ETD")]
        );
    }
}
