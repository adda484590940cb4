//! Raw file conversion to mzML on a worker pool
//!
//! Each input is converted once per configured activation filter, into a
//! folder next to the input named after the filter (`HCD_deiso`, `ETD`...).
//! Attempts that fail or run past the timeout are killed and retried, and
//! whatever still fails is reported rather than aborting the pool.
//!
//! ```rust,ignore
//! let jobs = ConversionJob::plan(&config.conversion, &inputs);
//! let failed = run_pool(&jobs, 12, Duration::from_secs(3600), 2)?;
//! let incomplete = verify(jobs.iter().map(ConversionJob::output));
//! ```
use super::*;
use log::{info, warn};
use memchr::memmem;
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::process::{self, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// How often a running conversion is checked on
const POLL: Duration = Duration::from_millis(100);

/// Bytes at the end of an mzML file searched for its closing tag
const TAIL: u64 = 64 * 1024;

#[derive(Clone, Debug, PartialEq)]
pub struct ConversionJob {
    pub program: PathBuf,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub args: Vec<String>,
}

impl ConversionJob {
    /// Job for one input and activation filter. An empty `activation`
    /// converts every scan
    pub fn new<P: AsRef<Path>>(config: &ConversionConfig, input: P, activation: &str) -> Self {
        let input = input.as_ref();
        let dir = input.parent().unwrap_or_else(|| Path::new(""));
        let output_dir = match (activation, config.deisotope) {
            ("", false) => dir.to_path_buf(),
            (act, true) => dir.join(format!("{}_deiso", act)),
            (act, false) => dir.join(act),
        };

        let mut args = vec![
            input.to_string_lossy().into_owned(),
            "--mzML".into(),
            "-z".into(),
            "--64".into(),
            "-o".into(),
            output_dir.to_string_lossy().into_owned(),
            "--filter".into(),
            "peakPicking true 1-".into(),
            "--filter".into(),
            "zeroSamples removeExtra 1-".into(),
        ];
        if !activation.is_empty() {
            args.push("--filter".into());
            args.push(format!("activation {}", activation));
        }
        if config.deisotope {
            args.push("--filter".into());
            args.push(format!(
                "MS2Deisotope Poisson minCharge=1 maxCharge={}",
                config.max_charge
            ));
        }

        ConversionJob {
            program: config.program.clone(),
            input: input.into(),
            output_dir,
            args,
        }
    }

    /// One job per input and configured activation
    pub fn plan<P: AsRef<Path>>(config: &ConversionConfig, inputs: &[P]) -> Vec<ConversionJob> {
        let all = [String::new()];
        let activations = if config.activations.is_empty() {
            &all[..]
        } else {
            &config.activations[..]
        };
        inputs
            .iter()
            .flat_map(|input| {
                activations
                    .iter()
                    .map(move |act| ConversionJob::new(config, input, act))
            })
            .collect()
    }

    /// The mzML file the job writes
    pub fn output(&self) -> PathBuf {
        let stem = self
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.output_dir.join(format!("{}.mzML", stem))
    }

    /// A single attempt, killed once `timeout` has passed
    fn run(&self, timeout: Duration) -> std::result::Result<(), String> {
        fs::create_dir_all(&self.output_dir)
            .map_err(|e| format!("could not create {}: {}", self.output_dir.display(), e))?;
        let mut child = process::Command::new(&self.program)
            .args(&self.args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("could not start {}: {}", self.program.display(), e))?;

        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => return Ok(()),
                Ok(Some(status)) => return Err(format!("exited with {}", status)),
                Ok(None) if start.elapsed() >= timeout => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(format!("still running after {:?}, killed", timeout));
                }
                Ok(None) => thread::sleep(POLL),
                Err(e) => return Err(e.to_string()),
            }
        }
    }
}

/// Run `jobs` on `threads` workers, retrying each failed job up to
/// `retries` times. Returns the jobs that never succeeded
pub fn run_pool(
    jobs: &[ConversionJob],
    threads: usize,
    timeout: Duration,
    retries: usize,
) -> Result<Vec<Failure>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .build()?;

    let failures = pool.install(|| {
        jobs.par_iter()
            .filter_map(|job| {
                let mut reason = String::new();
                for attempt in 0..=retries {
                    match job.run(timeout) {
                        Ok(()) => {
                            info!("converted {}", job.input.display());
                            return None;
                        }
                        Err(e) => {
                            warn!(
                                "converting {} (attempt {} of {}): {}",
                                job.input.display(),
                                attempt + 1,
                                retries + 1,
                                e
                            );
                            reason = e;
                        }
                    }
                }
                Some(Failure {
                    path: job.input.clone(),
                    reason,
                })
            })
            .collect::<Vec<_>>()
    });
    Ok(failures)
}

fn is_complete(path: &Path) -> std::io::Result<bool> {
    let mut file = File::open(path)?;
    let len = file.metadata()?.len();
    file.seek(SeekFrom::Start(len.saturating_sub(TAIL)))?;
    let mut tail = Vec::new();
    file.read_to_end(&mut tail)?;
    Ok(memmem::find(&tail, b"</indexedmzML>").is_some() || memmem::find(&tail, b"</mzML>").is_some())
}

/// Check that every output was written to the end
pub fn verify<I, P>(outputs: I) -> Vec<Failure>
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    outputs
        .into_iter()
        .filter_map(|p| {
            let path = p.as_ref();
            let reason = match is_complete(path) {
                Ok(true) => return None,
                Ok(false) => "truncated, no closing mzML tag".to_string(),
                Err(e) => e.to_string(),
            };
            warn!("{}: {}", path.display(), reason);
            Some(Failure {
                path: path.into(),
                reason,
            })
        })
        .collect()
}
