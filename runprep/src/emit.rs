//! Render expanded runs into the script that executes them
//!
//! Each run gets a `# Run i of n` banner, the commands bringing in reused
//! search results, and the pipeline invocation with its output copied to a
//! timestamped log in the run folder. When an [`Aggregation`] is
//! configured, runs that came from the same template row are aggregated
//! together in a trailing section, in the background, skipping folders that
//! already hold the aggregated result.
use super::*;
use crate::expand::PathView;
use chrono::NaiveDateTime;
use log::{debug, info};
use std::fs;

pub const TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";

/// File name of the generated script
pub fn script_name(config: &Config) -> String {
    format!(
        "fragpipe_batch{}.{}",
        config.batch_increment,
        shell_for(config).extension()
    )
}

pub fn shell_for(config: &Config) -> Shell {
    if config.use_linux_paths {
        Shell::Bash
    } else {
        Shell::Batch
    }
}

pub struct Emitter<'c> {
    config: &'c Config,
    shell: Shell,
    stamp: String,
    header: bool,
    /// Runs emitted by earlier batches
    runs: usize,
    script: Script,
}

impl<'c> Emitter<'c> {
    /// `now` is embedded in the log file names
    pub fn new(config: &'c Config, now: NaiveDateTime) -> Self {
        Emitter {
            config,
            shell: shell_for(config),
            stamp: now.format(TIMESTAMP).to_string(),
            header: true,
            runs: 0,
            script: Script::new(),
        }
    }

    /// For scripts that continue an earlier one of the same batch
    pub fn without_header(mut self) -> Self {
        self.header = false;
        self
    }

    fn view(&self, instance: &RunInstance) -> PathView {
        match (self.shell, instance.linux()) {
            (Shell::Bash, Some(view)) => view.clone(),
            _ => instance.view(self.shell),
        }
    }

    fn join(&self, dir: &str, file: &str) -> String {
        format!("{}{}{}", dir, self.shell.separator(), file)
    }

    fn invocation(&self, instance: &RunInstance, view: &PathView) -> Command {
        let mut cmd = Command::invoke(view.executable.as_str())
            .arg("--headless")
            .arg("--workflow")
            .arg(view.workflow.as_str())
            .arg("--manifest")
            .arg(view.manifest.as_str())
            .arg("--workdir")
            .arg(view.output_dir.as_str())
            .arg("--ram")
            .arg(instance.ram.to_string())
            .arg("--threads")
            .arg(instance.threads.to_string());

        if view.tools.is_empty() {
            if let Some(folder) = &self.config.tools_folder {
                cmd = cmd
                    .arg("--config-tools-folder")
                    .arg(self.config.target_path(folder));
            }
        }
        for (tool, path) in &view.tools {
            if let Some(flag) = tool.flag() {
                cmd = cmd.arg(flag).arg(path.as_str());
            }
        }
        cmd.log(self.join(
            &view.output_dir,
            &format!("log-fragpipe_{}.txt", self.stamp),
        ))
    }

    /// The aggregation command for one folder, run only if its result is
    /// missing. Inside the trailing loop `dir` is the loop variable
    fn aggregate(&self, agg: &Aggregation, dir: &str, in_loop: bool) -> Command {
        let word = |s: String| if in_loop { Arg::Expanded(s) } else { Arg::Word(s) };
        let args = agg
            .args
            .iter()
            .map(|a| {
                if a.contains("{dir}") {
                    word(a.replace("{dir}", dir))
                } else {
                    Arg::Word(a.clone())
                }
            })
            .collect();
        let cmd = Command::Invoke {
            program: agg.program.clone(),
            args,
            log: Some(word(self.join(dir, &format!("log-aggregate_{}.txt", self.stamp)))),
            background: in_loop,
        };
        Command::IfMissing {
            file: word(self.join(dir, &agg.expected)),
            body: vec![cmd],
        }
    }

    /// Output folders of `group` that still need aggregating
    fn pending(&self, agg: &Aggregation, group: &[&RunInstance]) -> Vec<String> {
        group
            .iter()
            .filter(|i| {
                let done = i.output_dir.join(&agg.expected).exists();
                if done {
                    info!(
                        "{} already holds {}, not aggregating it again",
                        i.output_dir.display(),
                        agg.expected
                    );
                }
                !done
            })
            .map(|i| self.view(i).output_dir)
            .collect()
    }

    /// Append the commands for `instances`, in order. Runs are numbered
    /// on from earlier batches, out of all runs emitted so far
    pub fn batch(&mut self, instances: &[RunInstance]) -> &mut Self {
        let agg = self.config.aggregation.as_ref();
        let group_size = |idx: usize| instances.iter().filter(|i| i.spec_index == idx).count();
        let first = self.runs;
        self.runs += instances.len();

        for (n, instance) in instances.iter().enumerate() {
            let view = self.view(instance);
            self.script.push(Command::Comment(format!(
                "Run {} of {}*************************************",
                first + n + 1,
                self.runs
            )));
            if let Some(from) = &view.predecessor {
                for ext in &self.config.copy_filetypes {
                    self.script.push(Command::CopyOutputs {
                        from: from.clone(),
                        to: view.output_dir.clone(),
                        extension: ext.clone(),
                        mode: self.config.link_mode,
                    });
                }
            }
            let cmd = self.invocation(instance, &view);
            self.script.push(cmd);

            if let Some(agg) = agg {
                if group_size(instance.spec_index) == 1 {
                    for dir in self.pending(agg, &[instance]) {
                        let cmd = self.aggregate(agg, &dir, false);
                        self.script.push(cmd);
                    }
                }
            }
            self.script.push(Command::Blank);
        }

        if let Some(agg) = agg {
            let mut seen = Vec::new();
            for instance in instances {
                let idx = instance.spec_index;
                if seen.contains(&idx) || group_size(idx) < 2 {
                    continue;
                }
                seen.push(idx);
                let group = instances
                    .iter()
                    .filter(|i| i.spec_index == idx)
                    .collect::<Vec<_>>();
                let dirs = self.pending(agg, &group);
                if dirs.is_empty() {
                    debug!("nothing left to aggregate for {:?}", instance.run_name);
                    continue;
                }
                let name = self.shell.loop_var();
                let body = vec![self.aggregate(agg, &self.shell.var(name), true)];
                self.script.extend(vec![
                    Command::Comment(format!("Aggregate {}", instance.run_name)),
                    Command::ForEach {
                        var: name.into(),
                        items: dirs,
                        body,
                    },
                    Command::Wait,
                    Command::Blank,
                ]);
            }
        }
        self
    }

    pub fn script(&self) -> &Script {
        &self.script
    }

    pub fn render(&self) -> String {
        self.script.render(self.shell, self.header)
    }

    /// Write the script with `\n` line endings, executable on unix
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.render()).map_err(io_err(path))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(io_err(path))?;
        }
        info!("wrote {}", path.display());
        Ok(())
    }
}
