//! Shell scripts as a list of typed commands
//!
//! Commands are collected first and turned into text by a single call to
//! [`Script::render`], which knows how each command is written for bash and
//! for Windows batch files.
//!
//! ```rust,ignore
//! # use runprep::script::*;
//! let mut s = Script::new();
//! s.push(Command::Comment("Run 1 of 1".into()));
//! s.push(Command::invoke("/storage/tools/fragpipe/bin/fragpipe").arg("--headless"));
//! print!("{}", s.render(Shell::Bash, true));
//! ```
use super::*;
use std::iter::FromIterator;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Shell {
    Bash,
    Batch,
}

impl Shell {
    pub fn extension(self) -> &'static str {
        match self {
            Shell::Bash => "sh",
            Shell::Batch => "bat",
        }
    }

    /// Name for a loop variable. `for` in batch files only takes a single
    /// letter
    pub fn loop_var(self) -> &'static str {
        match self {
            Shell::Bash => "dir",
            Shell::Batch => "d",
        }
    }

    /// How a loop variable is referenced inside the loop body. The batch
    /// form strips the quotes of a quoted loop item
    pub fn var(self, name: &str) -> String {
        match self {
            Shell::Bash => format!("${}", name),
            Shell::Batch => format!("%%~{}", name),
        }
    }

    pub fn separator(self) -> char {
        match self {
            Shell::Bash => '/',
            Shell::Batch => '\\',
        }
    }

    /// Quote `word` if the shell would otherwise split or expand it
    pub fn quote(self, word: &str) -> String {
        match self {
            Shell::Bash => {
                let safe = !word.is_empty()
                    && word.bytes().all(|b| {
                        b.is_ascii_alphanumeric() || b"_-./=:,+@%~".contains(&b)
                    });
                if safe {
                    word.into()
                } else {
                    format!("'{}'", word.replace('\'', r"'\''"))
                }
            }
            Shell::Batch => {
                if word.is_empty() || word.contains(|c: char| c == ' ' || c == '&' || c == '(' || c == ')') {
                    format!("\"{}\"", word)
                } else {
                    word.into()
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// Quoted as needed
    Word(String),
    /// Written as is, for globs
    Raw(String),
    /// Always double quoted, so that variable references still expand
    Expanded(String),
}

impl Arg {
    fn render(&self, shell: Shell) -> String {
        match (self, shell) {
            (Arg::Word(w), _) => shell.quote(w),
            (Arg::Raw(r), _) => r.clone(),
            (Arg::Expanded(e), Shell::Bash) => format!(
                "\"{}\"",
                e.replace('\\', r"\\")
                    .replace('"', "\\\"")
                    .replace('`', "\\`")
            ),
            (Arg::Expanded(e), Shell::Batch) => format!("\"{}\"", e),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Comment(String),
    Blank,
    Invoke {
        program: String,
        args: Vec<Arg>,
        /// Output is copied to this file
        log: Option<Arg>,
        /// Bash only. Batch files have no way to wait for background jobs,
        /// so they run every step in order
        background: bool,
    },
    /// Bring `*.<extension>` files from one folder into another, unless the
    /// destination already has some
    CopyOutputs {
        from: String,
        to: String,
        extension: String,
        mode: LinkMode,
    },
    /// Run `body` only if `file` does not exist
    IfMissing { file: Arg, body: Vec<Command> },
    /// `var` must come from [`Shell::loop_var`] to be valid in both shells
    ForEach {
        var: String,
        items: Vec<String>,
        body: Vec<Command>,
    },
    /// Wait for all background jobs
    Wait,
}

impl Command {
    pub fn invoke<S: Into<String>>(program: S) -> Command {
        Command::Invoke {
            program: program.into(),
            args: Vec::new(),
            log: None,
            background: false,
        }
    }

    /// Append a quoted argument to an `Invoke`. Other commands are returned
    /// unchanged
    pub fn arg<S: Into<String>>(self, arg: S) -> Command {
        self.push_arg(Arg::Word(arg.into()))
    }

    pub fn raw_arg<S: Into<String>>(self, arg: S) -> Command {
        self.push_arg(Arg::Raw(arg.into()))
    }

    pub fn expanded_arg<S: Into<String>>(self, arg: S) -> Command {
        self.push_arg(Arg::Expanded(arg.into()))
    }

    fn push_arg(mut self, arg: Arg) -> Command {
        if let Command::Invoke { args, .. } = &mut self {
            args.push(arg);
        }
        self
    }

    pub fn log<S: Into<String>>(self, file: S) -> Command {
        self.log_to(Arg::Word(file.into()))
    }

    pub fn log_to(mut self, file: Arg) -> Command {
        if let Command::Invoke { log, .. } = &mut self {
            *log = Some(file);
        }
        self
    }

    pub fn background(mut self) -> Command {
        if let Command::Invoke { background, .. } = &mut self {
            *background = true;
        }
        self
    }

    fn render(&self, shell: Shell, indent: usize, out: &mut String) {
        let pad = "    ".repeat(indent);
        let line = |s: &str, out: &mut String| {
            out.push_str(&pad);
            out.push_str(s);
            out.push('\n');
        };

        match (self, shell) {
            (Command::Comment(c), Shell::Bash) => line(&format!("# {}", c), out),
            (Command::Comment(c), Shell::Batch) => line(&format!("REM {}", c), out),
            (Command::Blank, _) => out.push('\n'),
            (
                Command::Invoke {
                    program,
                    args,
                    log,
                    background,
                },
                _,
            ) => {
                let mut cmd = shell.quote(program);
                for a in args {
                    cmd.push(' ');
                    cmd.push_str(&a.render(shell));
                }
                let cmd = match (shell, log, background) {
                    (Shell::Bash, Some(log), false) => format!("{} |& tee {}", cmd, log.render(shell)),
                    (Shell::Bash, Some(log), true) => {
                        format!("{} > {} 2>&1 &", cmd, log.render(shell))
                    }
                    (Shell::Bash, None, true) => format!("{} &", cmd),
                    _ => cmd,
                };
                line(&cmd, out)
            }
            (
                Command::CopyOutputs {
                    from,
                    to,
                    extension,
                    mode,
                },
                Shell::Bash,
            ) => {
                let src = format!("{}/*.{}", shell.quote(from), extension);
                let dest = format!("{}/*.{}", to, extension);
                let verb = match mode {
                    LinkMode::Copy => "cp",
                    LinkMode::Symlink => "ln -s",
                };
                line(
                    &format!(
                        "if ! compgen -G {} > /dev/null; then {} {} {}; fi",
                        shell.quote(&dest),
                        verb,
                        src,
                        shell.quote(to)
                    ),
                    out,
                )
            }
            (Command::CopyOutputs { from, to, extension, .. }, Shell::Batch) => line(
                &format!(
                    "if not exist \"{}\\*.{}\" copy \"{}\\*.{}\" \"{}\"",
                    to, extension, from, extension, to
                ),
                out,
            ),
            (Command::IfMissing { file, body }, Shell::Bash) => {
                line(&format!("if [ ! -f {} ]; then", file.render(shell)), out);
                for c in body {
                    c.render(shell, indent + 1, out);
                }
                line("fi", out);
            }
            (Command::IfMissing { file, body }, Shell::Batch) => {
                line(&format!("if not exist {} (", file.render(shell)), out);
                for c in body {
                    c.render(shell, indent + 1, out);
                }
                line(")", out);
            }
            (Command::ForEach { var, items, body }, Shell::Bash) => {
                let items = items.iter().map(|i| shell.quote(i)).collect::<Vec<_>>();
                line(&format!("for {} in {}; do", var, items.join(" ")), out);
                for c in body {
                    c.render(shell, indent + 1, out);
                }
                line("done", out);
            }
            (Command::ForEach { var, items, body }, Shell::Batch) => {
                let items = items.iter().map(|i| shell.quote(i)).collect::<Vec<_>>();
                line(&format!("for %%{} in ({}) do (", var, items.join(" ")), out);
                for c in body {
                    c.render(shell, indent + 1, out);
                }
                line(")", out);
            }
            (Command::Wait, Shell::Bash) => line("wait", out),
            // nothing was started in the background
            (Command::Wait, Shell::Batch) => {}
        }
    }
}

/// Append-only list of commands
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Script {
    commands: Vec<Command>,
}

impl Script {
    pub fn new() -> Self {
        Script::default()
    }

    pub fn push(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    pub fn extend<I: IntoIterator<Item = Command>>(&mut self, commands: I) -> &mut Self {
        self.commands.extend(commands);
        self
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Bash scripts start with a shebang and strict mode when `header` is
    /// set. Batch files have no header
    pub fn render(&self, shell: Shell, header: bool) -> String {
        let mut out = String::new();
        if header && shell == Shell::Bash {
            out.push_str("#!/bin/bash\nset -xe\n\n");
        }
        for c in &self.commands {
            c.render(shell, 0, &mut out);
        }
        out
    }
}

impl FromIterator<Command> for Script {
    fn from_iter<I: IntoIterator<Item = Command>>(iter: I) -> Self {
        Script {
            commands: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn render(c: Command, shell: Shell) -> String {
        Script::from_iter(vec![c]).render(shell, false)
    }

    #[test]
    fn quoting() {
        assert_eq!(Shell::Bash.quote("/storage/a-b/c_1.raw"), "/storage/a-b/c_1.raw");
        assert_eq!(Shell::Bash.quote("a b"), "'a b'");
        assert_eq!(Shell::Bash.quote("it's"), r"'it'\''s'");
        assert_eq!(Shell::Bash.quote(""), "''");
        assert_eq!(Shell::Batch.quote(r"Z:\a b"), "\"Z:\\a b\"");
        assert_eq!(Shell::Batch.quote(r"Z:\ab"), r"Z:\ab");
    }

    #[test]
    fn header() {
        let s = Script::from_iter(vec![Command::Comment("x".into())]);
        assert_eq!(s.render(Shell::Bash, true), "#!/bin/bash\nset -xe\n\n# x\n");
        assert_eq!(s.render(Shell::Bash, false), "# x\n");
        assert_eq!(s.render(Shell::Batch, true), "REM x\n");
    }

    #[test]
    fn invoke() {
        let c = Command::invoke("/bin/fragpipe")
            .arg("--headless")
            .arg("--ram")
            .arg("32")
            .log("/out/log.txt");
        assert_eq!(
            render(c.clone(), Shell::Bash),
            "/bin/fragpipe --headless --ram 32 |& tee /out/log.txt\n"
        );
        assert_eq!(render(c.clone(), Shell::Batch), "/bin/fragpipe --headless --ram 32\n");
        assert_eq!(
            render(c.clone().background(), Shell::Bash),
            "/bin/fragpipe --headless --ram 32 > /out/log.txt 2>&1 &\n"
        );
        assert_eq!(
            render(Command::invoke("p").raw_arg("$dir/*.tsv"), Shell::Bash),
            "p $dir/*.tsv\n"
        );
        assert_eq!(
            render(Command::invoke("p").expanded_arg("$dir/a \"b\""), Shell::Bash),
            "p \"$dir/a \\\"b\\\"\"\n"
        );
        // batch files run background steps in order
        assert_eq!(render(c.background(), Shell::Batch), "/bin/fragpipe --headless --ram 32\n");
        // arguments only attach to invocations
        assert_eq!(Command::Wait.arg("x"), Command::Wait);
    }

    #[test]
    fn guarded_copy() {
        let c = Command::CopyOutputs {
            from: "/out/search".into(),
            to: "/out/quant".into(),
            extension: "pepXML".into(),
            mode: LinkMode::Copy,
        };
        assert_eq!(
            render(c.clone(), Shell::Bash),
            "if ! compgen -G '/out/quant/*.pepXML' > /dev/null; then cp /out/search/*.pepXML /out/quant; fi\n"
        );
        assert_eq!(
            render(c, Shell::Batch),
            "if not exist \"/out/quant\\*.pepXML\" copy \"/out/search\\*.pepXML\" \"/out/quant\"\n"
        );
        let c = Command::CopyOutputs {
            from: "/a".into(),
            to: "/b".into(),
            extension: "pin".into(),
            mode: LinkMode::Symlink,
        };
        assert!(render(c, Shell::Bash).contains("then ln -s /a/*.pin /b; fi"));
    }

    #[test]
    fn blocks() {
        let each = |shell: Shell| {
            let var = shell.var(shell.loop_var());
            Command::ForEach {
                var: shell.loop_var().into(),
                items: vec!["/a".into(), "/b c".into()],
                body: vec![Command::IfMissing {
                    file: Arg::Expanded(format!("{}{}protein.tsv", var, shell.separator())),
                    body: vec![Command::invoke("report").expanded_arg(var).background()],
                }],
            }
        };
        assert_eq!(
            render(each(Shell::Bash), Shell::Bash),
            "\
for dir in /a '/b c'; do
    if [ ! -f \"$dir/protein.tsv\" ]; then
        report \"$dir\" &
    fi
done
"
        );
        assert_eq!(
            render(each(Shell::Batch), Shell::Batch),
            "\
for %%d in (/a \"/b c\") do (
    if not exist \"%%~d\\protein.tsv\" (
        report \"%%~d\"
    )
)
"
        );
        let mut s = Script::new();
        s.push(Command::Comment("x".into())).push(Command::Wait).push(Command::Blank);
        assert_eq!(s.render(Shell::Bash, false), "# x\nwait\n\n");
        assert_eq!(s.render(Shell::Batch, false), "REM x\n\n");
        assert_eq!(s.commands().len(), 3);
    }
}
