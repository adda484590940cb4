//! Key-value parameter files, and the edits that derive activation and
//! enzyme specific copies from a base file
//!
//! Every line that is not edited is written back out verbatim, including
//! comments and blank lines.
use super::*;
use std::fmt;
use std::fs;
use std::str::FromStr;

/// Key prefix used by search engine settings inside workflow files
pub const WORKFLOW_PREFIX: &str = "msfragger.";

/// Fragmentation method a parameter variant is built for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Activation {
    Hcd,
    Cid,
    Etd,
    Aietd,
    Ethcd,
}

impl Activation {
    pub fn as_str(self) -> &'static str {
        match self {
            Activation::Hcd => "HCD",
            Activation::Cid => "CID",
            Activation::Etd => "ETD",
            Activation::Aietd => "AIETD",
            Activation::Ethcd => "EThcD",
        }
    }

    /// HCD and CID only produce b/y ions
    pub fn is_collisional(self) -> bool {
        matches!(self, Activation::Hcd | Activation::Cid)
    }
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        [
            Activation::Hcd,
            Activation::Cid,
            Activation::Etd,
            Activation::Aietd,
            Activation::Ethcd,
        ]
        .iter()
        .copied()
        .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| Error::UnknownActivation(s.into()))
    }
}

/// Digestion enzyme a parameter variant is built for
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Enzyme {
    Trypsin,
    Chymotrypsin,
    TrypsinChymotrypsin,
}

impl Enzyme {
    /// Short tag used in file and folder names
    pub fn tag(self) -> &'static str {
        match self {
            Enzyme::Trypsin => "TRYP",
            Enzyme::Chymotrypsin => "CHYTR",
            Enzyme::TrypsinChymotrypsin => "TRYP+CHYTR",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Enzyme::Trypsin => "Trypsin",
            Enzyme::Chymotrypsin => "Chymotrypsin",
            Enzyme::TrypsinChymotrypsin => "Trypsin/Chymotrypsin",
        }
    }

    pub fn cut_after(self) -> &'static str {
        match self {
            Enzyme::Trypsin => "KR",
            Enzyme::Chymotrypsin => "FLWY",
            Enzyme::TrypsinChymotrypsin => "KRFLWY",
        }
    }

    pub fn but_not_before(self) -> &'static str {
        "P"
    }
}

impl fmt::Display for Enzyme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Enzyme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRYP" => Ok(Enzyme::Trypsin),
            "CHYTR" => Ok(Enzyme::Chymotrypsin),
            "TRYP+CHYTR" => Ok(Enzyme::TrypsinChymotrypsin),
            _ => Err(Error::UnknownEnzyme(s.into())),
        }
    }
}

/// Replace the value of `key`
#[derive(Clone, Debug, PartialEq)]
pub struct Edit {
    pub key: String,
    pub value: String,
}

impl Edit {
    pub fn new<K: Into<String>, V: ToString>(key: K, value: V) -> Self {
        Edit {
            key: key.into(),
            value: value.to_string(),
        }
    }
}

/// A line oriented `key = value` file
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ParamFile {
    lines: Vec<String>,
    prefix: String,
}

impl ParamFile {
    pub fn parse(text: &str) -> Self {
        ParamFile {
            lines: text.lines().map(String::from).collect(),
            prefix: String::new(),
        }
    }

    /// Read a parameter file. Workflow files (`.workflow`) get the
    /// [`WORKFLOW_PREFIX`] so that the same keys address both formats
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(io_err(path))?;
        let file = ParamFile::parse(&text);
        match path.extension() {
            Some(ext) if ext == "workflow" => Ok(file.with_prefix(WORKFLOW_PREFIX)),
            _ => Ok(file),
        }
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|s| s.as_str())
    }

    /// Full key and value of a line, if it is a setting
    fn split(line: &str) -> Option<(&str, &str)> {
        if line.trim_start().starts_with('#') {
            return None;
        }
        let eq = line.find('=')?;
        Some((line[..eq].trim(), line[eq + 1..].trim()))
    }

    /// Key of a line with the prefix removed
    fn bare_key<'l>(&self, line: &'l str) -> Option<&'l str> {
        let (key, _) = Self::split(line)?;
        Some(key.strip_prefix(self.prefix.as_str()).unwrap_or(key))
    }

    /// Iterate over `(key, value)` pairs, keys without prefix
    pub fn settings(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.lines.iter().filter_map(move |line| {
            let key = self.bare_key(line)?;
            let (_, value) = Self::split(line)?;
            Some((key, value))
        })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.settings().find(|(k, _)| *k == key).map(|(_, v)| v)
    }

    /// Replace the value of every line with `key`, keeping the spacing
    /// style of the original line. Returns the number of lines changed
    pub fn set(&mut self, key: &str, value: &str) -> usize {
        let prefix = self.prefix.clone();
        self.set_where(
            |full| full.strip_prefix(prefix.as_str()).unwrap_or(full) == key,
            value,
        )
    }

    /// Like [`ParamFile::set`], but for every line whose full key (prefix
    /// included) satisfies `pred`
    pub fn set_where<F: Fn(&str) -> bool>(&mut self, pred: F, value: &str) -> usize {
        let mut changed = 0;
        for line in self.lines.iter_mut() {
            match Self::split(line) {
                Some((key, _)) if pred(key) => {}
                _ => continue,
            }
            let eq = line.find('=').unwrap_or(line.len());
            let updated = if line[eq..].starts_with("= ") {
                format!("{}= {}", &line[..eq], value)
            } else {
                format!("{}={}", &line[..eq], value)
            };
            *line = updated;
            changed += 1;
        }
        changed
    }

    /// Pass every line with `key` through `f`
    pub fn map_lines<F: FnMut(&str) -> String>(&mut self, key: &str, mut f: F) -> usize {
        let mut changed = 0;
        for idx in 0..self.lines.len() {
            if self.bare_key(&self.lines[idx]) != Some(key) {
                continue;
            }
            let updated = f(&self.lines[idx]);
            if updated != self.lines[idx] {
                self.lines[idx] = updated;
                changed += 1;
            }
        }
        changed
    }

    pub fn apply(&mut self, edits: &[Edit]) -> usize {
        edits.iter().map(|e| self.set(&e.key, &e.value)).sum()
    }

    pub fn text(&self) -> String {
        let mut s = self.lines.join("\n");
        s.push('\n');
        s
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path.as_ref(), self.text()).map_err(io_err(path))
    }
}

/// One row of a rewrite table: the keys it applies to, and how the new value
/// is derived from the current one. `None` leaves the line untouched
struct Rule<T> {
    keys: &'static [&'static str],
    rewrite: fn(&str, T) -> Option<String>,
}

fn precursor_peak(_: &str, a: Activation) -> Option<String> {
    Some(if a.is_collisional() { "1" } else { "2" }.into())
}

fn ion_series(current: &str, a: Activation) -> Option<String> {
    let glyco = current.contains('Y');
    let series = match a {
        Activation::Hcd | Activation::Cid => {
            if !glyco {
                "b,y"
            } else if current.contains("b~") || current.contains("y~") {
                "b,y,Y,b~,y~"
            } else {
                "b,y,Y"
            }
        }
        Activation::Etd => "c,z",
        Activation::Aietd | Activation::Ethcd => {
            if glyco {
                "b,y,c,z,Y"
            } else {
                "b,y,c,z"
            }
        }
    };
    Some(series.into())
}

fn oxonium_filter(_: &str, a: Activation) -> Option<String> {
    match a {
        Activation::Hcd | Activation::Cid | Activation::Ethcd => Some("0.1".into()),
        Activation::Etd | Activation::Aietd => Some("0".into()),
    }
}

fn labile_by_ions(_: &str, a: Activation) -> Option<String> {
    // b/y ions are not searched in ETD mode
    match a {
        Activation::Etd => Some("0".into()),
        _ => None,
    }
}

const ACTIVATION_RULES: &[Rule<Activation>] = &[
    Rule {
        keys: &["remove_precursor_peak"],
        rewrite: precursor_peak,
    },
    Rule {
        keys: &["fragment_ion_series"],
        rewrite: ion_series,
    },
    Rule {
        keys: &["oxonium_intensity_filter"],
        rewrite: oxonium_filter,
    },
    Rule {
        keys: &["labile_mod_no_shifted_by_ions"],
        rewrite: labile_by_ions,
    },
];

fn enzyme_name(_: &str, e: Enzyme) -> Option<String> {
    Some(e.name().into())
}

fn enzyme_cut(_: &str, e: Enzyme) -> Option<String> {
    Some(e.cut_after().into())
}

fn enzyme_nocut(_: &str, e: Enzyme) -> Option<String> {
    Some(e.but_not_before().into())
}

fn reroot_database(current: &str, _: Enzyme) -> Option<String> {
    // variants live one folder below the base file
    let absolute = current.starts_with('/')
        || current.starts_with('\\')
        || current.contains(':')
        || current.is_empty();
    if absolute {
        None
    } else {
        Some(format!("../{}", current))
    }
}

const ENZYME_RULES: &[Rule<Enzyme>] = &[
    Rule {
        keys: &["search_enzyme_name", "search_enzyme_name_1"],
        rewrite: enzyme_name,
    },
    Rule {
        keys: &["search_enzyme_cutafter", "search_enzyme_cut_1"],
        rewrite: enzyme_cut,
    },
    Rule {
        keys: &["search_enzyme_butnotafter", "search_enzyme_nocut_1"],
        rewrite: enzyme_nocut,
    },
    Rule {
        keys: &["database_name"],
        rewrite: reroot_database,
    },
];

fn edits<T: Copy>(file: &ParamFile, rules: &[Rule<T>], arg: T) -> Vec<Edit> {
    file.settings()
        .filter_map(|(key, value)| {
            let rule = rules.iter().find(|r| r.keys.contains(&key))?;
            (rule.rewrite)(value, arg).map(|v| Edit::new(key, v))
        })
        .collect()
}

pub fn activation_edits(file: &ParamFile, activation: Activation) -> Vec<Edit> {
    edits(file, ACTIVATION_RULES, activation)
}

pub fn enzyme_edits(file: &ParamFile, enzyme: Enzyme) -> Vec<Edit> {
    edits(file, ENZYME_RULES, enzyme)
}

/// Apply the activation and enzyme edits to `file`
pub fn derive(file: &mut ParamFile, activation: Option<Activation>, enzyme: Option<Enzyme>) {
    if let Some(a) = activation {
        let e = activation_edits(file, a);
        file.apply(&e);
    }
    if let Some(z) = enzyme {
        let e = enzyme_edits(file, z);
        file.apply(&e);
    }
}

/// File name of the variant: `<stem>_<ACT>.<ext>`, or the base name if no
/// activation is given
pub fn variant_name<P: AsRef<Path>>(base: P, activation: Option<Activation>) -> String {
    let base = base.as_ref();
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = base
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    match activation {
        Some(a) => format!("{}_{}{}", stem, a, ext),
        None => format!("{}{}", stem, ext),
    }
}

/// Fail if writing `dest` would replace `base`
pub fn ensure_distinct<P: AsRef<Path>, Q: AsRef<Path>>(base: P, dest: Q) -> Result<()> {
    let base = base.as_ref();
    let dest = dest.as_ref();
    let same = match (fs::canonicalize(base), fs::canonicalize(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => base == dest,
    };
    if same {
        Err(Error::WouldOverwrite(base.to_path_buf()))
    } else {
        Ok(())
    }
}

/// Write an activation/enzyme specific copy of `base` into `out_dir`.
/// The base file is never modified
pub fn variant<P: AsRef<Path>, Q: AsRef<Path>>(
    base: P,
    out_dir: Q,
    activation: Option<Activation>,
    enzyme: Option<Enzyme>,
) -> Result<PathBuf> {
    let base = base.as_ref();
    let dest = out_dir.as_ref().join(variant_name(base, activation));
    ensure_distinct(base, &dest)?;

    let mut file = ParamFile::open(base)?;
    derive(&mut file, activation, enzyme);
    fs::create_dir_all(out_dir.as_ref()).map_err(io_err(out_dir.as_ref()))?;
    file.write(&dest)?;
    Ok(dest)
}

/// Database path as listed in the file, relative to the base directory
pub fn database_name(file: &ParamFile) -> Option<&str> {
    file.get("database_name")
}
