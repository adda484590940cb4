//! Rewrite paths between the Windows share a file lives on and the Linux
//! mount the compute nodes see it under
//!
//! Recognized forms, in priority order:
//!
//! ```text
//! //corexfs.med.umich.edu/proteomics/dpolasky/a.raw   UNC, forward slashes
//! \\corexfs.med.umich.edu\proteomics\dpolasky\a.raw   UNC
//! Z\:\\dpolasky\\a.raw                                 mapped drive, escaped (workflow files)
//! Z:\dpolasky\a.raw                                    mapped drive
//! ```
//!
//! all of which become `/storage/dpolasky/a.raw`. Patterns are found
//! anywhere in the input as long as they start a token, so whole lines of a
//! key-value file can be passed in (`database.db-path=Z\:\\...`). Tabs and
//! newlines end a path; everything after a match up to the next one has its
//! backslashes turned into forward slashes.
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathRules {
    /// Server share, written with forward slashes
    pub unc: String,
    /// Drive letters the share is mapped to. The first one is used when
    /// writing Windows paths
    pub drives: Vec<char>,
    /// Mount point of the share on Linux
    pub mount: String,
}

impl Default for PathRules {
    fn default() -> Self {
        PathRules {
            unc: "//corexfs.med.umich.edu/proteomics".into(),
            drives: vec!['Z'],
            mount: "/storage".into(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RuleKind {
    UncForward,
    UncBackward,
    EscapedDrive,
    Drive,
}

/// One prefix substitution rule: the pattern is replaced by the mount point
#[derive(Clone, Debug, PartialEq)]
pub struct Rule {
    pub kind: RuleKind,
    pub pattern: String,
}

/// How a Linux path should be written back out
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Convention {
    /// `\\server\share\dir`
    Unc,
    /// `Z:\dir`
    Drive,
    /// `Z\:\\dir`, as stored in java properties files
    EscapedDrive,
}

#[inline]
fn starts_token(s: &[u8], at: usize) -> bool {
    at == 0
        || matches!(
            s[at - 1],
            b'=' | b' ' | b'\t' | b'"' | b'\'' | b',' | b';' | b'(' | b'\n'
        )
}

#[inline]
fn ends_component(s: &[u8], end: usize) -> bool {
    end == s.len() || matches!(s[end], b'/' | b'\\' | b' ' | b'"' | b'\'' | b'\r')
}

fn collapse_slashes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev = false;
    for c in s.chars() {
        if c == '/' {
            if prev {
                continue;
            }
            prev = true;
        } else {
            prev = false;
        }
        out.push(c);
    }
    out
}

/// Apply `f` to every tab or newline delimited field of `input`,
/// leaving the delimiters in place
fn map_fields<F: FnMut(&str) -> String>(input: &str, mut f: F) -> String {
    let mut out = String::with_capacity(input.len() + 16);
    for piece in input.split_inclusive(|c: char| c == '\t' || c == '\n') {
        let body = piece.trim_end_matches(|c: char| c == '\t' || c == '\n');
        out.push_str(&f(body));
        out.push_str(&piece[body.len()..]);
    }
    out
}

impl Rule {
    fn is_unc(&self) -> bool {
        matches!(self.kind, RuleKind::UncForward | RuleKind::UncBackward)
    }

    /// Byte offset of the first occurrence of this rule's pattern that
    /// starts a token, ignoring ASCII case
    pub fn find(&self, field: &str) -> Option<usize> {
        let hay = field.to_ascii_lowercase();
        let needle = self.pattern.to_ascii_lowercase();
        let bytes = hay.as_bytes();
        let mut from = 0;
        while let Some(i) = hay[from..].find(&needle) {
            let at = from + i;
            if starts_token(bytes, at) && (!self.is_unc() || ends_component(bytes, at + needle.len()))
            {
                return Some(at);
            }
            // patterns start with an ASCII byte, so this stays on a char boundary
            from = at + 1;
        }
        None
    }

    fn rewrite(&self, field: &str, at: usize, mount: &str) -> String {
        let rest = field[at + self.pattern.len()..].replace('\\', "/");
        let rest = match self.kind {
            RuleKind::EscapedDrive => collapse_slashes(&rest),
            _ => rest,
        };
        format!("{}{}{}", &field[..at], mount, rest)
    }
}

impl PathRules {
    /// The ordered rule table. The first rule matching a field is applied
    pub fn rules(&self) -> Vec<Rule> {
        let unc = self.unc.trim_end_matches('/').to_string();
        let mut rules = vec![
            Rule {
                kind: RuleKind::UncForward,
                pattern: unc.clone(),
            },
            Rule {
                kind: RuleKind::UncBackward,
                pattern: unc.replace('/', "\\"),
            },
        ];
        rules.extend(self.drives.iter().map(|d| Rule {
            kind: RuleKind::EscapedDrive,
            pattern: format!("{}\\:", d),
        }));
        rules.extend(self.drives.iter().map(|d| Rule {
            kind: RuleKind::Drive,
            pattern: format!("{}:", d),
        }));
        rules.retain(|r| !r.pattern.is_empty());
        rules
    }

    /// Rewrite every Windows path in `input` to its Linux equivalent.
    /// Applying this twice gives the same result as applying it once
    pub fn to_linux(&self, input: &str) -> String {
        let rules = self.rules();
        let mount = self.mount.trim_end_matches('/');
        map_fields(input, |field| {
            let mut field = field.to_string();
            // every pass consumes one pattern occurrence
            for _ in 0..=field.len() {
                let hit = rules
                    .iter()
                    .find_map(|rule| rule.find(&field).map(|at| (rule, at)));
                match hit {
                    Some((rule, at)) => field = rule.rewrite(&field, at, mount),
                    None => break,
                }
            }
            field
        })
    }

    /// Rewrite every path under the Linux mount in `input` to the Windows
    /// `convention`
    pub fn to_windows(&self, input: &str, convention: Convention) -> String {
        let mount = self.mount.trim_end_matches('/');
        if mount.is_empty() {
            return input.to_string();
        }
        let (prefix, separator) = match (convention, self.drives.first()) {
            (Convention::Drive, Some(d)) => (format!("{}:", d), "\\"),
            (Convention::EscapedDrive, Some(d)) => (format!("{}\\:", d), "\\\\"),
            _ => (self.unc.trim_end_matches('/').replace('/', "\\"), "\\"),
        };
        map_fields(input, |field| {
            let bytes = field.as_bytes();
            let mut hits = Vec::new();
            let mut from = 0;
            while let Some(i) = field[from..].find(mount) {
                let at = from + i;
                if starts_token(bytes, at) && ends_component(bytes, at + mount.len()) {
                    hits.push(at);
                }
                from = at + mount.len();
            }
            // right to left, so that earlier offsets stay valid
            let mut field = field.to_string();
            for at in hits.into_iter().rev() {
                let rest = field[at + mount.len()..].replace('/', separator);
                field = format!("{}{}{}", &field[..at], prefix, rest);
            }
            field
        })
    }
}
