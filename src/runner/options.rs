//! Structured command-line options and their argv rendering.

use super::RunError;

/// How option names are rendered on the command line.
///
/// `GnuOpt` renders long names as `--name[=value]` and single-character
/// names as `-n [value]`; `OneDash` renders every name as `-name [value]`
/// (the style of classic tools like `diff`'s `-U`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptStyle {
    #[default]
    GnuOpt,
    OneDash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum OptVal {
    Flag,
    Value(String),
}

/// An insertion-ordered list of options. Order matters: it is the order the
/// options appear in the rendered argv, and repeated names are allowed
/// (e.g. repeated `-p <parent>` for `git commit-tree`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    entries: Vec<(String, OptVal)>,
}

impl Options {
    pub fn new() -> Self {
        Options::default()
    }

    /// A boolean flag, e.g. `porcelain` → `--porcelain`.
    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.entries.push((name.into(), OptVal::Flag));
        self
    }

    /// A valued option, e.g. `("pretty", "%ci")` → `--pretty=%ci`.
    pub fn value(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((name.into(), OptVal::Value(value.into())));
        self
    }

    /// One short flag per character, e.g. `"rz"` → `-r -z`.
    pub fn short_flags(mut self, chars: &str) -> Self {
        for c in chars.chars() {
            self.entries.push((c.to_string(), OptVal::Flag));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn render(&self, style: OptStyle) -> Result<Vec<String>, RunError> {
        let mut argv = Vec::new();
        for (name, val) in &self.entries {
            let long = name.chars().count() > 1;
            match val {
                OptVal::Flag => {
                    if name.contains('=') {
                        return Err(RunError::BadOptionsKey { name: name.clone() });
                    }
                    match style {
                        OptStyle::GnuOpt if long => argv.push(format!("--{name}")),
                        _ => argv.push(format!("-{name}")),
                    }
                }
                OptVal::Value(value) => match style {
                    OptStyle::GnuOpt if long => argv.push(format!("--{name}={value}")),
                    _ => {
                        argv.push(format!("-{name}"));
                        argv.push(value.clone());
                    }
                },
            }
        }
        Ok(argv)
    }
}
