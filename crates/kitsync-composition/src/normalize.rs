//! Path-variable normalization for hook commands
//!
//! Commands written for a project install reference the project placeholder,
//! commands written for a global install reference the home placeholder, and
//! older kits wrote bare relative references to the hooks directory. All of
//! them are rewritten to the placeholder of the active [`InstallMode`] before
//! commands are compared, so one hook never shows up twice under two
//! spellings.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

/// Where the kit is being installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Home-directory-relative install
    Global,
    /// Project-directory-relative install
    #[default]
    Local,
}

/// Placeholder spellings used in hook commands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathVariables {
    pub home: String,
    pub project: String,
    pub hooks_dir: String,
}

impl Default for PathVariables {
    fn default() -> Self {
        Self {
            home: "$HOME".to_string(),
            project: "$CLAUDE_PROJECT_DIR".to_string(),
            hooks_dir: ".claude/hooks".to_string(),
        }
    }
}

impl PathVariables {
    /// Placeholder for the given mode
    #[must_use]
    pub fn placeholder(&self, mode: InstallMode) -> &str {
        match mode {
            InstallMode::Global => &self.home,
            InstallMode::Local => &self.project,
        }
    }

    /// First segment of the hooks directory, e.g. `.claude`
    #[must_use]
    pub fn kit_root(&self) -> &str {
        self.hooks_dir
            .trim_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

/// Compiled rewriter for one install mode
#[derive(Debug, Clone)]
pub struct PathNormalizer {
    target: String,
    foreign: Regex,
    bare: Regex,
}

impl PathNormalizer {
    /// Compile the rewrite patterns
    ///
    /// # Errors
    /// Returns error if a placeholder cannot be turned into a pattern
    pub fn new(mode: InstallMode, vars: &PathVariables) -> Result<Self, regex::Error> {
        let other = match mode {
            InstallMode::Global => &vars.project,
            InstallMode::Local => &vars.home,
        };
        let root = regex::escape(vars.kit_root());
        let foreign = Regex::new(&format!(
            r#"{}(?P<q>"?)/(?P<rest>{root}/)"#,
            placeholder_pattern(other)
        ))?;
        let bare = Regex::new(&format!(
            r#"(?P<lead>^|[\s'"=])(?:\./)?(?P<dir>{}/)"#,
            regex::escape(vars.hooks_dir.trim_matches('/'))
        ))?;
        Ok(Self {
            target: vars.placeholder(mode).to_string(),
            foreign,
            bare,
        })
    }

    /// Rewrite one command string
    #[must_use]
    pub fn normalize(&self, command: &str) -> String {
        let swapped = self.foreign.replace_all(command, |caps: &Captures<'_>| {
            format!("{}{}/{}", self.target, &caps["q"], &caps["rest"])
        });
        self.bare
            .replace_all(&swapped, |caps: &Captures<'_>| {
                let lead = &caps["lead"];
                let dir = &caps["dir"];
                if lead == "\"" || lead == "'" {
                    format!("{lead}{}/{dir}", self.target)
                } else {
                    format!("{lead}\"{}\"/{dir}", self.target)
                }
            })
            .into_owned()
    }
}

/// Matches `$NAME` and `${NAME}`
fn placeholder_pattern(var: &str) -> String {
    let name = var
        .trim_start_matches('$')
        .trim_start_matches('{')
        .trim_end_matches('}');
    let name = regex::escape(name);
    format!(r"\$(?:\{{{name}\}}|{name}\b)")
}
