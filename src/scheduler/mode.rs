//! Mode-string parsing for MSA and pair jobs.
//!
//! Mode strings are `-` separated token lists such as `env-taxonomy` or
//! `notemplates-nofilter-m8output`. Every token is checked by presence,
//! independent of its position; unknown tokens are ignored.

/// Token enabling the environmental database search.
const TOKEN_ENV: &str = "env";
/// Token disabling the template search.
const TOKEN_NO_TEMPLATES: &str = "notemplates";
/// Token disabling MSA filtering.
const TOKEN_NO_FILTER: &str = "nofilter";
/// Token enabling taxonomy annotation.
const TOKEN_TAXONOMY: &str = "taxonomy";
/// Token enabling the tabular summary.
const TOKEN_M8_OUTPUT: &str = "m8output";

/// Separator between mode tokens.
const MODE_SEPARATOR: char = '-';

/// A single boolean switch derived from a mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeFlag {
    Env,
    Templates,
    Filter,
    Taxonomy,
    Tabular,
}

/// Structured flag set derived from a mode string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsaModeFlags {
    pub use_env: bool,
    pub use_templates: bool,
    pub use_filter: bool,
    pub taxonomy: bool,
    pub tabular: bool,
}

impl Default for MsaModeFlags {
    fn default() -> Self {
        Self {
            use_env: false,
            use_templates: true,
            use_filter: true,
            taxonomy: false,
            tabular: false,
        }
    }
}

impl MsaModeFlags {
    /// Parses a mode string into a flag set.
    pub fn parse(mode: &str) -> Self {
        let mut flags = Self::default();
        for token in mode.split(MODE_SEPARATOR).map(str::trim) {
            match token {
                TOKEN_ENV => flags.use_env = true,
                TOKEN_NO_TEMPLATES => flags.use_templates = false,
                TOKEN_NO_FILTER => flags.use_filter = false,
                TOKEN_TAXONOMY => flags.taxonomy = true,
                TOKEN_M8_OUTPUT => flags.tabular = true,
                _ => {}
            }
        }
        flags
    }

    /// Returns whether the given flag is enabled.
    pub fn is_set(&self, flag: ModeFlag) -> bool {
        match flag {
            ModeFlag::Env => self.use_env,
            ModeFlag::Templates => self.use_templates,
            ModeFlag::Filter => self.use_filter,
            ModeFlag::Taxonomy => self.taxonomy,
            ModeFlag::Tabular => self.tabular,
        }
    }
}
