//! OPAL pipeline text handling.
//!
//! A pipeline is a list of statements separated by newlines or `|`. This
//! module only splits and joins text; statements are not validated here.

use std::fmt;
use std::str::FromStr;

/// An ordered list of pipeline statements.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Pipeline {
    statements: Vec<String>,
}

impl Pipeline {
    /// Split pipeline text into statements.
    ///
    /// Leading and trailing whitespace of the whole text is ignored. Every
    /// statement is trimmed, but empty statements are kept in place.
    pub fn new(text: &str) -> Self {
        let statements = text
            .trim()
            .split('\n')
            .flat_map(|line| line.split('|'))
            .map(|stmt| stmt.trim().to_string())
            .collect();
        Self { statements }
    }

    /// Build a pipeline from already split statements.
    pub fn from_statements<I, S>(statements: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            statements: statements.into_iter().map(Into::into).collect(),
        }
    }

    /// The statements in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    /// Single line form, statements joined with `" | "`.
    pub fn canonical(&self) -> String {
        self.statements.join(" | ")
    }
}

/// Display form, one statement per line.
impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.statements.join("\n"))
    }
}

impl FromStr for Pipeline {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
