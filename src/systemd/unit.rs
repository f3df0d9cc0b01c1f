//! Minimal systemd unit file model.
//!
//! Only what the resume unit needs: ordered sections holding key/value
//! directives and comment lines, rendered in the order they were added.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    Directive(String, String),
    Comment(String),
}

/// One `[Name]` block of a unit file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    name: String,
    lines: Vec<Line>,
}

impl Section {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lines: Vec::new(),
        }
    }

    /// Add `key=value`.
    pub fn directive(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.lines.push(Line::Directive(key.into(), value.into()));
        self
    }

    /// Add a `# comment` line.
    pub fn comment(mut self, text: impl Into<String>) -> Self {
        self.lines.push(Line::Comment(text.into()));
        self
    }
}

/// A unit definition built section by section.
///
/// ```rust
/// use distro_upgrader::systemd::unit::{Section, UnitFile};
///
/// let unit = UnitFile::new().with(
///     Section::new("Service")
///         .directive("Type", "oneshot")
///         .directive("ExecStart", "/bin/true"),
/// );
/// assert_eq!(unit.to_string(), "[Service]\nType=oneshot\nExecStart=/bin/true\n");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitFile {
    sections: Vec<Section>,
}

impl UnitFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, section: Section) -> Self {
        self.sections.push(section);
        self
    }

    /// Value of the first `key` directive in `section`.
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| s.lines.iter())
            .find_map(|line| match line {
                Line::Directive(k, v) if k == key => Some(v.as_str()),
                _ => None,
            })
    }
}

impl fmt::Display for UnitFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, section) in self.sections.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            writeln!(f, "[{}]", section.name)?;
            for line in &section.lines {
                match line {
                    Line::Directive(key, value) => writeln!(f, "{}={}", key, value)?,
                    Line::Comment(text) => writeln!(f, "# {}", text)?,
                }
            }
        }
        Ok(())
    }
}
