//! Configuration paths and the file hierarchy that backs them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A slash-separated configuration path such as `machine/app/admin`.
///
/// The first segment is always the machine root. Paths compare by segment,
/// so `machine/app` is an ancestor of `machine/app/admin` but not of
/// `machine/application`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigPath(Arc<str>);

impl ConfigPath {
    pub const MACHINE: &'static str = "machine";

    /// Build a path, dropping empty segments and `.`.
    pub fn new(path: &str) -> Self {
        let joined = path
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .collect::<Vec<_>>()
            .join("/");
        ConfigPath(Arc::from(joined.as_str()))
    }

    pub fn machine() -> Self {
        ConfigPath(Arc::from(Self::MACHINE))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Number of segments; the machine root has depth 1.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    pub fn parent(&self) -> Option<ConfigPath> {
        self.0
            .rsplit_once('/')
            .map(|(parent, _)| ConfigPath(Arc::from(parent)))
    }

    /// Append a relative sub-path. `""` and `"."` return `self`.
    pub fn join(&self, relative: &str) -> ConfigPath {
        let relative = relative.trim_matches('/');
        if relative.is_empty() || relative == "." {
            return self.clone();
        }
        ConfigPath::new(&format!("{}/{}", self.0, relative))
    }

    pub fn is_ancestor_or_self(&self, other: &ConfigPath) -> bool {
        let mine: Vec<_> = self.segments().collect();
        let theirs: Vec<_> = other.segments().collect();
        mine.len() <= theirs.len() && mine.iter().zip(&theirs).all(|(a, b)| a == b)
    }
}

impl fmt::Display for ConfigPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which kind of file a level holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LevelKind {
    Machine,
    Application,
    RoamingUser,
    LocalUser,
}

impl LevelKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelKind::Machine => "machine",
            LevelKind::Application => "app",
            LevelKind::RoamingUser => "roaming",
            LevelKind::LocalUser => "local",
        }
    }
}

impl fmt::Display for LevelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file in the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigLevel {
    pub kind: LevelKind,
    pub path: ConfigPath,
    pub file: PathBuf,
}

impl ConfigLevel {
    /// Display name used for provenance and error messages.
    pub fn file_name(&self) -> Arc<str> {
        Arc::from(self.file.to_string_lossy().as_ref())
    }
}

/// The ordered set of files that make up a configuration hierarchy.
///
/// Levels nest: machine at `machine`, the application at `machine/app`,
/// the roaming user file at `machine/app/roaming` and the local user file at
/// `machine/app/roaming/local`. A level may be skipped; the remaining levels
/// keep their paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigHost {
    levels: Vec<ConfigLevel>,
}

impl ConfigHost {
    /// A host with only a machine-level file.
    pub fn new(machine_file: impl Into<PathBuf>) -> Self {
        Self {
            levels: vec![ConfigLevel {
                kind: LevelKind::Machine,
                path: ConfigPath::machine(),
                file: machine_file.into(),
            }],
        }
    }

    pub fn with_application(self, file: impl Into<PathBuf>) -> Self {
        self.with_level(LevelKind::Application, file.into())
    }

    pub fn with_roaming_user(self, file: impl Into<PathBuf>) -> Self {
        self.with_level(LevelKind::RoamingUser, file.into())
    }

    pub fn with_local_user(self, file: impl Into<PathBuf>) -> Self {
        self.with_level(LevelKind::LocalUser, file.into())
    }

    fn with_level(mut self, kind: LevelKind, file: PathBuf) -> Self {
        self.levels.retain(|l| l.kind != kind);
        self.levels.push(ConfigLevel {
            kind,
            path: Self::path_for(kind),
            file,
        });
        self.levels.sort_by_key(|l| l.kind);
        self
    }

    /// The config path a level kind lives at.
    pub fn path_for(kind: LevelKind) -> ConfigPath {
        match kind {
            LevelKind::Machine => ConfigPath::new("machine"),
            LevelKind::Application => ConfigPath::new("machine/app"),
            LevelKind::RoamingUser => ConfigPath::new("machine/app/roaming"),
            LevelKind::LocalUser => ConfigPath::new("machine/app/roaming/local"),
        }
    }

    /// All levels, root first.
    pub fn levels(&self) -> &[ConfigLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&ConfigLevel> {
        self.levels.get(index)
    }

    pub fn level_index(&self, kind: LevelKind) -> Option<usize> {
        self.levels.iter().position(|l| l.kind == kind)
    }

    /// Index of the level whose file is `file`.
    pub fn level_for_file(&self, file: &Path) -> Option<usize> {
        self.levels.iter().position(|l| l.file == file)
    }

    /// Indexes of the levels whose files apply to `path`, root first.
    pub fn chain(&self, path: &ConfigPath) -> Vec<usize> {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, l)| l.path.is_ancestor_or_self(path))
            .map(|(i, _)| i)
            .collect()
    }

    /// Depth of the deepest application level at or above `path`.
    pub fn application_depth(&self, path: &ConfigPath) -> Option<usize> {
        self.levels
            .iter()
            .filter(|l| l.kind == LevelKind::Application && l.path.is_ancestor_or_self(path))
            .map(|l| l.path.depth())
            .max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_normalization() {
        assert_eq!(ConfigPath::new("/machine//app/./").as_str(), "machine/app");
        assert_eq!(ConfigPath::machine().join(".").as_str(), "machine");
        assert_eq!(ConfigPath::machine().join("app/admin").depth(), 3);
    }

    #[test]
    fn test_ancestry_is_by_segment() {
        let app = ConfigPath::new("machine/app");
        assert!(app.is_ancestor_or_self(&ConfigPath::new("machine/app/admin")));
        assert!(app.is_ancestor_or_self(&app));
        assert!(!app.is_ancestor_or_self(&ConfigPath::new("machine/application")));
        assert!(!app.is_ancestor_or_self(&ConfigPath::machine()));
        assert_eq!(app.parent(), Some(ConfigPath::machine()));
        assert_eq!(ConfigPath::machine().parent(), None);
    }

    #[test]
    fn test_host_chain() {
        let host = ConfigHost::new("machine.config")
            .with_local_user("local.config")
            .with_application("app.config");

        let kinds: Vec<_> = host.levels().iter().map(|l| l.kind).collect();
        assert_eq!(
            kinds,
            [LevelKind::Machine, LevelKind::Application, LevelKind::LocalUser]
        );

        assert_eq!(host.chain(&ConfigPath::new("machine/app/admin")), [0, 1]);
        assert_eq!(
            host.chain(&ConfigHost::path_for(LevelKind::LocalUser)),
            [0, 1, 2]
        );
        assert_eq!(host.application_depth(&ConfigPath::machine()), None);
        assert_eq!(
            host.application_depth(&ConfigPath::new("machine/app/admin")),
            Some(2)
        );
    }
}
