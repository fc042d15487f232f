//! Command implementations for the Strata CLI
//!
//! Every command works against one [`Context`]: the file hierarchy named on
//! the command line, the selected level and the config path under it.

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, ValueEnum};
use strata_config::{ConfigHost, ConfigPath, ConfigSystem, LevelKind};
use tracing::debug;

pub mod check;
pub mod sections;
pub mod show;
pub mod unmerge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LevelArg {
    Machine,
    App,
    Roaming,
    Local,
}

impl From<LevelArg> for LevelKind {
    fn from(level: LevelArg) -> Self {
        match level {
            LevelArg::Machine => LevelKind::Machine,
            LevelArg::App => LevelKind::Application,
            LevelArg::Roaming => LevelKind::RoamingUser,
            LevelArg::Local => LevelKind::LocalUser,
        }
    }
}

#[derive(Debug, Args)]
pub struct HostArgs {
    /// Machine-wide configuration file
    #[arg(long, global = true, default_value = "machine.config")]
    pub machine: PathBuf,

    /// Application configuration file
    #[arg(long, global = true)]
    pub app: Option<PathBuf>,

    /// Roaming user configuration file (requires --app)
    #[arg(long, global = true)]
    pub roaming: Option<PathBuf>,

    /// Local user configuration file (requires --roaming)
    #[arg(long, global = true)]
    pub local: Option<PathBuf>,

    /// Level to inspect (defaults to the deepest file given)
    #[arg(long, global = true)]
    pub level: Option<LevelArg>,

    /// Sub-path below the level, as used by <location path="...">
    #[arg(long, global = true)]
    pub location: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

impl HostArgs {
    fn host(&self) -> Result<ConfigHost> {
        let mut host = ConfigHost::new(&self.machine);
        if let Some(app) = &self.app {
            host = host.with_application(app);
        }
        if let Some(roaming) = &self.roaming {
            if self.app.is_none() {
                bail!("--roaming requires --app");
            }
            host = host.with_roaming_user(roaming);
        }
        if let Some(local) = &self.local {
            if self.roaming.is_none() {
                bail!("--local requires --roaming");
            }
            host = host.with_local_user(local);
        }
        Ok(host)
    }

    fn deepest_level(&self) -> LevelKind {
        if self.local.is_some() {
            LevelKind::LocalUser
        } else if self.roaming.is_some() {
            LevelKind::RoamingUser
        } else if self.app.is_some() {
            LevelKind::Application
        } else {
            LevelKind::Machine
        }
    }
}

pub struct Context {
    pub system: ConfigSystem,
    pub level: LevelKind,
    pub path: ConfigPath,
    /// Whether `--location` narrowed the path below the level.
    pub has_location: bool,
    pub json: bool,
}

impl Context {
    pub fn open(args: &HostArgs) -> Result<Self> {
        let host = args.host()?;
        let level = args.level.map(LevelKind::from).unwrap_or_else(|| args.deepest_level());
        if host.level_index(level).is_none() {
            bail!("no file was given for the {} level", level);
        }
        let location = args.location.as_deref().unwrap_or_default();
        let path = ConfigHost::path_for(level).join(location);
        debug!(%path, levels = host.levels().len(), "opening configuration");
        Ok(Self {
            system: ConfigSystem::native(host),
            level,
            path,
            has_location: !location.trim_matches('/').is_empty(),
            json: args.json,
        })
    }

    pub fn print_json(&self, value: &impl serde::Serialize) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }
}
