//! Hierarchical XML configuration for Strata.
//!
//! A [`ConfigHost`] names up to four nested files: machine, application,
//! roaming user and local user. Each file declares sections in
//! `<configSections>` and defines them at its root or inside `<location>`
//! blocks. [`ConfigSystem`] reads the files lazily, resolves declarations,
//! merges every definition that applies to a config path (honoring locks
//! and override modes) and caches the result until a file changes.
//!
//! [`Configuration`] edits one level's file. Saving computes the
//! difference between the file's value and what its ancestors already
//! provide, then splices that into the original text.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use strata_config::{AppSettings, ConfigHost, ConfigPath, ConfigSystem, MemoryFileAccessor, SchemaRegistry};
//!
//! let files = MemoryFileAccessor::new()
//!     .with_file(
//!         "machine.config",
//!         r#"<configuration><appSettings><add key="mode" value="prod" /></appSettings></configuration>"#,
//!     )
//!     .with_file(
//!         "app.config",
//!         r#"<configuration><appSettings><add key="name" value="demo" /></appSettings></configuration>"#,
//!     );
//! let host = ConfigHost::new("machine.config").with_application("app.config");
//! let system = ConfigSystem::new(host, Arc::new(SchemaRegistry::with_builtins()), Arc::new(files));
//!
//! let settings = system
//!     .get_section_as::<AppSettings>(&ConfigPath::new("machine/app"), "appSettings")
//!     .unwrap();
//! assert_eq!(settings.get("mode"), Some("prod"));
//! assert_eq!(settings.get("name"), Some("demo"));
//! ```

pub mod builtins;
pub mod configuration;
pub mod directory;
pub mod errors;
pub mod file;
pub mod locks;
pub mod merge;
pub mod path;
pub mod protection;
pub mod runtime;
pub mod schema;
pub mod section;
pub mod system;
pub mod unmerge;
pub mod update;
pub mod value;

pub use builtins::AppSettings;
pub use configuration::{Configuration, LocationSettings};
pub use directory::{AllowDefinition, AllowExeDefinition, FactoryRecord, OverrideMode};
pub use errors::{ConfigError, ConfigErrors, Error, ErrorKind, ErrorScope, Result};
pub use locks::LockList;
pub use merge::{MergeInput, MergeOutcome, merge};
pub use path::{ConfigHost, ConfigLevel, ConfigPath, LevelKind};
pub use protection::{ProtectionError, ProtectionProvider, ProviderRegistry};
pub use runtime::{AccessError, FileAccessor, MemoryFileAccessor, NativeFileAccessor, VersionToken};
pub use schema::{
    CollectionKind, CollectionSchema, ElementSchema, PropertyDef, ScalarValue, SchemaRegistry, SectionType,
    ValueKind,
};
pub use section::LocationKey;
pub use system::{ConfigSystem, Slot};
pub use unmerge::SaveMode;
pub use update::{DefinitionUpdate, LocationUpdates, UpdateCoordinator};
pub use value::{CollectionItem, CollectionValue, ConfigValue, ElementValue, SectionValue, ValueOrigin};
