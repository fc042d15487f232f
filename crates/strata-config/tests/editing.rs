//! Editing a level's file and saving it back.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use insta::assert_snapshot;
use strata_config::{
    AppSettings, CollectionKind, CollectionSchema, ConfigHost, ConfigPath, ConfigSystem, ElementSchema, Error,
    ErrorKind, LevelKind, MemoryFileAccessor, PropertyDef, ProtectionError, ProtectionProvider, ProviderRegistry,
    SaveMode, SchemaRegistry, SectionType,
};
use strata_xml::XmlElement;

const DECLARE: &str = r#"<configSections><section name="demo" type="Demo" allowExeDefinition="MachineToLocalUser" /></configSections>"#;

fn registry() -> SchemaRegistry {
    let item = ElementSchema::new()
        .with_property(PropertyDef::text("name").key().required())
        .with_property(PropertyDef::integer("weight").default_text("0"));
    let schema = ElementSchema::new()
        .with_property(PropertyDef::text("a"))
        .with_property(PropertyDef::text("b"))
        .with_property(PropertyDef::text("c"))
        .with_element(
            "limits",
            ElementSchema::new().with_property(PropertyDef::integer("max").default_text("10")),
        )
        .with_collection(CollectionSchema::new(CollectionKind::AddRemoveClearMap, item));
    let mut registry = SchemaRegistry::with_builtins();
    registry.register(SectionType::new("Demo", schema));
    registry
}

/// Reversible stand-in for real encryption.
struct Base64Provider;

impl ProtectionProvider for Base64Provider {
    fn decrypt(&self, encrypted: &XmlElement) -> Result<String, ProtectionError> {
        let cipher = encrypted
            .get_child("CipherValue")
            .and_then(XmlElement::text)
            .ok_or_else(|| ProtectionError::new("missing CipherValue"))?;
        let bytes = STANDARD
            .decode(cipher.trim())
            .map_err(|e| ProtectionError::new(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| ProtectionError::new(e.to_string()))
    }

    fn encrypt(&self, section_xml: &str) -> Result<String, ProtectionError> {
        Ok(format!(
            "<EncryptedData><CipherValue>{}</CipherValue></EncryptedData>",
            STANDARD.encode(section_xml)
        ))
    }
}

fn system(machine_body: &str, app: Option<&str>, roaming: Option<&str>) -> (ConfigSystem, Arc<MemoryFileAccessor>) {
    let mut files = MemoryFileAccessor::new().with_file(
        "machine.config",
        format!("<configuration>{}{}</configuration>", DECLARE, machine_body),
    );
    if let Some(app) = app {
        files = files.with_file("app.config", app);
    }
    if let Some(roaming) = roaming {
        files = files.with_file("roaming.config", roaming);
    }
    let files = Arc::new(files);
    let host = ConfigHost::new("machine.config")
        .with_application("app.config")
        .with_roaming_user("roaming.config");
    let providers = ProviderRegistry::new().with_provider("Base64", Arc::new(Base64Provider));
    let system = ConfigSystem::new(host, Arc::new(registry()), files.clone()).with_providers(providers);
    (system, files)
}

fn contents(files: &MemoryFileAccessor, name: &str) -> String {
    files.contents(Path::new(name)).unwrap()
}

#[test]
fn test_save_modes_differ_on_inherited_equal_values() {
    let (system, _) = system(
        r#"<demo a="1" b="2" />"#,
        Some(r#"<configuration><demo a="1" b="3" /></configuration>"#),
        None,
    );
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    let value = config.section("demo").unwrap().root.clone();
    let parent = config.parent_value("demo").unwrap().cloned();
    let unmerged = |mode| {
        value
            .unmerge(parent.as_ref(), mode)
            .unwrap()
            .unwrap()
            .to_xml_string()
    };

    assert_snapshot!(unmerged(SaveMode::Modified), @r#"<demo a="1" b="3" />"#);
    assert_snapshot!(unmerged(SaveMode::Minimal), @r#"<demo b="3" />"#);
    assert_snapshot!(unmerged(SaveMode::Full), @r#"
    <demo a="1" b="3">
        <limits max="10" />
    </demo>
    "#);
}

#[test]
fn test_edit_save_and_reload() {
    let (system, files) = system(
        r#"<demo b="2" />"#,
        Some("<configuration>\n    <demo a=\"1\" />\n</configuration>\n"),
        Some(r#"<configuration><demo b="x" /></configuration>"#),
    );
    let roaming = ConfigHost::path_for(LevelKind::RoamingUser);
    assert!(system.section_errors(&roaming, "demo").unwrap().is_empty());

    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    let demo = config.section_mut("demo").unwrap();
    demo.set("c", "new").unwrap();
    demo.add_item(&[("name", "q"), ("weight", "4")]).unwrap();
    demo.lock_attributes(&["b"]).unwrap();
    config.save(SaveMode::Modified).unwrap();

    assert_snapshot!(contents(&files, "app.config"), @r#"
    <configuration>
        <demo a="1" c="new" lockAttributes="b">
            <add name="q" weight="4" />
        </demo>
    </configuration>
    "#);

    let app = ConfigHost::path_for(LevelKind::Application);
    let value = system.get_raw_merged_value(&app, "demo").unwrap();
    assert_eq!(value.root.get_text("c").as_deref(), Some("new"));
    assert_eq!(value.root.collection().unwrap().keys(), ["q"]);

    let errors = system.section_errors(&roaming, "demo").unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, ErrorKind::Locked);

    // The reopened snapshot sees the saved state and has nothing left to write.
    assert!(!config.section("demo").unwrap().root.is_dirty());
}

#[test]
fn test_removing_inherited_item_writes_remove() {
    let (system, files) = system(
        r#"<demo><add name="x" /><add name="y" /></demo>"#,
        Some("<configuration />"),
        None,
    );
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    assert!(config.section_mut("demo").unwrap().remove_item("x").unwrap());
    config.save(SaveMode::Modified).unwrap();

    assert_snapshot!(contents(&files, "app.config"), @r#"
    <configuration>
        <demo>
            <remove name="x" />
        </demo>
    </configuration>
    "#);
    let value = system
        .get_raw_merged_value(&ConfigHost::path_for(LevelKind::Application), "demo")
        .unwrap();
    assert_eq!(value.root.collection().unwrap().keys(), ["y"]);
}

#[test]
fn test_clear_then_add_is_written_in_order() {
    let (system, files) = system(r#"<demo><add name="x" /></demo>"#, Some("<configuration />"), None);
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    let demo = config.section_mut("demo").unwrap();
    demo.clear_items().unwrap();
    demo.add_item(&[("name", "z")]).unwrap();
    config.save(SaveMode::Modified).unwrap();

    assert_snapshot!(contents(&files, "app.config"), @r#"
    <configuration>
        <demo>
            <clear />
            <add name="z" />
        </demo>
    </configuration>
    "#);
}

#[test]
fn test_protect_and_unprotect_round_trip() {
    let original = "<configuration>\n    <appSettings>\n        <add key=\"k\" value=\"v\" />\n    </appSettings>\n</configuration>\n";
    let (system, files) = system(
        r#"<configProtectedData defaultProvider="b64"><providers><add name="b64" type="Base64" /></providers></configProtectedData>"#,
        Some(original),
        None,
    );
    let app = ConfigHost::path_for(LevelKind::Application);

    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    config.protect_section("appSettings", "").unwrap();
    config.save(SaveMode::Modified).unwrap();

    let saved = contents(&files, "app.config");
    assert!(saved.contains(r#"<appSettings configProtectionProvider="b64">"#), "{}", saved);
    assert!(saved.contains("<CipherValue>"), "{}", saved);
    assert!(!saved.contains(r#"key="k""#), "{}", saved);

    let settings = system.get_section_as::<AppSettings>(&app, "appSettings").unwrap();
    assert_eq!(settings.get("k"), Some("v"));

    assert!(config.is_protected("appSettings").unwrap());
    config.unprotect_section("appSettings").unwrap();
    config.save(SaveMode::Modified).unwrap();
    assert_eq!(contents(&files, "app.config"), original);
}

#[test]
fn test_protect_with_unknown_provider_fails() {
    let (system, _) = system("", Some("<configuration />"), None);
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    let Err(Error::Edit(err)) = config.protect_section("appSettings", "rsa") else {
        panic!("expected an edit error");
    };
    assert_eq!(err.kind, ErrorKind::Protection);
    assert!(err.message.contains("'rsa' was not found"));
}

#[test]
fn test_save_as_leaves_original_alone() {
    let original = r#"<configuration><demo a="1" /></configuration>"#;
    let (system, files) = system("", Some(original), None);
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    config.section_mut("demo").unwrap().set("b", "2").unwrap();
    config.save_as(Path::new("copy.config"), SaveMode::Modified).unwrap();

    assert_eq!(contents(&files, "app.config"), original);
    assert_snapshot!(contents(&files, "copy.config"), @r#"<configuration><demo a="1" b="2" /></configuration>"#);
}

#[test]
fn test_change_in_ancestor_blocks_save() {
    let (system, files) = system("", Some("<configuration />"), None);
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    config.section_mut("demo").unwrap().set("a", "1").unwrap();

    files.insert("machine.config", format!("<configuration>{}<demo b=\"2\" /></configuration>", DECLARE));
    match config.save(SaveMode::Modified) {
        Err(Error::FileChangedSinceLoad { file }) => assert_eq!(file, Path::new("machine.config")),
        other => panic!("expected FileChangedSinceLoad, got {:?}", other.map(|_| ())),
    }
    assert_eq!(contents(&files, "app.config"), "<configuration />");
}

#[test]
fn test_global_errors_block_open() {
    let (system, _) = system("", Some("<configuration><demo></configuration>"), None);
    let Err(Error::Config(errors)) = system.open_configuration(LevelKind::Application) else {
        panic!("expected configuration errors");
    };
    assert_eq!(errors.first().unwrap().kind, ErrorKind::Xml);
    assert!(system.open_configuration(LevelKind::Machine).is_ok());
}

#[test]
fn test_save_to_native_file() {
    let dir = tempfile::tempdir().unwrap();
    let machine = dir.path().join("machine.config");
    let app_file = dir.path().join("app.config");
    std::fs::write(&machine, "<configuration />").unwrap();

    let system = ConfigSystem::native(ConfigHost::new(&machine).with_application(&app_file));
    let mut config = system.open_configuration(LevelKind::Application).unwrap();
    config
        .section_mut("appSettings")
        .unwrap()
        .add_item(&[("key", "a"), ("value", "1")])
        .unwrap();
    config.save(SaveMode::Modified).unwrap();

    let written = std::fs::read_to_string(&app_file).unwrap();
    assert!(written.contains(r#"<add key="a" value="1" />"#), "{}", written);
    let settings = system
        .get_section_as::<AppSettings>(&ConfigPath::new("machine/app"), "appSettings")
        .unwrap();
    assert_eq!(settings.get("a"), Some("1"));
}
