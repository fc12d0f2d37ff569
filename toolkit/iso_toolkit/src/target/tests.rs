use super::*;
use iso_host::{BindMode, Environment, EnvironmentSetup, ModuleImage};
use pretty_assertions::assert_eq;

fn image_on_disk(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(format!("{name}.dll"));
    ModuleImage::builder(name).build().write_to(&path).unwrap();
    path.canonicalize().unwrap()
}

#[test]
fn test_from_path_populates_every_field() {
    let dir = tempfile::tempdir().unwrap();
    let path = image_on_disk(dir.path(), "Contoso.Core");

    let target = ModuleTarget::from_path(&path, Some(&path), Some("Contoso.Core, Version=1.0.0.0"))
        .unwrap();

    assert_eq!(target.code_base(), Some(&Url::from_file_path(&path).unwrap()));
    assert_eq!(target.location(), Some(path.as_path()));
    assert_eq!(target.full_name(), Some("Contoso.Core, Version=1.0.0.0"));
    assert!(!target.is_dynamic());
    assert_eq!(target.local_path().unwrap(), path);
}

#[test]
fn test_from_path_empty_code_base_is_null_argument() {
    assert!(matches!(
        ModuleTarget::from_path(Path::new(""), None, None),
        Err(ToolkitError::NullArgument { name: "code_base" })
    ));
}

#[test]
fn test_from_path_missing_files_are_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let path = image_on_disk(dir.path(), "Present");
    let missing = dir.path().join("Absent.dll");

    assert!(matches!(
        ModuleTarget::from_path(&missing, None, None),
        Err(ToolkitError::NotFound { .. })
    ));
    assert!(matches!(
        ModuleTarget::from_path(&path, Some(&missing), None),
        Err(ToolkitError::NotFound { .. })
    ));
    // An empty location means "no location".
    let target = ModuleTarget::from_path(&path, Some(Path::new("")), Some("")).unwrap();
    assert_eq!(target.location(), None);
    assert_eq!(target.full_name(), None);
}

#[test]
fn test_from_url_rejects_non_file_urls() {
    let url = Url::parse("https://example.com/Contoso.dll").unwrap();
    assert!(matches!(
        ModuleTarget::from_url(&url, None, None),
        Err(ToolkitError::InvalidArgument { .. })
    ));
}

#[test]
fn test_from_dynamic() {
    let target = ModuleTarget::from_dynamic("Generated, Version=0.0.0.0").unwrap();
    assert!(target.is_dynamic());
    assert_eq!(target.code_base(), None);
    assert!(target.local_path().is_err());
    assert!(ModuleTarget::from_dynamic(" ").is_err());
}

#[test]
fn test_from_live_modules() {
    let dir = tempfile::tempdir().unwrap();
    let path = image_on_disk(dir.path(), "Contoso.Live");
    let env = Environment::create(EnvironmentSetup::default()).unwrap();

    let bound = env.bind_file(&path, BindMode::Locking).unwrap();
    let target = ModuleTarget::from_live(&bound).unwrap();
    assert_eq!(target.location(), Some(path.as_path()));
    assert_eq!(target.full_name(), Some("Contoso.Live, Version=1.0.0.0"));

    let dynamic = env.define_dynamic("Emitted").unwrap();
    let target = ModuleTarget::from_live(&dynamic).unwrap();
    assert!(target.is_dynamic());
    assert_eq!(target.location(), None);

    env.unload().unwrap();
}

#[test]
fn test_from_live_survives_deleted_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = image_on_disk(dir.path(), "Contoso.Deleted");
    let env = Environment::create(EnvironmentSetup::default()).unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let canonical = path.canonicalize().unwrap();
    let module = env.load_image(&bytes, None, Some(canonical.clone())).unwrap();
    std::fs::remove_file(&path).unwrap();

    let target = ModuleTarget::from_live(&module).unwrap();
    assert_eq!(target.local_path().unwrap(), canonical);
    assert_eq!(target.location(), None);
    assert_eq!(target.full_name(), Some("Contoso.Deleted, Version=1.0.0.0"));

    env.unload().unwrap();
}
