//! End-to-end tests for isolation contexts against module images on disk.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "test code — panics provide clear failure messages"
)]

use std::path::{Path, PathBuf};

use iso_host::{Environment, EnvironmentSetup, ModuleImage};
use iso_toolkit::{
    ContextConfig, IsolationContext, LoadStrategy, ModuleTarget, RemoteFunc, ToolkitError,
};
use pretty_assertions::assert_eq;

/// A plugin directory holding `Plugin.Root`, which references two helpers,
/// one of which references the other.
struct PluginDir {
    dir: tempfile::TempDir,
}

impl PluginDir {
    fn new() -> Self {
        let plugins = PluginDir {
            dir: tempfile::tempdir().expect("tempdir"),
        };
        plugins.module("Plugin.Root", &["Plugin.Helpers", "Plugin.Core"]);
        plugins.module("Plugin.Helpers", &["Plugin.Core"]);
        plugins.module("Plugin.Core", &[]);
        plugins
    }

    fn module(&self, name: &str, references: &[&str]) -> PathBuf {
        let mut builder = ModuleImage::builder(name).payload(name.as_bytes().to_vec());
        for reference in references {
            builder = builder.reference(format!("{reference}, Version=1.0.0.0"));
        }
        let path = self.path().join(format!("{name}.dll"));
        builder.build().write_to(&path).expect("write module image");
        path
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn root(&self) -> PathBuf {
        self.path().join("Plugin.Root.dll")
    }
}

fn isolated_app() -> (tempfile::TempDir, IsolationContext) {
    let app = tempfile::tempdir().unwrap();
    let context = IsolationContext::create_with(
        EnvironmentSetup::default()
            .with_application_name("integration")
            .with_application_base(app.path()),
    )
    .unwrap();
    (app, context)
}

#[test]
fn target_with_references_needs_the_probe_path() {
    let plugins = PluginDir::new();
    let (_app, context) = isolated_app();
    let target = ModuleTarget::from_path(&plugins.root(), None, None).unwrap();

    let err = context
        .load_target_with_references(LoadStrategy::LoadBytes, &target)
        .unwrap_err();
    assert!(matches!(err, ToolkitError::NotFound { .. }), "{err}");

    context
        .add_probe_path(&plugins.path().display().to_string())
        .unwrap();
    let closure = context
        .load_target_with_references(LoadStrategy::LoadBytes, &target)
        .unwrap();
    let names: Vec<_> = closure.iter().filter_map(ModuleTarget::full_name).collect();
    assert_eq!(
        names,
        [
            "Plugin.Root, Version=1.0.0.0",
            "Plugin.Helpers, Version=1.0.0.0",
            "Plugin.Core, Version=1.0.0.0",
        ]
    );
    assert!(closure.iter().all(|t| t.location().is_none()));
}

#[test]
fn modules_stay_inside_their_context() {
    let plugins = PluginDir::new();
    let (_app, first) = isolated_app();
    let (_app2, second) = isolated_app();

    first
        .load_module(LoadStrategy::BindLocking, &plugins.root(), None)
        .unwrap();
    assert!(first
        .find_by_full_name("Plugin.Root, Version=1.0.0.0")
        .unwrap()
        .is_some());
    assert!(second
        .find_by_full_name("Plugin.Root, Version=1.0.0.0")
        .unwrap()
        .is_none());
    assert!(Environment::home()
        .find_module("Plugin.Root")
        .is_none());
}

#[test]
fn bind_locking_reports_location() {
    let plugins = PluginDir::new();
    let (_app, context) = isolated_app();
    let path = plugins.path().join("Plugin.Core.dll");

    context
        .load_module(LoadStrategy::BindLocking, &path, None)
        .unwrap();
    let found = context.find_by_location(&path).unwrap().unwrap();
    assert_eq!(found.location(), Some(path.canonicalize().unwrap().as_path()));
}

#[test]
fn load_bytes_tolerates_a_bad_symbol_file() {
    let plugins = PluginDir::new();
    let (_app, context) = isolated_app();
    let path = plugins.path().join("Plugin.Core.dll");
    let symbols = plugins.path().join("Plugin.Core.pdb");
    std::fs::write(&symbols, b"not a symbol file").unwrap();

    let target = context
        .load_module(LoadStrategy::LoadBytes, &path, Some(&symbols))
        .unwrap();
    assert_eq!(target.location(), None);
    assert!(!target.full_name().unwrap().is_empty());
}

#[test]
fn dispose_unloads_the_environment() {
    let plugins = PluginDir::new();
    let (_app, mut context) = isolated_app();
    context
        .load_module(LoadStrategy::BindAnonymous, &plugins.root(), None)
        .unwrap();
    let env = context.environment().unwrap();

    context.dispose();
    context.dispose();
    assert!(context.is_disposed());
    assert!(env.is_unloaded());
    assert!(RemoteFunc::invoke(&env, || 1).unwrap_err().is_disposed());
    assert!(context
        .load_module(LoadStrategy::BindLocking, &plugins.root(), None)
        .unwrap_err()
        .is_disposed());
}

#[test]
fn config_probe_paths_resolve_references() {
    let plugins = PluginDir::new();
    let app = tempfile::tempdir().unwrap();
    let config = ContextConfig::default()
        .with_application_base(app.path())
        .with_probe_path(plugins.path().display().to_string());

    let context = IsolationContext::create_from_config(&config).unwrap();
    let closure = context
        .load_module_with_references(LoadStrategy::BindLocking, &plugins.root())
        .unwrap();
    assert_eq!(closure.len(), 3);
    assert_eq!(context.loaded_modules().unwrap().len(), 3);
}

#[test]
fn wrapped_environment_outlives_the_context() {
    let env = Environment::create(EnvironmentSetup::default().with_application_name("host"))
        .unwrap();
    let plugins = PluginDir::new();
    {
        let context = IsolationContext::wrap(&env).unwrap();
        context
            .load_module(LoadStrategy::BindLocking, &plugins.root(), None)
            .unwrap();
    }
    assert!(!env.is_unloaded());
    assert!(env.find_module("Plugin.Root").is_some());
    assert_eq!(env.resolve_hook_count(), 0);
    env.unload().unwrap();
}
