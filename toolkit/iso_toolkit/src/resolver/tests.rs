use super::*;
use iso_host::{EnvironmentSetup, ModuleImage};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn write_module(dir: &Path, file_name: &str, name: &str) -> PathBuf {
    let path = dir.join(file_name);
    ModuleImage::builder(name).build().write_to(&path).unwrap();
    path
}

fn scratch() -> Environment {
    Environment::create(EnvironmentSetup::default()).unwrap()
}

#[test]
fn test_probe_paths_are_normalized_and_deduplicated() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().to_str().unwrap();
    let mut set = ProbePathSet::new();

    assert_eq!(set.add(base), 1);
    assert_eq!(set.add(&format!("{base}/./sub/..")), 0);
    assert_eq!(set.add(&format!("{base}/sub")), 1);
    assert_eq!(set.add(""), 0);
    assert_eq!(set.add(" ; ;"), 0);

    let paths: Vec<_> = set.iter().map(Path::to_path_buf).collect();
    assert_eq!(paths, vec![dir.path().to_path_buf(), dir.path().join("sub")]);
    assert!(set.contains(&dir.path().join("sub/../sub")));
}

#[test]
fn test_relative_probe_paths_become_absolute() {
    let mut set = ProbePathSet::new();
    set.add("plugins");
    let only = set.iter().next().unwrap();
    assert!(only.is_absolute());
    assert!(only.ends_with("plugins"));
}

#[test]
fn test_private_bin_path_is_relative_to_application_base() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = PathResolver::new();
    resolver.set_application_base(dir.path());
    resolver.set_private_bin_path("bin;lib; ");

    assert_eq!(
        resolver.probe_paths(),
        vec![
            dir.path().to_path_buf(),
            dir.path().join("bin"),
            dir.path().join("lib"),
        ]
    );
    assert_eq!(resolver.private_bin_path().as_deref(), Some("bin;lib; "));
    assert_eq!(resolver.application_base().as_deref(), Some(dir.path()));
}

#[test]
fn test_strategy_guard_restores_previous() {
    let resolver = PathResolver::new();
    assert_eq!(resolver.strategy(), LoadStrategy::BindLocking);
    {
        let guard = resolver.override_strategy(LoadStrategy::LoadBytes);
        assert_eq!(guard.previous(), LoadStrategy::BindLocking);
        assert_eq!(resolver.strategy(), LoadStrategy::LoadBytes);
    }
    assert_eq!(resolver.strategy(), LoadStrategy::BindLocking);
}

#[test]
fn test_strategy_guard_restores_on_panic() {
    let resolver = PathResolver::new();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _guard = resolver.override_strategy(LoadStrategy::BindAnonymous);
        panic!("load blew up");
    }));
    assert!(outcome.is_err());
    assert_eq!(resolver.strategy(), LoadStrategy::BindLocking);
}

#[test]
fn test_resolve_prefers_dll_then_exe_in_path_order() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_module(first.path(), "Tool.exe", "Tool");
    write_module(second.path(), "Tool.dll", "Tool");
    let env = scratch();

    let resolver = PathResolver::new();
    resolver.add_probe_path(&format!(
        "{};{}",
        first.path().display(),
        second.path().display()
    ));

    let module = resolver.resolve(&env, "Tool, Version=1.0.0.0").unwrap();
    // The first directory wins even though it only has the .exe.
    assert_eq!(
        module.location(),
        Some(first.path().join("Tool.exe").canonicalize().unwrap().as_path())
    );
    env.unload().unwrap();
}

#[test]
fn test_resolve_miss_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let env = scratch();
    let resolver = PathResolver::new();
    resolver.add_probe_path(dir.path().to_str().unwrap());

    assert!(resolver.resolve(&env, "Absent").is_none());
    assert!(resolver.resolve(&env, "").is_none());
    env.unload().unwrap();
}

#[test]
fn test_resolve_load_failure_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("Corrupt.dll"), b"not a module").unwrap();
    let env = scratch();
    let resolver = PathResolver::new();
    resolver.add_probe_path(dir.path().to_str().unwrap());

    assert!(resolver.resolve(&env, "Corrupt").is_none());
    env.unload().unwrap();
}

#[test]
fn test_resolve_uses_current_strategy() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "Bytes.dll", "Bytes");
    let env = scratch();
    let resolver = PathResolver::new();
    resolver.add_probe_path(dir.path().to_str().unwrap());
    resolver.set_strategy(LoadStrategy::LoadBytes);

    let module = resolver.resolve(&env, "Bytes").unwrap();
    assert_eq!(module.location(), None);
    env.unload().unwrap();
}

#[test]
fn test_resolver_as_environment_hook() {
    let dir = tempfile::tempdir().unwrap();
    write_module(dir.path(), "Hooked.dll", "Hooked");
    let env = scratch();
    let resolver = Arc::new(PathResolver::new());
    resolver.add_probe_path(dir.path().to_str().unwrap());

    let id = env.add_resolve_hook(resolver.clone()).unwrap();
    assert_eq!(env.resolve("Hooked").unwrap().simple_name(), "Hooked");
    assert!(env.remove_resolve_hook(id));
    env.unload().unwrap();
}

#[test]
fn test_remote_override_restores_remote_strategy() {
    let env = scratch();
    let resolver = env.construct(|| PathResolver::construct(())).unwrap();
    {
        let _override = RemoteStrategyOverride::new(&resolver, LoadStrategy::LoadBytes).unwrap();
        assert_eq!(resolver.invoke(|r| r.strategy()).unwrap(), LoadStrategy::LoadBytes);
    }
    assert_eq!(resolver.invoke(|r| r.strategy()).unwrap(), LoadStrategy::BindLocking);
    env.unload().unwrap();
}

fn segment() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["alpha", "beta", "gamma", "beta/..", "./delta", ""])
        .prop_map(str::to_string)
}

proptest! {
    #[test]
    fn prop_semicolon_list_equals_sequential_adds(
        segments in prop::collection::vec(segment(), 0..8)
    ) {
        let root = std::env::temp_dir().join("iso-probe");
        let joined: Vec<String> = segments
            .iter()
            .map(|s| if s.is_empty() { String::new() } else { root.join(s).display().to_string() })
            .collect();

        let mut at_once = ProbePathSet::new();
        at_once.add(&joined.join(";"));

        let mut one_by_one = ProbePathSet::new();
        for path in &joined {
            one_by_one.add(path);
        }
        prop_assert_eq!(at_once.to_vec(), one_by_one.to_vec());

        // Re-adding everything changes nothing.
        let before = at_once.to_vec();
        prop_assert_eq!(at_once.add(&joined.join(";")), 0);
        prop_assert_eq!(at_once.to_vec(), before);
    }
}
