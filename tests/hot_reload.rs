// tests/hot_reload.rs
//! Hot-reload behavior against real files on disk

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    rc::Rc,
    time::{Duration, SystemTime},
};

use shaderwatch::{backend::Command, RecordingBackend, ShaderError, ShaderRegistry, StageKind};
use tempfile::TempDir;

const VERTEX: &str = "fn main() { /* vertex v1 */ }";
const FRAGMENT: &str = "fn main() { /* fragment v1 */ }";
const BROKEN: &str = "fn mian( {";

/// Accepts any source that declares `main`
fn backend() -> Rc<RecordingBackend> {
    Rc::new(RecordingBackend::with_compile_rule(|kind, source| {
        if source.contains("main()") {
            Ok(())
        } else {
            Err(format!("{kind}: no entry point\n\0"))
        }
    }))
}

/// Write `text` and stamp the file `secs` seconds after the epoch
fn write_shader(path: &Path, text: &str, secs: u64) {
    fs::write(path, text).unwrap();
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn shader_pair(dir: &TempDir) -> (PathBuf, PathBuf) {
    let vertex = dir.path().join("shader.vert");
    let fragment = dir.path().join("shader.frag");
    write_shader(&vertex, VERTEX, 1_000);
    write_shader(&fragment, FRAGMENT, 1_000);
    (vertex, fragment)
}

#[test]
fn test_register_and_use() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());

    let handle = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(handle).unwrap();

    assert_eq!(backend.current_program(), Some(handle));
    assert_eq!(registry.lookup(&[&vertex, &fragment]), Some(handle));
    // Stages are released once the program links
    assert_eq!(backend.live_stages(), 0);
    assert_eq!(backend.live_programs(), 1);
    assert!(registry.check_for_changes().is_empty());
}

#[test]
fn test_register_reports_compile_log() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    write_shader(&fragment, BROKEN, 1_000);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());

    let err = registry.register(&vertex, &fragment).unwrap_err();

    match err {
        ShaderError::Compile { stage, log } => {
            assert_eq!(stage, StageKind::Fragment);
            assert_eq!(log, "fragment: no entry point");
        }
        other => panic!("expected a compile error, got {other:?}"),
    }
    assert!(registry.is_empty());
    assert_eq!(backend.live_stages(), 0);
    assert_eq!(backend.live_programs(), 0);
}

#[test]
fn test_broken_edit_keeps_previous_program() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());
    let handle = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(handle).unwrap();

    write_shader(&fragment, BROKEN, 2_000);
    let report = registry.check_for_changes();

    assert_eq!(report.failed, vec![handle]);
    assert!(report.reloaded.is_empty());
    assert!(backend.is_program_live(handle));
    assert_eq!(backend.current_program(), Some(handle));
    assert!(!registry.get(handle).unwrap().compiled_okay());
    registry.use_program(handle).unwrap();

    // Timestamps were refreshed, so the broken file is not retried
    backend.take_commands();
    assert!(registry.check_for_changes().is_empty());
    assert!(backend.commands().is_empty());
}

#[test]
fn test_fixed_edit_swaps_handle() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());
    let old = registry.register(&vertex, &fragment).unwrap();
    registry.use_program(old).unwrap();

    write_shader(&fragment, BROKEN, 2_000);
    registry.check_for_changes();

    write_shader(&fragment, "fn main() { /* fragment v2 */ }", 3_000);
    let report = registry.check_for_changes();

    let new = report.replacement_for(old).unwrap();
    assert_ne!(new, old);
    assert_eq!(registry.lookup(&[&vertex, &fragment]), Some(new));
    assert!(registry.get(new).unwrap().compiled_okay());
    assert!(!registry.contains(old));
    assert!(!backend.is_program_live(old));
    assert!(matches!(
        registry.use_program(old),
        Err(ShaderError::UnknownHandle(handle)) if handle == old
    ));

    // The program in use follows the swap
    assert_eq!(backend.current_program(), Some(new));
    assert!(backend.faults().is_empty());
}

#[test]
fn test_reload_order_is_new_program_before_old_delete() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());
    let old = registry.register(&vertex, &fragment).unwrap();
    backend.take_commands();

    write_shader(&vertex, "fn main() { /* vertex v2 */ }", 2_000);
    let new = registry.check_for_changes().replacement_for(old).unwrap();

    let commands = backend.commands();
    let linked = commands
        .iter()
        .position(|command| *command == Command::LinkProgram(new))
        .unwrap();
    let deleted = commands
        .iter()
        .position(|command| *command == Command::DeleteProgram(old))
        .unwrap();
    assert!(linked < deleted);
}

#[test]
fn test_deleted_file_is_skipped_until_restored() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());
    let handle = registry.register(&vertex, &fragment).unwrap();

    fs::remove_file(&vertex).unwrap();
    let report = registry.check_for_changes();
    assert_eq!(report.unreadable, vec![handle]);
    assert!(backend.is_program_live(handle));

    write_shader(&vertex, "fn main() { /* vertex v2 */ }", 2_000);
    let report = registry.check_for_changes();
    assert!(report.replacement_for(handle).is_some());
}

#[test]
fn test_compute_program_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let compute = dir.path().join("particles.comp");
    write_shader(&compute, "fn main() { /* v1 */ }", 1_000);
    let backend = backend();
    let mut registry = ShaderRegistry::new(backend.clone());

    let old = registry.register_compute(&compute).unwrap();
    assert_eq!(registry.stats().compute_programs, 1);

    write_shader(&compute, "fn main() { /* v2 */ }", 2_000);
    let new = registry.check_for_changes().replacement_for(old).unwrap();
    assert_eq!(registry.lookup(&[&compute]), Some(new));
    assert_eq!(backend.live_programs(), 1);
}

#[test]
fn test_dropping_registry_releases_programs() {
    let dir = tempfile::tempdir().unwrap();
    let (vertex, fragment) = shader_pair(&dir);
    let backend = backend();
    {
        let mut registry = ShaderRegistry::new(backend.clone());
        registry.register(&vertex, &fragment).unwrap();
        registry.register(&vertex, &fragment).unwrap();
        assert_eq!(backend.live_programs(), 2);
    }
    assert_eq!(backend.live_programs(), 0);
    assert!(backend.faults().is_empty());
}
