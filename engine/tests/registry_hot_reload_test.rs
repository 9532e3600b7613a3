//! Integration tests for capability discovery and hot reload
//!
//! Uses a loader over plain text files whose content is the module version,
//! so tests can change a module by rewriting its file.

use opsagent_engine::registry::{
    CapabilityLoader, CapabilityRegistry, HotReloader, LoadedCapability, NativeLoader,
};
use sdk::errors::EngineError;
use sdk::types::{ToolHandler, ToolSchema, ToolSet};
use serde_json::json;
use std::fs::{File, FileTimes};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// `.ver` files: `version` returns the content immediately, `slow_version`
/// after a delay. Content `broken` fails to load.
struct VersionLoader;

impl CapabilityLoader for VersionLoader {
    fn kind(&self) -> &str {
        "version"
    }

    fn extension(&self) -> &str {
        "ver"
    }

    fn load(&self, name: &str, path: &Path) -> Result<LoadedCapability, EngineError> {
        let version = std::fs::read_to_string(path)?.trim().to_string();
        if version == "broken" {
            return Err(EngineError::CapabilityLoad {
                name: name.to_string(),
                reason: "module raised during import".to_string(),
            });
        }

        let fast = version.clone();
        let slow = version.clone();
        let tools = ToolSet::new()
            .with_tool(
                "version",
                ToolHandler::blocking(move |_| Ok(json!(fast.clone()))),
            )
            .with_tool(
                "slow_version",
                ToolHandler::from_async(move |_| {
                    let version = slow.clone();
                    async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(json!(version))
                    }
                }),
            )
            .with_schema(ToolSchema::new("version", "Module version", json!({})))
            .with_schema(ToolSchema::new(
                "slow_version",
                "Module version, slowly",
                json!({}),
            ));
        Ok(LoadedCapability::new(tools))
    }
}

fn registry(dir: &TempDir) -> Arc<CapabilityRegistry> {
    Arc::new(CapabilityRegistry::new(dir.path(), "_").with_loader(VersionLoader))
}

/// Rewrite a module file and move its mtime forward so the change is seen
/// even on filesystems with coarse timestamps
fn write_module(dir: &TempDir, name: &str, content: &str, age_secs: u64) {
    let path = dir.path().join(format!("{}.ver", name));
    std::fs::write(&path, content).unwrap();
    let stamp = SystemTime::now() - Duration::from_secs(3600) + Duration::from_secs(age_secs);
    let file = File::options().write(true).open(&path).unwrap();
    file.set_times(FileTimes::new().set_modified(stamp)).unwrap();
}

#[tokio::test]
async fn test_modified_module_is_reloaded() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "mysql", "v1", 0);
    let registry = registry(&dir);
    assert_eq!(registry.load_all().await, vec!["mysql"]);
    assert!(!registry.is_modified("mysql").await);

    write_module(&dir, "mysql", "v2", 10);
    assert!(registry.is_modified("mysql").await);

    assert_eq!(registry.check_and_reload_modified().await, vec!["mysql"]);
    assert_eq!(
        registry.dispatch("mysql_version", json!({})).await.unwrap(),
        json!("v2")
    );
    assert!(registry.check_and_reload_modified().await.is_empty());
}

#[tokio::test]
async fn test_in_flight_call_finishes_on_old_version() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "mysql", "v1", 0);
    let registry = registry(&dir);
    registry.load_all().await;

    let in_flight = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.dispatch("mysql_slow_version", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    write_module(&dir, "mysql", "v2", 10);
    assert_eq!(registry.check_and_reload_modified().await, vec!["mysql"]);

    assert_eq!(
        registry.dispatch("mysql_version", json!({})).await.unwrap(),
        json!("v2")
    );
    assert_eq!(in_flight.await.unwrap().unwrap(), json!("v1"));
}

#[tokio::test]
async fn test_new_and_removed_sources() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "redis", "v1", 0);
    let registry = registry(&dir);
    registry.load_all().await;

    write_module(&dir, "nginx", "v1", 0);
    std::fs::remove_file(dir.path().join("redis.ver")).unwrap();

    assert_eq!(registry.check_and_reload_modified().await, vec!["nginx"]);
    assert!(registry.is_loaded("nginx").await);
    assert!(!registry.is_loaded("redis").await);

    let names: Vec<String> = registry.catalog().await.into_iter().map(|s| s.name).collect();
    assert_eq!(names, vec!["nginx_version", "nginx_slow_version"]);
}

#[tokio::test]
async fn test_failed_module_retried_only_after_change() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "shell", "broken", 0);
    let registry = registry(&dir);

    assert!(registry.load_all().await.is_empty());
    assert!(registry.check_and_reload_modified().await.is_empty());

    let info = registry.list().await;
    assert_eq!(info.len(), 1);
    assert!(!info[0].loaded);
    assert!(info[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("raised during import"));

    write_module(&dir, "shell", "v2", 10);
    assert_eq!(registry.check_and_reload_modified().await, vec!["shell"]);
    assert_eq!(
        registry.dispatch("shell_version", json!({})).await.unwrap(),
        json!("v2")
    );
}

#[tokio::test]
async fn test_reload_failure_removes_module_and_others_keep_working() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "good", "v1", 0);
    write_module(&dir, "flaky", "v1", 0);
    let registry = registry(&dir);
    registry.load_all().await;

    write_module(&dir, "flaky", "broken", 10);
    assert!(registry.check_and_reload_modified().await.is_empty());
    assert!(!registry.is_loaded("flaky").await);
    assert!(matches!(
        registry.dispatch("flaky_version", json!({})).await,
        Err(EngineError::CapabilityNotFound(_))
    ));
    assert_eq!(
        registry.dispatch("good_version", json!({})).await.unwrap(),
        json!("v1")
    );
}

#[tokio::test]
async fn test_hot_reloader_applies_changes_in_background() {
    let dir = TempDir::new().unwrap();
    write_module(&dir, "mysql", "v1", 0);
    let registry = registry(&dir);
    registry.load_all().await;

    let reloader = HotReloader::spawn(Arc::clone(&registry), Duration::from_millis(50));
    write_module(&dir, "mysql", "v2", 10);

    let mut version = json!("v1");
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        version = registry.dispatch("mysql_version", json!({})).await.unwrap();
        if version == json!("v2") {
            break;
        }
    }
    assert_eq!(version, json!("v2"));

    reloader.shutdown().await;
}

#[tokio::test]
async fn test_invalid_native_library_is_reported() {
    let dir = TempDir::new().unwrap();
    let file_name = format!(
        "{}opsnative.{}",
        std::env::consts::DLL_PREFIX,
        std::env::consts::DLL_EXTENSION
    );
    std::fs::write(dir.path().join(file_name), b"not a shared library").unwrap();

    let registry = CapabilityRegistry::new(dir.path(), "_").with_loader(NativeLoader::new());
    assert_eq!(registry.discover(), vec!["opsnative"]);
    assert!(registry.load_all().await.is_empty());

    let info = registry.list().await;
    assert_eq!(info.len(), 1);
    assert!(!info[0].loaded);
    assert!(info[0].error.is_some());
}
