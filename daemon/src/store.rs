//! Persistent per-monitor wallpaper assignments.
//!
//! The store is a small JSON document (`{version: 1, monitors: [...]}`) that
//! other processes (a settings GUI, scripts) may also rewrite. It is the
//! source of truth: every operation re-reads the file, edits the document in
//! place, and writes it back through a temporary file in the same directory
//! followed by a rename.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};

const STORE_VERSION: u32 = 1;

/// One monitor's durable wallpaper assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfigEntry {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub screen: usize,

    #[serde(default)]
    pub screen_name: Option<String>,

    #[serde(default)]
    pub video_path: Option<String>,

    #[serde(default)]
    pub volume: u32,

    #[serde(default)]
    pub pause_on_max: bool,

    #[serde(default)]
    pub paused: bool,

    #[serde(default = "default_speed")]
    pub speed: f64,
}

fn default_true() -> bool {
    true
}
fn default_speed() -> f64 {
    1.0
}

impl MonitorConfigEntry {
    pub fn new(screen: usize, screen_name: Option<String>, video_path: impl Into<String>) -> Self {
        Self {
            enabled: true,
            screen,
            screen_name,
            video_path: Some(video_path.into()),
            volume: 0,
            pause_on_max: false,
            paused: false,
            speed: 1.0,
        }
    }

    fn normalized(mut self) -> Self {
        self.volume = common::clamp_volume(self.volume);
        self.speed = common::clamp_rate(self.speed);
        self
    }
}

type Document = Map<String, Value>;

/// Handle on the JSON store file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `~/.config/loopwall/monitors.json`
    pub fn default_path() -> Result<PathBuf> {
        Ok(dirs::config_dir()
            .context("Failed to get config directory")?
            .join("loopwall")
            .join("monitors.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed entry. A missing or unreadable file reads as empty.
    pub fn load(&self) -> Vec<MonitorConfigEntry> {
        parse_entries(&self.read_document())
            .into_iter()
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Entry for monitor `(screen, name)`, if any.
    pub fn find(&self, screen: usize, name: Option<&str>) -> Option<MonitorConfigEntry> {
        let mut entries = parse_entries(&self.read_document());
        locate(&entries, screen, name).map(|i| entries.swap_remove(i).1)
    }

    /// Insert or replace the entry for the monitor the new entry describes.
    ///
    /// Keys this service does not know about, at the top level and inside
    /// the matched entry, are written back untouched. Returns `false` (and
    /// does not touch the file) when the stored entry is already identical.
    pub fn upsert(&self, entry: MonitorConfigEntry) -> Result<bool> {
        let entry = entry.normalized();
        let mut doc = self.read_document();
        let entries = parse_entries(&doc);
        let found = locate(&entries, entry.screen, entry.screen_name.as_deref());
        if let Some(i) = found
            && entries[i].1 == entry
        {
            return Ok(false);
        }

        let value = serde_json::to_value(&entry).context("Failed to serialize monitor entry")?;
        let monitors = monitors_mut(&mut doc)?;
        match found {
            Some(i) => merge_into(&mut monitors[entries[i].0], value),
            None => monitors.push(value),
        }

        self.write_document(doc)?;
        Ok(true)
    }

    /// Mark the entry for `(screen, name)` disabled. Entries are never removed.
    pub fn disable(&self, screen: usize, name: Option<&str>) -> Result<bool> {
        let mut doc = self.read_document();
        let entries = parse_entries(&doc);
        let Some(i) = locate(&entries, screen, name) else {
            return Ok(false);
        };
        let (raw, entry) = &entries[i];
        if !entry.enabled {
            return Ok(false);
        }

        let disabled = MonitorConfigEntry {
            enabled: false,
            ..entry.clone()
        };
        let value = serde_json::to_value(&disabled).context("Failed to serialize monitor entry")?;
        merge_into(&mut monitors_mut(&mut doc)?[*raw], value);
        self.write_document(doc)?;
        Ok(true)
    }

    /// The whole document. Missing, unreadable and malformed files read as
    /// an empty one.
    fn read_document(&self) -> Document {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Document::new(),
            Err(e) => {
                log::warn!("Failed to read {}: {}", self.path.display(), e);
                return Document::new();
            }
        };

        match serde_json::from_str::<Value>(&contents) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => {
                log::warn!("Ignoring store {}: not a JSON object", self.path.display());
                Document::new()
            }
            Err(e) => {
                log::warn!("Ignoring malformed store {}: {}", self.path.display(), e);
                Document::new()
            }
        }
    }

    /// Atomically replace the file contents.
    fn write_document(&self, mut doc: Document) -> Result<()> {
        let dir = self
            .path
            .parent()
            .context("Store path has no parent directory")?;
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        doc.entry("version").or_insert(Value::from(STORE_VERSION));

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &doc).context("Failed to serialize store")?;
        tmp.write_all(b"\n")?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

/// Well-formed entries with their position in the `monitors` array.
fn parse_entries(doc: &Document) -> Vec<(usize, MonitorConfigEntry)> {
    let Some(Value::Array(monitors)) = doc.get("monitors") else {
        return Vec::new();
    };
    monitors
        .iter()
        .enumerate()
        .filter_map(|(i, raw)| match MonitorConfigEntry::deserialize(raw) {
            Ok(entry) => Some((i, entry.normalized())),
            Err(e) => {
                log::warn!("Skipping malformed monitor entry: {}", e);
                None
            }
        })
        .collect()
}

fn monitors_mut(doc: &mut Document) -> Result<&mut Vec<Value>> {
    let slot = doc
        .entry("monitors")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        log::warn!("Replacing non-list monitors value in store");
        *slot = Value::Array(Vec::new());
    }
    slot.as_array_mut().context("Store monitors is not a list")
}

/// Overlay `value`'s keys onto `target`, keeping keys only `target` has.
fn merge_into(target: &mut Value, value: Value) {
    match (target, value) {
        (Value::Object(fields), Value::Object(update)) => fields.extend(update),
        (target, value) => *target = value,
    }
}

/// Name match first, then an unnamed entry on the same index. Returns a
/// position in `entries`.
fn locate(
    entries: &[(usize, MonitorConfigEntry)],
    screen: usize,
    name: Option<&str>,
) -> Option<usize> {
    if let Some(name) = name
        && let Some(i) = entries
            .iter()
            .position(|(_, e)| e.screen_name.as_deref() == Some(name))
    {
        return Some(i);
    }
    entries
        .iter()
        .position(|(_, e)| e.screen_name.is_none() && e.screen == screen)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::new(dir.path().join("loopwall").join("monitors.json"))
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(store_in(&dir).load().is_empty());
    }

    #[test]
    fn test_upsert_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        let entry = MonitorConfigEntry::new(0, Some("DP-1".to_string()), "/v/a.mp4");
        assert!(store.upsert(entry.clone()).unwrap());

        let loaded = store.load();
        assert_eq!(loaded, vec![entry]);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["monitors"][0]["screen_name"], "DP-1");
    }

    #[test]
    fn test_upsert_identical_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let entry = MonitorConfigEntry::new(1, None, "/v/b.mp4");

        assert!(store.upsert(entry.clone()).unwrap());
        let before = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        assert!(!store.upsert(entry).unwrap());
        let after = std::fs::metadata(store.path()).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn test_upsert_matches_by_name_across_renumbering() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .upsert(MonitorConfigEntry::new(1, Some("HDMI-1".to_string()), "/v/a.mp4"))
            .unwrap();

        let moved = MonitorConfigEntry::new(0, Some("HDMI-1".to_string()), "/v/c.mp4");
        store.upsert(moved.clone()).unwrap();

        assert_eq!(store.load(), vec![moved]);
    }

    #[test]
    fn test_upsert_names_an_unnamed_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.upsert(MonitorConfigEntry::new(0, None, "/v/a.mp4")).unwrap();
        store
            .upsert(MonitorConfigEntry::new(0, Some("eDP-1".to_string()), "/v/a.mp4"))
            .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].screen_name.as_deref(), Some("eDP-1"));
    }

    #[test]
    fn test_disable_keeps_entry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store
            .upsert(MonitorConfigEntry::new(1, Some("DP-2".to_string()), "/v/a.mp4"))
            .unwrap();

        assert!(store.disable(1, Some("DP-2")).unwrap());
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert!(!loaded[0].enabled);

        assert!(!store.disable(1, Some("DP-2")).unwrap());
        assert!(!store.disable(5, None).unwrap());
    }

    #[test]
    fn test_tolerant_parsing_and_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"version":1,"monitors":[
                {"screen":2,"video_path":"/v/a.mp4","speed":9.0,"volume":300},
                "garbage",
                {"screen":"not-a-number"}
            ]}"#,
        )
        .unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        let entry = &loaded[0];
        assert!(entry.enabled);
        assert_eq!(entry.screen, 2);
        assert_eq!(entry.screen_name, None);
        assert_eq!(entry.volume, 100);
        assert_eq!(entry.speed, common::HARD_MAX_RATE);
        assert!(!entry.paused);
    }

    #[test]
    fn test_writes_keep_foreign_keys_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(
            store.path(),
            r#"{"version":1,"theme":"dark","wallpapers":["/v/a.mp4"],"monitors":[
                {"screen":0,"screen_name":"DP-1","video_path":"/v/a.mp4","thumbnail":"/t.png"},
                {"screen":"not-a-number","note":"hand edited"}
            ]}"#,
        )
        .unwrap();

        let replaced = MonitorConfigEntry::new(0, Some("DP-1".to_string()), "/v/b.mp4");
        assert!(store.upsert(replaced.clone()).unwrap());
        assert!(store.upsert(MonitorConfigEntry::new(1, None, "/v/c.mp4")).unwrap());
        assert!(store.disable(0, Some("DP-1")).unwrap());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["wallpapers"][0], "/v/a.mp4");
        let monitors = raw["monitors"].as_array().unwrap();
        assert_eq!(monitors.len(), 3);
        assert_eq!(monitors[0]["video_path"], "/v/b.mp4");
        assert_eq!(monitors[0]["thumbnail"], "/t.png");
        assert_eq!(monitors[0]["enabled"], false);
        assert_eq!(monitors[1]["note"], "hand edited");
        assert_eq!(monitors[2]["video_path"], "/v/c.mp4");

        let loaded = store.load();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].video_path.as_deref(), Some("/v/b.mp4"));
    }

    #[test]
    fn test_malformed_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());
    }
}
