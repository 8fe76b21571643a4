//! Registry commands. Each returns the text to print.

use anyhow::{bail, Result};
use stashkeep_core::{ContainerRecord, RecordSelector, RegistryStore, WorldKey};

pub fn worlds(store: &RegistryStore) -> String {
    store
        .worlds()
        .iter()
        .map(|(key, count)| format!("{}\t{} records", key, count))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn list(store: &RegistryStore, world: &WorldKey, include_hidden: bool) -> String {
    store
        .list(world, include_hidden)
        .iter()
        .map(row)
        .collect::<Vec<_>>()
        .join("\n")
}

fn row(record: &ContainerRecord) -> String {
    let mut line = format!("{}\t{}\t{}", record.label, record.kind, record.primary);
    if record.hidden {
        line.push_str("\thidden");
    }
    if let Some(notes) = &record.notes {
        line.push('\t');
        line.push_str(notes);
    }
    line
}

pub fn show(store: &RegistryStore, world: &WorldKey, label: &str) -> Result<String> {
    let Some(record) = store.find_label_any(world, label) else {
        bail!("No container labeled '{}' in {}", label, world);
    };
    Ok(serde_json::to_string_pretty(&record)?)
}

pub fn forget(store: &RegistryStore, world: &WorldKey, label: &str) -> Result<String> {
    let selector = RecordSelector::Label(label.to_string());
    match store.mark_destroyed(world, &selector) {
        Some(record) => Ok(format!("Forgot '{}' at {}", record.label, record.primary)),
        None => bail!("No container labeled '{}' in {}", label, world),
    }
}

pub fn purge(store: &RegistryStore, world: &WorldKey) -> String {
    let purged = store.purge_destroyed(world);
    format!("Purged {} destroyed records from {}", purged, world)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stashkeep_core::{ContainerKind, Coord, RecordDraft};
    use tempfile::TempDir;

    async fn store_with_records() -> (TempDir, RegistryStore, WorldKey) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = RegistryStore::open(temp_dir.path().join("containers.json"));
        store.load().await;

        let world = WorldKey::new("localhost", 25565, "overworld");
        store
            .upsert(
                &world,
                RecordDraft::new("Iron", ContainerKind::Barrel, vec![Coord::new(1, 64, 1)])
                    .with_notes("ingots only"),
            )
            .unwrap();
        store
            .upsert(
                &world,
                RecordDraft::new("Spare", ContainerKind::Single, vec![Coord::new(5, 64, 1)])
                    .hidden(true),
            )
            .unwrap();
        (temp_dir, store, world)
    }

    #[tokio::test]
    async fn test_list_hides_hidden_unless_asked() {
        let (_dir, store, world) = store_with_records().await;

        let visible = list(&store, &world, false);
        assert_eq!(visible, "Iron\tbarrel\t(1, 64, 1)\tingots only");

        let all = list(&store, &world, true);
        assert_eq!(all.lines().count(), 2);
        assert!(all.contains("Spare\tsingle\t(5, 64, 1)\thidden"));
    }

    #[tokio::test]
    async fn test_forget_then_purge() {
        let (_dir, store, world) = store_with_records().await;

        assert!(forget(&store, &world, "iron").unwrap().starts_with("Forgot 'Iron'"));
        assert!(forget(&store, &world, "missing").is_err());
        assert!(show(&store, &world, "Iron").is_err());

        assert_eq!(
            purge(&store, &world),
            format!("Purged 1 destroyed records from {}", world)
        );
    }

    #[tokio::test]
    async fn test_show_prints_camel_case_json() {
        let (_dir, store, world) = store_with_records().await;
        let json = show(&store, &world, "IRON").unwrap();
        assert!(json.contains("\"worldKey\""));
        assert!(json.contains("\"type\": \"barrel\""));
    }

    #[tokio::test]
    async fn test_worlds_lists_counts() {
        let (_dir, store, world) = store_with_records().await;
        assert_eq!(worlds(&store), format!("{}\t2 records", world));
    }
}
