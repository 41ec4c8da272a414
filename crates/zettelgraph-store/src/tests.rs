//! End-to-end tests for the vault

use super::*;
use std::fs;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

/// Helper to create a vault over the given files
fn test_vault(files: &[(&str, &str)]) -> (Vault, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (rel, contents) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
    let vault = Vault::open(dir.path(), VaultConfig::default()).unwrap();
    (vault, dir)
}

fn key(vault: &Vault, rel: &str) -> StableId {
    vault
        .snapshot()
        .find_by_path(rel)
        .cloned()
        .unwrap_or_else(|| panic!("{rel} not in graph"))
}

fn read(dir: &TempDir, rel: &str) -> String {
    fs::read_to_string(dir.path().join(rel)).unwrap()
}

const LINKING: &str = "Here's a link to [[01a Test Note]] and [[01a Test Note|with alt text]]";

// ============================================================================
// Rename
// ============================================================================

#[test]
fn test_rename_rewrites_references() {
    let (vault, dir) = test_vault(&[
        ("01 Root.md", "root"),
        ("01a Test Note.md", "body"),
        ("other.md", LINKING),
        ("notes/list.txt", "- [[01a]]\n- [[01a Test Note]]\n"),
        ("picture.jpg", LINKING),
    ]);
    let before = key(&vault, "01a Test Note.md");

    let outcome = vault
        .rename(Path::new("01a Test Note.md"), Path::new("01a New Name.md"))
        .unwrap();

    assert_eq!(
        read(&dir, "other.md"),
        "Here's a link to [[01a New Name]] and [[01a New Name|with alt text]]"
    );
    assert_eq!(read(&dir, "notes/list.txt"), "- [[01a]]\n- [[01a New Name]]\n");
    assert_eq!(read(&dir, "picture.jpg"), LINKING, "binary files are never rewritten");

    let mut changed = outcome.changed_files.clone();
    changed.sort();
    assert_eq!(
        changed,
        vec![dir.path().join("notes/list.txt"), dir.path().join("other.md")]
    );
    assert!(outcome.is_clean());

    let graph = vault.snapshot();
    assert_eq!(graph.find_by_path("01a New Name.md"), Some(&before));
    assert_eq!(graph.node(&before).unwrap().name(), "New Name");
    assert_eq!(graph.parent(&before), Some(&key(&vault, "01 Root.md")));
}

#[test]
fn test_rename_errors() {
    let (vault, dir) = test_vault(&[("01 A.md", "a"), ("02 B.md", "b")]);

    assert!(matches!(
        vault.rename(Path::new("01 A.md"), Path::new("02 B.md")),
        Err(VaultError::RenameConflict(_))
    ));
    assert!(matches!(
        vault.rename(Path::new("missing.md"), Path::new("x.md")),
        Err(VaultError::NotFound(_))
    ));
    assert!(matches!(
        vault.rename(Path::new("01 A.md"), Path::new("/elsewhere/01 A.md")),
        Err(VaultError::OutsideRoot(_))
    ));
    assert_eq!(read(&dir, "01 A.md"), "a");
    assert_eq!(read(&dir, "02 B.md"), "b");
}

#[test]
fn test_rename_to_taken_id_is_rejected() {
    let (vault, dir) = test_vault(&[
        ("01 Root.md", "r"),
        ("01a Existing.md", "e"),
        ("01b Other.md", "o"),
        ("ref.md", "[[01b]]"),
    ]);
    let before = vault.snapshot();

    assert!(matches!(
        vault.rename(Path::new("01b Other.md"), Path::new("01a Other.md")),
        Err(VaultError::RenameConflict(path)) if path == dir.path().join("01a Existing.md")
    ));
    assert!(dir.path().join("01b Other.md").exists());
    assert!(!dir.path().join("01a Other.md").exists());
    assert_eq!(read(&dir, "ref.md"), "[[01b]]");
    assert_eq!(vault.snapshot(), before);

    // Keeping the ID while changing the name is still a plain rename.
    vault
        .rename(Path::new("01b Other.md"), Path::new("01b Renamed.md"))
        .unwrap();
    assert_eq!(
        vault.snapshot().folgezettel_ids().filter(|id| *id == "01a").count(),
        1
    );
}

#[test]
fn test_rename_to_unsupported_extension_drops_node() {
    let (vault, dir) = test_vault(&[("01 Note.md", "x"), ("other.md", "[[01 Note]]")]);

    let outcome = vault
        .rename(Path::new("01 Note.md"), Path::new("01 Note.jpg"))
        .unwrap();

    assert!(outcome.changed_files.is_empty());
    assert_eq!(read(&dir, "other.md"), "[[01 Note]]");
    assert_eq!(vault.snapshot().len(), 1);
    assert_eq!(outcome.renamed[0].stable_id, None);
}

#[test]
fn test_directory_rename_moves_contents() {
    let (vault, dir) = test_vault(&[
        ("Regular Folder/02 Inside Folder.md", "inside"),
        ("Regular Folder/Sub/normal_file.txt", "plain"),
    ]);
    let inside = key(&vault, "Regular Folder/02 Inside Folder.md");

    vault
        .rename(Path::new("Regular Folder"), Path::new("Renamed"))
        .unwrap();

    let graph = vault.snapshot();
    assert!(graph.find_by_path("Renamed/Sub/normal_file.txt").is_some());
    assert_eq!(
        vault.resolve_path(&inside).unwrap(),
        dir.path().join("Renamed/02 Inside Folder.md")
    );
    let folder = key(&vault, "Renamed");
    assert_eq!(graph.parent(&inside), Some(&folder));
}

#[test]
fn test_unreadable_reference_becomes_warning() {
    let (vault, dir) = test_vault(&[("01 Note.md", "x"), ("good.md", "[[01 Note]]")]);
    let mut bad = b"[[01 Note]] ".to_vec();
    bad.extend_from_slice(&[0xff, 0xfe]);
    fs::write(dir.path().join("bad.md"), &bad).unwrap();

    let outcome = vault
        .rename(Path::new("01 Note.md"), Path::new("01 Renamed.md"))
        .unwrap();

    assert_eq!(read(&dir, "good.md"), "[[01 Renamed]]");
    assert_eq!(outcome.changed_files, vec![dir.path().join("good.md")]);
    assert_eq!(outcome.warnings.len(), 1);
    assert!(matches!(
        outcome.warnings[0],
        VaultError::LinkRewriteFailure { .. }
    ));
    assert!(dir.path().join("01 Renamed.md").exists());
}

// ============================================================================
// Move
// ============================================================================

#[test]
fn test_move_into_id_target_allocates_next_child() {
    let (vault, dir) = test_vault(&[
        ("target/01 Target.md", "t"),
        ("target/01a One.md", "1"),
        ("target/01b Two.md", "2"),
        ("inbox/New Idea.md", "idea"),
        ("index.md", "[[New Idea]] and [[New Idea|the idea]]"),
    ]);
    let target = key(&vault, "target/01 Target.md");
    let source = key(&vault, "inbox/New Idea.md");

    let outcome = vault.move_nodes(&[source.clone()], &target).unwrap();

    assert!(dir.path().join("target/01c New Idea.md").exists());
    assert!(!dir.path().join("inbox/New Idea.md").exists());
    assert_eq!(
        read(&dir, "index.md"),
        "[[01c New Idea]] and [[01c New Idea|the idea]]"
    );
    assert_eq!(outcome.renamed.len(), 1);
    assert_eq!(outcome.renamed[0].folgezettel_id.as_deref(), Some("01c"));
    assert_eq!(outcome.renamed[0].from, dir.path().join("inbox/New Idea.md"));

    let graph = vault.snapshot();
    assert_eq!(graph.parent(&source), Some(&target));
    assert_eq!(
        graph.node(&source).unwrap().folgezettel_id().unwrap().as_str(),
        "01c"
    );
}

#[test]
fn test_move_batch_allocates_in_input_order() {
    let (vault, dir) = test_vault(&[
        ("01 Root.md", "root"),
        ("Alpha.md", "a"),
        ("Beta.md", "b"),
        ("Gamma.md", "c"),
    ]);
    let root = key(&vault, "01 Root.md");
    let sources = vec![
        key(&vault, "Gamma.md"),
        key(&vault, "Alpha.md"),
        key(&vault, "Beta.md"),
    ];

    let outcome = vault.move_nodes(&sources, &root).unwrap();

    let ids: Vec<_> = outcome
        .renamed
        .iter()
        .map(|r| r.folgezettel_id.clone().unwrap())
        .collect();
    assert_eq!(ids, vec!["01a", "01b", "01c"]);
    assert!(dir.path().join("01a Gamma.md").exists());
    assert!(dir.path().join("01b Alpha.md").exists());
    assert!(dir.path().join("01c Beta.md").exists());

    let graph = vault.snapshot();
    assert_eq!(graph.children(&root).count(), 3);
}

#[test]
fn test_move_into_plain_folder_keeps_name() {
    let (vault, dir) = test_vault(&[("Folder/keep.txt", "k"), ("loose.md", "l")]);
    let folder = key(&vault, "Folder");
    let loose = key(&vault, "loose.md");

    let outcome = vault.move_nodes(&[loose.clone()], &folder).unwrap();

    assert!(dir.path().join("Folder/loose.md").exists());
    assert!(outcome.changed_files.is_empty());
    let graph = vault.snapshot();
    assert_eq!(graph.parent(&loose), Some(&folder));
    assert_eq!(graph.node(&loose).unwrap().path(), "Folder");
}

#[test]
fn test_failed_move_rolls_back_batch() {
    let (vault, dir) = test_vault(&[
        ("Folder/taken.md", "occupant"),
        ("first.md", "1"),
        ("taken.md", "2"),
    ]);
    let folder = key(&vault, "Folder");
    let before = vault.snapshot();

    let result = vault.move_nodes(
        &[key(&vault, "first.md"), key(&vault, "taken.md")],
        &folder,
    );

    assert!(matches!(result, Err(VaultError::RenameConflict(_))));
    assert_eq!(read(&dir, "first.md"), "1");
    assert_eq!(read(&dir, "taken.md"), "2");
    assert_eq!(read(&dir, "Folder/taken.md"), "occupant");
    assert!(!dir.path().join("Folder/first.md").exists());
    assert_eq!(vault.snapshot(), before);
    assert_eq!(vault.atomic_ops().locks().held_count(), 0);
}

#[test]
fn test_move_errors() {
    let (vault, _dir) = test_vault(&[("Folder/a.md", "a"), ("b.md", "b"), ("05a01 Orphan.md", "o")]);
    let folder = key(&vault, "Folder");
    let b = key(&vault, "b.md");

    assert!(matches!(
        vault.move_nodes(&[b.clone()], &StableId::from("nope")),
        Err(VaultError::TargetNotFound(_))
    ));
    assert!(matches!(
        vault.move_nodes(&[StableId::from("nope")], &folder),
        Err(VaultError::SourceNotFound(_))
    ));
    assert!(matches!(
        vault.move_nodes(&[StableId::surrogate_for("05a")], &folder),
        Err(VaultError::SourceNotFound(_))
    ));
    assert!(matches!(
        vault.move_nodes(&[folder.clone()], &key(&vault, "Folder/a.md")),
        Err(VaultError::MoveIntoSelf(_))
    ));
}

// ============================================================================
// Create / delete / renumber
// ============================================================================

#[test]
fn test_create_under_id_and_folder() {
    let (vault, dir) = test_vault(&[("01 Root.md", "r"), ("01a Child.md", "c"), ("Folder/x.md", "x")]);
    let root = key(&vault, "01 Root.md");

    let created = vault.create(&root, "Fresh", "md", "# Fresh\n").unwrap();
    assert_eq!(created.folgezettel_id.as_deref(), Some("01b"));
    assert_eq!(created.path, dir.path().join("01b Fresh.md"));
    assert_eq!(read(&dir, "01b Fresh.md"), "# Fresh\n");
    let graph = vault.snapshot();
    assert_eq!(graph.parent(&created.stable_id), Some(&root));

    let folder = key(&vault, "Folder");
    let plain = vault.create(&folder, "Plain", ".txt", "").unwrap();
    assert_eq!(plain.path, dir.path().join("Folder/Plain.txt"));
    assert_eq!(plain.folgezettel_id, None);
    assert_eq!(vault.snapshot().parent(&plain.stable_id), Some(&folder));
}

#[test]
fn test_create_errors() {
    let (vault, _dir) = test_vault(&[("01 Root.md", "r"), ("01a Taken.md", "t")]);
    let root = key(&vault, "01 Root.md");

    assert!(matches!(
        vault.create(&root, "Pic", "jpg", ""),
        Err(VaultError::UnsupportedExtension(_))
    ));
    assert!(matches!(
        vault.create(&root, "a/b", "md", ""),
        Err(VaultError::InvalidName(_))
    ));
    assert!(matches!(
        vault.create(&StableId::from("nope"), "X", "md", ""),
        Err(VaultError::TargetNotFound(_))
    ));
}

#[test]
fn test_delete_leaves_surrogate_for_children() {
    let (vault, dir) = test_vault(&[("01 Root.md", "r"), ("01a Child.md", "c")]);
    let root = key(&vault, "01 Root.md");
    let child = key(&vault, "01a Child.md");

    let outcome = vault.delete(&root).unwrap();

    assert_eq!(outcome.removed, vec![dir.path().join("01 Root.md")]);
    assert!(!dir.path().join("01 Root.md").exists());
    let graph = vault.snapshot();
    assert_eq!(graph.parent(&child), Some(&StableId::surrogate_for("01")));
}

#[test]
fn test_delete_non_empty_directory_fails() {
    let (vault, dir) = test_vault(&[("Folder/a.md", "a")]);
    let folder = key(&vault, "Folder");

    let err = vault.delete(&folder).unwrap_err();
    assert!(err.is_retryable());
    assert!(dir.path().join("Folder/a.md").exists());
    assert!(vault.snapshot().contains(&folder));
}

#[test]
fn test_renumber_cascades_to_descendants() {
    let (vault, dir) = test_vault(&[
        ("01 Root.md", "r"),
        ("01a Child.md", "c"),
        ("01a01 Grand.md", "g"),
        ("other.md", "[[01a Child]] [[01a01 Grand|g]] [[01a]]"),
    ]);
    let child = key(&vault, "01a Child.md");
    let grand = key(&vault, "01a01 Grand.md");

    let outcome = vault.renumber(&child, "01c").unwrap();

    assert!(dir.path().join("01c Child.md").exists());
    assert!(dir.path().join("01c01 Grand.md").exists());
    assert_eq!(read(&dir, "other.md"), "[[01c Child]] [[01c01 Grand|g]] [[01c]]");
    assert_eq!(outcome.renamed.len(), 2);
    assert_eq!(outcome.changed_files, vec![dir.path().join("other.md")]);

    let graph = vault.snapshot();
    assert_eq!(graph.parent(&grand), Some(&child));
    assert_eq!(graph.parent(&child), Some(&key(&vault, "01 Root.md")));
}

#[test]
fn test_move_plan_locks_final_names_and_references() {
    let (vault, dir) = test_vault(&[
        ("01 Target.md", "t"),
        ("Inbox/idea.md", "i"),
        ("refs/list.md", "[[idea]]"),
        ("refs/unrelated.md", "nothing"),
    ]);
    let graph = vault.snapshot();
    let engine = mutation::Engine {
        root: vault.root(),
        config: vault.config(),
        links: vault.links(),
    };

    let plan = engine
        .plan_move(&graph, &[key(&vault, "Inbox/idea.md")], &key(&vault, "01 Target.md"))
        .unwrap();
    let locked = plan.lock_set();

    assert!(locked.contains(&dir.path().join("01a idea.md")));
    assert!(locked.contains(&dir.path().join("refs/list.md")));
    assert!(!locked.contains(&dir.path().join("refs/unrelated.md")));
}

#[test]
fn test_renumber_errors() {
    let (vault, dir) = test_vault(&[("01 Root.md", "r"), ("02 Other.md", "o"), ("plain.md", "p")]);
    let root = key(&vault, "01 Root.md");

    assert!(matches!(
        vault.renumber(&root, "02"),
        Err(VaultError::RenameConflict(_))
    ));
    assert!(matches!(
        vault.renumber(&root, "1"),
        Err(VaultError::InvalidId(_))
    ));
    assert!(matches!(
        vault.renumber(&key(&vault, "plain.md"), "03"),
        Err(VaultError::MissingId(_))
    ));
    assert!(dir.path().join("01 Root.md").exists());
}

// ============================================================================
// Queries
// ============================================================================

#[test]
fn test_stateless_queries() {
    assert!(validate_id("08r60e!"));
    assert!(!validate_id("03e@07"));
    assert_eq!(parent_id("01a01b"), "01a01");
    assert_eq!(parent_id("01"), "");

    let (vault, dir) = test_vault(&[("01 Root.md", "r"), ("01a Child.md", "c"), ("Folder/x.md", "x")]);
    let graph = vault.snapshot();
    let root = key(&vault, "01 Root.md");

    assert_eq!(next_child_id(&graph, &root).unwrap(), "01b");
    assert_eq!(vault.next_child_id(&key(&vault, "01a Child.md")).unwrap(), "01a01");
    assert!(matches!(
        next_child_id(&graph, &key(&vault, "Folder")),
        Err(VaultError::MissingId(_))
    ));
    assert_eq!(
        resolve_path(dir.path(), &graph, &root).unwrap(),
        dir.path().join("01 Root.md")
    );
    assert!(matches!(
        vault.resolve_path(&StableId::from("missing")),
        Err(VaultError::NotFound(_))
    ));
}

#[test]
fn test_rebuild_picks_up_external_changes() {
    let (vault, dir) = test_vault(&[("01 Root.md", "r")]);
    fs::write(dir.path().join("01a Added.md"), "a").unwrap();
    assert_eq!(vault.snapshot().len(), 1);

    let graph = vault.rebuild().unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(vault.snapshot(), graph);
}

#[test]
fn test_config_from_json() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vault.json");
    fs::write(&path, r#"{ "rewritable_extensions": ["md"], "watch_debounce_ms": 10 }"#).unwrap();

    let config = VaultConfig::from_json_file(&path).unwrap();
    assert_eq!(config.rewritable_extensions, vec!["md".to_string()]);
    assert_eq!(config.watch_debounce_ms, 10);
    assert_eq!(config.supported_extensions, VaultConfig::default().supported_extensions);
    assert!(!config.is_rewritable(Path::new("a.txt")));

    fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        VaultConfig::from_json_file(&path),
        Err(VaultError::InvalidConfig { .. })
    ));
}

// ============================================================================
// Concurrency
// ============================================================================

#[test]
fn test_concurrent_creates_get_distinct_ids() {
    let (vault, _dir) = test_vault(&[("01 Root.md", "r")]);
    let vault = Arc::new(vault);
    let root = key(&vault, "01 Root.md");

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let vault = Arc::clone(&vault);
            let root = root.clone();
            thread::spawn(move || {
                (0..5)
                    .map(|i| {
                        vault
                            .create(&root, &format!("Note {t}-{i}"), "md", "")
                            .unwrap()
                            .folgezettel_id
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut ids: Vec<String> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 20);
    assert_eq!(vault.snapshot().children(&root).count(), 20);
}

#[test]
fn test_concurrent_renames_and_reads() {
    let files: Vec<(String, String)> = (1..=8)
        .map(|i| (format!("0{i} Note.md"), format!("note {i}")))
        .collect();
    let borrowed: Vec<(&str, &str)> = files.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
    let (vault, dir) = test_vault(&borrowed);
    let vault = Arc::new(vault);

    let handles: Vec<_> = (1..=8)
        .map(|i| {
            let vault = Arc::clone(&vault);
            thread::spawn(move || {
                let old = format!("0{i} Note.md");
                let new = format!("0{i} Renamed.md");
                vault.rename(Path::new(&old), Path::new(&new)).unwrap();
                vault.snapshot().len()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 8);
    }
    for i in 1..=8 {
        assert!(dir.path().join(format!("0{i} Renamed.md")).exists());
    }
    assert_eq!(vault.snapshot().len(), 8);
}
