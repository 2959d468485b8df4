mod support;

use std::sync::Arc;

use stackyard::{JsonFileStore, NewStack, Orchestrator, StackStatus, Store};
use support::{test_config, FakeRunner, FixedReachability};

fn orchestrator(dir: &std::path::Path) -> Orchestrator {
    let cfg = test_config(dir);
    let store: Arc<dyn Store> = Arc::new(JsonFileStore::open(cfg.store_path()));
    Orchestrator::new(
        cfg,
        store,
        Arc::new(FakeRunner::healthy()),
        Arc::new(FixedReachability(None)),
    )
}

#[test]
fn test_stacks_survive_a_new_process() {
    let td = tempfile::tempdir().unwrap();
    let created = orchestrator(td.path())
        .create_stack(
            NewStack {
                name: "Persisted".into(),
                description: String::new(),
                owner_id: "local".into(),
            },
            1_700_000_000_000,
        )
        .unwrap();

    let again = orchestrator(td.path());
    let found = again.find(&created.stack.id).unwrap();
    assert_eq!(found.slug, created.stack.slug);
    assert_eq!(found.status, StackStatus::Provisioned);
    let entries = again.config_entries(&found.slug).unwrap();
    assert!(entries.iter().any(|e| e.key == "JWT_SECRET" && e.value.len() == 64));

    // ports recorded in the store keep a second stack off the same block
    let second = again
        .create_stack(
            NewStack {
                name: "Neighbour".into(),
                description: String::new(),
                owner_id: "local".into(),
            },
            1_700_000_010_000,
        )
        .unwrap();
    assert_ne!(second.allocation.ports.base, created.allocation.ports.base);

    again.delete(&found.slug).unwrap();
    assert_eq!(orchestrator(td.path()).list_stacks(None).unwrap().len(), 1);
}

#[test]
fn test_concurrent_creators_get_distinct_ports() {
    let td = tempfile::tempdir().unwrap();
    let creators: Vec<_> = ["Alpha", "Beta", "Gamma"]
        .into_iter()
        .map(|name| {
            let dir = td.path().to_path_buf();
            std::thread::spawn(move || {
                orchestrator(&dir)
                    .create_stack(
                        NewStack {
                            name: name.into(),
                            description: String::new(),
                            owner_id: "local".into(),
                        },
                        1_700_000_000_000,
                    )
                    .map(|c| c.allocation.ports.base)
            })
        })
        .collect();
    let mut bases: Vec<u16> = creators
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();
    bases.sort_unstable();
    bases.dedup();
    assert_eq!(bases.len(), 3, "ports shared: {bases:?}");
    assert!(test_config(td.path()).locks_dir().join(".create.lock").exists());
}
