use blocktree::{IndexConfig, IndexError, IndexManager, MAX_KEYS};
use tempfile::TempDir;

fn manager_with_file(temp: &TempDir, name: &str) -> IndexManager {
    let mut manager = IndexManager::new(IndexConfig::for_testing());
    manager.create(temp.path().join(name)).unwrap();
    manager
}

#[test]
fn three_inserts_print_in_key_order() {
    let temp = TempDir::new().unwrap();
    let mut manager = manager_with_file(&temp, "t.idx");

    manager.insert(5, 50).unwrap();
    manager.insert(3, 30).unwrap();
    manager.insert(8, 80).unwrap();

    let mut out = Vec::new();
    manager.print(&mut out).unwrap();
    assert_eq!(String::from_utf8(out).unwrap(), "3,30\n5,50\n8,80\n");
}

#[test]
fn twenty_five_sequential_keys_split_root_once() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("seq.idx");
    let mut manager = IndexManager::new(IndexConfig::for_testing());
    manager.create(&path).unwrap();

    for key in 1..=25u64 {
        manager.insert(key, key * 10).unwrap();
    }
    manager.check().unwrap();

    let stats = manager.stats().unwrap();
    assert_eq!(stats.height, 2);
    assert_eq!(stats.internal_nodes, 1);
    assert_eq!(stats.leaf_nodes, 2);
    // two leaves plus one root: exactly one split happened
    assert_eq!(stats.allocated_blocks, 3);
    manager.close().unwrap();

    let store = blocktree::NodeStore::open(&path, &IndexConfig::default()).unwrap();
    let root = store.read(store.root_id()).unwrap();
    assert_eq!(root.num_keys(), 1);
    assert_eq!(root.children.len(), 2);

    let leaf_keys: usize = root
        .children
        .iter()
        .map(|&id| store.read(id).unwrap().num_keys())
        .sum();
    assert_eq!(leaf_keys, 24);
    assert!(root.children.iter().all(|&id| store.read(id).unwrap().num_keys() <= MAX_KEYS));
}

#[test]
fn load_skips_one_malformed_line() {
    let temp = TempDir::new().unwrap();
    let mut manager = manager_with_file(&temp, "load.idx");

    let input = temp.path().join("pairs.csv");
    std::fs::write(&input, "abc,5\n10,100\n20,200\n").unwrap();

    let report = manager.load(&input).unwrap();
    assert_eq!(report.inserted, 2);
    assert_eq!(report.malformed.len(), 1);
    assert_eq!(report.malformed[0].content, "abc,5");

    assert_eq!(manager.search(10).unwrap(), 100);
    assert_eq!(manager.search(20).unwrap(), 200);
    assert_eq!(manager.entries().unwrap().count(), 2);
}

#[test]
fn create_refuses_existing_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("exists.idx");
    std::fs::write(&path, b"precious data").unwrap();

    let mut manager = IndexManager::new(IndexConfig::for_testing());
    assert!(matches!(manager.create(&path), Err(IndexError::FileAlreadyExists(_))));
    assert_eq!(std::fs::read(&path).unwrap(), b"precious data");
}

#[test]
fn open_rejects_foreign_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("foreign.idx");
    let mut bytes = vec![0u8; 1024];
    bytes[..8].copy_from_slice(b"4337PRJ4");
    std::fs::write(&path, &bytes).unwrap();

    let mut manager = IndexManager::default();
    assert!(matches!(manager.open(&path), Err(IndexError::InvalidFormat(_))));
    assert!(!manager.is_open());
    assert!(matches!(manager.insert(1, 1), Err(IndexError::NoFileOpen)));
}

#[test]
fn index_survives_reopen_with_deep_tree() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("deep.idx");

    {
        let mut manager = IndexManager::new(IndexConfig::for_testing());
        manager.create(&path).unwrap();
        for key in 0..5000u64 {
            manager.insert(key.wrapping_mul(0x9E37_79B9_7F4A_7C15), key).unwrap();
        }
        manager.close().unwrap();
    }

    let mut manager = IndexManager::default();
    manager.open(&path).unwrap();
    manager.check().unwrap();
    assert!(manager.stats().unwrap().height >= 3);
    for key in (0..5000u64).step_by(97) {
        assert_eq!(manager.search(key.wrapping_mul(0x9E37_79B9_7F4A_7C15)).unwrap(), key);
    }

    let keys: Vec<u64> = manager.entries().unwrap().map(|e| e.unwrap().0).collect();
    assert_eq!(keys.len(), 5000);
    assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
}
