use arbitrary::{self, Arbitrary, Unstructured};
use rand::{prelude::random, rngs::StdRng, Rng, SeedableRng};

use std::{collections::BTreeMap, convert::TryFrom, fs, sync::Arc};

use super::*;
use crate::{Error, FixedMemory, KeyOrder, MemoryHints, Row};

#[derive(Debug, Arbitrary)]
enum Op {
    Put(u8, u8),
    Replace(u8, u8),
    AddUnique(u8, u8),
    Get(u8),
    Remove(u8),
    Delete(u8),
    RemoveOne,
    Top(u8),
    Random(u8),
    Flush,
}

fn to_key(layout: &RowLayout, k: u8) -> Vec<u8> {
    format!("{:0width$}", k, width = layout.key_len).into_bytes()
}

fn to_row(layout: &RowLayout, k: u8, byte: u8) -> Row {
    Row::new(to_key(layout, k), vec![byte; layout.tail_len])
}

fn unlimited() -> Arc<dyn MemoryHints> {
    Arc::new(FixedMemory::unlimited())
}

fn test_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(name);
    fs::remove_dir_all(&dir).ok();
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn check_rows(table: &Table, model: &BTreeMap<Vec<u8>, Vec<u8>>) {
    assert_eq!(table.size().unwrap(), model.len());
    assert!(table.consistency_check().unwrap());

    let refs: Vec<Row> = model
        .iter()
        .map(|(k, t)| Row::new(k.clone(), t.clone()))
        .collect();
    let rows: Vec<Row> = table.rows(true, None).map(|r| r.unwrap()).collect();
    assert_eq!(rows, refs);

    let keys: Vec<Vec<u8>> = table.keys(false, None).map(|k| k.unwrap()).collect();
    let key_refs: Vec<Vec<u8>> = model.keys().rev().cloned().collect();
    assert_eq!(keys, key_refs);

    let mut rows: Vec<Row> = table.iter().unwrap().map(|r| r.unwrap()).collect();
    rows.sort_by(|a, b| a.as_key().cmp(b.as_key()));
    assert_eq!(rows, refs);
}

#[test]
fn test_table_ops() {
    let seed: u64 = random();
    println!("test_table_ops {}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let dir = test_dir("test_table_ops");
    let loc = dir.join("ops.table");

    let config: Config = {
        let bytes = rng.gen::<[u8; 32]>();
        let mut uns = Unstructured::new(&bytes);
        uns.arbitrary().unwrap()
    };
    let layout = config.layout;
    println!("test_table_ops {:?}", config);

    let registry = Arc::new(Registry::new());
    let table = {
        let (c, r) = (config.clone(), Arc::clone(&registry));
        Table::open_with(loc.as_os_str(), c, unlimited(), r).unwrap()
    };
    assert_eq!(table.uses_tail_cache().unwrap(), config.tail_cache);

    let mut model: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
    for _ in 0..5_000 {
        let op: Op = {
            let bytes = rng.gen::<[u8; 32]>();
            let mut uns = Unstructured::new(&bytes);
            uns.arbitrary().unwrap()
        };
        match op {
            Op::Put(k, byte) => {
                let row = to_row(&layout, k, byte);
                let (key, tail) = row.clone().unwrap();
                let inserted = table.put(row).unwrap();
                assert_eq!(inserted, model.insert(key, tail).is_none());
            }
            Op::Replace(k, byte) => {
                let row = to_row(&layout, k, byte);
                let (key, tail) = row.clone().unwrap();
                let old = table.replace(row).unwrap().map(|r| r.unwrap().1);
                assert_eq!(old, model.insert(key, tail));
            }
            Op::AddUnique(k, _) if model.contains_key(&to_key(&layout, k)) => (),
            Op::AddUnique(k, byte) => {
                let row = to_row(&layout, k, byte);
                let (key, tail) = row.clone().unwrap();
                table.add_unique(row).unwrap();
                model.insert(key, tail);
            }
            Op::Get(k) => {
                let key = to_key(&layout, k);
                let row = table.get(&key).unwrap().map(|r| r.unwrap().1);
                assert_eq!(row, model.get(&key).cloned());
                assert_eq!(table.has(&key).unwrap(), model.contains_key(&key));
            }
            Op::Remove(k) => {
                let key = to_key(&layout, k);
                let row = table.remove(&key).unwrap().map(|r| r.unwrap().1);
                assert_eq!(row, model.remove(&key));
            }
            Op::Delete(k) => {
                let key = to_key(&layout, k);
                assert_eq!(table.delete(&key).unwrap(), model.remove(&key).is_some());
            }
            Op::RemoveOne => match table.remove_one().unwrap() {
                Some(row) => {
                    let (key, tail) = row.unwrap();
                    assert_eq!(model.remove(&key), Some(tail));
                }
                None => assert!(model.is_empty()),
            },
            Op::Top(n) | Op::Random(n) => {
                let rows = match op {
                    Op::Top(_) => table.top(n as usize).unwrap(),
                    _ => table.random(n as usize).unwrap(),
                };
                assert_eq!(rows.len(), std::cmp::min(n as usize, model.len()));
                for row in rows.into_iter() {
                    let (key, tail) = row.unwrap();
                    assert_eq!(model.get(&key), Some(&tail));
                }
            }
            Op::Flush => table.flush().unwrap(),
        }
        assert_eq!(table.size().unwrap(), model.len());
        assert!(table.consistency_check().unwrap());
    }

    check_rows(&table, &model);
    assert_eq!(table.smallest_key().unwrap(), model.keys().next().cloned());
    assert_eq!(table.largest_key().unwrap(), model.keys().next_back().cloned());
    table.close().unwrap();

    let record_size = layout.to_record_size() as u64;
    let len = fs::metadata(&loc).unwrap().len();
    assert_eq!(len, record_size * (model.len() as u64));

    let table = Table::open_with(loc.as_os_str(), config, unlimited(), registry).unwrap();
    check_rows(&table, &model);
    table.close().unwrap();
}

#[test]
fn test_table_scenario() {
    let dir = test_dir("test_table_scenario");
    let loc = dir.join("words.table");
    let config = Config::new(RowLayout::new(4, 4, KeyOrder::Natural));

    let registry = Arc::new(Registry::new());
    let table = {
        let (c, r) = (config.clone(), Arc::clone(&registry));
        Table::open_with(loc.as_os_str(), c, unlimited(), r).unwrap()
    };
    for key in ["aaaa", "bbbb", "cccc"].iter() {
        let row = Row::new(key.as_bytes().to_vec(), b"1111".to_vec());
        assert!(table.put(row).unwrap());
    }
    let row = table.remove(b"bbbb").unwrap().unwrap();
    assert_eq!(row, Row::new(b"bbbb".to_vec(), b"1111".to_vec()));

    let row = table.get(b"cccc").unwrap().unwrap();
    assert_eq!(row, Row::new(b"cccc".to_vec(), b"1111".to_vec()));
    assert_eq!(table.size().unwrap(), 2);
    assert_eq!(table.get(b"bbbb").unwrap(), None);
    table.close().unwrap();

    assert_eq!(fs::metadata(&loc).unwrap().len(), 16);

    let table = Table::open_with(loc.as_os_str(), config, unlimited(), registry).unwrap();
    let rows: Vec<Row> = table.rows(true, None).map(|r| r.unwrap()).collect();
    assert_eq!(
        rows,
        vec![
            Row::new(b"aaaa".to_vec(), b"1111".to_vec()),
            Row::new(b"cccc".to_vec(), b"1111".to_vec()),
        ]
    );
    table.close().unwrap();
}

#[test]
fn test_table_compacting_delete() {
    let dir = test_dir("test_table_compacting_delete");
    let loc = dir.join("compact.table");
    let mut config = Config::new(RowLayout::new(1, 2, KeyOrder::Natural));
    config.set_tail_cache(false).set_buffer_size(0);

    let registry = Arc::new(Registry::new());
    let table = {
        let (c, r) = (config.clone(), Arc::clone(&registry));
        Table::open_with(loc.as_os_str(), c, unlimited(), r).unwrap()
    };
    for key in b"ABCD".iter() {
        table.put(Row::new(vec![*key], vec![*key, b'-'])).unwrap();
    }
    table.remove(b"B").unwrap().unwrap();
    assert_eq!(table.size().unwrap(), 3);
    table.close().unwrap();

    // D moves into the slot freed by B.
    assert_eq!(fs::read(&loc).unwrap(), b"AA-DD-CC-".to_vec());

    let table = Table::open_with(loc.as_os_str(), config, unlimited(), registry).unwrap();
    assert_eq!(table.size().unwrap(), 3);
    for key in b"ACD".iter() {
        let row = table.get(&[*key]).unwrap().unwrap();
        assert_eq!(row.as_tail(), &[*key, b'-']);
    }
    assert_eq!(table.get(b"B").unwrap(), None);
    table.close().unwrap();
}

#[test]
fn test_table_replace_idempotent() {
    let dir = test_dir("test_table_replace_idempotent");
    let loc = dir.join("replace.table");
    let config = Config::new(RowLayout::new(4, 4, KeyOrder::Base64));

    let table = Table::open_with(loc.as_os_str(), config, unlimited(), Registry::global());
    let table = table.unwrap();

    let row = Row::new(b"AbC_".to_vec(), b"tail".to_vec());
    assert_eq!(table.replace(row.clone()).unwrap(), None);
    assert_eq!(table.replace(row.clone()).unwrap(), Some(row.clone()));
    assert_eq!(table.size().unwrap(), 1);
    assert_eq!(table.get(b"AbC_").unwrap(), Some(row));

    let bad = Row::new(b"Ab!_".to_vec(), b"tail".to_vec());
    match table.put(bad) {
        Err(Error::MalformedKey(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    let bad = Row::new(b"AbCd".to_vec(), b"tai".to_vec());
    match table.add_unique(bad) {
        Err(Error::InvalidInput(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert!(table.consistency_check().unwrap());
    table.purge().unwrap();
    assert!(!loc.exists());
}

#[test]
fn test_table_duplicate_repair() {
    let dir = test_dir("test_table_duplicate_repair");
    let loc = dir.join("doubles.table");
    let data = b"aaaa1111bbbb2222aaaa3333cccc4444aaaa5555";
    let layout = RowLayout::new(4, 4, KeyOrder::Natural);
    let registry = Arc::new(Registry::new());

    // repair while opening.
    fs::write(&loc, data.as_ref()).unwrap();
    let table = {
        let r = Arc::clone(&registry);
        Table::open_with(loc.as_os_str(), Config::new(layout), unlimited(), r).unwrap()
    };
    assert_eq!(table.size().unwrap(), 3);
    assert!(table.consistency_check().unwrap());
    let row = table.get(b"aaaa").unwrap().unwrap();
    assert_eq!(row.as_tail(), b"1111");
    assert_eq!(table.get(b"cccc").unwrap().unwrap().as_tail(), b"4444");
    table.close().unwrap();
    assert_eq!(fs::metadata(&loc).unwrap().len(), 24);

    // deferred repair.
    fs::write(&loc, data.as_ref()).unwrap();
    let mut config = Config::new(layout);
    config.set_warm_up(false);
    let table = Table::open_with(loc.as_os_str(), config, unlimited(), registry).unwrap();
    assert_eq!(table.size().unwrap(), 5);
    assert!(table.consistency_check().unwrap());

    let report = table.remove_doubles().unwrap();
    assert_eq!(
        report,
        vec![vec![
            Row::new(b"aaaa".to_vec(), b"3333".to_vec()),
            Row::new(b"aaaa".to_vec(), b"5555".to_vec()),
        ]]
    );
    assert_eq!(table.size().unwrap(), 3);
    assert_eq!(table.get(b"aaaa").unwrap().unwrap().as_tail(), b"1111");
    assert_eq!(table.get(b"bbbb").unwrap().unwrap().as_tail(), b"2222");
    assert_eq!(table.remove_doubles().unwrap(), Vec::<Vec<Row>>::new());

    // duplicates through add_unique.
    let row = Row::new(b"bbbb".to_vec(), b"6666".to_vec());
    table.add_unique(row).unwrap();
    assert_eq!(table.size().unwrap(), 4);
    table.warm_up().unwrap();
    assert_eq!(table.size().unwrap(), 3);
    assert_eq!(table.get(b"bbbb").unwrap().unwrap().as_tail(), b"2222");
    table.close().unwrap();
}

#[test]
fn test_table_malformed_repair() {
    let dir = test_dir("test_table_malformed_repair");
    let loc = dir.join("malformed.table");
    fs::write(&loc, b"AAAA1111!!!!2222BBBB3333CC.C4444".as_ref()).unwrap();

    let layout = RowLayout::new(4, 4, KeyOrder::Base64);
    let registry = Arc::new(Registry::new());
    let table = {
        let r = Arc::clone(&registry);
        Table::open_with(loc.as_os_str(), Config::new(layout), unlimited(), r).unwrap()
    };
    assert_eq!(table.size().unwrap(), 2);
    assert!(table.consistency_check().unwrap());

    let keys: Vec<Vec<u8>> = table.iter().unwrap().map(|r| r.unwrap().unwrap().0).collect();
    assert_eq!(keys.len(), 2);
    assert!(keys.contains(&b"AAAA".to_vec()));
    assert!(keys.contains(&b"BBBB".to_vec()));
    assert_eq!(table.get(b"BBBB").unwrap().unwrap().as_tail(), b"3333");
    table.close().unwrap();

    assert_eq!(fs::metadata(&loc).unwrap().len(), 16);
}

#[test]
fn test_table_ordered_iter() {
    let seed: u64 = random();
    println!("test_table_ordered_iter {}", seed);
    let mut rng = StdRng::seed_from_u64(seed);

    let dir = test_dir("test_table_ordered_iter");
    let loc = dir.join("ordered.table");
    let layout = RowLayout::new(3, 1, KeyOrder::Base64);
    let table = {
        let (config, r) = (Config::new(layout), Arc::new(Registry::new()));
        Table::open_with(loc.as_os_str(), config, unlimited(), r).unwrap()
    };

    let alphabet = layout.order.to_alphabet().unwrap();
    for _ in 0..1000 {
        let key: Vec<u8> = (0..3).map(|_| alphabet[rng.gen_range(0..64)]).collect();
        table.put(Row::new(key, vec![0])).unwrap();
    }

    let order = layout.order;
    let keys: Vec<Vec<u8>> = table.keys(true, None).map(|k| k.unwrap()).collect();
    assert_eq!(keys.len(), table.size().unwrap());
    for w in keys.windows(2) {
        assert_eq!(order.compare(&w[0], &w[1]), std::cmp::Ordering::Less);
    }

    let rows: Vec<Row> = table.rows(false, None).map(|r| r.unwrap()).collect();
    assert_eq!(rows.len(), keys.len());
    for w in rows.windows(2) {
        let (a, b) = (w[0].as_key(), w[1].as_key());
        assert_eq!(order.compare(a, b), std::cmp::Ordering::Greater);
    }

    // range started iteration, inclusive of start key.
    let start = keys[keys.len() / 2].clone();
    let start = Some(start.as_slice());
    let tail: Vec<Vec<u8>> = table.keys(true, start).map(|k| k.unwrap()).collect();
    assert_eq!(tail, keys[keys.len() / 2..].to_vec());
    let head: Vec<Vec<u8>> = table.keys(false, start).map(|k| k.unwrap()).collect();
    let mut refs = keys[..=keys.len() / 2].to_vec();
    refs.reverse();
    assert_eq!(head, refs);

    table.close().unwrap();
}

#[test]
fn test_table_concurrent_modification() {
    let dir = test_dir("test_table_concurrent_modification");
    let loc = dir.join("concurrent.table");
    let table = {
        let config = Config::new(RowLayout::new(4, 4, KeyOrder::Natural));
        Table::open_with(loc.as_os_str(), config, unlimited(), Arc::new(Registry::new()))
            .unwrap()
    };
    for key in ["aaaa", "bbbb", "cccc", "dddd"].iter() {
        table.put(Row::new(key.as_bytes().to_vec(), b"1111".to_vec())).unwrap();
    }

    // updates in place do not disturb the unordered iterator.
    let mut iter = table.iter().unwrap();
    assert!(iter.next().unwrap().is_ok());
    table.put(Row::new(b"aaaa".to_vec(), b"2222".to_vec())).unwrap();
    assert!(iter.next().unwrap().is_ok());
    table.put(Row::new(b"eeee".to_vec(), b"1111".to_vec())).unwrap();
    match iter.next() {
        Some(Err(Error::ConcurrentModification(_, _))) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert!(iter.next().is_none());

    let mut rows = table.rows(true, None);
    assert_eq!(rows.next().unwrap().unwrap().as_key(), b"aaaa");
    table.remove(b"bbbb").unwrap();
    match rows.next() {
        Some(Err(Error::ConcurrentModification(_, _))) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert!(rows.next().is_none());

    table.close().unwrap();
}

#[test]
fn test_table_size_fix() {
    let dir = test_dir("test_table_size_fix");
    let loc = dir.join("broken.table");
    fs::write(&loc, b"aaaa1111bbbb2222cc".as_ref()).unwrap();

    match table_size(loc.as_os_str(), 8, false) {
        Err(Error::CorruptSize(_, _)) => (),
        res => panic!("unexpected {:?}", res),
    }
    assert_eq!(table_size(loc.as_os_str(), 8, true).unwrap(), 2);
    assert_eq!(fs::metadata(&loc).unwrap().len(), 16);

    let layout = RowLayout::new(4, 4, KeyOrder::Natural);
    assert_eq!(static_index_need(loc.as_os_str(), &layout).unwrap(), 22);
    let missing = dir.join("missing.table");
    assert_eq!(table_size(missing.as_os_str(), 8, false).unwrap(), 0);

    fs::write(&loc, b"aaaa1111bbbb2222cc".as_ref()).unwrap();
    let table = {
        let (config, r) = (Config::new(layout), Arc::new(Registry::new()));
        Table::open_with(loc.as_os_str(), config, unlimited(), r).unwrap()
    };
    assert_eq!(table.size().unwrap(), 2);
    table.close().unwrap();
}

#[test]
fn test_table_memory() {
    let dir = test_dir("test_table_memory");
    let loc = dir.join("memory.table");
    let layout = RowLayout::new(4, 4, KeyOrder::Natural);
    let registry = Arc::new(Registry::new());

    let hints = Arc::new(FixedMemory::new(1024 * MB, 0));
    let table = {
        let (config, r) = (Config::new(layout), Arc::clone(&registry));
        let h: Arc<dyn MemoryHints> = Arc::clone(&hints) as Arc<dyn MemoryHints>;
        Table::open_with(loc.as_os_str(), config, h, r).unwrap()
    };
    assert!(table.uses_tail_cache().unwrap());
    for key in ["aaaa", "bbbb", "cccc"].iter() {
        table.put(Row::new(key.as_bytes().to_vec(), b"1111".to_vec())).unwrap();
    }
    let stats = table.to_stats().unwrap();
    assert_eq!(stats.n_count, 3);
    assert_eq!(stats.key_chunk_size, 8);
    assert_eq!(stats.value_chunk_size, 4);
    assert_eq!(stats.value_mem, 12);

    // memory pressure abandons the tail-cache, table keeps working.
    hints.set_available(100 * MB);
    table.put(Row::new(b"dddd".to_vec(), b"2222".to_vec())).unwrap();
    assert!(!table.uses_tail_cache().unwrap());
    assert!(table.consistency_check().unwrap());
    assert_eq!(table.get(b"dddd").unwrap().unwrap().as_tail(), b"2222");
    assert_eq!(table.get(b"aaaa").unwrap().unwrap().as_tail(), b"1111");
    assert_eq!(table.to_stats().unwrap().value_mem, 0);
    table.close().unwrap();

    // not enough memory for tail-cache.
    let table = {
        let (config, r) = (Config::new(layout), Arc::clone(&registry));
        let h: Arc<dyn MemoryHints> = Arc::new(FixedMemory::new(500 * MB, 0));
        Table::open_with(loc.as_os_str(), config, h, r).unwrap()
    };
    assert!(!table.uses_tail_cache().unwrap());
    assert_eq!(table.size().unwrap(), 4);
    table.close().unwrap();

    // not enough memory for index.
    let h: Arc<dyn MemoryHints> = Arc::new(FixedMemory::new(50 * MB, 0));
    match Table::open_with(loc.as_os_str(), Config::new(layout), h, registry) {
        Err(Error::OutOfMemory(_, _)) => (),
        Err(err) => panic!("unexpected {}", err),
        Ok(_) => panic!("unexpected table"),
    }
}

#[test]
fn test_table_registry() {
    let dir = test_dir("test_table_registry");
    let registry = Arc::new(Registry::new());
    let layout = RowLayout::new(4, 4, KeyOrder::Natural);

    let (loc1, loc2) = (dir.join("one.table"), dir.join("two.table"));
    let t1 = {
        let (config, r) = (Config::new(layout), Arc::clone(&registry));
        Table::open_with(loc1.as_os_str(), config, unlimited(), r).unwrap()
    };
    let t2 = {
        let (config, r) = (Config::new(layout), Arc::clone(&registry));
        Table::open_with(loc2.as_os_str(), config, unlimited(), r).unwrap()
    };
    t1.put(Row::new(b"aaaa".to_vec(), b"1111".to_vec())).unwrap();

    let locs = registry.to_locations().unwrap();
    assert_eq!(locs, vec![loc1.clone().into_os_string(), loc2.clone().into_os_string()]);

    let stats = registry.memory_stats(loc1.as_os_str()).unwrap().unwrap();
    assert_eq!(stats, t1.to_stats().unwrap());
    assert_eq!(stats.n_count, 1);
    assert!(t1.footprint().unwrap() > 0);

    // a second table on the same file is refused.
    let config = Config::new(layout);
    let r = Arc::clone(&registry);
    assert!(Table::open_with(loc1.as_os_str(), config, unlimited(), r).is_err());

    t1.close().unwrap();
    assert_eq!(registry.memory_stats(loc1.as_os_str()).unwrap(), None);
    std::mem::drop(t2);
    assert_eq!(registry.to_locations().unwrap(), Vec::<std::ffi::OsString>::new());
}

#[test]
fn test_table_clear() {
    let dir = test_dir("test_table_clear");
    let loc = dir.join("clear.table");
    let layout = RowLayout::new(4, 4, KeyOrder::Natural);
    let table = {
        let (config, r) = (Config::new(layout), Arc::new(Registry::new()));
        Table::open_with(loc.as_os_str(), config, unlimited(), r).unwrap()
    };
    for key in ["aaaa", "bbbb"].iter() {
        table.put(Row::new(key.as_bytes().to_vec(), b"1111".to_vec())).unwrap();
    }
    table.clear().unwrap();
    assert!(table.is_empty().unwrap());
    assert!(table.uses_tail_cache().unwrap());
    assert_eq!(table.top(10).unwrap(), Vec::<Row>::new());
    assert_eq!(table.random(10).unwrap(), Vec::<Row>::new());
    assert_eq!(table.remove_one().unwrap(), None);
    assert_eq!(table.smallest_key().unwrap(), None);

    table.put(Row::new(b"cccc".to_vec(), b"2222".to_vec())).unwrap();
    assert_eq!(table.size().unwrap(), 1);
    table.close().unwrap();
    assert_eq!(fs::metadata(&loc).unwrap().len(), 8);
}

#[test]
fn test_table_config_toml() {
    let text = r#"
        buffer_size = 10
        tail_cache = false
        layout = { key_len = 12, tail_len = 20, order = "base64" }
    "#;
    let value: toml::Value = text.parse().unwrap();
    let config = Config::try_from(value).unwrap();

    let mut refc = Config::new(RowLayout::new(12, 20, KeyOrder::Base64));
    refc.set_buffer_size(10).set_tail_cache(false);
    assert_eq!(config, refc);

    let text = r#"layout = { key_len = 0, tail_len = 20, order = "natural" }"#;
    let value: toml::Value = text.parse().unwrap();
    assert!(Config::try_from(value).is_err());

    let text = r#"layout = { key_len = 4, tail_len = 4, order = "base64-rfc1521" }"#;
    let value: toml::Value = text.parse().unwrap();
    let config = Config::try_from(value).unwrap();
    assert_eq!(config.layout.order, KeyOrder::Base64Rfc1521);
    assert!(config.warm_up);
}
