use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use std::{fs, io::Write};

use super::*;

#[test]
fn test_chunk_reader() {
    let seed: u64 = random();
    println!("test_chunk_reader {}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = std::env::temp_dir().join("test_chunk_reader");
    fs::remove_dir_all(&dir).ok();
    let loc = dir.join("chunks.data");

    let record_size = rng.gen_range(1..200);
    let n_records = rng.gen_range(0..2000_u64);
    let records: Vec<Vec<u8>> = (0..n_records)
        .map(|_| (0..record_size).map(|_| rng.gen::<u8>()).collect())
        .collect();
    {
        let mut fd = files::open_file_rw(loc.as_os_str(), true).unwrap();
        for record in records.iter() {
            fd.write_all(record).unwrap();
        }
    }

    for chunk_size in [1, record_size / 2, record_size].iter() {
        if *chunk_size == 0 {
            continue;
        }
        let reader =
            ChunkReader::new(loc.as_os_str(), record_size, *chunk_size, n_records).unwrap();
        let chunks: Vec<Vec<u8>> = reader.map(|chunk| chunk.unwrap()).collect();
        assert_eq!(chunks.len() as u64, n_records);
        for (chunk, record) in chunks.iter().zip(records.iter()) {
            assert_eq!(chunk.as_slice(), &record[..*chunk_size]);
        }
    }

    // asking for more records than present must end in an error.
    let mut reader = ChunkReader::new(loc.as_os_str(), record_size, 1, n_records + 1).unwrap();
    for _ in 0..n_records {
        assert!(reader.next().unwrap().is_ok());
    }
    assert!(reader.next().unwrap().is_err());
    assert!(reader.next().is_none());

    assert!(ChunkReader::new(loc.as_os_str(), 4, 5, 1).is_err());
    assert!(ChunkReader::new(loc.as_os_str(), 4, 0, 1).is_err());
}
