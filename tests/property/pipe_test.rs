// tests/property/pipe_test.rs

//! Property-based tests for the sync pipe: whatever the chunking and the tier sizes,
//! the reader sees exactly the bytes that were written, in order.

use proptest::prelude::*;
use qdb::core::replication::pipe;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 50,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_pipe_preserves_byte_stream(
        mem_cap in 1usize..64,
        use_file in any::<bool>(),
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..200), 0..30),
        read_size in 1usize..128
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("pipe.overflow");
            let file = use_file.then(|| (path.as_path(), 64 * 1024));
            let (mut reader, mut writer) = pipe(mem_cap, file).unwrap();

            let expected: Vec<u8> = chunks.concat();
            let producer = tokio::spawn(async move {
                for chunk in &chunks {
                    writer.write_all(chunk).await.unwrap();
                }
                writer.close();
            });

            let mut out = Vec::new();
            let mut buf = vec![0u8; read_size];
            loop {
                let n = reader.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            producer.await.unwrap();
            assert_eq!(out, expected);
        });
    }
}
