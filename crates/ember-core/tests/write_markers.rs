use std::net::SocketAddr;
use std::time::Duration;

use ember_core::prelude::*;
use ember_core::test_stubs::{MemoryConnector, RecordedEvent, RecordingHandler};
use proptest::prelude::*;

fn remote() -> SocketAddr {
    "127.0.0.1:6060".parse().expect("合法地址")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("构建测试运行时")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// 任意写入序列：写完成标记按提交顺序逐一回报，回环读到的字节与写出的一致。
    #[test]
    fn markers_follow_submission_order(
        writes in prop::collection::vec(
            (prop::collection::vec(any::<u8>(), 1..64), prop::option::of(any::<u16>())),
            1..24,
        )
    ) {
        let runtime = runtime();
        let (markers, received) = runtime.block_on(async {
            let connector = MemoryConnector::loopback();
            let handler = RecordingHandler::new();
            let session = connector
                .connect(remote(), None, handler.clone(), None)
                .await
                .expect("连接");
            for (bytes, marker) in &writes {
                let marker = marker.map_or_else(Marker::none, Marker::new);
                session
                    .write(ByteBuffer::copy_from_slice(bytes), marker)
                    .expect("写入");
            }
            let total: usize = writes.iter().map(|(bytes, _)| bytes.len()).sum();
            let done = handler
                .wait_for(Duration::from_secs(5), |events| {
                    let written = events
                        .iter()
                        .filter(|e| matches!(e, RecordedEvent::Written(_)))
                        .count();
                    let read: usize = events
                        .iter()
                        .map(|e| match e {
                            RecordedEvent::Read(bytes) => bytes.len(),
                            _ => 0,
                        })
                        .sum();
                    written == writes.len() && read == total
                })
                .await;
            assert!(done, "全部写入应完成");
            session.close();
            session.closed().await;
            (handler.marker_values::<u16>(), handler.received())
        });

        let expected_markers: Vec<Option<u16>> = writes.iter().map(|(_, marker)| *marker).collect();
        let expected_bytes: Vec<u8> = writes.iter().flat_map(|(bytes, _)| bytes.clone()).collect();
        prop_assert_eq!(markers, expected_markers);
        prop_assert_eq!(received, expected_bytes);
    }
}
