use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use ember_core::error::codes;
use ember_core::filters::{ExecutorConfig, ExecutorFilter};
use ember_core::prelude::*;
use ember_core::test_stubs::{MemoryConnector, RecordedEvent, RecordingHandler};
use parking_lot::Mutex;

const TIMEOUT: Duration = Duration::from_secs(5);

fn remote() -> SocketAddr {
    "127.0.0.1:8080".parse().expect("合法地址")
}

/// 第 `i` 个缓冲区依次填充 `i..i+16`，已翻转为读模式。
fn patterned(i: u8) -> ByteBuffer {
    let mut buf = ByteBuffer::allocate(16);
    for offset in 0..16u8 {
        buf.put(i.wrapping_add(offset)).expect("容量恰好 16");
    }
    buf.flip();
    buf
}

fn expected_stream() -> Vec<u8> {
    (0..10u8).flat_map(|i| patterned(i).to_vec()).collect()
}

/// 偶数次写入携带整数标记，奇数次不带标记。
fn write_scenario(session: &Session) {
    for i in 0..10u8 {
        let marker = if i % 2 == 0 {
            Marker::new(i32::from(i))
        } else {
            Marker::none()
        };
        session.write(patterned(i), marker).expect("会话处于打开状态");
    }
}

fn expected_markers() -> Vec<Option<i32>> {
    (0..10).map(|i| (i % 2 == 0).then_some(i)).collect()
}

/// 十次写入经回环返回：读到的 160 字节与写出的一致，写完成标记按提交顺序回报。
#[tokio::test(flavor = "multi_thread")]
async fn loopback_round_trip_preserves_bytes_and_marker_order() {
    let connector = MemoryConnector::loopback();
    connector
        .filter_chain()
        .add_first(
            "threadPool",
            Arc::new(ExecutorFilter::new(ExecutorConfig::default())),
        )
        .expect("模板链可插入分派过滤器");
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("内存连接总能建立");

    write_scenario(&session);

    let complete = handler
        .wait_for(TIMEOUT, |events| {
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
            written == 10 && read == 160
        })
        .await;
    assert!(complete, "十次写入均应完成并被读回");

    let mut accumulated = ByteBuffer::allocate(1024);
    accumulated
        .put_slice(&handler.received())
        .expect("累积缓冲足够大");
    accumulated.flip();
    assert_eq!(accumulated.remaining(), 160);
    assert_eq!(accumulated, ByteBuffer::wrap(expected_stream()));
    assert_eq!(handler.marker_values::<i32>(), expected_markers());
    assert_eq!(handler.overlaps(), 0, "同一会话的回调不得重叠");

    session.close();
    assert!(handler.wait_closed(TIMEOUT).await);
}

/// 连续两次 close 只产生一次 session_closed。
#[tokio::test(flavor = "multi_thread")]
async fn double_close_fires_single_session_closed() {
    let connector = MemoryConnector::sink();
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");

    session.close();
    session.close();
    session.closed().await;
    session.close();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handler.closed_count(), 1);
    assert_eq!(session.state(), SessionState::Closed);
    assert!(
        connector.last_probe().expect("存在链路").is_shut_down(),
        "关闭流程应半关闭传输"
    );
}

/// 关闭后写入同步失败，且不会产生完成事件。
#[tokio::test(flavor = "multi_thread")]
async fn write_after_close_is_rejected() {
    let connector = MemoryConnector::sink();
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");

    session.close();
    let err = session
        .write(ByteBuffer::copy_from_slice(b"late"), Marker::new(1))
        .expect_err("Closing 状态下写入必须失败");
    assert_eq!(err.code(), codes::SESSION_CLOSED);

    session.closed().await;
    let err = session
        .write(ByteBuffer::copy_from_slice(b"later"), Marker::none())
        .expect_err("Closed 状态下写入必须失败");
    assert_eq!(err.code(), codes::SESSION_CLOSED);
    assert_eq!(handler.written_count(), 0);
}

/// close 之前入队的写请求全部发送并回报完成，之后才进入 Closed。
#[tokio::test(flavor = "multi_thread")]
async fn close_drains_previously_enqueued_writes() {
    let connector = MemoryConnector::sink();
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");
    let probe = connector.last_probe().expect("存在链路");
    probe.set_write_delay(Some(Duration::from_millis(10)));

    for i in 0..5 {
        session
            .write(ByteBuffer::copy_from_slice(&[i]), Marker::new(i))
            .expect("写入");
    }
    session.close();

    assert!(handler.wait_closed(TIMEOUT).await);
    assert_eq!(probe.written().len(), 5);
    assert_eq!(
        handler.marker_values::<u8>(),
        (0..5).map(Some).collect::<Vec<_>>()
    );
    let events = handler.events();
    assert!(
        matches!(events.last(), Some(RecordedEvent::Closed)),
        "session_closed 必须是最后一个事件: {events:?}"
    );
}

/// 初始化器在任何事件之前执行，并可向会话自己的链插入过滤器、设置属性。
#[tokio::test(flavor = "multi_thread")]
async fn initializer_runs_before_first_event() {
    struct OpenedSeen(Arc<AtomicBool>);
    impl Filter for OpenedSeen {
        fn session_opened(&self, next: NextFilter, session: &Session) {
            self.0.store(true, Ordering::SeqCst);
            next.session_opened(session);
        }
    }

    let connector = MemoryConnector::loopback();
    let handler = RecordingHandler::new();
    let executed = Arc::new(AtomicBool::new(false));
    let filter_saw_open = Arc::new(AtomicBool::new(false));

    let initializer: Arc<dyn SessionInitializer> = {
        let executed = Arc::clone(&executed);
        let filter_saw_open = Arc::clone(&filter_saw_open);
        let handler = Arc::clone(&handler);
        Arc::new(move |session: &Session| -> ember_core::Result<()> {
            assert_eq!(session.state(), SessionState::Connecting);
            assert!(handler.events().is_empty(), "初始化器之前不得有任何事件");
            session.set_attribute("user", String::from("alice"));
            session
                .filter_chain()
                .add_last("probe", Arc::new(OpenedSeen(Arc::clone(&filter_saw_open))))?;
            executed.store(true, Ordering::SeqCst);
            Ok(())
        })
    };

    let session = connector
        .connect(remote(), None, handler.clone(), Some(initializer))
        .await
        .expect("连接");
    assert!(executed.load(Ordering::SeqCst));
    assert!(filter_saw_open.load(Ordering::SeqCst), "初始化器插入的过滤器应观察到 session_opened");
    assert_eq!(
        session.attribute::<String>("user").as_deref().map(String::as_str),
        Some("alice")
    );
    assert!(
        connector.filter_chain().is_empty(),
        "会话链的变更不影响连接器模板链"
    );

    session
        .write(ByteBuffer::copy_from_slice(b"hi"), Marker::none())
        .expect("写入");
    assert!(
        handler
            .wait_for(TIMEOUT, |events| events
                .iter()
                .any(|e| matches!(e, RecordedEvent::Read(_))))
            .await
    );
    assert!(matches!(handler.events().first(), Some(RecordedEvent::Opened)));
    session.close();
}

/// 初始化器失败时连接失败，且不产生任何事件。
#[tokio::test(flavor = "multi_thread")]
async fn initializer_failure_aborts_connect_silently() {
    let connector = MemoryConnector::loopback();
    let handler = RecordingHandler::new();
    let initializer: Arc<dyn SessionInitializer> =
        Arc::new(|_: &Session| -> ember_core::Result<()> {
            Err(CoreError::new("app.rejected", "not today"))
        });

    let err = connector
        .connect(remote(), None, handler.clone(), Some(initializer))
        .await
        .expect_err("初始化失败必须导致连接失败");
    assert_eq!(err.code(), codes::INITIALIZATION_FAILED);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(handler.events().is_empty(), "失败的会话不得产生事件");
}

/// 传输写失败：异常恰好报告一次，随后会话关闭，未送达的写请求没有完成事件。
#[tokio::test(flavor = "multi_thread")]
async fn transport_write_failure_reports_once_and_closes() {
    let connector = MemoryConnector::sink();
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");
    connector.last_probe().expect("链路").fail_writes();

    for i in 0..3 {
        let _ = session.write(ByteBuffer::copy_from_slice(&[i]), Marker::new(i));
    }

    assert!(handler.wait_closed(TIMEOUT).await);
    assert_eq!(handler.exceptions(), vec![codes::TRANSPORT_IO]);
    assert_eq!(handler.written_count(), 0);
    assert_eq!(handler.closed_count(), 1);
}

/// 对端关闭与读失败都会结束会话；读失败额外报告异常。
#[tokio::test(flavor = "multi_thread")]
async fn peer_hang_up_and_read_errors_close_the_session() {
    let connector = MemoryConnector::sink();

    let quiet = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, quiet.clone(), None)
        .await
        .expect("连接");
    let probe = connector.last_probe().expect("链路");
    probe.inject(b"bye");
    probe.hang_up();
    assert!(quiet.wait_closed(TIMEOUT).await);
    assert_eq!(quiet.received(), b"bye");
    assert!(quiet.exceptions().is_empty());
    assert_eq!(session.state(), SessionState::Closed);

    let noisy = RecordingHandler::new();
    connector
        .connect(remote(), None, noisy.clone(), None)
        .await
        .expect("连接");
    connector
        .last_probe()
        .expect("链路")
        .fail_read(io::ErrorKind::ConnectionReset);
    assert!(noisy.wait_closed(TIMEOUT).await);
    assert_eq!(noisy.exceptions(), vec![codes::TRANSPORT_IO]);
}

/// Handler panic 被隔离，后续事件照常投递。
#[tokio::test(flavor = "multi_thread")]
async fn panicking_handler_does_not_wedge_session() {
    struct Fragile {
        reads: AtomicUsize,
        seen: Mutex<Vec<Vec<u8>>>,
    }
    impl SessionHandler for Fragile {
        fn data_read(&self, _session: &Session, buffer: ByteBuffer) {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first read explodes");
            }
            self.seen.lock().push(buffer.to_vec());
        }
    }

    let connector = MemoryConnector::sink();
    let handler = Arc::new(Fragile {
        reads: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");
    let probe = connector.last_probe().expect("链路");
    probe.inject(b"one");
    tokio::time::sleep(Duration::from_millis(50)).await;
    probe.inject(b"two");

    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while handler.seen.lock().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(*handler.seen.lock(), vec![b"two".to_vec()]);
    session.close();
}

/// 统计计数覆盖读写字节与消息数。
#[tokio::test(flavor = "multi_thread")]
async fn stats_track_traffic() {
    let connector = MemoryConnector::loopback();
    let handler = RecordingHandler::new();
    let session = connector
        .connect(remote(), None, handler.clone(), None)
        .await
        .expect("连接");
    session
        .write(ByteBuffer::copy_from_slice(&[0; 32]), Marker::none())
        .expect("写入");
    assert!(
        handler
            .wait_for(TIMEOUT, |events| events
                .iter()
                .any(|e| matches!(e, RecordedEvent::Read(_))))
            .await
    );
    assert_eq!(session.stats().written_bytes(), 32);
    assert_eq!(session.stats().written_messages(), 1);
    assert_eq!(session.stats().read_bytes(), 32);
    assert!(session.is_connected());
    session.close();
}
