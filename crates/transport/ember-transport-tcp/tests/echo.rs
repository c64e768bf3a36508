use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use ember_core::error::codes;
use ember_core::filters::{ExecutorConfig, ExecutorFilter};
use ember_core::port;
use ember_core::prelude::*;
use ember_core::test_stubs::{EchoHandler, RecordedEvent, RecordingHandler};
use ember_transport_tcp::{TcpAcceptor, TcpConnector};

const TIMEOUT: Duration = Duration::from_secs(10);

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}

/// 为每个组合错开探测起点，降低并行测试争用同一端口的概率。
fn free_local_port(slot: u16) -> u16 {
    let base = 20_000 + (std::process::id() % 20_000) as u16 + slot * 97;
    port::next_available(base).expect("测试环境应存在空闲端口")
}

fn patterned(i: u8) -> ByteBuffer {
    let mut buf = ByteBuffer::allocate(16);
    for offset in 0..16u8 {
        buf.put(i.wrapping_add(offset)).expect("容量恰好 16");
    }
    buf.flip();
    buf
}

async fn echo_server() -> (TcpAcceptor, SocketAddr) {
    let acceptor = TcpAcceptor::new();
    let bound = acceptor
        .bind(loopback(0), Arc::new(EchoHandler), None)
        .await
        .expect("绑定回显服务");
    (acceptor, bound)
}

/// 十个 16 字节缓冲经回显服务往返：累计读到 160 字节，写完成标记按提交顺序回报。
async fn run_echo_scenario(slot: u16, explicit_local: bool, with_initializer: bool) {
    let (_acceptor, server) = echo_server().await;
    let connector = TcpConnector::new();
    connector
        .filter_chain()
        .add_first(
            "threadPool",
            Arc::new(ExecutorFilter::new(ExecutorConfig::default())),
        )
        .expect("插入分派过滤器");

    let handler = RecordingHandler::new();
    let initialized = Arc::new(AtomicBool::new(false));
    let initializer: Option<Arc<dyn SessionInitializer>> = with_initializer.then(|| {
        let initialized = Arc::clone(&initialized);
        let handler = Arc::clone(&handler);
        Arc::new(move |session: &Session| -> ember_core::Result<()> {
            assert!(handler.events().is_empty(), "初始化器必须先于任何事件执行");
            session.set_attribute("scenario", slot);
            initialized.store(true, Ordering::SeqCst);
            Ok(())
        }) as Arc<dyn SessionInitializer>
    });
    let local = explicit_local.then(|| loopback(free_local_port(slot)));

    let session = connector
        .connect(server, local, handler.clone(), initializer)
        .await
        .expect("连接回显服务");

    match local {
        Some(local) => assert_eq!(session.local_addr().port(), local.port()),
        None => assert_ne!(session.local_addr().port(), server.port()),
    }
    assert_eq!(session.transport_kind(), TransportKind::Stream);
    assert_eq!(initialized.load(Ordering::SeqCst), with_initializer);
    if with_initializer {
        assert_eq!(session.attribute::<u16>("scenario").as_deref(), Some(&slot));
    }

    for i in 0..10u8 {
        let marker = if i % 2 == 0 {
            Marker::new(i32::from(i))
        } else {
            Marker::none()
        };
        session.write(patterned(i), marker).expect("写入");
    }

    let complete = handler
        .wait_for(TIMEOUT, |events| {
            let written = events
                .iter()
                .filter(|e| matches!(e, RecordedEvent::Written(_)))
                .count();
            written == 10 && received_len(events) >= 160
        })
        .await;
    assert!(complete, "全部写入应完成并被回显");

    let mut accumulated = ByteBuffer::allocate(1024);
    accumulated
        .put_slice(&handler.received())
        .expect("累积缓冲足够大");
    accumulated.flip();
    let expected: Vec<u8> = (0..10u8).flat_map(|i| patterned(i).to_vec()).collect();
    assert_eq!(accumulated, ByteBuffer::wrap(expected));
    assert_eq!(
        handler.marker_values::<i32>(),
        (0..10).map(|i| (i % 2 == 0).then_some(i)).collect::<Vec<_>>()
    );
    assert_eq!(handler.overlaps(), 0);

    session.close();
    assert!(handler.wait_closed(TIMEOUT).await);
    assert_eq!(handler.closed_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_ephemeral_local_without_initializer() {
    run_echo_scenario(0, false, false).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_ephemeral_local_with_initializer() {
    run_echo_scenario(1, false, true).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_explicit_local_without_initializer() {
    run_echo_scenario(2, true, false).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_explicit_local_with_initializer() {
    run_echo_scenario(3, true, true).await;
}

/// 客户端关闭两次只触发一次 session_closed；服务端随后观察到对端关闭。
#[tokio::test(flavor = "multi_thread")]
async fn close_propagates_to_peer_once() {
    let acceptor = TcpAcceptor::new();
    let server_handler = RecordingHandler::new();
    let server = acceptor
        .bind(loopback(0), server_handler.clone(), None)
        .await
        .expect("绑定");

    let client_handler = RecordingHandler::new();
    let session = TcpConnector::new()
        .connect(server, None, client_handler.clone(), None)
        .await
        .expect("连接");
    assert!(
        server_handler
            .wait_for(TIMEOUT, |events| events
                .iter()
                .any(|e| matches!(e, RecordedEvent::Opened)))
            .await
    );

    session.close();
    session.close();
    assert!(client_handler.wait_closed(TIMEOUT).await);
    assert!(server_handler.wait_closed(TIMEOUT).await, "服务端应观察到 EOF");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(client_handler.closed_count(), 1);
    assert_eq!(server_handler.closed_count(), 1);
    assert!(client_handler.exceptions().is_empty());

    let err = session
        .write(ByteBuffer::copy_from_slice(b"late"), Marker::none())
        .expect_err("关闭后写入必须失败");
    assert_eq!(err.code(), codes::SESSION_CLOSED);
}

/// 服务端初始化器拒绝连接：不产生服务端事件，客户端观察到连接关闭。
#[tokio::test(flavor = "multi_thread")]
async fn acceptor_initializer_failure_drops_connection() {
    let acceptor = TcpAcceptor::new();
    let server_handler = RecordingHandler::new();
    let reject: Arc<dyn SessionInitializer> = Arc::new(|_: &Session| -> ember_core::Result<()> {
        Err(CoreError::new("app.rejected", "no guests"))
    });
    let server = acceptor
        .bind(loopback(0), server_handler.clone(), Some(reject))
        .await
        .expect("绑定");

    let client_handler = RecordingHandler::new();
    TcpConnector::new()
        .connect(server, None, client_handler.clone(), None)
        .await
        .expect("TCP 握手由内核完成，连接本身成功");

    assert!(client_handler.wait_closed(TIMEOUT).await);
    assert!(server_handler.events().is_empty(), "被拒绝的连接不得产生服务端事件");
}

/// unbind 之后新连接被拒绝，已建立的会话继续工作。
#[tokio::test(flavor = "multi_thread")]
async fn unbind_stops_accepting_but_keeps_sessions() {
    let (acceptor, server) = echo_server().await;
    assert_eq!(acceptor.bound_addresses(), vec![server]);

    let handler = RecordingHandler::new();
    let connector = TcpConnector::new();
    let session = connector
        .connect(server, None, handler.clone(), None)
        .await
        .expect("连接");
    session
        .write(ByteBuffer::copy_from_slice(b"ping"), Marker::none())
        .expect("写入");
    assert!(
        handler
            .wait_for(TIMEOUT, |events| received_len(events) >= 4)
            .await,
        "解绑前连接应已被服务端接收"
    );

    acceptor.unbind(server).await.expect("解绑");
    assert!(acceptor.bound_addresses().is_empty());
    let err = acceptor.unbind(server).await.expect_err("重复解绑必须失败");
    assert_eq!(err.code(), "ember.transport.tcp.unbind_failed");

    let refused = connector
        .connect(server, None, RecordingHandler::new(), None)
        .await
        .expect_err("解绑后不应再接受连接");
    assert_eq!(refused.code(), "ember.transport.tcp.connect_failed");

    session
        .write(ByteBuffer::copy_from_slice(b"still here"), Marker::new(1u8))
        .expect("已建立的会话仍可写");
    assert!(
        handler
            .wait_for(TIMEOUT, |events| received_len(events) >= 14)
            .await
    );
    assert_eq!(handler.received(), b"pingstill here");
    session.close();
}

fn received_len(events: &[RecordedEvent]) -> usize {
    events
        .iter()
        .map(|e| match e {
            RecordedEvent::Read(bytes) => bytes.len(),
            _ => 0,
        })
        .sum()
}
