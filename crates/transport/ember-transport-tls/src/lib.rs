#![doc = r#"
# ember-transport-tls

## 设计动机（Why）
- 为 `ember-core` 的 [`SecurityFilter`](ember_core::filters::SecurityFilter) 提供基于
  `rustls` 的引擎实现，使任意字节流会话都能加上 TLS；
- 服务端证书轮换不应中断已建立的会话。

## 核心契约（What）
- [`TlsEngineFactory::client`]/[`TlsEngineFactory::server`] 分别构造客户端与服务端工厂；
- [`TlsEngineFactory::replace_server_config`] 原子替换服务端配置，只影响之后建立的会话；
- 错误码遵循 `ember.transport.tls.<操作>_failed`，证书与完整性失败归为 `ErrorCategory::Security`。

## 实现策略（How）
- 引擎只在内存缓冲上驱动 `rustls::Connection`：`read_tls` + `process_new_packets` 解出明文，
  `write_tls` 取出待发送记录，不持有套接字；
- 加密后端由进程级 `CryptoProvider` 决定，本 crate 不强制选择。

## 风险与考量（Trade-offs）
- 握手期间的应用写入由过滤器暂存，握手耗时越长暂存越多；
- 客户端身份认证与 ALPN 等能力通过 `rustls` 配置对象直接表达，本 crate 不再二次封装。
"#]

mod engine;
mod error;

pub use engine::TlsEngineFactory;
pub use rustls::{ClientConfig, ServerConfig};
pub use rustls_pki_types::ServerName;
