use std::io::{self, Read, Write};
use std::sync::Arc;

use arc_swap::ArcSwap;
use ember_core::filters::{SecurityEngine, SecurityEngineFactory};
use ember_core::prelude::Session;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;
use tracing::{debug, info};

use crate::error::{self, CONFIGURE, READ, WRITE};

enum Role {
    Client {
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    },
    Server {
        config: ArcSwap<ServerConfig>,
    },
}

/// 基于 `rustls` 的安全引擎工厂，为每个会话创建独立的 TLS 状态机。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 让 [`SecurityFilter`](ember_core::filters::SecurityFilter) 无需感知 TLS 细节即可为
///   TCP 会话加上加密层；
/// - 服务端证书需要在不停机的情况下轮换。
///
/// ## 逻辑（How）
/// - 客户端角色持有 `ClientConfig` 与目标主机名（用于 SNI 与证书校验）；
/// - 服务端角色把 `ServerConfig` 放入 [`ArcSwap`]，每个新会话创建引擎时读取最新快照；
///   [`replace_server_config`](Self::replace_server_config) 原子替换快照，已建立的会话不受影响。
///
/// ## 契约（What）
/// - 客户端引擎在 `begin` 前即已排队 ClientHello，由过滤器首次 `take_outbound` 取出；
/// - 服务端引擎等待对端 ClientHello，不主动发送任何记录。
pub struct TlsEngineFactory {
    role: Role,
}

impl TlsEngineFactory {
    /// 以客户端身份握手，`server_name` 参与 SNI 与证书主机名校验。
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            role: Role::Client {
                config,
                server_name,
            },
        }
    }

    pub fn server(config: Arc<ServerConfig>) -> Self {
        Self {
            role: Role::Server {
                config: ArcSwap::from(config),
            },
        }
    }

    pub fn is_server(&self) -> bool {
        matches!(self.role, Role::Server { .. })
    }

    /// 替换服务端配置，返回被替换的旧配置；客户端角色返回 `None` 且不做任何改动。
    ///
    /// 新配置只作用于之后创建的会话。
    pub fn replace_server_config(&self, config: Arc<ServerConfig>) -> Option<Arc<ServerConfig>> {
        match &self.role {
            Role::Server { config: current } => {
                let previous = current.swap(config);
                info!("tls server config replaced");
                Some(previous)
            }
            Role::Client { .. } => None,
        }
    }
}

impl SecurityEngineFactory for TlsEngineFactory {
    fn create_engine(&self, session: &Session) -> ember_core::Result<Box<dyn SecurityEngine>> {
        let connection: Connection = match &self.role {
            Role::Client {
                config,
                server_name,
            } => ClientConnection::new(Arc::clone(config), server_name.clone())
                .map_err(|err| error::map_rustls_error(CONFIGURE, err))?
                .into(),
            Role::Server { config } => ServerConnection::new(config.load_full())
                .map_err(|err| error::map_rustls_error(CONFIGURE, err))?
                .into(),
        };
        debug!(
            session = %session.id(),
            server = self.is_server(),
            "tls engine created"
        );
        Ok(Box::new(TlsEngine {
            connection,
            outbound: Vec::new(),
            session: session.id().to_string(),
            reported: false,
        }))
    }
}

/// 单个会话的 TLS 状态机，只在内存中收发记录。
struct TlsEngine {
    connection: Connection,
    outbound: Vec<u8>,
    session: String,
    reported: bool,
}

impl TlsEngine {
    /// 把 rustls 排队的记录移入 `outbound`。
    fn drain_records(&mut self) -> ember_core::Result<()> {
        while self.connection.wants_write() {
            self.connection
                .write_tls(&mut self.outbound)
                .map_err(|err| error::map_io_error(WRITE, err))?;
        }
        Ok(())
    }

    fn report_handshake(&mut self) {
        if self.reported || self.connection.is_handshaking() {
            return;
        }
        self.reported = true;
        let alpn = self
            .connection
            .alpn_protocol()
            .map(|protocol| String::from_utf8_lossy(protocol).into_owned());
        debug!(
            session = %self.session,
            version = ?self.connection.protocol_version(),
            cipher = ?self.connection.negotiated_cipher_suite().map(|suite| suite.suite()),
            alpn = ?alpn,
            "tls session negotiated"
        );
    }
}

impl SecurityEngine for TlsEngine {
    fn begin(&mut self) -> ember_core::Result<()> {
        Ok(())
    }

    fn is_handshaking(&self) -> bool {
        self.connection.is_handshaking()
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> ember_core::Result<Vec<u8>> {
        let mut remaining = ciphertext;
        let mut plaintext = Vec::new();
        while !remaining.is_empty() {
            let consumed = self
                .connection
                .read_tls(&mut remaining)
                .map_err(|err| error::map_io_error(READ, err))?;
            let state = self
                .connection
                .process_new_packets()
                .map_err(|err| error::map_rustls_error(READ, err))?;
            let available = state.plaintext_bytes_to_read();
            if available > 0 {
                let start = plaintext.len();
                plaintext.resize(start + available, 0);
                self.connection
                    .reader()
                    .read_exact(&mut plaintext[start..])
                    .map_err(|err| error::map_io_error(READ, err))?;
            }
            // 对端已发送 close_notify，之后的字节不再被接受
            if consumed == 0 || state.peer_has_closed() {
                break;
            }
        }
        self.report_handshake();
        Ok(plaintext)
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> ember_core::Result<()> {
        // rustls 限制待发送缓冲大小，大块明文需要边写边取出记录
        let mut remaining = plaintext;
        while !remaining.is_empty() {
            let accepted = self
                .connection
                .writer()
                .write(remaining)
                .map_err(|err| error::map_io_error(WRITE, err))?;
            remaining = &remaining[accepted..];
            let drained = self.outbound.len();
            self.drain_records()?;
            if accepted == 0 && self.outbound.len() == drained {
                return Err(error::map_io_error(WRITE, io::ErrorKind::WriteZero.into()));
            }
        }
        Ok(())
    }

    fn close(&mut self) {
        self.connection.send_close_notify();
    }

    fn take_outbound(&mut self) -> ember_core::Result<Vec<u8>> {
        self.drain_records()?;
        Ok(std::mem::take(&mut self.outbound))
    }
}
