//! TCP server that acknowledges every message it receives.
//!
//! Binds the listener, accepts connections until shutdown, and hands each
//! socket to its own [`Connection`] task.

use crate::config::Config;
use crate::connection::Connection;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use tokio::net::{lookup_host, TcpListener};
use tracing::{debug, error, info};

/// Pending connection queue length
const LISTEN_BACKLOG: i32 = 1024;

/// Server instance
pub struct Server {
    listener: TcpListener,
    buffer_size: usize,
}

impl Server {
    /// Resolve the configured address and start listening on it.
    pub async fn bind(config: &Config) -> io::Result<Self> {
        let addr = resolve(&config.host, config.port).await?;
        let listener = TcpListener::from_std(create_listener(addr)?)?;

        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            buffer_size: config.buffer_size,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` completes.
    pub async fn run(self, shutdown: impl Future) {
        tokio::select! {
            _ = self.accept_loop() => {}
            _ = shutdown => {
                info!("Shutting down");
            }
        }
    }

    async fn accept_loop(&self) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                    }

                    let mut conn = Connection::new(stream, peer, self.buffer_size);
                    tokio::spawn(async move {
                        conn.run().await;
                        debug!(
                            peer = %peer,
                            state = ?conn.state(),
                            acks = conn.acks_sent(),
                            "Connection finished"
                        );
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Resolve `host` (IP literal or name) to the first matching socket address.
async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    lookup_host((host, port)).await?.next().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("no address found for host '{host}'"),
        )
    })
}

fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ACK;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;
    use tokio::task::JoinHandle;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        }
    }

    async fn start() -> (SocketAddr, oneshot::Sender<()>, JoinHandle<()>) {
        let server = Server::bind(&test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(server.run(rx));
        (addr, tx, handle)
    }

    async fn read_ack(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = vec![0u8; ACK.len()];
        stream.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_ping_scenario() {
        let (addr, _tx, _handle) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"ping").await.unwrap();
        assert_eq!(read_ack(&mut client).await, ACK);

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_single_byte() {
        let (addr, _tx, _handle) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        client.write_all(b"x").await.unwrap();
        assert_eq!(read_ack(&mut client).await, ACK);
    }

    #[tokio::test]
    async fn test_separate_writes_get_separate_acks() {
        let (addr, _tx, _handle) = start().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        for i in 0..5 {
            client
                .write_all(format!("message {i}").as_bytes())
                .await
                .unwrap();
            assert_eq!(read_ack(&mut client).await, ACK);
        }

        client.shutdown().await.unwrap();
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_large_payload_only_gets_acks() {
        let (addr, _tx, _handle) = start().await;
        let client = TcpStream::connect(addr).await.unwrap();
        let (mut reader, mut writer) = client.into_split();

        let payload = vec![b'a'; 4 * 1024 * 1024];
        let sender = tokio::spawn(async move {
            writer.write_all(&payload).await.unwrap();
            writer.shutdown().await.unwrap();
        });

        let mut response = Vec::new();
        reader.read_to_end(&mut response).await.unwrap();
        sender.await.unwrap();

        assert!(!response.is_empty());
        assert_eq!(response.len() % ACK.len(), 0);
        assert!(response.chunks(ACK.len()).all(|chunk| chunk == ACK));
    }

    #[tokio::test]
    async fn test_clients_are_independent() {
        let (addr, _tx, _handle) = start().await;
        let mut a = TcpStream::connect(addr).await.unwrap();
        let mut b = TcpStream::connect(addr).await.unwrap();

        a.write_all(b"from a").await.unwrap();
        assert_eq!(read_ack(&mut a).await, ACK);

        let mut buf = [0u8; 1];
        let idle = tokio::time::timeout(Duration::from_millis(100), b.read(&mut buf)).await;
        assert!(idle.is_err(), "client b received data meant for a");

        b.write_all(b"from b").await.unwrap();
        assert_eq!(read_ack(&mut b).await, ACK);
    }

    #[tokio::test]
    async fn test_bind_in_use_fails() {
        let server = Server::bind(&test_config()).await.unwrap();
        let addr = server.local_addr().unwrap();

        let config = Config {
            port: addr.port(),
            ..test_config()
        };
        assert!(Server::bind(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let (addr, tx, handle) = start().await;

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("server did not stop")
            .unwrap();

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_resolve_hostname() {
        let addr = resolve("localhost", 5000).await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 5000);
    }
}
