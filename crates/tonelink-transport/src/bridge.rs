use std::os::unix::fs::{FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info};

use crate::codec::PacketCodec;
use crate::error::{Result, TransportError};
use crate::traits::{PacketReceiver, PacketSender};

/// Outbound half of a bridge connection.
#[derive(Debug)]
pub struct BridgeSender {
    inner: FramedWrite<OwnedWriteHalf, PacketCodec>,
}

/// Inbound half of a bridge connection.
#[derive(Debug)]
pub struct BridgeReceiver {
    inner: FramedRead<OwnedReadHalf, PacketCodec>,
}

impl PacketSender for BridgeSender {
    async fn send_packet(&mut self, packet: Bytes) -> Result<()> {
        self.inner.send(packet).await
    }
}

impl PacketReceiver for BridgeReceiver {
    async fn recv_packet(&mut self) -> Result<Option<Bytes>> {
        self.inner.next().await.transpose()
    }
}

fn split(stream: UnixStream) -> (BridgeSender, BridgeReceiver) {
    let (read, write) = stream.into_split();
    (
        BridgeSender {
            inner: FramedWrite::new(write, PacketCodec::new()),
        },
        BridgeReceiver {
            inner: FramedRead::new(read, PacketCodec::new()),
        },
    )
}

/// Connect to a BLE gateway's device socket.
pub async fn connect(path: impl AsRef<Path>) -> Result<(BridgeSender, BridgeReceiver)> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| TransportError::Connect {
            path: path.to_path_buf(),
            source: e,
        })?;
    debug!(?path, "connected to bridge socket");
    Ok(split(stream))
}

/// Listening side of a bridge socket.
///
/// Used by gateways and device simulators. The socket file is removed on
/// drop, unless something else has replaced it in the meantime.
#[derive(Debug)]
pub struct BridgeListener {
    listener: UnixListener,
    path: PathBuf,
    created_inode: Option<(u64, u64)>,
}

impl BridgeListener {
    /// Default permission mode for created socket paths.
    pub const DEFAULT_SOCKET_MODE: u32 = 0o600;
    /// Unix `sockaddr_un.sun_path` is 108 bytes on Linux, 104 on macOS.
    #[cfg(target_os = "linux")]
    const MAX_PATH_LEN: usize = 108;
    #[cfg(not(target_os = "linux"))]
    const MAX_PATH_LEN: usize = 104;

    /// Bind a bridge socket. Must be called from within a tokio runtime.
    ///
    /// A stale socket at `path` is removed first; any other kind of file is
    /// left alone and reported as a bind error.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let bind_err = |path: &Path, source: std::io::Error| TransportError::Bind {
            path: path.to_path_buf(),
            source,
        };

        let path_bytes = path.as_os_str().len();
        if path_bytes >= Self::MAX_PATH_LEN {
            return Err(TransportError::PathTooLong {
                path,
                len: path_bytes,
                max: Self::MAX_PATH_LEN,
            });
        }

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if !metadata.file_type().is_socket() {
                return Err(bind_err(
                    &path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "existing path is not a unix socket",
                    ),
                ));
            }
            debug!(?path, "removing stale socket");
            std::fs::remove_file(&path).map_err(|e| bind_err(&path, e))?;
        }

        let listener = UnixListener::bind(&path).map_err(|e| bind_err(&path, e))?;
        std::fs::set_permissions(
            &path,
            std::fs::Permissions::from_mode(Self::DEFAULT_SOCKET_MODE),
        )
        .map_err(|e| bind_err(&path, e))?;
        let created = std::fs::symlink_metadata(&path).map_err(|e| bind_err(&path, e))?;

        info!(?path, "listening on bridge socket");

        Ok(Self {
            listener,
            path,
            created_inode: Some((created.dev(), created.ino())),
        })
    }

    /// Accept the next connection.
    pub async fn accept(&self) -> Result<(BridgeSender, BridgeReceiver)> {
        let (stream, _addr) = self
            .listener
            .accept()
            .await
            .map_err(TransportError::Accept)?;
        debug!("accepted bridge connection");
        Ok(split(stream))
    }

    /// The path this socket is bound to.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BridgeListener {
    fn drop(&mut self) {
        let Some((expected_dev, expected_ino)) = self.created_inode else {
            return;
        };
        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket()
                && metadata.dev() == expected_dev
                && metadata.ino() == expected_ino
            {
                debug!(path = ?self.path, "cleaning up socket file");
                let _ = std::fs::remove_file(&self.path);
            } else {
                debug!(path = ?self.path, "socket path identity changed; skipping cleanup");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("tonelink-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[tokio::test]
    async fn packets_cross_the_bridge_both_ways() {
        let dir = temp_dir("bridge-roundtrip");
        let sock_path = dir.join("amp.sock");
        let listener = BridgeListener::bind(&sock_path).unwrap();

        let server = tokio::spawn(async move {
            let (mut tx, mut rx) = listener.accept().await.unwrap();
            let packet = rx.recv_packet().await.unwrap().unwrap();
            tx.send_packet(packet).await.unwrap();
            listener
        });

        let (mut tx, mut rx) = connect(&sock_path).await.unwrap();
        tx.send_packet(Bytes::from_static(&[0x90, 0x80, 0xB0, 1, 2]))
            .await
            .unwrap();
        let echoed = rx.recv_packet().await.unwrap().unwrap();
        assert_eq!(echoed.as_ref(), &[0x90, 0x80, 0xB0, 1, 2]);

        let listener = server.await.unwrap();
        drop(listener);
        assert!(!sock_path.exists(), "socket file should be cleaned up on drop");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn receiver_sees_close() {
        let dir = temp_dir("bridge-close");
        let sock_path = dir.join("pedal.sock");
        let listener = BridgeListener::bind(&sock_path).unwrap();

        let server = tokio::spawn(async move {
            let link = listener.accept().await.unwrap();
            drop(link);
            listener
        });

        let (_tx, mut rx) = connect(&sock_path).await.unwrap();
        let _listener = server.await.unwrap();
        assert!(rx.recv_packet().await.unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bind_default_permissions_hardened() {
        let dir = temp_dir("bridge-perms");
        let sock_path = dir.join("perm.sock");

        let listener = BridgeListener::bind(&sock_path).unwrap();
        let mode = std::fs::metadata(&sock_path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        drop(listener);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn bind_rejects_existing_non_socket_file() {
        let dir = temp_dir("bridge-file");
        let sock_path = dir.join("not-a-socket.sock");
        std::fs::write(&sock_path, b"regular-file").unwrap();

        let result = BridgeListener::bind(&sock_path);
        assert!(matches!(result, Err(TransportError::Bind { .. })));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn path_too_long() {
        let long_path = "/tmp/".to_string() + &"a".repeat(200) + ".sock";
        let result = BridgeListener::bind(&long_path);
        assert!(matches!(result, Err(TransportError::PathTooLong { .. })));
    }

    #[tokio::test]
    async fn connect_to_missing_socket_fails() {
        let missing = std::env::temp_dir().join(format!("tonelink-missing-{}.sock", std::process::id()));
        let err = connect(&missing).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect { .. }));
    }
}
