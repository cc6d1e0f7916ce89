// ABOUTME: Captures the client's SSH identification line from the raw stream.
// ABOUTME: VersionTap wraps the TCP stream and records the first "SSH-" line it reads.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, OnceLock};
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// RFC 4253 caps the identification line at 255 bytes including CR LF.
const MAX_VERSION_LEN: usize = 255;

/// Client identification string, filled in once the line has been read.
#[derive(Debug, Clone, Default)]
pub struct ClientVersion(Arc<OnceLock<String>>);

impl ClientVersion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&str> {
        self.0.get().map(String::as_str)
    }

    fn set(&self, version: String) {
        let _ = self.0.set(version);
    }
}

/// Stream wrapper that observes the first line read from the peer.
#[derive(Debug)]
pub struct VersionTap<S> {
    inner: S,
    version: ClientVersion,
    line: Vec<u8>,
    done: bool,
}

impl<S> VersionTap<S> {
    pub fn new(inner: S) -> (Self, ClientVersion) {
        let version = ClientVersion::new();
        let tap = Self {
            inner,
            version: version.clone(),
            line: Vec::new(),
            done: false,
        };
        (tap, version)
    }

    fn observe(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' || self.line.len() >= MAX_VERSION_LEN {
                self.finish();
                return;
            }
            self.line.push(byte);
        }
    }

    fn finish(&mut self) {
        self.done = true;
        let line = std::mem::take(&mut self.line);
        let line = String::from_utf8_lossy(&line);
        let line = line.trim_end_matches('\r');
        if line.starts_with("SSH-") {
            self.version.set(line.to_string());
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for VersionTap<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let this = &mut *self;
        ready!(Pin::new(&mut this.inner).poll_read(cx, buf))?;
        if !this.done {
            this.observe(&buf.filled()[before..]);
        }
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for VersionTap<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn captures_identification_across_reads() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut tap, version) = VersionTap::new(server);

        client.write_all(b"SSH-2.0-Open").await.unwrap();
        let mut buf = [0u8; 64];
        let n = tap.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SSH-2.0-Open");
        assert!(version.get().is_none(), "line not complete yet");

        client.write_all(b"SSH_8.9p1\r\n\x00\x00").await.unwrap();
        let _ = tap.read(&mut buf).await.unwrap();
        assert_eq!(version.get(), Some("SSH-2.0-OpenSSH_8.9p1"));
    }

    #[tokio::test]
    async fn ignores_non_ssh_first_line() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut tap, version) = VersionTap::new(server);

        client.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let _ = tap.read(&mut buf).await.unwrap();

        assert!(version.get().is_none());
    }

    #[tokio::test]
    async fn gives_up_on_overlong_line() {
        let (mut client, server) = tokio::io::duplex(1024);
        let (mut tap, version) = VersionTap::new(server);

        let mut junk = b"SSH-".to_vec();
        junk.extend(std::iter::repeat(b'x').take(600));
        client.write_all(&junk).await.unwrap();
        let mut buf = vec![0u8; 1024];
        let _ = tap.read(&mut buf).await.unwrap();
        assert!(tap.done);

        let captured = version.get().expect("truncated line still starts with SSH-");
        assert_eq!(captured.len(), MAX_VERSION_LEN);
    }

    #[tokio::test]
    async fn writes_pass_through() {
        let (mut client, server) = tokio::io::duplex(64);
        let (mut tap, _version) = VersionTap::new(server);

        tap.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"SSH-2.0-OpenSSH_7.4\r\n");
    }
}
