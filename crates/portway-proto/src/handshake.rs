//! Tunnel-port handshake.
//!
//! A freshly dialed tunnel socket carries one line with the tunnel id and,
//! when the gateway requires authentication, a second line with the bearer
//! token. Lines are `\n`-terminated UTF-8 and trimmed of surrounding
//! whitespace. Nothing flows back on success; the agent relies on the
//! socket staying open. After the handshake the socket speaks framed
//! HTTP/1.1.

use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Port the gateway listens on for agent dial-ins.
pub const TUNNEL_PORT: u16 = 62322;

/// Longest handshake line accepted before the socket is dropped.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// Write the agent side of the handshake: the id line, then the token line
/// when a token is present.
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    id: &str,
    token: Option<&str>,
) -> io::Result<()> {
    writer.write_all(id.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    if let Some(token) = token {
        writer.write_all(token.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    }
    writer.flush().await
}

/// Read one trimmed handshake line. Returns `None` when the peer closed
/// before completing a line.
pub async fn read_handshake_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> io::Result<Option<String>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    if line.len() > MAX_LINE_BYTES {
        return Ok(None);
    }
    Ok(Some(line.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handshake_round_trip() {
        let mut wire = Vec::new();
        write_handshake(&mut wire, "alpha", Some("tok-123"))
            .await
            .unwrap();

        let mut reader = wire.as_slice();
        assert_eq!(
            read_handshake_line(&mut reader).await.unwrap().as_deref(),
            Some("alpha")
        );
        assert_eq!(
            read_handshake_line(&mut reader).await.unwrap().as_deref(),
            Some("tok-123")
        );
        assert_eq!(read_handshake_line(&mut reader).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_handshake_without_token() {
        let mut wire = Vec::new();
        write_handshake(&mut wire, "beta", None).await.unwrap();
        assert_eq!(wire, b"beta\n");
    }

    #[tokio::test]
    async fn test_handshake_line_trims_whitespace() {
        let mut reader: &[u8] = b"  gamma \r\n";
        assert_eq!(
            read_handshake_line(&mut reader).await.unwrap().as_deref(),
            Some("gamma")
        );
    }

    #[tokio::test]
    async fn test_handshake_eof() {
        let mut reader: &[u8] = b"";
        assert_eq!(read_handshake_line(&mut reader).await.unwrap(), None);
    }
}
