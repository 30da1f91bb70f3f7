//! Line-delimited JSON over TCP.
//!
//! The stream is split on connect: the read half lives in the client's reader loop and the
//! write half in a dedicated writer task, so a pending read is never cancelled by a write.

use crate::error::{StratumError, StratumResult};
use crate::protocol::{StratumMessage, StratumRequest, parse_message};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

pub struct MessageReader {
    reader: BufReader<OwnedReadHalf>,
    line_buf: String,
}

pub struct MessageWriter {
    writer: BufWriter<OwnedWriteHalf>,
}

/// Open a TCP connection to `host:port` and split it into message halves
pub async fn connect(host: &str, port: u16) -> StratumResult<(MessageReader, MessageWriter)> {
    log::debug!("Connecting to pool {}:{}", host, port);
    let stream = TcpStream::connect((host, port)).await.map_err(|e| StratumError::ConnectionFailed(e.to_string()))?;
    stream.set_nodelay(true)?;
    Ok(split(stream))
}

pub fn split(stream: TcpStream) -> (MessageReader, MessageWriter) {
    let (read_half, write_half) = stream.into_split();
    (
        MessageReader { reader: BufReader::new(read_half), line_buf: String::with_capacity(4096) },
        MessageWriter { writer: BufWriter::new(write_half) },
    )
}

impl MessageReader {
    /// Read one message, `None` on EOF.
    ///
    /// A line that is not valid stratum JSON yields `InvalidMessage`; the connection stays usable.
    pub async fn read_message(&mut self) -> StratumResult<Option<StratumMessage>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf).await? == 0 {
                return Ok(None);
            }

            let line = self.line_buf.trim();
            if line.is_empty() {
                continue;
            }

            log::trace!("rx: {}", line);
            return parse_message(line.as_bytes())
                .map(Some)
                .map_err(|e| StratumError::InvalidMessage(format!("Failed to parse JSON: {}, line: {}", e, line)));
        }
    }
}

impl MessageWriter {
    pub async fn write_request(&mut self, request: &StratumRequest) -> StratumResult<()> {
        let json = serde_json::to_string(request)?;
        log::trace!("tx: {}", json);

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_request_and_messages_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            let line = String::from_utf8_lossy(&buf[..n]).to_string();
            socket
                .write_all(b"\n{\"id\":1,\"result\":[null,\"ab\",4],\"error\":null}\nnot json\n{\"id\":null,\"method\":\"mining.notify\",\"params\":[\"j1\",true]}\n")
                .await
                .unwrap();
            line
        });

        let (mut reader, mut writer) = connect("127.0.0.1", port).await.unwrap();
        writer.write_request(&StratumRequest::new(1, "mining.subscribe", vec![json!("test/1.0")])).await.unwrap();

        let Some(StratumMessage::Response(resp)) = reader.read_message().await.unwrap() else { panic!("expected a response") };
        assert_eq!(resp.id, Some(1));
        assert!(matches!(reader.read_message().await, Err(StratumError::InvalidMessage(_))));
        let Some(StratumMessage::Request(note)) = reader.read_message().await.unwrap() else { panic!("expected a notification") };
        assert_eq!(note.method, "mining.notify");
        assert_eq!(reader.read_message().await.unwrap(), None);

        let sent = server.await.unwrap();
        assert!(sent.ends_with('\n'));
        assert!(sent.contains("\"method\":\"mining.subscribe\""));
    }
}
