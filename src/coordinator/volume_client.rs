//! Coordinator → volume requests. One short-lived connection per call.

use crate::common::protocol::{CapacityResponse, DeleteRequest, DeleteResponse};
use crate::common::{read_message, write_message, Error, Message, MessageType, Result};
use tokio::net::TcpStream;

pub struct VolumeClient {
    addr: String,
}

impl VolumeClient {
    pub fn new(addr: String) -> Self {
        Self { addr }
    }

    async fn call(&self, request: &Message, expected: MessageType) -> Result<Message> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| Error::ConnectionFailed {
                addr: self.addr.clone(),
                source,
            })?;
        write_message(&mut stream, request).await?;
        read_message(&mut stream).await?.expect(expected)
    }

    /// Ask the volume how many bytes it has free
    pub async fn query_capacity(&self) -> Result<i64> {
        let reply = self
            .call(
                &Message::empty(MessageType::CapacityQuery),
                MessageType::CapacityResp,
            )
            .await?;
        let resp: CapacityResponse = reply.decode()?;
        Ok(resp.available_bytes)
    }

    /// Ask the volume to delete a file; returns the volume's verdict
    pub async fn delete(&self, filename: &str) -> Result<bool> {
        let request = Message::new(
            MessageType::NodeDeleteReq,
            &DeleteRequest {
                filename: filename.to_string(),
            },
        )?;
        let reply = self.call(&request, MessageType::NodeDeleteAck).await?;
        let resp: DeleteResponse = reply.decode()?;
        Ok(resp.success)
    }
}
