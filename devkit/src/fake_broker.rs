/*!
Minimal MQTT 3.1.1 endpoint on a local TCP port

Enough of the protocol to drive the real rumqttc transport in tests:
answers CONNECT with a chosen CONNACK code, records the PUBLISH packets
the agent sends, and can push a PUBLISH to the agent.
*/

use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH: u8 = 0x30;

pub const CONNACK_ACCEPTED: u8 = 0x00;
pub const CONNACK_BAD_CREDENTIALS: u8 = 0x04;

/// A PUBLISH packet received from the agent
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

impl ReceivedPublish {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

pub struct FakeBroker {
    listener: TcpListener,
}

impl FakeBroker {
    pub async fn bind() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Ok(Self { listener })
    }

    pub fn addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one client and answer its CONNECT with `return_code`
    pub async fn accept(&self, return_code: u8) -> io::Result<FakeConnection> {
        let (stream, peer) = self.listener.accept().await?;
        let mut connection = FakeConnection { stream };
        let (header, _) = connection.read_packet().await?;
        if header & 0xF0 != CONNECT {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("expected CONNECT, got packet type {:#04x}", header),
            ));
        }
        connection
            .stream
            .write_all(&[CONNACK, 0x02, 0x00, return_code])
            .await?;
        info!("[FAKE] Accepted {} with CONNACK code {}", peer, return_code);
        Ok(connection)
    }
}

pub struct FakeConnection {
    stream: TcpStream,
}

impl FakeConnection {
    /// Deliver a QoS 0 PUBLISH to the agent
    pub async fn publish_to_client(&mut self, topic: &str, payload: &[u8]) -> io::Result<()> {
        let topic_len = u16::try_from(topic.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "topic too long"))?;
        let mut body = Vec::with_capacity(2 + topic.len() + payload.len());
        body.extend_from_slice(&topic_len.to_be_bytes());
        body.extend_from_slice(topic.as_bytes());
        body.extend_from_slice(payload);

        let mut packet = vec![PUBLISH];
        encode_remaining_length(body.len(), &mut packet);
        packet.extend_from_slice(&body);
        self.stream.write_all(&packet).await
    }

    /// Read packets until a PUBLISH on `topic` arrives
    ///
    /// `None` when `budget` runs out or the agent closes the connection.
    pub async fn wait_for_publish(&mut self, topic: &str, budget: Duration) -> Option<ReceivedPublish> {
        let deadline = tokio::time::Instant::now() + budget;
        loop {
            let packet = tokio::time::timeout_at(deadline, self.read_packet()).await;
            let (header, body) = match packet {
                Ok(Ok(packet)) => packet,
                _ => return None,
            };
            if header & 0xF0 != PUBLISH {
                continue;
            }
            if let Some(publish) = decode_publish(header, &body) {
                if publish.topic == topic {
                    return Some(publish);
                }
            }
        }
    }

    async fn read_packet(&mut self) -> io::Result<(u8, Vec<u8>)> {
        let header = self.stream.read_u8().await?;
        let mut length = 0usize;
        let mut shift = 0;
        loop {
            let byte = self.stream.read_u8().await?;
            length |= usize::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 21 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "malformed remaining length"));
            }
        }
        let mut body = vec![0; length];
        self.stream.read_exact(&mut body).await?;
        Ok((header, body))
    }
}

fn encode_remaining_length(mut length: usize, out: &mut Vec<u8>) {
    loop {
        let mut byte = (length % 128) as u8;
        length /= 128;
        if length > 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if length == 0 {
            break;
        }
    }
}

fn decode_publish(header: u8, body: &[u8]) -> Option<ReceivedPublish> {
    let qos = (header >> 1) & 0x03;
    let topic_len = usize::from(u16::from_be_bytes([*body.first()?, *body.get(1)?]));
    let topic = std::str::from_utf8(body.get(2..2 + topic_len)?).ok()?;
    let mut offset = 2 + topic_len;
    if qos > 0 {
        offset += 2;
    }
    Some(ReceivedPublish {
        topic: topic.to_string(),
        payload: body.get(offset..)?.to_vec(),
        retain: header & 0x01 == 1,
    })
}
