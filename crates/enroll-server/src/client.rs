//! Client side of the protocol: one connection, a background read loop that
//! hands every envelope to a callback, and typed request helpers.
//!
//! Replies carry no request id; callers match them by message type.

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use enroll_core::{CompetitionFilter, CompetitionId, Credentials, NewParticipant, ParticipantId};

use crate::codec::{Envelope, EnvelopeCodec, FramingError};
use crate::protocol::{ProtocolError, Request};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("connection closed")]
    Closed,
}

pub struct EnrollClient {
    writer: Mutex<FramedWrite<OwnedWriteHalf, EnvelopeCodec>>,
    reader: JoinHandle<()>,
    cancel: CancellationToken,
}

impl EnrollClient {
    /// Connect and start delivering inbound envelopes to `on_envelope`.
    pub async fn connect<A, F>(addr: A, on_envelope: F) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs,
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        Self::connect_with_codec(addr, EnvelopeCodec::default(), on_envelope).await
    }

    pub async fn connect_with_codec<A, F>(
        addr: A,
        codec: EnvelopeCodec,
        on_envelope: F,
    ) -> Result<Self, ClientError>
    where
        A: ToSocketAddrs,
        F: Fn(Envelope) + Send + Sync + 'static,
    {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let callback = Arc::new(on_envelope);
        let mut frames = FramedRead::new(read_half, codec.clone());
        let reader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    frame = frames.next() => match frame {
                        Some(Ok(envelope)) => callback(envelope),
                        Some(Err(e)) => {
                            warn!(error = %e, "server sent a bad frame, stopping receiver");
                            break;
                        }
                        None => {
                            debug!("server closed the connection");
                            break;
                        }
                    },
                }
            }
        });

        Ok(Self {
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            reader,
            cancel,
        })
    }

    /// Connect and receive envelopes on a channel instead of a callback.
    pub async fn connect_with_channel<A>(
        addr: A,
    ) -> Result<(Self, mpsc::UnboundedReceiver<Envelope>), ClientError>
    where
        A: ToSocketAddrs,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let client = Self::connect(addr, move |envelope| {
            let _ = tx.send(envelope);
        })
        .await?;
        Ok((client, rx))
    }

    /// Send one raw envelope.
    pub async fn send(
        &self,
        message_type: impl Into<String>,
        payload: impl Into<String>,
    ) -> Result<(), ClientError> {
        self.send_envelope(&Envelope::new(message_type, payload)).await
    }

    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<(), ClientError> {
        if self.cancel.is_cancelled() {
            return Err(ClientError::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.send(envelope).await?;
        Ok(())
    }

    pub async fn request(&self, request: &Request) -> Result<(), ClientError> {
        self.send_envelope(&request.to_envelope()?).await
    }

    pub async fn add_participant(&self, name: &str, age: i32) -> Result<(), ClientError> {
        self.request(&Request::AddParticipant(NewParticipant {
            name: name.to_string(),
            age,
        }))
        .await
    }

    pub async fn get_participants_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<(), ClientError> {
        self.request(&Request::GetParticipantsForCompetition(competition_id)).await
    }

    pub async fn get_all_competitions(&self) -> Result<(), ClientError> {
        self.request(&Request::GetAllCompetitions).await
    }

    pub async fn get_all_participants(&self) -> Result<(), ClientError> {
        self.request(&Request::GetAllParticipants).await
    }

    pub async fn get_all_users(&self) -> Result<(), ClientError> {
        self.request(&Request::GetAllUsers).await
    }

    pub async fn authenticate(&self, user_name: &str, password: &str) -> Result<(), ClientError> {
        self.request(&Request::AuthUser(Credentials {
            user_name: user_name.to_string(),
            password: password.to_string(),
        }))
        .await
    }

    pub async fn enroll(
        &self,
        participant_id: ParticipantId,
        competition_id: CompetitionId,
    ) -> Result<(), ClientError> {
        self.request(&Request::EnrollParticipant {
            participant_id,
            competition_id,
        })
        .await
    }

    pub async fn filter_competitions(&self, filter: CompetitionFilter) -> Result<(), ClientError> {
        self.request(&Request::FilterCompetitions(filter)).await
    }

    /// Whether the background receiver has stopped.
    pub fn is_receiver_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Stop the receiver and close the write side.
    pub async fn close(self) -> Result<(), ClientError> {
        self.cancel.cancel();
        let _ = self.reader.await;
        let mut writer = self.writer.into_inner();
        SinkExt::<&Envelope>::close(&mut writer).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{read_envelope, write_envelope, DEFAULT_MAX_FRAME_LENGTH};
    use crate::protocol::message_type as mt;
    use std::time::Duration;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn sends_typed_requests_and_receives_envelopes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let first = read_envelope(&mut socket, DEFAULT_MAX_FRAME_LENGTH).await.unwrap().unwrap();
            let second = read_envelope(&mut socket, DEFAULT_MAX_FRAME_LENGTH).await.unwrap().unwrap();
            write_envelope(&mut socket, &Envelope::empty(mt::UPDATE)).await.unwrap();
            (first, second)
        });

        let (client, mut rx) = EnrollClient::connect_with_channel(addr).await.unwrap();
        client.add_participant("Ana", 9).await.unwrap();
        client
            .enroll(ParticipantId::new(5), CompetitionId::new(12))
            .await
            .unwrap();

        let (first, second) = server.await.unwrap();
        assert_eq!(first.message_type, mt::ADD_PARTICIPANT);
        assert_eq!(second, Envelope::new(mt::ENROLL_PARTICIPANT, "5,12"));

        let pushed = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pushed, Envelope::empty(mt::UPDATE));
        let _ = client.close().await;
    }

    #[tokio::test]
    async fn receiver_stops_when_server_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            drop(socket);
        });

        let (client, mut rx) = EnrollClient::connect_with_channel(addr).await.unwrap();
        server.await.unwrap();
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(next.is_none());
        tokio::time::timeout(Duration::from_secs(5), async {
            while !client.is_receiver_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let err = EnrollClient::connect(addr, |_| {}).await.err().unwrap();
        assert!(matches!(err, ClientError::Io(_)));
    }
}
