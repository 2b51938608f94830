//! One client connection to the simulated rover

use crate::rover::SimRover;
use anyhow::{Context, Result};
use rover_shared::{codec, ClientOptions, Command, FrameDecoder, Packet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Serve one connection until the client hangs up
///
/// The client's primary and drive sockets are indistinguishable here; the
/// drive socket simply never subscribes to telemetry.
pub async fn run<S>(stream: S, peer: String, rover: Arc<SimRover>, period: Duration) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::<Command>::new();
    let mut read_buf = vec![0u8; 4096];
    let mut options = ClientOptions::NONE;

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            result = reader.read(&mut read_buf) => {
                let n = result.with_context(|| format!("Read error from {}", peer))?;
                if n == 0 {
                    info!("Client disconnected: {}", peer);
                    return Ok(());
                }
                decoder.extend(&read_buf[..n]);

                while let Some(decoded) = decoder.decode_next() {
                    let command = match decoded {
                        Ok(command) => command,
                        Err(e) => {
                            warn!("Bad command from {}: {}", peer, e);
                            continue;
                        }
                    };
                    debug!("{} -> {:?}", peer, command);

                    let reply = match command {
                        Command::GetCharacteristics => {
                            Some(Packet::Characteristics(Box::new(rover.characteristics())))
                        }
                        Command::GetHealth => Some(Packet::Health(rover.health())),
                        Command::SetOptions(next) => {
                            info!("{} subscribed with options {}", peer, next);
                            options = next;
                            None
                        }
                        Command::Drive(drive) => {
                            rover.apply_drive(&drive);
                            None
                        }
                    };

                    if let Some(packet) = reply {
                        writer.write_all(&codec::encode_packet(&packet)).await?;
                    }
                }
            }

            _ = ticker.tick() => {
                if options.contains(ClientOptions::LISTEN_DRIVETRAIN) {
                    let packet = Packet::Drivetrain(rover.drivetrain());
                    writer.write_all(&codec::encode_packet(&packet)).await?;
                }
                if options.contains(ClientOptions::LISTEN_WHISKERS) {
                    let packet = Packet::Whiskers(rover.whiskers());
                    writer.write_all(&codec::encode_packet(&packet)).await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    fn spawn_session(rover: Arc<SimRover>) -> (DuplexStream, JoinHandle<Result<()>>) {
        let (client, server) = duplex(8192);
        let task = tokio::spawn(run(
            server,
            "test".into(),
            rover,
            Duration::from_millis(20),
        ));
        (client, task)
    }

    async fn next_packet(
        client: &mut DuplexStream,
        decoder: &mut FrameDecoder<Packet>,
    ) -> Packet {
        let mut buf = [0u8; 1024];
        loop {
            if let Some(decoded) = decoder.decode_next() {
                return decoded.expect("valid packet");
            }
            let n = timeout(Duration::from_secs(2), client.read(&mut buf))
                .await
                .expect("timed out")
                .expect("read");
            assert!(n > 0, "session closed");
            decoder.extend(&buf[..n]);
        }
    }

    #[tokio::test]
    async fn test_answers_requests() {
        let rover = Arc::new(SimRover::new());
        let (mut client, _task) = spawn_session(rover.clone());
        let mut decoder = FrameDecoder::new();

        client.write_all(b"GETCHARS:\n").await.expect("write");
        let packet = next_packet(&mut client, &mut decoder).await;
        assert_eq!(
            packet,
            Packet::Characteristics(Box::new(rover.characteristics()))
        );

        client.write_all(b"GETHEALTH:\n").await.expect("write");
        assert!(matches!(
            next_packet(&mut client, &mut decoder).await,
            Packet::Health(_)
        ));
    }

    #[tokio::test]
    async fn test_streams_subscribed_telemetry() {
        let rover = Arc::new(SimRover::new());
        let (mut client, _task) = spawn_session(rover.clone());
        let mut decoder = FrameDecoder::new();

        client
            .write_all(b"MDRIVE:0.5|-0.25\nSETOPTS:1\n")
            .await
            .expect("write");

        match next_packet(&mut client, &mut decoder).await {
            Packet::Drivetrain(drive) => {
                assert_eq!(drive.motors, [0.5, 0.5, 0.5, -0.25, -0.25, -0.25]);
            }
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_line_is_skipped() {
        let rover = Arc::new(SimRover::new());
        let (mut client, task) = spawn_session(rover);
        let mut decoder = FrameDecoder::new();

        client
            .write_all(b"SELFDESTRUCT:1\nGETHEALTH:\n")
            .await
            .expect("write");
        assert!(matches!(
            next_packet(&mut client, &mut decoder).await,
            Packet::Health(_)
        ));

        drop(client);
        let result = timeout(Duration::from_secs(2), task)
            .await
            .expect("session should end")
            .expect("join");
        assert!(result.is_ok());
    }
}
