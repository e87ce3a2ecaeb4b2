//! End-to-end producer tests against a scripted in-process TCP broker.

use std::sync::Arc;
use std::time::Duration;
use strym_client::{Producer, ProducerConfig, TcpConnector};
use strym_protocol::{decode_frame, encode_frame, Command};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

async fn read_command(stream: &mut TcpStream) -> std::io::Result<Command> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    decode_frame(&body).map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

async fn write_command(stream: &mut TcpStream, command: &Command) -> std::io::Result<()> {
    let frame = encode_frame(command)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&frame).await
}

/// Serve one client connection: register producers and ack sends in order.
async fn serve_connection(stream: &mut TcpStream, ledger_id: u64, entry_id: &mut u64) {
    loop {
        let command = match read_command(stream).await {
            Ok(command) => command,
            Err(_) => return,
        };
        match command {
            Command::Producer {
                request_id,
                producer_name,
                ..
            } => {
                let response = Command::ProducerSuccess {
                    request_id,
                    producer_name: producer_name.unwrap_or_else(|| "broker-assigned-1".into()),
                };
                if write_command(stream, &response).await.is_err() {
                    return;
                }
            }
            Command::Send {
                producer_id,
                sequence_id,
                ..
            } => {
                let receipt = Command::SendReceipt {
                    producer_id,
                    sequence_id,
                    ledger_id,
                    entry_id: *entry_id,
                };
                *entry_id += 1;
                if write_command(stream, &receipt).await.is_err() {
                    return;
                }
            }
            Command::CloseProducer { request_id, .. } => {
                let _ = write_command(stream, &Command::Success { request_id }).await;
            }
            Command::Ping => {
                let _ = write_command(stream, &Command::Pong).await;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn publish_and_receive_receipts_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let mut entry_id = 0u64;
            serve_connection(&mut stream, 7, &mut entry_id).await;
        }
    });

    let connector = Arc::new(TcpConnector::new(addr.to_string()));
    let producer = Producer::new(
        connector,
        "persistent/events",
        0,
        ProducerConfig::builder().max_pending_messages(16).build(),
    )
    .await
    .expect("producer creation");

    assert_eq!(producer.producer_name().as_deref(), Some("broker-assigned-1"));

    let mut futures = Vec::new();
    for i in 0..3 {
        futures.push(producer.send_async(format!("payload-{i}").into_bytes()).await);
    }

    for (i, fut) in futures.into_iter().enumerate() {
        let id = tokio::time::timeout(Duration::from_secs(5), fut)
            .await
            .expect("receipt within 5s")
            .expect("send succeeds");
        assert_eq!(id.ledger_id, 7);
        assert_eq!(id.entry_id, i as u64);
        assert_eq!(id.partition_index, 0);
    }

    producer.close_async().await.expect("close");
    assert!(!producer.is_connected());
}

#[tokio::test]
async fn replays_unacked_sends_after_connection_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    tokio::spawn(async move {
        // First connection: register the producer, swallow two sends without
        // acking, then drop the socket.
        {
            let (mut stream, _) = listener.accept().await.expect("first accept");
            let mut seen_sends = 0;
            loop {
                let command = match read_command(&mut stream).await {
                    Ok(command) => command,
                    Err(_) => break,
                };
                match command {
                    Command::Producer {
                        request_id,
                        producer_name,
                        ..
                    } => {
                        let response = Command::ProducerSuccess {
                            request_id,
                            producer_name: producer_name
                                .unwrap_or_else(|| "broker-assigned-2".into()),
                        };
                        write_command(&mut stream, &response).await.expect("respond");
                    }
                    Command::Send { .. } => {
                        seen_sends += 1;
                        if seen_sends == 2 {
                            break; // drop without acking anything
                        }
                    }
                    _ => {}
                }
            }
        }

        // Second connection: normal service, acks everything replayed.
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => return,
            };
            let mut entry_id = 0u64;
            serve_connection(&mut stream, 9, &mut entry_id).await;
        }
    });

    let connector = Arc::new(TcpConnector::new(addr.to_string()));
    let producer = Producer::new(
        connector,
        "persistent/events",
        0,
        ProducerConfig::builder().max_pending_messages(16).build(),
    )
    .await
    .expect("producer creation");

    let fut_a = producer.send_async("first").await;
    let fut_b = producer.send_async("second").await;

    // Both sends were swallowed; the broker drops the connection and the
    // producer replays them, in order, on the next one.
    let id_a = tokio::time::timeout(Duration::from_secs(10), fut_a)
        .await
        .expect("replayed receipt within 10s")
        .expect("first send succeeds");
    let id_b = tokio::time::timeout(Duration::from_secs(10), fut_b)
        .await
        .expect("replayed receipt within 10s")
        .expect("second send succeeds");

    assert_eq!(id_a.ledger_id, 9);
    assert_eq!(id_b.ledger_id, 9);
    assert!(id_a.entry_id < id_b.entry_id);

    producer.close_async().await.expect("close");
}
