//! End-to-end session scenarios against a scripted in-memory server.

use std::time::Duration;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use imap_session::{
    connect, AuthPlainCommand, Capability, CommandType, DebugMode, FailureType, IdleCommand,
    ImapRequest, SessionConfig, SimpleCommand, SASL_IR,
};

fn config(session_id: u64) -> SessionConfig {
    SessionConfig {
        session_id,
        debug_mode: DebugMode::DebugWithRedaction,
        read_idle_timeout: Some(Duration::from_secs(5)),
    }
}

async fn send(server: &mut DuplexStream, data: &str) {
    server.write_all(data.as_bytes()).await.unwrap();
}

async fn expect_line(server: &mut DuplexStream, expected: &str) {
    let mut buf = vec![0u8; expected.len()];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(String::from_utf8_lossy(&buf), expected);
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

#[tokio::test]
async fn connect_and_logout() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;

    let (session, greeting) = connect(client, config(1)).await.unwrap();
    assert!(greeting.is_status("OK"));
    assert_eq!(greeting.text, "ready");
    assert!(session.is_active());

    let future = session.submit(SimpleCommand::logout()).unwrap();
    expect_line(&mut server, "A000001 LOGOUT\r\n").await;
    send(
        &mut server,
        "* BYE server closing\r\nA000001 OK LOGOUT completed\r\n",
    )
    .await;

    let response = future.await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.tag, "A000001");
    assert_eq!(response.untagged.len(), 1);
    assert!(response.untagged[0].is_status("BYE"));

    eventually(|| !session.is_active()).await;
    let error = session.submit(SimpleCommand::noop()).unwrap_err();
    assert_eq!(error.kind(), FailureType::ConnectionInactive);
    assert_eq!(error.session_id(), 1);
}

#[tokio::test]
async fn connect_rejects_non_ok_greeting() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* BYE not today\r\n").await;

    let error = connect(client, config(2)).await.unwrap_err();
    assert_eq!(
        error.kind(),
        FailureType::ConnectionFailedWithoutOkResponse
    );
}

#[tokio::test]
async fn connect_times_out_without_greeting() {
    let (client, server) = tokio::io::duplex(4096);
    let mut config = config(3);
    config.read_idle_timeout = Some(Duration::from_millis(50));

    let error = connect(client, config).await.unwrap_err();
    assert_eq!(error.kind(), FailureType::ConnectionFailedExceedIdleMax);
    drop(server);
}

#[tokio::test]
async fn connect_fails_when_channel_closes_early() {
    let (client, server) = tokio::io::duplex(4096);
    drop(server);

    let error = connect(client, config(4)).await.unwrap_err();
    assert_eq!(error.kind(), FailureType::ConnectionInactive);
}

#[tokio::test]
async fn second_submission_is_rejected_while_pending() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(5)).await.unwrap();

    let first = session.submit(SimpleCommand::noop()).unwrap();
    let error = session.submit(SimpleCommand::noop()).unwrap_err();
    assert_eq!(error.kind(), FailureType::CommandInProgress);

    expect_line(&mut server, "A000001 NOOP\r\n").await;
    send(&mut server, "A000001 OK NOOP completed\r\n").await;
    assert!(first.await.unwrap().is_ok());
}

#[tokio::test]
async fn authenticate_plain_over_continuation() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(6)).await.unwrap();

    let future = session
        .submit(AuthPlainCommand::new(
            "bob",
            "munchkin",
            &Capability::default(),
            session.session_id(),
        ))
        .unwrap();
    expect_line(&mut server, "A000001 AUTHENTICATE PLAIN\r\n").await;
    send(&mut server, "+ \r\n").await;
    expect_line(&mut server, "AGJvYgBtdW5jaGtpbg==\r\n").await;
    send(
        &mut server,
        "A000001 OK [CAPABILITY IMAP4rev1 SASL-IR] authenticated\r\n",
    )
    .await;

    let response = future.await.unwrap();
    assert!(response.is_ok());

    // The capability code on the completion superseded the refresh; the
    // next submission runs right away with the next tag.
    eventually(|| session.capabilities().is_some()).await;
    assert!(session.capabilities().unwrap().has(SASL_IR));

    let noop = session.submit(SimpleCommand::noop()).unwrap();
    expect_line(&mut server, "A000002 NOOP\r\n").await;
    send(&mut server, "A000002 OK NOOP completed\r\n").await;
    assert!(noop.await.unwrap().is_ok());
}

#[tokio::test]
async fn capabilities_refresh_automatically_after_login() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(7)).await.unwrap();

    let login = session
        .submit(SimpleCommand::login("alice", "hunter2"))
        .unwrap();
    expect_line(&mut server, "A000001 LOGIN alice hunter2\r\n").await;
    send(&mut server, "A000001 OK logged in\r\n").await;
    assert!(login.await.unwrap().is_ok());

    // No capability code on the completion: the session reissues
    // CAPABILITY on its own before accepting further submissions.
    expect_line(&mut server, "A000002 CAPABILITY\r\n").await;
    send(
        &mut server,
        "* CAPABILITY IMAP4rev1 SASL-IR AUTH=PLAIN\r\nA000002 OK done\r\n",
    )
    .await;

    eventually(|| {
        session
            .capabilities()
            .is_some_and(|capability| capability.has(SASL_IR))
    })
    .await;
    assert!(session
        .capabilities()
        .unwrap()
        .has_param("AUTH", "PLAIN"));

    // The refresh occupies the slot until its completion is processed.
    let noop = loop {
        match session.submit(SimpleCommand::noop()) {
            Ok(future) => break future,
            Err(error) => {
                assert_eq!(error.kind(), FailureType::CommandInProgress);
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    };
    expect_line(&mut server, "A000003 NOOP\r\n").await;
    send(&mut server, "A000003 OK NOOP completed\r\n").await;
    assert!(noop.await.unwrap().is_ok());
}

#[tokio::test]
async fn idle_streams_until_terminated() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(8)).await.unwrap();

    let (command, mut updates) = IdleCommand::new();
    assert_eq!(command.command_type(), CommandType::Idle);
    let future = session.submit(command).unwrap();

    expect_line(&mut server, "A000001 IDLE\r\n").await;
    send(&mut server, "+ idling\r\n").await;
    send(&mut server, "* 2 EXISTS\r\n* 1 RECENT\r\n").await;

    let first = updates.recv().await.unwrap();
    assert_eq!(first.keyword, "EXISTS");
    assert_eq!(first.number, Some(2));
    let second = updates.recv().await.unwrap();
    assert_eq!(second.keyword, "RECENT");

    session.terminate_pending().unwrap();
    expect_line(&mut server, "DONE\r\n").await;
    send(&mut server, "A000001 OK IDLE terminated\r\n").await;

    let response = future.await.unwrap();
    assert!(response.is_ok());
    // Everything streamed; nothing was accumulated on the result.
    assert!(response.untagged.is_empty());
    assert!(session.is_active());
}

fn deflate(compress: &mut Compress, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; data.len() * 2 + 128];
    let before_in = compress.total_in();
    let before_out = compress.total_out();
    compress
        .compress(data, &mut out, FlushCompress::Sync)
        .unwrap();
    assert_eq!((compress.total_in() - before_in) as usize, data.len());
    out.truncate((compress.total_out() - before_out) as usize);
    out
}

fn inflate(decompress: &mut Decompress, data: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; data.len() * 16 + 256];
    let before_out = decompress.total_out();
    decompress
        .decompress(data, &mut out, FlushDecompress::None)
        .unwrap();
    out.truncate((decompress.total_out() - before_out) as usize);
    out
}

#[tokio::test]
async fn compress_deflate_splices_both_directions() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(9)).await.unwrap();

    let mut server_out = Compress::new(Compression::default(), false);
    let mut server_in = Decompress::new(false);

    let future = session.submit(SimpleCommand::compress_deflate()).unwrap();
    expect_line(&mut server, "A000001 COMPRESS DEFLATE\r\n").await;

    // Compressed bytes ride immediately behind the completion line; the
    // session must splice the inflater in before framing them.
    let mut burst = b"A000001 OK DEFLATE active\r\n".to_vec();
    burst.extend(deflate(&mut server_out, b"* 1 RECENT\r\n"));
    server.write_all(&burst).await.unwrap();
    assert!(future.await.unwrap().is_ok());

    // Client-to-server traffic is now compressed too.
    let noop = session.submit(SimpleCommand::noop()).unwrap();
    let mut inflated = Vec::new();
    while inflated.len() < "A000002 NOOP\r\n".len() {
        let mut chunk = [0u8; 512];
        let n = server.read(&mut chunk).await.unwrap();
        assert!(n > 0);
        inflated.extend(inflate(&mut server_in, &chunk[..n]));
    }
    assert_eq!(String::from_utf8_lossy(&inflated), "A000002 NOOP\r\n");

    let mut reply = deflate(&mut server_out, b"* 7 EXISTS\r\n");
    reply.extend(deflate(&mut server_out, b"A000002 OK NOOP completed\r\n"));
    server.write_all(&reply).await.unwrap();

    let response = noop.await.unwrap();
    assert!(response.is_ok());
    assert_eq!(response.untagged.len(), 1);
    assert_eq!(response.untagged[0].keyword, "EXISTS");
    assert_eq!(response.untagged[0].number, Some(7));
}

#[tokio::test]
async fn read_idle_fails_the_pending_command() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let mut config = config(10);
    config.read_idle_timeout = Some(Duration::from_millis(80));
    let (session, _) = connect(client, config).await.unwrap();

    let future = session.submit(SimpleCommand::noop()).unwrap();
    expect_line(&mut server, "A000001 NOOP\r\n").await;

    let error = future.await.unwrap_err();
    assert_eq!(error.kind(), FailureType::ConnectionFailedExceedIdleMax);
    eventually(|| !session.is_active()).await;
}

#[tokio::test]
async fn unexpected_bye_is_terminal() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(11)).await.unwrap();

    let future = session.submit(SimpleCommand::noop()).unwrap();
    expect_line(&mut server, "A000001 NOOP\r\n").await;
    send(&mut server, "* BYE shutting down\r\n").await;

    let error = future.await.unwrap_err();
    assert_eq!(error.kind(), FailureType::ServerResponseByeUnexpected);
    eventually(|| !session.is_active()).await;
}

#[tokio::test]
async fn mismatched_tag_is_a_protocol_violation() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(12)).await.unwrap();

    let future = session.submit(SimpleCommand::noop()).unwrap();
    expect_line(&mut server, "A000001 NOOP\r\n").await;
    send(&mut server, "A999999 OK who is this\r\n").await;

    let error = future.await.unwrap_err();
    assert_eq!(error.kind(), FailureType::ProtocolViolation);
    eventually(|| !session.is_active()).await;
}

#[tokio::test]
async fn no_completion_maps_to_a_typed_error() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(&mut server, "* OK ready\r\n").await;
    let (session, _) = connect(client, config(14)).await.unwrap();

    let future = session
        .submit(SimpleCommand::subscribe("missing folder"))
        .unwrap();
    expect_line(&mut server, "A000001 SUBSCRIBE \"missing folder\"\r\n").await;
    send(&mut server, "A000001 NO no such mailbox\r\n").await;

    let response = future.await.unwrap();
    assert!(!response.is_ok());
    let error = response.into_result(14).unwrap_err();
    assert_eq!(error.kind(), FailureType::ServerResponseNo);
    // A NO completion is not terminal; the session keeps going.
    assert!(session.is_active());
}

#[tokio::test]
async fn greeting_capability_code_seeds_the_snapshot() {
    let (client, mut server) = tokio::io::duplex(4096);
    send(
        &mut server,
        "* OK [CAPABILITY IMAP4rev1 SASL-IR AUTH=OAUTHBEARER] ready\r\n",
    )
    .await;

    let (session, greeting) = connect(client, config(13)).await.unwrap();
    assert!(greeting.is_status("OK"));
    let capability = session.capabilities().unwrap();
    assert!(capability.has(SASL_IR));
    assert!(capability.has_param("AUTH", "OAUTHBEARER"));
}
