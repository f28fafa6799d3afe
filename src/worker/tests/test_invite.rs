use super::*;
use crate::worker::WorkerState;

#[tokio::test]
async fn test_invite_answered_with_engine_sdp() -> crate::Result<()> {
    let mut harness = create_harness(Script::Answer(ANSWER_SDP), 1);
    harness.handle(&create_invite("call-1@10.0.0.1")).await?;

    assert_eq!(
        harness.probe.events(),
        vec![
            Event::Sent(100, false),
            Event::Sent(180, false),
            Event::Negotiate,
            Event::Sent(200, true),
        ]
    );
    let bodies = harness.probe.bodies();
    assert_eq!(bodies.last().map(|b| b.as_slice()), Some(ANSWER_SDP));

    // answered calls are remembered at once
    assert!(harness.gc.is_known_call("call-1@10.0.0.1"));
    assert_eq!(harness.gc.active_calls(), 1);
    assert!(harness.worker.is_ready());
    assert!(harness.worker.transaction().is_none());
    Ok(())
}

#[tokio::test]
async fn test_duplicate_invite_is_not_renegotiated() -> crate::Result<()> {
    let mut harness = create_harness(Script::Answer(ANSWER_SDP), 1);
    let invite = create_invite("call-2@10.0.0.1");
    harness.handle(&invite).await?;
    harness.probe.events();

    harness.handle(&invite).await?;
    let events = harness.probe.events();
    assert_eq!(events.len(), 5);
    assert_eq!(events[4], Event::Sent(200, false));
    assert_eq!(harness.rtp.negotiations.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_without_ports() -> crate::Result<()> {
    let mut harness = create_harness(Script::NoPorts, 2);
    harness.handle(&create_invite("call-3@10.0.0.1")).await?;

    assert_eq!(
        harness.probe.events(),
        vec![
            Event::Sent(100, false),
            Event::Sent(180, false),
            Event::Negotiate,
            Event::Sent(200, false),
            Event::Sent(180, false),
            Event::Negotiate,
            Event::Sent(200, false),
        ]
    );
    assert!(!harness.gc.is_known_call("call-3@10.0.0.1"));
    assert_eq!(harness.worker.state(), WorkerState::Ready);
    Ok(())
}

#[tokio::test]
async fn test_negotiation_failure_releases_rtp_handle() -> crate::Result<()> {
    let mut harness = create_harness(Script::Fail, 3);
    harness.handle(&create_invite("call-4@10.0.0.1")).await?;

    // the first failure drops the handle, later rounds have nothing to ask
    assert_eq!(harness.rtp.negotiations.load(Ordering::SeqCst), 1);
    let events = harness.probe.events();
    assert_eq!(events.first(), Some(&Event::Sent(100, false)));
    assert_eq!(
        events
            .iter()
            .filter(|e| **e == Event::Sent(200, false))
            .count(),
        3
    );
    assert!(!harness.worker.has_rtp());

    harness.handle(&create_invite("call-5@10.0.0.1")).await?;
    assert_eq!(harness.connector.connects.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_static_headers_and_contact_applied() -> crate::Result<()> {
    let mut harness = create_harness(Script::Answer(ANSWER_SDP), 1);
    let receiver = std::net::UdpSocket::bind("127.0.0.1:0")?;
    receiver.set_read_timeout(Some(Duration::from_millis(500)))?;
    harness
        .worker
        .handle(
            &create_request("OPTIONS", "call-6@10.0.0.1", ""),
            Some(receiver.local_addr()?),
        )
        .await?;

    let mut buf = vec![0u8; 65535];
    let (len, _) = receiver.recv_from(&mut buf)?;
    let text = String::from_utf8_lossy(&buf[..len]).to_string();
    assert!(text.starts_with("SIP/2.0 200"));
    assert!(text.contains("User-Agent: sipd"));
    assert!(text.contains("Contact: <sip:10.0.0.2:5060>"));
    assert!(!text.contains("sip:alice@10.0.0.1"));
    assert!(text.contains("Allow: INVITE, ACK, BYE, CANCEL, OPTIONS"));
    Ok(())
}
