//! End-to-end reader/credential sessions over both link shapes

use std::time::Duration;

use bytes::Bytes;
use hex_literal::hex;
use nexum_access::{
    AccessConfig, AuthState, CredentialAuthenticator, CredentialDriver, CredentialListener,
    DirectLink, ErrorKind, Event, EventReceiver, ReaderAuthenticator, ReaderDriver,
    config::{BacCredentialConfig, BadgeCredentialConfig},
    crypto::CipherSuite,
    event_channel,
};
use nexum_apdu_core::TransportError;
use nexum_apdu_transport_link::{
    BlockLink, BlockTransport, FragmentQueue, FragmentingTransport, LinkConfig, fragment,
};

const FULL_SESSION: [Event; 4] = [
    Event::Detected,
    Event::Authenticated,
    Event::ObjectRequested,
    Event::Success,
];

fn events(receiver: &EventReceiver) -> Vec<Event> {
    receiver.try_iter().map(|e| e.event).collect()
}

fn run_direct(
    reader: impl ReaderAuthenticator + 'static,
    credential: impl CredentialAuthenticator + 'static,
) -> (nexum_access::Result<Bytes>, Vec<Event>, Vec<Event>) {
    let (reader_events, reader_rx) = event_channel();
    let (credential_events, credential_rx) = event_channel();

    let link = DirectLink::new(CredentialDriver::new(credential).with_events(credential_events));
    let transport = BlockTransport::new(link, &LinkConfig::default());
    let mut driver = ReaderDriver::new(transport, reader).with_events(reader_events);

    let result = driver.run();
    (result, events(&reader_rx), events(&credential_rx))
}

#[test]
fn bac_session_over_block_link() {
    let config = BacCredentialConfig::default();
    let (object, reader_events, credential_events) =
        run_direct(config.reader().unwrap(), config.credential().unwrap());

    assert_eq!(object.unwrap().as_ref(), config.dg1.as_slice());
    assert_eq!(reader_events, FULL_SESSION);
    assert_eq!(credential_events, FULL_SESSION);
}

#[test]
fn badge_session_over_block_link() {
    for cipher in [CipherSuite::TwoKeyTripleDes, CipherSuite::Aes128] {
        let config = BadgeCredentialConfig {
            cipher,
            ..Default::default()
        };
        let (object, reader_events, credential_events) =
            run_direct(config.reader(), config.credential());

        assert_eq!(object.unwrap().as_ref(), config.sio.as_slice());
        assert_eq!(reader_events, FULL_SESSION);
        assert_eq!(credential_events, FULL_SESSION);
    }
}

#[test]
fn badge_session_over_fragmented_link() {
    let config = AccessConfig::default();
    let link = LinkConfig::new()
        .with_mtu(16)
        .with_queue_capacity(16)
        .with_reply_timeout(Duration::from_secs(5));

    let (to_credential, requests) = FragmentQueue::new(&link).split();
    let (to_reader, replies) = FragmentQueue::new(&link).split();

    let (credential_events, credential_rx) = event_channel();
    let listener = CredentialListener::spawn(
        CredentialDriver::new(config.badge.credential()).with_events(credential_events),
        requests,
        to_reader,
        &link,
    )
    .unwrap();

    let transport = FragmentingTransport::new(to_credential, replies, &link);
    let mut driver = ReaderDriver::new(transport, config.badge.reader());
    let object = driver.run().unwrap();
    assert_eq!(object.as_ref(), config.badge.sio.as_slice());

    // Dropping the reader's transport closes the request queue and stops the worker.
    drop(driver);
    let credential = listener.join().unwrap();
    assert_eq!(credential.phase(), AuthState::Authenticated);
    assert_eq!(events(&credential_rx), FULL_SESSION);
}

#[test]
fn bac_session_over_fragmented_link() {
    let config = BacCredentialConfig::default();
    let link = LinkConfig::new()
        .with_mtu(8)
        .with_queue_capacity(32)
        .with_reply_timeout(Duration::from_secs(5));

    let (to_credential, requests) = FragmentQueue::new(&link).split();
    let (to_reader, replies) = FragmentQueue::new(&link).split();
    let listener = CredentialListener::spawn(
        CredentialDriver::new(config.credential().unwrap()),
        requests,
        to_reader,
        &link,
    )
    .unwrap();

    let transport = FragmentingTransport::new(to_credential, replies, &link);
    let mut driver = ReaderDriver::new(transport, config.reader().unwrap());
    assert_eq!(driver.run().unwrap().as_ref(), config.dg1.as_slice());

    drop(driver);
    listener.join().unwrap();
}

#[test]
fn wrong_document_keys_fail_both_sides() {
    let holder = BacCredentialConfig::default();
    let impostor = BacCredentialConfig {
        document_number: "X12345678".into(),
        ..Default::default()
    };
    let (result, reader_events, credential_events) =
        run_direct(impostor.reader().unwrap(), holder.credential().unwrap());

    // The credential answers 63 00 to a cryptogram it cannot verify.
    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Protocol);
    assert_eq!(
        reader_events,
        [Event::Detected, Event::Error(ErrorKind::Protocol)]
    );
    assert_eq!(
        credential_events,
        [Event::Detected, Event::Error(ErrorKind::Integrity)]
    );
}

#[test]
fn wrong_badge_read_key_fails_authentication() {
    let badge = BadgeCredentialConfig::default();
    let reader = BadgeCredentialConfig {
        read_key: [0x5A; 16],
        ..Default::default()
    };
    let (result, reader_events, credential_events) =
        run_direct(reader.reader(), badge.credential());

    assert!(result.is_err());
    assert_eq!(reader_events.last(), Some(&Event::Error(ErrorKind::Protocol)));
    assert_eq!(
        credential_events,
        [Event::Detected, Event::Error(ErrorKind::Integrity)]
    );
}

#[test]
fn tampered_adf_keys_are_detected_by_the_reader() {
    let badge = BadgeCredentialConfig::default();
    let reader = BadgeCredentialConfig {
        privacy_mac: [0x77; 16],
        ..Default::default()
    };
    let (result, reader_events, _) = run_direct(reader.reader(), badge.credential());

    assert_eq!(result.unwrap_err().kind(), ErrorKind::Integrity);
    assert_eq!(
        reader_events,
        [Event::Detected, Event::Error(ErrorKind::Integrity)]
    );
}

/// Block link that replays stray frames into the credential right before the reader's final
/// authentication step, while the credential is waiting on its challenge
#[derive(Debug)]
struct NoisyLink {
    driver: CredentialDriver,
    noise: Vec<Vec<u8>>,
    pending: Option<Bytes>,
}

fn is_final_auth_step(block: &[u8]) -> bool {
    block.get(1) == Some(&0x82) || block.get(5..8) == Some(&[0x7C, 0x2A, 0x82][..])
}

impl BlockLink for NoisyLink {
    fn send_block(&mut self, block: &[u8]) -> Result<(), TransportError> {
        if is_final_auth_step(block) {
            assert_eq!(self.driver.phase(), AuthState::Challenge1);
            for frame in self.noise.drain(..) {
                assert_eq!(self.driver.handle(&frame), None, "answered {frame:02X?}");
                assert_eq!(self.driver.phase(), AuthState::Challenge1);
            }
        }
        self.pending = self.driver.handle(block);
        Ok(())
    }

    fn receive_block(&mut self, _timeout: Duration) -> Result<Bytes, TransportError> {
        self.pending.take().ok_or(TransportError::Timeout)
    }
}

fn run_with_noise(
    reader: impl ReaderAuthenticator + 'static,
    credential: impl CredentialAuthenticator + 'static,
    mut noise: Vec<Vec<u8>>,
) -> (Bytes, Vec<Event>) {
    noise.extend([
        hex!("00CA0000").to_vec(),
        hex!("00").to_vec(),
        hex!("00A40400FF01").to_vec(),
    ]);
    let (credential_events, credential_rx) = event_channel();
    let link = NoisyLink {
        driver: CredentialDriver::new(credential).with_events(credential_events),
        noise,
        pending: None,
    };
    let transport = BlockTransport::new(link, &LinkConfig::default());
    let mut driver = ReaderDriver::new(transport, reader);

    let object = driver.run().unwrap();
    assert!(driver.into_transport().into_link().noise.is_empty());
    (object, events(&credential_rx))
}

#[test]
fn bac_session_survives_stray_frames() {
    let config = BacCredentialConfig::default();
    let (object, credential_events) = run_with_noise(
        config.reader().unwrap(),
        config.credential().unwrap(),
        vec![hex!("008200000401020304").to_vec()],
    );
    assert_eq!(object.as_ref(), config.dg1.as_slice());
    assert_eq!(credential_events, FULL_SESSION);
}

#[test]
fn badge_session_survives_stray_frames() {
    let config = BadgeCredentialConfig::default();
    let (object, credential_events) = run_with_noise(
        config.reader(),
        config.credential(),
        vec![
            // Repeated challenge, then a cut-off cryptogram template.
            hex!("00870001047C02810000").to_vec(),
            hex!("00870001047C2A8200").to_vec(),
        ],
    );
    assert_eq!(object.as_ref(), config.sio.as_slice());
    assert_eq!(credential_events, FULL_SESSION);
}

#[test]
fn late_reply_from_an_abandoned_exchange_is_discarded() {
    let config = AccessConfig::default();
    let link = LinkConfig::new()
        .with_mtu(16)
        .with_queue_capacity(16)
        .with_reply_timeout(Duration::from_secs(5));

    let (to_credential, requests) = FragmentQueue::new(&link).split();
    let (to_reader, replies) = FragmentQueue::new(&link).split();
    for packet in fragment(&hex!("9000"), link.mtu).unwrap() {
        to_reader.push(&packet).unwrap();
    }
    assert_eq!(to_reader.len(), 1);

    let listener = CredentialListener::spawn(
        CredentialDriver::new(config.badge.credential()),
        requests,
        to_reader,
        &link,
    )
    .unwrap();

    let transport = FragmentingTransport::new(to_credential, replies, &link);
    let mut driver = ReaderDriver::new(transport, config.badge.reader());
    assert_eq!(driver.run().unwrap().as_ref(), config.badge.sio.as_slice());

    drop(driver);
    listener.join().unwrap();
}
