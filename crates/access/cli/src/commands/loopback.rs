//! Reader and credential in one process

use eyre::{WrapErr, eyre};
use nexum_access::{
    AccessConfig, CredentialAuthenticator, CredentialDriver, CredentialListener, DirectLink,
    EventReceiver, ReaderAuthenticator, ReaderDriver, Scheme, event_channel,
};
use nexum_apdu_transport_link::{BlockTransport, FragmentQueue, FragmentingTransport};
use tracing::info;

use crate::{SchemeArg, TransportArg};

type Roles = (Box<dyn ReaderAuthenticator>, Box<dyn CredentialAuthenticator>);

fn roles(config: &AccessConfig, scheme: Scheme) -> eyre::Result<Roles> {
    Ok(match scheme {
        Scheme::Bac => (
            Box::new(config.bac.reader()?),
            Box::new(config.bac.credential()?),
        ),
        Scheme::Badge => (
            Box::new(config.badge.reader()),
            Box::new(config.badge.credential()),
        ),
    })
}

/// Authenticate a reader against a credential and print the object it reads
pub(crate) fn loopback_command(
    config: &AccessConfig,
    scheme: Option<SchemeArg>,
    transport: TransportArg,
) -> eyre::Result<()> {
    let scheme = match scheme {
        Some(SchemeArg::Bac) => Scheme::Bac,
        Some(SchemeArg::Badge) => Scheme::Badge,
        None => config.scheme,
    };
    let (reader, credential) = roles(config, scheme)?;
    let link = config.link.link_config();

    let (reader_events, reader_rx) = event_channel();
    let (credential_events, credential_rx) = event_channel();
    let credential = CredentialDriver::new(credential).with_events(credential_events);

    info!(%scheme, ?transport, "Starting loopback session");
    let object = match transport {
        TransportArg::Block => {
            let transport = BlockTransport::new(DirectLink::new(credential), &link);
            ReaderDriver::new(transport, reader)
                .with_events(reader_events)
                .run()
        }
        TransportArg::Fragmented => {
            let (to_credential, requests) = FragmentQueue::new(&link).split();
            let (to_reader, replies) = FragmentQueue::new(&link).split();
            let listener = CredentialListener::spawn(credential, requests, to_reader, &link)?;

            let transport = FragmentingTransport::new(to_credential, replies, &link);
            let result = ReaderDriver::new(transport, reader)
                .with_events(reader_events)
                .run();
            listener.join()?;
            result
        }
    };

    print_events("reader", &reader_rx);
    print_events("credential", &credential_rx);

    let object = object.wrap_err("reader session failed")?;
    if object.is_empty() {
        return Err(eyre!("credential returned an empty object"));
    }
    println!("object: {}", hex::encode_upper(&object));
    Ok(())
}

fn print_events(role: &str, events: &EventReceiver) {
    for event in events.try_iter() {
        println!("{role}: {}", event.event);
    }
}
