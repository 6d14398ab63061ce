//! Hosting a [`CredentialDriver`] on a link
//!
//! [`CredentialListener`] drains a fragment queue on a dedicated worker thread, reassembles
//! each request and writes the reply back as fragments. [`DirectLink`] answers block
//! exchanges in place, which lets a [`BlockTransport`](nexum_apdu_transport_link::BlockTransport)
//! talk to a credential in the same process.

use std::{
    thread::{self, JoinHandle},
    time::Duration,
};

use bytes::Bytes;
use nexum_apdu_core::TransportError;
use nexum_apdu_transport_link::{
    BlockLink, Delivery, FragmentConsumer, FragmentSink, FragmentWriter, LinkConfig,
    ReassemblyBuffer,
};
use tracing::{debug, info, warn};

use crate::{Error, Result, driver::CredentialDriver};

/// A credential driver running on its own worker thread
#[derive(Debug)]
pub struct CredentialListener {
    worker: JoinHandle<CredentialDriver>,
}

impl CredentialListener {
    /// Start serving requests from `inbound`, writing replies to `outbound`
    ///
    /// The worker stops once every producer of `inbound` has been dropped and the queue is
    /// empty.
    pub fn spawn<S>(
        driver: CredentialDriver,
        inbound: FragmentConsumer,
        outbound: S,
        config: &LinkConfig,
    ) -> Result<Self>
    where
        S: FragmentSink + 'static,
    {
        let writer = FragmentWriter::new(outbound, config);
        let worker = thread::Builder::new()
            .name("credential-listener".into())
            .spawn(move || serve(driver, &inbound, writer))
            .map_err(|e| TransportError::other(e.to_string()))?;
        Ok(Self { worker })
    }

    /// Whether the worker has stopped
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    /// Wait for the worker to stop and take the driver back
    pub fn join(self) -> Result<CredentialDriver> {
        self.worker
            .join()
            .map_err(|_| Error::Protocol("credential listener panicked"))
    }
}

fn serve<S: FragmentSink>(
    mut driver: CredentialDriver,
    inbound: &FragmentConsumer,
    mut writer: FragmentWriter<S>,
) -> CredentialDriver {
    info!("Credential listener started");
    let mut reassembly = ReassemblyBuffer::new();

    while let Some(packet) = inbound.recv() {
        match reassembly.accept(&packet) {
            Delivery::Complete(request) => {
                if let Some(reply) = driver.handle(&request) {
                    if let Err(error) = writer.write(&reply) {
                        warn!(%error, "Failed to write reply");
                    }
                }
            }
            Delivery::Aborted => debug!("Request aborted by link"),
            Delivery::Pending | Delivery::Dropped => {}
        }
    }

    info!("Credential listener stopped");
    driver
}

/// A [`BlockLink`] whose peer is a credential driver in the same process
#[derive(Debug)]
pub struct DirectLink {
    driver: CredentialDriver,
    pending: Option<Bytes>,
}

impl DirectLink {
    /// Link to `driver`
    pub const fn new(driver: CredentialDriver) -> Self {
        Self {
            driver,
            pending: None,
        }
    }

    /// Borrow the credential driver
    pub const fn driver(&self) -> &CredentialDriver {
        &self.driver
    }
}

impl BlockLink for DirectLink {
    fn send_block(&mut self, block: &[u8]) -> std::result::Result<(), TransportError> {
        self.pending = self.driver.handle(block);
        Ok(())
    }

    // A request the credential ignored never gets a reply.
    fn receive_block(&mut self, _timeout: Duration) -> std::result::Result<Bytes, TransportError> {
        self.pending.take().ok_or(TransportError::Timeout)
    }
}
