//! Backend endpoint registrants.
//!
//! A registrant wires one backend service into the shared mux: it is given
//! the validated backend `host:port`, the dial options and a handle on the
//! serving lifecycle, and registers its routes with [`ServeMux::handle`].

use tokio::sync::broadcast;

use crate::error::BoxError;
use crate::lifecycle::Shutdown;
use crate::mux::ServeMux;
use crate::net::TransportCredentials;

/// How registrants should dial the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DialOptions {
    pub credentials: TransportCredentials,
}

/// Everything a registrant gets besides the mux.
pub struct EndpointContext<'a> {
    target: &'a str,
    dial: &'a DialOptions,
    shutdown: &'a Shutdown,
}

impl<'a> EndpointContext<'a> {
    pub fn new(target: &'a str, dial: &'a DialOptions, shutdown: &'a Shutdown) -> Self {
        Self {
            target,
            dial,
            shutdown,
        }
    }

    /// Backend address as `host:port`.
    pub fn target(&self) -> &str {
        self.target
    }

    /// How registrants should dial the backend.
    pub fn dial_options(&self) -> &DialOptions {
        self.dial
    }

    /// Fires when the server this registration belongs to stops.
    pub fn shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }
}

/// Registers a backend service's routes on the mux.
pub trait Endpoint: Send + Sync {
    fn register(&self, ctx: &EndpointContext<'_>, mux: &mut ServeMux) -> Result<(), BoxError>;
}

impl<F> Endpoint for F
where
    F: Fn(&EndpointContext<'_>, &mut ServeMux) -> Result<(), BoxError> + Send + Sync,
{
    fn register(&self, ctx: &EndpointContext<'_>, mux: &mut ServeMux) -> Result<(), BoxError> {
        self(ctx, mux)
    }
}
