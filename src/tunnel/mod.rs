//! Tunnels: direct output-to-input connections between two components.
//!
//! Wiring a tunnel is a two-phase handshake driven by whoever builds the
//! graph, never by the components themselves:
//!
//! ```text
//!   setup_tunnel(out, o, in, i)
//!     │
//!     ├─ 1. propose:  out.tunnel_request(o, Some(in, i), &mut setup)
//!     │               checks domain/format, fills in a tentative supplier
//!     │
//!     ├─ 2. confirm:  in.tunnel_request(i, Some(out, o), &mut setup)
//!     │               applies the tie-break, tells `out` the final choice
//!     │
//!     └─ on reject:   out.tunnel_request(o, None, ..)   (rollback)
//! ```
//!
//! After a successful setup exactly one end carries
//! [`TunnelFlags::supplier`]; that end allocates and frees the shared
//! buffers during population (see [`Component`]).

mod negotiation;

use crate::component::{Component, WeakComponent};
use crate::error::Result;
use crate::metadata::ComponentId;

/// Which end of a tunnel supplies its buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BufferSupplier {
    /// No explicit request.
    #[default]
    Unspecified,
    /// The input port supplies.
    Input,
    /// The output port supplies.
    Output,
}

/// Flags on one end of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelFlags {
    /// Both ends have agreed on the tunnel.
    pub established: bool,
    /// This end allocates and frees the tunnel's buffers.
    pub supplier: bool,
}

/// The proposal carried through the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TunnelSetup {
    /// The downstream side only reads; forces the output side to supply.
    pub read_only: bool,
    /// Current supplier choice.
    pub supplier: BufferSupplier,
}

impl TunnelSetup {
    /// A read-only tunnel proposal.
    pub fn read_only() -> Self {
        Self {
            read_only: true,
            ..Default::default()
        }
    }

    /// A proposal requesting a particular supplier.
    pub fn with_supplier(supplier: BufferSupplier) -> Self {
        Self {
            read_only: false,
            supplier,
        }
    }
}

/// One end's record of a tunnel.
///
/// The peer is held weakly: two tunneled components must not keep each
/// other alive.
#[derive(Clone)]
pub struct TunnelLink {
    pub(crate) peer: WeakComponent,
    /// Identity of the peer component.
    pub peer_id: ComponentId,
    /// Port index on the peer.
    pub peer_port: usize,
    /// Flags for this end.
    pub flags: TunnelFlags,
}

impl TunnelLink {
    /// The peer component, if it is still alive.
    pub fn peer(&self) -> Option<Component> {
        self.peer.upgrade()
    }
}

impl std::fmt::Debug for TunnelLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelLink")
            .field("peer_id", &self.peer_id)
            .field("peer_port", &self.peer_port)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Wire `output.out_port` to `input.in_port`.
///
/// Returns the agreed setup. If the input side rejects, the output side's
/// tentative tunnel is cancelled before the error is returned, so no
/// one-sided tunnel survives.
pub fn setup_tunnel(
    output: &Component,
    out_port: usize,
    input: &Component,
    in_port: usize,
    setup: TunnelSetup,
) -> Result<TunnelSetup> {
    let mut proposal = setup;
    output.tunnel_request(out_port, Some((input, in_port)), &mut proposal)?;

    if let Err(err) = input.tunnel_request(in_port, Some((output, out_port)), &mut proposal) {
        tracing::warn!(
            output = %output.name(),
            input = %input.name(),
            error = %err,
            "tunnel rejected by input side, rolling back"
        );
        let mut cancel = TunnelSetup::default();
        if let Err(rollback) = output.tunnel_request(out_port, None, &mut cancel) {
            tracing::error!(output = %output.name(), error = %rollback, "tunnel rollback failed");
        }
        return Err(err);
    }

    tracing::info!(
        output = %output.name(),
        out_port,
        input = %input.name(),
        in_port,
        supplier = ?proposal.supplier,
        "tunnel established"
    );
    Ok(proposal)
}

/// Remove a tunnel from both ends.
///
/// Both ports must be disabled, or both components in `Loaded`.
pub fn teardown_tunnel(
    output: &Component,
    out_port: usize,
    input: &Component,
    in_port: usize,
) -> Result<()> {
    output.check_tunnel_teardown(out_port, input.id(), in_port)?;
    input.check_tunnel_teardown(in_port, output.id(), out_port)?;
    let mut cancel = TunnelSetup::default();
    output.tunnel_request(out_port, None, &mut cancel)?;
    input.tunnel_request(in_port, None, &mut cancel)?;
    tracing::info!(output = %output.name(), input = %input.name(), "tunnel torn down");
    Ok(())
}
