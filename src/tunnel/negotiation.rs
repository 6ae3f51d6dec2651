//! The two sides of the tunnel handshake, as seen by one component.

use super::{BufferSupplier, TunnelFlags, TunnelLink, TunnelSetup};
use crate::component::{Component, LifecycleState, PortDefinition};
use crate::error::{Error, Result};
use crate::metadata::ComponentId;

impl Component {
    /// One side of the tunnel handshake.
    ///
    /// On an output port this is the *propose* phase: the peer input is
    /// checked for compatibility and a tentative link is recorded. On an
    /// input port it is the *confirm* phase: the supplier tie-break is
    /// applied, both ends' buffer requirements are reconciled and the
    /// output end is told the outcome. With `peer == None` any tunnel on
    /// the port is cancelled.
    ///
    /// Only allowed in `Loaded`/`WaitForResources` or on a disabled port.
    pub fn tunnel_request(
        &self,
        port: usize,
        peer: Option<(&Component, usize)>,
        setup: &mut TunnelSetup,
    ) -> Result<()> {
        let state = self.state();
        if state == LifecycleState::Invalid {
            return Err(Error::InvalidState);
        }
        let own_port = self.port(port)?;
        if !state.is_configurable() && own_port.is_enabled() {
            return Err(Error::wrong_state("tunnel_request", state));
        }

        let Some((peer, peer_port)) = peer else {
            own_port.set_tunnel(None);
            tracing::debug!(component = %self.name(), port, "tunnel cancelled");
            return Ok(());
        };

        if peer.id() == self.id() {
            return Err(Error::BadParameter("cannot tunnel a component to itself".into()));
        }
        if own_port.tunnel().is_some_and(|t| t.flags.established) {
            return Err(Error::wrong_state("tunnel_request", state));
        }

        let own = own_port.definition();
        let remote = peer.port_definition(peer_port)?;
        if own.direction == remote.direction {
            return Err(Error::PortsNotCompatible(format!(
                "{}:{} and {}:{} have the same direction",
                self.name(),
                port,
                peer.name(),
                peer_port
            )));
        }
        if !own.is_compatible_with(&remote) {
            return Err(Error::PortsNotCompatible(describe_mismatch(&own, &remote)));
        }

        if own.is_output() {
            self.propose(port, peer, peer_port, setup)
        } else {
            self.confirm(port, &own, peer, peer_port, &remote, setup)
        }
    }

    fn propose(
        &self,
        port: usize,
        peer: &Component,
        peer_port: usize,
        setup: &mut TunnelSetup,
    ) -> Result<()> {
        let own_port = self.port(port)?;
        if setup.read_only || own_port.supplier_preference() == BufferSupplier::Output {
            setup.supplier = BufferSupplier::Output;
        }
        own_port.set_tunnel(Some(TunnelLink {
            peer: peer.downgrade(),
            peer_id: peer.id(),
            peer_port,
            flags: TunnelFlags {
                established: false,
                supplier: setup.supplier != BufferSupplier::Input,
            },
        }));
        tracing::debug!(
            component = %self.name(),
            port,
            supplier = ?setup.supplier,
            "tunnel proposed"
        );
        Ok(())
    }

    fn confirm(
        &self,
        port: usize,
        own: &PortDefinition,
        peer: &Component,
        peer_port: usize,
        remote: &PortDefinition,
        setup: &mut TunnelSetup,
    ) -> Result<()> {
        let own_port = self.port(port)?;
        let supplier = decide_supplier(setup, own_port.supplier_preference());

        let count = own.buffer_count_actual.max(remote.buffer_count_actual);
        let size = own.buffer_size.max(remote.buffer_size);
        peer.confirm_tunnel(peer_port, self.id(), port, supplier, count, size)?;

        own_port.reconcile_buffers(count, size);
        own_port.set_tunnel(Some(TunnelLink {
            peer: peer.downgrade(),
            peer_id: peer.id(),
            peer_port,
            flags: TunnelFlags {
                established: true,
                supplier: supplier == BufferSupplier::Input,
            },
        }));
        setup.supplier = supplier;
        Ok(())
    }

    /// Output side: the input side has accepted with `supplier`.
    fn confirm_tunnel(
        &self,
        port: usize,
        peer_id: ComponentId,
        peer_port: usize,
        supplier: BufferSupplier,
        count: usize,
        size: usize,
    ) -> Result<()> {
        let own_port = self.port(port)?;
        let Some(mut link) = own_port.tunnel() else {
            return Err(Error::PortsNotCompatible(format!(
                "{}:{} has no pending tunnel",
                self.name(),
                port
            )));
        };
        if link.peer_id != peer_id || link.peer_port != peer_port || link.flags.established {
            return Err(Error::PortsNotCompatible(format!(
                "{}:{} pending tunnel targets a different peer",
                self.name(),
                port
            )));
        }
        link.flags = TunnelFlags {
            established: true,
            supplier: supplier == BufferSupplier::Output,
        };
        own_port.reconcile_buffers(count, size);
        own_port.set_tunnel(Some(link));
        Ok(())
    }

    /// Check that the tunnel on `port` leads to `peer_id:peer_port` and
    /// may be removed now.
    pub(crate) fn check_tunnel_teardown(
        &self,
        port: usize,
        peer_id: ComponentId,
        peer_port: usize,
    ) -> Result<()> {
        let state = self.state();
        let own_port = self.port(port)?;
        if !state.is_configurable() && own_port.is_enabled() {
            return Err(Error::wrong_state("teardown_tunnel", state));
        }
        match own_port.tunnel() {
            Some(link) if link.peer_id == peer_id && link.peer_port == peer_port => Ok(()),
            _ => Err(Error::BadParameter(format!(
                "{}:{} is not tunneled to {}:{}",
                self.name(),
                port,
                peer_id,
                peer_port
            ))),
        }
    }
}

/// Tie-break applied by the input side.
///
/// Read-only tunnels always make the output supply. Otherwise an explicit
/// request from the input side wins, then whatever the proposal carries,
/// and the output supplies when nobody asked.
fn decide_supplier(setup: &TunnelSetup, input_preference: BufferSupplier) -> BufferSupplier {
    if setup.read_only {
        return BufferSupplier::Output;
    }
    if input_preference == BufferSupplier::Input {
        return BufferSupplier::Input;
    }
    match setup.supplier {
        BufferSupplier::Unspecified => BufferSupplier::Output,
        requested => requested,
    }
}

fn describe_mismatch(own: &PortDefinition, remote: &PortDefinition) -> String {
    format!(
        "{:?}/{} vs {:?}/{}",
        own.domain,
        own.encoding.as_deref().unwrap_or("any"),
        remote.domain,
        remote.encoding.as_deref().unwrap_or("any")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_forces_output() {
        for requested in [
            BufferSupplier::Unspecified,
            BufferSupplier::Input,
            BufferSupplier::Output,
        ] {
            let setup = TunnelSetup {
                read_only: true,
                supplier: requested,
            };
            for pref in [BufferSupplier::Unspecified, BufferSupplier::Input] {
                assert_eq!(decide_supplier(&setup, pref), BufferSupplier::Output);
            }
        }
    }

    #[test]
    fn test_default_is_output() {
        let setup = TunnelSetup::default();
        assert_eq!(
            decide_supplier(&setup, BufferSupplier::Unspecified),
            BufferSupplier::Output
        );
    }

    #[test]
    fn test_explicit_requests() {
        let setup = TunnelSetup::with_supplier(BufferSupplier::Input);
        assert_eq!(
            decide_supplier(&setup, BufferSupplier::Unspecified),
            BufferSupplier::Input
        );

        // Input asks, output proposal asked too: the input decides last.
        let setup = TunnelSetup::with_supplier(BufferSupplier::Output);
        assert_eq!(
            decide_supplier(&setup, BufferSupplier::Input),
            BufferSupplier::Input
        );
        assert_eq!(
            decide_supplier(&setup, BufferSupplier::Unspecified),
            BufferSupplier::Output
        );
    }
}
