//! Integration tests for tunnel negotiation and tunneled pipelines.
//!
//! These tests verify that:
//! - Exactly one end of an established tunnel supplies its buffers
//! - Explicit supplier requests and read-only proposals are honored
//! - A rejected confirmation leaves no one-sided tunnel behind
//! - A failed population frees the buffers a supplier already allocated
//! - A capture -> passthrough -> sink pipeline runs and tears down cleanly

mod common;

use common::*;
use portline::component::{
    Command, ComponentConfig, LifecycleState, Parameter, PortDefinition, PortDomain, Variant,
};
use portline::components::{NullSink, Passthrough};
use portline::error::Error;
use portline::event::CompletedCommand;
use portline::tunnel::{BufferSupplier, TunnelSetup, setup_tunnel, teardown_tunnel};
use std::sync::atomic::Ordering;
use std::time::Duration;

fn sink(name: &str) -> Stage {
    Stage::new(
        ComponentConfig::new(name).with_port(video_in(4)),
        Variant::sink(NullSink::new()),
    )
}

fn filter(name: &str) -> Stage {
    Stage::new(filter_config(name), Variant::filter(Passthrough::new()))
}

fn supplier_flags(stage: &Stage, port: usize) -> (bool, bool) {
    let link = stage.comp.tunnel(port).unwrap().expect("tunnel");
    (link.flags.established, link.flags.supplier)
}

#[test]
fn test_output_supplies_by_default() {
    let up = filter("up");
    let down = sink("down");
    let agreed = setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();
    assert_eq!(agreed.supplier, BufferSupplier::Output);
    assert_eq!(supplier_flags(&up, 1), (true, true));
    assert_eq!(supplier_flags(&down, 0), (true, false));

    let link = down.comp.tunnel(0).unwrap().unwrap();
    assert_eq!(link.peer_id, up.comp.id());
    assert_eq!(link.peer_port, 1);
}

#[test]
fn test_input_request_wins() {
    let up = filter("up");
    let down = sink("down");
    down.comp
        .set_parameter(Parameter::BufferSupplier {
            port: 0,
            supplier: BufferSupplier::Input,
        })
        .unwrap();
    let agreed = setup_tunnel(
        &up.comp,
        1,
        &down.comp,
        0,
        TunnelSetup::with_supplier(BufferSupplier::Output),
    )
    .unwrap();
    assert_eq!(agreed.supplier, BufferSupplier::Input);
    assert_eq!(supplier_flags(&up, 1), (true, false));
    assert_eq!(supplier_flags(&down, 0), (true, true));
}

#[test]
fn test_read_only_forces_output_supplier() {
    let up = filter("up");
    let down = sink("down");
    down.comp
        .set_parameter(Parameter::BufferSupplier {
            port: 0,
            supplier: BufferSupplier::Input,
        })
        .unwrap();
    let agreed = setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::read_only()).unwrap();
    assert_eq!(agreed.supplier, BufferSupplier::Output);
    assert_eq!(supplier_flags(&up, 1), (true, true));
}

#[test]
fn test_incompatible_domains_rejected() {
    let up = filter("up");
    let down = Stage::new(
        ComponentConfig::new("speaker").with_port(PortDefinition::input(0, PortDomain::Audio)),
        Variant::sink(NullSink::new()),
    );
    let err = setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap_err();
    assert!(matches!(err, Error::PortsNotCompatible(_)));
    assert!(up.comp.tunnel(1).unwrap().is_none());
    assert!(down.comp.tunnel(0).unwrap().is_none());
}

#[test]
fn test_same_direction_rejected() {
    let a = filter("a");
    let b = filter("b");
    let err = setup_tunnel(&a.comp, 1, &b.comp, 1, TunnelSetup::default()).unwrap_err();
    assert!(matches!(err, Error::PortsNotCompatible(_)));
}

#[test]
fn test_rejected_confirmation_rolls_back() {
    let first = filter("first");
    let second = filter("second");
    let down = sink("down");
    setup_tunnel(&first.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();

    // The sink input is taken: confirmation fails and the proposal is undone.
    let err = setup_tunnel(&second.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap_err();
    assert!(err.is_state_error());
    assert!(second.comp.tunnel(1).unwrap().is_none());
    assert_eq!(supplier_flags(&first, 1), (true, true));
}

#[test]
fn test_buffer_requirements_reconciled() {
    let up = Stage::new(
        ComponentConfig::new("up")
            .with_port(video_in(4))
            .with_port(PortDefinition::output(1, PortDomain::Video).with_buffers(2, 512)),
        Variant::filter(Passthrough::new()),
    );
    let down = Stage::new(
        ComponentConfig::new("down")
            .with_port(PortDefinition::input(0, PortDomain::Video).with_buffers(6, 128)),
        Variant::sink(NullSink::new()),
    );
    setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();
    for def in [
        up.comp.port_definition(1).unwrap(),
        down.comp.port_definition(0).unwrap(),
    ] {
        assert_eq!(def.buffer_count_actual, 6);
        assert_eq!(def.buffer_size, 512);
    }
}

#[test]
fn test_tunneled_port_refuses_client_buffers() {
    let up = filter("up");
    let down = sink("down");
    setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();
    assert!(matches!(
        down.comp.allocate_buffer(0, 0, FRAME_SIZE),
        Err(Error::BadParameter(_))
    ));
}

#[test]
fn test_teardown_in_loaded() {
    let up = filter("up");
    let down = sink("down");
    setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();
    teardown_tunnel(&up.comp, 1, &down.comp, 0).unwrap();
    assert!(up.comp.tunnel(1).unwrap().is_none());
    assert!(down.comp.tunnel(0).unwrap().is_none());

    // Not tunneled any more.
    assert!(matches!(
        teardown_tunnel(&up.comp, 1, &down.comp, 0),
        Err(Error::BadParameter(_))
    ));
}

#[test]
fn test_pipeline_runs_and_tears_down() {
    let cam = camera("camera", Duration::from_millis(2));
    let pass = filter("copy");
    let null = NullSink::new();
    let presented = null.counter();
    let display = Stage::new(
        ComponentConfig::new("display").with_port(video_in(4)),
        Variant::sink(null),
    );
    setup_tunnel(&cam.comp, 0, &pass.comp, 0, TunnelSetup::default()).unwrap();
    setup_tunnel(&pass.comp, 1, &display.comp, 0, TunnelSetup::default()).unwrap();
    let all = [&cam, &pass, &display];

    set_all(&all, LifecycleState::Idle);
    // Output suppliers park their buffers on their own output ports.
    assert_eq!(cam.comp.queued(0).unwrap(), 4);
    assert_eq!(pass.comp.queued(1).unwrap(), 4);

    // No rewiring while populated.
    assert!(
        teardown_tunnel(&pass.comp, 1, &display.comp, 0)
            .unwrap_err()
            .is_state_error()
    );

    set_all(&all, LifecycleState::Executing);
    assert!(eventually(|| presented.load(Ordering::Relaxed) >= 10));

    set_all(&all, LifecycleState::Idle);
    // Every supplied buffer is home again.
    assert!(eventually(|| cam.comp.queued(0).unwrap() == 4));
    assert!(eventually(|| pass.comp.queued(1).unwrap() == 4));

    set_all(&all, LifecycleState::Loaded);
    for stage in all {
        assert!(!stage.comp.port_definition(0).unwrap().populated);
        stage.comp.shutdown().unwrap();
    }
}

#[test]
fn test_input_supplier_primes_upstream() {
    let cam = camera("camera", Duration::from_millis(2));
    let recorder = Recorder::default();
    let display = Stage::new(
        ComponentConfig::new("display").with_port(video_in(3)),
        Variant::sink(recorder.clone()),
    );
    display
        .comp
        .set_parameter(Parameter::BufferSupplier {
            port: 0,
            supplier: BufferSupplier::Input,
        })
        .unwrap();
    setup_tunnel(&cam.comp, 0, &display.comp, 0, TunnelSetup::default()).unwrap();
    let all = [&cam, &display];

    set_all(&all, LifecycleState::Idle);
    assert_eq!(display.comp.queued(0).unwrap(), 4);
    set_all(&all, LifecycleState::Executing);
    assert!(eventually(|| recorder.len() >= 5));

    set_all(&all, LifecycleState::Idle);
    set_all(&all, LifecycleState::Loaded);

    let frames = recorder.frame_numbers();
    assert!(frames.windows(2).all(|w| w[0] < w[1]), "{frames:?}");
    for stage in all {
        stage.comp.shutdown().unwrap();
    }
}

#[test]
fn test_failed_population_releases_supplied_buffers() {
    let up = Stage::new(
        filter_config("up").with_population_timeout(Duration::from_millis(100)),
        Variant::filter(Passthrough::new()),
    );
    let down = sink("down");
    setup_tunnel(&up.comp, 1, &down.comp, 0, TunnelSetup::default()).unwrap();

    // The client never supplies the input buffers, so the supplier's
    // allocation on port 1 has to be undone.
    up.comp
        .send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();
    let err = up
        .rx
        .wait_complete(
            CompletedCommand::StateSet(LifecycleState::Idle),
            TIMEOUT,
        )
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientResources(_)));
    assert_eq!(up.comp.state(), LifecycleState::Loaded);
    assert!(!up.comp.has_worker());
    assert_eq!(up.comp.queued(1).unwrap(), 0);
    assert!(!up.comp.port_definition(1).unwrap().populated);
    assert!(!down.comp.port_definition(0).unwrap().populated);
    assert_eq!(down.comp.state(), LifecycleState::Loaded);

    up.comp.shutdown().unwrap();
    down.comp.shutdown().unwrap();
}
