//! Integration tests for the component lifecycle.
//!
//! These tests verify that:
//! - Loaded -> Idle completes only once every port is populated
//! - A failed population returns the component to Loaded
//! - Undefined edges and same-state requests are reported, not applied
//! - Pause holds buffers and Executing releases them
//! - Invalid is terminal

use portline::buffer::BufferHeader;
use portline::component::{
    CallbackReceivers, ChannelCallbacks, Command, Component, ComponentConfig, LifecycleState,
    PortDefinition, PortDomain, Variant,
};
use portline::components::NullSink;
use portline::error::Error;
use portline::event::{CompletedCommand, Event};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

const TIMEOUT: Duration = Duration::from_secs(5);
const BUFFER_SIZE: usize = 64;

fn sink_config(name: &str, buffers: usize) -> ComponentConfig {
    ComponentConfig::new(name).with_port(
        PortDefinition::input(0, PortDomain::Video).with_buffers(buffers, BUFFER_SIZE),
    )
}

fn sink(name: &str, buffers: usize) -> (Component, CallbackReceivers, Arc<std::sync::atomic::AtomicU64>) {
    let null = NullSink::new();
    let counter = null.counter();
    let comp = Component::new(sink_config(name, buffers), Variant::sink(null)).unwrap();
    let (callbacks, rx) = ChannelCallbacks::new();
    comp.set_callbacks(Arc::new(callbacks));
    (comp, rx, counter)
}

fn set_state(comp: &Component, rx: &CallbackReceivers, state: LifecycleState) {
    comp.send_command(Command::StateSet(state)).unwrap();
    rx.wait_complete(CompletedCommand::StateSet(state), TIMEOUT)
        .unwrap();
    assert_eq!(comp.state(), state);
}

/// Loaded -> Idle with the client allocating every buffer.
fn populate(comp: &Component, rx: &CallbackReceivers, count: usize) -> Vec<BufferHeader> {
    comp.send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();
    let headers: Vec<_> = (0..count)
        .map(|i| comp.allocate_buffer(0, i as u64, BUFFER_SIZE).unwrap())
        .collect();
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), TIMEOUT)
        .unwrap();
    headers
}

/// Idle -> Loaded with the client freeing every buffer.
fn depopulate(comp: &Component, rx: &CallbackReceivers, headers: Vec<BufferHeader>) {
    comp.send_command(Command::StateSet(LifecycleState::Loaded))
        .unwrap();
    for header in headers {
        comp.free_buffer(0, header).unwrap();
    }
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Loaded), TIMEOUT)
        .unwrap();
    assert_eq!(comp.state(), LifecycleState::Loaded);
}

#[test]
fn test_full_cycle_through_executing() {
    let (comp, rx, presented) = sink("display", 2);
    assert_eq!(comp.state(), LifecycleState::Loaded);
    assert!(!comp.has_worker());

    let headers = populate(&comp, &rx, 2);
    assert_eq!(comp.state(), LifecycleState::Idle);
    assert!(comp.has_worker());
    assert!(comp.port_definition(0).unwrap().populated);

    set_state(&comp, &rx, LifecycleState::Executing);
    for mut header in headers {
        header.write(b"frame").unwrap();
        comp.empty_this_buffer(header).unwrap();
    }
    let returned: Vec<_> = (0..2)
        .map(|_| rx.next_emptied(TIMEOUT).expect("buffer returned"))
        .collect();
    assert_eq!(presented.load(Ordering::Relaxed), 2);

    set_state(&comp, &rx, LifecycleState::Idle);
    depopulate(&comp, &rx, returned);
    assert!(!comp.has_worker());
    assert!(!comp.port_definition(0).unwrap().populated);
    comp.shutdown().unwrap();
}

#[test]
fn test_idle_waits_for_population() {
    let (comp, rx, _) = sink("display", 2);
    comp.send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();
    let first = comp.allocate_buffer(0, 0, BUFFER_SIZE).unwrap();

    // One of two buffers: the transition must not complete.
    assert!(
        rx.wait_for(Duration::from_millis(100), |e| e
            .is_complete(CompletedCommand::StateSet(LifecycleState::Idle)))
            .is_none()
    );
    assert_eq!(comp.state(), LifecycleState::Loaded);

    let second = comp.allocate_buffer(0, 1, BUFFER_SIZE).unwrap();
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), TIMEOUT)
        .unwrap();
    depopulate(&comp, &rx, vec![first, second]);
}

#[test]
fn test_population_timeout_returns_to_loaded() {
    let config = sink_config("display", 2).with_population_timeout(Duration::from_millis(50));
    let comp = Component::new(config, Variant::sink(NullSink::new())).unwrap();
    let (callbacks, rx) = ChannelCallbacks::new();
    comp.set_callbacks(Arc::new(callbacks));

    comp.send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();
    let err = rx
        .wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), TIMEOUT)
        .unwrap_err();
    assert!(matches!(err, Error::InsufficientResources(_)));
    assert_eq!(comp.state(), LifecycleState::Loaded);
    assert!(!comp.has_worker());
    comp.shutdown().unwrap();
}

#[test]
fn test_undefined_edge_and_same_state() {
    let (comp, rx, _) = sink("display", 1);

    comp.send_command(Command::StateSet(LifecycleState::Executing))
        .unwrap();
    let err = rx
        .wait_complete(
            CompletedCommand::StateSet(LifecycleState::Executing),
            TIMEOUT,
        )
        .unwrap_err();
    assert_eq!(
        err,
        Error::IncorrectStateTransition {
            from: LifecycleState::Loaded,
            to: LifecycleState::Executing
        }
    );

    comp.send_command(Command::StateSet(LifecycleState::Loaded))
        .unwrap();
    let err = rx
        .wait_complete(CompletedCommand::StateSet(LifecycleState::Loaded), TIMEOUT)
        .unwrap_err();
    assert_eq!(err, Error::SameState(LifecycleState::Loaded));
    assert_eq!(comp.state(), LifecycleState::Loaded);
}

#[test]
fn test_wait_for_resources_round_trip() {
    let (comp, rx, _) = sink("display", 1);
    set_state(&comp, &rx, LifecycleState::WaitForResources);
    set_state(&comp, &rx, LifecycleState::Loaded);
}

#[test]
fn test_pause_holds_buffers() {
    let (comp, rx, presented) = sink("display", 1);
    let mut headers = populate(&comp, &rx, 1);
    set_state(&comp, &rx, LifecycleState::Pause);

    let mut header = headers.pop().unwrap();
    header.write(b"held").unwrap();
    comp.empty_this_buffer(header).unwrap();
    assert!(rx.next_emptied(Duration::from_millis(100)).is_none());
    assert_eq!(presented.load(Ordering::Relaxed), 0);
    assert_eq!(comp.queued(0).unwrap(), 1);

    set_state(&comp, &rx, LifecycleState::Executing);
    let header = rx.next_emptied(TIMEOUT).expect("released after resume");
    assert_eq!(presented.load(Ordering::Relaxed), 1);

    set_state(&comp, &rx, LifecycleState::Idle);
    depopulate(&comp, &rx, vec![header]);
}

#[test]
fn test_stop_returns_queued_buffers() {
    let (comp, rx, presented) = sink("display", 2);
    let headers = populate(&comp, &rx, 2);
    set_state(&comp, &rx, LifecycleState::Pause);
    for mut header in headers {
        header.write(b"queued").unwrap();
        comp.empty_this_buffer(header).unwrap();
    }

    // Pause -> Idle flushes: both come back unpresented.
    set_state(&comp, &rx, LifecycleState::Idle);
    let returned: Vec<_> = (0..2)
        .map(|_| rx.next_emptied(TIMEOUT).expect("flushed buffer"))
        .collect();
    assert_eq!(presented.load(Ordering::Relaxed), 0);
    assert!(returned.iter().all(|h| h.is_empty()));
    depopulate(&comp, &rx, returned);
}

#[test]
fn test_invalid_is_terminal() {
    let (comp, rx, _) = sink("display", 1);
    let headers = populate(&comp, &rx, 1);

    comp.send_command(Command::StateSet(LifecycleState::Invalid))
        .unwrap();
    let event = rx
        .wait_for(TIMEOUT, |e| e.is_error())
        .expect("invalid reported");
    assert_eq!(event, Event::Error(Error::InvalidState));
    assert_eq!(comp.state(), LifecycleState::Invalid);

    assert_eq!(
        comp.send_command(Command::StateSet(LifecycleState::Loaded)),
        Err(Error::InvalidState)
    );
    let rejected = comp
        .empty_this_buffer(headers.into_iter().next().unwrap())
        .unwrap_err();
    assert_eq!(rejected.error, Error::InvalidState);
    comp.shutdown().unwrap();
}

#[test]
fn test_shutdown_rejected_while_populated() {
    let (comp, rx, _) = sink("display", 1);
    let headers = populate(&comp, &rx, 1);
    assert!(comp.shutdown().unwrap_err().is_state_error());
    depopulate(&comp, &rx, headers);
    comp.shutdown().unwrap();
}

#[test]
fn test_shutdown_rejected_while_population_pending() {
    let (comp, rx, _) = sink("display", 2);
    comp.send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();

    // Still Loaded, but the transition is waiting for buffers.
    assert_eq!(comp.state(), LifecycleState::Loaded);
    let err = comp.shutdown().unwrap_err();
    assert!(matches!(
        err,
        Error::IncorrectStateOperation {
            operation: "shutdown",
            state: LifecycleState::Loaded
        }
    ));

    // The component is still usable: finish populating and unwind.
    let headers = (0..2)
        .map(|i| comp.allocate_buffer(0, i, BUFFER_SIZE).unwrap())
        .collect();
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), TIMEOUT)
        .unwrap();
    depopulate(&comp, &rx, headers);
    comp.shutdown().unwrap();
}

#[test]
fn test_use_buffer_memory_comes_back() {
    let (comp, rx, _) = sink("display", 1);
    comp.send_command(Command::StateSet(LifecycleState::Idle))
        .unwrap();
    let header = comp.use_buffer(0, 7, vec![0xAB; BUFFER_SIZE]).unwrap();
    assert_eq!(header.app_private(), 7);
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Idle), TIMEOUT)
        .unwrap();

    comp.send_command(Command::StateSet(LifecycleState::Loaded))
        .unwrap();
    let memory = comp.free_buffer(0, header).unwrap().expect("client memory");
    assert_eq!(memory.len(), BUFFER_SIZE);
    assert_eq!(memory[0], 0xAB);
    rx.wait_complete(CompletedCommand::StateSet(LifecycleState::Loaded), TIMEOUT)
        .unwrap();
}
