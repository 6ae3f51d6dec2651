//! The buffer-management thread.
//!
//! One loop per component, alive from `Loaded -> Idle` until the component
//! returns to `Loaded`:
//!
//! 1. exit requested: give back anything held and leave;
//! 2. a port is being flushed: give back held buffers from flushing
//!    ports, acknowledge, sleep until the flush ends;
//! 3. not `Executing`: report parked and sleep;
//! 4. otherwise run one processing step for the variant.
//!
//! The doorbell ticket is taken before any state is inspected, so a ring
//! that lands while the loop is deciding to sleep is never lost.

use super::{Inner, LifecycleState, Port, TransformOutcome, Variant, VariantKind};
use crate::buffer::BufferHeader;
use crate::defaults::ERROR_BACKOFF;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::observability;
use std::sync::Arc;

/// Output buffer a transform kept across steps (`Consumed`).
type Retained = Option<(usize, BufferHeader)>;

/// Reports the worker parked however it leaves, panics included, so
/// nobody waits on a dead thread.
struct ParkOnExit<'a>(&'a Inner);

impl Drop for ParkOnExit<'_> {
    fn drop(&mut self) {
        if let Ok(mut run) = self.0.run.lock() {
            run.parked = true;
            self.0.run_changed.notify_all();
        }
    }
}

pub(crate) fn run(inner: Arc<Inner>) {
    let _span = observability::instrument_thread(&inner.config.tracing, &inner.name, "worker");
    let _park = ParkOnExit(&inner);
    let mut retained: Retained = None;
    tracing::debug!(component = %inner.name, "worker started");

    loop {
        let ticket = inner.doorbell.ticket();

        let executing = {
            let mut run = inner.run.lock().unwrap();
            if run.exit {
                break;
            }
            let executing = run.state == LifecycleState::Executing;
            if run.parked == executing {
                run.parked = !executing;
                inner.run_changed.notify_all();
            }
            executing
        };

        if inner.ports.iter().any(|p| p.is_flushing()) {
            give_back_flushing(&inner, &mut retained);
            for port in &inner.ports {
                port.ack_flush();
            }
            inner.doorbell.wait(ticket);
            continue;
        }

        if !executing {
            inner.doorbell.wait(ticket);
            continue;
        }

        let step = match inner.kind {
            VariantKind::Filter => filter_step(&inner, &mut retained),
            VariantKind::Sink => sink_step(&inner),
            VariantKind::Capture => capture_step(&inner),
        };
        match step {
            Ok(true) => {}
            Ok(false) => inner.doorbell.wait(ticket),
            Err(err) => {
                observability::trace_error(&inner.name, &err);
                inner.emit(Event::Error(err));
                inner.doorbell.wait_timeout(ticket, ERROR_BACKOFF);
            }
        }
    }

    if let Some((port, header)) = retained.take() {
        inner.ports[port].enqueue(header);
        inner.ports[port].finish_processing();
    }
    tracing::debug!(component = %inner.name, "worker exiting");
}

/// Put a retained output back on its port if that port is flushing; the
/// flush's final pass returns it to its owner.
fn give_back_flushing(inner: &Inner, retained: &mut Retained) {
    let flushing = retained
        .as_ref()
        .is_some_and(|(port, _)| inner.ports[*port].is_flushing());
    if !flushing {
        return;
    }
    if let Some((port, header)) = retained.take() {
        inner.ports[port].enqueue(header);
        inner.ports[port].finish_processing();
    }
}

// ============================================================================
// Steps
// ============================================================================

impl Inner {
    /// Hand a finished output buffer downstream, raising its mark if this
    /// component is the target and its EOS flag.
    fn emit_output(&self, port: usize, mut header: BufferHeader) {
        if let Some(mark) = header.mark() {
            if mark.targets(self.id) {
                header.take_mark();
                self.emit(Event::Mark(mark));
            }
        }
        let flags = header.flags();
        if flags.is_eos() {
            observability::trace_eos(&self.name, port);
            self.emit(Event::BufferFlag { port, flags });
        }
        self.hand_off(port, header);
    }

    fn return_input(&self, port: usize, header: BufferHeader) {
        self.hand_off(port, header);
        self.ports[port].finish_processing();
    }
}

/// Nothing to process: no payload, no flags, no mark.
fn is_blank(header: &BufferHeader) -> bool {
    header.is_empty() && header.flags().is_empty() && header.mark().is_none()
}

/// Take a buffer from `port` only while the component is executing.
///
/// The state is checked under the run lock, and a stop sets `Idle` before
/// it reopens its flushed ports, so nothing is taken once a stop has
/// drained the queues.
fn take_executing(inner: &Inner, port: &Port) -> Option<BufferHeader> {
    let run = inner.run.lock().unwrap();
    if run.exit || run.state != LifecycleState::Executing {
        return None;
    }
    port.take_for_processing()
}

fn filter_step(inner: &Inner, retained: &mut Retained) -> Result<bool> {
    let (Some(input_port), Some(output_port)) = (inner.first_input, inner.first_output) else {
        return Ok(false);
    };
    let ins = &inner.ports[input_port];
    let outs = &inner.ports[output_port];
    if retained.is_none() && outs.queued() == 0 {
        return Ok(false);
    }
    let Some(mut input) = take_executing(inner, ins) else {
        return Ok(false);
    };
    if is_blank(&input) {
        inner.return_input(input_port, input);
        return Ok(true);
    }
    let mut output = match retained.take() {
        Some((_, header)) => header,
        None => match take_executing(inner, outs) {
            Some(header) => header,
            None => {
                ins.requeue_front(input);
                return Ok(false);
            }
        },
    };

    output.set_timestamp(input.timestamp());
    let outcome = match &mut *inner.variant.lock().unwrap() {
        Variant::Filter(transform) => transform.transform(&input, &mut output),
        _ => Err(Error::InvalidState),
    };

    if let Some(mark) = input.take_mark() {
        if mark.targets(inner.id) {
            inner.emit(Event::Mark(mark));
        } else {
            output.set_mark(mark);
        }
    }
    let eos = input.flags().is_eos();
    if eos {
        output.flags_mut().set_eos(true);
    }

    match outcome {
        Ok(TransformOutcome::Consumed) if !eos => *retained = Some((output_port, output)),
        Ok(outcome) => {
            if outcome == TransformOutcome::SettingsChanged {
                inner.emit(Event::PortSettingsChanged { port: output_port });
            }
            inner.emit_output(output_port, output);
            outs.finish_processing();
        }
        Err(err) => {
            observability::trace_error(&inner.name, &err);
            inner.emit(Event::Error(err));
            if eos {
                inner.emit_output(output_port, output);
                outs.finish_processing();
            } else {
                *retained = Some((output_port, output));
            }
        }
    }

    inner.return_input(input_port, input);
    Ok(true)
}

fn sink_step(inner: &Inner) -> Result<bool> {
    let Some(input_port) = inner.first_input else {
        return Ok(false);
    };
    let Some(mut input) = take_executing(inner, &inner.ports[input_port]) else {
        return Ok(false);
    };
    if is_blank(&input) {
        inner.return_input(input_port, input);
        return Ok(true);
    }

    let presented = match &mut *inner.variant.lock().unwrap() {
        Variant::Sink(sink) => sink.present(&input),
        _ => Err(Error::InvalidState),
    };
    if let Err(err) = presented {
        observability::trace_error(&inner.name, &err);
        inner.emit(Event::Error(err));
    }

    if let Some(mark) = input.take_mark() {
        if mark.targets(inner.id) {
            inner.emit(Event::Mark(mark));
        } else {
            tracing::debug!(component = %inner.name, target = %mark.target, "mark ended at a sink it does not target");
        }
    }
    let flags = input.flags();
    if flags.is_eos() {
        observability::trace_eos(&inner.name, input_port);
        inner.emit(Event::BufferFlag {
            port: input_port,
            flags,
        });
    }

    inner.return_input(input_port, input);
    Ok(true)
}

fn capture_step(inner: &Inner) -> Result<bool> {
    let pump = match &mut *inner.variant.lock().unwrap() {
        Variant::Capture(engine) => {
            engine.pump_with(&inner.ports, |port| take_executing(inner, port))
        }
        _ => Err(Error::InvalidState),
    }?;
    for (port, header) in pump.filled {
        inner.emit_output(port, header);
        inner.ports[port].finish_processing();
    }
    Ok(pump.progressed)
}
