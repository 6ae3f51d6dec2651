//! Shared helpers for the integration tests.

#![allow(dead_code)]

use portline::buffer::BufferHeader;
use portline::component::{
    CallbackReceivers, ChannelCallbacks, Command, Component, ComponentConfig, Lifecycle,
    LifecycleState, PortDefinition, PortDomain, Present, Tunable, Variant,
};
use portline::components::{PatternConfig, PatternDevice, frame_number};
use portline::error::Result;
use portline::event::CompletedCommand;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const TIMEOUT: Duration = Duration::from_secs(5);
pub const FRAME_SIZE: usize = 256;

/// A component and the receiving end of its callbacks.
pub struct Stage {
    pub comp: Component,
    pub rx: CallbackReceivers,
}

impl Stage {
    pub fn new(config: ComponentConfig, variant: Variant) -> Self {
        let comp = Component::new(config, variant).expect("component");
        let (callbacks, rx) = ChannelCallbacks::new();
        comp.set_callbacks(Arc::new(callbacks));
        Self { comp, rx }
    }
}

pub fn video_in(buffers: usize) -> PortDefinition {
    PortDefinition::input(0, PortDomain::Video).with_buffers(buffers, FRAME_SIZE)
}

pub fn video_out(buffers: usize) -> PortDefinition {
    PortDefinition::output(0, PortDomain::Video).with_buffers(buffers, FRAME_SIZE)
}

/// Capture stage producing numbered frames every `interval`.
pub fn camera(name: &str, interval: Duration) -> Stage {
    let pattern = PatternConfig::default()
        .with_frame_size(FRAME_SIZE)
        .with_frame_interval(interval);
    Stage::new(
        ComponentConfig::new(name).with_port(video_out(4)),
        Variant::capture(PatternDevice::new(pattern)),
    )
}

/// One video input and one video output.
pub fn filter_config(name: &str) -> ComponentConfig {
    ComponentConfig::new(name)
        .with_port(video_in(4))
        .with_port(video_out(4))
}

/// Send `state` to every stage, then wait for all of them.
///
/// Tunneled components have to move together: a supplier and its peer
/// rendezvous during population and depopulation.
pub fn set_all(stages: &[&Stage], state: LifecycleState) {
    send_all(stages, state);
    wait_all(stages, state);
}

pub fn send_all(stages: &[&Stage], state: LifecycleState) {
    for stage in stages {
        stage
            .comp
            .send_command(Command::StateSet(state))
            .expect("send");
    }
}

pub fn wait_all(stages: &[&Stage], state: LifecycleState) {
    for stage in stages {
        stage
            .rx
            .wait_complete(CompletedCommand::StateSet(state), TIMEOUT)
            .unwrap_or_else(|e| panic!("{} -> {:?}: {}", stage.comp.name(), state, e));
        assert_eq!(stage.comp.state(), state);
    }
}

/// Sink that records what reaches it.
#[derive(Clone, Default)]
pub struct Recorder {
    pub frames: Arc<Mutex<Vec<Option<u64>>>>,
    pub payloads: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl Recorder {
    pub fn len(&self) -> usize {
        self.payloads.lock().unwrap().len()
    }

    pub fn frame_numbers(&self) -> Vec<u64> {
        self.frames.lock().unwrap().iter().flatten().copied().collect()
    }
}

impl Lifecycle for Recorder {}
impl Tunable for Recorder {}

impl Present for Recorder {
    fn present(&mut self, buffer: &BufferHeader) -> Result<()> {
        self.frames.lock().unwrap().push(frame_number(buffer.filled()));
        self.payloads.lock().unwrap().push(buffer.filled().to_vec());
        Ok(())
    }
}

/// Poll `cond` until it holds or `TIMEOUT` passes.
pub fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = std::time::Instant::now() + TIMEOUT;
    while std::time::Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
