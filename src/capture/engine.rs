//! The capture variant: a driver, its ring and the consumers fed from it.
//!
//! Each enabled output port is a consumer with its own read position
//! (`consumed`, counted from the ring's `last` cursor). A slot is
//! delivered back to the device only once the slowest enabled consumer
//! has copied it. A consumer with several ready slots and enough empty
//! buffers catches up in one pass.

use super::driver::CaptureDriver;
use super::ring::RingCaptureQueue;
use crate::buffer::BufferHeader;
use crate::component::{ConfigValue, LifecycleState, Port};
use crate::error::{Error, Result};

/// Running counters of a capture component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Slots harvested from the device.
    pub captured: u64,
    /// Slots retired after every consumer had them.
    pub delivered: u64,
    /// Slots retired unread by the overflow policy.
    pub dropped: u64,
}

#[derive(Debug, Clone, Copy)]
struct Consumer {
    port: usize,
    consumed: usize,
}

/// Result of one [`CaptureEngine::pump`] pass.
#[derive(Debug, Default)]
pub(crate) struct Pump {
    /// Filled output buffers, with their port, to hand off.
    pub filled: Vec<(usize, BufferHeader)>,
    /// Whether the pass changed anything.
    pub progressed: bool,
}

/// Ring-driven capture state owned by a capture component.
pub struct CaptureEngine {
    driver: Box<dyn CaptureDriver>,
    ring: Option<RingCaptureQueue>,
    consumers: Vec<Consumer>,
    streaming: bool,
    stats: CaptureStats,
}

impl CaptureEngine {
    /// Wrap a driver. The ring is created on `Loaded -> Idle`.
    pub fn new(driver: Box<dyn CaptureDriver>) -> Self {
        Self {
            driver,
            ring: None,
            consumers: Vec::new(),
            streaming: false,
            stats: CaptureStats::default(),
        }
    }

    /// The ring, while one exists.
    pub fn ring(&self) -> Option<&RingCaptureQueue> {
        self.ring.as_ref()
    }

    /// Counters since construction.
    pub fn stats(&self) -> CaptureStats {
        self.stats
    }

    pub(crate) fn attach_consumers(&mut self, ports: impl IntoIterator<Item = usize>) {
        self.consumers = ports
            .into_iter()
            .map(|port| Consumer { port, consumed: 0 })
            .collect();
    }

    pub(crate) fn on_transition(&mut self, from: LifecycleState, to: LifecycleState) -> Result<()> {
        use LifecycleState::*;

        match (from, to) {
            (Loaded | WaitForResources, Idle) => self.open(),
            (Idle, Executing | Pause) => {
                self.driver.start()?;
                self.streaming = true;
                Ok(())
            }
            (Executing | Pause, Idle) => {
                let stopped = self.stop_streaming();
                self.rewind();
                stopped
            }
            (Idle, Loaded) => {
                self.driver.close();
                self.ring = None;
                Ok(())
            }
            (_, Invalid) => {
                if let Err(err) = self.stop_streaming() {
                    tracing::warn!(error = %err, "capture stop failed during teardown");
                }
                if self.ring.take().is_some() {
                    self.driver.close();
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn open(&mut self) -> Result<()> {
        self.driver.open()?;
        let configured = self.driver.configure().and_then(|slots| {
            RingCaptureQueue::new(slots)
                .ok_or_else(|| Error::Hardware("device reported no capture slots".into()))
        });
        match configured {
            Ok(ring) => {
                tracing::debug!(slots = ring.len(), "capture ring created");
                self.ring = Some(ring);
                self.rewind();
                Ok(())
            }
            Err(err) => {
                self.driver.close();
                Err(err)
            }
        }
    }

    fn stop_streaming(&mut self) -> Result<()> {
        if !self.streaming {
            return Ok(());
        }
        self.streaming = false;
        self.driver.stop()
    }

    fn rewind(&mut self) {
        if let Some(ring) = self.ring.as_mut() {
            ring.reset();
        }
        for consumer in &mut self.consumers {
            consumer.consumed = 0;
        }
    }

    pub(crate) fn get_config(&self, key: &str) -> Result<ConfigValue> {
        match key {
            "captured" => Ok(ConfigValue::Uint(self.stats.captured)),
            "delivered" => Ok(ConfigValue::Uint(self.stats.delivered)),
            "dropped" => Ok(ConfigValue::Uint(self.stats.dropped)),
            "slots" => Ok(ConfigValue::Uint(
                self.ring.as_ref().map_or(0, |r| r.len() as u64),
            )),
            _ => self.driver.get_config(key),
        }
    }

    pub(crate) fn set_config(&mut self, key: &str, value: ConfigValue) -> Result<()> {
        self.driver.set_config(key, value)
    }

    #[cfg(test)]
    pub(crate) fn pump(&mut self, ports: &[Port]) -> Result<Pump> {
        self.pump_with(ports, Port::take_for_processing)
    }

    /// One capture pass: keep the device busy, harvest one completion,
    /// copy ready slots to consumers, retire what everyone has seen, and
    /// drop the oldest slot if the ring stays full. `take` hands out the
    /// consumer buffers that may be filled.
    pub(crate) fn pump_with(
        &mut self,
        ports: &[Port],
        take: impl Fn(&Port) -> Option<BufferHeader>,
    ) -> Result<Pump> {
        let Some(ring) = self.ring.as_mut() else {
            return Err(Error::Hardware("capture ring not configured".into()));
        };
        let mut pump = Pump::default();

        while !ring.is_full() {
            self.driver.submit_slot(ring.capture_cursor())?;
            ring.submit();
            pump.progressed = true;
        }

        if ring.has_outstanding_capture() {
            let done = self.driver.complete_slot()?;
            if done.index != ring.wait_cursor() {
                return Err(Error::Hardware(format!(
                    "slot {} completed out of order, expected {}",
                    done.index,
                    ring.wait_cursor()
                )));
            }
            ring.complete(done.len, done.timestamp);
            self.stats.captured += 1;
            pump.progressed = true;
        }

        for consumer in &mut self.consumers {
            let port = &ports[consumer.port];
            if !port.is_enabled() {
                consumer.consumed = ring.ready();
                continue;
            }
            while let Some(index) = ring.ready_index(consumer.consumed) {
                let Some(mut header) = take(port) else {
                    break;
                };
                let (len, timestamp) = ring
                    .slot(index)
                    .map_or((0, Default::default()), |s| (s.len, s.timestamp));
                let data = self.driver.slot_data(index);
                let data = &data[..len.min(data.len())];
                let copied = data.len().min(header.capacity());
                if copied < data.len() {
                    tracing::warn!(
                        port = consumer.port,
                        slot = index,
                        captured = data.len(),
                        capacity = header.capacity(),
                        "capture truncated to buffer capacity"
                    );
                }
                if let Err(err) = header.write(&data[..copied]) {
                    tracing::warn!(port = consumer.port, error = %err, "capture copy failed");
                }
                header.set_timestamp(timestamp);
                pump.filled.push((consumer.port, header));
                consumer.consumed += 1;
            }
        }

        let deliverable = self
            .consumers
            .iter()
            .map(|c| c.consumed)
            .min()
            .unwrap_or(ring.ready());
        for _ in 0..deliverable {
            ring.deliver();
        }
        for consumer in &mut self.consumers {
            consumer.consumed = consumer.consumed.saturating_sub(deliverable);
        }
        self.stats.delivered += deliverable as u64;

        if ring.should_drop_oldest() {
            ring.deliver();
            for consumer in &mut self.consumers {
                consumer.consumed = consumer.consumed.saturating_sub(1);
            }
            self.stats.dropped += 1;
            tracing::debug!(
                ready = ring.ready(),
                dropped = self.stats.dropped,
                "capture ring overflow, dropped oldest slot"
            );
            pump.progressed = true;
        }

        pump.progressed |= !pump.filled.is_empty() || deliverable > 0;
        Ok(pump)
    }
}

impl std::fmt::Debug for CaptureEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureEngine")
            .field("ring", &self.ring)
            .field("consumers", &self.consumers)
            .field("streaming", &self.streaming)
            .field("stats", &self.stats)
            .finish()
    }
}
