//! Proximity sensor.
//!
//! Programs read a distance in metres once per tick. A hardware driver pushes
//! readings through a [`SensorFeed`], either already in metres or as raw
//! pulse-width samples (0/1) that are low-pass filtered here. Without a
//! driver, or once the driver goes away, a synthetic value sweeps slowly
//! between the near and far limits so distance-dependent visuals still move.

use std::sync::mpsc;

use log::warn;

pub const NEAR_M: f32 = 0.2;
pub const FAR_M: f32 = 6.5;
const SWEEP_STEP: f32 = 0.01;
const START_M: f32 = 2.0;

/// IIR coefficient for the undersampled PWM duty.
const PWM_K: f32 = 0.005;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SensorReading {
    Meters(f32),
    /// One undersampled level of the sensor's pulse-width output.
    Duty(u8),
}

#[derive(Clone)]
pub struct SensorFeed(mpsc::Sender<SensorReading>);

impl SensorFeed {
    pub fn send(&self, reading: SensorReading) -> bool {
        self.0.send(reading).is_ok()
    }
}

/// Low-pass filter turning a stream of 0/1 pulse samples into metres.
#[derive(Clone, Copy, Debug)]
pub struct PwmFilter {
    acc: f32,
}

impl Default for PwmFilter {
    fn default() -> Self {
        PwmFilter { acc: 0.5 }
    }
}

impl PwmFilter {
    pub fn push(&mut self, level: u8) -> f32 {
        let x = if level > 0 { 1.0 } else { 0.0 };
        self.acc += PWM_K * (x - self.acc);
        self.meters()
    }

    /// Duty cycle maps onto a 0.88..37.5 ms pulse at 147 µs per inch.
    pub fn meters(&self) -> f32 {
        let ms = 0.88 + self.acc.clamp(0.0, 1.0) * (37.5 - 0.88);
        ms / 0.147 * 2.51 / 100.0
    }
}

enum Source {
    Synthetic { rising: bool },
    Feed {
        rx: mpsc::Receiver<SensorReading>,
        filter: PwmFilter,
    },
}

pub struct ProximitySensor {
    source: Source,
    distance: f32,
}

impl ProximitySensor {
    pub fn synthetic() -> Self {
        ProximitySensor {
            source: Source::Synthetic { rising: true },
            distance: START_M,
        }
    }

    pub fn with_feed() -> (Self, SensorFeed) {
        let (tx, rx) = mpsc::channel();
        (
            ProximitySensor {
                source: Source::Feed {
                    rx,
                    filter: PwmFilter::default(),
                },
                distance: START_M,
            },
            SensorFeed(tx),
        )
    }

    pub fn is_synthetic(&self) -> bool {
        matches!(self.source, Source::Synthetic { .. })
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn update(&mut self) {
        let mut lost = false;
        match &mut self.source {
            Source::Synthetic { rising } => {
                if *rising {
                    self.distance += SWEEP_STEP;
                    if self.distance > FAR_M {
                        self.distance = FAR_M;
                        *rising = false;
                    }
                } else {
                    self.distance -= SWEEP_STEP;
                    if self.distance < NEAR_M {
                        self.distance = NEAR_M;
                        *rising = true;
                    }
                }
            }
            Source::Feed { rx, filter } => loop {
                match rx.try_recv() {
                    Ok(SensorReading::Meters(m)) => self.distance = m.max(0.0),
                    Ok(SensorReading::Duty(level)) => self.distance = filter.push(level),
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => {
                        lost = true;
                        break;
                    }
                }
            },
        }
        if lost {
            warn!("sensor: driver gone, using synthetic distance");
            self.source = Source::Synthetic { rising: true };
        }
    }
}
