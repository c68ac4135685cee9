//! Line-protocol input adapters.
//!
//! Touch and proximity drivers are separate processes (an evdev bridge, a
//! GPIO sampler) that write one reading per line into a FIFO or pipe. Each
//! adapter reads those lines on its own thread and forwards them through the
//! matching feed:
//!
//! ```text
//! press 0 412 230        touch: kind, slot, x, y
//! move 0 418 236
//! release 0 420 240
//! m 1.85                 proximity in metres
//! d 1                    one raw pulse-width level
//! ```
//!
//! Blank lines and `#` comments are skipped; malformed lines are logged and
//! dropped. A thread ends at end of input or once its consumer is gone.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::thread::{self, JoinHandle};

use log::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::sensor::{SensorFeed, SensorReading};
use crate::touch::{TouchEvent, TouchFeed, TouchKind};

/// Parse one touch line, stamping it with `t`.
pub fn parse_touch_line(line: &str, t: f64) -> Option<TouchEvent> {
    let mut parts = line.split_whitespace();
    let kind = match parts.next()? {
        "press" => TouchKind::Press,
        "move" => TouchKind::Move,
        "release" => TouchKind::Release,
        _ => return None,
    };
    let slot = parts.next()?.parse().ok()?;
    let x = parts.next()?.parse().ok()?;
    let y = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(TouchEvent {
        kind,
        slot,
        x,
        y,
        t,
        valid: true,
    })
}

pub fn parse_sensor_line(line: &str) -> Option<SensorReading> {
    let mut parts = line.split_whitespace();
    let reading = match (parts.next()?, parts.next()?) {
        ("m", v) => SensorReading::Meters(v.parse().ok()?),
        ("d", v) => SensorReading::Duty(v.parse().ok()?),
        _ => return None,
    };
    parts.next().is_none().then_some(reading)
}

fn is_blank(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

/// Forward touch lines from `reader` until it ends or the recognizer is gone.
pub fn pump_touch<R: BufRead>(reader: R, feed: &TouchFeed, clock: &dyn Clock) -> usize {
    let mut sent = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("touch input: {}", e);
                break;
            }
        };
        if is_blank(&line) {
            continue;
        }
        match parse_touch_line(&line, clock.now()) {
            Some(ev) => {
                if !feed.send(ev) {
                    break;
                }
                sent += 1;
            }
            None => debug!("touch input: ignoring {:?}", line),
        }
    }
    sent
}

/// Forward proximity lines from `reader` until it ends or the sensor is gone.
pub fn pump_sensor<R: BufRead>(reader: R, feed: &SensorFeed) -> usize {
    let mut sent = 0;
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                warn!("sensor input: {}", e);
                break;
            }
        };
        if is_blank(&line) {
            continue;
        }
        match parse_sensor_line(&line) {
            Some(reading) => {
                if !feed.send(reading) {
                    break;
                }
                sent += 1;
            }
            None => debug!("sensor input: ignoring {:?}", line),
        }
    }
    sent
}

/// Read lines from `path` on a named thread. The path must exist; opening it
/// happens on the thread since a FIFO blocks until its writer appears.
fn spawn_reader<F>(name: &str, path: &Path, pump: F) -> Result<JoinHandle<()>>
where
    F: FnOnce(BufReader<File>) -> usize + Send + 'static,
{
    std::fs::metadata(path)?;
    let label = name.to_string();
    let path = path.to_path_buf();
    info!("{}: reading {}", label, path.display());
    let handle = thread::Builder::new().name(label.clone()).spawn(move || {
        match File::open(&path) {
            Ok(file) => {
                let n = pump(BufReader::new(file));
                info!("{}: {} closed after {} lines", label, path.display(), n);
            }
            Err(e) => warn!("{}: {}: {}", label, path.display(), e),
        }
    })?;
    Ok(handle)
}

pub fn spawn_touch(path: &Path, feed: TouchFeed) -> Result<JoinHandle<()>> {
    spawn_reader("touch-input", path, move |r| pump_touch(r, &feed, &SystemClock))
}

pub fn spawn_sensor(path: &Path, feed: SensorFeed) -> Result<JoinHandle<()>> {
    spawn_reader("sensor-input", path, move |r| pump_sensor(r, &feed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sensor::ProximitySensor;
    use crate::touch::{InteractionState, Recognizer};
    use std::io::Cursor;

    #[test]
    fn touch_lines_parse() {
        let ev = parse_touch_line("press 0 412 230", 5.0).unwrap();
        assert_eq!(ev.kind, TouchKind::Press);
        assert_eq!((ev.slot, ev.x, ev.y, ev.t), (0, 412.0, 230.0, 5.0));
        assert_eq!(parse_touch_line("release 5 1.5 2", 0.0).unwrap().slot, 5);
        assert!(parse_touch_line("tap 0 1 2", 0.0).is_none());
        assert!(parse_touch_line("press 0 1", 0.0).is_none());
        assert!(parse_touch_line("press 0 1 2 3", 0.0).is_none());
        assert!(parse_touch_line("press x 1 2", 0.0).is_none());
    }

    #[test]
    fn sensor_lines_parse() {
        assert_eq!(parse_sensor_line("m 1.85"), Some(SensorReading::Meters(1.85)));
        assert_eq!(parse_sensor_line("d 1"), Some(SensorReading::Duty(1)));
        assert_eq!(parse_sensor_line("m"), None);
        assert_eq!(parse_sensor_line("q 1"), None);
        assert_eq!(parse_sensor_line("m 1 2"), None);
    }

    #[test]
    fn touch_stream_drives_the_recognizer() {
        let clock = ManualClock::at_hour(12);
        let now = clock.now();
        let (mut r, feed) = Recognizer::new(5, now);
        let input = "# bridge v1\npress 0 100 100\n\nmove 0 160 100\nrelease 0 200 100\nbogus\n";
        assert_eq!(pump_touch(Cursor::new(input), &feed, &clock), 3);
        r.update(now);
        assert_eq!(r.state(), InteractionState::ReleasedDrag);
    }

    #[test]
    fn sensor_stream_reaches_the_sensor() {
        let (mut s, feed) = ProximitySensor::with_feed();
        assert_eq!(pump_sensor(Cursor::new("m 3.5\n"), &feed), 1);
        s.update();
        assert_eq!(s.distance(), 3.5);
    }

    #[test]
    fn pump_stops_when_consumer_is_gone() {
        let (r, feed) = Recognizer::new(5, 0.0);
        drop(r);
        let clock = ManualClock::at_hour(12);
        assert_eq!(pump_touch(Cursor::new("press 0 1 1\npress 0 2 2\n"), &feed, &clock), 0);
    }

    #[test]
    fn file_source_is_read_to_the_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("range");
        std::fs::write(&path, "m 0.7\n").unwrap();
        let (mut s, feed) = ProximitySensor::with_feed();
        spawn_sensor(&path, feed).unwrap().join().unwrap();
        s.update();
        assert_eq!(s.distance(), 0.7);
    }

    #[test]
    fn missing_source_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_s, feed) = ProximitySensor::with_feed();
        assert!(spawn_sensor(&dir.path().join("nope"), feed).is_err());
    }
}
