//! Device orientation adapter, grounded in `original_source/orientation_sensors.py`
//! (the `net.hadess.SensorProxy` DBus proxy and its orientation-string-to-heading map).

use std::sync::Mutex;
use std::time::Duration;

use dbus::blocking::Connection;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
const SENSOR_PROXY_DEST: &str = "net.hadess.SensorProxy";
const SENSOR_PROXY_PATH: &str = "/net/hadess/SensorProxy";

/// Map an `iio-sensor-proxy` orientation string to a compass heading in degrees.
pub fn orientation_to_degrees(orientation: &str) -> Option<f64> {
    match orientation {
        "normal" => Some(0.0),
        "right-up" => Some(90.0),
        "bottom-up" => Some(180.0),
        "left-up" => Some(270.0),
        _ => None,
    }
}

struct State {
    connected: bool,
    warned: bool,
}

/// Wraps the blocking `dbus` client behind a mutex so concurrent callers never
/// interleave connection attempts (§4.3).
pub struct OrientationSensor {
    state: Mutex<State>,
}

impl Default for OrientationSensor {
    fn default() -> Self {
        Self {
            state: Mutex::new(State { connected: false, warned: false }),
        }
    }
}

impl OrientationSensor {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_orientation_blocking() -> Option<String> {
        let conn = Connection::new_system().ok()?;
        let proxy = conn.with_proxy(SENSOR_PROXY_DEST, SENSOR_PROXY_PATH, DEFAULT_TIMEOUT);
        let (value,): (String,) = proxy
            .method_call(
                "org.freedesktop.DBus.Properties",
                "Get",
                (SENSOR_PROXY_DEST, "AccelerometerOrientation"),
            )
            .ok()?;
        Some(value)
    }

    /// Current heading in degrees, or `None` if the sensor proxy is unavailable.
    pub async fn heading_degrees(&self) -> Option<f64> {
        let warned_before = {
            let state = self.state.lock().unwrap();
            state.warned
        };
        let result = tokio::time::timeout(
            DEFAULT_TIMEOUT,
            tokio::task::spawn_blocking(Self::read_orientation_blocking),
        )
        .await;

        let mut state = self.state.lock().unwrap();
        match result {
            Ok(Ok(Some(orientation))) => {
                state.connected = true;
                state.warned = false;
                orientation_to_degrees(&orientation)
            }
            _ => {
                state.connected = false;
                if !warned_before {
                    tracing::warn!("orientation sensor proxy unavailable, degrading to no heading");
                    state.warned = true;
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_orientations() {
        assert_eq!(orientation_to_degrees("normal"), Some(0.0));
        assert_eq!(orientation_to_degrees("right-up"), Some(90.0));
        assert_eq!(orientation_to_degrees("bottom-up"), Some(180.0));
        assert_eq!(orientation_to_degrees("left-up"), Some(270.0));
        assert_eq!(orientation_to_degrees("unknown-value"), None);
    }

    #[tokio::test]
    async fn degrades_to_none_without_dbus() {
        let sensor = OrientationSensor::new();
        // In CI/test environments there is no sensor proxy; this must not panic or hang.
        let _ = sensor.heading_degrees().await;
    }
}
