// PID controller with optional continuous (wrapped) input

use crate::geometry::wrap_angle;

#[derive(Debug, Clone, Copy, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

#[derive(Debug, Clone)]
pub struct PidController {
    gains: PidGains,
    continuous: bool,
    integral: f64,
    previous_error: Option<f64>,
    last_error: f64,
}

impl PidController {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            continuous: false,
            integral: 0.0,
            previous_error: None,
            last_error: 0.0,
        }
    }

    /// Treat the measurement as an angle: errors are wrapped to (-pi, pi]
    pub fn with_continuous_input(mut self) -> Self {
        self.continuous = true;
        self
    }

    /// Error used on the most recent call to [`PidController::calculate`]
    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    /// Controller output driving `measurement` towards `setpoint`
    pub fn calculate(&mut self, measurement: f64, setpoint: f64, dt: f64) -> f64 {
        let error = if self.continuous {
            wrap_angle(setpoint - measurement)
        } else {
            setpoint - measurement
        };

        let derivative = match self.previous_error {
            Some(previous) if dt > 0.0 => {
                let change = if self.continuous {
                    wrap_angle(error - previous)
                } else {
                    error - previous
                };
                change / dt
            }
            _ => 0.0,
        };
        if dt > 0.0 {
            self.integral += error * dt;
        }

        self.previous_error = Some(error);
        self.last_error = error;

        self.gains.kp * error + self.gains.ki * self.integral + self.gains.kd * derivative
    }

    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.previous_error = None;
        self.last_error = 0.0;
    }
}
