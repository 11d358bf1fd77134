// Trapezoidal velocity shaping
// Bounds how fast a velocity setpoint may change between ticks.

/// Velocity and acceleration limits for one axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrapezoidalConstraint {
    pub max_velocity: f64,
    pub max_acceleration: f64,
}

impl TrapezoidalConstraint {
    pub const fn new(max_velocity: f64, max_acceleration: f64) -> Self {
        Self {
            max_velocity,
            max_acceleration,
        }
    }

    /// Step `previous` towards `target` for one tick of length `dt`.
    ///
    /// The result never changes faster than `max_acceleration` and never
    /// exceeds `max_velocity` in magnitude.
    pub fn calculate(&self, target: f64, previous: f64, dt: f64) -> f64 {
        let target = target.clamp(-self.max_velocity, self.max_velocity);
        let max_step = self.max_acceleration * dt.max(0.0);
        let step = (target - previous).clamp(-max_step, max_step);

        (previous + step).clamp(-self.max_velocity, self.max_velocity)
    }
}

/// A constraint together with the last value it produced
///
/// Chassis axes and module drive speeds each own one of these, so their
/// histories never interfere.
#[derive(Debug, Clone, Copy)]
pub struct VelocityShaper {
    constraint: TrapezoidalConstraint,
    output: f64,
}

impl VelocityShaper {
    pub const fn new(constraint: TrapezoidalConstraint) -> Self {
        Self {
            constraint,
            output: 0.0,
        }
    }

    /// Shape `target` for this tick and remember the result
    pub fn shape(&mut self, target: f64, dt: f64) -> f64 {
        self.output = self.constraint.calculate(target, self.output, dt);
        self.output
    }

    /// Last shaped value
    pub fn output(&self) -> f64 {
        self.output
    }

    /// Forget history, e.g. after the actuators were stopped
    pub fn reset(&mut self) {
        self.output = 0.0;
    }
}
