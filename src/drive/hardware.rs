// Hardware capabilities the drive stack needs from actuator/sensor drivers
//
// Reads are infallible at this layer: a driver that loses its sensor hands
// back whatever it last saw, and the next tick corrects.

/// Drive motor, steering motor and steering sensors of one swerve module
#[cfg_attr(test, mockall::automock)]
pub trait ModuleHardware {
    /// Wheel surface speed, m/s
    fn read_drive_velocity(&self) -> f64;

    /// Cumulative wheel travel since the last reset, m
    fn read_drive_position(&self) -> f64;

    /// Relative steering encoder, rad (continuous, arbitrary zero at power-on)
    fn read_steering_angle(&self) -> f64;

    /// Raw absolute steering sensor, rad (mounting offset not removed)
    fn read_steering_absolute_angle(&self) -> f64;

    /// Closed-loop drive velocity setpoint, m/s
    fn set_drive_velocity(&mut self, velocity: f64);

    /// Open-loop steering output as a fraction of supply voltage, [-1, 1]
    fn set_steering_voltage(&mut self, fraction: f64);

    /// Zero the cumulative drive position
    fn reset_drive_position(&mut self);
}

/// Yaw source for the chassis
#[cfg_attr(test, mockall::automock)]
pub trait HeadingSensor {
    /// Continuous yaw since the last reset, rad, counter-clockwise positive
    fn read_heading(&self) -> f64;

    fn reset(&mut self);
}
