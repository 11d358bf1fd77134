// Swerve base runtime
//
// A four-module swerve chassis driven over zenoh: shaped teleop and
// path-follower commands in, fused pose estimate and health out.

pub mod config;
pub mod drive;
pub mod geometry;
pub mod messages;
pub mod runtime;
