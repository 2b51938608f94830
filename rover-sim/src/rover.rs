//! Simulated rover state shared by all client sessions

use parking_lot::Mutex;
use rover_shared::{
    CharacteristicsPacket, DrivetrainPacket, HealthPacket, ManualDrivePacket, Vec3, Vec4,
    WhiskersPacket,
};
use std::time::Instant;

const MEMORY_TOTAL: i64 = 512 * 1024 * 1024;

pub struct SimRover {
    motors: Mutex<[f64; 6]>,
    started_at: Instant,
}

impl SimRover {
    pub fn new() -> Self {
        Self {
            motors: Mutex::new([0.0; 6]),
            started_at: Instant::now(),
        }
    }

    /// Apply a drive command: motors 0-2 are the left side, 3-5 the right
    pub fn apply_drive(&self, drive: &ManualDrivePacket) {
        let drive = drive.quantized();
        let mut motors = self.motors.lock();
        motors[..3].fill(drive.left);
        motors[3..].fill(drive.right);
    }

    pub fn drivetrain(&self) -> DrivetrainPacket {
        let motors = *self.motors.lock();
        DrivetrainPacket { motors }
    }

    /// Health drifts slowly with uptime so the console has something to show
    pub fn health(&self) -> HealthPacket {
        let uptime = self.started_at.elapsed().as_secs_f64();
        HealthPacket {
            temp: 40.0 + 5.0 * (uptime / 60.0).sin(),
            memory_used: MEMORY_TOTAL / 4 + ((uptime as i64) % 64) * 1024 * 1024,
            memory_total: MEMORY_TOTAL,
        }
    }

    /// Whiskers read contact while the rover is pushing forward
    pub fn whiskers(&self) -> WhiskersPacket {
        let motors = self.drivetrain().motors;
        let mut sensors = [0; 6];
        for (sensor, motor) in sensors.iter_mut().zip(motors) {
            *sensor = (motor.max(0.0) * 100.0) as i32;
        }
        WhiskersPacket { sensors }
    }

    /// Fixed six-wheel geometry, in metres
    pub fn characteristics(&self) -> CharacteristicsPacket {
        let wheel = |x: f64, y: f64| Vec3::new(x, y, 0.0);
        let whisker = |x: f64, y: f64, angle: f64| Vec4::new(x, y, 0.05, angle);
        CharacteristicsPacket {
            frame_size: Vec3::new(0.6, 0.4, 0.2),
            wheel_diameter: 0.12,
            wheel_locations: [
                wheel(-0.25, 0.2),
                wheel(0.0, 0.2),
                wheel(0.25, 0.2),
                wheel(-0.25, -0.2),
                wheel(0.0, -0.2),
                wheel(0.25, -0.2),
            ],
            whiskers: [
                whisker(0.3, 0.2, 30.0),
                whisker(0.3, 0.0, 0.0),
                whisker(0.3, -0.2, -30.0),
                whisker(-0.3, 0.2, 150.0),
                whisker(-0.3, 0.0, 180.0),
                whisker(-0.3, -0.2, -150.0),
            ],
        }
    }
}

impl Default for SimRover {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drive_sets_sides() {
        let rover = SimRover::new();
        rover.apply_drive(&ManualDrivePacket::new(0.567, -2.0));
        assert_eq!(
            rover.drivetrain().motors,
            [0.56, 0.56, 0.56, -1.0, -1.0, -1.0]
        );
        assert_eq!(rover.whiskers().sensors, [56, 56, 56, 0, 0, 0]);
    }

    #[test]
    fn test_health_is_plausible() {
        let health = SimRover::new().health();
        assert!(health.temp > 30.0 && health.temp < 50.0);
        assert!(health.memory_used < health.memory_total);
        assert!(health.memory_percent() >= 25);
    }
}
