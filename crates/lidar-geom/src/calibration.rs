use lidar_types::NUM_RINGS;

/// Factory vertical angle per ring, degrees, ring 0..40. Fixed by the sensor
/// model and never recalibrated at runtime.
#[rustfmt::skip]
pub const ELEVATION_DEG: [f64; NUM_RINGS] = [
    -16.0, -15.0, -14.0, -13.0, -12.0, -11.0, -10.0, -9.0, -8.0, -7.0,
     -6.0,  -5.0,  -4.0, -3.5,  -3.0,  -2.5,  -2.0, -1.5, -1.0, -0.5,
      0.0,   0.5,   1.0,  1.5,   2.0,   2.5,   3.0,  3.5,  4.0,  5.0,
      6.0,   7.0,   8.0,  9.0,  10.0,  11.0,  12.0, 13.0, 14.0, 15.0,
];

/// Per-ring azimuth correction from the firing sequence, degrees. Lasers in
/// the same firing group sample slightly different azimuths as the head
/// spins; this table is applied once per point in `polar_to_sensor`.
#[rustfmt::skip]
pub const FIRETIME_AZIMUTH_CORRECTION_DEG: [f64; NUM_RINGS] = [
    0.00, 0.05, -0.05, 0.10, -0.10, 0.04, -0.04, 0.09, -0.09, 0.03,
    -0.03, 0.08, -0.08, 0.02, -0.02, 0.07, -0.07, 0.01, -0.01, 0.06,
    -0.06, 0.00, 0.05, -0.05, 0.10, -0.10, 0.04, -0.04, 0.09, -0.09,
    0.03, -0.03, 0.08, -0.08, 0.02, -0.02, 0.07, -0.07, 0.01, -0.01,
];
