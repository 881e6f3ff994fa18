extern crate adskalman;
extern crate nalgebra as na;
extern crate tracking;
#[macro_use]
extern crate approx;

use crate::na::core::{Matrix4, Vector4};

use adskalman::{StateAndCovariance, TransitionModelLinearNoControl};

/// Running the constant-dt model twice over dt is equivalent to running it
/// once over 2*dt: the transition model commutes with step duration.
#[test]
fn test_missing_frames_via_large_dt_2d() {
    use tracking::motion_model_2d::ConstantVelocity2DModel;

    let motion_noise_scale = 1.234;
    let model = ConstantVelocity2DModel::new(motion_noise_scale);

    let dt1 = 5.678;
    let state0 = Vector4::new(1.2, 3.4, 5.6, 7.8);
    let covar0 = 42.0 * Matrix4::<f64>::identity();

    let est0 = StateAndCovariance::new(state0, covar0);

    let mm1 = model.calc_for_dt(dt1);
    let est1_1 = mm1.predict(&est0);
    let est1_2 = mm1.predict(&est1_1);

    let mm2 = model.calc_for_dt(2.0 * dt1);
    let est2_2 = mm2.predict(&est0);

    assert_relative_eq!(est1_2.state(), est2_2.state());
    assert_relative_eq!(est1_2.covariance(), est2_2.covariance());
}
