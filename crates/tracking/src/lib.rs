extern crate adskalman;
extern crate nalgebra as na;
extern crate num_traits;

pub mod motion_model_2d;
pub mod observation_model_2d;
