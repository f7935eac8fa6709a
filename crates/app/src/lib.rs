//! SignSight: live sign-language recognition from a camera or submitted images.

pub mod cli;
pub mod recognition;
