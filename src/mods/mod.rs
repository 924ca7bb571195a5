pub mod calibrate;
pub mod live;
pub mod replay;
