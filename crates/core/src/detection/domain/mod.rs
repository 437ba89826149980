pub mod detection_result;
pub mod detector;
pub mod two_stage_scan;
