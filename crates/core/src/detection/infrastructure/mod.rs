pub mod cascade_detector;
pub mod haar_cascade;
#[cfg(feature = "opencv")]
pub mod opencv_cascade_detector;
pub mod rect_grouping;
