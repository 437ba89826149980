pub mod capture_loop;
pub mod dispatcher;
pub mod pipeline_logger;
