pub mod cancellation;
pub mod constants;
pub mod frame;
pub mod model_resolver;
pub mod region;
