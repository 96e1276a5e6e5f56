pub mod machine;
pub mod model;
pub mod schedule;
pub mod service;
