mod handler;

pub use handler::health_check;
