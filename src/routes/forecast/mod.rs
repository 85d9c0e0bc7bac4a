mod handler;
mod model;

pub use handler::get_forecast;
pub use model::{ForecastPoint, TransactionRecord, compute_forecast};
