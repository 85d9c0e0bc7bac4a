mod handler;
mod model;

pub use handler::generate_layout;
pub use model::FinancialSnapshot;
