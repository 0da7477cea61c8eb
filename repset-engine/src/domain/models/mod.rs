mod ids;
mod session;
mod set_record;

pub use ids::*;
pub use session::*;
pub use set_record::*;
