pub mod errors;
pub mod ids;
pub mod mutation;
pub mod record;
pub mod report;
pub mod result;

pub use errors::*;
pub use ids::*;
pub use mutation::*;
pub use record::*;
pub use report::*;
pub use result::*;
