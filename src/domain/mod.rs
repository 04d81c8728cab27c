pub mod event;
pub mod lease;
pub mod mapper;
pub mod state;

pub use event::*;
pub use lease::LeaseToken;
pub use mapper::map_detail;
pub use state::EventStatus;
