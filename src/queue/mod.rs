// Queue management module
// Maps logical playlist positions onto physical track indices

pub mod order;

pub use order::TrackOrder;
