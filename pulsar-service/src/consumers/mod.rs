pub mod multi;
pub mod single;

pub use multi::MultiConsumer;
pub use single::SingleConsumer;
