pub mod book;
pub mod chunked;
pub mod store;

pub use book::{open_stream, parse_line};
pub use chunked::ChunkedEventCache;
pub use store::EventsStore;
