pub mod message;
pub mod watchlist;
pub mod test_util;
