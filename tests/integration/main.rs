//! End-to-end scan cycle tests against a deterministic in-memory feed.

mod cycle;
mod mock_feed;
